//! Time management utilities

use std::time::{Duration, Instant};

/// Wall-clock pacing of the render loop
///
/// Ticked once per completed frame. Since every frame ends with a fence wait,
/// the frame time includes the GPU execution time.
pub struct Timer {
    started: Instant,
    last_frame: Instant,
    frame_time: Duration,
    slowest_frame: Duration,
    frame_count: u64,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    /// Timer starting now with no frames
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_frame: now,
            frame_time: Duration::ZERO,
            slowest_frame: Duration::ZERO,
            frame_count: 0,
        }
    }

    /// Mark the end of a frame
    pub fn update(&mut self) {
        let now = Instant::now();
        self.frame_time = now.duration_since(self.last_frame);
        self.slowest_frame = self.slowest_frame.max(self.frame_time);
        self.last_frame = now;
        self.frame_count += 1;
    }

    /// Duration of the most recent frame
    pub fn frame_time(&self) -> Duration {
        self.frame_time
    }

    /// Longest frame so far
    pub fn slowest_frame(&self) -> Duration {
        self.slowest_frame
    }

    /// Time from creation to the most recent frame
    pub fn elapsed(&self) -> Duration {
        self.last_frame.duration_since(self.started)
    }

    /// Frames completed
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Frames per second over the whole run, 0 before the first frame
    pub fn average_fps(&self) -> f32 {
        let elapsed = self.elapsed().as_secs_f32();
        if elapsed > 0.0 {
            self.frame_count as f32 / elapsed
        } else {
            0.0
        }
    }
}

/// Simple stopwatch for measuring blocking sections such as fence waits
pub struct Stopwatch {
    start_time: Option<Instant>,
    elapsed: Duration,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopwatch {
    /// Create a new stopped stopwatch
    pub fn new() -> Self {
        Self {
            start_time: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Create a new stopwatch and start it immediately
    pub fn start_new() -> Self {
        let mut stopwatch = Self::new();
        stopwatch.start();
        stopwatch
    }

    /// Start the stopwatch
    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Stop the stopwatch and accumulate elapsed time
    pub fn stop(&mut self) {
        if let Some(start) = self.start_time.take() {
            self.elapsed += start.elapsed();
        }
    }

    /// Get the elapsed time
    pub fn elapsed(&self) -> Duration {
        let running = self.start_time.map_or(Duration::ZERO, |start| start.elapsed());
        self.elapsed + running
    }

    /// Check if the stopwatch is currently running
    pub fn is_running(&self) -> bool {
        self.start_time.is_some()
    }
}
