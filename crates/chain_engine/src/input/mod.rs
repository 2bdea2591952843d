//! Input snapshot and object controls
//!
//! Input arrives once per frame as an [`InputSnapshot`]: a 256-entry key array
//! indexed by scan code plus a quit flag. Where the snapshot comes from is up
//! to the [`InputSource`]; the demo and the tests use [`ScriptedInput`].

use std::collections::VecDeque;

use crate::scene::LocalTransform;

/// Keys the engine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    /// Escape
    Escape,
    /// Digit 0 on the main row
    Digit0,
    /// W key
    W,
    /// A key
    A,
    /// S key
    S,
    /// D key
    D,
    /// Space bar
    Space,
    /// Up arrow
    Up,
    /// Left arrow
    Left,
    /// Right arrow
    Right,
    /// Down arrow
    Down,
}

impl KeyCode {
    /// Keyboard scan code (set 1, extended keys with the high bit)
    pub const fn scan_code(self) -> u8 {
        match self {
            KeyCode::Escape => 0x01,
            KeyCode::Digit0 => 0x0B,
            KeyCode::W => 0x11,
            KeyCode::A => 0x1E,
            KeyCode::S => 0x1F,
            KeyCode::D => 0x20,
            KeyCode::Space => 0x39,
            KeyCode::Up => 0xC8,
            KeyCode::Left => 0xCB,
            KeyCode::Right => 0xCD,
            KeyCode::Down => 0xD0,
        }
    }
}

/// Pressed state of every key, indexed by scan code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyboardState {
    keys: [bool; 256],
}

impl Default for KeyboardState {
    fn default() -> Self {
        Self { keys: [false; 256] }
    }
}

impl KeyboardState {
    /// All keys released
    pub fn new() -> Self {
        Self::default()
    }

    /// State built from a list of held keys
    pub fn with_keys(keys: &[KeyCode]) -> Self {
        let mut state = Self::new();
        for key in keys {
            state.set(*key, true);
        }
        state
    }

    /// Whether `key` is held
    pub fn is_pressed(&self, key: KeyCode) -> bool {
        self.keys[key.scan_code() as usize]
    }

    /// Whether the key with `scan_code` is held
    pub fn is_scan_code_pressed(&self, scan_code: u8) -> bool {
        self.keys[scan_code as usize]
    }

    /// Press or release `key`
    pub fn set(&mut self, key: KeyCode, pressed: bool) {
        self.keys[key.scan_code() as usize] = pressed;
    }

    /// Press or release a raw scan code
    pub fn set_scan_code(&mut self, scan_code: u8, pressed: bool) {
        self.keys[scan_code as usize] = pressed;
    }

    /// Raw key array
    pub fn as_array(&self) -> &[bool; 256] {
        &self.keys
    }
}

/// One frame of input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputSnapshot {
    /// Held keys
    pub keys: KeyboardState,
    /// The window or the host asked to stop
    pub quit: bool,
}

impl InputSnapshot {
    /// Snapshot with `keys` held
    pub fn pressing(keys: &[KeyCode]) -> Self {
        Self {
            keys: KeyboardState::with_keys(keys),
            quit: false,
        }
    }

    /// Snapshot that ends the loop
    pub fn quit() -> Self {
        Self {
            keys: KeyboardState::new(),
            quit: true,
        }
    }

    /// Quit flag set or Escape held
    pub fn wants_quit(&self) -> bool {
        self.quit || self.keys.is_pressed(KeyCode::Escape)
    }
}

/// Keyboard mapping for the controlled object
///
/// Arrows move the object in the XY plane. D/A/W/S turn it, one axis per
/// frame with D taking precedence over A, A over W and W over S. Space tints
/// the clear color green for the frame it is held.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectControls {
    /// Distance per frame for arrow keys
    pub move_step: f32,
    /// Degrees per frame for D/A/W/S
    pub turn_step_deg: f32,
}

impl Default for ObjectControls {
    fn default() -> Self {
        Self {
            move_step: 1.0,
            turn_step_deg: 1.0,
        }
    }
}

impl ObjectControls {
    /// Apply one frame of input to `local` and return this frame's clear color
    pub fn apply(
        &self,
        snapshot: &InputSnapshot,
        local: &mut LocalTransform,
        base_clear_color: [f32; 4],
    ) -> [f32; 4] {
        let keys = &snapshot.keys;

        if keys.is_pressed(KeyCode::Digit0) {
            log::debug!("Hit 0");
        }

        let mut clear_color = base_clear_color;
        if keys.is_pressed(KeyCode::Space) {
            clear_color[1] = 1.0;
        }

        if keys.is_pressed(KeyCode::Up) {
            local.position.y += self.move_step;
        } else if keys.is_pressed(KeyCode::Down) {
            local.position.y -= self.move_step;
        }
        if keys.is_pressed(KeyCode::Right) {
            local.position.x += self.move_step;
        } else if keys.is_pressed(KeyCode::Left) {
            local.position.x -= self.move_step;
        }

        if keys.is_pressed(KeyCode::D) {
            local.rotation_deg.y += self.turn_step_deg;
        } else if keys.is_pressed(KeyCode::A) {
            local.rotation_deg.y -= self.turn_step_deg;
        } else if keys.is_pressed(KeyCode::W) {
            local.rotation_deg.x += self.turn_step_deg;
        } else if keys.is_pressed(KeyCode::S) {
            local.rotation_deg.x -= self.turn_step_deg;
        }

        clear_color
    }
}

/// Per-frame input provider
pub trait InputSource {
    /// Input for the next frame
    fn poll(&mut self) -> InputSnapshot;
}

/// Replays a fixed sequence of snapshots, then asks to quit
#[derive(Debug, Clone, Default)]
pub struct ScriptedInput {
    frames: VecDeque<InputSnapshot>,
    polled: u64,
}

impl ScriptedInput {
    /// Script from a sequence of snapshots
    pub fn new(frames: impl IntoIterator<Item = InputSnapshot>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            polled: 0,
        }
    }

    /// Append `frames` copies of a snapshot holding `keys`
    pub fn hold(mut self, keys: &[KeyCode], frames: usize) -> Self {
        let snapshot = InputSnapshot::pressing(keys);
        self.frames.extend(std::iter::repeat(snapshot).take(frames));
        self
    }

    /// Append `frames` snapshots with no keys held
    pub fn idle(self, frames: usize) -> Self {
        self.hold(&[], frames)
    }

    /// Snapshots not yet polled
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }

    /// Snapshots handed out so far
    pub fn polled(&self) -> u64 {
        self.polled
    }
}

impl InputSource for ScriptedInput {
    fn poll(&mut self) -> InputSnapshot {
        self.polled += 1;
        self.frames.pop_front().unwrap_or_else(InputSnapshot::quit)
    }
}
