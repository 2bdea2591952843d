//! Chain demo
//!
//! Builds the linked chain scene on the headless GPU, replays a short input
//! script that moves and turns the first link, and reports where the last
//! link ended up.
//!
//! Usage: `chain_app [config.toml|config.ron]`

use std::process::ExitCode;

use chain_engine::foundation::logging;
use chain_engine::prelude::*;

fn load_config() -> Result<ApplicationConfig, AppError> {
    match std::env::args().nth(1) {
        Some(path) => Ok(ApplicationConfig::load_from_file(&path)?),
        None => Ok(ApplicationConfig::default()),
    }
}

fn demo_script() -> ScriptedInput {
    ScriptedInput::default()
        .hold(&[KeyCode::Up], 10)
        .hold(&[KeyCode::Right, KeyCode::D], 20)
        .hold(&[KeyCode::Space], 1)
        .hold(&[KeyCode::W], 15)
        .hold(&[KeyCode::Digit0], 1)
        .idle(5)
}

fn run(config: &ApplicationConfig) -> Result<(), AppError> {
    let mut engine = Engine::headless(config)?;
    let mut app = ObjectControlApp::new(NodeId::ROOT);
    let mut input = demo_script();

    engine.run(&mut app, &mut input)?;

    if let Some(last) = engine.scene().nodes().last() {
        let origin = last.world_origin();
        log::info!(
            "Last link origin: ({:.3}, {:.3}, {:.3})",
            origin.x,
            origin.y,
            origin.z
        );
    }

    let stats = engine.pipeline().stats();
    let timer = engine.timer();
    log::info!(
        "{} frames in {:?} ({:.1} fps), {} draws, {} skipped uploads, average GPU wait {:?}, last frame {:?}",
        stats.frames,
        timer.elapsed(),
        timer.average_fps(),
        stats.draws,
        stats.skipped_uploads,
        stats.average_gpu_wait(),
        timer.frame_time()
    );
    Ok(())
}

fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init_with_level("info");
            log::error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    logging::init_with_level(&config.log_level);
    log::info!(
        "Starting chain demo: {} objects, {}x{}",
        config.scene.object_count,
        config.renderer.width,
        config.renderer.height
    );

    match run(&config) {
        Ok(()) => {
            log::info!("Chain demo completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Chain demo failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
