#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rustdoc::invalid_rust_codeblocks)]

//! # Frame Engine
//!
//! The frame-scheduling core of a game engine: a categorized task scheduler
//! and a transform hierarchy with lazily cached world matrices.
//!
//! ## Key Modules
//!
//! * `application_state` - Configuration, device queries and the frame loop
//! * `engine_state` - The scheduler and transform hierarchy the loop drives
//!
//! ## Architecture
//!
//! Work is split by category: small and large CPU pools, a main-thread queue
//! drained once per frame, counted game-logic tasks the main thread waits on
//! before draining, and a file queue running one task at a time. The
//! transform hierarchy lives on the main thread and is mutated after that
//! frame barrier, recomputing world matrices only for invalidated subtrees.
//!
//! ## Usage
//!
//! ```rust,no_run
//! // Native application initialization
//! fn main() -> anyhow::Result<()> {
//!     frame_engine::run()
//! }
//! ```
//!
//! For web applications, `run_web()` is exported to JavaScript.

pub mod application_state;
pub mod engine_state;

#[cfg(not(target_family = "wasm"))]
use anyhow::Context;
#[cfg(target_family = "wasm")]
use wasm_bindgen::prelude::wasm_bindgen;

use application_state::{config::EngineConfig, ApplicationState};

/// Environment variable holding the path of a JSON engine config.
pub const CONFIG_PATH_VAR: &str = "FRAME_ENGINE_CONFIG";

/// Loads the config named by the first argument or `FRAME_ENGINE_CONFIG`,
/// falling back to defaults when neither is given.
#[cfg(not(target_family = "wasm"))]
fn load_config() -> anyhow::Result<EngineConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_PATH_VAR).ok());
    match path {
        Some(path) => EngineConfig::load(&path)
            .with_context(|| format!("loading engine config from {path}")),
        None => Ok(EngineConfig::default()),
    }
}

/// Initializes logging, builds the engine and runs the configured number of frames.
#[cfg(not(target_family = "wasm"))]
pub fn run() -> anyhow::Result<()> {
    let config = load_config()?;

    let mut log_builder = env_logger::Builder::new();
    log_builder
        .target(env_logger::Target::Stdout)
        .parse_env("RUST_LOG");
    if let Some(filter) = &config.log_filter {
        log_builder.parse_filters(filter);
    }
    log_builder.init();
    log::info!("Logger initialized");

    let mut state = ApplicationState::new(&config).context("starting the engine")?;
    state.run(config.frames);
    Ok(())
}

/// Web entry point. Runs the configured frames with default settings.
#[cfg(target_family = "wasm")]
#[wasm_bindgen]
pub fn run_web() {
    std::panic::set_hook(Box::new(console_error_panic_hook::hook));
    // Fails only if a logger is already installed.
    let _ = console_log::init_with_level(log::Level::Info);

    let config = EngineConfig::default();
    match ApplicationState::new(&config) {
        Ok(mut state) => {
            state.run(config.frames);
        }
        Err(error) => log::error!("Failed to start engine: {error}"),
    }
}
