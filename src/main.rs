//! # Frame Engine Entry Point
//!
//! Runs the headless frame loop natively. The optional first argument is the
//! path of a JSON engine config.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=info cargo run --release -- engine.json
//! ```

fn main() {
    #[cfg(not(target_family = "wasm"))]
    if let Err(error) = frame_engine::run() {
        eprintln!("frame-engine: {error:#}");
        std::process::exit(1);
    }
}
