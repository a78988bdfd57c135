//! Lumen viewer
//!
//! Opens a window, loads the scene named in `lumen.toml` and flies a camera
//! through it. WASD/EQ move, the mouse looks around, Tab cycles background
//! effects and `[`/`]` change the render scale.

use lumen_engine::prelude::*;

const CONFIG_PATH: &str = "lumen.toml";

fn main() {
    logging::init();

    if let Err(e) = run() {
        log::error!("Viewer exited with error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), EngineError> {
    let config = EngineConfig::load_or_default(CONFIG_PATH)?;

    let mut engine = Engine::new(config)?;
    let result = engine.run();
    engine.terminate();
    result
}
