//! fruitd - Fruit Lens web service
//!
//! This daemon:
//! 1. Loads configuration (file, environment, command line)
//! 2. Makes sure the model is present, downloading it if configured
//! 3. Loads the detector once and serves uploads and the live stream

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;

use fruit_lens::{
    api::ApiServer,
    config::AppConfig,
    detect::open_backend,
    model::{ensure_model, ModelStatus},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Fruit detection web service")]
struct Args {
    /// JSON configuration file.
    #[arg(long, env = "FRUIT_CONFIG")]
    config: Option<PathBuf>,
    /// Listen address, e.g. 0.0.0.0:5000.
    #[arg(long)]
    addr: Option<String>,
    /// Model path, or stub://Label,... for the stub detector.
    #[arg(long)]
    model: Option<String>,
    /// Camera device for the live stream.
    #[arg(long)]
    camera: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = AppConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.addr = addr;
    }
    if let Some(model) = args.model {
        config.model.path = model;
    }
    if let Some(device) = args.camera {
        let mut camera = config.camera.take().unwrap_or_default();
        camera.device = device;
        config.camera = Some(camera);
    }
    config.validate()?;

    config.storage.layout().ensure()?;
    match ensure_model(&config.model)? {
        ModelStatus::Downloaded => log::info!("downloaded model to {}", config.model.path),
        ModelStatus::Present => log::info!("using model {}", config.model.path),
        ModelStatus::Virtual => log::warn!("using stub detector {}", config.model.path),
    }
    let backend = open_backend(&config.model)?.default_backend()?;
    let pipeline = fruit_lens::build_pipeline(&config, backend);

    let api_handle = ApiServer::new(fruit_lens::api_config(&config), pipeline).spawn()?;
    log::info!("fruit lens listening on http://{}", api_handle.addr);
    match &config.camera {
        Some(camera) => log::info!("live stream enabled on {}", camera.device),
        None => log::info!("live stream disabled (no camera configured)"),
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("fruitd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping web server...");
    api_handle.stop()?;

    Ok(())
}
