//! fruit_detect - run one image through the detection pipeline
//!
//! Stores the image, annotates it and prints the detected fruit the same way
//! the result page lists them, followed by the annotated artifact path.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use fruit_lens::{
    config::AppConfig, detect::open_backend, model::ensure_model, ArtifactLayout, UploadedAsset,
};

#[derive(Parser, Debug)]
#[command(
    name = "fruit_detect",
    about = "Detect fruit in a local image and write an annotated copy"
)]
struct Args {
    /// Image to analyse
    image: PathBuf,

    /// JSON configuration file
    #[arg(long, env = "FRUIT_CONFIG")]
    config: Option<PathBuf>,

    /// Model path, or stub://Label,... for the stub detector
    #[arg(long)]
    model: Option<String>,

    /// Minimum detection score (0..=1)
    #[arg(long)]
    confidence: Option<f32>,

    /// Directory uploads are copied into
    #[arg(long, value_name = "DIR")]
    upload_dir: Option<PathBuf>,

    /// Directory annotated images are written to
    #[arg(long, value_name = "DIR")]
    result_dir: Option<PathBuf>,

    /// Artifact layout (shared|per-request)
    #[arg(long, value_name = "LAYOUT")]
    layout: Option<ArtifactLayout>,

    /// Print the artifact path only
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut config = AppConfig::load_from(args.config.as_deref())?;
    if let Some(model) = args.model {
        config.model.path = model;
    }
    if let Some(confidence) = args.confidence {
        config.confidence = confidence;
    }
    if let Some(dir) = args.upload_dir {
        config.storage.upload_dir = dir;
    }
    if let Some(dir) = args.result_dir {
        config.storage.result_dir = dir;
    }
    if let Some(layout) = args.layout {
        config.storage.layout = layout;
    }
    config.validate()?;

    let filename = args
        .image
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("{} has no usable file name", args.image.display()))?
        .to_string();
    let bytes =
        std::fs::read(&args.image).with_context(|| format!("read {}", args.image.display()))?;

    config.storage.layout().ensure()?;
    ensure_model(&config.model)?;
    let backend = open_backend(&config.model)?.default_backend()?;
    let pipeline = fruit_lens::build_pipeline(&config, backend);

    let result = pipeline.run(UploadedAsset::new(filename, bytes), pipeline.confidence())?;
    if !args.quiet {
        let view = pipeline.present(&result)?;
        if view.display.is_empty() {
            println!("no fruit detected");
        }
        for line in &view.display {
            println!("{}", line);
        }
    }
    println!("{}", result.output_path.display());
    Ok(())
}
