use std::time::Duration;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mobilesam_rs::{imageops::mask, Config, SamPredictor};

fn main() -> Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level())),
        )
        .init();

    ensure!(config.image.exists(), "Input image does not exist");
    ensure!(config.model_dir.is_dir(), "Model directory does not exist");

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} [{elapsed}] {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));

    spinner.set_message("loading models");
    let mut predictor = SamPredictor::from_paths(
        &config.model_paths(),
        config.registry_config(),
        config.predictor_config(),
    )
    .context("Failed to initialise the predictor")?;

    let image = image::open(&config.image)
        .with_context(|| format!("Failed to open image: {}", config.image.display()))?;

    spinner.set_message("encoding image");
    predictor.set_image(&image)?;

    spinner.set_message("decoding mask");
    let prompts = config.prompt_set();
    predictor.predict(&prompts)?;
    spinner.finish_and_clear();

    let surface = predictor
        .result()
        .context("Predictor produced no mask")?;
    info!(
        "mask {}x{} from {} point(s), coverage {:.1}%, iou {:?}",
        surface.width(),
        surface.height(),
        prompts.len(),
        surface.coverage() * 100.0,
        predictor.scores()
    );

    if config.cutout {
        let cutout = mask::apply(&image.to_rgb8(), &surface.to_luma8(), false)?;
        cutout
            .save(&config.output)
            .with_context(|| format!("Failed to save image: {}", config.output.display()))?;
    } else {
        surface
            .to_image()
            .save(&config.output)
            .with_context(|| format!("Failed to save image: {}", config.output.display()))?;
    }

    predictor.dispose();
    Ok(())
}
