use clap::{ArgAction, Parser, ValueEnum};
use image::ImageFormat;
use std::path::PathBuf;

use crate::backend::Backend;
use crate::predictor::PromptSet;
use crate::preprocess::Padding;
use crate::registry::{ModelPaths, DEFAULT_DECODER_NAME, DEFAULT_ENCODER_NAME};
use crate::surface::SurfaceFormat;
use crate::transforms::IMG_SIZE;

/// Settings of a [`SamPredictor`](crate::SamPredictor).
#[derive(Debug, Clone, PartialEq)]
pub struct PredictorConfig {
    /// Long side of the encoder input.
    pub img_size: u32,
    pub padding: Padding,
    /// Logit above which a pixel belongs to the mask.
    pub mask_threshold: f32,
    pub surface_format: SurfaceFormat,
    pub backend: Backend,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            img_size: IMG_SIZE,
            padding: Padding::None,
            mask_threshold: 0.0,
            surface_format: SurfaceFormat::Luma8,
            backend: Backend::Cpu,
        }
    }
}

/// Settings of a [`ModelRegistry`](crate::ModelRegistry).
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    /// Factor applied to encoder inputs; the encoder graph expects 0..255
    /// intensities while the preprocessor produces 0..1.
    pub encoder_input_scale: f32,
    /// ONNX Runtime intra-op threads, 0 keeps the runtime default.
    pub intra_threads: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            encoder_input_scale: 255.0,
            intra_threads: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Cpu,
    Cuda,
    Tensorrt,
}

/// Pixel coordinate given on the command line as `X,Y`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointArg {
    pub x: f32,
    pub y: f32,
}

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Image to segment
    pub image: PathBuf,

    /// Where to write the mask (or the cutout with --cutout)
    #[arg(short, long, default_value = "mask.png", value_parser = check_output_path)]
    pub output: PathBuf,

    /// Directory holding the encoder/decoder ONNX files
    #[arg(short, long, default_value = "models")]
    pub model_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_ENCODER_NAME)]
    pub encoder_name: String,

    #[arg(long, default_value = DEFAULT_DECODER_NAME)]
    pub decoder_name: String,

    #[arg(short, long, value_enum, default_value_t = BackendKind::Cpu)]
    pub backend: BackendKind,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    /// Foreground point, repeatable
    #[arg(short, long = "point", value_name = "X,Y", value_parser = parse_point)]
    pub points: Vec<PointArg>,

    /// Background point, repeatable
    #[arg(long = "background", value_name = "X,Y", value_parser = parse_point)]
    pub background: Vec<PointArg>,

    /// Zero-pad the resized image to a square encoder input
    #[arg(long)]
    pub pad: bool,

    #[arg(short, long, default_value_t = 0.0)]
    pub threshold: f32,

    /// Write the image with the mask as alpha instead of the bare mask
    #[arg(long)]
    pub cutout: bool,

    #[arg(long, default_value_t = 0)]
    pub intra_threads: usize,

    /// Verbose logging (-v, -vv)
    #[arg(short, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Config {
    pub fn backend(&self) -> Backend {
        match self.backend {
            BackendKind::Cpu => Backend::Cpu,
            BackendKind::Cuda => Backend::Cuda {
                device_id: self.device_id,
            },
            BackendKind::Tensorrt => Backend::TensorRt {
                device_id: self.device_id,
            },
        }
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            dir: self.model_dir.clone(),
            encoder: self.encoder_name.clone(),
            decoder: self.decoder_name.clone(),
        }
    }

    pub fn predictor_config(&self) -> PredictorConfig {
        PredictorConfig {
            padding: if self.pad {
                Padding::Square
            } else {
                Padding::None
            },
            mask_threshold: self.threshold,
            backend: self.backend(),
            ..PredictorConfig::default()
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            intra_threads: self.intra_threads,
            ..RegistryConfig::default()
        }
    }

    /// Foreground points first, then background points.
    pub fn prompt_set(&self) -> PromptSet {
        let mut prompts = PromptSet::default();
        for p in &self.points {
            prompts.push(p.x, p.y, true);
        }
        for p in &self.background {
            prompts.push(p.x, p.y, false);
        }
        prompts
    }

    pub const fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

fn parse_point(s: &str) -> Result<PointArg, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("`{s}` is not a point, expected X,Y"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<f32>()
            .map_err(|e| format!("`{v}` in `{s}`: {e}"))
    };
    Ok(PointArg {
        x: parse(x)?,
        y: parse(y)?,
    })
}

fn check_output_path(s: &str) -> Result<PathBuf, String> {
    let supported: Vec<_> = ImageFormat::all()
        .filter(|f| f.writing_enabled())
        .flat_map(|f| f.extensions_str())
        .map(|s| format!("`{}`", s))
        .collect();
    let supported_message = format!("Supported formats: {}", supported.join(", "));

    let path = PathBuf::from(s);
    let format = ImageFormat::from_path(&path)
        .map_err(|_| format!("{} has no known image extension. {}", s, supported_message))?;
    if !format.writing_enabled() {
        return Err(format!("{} is not supported. {}", s, supported_message));
    }

    Ok(path)
}
