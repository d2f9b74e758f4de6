use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::backend::{build_session, Backend, OrtGraph};
use crate::config::RegistryConfig;
use crate::errors::{Result, SamError};
use crate::traits::{ExecutableGraph, GraphFactory, ModelKind};

pub const DEFAULT_ENCODER_NAME: &str = "mobilesam.encoder";
pub const DEFAULT_DECODER_NAME: &str = "mobilesam.decoder";
pub const MODEL_EXTENSION: &str = "onnx";

/// Where the encoder and decoder assets live. Names are resolved as
/// `<dir>/<name>.onnx`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub dir: PathBuf,
    pub encoder: String,
    pub decoder: String,
}

impl ModelPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            encoder: DEFAULT_ENCODER_NAME.to_string(),
            decoder: DEFAULT_DECODER_NAME.to_string(),
        }
    }

    pub fn resolve(&self, kind: ModelKind) -> PathBuf {
        let name = match kind {
            ModelKind::Encoder => &self.encoder,
            ModelKind::Decoder => &self.decoder,
        };
        // names contain dots, so the extension is appended rather than set
        self.dir.join(format!("{name}.{MODEL_EXTENSION}"))
    }
}

/// Serialized graph read from disk, shared by every session built from it.
#[derive(Debug, Clone)]
pub struct ModelAsset {
    pub name: String,
    pub path: PathBuf,
    pub bytes: Arc<[u8]>,
}

impl ModelAsset {
    fn load(name: &str, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|source| SamError::ModelAsset {
            name: name.to_string(),
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            "loaded {name} from {} ({:.1} MB)",
            path.display(),
            bytes.len() as f64 / 1_048_576.0
        );
        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            bytes: bytes.into(),
        })
    }
}

#[derive(Debug)]
struct Assets {
    encoder: ModelAsset,
    decoder: ModelAsset,
}

/// Owns the encoder/decoder model assets for the lifetime between
/// [`init`](Self::init) and [`teardown`](Self::teardown) and builds backend
/// specific graphs from them.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    config: RegistryConfig,
    assets: Option<Assets>,
}

impl ModelRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            assets: None,
        }
    }

    /// Reads both assets. Either one missing leaves the registry untouched.
    pub fn init(&mut self, paths: &ModelPaths) -> Result<()> {
        let encoder = ModelAsset::load(&paths.encoder, &paths.resolve(ModelKind::Encoder))?;
        let decoder = ModelAsset::load(&paths.decoder, &paths.resolve(ModelKind::Decoder))?;
        self.assets = Some(Assets { encoder, decoder });
        Ok(())
    }

    pub fn teardown(&mut self) {
        if self.assets.take().is_some() {
            info!("model registry torn down");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.assets.is_some()
    }

    pub fn asset(&self, kind: ModelKind) -> Result<&ModelAsset> {
        let assets = self.assets.as_ref().ok_or_else(|| {
            SamError::configuration("model registry is not initialised; call init first")
        })?;
        Ok(match kind {
            ModelKind::Encoder => &assets.encoder,
            ModelKind::Decoder => &assets.decoder,
        })
    }
}

impl GraphFactory for ModelRegistry {
    fn create_graph(&self, kind: ModelKind, backend: Backend) -> Result<Box<dyn ExecutableGraph>> {
        let asset = self.asset(kind)?;
        let session = build_session(&asset.bytes, backend, self.config.intra_threads)?;
        info!("{} graph `{}` ready on {backend}", kind.as_str(), asset.name);

        let graph = OrtGraph::new(session);
        Ok(match kind {
            ModelKind::Encoder => Box::new(graph.with_input_scale(self.config.encoder_input_scale)),
            ModelKind::Decoder => Box::new(graph),
        })
    }
}
