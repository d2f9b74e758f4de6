pub mod backend;
pub mod cache;
pub mod config;
pub mod errors;
pub mod imageops;
pub mod predictor;
pub mod preprocess;
pub mod registry;
pub mod surface;
pub mod traits;
pub mod transforms;

pub mod mocks;

pub use backend::Backend;
pub use config::{Config, PredictorConfig, RegistryConfig};
pub use errors::{ErrorKind, Result, SamError};
pub use predictor::{PredictorState, PromptSet, SamPredictor};
pub use preprocess::Padding;
pub use registry::{ModelPaths, ModelRegistry};
pub use surface::{MaskSurface, SurfaceFormat};
pub use traits::*;
pub use transforms::{ImageSize, IMG_SIZE};

#[cfg(test)]
pub use mocks::*;

impl SamPredictor<ModelRegistry> {
    /// Loads the assets in `paths` and builds a predictor over them.
    pub fn from_paths(
        paths: &ModelPaths,
        registry_config: RegistryConfig,
        config: PredictorConfig,
    ) -> Result<Self> {
        let mut registry = ModelRegistry::new(registry_config);
        registry.init(paths)?;
        Self::new(registry, config)
    }
}
