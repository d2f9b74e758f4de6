//! Stateful point-prompted mask prediction.
//!
//! [`SamPredictor::set_image`] runs the expensive encoder once and caches the
//! embedding; [`SamPredictor::predict`] can then be called any number of times
//! with new prompts and only runs the decoder.

use image::DynamicImage;
use ndarray::{Array1, Array2, Array3, Array4, Axis, Ix4};
use tracing::{debug, info, instrument};

use crate::backend::Backend;
use crate::cache::{CachedEmbedding, EmbeddingCache};
use crate::config::PredictorConfig;
use crate::errors::{Result, SamError};
use crate::preprocess::preprocess_dynamic;
use crate::surface::MaskSurface;
use crate::traits::{ExecutableGraph, GraphFactory, ModelKind};
use crate::transforms::{map_points, ImageSize};

/// Input names the decoder graph has to declare.
pub const DECODER_INPUTS: [&str; 6] = [
    "image_embeddings",
    "point_coords",
    "point_labels",
    "mask_input",
    "has_mask_input",
    "orig_im_size",
];

pub const LOW_RES_MASKS: &str = "low_res_masks";
pub const IOU_PREDICTIONS: &str = "iou_predictions";
pub const MASKS: &str = "masks";

/// Side of the low resolution mask hint the decoder accepts.
pub const MASK_INPUT_SIZE: usize = 256;

/// Encoder input name used when the graph does not declare one.
const ENCODER_INPUT: &str = "input_image";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorState {
    NoImage,
    ImageSet,
    Disposed,
}

/// Prompts for one prediction, in original image pixels.
///
/// Coordinates are interleaved `[x0, y0, x1, y1, ..]` with one label per
/// point: 1 marks foreground, 0 background.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptSet {
    coords: Vec<f32>,
    labels: Vec<f32>,
    bbox: Option<[f32; 4]>,
    mask_hint: Option<Array2<f32>>,
}

impl PromptSet {
    pub fn new(coords: Vec<f32>, labels: Vec<f32>) -> Self {
        Self {
            coords,
            labels,
            ..Self::default()
        }
    }

    pub fn push(&mut self, x: f32, y: f32, foreground: bool) {
        self.coords.extend([x, y]);
        self.labels.push(if foreground { 1.0 } else { 0.0 });
    }

    /// Box prompt `[x0, y0, x1, y1]`. Predicting with it fails as unsupported.
    pub fn with_box(mut self, bbox: [f32; 4]) -> Self {
        self.bbox = Some(bbox);
        self
    }

    /// Low resolution mask from an earlier prediction. Predicting with it
    /// fails as unsupported.
    pub fn with_mask_hint(mut self, mask: Array2<f32>) -> Self {
        self.mask_hint = Some(mask);
        self
    }

    pub fn coords(&self) -> &[f32] {
        &self.coords
    }

    pub fn labels(&self) -> &[f32] {
        &self.labels
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(&self) -> Result<()> {
        if self.bbox.is_some() {
            return Err(SamError::Unsupported {
                feature: "box".to_string(),
            });
        }
        if self.mask_hint.is_some() {
            return Err(SamError::Unsupported {
                feature: "mask hint".to_string(),
            });
        }

        if self.coords.len() % 2 != 0 || self.coords.len() / 2 != self.labels.len() {
            return Err(SamError::invalid_input(
                "point_labels",
                format!(
                    "count {} does not match the {} coordinate values",
                    self.labels.len(),
                    self.coords.len()
                ),
            ));
        }
        if let Some(v) = self.coords.iter().find(|v| !v.is_finite()) {
            return Err(SamError::invalid_input(
                "point_coords",
                format!("contain a non-finite value {v}"),
            ));
        }
        if let Some(l) = self.labels.iter().find(|&&l| l != 0.0 && l != 1.0) {
            return Err(SamError::invalid_input(
                "point_labels",
                format!("must be 0 or 1, got {l}"),
            ));
        }
        Ok(())
    }
}

struct Graphs {
    encoder: Box<dyn ExecutableGraph>,
    decoder: Box<dyn ExecutableGraph>,
}

impl Graphs {
    fn create<F: GraphFactory>(factory: &F, backend: Backend) -> Result<Self> {
        let encoder = factory.create_graph(ModelKind::Encoder, backend)?;
        let decoder = factory.create_graph(ModelKind::Decoder, backend)?;

        let declared = decoder.input_names();
        let missing: Vec<_> = DECODER_INPUTS
            .iter()
            .filter(|name| !declared.iter().any(|d| d == *name))
            .collect();
        if !missing.is_empty() {
            return Err(SamError::configuration(format!(
                "decoder graph does not declare inputs {missing:?}"
            )));
        }

        Ok(Self { encoder, decoder })
    }
}

fn loaded(graphs: &Option<Graphs>, disposed: bool) -> Result<&Graphs> {
    if disposed {
        return Err(SamError::Disposed);
    }
    graphs
        .as_ref()
        .ok_or_else(|| SamError::configuration("no graphs are loaded for the current backend"))
}

/// Drives the encoder/decoder pair for one image at a time.
///
/// Calls must be serialized; the predictor is not meant to be shared between
/// threads while a call is in flight.
pub struct SamPredictor<F: GraphFactory> {
    factory: F,
    config: PredictorConfig,
    graphs: Option<Graphs>,
    cache: EmbeddingCache,
    // "no prior mask" decoder inputs, identical for every call
    mask_input: Array4<f32>,
    has_mask_input: Array1<f32>,
    result: Option<MaskSurface>,
    scores: Vec<f32>,
    logits: Option<Array4<f32>>,
    low_res_logits: Option<Array4<f32>>,
    disposed: bool,
}

impl<F: GraphFactory> SamPredictor<F> {
    /// Builds both graphs on `config.backend`.
    pub fn new(factory: F, config: PredictorConfig) -> Result<Self> {
        let graphs = Graphs::create(&factory, config.backend)?;
        info!("predictor ready on {}", config.backend);

        Ok(Self {
            factory,
            config,
            graphs: Some(graphs),
            cache: EmbeddingCache::new(),
            mask_input: Array4::zeros((1, 1, MASK_INPUT_SIZE, MASK_INPUT_SIZE)),
            has_mask_input: Array1::zeros(1),
            result: None,
            scores: Vec::new(),
            logits: None,
            low_res_logits: None,
            disposed: false,
        })
    }

    pub fn state(&self) -> PredictorState {
        if self.disposed {
            PredictorState::Disposed
        } else if self.cache.is_empty() {
            PredictorState::NoImage
        } else {
            PredictorState::ImageSet
        }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    pub fn backend(&self) -> Backend {
        self.config.backend
    }

    /// Size of the image passed to the last successful [`set_image`](Self::set_image).
    pub fn original_size(&self) -> Option<ImageSize> {
        self.cache.get().map(|c| c.original_size)
    }

    /// Mask of the last successful prediction, in original image pixels.
    ///
    /// Reallocated when an image of a different size is set.
    pub fn result(&self) -> Option<&MaskSurface> {
        self.result.as_ref()
    }

    /// IoU estimates the decoder reported for the last successful prediction.
    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    /// Raw `(1, M, H, W)` mask logits of the last successful prediction, one
    /// channel per entry of [`scores`](Self::scores), in original image pixels.
    ///
    /// [`result`](Self::result) is channel 0 thresholded at
    /// `config.mask_threshold`; callers that want another mask or their own
    /// threshold read it from here.
    pub fn logits(&self) -> Option<&Array4<f32>> {
        self.logits.as_ref()
    }

    /// `(1, M, 256, 256)` logits of the last successful prediction, the shape
    /// the decoder accepts back as a mask hint.
    pub fn low_res_logits(&self) -> Option<&Array4<f32>> {
        self.low_res_logits.as_ref()
    }

    fn clear_outputs(&mut self) {
        self.scores.clear();
        self.logits = None;
        self.low_res_logits = None;
    }

    /// Encodes `image` and caches its embedding, replacing the previous one.
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub fn set_image(&mut self, image: &DynamicImage) -> Result<()> {
        let graphs = loaded(&self.graphs, self.disposed)?;
        self.cache.invalidate();

        let embedding = {
            let pre = preprocess_dynamic(image, self.config.img_size, self.config.padding)?;
            let input_name = graphs
                .encoder
                .input_names()
                .first()
                .map_or(ENCODER_INPUT, String::as_str);
            let (h, w, _) = pre.tensor.dim();
            debug!("encoding {w}x{h} input (content {:?})", pre.resized_size);

            let embedding = graphs
                .encoder
                .run(&[(input_name, pre.tensor.view().into_dyn())])?
                .into_first()?;
            CachedEmbedding {
                embedding,
                original_size: pre.original_size,
                input_size: ImageSize::new(h as u32, w as u32),
            }
        };
        debug!("embedding shape {:?}", embedding.embedding.shape());

        let size = embedding.original_size;
        if self.result.as_ref().map(MaskSurface::size) != Some(size) {
            self.result = Some(MaskSurface::new(size, self.config.surface_format));
        }
        self.clear_outputs();
        self.cache.store(embedding);
        Ok(())
    }

    /// Decodes a mask for `prompts` against the cached embedding and renders
    /// it into [`result`](Self::result).
    ///
    /// On any error the previous result is left as it was.
    #[instrument(skip_all, fields(points = prompts.len()))]
    pub fn predict(&mut self, prompts: &PromptSet) -> Result<()> {
        let graphs = loaded(&self.graphs, self.disposed)?;
        let cached = self.cache.get().ok_or(SamError::ImageNotSet)?;
        prompts.validate()?;

        let orig = cached.original_size;
        let n = prompts.len();
        let coords = map_points(prompts.coords(), orig.height, orig.width, self.config.img_size)?;
        let point_coords = Array3::from_shape_vec((1, n, 2), coords)?;
        let point_labels = Array2::from_shape_vec((1, n), prompts.labels().to_vec())?;
        let orig_im_size = Array1::from(vec![orig.height as f32, orig.width as f32]);

        let mut outputs = graphs.decoder.run(&[
            ("image_embeddings", cached.embedding.view()),
            ("point_coords", point_coords.view().into_dyn()),
            ("point_labels", point_labels.view().into_dyn()),
            ("mask_input", self.mask_input.view().into_dyn()),
            ("has_mask_input", self.has_mask_input.view().into_dyn()),
            ("orig_im_size", orig_im_size.view().into_dyn()),
        ])?;

        let masks = outputs.take(MASKS)?.into_dimensionality::<Ix4>()?;
        let scores = outputs.take(IOU_PREDICTIONS)?;
        let low_res = outputs.take(LOW_RES_MASKS)?.into_dimensionality::<Ix4>()?;
        debug!(
            "decoder returned masks {:?}, low-res {:?}",
            masks.shape(),
            low_res.shape()
        );

        if masks.shape()[0] != 1 || masks.shape()[1] == 0 {
            return Err(SamError::model(
                "decoding masks",
                format!("expected (1, M, H, W) masks, got {:?}", masks.shape()),
            ));
        }
        // first mask of the only batch entry
        let mask = masks.index_axis(Axis(0), 0).index_axis_move(Axis(0), 0);

        let surface = self
            .result
            .get_or_insert_with(|| MaskSurface::new(orig, self.config.surface_format));
        surface.render(mask, self.config.mask_threshold)?;
        self.scores = scores.iter().copied().collect();
        self.logits = Some(masks);
        self.low_res_logits = Some(low_res);
        Ok(())
    }

    /// [`predict`](Self::predict) from interleaved coordinates and labels.
    pub fn predict_points(&mut self, coords: &[f32], labels: &[f32]) -> Result<()> {
        self.predict(&PromptSet::new(coords.to_vec(), labels.to_vec()))
    }

    /// Switches the execution backend, rebuilding both graphs.
    ///
    /// The cached embedding belongs to the old graphs and is dropped, so
    /// [`set_image`](Self::set_image) has to be called again.
    pub fn set_backend(&mut self, backend: Backend) -> Result<()> {
        if self.disposed {
            return Err(SamError::Disposed);
        }
        if backend == self.config.backend && self.graphs.is_some() {
            return Ok(());
        }

        self.graphs = None;
        self.cache.invalidate();
        self.clear_outputs();
        self.config.backend = backend;
        self.graphs = Some(Graphs::create(&self.factory, backend)?);
        info!("switched backend to {backend}");
        Ok(())
    }

    /// Releases the graphs, the embedding and the result. Every later call
    /// fails with [`SamError::Disposed`].
    pub fn dispose(&mut self) {
        self.graphs = None;
        self.cache.invalidate();
        self.result = None;
        self.clear_outputs();
        self.disposed = true;
    }
}
