use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::{Array4, ArrayD, ArrayViewD, IxDyn};
use parking_lot::Mutex;

use crate::backend::Backend;
use crate::errors::{Result, SamError};
use crate::predictor::{DECODER_INPUTS, IOU_PREDICTIONS, LOW_RES_MASKS, MASKS, MASK_INPUT_SIZE};
use crate::traits::{ExecutableGraph, GraphFactory, ModelKind, TensorMap};
use crate::transforms::{resize_shape, IMG_SIZE};

/// Embedding shape produced by the stub encoder.
pub const STUB_EMBEDDING_SHAPE: [usize; 4] = [1, 256, 64, 64];

/// What the stub decoder received in one call.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderCall {
    pub embedding_shape: Vec<usize>,
    pub point_coords: Vec<f32>,
    pub point_labels: Vec<f32>,
    pub mask_input_shape: Vec<usize>,
    pub has_mask_input: Vec<f32>,
    pub orig_im_size: Vec<f32>,
}

#[derive(Debug, Default)]
struct StubState {
    encoder_runs: AtomicUsize,
    decoder_runs: AtomicUsize,
    fail_decoder: AtomicBool,
    mask_count: AtomicUsize,
    mask_size_override: Mutex<Option<(usize, usize)>>,
    created: Mutex<Vec<(ModelKind, Backend)>>,
    encoder_inputs: Mutex<Vec<Vec<usize>>>,
    decoder_calls: Mutex<Vec<DecoderCall>>,
}

/// Stub encoder/decoder pair for tests.
///
/// Clones share their counters, so a clone kept by the test observes the
/// calls made through the one handed to the predictor.
///
/// The decoder draws a disc around every point (in network coordinates):
/// foreground points set it, background points clear it, later points win.
/// Without points the whole image is foreground. Extra mask channels repeat
/// the first one with larger magnitudes and lower IoU scores.
#[derive(Debug, Clone)]
pub struct StubGraphFactory {
    state: Arc<StubState>,
    img_size: u32,
    missing: Option<ModelKind>,
    decoder_inputs: Vec<String>,
}

impl Default for StubGraphFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl StubGraphFactory {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            img_size: IMG_SIZE,
            missing: None,
            decoder_inputs: DECODER_INPUTS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Behaves as if the asset for `kind` were absent.
    pub fn with_missing(mut self, kind: ModelKind) -> Self {
        self.missing = Some(kind);
        self
    }

    /// Decoder graph that does not declare `name`.
    pub fn without_decoder_input(mut self, name: &str) -> Self {
        self.decoder_inputs.retain(|n| n != name);
        self
    }

    pub fn set_fail_decoder(&self, fail: bool) {
        self.state.fail_decoder.store(fail, Ordering::SeqCst);
    }

    /// Number of masks the decoder returns per call (default 1).
    pub fn set_mask_count(&self, count: usize) {
        self.state.mask_count.store(count, Ordering::SeqCst);
    }

    /// Forces the decoder to return masks of `(height, width)`.
    pub fn set_mask_size(&self, size: Option<(usize, usize)>) {
        *self.state.mask_size_override.lock() = size;
    }

    pub fn encoder_runs(&self) -> usize {
        self.state.encoder_runs.load(Ordering::SeqCst)
    }

    pub fn decoder_runs(&self) -> usize {
        self.state.decoder_runs.load(Ordering::SeqCst)
    }

    pub fn created_graphs(&self) -> Vec<(ModelKind, Backend)> {
        self.state.created.lock().clone()
    }

    /// Shapes of the tensors the encoder was run with.
    pub fn encoder_inputs(&self) -> Vec<Vec<usize>> {
        self.state.encoder_inputs.lock().clone()
    }

    pub fn decoder_calls(&self) -> Vec<DecoderCall> {
        self.state.decoder_calls.lock().clone()
    }

    pub fn last_decoder_call(&self) -> Option<DecoderCall> {
        self.state.decoder_calls.lock().last().cloned()
    }
}

impl GraphFactory for StubGraphFactory {
    fn create_graph(&self, kind: ModelKind, backend: Backend) -> Result<Box<dyn ExecutableGraph>> {
        if self.missing == Some(kind) {
            return Err(SamError::configuration(format!(
                "{} model asset not found",
                kind.as_str()
            )));
        }
        self.state.created.lock().push((kind, backend));

        let graph: Box<dyn ExecutableGraph> = match kind {
            ModelKind::Encoder => Box::new(StubEncoder {
                state: Arc::clone(&self.state),
                inputs: vec!["input_image".to_string()],
                outputs: vec!["image_embeddings".to_string()],
            }),
            ModelKind::Decoder => Box::new(StubDecoder {
                state: Arc::clone(&self.state),
                img_size: self.img_size,
                inputs: self.decoder_inputs.clone(),
                outputs: [LOW_RES_MASKS, IOU_PREDICTIONS, MASKS]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            }),
        };
        Ok(graph)
    }
}

struct StubEncoder {
    state: Arc<StubState>,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl ExecutableGraph for StubEncoder {
    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    fn output_names(&self) -> &[String] {
        &self.outputs
    }

    fn run(&self, inputs: &[(&str, ArrayViewD<'_, f32>)]) -> Result<TensorMap> {
        let image = input(inputs, &self.inputs[0])?;
        self.state.encoder_runs.fetch_add(1, Ordering::SeqCst);
        self.state.encoder_inputs.lock().push(image.shape().to_vec());

        let mean = image.mean().unwrap_or(0.0);
        let mut map = TensorMap::new();
        map.insert(
            self.outputs[0].clone(),
            ArrayD::from_elem(IxDyn(&STUB_EMBEDDING_SHAPE), mean),
        );
        Ok(map)
    }
}

struct StubDecoder {
    state: Arc<StubState>,
    img_size: u32,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl StubDecoder {
    fn draw(&self, masks: usize, height: usize, width: usize, call: &DecoderCall) -> ArrayD<f32> {
        let orig_h = call.orig_im_size[0] as u32;
        let orig_w = call.orig_im_size[1] as u32;
        let new = resize_shape(orig_h.max(1), orig_w.max(1), self.img_size);
        let sx = new.width as f32 / orig_w.max(1) as f32;
        let sy = new.height as f32 / orig_h.max(1) as f32;
        let radius = self.img_size as f32 / 8.0;

        let background = if call.point_labels.is_empty() { 1.0 } else { -1.0 };
        let mut mask = Array4::zeros((1, masks, height, width));
        for ((_, k, y, x), value) in mask.indexed_iter_mut() {
            let (nx, ny) = (x as f32 * sx, y as f32 * sy);
            let mut logit = background;
            for (xy, &label) in call.point_coords.chunks_exact(2).zip(&call.point_labels) {
                let (dx, dy) = (nx - xy[0], ny - xy[1]);
                if dx * dx + dy * dy <= radius * radius {
                    logit = if label == 1.0 { 1.0 } else { -1.0 };
                }
            }
            *value = logit * (k + 1) as f32;
        }
        mask.into_dyn()
    }
}

impl ExecutableGraph for StubDecoder {
    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    fn output_names(&self) -> &[String] {
        &self.outputs
    }

    fn run(&self, inputs: &[(&str, ArrayViewD<'_, f32>)]) -> Result<TensorMap> {
        self.state.decoder_runs.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_decoder.load(Ordering::SeqCst) {
            return Err(SamError::model("stub decoder", "configured to fail"));
        }

        let call = DecoderCall {
            embedding_shape: input(inputs, "image_embeddings")?.shape().to_vec(),
            point_coords: input(inputs, "point_coords")?.iter().copied().collect(),
            point_labels: input(inputs, "point_labels")?.iter().copied().collect(),
            mask_input_shape: input(inputs, "mask_input")?.shape().to_vec(),
            has_mask_input: input(inputs, "has_mask_input")?.iter().copied().collect(),
            orig_im_size: input(inputs, "orig_im_size")?.iter().copied().collect(),
        };
        self.state.decoder_calls.lock().push(call.clone());

        let (height, width) = self.state.mask_size_override.lock().unwrap_or((
            call.orig_im_size[0] as usize,
            call.orig_im_size[1] as usize,
        ));

        let masks = self.state.mask_count.load(Ordering::SeqCst).max(1);

        let mut map = TensorMap::new();
        map.insert(
            LOW_RES_MASKS,
            ArrayD::zeros(IxDyn(&[1, masks, MASK_INPUT_SIZE, MASK_INPUT_SIZE])),
        );
        map.insert(
            IOU_PREDICTIONS,
            ArrayD::from_shape_fn(IxDyn(&[1, masks]), |idx| 0.9 - 0.1 * idx[1] as f32),
        );
        map.insert(MASKS, self.draw(masks, height, width, &call));
        Ok(map)
    }
}

/// Stub factory with default settings.
pub fn create_stub_factory() -> StubGraphFactory {
    StubGraphFactory::new()
}

fn input<'a, 'v>(
    inputs: &'a [(&str, ArrayViewD<'v, f32>)],
    name: &str,
) -> Result<&'a ArrayViewD<'v, f32>> {
    inputs
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, t)| t)
        .ok_or_else(|| SamError::model("stub graph", format!("missing input `{name}`")))
}
