use std::borrow::Cow;
use std::fmt;

use ndarray::{ArrayViewD, CowArray, IxDyn};
use ort::{
    execution_providers::{
        CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
        TensorRTExecutionProvider,
    },
    session::{builder::GraphOptimizationLevel, Session, SessionInputValue},
    value::TensorRef,
};
use parking_lot::Mutex;
use tracing::debug;

use crate::errors::{ort_error, Result};
use crate::traits::{ExecutableGraph, TensorMap};

/// Execution backend a graph runs on.
///
/// Changing the backend of a predictor rebuilds both graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Cpu,
    Cuda {
        device_id: i32,
    },
    TensorRt {
        device_id: i32,
    },
}

impl Backend {
    fn execution_providers(&self) -> Vec<ExecutionProviderDispatch> {
        match *self {
            Self::Cpu => vec![CPUExecutionProvider::default().build()],
            Self::Cuda { device_id } => vec![
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ],
            Self::TensorRt { device_id } => vec![
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ],
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda { device_id } => write!(f, "cuda:{device_id}"),
            Self::TensorRt { device_id } => write!(f, "tensorrt:{device_id}"),
        }
    }
}

/// Builds an ONNX Runtime session for `model` on `backend`.
pub fn build_session(model: &[u8], backend: Backend, intra_threads: usize) -> Result<Session> {
    let mut builder = Session::builder()
        .map_err(ort_error("session builder initialisation"))?
        .with_execution_providers(backend.execution_providers())
        .map_err(ort_error("execution provider registration"))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(ort_error("optimisation level setup"))?
        .with_memory_pattern(true)
        .map_err(ort_error("memory pattern setup"))?;

    if intra_threads > 0 {
        builder = builder
            .with_intra_threads(intra_threads)
            .map_err(ort_error("intra-op thread setup"))?;
    }

    builder
        .commit_from_memory(model)
        .map_err(ort_error("model graph loading"))
}

/// [`ExecutableGraph`] backed by an ONNX Runtime session.
pub struct OrtGraph {
    session: Mutex<Session>,
    input_names: Vec<String>,
    output_names: Vec<String>,
    input_scale: Option<f32>,
}

impl OrtGraph {
    pub fn new(session: Session) -> Self {
        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        debug!(?input_names, ?output_names, "graph loaded");
        Self {
            session: Mutex::new(session),
            input_names,
            output_names,
            input_scale: None,
        }
    }

    /// Multiplies every input by `scale` before execution, acting as the
    /// first node of the graph.
    pub fn with_input_scale(mut self, scale: f32) -> Self {
        self.input_scale = Some(scale);
        self
    }
}

impl ExecutableGraph for OrtGraph {
    fn input_names(&self) -> &[String] {
        &self.input_names
    }

    fn output_names(&self) -> &[String] {
        &self.output_names
    }

    fn run(&self, inputs: &[(&str, ArrayViewD<'_, f32>)]) -> Result<TensorMap> {
        let contiguous: Vec<(&str, CowArray<'_, f32, IxDyn>)> = inputs
            .iter()
            .map(|(name, view)| {
                let array = match self.input_scale {
                    Some(scale) => CowArray::from(view.mapv(|v| v * scale)),
                    None => view.as_standard_layout(),
                };
                (*name, array)
            })
            .collect();

        let mut session_inputs: Vec<(Cow<'_, str>, SessionInputValue<'_>)> =
            Vec::with_capacity(contiguous.len());
        for (name, array) in &contiguous {
            let tensor = TensorRef::from_array_view(array)
                .map_err(ort_error("input tensor creation"))?;
            session_inputs.push((Cow::Borrowed(*name), SessionInputValue::from(tensor)));
        }

        let mut session = self.session.lock();
        let outputs = session
            .run(session_inputs)
            .map_err(ort_error("graph execution"))?;

        let mut map = TensorMap::new();
        for name in &self.output_names {
            let tensor = outputs[name.as_str()]
                .try_extract_array::<f32>()
                .map_err(ort_error("output extraction"))?;
            map.insert(name.clone(), tensor.to_owned());
        }
        Ok(map)
    }
}
