use std::sync::Arc;

use ndarray::{ArrayD, ArrayViewD};

use crate::backend::Backend;
use crate::errors::{Result, SamError};

/// Which of the two network stages a graph implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Encoder,
    Decoder,
}

impl ModelKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Encoder => "encoder",
            Self::Decoder => "decoder",
        }
    }
}

/// Named output tensors of one graph execution, in declaration order.
#[derive(Debug, Default, Clone)]
pub struct TensorMap {
    entries: Vec<(String, ArrayD<f32>)>,
}

impl TensorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: ArrayD<f32>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = tensor,
            None => self.entries.push((name, tensor)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    /// Removes and returns `name`, failing when the graph did not produce it.
    pub fn take(&mut self, name: &str) -> Result<ArrayD<f32>> {
        let index = self
            .entries
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| SamError::model("reading graph output", format!("missing `{name}`")))?;
        Ok(self.entries.remove(index).1)
    }

    /// The first declared output, for single-output graphs.
    pub fn into_first(self) -> Result<ArrayD<f32>> {
        self.entries
            .into_iter()
            .next()
            .map(|(_, t)| t)
            .ok_or_else(|| SamError::model("reading graph output", "graph produced no outputs"))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, ArrayD<f32>)> for TensorMap {
    fn from_iter<T: IntoIterator<Item = (S, ArrayD<f32>)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (name, tensor) in iter {
            map.insert(name, tensor);
        }
        map
    }
}

/// A loaded computational graph bound to an execution backend.
///
/// Inputs are borrowed for the duration of one call; nothing is retained
/// between runs.
pub trait ExecutableGraph: Send + Sync {
    fn input_names(&self) -> &[String];

    fn output_names(&self) -> &[String];

    fn run(&self, inputs: &[(&str, ArrayViewD<'_, f32>)]) -> Result<TensorMap>;
}

/// Produces executable graphs for a given backend.
pub trait GraphFactory {
    fn create_graph(&self, kind: ModelKind, backend: Backend) -> Result<Box<dyn ExecutableGraph>>;
}

impl<T: GraphFactory + ?Sized> GraphFactory for Arc<T> {
    fn create_graph(&self, kind: ModelKind, backend: Backend) -> Result<Box<dyn ExecutableGraph>> {
        (**self).create_graph(kind, backend)
    }
}
