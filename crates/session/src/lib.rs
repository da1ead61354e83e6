pub mod plan;

use std::borrow::Cow;

use pinion_core::{
    error::{GraphError, ShapeError},
    graph::Graph,
    tensor::Tensor,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// A kernel's shape contract was violated.
    #[error("Shape: {0}")]
    Shape(#[from] ShapeError),

    #[error("Graph: {0}")]
    Graph(#[from] GraphError),

    /// No kernel exists for the node's operator. Reported and skipped rather than returned.
    #[error("Unsupported operator '{op_type}' in node '{node}'")]
    UnsupportedOperator { op_type: String, node: String },

    /// A node read a tensor that was never bound.
    #[error("Node '{node}' reads '{name}', which was never produced")]
    MissingInput { node: String, name: String },

    #[error("Output tensor '{0}' was not produced")]
    MissingOutput(String),

    #[error("Output tensor '{0}' is malformed")]
    MalformedOutput(String),

    /// General error messages.
    #[error("Something went wrong: {0}")]
    Message(Cow<'static, str>),
}

pub trait Session {
    /// Executes `graph` on `input` and returns the tensor bound to the graph's output name.
    ///
    /// Every intermediate result stays in `graph.tensors` afterwards.
    fn run(&self, graph: &mut Graph, input: Tensor) -> Result<Tensor, SessionError>;
}
