use std::borrow::Cow;

use thiserror::Error;

use crate::fixed_dim::FixedDimensions;

/// Violations of a tensor or kernel shape contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("{op}: expected rank {expected}, got {actual:?}")]
    Rank {
        op: &'static str,
        expected: usize,
        actual: FixedDimensions,
    },

    #[error("{op}: shape mismatch between {lhs:?} and {rhs:?}")]
    Mismatch {
        op: &'static str,
        lhs: FixedDimensions,
        rhs: FixedDimensions,
    },

    #[error("Tensor of shape {dims:?} needs {expected} elements, but {actual} were given")]
    ElementCount {
        dims: FixedDimensions,
        expected: usize,
        actual: usize,
    },

    #[error("{op}: {reason}")]
    Invalid {
        op: &'static str,
        reason: Cow<'static, str>,
    },
}

impl ShapeError {
    pub fn invalid(op: &'static str, reason: impl Into<Cow<'static, str>>) -> Self {
        ShapeError::Invalid {
            op,
            reason: reason.into(),
        }
    }

    pub fn rank(op: &'static str, expected: usize, actual: &FixedDimensions) -> Self {
        ShapeError::Rank {
            op,
            expected,
            actual: actual.clone(),
        }
    }

    pub fn mismatch(op: &'static str, lhs: &FixedDimensions, rhs: &FixedDimensions) -> Self {
        ShapeError::Mismatch {
            op,
            lhs: lhs.clone(),
            rhs: rhs.clone(),
        }
    }
}

/// Structural errors in a computation graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Scheduling could not order every node.
    #[error("Cycle detected or missing inputs in graph: scheduled {scheduled} of {total} nodes (unresolved: {unresolved:?})")]
    CycleOrMissingInput {
        scheduled: usize,
        total: usize,
        unresolved: Vec<String>,
    },

    #[error("Initializer '{name}' is invalid: {reason}")]
    InvalidInitializer {
        name: String,
        reason: Cow<'static, str>,
    },

    #[error("Graph: {0}")]
    Shape(#[from] ShapeError),
}
