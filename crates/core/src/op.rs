use std::{fmt, sync::OnceLock};

use rustc_hash::FxHashMap;

/// The closed set of operators the runtime knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Conv,
    MatMul,
    Gemm,
    Add,
    Relu,
    Clip,
    Softmax,
    BatchNormalization,
    GlobalAveragePool,
    MaxPool,
    Reshape,
    Flatten,
    Transpose,
}

const OP_TYPES: &[(&str, Op)] = &[
    ("Conv", Op::Conv),
    ("MatMul", Op::MatMul),
    ("Gemm", Op::Gemm),
    ("Add", Op::Add),
    ("Relu", Op::Relu),
    ("Clip", Op::Clip),
    ("Softmax", Op::Softmax),
    ("BatchNormalization", Op::BatchNormalization),
    ("GlobalAveragePool", Op::GlobalAveragePool),
    ("MaxPool", Op::MaxPool),
    ("Reshape", Op::Reshape),
    ("Flatten", Op::Flatten),
    ("Transpose", Op::Transpose),
];

impl Op {
    pub const CONV2D_IN: usize = 0;
    pub const CONV2D_WEIGHT: usize = 1;
    pub const CONV2D_BIAS: usize = 2;
    pub const GEMM_IN_A: usize = 0;
    pub const GEMM_IN_B: usize = 1;
    pub const GEMM_IN_C: usize = 2;
    pub const CLIP_IN_MIN: usize = 1;
    pub const CLIP_IN_MAX: usize = 2;
    pub const BATCHNORM_IN_X: usize = 0;
    pub const BATCHNORM_IN_SCALE: usize = 1;
    pub const BATCHNORM_IN_B: usize = 2;
    pub const BATCHNORM_IN_INPUT_MEAN: usize = 3;
    pub const BATCHNORM_IN_INPUT_VAR: usize = 4;
    pub const RESHAPE_IN_SHAPE: usize = 1;

    /// Resolves an ONNX-style `op_type` tag. Unknown tags yield `None`.
    pub fn from_op_type(op_type: &str) -> Option<Op> {
        static TABLE: OnceLock<FxHashMap<&'static str, Op>> = OnceLock::new();
        TABLE
            .get_or_init(|| OP_TYPES.iter().copied().collect())
            .get(op_type)
            .copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Op::Conv => "Conv",
            Op::MatMul => "MatMul",
            Op::Gemm => "Gemm",
            Op::Add => "Add",
            Op::Relu => "Relu",
            Op::Clip => "Clip",
            Op::Softmax => "Softmax",
            Op::BatchNormalization => "BatchNormalization",
            Op::GlobalAveragePool => "GlobalAveragePool",
            Op::MaxPool => "MaxPool",
            Op::Reshape => "Reshape",
            Op::Flatten => "Flatten",
            Op::Transpose => "Transpose",
        }
    }

    /// Operators whose result depends on where the channel axis sits.
    pub fn is_layout_sensitive(&self) -> bool {
        matches!(
            self,
            Op::Conv | Op::MaxPool | Op::BatchNormalization | Op::GlobalAveragePool
        )
    }

    /// Elementwise operators that work on either layout unchanged.
    pub fn is_layout_agnostic_elemwise(&self) -> bool {
        matches!(self, Op::Add | Op::Relu | Op::Clip)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[test]
fn op_type_round_trip() {
    for &(tag, op) in OP_TYPES {
        assert_eq!(Op::from_op_type(tag), Some(op));
        assert_eq!(op.name(), tag);
    }
    assert_eq!(Op::from_op_type("LSTM"), None);
    assert_eq!(Op::from_op_type("relu"), None);
}
