pub mod diagnostics;
pub mod error;
pub mod fixed_dim;
pub mod graph;
pub mod layout;
pub mod model;
pub mod node;
pub mod op;
pub mod optimize;
pub mod tensor;
