mod attrs;
mod builder;
pub mod conv2d;
pub mod elemwise;
pub mod gemm;
pub mod matmul;
pub mod norm;
pub mod pool;
mod session;
pub mod shape;
pub mod thread;

pub use builder::{Backend, InterpreterSessionBuilder};
pub use session::InterpreterSession;

#[cfg(not(target_arch = "wasm32"))]
use mimalloc::MiMalloc;

#[cfg(not(target_arch = "wasm32"))]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;
