use std::sync::Arc;

use pinion_core::diagnostics::{Diagnostics, LogDiagnostics};
use pinion_session::SessionError;

use crate::{session::InterpreterSession, thread::ThreadCtx};

/// Which convolution and pooling kernels a session uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backend {
    /// Direct loops over the model's native channel-first layout.
    #[default]
    Reference,
    /// Channel-last kernels. Graphs are rewritten before they are scheduled.
    ChannelsLast,
}

pub struct InterpreterSessionBuilder {
    intra_op_num_threads: usize,
    backend: Backend,
    diagnostics: Option<Arc<dyn Diagnostics>>,
    enable_profiling: bool,
}

impl InterpreterSessionBuilder {
    pub fn new() -> Self {
        Self {
            intra_op_num_threads: 1,
            backend: Backend::Reference,
            diagnostics: None,
            enable_profiling: false,
        }
    }

    pub fn with_intra_op_num_threads(mut self, intra_op_num_threads: usize) -> Self {
        self.intra_op_num_threads = intra_op_num_threads;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn with_profiling_enabled(mut self, enable_profiling: bool) -> Self {
        self.enable_profiling = enable_profiling;
        self
    }

    pub fn build(self) -> Result<InterpreterSession, SessionError> {
        if self.intra_op_num_threads == 0 {
            return Err(SessionError::Message(
                "intra-op thread count must be at least 1".into(),
            ));
        }

        let diagnostics = self
            .diagnostics
            .unwrap_or_else(|| Arc::new(LogDiagnostics) as Arc<dyn Diagnostics>);
        diagnostics.debug(&format!(
            "interpreter session: {} thread(s), {:?} backend",
            self.intra_op_num_threads, self.backend
        ));

        Ok(InterpreterSession {
            tctx: ThreadCtx::new_with_num_threads(self.intra_op_num_threads),
            backend: self.backend,
            diagnostics,
            enable_profiling: self.enable_profiling,
        })
    }
}

impl Default for InterpreterSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
