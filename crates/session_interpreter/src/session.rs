use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use pinion_core::{
    diagnostics::Diagnostics,
    error::ShapeError,
    graph::Graph,
    layout::Layout,
    node::Node,
    op::Op,
    optimize::layout::to_channels_last,
    tensor::Tensor,
};
use pinion_session::{plan::create_execution_plan, Session, SessionError};
use rustc_hash::FxHashMap;

use crate::{
    builder::Backend,
    conv2d::{self, Conv2d},
    elemwise::{compute_add, compute_clip, compute_relu, compute_softmax},
    matmul::{compute_gemm, compute_mat_mul, Gemm},
    norm::{compute_batch_normalization, DEFAULT_EPSILON},
    pool::{compute_gavg_pool, compute_max_pool, MaxPool},
    shape::{compute_flatten, compute_reshape, compute_transpose, reshape_target},
    thread::ThreadCtx,
};

type Tensors = FxHashMap<String, Tensor>;

/// Executes graphs node by node.
///
/// The worker pool lives as long as the session and is shared by every graph it runs.
pub struct InterpreterSession {
    pub(super) tctx: ThreadCtx,
    pub(super) backend: Backend,
    pub(super) diagnostics: Arc<dyn Diagnostics>,
    pub(super) enable_profiling: bool,
}

impl InterpreterSession {
    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn num_threads(&self) -> usize {
        self.tctx.num_threads()
    }

    /// Readies `graph` for execution: applies the layout rewrite the backend needs, then
    /// schedules unless a valid schedule is already stored.
    pub fn prepare(&self, graph: &mut Graph) -> Result<(), SessionError> {
        if self.backend == Backend::ChannelsLast
            && graph.layout() == Layout::ChannelsFirst
            && to_channels_last(graph)?
        {
            self.diagnostics.info("graph rewritten to channel-last layout");
        }
        if !graph.is_scheduled() {
            let num_nodes = graph.schedule()?.len();
            self.diagnostics
                .debug(&format!("scheduled {num_nodes} node(s)"));
        }
        Ok(())
    }

    /// Binds `input`, executes every scheduled node and returns the output tensor.
    ///
    /// Unscheduled graphs are prepared first, and so is a channel-first graph under the
    /// `ChannelsLast` backend. If the graph declares no input shape, the shape of `input` is
    /// recorded for the layout rewrite. Nodes with unsupported operators are reported
    /// and skipped.
    pub fn run(&self, graph: &mut Graph, input: Tensor) -> Result<Tensor, SessionError> {
        let start = Instant::now();

        let needs_rewrite =
            self.backend == Backend::ChannelsLast && graph.layout() == Layout::ChannelsFirst;
        if !graph.is_scheduled() || needs_rewrite {
            if graph.input_dims().is_none() {
                graph.set_input_dims(input.dims().clone());
            }
            self.prepare(graph)?;
        }
        let plans = create_execution_plan(graph)
            .ok_or(SessionError::Message("graph is not scheduled".into()))?;

        let input_name = graph.input_name().to_string();
        graph.tensors.insert(input_name, input);

        let layout = graph.layout();
        let mut profile: FxHashMap<&'static str, Duration> = FxHashMap::default();

        for plan in &plans {
            let node = graph.node(plan.node_id);
            let Some(op) = plan.op else {
                let err = SessionError::UnsupportedOperator {
                    op_type: node.op_type.clone(),
                    node: node.label().to_string(),
                };
                self.diagnostics.warn(&format!("{err}; skipping"));
                continue;
            };

            let kernel_start = Instant::now();
            let output = self.run_node(&graph.tensors, node, op, layout)?;
            let elapsed = kernel_start.elapsed();

            #[cfg(feature = "heavy-log")]
            self.diagnostics
                .debug(&format!("{op}({}) {elapsed:?}", node.label()));

            if self.enable_profiling {
                *profile.entry(op.name()).or_insert(Duration::ZERO) += elapsed;
            }

            let name = node.outputs.first().cloned();
            if let Some(name) = name {
                graph.tensors.insert(name, output);
            }
        }

        if self.enable_profiling {
            self.report_profile(&profile, start.elapsed());
        }

        let output_name = graph.output_name();
        match graph.tensors.get(output_name) {
            Some(output) if output.verify() => Ok(output.clone()),
            Some(_) => Err(SessionError::MalformedOutput(output_name.to_string())),
            None => {
                self.diagnostics
                    .error(&format!("output tensor '{output_name}' not found"));
                Err(SessionError::MissingOutput(output_name.to_string()))
            }
        }
    }

    fn run_node(
        &self,
        tensors: &Tensors,
        node: &Node,
        op: Op,
        layout: Layout,
    ) -> Result<Tensor, SessionError> {
        let input = |i: usize| required_input(tensors, node, op, i);
        let optional = |i: usize| optional_input(tensors, node, i);

        let output = match op {
            Op::Conv => conv2d::compute(
                &self.tctx,
                &Conv2d::from_node(node)?,
                input(Op::CONV2D_IN)?,
                input(Op::CONV2D_WEIGHT)?,
                optional(Op::CONV2D_BIAS)?,
                layout,
            )?,
            Op::MatMul => compute_mat_mul(input(0)?, input(1)?)?,
            Op::Gemm => compute_gemm(
                &Gemm::from_node(node),
                input(Op::GEMM_IN_A)?,
                input(Op::GEMM_IN_B)?,
                optional(Op::GEMM_IN_C)?,
            )?,
            Op::Add => compute_add(&self.tctx, input(0)?, input(1)?)?,
            Op::Relu => compute_relu(input(0)?),
            Op::Clip => {
                let min = match optional(Op::CLIP_IN_MIN)? {
                    Some(t) => scalar(op, t)?,
                    None => node.attr_f32("min", 0.0),
                };
                let max = match optional(Op::CLIP_IN_MAX)? {
                    Some(t) => scalar(op, t)?,
                    None => node.attr_f32("max", 6.0),
                };
                compute_clip(input(0)?, min, max)
            }
            Op::Softmax => compute_softmax(input(0)?),
            Op::BatchNormalization => compute_batch_normalization(
                input(Op::BATCHNORM_IN_X)?,
                input(Op::BATCHNORM_IN_SCALE)?,
                input(Op::BATCHNORM_IN_B)?,
                input(Op::BATCHNORM_IN_INPUT_MEAN)?,
                input(Op::BATCHNORM_IN_INPUT_VAR)?,
                node.attr_f32("epsilon", DEFAULT_EPSILON),
                layout,
            )?,
            Op::GlobalAveragePool => compute_gavg_pool(input(0)?, layout)?,
            Op::MaxPool => compute_max_pool(&MaxPool::from_node(node)?, input(0)?, layout)?,
            Op::Reshape => {
                let target = reshape_target(node, optional(Op::RESHAPE_IN_SHAPE)?)?;
                compute_reshape(input(0)?, &target)?
            }
            Op::Flatten => compute_flatten(input(0)?, node.attr_i64("axis", 1))?,
            Op::Transpose => compute_transpose(input(0)?, &node.attr_ints("perm", &[]))?,
        };

        Ok(output)
    }

    fn report_profile(&self, profile: &FxHashMap<&'static str, Duration>, total: Duration) {
        let mut entries = profile.iter().collect::<Vec<_>>();
        entries.sort_by(|a, b| b.1.cmp(a.1));

        self.diagnostics.info(&format!(
            "Kernel execution time: {:?}",
            profile.values().sum::<Duration>()
        ));
        self.diagnostics
            .info(&format!("Total execution time: {total:?}"));
        for (op, elapsed) in entries {
            self.diagnostics.info(&format!("  {op}: {elapsed:?}"));
        }
    }
}

impl Session for InterpreterSession {
    fn run(&self, graph: &mut Graph, input: Tensor) -> Result<Tensor, SessionError> {
        InterpreterSession::run(self, graph, input)
    }
}

fn required_input<'a>(
    tensors: &'a Tensors,
    node: &Node,
    op: Op,
    i: usize,
) -> Result<&'a Tensor, SessionError> {
    let Some(name) = node.input(i) else {
        return Err(ShapeError::invalid(op.name(), format!("input #{i} is required")).into());
    };
    tensors.get(name).ok_or_else(|| SessionError::MissingInput {
        node: node.label().to_string(),
        name: name.to_string(),
    })
}

fn optional_input<'a>(
    tensors: &'a Tensors,
    node: &Node,
    i: usize,
) -> Result<Option<&'a Tensor>, SessionError> {
    match node.input(i) {
        None => Ok(None),
        Some(name) => tensors
            .get(name)
            .map(Some)
            .ok_or_else(|| SessionError::MissingInput {
                node: node.label().to_string(),
                name: name.to_string(),
            }),
    }
}

fn scalar(op: Op, t: &Tensor) -> Result<f32, ShapeError> {
    match t.data() {
        [v] => Ok(*v),
        _ => Err(ShapeError::invalid(
            op.name(),
            format!("expected a scalar, got shape {:?}", t.dims()),
        )),
    }
}
