use std::time::Instant;

use rustc_hash::FxHashSet;

use crate::{
    error::{GraphError, ShapeError},
    graph::Graph,
    layout::Layout,
    node::{Attribute, Node, NodeId},
    op::Op,
};

const CHANNELS_LAST_SUFFIX: &str = "_nhwc";

/// Rewrites a channel-first graph so that every layout-sensitive operator works on channel-last
/// tensors.
///
/// Channel-last copies of tensors are named `<name>_nhwc`. Transposes are inserted where a tensor
/// crosses between the two worlds, including one in front of the declared output. Convolution
/// weights are reordered to OHWI in place; the original order is not kept.
///
/// Returns `false` and leaves the graph untouched if the declared input is not rank 4, if no
/// layout-sensitive operator is present, or if the graph is already channel-last.
pub fn to_channels_last(graph: &mut Graph) -> Result<bool, GraphError> {
    let start = Instant::now();

    if graph.layout() == Layout::ChannelsLast
        || graph.input_dims().map_or(true, |dims| dims.len() != 4)
    {
        return Ok(false);
    }

    let order = graph.topo_sort_nodes()?;
    let has_sensitive_op = order.iter().any(|&id| {
        Op::from_op_type(&graph.node(id).op_type).map_or(false, |op| op.is_layout_sensitive())
    });
    if !has_sensitive_op {
        return Ok(false);
    }

    let mut rewriter = Rewriter::default();
    for &id in &order {
        rewriter.visit(graph, id)?;
    }
    let output = graph.output_name().to_string();
    if rewriter.channels_last.contains(&output) {
        rewriter.to_channels_first(graph, &output);
    }

    graph.set_layout(Layout::ChannelsLast);

    log::info!(
        "to_channels_last({} transposes, {} filters): {:?}",
        rewriter.inserted,
        rewriter.reordered.len(),
        start.elapsed()
    );

    Ok(true)
}

pub fn channels_last_name(name: &str) -> String {
    format!("{name}{CHANNELS_LAST_SUFFIX}")
}

#[derive(Default)]
struct Rewriter {
    /// Original names of tensors that now only exist in channel-last form.
    channels_last: FxHashSet<String>,
    /// Channel-first tensors that already have a channel-last copy.
    forward: FxHashSet<String>,
    /// Channel-last tensors that already have a channel-first copy.
    backward: FxHashSet<String>,
    /// Outputs of channel-last GlobalAveragePool, whose data order matches both layouts.
    pooled: FxHashSet<String>,
    reordered: FxHashSet<String>,
    inserted: usize,
}

impl Rewriter {
    fn visit(&mut self, graph: &mut Graph, id: NodeId) -> Result<(), GraphError> {
        let node = graph.node(id);
        let op = Op::from_op_type(&node.op_type);

        match op {
            Some(op) if op.is_layout_sensitive() => {
                let Some(x) = node.input(0).map(str::to_string) else {
                    return Ok(());
                };
                if op == Op::Conv {
                    if let Some(w) = node.input(Op::CONV2D_WEIGHT).map(str::to_string) {
                        self.reorder_filter(graph, &w)?;
                    }
                }
                if !self.channels_last.contains(&x) {
                    self.to_channels_last(graph, &x);
                }
                let y = graph.node(id).outputs.first().cloned();
                let node = &mut graph.nodes_mut()[id];
                node.inputs[0] = channels_last_name(&x);
                if let Some(y) = y {
                    node.outputs[0] = channels_last_name(&y);
                    if op == Op::GlobalAveragePool {
                        self.pooled.insert(y.clone());
                    }
                    self.channels_last.insert(y);
                }
            }
            Some(op) if op.is_layout_agnostic_elemwise() => {
                let arity = if op == Op::Add { 2 } else { 1 };
                let acts = (0..arity)
                    .filter_map(|i| node.input(i).map(str::to_string))
                    .collect::<Vec<_>>();
                let all_channels_last =
                    !acts.is_empty() && acts.iter().all(|a| self.channels_last.contains(a));
                if all_channels_last {
                    let y = node.outputs.first().cloned();
                    let node = &mut graph.nodes_mut()[id];
                    for (i, a) in acts.iter().enumerate() {
                        node.inputs[i] = channels_last_name(a);
                    }
                    if let Some(y) = y {
                        node.outputs[0] = channels_last_name(&y);
                        self.channels_last.insert(y);
                    }
                } else {
                    self.restore_inputs(graph, id);
                }
            }
            Some(Op::Flatten | Op::Reshape) => {
                let x = node.input(0).map(str::to_string);
                match x {
                    Some(x) if self.pooled.contains(&x) => {
                        graph.nodes_mut()[id].inputs[0] = channels_last_name(&x);
                    }
                    _ => self.restore_inputs(graph, id),
                }
            }
            _ => self.restore_inputs(graph, id),
        }

        Ok(())
    }

    /// Makes every channel-last input of a channel-first node available under its original name.
    fn restore_inputs(&mut self, graph: &mut Graph, id: NodeId) {
        let needed = graph
            .node(id)
            .inputs
            .iter()
            .filter(|i| self.channels_last.contains(*i))
            .cloned()
            .collect::<Vec<_>>();
        for name in needed {
            self.to_channels_first(graph, &name);
        }
    }

    fn to_channels_last(&mut self, graph: &mut Graph, name: &str) {
        if !self.forward.insert(name.to_string()) {
            return;
        }
        graph.add_node(transpose(name, channels_last_name(name), Layout::TO_CHANNELS_LAST));
        self.inserted += 1;
    }

    fn to_channels_first(&mut self, graph: &mut Graph, name: &str) {
        if !self.backward.insert(name.to_string()) {
            return;
        }
        graph.add_node(transpose(channels_last_name(name), name, Layout::TO_CHANNELS_FIRST));
        self.inserted += 1;
    }

    fn reorder_filter(&mut self, graph: &mut Graph, name: &str) -> Result<(), GraphError> {
        if self.reordered.contains(name) {
            return Ok(());
        }
        let Some(weight) = graph.tensors.get_mut(name) else {
            return Err(ShapeError::invalid(
                "Conv",
                format!("weight '{name}' must be an initializer to be reordered"),
            )
            .into());
        };
        weight.reorder_oihw_to_ohwi()?;
        self.reordered.insert(name.to_string());
        Ok(())
    }
}

fn transpose(input: impl Into<String>, output: impl Into<String>, perm: [usize; 4]) -> Node {
    Node::new(Op::Transpose.name())
        .with_in(input)
        .with_out(output)
        .with_attr(
            "perm",
            Attribute::Ints(perm.iter().map(|&p| p as i64).collect()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    fn conv_relu_graph() -> Graph {
        let mut graph = Graph::new();
        graph.set_input_dims(vec![1, 2, 4, 4].into());
        graph.add_initializer("w", Tensor::rand(vec![3, 2, 1, 1].into()));
        graph.add_node(Node::new("Conv").with_ins(["input", "w"]).with_out("c"));
        graph.add_node(Node::new("Relu").with_in("c").with_out("r"));
        graph.add_node(Node::new("Flatten").with_in("r").with_out("output"));
        graph
    }

    fn find<'a>(graph: &'a Graph, output: &str) -> &'a Node {
        graph
            .nodes()
            .iter()
            .map(|(_, n)| n)
            .find(|n| n.outputs.iter().any(|o| o == output))
            .unwrap()
    }

    #[test]
    fn rewrite_conv_relu() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut graph = conv_relu_graph();
        assert!(to_channels_last(&mut graph).unwrap());
        assert_eq!(graph.layout(), Layout::ChannelsLast);
        assert!(!graph.is_scheduled());

        let entry = find(&graph, "input_nhwc");
        assert_eq!(entry.op_type, "Transpose");
        assert_eq!(entry.attr_ints("perm", &[]), vec![0, 2, 3, 1]);

        let conv = find(&graph, "c_nhwc");
        assert_eq!(conv.inputs, vec!["input_nhwc", "w"]);
        let relu = find(&graph, "r_nhwc");
        assert_eq!(relu.inputs, vec!["c_nhwc"]);

        // Flatten is layout-agnostic, so it reads a transposed-back copy.
        let back = find(&graph, "r");
        assert_eq!(back.op_type, "Transpose");
        assert_eq!(back.inputs, vec!["r_nhwc"]);
        assert_eq!(back.attr_ints("perm", &[]), vec![0, 3, 1, 2]);
        assert_eq!(find(&graph, "output").inputs, vec!["r"]);

        assert_eq!(graph.tensors["w"].dims(), &vec![3, 1, 1, 2].into());
        assert_eq!(graph.num_nodes(), 5);
        graph.schedule().unwrap();
    }

    #[test]
    fn transpose_before_output() {
        let mut graph = Graph::new();
        graph.set_input_dims(vec![1, 2, 4, 4].into());
        graph.add_node(
            Node::new("MaxPool")
                .with_in("input")
                .with_out("output")
                .with_attr("kernel_shape", Attribute::Ints(vec![2, 2])),
        );
        assert!(to_channels_last(&mut graph).unwrap());
        let last = find(&graph, "output");
        assert_eq!(last.op_type, "Transpose");
        assert_eq!(last.inputs, vec!["output_nhwc"]);

        let order = graph.topo_sort_nodes().unwrap();
        let ops = order
            .iter()
            .map(|&id| graph.node(id).op_type.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ops, vec!["Transpose", "MaxPool", "Transpose"]);
    }

    #[test]
    fn pooled_output_feeds_flatten() {
        let mut graph = Graph::new();
        graph.set_input_dims(vec![1, 2, 4, 4].into());
        graph.add_node(Node::new("GlobalAveragePool").with_in("input").with_out("g"));
        graph.add_node(Node::new("Flatten").with_in("g").with_out("output"));
        assert!(to_channels_last(&mut graph).unwrap());
        assert_eq!(find(&graph, "output").inputs, vec!["g_nhwc"]);
        assert_eq!(graph.num_nodes(), 3);
    }

    #[test]
    fn shared_filter_reordered_once() {
        let mut graph = Graph::new();
        graph.set_input_dims(vec![1, 2, 4, 4].into());
        graph.add_initializer("w", Tensor::rand(vec![2, 2, 3, 1].into()));
        graph.add_node(Node::new("Conv").with_ins(["input", "w"]).with_out("a"));
        graph.add_node(Node::new("Conv").with_ins(["a", "w"]).with_out("output"));
        assert!(to_channels_last(&mut graph).unwrap());
        assert_eq!(graph.tensors["w"].dims(), &vec![2, 3, 1, 2].into());
        assert_eq!(find(&graph, "output_nhwc").inputs, vec!["a_nhwc", "w"]);
    }

    #[test]
    fn noop_cases() {
        // No layout-sensitive operator.
        let mut graph = Graph::new();
        graph.set_input_dims(vec![1, 2, 4, 4].into());
        graph.add_node(Node::new("Relu").with_in("input").with_out("output"));
        assert!(!to_channels_last(&mut graph).unwrap());
        assert_eq!(graph.num_nodes(), 1);

        // Input is not rank 4.
        let mut graph = Graph::new();
        graph.set_input_dims(vec![1, 16].into());
        graph.add_node(Node::new("GlobalAveragePool").with_in("input").with_out("output"));
        assert!(!to_channels_last(&mut graph).unwrap());

        // Already rewritten.
        let mut graph = conv_relu_graph();
        assert!(to_channels_last(&mut graph).unwrap());
        let before = graph.num_nodes();
        let w = graph.tensors["w"].clone();
        assert!(!to_channels_last(&mut graph).unwrap());
        assert_eq!(graph.num_nodes(), before);
        assert_eq!(graph.tensors["w"], w);
    }
}
