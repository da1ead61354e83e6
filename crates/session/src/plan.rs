use pinion_core::{graph::Graph, node::NodeId, op::Op};

/// A node to execute, with its operator resolved ahead of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeExecutionPlan {
    /// The node to execute.
    pub node_id: NodeId,

    /// `None` if no kernel exists for the node's `op_type`.
    pub op: Option<Op>,
}

/// Resolves every node of a scheduled graph, in schedule order.
///
/// Returns `None` if the graph has not been scheduled.
pub fn create_execution_plan(graph: &Graph) -> Option<Vec<NodeExecutionPlan>> {
    let sorted_nodes = graph.sorted_nodes()?;
    let plans = sorted_nodes
        .iter()
        .map(|&node_id| NodeExecutionPlan {
            node_id,
            op: Op::from_op_type(&graph.node(node_id).op_type),
        })
        .collect::<Vec<_>>();

    log::debug!(
        "execution plan: {} nodes ({} unsupported)",
        plans.len(),
        plans.iter().filter(|p| p.op.is_none()).count()
    );

    Some(plans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinion_core::node::Node;

    #[test]
    fn resolve_ops_in_schedule_order() {
        let mut graph = Graph::new();
        graph.add_node(Node::new("Softmax").with_in("h").with_out("output"));
        graph.add_node(Node::new("LSTM").with_in("r").with_out("h"));
        graph.add_node(Node::new("Relu").with_in("input").with_out("r"));
        assert!(create_execution_plan(&graph).is_none());

        graph.schedule().unwrap();
        let plan = create_execution_plan(&graph).unwrap();
        let ops = plan.iter().map(|p| p.op).collect::<Vec<_>>();
        assert_eq!(ops, vec![Some(Op::Relu), None, Some(Op::Softmax)]);
    }
}
