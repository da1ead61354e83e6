use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    error::GraphError,
    fixed_dim::FixedDimensions,
    layout::Layout,
    node::{Node, NodeArena, NodeId},
    tensor::Tensor,
};

/// A computation graph together with its tensor environment.
///
/// `tensors` starts out holding the initializers. A run binds the input under
/// [`Graph::input_name`] and adds every node output as it is produced, so after a run the map
/// holds all intermediates too.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: NodeArena,
    pub tensors: FxHashMap<String, Tensor>,
    sorted_nodes: Option<Vec<NodeId>>,
    input_name: String,
    output_name: String,
    input_dims: Option<FixedDimensions>,
    layout: Layout,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub const DEFAULT_INPUT_NAME: &'static str = "input";
    pub const DEFAULT_OUTPUT_NAME: &'static str = "output";

    pub fn new() -> Self {
        Self::with_io_names(Self::DEFAULT_INPUT_NAME, Self::DEFAULT_OUTPUT_NAME)
    }

    pub fn with_io_names(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            nodes: NodeArena::new(),
            tensors: FxHashMap::default(),
            sorted_nodes: None,
            input_name: input.into(),
            output_name: output.into(),
            input_dims: None,
            layout: Layout::default(),
        }
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        self.sorted_nodes = None;
        node.alloc(&mut self.nodes)
    }

    pub fn add_initializer(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn nodes(&self) -> &NodeArena {
        &self.nodes
    }

    /// Mutable access to the nodes. Drops any schedule computed so far.
    pub fn nodes_mut(&mut self) -> &mut NodeArena {
        self.sorted_nodes = None;
        &mut self.nodes
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    /// The shape the model declares for its input, if known.
    pub fn input_dims(&self) -> Option<&FixedDimensions> {
        self.input_dims.as_ref()
    }

    pub fn set_input_dims(&mut self, dims: FixedDimensions) {
        self.input_dims = Some(dims);
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn set_layout(&mut self, layout: Layout) {
        self.layout = layout;
    }

    pub fn sorted_nodes(&self) -> Option<&[NodeId]> {
        self.sorted_nodes.as_deref()
    }

    pub fn is_scheduled(&self) -> bool {
        self.sorted_nodes.is_some()
    }

    /// Computes the execution order and stores it on the graph.
    pub fn schedule(&mut self) -> Result<&[NodeId], GraphError> {
        let order = self.topo_sort_nodes()?;
        let order = self.sorted_nodes.insert(order);
        Ok(order.as_slice())
    }

    /// Maps every tensor name to the nodes that read it.
    pub fn get_value_users(&self) -> FxHashMap<&str, Vec<NodeId>> {
        let mut users: FxHashMap<&str, Vec<NodeId>> = FxHashMap::default();
        for (id, node) in self.nodes.iter() {
            for input in node.inputs.iter().filter(|i| !i.is_empty()) {
                let list = users.entry(input.as_str()).or_default();
                if !list.contains(&id) {
                    list.push(id);
                }
            }
        }
        users
    }

    /// Maps every node output name to the node producing it.
    pub fn get_value_producers(&self) -> FxHashMap<&str, NodeId> {
        let mut producers = FxHashMap::default();
        for (id, node) in self.nodes.iter() {
            for output in &node.outputs {
                producers.insert(output.as_str(), id);
            }
        }
        producers
    }

    /// Orders the nodes so that every node comes after the producers of its inputs.
    ///
    /// Kahn's algorithm over a FIFO queue. Ready nodes are taken in declaration order, so the
    /// result is deterministic. The input name and every tensor already present that no node
    /// produces count as available from the start.
    pub fn topo_sort_nodes(&self) -> Result<Vec<NodeId>, GraphError> {
        let producers = self.get_value_producers();
        let value_users = self.get_value_users();

        let mut available: FxHashSet<&str> = self
            .tensors
            .keys()
            .map(String::as_str)
            .filter(|name| !producers.contains_key(name))
            .collect();
        available.insert(self.input_name.as_str());

        let mut num_pending = FxHashMap::default();
        let mut que = VecDeque::new();
        for (id, node) in self.nodes.iter() {
            let pending = node
                .inputs
                .iter()
                .filter(|i| !i.is_empty() && !available.contains(i.as_str()))
                .collect::<FxHashSet<_>>()
                .len();
            num_pending.insert(id, pending);
            if pending == 0 {
                que.push_back(id);
            }
        }

        let mut sorted = Vec::with_capacity(self.nodes.len());
        while let Some(id) = que.pop_front() {
            sorted.push(id);
            for output in &self.nodes[id].outputs {
                if !available.insert(output.as_str()) {
                    continue;
                }
                let Some(users) = value_users.get(output.as_str()) else {
                    continue;
                };
                for user in users {
                    let Some(pending) = num_pending.get_mut(user) else {
                        continue;
                    };
                    if *pending == 0 {
                        continue;
                    }
                    *pending -= 1;
                    if *pending == 0 {
                        que.push_back(*user);
                    }
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            let scheduled = sorted.iter().copied().collect::<FxHashSet<_>>();
            let mut unresolved = self
                .nodes
                .iter()
                .filter(|(id, _)| !scheduled.contains(id))
                .flat_map(|(_, node)| node.inputs.iter())
                .filter(|i| !i.is_empty() && !available.contains(i.as_str()))
                .cloned()
                .collect::<Vec<_>>();
            unresolved.sort();
            unresolved.dedup();
            return Err(GraphError::CycleOrMissingInput {
                scheduled: sorted.len(),
                total: self.nodes.len(),
                unresolved,
            });
        }

        Ok(sorted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(graph: &Graph, order: &[NodeId]) -> Vec<String> {
        order
            .iter()
            .map(|&id| graph.node(id).label().to_string())
            .collect()
    }

    fn chain() -> Graph {
        // input -> A -> B -> C -> D -> E -> output, declared out of order.
        let mut graph = Graph::new();
        for (name, input, output) in [
            ("E", "D", "output"),
            ("D", "C", "D"),
            ("C", "B", "C"),
            ("B", "A", "B"),
            ("A", "input", "A"),
        ] {
            graph.add_node(
                Node::new("Relu")
                    .with_name(name.to_string())
                    .with_in(input)
                    .with_out(output),
            );
        }
        graph
    }

    #[test]
    fn sort_shuffled_chain() {
        let graph = chain();
        let order = graph.topo_sort_nodes().unwrap();
        assert_eq!(labels(&graph, &order), vec!["A", "B", "C", "D", "E"]);
    }

    #[test]
    fn ties_follow_declaration_order() {
        let mut graph = Graph::new();
        graph.add_initializer("w", Tensor::zeros(vec![1].into()));
        graph.add_node(Node::new("Add").with_ins(["p", "q"]).with_out("output"));
        graph.add_node(Node::new("Relu").with_in("input").with_out("p"));
        graph.add_node(Node::new("Relu").with_in("w").with_out("q"));
        let order = graph.topo_sort_nodes().unwrap();
        insta::assert_debug_snapshot!(labels(&graph, &order), @r###"
        [
            "p",
            "q",
            "output",
        ]
        "###);
    }

    #[test]
    fn random_dags_respect_dependencies() {
        use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let num_nodes = rng.gen_range(1..20);
            let mut nodes = Vec::with_capacity(num_nodes);
            for i in 0..num_nodes {
                let pool = ["input".to_string(), "w".to_string()]
                    .into_iter()
                    .chain((0..i).map(|j| format!("t{j}")))
                    .collect::<Vec<_>>();
                let inputs = (0..rng.gen_range(1..=2))
                    .map(|_| pool[rng.gen_range(0..pool.len())].clone())
                    .collect::<Vec<_>>();
                nodes.push(Node::new("Add").with_ins(inputs).with_out(format!("t{i}")));
            }
            nodes.shuffle(&mut rng);

            let mut graph = Graph::new();
            graph.add_initializer("w", Tensor::zeros(vec![1].into()));
            for node in nodes {
                graph.add_node(node);
            }

            let order = graph.topo_sort_nodes().unwrap();
            assert_eq!(order.len(), num_nodes);
            let mut available = ["input", "w"]
                .into_iter()
                .map(String::from)
                .collect::<FxHashSet<_>>();
            for id in order {
                let node = graph.node(id);
                for input in &node.inputs {
                    assert!(available.contains(input), "{input} read before it was produced");
                }
                available.extend(node.outputs.iter().cloned());
            }
        }
    }

    #[test]
    fn detect_cycle() {
        let mut graph = Graph::new();
        graph.add_node(Node::new("Add").with_ins(["input", "b"]).with_out("a"));
        graph.add_node(Node::new("Relu").with_in("a").with_out("b"));
        let err = graph.topo_sort_nodes().unwrap_err();
        assert!(matches!(
            err,
            GraphError::CycleOrMissingInput {
                scheduled: 0,
                total: 2,
                ..
            }
        ));
        assert!(err.to_string().starts_with("Cycle detected or missing inputs in graph"));
    }

    #[test]
    fn detect_missing_producer() {
        let mut graph = Graph::new();
        graph.add_node(Node::new("Relu").with_in("input").with_out("a"));
        graph.add_node(Node::new("Add").with_ins(["a", "nowhere"]).with_out("output"));
        assert_eq!(
            graph.topo_sort_nodes(),
            Err(GraphError::CycleOrMissingInput {
                scheduled: 1,
                total: 2,
                unresolved: vec!["nowhere".to_string()],
            })
        );
    }

    #[test]
    fn omitted_inputs_are_ignored() {
        let mut graph = Graph::new();
        graph.add_node(Node::new("Clip").with_ins(["input", "", ""]).with_out("output"));
        assert_eq!(graph.topo_sort_nodes().unwrap().len(), 1);
    }

    #[test]
    fn schedule_is_stable() {
        let mut graph = chain();
        let first = graph.schedule().unwrap().to_vec();
        // Pretend a run happened: intermediates are now in the environment.
        for name in ["A", "B", "C", "D", "output"] {
            graph.tensors.insert(name.into(), Tensor::zeros(vec![1].into()));
        }
        let second = graph.schedule().unwrap().to_vec();
        assert_eq!(first, second);
        assert!(graph.is_scheduled());

        graph.add_node(Node::new("Relu").with_in("output").with_out("extra"));
        assert!(!graph.is_scheduled());
    }

    #[test]
    fn custom_io_names() {
        let mut graph = Graph::with_io_names("data", "prob");
        graph.add_node(Node::new("Softmax").with_in("data").with_out("prob"));
        assert_eq!(graph.input_name(), "data");
        assert_eq!(graph.output_name(), "prob");
        assert_eq!(graph.topo_sort_nodes().unwrap().len(), 1);
    }
}
