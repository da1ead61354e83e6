use id_arena::{Arena, Id};
use rustc_hash::FxHashMap;

use crate::tensor::Tensor;

pub type NodeId = Id<Node>;
pub type NodeArena = Arena<Node>;

/// A typed attribute value, as decoded from the model.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Float(f32),
    Int(i64),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Tensor(Tensor),
}

/// One operator invocation in a computation graph.
///
/// Inputs and outputs refer to tensors by name. An empty input name stands for an omitted
/// optional input.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub op_type: String,
    pub name: Option<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attributes: FxHashMap<String, Attribute>,
}

impl Node {
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            name: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            attributes: FxHashMap::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<Option<String>>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_in(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    pub fn with_ins<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.inputs.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_out(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    pub fn with_outs<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.outputs.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    pub fn alloc(self, arena: &mut NodeArena) -> NodeId {
        arena.alloc(self)
    }

    /// A short label for messages: the node name if it has one, else its first output.
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or_else(|| self.outputs.first().map(String::as_str))
            .unwrap_or(&self.op_type)
    }

    /// The `i`-th input name, treating an empty name as absent.
    pub fn input(&self, i: usize) -> Option<&str> {
        self.inputs
            .get(i)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    pub fn attr_f32(&self, name: &str, default: f32) -> f32 {
        match self.attributes.get(name) {
            Some(Attribute::Float(f)) => *f,
            _ => default,
        }
    }

    pub fn attr_i64(&self, name: &str, default: i64) -> i64 {
        match self.attributes.get(name) {
            Some(Attribute::Int(i)) => *i,
            _ => default,
        }
    }

    pub fn attr_ints(&self, name: &str, default: &[i64]) -> Vec<i64> {
        match self.attributes.get(name) {
            Some(Attribute::Ints(ints)) if !ints.is_empty() => ints.clone(),
            _ => default.to_vec(),
        }
    }

    pub fn attr_floats(&self, name: &str, default: &[f32]) -> Vec<f32> {
        match self.attributes.get(name) {
            Some(Attribute::Floats(floats)) if !floats.is_empty() => floats.clone(),
            _ => default.to_vec(),
        }
    }

    pub fn attr_tensor(&self, name: &str) -> Option<&Tensor> {
        match self.attributes.get(name) {
            Some(Attribute::Tensor(t)) => Some(t),
            _ => None,
        }
    }
}

#[test]
fn attribute_defaults() {
    let node = Node::new("Conv")
        .with_attr("strides", Attribute::Ints(vec![2, 2]))
        .with_attr("group", Attribute::Int(4))
        .with_attr("pads", Attribute::Ints(vec![]))
        .with_attr("alpha", Attribute::Int(3));

    assert_eq!(node.attr_ints("strides", &[1, 1]), vec![2, 2]);
    assert_eq!(node.attr_ints("dilations", &[1, 1]), vec![1, 1]);
    assert_eq!(node.attr_ints("pads", &[0, 0, 0, 0]), vec![0, 0, 0, 0]);
    assert_eq!(node.attr_i64("group", 1), 4);
    // Wrong type falls back to the default.
    assert_eq!(node.attr_f32("alpha", 1.0), 1.0);
    assert_eq!(node.attr_f32("epsilon", 1e-5), 1e-5);
    assert!(node.attr_tensor("value").is_none());
}

#[test]
fn optional_inputs() {
    let node = Node::new("Clip").with_ins(["x", "", "max"]).with_out("y");
    assert_eq!(node.input(0), Some("x"));
    assert_eq!(node.input(1), None);
    assert_eq!(node.input(2), Some("max"));
    assert_eq!(node.input(3), None);
    assert_eq!(node.label(), "y");
}
