//! The plain-data form of a decoded model, and its conversion into a [`Graph`].
//!
//! Decoding the on-disk container is left to the caller. What arrives here is already a list of
//! initializers and nodes.

use crate::{
    error::GraphError,
    fixed_dim::FixedDimensions,
    graph::Graph,
    node::{Attribute, Node},
    tensor::Tensor,
};

/// Element types an initializer may declare. Only `Float` is executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemType {
    Float,
    Double,
    Int32,
    Int64,
    Other(i32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitializerDesc {
    pub name: String,
    pub dims: Vec<i64>,
    pub elem_type: ElemType,
    /// Little-endian element bytes.
    pub raw_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeDesc {
    pub name: Option<String>,
    pub op_type: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attributes: Vec<(String, Attribute)>,
}

/// Name and (optionally) shape of a graph input or output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueInfo {
    pub name: String,
    pub dims: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelDescription {
    pub initializers: Vec<InitializerDesc>,
    pub nodes: Vec<NodeDesc>,
    pub input: Option<ValueInfo>,
    pub output: Option<ValueInfo>,
}

impl InitializerDesc {
    pub fn to_tensor(&self) -> Result<Tensor, GraphError> {
        let invalid = |reason: String| GraphError::InvalidInitializer {
            name: self.name.clone(),
            reason: reason.into(),
        };

        if self.elem_type != ElemType::Float {
            return Err(invalid(format!(
                "element type {:?} is not supported",
                self.elem_type
            )));
        }
        let dims = to_fixed_dims(&self.dims).ok_or_else(|| {
            invalid(format!("dimensions {:?} contain a negative entry", self.dims))
        })?;
        if self.raw_data.len() != dims.total_elems() * 4 {
            return Err(invalid(format!(
                "{} bytes given for shape {:?}",
                self.raw_data.len(),
                dims
            )));
        }

        let data = self
            .raw_data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Tensor::new(dims, data)?)
    }
}

impl From<NodeDesc> for Node {
    fn from(desc: NodeDesc) -> Self {
        let node = Node::new(desc.op_type)
            .with_name(desc.name)
            .with_ins(desc.inputs)
            .with_outs(desc.outputs);
        desc.attributes
            .into_iter()
            .fold(node, |node, (name, attr)| node.with_attr(name, attr))
    }
}

fn to_fixed_dims(dims: &[i64]) -> Option<FixedDimensions> {
    dims.iter()
        .map(|&d| usize::try_from(d).ok())
        .collect::<Option<Vec<_>>>()
        .map(Into::into)
}

impl Graph {
    /// Builds a graph from a decoded model.
    ///
    /// Reserved tensor names come from the declared input and output when present, and fall back
    /// to [`Graph::DEFAULT_INPUT_NAME`] and [`Graph::DEFAULT_OUTPUT_NAME`] otherwise.
    pub fn from_description(desc: ModelDescription) -> Result<Graph, GraphError> {
        let input_name = desc
            .input
            .as_ref()
            .map_or(Graph::DEFAULT_INPUT_NAME, |v| v.name.as_str());
        let output_name = desc
            .output
            .as_ref()
            .map_or(Graph::DEFAULT_OUTPUT_NAME, |v| v.name.as_str());
        let mut graph = Graph::with_io_names(input_name, output_name);

        if let Some(dims) = desc
            .input
            .as_ref()
            .and_then(|v| v.dims.as_deref())
            .and_then(to_fixed_dims)
        {
            graph.set_input_dims(dims);
        }

        for init in &desc.initializers {
            graph.add_initializer(init.name.clone(), init.to_tensor()?);
        }
        for node in desc.nodes {
            graph.add_node(node.into());
        }

        log::debug!(
            "loaded graph: {} nodes, {} initializers",
            graph.num_nodes(),
            graph.tensors.len()
        );

        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn weight(name: &str, dims: Vec<i64>, values: &[f32]) -> InitializerDesc {
        InitializerDesc {
            name: name.into(),
            dims,
            elem_type: ElemType::Float,
            raw_data: f32_bytes(values),
        }
    }

    #[test]
    fn build_graph() {
        let desc = ModelDescription {
            initializers: vec![weight("w", vec![1, 1, 2, 2], &[1.0, 0.0, 0.0, -1.0])],
            nodes: vec![NodeDesc {
                name: Some("conv0".into()),
                op_type: "Conv".into(),
                inputs: vec!["data".into(), "w".into()],
                outputs: vec!["prob".into()],
                attributes: vec![("strides".into(), Attribute::Ints(vec![1, 1]))],
            }],
            input: Some(ValueInfo {
                name: "data".into(),
                dims: Some(vec![1, 1, 3, 3]),
            }),
            output: Some(ValueInfo {
                name: "prob".into(),
                dims: None,
            }),
        };

        let graph = Graph::from_description(desc).unwrap();
        assert_eq!(graph.input_name(), "data");
        assert_eq!(graph.output_name(), "prob");
        assert_eq!(graph.input_dims(), Some(&vec![1, 1, 3, 3].into()));
        assert_eq!(graph.tensors["w"].data(), &[1.0, 0.0, 0.0, -1.0]);

        let (_, node) = graph.nodes().iter().next().unwrap();
        assert_eq!(node.label(), "conv0");
        assert_eq!(node.attr_ints("strides", &[2, 2]), vec![1, 1]);
    }

    #[test]
    fn default_io_names() {
        let graph = Graph::from_description(ModelDescription::default()).unwrap();
        assert_eq!(graph.input_name(), "input");
        assert_eq!(graph.output_name(), "output");
        assert!(graph.input_dims().is_none());
    }

    #[test]
    fn reject_short_initializer() {
        let mut init = weight("b", vec![3], &[1.0, 2.0, 3.0]);
        init.raw_data.pop();
        assert!(matches!(
            init.to_tensor(),
            Err(GraphError::InvalidInitializer { name, .. }) if name == "b"
        ));
    }

    #[test]
    fn reject_non_float_initializer() {
        let mut init = weight("shape", vec![2], &[1.0, 2.0]);
        init.elem_type = ElemType::Int64;
        assert!(init.to_tensor().is_err());
    }
}
