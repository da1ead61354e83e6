use ndarray::IxDyn;
use pinion_core::{error::ShapeError, fixed_dim::FixedDimensions, node::Node, tensor::Tensor};

/// Resolves a reshape target against the input shape.
///
/// `0` copies the input dimension at the same position, and a single `-1` is inferred from the
/// remaining element count.
pub fn resolve_reshape(
    input: &FixedDimensions,
    target: &[i64],
) -> Result<FixedDimensions, ShapeError> {
    const OP: &str = "Reshape";

    let mut dims = Vec::with_capacity(target.len());
    let mut infer_at = None;
    for (i, &d) in target.iter().enumerate() {
        match d {
            -1 if infer_at.is_none() => {
                infer_at = Some(i);
                dims.push(1);
            }
            0 => match input.get(i) {
                Some(&d) => dims.push(d),
                None => {
                    return Err(ShapeError::invalid(
                        OP,
                        format!("0 at position {i} has no input dimension to copy"),
                    ))
                }
            },
            d if d > 0 => dims.push(d as usize),
            _ => {
                return Err(ShapeError::invalid(
                    OP,
                    format!("invalid target shape {target:?}"),
                ))
            }
        }
    }

    let total = input.total_elems();
    let known: usize = dims.iter().product();
    if let Some(i) = infer_at {
        if known == 0 || total % known != 0 {
            return Err(ShapeError::invalid(
                OP,
                format!("cannot infer -1 in {target:?} for {input:?}"),
            ));
        }
        dims[i] = total / known;
    }

    let dims = FixedDimensions::from(dims);
    if dims.total_elems() != total {
        return Err(ShapeError::mismatch(OP, input, &dims));
    }
    Ok(dims)
}

/// The target of a Reshape node: its second input if bound, else its `shape` attribute.
///
/// Shape tensors arrive as floats, so every entry must be integral.
pub fn reshape_target(node: &Node, shape: Option<&Tensor>) -> Result<Vec<i64>, ShapeError> {
    match shape {
        Some(shape) => shape
            .data()
            .iter()
            .map(|&v| {
                if v.fract() == 0.0 {
                    Ok(v as i64)
                } else {
                    Err(ShapeError::invalid(
                        "Reshape",
                        format!("shape entry {v} is not an integer"),
                    ))
                }
            })
            .collect(),
        None => {
            let target = node.attr_ints("shape", &[]);
            if target.is_empty() {
                return Err(ShapeError::invalid("Reshape", "no target shape given"));
            }
            Ok(target)
        }
    }
}

pub fn compute_reshape(input: &Tensor, target: &[i64]) -> Result<Tensor, ShapeError> {
    let dims = resolve_reshape(input.dims(), target)?;
    input.clone().reshape(dims)
}

/// Collapses the axes before `axis` into the first output dimension and the rest into the
/// second. `axis = 1` gives `[batch, total / batch]`.
pub fn compute_flatten(input: &Tensor, axis: i64) -> Result<Tensor, ShapeError> {
    const OP: &str = "Flatten";

    let rank = input.rank();
    if rank < 2 {
        return Err(ShapeError::rank(OP, 2, input.dims()));
    }
    let axis = if axis < 0 { axis + rank as i64 } else { axis };
    if !(0..=rank as i64).contains(&axis) {
        return Err(ShapeError::invalid(
            OP,
            format!("axis {axis} out of range for rank {rank}"),
        ));
    }
    let axis = axis as usize;
    let outer: usize = input.dims()[..axis].iter().product();
    let inner: usize = input.dims()[axis..].iter().product();
    input.clone().reshape(vec![outer, inner].into())
}

/// General N-dimensional permutation. An empty `perm` reverses the axes.
pub fn compute_transpose(input: &Tensor, perm: &[i64]) -> Result<Tensor, ShapeError> {
    const OP: &str = "Transpose";

    let perm = if perm.is_empty() {
        (0..input.rank()).rev().collect::<Vec<_>>()
    } else {
        perm.iter()
            .map(|&p| usize::try_from(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ShapeError::invalid(OP, format!("invalid permutation {perm:?}")))?
    };
    if input.dims().permuted(&perm).is_none() {
        return Err(ShapeError::invalid(
            OP,
            format!("{perm:?} is not a permutation of rank {}", input.rank()),
        ));
    }

    let view = input.view()?.permuted_axes(IxDyn(&perm));
    Ok(Tensor::from(view.as_standard_layout().into_owned()))
}
