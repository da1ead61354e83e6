use pinion_core::{error::ShapeError, node::Node, tensor::Tensor};

use crate::gemm::{sgemm, sgemm_strided};

pub fn compute_mat_mul(a: &Tensor, b: &Tensor) -> Result<Tensor, ShapeError> {
    const OP: &str = "MatMul";

    if a.rank() != 2 {
        return Err(ShapeError::rank(OP, 2, a.dims()));
    }
    if b.rank() != 2 {
        return Err(ShapeError::rank(OP, 2, b.dims()));
    }
    let [m, k] = a.fixed_dims::<2>();
    let [k2, n] = b.fixed_dims::<2>();
    if k != k2 {
        return Err(ShapeError::mismatch(OP, a.dims(), b.dims()));
    }

    let mut output = Tensor::zeros(vec![m, n].into());
    sgemm(m, k, n, 1.0, a.data(), k, b.data(), n, 0.0, output.data_mut(), n);
    Ok(output)
}

/// Gemm attributes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gemm {
    pub alpha: f32,
    pub beta: f32,
    pub trans_a: bool,
    pub trans_b: bool,
}

impl Default for Gemm {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            trans_a: false,
            trans_b: false,
        }
    }
}

impl Gemm {
    pub fn from_node(node: &Node) -> Self {
        Self {
            alpha: node.attr_f32("alpha", 1.0),
            beta: node.attr_f32("beta", 1.0),
            trans_a: node.attr_i64("transA", 0) != 0,
            trans_b: node.attr_i64("transB", 0) != 0,
        }
    }
}

/// `alpha * op(A) * op(B) + beta * C`, where `op` optionally transposes.
///
/// `C` may hold one value, one value per output column, or the full `[M, N]` matrix.
pub fn compute_gemm(
    op: &Gemm,
    a: &Tensor,
    b: &Tensor,
    c: Option<&Tensor>,
) -> Result<Tensor, ShapeError> {
    const OP: &str = "Gemm";

    if a.rank() != 2 {
        return Err(ShapeError::rank(OP, 2, a.dims()));
    }
    if b.rank() != 2 {
        return Err(ShapeError::rank(OP, 2, b.dims()));
    }
    let [a0, a1] = a.fixed_dims::<2>();
    let [b0, b1] = b.fixed_dims::<2>();
    // Strides that read A as [M, K] and B as [K, N] regardless of storage order.
    let (m, k, a_strides) = if op.trans_a {
        (a1, a0, [1, a1])
    } else {
        (a0, a1, [a1, 1])
    };
    let (k2, n, b_strides) = if op.trans_b {
        (b1, b0, [1, b1])
    } else {
        (b0, b1, [b1, 1])
    };
    if k != k2 {
        return Err(ShapeError::mismatch(OP, a.dims(), b.dims()));
    }

    let mut output = Tensor::zeros(vec![m, n].into());
    let out = output.data_mut();
    let beta = match c {
        Some(c) => {
            let c_data = c.data();
            match c_data.len() {
                len if len == m * n && (c.rank() == 2 || m == 1) => out.copy_from_slice(c_data),
                len if len == n => out.chunks_mut(n.max(1)).for_each(|row| row.copy_from_slice(c_data)),
                1 => out.fill(c_data[0]),
                _ => return Err(ShapeError::mismatch(OP, c.dims(), &vec![m, n].into())),
            }
            op.beta
        }
        None => 0.0,
    };

    sgemm_strided(
        m,
        k,
        n,
        op.alpha,
        a.data(),
        a_strides,
        b.data(),
        b_strides,
        beta,
        out,
        [n, 1],
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinion_core::node::Attribute;

    fn mat(dims: [usize; 2], data: &[f32]) -> Tensor {
        Tensor::new(dims.to_vec().into(), data.to_vec()).unwrap()
    }

    #[test]
    fn mat_mul_2x3_3x2() {
        let a = mat([2, 3], &[1., 2., 3., 4., 5., 6.]);
        let b = mat([3, 2], &[7., 8., 9., 10., 11., 12.]);
        let c = compute_mat_mul(&a, &b).unwrap();
        assert_eq!(c.dims(), &vec![2, 2].into());
        assert_eq!(c.data(), &[58., 64., 139., 154.]);
        assert!(compute_mat_mul(&a, &a).is_err());
    }

    #[test]
    fn gemm_trans_b_with_bias() {
        let a = mat([1, 3], &[1., 2., 3.]);
        // B stored as [N=2, K=3].
        let b = mat([2, 3], &[1., 1., 1., 0., 1., 0.]);
        let c = Tensor::new(vec![2].into(), vec![10., 20.]).unwrap();
        let op = Gemm {
            alpha: 2.0,
            beta: 0.5,
            trans_b: true,
            ..Gemm::default()
        };
        let y = compute_gemm(&op, &a, &b, Some(&c)).unwrap();
        assert_eq!(y.data(), &[17., 14.]);
    }

    #[test]
    fn gemm_trans_a_matches_mat_mul() {
        Tensor::seed_rng_from_u64(42);
        let a = Tensor::rand(vec![4, 3].into());
        let b = Tensor::rand(vec![4, 5].into());
        let at = Tensor::from(a.view().unwrap().reversed_axes().to_owned());
        let expected = compute_mat_mul(&at, &b).unwrap();
        let op = Gemm {
            trans_a: true,
            ..Gemm::default()
        };
        let y = compute_gemm(&op, &a, &b, None).unwrap();
        assert_eq!(y.dims(), &vec![3, 5].into());
        assert!(y.allclose(expected.data()));
    }

    #[test]
    fn gemm_rejects_bad_bias() {
        let a = mat([2, 2], &[1., 0., 0., 1.]);
        let c = Tensor::zeros(vec![3].into());
        assert!(compute_gemm(&Gemm::default(), &a, &a, Some(&c)).is_err());
    }

    #[test]
    fn gemm_attributes() {
        assert_eq!(Gemm::from_node(&Node::new("Gemm")), Gemm::default());
        let node = Node::new("Gemm")
            .with_attr("transB", Attribute::Int(1))
            .with_attr("alpha", Attribute::Float(0.5));
        let op = Gemm::from_node(&node);
        assert!(op.trans_b && !op.trans_a);
        assert_eq!(op.alpha, 0.5);
        assert_eq!(op.beta, 1.0);
    }
}
