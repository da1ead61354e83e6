use pinion_core::{error::ShapeError, tensor::Tensor};

use crate::thread::ThreadCtx;

/// Below this many elements, splitting work across the pool costs more than it saves.
const PARALLEL_THRESHOLD: usize = 1 << 16;

pub fn compute_add(tctx: &ThreadCtx, a: &Tensor, b: &Tensor) -> Result<Tensor, ShapeError> {
    if a.dims() != b.dims() {
        return Err(ShapeError::mismatch("Add", a.dims(), b.dims()));
    }
    let mut output = Tensor::zeros(a.dims().clone());
    let (a, b) = (a.data(), b.data());
    let out = output.data_mut();

    if out.len() < PARALLEL_THRESHOLD || tctx.num_threads() == 1 {
        for ((o, a), b) in out.iter_mut().zip(a).zip(b) {
            *o = a + b;
        }
        return Ok(output);
    }

    let chunk = tctx.chunk_len(out.len());
    tctx.scope(|scope| {
        for ((o, a), b) in out
            .chunks_mut(chunk)
            .zip(a.chunks(chunk))
            .zip(b.chunks(chunk))
        {
            scope.spawn(move || {
                for ((o, a), b) in o.iter_mut().zip(a).zip(b) {
                    *o = a + b;
                }
            });
        }
    });

    Ok(output)
}

pub fn compute_relu(input: &Tensor) -> Tensor {
    let mut output = input.clone();
    output.data_mut().iter_mut().for_each(|x| *x = x.max(0.0));
    output
}

/// `min(max_val, max(min_val, x))`.
pub fn compute_clip(input: &Tensor, min_val: f32, max_val: f32) -> Tensor {
    let mut output = input.clone();
    output
        .data_mut()
        .iter_mut()
        .for_each(|x| *x = max_val.min(min_val.max(*x)));
    output
}

/// Softmax over every element of the tensor, shifted by the maximum first.
pub fn compute_softmax(input: &Tensor) -> Tensor {
    let mut output = input.clone();
    let data = output.data_mut();
    if data.is_empty() {
        return output;
    }

    let max = data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0f32;
    for x in data.iter_mut() {
        *x = (*x - max).exp();
        sum += *x;
    }
    let recip = 1.0 / sum;
    data.iter_mut().for_each(|x| *x *= recip);

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_same_shape() {
        let tctx = ThreadCtx::new();
        let a = Tensor::new(vec![2, 2].into(), vec![1., 2., 3., 4.]).unwrap();
        let b = Tensor::new(vec![2, 2].into(), vec![4., 3., 2., 1.]).unwrap();
        let c = compute_add(&tctx, &a, &b).unwrap();
        assert_eq!(c.dims(), a.dims());
        assert_eq!(c.data(), &[5., 5., 5., 5.]);
    }

    #[test]
    fn add_rejects_broadcast() {
        let tctx = ThreadCtx::new();
        let a = Tensor::zeros(vec![2, 2].into());
        let b = Tensor::zeros(vec![2].into());
        assert!(matches!(
            compute_add(&tctx, &a, &b),
            Err(ShapeError::Mismatch { op: "Add", .. })
        ));
    }

    #[test]
    fn add_in_parallel() {
        let tctx = ThreadCtx::new_with_num_threads(4);
        Tensor::seed_rng_from_u64(7);
        let a = Tensor::rand(vec![3, 200, 200].into());
        let b = Tensor::rand(vec![3, 200, 200].into());
        let c = compute_add(&tctx, &a, &b).unwrap();
        let expected = a
            .data()
            .iter()
            .zip(b.data())
            .map(|(a, b)| a + b)
            .collect::<Vec<_>>();
        assert_eq!(c.data(), expected.as_slice());
    }

    #[test]
    fn relu_and_clip() {
        let x = Tensor::new(vec![5].into(), vec![-2., -0.5, 0., 3., 7.]).unwrap();
        assert_eq!(compute_relu(&x).data(), &[0., 0., 0., 3., 7.]);
        assert_eq!(compute_clip(&x, 0., 6.).data(), &[0., 0., 0., 3., 6.]);
        assert_eq!(compute_clip(&x, -1., 1.).data(), &[-1., -0.5, 0., 1., 1.]);
    }

    #[test]
    fn softmax_sums_to_one() {
        Tensor::seed_rng_from_u64(42);
        for dims in [vec![10], vec![2, 3, 4], vec![1, 1000]] {
            let x = Tensor::rand(dims.into());
            let sum: f32 = compute_softmax(&x).data().iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "sum = {sum}");
        }
    }

    #[test]
    fn softmax_is_shift_invariant() {
        let x = Tensor::new(vec![4].into(), vec![1., 2., 3., 4.]).unwrap();
        let shifted = Tensor::new(vec![4].into(), vec![101., 102., 103., 104.]).unwrap();
        let y = compute_softmax(&x);
        assert!(compute_softmax(&shifted).allclose(y.data()));
        // Large inputs must not overflow.
        let big = Tensor::new(vec![2].into(), vec![1000., 1000.]).unwrap();
        assert_eq!(compute_softmax(&big).data(), &[0.5, 0.5]);
    }
}
