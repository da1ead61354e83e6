use std::{cell::RefCell, fmt};

use crate::{
    error::ShapeError,
    fixed_dim::{FixedDimension, FixedDimensions},
};
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use rand::{distributions::Standard, rngs::StdRng, thread_rng, Rng, SeedableRng};

thread_local!(static RNG: RefCell<StdRng> =
    RefCell::new(StdRng::from_rng(thread_rng()).expect("Failed to seed StdRng.")));

/// A dense, row-major `f32` tensor.
///
/// `data.len() == dims.total_elems()` holds for every value that can be observed outside this
/// module. Cloning copies the buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dims: FixedDimensions,
    stride: FixedDimensions,
    data: Vec<f32>,
}

impl Tensor {
    pub fn new(dims: FixedDimensions, data: Vec<f32>) -> Result<Self, ShapeError> {
        if dims.total_elems() != data.len() {
            return Err(ShapeError::ElementCount {
                expected: dims.total_elems(),
                actual: data.len(),
                dims,
            });
        }
        Ok(Self {
            stride: dims.strides(),
            dims,
            data,
        })
    }

    pub fn zeros(dims: FixedDimensions) -> Self {
        let total_elems = dims.total_elems();
        Self {
            stride: dims.strides(),
            data: vec![0.0; total_elems],
            dims,
        }
    }

    pub fn from_scalar(value: f32) -> Self {
        Self {
            dims: FixedDimensions::default(),
            stride: FixedDimensions::default(),
            data: vec![value],
        }
    }

    pub fn rand(dims: FixedDimensions) -> Self {
        let total_elems = dims.total_elems();
        let data = RNG.with(|r| {
            (&mut *r.borrow_mut())
                .sample_iter(Standard)
                .take(total_elems)
                .collect::<Vec<f32>>()
        });
        Self {
            stride: dims.strides(),
            data,
            dims,
        }
    }

    pub fn seed_rng_from_u64(seed: u64) {
        RNG.with(|r| *r.borrow_mut() = StdRng::seed_from_u64(seed));
    }

    /// Reinterprets the buffer under a new shape without moving any data.
    pub fn reshape(self, dims: FixedDimensions) -> Result<Self, ShapeError> {
        Self::new(dims, self.data)
    }

    /// Rewrites a `[OC, IC, KH, KW]` filter into `[OC, KH, KW, IC]` order.
    ///
    /// This is one-way: nothing records the original order afterwards.
    pub fn reorder_oihw_to_ohwi(&mut self) -> Result<(), ShapeError> {
        if self.dims.len() != 4 {
            return Err(ShapeError::rank("ReorderOIHWtoOHWI", 4, &self.dims));
        }
        let reordered = Self::from(
            self.view()?
                .permuted_axes(IxDyn(&[0, 2, 3, 1]))
                .as_standard_layout()
                .into_owned(),
        );
        *self = reordered;
        Ok(())
    }

    pub fn dims(&self) -> &FixedDimensions {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn fixed_dims<const N: usize>(&self) -> [FixedDimension; N] {
        self.dims.to_fixed_dims::<N>()
    }

    pub fn strides(&self) -> &[FixedDimension] {
        self.stride.as_slice()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn view(&self) -> Result<ArrayViewD<'_, f32>, ShapeError> {
        ArrayViewD::from_shape(IxDyn(self.dims.as_slice()), &self.data).map_err(|_| {
            ShapeError::ElementCount {
                dims: self.dims.clone(),
                expected: self.dims.total_elems(),
                actual: self.data.len(),
            }
        })
    }

    pub fn verify(&self) -> bool {
        self.data.len() == self.dims.total_elems()
    }

    pub fn allclose(&self, other: &[f32]) -> bool {
        if self.data.len() != other.len() {
            return false;
        }

        self.data.iter().zip(other.iter()).all(|(&x, &y)| close(x, y))
    }
}

fn close(a: f32, b: f32) -> bool {
    let atol = 1e-5;
    let rtol = 1e-8;
    ((a - b).abs() <= (atol + rtol * b.abs()))
        || (a.is_infinite() && b.is_infinite() && a.is_sign_positive() == b.is_sign_positive())
}

impl From<ArrayD<f32>> for Tensor {
    fn from(arr: ArrayD<f32>) -> Self {
        let dims: FixedDimensions = arr.shape().to_vec().into();
        let arr = if arr.is_standard_layout() {
            arr
        } else {
            arr.as_standard_layout().into_owned()
        };
        Self {
            stride: dims.strides(),
            data: arr.into_raw_vec(),
            dims,
        }
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MAX_ELEMS: usize = 10;

        write!(f, "Tensor({:?}, ", self.dims)?;
        let data = &self.data;
        if data.len() > MAX_ELEMS {
            write!(f, "[")?;
            for e in data[0..MAX_ELEMS / 2].iter() {
                write!(f, "{e:?}, ")?;
            }
            write!(f, "...")?;
            for e in data[data.len() - MAX_ELEMS / 2..].iter() {
                write!(f, ", {e:?}")?;
            }
            write!(f, "])")
        } else {
            write!(f, "{data:?})")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_tensors() {
        assert!(Tensor::zeros(vec![1, 1, 28, 28].into()).verify());
        let t = Tensor::new(
            vec![4, 4].into(),
            (1..=16).map(|x| x as f32).collect::<Vec<_>>(),
        )
        .unwrap();
        assert!(t.verify());
        assert_eq!(t.strides(), &[4, 1]);
        let s = Tensor::from_scalar(2.5);
        assert_eq!(s.rank(), 0);
        assert!(s.verify());
    }

    #[test]
    fn reject_mismatched_length() {
        let err = Tensor::new(vec![2, 3].into(), vec![0.0; 5]).unwrap_err();
        assert_eq!(
            err,
            ShapeError::ElementCount {
                dims: vec![2, 3].into(),
                expected: 6,
                actual: 5
            }
        );
    }

    #[test]
    fn display_short() {
        let t = Tensor::new(vec![2, 2].into(), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        insta::assert_snapshot!(t, @"Tensor([2, 2], [1.0, 2.0, 3.0, 4.0])");
    }

    #[test]
    fn display_truncated() {
        let t = Tensor::new(vec![12].into(), (0..12).map(|x| x as f32).collect()).unwrap();
        insta::assert_snapshot!(
            t,
            @"Tensor([12], [0.0, 1.0, 2.0, 3.0, 4.0, ..., 7.0, 8.0, 9.0, 10.0, 11.0])"
        );
    }

    #[test]
    fn reshape_keeps_buffer() {
        let t = Tensor::new(vec![2, 3].into(), (0..6).map(|x| x as f32).collect()).unwrap();
        let r = t.clone().reshape(vec![3, 2].into()).unwrap();
        assert_eq!(r.dims(), &vec![3, 2].into());
        assert_eq!(r.data(), t.data());
        assert!(t.reshape(vec![4, 2].into()).is_err());
    }

    #[test]
    fn reorder_filter() {
        // [OC=1, IC=2, KH=1, KW=2]
        let mut w = Tensor::new(vec![1, 2, 1, 2].into(), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        w.reorder_oihw_to_ohwi().unwrap();
        assert_eq!(w.dims(), &vec![1, 1, 2, 2].into());
        assert_eq!(w.data(), &[1.0, 3.0, 2.0, 4.0]);
        assert_eq!(w.strides(), &[4, 4, 2, 1]);
    }

    #[test]
    fn rand_is_seedable() {
        Tensor::seed_rng_from_u64(42);
        let x = Tensor::rand(vec![3, 6, 2].into());
        Tensor::seed_rng_from_u64(42);
        let y = Tensor::rand(vec![3, 6, 2].into());
        let z = Tensor::rand(vec![3, 6, 2].into());
        assert_eq!(x, y);
        assert_ne!(y, z);
    }
}
