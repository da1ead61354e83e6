use std::{
    fmt,
    ops::{Deref, Index},
    slice::SliceIndex,
};

pub type FixedDimension = usize;

/// A fully known tensor shape.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct FixedDimensions(pub Vec<FixedDimension>);

impl fmt::Debug for FixedDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl FixedDimensions {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_elems(&self) -> usize {
        self.0.iter().product()
    }

    pub fn as_slice(&self) -> &[FixedDimension] {
        self.0.as_slice()
    }

    /// Row-major strides, in elements.
    pub fn strides(&self) -> Self {
        let mut strides = vec![1; self.len()];
        for i in (0..self.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.0[i + 1];
        }
        strides.into()
    }

    pub fn to_fixed_dims<const N: usize>(&self) -> [FixedDimension; N] {
        let mut dims: [FixedDimension; N] = [0; N];
        dims.copy_from_slice(&self.0);
        dims
    }

    /// Returns `None` unless `perm` is a permutation of `0..self.len()`.
    pub fn permuted(&self, perm: &[usize]) -> Option<Self> {
        if perm.len() != self.len() {
            return None;
        }
        let mut seen = vec![false; perm.len()];
        for &p in perm {
            if p >= perm.len() || std::mem::replace(&mut seen[p], true) {
                return None;
            }
        }
        Some(perm.iter().map(|&p| self.0[p]).collect::<Vec<_>>().into())
    }
}

impl AsRef<FixedDimensions> for FixedDimensions {
    fn as_ref(&self) -> &FixedDimensions {
        self
    }
}

impl<I> Index<I> for FixedDimensions
where
    I: SliceIndex<[FixedDimension]>,
{
    type Output = <I as SliceIndex<[FixedDimension]>>::Output;

    fn index(&self, index: I) -> &Self::Output {
        &self.0[index]
    }
}

impl From<Vec<FixedDimension>> for FixedDimensions {
    fn from(v: Vec<FixedDimension>) -> FixedDimensions {
        FixedDimensions(v)
    }
}

impl From<&[FixedDimension]> for FixedDimensions {
    fn from(v: &[FixedDimension]) -> FixedDimensions {
        FixedDimensions(v.to_vec())
    }
}

impl Deref for FixedDimensions {
    type Target = Vec<usize>;
    fn deref(&self) -> &Vec<usize> {
        &self.0
    }
}

#[test]
fn total_elems() {
    assert_eq!(FixedDimensions(vec![1, 1, 28, 28]).total_elems(), 784)
}

#[test]
fn total_elems_of_scalar() {
    assert_eq!(FixedDimensions(vec![]).total_elems(), 1)
}

#[test]
fn strides() {
    let dims = FixedDimensions::from(vec![2, 3, 4, 5]);
    assert_eq!(dims.strides(), vec![60, 20, 5, 1].into());
    assert_eq!(FixedDimensions(vec![]).strides(), vec![].into());
}

#[test]
fn permuted() {
    let dims = FixedDimensions::from(vec![1, 2, 2, 3]);
    assert_eq!(dims.permuted(&[0, 3, 1, 2]), Some(vec![1, 3, 2, 2].into()));
    assert_eq!(dims.permuted(&[0, 3, 1]), None);
    assert_eq!(dims.permuted(&[0, 3, 1, 1]), None);
    assert_eq!(dims.permuted(&[0, 3, 1, 4]), None);
}
