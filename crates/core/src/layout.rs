use crate::{error::ShapeError, fixed_dim::FixedDimensions};

/// Axis order of a rank-4 activation tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Layout {
    /// `[N, C, H, W]`
    #[default]
    ChannelsFirst,
    /// `[N, H, W, C]`
    ChannelsLast,
}

/// Batch, channel and spatial extents of a rank-4 activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nchw {
    pub n: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
}

impl Layout {
    /// Permutation that takes a channel-first tensor to this layout.
    pub const TO_CHANNELS_LAST: [usize; 4] = [0, 2, 3, 1];
    /// Permutation that takes a channel-last tensor back to channel-first.
    pub const TO_CHANNELS_FIRST: [usize; 4] = [0, 3, 1, 2];

    pub fn split(&self, op: &'static str, dims: &FixedDimensions) -> Result<Nchw, ShapeError> {
        if dims.len() != 4 {
            return Err(ShapeError::rank(op, 4, dims));
        }
        Ok(match self {
            Layout::ChannelsFirst => Nchw {
                n: dims[0],
                c: dims[1],
                h: dims[2],
                w: dims[3],
            },
            Layout::ChannelsLast => Nchw {
                n: dims[0],
                h: dims[1],
                w: dims[2],
                c: dims[3],
            },
        })
    }

    pub fn dims(&self, shape: Nchw) -> FixedDimensions {
        let Nchw { n, c, h, w } = shape;
        match self {
            Layout::ChannelsFirst => vec![n, c, h, w].into(),
            Layout::ChannelsLast => vec![n, h, w, c].into(),
        }
    }
}

#[test]
fn split_and_rebuild() {
    let dims: FixedDimensions = vec![1, 2, 3, 4].into();
    let cf = Layout::ChannelsFirst.split("Test", &dims).unwrap();
    assert_eq!((cf.c, cf.h, cf.w), (2, 3, 4));
    let cl = Layout::ChannelsLast.split("Test", &dims).unwrap();
    assert_eq!((cl.h, cl.w, cl.c), (2, 3, 4));
    assert_eq!(Layout::ChannelsLast.dims(cf), vec![1, 3, 4, 2].into());
    assert!(Layout::ChannelsFirst
        .split("Test", &vec![1, 2].into())
        .is_err());
}
