use pinion_core::{
    error::ShapeError,
    layout::{Layout, Nchw},
    node::Node,
    tensor::Tensor,
};

use crate::attrs;

/// Mean over both spatial axes for every (batch, channel) pair.
///
/// The output keeps rank 4 with 1x1 spatial extent in the same layout as the input.
pub fn compute_gavg_pool(input: &Tensor, layout: Layout) -> Result<Tensor, ShapeError> {
    let shape = layout.split("GlobalAveragePool", input.dims())?;
    let Nchw {
        n: batches,
        c: channels,
        h: height,
        w: width,
    } = shape;
    let area = (height * width) as f32;
    let (stride_c, stride_y, stride_x) = spatial_strides(shape, layout);
    let input = input.data();

    let mut output = Tensor::zeros(layout.dims(Nchw { h: 1, w: 1, ..shape }));
    let out = output.data_mut();

    for n in 0..batches {
        let image = &input[n * channels * height * width..];
        for c in 0..channels {
            let mut sum = 0f32;
            for y in 0..height {
                for x in 0..width {
                    sum += image[c * stride_c + y * stride_y + x * stride_x];
                }
            }
            out[n * channels + c] = sum / area;
        }
    }

    Ok(output)
}

/// Element strides of (channel, row, column) within one image.
fn spatial_strides(shape: Nchw, layout: Layout) -> (usize, usize, usize) {
    match layout {
        Layout::ChannelsFirst => (shape.h * shape.w, shape.w, 1),
        Layout::ChannelsLast => (1, shape.w * shape.c, shape.c),
    }
}

/// MaxPool attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaxPool {
    pub kernel_shape: [usize; 2],
    pub strides: [usize; 2],
    /// `[top, left, bottom, right]`
    pub padding: [usize; 4],
}

impl MaxPool {
    pub fn from_node(node: &Node) -> Result<Self, ShapeError> {
        const OP: &str = "MaxPool";

        if node.attr_ints("dilations", &[1, 1]) != [1, 1] {
            return Err(ShapeError::invalid(OP, "dilations are not supported"));
        }
        Ok(Self {
            kernel_shape: attrs::positive::<2>(
                OP,
                "kernel_shape",
                &node.attr_ints("kernel_shape", &[]),
            )?,
            strides: attrs::positive::<2>(OP, "strides", &node.attr_ints("strides", &[1, 1]))?,
            padding: attrs::pads(OP, &node.attr_ints("pads", &[0, 0, 0, 0]))?,
        })
    }
}

/// Maximum over each window. Padded taps are ignored; a window made only of padding yields 0.
pub fn compute_max_pool(
    op: &MaxPool,
    input: &Tensor,
    layout: Layout,
) -> Result<Tensor, ShapeError> {
    const OP: &str = "MaxPool";

    let shape = layout.split(OP, input.dims())?;
    let [kernel_h, kernel_w] = op.kernel_shape;
    let [stride_h, stride_w] = op.strides;
    let [pad_t, pad_l, pad_b, pad_r] = op.padding;
    let out_h = attrs::window_output_len(OP, shape.h, pad_t, pad_b, kernel_h, stride_h, 1)?;
    let out_w = attrs::window_output_len(OP, shape.w, pad_l, pad_r, kernel_w, stride_w, 1)?;

    let out_shape = Nchw {
        h: out_h,
        w: out_w,
        ..shape
    };
    let (stride_c, stride_y, stride_x) = spatial_strides(shape, layout);
    let (out_stride_c, out_stride_y, out_stride_x) = spatial_strides(out_shape, layout);
    let image_len = shape.c * shape.h * shape.w;
    let out_image_len = shape.c * out_h * out_w;
    let input = input.data();

    let mut output = Tensor::zeros(layout.dims(out_shape));
    let out = output.data_mut();

    for n in 0..shape.n {
        let image = &input[n * image_len..];
        let out = &mut out[n * out_image_len..];
        for c in 0..shape.c {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let mut max = f32::NEG_INFINITY;
                    for ky in 0..kernel_h {
                        let y = (oy * stride_h + ky) as isize - pad_t as isize;
                        if y < 0 || y >= shape.h as isize {
                            continue;
                        }
                        for kx in 0..kernel_w {
                            let x = (ox * stride_w + kx) as isize - pad_l as isize;
                            if x < 0 || x >= shape.w as isize {
                                continue;
                            }
                            let v = image[c * stride_c + y as usize * stride_y + x as usize * stride_x];
                            max = max.max(v);
                        }
                    }
                    out[c * out_stride_c + oy * out_stride_y + ox * out_stride_x] =
                        if max == f32::NEG_INFINITY { 0.0 } else { max };
                }
            }
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinion_core::node::Attribute;

    #[test]
    fn gavg_pool_channels_last() {
        let x = Tensor::new(vec![1, 2, 2, 2].into(), (1..=8).map(|x| x as f32).collect()).unwrap();
        let y = compute_gavg_pool(&x, Layout::ChannelsLast).unwrap();
        assert_eq!(y.dims(), &vec![1, 1, 1, 2].into());
        assert_eq!(y.data(), &[4., 5.]);
    }

    #[test]
    fn gavg_pool_channels_first() {
        let x = Tensor::new(vec![1, 2, 2, 2].into(), (1..=8).map(|x| x as f32).collect()).unwrap();
        let y = compute_gavg_pool(&x, Layout::ChannelsFirst).unwrap();
        assert_eq!(y.dims(), &vec![1, 2, 1, 1].into());
        assert_eq!(y.data(), &[2.5, 6.5]);
    }

    #[test]
    fn max_pool_2x2() {
        let x = Tensor::new(
            vec![1, 1, 4, 4].into(),
            (0..16).map(|x| x as f32).collect(),
        )
        .unwrap();
        let op = MaxPool {
            kernel_shape: [2, 2],
            strides: [2, 2],
            padding: [0; 4],
        };
        let y = compute_max_pool(&op, &x, Layout::ChannelsFirst).unwrap();
        assert_eq!(y.dims(), &vec![1, 1, 2, 2].into());
        assert_eq!(y.data(), &[5., 7., 13., 15.]);
    }

    #[test]
    fn max_pool_ignores_padding() {
        let x = Tensor::new(vec![1, 2, 2, 1].into(), vec![-4., -3., -2., -1.]).unwrap();
        let op = MaxPool {
            kernel_shape: [3, 3],
            strides: [1, 1],
            padding: [1, 1, 1, 1],
        };
        // Every window covers the whole 2x2 image.
        let y = compute_max_pool(&op, &x, Layout::ChannelsLast).unwrap();
        assert_eq!(y.data(), &[-1., -1., -1., -1.]);

        let op = MaxPool {
            kernel_shape: [2, 2],
            strides: [1, 1],
            padding: [1, 1, 0, 0],
        };
        let y = compute_max_pool(&op, &x, Layout::ChannelsLast).unwrap();
        assert_eq!(y.dims(), &vec![1, 2, 2, 1].into());
        assert_eq!(y.data(), &[-4., -3., -2., -1.]);
    }

    #[test]
    fn parse_max_pool() {
        let node = Node::new("MaxPool")
            .with_attr("kernel_shape", Attribute::Ints(vec![3, 3]))
            .with_attr("strides", Attribute::Ints(vec![2, 2]))
            .with_attr("pads", Attribute::Ints(vec![1, 1, 1, 1]));
        let op = MaxPool::from_node(&node).unwrap();
        assert_eq!(op.kernel_shape, [3, 3]);
        assert!(MaxPool::from_node(&Node::new("MaxPool")).is_err());
        let node = node.with_attr("dilations", Attribute::Ints(vec![2, 2]));
        assert!(MaxPool::from_node(&node).is_err());
    }
}
