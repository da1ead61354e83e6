use pinion_core::{
    error::ShapeError,
    fixed_dim::FixedDimensions,
    layout::{Layout, Nchw},
    node::Node,
    tensor::Tensor,
};

use crate::{attrs, gemm::sgemm_strided, thread::ThreadCtx};

const OP: &str = "Conv";

/// Convolution attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conv2d {
    /// Checked against the weight when present.
    pub kernel_shape: Option<[usize; 2]>,
    pub strides: [usize; 2],
    /// `[top, left, bottom, right]`
    pub padding: [usize; 4],
    pub dilations: [usize; 2],
    pub group: usize,
}

impl Default for Conv2d {
    fn default() -> Self {
        Self {
            kernel_shape: None,
            strides: [1, 1],
            padding: [0, 0, 0, 0],
            dilations: [1, 1],
            group: 1,
        }
    }
}

/// Every extent a convolution needs, resolved from its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub input: Nchw,
    pub out_c: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub out_h: usize,
    pub out_w: usize,
    pub in_c_per_g: usize,
    pub out_c_per_g: usize,
}

impl Conv2d {
    pub fn from_node(node: &Node) -> Result<Self, ShapeError> {
        let kernel = node.attr_ints("kernel_shape", &[]);
        let group = node.attr_i64("group", 1);
        if group < 1 {
            return Err(ShapeError::invalid(OP, format!("invalid group {group}")));
        }
        Ok(Self {
            kernel_shape: if kernel.is_empty() {
                None
            } else {
                Some(attrs::positive::<2>(OP, "kernel_shape", &kernel)?)
            },
            strides: attrs::positive::<2>(OP, "strides", &node.attr_ints("strides", &[1, 1]))?,
            padding: attrs::pads(OP, &node.attr_ints("pads", &[0, 0, 0, 0]))?,
            dilations: attrs::positive::<2>(
                OP,
                "dilations",
                &node.attr_ints("dilations", &[1, 1]),
            )?,
            group: group as usize,
        })
    }

    /// Validates operand shapes. `weight` is OIHW for channel-first and OHWI for channel-last.
    pub fn geometry(
        &self,
        input: &Tensor,
        weight: &Tensor,
        bias: Option<&Tensor>,
        layout: Layout,
    ) -> Result<ConvGeometry, ShapeError> {
        let x = layout.split(OP, input.dims())?;
        if weight.rank() != 4 {
            return Err(ShapeError::rank(OP, 4, weight.dims()));
        }
        let (out_c, w_in_c, kernel_h, kernel_w) = match layout {
            Layout::ChannelsFirst => {
                let [o, i, h, w] = weight.fixed_dims::<4>();
                (o, i, h, w)
            }
            Layout::ChannelsLast => {
                let [o, h, w, i] = weight.fixed_dims::<4>();
                (o, i, h, w)
            }
        };

        let group = self.group;
        if x.c % group != 0 || out_c % group != 0 {
            return Err(ShapeError::invalid(
                OP,
                format!("group {group} does not divide {} input / {out_c} output channels", x.c),
            ));
        }
        let in_c_per_g = x.c / group;
        if w_in_c != in_c_per_g {
            return Err(ShapeError::mismatch(OP, input.dims(), weight.dims()));
        }
        if let Some([kh, kw]) = self.kernel_shape {
            if (kh, kw) != (kernel_h, kernel_w) {
                return Err(ShapeError::invalid(
                    OP,
                    format!("kernel_shape {:?} disagrees with weight {:?}", [kh, kw], weight.dims()),
                ));
            }
        }
        if let Some(bias) = bias {
            if bias.dims().as_slice() != [out_c] {
                return Err(ShapeError::mismatch(OP, bias.dims(), &vec![out_c].into()));
            }
        }

        let [pad_t, pad_l, pad_b, pad_r] = self.padding;
        let out_h = attrs::window_output_len(
            OP,
            x.h,
            pad_t,
            pad_b,
            kernel_h,
            self.strides[0],
            self.dilations[0],
        )?;
        let out_w = attrs::window_output_len(
            OP,
            x.w,
            pad_l,
            pad_r,
            kernel_w,
            self.strides[1],
            self.dilations[1],
        )?;

        Ok(ConvGeometry {
            input: x,
            out_c,
            kernel_h,
            kernel_w,
            out_h,
            out_w,
            in_c_per_g,
            out_c_per_g: out_c / group,
        })
    }

    pub fn is_pointwise(&self, geo: &ConvGeometry) -> bool {
        geo.kernel_h == 1 && geo.kernel_w == 1 && self.group == 1 && self.padding == [0; 4]
    }

    pub fn is_depthwise(&self, geo: &ConvGeometry) -> bool {
        self.group > 1 && self.group == geo.input.c && geo.in_c_per_g == 1
    }
}

impl ConvGeometry {
    fn output_dims(&self, layout: Layout) -> FixedDimensions {
        layout.dims(Nchw {
            n: self.input.n,
            c: self.out_c,
            h: self.out_h,
            w: self.out_w,
        })
    }
}

/// Runs a node's convolution, picking the cheapest variant that applies.
pub fn compute(
    tctx: &ThreadCtx,
    op: &Conv2d,
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
    layout: Layout,
) -> Result<Tensor, ShapeError> {
    if layout == Layout::ChannelsLast {
        return compute_nhwc(tctx, op, input, weight, bias);
    }

    let geo = op.geometry(input, weight, bias, layout)?;
    if op.is_pointwise(&geo) {
        compute_pointwise(tctx, op, input, weight, bias)
    } else if op.is_depthwise(&geo) {
        compute_depthwise(tctx, op, input, weight, bias)
    } else {
        compute_general(tctx, op, input, weight, bias)
    }
}

/// Direct grouped convolution over NCHW input and OIHW weight.
///
/// Each output element sums over input channels, then kernel rows, then kernel columns, and adds
/// the bias last. Padded taps are skipped. The specialized variants keep this exact order.
pub fn compute_general(
    tctx: &ThreadCtx,
    op: &Conv2d,
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
) -> Result<Tensor, ShapeError> {
    let geo = op.geometry(input, weight, bias, Layout::ChannelsFirst)?;
    let mut output = Tensor::zeros(geo.output_dims(Layout::ChannelsFirst));

    let Nchw {
        c: in_c,
        h: in_h,
        w: in_w,
        ..
    } = geo.input;
    let (kernel_h, kernel_w) = (geo.kernel_h, geo.kernel_w);
    let (out_h, out_w) = (geo.out_h, geo.out_w);
    let [stride_h, stride_w] = op.strides;
    let [dilation_h, dilation_w] = op.dilations;
    let pad_t = op.padding[0] as isize;
    let pad_l = op.padding[1] as isize;
    let x = input.data();
    let w = weight.data();
    let b = bias.map(Tensor::data);

    for_each_plane(tctx, output.data_mut(), out_h * out_w, |plane, out| {
        let n = plane / geo.out_c;
        let oc = plane % geo.out_c;
        let g = oc / geo.out_c_per_g;
        for oh in 0..out_h {
            for ow in 0..out_w {
                let mut sum = 0f32;
                for ic in 0..geo.in_c_per_g {
                    let x = &x[(n * in_c + g * geo.in_c_per_g + ic) * in_h * in_w..];
                    let w = &w[(oc * geo.in_c_per_g + ic) * kernel_h * kernel_w..];
                    for kh in 0..kernel_h {
                        let ih = (oh * stride_h + kh * dilation_h) as isize - pad_t;
                        if ih < 0 || ih >= in_h as isize {
                            continue;
                        }
                        for kw in 0..kernel_w {
                            let iw = (ow * stride_w + kw * dilation_w) as isize - pad_l;
                            if iw < 0 || iw >= in_w as isize {
                                continue;
                            }
                            sum += x[ih as usize * in_w + iw as usize] * w[kh * kernel_w + kw];
                        }
                    }
                }
                out[oh * out_w + ow] = sum + b.map_or(0.0, |b| b[oc]);
            }
        }
    });

    Ok(output)
}

/// 1x1 convolution without groups or padding.
pub fn compute_pointwise(
    tctx: &ThreadCtx,
    op: &Conv2d,
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
) -> Result<Tensor, ShapeError> {
    let geo = op.geometry(input, weight, bias, Layout::ChannelsFirst)?;
    if !op.is_pointwise(&geo) {
        return Err(ShapeError::invalid(
            OP,
            "pointwise convolution needs a 1x1 kernel, one group and no padding",
        ));
    }
    let mut output = Tensor::zeros(geo.output_dims(Layout::ChannelsFirst));

    let Nchw {
        c: in_c,
        h: in_h,
        w: in_w,
        ..
    } = geo.input;
    let in_hw = in_h * in_w;
    let (out_h, out_w) = (geo.out_h, geo.out_w);
    let [stride_h, stride_w] = op.strides;
    let x = input.data();
    let w = weight.data();
    let b = bias.map(Tensor::data);

    for_each_plane(tctx, output.data_mut(), out_h * out_w, |plane, out| {
        let n = plane / geo.out_c;
        let oc = plane % geo.out_c;
        let x = &x[n * in_c * in_hw..];
        let w = &w[oc * in_c..];
        for oh in 0..out_h {
            for ow in 0..out_w {
                let offset = oh * stride_h * in_w + ow * stride_w;
                let mut sum = 0f32;
                for ic in 0..in_c {
                    sum += x[ic * in_hw + offset] * w[ic];
                }
                out[oh * out_w + ow] = sum + b.map_or(0.0, |b| b[oc]);
            }
        }
    });

    Ok(output)
}

/// Convolution with one input channel per group.
pub fn compute_depthwise(
    tctx: &ThreadCtx,
    op: &Conv2d,
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
) -> Result<Tensor, ShapeError> {
    let geo = op.geometry(input, weight, bias, Layout::ChannelsFirst)?;
    if !op.is_depthwise(&geo) {
        return Err(ShapeError::invalid(
            OP,
            "depthwise convolution needs group == input channels",
        ));
    }
    let mut output = Tensor::zeros(geo.output_dims(Layout::ChannelsFirst));

    let Nchw {
        c: in_c,
        h: in_h,
        w: in_w,
        ..
    } = geo.input;
    let (kernel_h, kernel_w) = (geo.kernel_h, geo.kernel_w);
    let (out_h, out_w) = (geo.out_h, geo.out_w);
    let [stride_h, stride_w] = op.strides;
    let [dilation_h, dilation_w] = op.dilations;
    let pad_t = op.padding[0] as isize;
    let pad_l = op.padding[1] as isize;
    let x = input.data();
    let w = weight.data();
    let b = bias.map(Tensor::data);

    for_each_plane(tctx, output.data_mut(), out_h * out_w, |plane, out| {
        let n = plane / geo.out_c;
        let oc = plane % geo.out_c;
        let c = oc / geo.out_c_per_g;
        let x = &x[(n * in_c + c) * in_h * in_w..];
        let w = &w[oc * kernel_h * kernel_w..];
        for oh in 0..out_h {
            for ow in 0..out_w {
                let mut sum = 0f32;
                for kh in 0..kernel_h {
                    let ih = (oh * stride_h + kh * dilation_h) as isize - pad_t;
                    if ih < 0 || ih >= in_h as isize {
                        continue;
                    }
                    let row = &x[ih as usize * in_w..];
                    for kw in 0..kernel_w {
                        let iw = (ow * stride_w + kw * dilation_w) as isize - pad_l;
                        if iw < 0 || iw >= in_w as isize {
                            continue;
                        }
                        sum += row[iw as usize] * w[kh * kernel_w + kw];
                    }
                }
                out[oh * out_w + ow] = sum + b.map_or(0.0, |b| b[oc]);
            }
        }
    });

    Ok(output)
}

/// Convolution over NHWC input and OHWI weight, as im2col followed by SGEMM.
///
/// Output rows are split across the worker pool. Each task gathers its own patch of the column
/// matrix, one group at a time.
pub fn compute_nhwc(
    tctx: &ThreadCtx,
    op: &Conv2d,
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
) -> Result<Tensor, ShapeError> {
    let geo = op.geometry(input, weight, bias, Layout::ChannelsLast)?;
    let mut output = Tensor::zeros(geo.output_dims(Layout::ChannelsLast));

    let Nchw {
        c: in_c,
        h: in_h,
        w: in_w,
        ..
    } = geo.input;
    let (kernel_h, kernel_w) = (geo.kernel_h, geo.kernel_w);
    let (out_h, out_w, out_c) = (geo.out_h, geo.out_w, geo.out_c);
    let (icg, ocg) = (geo.in_c_per_g, geo.out_c_per_g);
    let [stride_h, stride_w] = op.strides;
    let [dilation_h, dilation_w] = op.dilations;
    let pad_t = op.padding[0] as isize;
    let pad_l = op.padding[1] as isize;
    let group = op.group;
    let k = kernel_h * kernel_w * icg;
    let rows = out_h * out_w;
    let x = input.data();
    let w = weight.data();
    let b = bias.map(Tensor::data);

    if rows == 0 || out_c == 0 {
        return Ok(output);
    }

    let rows_per_task = tctx.chunk_len(rows);
    let image_len = rows * out_c;
    for (n, out) in output.data_mut().chunks_mut(image_len).enumerate() {
        let x = &x[n * in_h * in_w * in_c..];
        tctx.scope(|scope| {
            for (t, out) in out.chunks_mut(rows_per_task * out_c).enumerate() {
                scope.spawn(move || {
                    let first_row = t * rows_per_task;
                    let num_rows = out.len() / out_c;

                    if let Some(b) = b {
                        for row in out.chunks_mut(out_c) {
                            row.copy_from_slice(b);
                        }
                    }
                    let beta = if b.is_some() { 1.0 } else { 0.0 };

                    let mut col = vec![0f32; num_rows * k];
                    for g in 0..group {
                        for (r, col) in col.chunks_mut(k).enumerate() {
                            let oh = (first_row + r) / out_w;
                            let ow = (first_row + r) % out_w;
                            for kh in 0..kernel_h {
                                let ih = (oh * stride_h + kh * dilation_h) as isize - pad_t;
                                for kw in 0..kernel_w {
                                    let iw = (ow * stride_w + kw * dilation_w) as isize - pad_l;
                                    let dst = &mut col[(kh * kernel_w + kw) * icg..][..icg];
                                    if ih < 0 || ih >= in_h as isize || iw < 0 || iw >= in_w as isize
                                    {
                                        dst.fill(0.0);
                                    } else {
                                        let src = (ih as usize * in_w + iw as usize) * in_c + g * icg;
                                        dst.copy_from_slice(&x[src..src + icg]);
                                    }
                                }
                            }
                        }
                        sgemm_strided(
                            num_rows,
                            k,
                            ocg,
                            1.0,
                            &col,
                            [k, 1],
                            &w[g * ocg * k..],
                            [1, k],
                            beta,
                            &mut out[g * ocg..],
                            [out_c, 1],
                        );
                    }
                });
            }
        });
    }

    Ok(output)
}

/// Fills `output` plane by plane on the worker pool. `f` receives the plane index.
fn for_each_plane<F>(tctx: &ThreadCtx, output: &mut [f32], plane_len: usize, f: F)
where
    F: Fn(usize, &mut [f32]) + Sync,
{
    if plane_len == 0 || output.is_empty() {
        return;
    }
    let planes_per_task = tctx.chunk_len(output.len() / plane_len);
    let f = &f;
    tctx.scope(|scope| {
        for (t, chunk) in output.chunks_mut(planes_per_task * plane_len).enumerate() {
            scope.spawn(move || {
                for (i, plane) in chunk.chunks_mut(plane_len).enumerate() {
                    f(t * planes_per_task + i, plane)
                }
            });
        }
    });
}
