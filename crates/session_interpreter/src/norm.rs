use pinion_core::{
    error::ShapeError,
    layout::{Layout, Nchw},
    tensor::Tensor,
};

pub const DEFAULT_EPSILON: f32 = 1e-5;

/// Per-channel inference-time normalization: `scale * (x - mean) / sqrt(var + epsilon) + bias`.
pub fn compute_batch_normalization(
    input: &Tensor,
    scale: &Tensor,
    bias: &Tensor,
    mean: &Tensor,
    var: &Tensor,
    epsilon: f32,
    layout: Layout,
) -> Result<Tensor, ShapeError> {
    const OP: &str = "BatchNormalization";

    let Nchw { n, c, h, w } = layout.split(OP, input.dims())?;
    for param in [scale, bias, mean, var] {
        if param.dims().as_slice() != [c] {
            return Err(ShapeError::mismatch(OP, input.dims(), param.dims()));
        }
    }

    let (scale, bias, mean, var) = (scale.data(), bias.data(), mean.data(), var.data());
    let denom = var
        .iter()
        .map(|v| 1.0 / (v + epsilon).sqrt())
        .collect::<Vec<_>>();
    let norm = |ch: usize, x: f32| scale[ch] * (x - mean[ch]) * denom[ch] + bias[ch];

    let mut output = input.clone();
    let out = output.data_mut();
    if out.is_empty() {
        return Ok(output);
    }
    match layout {
        Layout::ChannelsFirst => {
            for (i, plane) in out.chunks_mut(h * w).enumerate().take(n * c) {
                let ch = i % c;
                plane.iter_mut().for_each(|x| *x = norm(ch, *x));
            }
        }
        Layout::ChannelsLast => {
            for pixel in out.chunks_mut(c) {
                for (ch, x) in pixel.iter_mut().enumerate() {
                    *x = norm(ch, *x);
                }
            }
        }
    }

    Ok(output)
}
