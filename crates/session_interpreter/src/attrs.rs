use pinion_core::error::ShapeError;

/// Converts a fixed-length integer attribute, rejecting negative entries.
pub fn usizes<const N: usize>(
    op: &'static str,
    name: &str,
    values: &[i64],
) -> Result<[usize; N], ShapeError> {
    if values.len() != N {
        return Err(ShapeError::invalid(
            op,
            format!("'{name}' must have {N} entries, got {values:?}"),
        ));
    }
    let mut out = [0; N];
    for (o, &v) in out.iter_mut().zip(values) {
        *o = usize::try_from(v).map_err(|_| {
            ShapeError::invalid(op, format!("'{name}' must be non-negative, got {values:?}"))
        })?;
    }
    Ok(out)
}

/// Like [`usizes`], but every entry must also be at least 1.
pub fn positive<const N: usize>(
    op: &'static str,
    name: &str,
    values: &[i64],
) -> Result<[usize; N], ShapeError> {
    let out = usizes::<N>(op, name, values)?;
    if out.contains(&0) {
        return Err(ShapeError::invalid(
            op,
            format!("'{name}' must be positive, got {values:?}"),
        ));
    }
    Ok(out)
}

/// Expands `pads` to `[top, left, bottom, right]`. Two entries mean symmetric padding.
pub fn pads(op: &'static str, values: &[i64]) -> Result<[usize; 4], ShapeError> {
    match values.len() {
        2 => {
            let [h, w] = usizes::<2>(op, "pads", values)?;
            Ok([h, w, h, w])
        }
        _ => usizes::<4>(op, "pads", values),
    }
}

/// Output extent of a sliding window along one axis.
pub fn window_output_len(
    op: &'static str,
    input: usize,
    pad_begin: usize,
    pad_end: usize,
    kernel: usize,
    stride: usize,
    dilation: usize,
) -> Result<usize, ShapeError> {
    let padded = input + pad_begin + pad_end;
    let span = dilation * (kernel.max(1) - 1) + 1;
    if padded < span {
        return Err(ShapeError::invalid(
            op,
            format!("window of {span} does not fit in padded extent {padded}"),
        ));
    }
    Ok((padded - span) / stride + 1)
}

#[test]
fn window_lengths() {
    assert_eq!(window_output_len("Conv", 4, 0, 0, 3, 1, 1), Ok(2));
    assert_eq!(window_output_len("Conv", 5, 1, 1, 3, 2, 1), Ok(3));
    assert_eq!(window_output_len("Conv", 7, 0, 0, 3, 1, 2), Ok(3));
    assert_eq!(window_output_len("Conv", 224, 3, 3, 7, 2, 1), Ok(112));
    assert!(window_output_len("Conv", 2, 0, 0, 3, 1, 1).is_err());
}

#[test]
fn attribute_conversion() {
    assert_eq!(pads("Conv", &[1, 2]), Ok([1, 2, 1, 2]));
    assert_eq!(pads("Conv", &[0, 1, 2, 3]), Ok([0, 1, 2, 3]));
    assert!(pads("Conv", &[0, 1, 2]).is_err());
    assert!(usizes::<2>("Conv", "strides", &[1, -1]).is_err());
    assert!(positive::<2>("Conv", "strides", &[1, 0]).is_err());
}
