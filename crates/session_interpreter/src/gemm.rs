/// Row-major `C = alpha * A * B + beta * C` with leading dimensions.
pub fn sgemm(
    m: usize,
    k: usize,
    n: usize,
    alpha: f32,
    a: &[f32],
    lda: usize,
    b: &[f32],
    ldb: usize,
    beta: f32,
    c: &mut [f32],
    ldc: usize,
) {
    sgemm_strided(
        m,
        k,
        n,
        alpha,
        a,
        [lda, 1],
        b,
        [ldb, 1],
        beta,
        c,
        [ldc, 1],
    )
}

/// `C = alpha * A * B + beta * C` where each operand is addressed by `[row_stride, col_stride]`.
///
/// Transposed operands are expressed by swapping their strides. `beta == 0` means `C` is not
/// read.
pub fn sgemm_strided(
    m: usize,
    k: usize,
    n: usize,
    alpha: f32,
    a: &[f32],
    a_strides: [usize; 2],
    b: &[f32],
    b_strides: [usize; 2],
    beta: f32,
    c: &mut [f32],
    c_strides: [usize; 2],
) {
    if m == 0 || n == 0 {
        return;
    }
    debug_assert!(k == 0 || a.len() > (m - 1) * a_strides[0] + (k - 1) * a_strides[1]);
    debug_assert!(k == 0 || b.len() > (k - 1) * b_strides[0] + (n - 1) * b_strides[1]);
    assert!(c.len() > (m - 1) * c_strides[0] + (n - 1) * c_strides[1]);

    unsafe {
        matrixmultiply::sgemm(
            m,
            k,
            n,
            alpha,
            a.as_ptr(),
            a_strides[0] as isize,
            a_strides[1] as isize,
            b.as_ptr(),
            b_strides[0] as isize,
            b_strides[1] as isize,
            beta,
            c.as_mut_ptr(),
            c_strides[0] as isize,
            c_strides[1] as isize,
        );
    }
}

#[test]
fn sgemm_transposed_b() {
    // A: 2x3, B^T stored as 2x3 (so B is 3x2).
    let a = [1., 2., 3., 4., 5., 6.];
    let bt = [1., 0., 1., 0., 1., 0.];
    let mut c = [0f32; 4];
    sgemm_strided(2, 3, 2, 1.0, &a, [3, 1], &bt, [1, 3], 0.0, &mut c, [2, 1]);
    assert_eq!(c, [4., 2., 10., 5.]);

    let mut c = [1f32; 4];
    sgemm(2, 3, 2, 2.0, &a, 3, &[1., 0., 0., 1., 1., 1.], 2, 1.0, &mut c, 2);
    assert_eq!(c, [9., 11., 21., 23.]);
}
