//! Strided `f64` matrix products used by the recurrent kernels.


/// A read-only strided matrix view.

#[derive(Debug, Clone, Copy)]
pub(crate) struct Mat<'a> {
  pub data: &'a [f64],
  pub rows: usize,
  pub cols: usize,
  pub row_stride: isize,
  pub col_stride: isize,
}

impl<'a> Mat<'a> {
  /// Row-major `rows x cols` matrix.
  pub fn new(data: &'a [f64], rows: usize, cols: usize) -> Self {
    debug_assert!(data.len() >= rows * cols);
    Self { data, rows, cols, row_stride: cols as isize, col_stride: 1 }
  }

  pub fn t(self) -> Self {
    Self {
      rows: self.cols,
      cols: self.rows,
      row_stride: self.col_stride,
      col_stride: self.row_stride,
      ..self
    }
  }
}


/// `out = lhs · rhs + beta * out`, with `out` row-major.

pub(crate) fn gemm(lhs: Mat, rhs: Mat, beta: f64, out: &mut [f64]) {
  assert_eq!(lhs.cols, rhs.rows, "Inner dimensions of matrix product differ");
  assert!(out.len() >= lhs.rows * rhs.cols);
  if lhs.rows == 0 || rhs.cols == 0 { return }
  kernel(lhs, rhs, beta, out);
}

#[cfg(feature = "unsafe")]
fn kernel(lhs: Mat, rhs: Mat, beta: f64, out: &mut [f64]) {
  // Views are dense row- or column-major over their slices,
  // so every address dgemm computes stays in bounds.
  unsafe {
    matrixmultiply::dgemm(
      lhs.rows,
      lhs.cols,
      rhs.cols,
      1.0,
      lhs.data.as_ptr(),
      lhs.row_stride,
      lhs.col_stride,
      rhs.data.as_ptr(),
      rhs.row_stride,
      rhs.col_stride,
      beta,
      out.as_mut_ptr(),
      rhs.cols as isize,
      1,
    );
  }
}

#[cfg(not(feature = "unsafe"))]
fn kernel(lhs: Mat, rhs: Mat, beta: f64, out: &mut [f64]) {
  let at = |m: &Mat, i: usize, j: usize| {
    m.data[(i as isize * m.row_stride + j as isize * m.col_stride) as usize]
  };
  for i in 0..lhs.rows {
    for j in 0..rhs.cols {
      let mut sum = 0.0;
      for k in 0..lhs.cols {
        sum += at(&lhs, i, k) * at(&rhs, k, j);
      }
      let o = &mut out[i * rhs.cols + j];
      *o = if beta == 0.0 { sum } else { beta * *o + sum };
    }
  }
}
