//------------------------------------------------------------------------------
// Column-major float32 matrix

/// Dense 2-D array of f32 values, stored column-major: element (r, c) lives
/// at offset `c * rows + r`. Keeping columns contiguous matters for the
/// sparse first network layer, which walks whole weight columns at the
/// active feature indices.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
  pub data: Vec<f32>,
  pub rows: u32,
  pub cols: u32,
}

impl Matrix {
  /// Creates a zero-filled matrix with the given dimensions.
  pub fn new(rows: u32, cols: u32) -> Self {
    Matrix {
      data: vec![0.0; (rows * cols) as usize],
      rows,
      cols,
    }
  }

  /// Wraps an existing data buffer into a matrix.
  ///
  /// ### Arguments
  ///
  /// * `rows`: Number of rows
  /// * `cols`: Number of columns
  /// * `data`: Column-major backing data, must have exactly rows * cols elements
  ///
  pub fn from_data(rows: u32, cols: u32, data: Vec<f32>) -> Self {
    if data.len() != (rows * cols) as usize {
      panic!(
        "Wrong matrix dimensions: got {} values for a {}x{} matrix",
        data.len(),
        rows,
        cols
      );
    }
    Matrix { data, rows, cols }
  }

  /// Number of elements in the matrix.
  #[inline]
  pub fn size(&self) -> u32 {
    self.rows * self.cols
  }

  #[inline]
  fn offset(&self, row: u32, col: u32) -> usize {
    if row >= self.rows || col >= self.cols {
      panic!(
        "Bad address ({}, {}) for a {}x{} matrix",
        row, col, self.rows, self.cols
      );
    }
    (col * self.rows + row) as usize
  }

  /// Reads the value at (row, col). Panics if out of range.
  #[inline]
  pub fn get(&self, row: u32, col: u32) -> f32 {
    self.data[self.offset(row, col)]
  }

  /// Writes the value at (row, col). Panics if out of range.
  #[inline]
  pub fn set(&mut self, row: u32, col: u32, value: f32) {
    let i = self.offset(row, col);
    self.data[i] = value;
  }

  /// Adds a value onto the element at (row, col). Panics if out of range.
  #[inline]
  pub fn add_to(&mut self, row: u32, col: u32, value: f32) {
    let i = self.offset(row, col);
    self.data[i] += value;
  }

  /// Zero-fills the matrix, keeping its dimensions.
  pub fn reset(&mut self) {
    self.data.fill(0.0);
  }

  /// Copies all values from another matrix of identical dimensions.
  /// Panics if the shapes differ.
  pub fn copy_from(&mut self, other: &Matrix) {
    if self.rows != other.rows || self.cols != other.cols {
      panic!(
        "Mismatched matrix shapes: {}x{} vs {}x{}",
        self.rows, self.cols, other.rows, other.cols
      );
    }
    self.data.copy_from_slice(&other.data);
  }

  /// Borrows one column as a contiguous slice.
  #[inline]
  pub fn column(&self, col: u32) -> &[f32] {
    if col >= self.cols {
      panic!(
        "Bad column address {} for a {}x{} matrix",
        col, self.rows, self.cols
      );
    }
    let start = (col * self.rows) as usize;
    &self.data[start..start + self.rows as usize]
  }
}
