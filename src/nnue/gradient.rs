use crate::matrix::Matrix;

//------------------------------------------------------------------------------
// Constants

/// Exponential decay rate for the first Adam moment.
pub const BETA_1: f32 = 0.9;
/// Exponential decay rate for the second Adam moment.
pub const BETA_2: f32 = 0.999;

//------------------------------------------------------------------------------
// Per-parameter gradient cell

/// Gradient accumulator for a single network parameter.
///
/// `value` collects the raw gradient over a mini-batch and is cleared by
/// [Gradient::apply]; the Adam moments `m1` / `m2` persist across batches.
///
/// The update rule is *bias-uncorrected*: the usual `1/(1-beta^t)` warm-up
/// correction is never applied. Networks trained with earlier trainer
/// versions depend on this exact trajectory.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Gradient {
  pub value: f32,
  pub m1: f32,
  pub m2: f32,
}

impl Gradient {
  /// Accumulates a gradient contribution for this parameter.
  #[inline]
  pub fn update(&mut self, delta: f32) {
    self.value += delta;
  }

  /// Advances the Adam moments and returns the parameter step.
  ///
  /// A cell that saw no gradient this batch (`value == 0`) returns 0 and
  /// leaves the moments untouched.
  ///
  /// ### Arguments
  ///
  /// * `learning_rate`: global learning rate
  ///
  /// ### Return value
  ///
  /// Amount to subtract from the shadowed parameter.
  pub fn calculate(&mut self, learning_rate: f32) -> f32 {
    if self.value == 0.0 {
      // nothing to calculate
      return 0.0;
    }

    self.m1 = self.m1 * BETA_1 + self.value * (1.0 - BETA_1);
    self.m2 = self.m2 * BETA_2 + (self.value * self.value) * (1.0 - BETA_2);

    learning_rate * self.m1 / (self.m2.sqrt() + 1e-8)
  }

  /// Clears the accumulated value, keeping the moments.
  #[inline]
  pub fn reset(&mut self) {
    self.value = 0.0;
  }

  /// Applies this cell to the parameter it shadows and resets the value.
  pub fn apply(&mut self, elem: &mut f32, learning_rate: f32) {
    *elem -= self.calculate(learning_rate);
    self.reset();
  }
}

//------------------------------------------------------------------------------
// Gradient grid

/// Matrix of [Gradient] cells shadowing a parameter matrix of the same
/// shape, with the same column-major layout.
#[derive(Clone, Debug)]
pub struct Gradients {
  pub data: Vec<Gradient>,
  pub rows: u32,
  pub cols: u32,
}

impl Gradients {
  /// Creates a zeroed gradient grid with the given dimensions.
  pub fn new(rows: u32, cols: u32) -> Self {
    Gradients {
      data: vec![Gradient::default(); (rows * cols) as usize],
      rows,
      cols,
    }
  }

  /// Number of cells in the grid.
  #[inline]
  pub fn size(&self) -> u32 {
    self.rows * self.cols
  }

  #[inline]
  fn offset(&self, row: u32, col: u32) -> usize {
    if row >= self.rows || col >= self.cols {
      panic!(
        "Bad address ({}, {}) for a {}x{} gradient grid",
        row, col, self.rows, self.cols
      );
    }
    (col * self.rows + row) as usize
  }

  /// Reads the cell at (row, col). Panics if out of range.
  #[inline]
  pub fn get(&self, row: u32, col: u32) -> Gradient {
    self.data[self.offset(row, col)]
  }

  /// Accumulates a gradient contribution onto the cell at (row, col).
  /// Panics if out of range.
  #[inline]
  pub fn add(&mut self, row: u32, col: u32, delta: f32) {
    let i = self.offset(row, col);
    self.data[i].update(delta);
  }

  /// Applies every cell onto the parameter matrix it shadows, clearing all
  /// accumulated values. Panics if the shapes differ.
  pub fn apply(&mut self, params: &mut Matrix, learning_rate: f32) {
    if self.rows != params.rows || self.cols != params.cols {
      panic!(
        "Mismatched gradient/parameter shapes: {}x{} vs {}x{}",
        self.rows, self.cols, params.rows, params.cols
      );
    }
    for (cell, elem) in self.data.iter_mut().zip(params.data.iter_mut()) {
      cell.apply(elem, learning_rate);
    }
  }

  /// Sums a worker replica's accumulated values into this grid and clears
  /// the replica's values. Moments are not touched, the master owns them.
  pub fn reduce_from(&mut self, other: &mut Gradients) {
    debug_assert_eq!(self.data.len(), other.data.len());
    for (cell, peer) in self.data.iter_mut().zip(other.data.iter_mut()) {
      cell.value += peer.value;
      peer.value = 0.0;
    }
  }

  /// Copies the master's Adam moments into this replica grid, so every
  /// worker observes consistent optimizer state on the next batch.
  pub fn sync_moments_from(&mut self, master: &Gradients) {
    debug_assert_eq!(self.data.len(), master.data.len());
    for (cell, m) in self.data.iter_mut().zip(master.data.iter()) {
      cell.m1 = m.m1;
      cell.m2 = m.m2;
    }
  }
}

//------------------------------------------------------------------------------
// Tests
#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_zero_value_short_circuit() {
    let mut g = Gradient {
      value: 0.0,
      m1: 0.25,
      m2: 0.5,
    };

    assert_eq!(0.0, g.calculate(0.01));
    // Moments must not move when there was nothing to apply
    assert_eq!(0.25, g.m1);
    assert_eq!(0.5, g.m2);
  }

  #[test]
  fn test_calculate_moments() {
    let mut g = Gradient::default();
    g.update(2.0);

    let step = g.calculate(0.01);

    assert_eq!(2.0 * (1.0 - BETA_1), g.m1);
    assert_eq!(4.0 * (1.0 - BETA_2), g.m2);
    let expected = 0.01 * g.m1 / (g.m2.sqrt() + 1e-8);
    assert_eq!(expected, step);
  }

  #[test]
  fn test_apply_resets_value_only() {
    let mut g = Gradient::default();
    g.update(1.0);
    g.update(0.5);
    assert_eq!(1.5, g.value);

    let mut param = 3.0;
    g.apply(&mut param, 0.01);

    assert!(param < 3.0);
    assert_eq!(0.0, g.value);
    assert_ne!(0.0, g.m1);
    assert_ne!(0.0, g.m2);
  }

  #[test]
  fn test_grid_accumulate_and_apply() {
    let mut grid = Gradients::new(2, 2);
    let mut params = Matrix::from_data(2, 2, vec![1.0; 4]);

    grid.add(0, 0, 1.0);
    grid.add(1, 1, -1.0);
    grid.apply(&mut params, 0.01);

    assert!(params.get(0, 0) < 1.0);
    assert!(params.get(1, 1) > 1.0);
    // Untouched parameters stay where they were
    assert_eq!(1.0, params.get(0, 1));
    assert_eq!(1.0, params.get(1, 0));
    // Every value is cleared after apply
    for cell in &grid.data {
      assert_eq!(0.0, cell.value);
    }
  }

  #[test]
  fn test_reduce_and_moment_sync() {
    let mut master = Gradients::new(2, 1);
    let mut worker = Gradients::new(2, 1);

    master.add(0, 0, 1.0);
    worker.add(0, 0, 2.0);
    worker.add(1, 0, 3.0);

    master.reduce_from(&mut worker);
    assert_eq!(3.0, master.get(0, 0).value);
    assert_eq!(3.0, master.get(1, 0).value);
    assert_eq!(0.0, worker.get(0, 0).value);
    assert_eq!(0.0, worker.get(1, 0).value);

    let mut params = Matrix::new(2, 1);
    master.apply(&mut params, 0.01);
    worker.sync_moments_from(&master);
    assert_eq!(master.get(0, 0).m1, worker.get(0, 0).m1);
    assert_eq!(master.get(1, 0).m2, worker.get(1, 0).m2);
  }

  #[test]
  #[should_panic(expected = "Bad address")]
  fn test_out_of_range_add() {
    let mut grid = Gradients::new(2, 2);
    grid.add(2, 0, 1.0);
  }
}
