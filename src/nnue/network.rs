use crate::functions::*;
use crate::gradient::Gradients;
use crate::matrix::Matrix;

use anyhow::{bail, Context, Result};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

// -----------------------------------------------------------------------------
// Constants

/// File signature of a network file: ASCII 'B', 'Z', then version major 2,
/// minor 0. Everything after it is little-endian.
pub const NETWORK_FILE_MAGIC: [u8; 4] = [0x42, 0x5A, 0x02, 0x00];

// -----------------------------------------------------------------------------
// Topology

/// Shape of a network: input width, output width and the hidden layer sizes.
///
/// A network has `hidden.len() + 1` weight layers: one per hidden layer plus
/// the output layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
  pub inputs: u32,
  pub outputs: u32,
  pub hidden: Vec<u32>,
}

impl Topology {
  pub fn new(inputs: u32, outputs: u32, hidden: Vec<u32>) -> Self {
    Topology {
      inputs,
      outputs,
      hidden,
    }
  }

  /// Number of weight layers in a network with this topology.
  pub fn layer_count(&self) -> usize {
    self.hidden.len() + 1
  }

  /// (rows, cols) of each layer's weight matrix, in layer order.
  ///
  /// Layer i maps a column vector of size cols to one of size rows.
  pub fn layer_shapes(&self) -> Vec<(u32, u32)> {
    let mut shapes = Vec::with_capacity(self.layer_count());
    let mut previous = self.inputs;
    for &size in &self.hidden {
      shapes.push((size, previous));
      previous = size;
    }
    shapes.push((self.outputs, previous));
    shapes
  }
}

// -----------------------------------------------------------------------------
// Network

/// Fully-connected evaluator network plus its training scratch state.
///
/// Weights and biases are the parameters; activations and errors are the
/// per-sample forward/backward buffers; the gradient grids shadow the
/// parameters and accumulate over a mini-batch. All buffers are allocated
/// once at construction and reused for every sample.
#[derive(Clone, Debug)]
pub struct Network {
  pub id: u32,
  pub topology: Topology,
  /// Sigmoid scale captured at construction; used by the output layer.
  pub sigmoid_scale: f32,
  pub weights: Vec<Matrix>,
  pub biases: Vec<Matrix>,
  pub activations: Vec<Matrix>,
  pub errors: Vec<Matrix>,
  pub w_gradients: Vec<Gradients>,
  pub b_gradients: Vec<Gradients>,
}

impl Network {
  /// Creates a network with randomly initialized parameters.
  ///
  /// ### Arguments
  ///
  /// * `topology`:      layer sizes
  /// * `id`:            network id, stored in the file header on save
  /// * `sigmoid_scale`: scale for the output sigmoid
  ///
  pub fn new(topology: Topology, id: u32, sigmoid_scale: f32) -> Self {
    Network::with_rng(topology, id, sigmoid_scale, &mut rand::thread_rng())
  }

  /// Creates a network with parameters drawn from the provided generator.
  ///
  /// Weights and biases use He-style initialization, a normal distribution
  /// with standard deviation sqrt(2 / fan_in), which keeps ReLU layers from
  /// starting saturated or dead.
  pub fn with_rng<R: Rng + ?Sized>(
    topology: Topology,
    id: u32,
    sigmoid_scale: f32,
    rng: &mut R,
  ) -> Self {
    let mut network = Network::zeroed(topology, id, sigmoid_scale);

    for layer in 0..network.topology.layer_count() {
      let fan_in = network.weights[layer].cols;
      let normal = Normal::new(0.0, (2.0 / fan_in as f32).sqrt()).unwrap();
      for w in network.weights[layer].data.iter_mut() {
        *w = normal.sample(rng);
      }
      for b in network.biases[layer].data.iter_mut() {
        *b = normal.sample(rng);
      }
    }

    network
  }

  /// Creates a network with all parameters at zero. Used as the starting
  /// point for random initialization and for loading from a file.
  fn zeroed(topology: Topology, id: u32, sigmoid_scale: f32) -> Self {
    let shapes = topology.layer_shapes();
    let mut weights = Vec::with_capacity(shapes.len());
    let mut biases = Vec::with_capacity(shapes.len());
    let mut activations = Vec::with_capacity(shapes.len());
    let mut errors = Vec::with_capacity(shapes.len());
    let mut w_gradients = Vec::with_capacity(shapes.len());
    let mut b_gradients = Vec::with_capacity(shapes.len());

    for &(rows, cols) in &shapes {
      weights.push(Matrix::new(rows, cols));
      biases.push(Matrix::new(rows, 1));
      activations.push(Matrix::new(rows, 1));
      errors.push(Matrix::new(rows, 1));
      w_gradients.push(Gradients::new(rows, cols));
      b_gradients.push(Gradients::new(rows, 1));
    }

    Network {
      id,
      topology,
      sigmoid_scale,
      weights,
      biases,
      activations,
      errors,
      w_gradients,
      b_gradients,
    }
  }

  // ---------------------------------------------------------------------------
  // Forward pass

  /// Runs the forward pass for one sparse sample and returns the prediction.
  ///
  /// The first layer is sparse-dense: instead of a full matrix product, only
  /// the weight columns at the active feature indices are summed. Columns
  /// are contiguous in memory, so each active feature is one linear walk.
  /// Hidden layers use ReLU, the output layer the scaled sigmoid.
  ///
  /// ### Arguments
  ///
  /// * `features`: active input feature indices, each in [0, inputs)
  ///
  /// ### Return value
  ///
  /// The single output neuron's activation, in [0;1].
  pub fn predict(&mut self, features: &[i16]) -> f32 {
    let (weights, biases, activations) = (&self.weights, &self.biases, &mut self.activations);

    // Layer 0: sum the active weight columns, then bias + ReLU.
    activations[0].reset();
    for &feature in features {
      let column = weights[0].column(feature as u32);
      for (value, w) in activations[0].data.iter_mut().zip(column) {
        *value += *w;
      }
    }
    for (value, bias) in activations[0].data.iter_mut().zip(biases[0].data.iter()) {
      *value = relu(*value + *bias);
    }

    // Dense layers, fused with their activation.
    let count = activations.len();
    for layer in 1..count {
      let output_layer = layer + 1 == count;
      let (previous, current) = activations.split_at_mut(layer);
      let previous = &previous[layer - 1];
      let current = &mut current[0];
      let w = &weights[layer];

      for i in 0..current.rows {
        let mut z = biases[layer].get(i, 0);
        for j in 0..w.cols {
          z += w.get(i, j) * previous.get(j, 0);
        }
        let a = if output_layer {
          sigmoid(z, self.sigmoid_scale)
        } else {
          relu(z)
        };
        current.set(i, 0, a);
      }
    }

    self.activations[count - 1].get(0, 0)
  }

  // ---------------------------------------------------------------------------
  // Backward pass

  /// Back-propagates an output-layer gradient through the network, filling
  /// every layer's error buffer.
  ///
  /// The caller computes the seed from the cost derivative and the output
  /// activation derivative, see [crate::functions::cost_gradient].
  ///
  /// ### Arguments
  ///
  /// * `output_gradient`: d(cost)/d(pre-activation) at the output neuron
  ///
  pub fn find_errors(&mut self, output_gradient: f32) {
    let count = self.errors.len();
    self.errors[count - 1].reset();
    self.errors[count - 1].set(0, 0, output_gradient);

    for layer in (0..count - 1).rev() {
      let (current, next) = self.errors.split_at_mut(layer + 1);
      let current = &mut current[layer];
      let next = &next[0];
      let w = &self.weights[layer + 1];
      let act = &self.activations[layer];

      for i in 0..current.rows {
        let mut sum = 0.0;
        for j in 0..next.rows {
          sum += next.get(j, 0) * w.get(j, i);
        }
        current.set(i, 0, sum * relu_prime(act.get(i, 0)));
      }
    }
  }

  /// Accumulates the current sample's gradients into the gradient grids.
  ///
  /// Must run right after [Network::predict] and [Network::find_errors] for
  /// the same sample, since it reads the activation and error buffers.
  ///
  /// ### Arguments
  ///
  /// * `features`: the same active feature indices given to predict
  ///
  pub fn update_gradients(&mut self, features: &[i16]) {
    // Layer 0: only the active columns received input, so only their
    // weights can have a non-zero gradient.
    let errors = &self.errors[0];
    let wg = &mut self.w_gradients[0];
    for &feature in features {
      let col = feature as u32;
      for r in 0..errors.rows {
        wg.add(r, col, errors.get(r, 0));
      }
    }
    let bg = &mut self.b_gradients[0];
    for r in 0..errors.rows {
      bg.add(r, 0, errors.get(r, 0));
    }

    // Dense layers: dW[i,j] = A[l-1][j] * E[l][i], db[i] = E[l][i]
    for layer in 1..self.errors.len() {
      let errors = &self.errors[layer];
      let previous = &self.activations[layer - 1];
      let wg = &mut self.w_gradients[layer];
      for i in 0..errors.rows {
        let e = errors.get(i, 0);
        for j in 0..previous.rows {
          wg.add(i, j, previous.get(j, 0) * e);
        }
      }
      let bg = &mut self.b_gradients[layer];
      for i in 0..errors.rows {
        bg.add(i, 0, errors.get(i, 0));
      }
    }
  }

  /// Applies every accumulated gradient onto its parameter and clears the
  /// accumulators. Adam moments persist across calls.
  pub fn apply_gradients(&mut self, learning_rate: f32) {
    for (grid, params) in self.w_gradients.iter_mut().zip(self.weights.iter_mut()) {
      grid.apply(params, learning_rate);
    }
    for (grid, params) in self.b_gradients.iter_mut().zip(self.biases.iter_mut()) {
      grid.apply(params, learning_rate);
    }
  }

  // ---------------------------------------------------------------------------
  // Replica synchronization

  /// Sums a worker replica's gradient values into this network's grids and
  /// clears the worker's. Used at the mini-batch barrier.
  pub fn reduce_gradients_from(&mut self, worker: &mut Network) {
    for (mine, theirs) in self.w_gradients.iter_mut().zip(worker.w_gradients.iter_mut()) {
      mine.reduce_from(theirs);
    }
    for (mine, theirs) in self.b_gradients.iter_mut().zip(worker.b_gradients.iter_mut()) {
      mine.reduce_from(theirs);
    }
  }

  /// Copies the master's weights and biases into this replica.
  pub fn copy_parameters_from(&mut self, master: &Network) {
    for (mine, theirs) in self.weights.iter_mut().zip(master.weights.iter()) {
      mine.copy_from(theirs);
    }
    for (mine, theirs) in self.biases.iter_mut().zip(master.biases.iter()) {
      mine.copy_from(theirs);
    }
  }

  /// Copies the master's Adam moments into this replica's gradient grids.
  pub fn sync_moments_from(&mut self, master: &Network) {
    for (mine, theirs) in self.w_gradients.iter_mut().zip(master.w_gradients.iter()) {
      mine.sync_moments_from(theirs);
    }
    for (mine, theirs) in self.b_gradients.iter_mut().zip(master.b_gradients.iter()) {
      mine.sync_moments_from(theirs);
    }
  }

  // ---------------------------------------------------------------------------
  // Binary network file

  /// Saves the network to a file.
  ///
  /// Layout, everything little-endian:
  /// magic/version (4 bytes), network id (u32), inputs (u32), outputs (u32),
  /// hidden layer count (u32), hidden layer sizes (u32 each), then for every
  /// layer its weights (rows * cols f32, column-major) followed by its
  /// biases (rows f32).
  pub fn save(&self, path: &Path) -> Result<()> {
    let file = File::create(path)
      .with_context(|| format!("Could not create network file {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    writer.write_all(&NETWORK_FILE_MAGIC)?;
    writer.write_all(&self.id.to_le_bytes())?;
    writer.write_all(&self.topology.inputs.to_le_bytes())?;
    writer.write_all(&self.topology.outputs.to_le_bytes())?;
    writer.write_all(&(self.topology.hidden.len() as u32).to_le_bytes())?;
    for &size in &self.topology.hidden {
      writer.write_all(&size.to_le_bytes())?;
    }

    for layer in 0..self.topology.layer_count() {
      for value in &self.weights[layer].data {
        writer.write_all(&value.to_le_bytes())?;
      }
      for value in &self.biases[layer].data {
        writer.write_all(&value.to_le_bytes())?;
      }
    }

    writer
      .flush()
      .with_context(|| format!("Could not write network file {}", path.display()))
  }

  /// Loads a network from a file.
  ///
  /// Rejects files whose magic or version does not match
  /// [NETWORK_FILE_MAGIC], naming the offending bytes.
  ///
  /// ### Arguments
  ///
  /// * `path`:          network file to read
  /// * `sigmoid_scale`: sigmoid scale to capture in the loaded network
  ///
  pub fn load(path: &Path, sigmoid_scale: f32) -> Result<Network> {
    let file =
      File::open(path).with_context(|| format!("Could not open network file {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader
      .read_exact(&mut magic)
      .with_context(|| format!("Network file {} is truncated", path.display()))?;
    if magic != NETWORK_FILE_MAGIC {
      bail!(
        "Unknown magic/version bytes {:02X?} in {}, expected {:02X?}",
        magic,
        path.display(),
        NETWORK_FILE_MAGIC
      );
    }

    let id = read_u32(&mut reader).context("while reading the network id")?;
    let inputs = read_u32(&mut reader).context("while reading the input count")?;
    let outputs = read_u32(&mut reader).context("while reading the output count")?;
    let num_hidden = read_u32(&mut reader).context("while reading the hidden layer count")?;
    let mut hidden = Vec::with_capacity(num_hidden as usize);
    for i in 0..num_hidden {
      hidden.push(read_u32(&mut reader).with_context(|| {
        format!("while reading the size of hidden layer {}", i)
      })?);
    }

    let topology = Topology::new(inputs, outputs, hidden);
    let mut network = Network::zeroed(topology, id, sigmoid_scale);

    for layer in 0..network.topology.layer_count() {
      for i in 0..network.weights[layer].data.len() {
        network.weights[layer].data[i] =
          read_f32(&mut reader).with_context(|| format!("while reading layer {} weights", layer))?;
      }
      for i in 0..network.biases[layer].data.len() {
        network.biases[layer].data[i] =
          read_f32(&mut reader).with_context(|| format!("while reading layer {} biases", layer))?;
      }
    }

    Ok(network)
  }
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
  let mut buf = [0u8; 4];
  reader.read_exact(&mut buf).context("Network file ended early")?;
  Ok(u32::from_le_bytes(buf))
}

fn read_f32<R: Read>(reader: &mut R) -> Result<f32> {
  let mut buf = [0u8; 4];
  reader.read_exact(&mut buf).context("Network file ended early")?;
  Ok(f32::from_le_bytes(buf))
}
