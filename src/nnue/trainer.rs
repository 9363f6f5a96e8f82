use crate::dataset::Sample;
use crate::functions::{cost, cost_gradient, sigmoid_prime};
use crate::network::Network;

use anyhow::Result;
use log::*;
use std::path::Path;
use std::thread;
use std::time::Instant;

// -----------------------------------------------------------------------------
// Constants

/// Gradients accumulate over this many samples before each optimizer step.
pub const BATCH_SIZE: usize = 16384;

/// When learning-rate decay is enabled, divide by this factor ...
const LR_DECAY_FACTOR: f32 = 1.1;
/// ... every this many epochs.
const LR_DECAY_INTERVAL: usize = 20;

// -----------------------------------------------------------------------------
// Options

/// Knobs for a training run. Captured once at trainer construction, there is
/// no process-wide mutable state.
#[derive(Clone, Copy, Debug)]
pub struct TrainingOptions {
  pub epochs: usize,
  pub learning_rate: f32,
  /// Divide the learning rate by 1.1 every 20 epochs.
  pub lr_decay: bool,
}

impl Default for TrainingOptions {
  fn default() -> Self {
    Self {
      epochs: 100,
      learning_rate: 0.01,
      lr_decay: false,
    }
  }
}

// -----------------------------------------------------------------------------
// Trainer

/// Mini-batch trainer fanning samples over per-thread network replicas.
///
/// Replica 0 is the master: it owns the authoritative parameters and the
/// Adam moments. Within a mini-batch each replica works on its own
/// contiguous chunk, touching only its own buffers and gradient grids; at
/// the batch barrier the main thread reduces all gradients into the master,
/// applies the optimizer there, and broadcasts parameters and moments back.
/// No locking is needed anywhere.
pub struct Trainer {
  pub networks: Vec<Network>,
  pub training: Vec<Sample>,
  pub validation: Vec<Sample>,
  options: TrainingOptions,
}

impl Trainer {
  /// Creates a trainer with one network replica per hardware thread.
  ///
  /// The sample array is split 80/20 by index: the trailing fifth becomes
  /// the validation set. Samples are never shuffled.
  ///
  /// ### Arguments
  ///
  /// * `network`: starting network, becomes the master replica
  /// * `samples`: full dataset, already parsed
  /// * `options`: epoch count, learning rate, decay
  ///
  pub fn new(network: Network, mut samples: Vec<Sample>, options: TrainingOptions) -> Self {
    let replicas = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let networks = vec![network; replicas];

    let validation = samples.split_off(samples.len() - samples.len() / 5);
    info!(
      "Training on {} samples, validating on {}, using {} threads",
      samples.len(),
      validation.len(),
      replicas
    );
    if samples.len() <= BATCH_SIZE {
      warn!(
        "Fewer training samples than the mini-batch size ({}), no batch will run",
        BATCH_SIZE
      );
    }

    Trainer {
      networks,
      training: samples,
      validation,
      options,
    }
  }

  /// Runs the full training loop, saving one network file per epoch into
  /// the output directory.
  pub fn train(&mut self, output_dir: &Path) -> Result<()> {
    let mut learning_rate = self.options.learning_rate;

    for epoch in 0..self.options.epochs {
      if self.options.lr_decay && epoch > 0 && epoch % LR_DECAY_INTERVAL == 0 {
        learning_rate /= LR_DECAY_FACTOR;
        info!("Learning rate decayed to {}", learning_rate);
      }

      let start = Instant::now();
      let (total_cost, trained) = self.run_epoch(learning_rate);
      let training_cost = if trained > 0 {
        total_cost / trained as f64
      } else {
        0.0
      };
      let validation_cost = self.validate();

      let path = output_dir.join(format!("epoch-{}.nnue", epoch + 1));
      self.networks[0].save(&path)?;

      info!(
        "Epoch {}: training cost {:.6}, validation cost {:.6}, {:.1}s, saved {}",
        epoch + 1,
        training_cost,
        validation_cost,
        start.elapsed().as_secs_f32(),
        path.display()
      );
    }

    Ok(())
  }

  /// Runs one pass over the training slice.
  ///
  /// ### Return value
  ///
  /// Accumulated cost over all trained samples, and how many samples were
  /// trained (the final partial batch is dropped).
  fn run_epoch(&mut self, learning_rate: f32) -> (f64, usize) {
    let replicas = self.networks.len();
    let chunk_size = BATCH_SIZE.div_ceil(replicas);
    let mut total_cost = 0.0;
    let mut trained = 0;

    let mut batch_start = 0;
    while batch_start + BATCH_SIZE < self.training.len() {
      let batch = &self.training[batch_start..batch_start + BATCH_SIZE];
      total_cost += train_batch(&mut self.networks, batch, chunk_size);
      trained += batch.len();

      // Batch barrier: reduce into the master, step, broadcast back.
      let (master, workers) = self.networks.split_at_mut(1);
      let master = &mut master[0];
      for worker in workers.iter_mut() {
        master.reduce_gradients_from(worker);
      }
      master.apply_gradients(learning_rate);
      for worker in workers.iter_mut() {
        worker.copy_parameters_from(master);
        worker.sync_moments_from(master);
      }

      batch_start += BATCH_SIZE;
    }

    (total_cost, trained)
  }

  /// Mean cost over the held-out validation slice, computed in parallel
  /// with the same static partitioning as training.
  pub fn validate(&mut self) -> f64 {
    if self.validation.is_empty() {
      return 0.0;
    }

    let replicas = self.networks.len();
    let chunk_size = self.validation.len().div_ceil(replicas);
    let validation = &self.validation;

    let total: f64 = thread::scope(|scope| {
      let mut handles = Vec::with_capacity(replicas);
      for (network, chunk) in self.networks.iter_mut().zip(validation.chunks(chunk_size)) {
        handles.push(scope.spawn(move || {
          let mut cost_sum = 0.0;
          for sample in chunk {
            let output = network.predict(&sample.features);
            cost_sum += cost(output, sample.score, sample.outcome) as f64;
          }
          cost_sum
        }));
      }
      handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    total / self.validation.len() as f64
  }
}

// -----------------------------------------------------------------------------
// Per-batch work

/// Fans one mini-batch across the replicas and returns the summed cost.
///
/// Each replica trains on its own contiguous chunk; nothing is shared
/// between the worker threads, so the join is the only synchronization.
fn train_batch(networks: &mut [Network], batch: &[Sample], chunk_size: usize) -> f64 {
  thread::scope(|scope| {
    let mut handles = Vec::with_capacity(networks.len());
    for (network, chunk) in networks.iter_mut().zip(batch.chunks(chunk_size)) {
      handles.push(scope.spawn(move || {
        let mut cost_sum = 0.0;
        for sample in chunk {
          cost_sum += train_sample(network, sample) as f64;
        }
        cost_sum
      }));
    }
    handles.into_iter().map(|h| h.join().unwrap()).sum()
  })
}

/// Forward + backward + gradient accumulation for one sample.
///
/// ### Return value
///
/// The sample's cost before the update.
fn train_sample(network: &mut Network, sample: &Sample) -> f32 {
  let output = network.predict(&sample.features);
  let seed = cost_gradient(output, sample.score, sample.outcome)
    * sigmoid_prime(output, network.sigmoid_scale);
  network.find_errors(seed);
  network.update_gradients(&sample.features);
  cost(output, sample.score, sample.outcome)
}

//------------------------------------------------------------------------------
// Tests
#[cfg(test)]
mod tests {
  use super::*;
  use crate::functions::SIGMOID_SCALE;
  use crate::network::Topology;
  use rand::rngs::StdRng;
  use rand::{Rng, SeedableRng};

  fn synthetic_samples(count: usize, inputs: i16, seed: u64) -> Vec<Sample> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut samples = Vec::with_capacity(count);
    for _ in 0..count {
      // A handful of distinct active features per sample
      let mut features: Vec<i16> = (0..inputs).collect();
      for i in (1..features.len()).rev() {
        features.swap(i, rng.gen_range(0..=i));
      }
      features.truncate(4);
      let outcome = [0.0, 0.5, 1.0][rng.gen_range(0..3)];
      samples.push(Sample {
        features,
        score: rng.gen_range(0.0..1.0),
        outcome,
      });
    }
    samples
  }

  #[test]
  fn test_split_is_80_20() {
    let network = Network::new(Topology::new(8, 1, vec![4]), 1, SIGMOID_SCALE);
    let trainer = Trainer::new(network, synthetic_samples(100, 8, 7), TrainingOptions::default());

    assert_eq!(80, trainer.training.len());
    assert_eq!(20, trainer.validation.len());
  }

  #[test]
  fn test_validation_cost_is_a_mean() {
    let network = Network::new(Topology::new(8, 1, vec![4]), 1, SIGMOID_SCALE);
    let mut trainer = Trainer::new(network, synthetic_samples(50, 8, 11), TrainingOptions::default());

    let mean = trainer.validate();

    // Recompute serially on the master replica
    let mut expected = 0.0;
    for sample in trainer.validation.clone() {
      let output = trainer.networks[0].predict(&sample.features);
      expected += cost(output, sample.score, sample.outcome) as f64;
    }
    expected /= trainer.validation.len() as f64;

    assert!((mean - expected).abs() < 1e-9);
  }

  #[test]
  fn test_one_epoch_end_to_end() {
    // Enough samples for exactly one full mini-batch after the 80/20 split
    let samples = synthetic_samples(BATCH_SIZE * 3 / 2, 8, 42);
    let network = Network::with_rng(
      Topology::new(8, 1, vec![4]),
      5,
      SIGMOID_SCALE,
      &mut StdRng::seed_from_u64(5),
    );
    let options = TrainingOptions {
      epochs: 1,
      ..TrainingOptions::default()
    };
    let mut trainer = Trainer::new(network, samples, options);

    let output_dir = std::env::temp_dir().join("nnue-trainer-epoch-test");
    std::fs::create_dir_all(&output_dir).unwrap();
    trainer.train(&output_dir).unwrap();

    // The epoch network was persisted and loads back
    let saved = output_dir.join("epoch-1.nnue");
    let reloaded = Network::load(&saved, SIGMOID_SCALE).unwrap();
    assert_eq!(trainer.networks[0].topology, reloaded.topology);
    std::fs::remove_file(&saved).unwrap();
    std::fs::remove_dir(&output_dir).unwrap();

    // After the batch barrier every replica observes the master's state
    let master = &trainer.networks[0];
    for replica in &trainer.networks[1..] {
      for layer in 0..master.topology.layer_count() {
        assert_eq!(master.weights[layer], replica.weights[layer]);
        assert_eq!(master.biases[layer], replica.biases[layer]);
      }
    }

    // Gradient accumulators are all back to zero
    for network in &trainer.networks {
      for grid in network.w_gradients.iter().chain(network.b_gradients.iter()) {
        for cell in &grid.data {
          assert_eq!(0.0, cell.value);
        }
      }
    }
  }
}
