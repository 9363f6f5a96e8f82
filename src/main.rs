// External crates
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::*;
use std::path::PathBuf;
use std::process::ExitCode;

// Our own libraries
use nnue::binpack;
use nnue::dataset;
use nnue::functions::SIGMOID_SCALE;
use nnue::network::{Network, Topology};
use nnue::trainer::{Trainer, TrainingOptions};

/// Trains NNUE evaluation networks from scored chess positions.
#[derive(Parser, Debug)]
#[command(name = "nnue-trainer", version, about)]
struct Args {
  /// Number of epochs
  #[arg(long, default_value_t = 100)]
  epochs: usize,

  /// Number of inputs (768, or 769 with the side-to-move feature)
  #[arg(long, default_value_t = 768)]
  inputs: u32,

  /// Number of hidden neurons, for multi-layer you can send comma separated numbers
  #[arg(long, default_value = "256")]
  hiddens: String,

  /// Number of outputs
  #[arg(long, default_value_t = 1)]
  outputs: u32,

  /// Learning rate
  #[arg(long, default_value_t = 0.01)]
  lr: f32,

  /// Divide the learning rate by 1.1 every 20 epochs
  #[arg(long)]
  lr_decay: bool,

  /// Sigmoid scale
  #[arg(long, default_value_t = SIGMOID_SCALE)]
  sigmoid_scale: f32,

  /// A unique id for the network, random when omitted
  #[arg(long)]
  network_id: Option<u32>,

  /// Comma-separated list of dataset files (FEN text, or binpack with -b)
  #[arg(long)]
  input_path: Option<String>,

  /// Path to a network, to be used as a starting point
  #[arg(long)]
  from_net: Option<PathBuf>,

  /// Directory where the epoch-N.nnue files are written
  #[arg(long)]
  output_path: Option<PathBuf>,

  /// Convert the text dataset to this binpack file and exit, without training
  #[arg(long)]
  output_binpack: Option<PathBuf>,

  /// Treat the input files as binpack instead of text
  #[arg(short = 'b')]
  binpack_input: bool,
}

// Main function
fn main() -> ExitCode {
  env_logger::init();

  match run(Args::parse()) {
    Ok(()) => ExitCode::SUCCESS,
    Err(error) => {
      error!("{:#}", error);
      ExitCode::FAILURE
    },
  }
}

fn run(args: Args) -> Result<()> {
  let input_paths = parse_input_paths(args.input_path.as_deref())?;

  // Conversion mode: text in, binpack out, no training.
  if let Some(output) = &args.output_binpack {
    binpack::convert_text_to_binpack(&input_paths, output, args.inputs)?;
    return Ok(());
  }

  let network = if let Some(path) = &args.from_net {
    let network = Network::load(path, args.sigmoid_scale)?;
    info!(
      "Starting from network {} loaded from {}",
      network.id,
      path.display()
    );
    network
  } else {
    let hidden = parse_hidden_sizes(&args.hiddens)?;
    let id = args.network_id.unwrap_or_else(rand::random);
    info!("Creating network {} with hidden layers {:?}", id, hidden);
    Network::new(
      Topology::new(args.inputs, args.outputs, hidden),
      id,
      args.sigmoid_scale,
    )
  };

  let output_dir = args
    .output_path
    .clone()
    .ok_or_else(|| anyhow!("--output-path is required for training"))?;
  std::fs::create_dir_all(&output_dir)
    .with_context(|| format!("Could not create output directory {}", output_dir.display()))?;

  // The marker-feature decision follows the actual network topology, which
  // can come from --from-net rather than --inputs.
  let samples = if args.binpack_input {
    binpack::load_binpack(&input_paths, args.sigmoid_scale)?
  } else {
    dataset::load_text_dataset(&input_paths, network.topology.inputs, args.sigmoid_scale)?
  };

  let options = TrainingOptions {
    epochs: args.epochs,
    learning_rate: args.lr,
    lr_decay: args.lr_decay,
  };
  let mut trainer = Trainer::new(network, samples, options);
  trainer.train(&output_dir)
}

/// Splits the --input-path value into individual dataset files.
fn parse_input_paths(input_path: Option<&str>) -> Result<Vec<PathBuf>> {
  let paths: Vec<PathBuf> = input_path
    .unwrap_or_default()
    .split(',')
    .filter(|p| !p.trim().is_empty())
    .map(|p| PathBuf::from(p.trim()))
    .collect();

  if paths.is_empty() {
    return Err(anyhow!("--input-path is required"));
  }
  Ok(paths)
}

/// Parses the --hiddens comma-separated layer sizes.
fn parse_hidden_sizes(hiddens: &str) -> Result<Vec<u32>> {
  let mut sizes = Vec::new();
  for word in hiddens.split(',') {
    let parsed = word
      .trim()
      .parse::<u32>()
      .map_err(|_| anyhow!("Invalid hidden layer size: {}", word))?;
    sizes.push(parsed);
  }
  if sizes.is_empty() || sizes.contains(&0) {
    return Err(anyhow!("At least one non-empty hidden layer is required"));
  }
  Ok(sizes)
}

//------------------------------------------------------------------------------
// Tests
#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_hidden_sizes() {
    assert_eq!(vec![256], parse_hidden_sizes("256").unwrap());
    assert_eq!(vec![512, 32, 8], parse_hidden_sizes("512,32,8").unwrap());
    assert_eq!(vec![128, 64], parse_hidden_sizes(" 128 , 64 ").unwrap());
    assert!(parse_hidden_sizes("").is_err());
    assert!(parse_hidden_sizes("128,abc").is_err());
    assert!(parse_hidden_sizes("128,0").is_err());
  }

  #[test]
  fn test_parse_input_paths() {
    let paths = parse_input_paths(Some("a.txt,b.txt")).unwrap();
    assert_eq!(vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")], paths);
    assert!(parse_input_paths(None).is_err());
    assert!(parse_input_paths(Some("")).is_err());
  }
}
