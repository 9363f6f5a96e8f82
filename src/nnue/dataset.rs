use crate::functions::sigmoid;
use crate::position::{from_fen, SIDE_TO_MOVE_FEATURE};

use anyhow::{anyhow, bail, Context, Result};
use log::*;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

// -----------------------------------------------------------------------------
// Sample types

/// One training sample, ready for the network.
///
/// `features` is the sparse input: indices of the active input neurons.
/// `score` is the engine evaluation already squashed through the scaled
/// sigmoid; `outcome` is the game result, 0.0 / 0.5 / 1.0 from the side to
/// move's perspective.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
  pub features: Vec<i16>,
  pub score: f32,
  pub outcome: f32,
}

/// One parsed corpus record, before sigmoid normalization.
///
/// Keeps the raw centipawn score so the record can round-trip through the
/// binpack format exactly; [RawSample::into_sample] produces the training
/// representation.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSample {
  pub features: Vec<i16>,
  /// Centipawn score, side-to-move relative.
  pub score: i16,
  /// Game outcome, side-to-move relative: 0.0 / 0.5 / 1.0
  pub outcome: f32,
}

impl RawSample {
  /// Converts the raw record into a training sample by normalizing the
  /// centipawn score into [0;1].
  pub fn into_sample(self, sigmoid_scale: f32) -> Sample {
    Sample {
      features: self.features,
      score: sigmoid(self.score as f32, sigmoid_scale),
      outcome: self.outcome,
    }
  }
}

// -----------------------------------------------------------------------------
// Text corpus parsing

/// Parses one corpus line into a raw sample.
///
/// Lines look like
/// `<FEN>;score:<centipawns>;eval:<..>;qs:<..>;outcome:<0|0.5|1>` where only
/// the `score` and `outcome` fields are required; other `name:value` fields
/// are ignored. For black-to-move positions the score and outcome are
/// flipped to the side to move's perspective, matching the side-relative
/// feature encoding. Networks with a side-to-move input get the marker
/// feature appended on white-to-move samples.
///
/// ### Arguments
///
/// * `line`:   one corpus line, without the trailing newline
/// * `inputs`: input dimension of the target network (768 or 769)
///
/// ### Return value
///
/// The parsed [RawSample], or an error quoting the offending line.
pub fn parse_line(line: &str, inputs: u32) -> Result<RawSample> {
  let mut parts = line.split(';');
  let fen = parts.next().unwrap_or_default();

  let (mut features, white_to_move) =
    from_fen(fen).with_context(|| format!("Bad line {}", line))?;

  let mut score: Option<f32> = None;
  let mut outcome: Option<f32> = None;
  for part in parts {
    if part.trim().is_empty() {
      continue;
    }
    let Some((name, value)) = part.split_once(':') else {
      bail!("Bad line {}: field {} is not a name:value pair", line, part);
    };
    match name {
      "score" => {
        score = Some(
          value
            .trim()
            .parse::<f32>()
            .map_err(|_| anyhow!("Bad line {}: invalid score {}", line, value))?,
        );
      },
      "outcome" => {
        outcome = Some(
          value
            .trim()
            .parse::<f32>()
            .map_err(|_| anyhow!("Bad line {}: invalid outcome {}", line, value))?,
        );
      },
      _ => {}, // eval, qs, ... are not used for training
    }
  }

  let mut score = score.ok_or_else(|| anyhow!("Bad line {}: missing score field", line))?;
  let mut outcome = outcome.ok_or_else(|| anyhow!("Bad line {}: missing outcome field", line))?;
  if outcome != 0.0 && outcome != 0.5 && outcome != 1.0 {
    bail!("Bad line {}: outcome {} is not 0, 0.5 or 1", line, outcome);
  }

  // Score and outcome are white-relative in the corpus; the features are
  // side-relative, so flip both for black-to-move positions.
  if !white_to_move {
    score = -score;
    outcome = 1.0 - outcome;
  }

  if inputs > SIDE_TO_MOVE_FEATURE as u32 && white_to_move {
    features.push(SIDE_TO_MOVE_FEATURE);
  }

  Ok(RawSample {
    features,
    score: score.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16,
    outcome,
  })
}

/// Loads a text corpus into training samples.
///
/// One sample per line; malformed lines are fatal. Files are read in the
/// order given and samples keep their file order, the trainer does not
/// shuffle.
///
/// ### Arguments
///
/// * `paths`:         corpus files to read
/// * `inputs`:        input dimension of the target network
/// * `sigmoid_scale`: scale used to normalize centipawn scores
///
pub fn load_text_dataset(
  paths: &[PathBuf],
  inputs: u32,
  sigmoid_scale: f32,
) -> Result<Vec<Sample>> {
  let mut samples: Vec<Sample> = Vec::new();

  for path in paths {
    info!("Loading dataset file {}", path.display());
    let file = File::open(path)
      .with_context(|| format!("Could not open dataset file {}", path.display()))?;
    let reader = BufReader::new(file);

    for line in reader.lines() {
      let line =
        line.with_context(|| format!("Could not read from dataset file {}", path.display()))?;
      if line.trim().is_empty() {
        continue;
      }
      let raw = parse_line(&line, inputs)
        .with_context(|| format!("In dataset file {}", path.display()))?;
      samples.push(raw.into_sample(sigmoid_scale));

      if samples.len() % 1_000_000 == 0 {
        info!("{} samples loaded", samples.len());
      }
    }
  }

  info!("Loaded {} samples", samples.len());
  Ok(samples)
}
