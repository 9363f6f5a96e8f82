use crate::dataset::{parse_line, RawSample, Sample};

use anyhow::{bail, Context, Result};
use log::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

// Compact binary dataset format, everything little-endian:
//   u64 sample count
//   per sample: u16 outcome (0, 1 or 2), u16 score (i16 centipawns
//   reinterpreted), u16 feature count, then feature indices as u16.
//
// Text parsing of a 50M+ line corpus dominates trainer startup; this format
// loads in a single pass with no FEN decoding.

// -----------------------------------------------------------------------------
// Writing

/// Writes raw samples to a binpack file.
///
/// ### Arguments
///
/// * `path`:    output file
/// * `samples`: parsed corpus records
///
pub fn write_binpack(path: &Path, samples: &[RawSample]) -> Result<()> {
  let file = File::create(path)
    .with_context(|| format!("Could not create binpack file {}", path.display()))?;
  let mut writer = BufWriter::new(file);

  writer.write_all(&(samples.len() as u64).to_le_bytes())?;
  for sample in samples {
    writer.write_all(&((sample.outcome * 2.0) as u16).to_le_bytes())?;
    writer.write_all(&(sample.score as u16).to_le_bytes())?;
    writer.write_all(&(sample.features.len() as u16).to_le_bytes())?;
    for &feature in &sample.features {
      writer.write_all(&(feature as u16).to_le_bytes())?;
    }
  }

  writer
    .flush()
    .with_context(|| format!("Could not write binpack file {}", path.display()))
}

/// Converts text corpus files into one binpack file.
///
/// The text is parsed in a single pass; malformed lines are fatal, exactly
/// as when loading for training.
///
/// ### Arguments
///
/// * `paths`:  text corpus files to convert
/// * `output`: binpack file to write
/// * `inputs`: input dimension of the target network (768 or 769)
///
/// ### Return value
///
/// Number of samples written.
pub fn convert_text_to_binpack(paths: &[PathBuf], output: &Path, inputs: u32) -> Result<u64> {
  let mut samples: Vec<RawSample> = Vec::new();

  for path in paths {
    info!("Converting dataset file {}", path.display());
    let file = File::open(path)
      .with_context(|| format!("Could not open dataset file {}", path.display()))?;
    let reader = BufReader::new(file);

    for line in reader.lines() {
      let line =
        line.with_context(|| format!("Could not read from dataset file {}", path.display()))?;
      if line.trim().is_empty() {
        continue;
      }
      samples.push(
        parse_line(&line, inputs).with_context(|| format!("In dataset file {}", path.display()))?,
      );
    }
  }

  write_binpack(output, &samples)?;
  info!("Wrote {} samples to {}", samples.len(), output.display());
  Ok(samples.len() as u64)
}

// -----------------------------------------------------------------------------
// Reading

/// Loads binpack files into training samples.
///
/// ### Arguments
///
/// * `paths`:         binpack files to read
/// * `sigmoid_scale`: scale used to normalize centipawn scores
///
pub fn load_binpack(paths: &[PathBuf], sigmoid_scale: f32) -> Result<Vec<Sample>> {
  let mut samples: Vec<Sample> = Vec::new();

  for path in paths {
    info!("Loading binpack file {}", path.display());
    let file = File::open(path)
      .with_context(|| format!("Could not open binpack file {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let count = read_u64(&mut reader)
      .with_context(|| format!("Binpack file {} is truncated", path.display()))?;
    samples.reserve(count as usize);

    for i in 0..count {
      let sample = read_sample(&mut reader, sigmoid_scale)
        .with_context(|| format!("In binpack file {}, sample {} of {}", path.display(), i, count))?;
      samples.push(sample);
    }
  }

  info!("Loaded {} samples", samples.len());
  Ok(samples)
}

fn read_sample<R: Read>(reader: &mut R, sigmoid_scale: f32) -> Result<Sample> {
  let outcome = read_u16(reader)?;
  if outcome > 2 {
    bail!("Invalid outcome value {}", outcome);
  }
  let score = read_u16(reader)? as i16;
  let feature_count = read_u16(reader)?;
  let mut features = Vec::with_capacity(feature_count as usize);
  for _ in 0..feature_count {
    features.push(read_u16(reader)? as i16);
  }

  Ok(
    RawSample {
      features,
      score,
      outcome: outcome as f32 / 2.0,
    }
    .into_sample(sigmoid_scale),
  )
}

fn read_u16<R: Read>(reader: &mut R) -> Result<u16> {
  let mut buf = [0u8; 2];
  reader.read_exact(&mut buf).context("Binpack file ended early")?;
  Ok(u16::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
  let mut buf = [0u8; 8];
  reader.read_exact(&mut buf).context("Binpack file ended early")?;
  Ok(u64::from_le_bytes(buf))
}

//------------------------------------------------------------------------------
// Tests
#[cfg(test)]
mod tests {
  use super::*;
  use crate::functions::SIGMOID_SCALE;

  #[test]
  fn test_binpack_round_trip() {
    let raw = vec![
      RawSample {
        features: vec![8, 65, 632],
        score: -72,
        outcome: 0.5,
      },
      RawSample {
        features: vec![300, 768],
        score: 342,
        outcome: 1.0,
      },
      RawSample {
        features: vec![0],
        score: 0,
        outcome: 0.0,
      },
    ];

    let path = std::env::temp_dir().join("nnue-binpack-round-trip.bin");
    write_binpack(&path, &raw).unwrap();
    let samples = load_binpack(&[path.clone()], SIGMOID_SCALE).unwrap();
    std::fs::remove_file(&path).unwrap();

    let expected: Vec<Sample> = raw
      .into_iter()
      .map(|r| r.into_sample(SIGMOID_SCALE))
      .collect();
    assert_eq!(expected, samples);
  }

  #[test]
  fn test_text_conversion_matches_text_loading() {
    let text_path = std::env::temp_dir().join("nnue-binpack-conversion-test.txt");
    std::fs::write(
      &text_path,
      "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1;score:-72;eval:50;qs:0;outcome:0.5\n\
       4k3/8/8/8/8/8/8/4K3 b - - 0 1;score:25;eval:25;qs:0;outcome:0.0\n",
    )
    .unwrap();

    let bin_path = std::env::temp_dir().join("nnue-binpack-conversion-test.bin");
    let written =
      convert_text_to_binpack(&[text_path.clone()], &bin_path, 769).unwrap();
    assert_eq!(2, written);

    let from_binpack = load_binpack(&[bin_path.clone()], SIGMOID_SCALE).unwrap();
    let from_text =
      crate::dataset::load_text_dataset(&[text_path.clone()], 769, SIGMOID_SCALE).unwrap();
    std::fs::remove_file(&text_path).unwrap();
    std::fs::remove_file(&bin_path).unwrap();

    assert_eq!(from_text, from_binpack);
  }

  #[test]
  fn test_load_rejects_truncated_file() {
    let path = std::env::temp_dir().join("nnue-binpack-truncated.bin");
    // Claims 5 samples, contains none
    std::fs::write(&path, 5u64.to_le_bytes()).unwrap();

    let result = load_binpack(&[path.clone()], SIGMOID_SCALE);
    std::fs::remove_file(&path).unwrap();
    assert!(result.is_err());
  }

  #[test]
  fn test_load_rejects_bad_outcome() {
    let path = std::env::temp_dir().join("nnue-binpack-bad-outcome.bin");
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&1u64.to_le_bytes());
    bytes.extend_from_slice(&3u16.to_le_bytes()); // outcome out of range
    bytes.extend_from_slice(&0u16.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    std::fs::write(&path, bytes).unwrap();

    let result = load_binpack(&[path.clone()], SIGMOID_SCALE);
    std::fs::remove_file(&path).unwrap();

    assert!(result.is_err());
    assert!(format!("{:#}", result.unwrap_err()).contains("outcome"));
  }
}
