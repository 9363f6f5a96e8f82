// NNUE training library: the network itself (sparse-input forward pass,
// per-sample backward pass, Adam-style optimizer), its binary file format,
// the dataset codecs and the parallel mini-batch trainer.

pub mod binpack;
pub mod dataset;
pub mod functions;
pub mod gradient;
pub mod matrix;
pub mod network;
pub mod position;
pub mod trainer;
