pub mod codebook;
pub mod color;
pub mod config;
pub mod constants;
pub mod dataset;
pub mod error;
pub mod image;
pub mod kmeans;
pub mod metrics;
pub mod model;
pub mod permutation;
pub mod pipeline;
pub mod plotting;
pub mod sampling;
pub mod sequence;
pub mod serde_utils;
pub mod trainer;
pub mod utils;
