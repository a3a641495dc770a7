use serde::{Deserialize, Serialize};

use crate::{sampling::SampleOptions, trainer::TrainerConfig};

/// Hyperparameters for a full run
#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Config {
    /// Codebook size
    pub ncluster: usize,
    /// k-means iterations
    pub niter: usize,
    /// Random pixels plucked from every training image to fit the codebook
    pub pixels_per_image: usize,
    /// Shuffle pixel positions with one random permutation instead of raster order
    pub permute_pixels: bool,
    /// Embedding width of the model
    pub n_embd: usize,
    pub max_train_images: Option<usize>,
    pub max_test_images: Option<usize>,
    /// Training images shown in the reconstruction preview
    pub n_preview: usize,
    pub preview_cols: usize,
    pub n_samples: usize,
    pub sample_cols: usize,
    /// Training items used to estimate the start token distribution
    pub n_first_token_estimates: usize,
    #[serde(flatten)]
    pub sampling: SampleOptions,
    /// Positional embedding channels to plot
    pub n_pos_emb_plots: usize,
    pub trainer: TrainerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ncluster: 512,
            niter: 8,
            pixels_per_image: 5,
            permute_pixels: false,
            n_embd: 64,
            max_train_images: None,
            max_test_images: None,
            n_preview: 16,
            preview_cols: 8,
            n_samples: 32,
            sample_cols: 8,
            n_first_token_estimates: 5000,
            sampling: SampleOptions::default(),
            n_pos_emb_plots: 64,
            trainer: TrainerConfig::default(),
        }
    }
}
