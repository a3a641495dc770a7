use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    /// Mean per-token loss over the epoch's batches
    pub train_loss: f32,
    pub test_loss: Option<f32>,
    /// Learning rate after the last batch
    pub lr: f32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TrainMetrics {
    pub epoch_metrics: Vec<EpochMetrics>,
}

impl TrainMetrics {
    pub fn final_train_loss(&self) -> Option<f32> {
        self.epoch_metrics.last().map(|m| m.train_loss)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub n_train_images: usize,
    pub n_test_images: usize,
    pub ncluster: usize,
    pub n_pixels_sampled: usize,
    pub image_width: usize,
    pub image_height: usize,
    pub n_params: usize,
    pub best_test_loss: Option<f32>,
    pub final_train_loss: Option<f32>,
    pub elapsed_ms: u128,
    pub seed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch(epoch: usize, train_loss: f32, test_loss: Option<f32>) -> EpochMetrics {
        EpochMetrics {
            epoch,
            train_loss,
            test_loss,
            lr: 1e-3,
        }
    }

    #[test]
    fn summarizes_epochs() {
        let metrics = TrainMetrics {
            epoch_metrics: vec![epoch(0, 3.0, Some(2.5)), epoch(1, 2.0, Some(2.1)), epoch(2, 1.5, Some(2.2))],
        };
        assert_eq!(metrics.final_train_loss(), Some(1.5));

        let empty = TrainMetrics::default();
        assert_eq!(empty.final_train_loss(), None);
    }
}
