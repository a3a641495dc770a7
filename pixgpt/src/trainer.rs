use std::{f32::consts::PI, path::PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array, Dimension, Zip};
use rand::{Rng, seq::SliceRandom};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    constants::MIN_LR_MULT,
    error::{Error, Result},
    metrics::{EpochMetrics, TrainMetrics},
    model::{Gradients, ModelConfig, PixelModel},
    sequence::TokenDataset,
    serde_utils::JSONReadWrite,
    utils::mean,
};

/// Optimization hyperparameters
#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct TrainerConfig {
    pub max_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    /// Adam moment decay rates
    pub betas: (f32, f32),
    pub eps: f32,
    /// Maximum global gradient norm
    pub grad_norm_clip: f32,
    /// Decoupled weight decay, applied to the output head only
    pub weight_decay: f32,
    /// Linear warmup followed by cosine decay to 10% of the base rate
    pub lr_decay: bool,
    /// Tokens of linear warmup. Defaults to one epoch.
    pub warmup_tokens: Option<usize>,
    /// Tokens at which the cosine decay reaches its floor. Defaults to all epochs.
    pub final_tokens: Option<usize>,
    /// Where the best model is written
    pub ckpt_path: Option<PathBuf>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_epochs: 2,
            batch_size: 128,
            learning_rate: 3e-3,
            betas: (0.9, 0.95),
            eps: 1e-8,
            grad_norm_clip: 1.0,
            weight_decay: 0.0,
            lr_decay: true,
            warmup_tokens: None,
            final_tokens: None,
            ckpt_path: None,
        }
    }
}

/// Learning rate after `tokens` targets have been processed
pub fn learning_rate(config: &TrainerConfig, tokens: usize) -> f32 {
    if !config.lr_decay {
        return config.learning_rate;
    }

    let warmup = config.warmup_tokens.unwrap_or(0);
    let final_tokens = config.final_tokens.unwrap_or(warmup);

    let mult = if tokens < warmup {
        tokens as f32 / warmup.max(1) as f32
    } else {
        let progress = (tokens - warmup) as f32 / final_tokens.saturating_sub(warmup).max(1) as f32;
        (0.5 * (1.0 + (PI * progress.min(1.0)).cos())).max(MIN_LR_MULT)
    };

    config.learning_rate * mult
}

/// Adam with decoupled weight decay
#[derive(Clone, Debug)]
pub struct Adam {
    m: Gradients,
    v: Gradients,
    t: i32,
}

struct AdamStep {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    bias1: f32,
    bias2: f32,
    weight_decay: f32,
}

impl Adam {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            m: Gradients::zeros(config),
            v: Gradients::zeros(config),
            t: 0,
        }
    }

    pub fn step(&mut self, model: &mut PixelModel, grads: &Gradients, lr: f32, config: &TrainerConfig) {
        self.t += 1;
        let (beta1, beta2) = config.betas;
        let mut hp = AdamStep {
            lr,
            beta1,
            beta2,
            eps: config.eps,
            bias1: 1.0 - beta1.powi(self.t),
            bias2: 1.0 - beta2.powi(self.t),
            weight_decay: 0.0,
        };

        adam_update(&mut model.tok_emb, &grads.tok_emb, &mut self.m.tok_emb, &mut self.v.tok_emb, &hp);
        adam_update(&mut model.pos_emb, &grads.pos_emb, &mut self.m.pos_emb, &mut self.v.pos_emb, &hp);
        adam_update(&mut model.head_bias, &grads.head_bias, &mut self.m.head_bias, &mut self.v.head_bias, &hp);

        hp.weight_decay = config.weight_decay;
        adam_update(&mut model.head, &grads.head, &mut self.m.head, &mut self.v.head, &hp);
    }
}

fn adam_update<D: Dimension>(
    param: &mut Array<f32, D>,
    grad: &Array<f32, D>,
    m: &mut Array<f32, D>,
    v: &mut Array<f32, D>,
    hp: &AdamStep,
) {
    Zip::from(param).and(grad).and(m).and(v).for_each(|p, &g, m, v| {
        *m = hp.beta1 * *m + (1.0 - hp.beta1) * g;
        *v = hp.beta2 * *v + (1.0 - hp.beta2) * g * g;
        let m_hat = *m / hp.bias1;
        let v_hat = *v / hp.bias2;
        *p -= hp.lr * (m_hat / (v_hat.sqrt() + hp.eps) + hp.weight_decay * *p);
    });
}

/// Result of a training run
#[derive(Clone, Debug)]
pub struct TrainOutput {
    pub metrics: TrainMetrics,
    /// Lowest test loss seen, if a test set was given
    pub best_loss: Option<f32>,
}

/// Mini-batch trainer for [`PixelModel`]
pub struct Trainer<'a, D: TokenDataset> {
    pub model: PixelModel,
    train_dataset: &'a D,
    test_dataset: Option<&'a D>,
    config: TrainerConfig,
    optimizer: Adam,
    tokens: usize,
}

impl<'a, D: TokenDataset> Trainer<'a, D> {
    /// Missing warmup and final token counts are derived from the train set size.
    pub fn new(model: PixelModel, train_dataset: &'a D, test_dataset: Option<&'a D>, mut config: TrainerConfig) -> Self {
        let tokens_per_epoch = train_dataset.len() * model.config.block_size;
        config.warmup_tokens.get_or_insert(tokens_per_epoch);
        config.final_tokens.get_or_insert(config.max_epochs * tokens_per_epoch);

        let optimizer = Adam::new(&model.config);

        Self {
            model,
            train_dataset,
            test_dataset,
            config,
            optimizer,
            tokens: 0,
        }
    }

    #[inline]
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Targets processed so far
    #[inline]
    pub fn tokens(&self) -> usize {
        self.tokens
    }

    pub fn train(&mut self, rng: &mut impl Rng) -> Result<TrainOutput> {
        if self.config.batch_size == 0 {
            return Err(Error::InvalidArgument("batch_size must be at least 1".into()));
        }

        let mut metrics = TrainMetrics::default();
        let mut best_loss = f32::INFINITY;

        for epoch in 0..self.config.max_epochs {
            let (train_loss, lr) = self.run_epoch(epoch, rng)?;

            let test_loss = match self.test_dataset {
                Some(test) if !test.is_empty() => Some(evaluate(&self.model, test, self.config.batch_size)?),
                _ => None,
            };

            info!(
                "epoch {}/{}: train loss {:.5}, test loss {}, lr {:e}",
                epoch + 1,
                self.config.max_epochs,
                train_loss,
                test_loss.map_or("n/a".to_string(), |l| format!("{l:.5}")),
                lr
            );

            // Without a test set every epoch counts as an improvement
            let good_model = test_loss.is_none_or(|l| l < best_loss);
            if good_model {
                if let Some(l) = test_loss {
                    best_loss = l;
                }
                if let Some(path) = &self.config.ckpt_path {
                    info!("saving {}", path.display());
                    self.model.write_json(path)?;
                }
            }

            metrics.epoch_metrics.push(EpochMetrics {
                epoch,
                train_loss,
                test_loss,
                lr,
            });
        }

        Ok(TrainOutput {
            metrics,
            best_loss: best_loss.is_finite().then_some(best_loss),
        })
    }

    /// One pass over the shuffled train set. Returns the mean batch loss and the last rate.
    fn run_epoch(&mut self, epoch: usize, rng: &mut impl Rng) -> Result<(f32, f32)> {
        let mut order: Vec<usize> = (0..self.train_dataset.len()).collect();
        order.shuffle(rng);

        let n_batches = order.len().div_ceil(self.config.batch_size);
        let pb = ProgressBar::new(n_batches as u64);
        pb.set_style(
            ProgressStyle::with_template("[{elapsed_precise}<{eta_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .map_err(|e| Error::InvalidArgument(e.to_string()))?
                .progress_chars("##-"),
        );

        let mut losses = Vec::with_capacity(n_batches);
        let mut lr = learning_rate(&self.config, self.tokens);

        for (it, batch) in order.chunks(self.config.batch_size).enumerate() {
            let (loss_sum, mut grads, n_tokens) = batch_gradients(&self.model, self.train_dataset, batch)?;
            if n_tokens == 0 {
                continue;
            }

            grads.scale(1.0 / n_tokens as f32);
            grads.clip_norm(self.config.grad_norm_clip);

            self.tokens += n_tokens;
            lr = learning_rate(&self.config, self.tokens);
            self.optimizer.step(&mut self.model, &grads, lr, &self.config);

            let loss = loss_sum / n_tokens as f32;
            losses.push(loss);

            pb.set_message(format!("epoch {} iter {}: train loss {:.5}. lr {:e}", epoch + 1, it, loss, lr));
            pb.inc(1);
        }

        pb.finish_and_clear();

        let train_loss = if losses.is_empty() { f32::NAN } else { mean(&losses) };
        Ok((train_loss, lr))
    }
}

/// Summed loss, summed gradients and target count of one batch, evaluated in parallel.
fn batch_gradients<D: TokenDataset>(model: &PixelModel, dataset: &D, batch: &[usize]) -> Result<(f32, Gradients, usize)> {
    batch
        .par_iter()
        .map(|&i| {
            let (input, target) = dataset.get(i)?;
            let (loss, grads) = model.loss_and_grads(&input, &target)?;
            Ok::<_, Error>((loss, grads, target.len()))
        })
        .try_reduce(
            || (0.0, Gradients::zeros(&model.config), 0),
            |a, b| Ok((a.0 + b.0, a.1.add(&b.1), a.2 + b.2)),
        )
}

/// Mean per-token loss of `model` over `dataset`.
pub fn evaluate<D: TokenDataset>(model: &PixelModel, dataset: &D, batch_size: usize) -> Result<f32> {
    let indices: Vec<usize> = (0..dataset.len()).collect();
    let mut loss_sum = 0.0;
    let mut n_tokens = 0;

    for batch in indices.chunks(batch_size.max(1)) {
        let (l, n) = batch
            .par_iter()
            .map(|&i| {
                let (input, target) = dataset.get(i)?;
                Ok::<_, Error>((model.loss(&input, &target)?, target.len()))
            })
            .try_reduce(|| (0.0, 0), |a, b| Ok((a.0 + b.0, a.1 + b.1)))?;
        loss_sum += l;
        n_tokens += n;
    }

    if n_tokens == 0 {
        return Err(Error::InvalidArgument("cannot evaluate on an empty dataset".into()));
    }
    Ok(loss_sum / n_tokens as f32)
}
