use mimalloc::MiMalloc;
use ndarray::{Array1, Array2, ArrayView2, Axis, linalg::general_mat_mul};
use rand::Rng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::{
    constants::INIT_STD,
    error::{Error, Result},
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Shape of a [`PixelModel`]
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ModelConfig {
    /// Number of distinct tokens (codebook size)
    pub vocab_size: usize,
    /// Maximum context length, one less than the pixel count
    pub block_size: usize,
    /// Embedding width
    pub n_embd: usize,
}

/// Anything that can predict the next token of a sequence
pub trait SequenceModel {
    fn vocab_size(&self) -> usize;

    fn block_size(&self) -> usize;

    /// Unnormalized scores for the token following `context`.
    /// `context` must be non-empty and at most `block_size` long.
    fn next_logits(&self, context: &[usize]) -> Result<Array1<f32>>;
}

/// Next-token predictor conditioned on the previous token and the position.
///
/// `h = tanh(tok_emb[x] + pos_emb[p])`, `logits = h . head + head_bias`
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PixelModel {
    pub config: ModelConfig,
    pub tok_emb: Array2<f32>,
    pub pos_emb: Array2<f32>,
    pub head: Array2<f32>,
    pub head_bias: Array1<f32>,
}

impl PixelModel {
    /// Initialize weights with small normal values and a zero bias
    pub fn new(config: ModelConfig, rng: &mut impl Rng) -> Result<Self> {
        if config.vocab_size == 0 || config.block_size == 0 || config.n_embd == 0 {
            return Err(Error::InvalidArgument(format!("model dimensions must be non-zero: {config:?}")));
        }

        let dist = Normal::new(0.0, INIT_STD).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        let mut init = |shape: (usize, usize)| Array2::from_shape_simple_fn(shape, || rng.sample(dist));

        let tok_emb = init((config.vocab_size, config.n_embd));
        let pos_emb = init((config.block_size, config.n_embd));
        let head = init((config.n_embd, config.vocab_size));
        let head_bias = Array1::zeros(config.vocab_size);

        Ok(Self {
            config,
            tok_emb,
            pos_emb,
            head,
            head_bias,
        })
    }

    /// Learned position embeddings, one row per position
    #[inline]
    pub fn positional_embedding(&self) -> ArrayView2<'_, f32> {
        self.pos_emb.view()
    }

    pub fn n_params(&self) -> usize {
        self.tok_emb.len() + self.pos_emb.len() + self.head.len() + self.head_bias.len()
    }

    fn check(&self, token: usize, pos: usize) -> Result<()> {
        if token >= self.config.vocab_size {
            return Err(Error::IndexOutOfRange {
                index: token,
                len: self.config.vocab_size,
            });
        }
        if pos >= self.config.block_size {
            return Err(Error::IndexOutOfRange {
                index: pos,
                len: self.config.block_size,
            });
        }
        Ok(())
    }

    #[inline]
    fn hidden(&self, token: usize, pos: usize) -> Array1<f32> {
        (&self.tok_emb.row(token) + &self.pos_emb.row(pos)).mapv_into(f32::tanh)
    }

    #[inline]
    fn logits(&self, hidden: &Array1<f32>) -> Array1<f32> {
        hidden.dot(&self.head) + &self.head_bias
    }

    fn check_pair(&self, input: &[usize], target: &[usize]) -> Result<()> {
        if input.len() != target.len() {
            return Err(Error::ShapeMismatch {
                expected: input.len(),
                found: target.len(),
            });
        }
        if input.len() > self.config.block_size {
            return Err(Error::ShapeMismatch {
                expected: self.config.block_size,
                found: input.len(),
            });
        }
        Ok(())
    }

    /// Summed cross-entropy of predicting `target[p]` from `input[p]` at every position.
    pub fn loss(&self, input: &[usize], target: &[usize]) -> Result<f32> {
        self.check_pair(input, target)?;

        let mut loss = 0.0;
        for (pos, (&x, &y)) in input.iter().zip(target).enumerate() {
            self.check(x, pos)?;
            self.check(y, 0)?;
            let probs = softmax(&self.logits(&self.hidden(x, pos)));
            loss -= probs[y].max(f32::MIN_POSITIVE).ln();
        }
        Ok(loss)
    }

    /// Summed cross-entropy and its gradient with respect to every parameter.
    pub fn loss_and_grads(&self, input: &[usize], target: &[usize]) -> Result<(f32, Gradients)> {
        self.check_pair(input, target)?;

        let mut grads = Gradients::zeros(&self.config);
        let mut loss = 0.0;

        for (pos, (&x, &y)) in input.iter().zip(target).enumerate() {
            self.check(x, pos)?;
            self.check(y, 0)?;

            let h = self.hidden(x, pos);
            let mut dlogits = softmax(&self.logits(&h));
            loss -= dlogits[y].max(f32::MIN_POSITIVE).ln();
            dlogits[y] -= 1.0;

            general_mat_mul(
                1.0,
                &h.view().insert_axis(Axis(1)),
                &dlogits.view().insert_axis(Axis(0)),
                1.0,
                &mut grads.head,
            );
            grads.head_bias += &dlogits;

            // Back through tanh
            let dpre = self.head.dot(&dlogits) * &h.mapv(|v| 1.0 - v * v);
            grads.tok_emb.row_mut(x).scaled_add(1.0, &dpre);
            grads.pos_emb.row_mut(pos).scaled_add(1.0, &dpre);
        }

        Ok((loss, grads))
    }
}

impl SequenceModel for PixelModel {
    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    fn block_size(&self) -> usize {
        self.config.block_size
    }

    fn next_logits(&self, context: &[usize]) -> Result<Array1<f32>> {
        let Some(&last) = context.last() else {
            return Err(Error::InvalidArgument("context must not be empty".into()));
        };
        let pos = context.len() - 1;
        self.check(last, pos)?;
        Ok(self.logits(&self.hidden(last, pos)))
    }
}

/// Gradient buffers shaped like the parameters of a [`PixelModel`]
#[derive(Clone, Debug)]
pub struct Gradients {
    pub tok_emb: Array2<f32>,
    pub pos_emb: Array2<f32>,
    pub head: Array2<f32>,
    pub head_bias: Array1<f32>,
}

impl Gradients {
    pub fn zeros(config: &ModelConfig) -> Self {
        Self {
            tok_emb: Array2::zeros((config.vocab_size, config.n_embd)),
            pos_emb: Array2::zeros((config.block_size, config.n_embd)),
            head: Array2::zeros((config.n_embd, config.vocab_size)),
            head_bias: Array1::zeros(config.vocab_size),
        }
    }

    pub fn add(mut self, other: &Self) -> Self {
        self.tok_emb += &other.tok_emb;
        self.pos_emb += &other.pos_emb;
        self.head += &other.head;
        self.head_bias += &other.head_bias;
        self
    }

    pub fn scale(&mut self, factor: f32) {
        self.tok_emb *= factor;
        self.pos_emb *= factor;
        self.head *= factor;
        self.head_bias *= factor;
    }

    /// Global L2 norm over all buffers
    pub fn norm(&self) -> f32 {
        let sq = |a: f32, v: &f32| a + v * v;
        (self.tok_emb.fold(0.0, sq) + self.pos_emb.fold(0.0, sq) + self.head.fold(0.0, sq) + self.head_bias.fold(0.0, sq))
            .sqrt()
    }

    /// Rescales so the global norm does not exceed `max_norm`. Returns the norm before clipping.
    pub fn clip_norm(&mut self, max_norm: f32) -> f32 {
        let norm = self.norm();
        if norm > max_norm {
            self.scale(max_norm / (norm + 1e-6));
        }
        norm
    }
}

/// Numerically stable softmax
pub fn softmax(logits: &Array1<f32>) -> Array1<f32> {
    let max = logits.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    let exp = logits.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}
