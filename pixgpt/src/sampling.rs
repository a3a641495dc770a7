use ndarray::Array1;
use ndarray_stats::QuantileExt;
use rand::{
    Rng,
    distr::{Distribution, weighted::WeightedIndex},
    seq::index,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    model::{SequenceModel, softmax},
    sequence::TokenDataset,
};

/// Decoding options for [`sample`]
#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct SampleOptions {
    /// Logits are divided by this before the softmax
    pub temperature: f32,
    /// Keep only the `k` most likely tokens
    pub top_k: Option<usize>,
    /// Draw from the distribution; otherwise take the most likely token
    pub sample: bool,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_k: Some(100),
            sample: true,
        }
    }
}

/// Probability of each token starting a sequence
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct StartDistribution {
    pub probs: Vec<f32>,
}

/// Histogram of the first token over up to `nest` distinct random items, with every count
/// starting at one.
pub fn first_token_distribution<D: TokenDataset>(
    dataset: &D,
    vocab_size: usize,
    nest: usize,
    rng: &mut impl Rng,
) -> Result<StartDistribution> {
    let mut counts = vec![1.0f32; vocab_size];

    for i in index::sample(rng, dataset.len(), nest.min(dataset.len())).into_vec() {
        let (input, _) = dataset.get(i)?;
        let Some(&t) = input.first() else {
            continue;
        };
        if t >= vocab_size {
            return Err(Error::IndexOutOfRange {
                index: t,
                len: vocab_size,
            });
        }
        counts[t] += 1.0;
    }

    let total: f32 = counts.iter().sum();
    Ok(StartDistribution {
        probs: counts.into_iter().map(|c| c / total).collect(),
    })
}

impl StartDistribution {
    /// Draws `n` start tokens with replacement.
    pub fn sample_n(&self, n: usize, rng: &mut impl Rng) -> Result<Vec<usize>> {
        let dist = WeightedIndex::new(&self.probs).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        Ok((0..n).map(|_| dist.sample(rng)).collect())
    }
}

/// Masks every logit below the `k`-th largest with negative infinity. Ties with the `k`-th
/// largest are kept.
pub fn top_k_logits(logits: &mut Array1<f32>, k: usize) {
    if k == 0 || k >= logits.len() {
        return;
    }

    let mut sorted = logits.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let kth = sorted[k - 1];

    logits.mapv_inplace(|v| if v < kth { f32::NEG_INFINITY } else { v });
}

/// Extends `context` by `steps` tokens, one at a time.
///
/// The model sees at most its last `block_size` tokens.
pub fn sample<M: SequenceModel>(
    model: &M,
    context: &[usize],
    steps: usize,
    options: &SampleOptions,
    rng: &mut impl Rng,
) -> Result<Vec<usize>> {
    if context.is_empty() {
        return Err(Error::InvalidArgument("sampling needs at least one context token".into()));
    }
    if options.temperature <= 0.0 {
        return Err(Error::InvalidArgument(format!(
            "temperature must be positive, got {}",
            options.temperature
        )));
    }

    let mut x = context.to_vec();
    x.reserve(steps);

    for _ in 0..steps {
        let start = x.len().saturating_sub(model.block_size());
        let mut logits = model.next_logits(&x[start..])? / options.temperature;

        if let Some(k) = options.top_k {
            top_k_logits(&mut logits, k);
        }

        let probs = softmax(&logits);

        let next = if options.sample {
            WeightedIndex::new(probs.iter())
                .map_err(|e| Error::InvalidArgument(e.to_string()))?
                .sample(rng)
        } else {
            probs.argmax().map_err(|e| Error::InvalidArgument(e.to_string()))?
        };

        x.push(next);
    }

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::TokenSequences;
    use assert_approx_eq::assert_approx_eq;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Always prefers `(last + 1) % vocab`, with a weaker preference for `(last + 2) % vocab`
    struct Counter {
        vocab: usize,
        block: usize,
    }

    impl SequenceModel for Counter {
        fn vocab_size(&self) -> usize {
            self.vocab
        }

        fn block_size(&self) -> usize {
            self.block
        }

        fn next_logits(&self, context: &[usize]) -> Result<Array1<f32>> {
            assert!(!context.is_empty() && context.len() <= self.block);
            let last = *context.last().unwrap();
            let mut logits = Array1::zeros(self.vocab);
            logits[(last + 1) % self.vocab] = 5.0;
            logits[(last + 2) % self.vocab] = 4.0;
            Ok(logits)
        }
    }

    #[test]
    fn greedy_decoding_follows_the_argmax() {
        let model = Counter { vocab: 5, block: 3 };
        let options = SampleOptions {
            sample: false,
            ..Default::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let out = sample(&model, &[3], 6, &options, &mut rng).unwrap();
        assert_eq!(out, vec![3, 4, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn top_1_sampling_equals_greedy() {
        let model = Counter { vocab: 7, block: 4 };
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let greedy = sample(
            &model,
            &[0, 1],
            10,
            &SampleOptions {
                sample: false,
                top_k: None,
                temperature: 1.0,
            },
            &mut rng,
        )
        .unwrap();
        let top1 = sample(
            &model,
            &[0, 1],
            10,
            &SampleOptions {
                sample: true,
                top_k: Some(1),
                temperature: 1.0,
            },
            &mut rng,
        )
        .unwrap();

        assert_eq!(greedy, top1);
    }

    #[test]
    fn sampled_tokens_stay_in_the_top_k() {
        let model = Counter { vocab: 10, block: 5 };
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let options = SampleOptions {
            temperature: 2.0,
            top_k: Some(2),
            sample: true,
        };

        let out = sample(&model, &[0], 200, &options, &mut rng).unwrap();
        assert_eq!(out.len(), 201);
        for pair in out.windows(2) {
            let step = (pair[1] + 10 - pair[0]) % 10;
            assert!(step == 1 || step == 2, "unexpected transition {pair:?}");
        }
    }

    #[test]
    fn rejects_bad_inputs() {
        let model = Counter { vocab: 3, block: 2 };
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        assert!(sample(&model, &[], 2, &SampleOptions::default(), &mut rng).is_err());
        let cold = SampleOptions {
            temperature: 0.0,
            ..Default::default()
        };
        assert!(sample(&model, &[0], 2, &cold, &mut rng).is_err());
    }

    #[test]
    fn top_k_keeps_ties() {
        let mut logits = array![1.0, 3.0, 2.0, 3.0, 0.5];
        top_k_logits(&mut logits, 2);
        assert_eq!(logits, array![f32::NEG_INFINITY, 3.0, f32::NEG_INFINITY, 3.0, f32::NEG_INFINITY]);

        let mut logits = array![1.0, 3.0, 2.0];
        top_k_logits(&mut logits, 2);
        assert_eq!(logits, array![f32::NEG_INFINITY, 3.0, 2.0]);

        let mut unchanged = array![1.0, 2.0];
        top_k_logits(&mut unchanged, 5);
        assert_eq!(unchanged, array![1.0, 2.0]);
    }

    #[test]
    fn first_token_histogram_is_smoothed() {
        let data = TokenSequences {
            sequences: vec![vec![0, 1], vec![0, 2], vec![2, 2], vec![0, 0]],
        };
        let mut rng = ChaCha8Rng::seed_from_u64(4);

        let dist = first_token_distribution(&data, 4, 100, &mut rng).unwrap();
        // counts: [1 + 3, 1, 1 + 1, 1], total 8
        assert_approx_eq!(dist.probs[0], 4.0 / 8.0, 1e-6);
        assert_approx_eq!(dist.probs[1], 1.0 / 8.0, 1e-6);
        assert_approx_eq!(dist.probs[2], 2.0 / 8.0, 1e-6);
        assert_approx_eq!(dist.probs[3], 1.0 / 8.0, 1e-6);

        let starts = dist.sample_n(50, &mut rng).unwrap();
        assert_eq!(starts.len(), 50);
        assert!(starts.iter().all(|&s| s < 4));
    }

    #[test]
    fn first_token_estimate_uses_at_most_nest_items() {
        let data = TokenSequences {
            sequences: vec![vec![1, 0]; 10],
        };
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        let dist = first_token_distribution(&data, 2, 3, &mut rng).unwrap();
        // counts: [1, 1 + 3]
        assert_approx_eq!(dist.probs[1], 4.0 / 5.0, 1e-6);
    }
}
