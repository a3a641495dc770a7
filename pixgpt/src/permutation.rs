use rand::{Rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Fixed reordering of pixel positions.
///
/// Encoding reads `seq[j] = pixels[perm[j]]`; decoding writes the values back to the
/// positions they came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct Permutation {
    indices: Vec<usize>,
}

impl TryFrom<Vec<usize>> for Permutation {
    type Error = Error;

    fn try_from(indices: Vec<usize>) -> Result<Self> {
        Self::from_vec(indices)
    }
}

impl From<Permutation> for Vec<usize> {
    fn from(perm: Permutation) -> Self {
        perm.indices
    }
}

impl Permutation {
    pub fn identity(n: usize) -> Self {
        Self {
            indices: (0..n).collect(),
        }
    }

    pub fn random(n: usize, rng: &mut impl Rng) -> Self {
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(rng);
        Self { indices }
    }

    /// Validates that `indices` is a bijection on `0..indices.len()`.
    pub fn from_vec(indices: Vec<usize>) -> Result<Self> {
        let n = indices.len();
        let mut seen = vec![false; n];
        for &i in &indices {
            if i >= n {
                return Err(Error::InvalidPermutation(format!("index {i} out of range for length {n}")));
            }
            if seen[i] {
                return Err(Error::InvalidPermutation(format!("index {i} appears more than once")));
            }
            seen[i] = true;
        }
        Ok(Self { indices })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    #[inline]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// The inverse permutation (argsort of the indices)
    pub fn inverse(&self) -> Self {
        let mut inv = vec![0; self.indices.len()];
        for (j, &i) in self.indices.iter().enumerate() {
            inv[i] = j;
        }
        Self { indices: inv }
    }

    /// Reorders `values` into sequence order.
    pub fn apply<T: Clone>(&self, values: &[T]) -> Result<Vec<T>> {
        self.check_len(values.len())?;
        Ok(self.indices.iter().map(|&i| values[i].clone()).collect())
    }

    /// Puts sequence-ordered `values` back into their original positions.
    pub fn unapply<T: Clone>(&self, values: &[T]) -> Result<Vec<T>> {
        self.check_len(values.len())?;
        self.inverse().apply(values)
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.indices.len() {
            return Err(Error::ShapeMismatch {
                expected: self.indices.len(),
                found: len,
            });
        }
        Ok(())
    }
}
