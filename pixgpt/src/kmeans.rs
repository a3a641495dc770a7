/*! Lloyd-style k-means used to fit the color codebook.
 *
 * Centers start at randomly chosen input vectors. Each iteration assigns every vector to its
 * nearest center, moves each center to the mean of its members, and re-seeds centers that
 * ended up with no members. The iteration count is fixed; there is no convergence check.
 */

use ndarray::{Array2, ArrayView2, Axis};
use rand::{Rng, seq::index};
use tracing::info;

use crate::{
    color::nearest_index,
    error::{Error, Result},
};

/// Fits `ncluster` centers to the rows of `x` in `niter` iterations.
///
/// A center can die in the final iteration too; it is re-seeded like in every other
/// iteration, so the result never contains NaN.
pub fn kmeans(x: ArrayView2<f32>, ncluster: usize, niter: usize, rng: &mut impl Rng) -> Result<Array2<f32>> {
    let n = x.nrows();
    if ncluster == 0 {
        return Err(Error::InvalidArgument("ncluster must be at least 1".into()));
    }
    if n < ncluster {
        return Err(Error::InvalidArgument(format!(
            "need at least {ncluster} vectors to fit {ncluster} clusters, got {n}"
        )));
    }

    let init = index::sample(rng, n, ncluster).into_vec();
    let mut centers = x.select(Axis(0), &init);

    for i in 0..niter {
        let assignments = assign(x, centers.view());
        let (means, counts) = recompute_centers(x, &assignments, ncluster);
        let (reseeded, ndead) = reseed_dead_centers(means, &counts, x, rng);
        centers = reseeded;

        info!("done step {}/{}, re-initialized {} dead clusters", i + 1, niter, ndead);
    }

    Ok(centers)
}

/// Index of the nearest center for every row of `x`.
pub fn assign(x: ArrayView2<f32>, centers: ArrayView2<f32>) -> Vec<usize> {
    x.outer_iter().map(|row| nearest_index(centers, row)).collect()
}

/// Mean of the vectors assigned to each center, and the member count per center.
/// Centers without members come back as rows of NaN.
pub fn recompute_centers(x: ArrayView2<f32>, assignments: &[usize], ncluster: usize) -> (Array2<f32>, Vec<usize>) {
    let mut sums = Array2::<f32>::zeros((ncluster, x.ncols()));
    let mut counts = vec![0usize; ncluster];

    for (row, &k) in x.outer_iter().zip(assignments) {
        let mut sum = sums.row_mut(k);
        sum += &row;
        counts[k] += 1;
    }

    for (mut sum, &count) in sums.outer_iter_mut().zip(&counts) {
        // 0 / 0 leaves the dead center as NaN
        sum /= count as f32;
    }

    (sums, counts)
}

/// Replaces every center with a zero count by a freshly sampled row of `x`.
///
/// The replacement rows are distinct rows of `x`. Returns the updated centers and the number
/// of centers that were re-seeded.
pub fn reseed_dead_centers(
    mut centers: Array2<f32>,
    counts: &[usize],
    x: ArrayView2<f32>,
    rng: &mut impl Rng,
) -> (Array2<f32>, usize) {
    let dead: Vec<usize> = counts
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(k, _)| k)
        .collect();

    if dead.is_empty() {
        return (centers, 0);
    }

    let ndead = dead.len();
    let fresh = index::sample(rng, x.nrows(), ndead.min(x.nrows())).into_vec();

    for (j, &k) in dead.iter().enumerate() {
        // Fewer rows than dead centers only happens with n < ncluster, which `kmeans` rejects
        let src = fresh[j % fresh.len()];
        centers.row_mut(k).assign(&x.row(src));
    }

    (centers, ndead)
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Uniform};

    fn random_points(n: usize, rng: &mut ChaCha8Rng) -> Array2<f32> {
        let dist = Uniform::new(0.0f32, 1.0).unwrap();
        Array2::from_shape_simple_fn((n, 3), || dist.sample(&mut *rng))
    }

    #[test]
    fn returns_k_centers_without_nan() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let x = random_points(1000, &mut rng);

        let centers = kmeans(x.view(), 10, 5, &mut rng).unwrap();

        assert_eq!(centers.dim(), (10, 3));
        assert!(centers.iter().all(|v| !v.is_nan()));

        let groups = assign(x.view(), centers.view()).into_iter().unique().count();
        assert_eq!(groups, 10);
    }

    #[test]
    fn accepts_n_equal_to_k() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let x = random_points(6, &mut rng);

        let centers = kmeans(x.view(), 6, 3, &mut rng).unwrap();
        assert_eq!(centers.nrows(), 6);
        assert!(centers.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn rejects_too_few_vectors() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let x = random_points(3, &mut rng);

        assert!(matches!(kmeans(x.view(), 4, 2, &mut rng), Err(Error::InvalidArgument(_))));
        assert!(matches!(kmeans(x.view(), 0, 2, &mut rng), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn identical_inputs_never_produce_nan() {
        // All centers start on the same point; every center but the first dies each iteration
        let x = Array2::from_elem((20, 3), 5.0f32);
        let mut rng = ChaCha8Rng::seed_from_u64(9);

        let centers = kmeans(x.view(), 3, 4, &mut rng).unwrap();
        assert_eq!(centers, Array2::from_elem((3, 3), 5.0f32));
    }

    #[test]
    fn recompute_marks_empty_centers_as_nan() {
        let x = array![[0.0f32, 0.0, 0.0], [2.0, 2.0, 2.0], [10.0, 10.0, 10.0]];
        let (means, counts) = recompute_centers(x.view(), &[0, 0, 2], 3);

        assert_eq!(counts, vec![2, 0, 1]);
        assert_eq!(means.row(0).to_vec(), vec![1.0, 1.0, 1.0]);
        assert!(means.row(1).iter().all(|v| v.is_nan()));
        assert_eq!(means.row(2).to_vec(), vec![10.0, 10.0, 10.0]);
    }

    #[test]
    fn dead_center_is_replaced_by_an_input_vector() {
        // The second center sits far from every point and attracts nothing after one assignment
        let x = array![[0.0f32, 0.0, 0.0], [1.0, 1.0, 1.0], [2.0, 2.0, 2.0], [3.0, 3.0, 3.0]];
        let centers = array![[1.5f32, 1.5, 1.5], [1000.0, 1000.0, 1000.0]];

        let assignments = assign(x.view(), centers.view());
        assert!(assignments.iter().all(|&a| a == 0));

        let (means, counts) = recompute_centers(x.view(), &assignments, 2);
        assert!(means.row(1).iter().all(|v| v.is_nan()));

        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let (reseeded, ndead) = reseed_dead_centers(means, &counts, x.view(), &mut rng);

        assert_eq!(ndead, 1);
        assert_eq!(reseeded.row(0).to_vec(), vec![1.5, 1.5, 1.5]);
        let replacement = reseeded.row(1);
        assert!(replacement.iter().all(|v| !v.is_nan()));
        assert!(x.outer_iter().any(|row| row == replacement));
    }

    #[test]
    fn reseed_is_a_no_op_without_dead_centers() {
        let x = array![[0.0f32, 0.0, 0.0], [1.0, 1.0, 1.0]];
        let centers = x.clone();
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        let (out, ndead) = reseed_dead_centers(centers.clone(), &[1, 1], x.view(), &mut rng);
        assert_eq!(ndead, 0);
        assert_eq!(out, centers);
    }

    #[test]
    fn same_seed_same_codebook() {
        let mut data_rng = ChaCha8Rng::seed_from_u64(0);
        let x = random_points(200, &mut data_rng);

        let a = kmeans(x.view(), 8, 3, &mut ChaCha8Rng::seed_from_u64(123)).unwrap();
        let b = kmeans(x.view(), 8, 3, &mut ChaCha8Rng::seed_from_u64(123)).unwrap();
        assert_eq!(a, b);
    }
}
