//! Write-back of kernel results into the host sample buffer.

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::error::{RenderError, Result};

const MIN_CHUNK: usize = 4096;

/// Copy `results` into `samples` on `pool`, widening to `f64`.
///
/// Lengths are checked before anything is written.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "debug", skip_all))]
pub fn merge_results(pool: &ThreadPool, results: &[f32], samples: &mut [f64]) -> Result<()> {
    if results.len() != samples.len() {
        return Err(RenderError::ResultLength {
            expected: samples.len(),
            actual: results.len(),
        });
    }

    pool.install(|| {
        samples
            .par_iter_mut()
            .zip(results.par_iter())
            .with_min_len(MIN_CHUNK)
            .for_each(|(sample, &value)| *sample = f64::from(value));
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::ThreadPoolBuilder;

    fn pool() -> ThreadPool {
        ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    #[test]
    fn samples_equal_widened_results() {
        let results: Vec<f32> = (0..10_000).map(|i| i as f32 * 0.1).collect();
        let mut samples = vec![0.0_f64; results.len()];
        merge_results(&pool(), &results, &mut samples).unwrap();

        for (sample, result) in samples.iter().zip(&results) {
            assert_eq!(*sample, f64::from(*result));
        }
    }

    #[test]
    fn length_mismatch_writes_nothing() {
        let mut samples = vec![7.0_f64; 6];
        let err = merge_results(&pool(), &[1.0; 3], &mut samples).unwrap_err();

        assert!(matches!(
            err,
            RenderError::ResultLength {
                expected: 6,
                actual: 3
            }
        ));
        assert!(samples.iter().all(|&s| s == 7.0));
    }
}
