
//! Reconstruction quality statistics.

use crate::error::{Error, Result};
use rayon::prelude::*;


/// Quality measures between an original volume and its reconstruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {

    /// Root mean squared pointwise error.
    pub rmse: f64,

    /// Largest absolute pointwise error.
    pub linfty: f64,

    /// Peak signal to noise ratio in decibel,
    /// relative to the value range of the original.
    pub psnr: f64,

    /// Smallest value of the original volume.
    pub min: f64,

    /// Largest value of the original volume.
    pub max: f64,
}


const STRIDE: usize = 4096;

/// Compare a reconstruction against the original, stride-parallel.
/// Both volumes must have the same non-zero length.
pub fn calc_stats(original: &[f32], reconstructed: &[f32]) -> Result<Stats> {
    if original.is_empty() || original.len() != reconstructed.len() {
        return Err(Error::invalid("array lengths"));
    }

    // sum of squared differences and largest difference, one pair per stride
    let partials: Vec<(f64, f64)> = original.par_chunks(STRIDE)
        .zip(reconstructed.par_chunks(STRIDE))
        .map(|(original, reconstructed)| {
            let mut linfty = 0.0_f64;

            let squared_differences = original.iter().zip(reconstructed)
                .map(|(&first, &second)| {
                    let difference = (f64::from(first) - f64::from(second)).abs();
                    linfty = linfty.max(difference);
                    difference * difference
                });

            let sum = kahan_sum(squared_differences);
            (sum, linfty)
        })
        .collect();

    let linfty = partials.iter().map(|&(_, linfty)| linfty).fold(0.0, f64::max);
    let mean_squared = kahan_sum(partials.iter().map(|&(sum, _)| sum)) / original.len() as f64;
    let rmse = mean_squared.sqrt();

    let (min, max) = original.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY),
        |(min, max), &value| {
            let value = f64::from(value);
            (min.min(value), max.max(value))
        }
    );

    let range = max - min;
    let psnr = -10.0 * (mean_squared / (range * range)).log10();

    Ok(Stats { rmse, linfty, psnr, min, max })
}

/// Sum the values while compensating the accumulated floating point error.
pub fn kahan_sum(values: impl IntoIterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut compensation = 0.0;

    for value in values {
        let adjusted = value - compensation;
        let new_sum = sum + adjusted;
        compensation = (new_sum - sum) - adjusted;
        sum = new_sum;
    }

    sum
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_difference(){
        let original = [ 0.0_f32, 1.0, 2.0, 3.0 ];
        let reconstructed = [ 0.0_f32, 1.0, 2.0, 2.0 ];

        let stats = calc_stats(&original, &reconstructed).unwrap();

        assert!((stats.linfty - 1.0).abs() < 1e-12);
        assert!((stats.rmse - 0.5).abs() < 1e-12);
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.max, 3.0);

        // mse = 1/4, range = 3: psnr = -10 log10(1 / 36)
        assert!((stats.psnr - 10.0 * 36.0_f64.log10()).abs() < 1e-9);
    }

    #[test]
    fn mismatched_lengths_are_rejected(){
        assert!(calc_stats(&[ 1.0 ], &[ 1.0, 2.0 ]).is_err());
        assert!(calc_stats(&[], &[]).is_err());
    }

    #[test]
    fn compensated_summation_is_stable(){
        // a naive sum would lose all the small addends
        let values = std::iter::once(1e16_f64)
            .chain(std::iter::repeat(1.0).take(1000))
            .chain(std::iter::once(-1e16));

        assert_eq!(kahan_sum(values), 1000.0);
    }
}
