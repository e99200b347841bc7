use super::{residual, rms_over, Estimate};
use crate::EstimateError;
use nalgebra::Point2;
use patchreg_core::{estimate_homography, homography_from_4pt, Homography};
use patchreg_match::EstimatorParams;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

const SAMPLE_SIZE: usize = 4;
/// Minimal samples with three points closer to a line than this (as the sine
/// of the angle they span) are skipped.
const MIN_SAMPLE_SINE: f64 = 1e-2;

/// Floyd's sampling without replacement.
fn sample_indices<R: Rng>(rng: &mut R, n: usize, out: &mut [usize; SAMPLE_SIZE]) {
    let mut len = 0;
    for j in (n - SAMPLE_SIZE)..n {
        let t = rng.random_range(0..=j);
        out[len] = if out[..len].contains(&t) { j } else { t };
        len += 1;
    }
}

fn nearly_collinear(a: Point2<f64>, b: Point2<f64>, c: Point2<f64>) -> bool {
    let u = b - a;
    let v = c - a;
    let scale = u.norm() * v.norm();
    scale <= f64::EPSILON || (u.x * v.y - u.y * v.x).abs() <= MIN_SAMPLE_SINE * scale
}

fn is_degenerate_sample(p: &[Point2<f64>; SAMPLE_SIZE]) -> bool {
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    TRIPLES
        .iter()
        .any(|t| nearly_collinear(p[t[0]], p[t[1]], p[t[2]]))
}

/// Iterations needed to draw one all-inlier sample with `confidence`.
fn adaptive_iterations(inlier_ratio: f64, confidence: f64) -> usize {
    if inlier_ratio >= 1.0 {
        return 1;
    }
    if inlier_ratio <= 0.0 {
        return usize::MAX;
    }
    let w_n = inlier_ratio.powi(SAMPLE_SIZE as i32);
    let log_outlier = (1.0 - w_n).ln();
    if log_outlier >= 0.0 {
        return usize::MAX;
    }
    ((1.0 - confidence).ln() / log_outlier).ceil().max(1.0) as usize
}

fn inliers_of(
    h: &Homography,
    input: &[Point2<f64>],
    output: &[Point2<f64>],
    threshold: f64,
) -> Vec<usize> {
    (0..input.len())
        .filter(|&i| residual(h, input[i], output[i]) < threshold)
        .collect()
}

/// Seeded RANSAC over minimal 4-point samples, then a normalized-DLT refit
/// on the consensus set.
pub fn estimate_homography_ransac(
    input: &[Point2<f64>],
    output: &[Point2<f64>],
    params: &EstimatorParams,
) -> Result<Estimate, EstimateError> {
    let n = input.len();
    if n < SAMPLE_SIZE {
        return Err(EstimateError::TooFew {
            needed: SAMPLE_SIZE,
            got: n,
        });
    }

    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let mut best: Option<(Homography, Vec<usize>)> = None;
    let mut needed = params.max_iterations;
    let mut idx = [0usize; SAMPLE_SIZE];
    let mut iterations = 0;

    while iterations < needed.min(params.max_iterations) {
        iterations += 1;
        sample_indices(&mut rng, n, &mut idx);
        let src = idx.map(|i| input[i]);
        let dst = idx.map(|i| output[i]);
        if is_degenerate_sample(&src) || is_degenerate_sample(&dst) {
            continue;
        }
        let Some(h) = homography_from_4pt(&src, &dst) else {
            continue;
        };

        let inliers = inliers_of(&h, input, output, params.reprojection_threshold);
        if best.as_ref().is_none_or(|(_, b)| inliers.len() > b.len()) {
            needed = adaptive_iterations(inliers.len() as f64 / n as f64, params.confidence);
            best = Some((h, inliers));
        }
    }

    let Some((sample_h, sample_inliers)) = best else {
        return Err(EstimateError::Degenerate("every minimal sample was degenerate"));
    };
    if sample_inliers.len() < SAMPLE_SIZE {
        return Err(EstimateError::Degenerate("no consensus set of four points"));
    }

    let refit = {
        let src: Vec<_> = sample_inliers.iter().map(|&i| input[i]).collect();
        let dst: Vec<_> = sample_inliers.iter().map(|&i| output[i]).collect();
        estimate_homography(&src, &dst)
    };
    let (transform, inliers) = match refit {
        Some(h) => {
            let inliers = inliers_of(&h, input, output, params.reprojection_threshold);
            if inliers.len() >= sample_inliers.len() {
                (h, inliers)
            } else {
                (sample_h, sample_inliers)
            }
        }
        None => (sample_h, sample_inliers),
    };

    let rms = rms_over(&transform, input, output, &inliers);
    log::debug!(
        "ransac: {} / {} inliers after {} iterations, rms {:.3}",
        inliers.len(),
        n,
        iterations,
        rms
    );
    Ok(Estimate {
        transform,
        inliers,
        rms,
    })
}
