use super::{residual, Estimate};
use crate::EstimateError;
use nalgebra::{Matrix3, Point2, Vector3};
use patchreg_core::Homography;

const MAX_PASSES: usize = 3;
/// Residual RMS (pixels) at which re-weighting stops.
const GOOD_ENOUGH_RMS: f64 = 1.0;

/// Weighted least-squares affinity. Each output coordinate is an independent
/// 3-parameter system sharing one normal matrix. Coordinates are centred on
/// the weighted input centroid for conditioning.
fn fit_weighted(
    input: &[Point2<f64>],
    output: &[Point2<f64>],
    weights: &[f64],
) -> Option<Homography> {
    let wsum: f64 = weights.iter().sum();
    if wsum <= 0.0 {
        return None;
    }
    let (mut mx, mut my) = (0.0, 0.0);
    for (p, &w) in input.iter().zip(weights) {
        mx += w * p.x;
        my += w * p.y;
    }
    mx /= wsum;
    my /= wsum;

    let mut n = Matrix3::<f64>::zeros();
    let mut bu = Vector3::<f64>::zeros();
    let mut bv = Vector3::<f64>::zeros();
    for ((p, q), &w) in input.iter().zip(output).zip(weights) {
        if w <= 0.0 {
            continue;
        }
        let a = Vector3::new(p.x - mx, p.y - my, 1.0);
        n += w * a * a.transpose();
        bu += w * q.x * a;
        bv += w * q.y * a;
    }

    let lu = n.lu();
    let ru = lu.solve(&bu)?;
    let rv = lu.solve(&bv)?;
    if !(ru.iter().chain(rv.iter()).all(|v| v.is_finite())) {
        return None;
    }
    let h = Matrix3::new(
        ru[0],
        ru[1],
        ru[2] - ru[0] * mx - ru[1] * my,
        rv[0],
        rv[1],
        rv[2] - rv[0] * mx - rv[1] * my,
        0.0,
        0.0,
        1.0,
    );
    Some(Homography::new(h))
}

fn is_degenerate(input: &[Point2<f64>], weights: &[f64]) -> bool {
    let active: Vec<&Point2<f64>> = input
        .iter()
        .zip(weights)
        .filter(|(_, w)| **w > 0.0)
        .map(|(p, _)| p)
        .collect();
    if active.len() < 3 {
        return true;
    }
    // All active points on one line?
    let a = active[0];
    let Some(b) = active.iter().find(|p| (**p - a).norm() > 1e-9) else {
        return true;
    };
    let d = *b - a;
    let scale = d.norm();
    active
        .iter()
        .all(|p| (d.x * (p.y - a.y) - d.y * (p.x - a.x)).abs() <= 1e-9 * scale * scale.max(1.0))
}

/// Affinity with iterative outlier re-weighting.
///
/// Up to three passes: fit, compute residual RMS and standard deviation over
/// the active correspondences, stop if RMS is at most one pixel, otherwise
/// zero the weight of every correspondence whose residual exceeds
/// `RMS + std` and refit.
pub fn estimate_affinity(
    input: &[Point2<f64>],
    output: &[Point2<f64>],
) -> Result<Estimate, EstimateError> {
    if input.len() < 3 {
        return Err(EstimateError::TooFew {
            needed: 3,
            got: input.len(),
        });
    }

    let mut weights = vec![1.0f64; input.len()];
    let mut fit = None;
    for pass in 0..MAX_PASSES {
        if is_degenerate(input, &weights) {
            break;
        }
        let Some(h) = fit_weighted(input, output, &weights) else {
            break;
        };
        fit = Some((h, weights.clone()));

        let residuals: Vec<f64> = input
            .iter()
            .zip(output)
            .map(|(&p, &q)| residual(&h, p, q))
            .collect();
        let active: Vec<f64> = residuals
            .iter()
            .zip(&weights)
            .filter(|(_, w)| **w > 0.0)
            .map(|(&r, _)| r)
            .collect();
        let n = active.len() as f64;
        let rms = (active.iter().map(|r| r * r).sum::<f64>() / n).sqrt();
        let mean = active.iter().sum::<f64>() / n;
        let std = (active.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt();
        log::trace!("affinity pass {pass}: rms {rms:.3} std {std:.3} active {}", active.len());

        if rms <= GOOD_ENOUGH_RMS || pass + 1 == MAX_PASSES {
            break;
        }
        let cut = rms + std;
        let mut changed = false;
        for (w, &r) in weights.iter_mut().zip(&residuals) {
            if *w > 0.0 && r > cut {
                *w = 0.0;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let Some((transform, used)) = fit else {
        return Err(EstimateError::Degenerate("collinear or coincident points"));
    };
    let inliers: Vec<usize> = (0..input.len()).filter(|&i| used[i] > 0.0).collect();
    let rms = super::rms_over(&transform, input, output, &inliers);
    Ok(Estimate {
        transform,
        inliers,
        rms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid() -> Vec<Point2<f64>> {
        (0..6)
            .flat_map(|r| (0..6).map(move |c| Point2::new(20.0 + 40.0 * c as f64, 20.0 + 40.0 * r as f64)))
            .collect()
    }

    fn truth() -> Homography {
        Homography::from_array([[0.98, -0.05, 4.0], [0.04, 1.02, -6.0], [0.0, 0.0, 1.0]])
    }

    #[test]
    fn exact_affinity_is_recovered() {
        let input = grid();
        let output: Vec<_> = input.iter().map(|&p| truth().apply(p)).collect();
        let est = estimate_affinity(&input, &output).unwrap();
        assert_relative_eq!(est.transform.h, truth().h, epsilon = 1e-9);
        assert_eq!(est.inliers.len(), input.len());
        assert!(est.rms < 1e-9);
    }

    #[test]
    fn gross_outliers_are_rejected() {
        let input = grid();
        let mut output: Vec<_> = input.iter().map(|&p| truth().apply(p)).collect();
        for (k, i) in [3usize, 11, 20, 31].into_iter().enumerate() {
            output[i].x += 25.0 + 5.0 * k as f64;
            output[i].y -= 18.0;
        }
        let est = estimate_affinity(&input, &output).unwrap();
        for p in [Point2::new(0.0, 0.0), Point2::new(240.0, 240.0)] {
            assert!((est.transform.apply(p) - truth().apply(p)).norm() < 0.5);
        }
        for i in [3usize, 11, 20, 31] {
            assert!(!est.inliers.contains(&i));
        }
    }

    #[test]
    fn collinear_points_are_degenerate() {
        let input: Vec<_> = (0..5).map(|i| Point2::new(i as f64, 2.0 * i as f64)).collect();
        assert!(matches!(
            estimate_affinity(&input, &input),
            Err(EstimateError::Degenerate(_))
        ));
        assert!(matches!(
            estimate_affinity(&input[..2], &input[..2]),
            Err(EstimateError::TooFew { needed: 3, got: 2 })
        ));
    }
}
