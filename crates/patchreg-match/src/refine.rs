//! Sub-pixel refinement of one cost surface.
//!
//! The channel-summed surface picks the discrete argmin. Each channel then
//! gets its own local quadratic `z(u) = ½uᵀAu + Bᵀu + C` fitted on the
//! neighbourhood around that argmin, and the per-channel Newton steps are
//! averaged until the step is small, the iteration cap is hit, or the
//! position leaves the sampled neighbourhood.

use crate::{CostSurface, RefineMethod, RefineParams};
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

/// Terminal state of one patch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefineState {
    /// Step norm fell below the convergence threshold (or the match is exact).
    Converged,
    /// Still moving when the iteration cap was reached.
    IterationLimit,
    /// The next step would have left the fitted neighbourhood.
    EarlyStop,
    /// No refinement possible; the discrete offset is returned.
    Fallback,
}

/// Counters of the recoveries that fired during one pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fallbacks {
    /// Argmin too close to the window border to fit a neighbourhood.
    pub saturated: usize,
    /// Negative curvature clipped to zero.
    pub clipped_diagonal: usize,
    /// Indefinite fit; cross term dropped.
    pub dropped_cross_term: usize,
    /// Zero curvature; gradient taken from a 3×3 plane fit.
    pub plane_fit: usize,
    /// Curvature not invertible; unit step along the negative gradient.
    pub singular_step: usize,
    /// Non-finite fit or step discarded.
    pub non_finite: usize,
    pub early_stop: usize,
}

impl Fallbacks {
    pub fn merge(&mut self, other: &Fallbacks) {
        self.saturated += other.saturated;
        self.clipped_diagonal += other.clipped_diagonal;
        self.dropped_cross_term += other.dropped_cross_term;
        self.plane_fit += other.plane_fit;
        self.singular_step += other.singular_step;
        self.non_finite += other.non_finite;
        self.early_stop += other.early_stop;
    }

    pub fn total(&self) -> usize {
        self.saturated
            + self.clipped_diagonal
            + self.dropped_cross_term
            + self.plane_fit
            + self.singular_step
            + self.non_finite
            + self.early_stop
    }
}

/// Refinement result for one patch. Offsets are `(x, y)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Refined {
    pub discrete: (i32, i32),
    pub offset: Vector2<f64>,
    pub state: RefineState,
    pub saturated: bool,
}

/// Index of the smallest finite entry of a row-major `width`-wide surface.
///
/// Ties go to the smallest offset magnitude from the window centre, then to
/// scan order.
pub fn discrete_argmin(summed: &[f32], width: usize, radius_y: usize, radius_x: usize) -> usize {
    let centre = radius_y * width + radius_x;
    let magnitude = |i: usize| {
        let dx = (i % width) as i64 - radius_x as i64;
        let dy = (i / width) as i64 - radius_y as i64;
        dx * dx + dy * dy
    };

    let mut best = centre;
    let mut best_cost = f32::INFINITY;
    let mut best_mag = i64::MAX;
    for (i, &cost) in summed.iter().enumerate() {
        if !cost.is_finite() {
            continue;
        }
        let mag = magnitude(i);
        if cost < best_cost || (cost == best_cost && mag < best_mag) {
            best = i;
            best_cost = cost;
            best_mag = mag;
        }
    }
    best
}

/// Relative magnitude below which fitted coefficients count as zero.
const FIT_NOISE: f64 = 4.0 * f32::EPSILON as f64;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Quadratic {
    a: Matrix2<f64>,
    b: Vector2<f64>,
}

impl Quadratic {
    fn is_flat(&self) -> bool {
        self.a == Matrix2::zeros() && self.b == Vector2::zeros()
    }
}

/// Window sampler centred on the discrete argmin of one channel.
struct Neighbourhood<'a> {
    surface: &'a CostSurface,
    channel: usize,
    iy: usize,
    ix: usize,
}

impl Neighbourhood<'_> {
    #[inline]
    fn z(&self, dx: i32, dy: i32) -> f64 {
        let y = (self.iy as i32 + dy) as usize;
        let x = (self.ix as i32 + dx) as usize;
        self.surface.at(y, x, self.channel) as f64
    }

    /// Closed-form least squares on the `(2r+1)²` grid. With the orthogonal
    /// basis `{1, x, y, xy, x² − m, y² − m}` every coefficient is a single
    /// correlation.
    fn fit_quadratic(&self, r: usize) -> (Quadratic, f64) {
        let ri = r as i32;
        let n = (2 * r + 1) as f64;
        let s2: f64 = (-ri..=ri).map(|v| (v * v) as f64).sum();
        let mean = s2 / n;
        let sp2: f64 = (-ri..=ri).map(|v| ((v * v) as f64 - mean).powi(2)).sum();

        let (mut zx, mut zy, mut zxy, mut zxx, mut zyy) = (0.0, 0.0, 0.0, 0.0, 0.0);
        let mut scale = 0.0f64;
        for dy in -ri..=ri {
            for dx in -ri..=ri {
                let z = self.z(dx, dy);
                scale = scale.max(z.abs());
                let (x, y) = (dx as f64, dy as f64);
                zx += x * z;
                zy += y * z;
                zxy += x * y * z;
                zxx += (x * x - mean) * z;
                zyy += (y * y - mean) * z;
            }
        }

        let axx = 2.0 * zxx / (n * sp2);
        let ayy = 2.0 * zyy / (n * sp2);
        let axy = zxy / (s2 * s2);
        let q = Quadratic {
            a: Matrix2::new(axx, axy, axy, ayy),
            b: Vector2::new(zx / (n * s2), zy / (n * s2)),
        };
        (q, scale)
    }

    /// Gradient of the least-squares plane on the central 3×3 block.
    fn fit_plane(&self) -> Vector2<f64> {
        let (mut zx, mut zy) = (0.0, 0.0);
        for dy in -1..=1 {
            for dx in -1..=1 {
                let z = self.z(dx, dy);
                zx += dx as f64 * z;
                zy += dy as f64 * z;
            }
        }
        Vector2::new(zx / 6.0, zy / 6.0)
    }

    fn regularized(&self, r: usize, fallbacks: &mut Fallbacks) -> Quadratic {
        let (mut q, scale) = self.fit_quadratic(r);
        if !q.a.iter().chain(q.b.iter()).all(|v| v.is_finite()) {
            fallbacks.non_finite += 1;
            return Quadratic {
                a: Matrix2::zeros(),
                b: Vector2::zeros(),
            };
        }
        // Costs are stored as f32; anything below this is rounding noise.
        let tol = FIT_NOISE * scale;
        for d in 0..2 {
            if q.a[(d, d)] < -tol {
                fallbacks.clipped_diagonal += 1;
            }
            if q.a[(d, d)] <= tol {
                q.a[(d, d)] = 0.0;
            }
        }
        if q.a.determinant() < 0.0 {
            q.a[(0, 1)] = 0.0;
            q.a[(1, 0)] = 0.0;
            fallbacks.dropped_cross_term += 1;
        }
        if q.a[(0, 0)] == 0.0 || q.a[(1, 1)] == 0.0 {
            q.a = Matrix2::zeros();
            q.b = self.fit_plane();
            fallbacks.plane_fit += 1;
        }
        for v in q.b.iter_mut() {
            if v.abs() <= tol {
                *v = 0.0;
            }
        }
        q
    }
}

fn channel_step(
    q: &Quadratic,
    u: &Vector2<f64>,
    params: &RefineParams,
    fallbacks: &mut Fallbacks,
) -> Vector2<f64> {
    let g = q.a * u + q.b;
    let step = match params.method {
        RefineMethod::GradientDescent => -params.step_scale * g,
        RefineMethod::Newton => match q.a.try_inverse() {
            Some(inv) => -params.step_scale * (inv * g),
            None => {
                fallbacks.singular_step += 1;
                let norm = g.norm();
                if norm > 0.0 {
                    -g / norm
                } else {
                    Vector2::zeros()
                }
            }
        },
    };

    if !(step.x.is_finite() && step.y.is_finite()) {
        fallbacks.non_finite += 1;
        return Vector2::zeros();
    }
    let norm = step.norm();
    if norm > params.max_step {
        step * (params.max_step / norm)
    } else {
        step
    }
}

/// Refine the discrete argmin of `surface` to sub-pixel precision.
///
/// Recoveries are added to `fallbacks`; this function never fails and never
/// returns a non-finite offset.
pub fn refine_surface(
    surface: &CostSurface,
    params: &RefineParams,
    fallbacks: &mut Fallbacks,
) -> Refined {
    let summed = surface.summed();
    let (h, w) = (surface.height(), surface.width());
    let idx = discrete_argmin(&summed, w, surface.radius_y, surface.radius_x);
    let (iy, ix) = (idx / w, idx % w);
    let discrete = (
        ix as i32 - surface.radius_x as i32,
        iy as i32 - surface.radius_y as i32,
    );
    let base = Vector2::new(discrete.0 as f64, discrete.1 as f64);
    let r = params.neighborhood.radius();

    if iy < r || ix < r || iy + r >= h || ix + r >= w {
        fallbacks.saturated += 1;
        log::debug!("argmin {discrete:?} saturates the search window");
        return Refined {
            discrete,
            offset: base,
            state: RefineState::Fallback,
            saturated: true,
        };
    }
    if summed[idx] == 0.0 {
        return Refined {
            discrete,
            offset: base,
            state: RefineState::Converged,
            saturated: false,
        };
    }

    let mut local = Fallbacks::default();
    let quads: Vec<Quadratic> = (0..surface.channels)
        .map(|channel| {
            Neighbourhood {
                surface,
                channel,
                iy,
                ix,
            }
            .regularized(r, &mut local)
        })
        .filter(|q| !q.is_flat())
        .collect();

    let mut u = Vector2::zeros();
    let mut state = if quads.is_empty() {
        RefineState::Converged
    } else {
        RefineState::IterationLimit
    };
    let limit = r as f64;
    for _ in 0..params.iterations {
        if quads.is_empty() {
            break;
        }
        let mut step = Vector2::zeros();
        for q in &quads {
            step += channel_step(q, &u, params, &mut local);
        }
        step /= quads.len() as f64;

        let next = u + step;
        if next.x.abs() > limit || next.y.abs() > limit {
            local.early_stop += 1;
            state = RefineState::EarlyStop;
            break;
        }
        u = next;
        if step.norm() < params.convergence {
            state = RefineState::Converged;
            break;
        }
    }

    if local.total() > 0 {
        log::debug!("argmin {discrete:?}: refinement fallbacks {local:?}");
    }
    fallbacks.merge(&local);

    Refined {
        discrete,
        offset: base + u,
        state,
        saturated: false,
    }
}
