// Copyright 2023 Mikael Lund
//
// Licensed under the Apache license, version 2.0 (the "license");
// you may not use this file except in compliance with the license.
// You may obtain a copy of the license at
//
//     http://www.apache.org/licenses/license-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the license is distributed on an "as is" basis,
// without warranties or conditions of any kind, either express or implied.
// See the license for the specific language governing permissions and
// limitations under the license.

//! Cubic spline interpolation over tabulated knots with precomputed second derivatives.
//!
//! For the bracketing knots `(x_i, y_i, y''_i)` and `(x_{i+1}, y_{i+1}, y''_{i+1})`:
//! ```text
//! h = x_{i+1} - x_i
//! a = (x_{i+1} - x) / h,  b = 1 - a
//! y(x) = a·y_i + b·y_{i+1} + ((a³ - a)·y''_i + (b³ - b)·y''_{i+1})·h²/6
//! ```
//! The weight `a` is clamped to `[0, 1]`, so queries outside the bracket return
//! the boundary knot value. At `x = x_i` the weights are exactly `a = 1, b = 0`
//! and the stored `y_i` comes back unchanged, whatever the second derivatives.
//!
//! Three storage patterns are supported, all reducing to [`cubic_spline`]:
//!
//! | packing | x | y | y'' |
//! |---|---|---|---|
//! | separate | `xs[idx*step]` | `ys[idx]` | `sds[idx]` |
//! | pairs | `xs[idx]` | `ysd[2*idx]` | `ysd[2*idx+1]` |
//! | triples | `data[3*idx]` | `data[3*idx+1]` | `data[3*idx+2]` |

use crate::grid::LogGrid;
use wide::f64x4;

const ONE_SIXTH: f64 = 1.0 / 6.0;

/// One spline knot: abscissa, value, and second derivative
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Knot {
    pub x: f64,
    pub y: f64,
    pub sd: f64,
}

/// Evaluate the cubic spline between two knots
#[inline(always)]
pub fn cubic_spline(lo: Knot, hi: Knot, x: f64) -> f64 {
    let h = hi.x - lo.x;
    debug_assert!(h > 0.0, "knots must be strictly increasing");
    let a = num::clamp((hi.x - x) / h, 0.0, 1.0);
    let b = 1.0 - a;
    a * lo.y + b * hi.y + ((a * a * a - a) * lo.sd + (b * b * b - b) * hi.sd) * (h * h * ONE_SIXTH)
}

/// Separate arrays for knots, values and second derivatives.
///
/// The knots may be strided (`x_step > 1`) when they are embedded in a larger
/// record, e.g. range values interleaved with their second derivatives.
#[inline]
pub fn spline_separate(xs: &[f64], x_step: usize, ys: &[f64], sds: &[f64], x: f64, idx: usize) -> f64 {
    let lo = Knot {
        x: xs[idx * x_step],
        y: ys[idx],
        sd: sds[idx],
    };
    let hi = Knot {
        x: xs[(idx + 1) * x_step],
        y: ys[idx + 1],
        sd: sds[idx + 1],
    };
    cubic_spline(lo, hi, x)
}

/// Knots in `xs`; values and second derivatives interleaved pairwise in `ysd`.
///
/// This is also the resolved-bin evaluator used by energy-loss lookups, where
/// range and dE/dx share one bin index.
#[inline]
pub fn spline_pairs(xs: &[f64], ysd: &[f64], x: f64, idx: usize) -> f64 {
    let lo = Knot {
        x: xs[idx],
        y: ysd[2 * idx],
        sd: ysd[2 * idx + 1],
    };
    let hi = Knot {
        x: xs[idx + 1],
        y: ysd[2 * idx + 2],
        sd: ysd[2 * idx + 3],
    };
    cubic_spline(lo, hi, x)
}

/// Knots, values and second derivatives interleaved triple-wise in `data`
#[inline]
pub fn spline_triples(data: &[f64], x: f64, idx: usize) -> f64 {
    let k = &data[3 * idx..3 * idx + 6];
    let lo = Knot {
        x: k[0],
        y: k[1],
        sd: k[2],
    };
    let hi = Knot {
        x: k[3],
        y: k[4],
        sd: k[5],
    };
    cubic_spline(lo, hi, x)
}

/// [`spline_separate`] over a log-spaced grid, resolving the bin first
#[inline]
pub fn spline_log_separate(grid: &LogGrid, xs: &[f64], ys: &[f64], sds: &[f64], x: f64) -> f64 {
    spline_separate(xs, 1, ys, sds, x, grid.bin_index(x))
}

/// [`spline_pairs`] over a log-spaced grid, resolving the bin first
#[inline]
pub fn spline_log_pairs(grid: &LogGrid, xs: &[f64], ysd: &[f64], x: f64) -> f64 {
    spline_pairs(xs, ysd, x, grid.bin_index(x))
}

/// [`spline_triples`] over a log-spaced grid, resolving the bin first
#[inline]
pub fn spline_log_triples(grid: &LogGrid, data: &[f64], x: f64) -> f64 {
    spline_triples(data, x, grid.bin_index(x))
}

// ============================================================================
// Four-lane evaluation
// ============================================================================

/// Knots of four independent lanes
#[derive(Clone, Copy, Debug)]
pub struct KnotX4 {
    pub x: f64x4,
    pub y: f64x4,
    pub sd: f64x4,
}

/// [`cubic_spline`] on four lanes at once.
///
/// Operations are performed in the same order as the scalar version, so each lane
/// reproduces the scalar result.
#[inline(always)]
pub fn cubic_spline_x4(lo: KnotX4, hi: KnotX4, x: f64x4) -> f64x4 {
    let one = f64x4::splat(1.0);
    let h = hi.x - lo.x;
    let a = ((hi.x - x) / h).max(f64x4::ZERO).min(one);
    let b = one - a;
    a * lo.y
        + b * hi.y
        + ((a * a * a - a) * lo.sd + (b * b * b - b) * hi.sd) * (h * h * f64x4::splat(ONE_SIXTH))
}

/// Second derivatives of the natural cubic spline through `(xs, ys)`.
///
/// The end-point second derivatives are zero. Requires at least two strictly
/// increasing knots; this is checked by the table constructors that call it.
pub fn second_derivatives(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    assert_eq!(xs.len(), ys.len(), "xs and ys must have equal length");
    let n = xs.len();
    let mut sd = vec![0.0; n];
    if n < 3 {
        return sd;
    }
    let mut u = vec![0.0; n - 1];
    // forward sweep of the tridiagonal system
    for i in 1..n - 1 {
        let sig = (xs[i] - xs[i - 1]) / (xs[i + 1] - xs[i - 1]);
        let p = sig * sd[i - 1] + 2.0;
        sd[i] = (sig - 1.0) / p;
        let slope_diff =
            (ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i]) - (ys[i] - ys[i - 1]) / (xs[i] - xs[i - 1]);
        u[i] = (6.0 * slope_diff / (xs[i + 1] - xs[i - 1]) - sig * u[i - 1]) / p;
    }
    for k in (0..n - 2).rev() {
        sd[k + 1] = sd[k + 1] * sd[k + 2] + u[k + 1];
    }
    sd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridConfig;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Same logical data in all three packings
    struct Packed {
        xs: Vec<f64>,
        ys: Vec<f64>,
        sds: Vec<f64>,
        pairs: Vec<f64>,
        triples: Vec<f64>,
    }

    fn packed(xs: Vec<f64>, ys: Vec<f64>) -> Packed {
        let sds = second_derivatives(&xs, &ys);
        let pairs = ys.iter().zip(&sds).flat_map(|(y, s)| [*y, *s]).collect();
        let triples = xs
            .iter()
            .zip(&ys)
            .zip(&sds)
            .flat_map(|((x, y), s)| [*x, *y, *s])
            .collect();
        Packed {
            xs,
            ys,
            sds,
            pairs,
            triples,
        }
    }

    fn curve() -> Packed {
        let xs = GridConfig::default().with_range(1.0, 1.0e4).with_n_points(30).knots();
        let ys = xs.iter().map(|x| x.ln() * x.sqrt() + 3.0).collect();
        packed(xs, ys)
    }

    #[test]
    fn test_exact_at_knots() {
        let p = curve();
        for i in 0..p.xs.len() - 1 {
            let x = p.xs[i];
            assert_eq!(spline_separate(&p.xs, 1, &p.ys, &p.sds, x, i), p.ys[i]);
            assert_eq!(spline_pairs(&p.xs, &p.pairs, x, i), p.ys[i]);
            assert_eq!(spline_triples(&p.triples, x, i), p.ys[i]);
            let x = p.xs[i + 1];
            assert_eq!(spline_separate(&p.xs, 1, &p.ys, &p.sds, x, i), p.ys[i + 1]);
            assert_eq!(spline_pairs(&p.xs, &p.pairs, x, i), p.ys[i + 1]);
            assert_eq!(spline_triples(&p.triples, x, i), p.ys[i + 1]);
        }
    }

    #[test]
    fn test_packings_agree_bitwise() {
        let p = curve();
        let grid = LogGrid::from_knots(&p.xs).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let x = rng.random_range(0.5..2.0e4);
            let a = spline_log_separate(&grid, &p.xs, &p.ys, &p.sds, x);
            let b = spline_log_pairs(&grid, &p.xs, &p.pairs, x);
            let c = spline_log_triples(&grid, &p.triples, x);
            assert_eq!(a.to_bits(), b.to_bits());
            assert_eq!(a.to_bits(), c.to_bits());
        }
    }

    #[test]
    fn test_strided_knots() {
        let p = curve();
        // knots interleaved with junk, as range values are in an energy-loss record
        let strided: Vec<f64> = p.xs.iter().flat_map(|x| [*x, f64::NAN]).collect();
        for i in 0..p.xs.len() - 1 {
            let x = 0.3 * p.xs[i] + 0.7 * p.xs[i + 1];
            assert_eq!(
                spline_separate(&strided, 2, &p.ys, &p.sds, x, i),
                spline_separate(&p.xs, 1, &p.ys, &p.sds, x, i)
            );
        }
    }

    #[test]
    fn test_zero_curvature_is_linear() {
        let xs = [1.0, 10.0, 100.0];
        let ys = [2.0, 4.0, 8.0];
        let sds = [0.0; 3];
        let x = 10.0_f64.sqrt();
        let y = spline_separate(&xs, 1, &ys, &sds, x, 0);
        assert_relative_eq!(y, 2.0 + 2.0 * (x - 1.0) / 9.0, epsilon = 1e-14);
        assert!(y > 2.0 && y < 4.0);
    }

    #[test]
    fn test_flat_extrapolation() {
        let p = curve();
        let n = p.xs.len();
        let grid = LogGrid::from_knots(&p.xs).unwrap();
        assert_eq!(spline_log_triples(&grid, &p.triples, 0.1), p.ys[0]);
        assert_eq!(spline_log_triples(&grid, &p.triples, 1.0e9), p.ys[n - 1]);
        assert_eq!(spline_log_pairs(&grid, &p.xs, &p.pairs, 0.1), p.ys[0]);
    }

    #[test]
    fn test_natural_spline_reproduces_cubic_interior() {
        // natural spline of a straight line has zero curvature everywhere
        let xs: Vec<f64> = (0..10).map(|i| 1.0 + i as f64 * 0.5).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 3.0 * x - 1.0).collect();
        let sd = second_derivatives(&xs, &ys);
        for s in sd {
            assert_relative_eq!(s, 0.0, epsilon = 1e-12);
        }
        // and a smooth curve is well approximated between knots
        let xs: Vec<f64> = (0..200).map(|i| 0.1 + i as f64 * 0.05).collect();
        let ys: Vec<f64> = xs.iter().map(|x| x.sin()).collect();
        let sd = second_derivatives(&xs, &ys);
        for i in 20..180 {
            let x = 0.5 * (xs[i] + xs[i + 1]);
            let y = spline_separate(&xs, 1, &ys, &sd, x, i);
            assert_relative_eq!(y, x.sin(), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_four_lanes_match_scalar() {
        let p = curve();
        let grid = LogGrid::from_knots(&p.xs).unwrap();
        let xs = [0.2, 3.7, 512.0, 3.0e4];
        let idx = xs.map(|x| grid.bin_index(x));
        let lanes = |f: &dyn Fn(usize) -> f64| f64x4::from([f(0), f(1), f(2), f(3)]);
        let knot = |offset: usize| KnotX4 {
            x: lanes(&|l| p.xs[idx[l] + offset]),
            y: lanes(&|l| p.ys[idx[l] + offset]),
            sd: lanes(&|l| p.sds[idx[l] + offset]),
        };
        let result: [f64; 4] = cubic_spline_x4(knot(0), knot(1), f64x4::from(xs)).into();
        for l in 0..4 {
            let scalar = spline_separate(&p.xs, 1, &p.ys, &p.sds, xs[l], idx[l]);
            assert_relative_eq!(result[l], scalar, max_relative = 1e-14);
        }
    }

    #[test]
    fn test_two_knots() {
        let sd = second_derivatives(&[1.0, 2.0], &[5.0, 7.0]);
        assert_eq!(sd, vec![0.0, 0.0]);
    }
}
