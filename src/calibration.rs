//! Empirical Calibration Curves with Monotone Interpolation
//!
//! ## Background
//!
//! The regulator has no analytic model: its pressure response to a control
//! voltage was measured on the bench by stepping the voltage down and back
//! up while logging fused pressure. That dataset becomes a lookup table
//! here, and every setpoint-to-voltage conversion walks that table rather
//! than evaluating a formula. The same machinery serves the fine vacuum
//! gauge, whose datasheet publishes five voltage/pressure reference knots.
//!
//! ## Dedup and Ordering
//!
//! Bench datasets contain repeated voltage entries where the regulator
//! saturated. The loader keeps the **first** occurrence of a repeated
//! voltage and drops the rest - the policy the chamber operations tooling
//! has always used - then sorts both coordinate arrays ascending. Sorting
//! the axes independently is sound because the underlying physical
//! relationship is monotonic increasing; after the sort the pressure axis
//! must be strictly increasing or the dataset is rejected.
//!
//! ## Interpolation
//!
//! Queries between knots interpolate linearly. Queries outside the table
//! domain clamp to the edge knot value - the regulator cannot be commanded
//! past its calibrated range anyway, so extrapolating would only invent
//! physically unrealizable commands. Lookups never fail.
//!
//! A natural cubic spline is also provided for the gauge curve, where five
//! sparse knots across four decades of pressure make piecewise-linear
//! output visibly kinked.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::errors::CalibrationError;

/// Raw calibration table as delivered by the external dataset loader.
///
/// File formats and storage locations are the loader's concern; the core
/// only sees parallel coordinate arrays.
#[derive(Debug, Clone, Default)]
pub struct CalibrationDataset {
    /// Mean fused pressure at each bench step, in kPa.
    pub pressures_kpa: Vec<f32>,
    /// Control voltage commanded at each bench step.
    pub voltages: Vec<f32>,
}

/// Ordered calibration curve: strictly increasing x, monotone y.
///
/// Invariants (enforced at construction):
/// - at least 2 points
/// - x values distinct and sorted ascending
#[derive(Debug, Clone)]
pub struct CalibrationCurve {
    xs: Vec<f32>,
    ys: Vec<f32>,
}

impl CalibrationCurve {
    /// Build a curve from a raw dataset.
    ///
    /// Applies the dedup policy (repeated y keeps the first occurrence),
    /// drops non-finite pairs, sorts both axes ascending, and validates the
    /// interpolation preconditions.
    pub fn from_dataset(dataset: &CalibrationDataset) -> Result<Self, CalibrationError> {
        if dataset.pressures_kpa.len() != dataset.voltages.len() {
            return Err(CalibrationError::AxisMismatch {
                xs: dataset.pressures_kpa.len(),
                ys: dataset.voltages.len(),
            });
        }
        Self::from_points(
            dataset
                .pressures_kpa
                .iter()
                .copied()
                .zip(dataset.voltages.iter().copied()),
        )
    }

    /// Build a curve from (x, y) pairs in measurement order.
    pub fn from_points<I>(points: I) -> Result<Self, CalibrationError>
    where
        I: IntoIterator<Item = (f32, f32)>,
    {
        let mut xs: Vec<f32> = Vec::new();
        let mut ys: Vec<f32> = Vec::new();

        for (x, y) in points {
            if !x.is_finite() || !y.is_finite() {
                continue;
            }
            // First-of-duplicates policy, keyed on the y (voltage) value.
            if ys.iter().any(|&seen| seen == y) {
                continue;
            }
            xs.push(x);
            ys.push(y);
        }

        if xs.len() < 2 {
            return Err(CalibrationError::TooFewPoints { usable: xs.len() });
        }

        xs.sort_by(f32::total_cmp);
        ys.sort_by(f32::total_cmp);

        if xs.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CalibrationError::NotMonotonic);
        }

        Ok(Self { xs, ys })
    }

    /// Number of knots in the table.
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    /// A table never has fewer than two knots.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Knot at `index`, as (x, y).
    pub fn point(&self, index: usize) -> (f32, f32) {
        (self.xs[index], self.ys[index])
    }

    /// y value of the knot at `index`.
    pub fn y_at(&self, index: usize) -> f32 {
        self.ys[index]
    }

    /// Linear interpolation of y at `x`; clamps outside the domain.
    pub fn value_at(&self, x: f32) -> f32 {
        interp_clamped(x, &self.xs, &self.ys)
    }

    /// Inverse query: interpolate x at `y`.
    ///
    /// Valid because both axes are sorted ascending (monotone increasing
    /// relationship). Used to report the set pressure for a read-back
    /// voltage.
    pub fn x_for_y(&self, y: f32) -> f32 {
        interp_clamped(y, &self.ys, &self.xs)
    }

    /// Index of the knot whose x is nearest to `x`.
    pub fn nearest_index(&self, x: f32) -> usize {
        let mut best = 0;
        let mut best_dist = f32::INFINITY;
        for (i, &knot) in self.xs.iter().enumerate() {
            let dist = libm::fabsf(knot - x);
            if dist < best_dist {
                best = i;
                best_dist = dist;
            }
        }
        best
    }
}

/// Linear interpolation over sorted knots, clamped at the edges.
fn interp_clamped(q: f32, xs: &[f32], ys: &[f32]) -> f32 {
    let n = xs.len();
    if q <= xs[0] {
        return ys[0];
    }
    if q >= xs[n - 1] {
        return ys[n - 1];
    }
    // partition_point finds the first knot strictly above q; q is interior
    // here so 1 <= hi <= n-1.
    let hi = xs.partition_point(|&x| x <= q);
    let lo = hi - 1;
    let frac = (q - xs[lo]) / (xs[hi] - xs[lo]);
    ys[lo] + frac * (ys[hi] - ys[lo])
}

/// Natural cubic spline over strictly increasing knots.
///
/// Smooth alternative to piecewise-linear interpolation for the gauge
/// calibration, where five knots span four decades of pressure. Queries
/// outside the knot domain clamp to the edge, matching
/// [`CalibrationCurve::value_at`].
#[derive(Debug, Clone)]
pub struct CubicSpline {
    xs: Vec<f32>,
    ys: Vec<f32>,
    // Per-segment polynomial coefficients: y = ys[j] + b*dx + c*dx^2 + d*dx^3
    b: Vec<f32>,
    c: Vec<f32>,
    d: Vec<f32>,
}

impl CubicSpline {
    /// Fit a natural spline (zero second derivative at the ends).
    pub fn new(xs: &[f32], ys: &[f32]) -> Result<Self, CalibrationError> {
        if xs.len() != ys.len() {
            return Err(CalibrationError::AxisMismatch {
                xs: xs.len(),
                ys: ys.len(),
            });
        }
        let n = xs.len();
        if n < 2 {
            return Err(CalibrationError::TooFewPoints { usable: n });
        }
        if xs.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CalibrationError::NotMonotonic);
        }

        let mut h = Vec::with_capacity(n - 1);
        for i in 0..n - 1 {
            h.push(xs[i + 1] - xs[i]);
        }

        // Tridiagonal solve for the second-derivative coefficients.
        let mut alpha = Vec::new();
        alpha.resize(n, 0.0f32);
        for i in 1..n - 1 {
            alpha[i] =
                3.0 * ((ys[i + 1] - ys[i]) / h[i] - (ys[i] - ys[i - 1]) / h[i - 1]);
        }

        let mut l = Vec::new();
        let mut mu = Vec::new();
        let mut z = Vec::new();
        l.resize(n, 1.0f32);
        mu.resize(n, 0.0f32);
        z.resize(n, 0.0f32);
        for i in 1..n - 1 {
            l[i] = 2.0 * (xs[i + 1] - xs[i - 1]) - h[i - 1] * mu[i - 1];
            mu[i] = h[i] / l[i];
            z[i] = (alpha[i] - h[i - 1] * z[i - 1]) / l[i];
        }

        let mut c = Vec::new();
        c.resize(n, 0.0f32);
        let mut b = Vec::new();
        let mut d = Vec::new();
        b.resize(n - 1, 0.0f32);
        d.resize(n - 1, 0.0f32);
        for j in (0..n - 1).rev() {
            c[j] = z[j] - mu[j] * c[j + 1];
            b[j] = (ys[j + 1] - ys[j]) / h[j] - h[j] * (c[j + 1] + 2.0 * c[j]) / 3.0;
            d[j] = (c[j + 1] - c[j]) / (3.0 * h[j]);
        }
        c.truncate(n - 1);

        Ok(Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            b,
            c,
            d,
        })
    }

    /// Evaluate the spline at `x`, clamped into the knot domain.
    pub fn value_at(&self, x: f32) -> f32 {
        let n = self.xs.len();
        let q = x.clamp(self.xs[0], self.xs[n - 1]);
        let seg = match self.xs.partition_point(|&knot| knot <= q) {
            0 => 0,
            hi => (hi - 1).min(n - 2),
        };
        let dx = q - self.xs[seg];
        self.ys[seg] + self.b[seg] * dx + self.c[seg] * dx * dx + self.d[seg] * dx * dx * dx
    }
}
