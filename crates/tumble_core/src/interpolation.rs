//! Piecewise Lagrange interpolation over a time-keyed table of vectors.
//!
//! Backs the post-propagation ephemerides: the stored state history is dense
//! (one row per accepted integrator step), so a moderate-order local
//! polynomial through the nearest points recovers the continuous trajectory
//! to well below the integration error.

use anyhow::{bail, Result};
use nalgebra::DVector;

/// Number of table points used per interpolated value unless overridden.
pub const DEFAULT_STENCIL_POINTS: usize = 6;

/// Local Lagrange interpolator over an ordered (time, vector) table.
#[derive(Debug, Clone)]
pub struct LagrangeInterpolator {
    times: Vec<f64>,
    values: Vec<DVector<f64>>,
    stencil: usize,
}

impl LagrangeInterpolator {
    /// Creates an interpolator from an ordered table.
    ///
    /// Fails if the table and stencil sizes are inconsistent, if the times
    /// are not strictly increasing, or if the rows differ in dimension.
    pub fn new(times: Vec<f64>, values: Vec<DVector<f64>>, stencil: usize) -> Result<Self> {
        if stencil < 2 {
            bail!("Interpolation stencil must contain at least 2 points.");
        }
        if times.len() != values.len() {
            bail!(
                "Interpolation table size mismatch: {} times, {} values.",
                times.len(),
                values.len()
            );
        }
        if times.len() < stencil {
            bail!(
                "Interpolation table has {} points; stencil needs {}.",
                times.len(),
                stencil
            );
        }
        if times.windows(2).any(|w| w[1] <= w[0]) {
            bail!("Interpolation table times must be strictly increasing.");
        }
        let dimension = values[0].len();
        if values.iter().any(|v| v.len() != dimension) {
            bail!("Interpolation table rows must all have the same dimension.");
        }
        Ok(Self {
            times,
            values,
            stencil,
        })
    }

    /// First epoch in the table.
    pub fn start_time(&self) -> f64 {
        self.times[0]
    }

    /// Last epoch in the table.
    pub fn end_time(&self) -> f64 {
        self.times[self.times.len() - 1]
    }

    /// Dimension of the interpolated vectors.
    pub fn dimension(&self) -> usize {
        self.values[0].len()
    }

    /// Interpolated value at epoch `t`. Behavior outside the table span is
    /// polynomial extrapolation from the nearest stencil and carries no
    /// accuracy guarantee.
    pub fn interpolate(&self, t: f64) -> DVector<f64> {
        let start = self.stencil_start(t);
        let times = &self.times[start..start + self.stencil];
        let values = &self.values[start..start + self.stencil];

        let mut result = DVector::zeros(self.dimension());
        for (i, value) in values.iter().enumerate() {
            let mut weight = 1.0;
            for (j, tj) in times.iter().enumerate() {
                if i != j {
                    weight *= (t - tj) / (times[i] - tj);
                }
            }
            result.axpy(weight, value, 1.0);
        }
        result
    }

    /// Index of the first point of the stencil nearest to `t`, clamped so
    /// that the stencil stays inside the table.
    fn stencil_start(&self, t: f64) -> usize {
        let interval = self.times.partition_point(|&x| x <= t).saturating_sub(1);
        let half = self.stencil / 2;
        interval
            .saturating_sub(half.saturating_sub(1))
            .min(self.times.len() - self.stencil)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_from(f: impl Fn(f64) -> f64, times: &[f64]) -> Vec<DVector<f64>> {
        times.iter().map(|&t| DVector::from_vec(vec![f(t)])).collect()
    }

    #[test]
    fn rejects_malformed_tables() {
        let times = vec![0.0, 1.0, 2.0];
        let values = table_from(|t| t, &times);
        assert!(LagrangeInterpolator::new(times.clone(), values.clone(), 1).is_err());
        assert!(LagrangeInterpolator::new(times.clone(), values[..2].to_vec(), 2).is_err());
        assert!(LagrangeInterpolator::new(times.clone(), values.clone(), 4).is_err());
        assert!(
            LagrangeInterpolator::new(vec![0.0, 2.0, 1.0], values.clone(), 2).is_err(),
            "unordered times must be rejected"
        );
    }

    #[test]
    fn reproduces_polynomial_of_stencil_degree_exactly() {
        let poly = |t: f64| 2.0 - t + 0.5 * t.powi(3) - 0.01 * t.powi(5);
        let times: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let values = table_from(poly, &times);
        let interpolator = LagrangeInterpolator::new(times, values, 6).unwrap();

        for &t in &[0.5, 3.25, 7.9, 10.5] {
            assert!((interpolator.interpolate(t)[0] - poly(t)).abs() < 1e-9);
        }
    }

    #[test]
    fn reproduces_constants_to_rounding() {
        let times: Vec<f64> = (0..20).map(|i| 100.0 + 30.0 * i as f64).collect();
        let values = table_from(|_| 2.2785e-4, &times);
        let interpolator = LagrangeInterpolator::new(times, values, 6).unwrap();

        for &t in &[100.0, 173.0, 400.5, 655.0] {
            assert!((interpolator.interpolate(t)[0] - 2.2785e-4).abs() < 1e-18);
        }
    }

    #[test]
    fn interpolates_slow_sinusoid_accurately() {
        let omega = 2.2785e-4;
        let f = |t: f64| (omega * t).sin();
        let times: Vec<f64> = (0..400).map(|i| 30.0 * i as f64).collect();
        let values = table_from(f, &times);
        let interpolator = LagrangeInterpolator::new(times, values, 6).unwrap();

        let mut t = 15.0;
        while t < 11_000.0 {
            assert!((interpolator.interpolate(t)[0] - f(t)).abs() < 1e-13);
            t += 313.0;
        }
    }

    #[test]
    fn stencil_clamps_at_table_edges() {
        let times: Vec<f64> = (0..6).map(|i| i as f64).collect();
        let values = table_from(|t| t * t, &times);
        let interpolator = LagrangeInterpolator::new(times, values, 4).unwrap();

        assert!((interpolator.interpolate(0.0) - interpolator.interpolate(0.0)).norm() < 1e-15);
        assert!((interpolator.interpolate(0.1)[0] - 0.01).abs() < 1e-12);
        assert!((interpolator.interpolate(4.9)[0] - 24.01).abs() < 1e-12);
    }
}
