//! Embedded Runge-Kutta variable-step integration.
//!
//! An embedded pair evaluates two solutions of neighboring order from the
//! same stage evaluations; their difference is the local error estimate. The
//! step is accepted when the weighted RMS error norm against
//! (atol + rtol * |state|) is at most one, and the next step size follows a
//! safety-factored power law of the norm, clipped to the configured bounds.
//! A proposed step below the minimum while still rejecting is fatal: it
//! signals stiffness or a configuration error, never something to clamp
//! silently.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::traits::DynamicalSystem;

/// Embedded Runge-Kutta coefficient set selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoefficientSet {
    /// Fehlberg 4(5), 6 stages.
    RungeKuttaFehlberg45,
    /// Fehlberg 7(8), 13 stages (NASA TR R-287).
    RungeKuttaFehlberg78,
}

impl CoefficientSet {
    pub fn name(self) -> &'static str {
        match self {
            CoefficientSet::RungeKuttaFehlberg45 => "RKF4(5)",
            CoefficientSet::RungeKuttaFehlberg78 => "RKF7(8)",
        }
    }

    pub(crate) fn tableau(self) -> ButcherTableau {
        match self {
            CoefficientSet::RungeKuttaFehlberg45 => ButcherTableau::rkf45(),
            CoefficientSet::RungeKuttaFehlberg78 => ButcherTableau::rkf78(),
        }
    }
}

/// Butcher tableau of an embedded pair. `b_high` propagates the solution;
/// `b_low` only feeds the error estimate.
pub(crate) struct ButcherTableau {
    pub c: Vec<f64>,
    pub a: Vec<Vec<f64>>,
    pub b_low: Vec<f64>,
    pub b_high: Vec<f64>,
    /// Order used in the step-size power law, 1/(lower order + 1).
    pub control_order: f64,
}

impl ButcherTableau {
    fn rkf45() -> Self {
        Self {
            c: vec![0.0, 1.0 / 4.0, 3.0 / 8.0, 12.0 / 13.0, 1.0, 1.0 / 2.0],
            a: vec![
                vec![],
                vec![1.0 / 4.0],
                vec![3.0 / 32.0, 9.0 / 32.0],
                vec![1932.0 / 2197.0, -7200.0 / 2197.0, 7296.0 / 2197.0],
                vec![439.0 / 216.0, -8.0, 3680.0 / 513.0, -845.0 / 4104.0],
                vec![
                    -8.0 / 27.0,
                    2.0,
                    -3544.0 / 2565.0,
                    1859.0 / 4104.0,
                    -11.0 / 40.0,
                ],
            ],
            b_low: vec![
                25.0 / 216.0,
                0.0,
                1408.0 / 2565.0,
                2197.0 / 4104.0,
                -1.0 / 5.0,
                0.0,
            ],
            b_high: vec![
                16.0 / 135.0,
                0.0,
                6656.0 / 12825.0,
                28561.0 / 56430.0,
                -9.0 / 50.0,
                2.0 / 55.0,
            ],
            control_order: 5.0,
        }
    }

    fn rkf78() -> Self {
        Self {
            c: vec![
                0.0,
                2.0 / 27.0,
                1.0 / 9.0,
                1.0 / 6.0,
                5.0 / 12.0,
                1.0 / 2.0,
                5.0 / 6.0,
                1.0 / 6.0,
                2.0 / 3.0,
                1.0 / 3.0,
                1.0,
                0.0,
                1.0,
            ],
            a: vec![
                vec![],
                vec![2.0 / 27.0],
                vec![1.0 / 36.0, 1.0 / 12.0],
                vec![1.0 / 24.0, 0.0, 1.0 / 8.0],
                vec![5.0 / 12.0, 0.0, -25.0 / 16.0, 25.0 / 16.0],
                vec![1.0 / 20.0, 0.0, 0.0, 1.0 / 4.0, 1.0 / 5.0],
                vec![
                    -25.0 / 108.0,
                    0.0,
                    0.0,
                    125.0 / 108.0,
                    -65.0 / 27.0,
                    125.0 / 54.0,
                ],
                vec![
                    31.0 / 300.0,
                    0.0,
                    0.0,
                    0.0,
                    61.0 / 225.0,
                    -2.0 / 9.0,
                    13.0 / 900.0,
                ],
                vec![
                    2.0,
                    0.0,
                    0.0,
                    -53.0 / 6.0,
                    704.0 / 45.0,
                    -107.0 / 9.0,
                    67.0 / 90.0,
                    3.0,
                ],
                vec![
                    -91.0 / 108.0,
                    0.0,
                    0.0,
                    23.0 / 108.0,
                    -976.0 / 135.0,
                    311.0 / 54.0,
                    -19.0 / 60.0,
                    17.0 / 6.0,
                    -1.0 / 12.0,
                ],
                vec![
                    2383.0 / 4100.0,
                    0.0,
                    0.0,
                    -341.0 / 164.0,
                    4496.0 / 1025.0,
                    -301.0 / 82.0,
                    2133.0 / 4100.0,
                    45.0 / 82.0,
                    45.0 / 164.0,
                    18.0 / 41.0,
                ],
                vec![
                    3.0 / 205.0,
                    0.0,
                    0.0,
                    0.0,
                    0.0,
                    -6.0 / 41.0,
                    -3.0 / 205.0,
                    -3.0 / 41.0,
                    3.0 / 41.0,
                    6.0 / 41.0,
                    0.0,
                ],
                vec![
                    -1777.0 / 4100.0,
                    0.0,
                    0.0,
                    -341.0 / 164.0,
                    4496.0 / 1025.0,
                    -289.0 / 82.0,
                    2193.0 / 4100.0,
                    51.0 / 82.0,
                    33.0 / 164.0,
                    12.0 / 41.0,
                    0.0,
                    1.0,
                ],
            ],
            b_low: vec![
                41.0 / 840.0,
                0.0,
                0.0,
                0.0,
                0.0,
                34.0 / 105.0,
                9.0 / 35.0,
                9.0 / 35.0,
                9.0 / 280.0,
                9.0 / 280.0,
                41.0 / 840.0,
                0.0,
                0.0,
            ],
            b_high: vec![
                0.0,
                0.0,
                0.0,
                0.0,
                0.0,
                34.0 / 105.0,
                9.0 / 35.0,
                9.0 / 35.0,
                9.0 / 280.0,
                9.0 / 280.0,
                0.0,
                41.0 / 840.0,
                41.0 / 840.0,
            ],
            control_order: 8.0,
        }
    }

    pub fn stages(&self) -> usize {
        self.c.len()
    }
}

/// Variable-step integrator configuration. Immutable once integration has
/// started.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntegratorSettings {
    pub initial_time: f64,
    pub initial_step: f64,
    pub coefficients: CoefficientSet,
    pub min_step: f64,
    pub max_step: f64,
    pub relative_tolerance: f64,
    pub absolute_tolerance: f64,
    /// Safety factor applied to the optimal step estimate.
    pub safety_factor: f64,
    /// Maximum step growth factor per accepted step.
    pub max_growth: f64,
    /// Maximum step reduction factor per rejected step.
    pub max_shrink: f64,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            initial_time: 0.0,
            initial_step: 1.0,
            coefficients: CoefficientSet::RungeKuttaFehlberg78,
            min_step: 1e-12,
            max_step: f64::INFINITY,
            relative_tolerance: 1e-12,
            absolute_tolerance: 1e-12,
            safety_factor: 0.9,
            max_growth: 4.0,
            max_shrink: 0.1,
        }
    }
}

impl IntegratorSettings {
    pub fn validate(&self) -> Result<(), IntegrationError> {
        if !(self.min_step > 0.0) || self.min_step > self.max_step {
            return Err(IntegrationError::InvalidSettings(format!(
                "step bounds [{:.3e}, {:.3e}] are not a positive, ordered range",
                self.min_step, self.max_step
            )));
        }
        if !(self.relative_tolerance > 0.0) || !(self.absolute_tolerance > 0.0) {
            return Err(IntegrationError::InvalidSettings(
                "tolerances must be positive".to_string(),
            ));
        }
        if !(self.safety_factor > 0.0 && self.safety_factor <= 1.0) {
            return Err(IntegrationError::InvalidSettings(format!(
                "safety factor {} outside (0, 1]",
                self.safety_factor
            )));
        }
        if !(self.max_shrink > 0.0 && self.max_shrink < 1.0 && self.max_growth > 1.0) {
            return Err(IntegrationError::InvalidSettings(
                "step scale factors must satisfy 0 < max_shrink < 1 < max_growth".to_string(),
            ));
        }
        Ok(())
    }
}

/// Integration failure taxonomy.
#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("invalid integrator settings: {0}")]
    InvalidSettings(String),
    #[error(
        "step size underflow at t = {time}: required step {proposed:.6e} is below the minimum {min_step:.6e}"
    )]
    StepSizeUnderflow {
        time: f64,
        proposed: f64,
        min_step: f64,
    },
    #[error("non-finite state or error estimate at t = {time}")]
    NonFiniteState { time: f64 },
}

/// Step-loop state machine of the integrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegratorPhase {
    Idle,
    Stepping,
    Accepted,
    Rejected,
    Terminated,
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IntegrationStats {
    pub function_evaluations: u64,
    pub accepted_steps: u64,
    pub rejected_steps: u64,
}

/// Embedded Runge-Kutta integrator with adaptive step-size control.
pub struct RungeKuttaVariableStepIntegrator {
    settings: IntegratorSettings,
    tableau: ButcherTableau,
    stages: Vec<DVector<f64>>,
    candidate: DVector<f64>,
    time: f64,
    state: DVector<f64>,
    step: f64,
    phase: IntegratorPhase,
    stats: IntegrationStats,
}

impl RungeKuttaVariableStepIntegrator {
    pub fn new(
        settings: IntegratorSettings,
        initial_state: DVector<f64>,
    ) -> Result<Self, IntegrationError> {
        settings.validate()?;
        let tableau = settings.coefficients.tableau();
        let dim = initial_state.len();
        Ok(Self {
            stages: vec![DVector::zeros(dim); tableau.stages()],
            candidate: DVector::zeros(dim),
            time: settings.initial_time,
            state: initial_state,
            step: settings.initial_step.clamp(settings.min_step, settings.max_step),
            phase: IntegratorPhase::Idle,
            stats: IntegrationStats::default(),
            settings,
            tableau,
        })
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn state(&self) -> &DVector<f64> {
        &self.state
    }

    /// Mutable access to the current state, for post-step fixups owned by
    /// the caller (quaternion renormalization).
    pub fn state_mut(&mut self) -> &mut DVector<f64> {
        &mut self.state
    }

    pub fn current_step(&self) -> f64 {
        self.step
    }

    pub fn phase(&self) -> IntegratorPhase {
        self.phase
    }

    pub fn stats(&self) -> IntegrationStats {
        self.stats
    }

    /// Advances the state by one accepted step, retrying with smaller step
    /// sizes after rejections. On success the integrator is in the
    /// `Accepted` phase; on failure it is `Terminated` and the last accepted
    /// (time, state) pair is retained.
    pub fn perform_step<S: DynamicalSystem>(
        &mut self,
        system: &S,
    ) -> Result<(), IntegrationError> {
        loop {
            self.phase = IntegratorPhase::Stepping;
            let error_norm = self.attempt_step(system);
            if !error_norm.is_finite() {
                self.phase = IntegratorPhase::Terminated;
                return Err(IntegrationError::NonFiniteState { time: self.time });
            }

            if error_norm <= 1.0 {
                self.time += self.step;
                std::mem::swap(&mut self.state, &mut self.candidate);
                self.stats.accepted_steps += 1;
                self.phase = IntegratorPhase::Accepted;
                self.step = self
                    .scaled_step(error_norm)
                    .clamp(self.settings.min_step, self.settings.max_step);
                return Ok(());
            }

            self.stats.rejected_steps += 1;
            self.phase = IntegratorPhase::Rejected;
            let shrunk = self.scaled_step(error_norm);
            log::trace!(
                "step rejected at t = {} (error norm {:.3e}), retrying with h = {:.6e}",
                self.time,
                error_norm,
                shrunk
            );
            if shrunk < self.settings.min_step
                || (self.step <= self.settings.min_step && error_norm > 1.0)
            {
                self.phase = IntegratorPhase::Terminated;
                return Err(IntegrationError::StepSizeUnderflow {
                    time: self.time,
                    proposed: shrunk,
                    min_step: self.settings.min_step,
                });
            }
            self.step = shrunk;
        }
    }

    /// Marks the run complete; further stepping is a logic error.
    pub fn finish(&mut self) {
        self.phase = IntegratorPhase::Terminated;
    }

    /// Evaluates all stages of the embedded pair at the current step size,
    /// writes the high-order solution into `candidate`, and returns the
    /// weighted RMS error norm.
    fn attempt_step<S: DynamicalSystem>(&mut self, system: &S) -> f64 {
        let h = self.step;
        let dim = self.state.len();
        let mut work = DVector::zeros(dim);

        for i in 0..self.tableau.stages() {
            work.copy_from(&self.state);
            for (j, &a_ij) in self.tableau.a[i].iter().enumerate() {
                if a_ij != 0.0 {
                    work.axpy(h * a_ij, &self.stages[j], 1.0);
                }
            }
            let (before, from_i) = self.stages.split_at_mut(i);
            let _ = before;
            system.apply(self.time + self.tableau.c[i] * h, &work, &mut from_i[0]);
            self.stats.function_evaluations += 1;
        }

        self.candidate.copy_from(&self.state);
        let mut low_order = self.state.clone();
        for i in 0..self.tableau.stages() {
            if self.tableau.b_high[i] != 0.0 {
                self.candidate.axpy(h * self.tableau.b_high[i], &self.stages[i], 1.0);
            }
            if self.tableau.b_low[i] != 0.0 {
                low_order.axpy(h * self.tableau.b_low[i], &self.stages[i], 1.0);
            }
        }

        let mut sum = 0.0;
        for i in 0..dim {
            let scale = self.settings.absolute_tolerance
                + self.settings.relative_tolerance
                    * self.state[i].abs().max(self.candidate[i].abs());
            let ratio = (self.candidate[i] - low_order[i]) / scale;
            sum += ratio * ratio;
        }
        (sum / dim as f64).sqrt()
    }

    /// Step size proposed by the controller for the measured error norm,
    /// capped at the maximum step. The accept path additionally floors the
    /// proposal at the minimum step; the reject path must see the raw
    /// proposal to detect underflow.
    fn scaled_step(&self, error_norm: f64) -> f64 {
        let factor = if error_norm == 0.0 {
            self.settings.max_growth
        } else {
            (self.settings.safety_factor * error_norm.powf(-1.0 / self.tableau.control_order))
                .clamp(self.settings.max_shrink, self.settings.max_growth)
        };
        (self.step * factor).min(self.settings.max_step)
    }
}
