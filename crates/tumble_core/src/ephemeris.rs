//! Rotational and translational ephemerides.
//!
//! A rotational ephemeris relates two named frames: the base (inertial)
//! frame and the target (body-fixed) frame. The stored quaternion is the
//! rotation to the base frame, i.e. `v_base = q * v_body`; all other queries
//! derive from it and the body-frame angular velocity. Rotation matrix time
//! derivatives are analytic, dR_base/dt = R_base * [w]x; finite differences
//! appear only in tests, as an oracle.

use anyhow::Result;
use nalgebra::{Matrix3, UnitQuaternion, Unit, Vector3, Vector4, Vector6};

use crate::frames::{quaternion_from_vector, skew_symmetric};
use crate::interpolation::{LagrangeInterpolator, DEFAULT_STENCIL_POINTS};

/// Query surface for the orientation history of a body.
///
/// Implementations provide the rotation to the base frame and the angular
/// velocity in the target frame; everything else has a consistent default in
/// terms of those two.
pub trait RotationalEphemeris {
    /// Name of the base (inertial) frame.
    fn base_frame(&self) -> &str;

    /// Name of the target (body-fixed) frame.
    fn target_frame(&self) -> &str;

    /// Quaternion rotating vector components from the target to the base
    /// frame at epoch `t`.
    fn rotation_to_base_frame(&self, t: f64) -> UnitQuaternion<f64>;

    /// Angular velocity of the target frame w.r.t. the base frame, expressed
    /// in target (body-fixed) axes.
    fn angular_velocity_in_target_frame(&self, t: f64) -> Vector3<f64>;

    /// Quaternion rotating vector components from the base to the target
    /// frame at epoch `t`.
    fn rotation_to_target_frame(&self, t: f64) -> UnitQuaternion<f64> {
        self.rotation_to_base_frame(t).inverse()
    }

    /// Angular velocity of the target frame w.r.t. the base frame, expressed
    /// in base axes.
    fn angular_velocity_in_base_frame(&self, t: f64) -> Vector3<f64> {
        self.rotation_to_base_frame(t) * self.angular_velocity_in_target_frame(t)
    }

    /// Analytic time derivative of the rotation matrix to the base frame.
    fn derivative_of_rotation_to_base_frame(&self, t: f64) -> Matrix3<f64> {
        self.rotation_to_base_frame(t).to_rotation_matrix().into_inner()
            * skew_symmetric(&self.angular_velocity_in_target_frame(t))
    }

    /// Analytic time derivative of the rotation matrix to the target frame.
    fn derivative_of_rotation_to_target_frame(&self, t: f64) -> Matrix3<f64> {
        self.derivative_of_rotation_to_base_frame(t).transpose()
    }
}

/// Rotational ephemeris backed by a time-keyed table of 7-component
/// rotational states (quaternion to base frame as (w, x, y, z), then the
/// body-frame angular velocity).
///
/// The interpolated quaternion is renormalized on every query; its norm
/// drifts only by integration and interpolation error, never exactly 1.
pub struct TabulatedRotationalEphemeris {
    interpolator: LagrangeInterpolator,
    base_frame: String,
    target_frame: String,
}

impl TabulatedRotationalEphemeris {
    pub fn new(
        interpolator: LagrangeInterpolator,
        base_frame: impl Into<String>,
        target_frame: impl Into<String>,
    ) -> Self {
        Self {
            interpolator,
            base_frame: base_frame.into(),
            target_frame: target_frame.into(),
        }
    }

    /// Builds the ephemeris from raw (epoch, 7-state) rows.
    pub fn from_history(
        history: &[(f64, Vector7)],
        base_frame: impl Into<String>,
        target_frame: impl Into<String>,
    ) -> Result<Self> {
        let times = history.iter().map(|(t, _)| *t).collect();
        let values = history
            .iter()
            .map(|(_, state)| nalgebra::DVector::from_column_slice(state.as_slice()))
            .collect();
        let stencil = DEFAULT_STENCIL_POINTS.min(history.len());
        Ok(Self::new(
            LagrangeInterpolator::new(times, values, stencil)?,
            base_frame,
            target_frame,
        ))
    }

    /// First epoch covered by the table.
    pub fn start_time(&self) -> f64 {
        self.interpolator.start_time()
    }

    /// Last epoch covered by the table.
    pub fn end_time(&self) -> f64 {
        self.interpolator.end_time()
    }
}

/// 7-component rotational state vector: (q_w, q_x, q_y, q_z, w_x, w_y, w_z).
pub type Vector7 = nalgebra::SVector<f64, 7>;

impl RotationalEphemeris for TabulatedRotationalEphemeris {
    fn base_frame(&self) -> &str {
        &self.base_frame
    }

    fn target_frame(&self) -> &str {
        &self.target_frame
    }

    fn rotation_to_base_frame(&self, t: f64) -> UnitQuaternion<f64> {
        let state = self.interpolator.interpolate(t);
        quaternion_from_vector(&Vector4::new(state[0], state[1], state[2], state[3]))
    }

    fn angular_velocity_in_target_frame(&self, t: f64) -> Vector3<f64> {
        let state = self.interpolator.interpolate(t);
        Vector3::new(state[4], state[5], state[6])
    }
}

/// Closed-form rotational ephemeris: constant-rate rotation about a fixed
/// body axis, starting from a reference orientation at a reference epoch.
/// Used for bodies whose rotation is modeled rather than propagated.
pub struct ConstantRateRotationalEphemeris {
    initial_rotation_to_base: UnitQuaternion<f64>,
    rotation_axis: Unit<Vector3<f64>>,
    rotation_rate: f64,
    reference_epoch: f64,
    base_frame: String,
    target_frame: String,
}

impl ConstantRateRotationalEphemeris {
    pub fn new(
        initial_rotation_to_base: UnitQuaternion<f64>,
        rotation_axis: Unit<Vector3<f64>>,
        rotation_rate: f64,
        reference_epoch: f64,
        base_frame: impl Into<String>,
        target_frame: impl Into<String>,
    ) -> Self {
        Self {
            initial_rotation_to_base,
            rotation_axis,
            rotation_rate,
            reference_epoch,
            base_frame: base_frame.into(),
            target_frame: target_frame.into(),
        }
    }
}

impl RotationalEphemeris for ConstantRateRotationalEphemeris {
    fn base_frame(&self) -> &str {
        &self.base_frame
    }

    fn target_frame(&self) -> &str {
        &self.target_frame
    }

    fn rotation_to_base_frame(&self, t: f64) -> UnitQuaternion<f64> {
        let angle = self.rotation_rate * (t - self.reference_epoch);
        self.initial_rotation_to_base
            * UnitQuaternion::from_axis_angle(&self.rotation_axis, angle)
    }

    fn angular_velocity_in_target_frame(&self, _t: f64) -> Vector3<f64> {
        self.rotation_rate * self.rotation_axis.into_inner()
    }
}

/// Translational ephemeris backed by a time-keyed table of Cartesian
/// (position, velocity) states in the base frame.
pub struct TabulatedEphemeris {
    interpolator: LagrangeInterpolator,
    base_frame: String,
}

impl TabulatedEphemeris {
    pub fn new(interpolator: LagrangeInterpolator, base_frame: impl Into<String>) -> Self {
        Self {
            interpolator,
            base_frame: base_frame.into(),
        }
    }

    /// Builds the ephemeris from raw (epoch, Cartesian state) rows.
    pub fn from_history(history: &[(f64, Vector6<f64>)], base_frame: impl Into<String>) -> Result<Self> {
        let times = history.iter().map(|(t, _)| *t).collect();
        let values = history
            .iter()
            .map(|(_, state)| nalgebra::DVector::from_column_slice(state.as_slice()))
            .collect();
        let stencil = DEFAULT_STENCIL_POINTS.min(history.len());
        Ok(Self::new(
            LagrangeInterpolator::new(times, values, stencil)?,
            base_frame,
        ))
    }

    pub fn base_frame(&self) -> &str {
        &self.base_frame
    }

    /// Cartesian (position, velocity) state at epoch `t`.
    pub fn cartesian_state(&self, t: f64) -> Vector6<f64> {
        let state = self.interpolator.interpolate(t);
        Vector6::from_column_slice(state.as_slice())
    }

    pub fn position(&self, t: f64) -> Vector3<f64> {
        self.cartesian_state(t).fixed_rows::<3>(0).into_owned()
    }

    pub fn velocity(&self, t: f64) -> Vector3<f64> {
        self.cartesian_state(t).fixed_rows::<3>(3).into_owned()
    }

    pub fn start_time(&self) -> f64 {
        self.interpolator.start_time()
    }

    pub fn end_time(&self) -> f64 {
        self.interpolator.end_time()
    }
}
