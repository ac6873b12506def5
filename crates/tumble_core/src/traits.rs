use nalgebra::{DVector, UnitQuaternion, Vector3};

/// A set of first-order ordinary differential equations dy/dt = f(t, y).
///
/// This is the seam between the state derivative models and the numerical
/// integrator: the integrator only ever sees a flat state vector and a
/// derivative evaluation, never the physical meaning of the components.
pub trait DynamicalSystem {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the state derivative.
    /// t: current time
    /// x: current state
    /// out: buffer to write dy/dt into
    fn apply(&self, t: f64, x: &DVector<f64>, out: &mut DVector<f64>);
}

/// Translational state of a body at one stage evaluation, in inertial axes.
#[derive(Debug, Clone, Copy)]
pub struct TranslationalStage {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
}

/// Rotational state of a body at one stage evaluation. The orientation maps
/// body-fixed vectors to the base (inertial) frame; the angular velocity is
/// expressed in body-fixed axes.
#[derive(Debug, Clone, Copy)]
pub struct RotationalStage {
    pub orientation: UnitQuaternion<f64>,
    pub angular_velocity: Vector3<f64>,
}

/// A single acceleration contribution acting on a propagated body.
///
/// The provider receives the stage state of the body it acts on; anything
/// else it needs (central body state, atmosphere, ...) it must have resolved
/// at setup time, typically through a shared body state cell. Those cells are
/// refreshed only at accepted steps, so cross-block coupling is one step
/// behind by contract.
pub trait AccelerationModel {
    /// Acceleration in inertial axes, in m/s^2.
    fn update(&self, time: f64, stage: &TranslationalStage) -> Vector3<f64>;

    /// Model name for logging.
    fn name(&self) -> &'static str;
}

/// A single torque contribution acting on a propagated body, expressed in
/// body-fixed axes. Same coupling contract as [`AccelerationModel`].
pub trait TorqueModel {
    /// Torque in body-fixed axes, in N m.
    fn update(&self, time: f64, stage: &RotationalStage) -> Vector3<f64>;

    /// Model name for logging.
    fn name(&self) -> &'static str;
}
