//! State derivative models.
//!
//! One derivative model per equation block:
//! - translational: dy/dt = (velocity, sum of acceleration contributions);
//! - rotational: quaternion kinematics dq/dt = 1/2 * q x (0, w) together
//!   with Euler's rotational equation I dw/dt = tau - w x (I w), solved
//!   through the Cholesky-factored inertia tensor.
//!
//! Several blocks concatenate into one [`CombinedStateDerivative`], which is
//! the single [`DynamicalSystem`] a shared variable-step integrator sees: the
//! step and its error norm are accepted or rejected for all blocks at once.

use anyhow::Result;
use nalgebra::{Cholesky, DVector, Matrix3, Quaternion, UnitQuaternion, Vector3, U3};

use crate::body::factor_inertia_tensor;
use crate::traits::{
    AccelerationModel, DynamicalSystem, RotationalStage, TorqueModel, TranslationalStage,
};

/// Dimension of one translational block: position and velocity.
pub const TRANSLATIONAL_BLOCK_DIM: usize = 6;
/// Dimension of one rotational block: quaternion and angular velocity.
pub const ROTATIONAL_BLOCK_DIM: usize = 7;

/// Derivative model of one translational block.
pub struct TranslationalStateDerivative {
    accelerations: Vec<Box<dyn AccelerationModel>>,
}

impl TranslationalStateDerivative {
    pub fn new(accelerations: Vec<Box<dyn AccelerationModel>>) -> Self {
        Self { accelerations }
    }

    /// Writes the block derivative: velocity, then the summed acceleration.
    pub fn evaluate(&self, t: f64, state: &[f64], out: &mut [f64]) {
        let stage = TranslationalStage {
            position: Vector3::new(state[0], state[1], state[2]),
            velocity: Vector3::new(state[3], state[4], state[5]),
        };

        let mut acceleration = Vector3::zeros();
        for model in &self.accelerations {
            acceleration += model.update(t, &stage);
        }

        out[0] = stage.velocity[0];
        out[1] = stage.velocity[1];
        out[2] = stage.velocity[2];
        out[3] = acceleration[0];
        out[4] = acceleration[1];
        out[5] = acceleration[2];
    }
}

/// Derivative model of one rotational block.
pub struct RotationalStateDerivative {
    torques: Vec<Box<dyn TorqueModel>>,
    inertia_tensor: Matrix3<f64>,
    factored_inertia: Cholesky<f64, U3>,
}

impl RotationalStateDerivative {
    /// Validates and pre-factors the inertia tensor; fails fast on a
    /// non-symmetric or non-positive-definite tensor.
    pub fn new(inertia_tensor: Matrix3<f64>, torques: Vec<Box<dyn TorqueModel>>) -> Result<Self> {
        let factored_inertia = factor_inertia_tensor(&inertia_tensor)?;
        Ok(Self {
            torques,
            inertia_tensor,
            factored_inertia,
        })
    }

    pub fn inertia_tensor(&self) -> &Matrix3<f64> {
        &self.inertia_tensor
    }

    /// Writes the block derivative: dq/dt, then dw/dt.
    ///
    /// The quaternion is used as stored in the state vector; renormalization
    /// happens at accepted-step boundaries, not here, so that all stages of
    /// one step see the same algebra.
    pub fn evaluate(&self, t: f64, state: &[f64], out: &mut [f64]) {
        let q = Quaternion::new(state[0], state[1], state[2], state[3]);
        let angular_velocity = Vector3::new(state[4], state[5], state[6]);

        let stage = RotationalStage {
            orientation: UnitQuaternion::from_quaternion(q),
            angular_velocity,
        };
        let torque = self.total_torque(t, &stage);

        // dq/dt = 1/2 * q x (0, w), with w the body-frame angular velocity.
        let dq = q * Quaternion::from_parts(0.0, angular_velocity) * 0.5;

        // I dw/dt = tau - w x (I w).
        let gyroscopic = angular_velocity.cross(&(self.inertia_tensor * angular_velocity));
        let angular_acceleration = self.factored_inertia.solve(&(torque - gyroscopic));

        out[0] = dq.w;
        out[1] = dq.i;
        out[2] = dq.j;
        out[3] = dq.k;
        out[4] = angular_acceleration[0];
        out[5] = angular_acceleration[1];
        out[6] = angular_acceleration[2];
    }

    /// Sum of all torque contributions at the given stage state.
    pub fn total_torque(&self, t: f64, stage: &RotationalStage) -> Vector3<f64> {
        let mut torque = Vector3::zeros();
        for model in &self.torques {
            torque += model.update(t, stage);
        }
        torque
    }
}

/// Point-mass gravitational attraction of the central body, evaluated on the
/// position relative to that central body.
pub struct PointMassGravity {
    gravitational_parameter: f64,
}

impl PointMassGravity {
    pub fn new(gravitational_parameter: f64) -> Self {
        Self {
            gravitational_parameter,
        }
    }
}

impl AccelerationModel for PointMassGravity {
    fn update(&self, _time: f64, stage: &TranslationalStage) -> Vector3<f64> {
        let r = stage.position.norm();
        -self.gravitational_parameter / (r * r * r) * stage.position
    }

    fn name(&self) -> &'static str {
        "point-mass gravity"
    }
}

/// Torque with constant components in body-fixed axes.
pub struct ConstantTorque {
    torque: Vector3<f64>,
}

impl ConstantTorque {
    pub fn new(torque: Vector3<f64>) -> Self {
        Self { torque }
    }
}

impl TorqueModel for ConstantTorque {
    fn update(&self, _time: f64, _stage: &RotationalStage) -> Vector3<f64> {
        self.torque
    }

    fn name(&self) -> &'static str {
        "constant torque"
    }
}

/// A single equation block's derivative model.
pub enum EquationBlockModel {
    Translational(TranslationalStateDerivative),
    Rotational(RotationalStateDerivative),
}

impl EquationBlockModel {
    pub fn dimension(&self) -> usize {
        match self {
            EquationBlockModel::Translational(_) => TRANSLATIONAL_BLOCK_DIM,
            EquationBlockModel::Rotational(_) => ROTATIONAL_BLOCK_DIM,
        }
    }
}

/// Concatenation of equation blocks into one dynamical system.
///
/// Block order is the caller-defined setup order; each block's semantics are
/// opaque to the integrator. Blocks never read each other's stage state:
/// cross-block coupling goes through shared body state cells refreshed at
/// accepted steps only (one-step-lagged by contract).
pub struct CombinedStateDerivative {
    blocks: Vec<(usize, EquationBlockModel)>,
    dimension: usize,
}

impl CombinedStateDerivative {
    pub fn new(models: Vec<EquationBlockModel>) -> Self {
        let mut blocks = Vec::with_capacity(models.len());
        let mut offset = 0;
        for model in models {
            let dim = model.dimension();
            blocks.push((offset, model));
            offset += dim;
        }
        Self {
            blocks,
            dimension: offset,
        }
    }

    /// Offsets and dimensions of the blocks inside the combined state.
    pub fn layout(&self) -> Vec<(usize, usize)> {
        self.blocks
            .iter()
            .map(|(offset, model)| (*offset, model.dimension()))
            .collect()
    }

    pub fn blocks(&self) -> &[(usize, EquationBlockModel)] {
        &self.blocks
    }
}

impl DynamicalSystem for CombinedStateDerivative {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn apply(&self, t: f64, x: &DVector<f64>, out: &mut DVector<f64>) {
        for (offset, model) in &self.blocks {
            let dim = model.dimension();
            let state = &x.as_slice()[*offset..offset + dim];
            let derivative = &mut out.as_mut_slice()[*offset..offset + dim];
            match model {
                EquationBlockModel::Translational(model) => model.evaluate(t, state, derivative),
                EquationBlockModel::Rotational(model) => model.evaluate(t, state, derivative),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector4;

    struct ConstantAcceleration(Vector3<f64>);

    impl AccelerationModel for ConstantAcceleration {
        fn update(&self, _time: f64, _stage: &TranslationalStage) -> Vector3<f64> {
            self.0
        }

        fn name(&self) -> &'static str {
            "constant acceleration"
        }
    }

    fn principal_inertia() -> Matrix3<f64> {
        Matrix3::from_diagonal(&Vector3::new(0.3615, 0.4265, 0.5024))
    }

    #[test]
    fn translational_derivative_sums_accelerations() {
        let model = TranslationalStateDerivative::new(vec![
            Box::new(ConstantAcceleration(Vector3::new(1.0, 0.0, -2.0))),
            Box::new(ConstantAcceleration(Vector3::new(0.5, 3.0, 0.25))),
        ]);

        let state = [10.0, 20.0, 30.0, -1.0, 2.0, -3.0];
        let mut out = [0.0; 6];
        model.evaluate(0.0, &state, &mut out);

        assert_eq!(&out[..3], &state[3..]);
        assert_eq!(out[3], 1.5);
        assert_eq!(out[4], 3.0);
        assert_eq!(out[5], -1.75);
    }

    #[test]
    fn quaternion_derivative_matches_kinematic_formula() {
        let model = RotationalStateDerivative::new(principal_inertia(), Vec::new()).unwrap();
        let q = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.4);
        let omega = Vector3::new(0.0, 0.0, 2.2785e-4);

        let state = [q.w, q.i, q.j, q.k, omega[0], omega[1], omega[2]];
        let mut out = [0.0; 7];
        model.evaluate(0.0, &state, &mut out);

        let expected =
            q.into_inner() * Quaternion::from_parts(0.0, omega) * 0.5;
        let dq = Vector4::new(out[0], out[1], out[2], out[3]);
        assert!((dq - Vector4::new(expected.w, expected.i, expected.j, expected.k)).norm() < 1e-18);
    }

    #[test]
    fn euler_equation_includes_gyroscopic_term() {
        let inertia = principal_inertia();
        let torque = Vector3::new(1e-3, -2e-3, 4e-3);
        let model =
            RotationalStateDerivative::new(inertia, vec![Box::new(ConstantTorque::new(torque))])
                .unwrap();
        let omega = Vector3::new(0.01, -0.02, 0.03);

        let state = [1.0, 0.0, 0.0, 0.0, omega[0], omega[1], omega[2]];
        let mut out = [0.0; 7];
        model.evaluate(0.0, &state, &mut out);

        let expected = inertia
            .try_inverse()
            .unwrap()
            * (torque - omega.cross(&(inertia * omega)));
        let domega = Vector3::new(out[4], out[5], out[6]);
        assert!((domega - expected).norm() < 1e-15);
    }

    #[test]
    fn torque_free_principal_axis_spin_has_zero_angular_acceleration() {
        let model = RotationalStateDerivative::new(principal_inertia(), Vec::new()).unwrap();
        let state = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.2785e-4];
        let mut out = [0.0; 7];
        model.evaluate(0.0, &state, &mut out);
        assert_eq!(&out[4..], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn combined_derivative_dispatches_blocks_by_offset() {
        let translational = TranslationalStateDerivative::new(vec![Box::new(
            ConstantAcceleration(Vector3::new(0.0, 0.0, -9.81)),
        )]);
        let rotational =
            RotationalStateDerivative::new(principal_inertia(), Vec::new()).unwrap();
        let combined = CombinedStateDerivative::new(vec![
            EquationBlockModel::Translational(translational),
            EquationBlockModel::Rotational(rotational),
        ]);

        assert_eq!(combined.dimension(), 13);
        assert_eq!(combined.layout(), vec![(0, 6), (6, 7)]);

        let mut state = DVector::zeros(13);
        state[3] = 5.0; // vx
        state[6] = 1.0; // q_w
        state[12] = 0.1; // w_z
        let mut out = DVector::zeros(13);
        combined.apply(0.0, &state, &mut out);

        assert_eq!(out[0], 5.0);
        assert_eq!(out[5], -9.81);
        // dq_w = -1/2 * w_z * q_z = 0; dq_z = 1/2 * w_z * q_w.
        assert_eq!(out[6], 0.0);
        assert!((out[9] - 0.05).abs() < 1e-18);
    }

    #[test]
    fn reference_providers_report_their_names() {
        assert_eq!(PointMassGravity::new(1.0).name(), "point-mass gravity");
        assert_eq!(ConstantTorque::new(Vector3::zeros()).name(), "constant torque");
    }

    #[test]
    fn point_mass_gravity_is_central_and_inverse_square() {
        let mu = 4.282837e13;
        let gravity = PointMassGravity::new(mu);
        let stage = TranslationalStage {
            position: Vector3::new(9.376e6, 0.0, 0.0),
            velocity: Vector3::zeros(),
        };

        let acceleration = gravity.update(0.0, &stage);
        assert!((acceleration[0] + mu / 9.376e6_f64.powi(2)).abs() < 1e-12);
        assert_eq!(acceleration[1], 0.0);
        assert_eq!(acceleration[2], 0.0);
    }
}
