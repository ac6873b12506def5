//! Propagated and environment bodies.
//!
//! A body owns its physical properties and its (rotational) ephemerides. The
//! propagator never owns bodies; it borrows the map, reads properties at
//! setup, and replaces the ephemerides with fresh tabulated ones when a run
//! completes. The shared state cell is how force/torque providers see other
//! bodies: the simulator refreshes it once per accepted step.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{bail, Result};
use nalgebra::{Cholesky, Matrix3, UnitQuaternion, Vector3, Vector6, U3};

use crate::ephemeris::{RotationalEphemeris, TabulatedEphemeris};

/// Snapshot of a body's state as of the last accepted integration step.
#[derive(Debug, Clone)]
pub struct BodyState {
    /// Cartesian (position, velocity) in the base frame.
    pub translational: Vector6<f64>,
    /// Rotation from body-fixed to base frame.
    pub orientation: UnitQuaternion<f64>,
    /// Angular velocity in body-fixed axes.
    pub angular_velocity: Vector3<f64>,
}

impl Default for BodyState {
    fn default() -> Self {
        Self {
            translational: Vector6::zeros(),
            orientation: UnitQuaternion::identity(),
            angular_velocity: Vector3::zeros(),
        }
    }
}

/// Shared handle to a body's last-accepted state.
pub type BodyStateCell = Rc<RefCell<BodyState>>;

/// A celestial body or vehicle participating in a propagation.
pub struct Body {
    mass: f64,
    inertia_tensor: Matrix3<f64>,
    ephemeris: Option<TabulatedEphemeris>,
    rotational_ephemeris: Option<Box<dyn RotationalEphemeris>>,
    state_cell: BodyStateCell,
}

impl Body {
    /// Creates a body, validating its physical properties.
    pub fn new(mass: f64, inertia_tensor: Matrix3<f64>) -> Result<Self> {
        if !(mass > 0.0) || !mass.is_finite() {
            bail!("Body mass must be positive and finite, got {mass}.");
        }
        factor_inertia_tensor(&inertia_tensor)?;
        Ok(Self {
            mass,
            inertia_tensor,
            ephemeris: None,
            rotational_ephemeris: None,
            state_cell: Rc::new(RefCell::new(BodyState::default())),
        })
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn inertia_tensor(&self) -> &Matrix3<f64> {
        &self.inertia_tensor
    }

    pub fn ephemeris(&self) -> Option<&TabulatedEphemeris> {
        self.ephemeris.as_ref()
    }

    pub fn rotational_ephemeris(&self) -> Option<&dyn RotationalEphemeris> {
        self.rotational_ephemeris.as_deref()
    }

    /// Replaces the translational ephemeris (ownership handoff, not mutation
    /// of any previously installed object).
    pub fn set_ephemeris(&mut self, ephemeris: TabulatedEphemeris) {
        self.ephemeris = Some(ephemeris);
    }

    /// Replaces the rotational ephemeris.
    pub fn set_rotational_ephemeris(&mut self, ephemeris: Box<dyn RotationalEphemeris>) {
        self.rotational_ephemeris = Some(ephemeris);
    }

    /// Shared handle to the last-accepted state, for providers resolved at
    /// setup time.
    pub fn state_cell(&self) -> BodyStateCell {
        Rc::clone(&self.state_cell)
    }
}

/// Named collection of bodies, keyed by body name.
pub type BodyMap = HashMap<String, Body>;

/// Validates and Cholesky-factors an inertia tensor: it must be symmetric
/// positive-definite in body-fixed axes.
pub fn factor_inertia_tensor(inertia: &Matrix3<f64>) -> Result<Cholesky<f64, U3>> {
    if inertia.iter().any(|x| !x.is_finite()) {
        bail!("Inertia tensor contains non-finite entries.");
    }
    let asymmetry = (inertia - inertia.transpose()).norm();
    if asymmetry > 1e-10 * inertia.norm().max(1.0) {
        bail!("Inertia tensor is not symmetric (asymmetry norm {asymmetry:.3e}).");
    }
    match Cholesky::new(*inertia) {
        Some(factored) => Ok(factored),
        None => bail!("Inertia tensor is not positive-definite."),
    }
}
