/// The `tumble_core` crate propagates coupled rotational and translational
/// rigid-body dynamics with a shared variable-step integrator.
///
/// Key components:
/// - **Traits**: `DynamicalSystem` (flat ODE seam), `AccelerationModel` / `TorqueModel` (force and torque providers).
/// - **Dynamics**: per-block state derivative models (quaternion kinematics, Euler's rotational equation) and their concatenation.
/// - **Integrator**: embedded Runge-Kutta-Fehlberg 4(5) and 7(8) pairs with adaptive step-size control.
/// - **Propagator**: the multi-block dynamics simulator, termination conditions, and dependent variable recording.
/// - **Ephemeris**: tabulated and closed-form (rotational) ephemerides backed by Lagrange interpolation.
/// - **Frames**: the inertial / planetocentric / vertical / trajectory / aerodynamic / body frame chain.
pub mod body;
pub mod dependent;
pub mod dynamics;
pub mod ephemeris;
pub mod frames;
pub mod integrator;
pub mod interpolation;
pub mod propagator;
pub mod traits;
