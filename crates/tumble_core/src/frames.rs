//! Stateless reference frame transformations.
//!
//! Every function returns the quaternion (or matrix) that transforms vector
//! *components* from the source frame to the destination frame, so that
//! `v_dst = q * v_src`. Each "to" / "from" pair is an exact inverse pair.
//!
//! Frame chain, composed by quaternion multiplication:
//! inertial (I) -> rotating planetocentric (R) -> local vertical (V)
//! -> trajectory (T) -> aerodynamic (A) -> body-fixed (B).
//!
//! Quaternions exposed as plain 4-vectors use (w, x, y, z) ordering. This is
//! deliberately distinct from nalgebra's internal (x, y, z, w) coefficient
//! storage; always go through [`quaternion_to_vector`] /
//! [`quaternion_from_vector`] at that boundary.

use std::f64::consts::FRAC_PI_2;

use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3, Vector4};

/// Rotation from the rotating planetocentric frame to the inertial frame.
///
/// `rotation_angle` is the angle between the inertial and planetocentric
/// x-axes, i.e. the body's rotation rate times the time since reference
/// epoch, in rad.
pub fn planetocentric_to_inertial_rotation(rotation_angle: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Vector3::z_axis(), rotation_angle)
}

/// Rotation from the inertial frame to the rotating planetocentric frame.
pub fn inertial_to_planetocentric_rotation(rotation_angle: f64) -> UnitQuaternion<f64> {
    planetocentric_to_inertial_rotation(rotation_angle).inverse()
}

/// Rotation from the rotating planetocentric frame to the local vertical
/// frame (x north, y east, z along local gravity, i.e. down).
pub fn planetocentric_to_local_vertical_rotation(
    longitude: f64,
    latitude: f64,
) -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Vector3::y_axis(), latitude + FRAC_PI_2)
        * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), -longitude)
}

/// Rotation from the local vertical frame to the rotating planetocentric
/// frame.
pub fn local_vertical_to_planetocentric_rotation(
    longitude: f64,
    latitude: f64,
) -> UnitQuaternion<f64> {
    planetocentric_to_local_vertical_rotation(longitude, latitude).inverse()
}

/// Rotation from the local vertical frame to the trajectory frame (x along
/// the groundspeed-based velocity).
pub fn local_vertical_to_trajectory_rotation(
    flight_path_angle: f64,
    heading_angle: f64,
) -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -flight_path_angle)
        * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), -heading_angle)
}

/// Rotation from the trajectory frame to the local vertical frame.
pub fn trajectory_to_local_vertical_rotation(
    flight_path_angle: f64,
    heading_angle: f64,
) -> UnitQuaternion<f64> {
    local_vertical_to_trajectory_rotation(flight_path_angle, heading_angle).inverse()
}

/// Rotation from the trajectory frame to the (airspeed-based) aerodynamic
/// frame, a single rotation over the bank angle.
pub fn trajectory_to_aerodynamic_rotation(bank_angle: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Vector3::x_axis(), -bank_angle)
}

/// Rotation from the aerodynamic frame to the trajectory frame.
pub fn aerodynamic_to_trajectory_rotation(bank_angle: f64) -> UnitQuaternion<f64> {
    trajectory_to_aerodynamic_rotation(bank_angle).inverse()
}

/// Rotation from the (airspeed-based) aerodynamic frame to the body-fixed
/// frame, over the angle of attack and the angle of sideslip.
pub fn aerodynamic_to_body_rotation(
    angle_of_attack: f64,
    angle_of_sideslip: f64,
) -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Vector3::y_axis(), angle_of_attack)
        * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), -angle_of_sideslip)
}

/// Rotation from the body-fixed frame to the aerodynamic frame.
pub fn body_to_aerodynamic_rotation(
    angle_of_attack: f64,
    angle_of_sideslip: f64,
) -> UnitQuaternion<f64> {
    aerodynamic_to_body_rotation(angle_of_attack, angle_of_sideslip).inverse()
}

/// Full chain from the inertial to the body-fixed frame:
/// I -> R -> V -> T -> A -> B.
#[allow(clippy::too_many_arguments)]
pub fn inertial_to_body_fixed_rotation(
    rotation_angle: f64,
    longitude: f64,
    latitude: f64,
    flight_path_angle: f64,
    heading_angle: f64,
    bank_angle: f64,
    angle_of_attack: f64,
    angle_of_sideslip: f64,
) -> UnitQuaternion<f64> {
    aerodynamic_to_body_rotation(angle_of_attack, angle_of_sideslip)
        * trajectory_to_aerodynamic_rotation(bank_angle)
        * local_vertical_to_trajectory_rotation(flight_path_angle, heading_angle)
        * planetocentric_to_local_vertical_rotation(longitude, latitude)
        * inertial_to_planetocentric_rotation(rotation_angle)
}

/// Converts a unit quaternion to its public 4-vector form (w, x, y, z).
pub fn quaternion_to_vector(q: &UnitQuaternion<f64>) -> Vector4<f64> {
    Vector4::new(q.w, q.i, q.j, q.k)
}

/// Builds a unit quaternion from its public 4-vector form (w, x, y, z),
/// renormalizing the components.
pub fn quaternion_from_vector(v: &Vector4<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::from_quaternion(Quaternion::new(v[0], v[1], v[2], v[3]))
}

/// Cross-product (skew-symmetric) matrix of a 3-vector, [v]x.
pub fn skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v[2], v[1], //
        v[2], 0.0, -v[0], //
        -v[1], v[0], 0.0,
    )
}

/// Extracts the vector from a (nearly) skew-symmetric matrix.
pub fn vector_from_skew_symmetric(m: &Matrix3<f64>) -> Vector3<f64> {
    Vector3::new(m[(2, 1)], m[(0, 2)], m[(1, 0)])
}

/// Recovers the angular velocity in the base frame from a rotation matrix to
/// the target frame and the time derivative of the rotation matrix to the
/// base frame, via [w_base]x = dR_base/dt * R_target.
pub fn angular_velocity_in_base_frame_from_matrices(
    rotation_to_target_frame: &Matrix3<f64>,
    derivative_of_rotation_to_base_frame: &Matrix3<f64>,
) -> Vector3<f64> {
    vector_from_skew_symmetric(&(derivative_of_rotation_to_base_frame * rotation_to_target_frame))
}
