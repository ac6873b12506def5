//! Dependent variables derived from the propagated state.
//!
//! Dependent variables are evaluated once per accepted step, from the same
//! accepted state the history records, and stored in a separate time-keyed
//! history. The angle definitions follow the local vertical frame with x
//! north, y east, z down: heading is measured from north over east, and the
//! flight path angle is positive for climbing motion.

use serde::{Deserialize, Serialize};

use nalgebra::Vector3;

/// A single dependent variable to record during propagation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependentVariable {
    /// Planetocentric latitude of `body` w.r.t. `central_body`, rad.
    Latitude { body: String, central_body: String },
    /// Planetocentric longitude of `body` w.r.t. `central_body`, rad.
    Longitude { body: String, central_body: String },
    /// Heading angle of `body`'s corotating velocity, rad.
    HeadingAngle { body: String, central_body: String },
    /// Flight path angle of `body`'s corotating velocity, rad.
    FlightPathAngle { body: String, central_body: String },
    /// Angular velocity of `body` in its body-fixed axes, rad/s.
    BodyFixedAngularVelocity { body: String },
    /// Sum of all torques acting on `body`, body-fixed axes, N m.
    TotalTorque { body: String },
}

impl DependentVariable {
    /// Number of scalar entries this variable contributes per epoch.
    pub fn dimension(&self) -> usize {
        match self {
            DependentVariable::Latitude { .. }
            | DependentVariable::Longitude { .. }
            | DependentVariable::HeadingAngle { .. }
            | DependentVariable::FlightPathAngle { .. } => 1,
            DependentVariable::BodyFixedAngularVelocity { .. }
            | DependentVariable::TotalTorque { .. } => 3,
        }
    }

    /// Human-readable label for logs and output headers.
    pub fn label(&self) -> String {
        match self {
            DependentVariable::Latitude { body, central_body } => {
                format!("latitude of {body} w.r.t. {central_body} [rad]")
            }
            DependentVariable::Longitude { body, central_body } => {
                format!("longitude of {body} w.r.t. {central_body} [rad]")
            }
            DependentVariable::HeadingAngle { body, central_body } => {
                format!("heading angle of {body} w.r.t. {central_body} [rad]")
            }
            DependentVariable::FlightPathAngle { body, central_body } => {
                format!("flight path angle of {body} w.r.t. {central_body} [rad]")
            }
            DependentVariable::BodyFixedAngularVelocity { body } => {
                format!("body-fixed angular velocity of {body} [rad/s]")
            }
            DependentVariable::TotalTorque { body } => {
                format!("total torque on {body} [N m]")
            }
        }
    }
}

/// Planetocentric (latitude, longitude) of a position expressed in the
/// rotating planetocentric frame. Both are zero at the origin.
pub fn latitude_and_longitude(position_planet_fixed: &Vector3<f64>) -> (f64, f64) {
    let r = position_planet_fixed.norm();
    if r == 0.0 {
        return (0.0, 0.0);
    }
    let latitude = (position_planet_fixed[2] / r).asin();
    let longitude = position_planet_fixed[1].atan2(position_planet_fixed[0]);
    (latitude, longitude)
}

/// (heading, flight path) angles of a velocity expressed in the local
/// vertical frame (x north, y east, z down). Both are zero for a vanishing
/// velocity.
pub fn heading_and_flight_path_angles(velocity_vertical_frame: &Vector3<f64>) -> (f64, f64) {
    let speed = velocity_vertical_frame.norm();
    if speed == 0.0 {
        return (0.0, 0.0);
    }
    let heading = velocity_vertical_frame[1].atan2(velocity_vertical_frame[0]);
    let flight_path = (-velocity_vertical_frame[2] / speed).asin();
    (heading, flight_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

    #[test]
    fn dimensions_and_labels() {
        let latitude = DependentVariable::Latitude {
            body: "Phobos".into(),
            central_body: "Mars".into(),
        };
        assert_eq!(latitude.dimension(), 1);
        assert!(latitude.label().contains("Phobos"));
        assert!(latitude.label().contains("Mars"));

        let omega = DependentVariable::BodyFixedAngularVelocity {
            body: "Phobos".into(),
        };
        assert_eq!(omega.dimension(), 3);
    }

    #[test]
    fn latitude_longitude_of_cardinal_directions() {
        let (lat, lon) = latitude_and_longitude(&Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(lat, 0.0);
        assert_eq!(lon, 0.0);

        let (lat, lon) = latitude_and_longitude(&Vector3::new(0.0, 2.0, 0.0));
        assert_eq!(lat, 0.0);
        assert!((lon - FRAC_PI_2).abs() < 1e-15);

        let (lat, _) = latitude_and_longitude(&Vector3::new(0.0, 0.0, 5.0));
        assert!((lat - FRAC_PI_2).abs() < 1e-15);

        let (lat, lon) = latitude_and_longitude(&Vector3::new(1.0, 0.0, 1.0));
        assert!((lat - FRAC_PI_4).abs() < 1e-15);
        assert_eq!(lon, 0.0);
    }

    #[test]
    fn heading_and_flight_path_of_cardinal_velocities() {
        // Due east, level.
        let (heading, fpa) = heading_and_flight_path_angles(&Vector3::new(0.0, 7.0e3, 0.0));
        assert!((heading - FRAC_PI_2).abs() < 1e-15);
        assert_eq!(fpa, 0.0);

        // Due north, climbing at 45 degrees.
        let (heading, fpa) =
            heading_and_flight_path_angles(&Vector3::new(5.0e3, 0.0, -5.0e3));
        assert_eq!(heading, 0.0);
        assert!((fpa - FRAC_PI_4).abs() < 1e-15);

        // Straight down.
        let (_, fpa) = heading_and_flight_path_angles(&Vector3::new(0.0, 0.0, 3.0));
        assert!((fpa + FRAC_PI_2).abs() < 1e-15);
    }

    #[test]
    fn degenerate_inputs_yield_zero_angles() {
        assert_eq!(latitude_and_longitude(&Vector3::zeros()), (0.0, 0.0));
        assert_eq!(heading_and_flight_path_angles(&Vector3::zeros()), (0.0, 0.0));
    }
}
