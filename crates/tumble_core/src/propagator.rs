//! Multi-block dynamics propagation.
//!
//! The simulator assembles the configured equation blocks into one combined
//! state derivative, drives a single variable-step integrator over it, and
//! records the accepted-step state and dependent-variable histories. All
//! blocks share the stepper: one step size, one error norm, one
//! accept/reject decision. After a completed run the body map receives fresh
//! tabulated ephemerides built from the recorded history, so environment
//! queries can outlive the propagation.
//!
//! Cross-block and cross-body coupling goes through the shared body state
//! cells, refreshed once per accepted step. Providers therefore see
//! one-step-lagged data for everything but their own block's stage state.

use anyhow::{bail, Context, Result};
use log::{debug, info, trace, warn};
use nalgebra::{DVector, UnitQuaternion, Vector3, Vector4, Vector6};

use crate::body::{Body, BodyMap};
use crate::dependent::{
    heading_and_flight_path_angles, latitude_and_longitude, DependentVariable,
};
use crate::dynamics::{
    CombinedStateDerivative, EquationBlockModel, RotationalStateDerivative,
    TranslationalStateDerivative, ROTATIONAL_BLOCK_DIM, TRANSLATIONAL_BLOCK_DIM,
};
use crate::ephemeris::{
    RotationalEphemeris, TabulatedEphemeris, TabulatedRotationalEphemeris, Vector7,
};
use crate::frames::{planetocentric_to_local_vertical_rotation, quaternion_from_vector};
use crate::integrator::{
    IntegrationStats, IntegratorSettings, RungeKuttaVariableStepIntegrator,
};
use crate::traits::{AccelerationModel, DynamicalSystem, RotationalStage, TorqueModel};

/// Quaternion norm deviation from one above which renormalization is
/// reported.
const NORM_DRIFT_WARNING_THRESHOLD: f64 = 1e-6;

/// Settings of one translational equation block. The initial state and all
/// stage positions are relative to the central body, in base-frame axes.
pub struct TranslationalPropagatorSettings {
    pub body: String,
    pub central_body: String,
    pub initial_state: Vector6<f64>,
    pub accelerations: Vec<Box<dyn AccelerationModel>>,
}

/// Settings of one rotational equation block. The initial state is the
/// 7-component rotational state: quaternion to the base frame as
/// (w, x, y, z), then the body-frame angular velocity.
pub struct RotationalPropagatorSettings {
    pub body: String,
    pub base_frame: String,
    pub initial_state: Vector7,
    pub torques: Vec<Box<dyn TorqueModel>>,
}

/// One equation block of the combined propagation.
pub enum EquationBlockSettings {
    Translational(TranslationalPropagatorSettings),
    Rotational(RotationalPropagatorSettings),
}

/// Stop criterion, checked after each accepted step (and once at the
/// initial epoch).
pub enum TerminationCondition {
    /// Stop at the first accepted epoch at or beyond `end_time`.
    TimeLimit { end_time: f64 },
    /// Stop when the predicate holds for the accepted (time, state) pair.
    Custom(Box<dyn Fn(f64, &DVector<f64>) -> bool>),
    /// Stop when entry `offset` of the recorded dependent-variable row
    /// crosses `limit` (at or above when `stop_when_above`, at or below
    /// otherwise).
    DependentVariableThreshold {
        offset: usize,
        limit: f64,
        stop_when_above: bool,
    },
    /// Stop when any of the listed conditions is met.
    OnFirstOf(Vec<TerminationCondition>),
}

impl TerminationCondition {
    pub fn is_met(&self, t: f64, state: &DVector<f64>, dependent: &DVector<f64>) -> bool {
        match self {
            TerminationCondition::TimeLimit { end_time } => t >= *end_time,
            TerminationCondition::Custom(predicate) => predicate(t, state),
            TerminationCondition::DependentVariableThreshold {
                offset,
                limit,
                stop_when_above,
            } => {
                if *stop_when_above {
                    dependent[*offset] >= *limit
                } else {
                    dependent[*offset] <= *limit
                }
            }
            TerminationCondition::OnFirstOf(conditions) => {
                conditions.iter().any(|c| c.is_met(t, state, dependent))
            }
        }
    }

    /// Checks that every threshold condition points inside the recorded
    /// dependent-variable row.
    fn validate(&self, dependent_dimension: usize) -> Result<()> {
        match self {
            TerminationCondition::TimeLimit { .. } | TerminationCondition::Custom(_) => Ok(()),
            TerminationCondition::DependentVariableThreshold { offset, .. } => {
                if *offset >= dependent_dimension {
                    bail!(
                        "Termination threshold reads dependent-variable entry {offset}, \
                         but only {dependent_dimension} entries are recorded."
                    );
                }
                Ok(())
            }
            TerminationCondition::OnFirstOf(conditions) => {
                for condition in conditions {
                    condition.validate(dependent_dimension)?;
                }
                Ok(())
            }
        }
    }
}

/// Full propagation setup: the equation blocks, when to stop, and which
/// derived quantities to record along the way.
pub struct PropagatorSettings {
    pub blocks: Vec<EquationBlockSettings>,
    pub termination: TerminationCondition,
    pub dependent_variables: Vec<DependentVariable>,
}

/// Lifecycle of a simulator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorPhase {
    Initialized,
    Integrating,
    Terminated,
}

/// Everything a completed propagation produced.
pub struct PropagationResults {
    /// Accepted (epoch, combined state) rows, including the initial epoch.
    pub state_history: Vec<(f64, DVector<f64>)>,
    /// Accepted (epoch, dependent variables) rows; empty when none were
    /// requested.
    pub dependent_variable_history: Vec<(f64, DVector<f64>)>,
    pub stats: IntegrationStats,
    pub final_time: f64,
}

/// Where each block's state lives inside the combined vector, and which
/// body it belongs to.
enum BlockBinding {
    Translational { body: String, central_body: String },
    Rotational { body: String, base_frame: String },
}

/// Single-use driver of one propagation run.
pub struct DynamicsSimulator {
    propagator_settings: Option<PropagatorSettings>,
    integrator_settings: IntegratorSettings,
    phase: SimulatorPhase,
}

impl DynamicsSimulator {
    pub fn new(
        propagator_settings: PropagatorSettings,
        integrator_settings: IntegratorSettings,
    ) -> Self {
        Self {
            propagator_settings: Some(propagator_settings),
            integrator_settings,
            phase: SimulatorPhase::Initialized,
        }
    }

    pub fn phase(&self) -> SimulatorPhase {
        self.phase
    }

    /// Runs the propagation to termination.
    ///
    /// On success, each propagated body in `bodies` receives a tabulated
    /// (rotational) ephemeris built from the accepted-step history, provided
    /// the history holds at least two rows. On failure no ephemerides are
    /// installed and the error names the epoch where integration stopped.
    pub fn propagate(&mut self, bodies: &mut BodyMap) -> Result<PropagationResults> {
        let settings = match self.propagator_settings.take() {
            Some(settings) => settings,
            None => bail!("Propagation already performed; the settings were consumed."),
        };
        let PropagatorSettings {
            blocks,
            termination,
            dependent_variables,
        } = settings;
        if blocks.is_empty() {
            bail!("Propagator settings contain no equation blocks.");
        }

        let (combined, bindings, initial_state) = assemble_blocks(blocks, bodies)?;
        validate_dependent_variables(&dependent_variables, bodies, &bindings)?;
        termination.validate(dependent_variables.iter().map(|v| v.dimension()).sum())?;
        debug!(
            "Assembled combined state derivative: {} block(s), dimension {}; stepping with {}.",
            bindings.len(),
            combined.dimension(),
            self.integrator_settings.coefficients.name()
        );

        let mut integrator =
            RungeKuttaVariableStepIntegrator::new(self.integrator_settings, initial_state)?;
        self.phase = SimulatorPhase::Integrating;

        refresh_body_cells(&bindings, bodies, integrator.state())?;
        let mut state_history = vec![(integrator.time(), integrator.state().clone())];
        let mut dependent_variable_history = Vec::new();
        let mut dependent_row = evaluate_dependent_variables(
            &dependent_variables,
            integrator.time(),
            integrator.state(),
            bodies,
            &combined,
            &bindings,
        )?;
        if !dependent_variables.is_empty() {
            dependent_variable_history.push((integrator.time(), dependent_row.clone()));
        }

        if !termination.is_met(integrator.time(), integrator.state(), &dependent_row) {
            loop {
                integrator
                    .perform_step(&combined)
                    .context("Propagation stopped on integrator failure.")?;
                normalize_rotational_blocks(&bindings, integrator.state_mut());
                let t = integrator.time();
                if integrator.state().iter().any(|x| !x.is_finite()) {
                    bail!("Propagated state contains non-finite entries at t = {t}.");
                }
                refresh_body_cells(&bindings, bodies, integrator.state())?;
                state_history.push((t, integrator.state().clone()));
                dependent_row = evaluate_dependent_variables(
                    &dependent_variables,
                    t,
                    integrator.state(),
                    bodies,
                    &combined,
                    &bindings,
                )?;
                if !dependent_variables.is_empty() {
                    dependent_variable_history.push((t, dependent_row.clone()));
                }
                trace!(
                    "Accepted step to t = {t}, next h = {:.6e}.",
                    integrator.current_step()
                );
                if termination.is_met(t, integrator.state(), &dependent_row) {
                    break;
                }
            }
        }
        integrator.finish();
        self.phase = SimulatorPhase::Terminated;

        install_ephemerides(&bindings, bodies, &state_history)?;

        let stats = integrator.stats();
        info!(
            "Propagation finished at t = {} after {} accepted and {} rejected step(s).",
            integrator.time(),
            stats.accepted_steps,
            stats.rejected_steps
        );
        Ok(PropagationResults {
            state_history,
            dependent_variable_history,
            stats,
            final_time: integrator.time(),
        })
    }
}

/// Turns the block settings into derivative models, bindings, and the
/// concatenated initial state, validating body references and the initial
/// values along the way.
fn assemble_blocks(
    blocks: Vec<EquationBlockSettings>,
    bodies: &BodyMap,
) -> Result<(CombinedStateDerivative, Vec<(usize, BlockBinding)>, DVector<f64>)> {
    let mut models = Vec::with_capacity(blocks.len());
    let mut bindings = Vec::with_capacity(blocks.len());
    let mut initial = Vec::new();
    let mut offset = 0;

    for block in blocks {
        match block {
            EquationBlockSettings::Translational(settings) => {
                if !bodies.contains_key(&settings.body) {
                    bail!(
                        "Translational block references unknown body '{}'.",
                        settings.body
                    );
                }
                if !bodies.contains_key(&settings.central_body) {
                    bail!(
                        "Translational block references unknown central body '{}'.",
                        settings.central_body
                    );
                }
                if settings.body == settings.central_body {
                    bail!(
                        "Body '{}' cannot be propagated around itself.",
                        settings.body
                    );
                }
                if settings.initial_state.iter().any(|x| !x.is_finite()) {
                    bail!(
                        "Initial translational state of '{}' contains non-finite entries.",
                        settings.body
                    );
                }
                for model in &settings.accelerations {
                    debug!("Acceleration on '{}': {}.", settings.body, model.name());
                }
                initial.extend_from_slice(settings.initial_state.as_slice());
                models.push(EquationBlockModel::Translational(
                    TranslationalStateDerivative::new(settings.accelerations),
                ));
                bindings.push((
                    offset,
                    BlockBinding::Translational {
                        body: settings.body,
                        central_body: settings.central_body,
                    },
                ));
                offset += TRANSLATIONAL_BLOCK_DIM;
            }
            EquationBlockSettings::Rotational(settings) => {
                let inertia = *bodies
                    .get(&settings.body)
                    .with_context(|| {
                        format!(
                            "Rotational block references unknown body '{}'.",
                            settings.body
                        )
                    })?
                    .inertia_tensor();
                if settings.initial_state.iter().any(|x| !x.is_finite()) {
                    bail!(
                        "Initial rotational state of '{}' contains non-finite entries.",
                        settings.body
                    );
                }
                let mut state = settings.initial_state;
                let norm = state.fixed_rows::<4>(0).norm();
                if !(norm > 0.0) {
                    bail!(
                        "Initial orientation quaternion of '{}' has zero norm.",
                        settings.body
                    );
                }
                if (norm - 1.0).abs() > NORM_DRIFT_WARNING_THRESHOLD {
                    warn!(
                        "Initial orientation quaternion of '{}' has norm {norm}; renormalizing.",
                        settings.body
                    );
                }
                for model in &settings.torques {
                    debug!("Torque on '{}': {}.", settings.body, model.name());
                }
                state.fixed_rows_mut::<4>(0).unscale_mut(norm);
                initial.extend_from_slice(state.as_slice());
                models.push(EquationBlockModel::Rotational(
                    RotationalStateDerivative::new(inertia, settings.torques)?,
                ));
                bindings.push((
                    offset,
                    BlockBinding::Rotational {
                        body: settings.body,
                        base_frame: settings.base_frame,
                    },
                ));
                offset += ROTATIONAL_BLOCK_DIM;
            }
        }
    }

    Ok((
        CombinedStateDerivative::new(models),
        bindings,
        DVector::from_vec(initial),
    ))
}

fn validate_dependent_variables(
    variables: &[DependentVariable],
    bodies: &BodyMap,
    bindings: &[(usize, BlockBinding)],
) -> Result<()> {
    for variable in variables {
        match variable {
            DependentVariable::Latitude { body, central_body }
            | DependentVariable::Longitude { body, central_body }
            | DependentVariable::HeadingAngle { body, central_body }
            | DependentVariable::FlightPathAngle { body, central_body } => {
                if !bodies.contains_key(body) || !bodies.contains_key(central_body) {
                    bail!(
                        "Dependent variable '{}' references an unknown body.",
                        variable.label()
                    );
                }
            }
            DependentVariable::BodyFixedAngularVelocity { body }
            | DependentVariable::TotalTorque { body } => {
                let found = bindings.iter().any(|(_, binding)| {
                    matches!(binding, BlockBinding::Rotational { body: name, .. } if name == body)
                });
                if !found {
                    bail!(
                        "Dependent variable '{}' needs a rotational equation block for '{}'.",
                        variable.label(),
                        body
                    );
                }
            }
        }
    }
    Ok(())
}

/// Renormalizes the quaternion part of every rotational block in place.
fn normalize_rotational_blocks(bindings: &[(usize, BlockBinding)], state: &mut DVector<f64>) {
    for (offset, binding) in bindings {
        if let BlockBinding::Rotational { body, .. } = binding {
            let o = *offset;
            let norm = (state[o] * state[o]
                + state[o + 1] * state[o + 1]
                + state[o + 2] * state[o + 2]
                + state[o + 3] * state[o + 3])
                .sqrt();
            if norm > 0.0 {
                if (norm - 1.0).abs() > NORM_DRIFT_WARNING_THRESHOLD {
                    warn!(
                        "Orientation quaternion of '{body}' drifted to norm {norm}; renormalizing."
                    );
                }
                for i in 0..4 {
                    state[o + i] /= norm;
                }
            }
        }
    }
}

/// Writes the accepted state into the shared body cells. Translational cells
/// hold base-frame absolute states, so the central body's cell value is
/// added to the propagated relative state.
fn refresh_body_cells(
    bindings: &[(usize, BlockBinding)],
    bodies: &BodyMap,
    state: &DVector<f64>,
) -> Result<()> {
    for (offset, binding) in bindings {
        let o = *offset;
        match binding {
            BlockBinding::Translational { body, central_body } => {
                let central_state = lookup(bodies, central_body)?
                    .state_cell()
                    .borrow()
                    .translational;
                let relative = Vector6::from_column_slice(&state.as_slice()[o..o + 6]);
                lookup(bodies, body)?.state_cell().borrow_mut().translational =
                    central_state + relative;
            }
            BlockBinding::Rotational { body, .. } => {
                let cell = lookup(bodies, body)?.state_cell();
                let mut body_state = cell.borrow_mut();
                body_state.orientation = quaternion_from_vector(&Vector4::new(
                    state[o],
                    state[o + 1],
                    state[o + 2],
                    state[o + 3],
                ));
                body_state.angular_velocity =
                    Vector3::new(state[o + 4], state[o + 5], state[o + 6]);
            }
        }
    }
    Ok(())
}

fn evaluate_dependent_variables(
    variables: &[DependentVariable],
    t: f64,
    state: &DVector<f64>,
    bodies: &BodyMap,
    combined: &CombinedStateDerivative,
    bindings: &[(usize, BlockBinding)],
) -> Result<DVector<f64>> {
    let total = variables.iter().map(|v| v.dimension()).sum();
    let mut out = DVector::zeros(total);
    let mut cursor = 0;
    for variable in variables {
        match variable {
            DependentVariable::Latitude { body, central_body } => {
                let (position, _) = planet_fixed_state(t, body, central_body, bodies)?;
                out[cursor] = latitude_and_longitude(&position).0;
            }
            DependentVariable::Longitude { body, central_body } => {
                let (position, _) = planet_fixed_state(t, body, central_body, bodies)?;
                out[cursor] = latitude_and_longitude(&position).1;
            }
            DependentVariable::HeadingAngle { body, central_body } => {
                out[cursor] = velocity_angles(t, body, central_body, bodies)?.0;
            }
            DependentVariable::FlightPathAngle { body, central_body } => {
                out[cursor] = velocity_angles(t, body, central_body, bodies)?.1;
            }
            DependentVariable::BodyFixedAngularVelocity { body } => {
                let (o, _) = rotational_block(bindings, combined, body)?;
                out.rows_mut(cursor, 3).copy_from(&Vector3::new(
                    state[o + 4],
                    state[o + 5],
                    state[o + 6],
                ));
            }
            DependentVariable::TotalTorque { body } => {
                let (o, model) = rotational_block(bindings, combined, body)?;
                let stage = RotationalStage {
                    orientation: quaternion_from_vector(&Vector4::new(
                        state[o],
                        state[o + 1],
                        state[o + 2],
                        state[o + 3],
                    )),
                    angular_velocity: Vector3::new(state[o + 4], state[o + 5], state[o + 6]),
                };
                out.rows_mut(cursor, 3)
                    .copy_from(&model.total_torque(t, &stage));
            }
        }
        cursor += variable.dimension();
    }
    Ok(out)
}

fn lookup<'a>(bodies: &'a BodyMap, name: &str) -> Result<&'a Body> {
    bodies
        .get(name)
        .with_context(|| format!("Body '{name}' is not in the body map."))
}

/// Rotation from the base frame into the central body's body-fixed frame,
/// with the matching angular velocity. Bodies without a rotational
/// ephemeris are treated as non-rotating.
fn central_body_rotation(t: f64, central: &Body) -> (UnitQuaternion<f64>, Vector3<f64>) {
    match central.rotational_ephemeris() {
        Some(ephemeris) => (
            ephemeris.rotation_to_target_frame(t),
            ephemeris.angular_velocity_in_target_frame(t),
        ),
        None => (UnitQuaternion::identity(), Vector3::zeros()),
    }
}

/// Position and corotating velocity of `body` relative to `central_body`,
/// in the central body's body-fixed frame, read from the shared cells.
fn planet_fixed_state(
    t: f64,
    body: &str,
    central_body: &str,
    bodies: &BodyMap,
) -> Result<(Vector3<f64>, Vector3<f64>)> {
    let body_state = lookup(bodies, body)?.state_cell().borrow().translational;
    let central = lookup(bodies, central_body)?;
    let central_state = central.state_cell().borrow().translational;
    let relative = body_state - central_state;

    let (rotation_to_fixed, omega_fixed) = central_body_rotation(t, central);
    let position = rotation_to_fixed * relative.fixed_rows::<3>(0).into_owned();
    let velocity = rotation_to_fixed * relative.fixed_rows::<3>(3).into_owned()
        - omega_fixed.cross(&position);
    Ok((position, velocity))
}

fn velocity_angles(
    t: f64,
    body: &str,
    central_body: &str,
    bodies: &BodyMap,
) -> Result<(f64, f64)> {
    let (position, velocity) = planet_fixed_state(t, body, central_body, bodies)?;
    let (latitude, longitude) = latitude_and_longitude(&position);
    let velocity_vertical =
        planetocentric_to_local_vertical_rotation(longitude, latitude) * velocity;
    Ok(heading_and_flight_path_angles(&velocity_vertical))
}

fn rotational_block<'a>(
    bindings: &[(usize, BlockBinding)],
    combined: &'a CombinedStateDerivative,
    body: &str,
) -> Result<(usize, &'a RotationalStateDerivative)> {
    for (i, (offset, binding)) in bindings.iter().enumerate() {
        if let BlockBinding::Rotational { body: name, .. } = binding {
            if name == body {
                if let EquationBlockModel::Rotational(model) = &combined.blocks()[i].1 {
                    return Ok((*offset, model));
                }
            }
        }
    }
    bail!("No rotational equation block for body '{body}'.");
}

/// Replaces the ephemerides of every propagated body with tabulated ones
/// built from the accepted-step history.
fn install_ephemerides(
    bindings: &[(usize, BlockBinding)],
    bodies: &mut BodyMap,
    history: &[(f64, DVector<f64>)],
) -> Result<()> {
    if history.len() < 2 {
        warn!(
            "State history holds {} row(s); skipping the ephemeris reset.",
            history.len()
        );
        return Ok(());
    }
    for (offset, binding) in bindings {
        let o = *offset;
        match binding {
            BlockBinding::Translational { body, central_body } => {
                let rows: Vec<(f64, Vector6<f64>)> = history
                    .iter()
                    .map(|(t, s)| (*t, Vector6::from_column_slice(&s.as_slice()[o..o + 6])))
                    .collect();
                let ephemeris = TabulatedEphemeris::from_history(&rows, central_body.clone())?;
                bodies
                    .get_mut(body)
                    .with_context(|| format!("Body '{body}' is not in the body map."))?
                    .set_ephemeris(ephemeris);
            }
            BlockBinding::Rotational { body, base_frame } => {
                let rows: Vec<(f64, Vector7)> = history
                    .iter()
                    .map(|(t, s)| {
                        let mut row = Vector7::zeros();
                        row.copy_from_slice(&s.as_slice()[o..o + 7]);
                        (*t, row)
                    })
                    .collect();
                let ephemeris = TabulatedRotationalEphemeris::from_history(
                    &rows,
                    base_frame.clone(),
                    format!("{body}_fixed"),
                )?;
                bodies
                    .get_mut(body)
                    .with_context(|| format!("Body '{body}' is not in the body map."))?
                    .set_rotational_ephemeris(Box::new(ephemeris));
            }
        }
    }
    Ok(())
}
