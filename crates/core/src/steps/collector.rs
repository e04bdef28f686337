//! Step collection and validation.
//!
//! The collector turns driver step catalogs, deploy templates, runbooks and
//! requested steps into the ordered list the executor runs. All validation
//! happens here, before the first step executes.

use crate::drivers::registry::DriverRegistry;
use crate::error::{ConductorError, ConductorResult};
use crate::steps::action::{is_reserved_name, StepAction};
use crate::steps::scheduler::{order_explicit, schedule};
use mk_protocol::{Step, StepPhase, StepSpec};
use std::collections::{HashMap, HashSet};

/// Where the steps of an operation come from.
#[derive(Debug, Clone, Copy)]
pub enum StepSource<'a> {
    /// The drivers' default steps, adjusted by each override list in turn.
    ///
    /// Used for automated cleaning and deployment; deploy templates and
    /// requested deploy steps are override lists.
    Defaults { overrides: &'a [&'a [Step]] },
    /// Exactly the given steps. Used for manual cleaning, servicing and
    /// runbooks.
    Explicit(&'a [Step]),
}

/// Collects and validates steps against the enabled driver interfaces.
pub struct StepCollector<'a> {
    registry: &'a DriverRegistry,
    priority_overrides: &'a HashMap<String, i32>,
}

impl<'a> StepCollector<'a> {
    /// `priority_overrides` maps `interface.step` to a new default priority.
    pub fn new(registry: &'a DriverRegistry, priority_overrides: &'a HashMap<String, i32>) -> Self {
        Self {
            registry,
            priority_overrides,
        }
    }

    /// Build the ordered step list for a phase.
    ///
    /// # Errors
    ///
    /// - `DuplicateStep` if a supplied list names an `(interface, step)`
    ///   pair twice
    /// - `InvalidStep` for steps no enabled interface offers, unknown
    ///   arguments, or child node execution of a step that cannot run there
    /// - `MissingStepArgs` when a step that will run lacks a required
    ///   argument
    pub fn collect(&self, phase: StepPhase, source: StepSource<'_>) -> ConductorResult<Vec<Step>> {
        match source {
            StepSource::Defaults { overrides } => self.collect_defaults(phase, overrides),
            StepSource::Explicit(steps) => self.collect_explicit(phase, steps),
        }
    }

    fn collect_defaults(&self, phase: StepPhase, overrides: &[&[Step]]) -> ConductorResult<Vec<Step>> {
        let specs = self.registry.step_specs(phase);
        let mut steps: Vec<Step> = specs
            .iter()
            .map(|spec| {
                let mut step = spec.to_step();
                if let Some(priority) = self.priority_overrides.get(&step.to_string()) {
                    step.priority = Some(*priority);
                }
                step
            })
            .collect();

        for list in overrides {
            check_duplicates(list)?;
            for entry in list.iter() {
                check_child_execution(entry)?;
                match steps.iter_mut().find(|s| s.key() == entry.key()) {
                    Some(existing) => {
                        if entry.priority.is_some() {
                            existing.priority = entry.priority;
                        }
                        existing.args = entry.args.clone();
                        existing.execute_on_child_nodes = entry.execute_on_child_nodes;
                        existing.limit_child_node_execution =
                            entry.limit_child_node_execution.clone();
                    }
                    None if is_reserved_name(&entry.step) => steps.push(entry.clone()),
                    None => {
                        return Err(ConductorError::invalid_step(
                            entry.to_string(),
                            format!("no enabled interface offers this {phase} step"),
                        ));
                    }
                }
            }
        }

        for step in steps.iter().filter(|s| will_run(s)) {
            if let Some(spec) = specs.iter().find(|spec| spec_matches(spec, step)) {
                validate_args(spec, step)?;
            }
        }

        Ok(schedule(phase, steps))
    }

    fn collect_explicit(&self, phase: StepPhase, steps: &[Step]) -> ConductorResult<Vec<Step>> {
        check_duplicates(steps)?;

        for step in steps {
            check_child_execution(step)?;
            if is_reserved_name(&step.step) {
                continue;
            }
            let spec = self.registry.find_spec(phase, step).ok_or_else(|| {
                ConductorError::invalid_step(
                    step.to_string(),
                    format!("no enabled interface offers this {phase} step"),
                )
            })?;
            if will_run(step) {
                validate_args(&spec, step)?;
            }
        }

        let steps = steps.to_vec();
        if steps.iter().all(|s| s.order.is_some()) {
            Ok(order_explicit(steps)
                .into_iter()
                .filter(will_run)
                .collect())
        } else {
            Ok(schedule(phase, steps))
        }
    }
}

fn will_run(step: &Step) -> bool {
    !matches!(step.priority, Some(p) if p <= 0)
}

fn spec_matches(spec: &StepSpec, step: &Step) -> bool {
    spec.interface == step.interface && spec.step == step.step
}

fn check_duplicates(steps: &[Step]) -> ConductorResult<()> {
    let mut seen = HashSet::new();
    for step in steps {
        if !seen.insert(step.key()) {
            return Err(ConductorError::DuplicateStep(step.to_string()));
        }
    }
    Ok(())
}

fn check_child_execution(step: &Step) -> ConductorResult<()> {
    if step.execute_on_child_nodes && !StepAction::resolve(step).supports_child_nodes() {
        return Err(ConductorError::invalid_step(
            step.to_string(),
            "only power_on, power_off, reboot and wait can be executed on child nodes",
        ));
    }
    Ok(())
}

fn validate_args(spec: &StepSpec, step: &Step) -> ConductorResult<()> {
    let unknown: Vec<&String> = step
        .args
        .keys()
        .filter(|arg| !spec.argsinfo.contains_key(arg.as_str()))
        .collect();
    if !unknown.is_empty() {
        let mut unknown: Vec<String> = unknown.into_iter().cloned().collect();
        unknown.sort();
        return Err(ConductorError::invalid_step(
            step.to_string(),
            format!("unexpected arguments: {}", unknown.join(", ")),
        ));
    }

    let mut missing: Vec<String> = spec
        .argsinfo
        .iter()
        .filter(|(name, info)| info.required && !step.args.contains_key(name.as_str()))
        .map(|(name, _)| name.clone())
        .collect();
    if !missing.is_empty() {
        missing.sort();
        return Err(ConductorError::MissingStepArgs {
            step: step.to_string(),
            args: missing,
        });
    }

    Ok(())
}
