//! Checks loaded runbooks and deploy templates against the enabled drivers.
//!
//! The loader only checks syntax and names. Whether a runbook's steps exist,
//! take the right arguments and can run at all depends on which interfaces
//! the conductor enables, so that check happens here with the same collector
//! the executor uses.

use crate::config::models::AppConfig;
use crate::drivers::registry::DriverRegistry;
use crate::error::ConductorError;
use crate::steps::{StepCollector, StepSource};
use mk_protocol::StepPhase;
use std::fmt;

/// A definition that would be rejected when used.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    /// `runbook` or `deploy template`.
    pub kind: &'static str,
    pub name: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.name, self.message)
    }
}

/// Validate every runbook and deploy template in `config`.
///
/// A runbook passes if its steps are valid for cleaning or servicing. A
/// deploy template passes if it merges cleanly into the default deploy
/// steps. Returns one issue per failing definition; empty means valid.
pub fn validate_definitions(config: &AppConfig, registry: &DriverRegistry) -> Vec<ValidationIssue> {
    let collector = StepCollector::new(registry, &config.conductor.step_priority_overrides);
    let mut issues = Vec::new();

    for runbook in &config.runbooks {
        let clean = collector.collect(StepPhase::Clean, StepSource::Explicit(&runbook.steps));
        let service = collector.collect(StepPhase::Service, StepSource::Explicit(&runbook.steps));
        if let (Err(e), Err(_)) = (clean, service) {
            issues.push(issue("runbook", &runbook.name, &e));
        }
    }

    for template in &config.deploy_templates {
        let overrides: [&[mk_protocol::Step]; 1] = [&template.steps];
        let result = collector.collect(
            StepPhase::Deploy,
            StepSource::Defaults {
                overrides: &overrides,
            },
        );
        if let Err(e) = result {
            issues.push(issue("deploy template", &template.name, &e));
        }
    }

    issues
}

fn issue(kind: &'static str, name: &str, error: &ConductorError) -> ValidationIssue {
    ValidationIssue {
        kind,
        name: name.to_string(),
        message: error.to_string(),
    }
}
