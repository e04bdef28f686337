//! Step ordering.
//!
//! Driver steps run by priority, highest first. Equal priorities are broken
//! by a fixed interface order that differs between deployment and the
//! other phases. The sort is stable, so steps that still tie keep the order
//! in which they were collected.

use mk_protocol::{Step, StepInterface, StepPhase};
use std::cmp::Reverse;

const CLEAN_ORDER: [StepInterface; 5] = [
    StepInterface::Power,
    StepInterface::Management,
    StepInterface::Deploy,
    StepInterface::Bios,
    StepInterface::Raid,
];

const DEPLOY_ORDER: [StepInterface; 5] = [
    StepInterface::Power,
    StepInterface::Deploy,
    StepInterface::Management,
    StepInterface::Bios,
    StepInterface::Raid,
];

/// Interface tie-break order for a phase.
pub fn interface_order(phase: StepPhase) -> &'static [StepInterface; 5] {
    match phase {
        StepPhase::Deploy => &DEPLOY_ORDER,
        StepPhase::Clean | StepPhase::Service => &CLEAN_ORDER,
    }
}

fn interface_rank(phase: StepPhase, interface: StepInterface) -> usize {
    interface_order(phase)
        .iter()
        .position(|i| *i == interface)
        .unwrap_or(usize::MAX)
}

/// Order steps for execution and drop disabled ones.
///
/// Steps without a priority sort after every prioritized step and keep
/// their relative order; the interface tie-break only applies between
/// prioritized steps.
pub fn schedule(phase: StepPhase, mut steps: Vec<Step>) -> Vec<Step> {
    steps.retain(|s| !matches!(s.priority, Some(p) if p <= 0));
    steps.sort_by_key(|s| match s.priority {
        Some(priority) => (Reverse(priority), interface_rank(phase, s.interface)),
        None => (Reverse(0), 0),
    });
    steps
}

/// Order runbook steps by their `order` field.
///
/// Steps without an order keep their position after the ordered ones.
pub fn order_explicit(mut steps: Vec<Step>) -> Vec<Step> {
    steps.sort_by_key(|s| s.order.unwrap_or(u32::MAX));
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(interface: StepInterface, name: &str, priority: i32) -> Step {
        Step::new(interface, name).with_priority(priority)
    }

    fn names(steps: &[Step]) -> Vec<String> {
        steps.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_descending_priority_not_list_order() {
        let steps = vec![
            step(StepInterface::Deploy, "erase_devices", 10),
            step(StepInterface::Raid, "create_configuration", 20),
        ];

        let ordered = schedule(StepPhase::Clean, steps);

        assert_eq!(
            names(&ordered),
            vec!["raid.create_configuration", "deploy.erase_devices"]
        );
    }

    #[test]
    fn test_clean_tie_break() {
        let steps = vec![
            step(StepInterface::Raid, "delete_configuration", 50),
            step(StepInterface::Bios, "factory_reset", 50),
            step(StepInterface::Deploy, "erase_devices", 50),
            step(StepInterface::Management, "clear_job_queue", 50),
            step(StepInterface::Power, "reboot", 50),
        ];

        let ordered = schedule(StepPhase::Clean, steps);

        let interfaces: Vec<StepInterface> = ordered.iter().map(|s| s.interface).collect();
        assert_eq!(interfaces, CLEAN_ORDER.to_vec());
    }

    #[test]
    fn test_deploy_tie_break_puts_deploy_before_management() {
        let steps = vec![
            step(StepInterface::Management, "clear_job_queue", 50),
            step(StepInterface::Deploy, "write_image", 50),
        ];

        let ordered = schedule(StepPhase::Deploy, steps);
        assert_eq!(ordered[0].interface, StepInterface::Deploy);

        let steps = vec![
            step(StepInterface::Deploy, "write_image", 50),
            step(StepInterface::Management, "clear_job_queue", 50),
        ];
        let ordered = schedule(StepPhase::Clean, steps);
        assert_eq!(ordered[0].interface, StepInterface::Management);
    }

    #[test]
    fn test_zero_priority_is_dropped() {
        let steps = vec![
            step(StepInterface::Deploy, "erase_devices", 0),
            step(StepInterface::Deploy, "erase_devices_metadata", 99),
        ];

        let ordered = schedule(StepPhase::Clean, steps);

        assert_eq!(names(&ordered), vec!["deploy.erase_devices_metadata"]);
    }

    #[test]
    fn test_unprioritized_steps_keep_list_order() {
        let steps = vec![
            Step::new(StepInterface::Raid, "delete_configuration"),
            Step::new(StepInterface::Power, "reboot"),
            Step::new(StepInterface::Bios, "factory_reset"),
        ];

        let ordered = schedule(StepPhase::Clean, steps.clone());
        assert_eq!(ordered, steps);
    }

    #[test]
    fn test_order_explicit() {
        let steps = vec![
            Step::new(StepInterface::Power, "reboot").with_order(2),
            Step::new(StepInterface::Bios, "factory_reset").with_order(1),
        ];

        let ordered = order_explicit(steps);
        assert_eq!(names(&ordered), vec!["bios.factory_reset", "power.reboot"]);
    }
}
