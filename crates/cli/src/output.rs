//! Terminal rendering of API objects.

use colored::{ColoredString, Colorize};
use mk_protocol::{Node, ProvisionState, Runbook};

fn state_label(state: ProvisionState) -> ColoredString {
    let label = state.as_str();
    if state.is_failed() {
        label.red().bold()
    } else if state.is_wait() || state.is_hold() {
        label.yellow()
    } else if state.is_stable() {
        label.green()
    } else {
        label.cyan()
    }
}

pub fn print_node_row(node: &Node) {
    let mut flags = Vec::new();
    if node.maintenance {
        flags.push("maintenance".yellow().to_string());
    }
    if let Some(holder) = &node.reservation {
        flags.push(format!("locked by {holder}").bright_black().to_string());
    }
    println!(
        "{}  {:<20} {:<16} {}",
        node.uuid.to_string().bright_black(),
        node.name.as_deref().unwrap_or("-"),
        state_label(node.provision_state),
        flags.join(" ")
    );
}

pub fn print_node(node: &Node) {
    println!("{}", node.ident().cyan().bold());
    println!("  uuid:            {}", node.uuid);
    println!("  provision state: {}", state_label(node.provision_state));
    if let Some(target) = node.target_provision_state {
        println!("  target state:    {target}");
    }
    println!("  power state:     {:?}", node.power_state);
    if node.maintenance {
        println!(
            "  maintenance:     {}",
            node.maintenance_reason.as_deref().unwrap_or("yes").yellow()
        );
    }
    if let Some(holder) = &node.reservation {
        println!("  reservation:     {holder}");
    }
    if !node.traits.is_empty() {
        println!("  traits:          {}", node.traits.join(", "));
    }
    if let Some(owner) = &node.owner {
        println!("  owner:           {owner}");
    }
    if let Some(parent) = node.parent_node {
        println!("  parent:          {parent}");
    }
    if let Some(error) = &node.last_error {
        println!("  last error:      {}", error.red());
    }
}

pub fn print_runbook(runbook: &Runbook) {
    println!("{}", runbook.name.cyan().bold());
    println!("  uuid:   {}", runbook.uuid);
    println!("  public: {}", runbook.public);
    if let Some(owner) = &runbook.owner {
        println!("  owner:  {owner}");
    }
    println!("  steps:");
    for step in &runbook.steps {
        println!("    {step}");
    }
}
