//! `metal node`

use crate::client::ApiClient;
use crate::output::{print_node, print_node_row};
use crate::{NodeAction, ProvisionArgs};
use color_eyre::eyre::{bail, eyre, Result, WrapErr};
use colored::Colorize;
use mk_protocol::{
    CreateNodeRequest, HeartbeatRequest, MaintenanceRequest, Node, ProvisionRequest,
    ProvisionVerb, Step, StepResult,
};
use reqwest::Method;
use std::time::Duration;

const WAIT_POLL: Duration = Duration::from_millis(500);
const WAIT_ATTEMPTS: u32 = 600;

pub async fn handle(url: &str, action: NodeAction) -> Result<()> {
    let client = ApiClient::new(url);

    match action {
        NodeAction::Create {
            name,
            parent,
            traits,
            owner,
            conductor_group,
            shard,
        } => {
            let parent_node = parent
                .map(|p| p.parse::<uuid::Uuid>())
                .transpose()
                .wrap_err("--parent must be a node UUID")?;
            let request = CreateNodeRequest {
                name,
                parent_node,
                traits,
                owner,
                conductor_group,
                shard,
            };
            let node: Node = client.send_json(Method::POST, "/v1/nodes", &request).await?;
            println!("{} Enrolled {}", "✓".green().bold(), node.ident().cyan().bold());
            print_node(&node);
        }
        NodeAction::Show { node } => {
            let node: Node = client.get(&format!("/v1/nodes/{node}")).await?;
            print_node(&node);
        }
        NodeAction::List => {
            let nodes: Vec<Node> = client.get("/v1/nodes").await?;
            if nodes.is_empty() {
                println!("{}", "No nodes enrolled".yellow());
                println!("\n  {} metal node create --name <NAME>", "$".bright_black());
            }
            for node in &nodes {
                print_node_row(node);
            }
        }
        NodeAction::Delete { node } => {
            client
                .send_empty::<()>(Method::DELETE, &format!("/v1/nodes/{node}"), None)
                .await?;
            println!("{} Deleted {}", "✓".green().bold(), node.cyan());
        }
        NodeAction::Maintenance {
            node,
            reason,
            clear,
        } => {
            let request = MaintenanceRequest {
                maintenance: !clear,
                reason,
            };
            let node: Node = client
                .send_json(Method::PATCH, &format!("/v1/nodes/{node}/maintenance"), &request)
                .await?;
            print_node(&node);
        }
        NodeAction::Heartbeat {
            node,
            agent_url,
            succeeded,
            failed,
        } => {
            let step_result = match (succeeded, failed) {
                (_, Some(error)) => Some(StepResult::Failed { error }),
                (true, None) => Some(StepResult::Succeeded),
                (false, None) => None,
            };
            let request = HeartbeatRequest {
                agent_url,
                step_result,
            };
            client
                .send_empty(Method::POST, &format!("/v1/heartbeat/{node}"), Some(&request))
                .await?;
            println!("{} Heartbeat accepted for {}", "✓".green().bold(), node.cyan());
        }
        other => match other.verb() {
            Some((verb, args)) => provision(&client, verb, args).await?,
            None => bail!("unsupported node action"),
        },
    }
    Ok(())
}

async fn provision(client: &ApiClient, verb: ProvisionVerb, args: &ProvisionArgs) -> Result<()> {
    let request = build_request(verb, args)?;
    let path = format!("/v1/nodes/{}/states/provision", args.node);
    let node: Node = client.send_json(Method::PUT, &path, &request).await?;
    println!(
        "{} {} accepted for {} ({})",
        "✓".green().bold(),
        verb.as_str().bold(),
        node.ident().cyan(),
        node.provision_state
    );

    if args.wait {
        let node = wait_for_release(client, &args.node).await?;
        print_node(&node);
        if node.provision_state.is_failed() {
            bail!("{} failed", verb);
        }
    }
    Ok(())
}

fn build_request(verb: ProvisionVerb, args: &ProvisionArgs) -> Result<ProvisionRequest> {
    let mut request = ProvisionRequest::new(verb);
    if let Some(steps) = &args.clean_steps {
        request = request.with_clean_steps(parse_steps(steps)?);
    }
    if let Some(steps) = &args.deploy_steps {
        request = request.with_deploy_steps(parse_steps(steps)?);
    }
    if let Some(steps) = &args.service_steps {
        request = request.with_service_steps(parse_steps(steps)?);
    }
    if let Some(runbook) = &args.runbook {
        request = request.with_runbook(runbook.clone());
    }
    Ok(request)
}

/// Parse a JSON step list given inline or as `@path`.
pub fn parse_steps(arg: &str) -> Result<Vec<Step>> {
    let json = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .wrap_err_with(|| format!("could not read step file {path}"))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&json).map_err(|e| eyre!("invalid step list: {e}"))
}

async fn wait_for_release(client: &ApiClient, ident: &str) -> Result<Node> {
    for _ in 0..WAIT_ATTEMPTS {
        let node: Node = client.get(&format!("/v1/nodes/{ident}")).await?;
        if node.reservation.is_none() {
            return Ok(node);
        }
        tokio::time::sleep(WAIT_POLL).await;
    }
    bail!("timed out waiting for node {ident} to be released")
}
