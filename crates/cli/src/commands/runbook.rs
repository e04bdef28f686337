//! `metal runbook`

use crate::client::ApiClient;
use crate::output::print_runbook;
use crate::RunbookAction;
use colored::Colorize;
use mk_protocol::Runbook;

pub async fn handle(url: &str, action: RunbookAction) -> color_eyre::Result<()> {
    let client = ApiClient::new(url);
    match action {
        RunbookAction::List => {
            let runbooks: Vec<Runbook> = client.get("/v1/runbooks").await?;
            if runbooks.is_empty() {
                println!("{}", "No runbooks registered".yellow());
            }
            for runbook in runbooks {
                println!("{}  {} steps", runbook.name.cyan(), runbook.steps.len());
            }
        }
        RunbookAction::Show { name } => {
            let runbook: Runbook = client.get(&format!("/v1/runbooks/{name}")).await?;
            print_runbook(&runbook);
        }
    }
    Ok(())
}
