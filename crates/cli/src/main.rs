use clap::{Args, Parser, Subcommand};
use mk_protocol::ProvisionVerb;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod client;
mod commands;
mod output;

#[derive(Parser)]
#[command(name = "metal")]
#[command(about = "metal-kit - bare-metal provisioning conductor", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level, overridden by RUST_LOG
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the conductor and its REST API
    Serve {
        /// Directory containing .metal-kit/
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Override `api_bind` from conductor.toml
        #[arg(long)]
        bind: Option<String>,
    },

    /// Create a .metal-kit/ directory with example configuration
    Init {
        /// Directory to create .metal-kit/ in
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Overwrite an existing .metal-kit/
        #[arg(long)]
        force: bool,

        /// Only one runbook and one deploy template
        #[arg(long)]
        minimal: bool,
    },

    /// Check runbooks and deploy templates against the enabled drivers
    Validate {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },

    /// Node management
    Node {
        /// Conductor API URL
        #[arg(long, env = "METAL_URL", default_value = "http://127.0.0.1:6385")]
        url: String,

        #[command(subcommand)]
        action: NodeAction,
    },

    /// Runbook queries
    Runbook {
        #[arg(long, env = "METAL_URL", default_value = "http://127.0.0.1:6385")]
        url: String,

        #[command(subcommand)]
        action: RunbookAction,
    },
}

#[derive(Subcommand)]
enum NodeAction {
    /// Enroll a node
    Create {
        #[arg(long)]
        name: Option<String>,
        /// Parent node UUID
        #[arg(long)]
        parent: Option<String>,
        /// Node trait, repeatable
        #[arg(long = "trait")]
        traits: Vec<String>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        conductor_group: Option<String>,
        #[arg(long)]
        shard: Option<String>,
    },
    /// Show a node
    Show { node: String },
    /// List nodes
    List,
    /// Delete a node
    Delete { node: String },
    /// Put a node into maintenance, or take it out with --clear
    Maintenance {
        node: String,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long, conflicts_with = "reason")]
        clear: bool,
    },
    /// Send an agent heartbeat, as the ramdisk would
    Heartbeat {
        node: String,
        #[arg(long)]
        agent_url: String,
        /// Report the running step as succeeded
        #[arg(long, conflicts_with = "failed")]
        succeeded: bool,
        /// Report the running step as failed with this error
        #[arg(long)]
        failed: Option<String>,
    },
    /// enroll -> manageable
    Manage(ProvisionArgs),
    /// manageable -> available
    Provide(ProvisionArgs),
    /// Manual cleaning with --clean-steps or --runbook
    Clean(ProvisionArgs),
    /// available -> active
    Deploy(ProvisionArgs),
    /// Redeploy an active node
    Rebuild(ProvisionArgs),
    /// Tear down a deployment
    Undeploy(ProvisionArgs),
    Rescue(ProvisionArgs),
    Unrescue(ProvisionArgs),
    Adopt(ProvisionArgs),
    /// Service an active node with --service-steps or --runbook
    Service(ProvisionArgs),
    /// Abort the current wait or hold
    Abort(ProvisionArgs),
    /// Resume a held node
    Unhold(ProvisionArgs),
}

impl NodeAction {
    fn verb(&self) -> Option<(ProvisionVerb, &ProvisionArgs)> {
        let verb = match self {
            NodeAction::Manage(args) => (ProvisionVerb::Manage, args),
            NodeAction::Provide(args) => (ProvisionVerb::Provide, args),
            NodeAction::Clean(args) => (ProvisionVerb::Clean, args),
            NodeAction::Deploy(args) => (ProvisionVerb::Deploy, args),
            NodeAction::Rebuild(args) => (ProvisionVerb::Rebuild, args),
            NodeAction::Undeploy(args) => (ProvisionVerb::Undeploy, args),
            NodeAction::Rescue(args) => (ProvisionVerb::Rescue, args),
            NodeAction::Unrescue(args) => (ProvisionVerb::Unrescue, args),
            NodeAction::Adopt(args) => (ProvisionVerb::Adopt, args),
            NodeAction::Service(args) => (ProvisionVerb::Service, args),
            NodeAction::Abort(args) => (ProvisionVerb::Abort, args),
            NodeAction::Unhold(args) => (ProvisionVerb::Unhold, args),
            _ => return None,
        };
        Some(verb)
    }
}

/// Arguments shared by the provisioning verbs.
#[derive(Args, Debug, Clone)]
struct ProvisionArgs {
    /// Node UUID or name
    node: String,

    /// JSON step list, or @path to a file containing one
    #[arg(long)]
    clean_steps: Option<String>,

    #[arg(long)]
    deploy_steps: Option<String>,

    #[arg(long)]
    service_steps: Option<String>,

    /// Runbook name or UUID
    #[arg(long)]
    runbook: Option<String>,

    /// Wait until the node is no longer reserved
    #[arg(long)]
    wait: bool,
}

#[derive(Subcommand)]
enum RunbookAction {
    List,
    Show { name: String },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve { dir, bind } => commands::serve::handle(&dir, bind).await,
        Commands::Init {
            dir,
            force,
            minimal,
        } => commands::init::handle(dir, force, minimal).await,
        Commands::Validate { dir } => commands::validate::handle(&dir).await,
        Commands::Node { url, action } => commands::node::handle(&url, action).await,
        Commands::Runbook { url, action } => commands::runbook::handle(&url, action).await,
    }
}
