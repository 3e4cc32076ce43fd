use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tessera::{cli, config, server};

#[derive(Parser)]
#[command(
    name = "tessera",
    version,
    about = "Working memory and plan coordination server for AI agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server (POST /mcp/{project})
    Serve,
    /// Serve one project over stdio
    Stdio {
        /// Project slug
        #[arg(long)]
        project: String,
    },
    /// Manage projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Inspect and repair plans
    Plan {
        #[command(subcommand)]
        action: PlanAction,
    },
    /// Show request statistics
    Stats {
        /// Limit to one project
        #[arg(long)]
        project: Option<String>,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Create a project
    Add {
        /// URL-safe identifier: lowercase letters, digits and '-'
        slug: String,
        /// Display name
        name: String,
    },
    /// List projects
    List,
}

#[derive(Subcommand)]
enum PlanAction {
    /// Print a plan and its steps
    Show {
        #[arg(long)]
        project: String,
        plan_id: String,
    },
    /// Return a failed plan to idle; failed steps become pending again
    Reset {
        #[arg(long)]
        project: String,
        plan_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::TesseraConfig::load()?;

    // Log to stderr so stdout stays clean for JSON-RPC on stdio.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => server::serve_http(config).await?,
        Command::Stdio { project } => server::serve_stdio(config, &project).await?,
        Command::Project { action } => match action {
            ProjectAction::Add { slug, name } => cli::projects::add(&config, &slug, &name)?,
            ProjectAction::List => cli::projects::list(&config)?,
        },
        Command::Plan { action } => match action {
            PlanAction::Show { project, plan_id } => cli::plans::show(&config, &project, &plan_id)?,
            PlanAction::Reset { project, plan_id } => {
                cli::plans::reset(&config, &project, &plan_id)?
            }
        },
        Command::Stats { project } => cli::stats::stats(&config, project.as_deref())?,
    }

    Ok(())
}
