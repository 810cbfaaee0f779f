mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{action::ActionSubcommand, approval::ApprovalSubcommand, recipe::RecipeSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "recipes",
    about = "Manage and serve signed, approval-gated recipes",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .recipes/)
    #[arg(long, global = true, env = "RECIPES_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Identity recorded as revision author, approval creator or approver
    #[arg(long, global = true, env = "RECIPES_USER")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .recipes/ with a starter config, database and signing key
    Init,

    /// Serve the HTTP API
    Serve {
        /// Port to listen on (0 = OS-assigned)
        #[arg(long, default_value = "8000")]
        port: u16,
    },

    /// Register and inspect actions
    Action {
        #[command(subcommand)]
        subcommand: ActionSubcommand,
    },

    /// Create, edit and inspect recipes
    Recipe {
        #[command(subcommand)]
        subcommand: RecipeSubcommand,
    },

    /// Request, decide and list approval requests
    Approval {
        #[command(subcommand)]
        subcommand: ApprovalSubcommand,
    },

    /// Sign every approved recipe and action whose signature is missing or stale
    Sign,

    /// Check stored signatures against current content
    Verify {
        /// Recipe id (omit to check every recipe and action)
        recipe: Option<u64>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let user = cli.user.as_deref();

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root, cli.json),
        Commands::Serve { port } => cmd::serve::run(&root, port),
        Commands::Action { subcommand } => cmd::action::run(&root, subcommand, cli.json),
        Commands::Recipe { subcommand } => cmd::recipe::run(&root, subcommand, user, cli.json),
        Commands::Approval { subcommand } => {
            cmd::approval::run(&root, subcommand, user, cli.json)
        }
        Commands::Sign => cmd::sign::sign(&root, cli.json),
        Commands::Verify { recipe } => cmd::sign::verify(&root, recipe, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
