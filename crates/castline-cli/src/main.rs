//! Castline CLI tool.

use clap::{Parser, Subcommand};

mod commands;

use commands::ApiClient;

#[derive(Parser)]
#[command(name = "castline")]
#[command(about = "Castline publish pipeline CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "CASTLINE_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect publish jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Act on stored posts
    Posts {
        #[command(subcommand)]
        command: PostCommands,
    },
    /// Queue an ad-hoc publish job
    Publish {
        /// Owner of the job
        #[arg(long)]
        user: String,
        /// Caption text
        #[arg(long)]
        caption: String,
        /// Provider to publish to (repeatable; default: all)
        #[arg(long = "provider")]
        providers: Vec<String>,
        /// Server-local media path (repeatable)
        #[arg(long = "media")]
        media: Vec<String>,
        /// Exercise the pipeline without contacting providers
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a system configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "castline.kdl")]
        path: String,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// Show job status and per-provider results
    Show {
        /// Job ID
        id: String,
    },
}

#[derive(Subcommand)]
enum PostCommands {
    /// Publish a scheduled post immediately
    PublishNow {
        /// Post ID
        id: String,
        /// Owner of the post
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Jobs { command } => match command {
            JobCommands::Show { id } => {
                let client = ApiClient::new(&cli.api_url)?;
                commands::jobs::show(&client, &id).await?;
            }
        },
        Commands::Posts { command } => match command {
            PostCommands::PublishNow { id, user } => {
                let client = ApiClient::new(&cli.api_url)?;
                commands::posts::publish_now(&client, &id, &user).await?;
            }
        },
        Commands::Publish {
            user,
            caption,
            providers,
            media,
            dry_run,
        } => {
            let client = ApiClient::new(&cli.api_url)?;
            commands::publish(&client, &user, &caption, providers, media, dry_run).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
