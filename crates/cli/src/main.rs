//! nb: one command line for buckets, tables, topics and log groups
//!
//! Global flags select the profile, region and output mode; each resource
//! family is a subcommand group.

mod commands;
mod context;
mod exit_code;
mod output;
mod parse;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::bucket::BucketCommands;
use crate::commands::completions::CompletionsArgs;
use crate::commands::logs::LogsCommands;
use crate::commands::profile::ProfileCommands;
use crate::commands::table::TableCommands;
use crate::commands::topic::TopicCommands;
use crate::context::Session;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

#[derive(Parser, Debug)]
#[command(name = "nb", version, about, propagate_version = true)]
pub struct Cli {
    /// Emit JSON instead of human-readable output
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log debug details to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    /// Profile to use instead of the default one
    #[arg(long, global = true, env = "NB_PROFILE")]
    pub profile: Option<String>,

    /// Region overriding the profile's region (stored by `profile set`)
    #[arg(long, global = true, env = "NB_REGION")]
    pub region: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage connection profiles
    #[command(subcommand)]
    Profile(ProfileCommands),

    /// Storage buckets and their objects
    #[command(subcommand)]
    Bucket(BucketCommands),

    /// Key-value tables and their items
    #[command(subcommand)]
    Table(TableCommands),

    /// Notification topics
    #[command(subcommand)]
    Topic(TopicCommands),

    /// Log groups, streams and events
    #[command(subcommand)]
    Logs(LogsCommands),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

fn init_tracing(cli: &Cli) {
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("off")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(!cli.no_color)
        .with_target(cli.debug)
        .init();
}

async fn run(cli: Cli, formatter: Formatter) -> anyhow::Result<ExitCode> {
    let command = match cli.command {
        Commands::Profile(cmd) => {
            return Ok(commands::profile::execute(cmd, cli.region, &formatter).await);
        }
        Commands::Completions(args) => return Ok(commands::completions::execute(args)),
        command => command,
    };

    let session = Session::load(formatter, cli.profile.as_deref(), cli.region)
        .context("Failed to load configuration")?;

    Ok(match command {
        Commands::Bucket(cmd) => commands::bucket::execute(cmd, &session).await,
        Commands::Table(cmd) => commands::table::execute(cmd, &session).await,
        Commands::Topic(cmd) => commands::topic::execute(cmd, &session).await,
        Commands::Logs(cmd) => commands::logs::execute(cmd, &session).await,
        Commands::Profile(_) | Commands::Completions(_) => ExitCode::Success,
    })
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    let output = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        quiet: cli.quiet,
    };
    let formatter = Formatter::new(output.clone());

    match run(cli, Formatter::new(output)).await {
        Ok(code) => code.into(),
        Err(e) => {
            let code = e
                .chain()
                .find_map(|cause| cause.downcast_ref::<nb_core::Error>())
                .map(ExitCode::from_error)
                .unwrap_or(ExitCode::GeneralError);
            formatter.error(&format!("{e:#}"));
            code.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["nb", "table", "list", "--json", "--profile", "dev"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.profile.as_deref(), Some("dev"));
        assert!(matches!(cli.command, Commands::Table(TableCommands::List)));
    }

    #[test]
    fn test_bucket_delete_all_arguments() {
        let cli =
            Cli::try_parse_from(["nb", "bucket", "delete", "--all", "--prefix", "scratch-"]).unwrap();
        match cli.command {
            Commands::Bucket(BucketCommands::Delete(args)) => {
                assert!(args.all);
                assert_eq!(args.bucket, None);
                assert_eq!(args.prefix.as_deref(), Some("scratch-"));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(Cli::try_parse_from(["nb", "bucket", "delete"]).is_err());
        assert!(Cli::try_parse_from(["nb", "bucket", "delete", "media", "--all"]).is_err());
        assert!(Cli::try_parse_from(["nb", "bucket", "delete", "media", "--prefix", "m"]).is_err());
    }
}
