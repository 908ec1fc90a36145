//! Aera CLI - file emergency reports from the command line
//!
//! Writes land in the local replica first and are replayed against Supabase
//! whenever it is reachable.

mod cli;
mod commands;
mod config_profiles;
mod error;
mod remote;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, ConfigCommands, QueueCommands, SessionCommands};
use crate::commands::{
    run_config_init, run_list, run_queue, run_queue_clear_failed, run_queue_failed, run_report,
    run_session_clear, run_session_import, run_session_status, run_status, run_sync, run_update,
    run_watch, ReportArgs, SessionImportArgs, UpdateArgs,
};
use crate::error::CliError;

// Engine futures hold `!Send` trait futures; one thread is enough for a CLI.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "aera=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let profile = cli.profile.as_deref();
    let db_path = cli.db_path;

    match cli.command {
        Commands::Report {
            description,
            priority,
            lat,
            lon,
            owner,
        } => {
            run_report(
                ReportArgs {
                    description,
                    priority,
                    lat,
                    lon,
                    owner,
                },
                profile,
                db_path,
            )
            .await
        }
        Commands::Update {
            id,
            status,
            priority,
            lat,
            lon,
        } => {
            run_update(
                UpdateArgs {
                    id,
                    status,
                    priority,
                    lat,
                    lon,
                },
                profile,
                db_path,
            )
            .await
        }
        Commands::List { json } => run_list(json, profile, db_path).await,
        Commands::Queue { command, json } => match command {
            None => run_queue(json, profile, db_path).await,
            Some(QueueCommands::Failed { json }) => run_queue_failed(json, profile, db_path).await,
            Some(QueueCommands::ClearFailed) => run_queue_clear_failed(profile, db_path).await,
        },
        Commands::Sync => run_sync(profile, db_path).await,
        Commands::Watch => run_watch(profile, db_path).await,
        Commands::Status { clear_degraded } => run_status(clear_degraded, profile, db_path).await,
        Commands::Session { command } => match command {
            SessionCommands::Import {
                access_token,
                refresh_token,
                expires_at,
                user_id,
                email,
            } => {
                run_session_import(
                    SessionImportArgs {
                        access_token,
                        refresh_token,
                        expires_at,
                        user_id,
                        email,
                    },
                    profile,
                    db_path,
                )
                .await
            }
            SessionCommands::Status => run_session_status(profile, db_path).await,
            SessionCommands::Clear => run_session_clear(profile, db_path).await,
        },
        Commands::Config { command } => match command {
            ConfigCommands::Init {
                supabase_url,
                supabase_anon_key,
                reports_table,
                no_activate,
            } => run_config_init(
                profile,
                supabase_url,
                supabase_anon_key,
                reports_table,
                no_activate,
            ),
        },
    }
}
