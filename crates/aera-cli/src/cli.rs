use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aera")]
#[command(about = "File emergency reports, online or not")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local replica database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name for Supabase configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// File a new report
    #[command(alias = "new")]
    Report {
        /// What is happening
        description: Vec<String>,
        /// low, medium, high or critical
        #[arg(long)]
        priority: Option<String>,
        /// Latitude of the incident
        #[arg(long, requires = "lon", allow_negative_numbers = true)]
        lat: Option<f64>,
        /// Longitude of the incident
        #[arg(long, requires = "lat", allow_negative_numbers = true)]
        lon: Option<f64>,
        /// Owner id (defaults to the signed-in user)
        #[arg(long)]
        owner: Option<String>,
    },
    /// Change fields of an existing report
    Update {
        /// Local id, remote id, or unique prefix of either
        id: String,
        /// active, acknowledged, resolved or cancelled
        #[arg(long)]
        status: Option<String>,
        /// low, medium, high or critical
        #[arg(long)]
        priority: Option<String>,
        #[arg(long, requires = "lon", allow_negative_numbers = true)]
        lat: Option<f64>,
        #[arg(long, requires = "lat", allow_negative_numbers = true)]
        lon: Option<f64>,
    },
    /// List reports held in the local replica
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect the operation queue
    Queue {
        #[command(subcommand)]
        command: Option<QueueCommands>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replay queued operations now
    Sync,
    /// Stay running and replay the queue whenever Supabase becomes reachable
    Watch,
    /// Show sync and storage state
    Status {
        /// Reset the degraded-storage marker
        #[arg(long)]
        clear_degraded: bool,
    },
    /// Manage the stored Supabase session
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Manage CLI profile configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Operations dropped after a permanent failure
    Failed {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Forget the failed-operation log
    ClearFailed,
}

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Store a session obtained from Supabase Auth
    Import {
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        refresh_token: String,
        /// Expiry as a unix timestamp in seconds (0 forces a refresh)
        #[arg(long, default_value_t = 0)]
        expires_at: i64,
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// Show the stored session
    Status,
    /// Remove the stored session
    Clear,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Create or update the profile selected with `--profile`
    Init {
        /// Supabase project URL
        #[arg(long)]
        supabase_url: Option<String>,
        /// Supabase anon key
        #[arg(long)]
        supabase_anon_key: Option<String>,
        /// Remote table holding reports
        #[arg(long)]
        reports_table: Option<String>,
        /// Do not make this profile the active one
        #[arg(long)]
        no_activate: bool,
    },
}
