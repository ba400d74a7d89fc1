//! Rollcall classroom simulator
//!
//! Runs a session host and a room of discovery clients against the in-memory
//! radio, then prints the session, its summary and the exported ledger as
//! JSON on stdout. Logs go to stderr.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use rollcall_core::config::{load_config, load_config_file};
use rollcall_core::tracing_init::init_tracing;
use rollcall_host::LedgerDatabase;
use rollcall_proto::SessionCode;

mod scenario;

use scenario::Roster;

#[derive(Parser, Debug)]
#[command(name = "rollcall-sim")]
#[command(version, about = "Rollcall classroom simulation over an in-memory radio")]
struct Args {
    /// Students present in the room with a live face
    #[arg(long, default_value_t = 10, env = "ROLLCALL_SIM_STUDENTS")]
    students: usize,

    /// Genuine students too far from the host to pass the RSSI floor
    #[arg(long, default_value_t = 1, env = "ROLLCALL_SIM_FAR_STUDENTS")]
    far_students: usize,

    /// Students presenting a photo instead of a live face
    #[arg(long, default_value_t = 1, env = "ROLLCALL_SIM_SPOOFERS")]
    spoofers: usize,

    /// Session code to advertise; random when omitted
    #[arg(long)]
    code: Option<String>,

    /// Config file, used instead of the global and project settings
    #[arg(long, env = "ROLLCALL_CONFIG")]
    config: Option<PathBuf>,

    /// Ledger database path; in memory when omitted
    #[arg(long, env = "ROLLCALL_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug"); defaults to the config value
    #[arg(long, env = "ROLLCALL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long, env = "ROLLCALL_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
#[allow(clippy::print_stdout)]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config_file(path)?,
        None => load_config(std::env::current_dir().ok().as_deref())?,
    };

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.host.log_level.clone());
    let log_filter =
        format!("rollcall_sim={level},rollcall_host={level},rollcall_client={level}");
    init_tracing(&log_filter, args.log_json)?;

    let code = args.code.as_deref().map(SessionCode::parse).transpose()?;
    let roster = Roster {
        students: args.students,
        far_students: args.far_students,
        spoofers: args.spoofers,
    };
    info!(
        version = env!("CARGO_PKG_VERSION"),
        students = roster.students,
        far_students = roster.far_students,
        spoofers = roster.spoofers,
        "Starting rollcall-sim"
    );

    let store = match args.db_path.as_ref().or(config.host.database_path.as_ref()) {
        Some(path) => {
            info!(path = %path.display(), "Opening ledger database");
            Some(LedgerDatabase::open(path).await?)
        }
        None => None,
    };

    let report = scenario::run(&config, &roster, code, store).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
