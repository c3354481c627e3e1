//! proctor_report - integrity report for a stored session

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Serialize;

use proctor_kernel::{
    segment_episodes, Episode, IntegrityReport, ProctorConfig, SessionStore, SqliteSessionStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the session database.
    #[arg(long, env = "PROCTOR_DB_PATH", default_value = "proctor.db")]
    db_path: String,
    /// Session id. Omit to list sessions.
    #[arg(long)]
    session: Option<String>,
    /// Gap that splits episodes, in milliseconds (default: configured cooldown).
    #[arg(long)]
    episode_gap_ms: Option<i64>,
    /// Include the raw event log.
    #[arg(long)]
    events: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportOutput {
    candidate_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    candidate_id: Option<String>,
    started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    ended_at: Option<i64>,
    #[serde(flatten)]
    report: IntegrityReport,
    episodes: Vec<Episode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<Vec<proctor_kernel::ProctorEvent>>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let mut store = SqliteSessionStore::open(&args.db_path)?;

    let Some(session_id) = args.session.as_deref() else {
        let ids = store.list_sessions()?;
        if ids.is_empty() {
            return Err(anyhow!("no sessions in {}", args.db_path));
        }
        for id in ids {
            println!("{}", id);
        }
        return Ok(());
    };

    let gap_ms = match args.episode_gap_ms {
        Some(ms) if ms < 0 => return Err(anyhow!("--episode-gap-ms must be non-negative")),
        Some(ms) => ms,
        None => ProctorConfig::load()?.cooldown_ms,
    };

    let session = store.get_session(session_id)?;
    let report = store.get_report(session_id)?;
    let output = ReportOutput {
        episodes: segment_episodes(&session.events, gap_ms),
        candidate_name: session.candidate_name,
        candidate_id: session.candidate_id,
        started_at: session.started_at,
        ended_at: session.ended_at,
        report,
        events: args.events.then_some(session.events),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
