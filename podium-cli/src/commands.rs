//! Command handlers for the CLI

use chrono::{DateTime, Utc};
use podium_anchor::{
    BoundedLedger, FinalizeOutcome, ItemOutcome, JsonRpcLedgerClient, LeaderboardStore,
    LeaderboardView, LedgerClient, PodiumConfig, PodiumService, RunBudget, SledStore,
    SubmitRequest, WorkerReport,
};
use podium_core::{format_token_amount, DayId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{Cli, Commands};

type CmdResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Service = PodiumService<SledStore, BoundedLedger<JsonRpcLedgerClient>>;

/// Dispatch a parsed command line
pub async fn run_command(cli: Cli) -> CmdResult {
    let mut config = PodiumConfig::from_env();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    match cli.command {
        Commands::Submit { player, score, day } => handle_submit(&config, player, score, day).await,
        Commands::Finalize { day, yesterday } => handle_finalize(&config, day, yesterday).await,
        Commands::Worker { deadline, json } => handle_worker(&config, deadline, json).await,
        Commands::Status { day } => handle_status(&config, day).await,
        Commands::Leaderboard { day, limit } => handle_leaderboard(&config, day, limit).await,
        Commands::DayInfo { day } => handle_day_info(&config, day).await,
    }
}

/// Wait for a previous `podium` process to release the database
const STORE_LOCK_WAIT: Duration = Duration::from_secs(5);

async fn open_store(config: &PodiumConfig) -> Result<Arc<SledStore>, Box<dyn std::error::Error + Send + Sync>> {
    Ok(Arc::new(
        SledStore::open_waiting(&config.data_dir, STORE_LOCK_WAIT).await?,
    ))
}

async fn open_service(config: &PodiumConfig) -> Result<Service, Box<dyn std::error::Error + Send + Sync>> {
    let store = open_store(config).await?;
    let ledger = Arc::new(BoundedLedger::connect(&config.ledger)?);
    Ok(PodiumService::new(store, ledger, config))
}

/// Explicit day id, or the configured current day
fn resolve_day(config: &PodiumConfig, day: Option<i64>) -> Result<DayId, Box<dyn std::error::Error + Send + Sync>> {
    match day {
        Some(value) => Ok(DayId::new(value)?),
        None => Ok(config.current_day(Utc::now())?),
    }
}

/// Handle submit command
async fn handle_submit(config: &PodiumConfig, player: String, score: i64, day_id: Option<i64>) -> CmdResult {
    let service = open_service(config).await?;
    let receipt = service
        .submit(&SubmitRequest { player, score, day_id }, Utc::now())
        .await?;
    service.store().flush().await?;

    println!("Score accepted!");
    println!("  Submission: {}", receipt.submission_id);
    println!("  Player: {}", receipt.player);
    println!("  Day: {}", receipt.day_id);
    println!(
        "  Best score: {}{}",
        receipt.best_score,
        if receipt.improved { " (new best)" } else { "" }
    );
    println!("  Checkpoint queued: {}", receipt.checkpoint_id);
    Ok(())
}

/// Handle finalize command
async fn handle_finalize(config: &PodiumConfig, day: Option<i64>, yesterday: bool) -> CmdResult {
    let service = open_service(config).await?;
    let outcome = match (day, yesterday) {
        (Some(value), _) => {
            let day = DayId::new(value)?;
            if let Some(notice) = open_day_notice(day, Utc::now()) {
                warn!("{}", notice);
            }
            service.request_finalize(day).await?
        }
        (None, true) => service.finalize_previous_day(Utc::now()).await?,
        (None, false) => return Err("Either --day or --yesterday must be provided".into()),
    };
    service.store().flush().await?;

    match outcome {
        FinalizeOutcome::Enqueued { commit_id, winners } => {
            println!("Finalize enqueued: {}", commit_id);
            for (rank, (player, score)) in winners.iter().enumerate() {
                println!("  #{} {} - {}", rank + 1, player, score);
            }
            println!("Run `podium worker` to commit it to the ledger.");
        }
        FinalizeOutcome::AlreadyFinalized { commit_id } => match commit_id {
            Some(id) => println!("Day already finalized by commit {}", id),
            None => println!("Day already finalized on the ledger"),
        },
        FinalizeOutcome::AlreadyQueued { commit_id, status } => {
            println!("Finalize already queued: {} ({})", commit_id, status);
        }
        FinalizeOutcome::NotEnoughPlayers { players, required } => {
            println!(
                "Not enough players to finalize: {} of {} required",
                players, required
            );
        }
    }
    Ok(())
}

/// Warning for finalizing a day whose window has not closed yet
fn open_day_notice(day: DayId, now: DateTime<Utc>) -> Option<String> {
    if day.has_closed(now) {
        return None;
    }
    let opened = now.signed_duration_since(day.starts_at());
    Some(format!(
        "Day {} is still open ({}h in); scores submitted later will not change its winners",
        day,
        opened.num_hours().max(0)
    ))
}

/// Handle worker command
async fn handle_worker(config: &PodiumConfig, deadline: Option<u64>, json: bool) -> CmdResult {
    let service = open_service(config).await?;

    let limit = deadline.map_or_else(|| config.worker.deadline(), Duration::from_secs);
    let cancel = CancellationToken::new();
    let budget = RunBudget::new(limit, cancel.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current item");
            cancel.cancel();
        }
    });

    let report = service.run_worker_with(&budget).await?;
    service.store().flush().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.is_clean() {
        return Err(format!("worker run not clean: {} failed", report.failed()).into());
    }
    Ok(())
}

fn print_report(report: &WorkerReport) {
    if report.is_idle() {
        println!("Nothing to do.");
        return;
    }

    println!(
        "Worker run: {} items, {} anchored, {} failed",
        report.items.len(),
        report.anchored(),
        report.failed()
    );
    if report.released_claims > 0 {
        println!("  Released stale claims: {}", report.released_claims);
    }
    for item in &report.items {
        let detail = match &item.outcome {
            ItemOutcome::Anchored { tx_hash } => format!("anchored {}", tx_hash),
            ItemOutcome::NoOp => "no-op".to_string(),
            ItemOutcome::Reconciled => "already on ledger".to_string(),
            ItemOutcome::Skipped => "skipped".to_string(),
            ItemOutcome::Failed { reason } => format!("FAILED: {}", reason),
        };
        println!("  {} {} day {} - {}", item.kind, item.commit_id, item.day_id, detail);
    }
    if let Some(reason) = &report.stopped_early {
        println!("  Stopped early: {}", reason);
    }
}

/// Handle status command
async fn handle_status(config: &PodiumConfig, day: Option<i64>) -> CmdResult {
    let store = open_store(config).await?;
    let day = day.map(DayId::new).transpose()?;

    let stats = store.get_stats().await?;
    println!("Queue status ({}):", config.data_dir);
    println!("  Submissions: {}", stats.submissions);
    println!("  Best scores: {}", stats.best_scores);
    println!(
        "  Commits: {} pending, {} processing, {} done, {} error",
        stats.pending, stats.processing, stats.done, stats.error
    );
    println!("  Commit logs: {}", stats.commit_logs);

    let open: Vec<_> = store
        .list_commits(day)
        .await?
        .into_iter()
        .filter(|c| day.is_some() || !c.status.is_terminal())
        .collect();
    if open.is_empty() {
        return Ok(());
    }

    println!("\nCommits:");
    for commit in open {
        println!(
            "  {} {} day {} - {} (attempts {})",
            commit.kind(),
            commit.id,
            commit.day_id,
            commit.status,
            commit.attempts
        );
        if let Some(message) = &commit.error_message {
            println!("    error: {}", message);
        }
    }
    Ok(())
}

/// Handle leaderboard command
async fn handle_leaderboard(config: &PodiumConfig, day: Option<i64>, limit: usize) -> CmdResult {
    let store = open_store(config).await?;
    let day = resolve_day(config, day)?;
    let view = LeaderboardView::load(store.as_ref(), day, limit).await?;

    println!("Leaderboard for day {} ({} players):", view.day_id, view.players);
    for entry in &view.entries {
        println!("  #{:<3} {} - {}", entry.rank, entry.player, entry.score);
    }

    println!("\nDigest: {}", view.current_digest);
    match view.checkpoints.last() {
        Some(last) => println!(
            "  Last checkpoint: {} at {} ({})",
            last.tx_hash,
            last.anchored_at,
            if view.is_anchored() { "current" } else { "stale" }
        ),
        None => println!("  Not anchored yet"),
    }
    if let Some(tx) = &view.finalize_tx {
        println!("  Finalized in: {}", tx);
    }
    Ok(())
}

/// Handle day-info command
async fn handle_day_info(config: &PodiumConfig, day: Option<i64>) -> CmdResult {
    let day = resolve_day(config, day)?;
    let ledger = BoundedLedger::connect(&config.ledger)?;
    let block = ledger.inner().block_number().await?;
    let info = ledger.read_day_info(day).await?;
    let split = info.prize_split();

    println!("Day {} (node at block {}):", day, block);
    println!("  Pool: {}", format_token_amount(info.total_pool));
    println!("  Checkpoints: {}", info.checkpoint_count);
    println!("  Finalized: {}", info.finalized);

    println!("\nPrize split:");
    println!("  Site fee: {}", format_token_amount(split.site_fee));
    for (rank, prize) in split.prizes().iter().enumerate() {
        if info.finalized {
            println!(
                "  #{} {} - {} (score {})",
                rank + 1,
                format_token_amount(*prize),
                info.winners[rank],
                info.winner_scores[rank]
            );
        } else {
            println!("  #{} {}", rank + 1, format_token_amount(*prize));
        }
    }
    if split.dust() > 0 {
        println!("  Undistributed: {}", format_token_amount(split.dust()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_open_day_notice() {
        let day = DayId::new(20250601).unwrap();

        let midday = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap();
        let notice = open_day_notice(day, midday).unwrap();
        assert!(notice.contains("20250601"));
        assert!(notice.contains("12h in"));

        let next_day = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 1).unwrap();
        assert!(open_day_notice(day, next_day).is_none());
    }
}
