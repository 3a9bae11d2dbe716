use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser as _, Subcommand};
use lp_swap::clock::{Clock as _, SystemClock};
use lp_swap::config::SwapConfig;
use lp_swap::storage::{QueryParam, SqliteSwapStorage, StoredSwap, SwapStorage as _};
use lp_swap::swap::{SwapType, is_prunable, migrate};
use serde_json::json;

/// Offline inspection and maintenance of a swap store.
#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "swaps.sqlite3")]
    store_path: PathBuf,

    /// JSON config file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    List {
        #[arg(long)]
        swap_type: Option<SwapType>,

        /// Only swaps that have not reached a terminal state.
        #[arg(long)]
        pending: bool,
    },
    Get {
        #[arg(long)]
        id: String,
    },
    /// Upgrades legacy rows to the current record version.
    Migrate,
    /// Removes quotes that expired unused and are older than the retention.
    Prune {
        #[arg(long)]
        retention_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    lp_swap::logging::init().ok();
    let args = Args::parse();

    let cfg = match &args.config {
        Some(path) => SwapConfig::load(path)?,
        None => SwapConfig::default(),
    };
    let store = SqliteSwapStorage::open(args.store_path.clone())?;

    let out = match args.command {
        Command::List { swap_type, pending } => {
            let types = match swap_type {
                Some(t) => vec![t],
                None => SwapType::ALL.to_vec(),
            };
            let groups: Vec<Vec<QueryParam>> = types
                .into_iter()
                .map(|t| {
                    let mut group = vec![QueryParam::swap_type(t)];
                    if pending {
                        group.push(QueryParam::states(&t.pending_codes()));
                    }
                    group
                })
                .collect();
            let rows = store.query(&groups).await.context("list swaps")?;
            json!(rows.iter().map(summary).collect::<Vec<_>>())
        }
        Command::Get { id } => {
            let rows = store
                .query(&[vec![QueryParam::id(&id)]])
                .await
                .context("get swap")?;
            let row = rows
                .into_iter()
                .next()
                .with_context(|| format!("swap {id} not found"))?;
            json!({
              "summary": summary(&row),
              "record": row.data,
            })
        }
        Command::Migrate => {
            let rows = store.query(&[]).await.context("load swaps")?;
            let mut upgraded = Vec::new();
            let mut failed = Vec::new();
            for mut row in rows {
                match migrate::upgrade(&mut row) {
                    Ok(true) => upgraded.push(row),
                    Ok(false) => {}
                    Err(err) => failed.push(json!({ "id": row.id, "error": err.to_string() })),
                }
            }
            store.save_all(&upgraded).await.context("save upgraded swaps")?;
            json!({
              "upgraded": upgraded.iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
              "failed": failed,
            })
        }
        Command::Prune { retention_secs } => {
            let retention = retention_secs
                .map(Duration::from_secs)
                .unwrap_or(cfg.retention);
            let retention_ms = u64::try_from(retention.as_millis()).unwrap_or(u64::MAX);
            let now = SystemClock.now_ms();
            let rows = store.query(&[]).await.context("load swaps")?;
            let ids: Vec<String> = rows
                .iter()
                .filter(|row| is_prunable(row, now, retention_ms))
                .map(|row| row.id.clone())
                .collect();
            store.remove_all(&ids).await.context("remove swaps")?;
            json!({ "pruned": ids })
        }
    };

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn summary(row: &StoredSwap) -> serde_json::Value {
    let info = row.swap_type.state_info(row.state);
    json!({
      "id": row.id,
      "swap_type": row.swap_type,
      "state": row.state,
      "state_label": info.map(|i| i.label).unwrap_or("UNKNOWN"),
      "finished": info.is_some_and(|i| i.finished),
      "requires_action": info.is_some_and(|i| i.requires_action),
      "version": row.version,
      "initiator": row.initiator,
      "payment_hash": row.payment_hash,
      "created_at": row.created_at,
    })
}
