//! Veille — consensus reclassification of a curated article database.

use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use veille_core::{EngineConfig, ItemId};
use veille_oracle::OracleConfig;
use veille_store::Store;

mod context;

use context::Context;

fn print_help() {
    println!("Veille — consensus reclassification engine");
    println!();
    println!("Usage: veille [command]");
    println!();
    println!("Commands:");
    println!("  run                      Process items until Ctrl-C (default)");
    println!("  once                     Claim and process a single batch");
    println!("  drain                    Process batches until nothing is claimable");
    println!("  sweep                    Return expired claims to pending");
    println!("  status                   Print item counts per status");
    println!("  grade [<id>...]          Grade the given items, or every ungraded item");
    println!("  help                     Show this help message");
    println!();
    println!("Environment:");
    println!("  VEILLE_CONFIG            Engine config JSON (default: ./veille.json)");
    println!("  VEILLE_ORACLE_CONFIG     Oracle config JSON (default: ./oracle.json)");
    println!("  RUST_LOG                 Log filter (default: info)");
}

fn print_report(report: &impl Serialize) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to render report: {}", e),
    }
}

fn parse_ids(args: &[String]) -> anyhow::Result<Vec<ItemId>> {
    args.iter()
        .map(|arg| {
            arg.parse::<ItemId>()
                .map_err(|_| anyhow::anyhow!("Invalid item id: {}", arg))
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("run");

    match command {
        "--help" | "-h" | "help" => {
            print_help();
            return Ok(());
        }
        "run" | "once" | "drain" | "sweep" | "status" | "grade" => {}
        other => {
            eprintln!("Unknown command: {}. Use 'veille help' for usage.", other);
            std::process::exit(1);
        }
    }

    let config = EngineConfig::load(context::engine_config_path().as_deref())?;

    // Store-only commands need no oracle credentials.
    match command {
        "status" => {
            let store = context::open_store(&config)?;
            let counts = store.status_counts()?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
            return Ok(());
        }
        "sweep" => {
            let store = context::open_store(&config)?;
            let released = store.release_stale_claims(config.lease_timeout())?;
            println!("Released {} expired claims", released);
            return Ok(());
        }
        _ => {}
    }

    let oracle_config = OracleConfig::load(context::oracle_config_path().as_deref());
    let batch_size = config.batch_size;
    let ctx = Context::build(config, &oracle_config)?;

    match command {
        "grade" => {
            let ids = parse_ids(&args[2..])?;
            let grader = ctx.grader();
            if ids.is_empty() {
                let report = grader.grade_pending(batch_size).await?;
                print_report(&report);
                return Ok(());
            }
            let mut failed = 0usize;
            for id in ids {
                match grader.grade(id).await {
                    Ok(grade) => println!("{}\t{}", id, grade),
                    Err(e) => {
                        error!("Item {}: grading failed: {}", id, e);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                std::process::exit(1);
            }
        }
        "once" => {
            let (_tx, rx) = watch::channel(false);
            let report = ctx.engine().run_batch(&rx).await?;
            print_report(&report);
        }
        "drain" => {
            let report = ctx.engine().drain().await?;
            print_report(&report);
        }
        _ => {
            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown requested, finishing in-flight items");
                    let _ = tx.send(true);
                }
            });
            let report = ctx.engine().run(rx).await?;
            print_report(&report);
        }
    }

    Ok(())
}
