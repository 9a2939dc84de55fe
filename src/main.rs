//! Warden Runtime
//!
//! Entry point for the trust-boundary daemon. Handles CLI args,
//! bootstrapping, and running the defense pipeline.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tokio::time::{sleep, Duration};
use tracing::info;

use warden::config::{get_config_path, load_config, resolve_path, save_config};
use warden::defense::sweep;
use warden::runtime::DefenseRuntime;
use warden::store::Database;
use warden::types::{default_config, LogLevel, RiskLevel};

const VERSION: &str = "0.1.0";

/// Warden -- Agent Trust-Boundary Runtime
#[derive(Parser, Debug)]
#[command(
    name = "warden",
    version = VERSION,
    about = "Warden -- Agent Trust-Boundary Runtime",
    long_about = "Defense pipeline for autonomous agents: content sanitization, \
                  tool vetting, social-engineering screening, and process self-defense."
)]
struct Cli {
    /// Start the defense pipeline daemon
    #[arg(long)]
    run: bool,

    /// Write a default config file if none exists
    #[arg(long)]
    init: bool,

    /// Show current configuration and history counts
    #[arg(long)]
    status: bool,

    /// One-shot leak sweep of environment and processes (exit 2 on
    /// critical findings, 1 on high)
    #[arg(long)]
    scan: bool,

    /// Print a report of recent defense decisions
    #[arg(long)]
    report: bool,
}

// ---- Init Command -----------------------------------------------------------

fn init_config() -> Result<()> {
    let path = get_config_path();
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }

    save_config(&default_config())?;
    println!("{}", format!("Wrote default config to {}", path.display()).green());
    println!("Set classifierApiKey before running with --run.");
    Ok(())
}

// ---- Status Command ---------------------------------------------------------

fn show_status() {
    let Some(config) = load_config() else {
        println!("Warden is not configured. Run with --init first.");
        return;
    };

    let db_path = resolve_path(&config.db_path);
    let (audit_total, threat_total) = match Database::open(&db_path) {
        Ok(db) => (
            db.recent_audit_entries(i64::MAX).map(|e| e.len()).unwrap_or(0),
            db.threat_count().unwrap_or(0) as usize,
        ),
        Err(_) => (0, 0),
    };

    println!(
        r#"
=== WARDEN STATUS ===
Config:     {}
DB Path:    {}
Model:      {}
Webhook:    {}
Audit rows: {}
Threats:    {}
Version:    {}
=====================
"#,
        get_config_path().display(),
        db_path,
        config.classifier_model,
        if config.alert_webhook_url.is_some() {
            "configured"
        } else {
            "not configured"
        },
        audit_total,
        threat_total,
        VERSION,
    );
}

// ---- Scan Command -----------------------------------------------------------

/// One-shot credential-leak sweep. Exit code contract: 2 when critical
/// findings exist, 1 for high, 0 otherwise.
fn run_scan() -> i32 {
    println!("{}", "Running one-shot leak sweep...".bold());

    let threats = sweep::run_sweep();

    let mut counts = [0usize; 4];
    for threat in &threats {
        let idx = match threat.severity {
            RiskLevel::Critical => 0,
            RiskLevel::High => 1,
            RiskLevel::Medium => 2,
            RiskLevel::Low => 3,
        };
        counts[idx] += 1;
        let line = format!("  [{:?}] {}", threat.severity, threat.detail);
        match threat.severity {
            RiskLevel::Critical | RiskLevel::High => println!("{}", line.red()),
            RiskLevel::Medium => println!("{}", line.yellow()),
            RiskLevel::Low => println!("{}", line),
        }
    }

    println!("\n{}", "SWEEP SUMMARY".bold());
    for (label, count) in ["critical", "high", "medium", "low"].iter().zip(counts) {
        if count > 0 {
            println!("  {:8} : {} finding(s)", label, count);
        }
    }

    if counts[0] > 0 {
        println!("{}", "Critical findings present.".red().bold());
        2
    } else if counts[1] > 0 {
        println!("{}", "High findings present.".yellow().bold());
        1
    } else {
        println!("{}", "All clear.".green());
        0
    }
}

// ---- Report Command ---------------------------------------------------------

fn show_report() -> Result<()> {
    let config = load_config().unwrap_or_else(default_config);
    let db = Database::open(&resolve_path(&config.db_path))
        .context("Failed to open warden database")?;

    let entries = db.recent_audit_entries(50)?;
    if entries.is_empty() {
        println!("No defense decisions recorded.");
        return Ok(());
    }

    println!("{}", "=== Defense Decision Report ===".bold());
    println!("Entries shown: {}\n", entries.len());

    println!("Breakdown by risk level:");
    for (level, count) in db.audit_counts_by_level()? {
        let line = format!("  {:?}: {}", level, count);
        match level {
            RiskLevel::Critical | RiskLevel::High => println!("{}", line.red()),
            RiskLevel::Medium => println!("{}", line.yellow()),
            RiskLevel::Low => println!("{}", line),
        }
    }

    println!("\nRecent decisions:");
    for entry in &entries {
        println!(
            "  [{}] {}/{} {:?} - {}",
            entry.timestamp, entry.stage, entry.decision, entry.risk_level, entry.reason_code
        );
    }

    Ok(())
}

// ---- Main Run ---------------------------------------------------------------

/// The daemon loop: load config, wire the pipeline, start the monitor,
/// and report status periodically. The process is stopped by its
/// supervisor; polite termination signals are deliberately ignored.
async fn run() -> Result<()> {
    let config = load_config().context(
        "No config found. Run `warden --init` and set classifierApiKey first.",
    )?;

    let filter = match config.log_level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    info!("Warden v{} starting", VERSION);

    let mut runtime = DefenseRuntime::production(&config)?;
    runtime.start();
    info!("Defense pipeline ready");

    loop {
        sleep(Duration::from_secs(60)).await;
        let status = runtime.defense_status();
        info!(
            "Defense status: state={:?} uptime={}s threats={}",
            status.state, status.uptime_seconds, status.threat_count
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.init {
        return init_config();
    }
    if cli.status {
        show_status();
        return Ok(());
    }
    if cli.scan {
        std::process::exit(run_scan());
    }
    if cli.report {
        return show_report();
    }
    if cli.run {
        return run().await;
    }

    // No flag: print status as the default action.
    show_status();
    Ok(())
}
