#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI driver for the IMAP mailbox archiver

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use mail_archiver::{ArchiveConfig, Archiver, Credentials, DateWindow, Error, package_run_dir};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const PROMPT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "mail-archiver")]
#[command(about = "Archive the mailboxes of an IMAP account to local .eml files")]
struct Args {
    /// Email address of the account to archive
    #[arg(long)]
    email: String,

    /// Account password or app password (prompted if omitted)
    #[arg(long)]
    password: Option<String>,

    /// Only archive messages from the last N days
    #[arg(long, conflicts_with = "start_date")]
    days: Option<u32>,

    /// Lower date bound, inclusive (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    start_date: Option<NaiveDate>,

    /// Upper date bound, exclusive (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    end_date: Option<NaiveDate>,

    /// Root directory for the run directory
    #[arg(long, default_value = "downloaded_emails")]
    output_dir: PathBuf,

    /// Number of download workers
    #[arg(long, default_value_t = 10)]
    threads: usize,

    /// Automatic retry rounds over failed downloads
    #[arg(long, default_value_t = 1)]
    max_retries: u32,

    /// Never prompt; take the default answer everywhere
    #[arg(long)]
    batch: bool,

    /// Skip discovery and use this IMAP server
    #[arg(long)]
    server: Option<String>,

    /// IMAP port
    #[arg(long, default_value_t = 993)]
    port: u16,

    /// Connect without TLS
    #[arg(long)]
    nossl: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("Invalid date '{s}': {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let password = match args.password.clone() {
        Some(p) => p,
        None => prompt_line("Password (input is not hidden):")
            .context("password is required")?,
    };
    let credentials = Credentials::new(args.email.clone(), password)?;

    let window = DateWindow {
        since: args.days.map_or(args.start_date, |days| {
            Some(chrono::Local::now().date_naive() - chrono::Duration::days(i64::from(days)))
        }),
        before: args.end_date,
    };
    let config = ArchiveConfig {
        output_dir: args.output_dir.clone(),
        workers: args.threads,
        max_retries: args.max_retries,
        window,
        server: args.server.clone(),
        port: args.port,
        ssl: !args.nossl,
    };

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancellation requested (Ctrl+C).");
            signal_token.cancel();
        }
    });

    let archiver = Archiver::new(credentials.clone(), config);
    let mut report = match archiver.run(&cancel).await {
        Ok(report) => report,
        Err(e) => {
            if matches!(e, Error::Auth { .. })
                && matches!(credentials.domain(), "gmail.com" | "googlemail.com")
            {
                eprintln!("{}", "=".repeat(60));
                eprintln!("GMAIL: authentication failed.");
                eprintln!("Gmail requires an App Password; the normal account");
                eprintln!("password will not work.");
                eprintln!("See https://myaccount.google.com/apppasswords");
                eprintln!("{}", "=".repeat(60));
            }
            return Err(e.into());
        }
    };

    // One manual retry round after the automatic ones.
    if !report.summary.failed.is_empty() && !cancel.is_cancelled() {
        let question = format!(
            "{} messages failed. Retry them? (y/n) [10s]:",
            report.summary.failed.len()
        );
        if confirm(&question, true, args.batch).await {
            archiver
                .retry_round(&mut report, archiver.config().max_retries + 1, &cancel)
                .await;
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report.summary)?);
    } else {
        println!("{}", report.summary);
    }

    let mut archive_info = None;
    if confirm(
        "Create a ZIP archive of the downloaded emails? (y/n) [10s]:",
        true,
        args.batch,
    )
    .await
    {
        let run_dir = report.run_dir.clone();
        let zip_path = run_dir.with_extension("zip");
        println!("Creating archive {}...", zip_path.display());
        let info =
            tokio::task::spawn_blocking(move || package_run_dir(&run_dir, &zip_path)).await??;
        println!("SHA1: {}", info.sha1);
        archive_info = Some(info);
    }

    let sidecar = report.run_dir.with_extension("txt");
    report
        .summary
        .write_sidecar(&sidecar, archive_info.as_ref())
        .await?;
    println!("Run metadata saved to {}", sidecar.display());

    Ok(())
}

/// Read one line from stdin, blocking.
fn prompt_line(prompt: &str) -> Option<String> {
    eprint!("{prompt} ");
    std::io::stderr().flush().ok();
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).ok()?;
    let line = line.trim_end_matches(['\r', '\n']).to_string();
    if line.is_empty() { None } else { Some(line) }
}

/// Timed yes/no question. Batch mode answers "no" without asking;
/// silence for ten seconds takes the default.
async fn confirm(question: &str, default: bool, batch: bool) -> bool {
    if batch {
        return false;
    }

    eprint!("{question} ");
    let _ = std::io::stderr().flush();
    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).ok().map(|_| line)
    });

    match tokio::time::timeout(PROMPT_TIMEOUT, answer).await {
        Ok(Ok(Some(line))) => match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => true,
            "n" | "no" => false,
            _ => default,
        },
        _ => {
            eprintln!("\nTimeout, defaulting to: {}", if default { "y" } else { "n" });
            default
        }
    }
}
