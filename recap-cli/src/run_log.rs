//! Human-readable run log: one block per receipt, appended to a file.

use anyhow::{Context, Result};
use chrono::{Local, SecondsFormat};
use recap_core::{SplitLine, format_milliunits, to_milliunits};
use recap_ledger::ProcessOutcome;
use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

pub fn now_local_iso() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

fn mode_line(dry_run: bool) -> &'static str {
    if dry_run {
        "Mode: DRY_RUN (no ledger API call)"
    } else {
        "Mode: LIVE_POST"
    }
}

#[derive(Debug, Clone)]
pub struct RunLog {
    path: Option<PathBuf>,
    echo_stdout: bool,
}

impl RunLog {
    pub fn new(path: Option<PathBuf>, echo_stdout: bool) -> Self {
        Self { path, echo_stdout }
    }

    /// Append to the log file, and print when echoing or when no file is set.
    pub fn append(&self, lines: &[String]) -> Result<()> {
        if let Some(path) = &self.path {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open {}", path.display()))?;
            for line in lines {
                writeln!(file, "{}", line).with_context(|| format!("write {}", path.display()))?;
            }
        }
        if self.path.is_none() || self.echo_stdout {
            for line in lines {
                println!("{}", line);
            }
        }
        Ok(())
    }
}

fn item_line(line: &SplitLine) -> String {
    format!(
        "- {} | source={} | base={} | tax={} | total={} | category={} | payee={}",
        line.payee_name,
        line.description,
        format_milliunits(line.base_minor),
        format_milliunits(line.tax_minor),
        format_milliunits(line.total_minor),
        line.category_id,
        line.payee_id.as_deref().unwrap_or(&line.payee_name),
    )
}

pub fn outcome_block(
    outcome: &ProcessOutcome,
    budget_id: &str,
    dry_run: bool,
    timestamp: &str,
) -> Vec<String> {
    let receipt = &outcome.receipt;
    let mut lines = vec![
        format!("[{}] RUN START", timestamp),
        format!("Receipt File: {}", receipt.source_id),
        mode_line(dry_run).to_string(),
        format!(
            "Receipt: id={} date={} currency={}",
            outcome.receipt_id,
            receipt.receipt_date.format("%Y-%m-%d"),
            receipt.currency
        ),
        "Items:".to_string(),
    ];
    lines.extend(outcome.split_lines.iter().map(item_line));

    let base: i64 = outcome.split_lines.iter().map(|l| l.base_minor).sum();
    let tax: i64 = outcome.split_lines.iter().map(|l| l.tax_minor).sum();
    let grand: i64 = outcome.split_lines.iter().map(|l| l.total_minor).sum();
    let reconciled = to_milliunits(receipt.grand_total) == Some(grand);
    lines.push(format!(
        "Totals: base={} tax={} grand={} reconciled={}",
        format_milliunits(base),
        format_milliunits(tax),
        format_milliunits(grand),
        if reconciled { "yes" } else { "no" }
    ));
    lines.push(format!(
        "Ledger: budget={} account={}",
        budget_id, outcome.candidate.account_id
    ));
    match &outcome.transaction_id {
        Some(id) => lines.push(format!(
            "Result: {} transaction_id={} {}",
            outcome.action.as_str(),
            id,
            outcome.message()
        )),
        None => lines.push(format!("Result: {} {}", outcome.action.as_str(), outcome.message())),
    }
    lines.push("RUN END".to_string());
    lines.push(String::new());
    lines
}

pub fn failure_block(document: &str, error: &dyn Display, dry_run: bool, timestamp: &str) -> Vec<String> {
    vec![
        format!("[{}] RUN START", timestamp),
        format!("Receipt File: {}", document),
        mode_line(dry_run).to_string(),
        format!("Result: FAILED {}", error),
        "RUN END".to_string(),
        String::new(),
    ]
}

pub fn noop_block(source: &str, dry_run: bool, timestamp: &str) -> Vec<String> {
    vec![
        format!("[{}] RUN START", timestamp),
        format!("Receipt File: {}", source),
        mode_line(dry_run).to_string(),
        "Result: noop No receipt documents found.".to_string(),
        "RUN END".to_string(),
        String::new(),
    ]
}
