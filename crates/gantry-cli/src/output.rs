//! Output formatting utilities

use crate::error::CliResult;
use colored::*;
use gantry_types::{ContractReport, GateState, OpsTier, Receipt, ReceiptResult, Verdict};
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Print a vector of items in the specified format
pub fn print_output<T: Serialize + Tabled>(data: Vec<T>, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Table => {
            if data.is_empty() {
                println!("{}", "No results".dimmed());
            } else {
                let table = Table::new(data).to_string();
                println!("{}", table);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(&data)?);
        }
    }
    Ok(())
}

/// Print a single item in the specified format
pub fn print_single<T: Serialize>(data: &T, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Table | OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(data)?);
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(data)?);
        }
    }
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue(), message);
}

/// Table row for receipt display
#[derive(Debug, Serialize, Tabled)]
pub struct ReceiptRow {
    step: String,
    result: String,
    started: String,
    inputs: String,
    outputs: String,
    worker: String,
    cost: u64,
    error: String,
}

impl From<&Receipt> for ReceiptRow {
    fn from(receipt: &Receipt) -> Self {
        Self {
            step: receipt.step_name.to_string(),
            result: match receipt.result {
                ReceiptResult::Success => "SUCCESS".green().to_string(),
                ReceiptResult::Failure => "FAILURE".red().to_string(),
            },
            started: receipt.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            inputs: receipt.inputs_hash.short().to_string(),
            outputs: receipt
                .outputs_hash
                .as_ref()
                .map(|h| h.short().to_string())
                .unwrap_or_default(),
            worker: format!("{}/{}", receipt.host_id, receipt.worker_id),
            cost: receipt.cost,
            error: receipt.error_message.clone().unwrap_or_default(),
        }
    }
}

/// Table row for contract report display
#[derive(Debug, Serialize, Tabled)]
pub struct ContractRow {
    validator: String,
    verdict: String,
    required: bool,
    findings: String,
}

impl From<&ContractReport> for ContractRow {
    fn from(report: &ContractReport) -> Self {
        Self {
            validator: report.validator_name.clone(),
            verdict: verdict_label(&report.verdict),
            required: report.required,
            findings: report
                .verdict
                .findings()
                .iter()
                .map(|f| format!("{}: {}", f.code, f.message))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Print contract reports as a table
pub fn print_reports(reports: &[ContractReport]) {
    if reports.is_empty() {
        return;
    }
    let rows: Vec<ContractRow> = reports.iter().map(ContractRow::from).collect();
    eprintln!("{}", Table::new(rows));
}

pub fn verdict_label(verdict: &Verdict) -> String {
    match verdict {
        Verdict::Pass => "PASS".green().to_string(),
        Verdict::Warn { .. } => "WARN".yellow().to_string(),
        Verdict::Fail { .. } => "FAIL".red().to_string(),
    }
}

pub fn gate_label(state: GateState) -> String {
    match state {
        GateState::Pending => "PENDING".yellow().to_string(),
        GateState::Approved => "APPROVED".green().to_string(),
        GateState::Rejected => "REJECTED".red().to_string(),
    }
}

pub fn tier_label(tier: OpsTier) -> String {
    let label = tier.to_string();
    match tier {
        OpsTier::Normal => label.green().to_string(),
        OpsTier::LowCompute => label.yellow().to_string(),
        OpsTier::Critical | OpsTier::Paused => label.red().to_string(),
    }
}
