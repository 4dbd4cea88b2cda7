use crate::burn::BurnPlan;
use crate::pipeline::RunSummary;
use alloy_primitives::U256;
use alloy_primitives::utils::format_units;
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use csv::Writer;
use serde_json::json;

#[derive(Debug, Clone)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Table,
        }
    }
}

fn format_amount(amount: U256, decimals: u8) -> String {
    format_units(amount, decimals).unwrap_or_else(|_| amount.to_string())
}

pub fn format_burn_plan(plan: &BurnPlan, decimals: u8, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => format_burn_plan_table(plan, decimals),
        OutputFormat::Json => format_burn_plan_json(plan, decimals),
        OutputFormat::Csv => format_burn_plan_csv(plan, decimals),
    }
}

fn format_burn_plan_table(plan: &BurnPlan, decimals: u8) -> String {
    if plan.commands.is_empty() {
        return "No burn commands.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["#", "Address", "Amount", "Amount (Wei)"]);

    for (i, command) in plan.commands.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(format!("{:#}", command.address)),
            Cell::new(format_amount(command.amount, decimals)),
            Cell::new(command.amount.to_string()),
        ]);
    }
    table.add_row(vec![
        Cell::new(""),
        Cell::new("Total"),
        Cell::new(format_amount(plan.total, decimals)),
        Cell::new(plan.total.to_string()),
    ]);

    table.to_string()
}

fn format_burn_plan_json(plan: &BurnPlan, decimals: u8) -> String {
    let commands: Vec<_> = plan
        .commands
        .iter()
        .map(|command| {
            json!({
                "address": command.address.to_checksum(None),
                "amount": format_amount(command.amount, decimals),
                "amount_wei": command.amount.to_string(),
            })
        })
        .collect();

    serde_json::to_string_pretty(&json!({
        "commands": commands,
        "total": format_amount(plan.total, decimals),
        "total_wei": plan.total.to_string(),
    }))
    .unwrap_or_else(|_| "{}".to_string())
}

fn format_burn_plan_csv(plan: &BurnPlan, decimals: u8) -> String {
    let mut wtr = Writer::from_writer(vec![]);
    let _ = wtr.write_record(["address", "amount", "amount_wei"]);
    for command in &plan.commands {
        let _ = wtr.write_record([
            &command.address.to_checksum(None),
            &format_amount(command.amount, decimals),
            &command.amount.to_string(),
        ]);
    }
    String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
}

pub fn format_run_summary(summary: &RunSummary, format: &OutputFormat) -> String {
    let count = |value: Option<usize>| value.map_or("-".to_string(), |v| v.to_string());
    let rows = [
        ("transfers", count(summary.transfers)),
        ("skipped_logs", summary.skipped_logs.to_string()),
        (
            "truncation_risks",
            summary
                .truncation_risks
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(" "),
        ),
        ("balances", count(summary.balances)),
        ("failed_addresses", summary.failed_addresses.len().to_string()),
        ("changes", count(summary.changes)),
        ("burn_commands", count(summary.burn_commands)),
        (
            "burn_total_wei",
            summary.burn_total.map_or("-".to_string(), |t| t.to_string()),
        ),
    ];

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec!["Metric", "Value"]);
            for (metric, value) in rows {
                table.add_row(vec![Cell::new(metric), Cell::new(value)]);
            }
            table.to_string()
        }
        OutputFormat::Json => serde_json::to_string_pretty(&json!({
            "transfers": summary.transfers,
            "skipped_logs": summary.skipped_logs,
            "truncation_risks": summary
                .truncation_risks
                .iter()
                .map(|r| json!({ "start": r.start, "end": r.end }))
                .collect::<Vec<_>>(),
            "balances": summary.balances,
            "failed_addresses": summary
                .failed_addresses
                .iter()
                .map(|a| a.to_checksum(None))
                .collect::<Vec<_>>(),
            "changes": summary.changes,
            "burn_commands": summary.burn_commands,
            "burn_total_wei": summary.burn_total.map(|t| t.to_string()),
        }))
        .unwrap_or_else(|_| "{}".to_string()),
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record(["metric", "value"]);
            for (metric, value) in rows {
                let _ = wtr.write_record([metric, value.as_str()]);
            }
            String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
        }
    }
}
