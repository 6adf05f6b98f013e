//! Output formatting for CLI

use crate::stage::ScenarioReport;
use console::style;
use kino_coordinator::{PlayerEvent, Quality};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format options
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "table" => OutputFormat::Table,
            _ => OutputFormat::Text,
        }
    }
}

/// Format output based on selected format
pub fn format_output<T: Serialize>(data: &T, format: &str) -> String {
    match OutputFormat::from(format) {
        OutputFormat::Json => {
            serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Table | OutputFormat::Text => serde_json::to_value(data)
            .map(|v| v.to_string())
            .unwrap_or_default(),
    }
}

/// Event payload without the tag, for one-line text output
fn event_fields(event: &PlayerEvent) -> String {
    match serde_json::to_value(event) {
        Ok(serde_json::Value::Object(mut map)) => {
            map.remove("event");
            if map.is_empty() {
                String::new()
            } else {
                serde_json::Value::Object(map).to_string()
            }
        }
        _ => String::new(),
    }
}

pub fn print_report(report: &ScenarioReport) {
    println!("{}", style(format!("Scenario: {}", report.scenario)).bold());

    for (i, step) in report.steps.iter().enumerate() {
        println!("\n{} {}", style(format!("{:>2}.", i + 1)).dim(), step.action);
        for envelope in &step.events {
            println!(
                "    {} view {} #{:<3} {} {}",
                style(envelope.timestamp.format("%H:%M:%S%.3f")).dim(),
                envelope.view,
                envelope.sequence,
                style(envelope.event.name()).cyan(),
                event_fields(&envelope.event)
            );
        }
        for event in &step.host_events {
            println!(
                "    {} {}",
                style("host").magenta(),
                format_output(event, "text")
            );
        }
        for note in &step.notes {
            println!("    {} {}", style("note").yellow(), note);
        }
    }
}

#[derive(Tabled)]
struct QualityRow {
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Resolution")]
    resolution: String,
    #[tabled(rename = "Bitrate")]
    bitrate: String,
    #[tabled(rename = "URL")]
    url: String,
}

impl From<&Quality> for QualityRow {
    fn from(q: &Quality) -> Self {
        Self {
            label: q.label.clone(),
            resolution: match (q.width, q.height) {
                (Some(w), Some(h)) => format!("{}x{}", w, h),
                _ => "-".to_string(),
            },
            bitrate: q
                .bitrate
                .map(|b| format!("{} kbps", b / 1000))
                .unwrap_or_else(|| "-".to_string()),
            url: q.url.to_string(),
        }
    }
}

pub fn print_qualities(ladder: &[Quality], warnings: &[String], format: &str) {
    match OutputFormat::from(format) {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "qualities": ladder,
                "warnings": warnings,
            });
            println!("{}", format_output(&report, format));
        }
        OutputFormat::Table => {
            let mut table = Table::new(ladder.iter().map(QualityRow::from));
            table.with(Style::modern());
            println!("{}", table);
            print_warnings(warnings);
        }
        OutputFormat::Text => {
            println!("Quality ladder ({} entries):", ladder.len());
            for (i, q) in ladder.iter().enumerate() {
                let row = QualityRow::from(q);
                println!(
                    "  {}. {} - {} {} {}",
                    i + 1,
                    row.label,
                    row.resolution,
                    row.bitrate,
                    style(row.url).dim()
                );
            }
            print_warnings(warnings);
        }
    }
}

fn print_warnings(warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    println!("\nWarnings:");
    for w in warnings {
        println!("  - {}", style(w).yellow());
    }
}
