use colored::*;
use serde_json::Value;

use crate::cli::cli_args::OutputFormat;
use crate::persistence::ParityReport;
use crate::utils::error::GateError;

/// Formats bus results for CLI output
pub struct OutputFormatter;

impl OutputFormatter {
    /// Format an emit result. Row sets render as a table, everything else as JSON.
    pub fn format_result(result: &Value, format: &OutputFormat) -> String {
        match format {
            OutputFormat::Json => Self::format_json(result),
            OutputFormat::Table => match result.get("rows").and_then(Value::as_array) {
                Some(rows) => Self::format_table(rows),
                None => Self::format_json(result),
            },
        }
    }

    fn format_json(value: &Value) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    }

    /// Format rows as a colored table. Columns follow first appearance across rows.
    fn format_table(rows: &[Value]) -> String {
        if rows.is_empty() {
            return "No results found.".dimmed().to_string();
        }

        let mut columns: Vec<&str> = Vec::new();
        for row in rows.iter().filter_map(Value::as_object) {
            for key in row.keys() {
                if !columns.contains(&key.as_str()) {
                    columns.push(key);
                }
            }
        }

        let cell = |row: &Value, column: &str| row.get(column).map(Self::value_to_string).unwrap_or_default();

        let mut col_widths: Vec<usize> = columns.iter().map(|c| c.len().max(8)).collect();
        for row in rows {
            for (i, column) in columns.iter().enumerate() {
                col_widths[i] = col_widths[i].max(cell(row, column).chars().count());
            }
        }

        let mut output = String::new();
        output.push_str(&Self::format_table_separator(&col_widths));
        output.push('|');
        for (i, column) in columns.iter().enumerate() {
            output.push_str(&format!(" {} |", Self::pad(&column.bold().cyan().to_string(), column, col_widths[i])));
        }
        output.push('\n');
        output.push_str(&Self::format_table_separator(&col_widths));

        for row in rows {
            output.push('|');
            for (i, column) in columns.iter().enumerate() {
                let raw = cell(row, column);
                let colored = Self::format_value_colored(row.get(column).unwrap_or(&Value::Null), &raw);
                output.push_str(&format!(" {} |", Self::pad(&colored.to_string(), &raw, col_widths[i])));
            }
            output.push('\n');
        }
        output.push_str(&Self::format_table_separator(&col_widths));

        output.push_str(&format!(
            "\n{} {}\n",
            rows.len().to_string().green().bold(),
            if rows.len() == 1 { "row" } else { "rows" }
        ));
        output
    }

    /// Pad by the visible width, since color codes inflate `len()`
    fn pad(rendered: &str, raw: &str, width: usize) -> String {
        let fill = width.saturating_sub(raw.chars().count());
        format!("{}{}", rendered, " ".repeat(fill))
    }

    fn format_table_separator(col_widths: &[usize]) -> String {
        let mut separator = String::from("+");
        for &width in col_widths {
            separator.push_str(&"-".repeat(width + 2));
            separator.push('+');
        }
        separator.push('\n');
        separator
    }

    fn value_to_string(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Null => "NULL".to_string(),
            other => other.to_string(),
        }
    }

    fn format_value_colored(value: &Value, raw: &str) -> ColoredString {
        match value {
            Value::String(_) => raw.normal(),
            Value::Number(_) => raw.blue(),
            Value::Bool(true) => raw.green(),
            Value::Bool(false) => raw.red(),
            Value::Null => raw.dimmed(),
            Value::Array(_) | Value::Object(_) => raw.magenta(),
        }
    }

    pub fn format_parity(report: &ParityReport, format: &OutputFormat) -> String {
        match format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string()),
            OutputFormat::Table => {
                let mut output = format!("{} {}\n", "Reference engine:".bold(), report.canonical.cyan().bold());
                for engine in &report.engines {
                    let status = if engine.is_clean() { "in parity".green() } else { "diverges".red() };
                    output.push_str(&format!("  {} {} {}\n", "•".green(), engine.engine.cyan(), status));
                    let sections = [
                        ("missing command", &engine.missing_commands),
                        ("extra command", &engine.extra_commands),
                        ("missing structure", &engine.missing_structures),
                        ("extra structure", &engine.extra_structures),
                    ];
                    for (label, names) in sections {
                        for name in names {
                            output.push_str(&format!("    {} {}\n", format!("{}:", label).yellow(), name));
                        }
                    }
                }
                output
            }
        }
    }

    /// Format error message for CLI display
    pub fn format_error(error: &GateError) -> String {
        format!(
            "{} {} {}",
            "Error:".red().bold(),
            format!("[{}]", error.kind()).dimmed(),
            error.to_string().red()
        )
    }

    pub fn format_success(message: &str) -> String {
        format!("{} {}", "Success:".green().bold(), message)
    }

    pub fn format_info(message: &str) -> String {
        format!("{} {}", "Info:".blue().bold(), message)
    }
}
