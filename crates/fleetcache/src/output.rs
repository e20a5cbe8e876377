//! Output formatting: table, JSON, YAML.

use std::collections::BTreeMap;
use std::io::{self, Write};

use tabled::{Table, Tabled, settings::Style};

use fleetcache_core::ModelReport;

use crate::cli::OutputFormat;
use crate::error::CliError;

// ── Report rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "UUID")]
    uuid: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Life")]
    life: String,
    #[tabled(rename = "Apps")]
    applications: usize,
    #[tabled(rename = "Charms")]
    charms: usize,
    #[tabled(rename = "Machines")]
    machines: usize,
    #[tabled(rename = "Units")]
    units: usize,
    #[tabled(rename = "Branches")]
    branches: usize,
}

impl ReportRow {
    fn new(uuid: &str, report: &ModelReport) -> Self {
        Self {
            uuid: uuid.to_owned(),
            name: report.name.clone(),
            life: report.life.to_string(),
            applications: report.application_count,
            charms: report.charm_count,
            machines: report.machine_count,
            units: report.unit_count,
            branches: report.branch_count,
        }
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render the per-model report in the chosen format.
pub fn render_report(
    format: OutputFormat,
    report: &BTreeMap<String, ModelReport>,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Table => {
            let rows: Vec<ReportRow> = report
                .iter()
                .map(|(uuid, model)| ReportRow::new(uuid, model))
                .collect();
            Ok(Table::new(rows).with(Style::rounded()).to_string())
        }
        OutputFormat::Json => render_json(report, false),
        OutputFormat::JsonCompact => render_json(report, true),
        OutputFormat::Yaml => serde_yaml::to_string(report).map_err(|e| CliError::Render(e.to_string())),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

fn render_json<T: serde::Serialize + ?Sized>(data: &T, compact: bool) -> Result<String, CliError> {
    let rendered = if compact {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    rendered.map_err(|e| CliError::Render(e.to_string()))
}
