use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use std::io::Write;
use std::time::Duration;

use super::ScenarioResult;
use crate::live::LiveReport;

#[derive(Serialize)]
struct JsonReport<'a> {
    scenarios: &'a [ScenarioResult],
    #[serde(skip_serializing_if = "Option::is_none")]
    live: Option<&'a LiveReport>,
}

fn success_rate(results: &[ScenarioResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let passed = results.iter().filter(|r| r.passed).count();
    #[allow(clippy::cast_precision_loss)]
    let rate = (passed as f64 / results.len() as f64) * 100.0;
    rate
}

pub fn generate_console_report(
    out: &mut dyn Write,
    results: &[ScenarioResult],
    total_duration: Duration,
) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", "📊 Logic Test Results Summary".bright_cyan().bold())?;
    writeln!(out, "{}", "==============================".cyan())?;

    let total_tests = results.len();
    let passed_tests = results.iter().filter(|r| r.passed).count();
    let failed_tests = total_tests - passed_tests;

    writeln!(out, "Total scenarios: {total_tests}")?;
    writeln!(out, "Passed: {}", passed_tests.to_string().green())?;
    writeln!(out, "Failed: {}", failed_tests.to_string().red())?;
    writeln!(out, "Success rate: {:.1}%", success_rate(results))?;
    writeln!(out, "Total time: {total_duration:?}")?;
    writeln!(out)?;

    for result in results {
        let status = if result.passed {
            "✅ PASS".green()
        } else {
            "❌ FAIL".red()
        };

        writeln!(out, "{} {}", status, result.scenario_name.bold())?;
        writeln!(
            out,
            "   Iterations: {}/{} successful",
            result.successful_iterations, result.iterations_run
        )?;
        writeln!(out, "   Average time: {:?}", result.average_duration)?;

        if !result.failures.is_empty() {
            writeln!(out, "   Failures:")?;
            for failure in &result.failures {
                writeln!(out, "     • {}", failure.red())?;
            }
        }
        writeln!(out)?;
    }

    let fastest = results.iter().min_by_key(|r| r.average_duration);
    let slowest = results.iter().max_by_key(|r| r.average_duration);
    if let (Some(fastest), Some(slowest)) = (fastest, slowest) {
        writeln!(out, "{}", "⚡ Performance Summary".bright_yellow().bold())?;
        writeln!(out, "{}", "=====================".yellow())?;
        writeln!(
            out,
            "Fastest: {} ({:?})",
            fastest.scenario_name.green(),
            fastest.average_duration
        )?;
        writeln!(
            out,
            "Slowest: {} ({:?})",
            slowest.scenario_name.yellow(),
            slowest.average_duration
        )?;
    }
    Ok(())
}

pub fn generate_json_report(
    out: &mut dyn Write,
    results: &[ScenarioResult],
    live: Option<&LiveReport>,
) -> Result<()> {
    let report = JsonReport {
        scenarios: results,
        live,
    };
    let json_output = serde_json::to_string_pretty(&report)?;
    writeln!(out, "{json_output}")?;
    Ok(())
}

pub fn generate_markdown_report(
    out: &mut dyn Write,
    results: &[ScenarioResult],
    live: Option<&LiveReport>,
    generated_at: DateTime<Utc>,
) -> Result<()> {
    writeln!(out, "# Sygnal Logic Test Results\n")?;
    writeln!(out, "_Generated {}_\n", generated_at.format("%Y-%m-%d %H:%M:%S UTC"))?;

    let total_tests = results.len();
    let passed_tests = results.iter().filter(|r| r.passed).count();
    let failed_tests = total_tests - passed_tests;

    writeln!(out, "## Summary\n")?;
    writeln!(out, "- **Total scenarios**: {total_tests}")?;
    writeln!(out, "- **Passed**: {passed_tests}")?;
    writeln!(out, "- **Failed**: {failed_tests}")?;
    writeln!(out, "- **Success rate**: {:.1}%\n", success_rate(results))?;

    writeln!(out, "## Detailed Results\n")?;

    for result in results {
        let status = if result.passed { "✅" } else { "❌" };

        writeln!(out, "### {} {}\n", status, result.scenario_name)?;
        writeln!(
            out,
            "- **Iterations**: {}/{} successful",
            result.successful_iterations, result.iterations_run
        )?;
        writeln!(out, "- **Average time**: {:?}", result.average_duration)?;

        if !result.failures.is_empty() {
            writeln!(out, "- **Failures**:")?;
            for failure in &result.failures {
                writeln!(out, "  - {failure}")?;
            }
        }
        writeln!(out)?;
    }

    if let Some(live) = live {
        let status = if live.passed() { "✅" } else { "❌" };
        writeln!(out, "## {status} Live Session ({})\n", live.strategy)?;
        writeln!(out, "- **Duration**: {}s", live.seconds)?;
        writeln!(out, "- **Ticks**: {} ({} failed)", live.ticks, live.failed_ticks)?;
        writeln!(
            out,
            "- **Inputs**: {} sent, {} rejected",
            live.inputs_sent, live.rejected_inputs
        )?;
        writeln!(out, "- **Saves**: {} ({} failed)", live.saves, live.failed_saves)?;
    }
    Ok(())
}
