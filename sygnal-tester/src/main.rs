mod common;
mod live;
mod logic;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use colored::Colorize;
use std::fs::{self, File};
use std::io::{BufWriter, Write, stdout};
use std::path::{Path, PathBuf};
use std::time::Instant;

use common::scenario::{get_scenario, list_scenarios};
use common::split_csv;
use live::{LiveReport, run_live_session};
use logic::reports::{generate_console_report, generate_json_report, generate_markdown_report};
use logic::{AutoplayStrategy, LogicTester, ScenarioResult, SessionTester};
use sygnal_game::LifecycleConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TestMode {
    /// Scripted sessions on a hand-advanced clock (fast, deterministic)
    Logic,
    /// One real-time session on the tokio driver
    Live,
    /// Run both logic and live tests
    Both,
}

#[derive(Debug, Parser)]
#[command(name = "sygnal-tester", version = "0.1.0")]
#[command(
    about = "Automated QA for the Sygnal lifecycle core - scripted sessions and a live tokio run"
)]
struct Args {
    /// Test mode: logic (fast), live (real time), or both
    #[arg(long, value_enum, default_value_t = TestMode::Logic)]
    mode: TestMode,

    /// Scenarios to run (comma-separated, `all` for every scenario)
    #[arg(long, default_value = "smoke")]
    scenarios: String,

    /// List all available scenarios and exit
    #[arg(long)]
    list_scenarios: bool,

    /// Number of iterations per scenario; results must agree across them
    #[arg(long, default_value_t = 3)]
    iterations: usize,

    /// Output report format
    #[arg(long, default_value = "console")]
    #[arg(value_parser = ["json", "markdown", "console"])]
    report: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Optional path to write the report output instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Lifecycle configuration JSON; missing fields take defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Wall-clock length of the live session
    #[arg(long, default_value_t = 10)]
    live_seconds: u64,

    /// Strategy for the `autoplay` scenario and the live session
    #[arg(long, value_enum, default_value_t = AutoplayStrategy::Balanced)]
    strategy: AutoplayStrategy,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if maybe_list_scenarios(&args)? {
        return Ok(());
    }

    announce_banner();

    let start_time = Instant::now();
    let config = load_config(args.config.as_deref())?;
    let scenarios = expand_scenarios(&args.scenarios);
    let session_tester = SessionTester::try_new(config.clone(), args.verbose)?;

    let all_results = run_logic_scenarios(&args, &scenarios, session_tester).await;
    let live_report = run_live(&args, &config).await?;

    write_reports(&args, &all_results, live_report.as_ref(), start_time)?;

    let live_failed = live_report.as_ref().is_some_and(|report| !report.passed());
    if all_results.iter().any(|r| !r.passed) || live_failed {
        std::process::exit(1);
    }

    Ok(())
}

fn maybe_list_scenarios(args: &Args) -> Result<bool> {
    if !args.list_scenarios {
        return Ok(false);
    }
    let mut output_target = OutputTarget::new(args.output.clone())?;
    writeln!(output_target.writer(), "Available scenarios:")?;
    for (key, description) in list_scenarios() {
        writeln!(output_target.writer(), "  {key:25} - {description}")?;
    }
    output_target.flush_inner()?;
    Ok(true)
}

fn announce_banner() {
    println!("{}", "📡 Sygnal Automated Tester".bright_cyan().bold());
    println!("{}", "================================".cyan());
}

fn load_config(path: Option<&Path>) -> Result<LifecycleConfig> {
    let Some(path) = path else {
        return Ok(LifecycleConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    LifecycleConfig::from_json(&raw).with_context(|| format!("invalid config {}", path.display()))
}

fn expand_scenarios(scenarios_arg: &str) -> Vec<String> {
    let mut scenarios = split_csv(scenarios_arg);
    if scenarios.contains(&"all".to_string()) {
        scenarios.retain(|s| s != "all");
        scenarios.extend(list_scenarios().into_iter().map(|(key, _)| key.to_string()));
    }
    scenarios
}

async fn run_logic_scenarios(
    args: &Args,
    scenarios: &[String],
    session_tester: SessionTester,
) -> Vec<ScenarioResult> {
    let mut results: Vec<ScenarioResult> = Vec::new();
    if !matches!(args.mode, TestMode::Logic | TestMode::Both) {
        return results;
    }

    println!("{}", "🧠 Running Logic Tests".bright_yellow().bold());
    println!("{}", "-".repeat(30).yellow());

    let logic_tester = LogicTester::new(session_tester, args.verbose);

    for scenario_name in scenarios {
        if let Some(scenario) = get_scenario(scenario_name, args.strategy) {
            results.push(logic_tester.run_scenario(&scenario, args.iterations).await);
        } else {
            eprintln!("⚠️  Unknown scenario: {}", scenario_name.yellow());
        }
    }

    results
}

async fn run_live(args: &Args, config: &LifecycleConfig) -> Result<Option<LiveReport>> {
    if !matches!(args.mode, TestMode::Live | TestMode::Both) {
        return Ok(None);
    }

    println!("{}", "⏱️  Running Live Session".bright_blue().bold());
    println!("{}", "-".repeat(30).blue());

    let report = run_live_session(config, args.strategy, args.live_seconds, args.verbose).await?;
    Ok(Some(report))
}

fn write_reports(
    args: &Args,
    results: &[ScenarioResult],
    live: Option<&LiveReport>,
    start_time: Instant,
) -> Result<()> {
    let mut output_target = OutputTarget::new(args.output.clone())?;
    let out = output_target.writer();
    match args.report.as_str() {
        "json" => generate_json_report(out, results, live)?,
        "markdown" => generate_markdown_report(out, results, live, Utc::now())?,
        _ => {
            generate_console_report(out, results, start_time.elapsed())?;
            if let Some(live) = live {
                writeln!(out)?;
                live.write_console(out)?;
            }
        }
    }
    output_target.flush_inner()?;
    Ok(())
}

enum OutputTarget {
    Stdout(BufWriter<std::io::Stdout>),
    File(BufWriter<File>),
}

impl OutputTarget {
    fn new(path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = path {
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Self::File(BufWriter::new(file)))
        } else {
            Ok(Self::Stdout(BufWriter::new(stdout())))
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Stdout(w) => w,
            Self::File(w) => w,
        }
    }

    fn flush_inner(&mut self) -> std::io::Result<()> {
        match self {
            Self::Stdout(w) => w.flush(),
            Self::File(w) => w.flush(),
        }
    }
}

impl Write for OutputTarget {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn base_args() -> Args {
        Args {
            mode: TestMode::Logic,
            scenarios: "smoke".to_string(),
            list_scenarios: false,
            iterations: 1,
            report: "json".to_string(),
            verbose: false,
            output: None,
            config: None,
            live_seconds: 1,
            strategy: AutoplayStrategy::Balanced,
        }
    }

    fn temp_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "sygnal-main-{label}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ))
    }

    fn sample_result(passed: bool) -> ScenarioResult {
        ScenarioResult {
            scenario_name: "Smoke".to_string(),
            passed,
            iterations_run: 3,
            successful_iterations: if passed { 3 } else { 2 },
            failures: if passed {
                Vec::new()
            } else {
                vec!["failure".to_string()]
            },
            average_duration: Duration::from_millis(10),
            performance_data: vec![Duration::from_millis(10)],
        }
    }

    fn tester() -> SessionTester {
        SessionTester::try_new(LifecycleConfig::default(), false).unwrap()
    }

    #[test]
    fn expands_all_scenarios_keyword() {
        let expanded = expand_scenarios("all,smoke");
        assert!(expanded.contains(&"greedy-collapse".to_string()));
        assert!(!expanded.contains(&"all".to_string()));
        assert_eq!(expanded.len(), list_scenarios().len() + 1);
    }

    #[test]
    fn expand_scenarios_without_all_preserves_order() {
        let expanded = expand_scenarios("offline-hour, smoke");
        assert_eq!(expanded, vec!["offline-hour", "smoke"]);
    }

    #[tokio::test]
    async fn run_logic_scenarios_skips_when_not_enabled() {
        let mut args = base_args();
        args.mode = TestMode::Live;
        let results = run_logic_scenarios(&args, &["smoke".to_string()], tester()).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn run_logic_scenarios_ignores_unknown_names() {
        let args = base_args();
        let names = ["nope".to_string(), "debounce-burst".to_string()];
        let results = run_logic_scenarios(&args, &names, tester()).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].passed, "{:?}", results[0].failures);
    }

    #[tokio::test]
    async fn run_live_skips_in_logic_mode() {
        let report = run_live(&base_args(), &LifecycleConfig::default()).await.unwrap();
        assert!(report.is_none());
    }

    #[test]
    fn load_config_reads_partial_json() {
        let path = temp_path("config");
        fs::write(&path, r#"{ "tickIntervalMs": 100 }"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.tick_interval_ms, 100);
        assert_eq!(config.save_debounce_ms, LifecycleConfig::default().save_debounce_ms);
        assert_eq!(load_config(None).unwrap(), LifecycleConfig::default());
    }

    #[test]
    fn load_config_rejects_bad_files() {
        let path = temp_path("bad-config");
        fs::write(&path, r#"{ "tickIntervalMs": 0 }"#).unwrap();
        assert!(load_config(Some(&path)).is_err());
        assert!(load_config(Some(&temp_path("missing"))).is_err());
    }

    #[test]
    fn write_reports_emits_json_output() {
        let mut args = base_args();
        let path = temp_path("json");
        args.output = Some(path.clone());
        write_reports(&args, &[sample_result(true)], None, Instant::now()).unwrap();
        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("\"scenario_name\": \"Smoke\""));
    }

    #[test]
    fn write_reports_emits_markdown_report() {
        let mut args = base_args();
        args.report = "markdown".to_string();
        let path = temp_path("markdown");
        args.output = Some(path.clone());
        write_reports(&args, &[sample_result(false)], None, Instant::now()).unwrap();
        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("# Sygnal Logic Test Results"));
        assert!(content.contains("  - failure"));
    }

    #[test]
    fn maybe_list_scenarios_writes_output() {
        let mut args = base_args();
        args.list_scenarios = true;
        let path = temp_path("list");
        args.output = Some(path.clone());
        assert!(maybe_list_scenarios(&args).unwrap());
        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("Available scenarios"));
        assert!(content.contains("identity-switch"));
    }

    #[test]
    fn maybe_list_scenarios_returns_false_when_disabled() {
        assert!(!maybe_list_scenarios(&base_args()).unwrap());
    }

    #[test]
    fn output_target_stdout_writes() {
        let mut target = OutputTarget::new(None).unwrap();
        writeln!(target, "hello").unwrap();
        target.flush().unwrap();
    }
}
