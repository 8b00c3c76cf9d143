//! Real-time session on the tokio driver, with a scripted operator feeding
//! inputs through the event channel.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use sygnal_game::lifecycle::runtime::run;
use sygnal_game::{
    LifecycleConfig, LifecycleEvent, MemoryGateway, Orchestrator, PhaseInput, RenderTarget,
    RunSummary, StaticIdentity, TokioClock, default_registry,
};
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::logic::AutoplayStrategy;

const LIVE_OPERATOR: &str = "live-operator";
const STEP: Duration = Duration::from_millis(500);

/// Render target that keeps the last painted frame and can echo repaints.
#[derive(Debug, Clone, Default)]
pub struct ConsoleSurface {
    frame: Rc<RefCell<Vec<String>>>,
    echo: bool,
}

impl ConsoleSurface {
    #[must_use]
    pub fn new(echo: bool) -> Self {
        Self {
            frame: Rc::default(),
            echo,
        }
    }

    #[must_use]
    pub fn frame(&self) -> Vec<String> {
        self.frame.borrow().clone()
    }
}

impl RenderTarget for ConsoleSurface {
    fn clear(&mut self) {
        self.frame.borrow_mut().clear();
    }

    fn line(&mut self, text: &str) {
        if self.echo {
            println!("  {}", text.dimmed());
        }
        self.frame.borrow_mut().push(text.to_string());
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveReport {
    pub strategy: AutoplayStrategy,
    pub seconds: u64,
    pub ticks: u64,
    pub failed_ticks: u64,
    pub saves: u64,
    pub failed_saves: u64,
    pub rejected_inputs: u64,
    pub renders: u64,
    pub inputs_sent: usize,
    pub stored_saves: usize,
    pub frame: Vec<String>,
}

impl LiveReport {
    fn new(
        strategy: AutoplayStrategy,
        seconds: u64,
        summary: RunSummary,
        inputs_sent: usize,
        stored_saves: usize,
        frame: Vec<String>,
    ) -> Self {
        Self {
            strategy,
            seconds,
            ticks: summary.ticks,
            failed_ticks: summary.failed_ticks,
            saves: summary.saves,
            failed_saves: summary.failed_saves,
            rejected_inputs: summary.rejected_inputs,
            renders: summary.renders,
            inputs_sent,
            stored_saves,
            frame,
        }
    }

    #[must_use]
    pub const fn passed(&self) -> bool {
        self.ticks > 0 && self.failed_ticks == 0 && self.failed_saves == 0
    }

    pub fn write_console(&self, out: &mut dyn Write) -> Result<()> {
        let status = if self.passed() {
            "✅ PASS".green()
        } else {
            "❌ FAIL".red()
        };
        writeln!(out, "{} {}", status, format!("Live session ({})", self.strategy).bold())?;
        writeln!(
            out,
            "   {}s wall time, {} ticks ({} failed), {} renders",
            self.seconds, self.ticks, self.failed_ticks, self.renders
        )?;
        writeln!(
            out,
            "   Inputs: {} sent, {} rejected",
            self.inputs_sent, self.rejected_inputs
        )?;
        writeln!(
            out,
            "   Saves: {} written ({} failed), {} reached the gateway",
            self.saves, self.failed_saves, self.stored_saves
        )?;
        for line in &self.frame {
            writeln!(out, "   │ {line}")?;
        }
        Ok(())
    }
}

/// Inputs the scripted operator sends on step `n`.
fn scripted_inputs(strategy: AutoplayStrategy, n: u64) -> Vec<PhaseInput> {
    match strategy {
        AutoplayStrategy::Idle => Vec::new(),
        AutoplayStrategy::Tapper => vec![PhaseInput::Ping],
        AutoplayStrategy::Balanced => {
            let mut inputs = vec![PhaseInput::Ping];
            if n % 40 == 39 {
                inputs.push(PhaseInput::Buy(String::from("noiseCanceller")));
            }
            if n % 60 == 59 {
                inputs.push(PhaseInput::Purge);
            }
            inputs
        }
        AutoplayStrategy::Greedy => {
            let mut inputs = vec![PhaseInput::Ping];
            if n % 10 == 9 {
                inputs.push(PhaseInput::Buy(String::from("spsBoost")));
            }
            inputs
        }
    }
}

/// Drive one session in real time for `seconds`, then shut it down.
///
/// # Errors
///
/// Returns an error if the session cannot be built or the driver fails.
pub async fn run_live_session(
    config: &LifecycleConfig,
    strategy: AutoplayStrategy,
    seconds: u64,
    verbose: bool,
) -> Result<LiveReport> {
    let mut config = config.clone();
    config.render_interval_ms.get_or_insert(1_000);

    let gateway = MemoryGateway::new();
    let identity = StaticIdentity::signed_in(LIVE_OPERATOR);
    identity.create_profile(LIVE_OPERATOR, "Live Operator");
    let surface = ConsoleSurface::new(verbose);
    let mut orchestrator = Orchestrator::new(
        config,
        default_registry().context("loading bundled phases")?,
        gateway.clone(),
        identity,
        Box::new(TokioClock::from_system()),
        Box::new(surface.clone()),
    )
    .context("building live orchestrator")?;

    let (tx, rx) = mpsc::channel(64);
    let driver = async move {
        let steps = seconds * 1_000 / 500;
        let mut sent = 0;
        for n in 0..steps {
            sleep(STEP).await;
            for input in scripted_inputs(strategy, n) {
                if tx.send(LifecycleEvent::Input(input)).await.is_err() {
                    return sent;
                }
                sent += 1;
            }
            if n == steps / 2 {
                let _ = tx.send(LifecycleEvent::Hidden).await;
            }
        }
        let _ = tx.send(LifecycleEvent::Shutdown).await;
        sent
    };

    let (summary, sent) = tokio::join!(run(&mut orchestrator, rx), driver);
    let summary = summary.context("running live session")?;
    log::info!("live session finished: {summary:?}");

    Ok(LiveReport::new(
        strategy,
        seconds,
        summary,
        sent,
        gateway.save_calls(LIVE_OPERATOR),
        surface.frame(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_differ_by_strategy() {
        assert!(scripted_inputs(AutoplayStrategy::Idle, 0).is_empty());
        assert_eq!(scripted_inputs(AutoplayStrategy::Tapper, 5), vec![PhaseInput::Ping]);
        assert!(scripted_inputs(AutoplayStrategy::Greedy, 9)
            .contains(&PhaseInput::Buy(String::from("spsBoost"))));
        assert!(scripted_inputs(AutoplayStrategy::Balanced, 59).contains(&PhaseInput::Purge));
    }

    #[tokio::test(start_paused = true)]
    async fn live_session_runs_and_reports() {
        let report = run_live_session(&LifecycleConfig::default(), AutoplayStrategy::Tapper, 5, false)
            .await
            .unwrap();
        assert!(report.ticks >= 19, "ticks {}", report.ticks);
        assert_eq!(report.inputs_sent, 10);
        assert_eq!(report.rejected_inputs, 0);
        assert!(report.stored_saves >= 1);
        assert!(report.renders >= 4);
        assert!(report.frame.iter().any(|line| line.contains("SIGNAL LOCK")));
        assert!(report.passed());

        let mut buf = Vec::new();
        report.write_console(&mut buf).unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("Inputs: 10 sent"));
    }
}
