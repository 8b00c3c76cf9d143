//! Tokio driver for one orchestrator session.
//!
//! Everything runs on the calling task: the simulation interval, the autosave
//! interval, the debounce deadline, an optional render interval and the host
//! event channel are multiplexed with `select!`, so no two lifecycle steps
//! ever overlap.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};

use super::{LifecycleError, Orchestrator, TickStatus};
use crate::identity::Identity;
use crate::persistence::SaveOutcome;
use crate::plugin::PhaseInput;
use crate::{IdentityProvider, SaveGateway};

/// Notifications a host pushes into a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    IdentityChanged(Option<Identity>),
    Input(PhaseInput),
    /// The app lost visibility.
    Hidden,
    Shutdown,
}

/// Counters collected while the loop ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub failed_ticks: u64,
    pub saves: u64,
    pub failed_saves: u64,
    pub rejected_inputs: u64,
    pub failed_hydrations: u64,
    pub renders: u64,
}

impl RunSummary {
    fn record_save(&mut self, outcome: SaveOutcome) {
        match outcome {
            SaveOutcome::Saved => self.saves += 1,
            SaveOutcome::Failed => self.failed_saves += 1,
            SaveOutcome::Skipped(_) => {}
        }
    }
}

fn period(ms: u64) -> tokio::time::Interval {
    let mut timer = interval(Duration::from_millis(ms));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// Boot the orchestrator and drive it until `Shutdown` or the channel closes,
/// then flush one last time.
///
/// # Errors
///
/// Returns boot failures and fatal errors raised while handling events.
/// Rejected inputs and failed hydrations are counted, not returned.
pub async fn run<G, P>(
    orchestrator: &mut Orchestrator<G, P>,
    mut events: mpsc::Receiver<LifecycleEvent>,
) -> Result<RunSummary, LifecycleError>
where
    G: SaveGateway,
    P: IdentityProvider,
{
    orchestrator.boot().await?;
    let mut summary = RunSummary::default();

    let config = orchestrator.config().clone();
    let mut ticker = period(config.tick_interval_ms);
    let mut autosave = period(config.autosave_interval_ms);
    let mut repaint = config.render_interval_ms.map(period);
    // The first interval tick completes immediately.
    ticker.tick().await;
    autosave.tick().await;

    loop {
        let debounce_at = orchestrator.guard().deadline().map(|deadline| {
            let wait = deadline.saturating_sub(orchestrator.now_ms()).max(0);
            Instant::now() + Duration::from_millis(u64::try_from(wait).unwrap_or(0))
        });

        tokio::select! {
            _ = ticker.tick() => {
                summary.ticks += 1;
                if orchestrator.tick() == TickStatus::Failed {
                    summary.failed_ticks += 1;
                }
            }
            _ = autosave.tick() => {
                summary.record_save(orchestrator.autosave().await);
            }
            () = sleep_until(debounce_at.unwrap_or_else(Instant::now)), if debounce_at.is_some() => {
                if let Some(outcome) = orchestrator.flush_if_due().await {
                    summary.record_save(outcome);
                }
            }
            _ = async {
                match repaint.as_mut() {
                    Some(timer) => timer.tick().await,
                    None => std::future::pending().await,
                }
            } => {
                summary.renders += 1;
                orchestrator.render();
            }
            event = events.recv() => match event {
                Some(LifecycleEvent::IdentityChanged(next)) => {
                    // Writes stay paused after a failed hydration; a later
                    // change retries it.
                    if let Err(err) = orchestrator.on_identity_change(next).await {
                        log::error!("identity change failed: {err}");
                        summary.failed_hydrations += 1;
                    }
                }
                Some(LifecycleEvent::Input(input)) => match orchestrator.dispatch(input).await {
                    Ok(()) => {}
                    Err(LifecycleError::Input { phase, source }) => {
                        log::debug!("input rejected by {phase}: {source}");
                        summary.rejected_inputs += 1;
                    }
                    Err(err) => return Err(err),
                },
                Some(LifecycleEvent::Hidden) => {
                    summary.record_save(orchestrator.on_visibility_hidden().await);
                }
                Some(LifecycleEvent::Shutdown) | None => break,
            },
        }
    }

    log::info!("lifecycle stopping after {} ticks", summary.ticks);
    summary.record_save(orchestrator.teardown().await);
    Ok(summary)
}
