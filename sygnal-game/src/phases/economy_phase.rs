//! Economy phase plugin: one resource-pressure engine driven by a tuning.

use serde_json::Value;

use crate::constants::{LOG_STABILISED, LOG_UNSEALED_PREFIX, PRESSURE_MAX};
use crate::economy::{AdvanceMode, EconomyError, EconomyState, EconomyTuning, LogChannel};
use crate::numbers::floor_f64_to_u64;
use crate::plugin::{
    OfflineReport, PhaseApi, PhaseInput, PhasePlugin, PluginError, RenderTarget, TickContext,
    TickReport,
};
use crate::state::{GameState, Meta, PhaseId};

const RECENT_COMMS: usize = 5;
const RECENT_TRANSMISSIONS: usize = 3;
const BAR_WIDTH: usize = 20;

impl From<EconomyError> for PluginError {
    fn from(err: EconomyError) -> Self {
        Self::Rejected(err.to_string())
    }
}

/// A resource-pressure phase driven by one tuning document.
#[derive(Debug, Clone)]
pub struct EconomyPhase {
    id: PhaseId,
    tuning: EconomyTuning,
}

impl EconomyPhase {
    #[must_use]
    pub fn new(id: impl Into<PhaseId>, tuning: EconomyTuning) -> Self {
        Self {
            id: id.into(),
            tuning,
        }
    }

    #[must_use]
    pub const fn tuning(&self) -> &EconomyTuning {
        &self.tuning
    }

    fn decode(&self, blob: Option<&Value>, now_ms: i64) -> Result<EconomyState, PluginError> {
        let blob = blob.unwrap_or(&Value::Null);
        Ok(EconomyState::from_value(blob, &self.tuning, now_ms)?)
    }

    fn announce_completion(&self, state: &mut EconomyState, now_ms: i64, report: &mut TickReport) {
        state.log(LogChannel::Comms, now_ms, LOG_STABILISED);
        if let Some(next) = &self.tuning.unlocks {
            state.log(
                LogChannel::Comms,
                now_ms,
                &format!("{LOG_UNSEALED_PREFIX}{next}"),
            );
            report.unlocked.push(next.clone());
        }
        log::info!("phase {} stabilised", self.id);
    }

    /// Route `Advance`/`Retreat` to a neighbouring phase.
    fn travel(
        &self,
        target: Option<&PhaseId>,
        meta: &Meta,
        api: &mut PhaseApi<'_>,
    ) -> Result<(), PluginError> {
        let Some(next) = target else {
            return Err(PluginError::Rejected(format!("no route out of {}", self.id)));
        };
        if Some(next) == self.tuning.unlocks.as_ref() && !meta.is_unlocked(next.as_str()) {
            return Err(PluginError::Rejected(format!("{next} is still sealed")));
        }
        api.set_phase(next.clone());
        Ok(())
    }

    fn paint(&self, state: &EconomyState, meta: &Meta, target: &mut dyn RenderTarget) {
        let tuning = &self.tuning;
        target.line(&tuning.title);
        target.line(&format!(
            "{}: {} (+{:.1}/s)",
            tuning.resource_label,
            floor_f64_to_u64(state.resource),
            state.generation_rate
        ));
        target.line(&format!(
            "{}: {:>5.1}% {}",
            tuning.pressure_label,
            state.pressure,
            pressure_bar(state.pressure)
        ));
        target.line(&state.progress_text(tuning));
        if state.holding {
            target.line(&format!("holding, fatigue {:.0}%", state.fatigue * 100.0));
        }

        if meta.offline_needs_ack {
            target.line("-- while you were away --");
            for line in &meta.offline_summary {
                target.line(line);
            }
        }

        for def in &tuning.upgrades {
            let level = state.level(&def.id);
            target.line(&format!(
                "[{}] {} lvl {level}, cost {}",
                def.id,
                def.name,
                floor_f64_to_u64(def.cost_at(level))
            ));
        }
        target.line(&format!(
            "[purge] -{:.1}% for {}",
            state.purge_amount(tuning),
            floor_f64_to_u64(state.purge_cost(tuning))
        ));

        for line in state.comms.iter().rev().take(RECENT_COMMS).rev() {
            target.line(line);
        }
        for line in state.transmission.iter().rev().take(RECENT_TRANSMISSIONS).rev() {
            target.line(line);
        }
    }
}

fn pressure_bar(pressure: f64) -> String {
    let filled = usize::try_from(floor_f64_to_u64(pressure / PRESSURE_MAX * 20.0))
        .unwrap_or(BAR_WIDTH)
        .min(BAR_WIDTH);
    format!("[{}{}]", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled))
}

impl PhasePlugin for EconomyPhase {
    fn mount(
        &mut self,
        target: &mut dyn RenderTarget,
        api: &mut PhaseApi<'_>,
    ) -> Result<(), PluginError> {
        let mut snapshot = api.get_state();
        let blob = snapshot.phase_state(self.id.as_str());
        let fresh = blob.is_none_or(|value| value.as_object().is_some_and(serde_json::Map::is_empty));
        let state = self.decode(blob, api.now_ms())?;
        if fresh {
            snapshot.phases.insert(self.id.clone(), state.to_value()?);
            api.set_state(snapshot.clone());
            api.save_soon();
        }
        self.paint(&state, &snapshot.meta, target);
        Ok(())
    }

    fn unmount(&mut self, api: &mut PhaseApi<'_>) -> Result<(), PluginError> {
        let mut snapshot = api.get_state();
        let mut state = self.decode(snapshot.phase_state(self.id.as_str()), api.now_ms())?;
        if state.holding {
            state.stop_hold();
            snapshot.phases.insert(self.id.clone(), state.to_value()?);
            api.set_state(snapshot);
        }
        Ok(())
    }

    fn tick(&mut self, blob: &mut Value, ctx: &TickContext) -> Result<TickReport, PluginError> {
        let mut state = self.decode(Some(blob), ctx.now_ms)?;
        let mut report = TickReport::default();
        if state.defeated {
            return Ok(report);
        }
        let step = state.advance(&self.tuning, ctx.dt_ms, AdvanceMode::Live, ctx.now_ms);
        if step.defeated_now {
            log::info!("phase {} defeated", self.id);
        }
        if step.completed_now {
            self.announce_completion(&mut state, ctx.now_ms, &mut report);
        }
        *blob = state.to_value()?;
        Ok(report)
    }

    fn apply_offline_progress(
        &mut self,
        blob: &mut Value,
        ctx: &TickContext,
    ) -> Result<OfflineReport, PluginError> {
        // The orchestrator owns the offline threshold.
        if ctx.dt_ms <= 0.0 {
            return Ok(OfflineReport::default());
        }
        let mut state = self.decode(Some(blob), ctx.now_ms)?;
        let summary = state.catch_up(&self.tuning, ctx.dt_ms, ctx.now_ms);
        *blob = state.to_value()?;
        Ok(OfflineReport {
            summary,
            ..OfflineReport::default()
        })
    }

    fn handle_input(
        &mut self,
        input: &PhaseInput,
        api: &mut PhaseApi<'_>,
    ) -> Result<(), PluginError> {
        let now = api.now_ms();
        let mut snapshot = api.get_state();
        let mut state = self.decode(snapshot.phase_state(self.id.as_str()), now)?;
        let tuning = &self.tuning;
        let mut urgent = false;

        match input {
            PhaseInput::Ping => {
                state.ping(tuning, now)?;
            }
            PhaseInput::HoldStart => state.start_hold()?,
            PhaseInput::HoldStop => state.stop_hold(),
            PhaseInput::Purge => {
                state.purge(tuning, now)?;
            }
            PhaseInput::Buy(id) => {
                state.buy(tuning, id, now)?;
            }
            PhaseInput::Restart => {
                state.restart(tuning, now);
                urgent = true;
            }
            PhaseInput::Acknowledge => {
                api.acknowledge_offline();
                return Ok(());
            }
            PhaseInput::Advance => return self.travel(tuning.unlocks.as_ref(), &snapshot.meta, api),
            PhaseInput::Retreat => return self.travel(tuning.previous.as_ref(), &snapshot.meta, api),
            PhaseInput::SubmitName(_) => {
                return Err(PluginError::Rejected(format!(
                    "{} does not take names",
                    self.id
                )));
            }
        }

        snapshot.phases.insert(self.id.clone(), state.to_value()?);
        api.set_state(snapshot);
        if urgent {
            api.save_now();
        } else {
            api.save_soon();
        }
        Ok(())
    }

    fn render(&self, snapshot: &GameState, target: &mut dyn RenderTarget) {
        target.clear();
        match self.decode(snapshot.phase_state(self.id.as_str()), snapshot.meta.last_seen_at) {
            Ok(state) => self.paint(&state, &snapshot.meta, target),
            Err(err) => target.line(&format!("{} unavailable: {err}", self.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::signal_tuning;
    use crate::plugin::TextSurface;
    use serde_json::json;

    fn phase() -> EconomyPhase {
        EconomyPhase::new("signal", signal_tuning().unwrap())
    }

    #[test]
    fn defeated_blob_is_left_alone_by_ticks() {
        let mut plugin = phase();
        let mut blob = json!({ "resource": 50.0, "pressure": 100.0, "defeated": true });
        let before = blob.clone();
        let ctx = TickContext {
            dt_ms: 250.0,
            now_ms: 1_000,
        };
        for _ in 0..5 {
            plugin.tick(&mut blob, &ctx).unwrap();
        }
        assert_eq!(blob, before);
    }

    #[test]
    fn completion_reports_the_unlock_once() {
        let mut plugin = phase();
        let tuning = signal_tuning().unwrap();
        let mut state = EconomyState::initial(&tuning, 0);
        state.resource = tuning.win.resource_threshold;
        state.upgrades.insert(String::from("noiseCanceller"), 4);
        let mut blob = state.to_value().unwrap();
        let ctx = TickContext {
            dt_ms: 1_000.0,
            now_ms: 0,
        };
        let mut unlocks = Vec::new();
        for _ in 0..15 {
            unlocks.extend(plugin.tick(&mut blob, &ctx).unwrap().unlocked);
        }
        assert_eq!(unlocks, vec![PhaseId::from("relay")]);
        assert_eq!(blob["completed"], json!(true));
    }

    #[test]
    fn empty_gaps_skip_offline_progress() {
        let mut plugin = phase();
        let mut blob = json!({});
        let ctx = TickContext {
            dt_ms: 0.0,
            now_ms: 999,
        };
        let report = plugin.apply_offline_progress(&mut blob, &ctx).unwrap();
        assert!(report.summary.is_empty());
        assert_eq!(blob, json!({}));
    }

    #[test]
    fn sub_second_gaps_still_catch_up() {
        let mut plugin = phase();
        let tuning = signal_tuning().unwrap();
        let mut blob = EconomyState::initial(&tuning, 0).to_value().unwrap();
        let ctx = TickContext {
            dt_ms: 500.0,
            now_ms: 500,
        };
        let report = plugin.apply_offline_progress(&mut blob, &ctx).unwrap();
        assert_eq!(report.summary.len(), 4);
        assert!(report.summary[0].starts_with("Offline for"));
    }

    #[test]
    fn render_shows_resource_and_pressure() {
        let plugin = phase();
        let mut snapshot = GameState::fresh(0);
        snapshot
            .phases
            .insert(PhaseId::from("signal"), json!({ "resource": 1234.9, "pressure": 50.0 }));
        let mut surface = TextSurface::new();
        plugin.render(&snapshot, &mut surface);
        assert!(surface.contains("signal: 1234"));
        assert!(surface.contains("##########.........."));
    }

    #[test]
    fn bar_saturates() {
        assert_eq!(pressure_bar(0.0), format!("[{}]", ".".repeat(20)));
        assert_eq!(pressure_bar(100.0), format!("[{}]", "#".repeat(20)));
    }
}
