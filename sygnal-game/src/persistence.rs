//! Persistence guard: debounced soft saves, hydration pausing, and the
//! in-flight write guard.
//!
//! The guard owns no I/O. The orchestrator consults it before every gateway
//! write and reports back how the write went.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::Identity;

/// Errors raised by a save gateway or by encoding the save.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("save backend unavailable: {0}")]
    Backend(String),
    #[error("could not encode save: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("could not decode save: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("save schema {found} is newer than supported schema {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },
}

/// Why a flush was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveReason {
    Debounced,
    Explicit,
    Autosave,
    Hidden,
    Teardown,
    PhaseChange,
    Wipe,
}

/// Why a flush did not reach the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    NoIdentity,
    Hydrating,
    InFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    Skipped(SkipReason),
    Failed,
}

/// Tracks whose data populates canonical state and when writes are allowed.
#[derive(Debug, Clone)]
pub struct PersistenceGuard {
    tracked: Option<Identity>,
    debounce_ms: i64,
    deadline: Option<i64>,
    hydrating: bool,
    in_flight: bool,
    retry_pending: bool,
}

impl PersistenceGuard {
    #[must_use]
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            tracked: None,
            debounce_ms: i64::try_from(debounce_ms).unwrap_or(i64::MAX),
            deadline: None,
            hydrating: false,
            in_flight: false,
            retry_pending: false,
        }
    }

    #[must_use]
    pub const fn tracked(&self) -> Option<&Identity> {
        self.tracked.as_ref()
    }

    #[must_use]
    pub const fn is_hydrating(&self) -> bool {
        self.hydrating
    }

    #[must_use]
    pub const fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    /// Pending debounced flush deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<i64> {
        self.deadline
    }

    /// Schedule a soft save. The last request wins and restarts the quiet
    /// window. Returns `true` when an earlier pending request was coalesced.
    pub fn request_soon(&mut self, now_ms: i64) -> bool {
        let coalesced = self.deadline.is_some();
        self.deadline = Some(now_ms.saturating_add(self.debounce_ms));
        coalesced
    }

    /// Consume the pending soft save if its quiet window has elapsed.
    pub fn take_due(&mut self, now_ms: i64) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now_ms => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel_pending(&mut self) {
        self.deadline = None;
    }

    /// Stop all writes until [`Self::finish_hydration`]. Any soft save queued
    /// for the previous identity is dropped.
    pub fn begin_hydration(&mut self) {
        self.hydrating = true;
        self.deadline = None;
        self.retry_pending = false;
    }

    /// Adopt `identity` as the owner of canonical state and resume writes.
    pub fn finish_hydration(&mut self, identity: Option<Identity>) {
        self.tracked = identity;
        self.hydrating = false;
    }

    /// Claim the write slot, returning the identity to save under.
    ///
    /// # Errors
    ///
    /// Returns the reason the write must be skipped.
    pub fn begin_write(&mut self) -> Result<Identity, SkipReason> {
        if let Some(skip) = self.write_blocker() {
            return Err(skip);
        }
        let identity = self.tracked.clone().ok_or(SkipReason::NoIdentity)?;
        self.in_flight = true;
        Ok(identity)
    }

    /// Why a write would be skipped right now, if it would.
    #[must_use]
    pub const fn write_blocker(&self) -> Option<SkipReason> {
        if self.hydrating {
            Some(SkipReason::Hydrating)
        } else if self.in_flight {
            Some(SkipReason::InFlight)
        } else if self.tracked.is_none() {
            Some(SkipReason::NoIdentity)
        } else {
            None
        }
    }

    pub fn end_write(&mut self, succeeded: bool) {
        self.in_flight = false;
        self.retry_pending = !succeeded;
    }

    /// Claim the write slot as a [`WriteSlot`] that releases itself when
    /// dropped unsettled, so a cancelled save counts as a failed one.
    ///
    /// # Errors
    ///
    /// Returns the reason the write must be skipped.
    pub fn claim_write(&mut self) -> Result<WriteSlot<'_>, SkipReason> {
        let identity = self.begin_write()?;
        Ok(WriteSlot {
            guard: self,
            identity,
            settled: false,
        })
    }
}

/// A claimed write. Settle it with the gateway's verdict; dropping it
/// unsettled releases the slot and marks the save for retry.
#[derive(Debug)]
pub struct WriteSlot<'a> {
    guard: &'a mut PersistenceGuard,
    identity: Identity,
    settled: bool,
}

impl WriteSlot<'_> {
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn settle(mut self, succeeded: bool) {
        self.guard.end_write(succeeded);
        self.settled = true;
    }
}

impl Drop for WriteSlot<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.guard.end_write(false);
        }
    }
}
