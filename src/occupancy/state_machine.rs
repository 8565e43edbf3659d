// src/occupancy/state_machine.rs
//
// Per-space occupancy with debounce hysteresis and manual locks.
//
// Every mutation returns the transitions it caused instead of notifying
// anyone directly; the frame processor forwards them to the event bus.

use crate::error::OccupancyError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OccupancyStatus {
    Free,
    Occupied,
    /// Manual reservation. Reported as free in aggregates.
    Target,
    Unknown,
}

impl OccupancyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Occupied => "occupied",
            Self::Target => "target",
            Self::Unknown => "unknown",
        }
    }

    /// Counts as available capacity in aggregate reports.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Free | Self::Target)
    }
}

impl fmt::Display for OccupancyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OccupancyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "occupied" => Ok(Self::Occupied),
            "target" => Ok(Self::Target),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown occupancy status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OccupancyConfig {
    /// Minimum gap since the last presence evidence before an unlocked
    /// occupied space may fall back to free.
    pub debounce_ms: u64,
    /// Status every space starts in.
    pub initial_status: OccupancyStatus,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 5000,
            initial_status: OccupancyStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccupancyRecord {
    pub status: OccupancyStatus,
    pub last_change_ms: u64,
    /// Time of the last cycle with presence evidence for this space.
    pub last_detection_ms: Option<u64>,
    pub locked: bool,
    /// Re-evaluated during the current cycle.
    pub updated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    Automatic,
    Manual,
    CoverageLost,
    /// Session reset back to the initial status.
    Reset,
}

/// One status change, consumed by the display collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccupancyEvent {
    pub uid: String,
    pub from: OccupancyStatus,
    pub to: OccupancyStatus,
    pub timestamp_ms: u64,
    pub cause: TransitionCause,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OccupancySummary {
    /// Free plus target.
    pub free: usize,
    pub occupied: usize,
    pub unknown: usize,
    pub target: usize,
    pub locked: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpaceSnapshot {
    pub uid: String,
    pub status: OccupancyStatus,
    pub last_change_ms: u64,
    pub locked: bool,
}

pub struct OccupancyMap {
    config: OccupancyConfig,
    uids: Vec<String>,
    records: Vec<OccupancyRecord>,
    by_uid: HashMap<String, usize>,
}

impl OccupancyMap {
    /// One record per uid, in the given order (registry uid order).
    pub fn new<'a>(
        uids: impl IntoIterator<Item = &'a str>,
        config: OccupancyConfig,
        now_ms: u64,
    ) -> Self {
        let uids: Vec<String> = uids.into_iter().map(str::to_string).collect();
        let records = uids
            .iter()
            .map(|_| OccupancyRecord {
                status: config.initial_status,
                last_change_ms: now_ms,
                last_detection_ms: None,
                locked: false,
                updated: false,
            })
            .collect();
        let by_uid = uids
            .iter()
            .enumerate()
            .map(|(i, u)| (u.clone(), i))
            .collect();
        Self {
            config,
            uids,
            records,
            by_uid,
        }
    }

    pub fn config(&self) -> &OccupancyConfig {
        &self.config
    }

    pub fn get(&self, uid: &str) -> Option<&OccupancyRecord> {
        self.by_uid.get(uid).map(|&i| &self.records[i])
    }

    pub fn status(&self, uid: &str) -> Option<OccupancyStatus> {
        self.get(uid).map(|r| r.status)
    }

    /// (uid, record) pairs in uid order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OccupancyRecord)> {
        self.uids.iter().map(String::as_str).zip(self.records.iter())
    }

    fn index(&self, uid: &str) -> Result<usize, OccupancyError> {
        self.by_uid
            .get(uid)
            .copied()
            .ok_or_else(|| OccupancyError::UnknownSpace(uid.to_string()))
    }

    fn transition(
        &mut self,
        i: usize,
        to: OccupancyStatus,
        now_ms: u64,
        cause: TransitionCause,
    ) -> Option<OccupancyEvent> {
        let record = &mut self.records[i];
        if record.status == to {
            return None;
        }
        let from = record.status;
        record.status = to;
        record.last_change_ms = now_ms;
        debug!("Space {}: {} -> {} ({:?})", self.uids[i], from, to, cause);
        Some(OccupancyEvent {
            uid: self.uids[i].clone(),
            from,
            to,
            timestamp_ms: now_ms,
            cause,
        })
    }

    /// One occupancy cycle.
    ///
    /// `coverage` lists the spaces the frame could observe; each is
    /// re-evaluated against `present`. Every other unlocked space is forced
    /// to unknown. Returns the transitions in uid order.
    pub fn derive<'a>(
        &mut self,
        present: &HashSet<String>,
        coverage: impl IntoIterator<Item = &'a str>,
        now_ms: u64,
    ) -> Vec<OccupancyEvent> {
        for record in &mut self.records {
            record.updated = false;
        }
        for uid in coverage {
            if let Some(&i) = self.by_uid.get(uid) {
                self.records[i].updated = true;
            }
        }

        let mut events = Vec::new();
        for i in 0..self.records.len() {
            let event = if self.records[i].updated {
                let has_evidence = present.contains(&self.uids[i]);
                self.evaluate(i, has_evidence, now_ms)
            } else if !self.records[i].locked {
                self.transition(i, OccupancyStatus::Unknown, now_ms, TransitionCause::CoverageLost)
            } else {
                None
            };
            events.extend(event);
        }
        events
    }

    fn evaluate(&mut self, i: usize, has_evidence: bool, now_ms: u64) -> Option<OccupancyEvent> {
        let debounce_ms = self.config.debounce_ms;
        let record = &mut self.records[i];

        if has_evidence {
            record.last_detection_ms = Some(now_ms);
        }
        if record.locked {
            return None;
        }

        if has_evidence {
            return self.transition(i, OccupancyStatus::Occupied, now_ms, TransitionCause::Automatic);
        }

        if record.status == OccupancyStatus::Occupied {
            let since = record.last_detection_ms.unwrap_or(record.last_change_ms);
            if now_ms.saturating_sub(since) < debounce_ms {
                return None;
            }
        }

        self.transition(i, OccupancyStatus::Free, now_ms, TransitionCause::Automatic)
    }

    /// Sets a status by hand and locks the space against automatic changes.
    /// Always returns an event, even when only the lock changed. `Target` is
    /// refused here; reservations go through `select_target`.
    pub fn set_manual_status(
        &mut self,
        uid: &str,
        status: OccupancyStatus,
        now_ms: u64,
    ) -> Result<OccupancyEvent, OccupancyError> {
        let i = self.index(uid)?;
        if status == OccupancyStatus::Target {
            return Err(OccupancyError::TargetNotSettable(uid.to_string()));
        }
        Ok(self.force_status(i, status, now_ms))
    }

    fn force_status(&mut self, i: usize, status: OccupancyStatus, now_ms: u64) -> OccupancyEvent {
        let uid = self.uids[i].clone();
        let record = &mut self.records[i];
        let from = record.status;
        record.status = status;
        record.locked = true;
        record.last_change_ms = now_ms;
        debug!("Space {}: manual {} -> {} (locked)", uid, from, status);
        OccupancyEvent {
            uid,
            from,
            to: status,
            timestamp_ms: now_ms,
            cause: TransitionCause::Manual,
        }
    }

    /// Clears the lock. Returns whether the space was locked.
    pub fn unlock(&mut self, uid: &str) -> Result<bool, OccupancyError> {
        let i = self.index(uid)?;
        let was_locked = self.records[i].locked;
        self.records[i].locked = false;
        Ok(was_locked)
    }

    /// Releases every target reservation back to free (manual, locked).
    pub fn clear_targets(&mut self, now_ms: u64) -> Vec<OccupancyEvent> {
        let targets: Vec<usize> = (0..self.records.len())
            .filter(|&i| self.records[i].status == OccupancyStatus::Target)
            .collect();
        targets
            .into_iter()
            .map(|i| self.force_status(i, OccupancyStatus::Free, now_ms))
            .collect()
    }

    /// Single-destination reservation: existing targets are released, then
    /// `uid` becomes the target if it is currently free.
    pub fn select_target(
        &mut self,
        uid: &str,
        now_ms: u64,
    ) -> Result<Vec<OccupancyEvent>, OccupancyError> {
        let i = self.index(uid)?;
        let mut events = self.clear_targets(now_ms);
        if self.records[i].status == OccupancyStatus::Free {
            events.push(self.force_status(i, OccupancyStatus::Target, now_ms));
        }
        Ok(events)
    }

    pub fn summary(&self) -> OccupancySummary {
        let mut s = OccupancySummary {
            total: self.records.len(),
            ..Default::default()
        };
        for r in &self.records {
            match r.status {
                OccupancyStatus::Free => s.free += 1,
                OccupancyStatus::Target => {
                    s.free += 1;
                    s.target += 1;
                }
                OccupancyStatus::Occupied => s.occupied += 1,
                OccupancyStatus::Unknown => s.unknown += 1,
            }
            if r.locked {
                s.locked += 1;
            }
        }
        s
    }

    pub fn snapshot(&self) -> Vec<SpaceSnapshot> {
        self.iter()
            .map(|(uid, r)| SpaceSnapshot {
                uid: uid.to_string(),
                status: r.status,
                last_change_ms: r.last_change_ms,
                locked: r.locked,
            })
            .collect()
    }

    /// Back to the initial state for every space.
    /// Returns every record to the initial status, unlocked. Spaces whose
    /// status changed or that were locked get an event.
    pub fn reset(&mut self, now_ms: u64) -> Vec<OccupancyEvent> {
        let initial = self.config.initial_status;
        let mut events = Vec::new();
        for (uid, r) in self.uids.iter().zip(self.records.iter_mut()) {
            if r.status != initial || r.locked {
                events.push(OccupancyEvent {
                    uid: uid.clone(),
                    from: r.status,
                    to: initial,
                    timestamp_ms: now_ms,
                    cause: TransitionCause::Reset,
                });
            }
            *r = OccupancyRecord {
                status: initial,
                last_change_ms: now_ms,
                last_detection_ms: None,
                locked: false,
                updated: false,
            };
        }
        debug!("Occupancy reset, {} space(s) changed", events.len());
        events
    }
}
