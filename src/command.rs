// src/command.rs
//
// Manual overrides typed by an operator. The host reads them from stdin on a
// separate task and hands them over a channel; they are applied between
// frames by whoever owns the session.

use crate::error::OccupancyError;
use crate::occupancy::OccupancyStatus;
use crate::pipeline::ParkingSession;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub enum ManualCommand {
    /// `set <uid> <free|occupied|unknown>`, locks the space. Targets go
    /// through `target <uid>`.
    SetStatus { uid: String, status: OccupancyStatus },
    /// `unlock <uid>`
    Unlock { uid: String },
    /// `target <uid>`
    SelectTarget { uid: String },
    /// `clear-targets`
    ClearTargets,
    /// `reset`
    Reset,
}

impl FromStr for ManualCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["set", uid, status] => Ok(Self::SetStatus {
                uid: uid.to_string(),
                status: status.parse()?,
            }),
            ["unlock", uid] => Ok(Self::Unlock {
                uid: uid.to_string(),
            }),
            ["target", uid] => Ok(Self::SelectTarget {
                uid: uid.to_string(),
            }),
            ["clear-targets"] => Ok(Self::ClearTargets),
            ["reset"] => Ok(Self::Reset),
            [] => Err("empty command".to_string()),
            _ => Err(format!(
                "unrecognized command {:?} (set|unlock|target|clear-targets|reset)",
                line.trim()
            )),
        }
    }
}

impl ManualCommand {
    /// Applies the command. Returns a short human-readable outcome.
    pub fn apply(
        &self,
        session: &mut ParkingSession,
        now_ms: u64,
    ) -> Result<String, OccupancyError> {
        match self {
            Self::SetStatus { uid, status } => {
                session.set_manual_status(uid, *status, now_ms)?;
                Ok(format!("space {} set to {} (locked)", uid, status))
            }
            Self::Unlock { uid } => Ok(if session.unlock(uid, now_ms)? {
                format!("space {} unlocked", uid)
            } else {
                format!("space {} was not locked", uid)
            }),
            Self::SelectTarget { uid } => Ok(if session.select_target(uid, now_ms)? {
                format!("space {} is now the target", uid)
            } else {
                format!("space {} is not free, target not set", uid)
            }),
            Self::ClearTargets => Ok(format!("{} target(s) cleared", session.clear_targets(now_ms))),
            Self::Reset => Ok(format!(
                "session reset, {} space(s) changed",
                session.reset(now_ms)
            )),
        }
    }
}
