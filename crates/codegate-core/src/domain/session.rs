//! Correction-loop session state machine.
//!
//! ```text
//! Init -> Verifying -> Verified
//!                   -> NeedsCorrection -> Correcting -> Verifying -> ...
//!                   -> Escalated              \-> Escalated
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{CodegateError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    Verifying,
    NeedsCorrection,
    Correcting,
    Verified,
    Escalated,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Verified | Self::Escalated)
    }

    fn can_move_to(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Init, Verifying)
                | (Verifying, Verified)
                | (Verifying, NeedsCorrection)
                | (Verifying, Escalated)
                | (NeedsCorrection, Correcting)
                | (NeedsCorrection, Escalated)
                | (Correcting, Verifying)
                | (Correcting, Escalated)
        )
    }
}

/// One bounded verify/correct run over a single candidate lineage.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    state: SessionState,
    attempt_number: u32,
    max_attempts: u32,
    code: String,
    correction_ready: bool,
    report_ids: Vec<Uuid>,
}

impl Session {
    pub fn new(code: impl Into<String>, max_attempts: u32) -> Result<Self> {
        if max_attempts == 0 {
            return Err(CodegateError::config("max_attempts must be at least 1"));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            state: SessionState::Init,
            attempt_number: 1,
            max_attempts,
            code: code.into(),
            correction_ready: false,
            report_ids: Vec::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Current code candidate.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Ids of every report recorded so far, oldest first.
    pub fn report_ids(&self) -> &[Uuid] {
        &self.report_ids
    }

    fn transition(&mut self, to: SessionState) -> Result<()> {
        if !self.state.can_move_to(to) {
            return Err(CodegateError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Start verifying the current code. From `Correcting` this requires
    /// [`complete_correction`](Self::complete_correction) first.
    pub fn begin_verification(&mut self) -> Result<()> {
        if self.state == SessionState::Correcting && !self.correction_ready {
            return Err(CodegateError::InvalidTransition {
                from: self.state,
                to: SessionState::Verifying,
            });
        }
        self.transition(SessionState::Verifying)?;
        self.correction_ready = false;
        Ok(())
    }

    /// Record the report of the current attempt and move to the next state.
    pub fn record_report(&mut self, report_id: Uuid, verified: bool) -> Result<SessionState> {
        if self.state != SessionState::Verifying {
            return Err(CodegateError::InvalidTransition {
                from: self.state,
                to: SessionState::Verified,
            });
        }
        self.report_ids.push(report_id);
        let next = if verified {
            SessionState::Verified
        } else if self.attempt_number < self.max_attempts {
            SessionState::NeedsCorrection
        } else {
            SessionState::Escalated
        };
        self.transition(next)?;
        Ok(next)
    }

    pub fn begin_correction(&mut self) -> Result<()> {
        self.transition(SessionState::Correcting)
    }

    /// Accept corrected code as the next attempt. The session stays in
    /// `Correcting` until [`begin_verification`](Self::begin_verification).
    pub fn complete_correction(&mut self, code: impl Into<String>) -> Result<()> {
        if self.state != SessionState::Correcting || self.correction_ready {
            return Err(CodegateError::InvalidTransition {
                from: self.state,
                to: SessionState::Verifying,
            });
        }
        self.correction_ready = true;
        self.attempt_number += 1;
        self.code = code.into();
        Ok(())
    }

    pub fn escalate(&mut self) -> Result<()> {
        self.transition(SessionState::Escalated)
    }
}
