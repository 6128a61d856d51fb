//! Call phase state machine.

use crate::types::EndReason;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Current phase of a call session.
///
/// `Ended` is terminal and reachable from every other phase. `Active` and
/// `Recovering` flip back and forth while the media engine loses and regains
/// connectivity mid-call.
#[derive(Debug, Clone, Serialize, Default)]
pub enum CallPhase {
    /// Session constructed, nothing started yet.
    #[default]
    Idle,
    /// Outgoing call: offer being prepared/sent, waiting for the peer.
    Dialing { started_at: DateTime<Utc> },
    /// Incoming call: ringing locally, waiting for the user.
    Ringing { received_at: DateTime<Utc> },
    /// Offer/answer exchange underway.
    Negotiating { since: DateTime<Utc> },
    /// Media flowing.
    Active { answered_at: DateTime<Utc> },
    /// Connectivity lost mid-call; recovery in progress.
    Recovering {
        answered_at: DateTime<Utc>,
        since: DateTime<Utc>,
    },
    /// Terminal.
    Ended {
        reason: Option<EndReason>,
        ended_at: DateTime<Utc>,
    },
}

impl CallPhase {
    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended { .. })
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn is_recovering(&self) -> bool {
        matches!(self, Self::Recovering { .. })
    }

    pub fn can_accept(&self) -> bool {
        matches!(self, Self::Ringing { .. })
    }

    /// Whether the session counts as answered (used by recovery and the
    /// call-log status function).
    pub fn answered_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Active { answered_at } | Self::Recovering { answered_at, .. } => {
                Some(*answered_at)
            }
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Dialing { .. } => "dialing",
            Self::Ringing { .. } => "ringing",
            Self::Negotiating { .. } => "negotiating",
            Self::Active { .. } => "active",
            Self::Recovering { .. } => "recovering",
            Self::Ended { .. } => "ended",
        }
    }

    /// Apply a transition. Returns the error (and leaves the phase
    /// untouched) when the transition is not valid from the current phase.
    pub fn apply(&mut self, transition: PhaseTransition) -> Result<(), InvalidTransition> {
        let next = match (&*self, &transition) {
            (Self::Idle, PhaseTransition::DialingStarted) => Self::Dialing {
                started_at: Utc::now(),
            },
            (Self::Idle, PhaseTransition::IncomingRegistered) => Self::Ringing {
                received_at: Utc::now(),
            },
            (Self::Dialing { .. }, PhaseTransition::OfferSent) => {
                Self::Negotiating { since: Utc::now() }
            }
            (Self::Ringing { .. }, PhaseTransition::AcceptStarted) => {
                Self::Negotiating { since: Utc::now() }
            }
            (Self::Negotiating { .. }, PhaseTransition::AnswerApplied)
            | (Self::Negotiating { .. }, PhaseTransition::MediaConnected) => Self::Active {
                answered_at: Utc::now(),
            },
            (Self::Recovering { answered_at, .. }, PhaseTransition::MediaConnected)
            | (Self::Recovering { answered_at, .. }, PhaseTransition::ConnectivityRestored) => {
                Self::Active {
                    answered_at: *answered_at,
                }
            }
            (Self::Active { answered_at }, PhaseTransition::ConnectivityLost) => Self::Recovering {
                answered_at: *answered_at,
                since: Utc::now(),
            },
            (current, PhaseTransition::Terminated { reason }) if !current.is_ended() => {
                Self::Ended {
                    reason: *reason,
                    ended_at: Utc::now(),
                }
            }
            (current, attempted) => {
                return Err(InvalidTransition {
                    current_phase: current.name(),
                    attempted: attempted.name(),
                });
            }
        };
        *self = next;
        Ok(())
    }
}

/// Phase transitions, driven by user actions, transport events and the
/// recovery supervisor.
#[derive(Debug, Clone, Copy)]
pub enum PhaseTransition {
    DialingStarted,
    IncomingRegistered,
    OfferSent,
    AcceptStarted,
    AnswerApplied,
    MediaConnected,
    ConnectivityLost,
    ConnectivityRestored,
    Terminated { reason: Option<EndReason> },
}

impl PhaseTransition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DialingStarted => "dialing_started",
            Self::IncomingRegistered => "incoming_registered",
            Self::OfferSent => "offer_sent",
            Self::AcceptStarted => "accept_started",
            Self::AnswerApplied => "answer_applied",
            Self::MediaConnected => "media_connected",
            Self::ConnectivityLost => "connectivity_lost",
            Self::ConnectivityRestored => "connectivity_restored",
            Self::Terminated { .. } => "terminated",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid transition {attempted} in phase {current_phase}")]
pub struct InvalidTransition {
    pub current_phase: &'static str,
    pub attempted: &'static str,
}
