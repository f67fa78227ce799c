//! Events produced by [`crate::app::App`] for the screen layer.
//!
//! The app never renders anything. Each operation and each tick returns the
//! events it caused; the REPL prints them and follows `Navigate`.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::location::Position;
use crate::model::MatchStatus;
use crate::navigation::Route;

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The user closed it
    Explicit,
    /// The countdown reached zero
    Expired,
    /// A new session was opened over it
    Replaced,
    SignedOut,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "closed",
            Self::Expired => "expired",
            Self::Replaced => "replaced",
            Self::SignedOut => "signed out",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    SessionOpened {
        session_id: String,
        expires_at: DateTime<Utc>,
    },
    SessionExtended {
        expires_at: DateTime<Utc>,
    },
    SessionClosed {
        session_id: String,
        reason: CloseReason,
    },
    Countdown {
        remaining_secs: u64,
    },
    LocationUpdated(Position),
    MatchDiscovered {
        match_id: String,
        counterpart: String,
        shared_interests: Vec<String>,
    },
    MatchUpdated {
        match_id: String,
        status: MatchStatus,
    },
    MatchClosed {
        match_id: String,
    },
    Navigate(Route),
}

/// `mm:ss` (or `h:mm:ss` past an hour)
pub fn format_remaining(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

impl fmt::Display for AppEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionOpened { expires_at, .. } => write!(
                f,
                "You're open to connect until {}",
                expires_at.format("%H:%M:%S UTC")
            ),
            Self::SessionExtended { expires_at } => {
                write!(f, "Extended until {}", expires_at.format("%H:%M:%S UTC"))
            }
            Self::SessionClosed { reason, .. } => write!(f, "Session {}", reason.as_str()),
            Self::Countdown { remaining_secs } => {
                write!(f, "{} left", format_remaining(*remaining_secs))
            }
            Self::LocationUpdated(p) => {
                write!(f, "Location updated ({:.4}, {:.4})", p.latitude, p.longitude)
            }
            Self::MatchDiscovered {
                match_id,
                counterpart,
                shared_interests,
            } => write!(
                f,
                "Match found: {} [{}] shares {}",
                counterpart,
                short_id(match_id),
                shared_interests.join(", ")
            ),
            Self::MatchUpdated { match_id, status } => {
                write!(f, "Match [{}] is now {}", short_id(match_id), status)
            }
            Self::MatchClosed { match_id } => write!(f, "Match [{}] closed", short_id(match_id)),
            Self::Navigate(route) => write!(f, "-> {}", route),
        }
    }
}

/// First 8 characters of an id, enough to address it from the REPL
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
