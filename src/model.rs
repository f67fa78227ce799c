//! Persisted records: user, presence session, match and settings.
//!
//! Field names serialize in camelCase and statuses in snake_case so the JSON
//! written to the store matches the device's existing on-disk schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// User
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Closed,
}

/// A time-boxed window during which the user is discoverable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whole seconds left, rounded up so that zero means expired.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.expires_at - now).num_milliseconds();
        if millis <= 0 {
            0
        } else {
            (millis as u64).div_ceil(1000)
        }
    }
}

// ============================================================================
// Match
// ============================================================================

/// Which participant of a match is acting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    UserAInterested,
    UserBInterested,
    BothReady,
    Declined,
    Closed,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::UserAInterested => "user_a_interested",
            Self::UserBInterested => "user_b_interested",
            Self::BothReady => "both_ready",
            Self::Declined => "declined",
            Self::Closed => "closed",
        }
    }

    /// Neither side has settled the handshake yet
    pub fn is_pending_like(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::UserAInterested | Self::UserBInterested
        )
    }

    pub fn is_ready(&self) -> bool {
        *self == Self::BothReady
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Declined | Self::Closed)
    }

    /// Only pending-like matches take a "yes". `both_ready`, `declined` and
    /// `closed` absorb it.
    pub fn accepts_responses(&self) -> bool {
        self.is_pending_like()
    }

    /// Per-side accept flags `(a, b)` folded into this status
    fn flags(&self) -> (bool, bool) {
        match self {
            Self::UserAInterested => (true, false),
            Self::UserBInterested => (false, true),
            Self::BothReady => (true, true),
            _ => (false, false),
        }
    }

    fn from_flags(a: bool, b: bool) -> Self {
        match (a, b) {
            (false, false) => Self::Pending,
            (true, false) => Self::UserAInterested,
            (false, true) => Self::UserBInterested,
            (true, true) => Self::BothReady,
        }
    }

    /// Status after `side` answers. A "no" declines from any status; a "yes"
    /// sets that side's flag and keeps whatever the other side already said.
    pub fn respond(self, side: Side, interested: bool) -> Self {
        if !interested {
            return Self::Declined;
        }
        if !self.accepts_responses() {
            return self;
        }
        let (mut a, mut b) = self.flags();
        match side {
            Side::A => a = true,
            Side::B => b = true,
        }
        Self::from_flags(a, b)
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate pairing between the local user and a counterpart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: String,
    pub session_a_id: String,
    pub session_b_id: String,
    pub user_a: User,
    pub user_b: User,
    #[serde(default)]
    pub shared_interests: Vec<String>,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
}

impl Match {
    pub fn side_of(&self, user_id: &str) -> Option<Side> {
        if self.user_a.id == user_id {
            Some(Side::A)
        } else if self.user_b.id == user_id {
            Some(Side::B)
        } else {
            None
        }
    }

    /// The participant that is not `user_id`
    pub fn counterpart(&self, user_id: &str) -> Option<&User> {
        match self.side_of(user_id)? {
            Side::A => Some(&self.user_b),
            Side::B => Some(&self.user_a),
        }
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.side_of(user_id).is_some()
    }

    pub fn belongs_to_session(&self, session_id: &str) -> bool {
        self.session_a_id == session_id || self.session_b_id == session_id
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Allowed lengths of a presence session, in minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum OpenTime {
    Thirty,
    #[default]
    FortyFive,
    Sixty,
}

impl OpenTime {
    pub fn minutes(&self) -> u32 {
        match self {
            Self::Thirty => 30,
            Self::FortyFive => 45,
            Self::Sixty => 60,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.minutes()))
    }
}

impl TryFrom<u32> for OpenTime {
    type Error = String;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        match minutes {
            30 => Ok(Self::Thirty),
            45 => Ok(Self::FortyFive),
            60 => Ok(Self::Sixty),
            other => Err(format!("open time must be 30, 45 or 60 minutes, got {}", other)),
        }
    }
}

impl From<OpenTime> for u32 {
    fn from(value: OpenTime) -> Self {
        value.minutes()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub default_open_time: OpenTime,
    #[serde(default)]
    pub blocked_users: Vec<String>,
}

impl Settings {
    pub fn is_blocked(&self, user_id: &str) -> bool {
        self.blocked_users.iter().any(|id| id == user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    Dark,
    #[default]
    System,
}

impl ThemeMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "light" => Some(Self::Light),
            "dark" => Some(Self::Dark),
            "system" | "auto" => Some(Self::System),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
            Self::System => "system",
        }
    }
}
