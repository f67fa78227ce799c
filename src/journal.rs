use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::model::{Match, MatchStatus, Session};

/// Append-only JSONL record of lifecycle events on this device
pub struct Journal {
    pub path: PathBuf,
    file: File,
}

#[derive(Serialize)]
struct Entry<'a> {
    ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

impl Journal {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn log(
        &mut self,
        user_id: Option<&str>,
        event_type: &str,
        data: serde_json::Value,
    ) -> Result<()> {
        let entry = Entry {
            ts: Utc::now(),
            user_id,
            event_type,
            data,
        };
        let line = serde_json::to_string(&entry)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn session_opened(&mut self, session: &Session) -> Result<()> {
        self.log(
            Some(&session.user_id),
            "session_opened",
            serde_json::json!({
                "session_id": session.id,
                "expires_at": session.expires_at,
            }),
        )
    }

    pub fn session_extended(&mut self, session: &Session) -> Result<()> {
        self.log(
            Some(&session.user_id),
            "session_extended",
            serde_json::json!({
                "session_id": session.id,
                "expires_at": session.expires_at,
            }),
        )
    }

    pub fn session_closed(&mut self, session: &Session, reason: &str) -> Result<()> {
        self.log(
            Some(&session.user_id),
            "session_closed",
            serde_json::json!({ "session_id": session.id, "reason": reason }),
        )
    }

    pub fn match_discovered(&mut self, m: &Match) -> Result<()> {
        self.log(
            Some(&m.user_a.id),
            "match_discovered",
            serde_json::json!({
                "match_id": m.id,
                "counterpart": m.user_b.id,
                "shared_interests": m.shared_interests,
            }),
        )
    }

    pub fn match_status(
        &mut self,
        user_id: &str,
        match_id: &str,
        status: MatchStatus,
    ) -> Result<()> {
        self.log(
            Some(user_id),
            "match_status",
            serde_json::json!({ "match_id": match_id, "status": status }),
        )
    }

    pub fn match_closed(&mut self, user_id: &str, match_id: &str) -> Result<()> {
        self.log(
            Some(user_id),
            "match_closed",
            serde_json::json!({ "match_id": match_id }),
        )
    }
}
