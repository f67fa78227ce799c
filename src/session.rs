//! Presence session state machine.
//!
//! Owns the single local presence window and its countdown. Time and the
//! store are passed into each call; nothing here reads the clock or keeps a
//! timer, so the caller decides the tick cadence.
//!
//! ```text
//!            open()                    extend() / attach_location()
//! ┌────────┐ ────────> ┌──────┐ ─────┐
//! │ closed │           │ open │      │
//! └────────┘ <──────── └──────┘ <────┘
//!        close() or tick() past expires_at
//! ```
//!
//! At most one session is open. Opening while one is open replaces it.
//! Closing removes the record from the store; expiry closes exactly once.

use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::location::Position;
use crate::model::{Session, SessionStatus, Settings, User};
use crate::store::{keys, Store, StoreExt};

/// Fixed increment applied by [`SessionManager::extend`]
pub const EXTEND_BY_MINUTES: i64 = 30;

/// Result of a countdown tick
#[derive(Debug, Clone, PartialEq)]
pub enum SessionTick {
    /// No session is open
    Idle,
    /// Session still open with this many whole seconds left
    Remaining(u64),
    /// The session reached its expiry and has been closed
    Expired(Session),
}

/// Outcome of [`SessionManager::open`]
#[derive(Debug, Clone)]
pub struct Opened {
    pub session: Session,
    /// The session this one replaced, if any
    pub replaced: Option<Session>,
}

#[derive(Debug, Default)]
pub struct SessionManager {
    current: Option<Session>,
    remaining_secs: u64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick up a persisted session if it is still open and owned by `user`.
    /// Anything else found under the session key is discarded.
    pub fn restore(store: &dyn Store, user: Option<&User>, now: DateTime<Utc>) -> Self {
        let Some(session) = store.get::<Session>(keys::SESSION) else {
            return Self::new();
        };

        let owned = user.is_some_and(|u| u.id == session.user_id);
        if session.status != SessionStatus::Open || !owned || session.is_expired(now) {
            tracing::info!(
                session_id = %session.id,
                owned,
                "discarding stale persisted session"
            );
            if !store.remove_item(keys::SESSION) {
                tracing::error!(session_id = %session.id, "failed to remove stale session");
            }
            return Self::new();
        }

        tracing::info!(session_id = %session.id, expires_at = %session.expires_at, "resumed session");
        let remaining_secs = session.remaining_secs(now);
        Self {
            current: Some(session),
            remaining_secs,
        }
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }

    /// Open a new session sized by `settings.default_open_time`.
    pub fn open(
        &mut self,
        store: &dyn Store,
        user: Option<&User>,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Result<Opened, CoreError> {
        let user = user.ok_or(CoreError::NoUser)?;

        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            started_at: now,
            expires_at: now + settings.default_open_time.duration(),
            status: SessionStatus::Open,
            latitude: None,
            longitude: None,
        };

        if !store.set(keys::SESSION, &session) {
            return Err(CoreError::storage(keys::SESSION));
        }

        tracing::info!(
            session_id = %session.id,
            minutes = settings.default_open_time.minutes(),
            "session opened"
        );
        self.remaining_secs = session.remaining_secs(now);
        let replaced = self.current.replace(session.clone());
        Ok(Opened { session, replaced })
    }

    /// Close the open session and remove it from the store. Closing with no
    /// session open is a no-op that returns `Ok(None)`.
    pub fn close(&mut self, store: &dyn Store) -> Result<Option<Session>, CoreError> {
        let Some(session) = &self.current else {
            self.remaining_secs = 0;
            return Ok(None);
        };

        if !store.remove_item(keys::SESSION) {
            return Err(CoreError::storage(keys::SESSION));
        }

        tracing::info!(session_id = %session.id, "session closed");
        self.remaining_secs = 0;
        let mut closed = self.current.take();
        if let Some(s) = closed.as_mut() {
            s.status = SessionStatus::Closed;
        }
        Ok(closed)
    }

    /// Push `expires_at` out by [`EXTEND_BY_MINUTES`]. Returns the new expiry,
    /// or `None` when no session is open.
    pub fn extend(
        &mut self,
        store: &dyn Store,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, CoreError> {
        let Some(current) = &self.current else {
            return Ok(None);
        };

        let mut extended = current.clone();
        extended.expires_at += chrono::Duration::minutes(EXTEND_BY_MINUTES);
        if !store.set(keys::SESSION, &extended) {
            return Err(CoreError::storage(keys::SESSION));
        }

        tracing::info!(session_id = %extended.id, expires_at = %extended.expires_at, "session extended");
        let expires_at = extended.expires_at;
        self.remaining_secs = extended.remaining_secs(now);
        self.current = Some(extended);
        Ok(Some(expires_at))
    }

    /// Record the latest position on the open session. Returns `false` when
    /// there is no session to attach to.
    pub fn attach_location(
        &mut self,
        store: &dyn Store,
        position: Position,
    ) -> Result<bool, CoreError> {
        let Some(current) = &self.current else {
            return Ok(false);
        };

        let mut updated = current.clone();
        updated.latitude = Some(position.latitude);
        updated.longitude = Some(position.longitude);
        if !store.set(keys::SESSION, &updated) {
            return Err(CoreError::storage(keys::SESSION));
        }
        self.current = Some(updated);
        Ok(true)
    }

    /// Recompute the countdown. When it reaches zero the session is closed
    /// here, once; later ticks report [`SessionTick::Idle`].
    ///
    /// The session leaves memory even if removing the record fails: it has
    /// expired regardless, and a stale record is discarded by [`Self::restore`].
    pub fn tick(&mut self, store: &dyn Store, now: DateTime<Utc>) -> SessionTick {
        let Some(session) = &self.current else {
            return SessionTick::Idle;
        };

        let remaining = session.remaining_secs(now).min(self.remaining_secs);
        self.remaining_secs = remaining;
        if remaining > 0 {
            return SessionTick::Remaining(remaining);
        }

        let Some(mut expired) = self.current.take() else {
            return SessionTick::Idle;
        };
        expired.status = SessionStatus::Closed;
        if !store.remove_item(keys::SESSION) {
            tracing::error!(session_id = %expired.id, "failed to remove expired session");
        }
        tracing::info!(session_id = %expired.id, "session expired");
        SessionTick::Expired(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OpenTime;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn user() -> User {
        User {
            id: "u1".to_string(),
            email: "u1@example.com".to_string(),
            name: "Ada".to_string(),
            avatar: None,
            interests: vec!["coffee".to_string()],
            created_at: t0(),
        }
    }

    fn settings(open_time: OpenTime) -> Settings {
        Settings {
            default_open_time: open_time,
            blocked_users: vec![],
        }
    }

    #[test]
    fn test_open_requires_user() {
        let store = MemoryStore::new();
        let mut manager = SessionManager::new();
        let err = manager
            .open(&store, None, &Settings::default(), t0())
            .unwrap_err();
        assert!(matches!(err, CoreError::NoUser));
        assert!(!manager.is_open());
    }

    #[test]
    fn test_open_then_extend_thirty_minutes() {
        let store = MemoryStore::new();
        let mut manager = SessionManager::new();
        let user = user();
        let opened = manager
            .open(&store, Some(&user), &settings(OpenTime::Thirty), t0())
            .unwrap();
        assert_eq!(opened.session.started_at, t0());
        assert_eq!(opened.session.expires_at, t0() + Duration::minutes(30));
        assert_eq!(manager.remaining_secs(), 30 * 60);

        let expires = manager.extend(&store, t0()).unwrap();
        assert_eq!(expires, Some(t0() + Duration::minutes(60)));

        let persisted: Session = store.get(keys::SESSION).unwrap();
        assert_eq!(persisted.expires_at, t0() + Duration::minutes(60));
    }

    #[test]
    fn test_default_open_time_is_45() {
        let store = MemoryStore::new();
        let mut manager = SessionManager::new();
        let opened = manager
            .open(&store, Some(&user()), &Settings::default(), t0())
            .unwrap();
        assert_eq!(opened.session.expires_at, t0() + Duration::minutes(45));
    }

    #[test]
    fn test_extend_without_session_is_noop() {
        let store = MemoryStore::new();
        let mut manager = SessionManager::new();
        assert_eq!(manager.extend(&store, t0()).unwrap(), None);
        assert!(!store.contains(keys::SESSION));
    }

    #[test]
    fn test_open_replaces_prior_session() {
        let store = MemoryStore::new();
        let mut manager = SessionManager::new();
        let user = user();
        let first = manager
            .open(&store, Some(&user), &Settings::default(), t0())
            .unwrap();
        let second = manager
            .open(&store, Some(&user), &Settings::default(), t0())
            .unwrap();
        assert_eq!(second.replaced.map(|s| s.id), Some(first.session.id));
        assert_eq!(manager.current().map(|s| &s.id), Some(&second.session.id));
    }

    #[test]
    fn test_close_removes_record_and_resets_countdown() {
        let store = MemoryStore::new();
        let mut manager = SessionManager::new();
        manager
            .open(&store, Some(&user()), &Settings::default(), t0())
            .unwrap();

        let closed = manager.close(&store).unwrap().unwrap();
        assert_eq!(closed.status, SessionStatus::Closed);
        assert!(!manager.is_open());
        assert_eq!(manager.remaining_secs(), 0);
        assert!(!store.contains(keys::SESSION));

        // Idempotent
        assert!(manager.close(&store).unwrap().is_none());
    }

    #[test]
    fn test_failed_write_leaves_state_untouched() {
        let store = MemoryStore::new();
        let mut manager = SessionManager::new();
        let user = user();
        manager
            .open(&store, Some(&user), &settings(OpenTime::Thirty), t0())
            .unwrap();
        let before = manager.current().cloned();

        store.set_fail_writes(true);
        assert!(matches!(
            manager.extend(&store, t0()),
            Err(CoreError::Storage { .. })
        ));
        assert_eq!(manager.current().cloned(), before);
        assert!(manager.close(&store).is_err());
        assert!(manager.is_open());
        assert!(manager
            .open(&store, Some(&user), &Settings::default(), t0())
            .is_err());
        assert_eq!(manager.current().cloned(), before);
    }

    #[test]
    fn test_countdown_is_monotonic_and_expires_once() {
        let store = MemoryStore::new();
        let mut manager = SessionManager::new();
        manager
            .open(&store, Some(&user()), &settings(OpenTime::Thirty), t0())
            .unwrap();

        let mut last = u64::MAX;
        for secs in (0..30 * 60).step_by(7) {
            match manager.tick(&store, t0() + Duration::seconds(secs)) {
                SessionTick::Remaining(left) => {
                    assert!(left <= last);
                    last = left;
                }
                other => panic!("unexpected tick {:?}", other),
            }
        }

        let expired = manager.tick(&store, t0() + Duration::minutes(30));
        assert!(matches!(expired, SessionTick::Expired(_)));
        assert_eq!(manager.remaining_secs(), 0);
        assert!(!store.contains(keys::SESSION));

        assert_eq!(
            manager.tick(&store, t0() + Duration::minutes(31)),
            SessionTick::Idle
        );
    }

    #[test]
    fn test_expiry_is_exact_to_the_second() {
        let store = MemoryStore::new();
        let mut manager = SessionManager::new();
        manager
            .open(&store, Some(&user()), &settings(OpenTime::Thirty), t0())
            .unwrap();
        let just_before = t0() + Duration::minutes(30) - Duration::milliseconds(1);
        assert_eq!(manager.tick(&store, just_before), SessionTick::Remaining(1));
        assert!(matches!(
            manager.tick(&store, t0() + Duration::minutes(30)),
            SessionTick::Expired(_)
        ));
    }

    #[test]
    fn test_restore_discards_expired_or_foreign_session() {
        let store = MemoryStore::new();
        let mut manager = SessionManager::new();
        let user = user();
        manager
            .open(&store, Some(&user), &settings(OpenTime::Thirty), t0())
            .unwrap();

        let resumed = SessionManager::restore(&store, Some(&user), t0() + Duration::minutes(10));
        assert!(resumed.is_open());
        assert_eq!(resumed.remaining_secs(), 20 * 60);

        let mut other = user.clone();
        other.id = "u2".to_string();
        let foreign = SessionManager::restore(&store, Some(&other), t0());
        assert!(!foreign.is_open());
        assert!(!store.contains(keys::SESSION));

        manager
            .open(&store, Some(&user), &settings(OpenTime::Thirty), t0())
            .unwrap();
        let stale = SessionManager::restore(&store, Some(&user), t0() + Duration::minutes(31));
        assert!(!stale.is_open());
        assert!(!store.contains(keys::SESSION));
    }

    #[test]
    fn test_attach_location() {
        let store = MemoryStore::new();
        let mut manager = SessionManager::new();
        let position = Position {
            latitude: 52.52,
            longitude: 13.40,
        };
        assert!(!manager.attach_location(&store, position).unwrap());

        manager
            .open(&store, Some(&user()), &Settings::default(), t0())
            .unwrap();
        assert!(manager.attach_location(&store, position).unwrap());
        let persisted: Session = store.get(keys::SESSION).unwrap();
        assert_eq!(persisted.latitude, Some(52.52));
        assert_eq!(persisted.longitude, Some(13.40));
    }
}
