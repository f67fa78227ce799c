//! Match log and the mutual-interest handshake.
//!
//! The log is a single device-local list persisted under the `matches` key.
//! Every mutation is applied to a copy, persisted, and only then swapped in,
//! so a failed write leaves the in-memory log as it was.

use chrono::{DateTime, Utc};

use crate::discovery::{shared_interests, DiscoveryRequest, MatchSource};
use crate::error::CoreError;
use crate::model::{Match, MatchStatus, Session, Settings, User};
use crate::store::{keys, Store, StoreExt};

#[derive(Debug, Default)]
pub struct MatchEngine {
    matches: Vec<Match>,
}

impl MatchEngine {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the persisted log, dropping terminal matches.
    pub fn load(store: &dyn Store) -> Self {
        let stored: Vec<Match> = store.get(keys::MATCHES).unwrap_or_default();
        let total = stored.len();
        let matches: Vec<Match> = stored
            .into_iter()
            .filter(|m| !m.status.is_terminal())
            .collect();
        if matches.len() != total {
            tracing::debug!(pruned = total - matches.len(), "pruned terminal matches");
            if !store.set(keys::MATCHES, &matches) {
                tracing::error!("failed to persist pruned match log");
            }
        }
        Self { matches }
    }

    pub fn all(&self) -> &[Match] {
        &self.matches
    }

    pub fn get(&self, match_id: &str) -> Option<&Match> {
        self.matches.iter().find(|m| m.id == match_id)
    }

    /// Matches still in the handshake
    pub fn pending(&self) -> impl Iterator<Item = &Match> {
        self.matches.iter().filter(|m| m.status.is_pending_like())
    }

    /// Matches where both sides said yes
    pub fn ready(&self) -> impl Iterator<Item = &Match> {
        self.matches.iter().filter(|m| m.status.is_ready())
    }

    /// Resolve a full id or a unique id prefix.
    pub fn resolve_id(&self, prefix: &str) -> Result<String, CoreError> {
        if let Some(exact) = self.get(prefix) {
            return Ok(exact.id.clone());
        }
        let found: Vec<&Match> = self
            .matches
            .iter()
            .filter(|m| !prefix.is_empty() && m.id.starts_with(prefix))
            .collect();
        match found.as_slice() {
            [only] => Ok(only.id.clone()),
            [] => Err(CoreError::not_found("match", prefix)),
            _ => Err(CoreError::Validation(format!(
                "match id prefix '{}' is ambiguous",
                prefix
            ))),
        }
    }

    fn commit(&mut self, store: &dyn Store, next: Vec<Match>) -> Result<(), CoreError> {
        if !store.set(keys::MATCHES, &next) {
            return Err(CoreError::storage(keys::MATCHES));
        }
        self.matches = next;
        Ok(())
    }

    /// Ask `source` for a counterpart and record a new `pending` match.
    ///
    /// Blocked users and anyone already in a live match are excluded. A
    /// candidate without a single shared interest is not a match.
    pub fn discover(
        &mut self,
        store: &dyn Store,
        source: &mut dyn MatchSource,
        user: &User,
        session: &Session,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Result<Option<Match>, CoreError> {
        let mut exclude = settings.blocked_users.clone();
        exclude.extend(
            self.matches
                .iter()
                .filter(|m| !m.status.is_terminal())
                .filter_map(|m| m.counterpart(&user.id))
                .map(|u| u.id.clone()),
        );

        let request = DiscoveryRequest {
            user,
            session,
            exclude: &exclude,
            now,
        };
        let Some(candidate) = source.poll(&request) else {
            return Ok(None);
        };
        if candidate.user.id == user.id || exclude.contains(&candidate.user.id) {
            tracing::warn!(candidate = %candidate.user.id, "source offered an excluded candidate");
            return Ok(None);
        }

        let shared = shared_interests(&user.interests, &candidate.user.interests);
        if shared.is_empty() {
            tracing::debug!(candidate = %candidate.user.id, "no shared interests");
            return Ok(None);
        }

        let new_match = Match {
            id: uuid::Uuid::new_v4().to_string(),
            session_a_id: session.id.clone(),
            session_b_id: candidate.session_id,
            user_a: user.clone(),
            user_b: candidate.user,
            shared_interests: shared,
            status: MatchStatus::Pending,
            created_at: now,
        };

        let mut next = self.matches.clone();
        next.push(new_match.clone());
        self.commit(store, next)?;
        tracing::info!(match_id = %new_match.id, counterpart = %new_match.user_b.id, "match discovered");
        Ok(Some(new_match))
    }

    /// Apply `responder_id`'s answer to a match.
    ///
    /// Returns `Ok(None)` without touching anything when the match does not
    /// exist or `responder_id` is not one of its participants. Otherwise
    /// returns the status after the answer, which equals the current status
    /// when the answer changes nothing.
    pub fn respond(
        &mut self,
        store: &dyn Store,
        match_id: &str,
        responder_id: &str,
        interested: bool,
    ) -> Result<Option<MatchStatus>, CoreError> {
        let Some(index) = self.matches.iter().position(|m| m.id == match_id) else {
            tracing::debug!(match_id, "response to unknown match ignored");
            return Ok(None);
        };
        let current = &self.matches[index];
        let Some(side) = current.side_of(responder_id) else {
            tracing::warn!(match_id, responder_id, "response from non-participant ignored");
            return Ok(None);
        };

        let status = current.status;
        let next_status = status.respond(side, interested);
        if next_status == status {
            return Ok(Some(status));
        }

        let mut next = self.matches.clone();
        next[index].status = next_status;
        self.commit(store, next)?;
        tracing::info!(match_id, from = %status, to = %next_status, "match status changed");
        Ok(Some(next_status))
    }

    /// Remove a match from the log. Returns `false` if it was not there.
    pub fn close_match(&mut self, store: &dyn Store, match_id: &str) -> Result<bool, CoreError> {
        if self.get(match_id).is_none() {
            return Ok(false);
        }
        let next: Vec<Match> = self
            .matches
            .iter()
            .filter(|m| m.id != match_id)
            .cloned()
            .collect();
        self.commit(store, next)?;
        tracing::info!(match_id, "match closed");
        Ok(true)
    }

    /// Mark the still-pending matches of a closed session as `closed`.
    /// Returns the ids that changed.
    pub fn abandon_session(
        &mut self,
        store: &dyn Store,
        session_id: &str,
    ) -> Result<Vec<String>, CoreError> {
        let mut next = self.matches.clone();
        let mut changed = Vec::new();
        for m in next.iter_mut() {
            if m.belongs_to_session(session_id) && m.status.is_pending_like() {
                m.status = MatchStatus::Closed;
                changed.push(m.id.clone());
            }
        }
        if changed.is_empty() {
            return Ok(changed);
        }
        self.commit(store, next)?;
        tracing::info!(session_id, count = changed.len(), "abandoned pending matches");
        Ok(changed)
    }

    /// Drop every match that involves `user_id`. Returns how many went.
    pub fn remove_with_user(&mut self, store: &dyn Store, user_id: &str) -> Result<usize, CoreError> {
        let next: Vec<Match> = self
            .matches
            .iter()
            .filter(|m| !m.involves(user_id))
            .cloned()
            .collect();
        let removed = self.matches.len() - next.len();
        if removed == 0 {
            return Ok(0);
        }
        self.commit(store, next)?;
        Ok(removed)
    }

    pub fn clear(&mut self, store: &dyn Store) -> Result<(), CoreError> {
        if !store.remove_item(keys::MATCHES) {
            return Err(CoreError::storage(keys::MATCHES));
        }
        self.matches.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{Candidate, SimulatedMatchSource};
    use crate::model::SessionStatus;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn user(id: &str, interests: &[&str]) -> User {
        User {
            id: id.to_string(),
            email: format!("{}@example.com", id),
            name: id.to_string(),
            avatar: None,
            interests: interests.iter().map(|s| s.to_string()).collect(),
            created_at: t0(),
        }
    }

    fn session(user: &User) -> Session {
        Session {
            id: "s1".to_string(),
            user_id: user.id.clone(),
            started_at: t0(),
            expires_at: t0() + chrono::Duration::minutes(45),
            status: SessionStatus::Open,
            latitude: None,
            longitude: None,
        }
    }

    fn pending_match(id: &str, a: &str, b: &str) -> Match {
        Match {
            id: id.to_string(),
            session_a_id: "s1".to_string(),
            session_b_id: "s2".to_string(),
            user_a: user(a, &["coffee"]),
            user_b: user(b, &["coffee"]),
            shared_interests: vec!["coffee".to_string()],
            status: MatchStatus::Pending,
            created_at: t0(),
        }
    }

    fn engine_with(store: &MemoryStore, matches: Vec<Match>) -> MatchEngine {
        assert!(store.set(keys::MATCHES, &matches));
        MatchEngine::load(store)
    }

    /// Offers one fixed candidate every poll
    struct OneCandidate(User);

    impl MatchSource for OneCandidate {
        fn poll(&mut self, _request: &DiscoveryRequest<'_>) -> Option<Candidate> {
            Some(Candidate {
                user: self.0.clone(),
                session_id: "s2".to_string(),
            })
        }
    }

    #[test]
    fn test_handshake_a_then_b() {
        let store = MemoryStore::new();
        let mut engine = engine_with(&store, vec![pending_match("m1", "u1", "u2")]);

        let status = engine.respond(&store, "m1", "u1", true).unwrap();
        assert_eq!(status, Some(MatchStatus::UserAInterested));
        let status = engine.respond(&store, "m1", "u2", true).unwrap();
        assert_eq!(status, Some(MatchStatus::BothReady));

        let persisted: Vec<Match> = store.get(keys::MATCHES).unwrap();
        assert_eq!(persisted[0].status, MatchStatus::BothReady);
    }

    #[test]
    fn test_handshake_b_then_a() {
        let store = MemoryStore::new();
        let mut engine = engine_with(&store, vec![pending_match("m1", "u1", "u2")]);
        engine.respond(&store, "m1", "u2", true).unwrap();
        let status = engine.respond(&store, "m1", "u1", true).unwrap();
        assert_eq!(status, Some(MatchStatus::BothReady));
    }

    #[test]
    fn test_same_side_cannot_complete_handshake() {
        let store = MemoryStore::new();
        let mut engine = engine_with(&store, vec![pending_match("m1", "u1", "u2")]);
        engine.respond(&store, "m1", "u1", true).unwrap();
        let again = engine.respond(&store, "m1", "u1", true).unwrap();
        assert_eq!(again, Some(MatchStatus::UserAInterested));
        assert_eq!(engine.ready().count(), 0);
        assert_eq!(engine.pending().count(), 1);
    }

    #[test]
    fn test_decline_absorbs_later_responses() {
        let store = MemoryStore::new();
        let mut engine = engine_with(&store, vec![pending_match("m1", "u1", "u2")]);
        engine.respond(&store, "m1", "u1", true).unwrap();
        let declined = engine.respond(&store, "m1", "u2", false).unwrap();
        assert_eq!(declined, Some(MatchStatus::Declined));
        let after = engine.respond(&store, "m1", "u1", true).unwrap();
        assert_eq!(after, Some(MatchStatus::Declined));
        assert_eq!(engine.pending().count(), 0);
    }

    #[test]
    fn test_decline_after_both_ready() {
        let store = MemoryStore::new();
        let mut ready = pending_match("m1", "u1", "u2");
        ready.status = MatchStatus::BothReady;
        let mut engine = engine_with(&store, vec![ready]);

        let status = engine.respond(&store, "m1", "u1", false).unwrap();
        assert_eq!(status, Some(MatchStatus::Declined));
        assert_eq!(engine.ready().count(), 0);
        let persisted: Vec<Match> = store.get(keys::MATCHES).unwrap();
        assert_eq!(persisted[0].status, MatchStatus::Declined);
    }

    #[test]
    fn test_unknown_match_and_stranger_are_silent() {
        let store = MemoryStore::new();
        let mut engine = engine_with(&store, vec![pending_match("m1", "u1", "u2")]);
        assert_eq!(engine.respond(&store, "nope", "u1", true).unwrap(), None);
        assert_eq!(engine.respond(&store, "m1", "u3", true).unwrap(), None);
        assert_eq!(engine.get("m1").unwrap().status, MatchStatus::Pending);
    }

    #[test]
    fn test_failed_persist_keeps_status() {
        let store = MemoryStore::new();
        let mut engine = engine_with(&store, vec![pending_match("m1", "u1", "u2")]);
        store.set_fail_writes(true);
        assert!(engine.respond(&store, "m1", "u1", true).is_err());
        assert_eq!(engine.get("m1").unwrap().status, MatchStatus::Pending);
    }

    #[test]
    fn test_close_match_removes_entry() {
        let store = MemoryStore::new();
        let mut engine = engine_with(&store, vec![pending_match("m1", "u1", "u2")]);
        assert!(engine.close_match(&store, "m1").unwrap());
        assert!(engine.get("m1").is_none());
        assert!(!engine.close_match(&store, "m1").unwrap());
        let persisted: Vec<Match> = store.get(keys::MATCHES).unwrap();
        assert!(persisted.is_empty());
    }

    #[test]
    fn test_load_prunes_terminal_matches() {
        let store = MemoryStore::new();
        let mut declined = pending_match("m2", "u1", "u3");
        declined.status = MatchStatus::Declined;
        let engine = engine_with(&store, vec![pending_match("m1", "u1", "u2"), declined]);
        assert_eq!(engine.all().len(), 1);
        let persisted: Vec<Match> = store.get(keys::MATCHES).unwrap();
        assert_eq!(persisted.len(), 1);
    }

    #[test]
    fn test_discover_records_pending_match() {
        let store = MemoryStore::new();
        let me = user("u1", &["coffee", "jazz", "chess"]);
        let session = session(&me);
        let mut engine = MatchEngine::new();
        let mut source = OneCandidate(user("u2", &["jazz", "coffee"]));

        let found = engine
            .discover(&store, &mut source, &me, &session, &Settings::default(), t0())
            .unwrap()
            .unwrap();
        assert_eq!(found.status, MatchStatus::Pending);
        assert_eq!(found.user_a.id, "u1");
        assert_eq!(found.session_a_id, "s1");
        assert_eq!(found.shared_interests, vec!["coffee", "jazz"]);

        // Same counterpart is not matched twice while the first is live
        let again = engine
            .discover(&store, &mut source, &me, &session, &Settings::default(), t0())
            .unwrap();
        assert!(again.is_none());
        assert_eq!(engine.all().len(), 1);
    }

    #[test]
    fn test_discover_skips_blocked_and_disjoint() {
        let store = MemoryStore::new();
        let me = user("u1", &["coffee"]);
        let session = session(&me);
        let mut engine = MatchEngine::new();

        let settings = Settings {
            blocked_users: vec!["u2".to_string()],
            ..Settings::default()
        };
        let mut blocked = OneCandidate(user("u2", &["coffee"]));
        assert!(engine
            .discover(&store, &mut blocked, &me, &session, &settings, t0())
            .unwrap()
            .is_none());

        let mut disjoint = OneCandidate(user("u3", &["chess"]));
        assert!(engine
            .discover(&store, &mut disjoint, &me, &session, &Settings::default(), t0())
            .unwrap()
            .is_none());
        assert!(engine.all().is_empty());
    }

    #[test]
    fn test_discover_with_simulated_source() {
        let store = MemoryStore::new();
        let me = user("u1", &["coffee", "hiking", "jazz", "books", "photography", "cooking"]);
        let session = session(&me);
        let mut engine = MatchEngine::new();
        let mut source = SimulatedMatchSource::new(1.0, Some(42));
        let found = engine
            .discover(&store, &mut source, &me, &session, &Settings::default(), t0())
            .unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_abandon_session_closes_only_pending() {
        let store = MemoryStore::new();
        let mut ready = pending_match("m2", "u1", "u3");
        ready.status = MatchStatus::BothReady;
        let mut engine = engine_with(&store, vec![pending_match("m1", "u1", "u2"), ready]);

        let changed = engine.abandon_session(&store, "s1").unwrap();
        assert_eq!(changed, vec!["m1"]);
        assert_eq!(engine.get("m1").unwrap().status, MatchStatus::Closed);
        assert_eq!(engine.get("m2").unwrap().status, MatchStatus::BothReady);
    }

    #[test]
    fn test_resolve_id_prefix() {
        let store = MemoryStore::new();
        let engine = engine_with(
            &store,
            vec![
                pending_match("abc123", "u1", "u2"),
                pending_match("abd456", "u1", "u3"),
            ],
        );
        assert_eq!(engine.resolve_id("abc").unwrap(), "abc123");
        assert!(matches!(
            engine.resolve_id("ab"),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            engine.resolve_id("zzz"),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_remove_with_user() {
        let store = MemoryStore::new();
        let mut engine = engine_with(
            &store,
            vec![
                pending_match("m1", "u1", "u2"),
                pending_match("m2", "u1", "u3"),
            ],
        );
        assert_eq!(engine.remove_with_user(&store, "u2").unwrap(), 1);
        assert!(engine.get("m1").is_none());
        assert!(engine.get("m2").is_some());
    }
}
