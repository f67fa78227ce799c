//! Match discovery seam.
//!
//! [`MatchSource`] is where a proximity/interest matching backend plugs in.
//! The only source shipped here is [`SimulatedMatchSource`], a seeded test
//! double that draws counterparts from a built-in demo roster. It stands in
//! for a server and is not a model of how real matching should behave.

use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::model::{Session, User};

/// What the engine knows when it asks for a candidate
#[derive(Debug)]
pub struct DiscoveryRequest<'a> {
    pub user: &'a User,
    pub session: &'a Session,
    /// Counterpart ids that must not be offered (blocked or already matched)
    pub exclude: &'a [String],
    pub now: DateTime<Utc>,
}

/// A counterpart offered by the source
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub user: User,
    pub session_id: String,
}

pub trait MatchSource {
    /// Called once per discovery tick while a session is open.
    fn poll(&mut self, request: &DiscoveryRequest<'_>) -> Option<Candidate>;
}

/// Never finds anyone
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledMatchSource;

impl MatchSource for DisabledMatchSource {
    fn poll(&mut self, _request: &DiscoveryRequest<'_>) -> Option<Candidate> {
        None
    }
}

/// Random counterparts from a fixed roster, hit with `probability` per tick
#[derive(Debug)]
pub struct SimulatedMatchSource {
    rng: StdRng,
    probability: f64,
    roster: Vec<User>,
}

impl SimulatedMatchSource {
    pub fn new(probability: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            probability: probability.clamp(0.0, 1.0),
            roster: demo_roster(),
        }
    }

    #[cfg(test)]
    pub fn with_roster(mut self, roster: Vec<User>) -> Self {
        self.roster = roster;
        self
    }
}

impl MatchSource for SimulatedMatchSource {
    fn poll(&mut self, request: &DiscoveryRequest<'_>) -> Option<Candidate> {
        if !self.rng.gen_bool(self.probability) {
            return None;
        }

        let eligible: Vec<&User> = self
            .roster
            .iter()
            .filter(|u| u.id != request.user.id && !request.exclude.contains(&u.id))
            .collect();
        let user = (*eligible.choose(&mut self.rng)?).clone();

        tracing::debug!(
            candidate = %user.id,
            session_id = %request.session.id,
            at = %request.now,
            "simulated candidate nearby"
        );
        Some(Candidate {
            user,
            session_id: uuid::Uuid::new_v4().to_string(),
        })
    }
}

/// Interests both users list, compared case-insensitively, in `ours` order
pub fn shared_interests(ours: &[String], theirs: &[String]) -> Vec<String> {
    let theirs: Vec<String> = theirs.iter().map(|i| i.trim().to_lowercase()).collect();
    let mut shared: Vec<String> = Vec::new();
    for interest in ours {
        let key = interest.trim().to_lowercase();
        if key.is_empty() || !theirs.contains(&key) {
            continue;
        }
        if !shared.iter().any(|s| s.to_lowercase() == key) {
            shared.push(interest.trim().to_string());
        }
    }
    shared
}

fn demo_user(id: &str, name: &str, interests: &[&str]) -> User {
    User {
        id: id.to_string(),
        email: format!("{}@demo.opento.local", id),
        name: name.to_string(),
        avatar: None,
        interests: interests.iter().map(|s| s.to_string()).collect(),
        created_at: Utc
            .timestamp_opt(1_700_000_000, 0)
            .single()
            .unwrap_or_else(Utc::now),
    }
}

fn demo_roster() -> Vec<User> {
    vec![
        demo_user("demo-alex", "Alex", &["coffee", "hiking", "photography", "jazz"]),
        demo_user("demo-sam", "Sam", &["board games", "coffee", "running"]),
        demo_user("demo-jordan", "Jordan", &["books", "jazz", "cooking"]),
        demo_user("demo-riley", "Riley", &["climbing", "hiking", "travel"]),
        demo_user("demo-casey", "Casey", &["art", "photography", "film", "books"]),
        demo_user("demo-morgan", "Morgan", &["music", "cooking", "yoga", "travel"]),
    ]
}
