//! Auto-navigation driven by match state.
//!
//! Screens do not poll the match log themselves. After every change the app
//! feeds the log to [`NavigationWatcher::observe`], which picks the route the
//! UI should be on and reports it only when it differs from the last one.

use std::fmt;

use crate::model::Match;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Route {
    #[default]
    Home,
    /// A match is waiting on one or both answers
    MatchPending { match_id: String },
    /// Both said yes: show the meetup prompt
    Meetup { match_id: String },
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Home => write!(f, "home"),
            Self::MatchPending { match_id } => write!(f, "match-found/{}", match_id),
            Self::Meetup { match_id } => write!(f, "meetup/{}", match_id),
        }
    }
}

impl Route {
    /// Ready matches win over pending ones; the oldest of each wins.
    pub fn for_matches(matches: &[Match]) -> Self {
        if let Some(ready) = matches.iter().find(|m| m.status.is_ready()) {
            return Self::Meetup {
                match_id: ready.id.clone(),
            };
        }
        if let Some(pending) = matches.iter().find(|m| m.status.is_pending_like()) {
            return Self::MatchPending {
                match_id: pending.id.clone(),
            };
        }
        Self::Home
    }
}

#[derive(Debug, Default)]
pub struct NavigationWatcher {
    current: Route,
}

impl NavigationWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &Route {
        &self.current
    }

    /// Returns the new route if it changed.
    pub fn observe(&mut self, matches: &[Match]) -> Option<Route> {
        let next = Route::for_matches(matches);
        if next == self.current {
            return None;
        }
        tracing::debug!(from = %self.current, to = %next, "navigate");
        self.current = next.clone();
        Some(next)
    }
}
