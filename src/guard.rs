//! Re-entrancy guard for user-triggered actions.
//!
//! A double tap on "open" or "yes" must not run the same action twice while
//! the first one is still persisting. [`InFlight::try_begin`] sets a flag for
//! the action and hands back a guard that clears it on drop, so the flag is
//! released on every exit path.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionKey {
    /// Open, close, extend or toggle of the presence session
    SessionToggle,
    MatchResponse(String),
    MatchClose(String),
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionToggle => write!(f, "session toggle"),
            Self::MatchResponse(id) => write!(f, "response to match {}", id),
            Self::MatchClose(id) => write!(f, "close of match {}", id),
        }
    }
}

/// Set of actions currently in flight
#[derive(Debug, Default, Clone)]
pub struct InFlight {
    active: Rc<RefCell<HashSet<ActionKey>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-set the flag for `key`.
    pub fn try_begin(&self, key: ActionKey) -> Result<InFlightGuard, CoreError> {
        let mut active = self.active.borrow_mut();
        if active.contains(&key) {
            tracing::debug!(action = %key, "rejected re-entrant action");
            return Err(CoreError::Busy(key));
        }
        active.insert(key.clone());
        Ok(InFlightGuard {
            key,
            active: Rc::clone(&self.active),
        })
    }

    #[cfg(test)]
    pub fn is_active(&self, key: &ActionKey) -> bool {
        self.active.borrow().contains(key)
    }
}

/// Clears its action flag when dropped
#[derive(Debug)]
pub struct InFlightGuard {
    key: ActionKey,
    active: Rc<RefCell<HashSet<ActionKey>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active.borrow_mut().remove(&self.key);
    }
}
