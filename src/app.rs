//! Application state.
//!
//! [`App`] is the one object the screen layer talks to. It owns the store,
//! the clock, the session manager, the match engine and the timers that live
//! while a session is open. Operations return the [`AppEvent`]s they caused;
//! [`App::tick`] drives the countdown, location and discovery timers.
//!
//! Timers are cancelled on every path that ends a session: explicit close,
//! expiry, replacement, sign-out and [`App::shutdown`].

use chrono::{DateTime, Utc};

use crate::account::{self, ProfileUpdate, SignupRequest};
use crate::clock::Clock;
use crate::config::Config;
use crate::discovery::{DisabledMatchSource, MatchSource, SimulatedMatchSource};
use crate::error::CoreError;
use crate::event::{AppEvent, CloseReason};
use crate::guard::{ActionKey, InFlight};
use crate::journal::Journal;
use crate::location::{DeniedLocation, FixedLocation, LocationError, LocationProvider};
use crate::matching::MatchEngine;
use crate::model::{Match, MatchStatus, OpenTime, Session, Settings, ThemeMode, User};
use crate::navigation::{NavigationWatcher, Route};
use crate::session::{SessionManager, SessionTick};
use crate::settings;
use crate::store::{keys, Store, StoreExt};
use crate::timer::SessionTimers;

pub struct App {
    store: Box<dyn Store>,
    clock: Box<dyn Clock>,
    source: Box<dyn MatchSource>,
    location: Box<dyn LocationProvider>,
    journal: Option<Journal>,
    user: Option<User>,
    settings: Settings,
    theme: ThemeMode,
    onboarded: bool,
    session: SessionManager,
    matches: MatchEngine,
    timers: SessionTimers,
    navigation: NavigationWatcher,
    in_flight: InFlight,
}

impl App {
    /// Load persisted state and resume a still-open session.
    pub fn new(store: Box<dyn Store>, clock: Box<dyn Clock>, timers: SessionTimers) -> Self {
        let now = clock.now();
        let user = account::load_user(store.as_ref());
        let settings = settings::load(store.as_ref());
        let theme = settings::load_theme(store.as_ref());
        let onboarded = account::is_onboarded(store.as_ref());
        let session = SessionManager::restore(store.as_ref(), user.as_ref(), now);
        let matches = MatchEngine::load(store.as_ref());

        let mut app = Self {
            store,
            clock,
            source: Box::new(DisabledMatchSource),
            location: Box::new(DeniedLocation),
            journal: None,
            user,
            settings,
            theme,
            onboarded,
            session,
            matches,
            timers,
            navigation: NavigationWatcher::new(),
            in_flight: InFlight::new(),
        };
        if app.session.is_open() {
            app.timers.start_all(now);
        }
        app.abandon_stale_matches();
        app.navigation.observe(app.matches.all());
        app
    }

    /// Pending matches whose local session is no longer open can never
    /// complete; close them like any other ended session.
    fn abandon_stale_matches(&mut self) {
        let live = self.session.current().map(|s| s.id.clone());
        let mut stale: Vec<String> = self
            .matches
            .pending()
            .map(|m| m.session_a_id.clone())
            .filter(|id| live.as_ref() != Some(id))
            .collect();
        stale.sort();
        stale.dedup();
        for session_id in stale {
            if let Err(err) = self.matches.abandon_session(self.store.as_ref(), &session_id) {
                tracing::error!(session_id = %session_id, error = %err, "failed to abandon stale matches");
            }
        }
    }

    /// Build from configuration: timer cadence, match source and location.
    pub fn from_config(store: Box<dyn Store>, clock: Box<dyn Clock>, config: &Config) -> Self {
        let timers = SessionTimers::new(
            config.discovery.interval_secs(),
            config.location.interval_secs(),
        );
        let source: Box<dyn MatchSource> = if config.discovery.enabled() {
            Box::new(SimulatedMatchSource::new(
                config.discovery.probability(),
                config.discovery.seed,
            ))
        } else {
            Box::new(DisabledMatchSource)
        };
        let location: Box<dyn LocationProvider> = match config.location.fixed_position() {
            Some(position) => Box::new(FixedLocation(position)),
            None => Box::new(DeniedLocation),
        };
        Self::new(store, clock, timers)
            .with_match_source(source)
            .with_location(location)
    }

    pub fn with_match_source(mut self, source: Box<dyn MatchSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_location(mut self, location: Box<dyn LocationProvider>) -> Self {
        self.location = location;
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn theme(&self) -> ThemeMode {
        self.theme
    }

    pub fn is_onboarded(&self) -> bool {
        self.onboarded
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.current()
    }

    pub fn remaining_secs(&self) -> u64 {
        self.session.remaining_secs()
    }

    pub fn matches(&self) -> &[Match] {
        self.matches.all()
    }

    pub fn pending_matches(&self) -> Vec<&Match> {
        self.matches.pending().collect()
    }

    pub fn ready_matches(&self) -> Vec<&Match> {
        self.matches.ready().collect()
    }

    pub fn route(&self) -> &Route {
        self.navigation.current()
    }

    pub fn resolve_match_id(&self, prefix: &str) -> Result<String, CoreError> {
        self.matches.resolve_id(prefix)
    }

    pub fn timers_active(&self) -> bool {
        self.timers.any_active()
    }

    pub fn next_discovery_at(&self) -> Option<DateTime<Utc>> {
        self.timers.discovery.next_due()
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    // ------------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------------

    fn record(&mut self, write: impl FnOnce(&mut Journal) -> anyhow::Result<()>) {
        if let Some(journal) = self.journal.as_mut() {
            if let Err(err) = write(journal) {
                tracing::warn!(error = %err, "failed to write journal entry");
            }
        }
    }

    fn navigate(&mut self, events: &mut Vec<AppEvent>) {
        if let Some(route) = self.navigation.observe(self.matches.all()) {
            events.push(AppEvent::Navigate(route));
        }
    }

    fn require_user(&self) -> Result<&User, CoreError> {
        self.user.as_ref().ok_or(CoreError::NoUser)
    }

    /// Bookkeeping once a session is gone from the manager.
    fn session_ended(&mut self, session: Session, reason: CloseReason, events: &mut Vec<AppEvent>) {
        match self.matches.abandon_session(self.store.as_ref(), &session.id) {
            Ok(changed) => {
                for match_id in changed {
                    events.push(AppEvent::MatchUpdated {
                        match_id,
                        status: MatchStatus::Closed,
                    });
                }
            }
            Err(err) => tracing::error!(session_id = %session.id, error = %err, "failed to abandon matches"),
        }
        self.record(|j| j.session_closed(&session, reason.as_str()));
        events.push(AppEvent::SessionClosed {
            session_id: session.id,
            reason,
        });
        self.navigate(events);
    }

    fn sample_location(&mut self, events: &mut Vec<AppEvent>) {
        let position = match self.location.current_position() {
            Ok(position) => position,
            Err(LocationError::PermissionDenied) => {
                tracing::debug!("location permission denied; skipping sample");
                return;
            }
            Err(err) => {
                tracing::debug!(error = %err, "no location fix; skipping sample");
                return;
            }
        };
        match self.session.attach_location(self.store.as_ref(), position) {
            Ok(true) => events.push(AppEvent::LocationUpdated(position)),
            Ok(false) => {}
            Err(err) => tracing::warn!(error = %err, "failed to store location sample"),
        }
    }

    fn run_discovery(&mut self, events: &mut Vec<AppEvent>) {
        let now = self.clock.now();
        let (Some(user), Some(session)) = (self.user.as_ref(), self.session.current()) else {
            return;
        };
        let found = self.matches.discover(
            self.store.as_ref(),
            self.source.as_mut(),
            user,
            session,
            &self.settings,
            now,
        );
        match found {
            Ok(Some(m)) => {
                self.record(|j| j.match_discovered(&m));
                events.push(AppEvent::MatchDiscovered {
                    match_id: m.id,
                    counterpart: m.user_b.name,
                    shared_interests: m.shared_interests,
                });
                self.navigate(events);
            }
            Ok(None) => {}
            Err(err) => tracing::error!(error = %err, "failed to record discovered match"),
        }
    }

    fn open_inner(&mut self) -> Result<Vec<AppEvent>, CoreError> {
        let now = self.clock.now();
        let opened = self.session.open(
            self.store.as_ref(),
            self.user.as_ref(),
            &self.settings,
            now,
        )?;

        let mut events = Vec::new();
        if let Some(previous) = opened.replaced {
            self.timers.cancel_all();
            self.session_ended(previous, CloseReason::Replaced, &mut events);
        }

        self.timers.start_all(now);
        let session = opened.session;
        self.record(|j| j.session_opened(&session));
        events.push(AppEvent::SessionOpened {
            session_id: session.id,
            expires_at: session.expires_at,
        });
        events.push(AppEvent::Countdown {
            remaining_secs: self.session.remaining_secs(),
        });
        self.sample_location(&mut events);
        Ok(events)
    }

    fn close_inner(&mut self, reason: CloseReason) -> Result<Vec<AppEvent>, CoreError> {
        let closed = self.session.close(self.store.as_ref())?;
        self.timers.cancel_all();
        let mut events = Vec::new();
        if let Some(session) = closed {
            self.session_ended(session, reason, &mut events);
        }
        Ok(events)
    }

    fn respond_inner(
        &mut self,
        match_id: &str,
        responder_id: &str,
        interested: bool,
    ) -> Result<Vec<AppEvent>, CoreError> {
        let _guard = self
            .in_flight
            .try_begin(ActionKey::MatchResponse(match_id.to_string()))?;

        let before = self.matches.get(match_id).map(|m| m.status);
        let after = self
            .matches
            .respond(self.store.as_ref(), match_id, responder_id, interested)?;

        let mut events = Vec::new();
        if let Some(status) = after {
            if before != Some(status) {
                self.record(|j| j.match_status(responder_id, match_id, status));
                events.push(AppEvent::MatchUpdated {
                    match_id: match_id.to_string(),
                    status,
                });
            }
        }
        self.navigate(&mut events);
        Ok(events)
    }

    // ------------------------------------------------------------------------
    // Session operations
    // ------------------------------------------------------------------------

    /// Open a presence session, replacing any open one.
    pub fn open_session(&mut self) -> Result<Vec<AppEvent>, CoreError> {
        let _guard = self.in_flight.try_begin(ActionKey::SessionToggle)?;
        self.open_inner()
    }

    /// Close the open session. No-op when none is open.
    pub fn close_session(&mut self) -> Result<Vec<AppEvent>, CoreError> {
        let _guard = self.in_flight.try_begin(ActionKey::SessionToggle)?;
        self.close_inner(CloseReason::Explicit)
    }

    /// Open when closed, close when open.
    pub fn toggle_session(&mut self) -> Result<Vec<AppEvent>, CoreError> {
        let _guard = self.in_flight.try_begin(ActionKey::SessionToggle)?;
        if self.session.is_open() {
            self.close_inner(CloseReason::Explicit)
        } else {
            self.open_inner()
        }
    }

    /// Add the fixed extension to the open session. No-op when none is open.
    pub fn extend_session(&mut self) -> Result<Vec<AppEvent>, CoreError> {
        let _guard = self.in_flight.try_begin(ActionKey::SessionToggle)?;
        let now = self.clock.now();
        let Some(expires_at) = self.session.extend(self.store.as_ref(), now)? else {
            return Ok(Vec::new());
        };
        if let Some(session) = self.session.current().cloned() {
            self.record(|j| j.session_extended(&session));
        }
        Ok(vec![
            AppEvent::SessionExtended { expires_at },
            AppEvent::Countdown {
                remaining_secs: self.session.remaining_secs(),
            },
        ])
    }

    /// Advance every timer to the clock's current time.
    ///
    /// Expiry is checked on every call, before location and discovery, so a
    /// late tick never samples or discovers on an expired session.
    pub fn tick(&mut self) -> Vec<AppEvent> {
        let now = self.clock.now();
        let mut events = Vec::new();

        if !self.session.is_open() {
            self.timers.cancel_all();
            return events;
        }

        let countdown_due = self.timers.countdown.poll(now);
        let expired = self.session.current().is_some_and(|s| s.is_expired(now));
        if countdown_due || expired {
            let tick = self.session.tick(self.store.as_ref(), now);
            match tick {
                SessionTick::Remaining(remaining_secs) => {
                    events.push(AppEvent::Countdown { remaining_secs })
                }
                SessionTick::Expired(session) => {
                    self.timers.cancel_all();
                    self.session_ended(session, CloseReason::Expired, &mut events);
                    return events;
                }
                SessionTick::Idle => {}
            }
        }

        if self.timers.location.poll(now) {
            self.sample_location(&mut events);
        }
        if self.timers.discovery.poll(now) {
            self.run_discovery(&mut events);
        }
        events
    }

    /// Stop all timers. The session record stays so a restart can resume it.
    pub fn shutdown(&mut self) {
        self.timers.cancel_all();
        tracing::debug!("app shut down; timers cancelled");
    }

    // ------------------------------------------------------------------------
    // Match operations
    // ------------------------------------------------------------------------

    /// Answer a match as the signed-in user.
    pub fn respond_to_match(
        &mut self,
        match_id: &str,
        interested: bool,
    ) -> Result<Vec<AppEvent>, CoreError> {
        let user_id = self.require_user()?.id.clone();
        self.respond_inner(match_id, &user_id, interested)
    }

    /// Answer a match on behalf of `user_id` (the counterpart's device).
    pub fn respond_as(
        &mut self,
        match_id: &str,
        user_id: &str,
        interested: bool,
    ) -> Result<Vec<AppEvent>, CoreError> {
        self.respond_inner(match_id, user_id, interested)
    }

    /// Drop a match once its meetup prompt is resolved.
    pub fn close_match(&mut self, match_id: &str) -> Result<Vec<AppEvent>, CoreError> {
        let _guard = self
            .in_flight
            .try_begin(ActionKey::MatchClose(match_id.to_string()))?;
        let mut events = Vec::new();
        if self.matches.close_match(self.store.as_ref(), match_id)? {
            let user_id = self.user.as_ref().map(|u| u.id.clone()).unwrap_or_default();
            self.record(|j| j.match_closed(&user_id, match_id));
            events.push(AppEvent::MatchClosed {
                match_id: match_id.to_string(),
            });
        }
        self.navigate(&mut events);
        Ok(events)
    }

    // ------------------------------------------------------------------------
    // Account and settings
    // ------------------------------------------------------------------------

    pub fn signup(&mut self, request: SignupRequest) -> Result<&User, CoreError> {
        let now = self.clock.now();
        let user = account::signup(self.store.as_ref(), self.user.as_ref(), request, now)?;
        Ok(&*self.user.insert(user))
    }

    pub fn update_profile(&mut self, update: ProfileUpdate) -> Result<&User, CoreError> {
        let updated = account::update_profile(self.store.as_ref(), self.require_user()?, update)?;
        Ok(&*self.user.insert(updated))
    }

    pub fn set_interests(&mut self, interests: &[String]) -> Result<&User, CoreError> {
        let updated = account::set_interests(self.store.as_ref(), self.require_user()?, interests)?;
        Ok(&*self.user.insert(updated))
    }

    pub fn complete_onboarding(&mut self) -> Result<(), CoreError> {
        account::complete_onboarding(self.store.as_ref())?;
        self.onboarded = true;
        Ok(())
    }

    /// Close the session, clear the match log and forget the user.
    ///
    /// The session close commits on its own. If clearing the log or removing
    /// the user fails afterwards, the error is returned with the user still
    /// signed in and no session open; signing out again finishes the job.
    pub fn logout(&mut self) -> Result<Vec<AppEvent>, CoreError> {
        let _guard = self.in_flight.try_begin(ActionKey::SessionToggle)?;
        self.require_user()?;
        let mut events = self.close_inner(CloseReason::SignedOut)?;
        self.matches.clear(self.store.as_ref())?;
        account::remove_user(self.store.as_ref())?;
        if let Some(user) = self.user.take() {
            tracing::info!(user_id = %user.id, "signed out");
        }
        self.navigate(&mut events);
        Ok(events)
    }

    pub fn set_default_open_time(&mut self, open_time: OpenTime) -> Result<(), CoreError> {
        self.settings =
            settings::set_default_open_time(self.store.as_ref(), &self.settings, open_time)?;
        Ok(())
    }

    /// Block a user: excluded from discovery and removed from the match log.
    /// The block is rolled back if the matches cannot be removed.
    pub fn block_user(&mut self, user_id: &str) -> Result<Vec<AppEvent>, CoreError> {
        let updated = settings::block_user(self.store.as_ref(), &self.settings, user_id)?;
        let removed = match self.matches.remove_with_user(self.store.as_ref(), user_id) {
            Ok(removed) => removed,
            Err(err) => {
                if !self.store.set(keys::SETTINGS, &self.settings) {
                    tracing::error!(user_id, "failed to roll back block");
                }
                return Err(err);
            }
        };
        self.settings = updated;
        if removed > 0 {
            tracing::info!(user_id, removed, "removed matches with blocked user");
        }
        let mut events = Vec::new();
        self.navigate(&mut events);
        Ok(events)
    }

    pub fn unblock_user(&mut self, user_id: &str) -> Result<(), CoreError> {
        self.settings = settings::unblock_user(self.store.as_ref(), &self.settings, user_id)?;
        Ok(())
    }

    pub fn set_theme(&mut self, theme: ThemeMode) -> Result<(), CoreError> {
        settings::set_theme(self.store.as_ref(), theme)?;
        self.theme = theme;
        Ok(())
    }
}
