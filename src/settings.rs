//! Persisted user settings and theme preference.

use crate::error::CoreError;
use crate::model::{OpenTime, Settings, ThemeMode};
use crate::store::{keys, Store, StoreExt};

pub fn load(store: &dyn Store) -> Settings {
    store.get(keys::SETTINGS).unwrap_or_default()
}

pub fn load_theme(store: &dyn Store) -> ThemeMode {
    store.get(keys::THEME_MODE).unwrap_or_default()
}

fn save(store: &dyn Store, settings: &Settings) -> Result<(), CoreError> {
    if !store.set(keys::SETTINGS, settings) {
        return Err(CoreError::storage(keys::SETTINGS));
    }
    Ok(())
}

pub fn set_default_open_time(
    store: &dyn Store,
    settings: &Settings,
    open_time: OpenTime,
) -> Result<Settings, CoreError> {
    let mut updated = settings.clone();
    updated.default_open_time = open_time;
    save(store, &updated)?;
    Ok(updated)
}

/// Returns the updated settings; blocking an already blocked user is a no-op.
pub fn block_user(
    store: &dyn Store,
    settings: &Settings,
    user_id: &str,
) -> Result<Settings, CoreError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(CoreError::Validation("user id must not be empty".to_string()));
    }
    if settings.is_blocked(user_id) {
        return Ok(settings.clone());
    }
    let mut updated = settings.clone();
    updated.blocked_users.push(user_id.to_string());
    save(store, &updated)?;
    tracing::info!(user_id, "user blocked");
    Ok(updated)
}

pub fn unblock_user(
    store: &dyn Store,
    settings: &Settings,
    user_id: &str,
) -> Result<Settings, CoreError> {
    if !settings.is_blocked(user_id) {
        return Err(CoreError::not_found("blocked user", user_id));
    }
    let mut updated = settings.clone();
    updated.blocked_users.retain(|id| id != user_id);
    save(store, &updated)?;
    Ok(updated)
}

pub fn set_theme(store: &dyn Store, theme: ThemeMode) -> Result<(), CoreError> {
    if !store.set(keys::THEME_MODE, &theme) {
        return Err(CoreError::storage(keys::THEME_MODE));
    }
    Ok(())
}
