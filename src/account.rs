//! The device's single user record.
//!
//! Exactly one user is "self" per device. Sign-up creates it, profile edits
//! mutate it, and its `id` never changes while it exists.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::CoreError;
use crate::model::User;
use crate::store::{keys, Store, StoreExt};

static EMAIL_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());

const MAX_INTERESTS: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub interests: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub avatar: Option<String>,
}

pub fn load_user(store: &dyn Store) -> Option<User> {
    store.get(keys::USER)
}

pub fn is_onboarded(store: &dyn Store) -> bool {
    store.get::<bool>(keys::ONBOARDED).unwrap_or(false)
}

fn validate_email(email: &str) -> Result<(), CoreError> {
    let valid = EMAIL_RE.as_ref().is_some_and(|re| re.is_match(email));
    if valid {
        Ok(())
    } else {
        Err(CoreError::Validation(format!("'{}' is not a valid email", email)))
    }
}

fn validate_name(name: &str) -> Result<String, CoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::Validation("name must not be empty".to_string()));
    }
    Ok(name.to_string())
}

/// Trim, drop empties, and dedupe case-insensitively keeping first spelling.
pub fn normalize_interests(interests: &[String]) -> Result<Vec<String>, CoreError> {
    let mut out: Vec<String> = Vec::new();
    for interest in interests {
        let trimmed = interest.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !out.iter().any(|i| i.eq_ignore_ascii_case(trimmed)) {
            out.push(trimmed.to_string());
        }
    }
    if out.len() > MAX_INTERESTS {
        return Err(CoreError::Validation(format!(
            "at most {} interests are allowed",
            MAX_INTERESTS
        )));
    }
    Ok(out)
}

/// Create the device user. Fails if one already exists.
pub fn signup(
    store: &dyn Store,
    existing: Option<&User>,
    request: SignupRequest,
    now: DateTime<Utc>,
) -> Result<User, CoreError> {
    if existing.is_some() {
        return Err(CoreError::Conflict(
            "a user is already signed in on this device".to_string(),
        ));
    }
    let name = validate_name(&request.name)?;
    let email = request.email.trim().to_lowercase();
    validate_email(&email)?;
    let interests = normalize_interests(&request.interests)?;

    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        email,
        name,
        avatar: None,
        interests,
        created_at: now,
    };
    if !store.set(keys::USER, &user) {
        return Err(CoreError::storage(keys::USER));
    }
    tracing::info!(user_id = %user.id, "user signed up");
    Ok(user)
}

pub fn update_profile(
    store: &dyn Store,
    user: &User,
    update: ProfileUpdate,
) -> Result<User, CoreError> {
    let mut updated = user.clone();
    if let Some(name) = update.name {
        updated.name = validate_name(&name)?;
    }
    if let Some(avatar) = update.avatar {
        let avatar = avatar.trim();
        updated.avatar = if avatar.is_empty() {
            None
        } else {
            Some(avatar.to_string())
        };
    }
    if !store.set(keys::USER, &updated) {
        return Err(CoreError::storage(keys::USER));
    }
    Ok(updated)
}

pub fn set_interests(
    store: &dyn Store,
    user: &User,
    interests: &[String],
) -> Result<User, CoreError> {
    let mut updated = user.clone();
    updated.interests = normalize_interests(interests)?;
    if !store.set(keys::USER, &updated) {
        return Err(CoreError::storage(keys::USER));
    }
    tracing::info!(user_id = %updated.id, count = updated.interests.len(), "interests updated");
    Ok(updated)
}

pub fn complete_onboarding(store: &dyn Store) -> Result<(), CoreError> {
    if !store.set(keys::ONBOARDED, &true) {
        return Err(CoreError::storage(keys::ONBOARDED));
    }
    Ok(())
}

/// Remove the user record. The caller closes the session and clears matches
/// first.
pub fn remove_user(store: &dyn Store) -> Result<(), CoreError> {
    if !store.remove_item(keys::USER) {
        return Err(CoreError::storage(keys::USER));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn request() -> SignupRequest {
        SignupRequest {
            name: " Ada ".to_string(),
            email: "Ada@Example.com".to_string(),
            interests: vec![
                "coffee".to_string(),
                " Coffee".to_string(),
                "".to_string(),
                "jazz".to_string(),
            ],
        }
    }

    #[test]
    fn test_signup_normalizes_and_persists() {
        let store = MemoryStore::new();
        let user = signup(&store, None, request(), Utc::now()).unwrap();
        assert_eq!(user.name, "Ada");
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.interests, vec!["coffee", "jazz"]);
        assert_eq!(load_user(&store), Some(user));
    }

    #[test]
    fn test_signup_rejects_second_user() {
        let store = MemoryStore::new();
        let user = signup(&store, None, request(), Utc::now()).unwrap();
        let err = signup(&store, Some(&user), request(), Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[test]
    fn test_signup_validation() {
        let store = MemoryStore::new();
        let bad_email = SignupRequest {
            email: "not-an-email".to_string(),
            ..request()
        };
        assert!(matches!(
            signup(&store, None, bad_email, Utc::now()),
            Err(CoreError::Validation(_))
        ));

        let no_name = SignupRequest {
            name: "   ".to_string(),
            ..request()
        };
        assert!(matches!(
            signup(&store, None, no_name, Utc::now()),
            Err(CoreError::Validation(_))
        ));
        assert!(load_user(&store).is_none());
    }

    #[test]
    fn test_profile_and_interests_keep_identity() {
        let store = MemoryStore::new();
        let user = signup(&store, None, request(), Utc::now()).unwrap();
        let updated = update_profile(
            &store,
            &user,
            ProfileUpdate {
                name: Some("Ada L.".to_string()),
                avatar: Some("file:///avatar.png".to_string()),
            },
        )
        .unwrap();
        assert_eq!(updated.id, user.id);
        assert_eq!(updated.avatar.as_deref(), Some("file:///avatar.png"));

        let updated = set_interests(&store, &updated, &["chess".to_string()]).unwrap();
        assert_eq!(updated.id, user.id);
        assert_eq!(load_user(&store).unwrap().interests, vec!["chess"]);
    }

    #[test]
    fn test_onboarding_flag() {
        let store = MemoryStore::new();
        assert!(!is_onboarded(&store));
        complete_onboarding(&store).unwrap();
        assert!(is_onboarded(&store));
    }
}
