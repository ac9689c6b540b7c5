//! Client role announcements.
//!
//! A HELLO carries `details.roles`, an object keyed by role name whose values
//! may hold a `features` object of boolean flags:
//!
//! ```json
//! {"roles": {"subscriber": {"features": {"pattern_based_subscription": true}}}}
//! ```

use junction_protocol::Dict;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Role names a client may announce.
pub const CLIENT_ROLES: [&str; 4] = ["publisher", "subscriber", "caller", "callee"];

/// Role negotiation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleError {
    /// `roles` was missing, not an object, or empty.
    #[error("No client roles announced")]
    NoRoles,

    /// A role name outside the recognized set.
    #[error("Invalid client role: {0}")]
    InvalidRole(String),
}

/// Check the roles announced in HELLO details.
///
/// # Errors
///
/// Returns [`RoleError::NoRoles`] if no roles were announced and
/// [`RoleError::InvalidRole`] for the first unrecognized role name.
pub fn validate_client_roles(details: &Dict) -> Result<(), RoleError> {
    let roles = details
        .get("roles")
        .and_then(|roles| roles.as_object())
        .filter(|roles| !roles.is_empty())
        .ok_or(RoleError::NoRoles)?;

    match roles.keys().find(|name| !CLIENT_ROLES.contains(&name.as_str())) {
        Some(name) => Err(RoleError::InvalidRole(name.clone())),
        None => Ok(()),
    }
}

/// Immutable map of announced roles to their enabled features.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleMap {
    roles: HashMap<String, HashSet<String>>,
}

impl RoleMap {
    /// Build the map from HELLO details.
    ///
    /// A feature counts only when its value is the boolean `true`. Anything
    /// malformed is skipped rather than rejected.
    #[must_use]
    pub fn from_details(details: &Dict) -> Self {
        let Some(announced) = details.get("roles").and_then(|roles| roles.as_object()) else {
            return Self::default();
        };

        let roles = announced
            .iter()
            .map(|(name, role)| {
                let features = role
                    .get("features")
                    .and_then(|features| features.as_object())
                    .map(|features| {
                        features
                            .iter()
                            .filter(|(_, enabled)| enabled.as_bool() == Some(true))
                            .map(|(feature, _)| feature.clone())
                            .collect()
                    })
                    .unwrap_or_default();
                (name.clone(), features)
            })
            .collect();

        Self { roles }
    }

    /// Check whether a role was announced.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    /// Check whether a role was announced with a feature enabled.
    #[must_use]
    pub fn has_feature(&self, role: &str, feature: &str) -> bool {
        self.roles
            .get(role)
            .is_some_and(|features| features.contains(feature))
    }

    /// Iterate over the announced role names.
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn details(value: serde_json::Value) -> Dict {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_validate_client_roles() {
        assert!(validate_client_roles(&details(json!({"roles": {"caller": {}}}))).is_ok());
        assert!(validate_client_roles(&details(json!({
            "roles": {"publisher": {}, "subscriber": {}, "caller": {}, "callee": {}}
        })))
        .is_ok());
    }

    #[test]
    fn test_missing_or_empty_roles() {
        assert_eq!(validate_client_roles(&Dict::new()), Err(RoleError::NoRoles));
        assert_eq!(
            validate_client_roles(&details(json!({"roles": {}}))),
            Err(RoleError::NoRoles)
        );
        assert_eq!(
            validate_client_roles(&details(json!({"roles": ["caller"]}))),
            Err(RoleError::NoRoles)
        );
    }

    #[test]
    fn test_unknown_role() {
        assert_eq!(
            validate_client_roles(&details(json!({"roles": {"caller": {}, "bogus": {}}}))),
            Err(RoleError::InvalidRole("bogus".to_string()))
        );
        // Router roles are not client roles.
        assert_eq!(
            validate_client_roles(&details(json!({"roles": {"broker": {}}}))),
            Err(RoleError::InvalidRole("broker".to_string()))
        );
    }

    #[test]
    fn test_role_map_features() {
        let map = RoleMap::from_details(&details(json!({
            "roles": {
                "subscriber": {"features": {"pattern_based_subscription": true, "x": false}},
                "caller": {"features": {"progressive_call_results": "yes"}},
                "callee": {}
            }
        })));

        assert!(map.has_role("subscriber"));
        assert!(map.has_role("callee"));
        assert!(!map.has_role("publisher"));

        assert!(map.has_feature("subscriber", "pattern_based_subscription"));
        assert!(!map.has_feature("subscriber", "x"));
        assert!(!map.has_feature("caller", "progressive_call_results"));
        assert!(!map.has_feature("callee", "anything"));
        assert!(!map.has_feature("publisher", "pattern_based_subscription"));
    }

    #[test]
    fn test_role_map_without_roles() {
        let map = RoleMap::from_details(&Dict::new());
        assert!(!map.has_role("caller"));
        assert_eq!(map.roles().count(), 0);
    }
}
