// src/models/delegation.rs
//! Delegations from a targets role to its child roles.

use crate::error::{TrustError, TrustResult};
use crate::models::key::{Key, KeyId};
use crate::models::role::{RoleKeys, RoleName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One delegated targets role as declared by its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedRole {
    pub name: RoleName,
    #[serde(flatten)]
    pub keys: RoleKeys,
    /// Glob patterns relative to the targets directory.
    pub paths: Vec<String>,
    #[serde(default)]
    pub terminating: bool,
}

impl DelegatedRole {
    pub fn new(name: RoleName, keys: RoleKeys, paths: Vec<String>, terminating: bool) -> TrustResult<Self> {
        if !name.is_delegated() {
            return Err(TrustError::InvalidRole(format!(
                "{} cannot be delegated to",
                name
            )));
        }
        if paths.is_empty() {
            return Err(TrustError::InvalidRole(format!(
                "delegation to {} has no path patterns",
                name
            )));
        }
        for pattern in &paths {
            glob::Pattern::new(pattern).map_err(|e| {
                TrustError::InvalidRole(format!("bad path pattern {:?}: {}", pattern, e))
            })?;
        }
        Ok(DelegatedRole {
            name,
            keys,
            paths,
            terminating,
        })
    }

    /// Returns the specificity of the best pattern matching `path`, or `None`
    /// if no pattern matches. Specificity is the length of the literal prefix
    /// before the first wildcard.
    pub fn match_specificity(&self, path: &str) -> Option<usize> {
        let path = path.trim_start_matches('/');
        self.paths
            .iter()
            .filter(|pattern| {
                glob::Pattern::new(pattern.trim_start_matches('/'))
                    .map(|p| p.matches(path))
                    .unwrap_or(false)
            })
            .map(|pattern| literal_prefix_len(pattern.trim_start_matches('/')))
            .max()
    }
}

fn literal_prefix_len(pattern: &str) -> usize {
    pattern
        .find(|c| matches!(c, '*' | '?' | '['))
        .unwrap_or(pattern.len())
}

/// Key table and ordered delegation list of a targets document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegations {
    pub keys: BTreeMap<KeyId, Key>,
    /// Declaration order is significant: it breaks specificity ties.
    pub roles: Vec<DelegatedRole>,
}

impl Delegations {
    pub fn role(&self, name: &RoleName) -> Option<&DelegatedRole> {
        self.roles.iter().find(|r| &r.name == name)
    }

    pub fn role_mut(&mut self, name: &RoleName) -> Option<&mut DelegatedRole> {
        self.roles.iter_mut().find(|r| &r.name == name)
    }

    /// Drops key table entries no delegated role refers to any more.
    pub fn prune_keys(&mut self) {
        let roles = &self.roles;
        self.keys
            .retain(|key_id, _| roles.iter().any(|r| r.keys.contains(key_id)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str, paths: &[&str]) -> DelegatedRole {
        DelegatedRole::new(
            RoleName::delegated(name).unwrap(),
            RoleKeys::new(vec![KeyId::from_hex("aa")], 1).unwrap(),
            paths.iter().map(|p| p.to_string()).collect(),
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_specificity_prefers_longer_literal_prefix() {
        let broad = role("broad", &["*"]);
        let narrow = role("narrow", &["namespace/*"]);

        assert_eq!(broad.match_specificity("namespace/repo"), Some(0));
        assert_eq!(narrow.match_specificity("namespace/repo"), Some(10));
        assert_eq!(narrow.match_specificity("other/repo"), None);
    }

    #[test]
    fn test_star_crosses_directories() {
        let r = role("deep", &["a/*"]);
        assert!(r.match_specificity("a/b/c").is_some());
        assert!(r.match_specificity("/a/b").is_some());
    }

    #[test]
    fn test_top_level_roles_cannot_be_delegated() {
        let keys = RoleKeys::new(vec![KeyId::from_hex("aa")], 1).unwrap();
        assert!(DelegatedRole::new(RoleName::Snapshot, keys.clone(), vec!["*".into()], false).is_err());
        assert!(DelegatedRole::new(RoleName::delegated("x").unwrap(), keys, vec![], false).is_err());
    }
}
