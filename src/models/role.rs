// src/models/role.rs
//! Role names and role authority.

use crate::error::{TrustError, TrustResult};
use crate::models::key::KeyId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A named authority.
///
/// The four top-level roles have fixed names; every other name denotes a
/// delegated targets role. Serialized as its plain name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RoleName {
    Root,
    Targets,
    Snapshot,
    Timestamp,
    Delegated(String),
}

/// The top-level roles, in the order they are created.
pub const MAIN_ROLES: [RoleName; 4] = [
    RoleName::Root,
    RoleName::Targets,
    RoleName::Snapshot,
    RoleName::Timestamp,
];

impl RoleName {
    /// Builds a delegated role name, rejecting reserved and malformed names.
    pub fn delegated(name: impl Into<String>) -> TrustResult<Self> {
        let name = name.into();
        match name.parse::<RoleName>()? {
            RoleName::Delegated(_) => Ok(RoleName::Delegated(name)),
            _ => Err(TrustError::InvalidRole(format!(
                "{} is reserved for a top-level role",
                name
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RoleName::Root => "root",
            RoleName::Targets => "targets",
            RoleName::Snapshot => "snapshot",
            RoleName::Timestamp => "timestamp",
            RoleName::Delegated(name) => name,
        }
    }

    pub fn is_delegated(&self) -> bool {
        matches!(self, RoleName::Delegated(_))
    }

    /// True for `targets` and every delegated role, i.e. roles whose
    /// documents carry a targets body.
    pub fn is_targets_kind(&self) -> bool {
        matches!(self, RoleName::Targets | RoleName::Delegated(_))
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleName {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(RoleName::Root),
            "targets" => Ok(RoleName::Targets),
            "snapshot" => Ok(RoleName::Snapshot),
            "timestamp" => Ok(RoleName::Timestamp),
            "" => Err(TrustError::InvalidRole("empty role name".to_string())),
            other
                if other
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
                    && !other.starts_with('.') =>
            {
                Ok(RoleName::Delegated(other.to_string()))
            }
            other => Err(TrustError::InvalidRole(other.to_string())),
        }
    }
}

impl From<RoleName> for String {
    fn from(role: RoleName) -> Self {
        role.as_str().to_string()
    }
}

impl TryFrom<String> for RoleName {
    type Error = TrustError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Keys authorized to sign a role and how many of them must sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleKeys {
    pub key_ids: BTreeSet<KeyId>,
    pub threshold: u32,
}

impl RoleKeys {
    /// Creates a validated key set.
    ///
    /// # Errors
    /// `InvalidThreshold` unless `1 <= threshold <= key_ids.len()`.
    pub fn new(key_ids: impl IntoIterator<Item = KeyId>, threshold: u32) -> TrustResult<Self> {
        let keys = RoleKeys {
            key_ids: key_ids.into_iter().collect(),
            threshold,
        };
        keys.validate()?;
        Ok(keys)
    }

    /// Checks the threshold bounds. Documents read from storage are checked
    /// with this before their key sets are trusted.
    pub fn validate(&self) -> TrustResult<()> {
        if self.threshold == 0 || self.threshold as usize > self.key_ids.len() {
            return Err(TrustError::InvalidThreshold {
                threshold: self.threshold,
                keys: self.key_ids.len(),
            });
        }
        Ok(())
    }

    pub fn contains(&self, key_id: &KeyId) -> bool {
        self.key_ids.contains(key_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_names_round_trip_through_strings() {
        for role in MAIN_ROLES.iter() {
            assert_eq!(&role.as_str().parse::<RoleName>().unwrap(), role);
        }
        let delegated: RoleName = "delegated-1".parse().unwrap();
        assert_eq!(delegated, RoleName::Delegated("delegated-1".into()));
        assert_eq!(serde_json::to_string(&delegated).unwrap(), "\"delegated-1\"");
    }

    #[test]
    fn test_delegated_rejects_reserved_and_bad_names() {
        assert!(RoleName::delegated("root").is_err());
        assert!(RoleName::delegated("../etc").is_err());
        assert!(RoleName::delegated("a/b").is_err());
        assert!(RoleName::delegated("inner_role").is_ok());
    }

    #[test]
    fn test_threshold_bounds() {
        let ids = vec![KeyId::from_hex("aa"), KeyId::from_hex("bb")];
        assert!(RoleKeys::new(ids.clone(), 0).is_err());
        assert!(RoleKeys::new(ids.clone(), 3).is_err());
        let keys = RoleKeys::new(ids, 2).unwrap();
        assert!(keys.contains(&KeyId::from_hex("AA")));
    }

    #[test]
    fn test_duplicate_key_ids_collapse() {
        let ids = vec![KeyId::from_hex("aa"), KeyId::from_hex("aa")];
        let err = RoleKeys::new(ids, 2).unwrap_err();
        assert!(matches!(err, TrustError::InvalidThreshold { keys: 1, .. }));
    }
}
