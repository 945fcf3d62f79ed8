// src/services/trust_graph.rs
//! Delegation graph resolution.
//!
//! [`resolve`] turns a set of role documents into a [`TrustSnapshot`]: the
//! roles whose authority traces back to root through delegations that
//! verify, together with the keys and threshold each one is held to.
//!
//! # Structure
//! Documents live in an arena (`Vec<Node>`) and delegations are edges between
//! arena indices. Root implicitly delegates to targets, snapshot and
//! timestamp; targets-kind documents delegate explicitly through their
//! `delegations` block.
//!
//! # Algorithm
//! 1. Root must verify against its own key table and threshold
//! 2. Every explicit delegation must name a supplied document
//! 3. Colour-marking DFS over every node rejects cycles and yields a
//!    topological order
//! 4. Trust flows along that order: a node becomes trusted when an edge from
//!    a trusted node verifies its document
//!
//! Documents that fail to verify are left out of the effective view; asking
//! for them later fails with `UntrustedRole`.

use crate::error::{TrustError, TrustResult};
use crate::models::delegation::DelegatedRole;
use crate::models::key::{Key, KeyId};
use crate::models::metadata::{RoleMetadata, RootBody};
use crate::models::role::{RoleKeys, RoleName};
use crate::models::target::TargetFile;
use crate::services::verifier::SignatureVerifier;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Authority a trusted role was verified against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveRole {
    pub keys: RoleKeys,
    /// Key table the role's signatures are checked with.
    pub key_table: BTreeMap<KeyId, Key>,
    /// Role whose document granted the authority; `None` for root.
    pub delegator: Option<RoleName>,
    /// Path patterns of a delegated role; `None` for top-level roles.
    pub paths: Option<Vec<String>>,
    pub terminating: bool,
    /// Keys whose signatures were found valid.
    pub signers: BTreeSet<KeyId>,
}

/// Summary of one role for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleDescription {
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub threshold: u32,
    pub key_ids: Vec<KeyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegator: Option<RoleName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,
    pub terminating: bool,
}

#[derive(Debug)]
struct Node {
    document: RoleMetadata,
    effective: Option<EffectiveRole>,
}

struct Edge {
    to: usize,
    keys: RoleKeys,
    key_table: BTreeMap<KeyId, Key>,
    paths: Option<Vec<String>>,
    terminating: bool,
}

/// A target entry together with the role that signed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedTarget {
    pub role: RoleName,
    #[serde(flatten)]
    pub file: TargetFile,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Grey,
    Black,
}

/// Resolved, currently valid view of a set of role documents.
#[derive(Debug)]
pub struct TrustSnapshot {
    nodes: Vec<Node>,
    index: BTreeMap<RoleName, usize>,
    root: usize,
}

/// Builds the trust snapshot of `documents`.
///
/// # Errors
/// - `NotFound` if no root document is supplied
/// - `InvalidRole` if a role is supplied twice or a delegation names a
///   top-level role
/// - root's own verification error (`ThresholdNotMet`, `BadSignature`,
///   `UnknownKey`, `InvalidThreshold`)
/// - `DanglingDelegation` if a delegation names a role with no document
/// - `CycleDetected` if delegations form a cycle
pub fn resolve(documents: impl IntoIterator<Item = RoleMetadata>) -> TrustResult<TrustSnapshot> {
    let mut nodes = Vec::new();
    let mut index = BTreeMap::new();
    for document in documents {
        if index.contains_key(&document.role) {
            return Err(TrustError::InvalidRole(format!(
                "{} supplied more than once",
                document.role
            )));
        }
        index.insert(document.role.clone(), nodes.len());
        nodes.push(Node {
            document,
            effective: None,
        });
    }

    let root_index = *index
        .get(&RoleName::Root)
        .ok_or_else(|| TrustError::NotFound(RoleName::Root.to_string()))?;
    let root_effective = verify_root(&nodes[root_index].document)?;

    let edges = build_edges(&nodes, &index, root_index)?;
    let order = topological_order(&nodes, &edges)?;

    nodes[root_index].effective = Some(root_effective);
    for &from in &order {
        if nodes[from].effective.is_none() {
            continue;
        }
        let delegator = nodes[from].document.role.clone();
        for edge in &edges[from] {
            if nodes[edge.to].effective.is_some() {
                continue;
            }
            let child = &nodes[edge.to].document;
            if let Err(e) = edge.keys.validate() {
                warn!("{} delegates to {} with {}", delegator, child.role, e);
                continue;
            }
            let verification = SignatureVerifier::new(&edge.key_table).verify_document(child, &edge.keys);
            match verification.into_result(&child.role) {
                Ok(signers) => {
                    debug!("{} v{} trusted via {}", child.role, child.version, delegator);
                    nodes[edge.to].effective = Some(EffectiveRole {
                        keys: edge.keys.clone(),
                        key_table: edge.key_table.clone(),
                        delegator: Some(delegator.clone()),
                        paths: edge.paths.clone(),
                        terminating: edge.terminating,
                        signers,
                    });
                }
                Err(e) => debug!("{} not verified via {}: {}", child.role, delegator, e),
            }
        }
    }

    for node in nodes.iter().filter(|n| n.effective.is_none()) {
        warn!(
            "{} v{} is not reachable from root through verified delegations",
            node.document.role, node.document.version
        );
    }
    Ok(TrustSnapshot {
        nodes,
        index,
        root: root_index,
    })
}

fn verify_root(root: &RoleMetadata) -> TrustResult<EffectiveRole> {
    let body = root.root_body().ok_or(TrustError::RoleBodyMismatch {
        role: RoleName::Root,
        kind: root.body.kind(),
    })?;
    let keys = body
        .role_keys(&RoleName::Root)
        .ok_or_else(|| TrustError::InvalidRole("root document names no root keys".to_string()))?;
    keys.validate()?;
    let signers = SignatureVerifier::new(&body.keys)
        .verify_document(root, keys)
        .into_result(&RoleName::Root)?;
    Ok(EffectiveRole {
        keys: keys.clone(),
        key_table: body.keys.clone(),
        delegator: None,
        paths: None,
        terminating: false,
        signers,
    })
}

/// Checks that `next` is a legitimate successor of the trusted root
/// `trusted`.
///
/// `next` must be the very next version, meet the root threshold of
/// `trusted` (cross-signature) and meet its own root threshold.
///
/// # Errors
/// - `VersionConflict` unless `next.version == trusted.version + 1`
/// - `ThresholdNotMet`/`BadSignature`/`UnknownKey` for either check
pub fn verify_root_update(trusted: &RoleMetadata, next: &RoleMetadata) -> TrustResult<EffectiveRole> {
    if next.version != trusted.version + 1 {
        return Err(TrustError::VersionConflict {
            role: RoleName::Root,
            expected: trusted.version + 1,
            got: next.version,
        });
    }
    let current = verify_root(trusted)?;
    SignatureVerifier::new(&current.key_table)
        .verify_document(next, &current.keys)
        .into_result(&RoleName::Root)?;
    let effective = verify_root(next)?;
    debug!("root v{} cross-signed by root v{}", next.version, trusted.version);
    Ok(effective)
}

fn build_edges(nodes: &[Node], index: &BTreeMap<RoleName, usize>, root_index: usize) -> TrustResult<Vec<Vec<Edge>>> {
    let mut edges: Vec<Vec<Edge>> = nodes.iter().map(|_| Vec::new()).collect();

    if let Some(root_body) = nodes[root_index].document.root_body() {
        for role in [RoleName::Targets, RoleName::Snapshot, RoleName::Timestamp] {
            let (Some(&to), Some(keys)) = (index.get(&role), root_body.role_keys(&role)) else {
                continue;
            };
            edges[root_index].push(Edge {
                to,
                keys: keys.clone(),
                key_table: root_body.keys.clone(),
                paths: None,
                terminating: false,
            });
        }
    }

    for (from, node) in nodes.iter().enumerate() {
        if !node.document.role.is_targets_kind() {
            continue;
        }
        let Some(delegations) = node.document.delegations() else {
            continue;
        };
        for delegated in &delegations.roles {
            if !delegated.name.is_delegated() {
                return Err(TrustError::InvalidRole(format!(
                    "{} delegates to top-level role {}",
                    node.document.role, delegated.name
                )));
            }
            let to = *index
                .get(&delegated.name)
                .ok_or_else(|| TrustError::DanglingDelegation {
                    parent: node.document.role.clone(),
                    role: delegated.name.clone(),
                })?;
            edges[from].push(Edge {
                to,
                keys: delegated.keys.clone(),
                key_table: delegations.keys.clone(),
                paths: Some(delegated.paths.clone()),
                terminating: delegated.terminating,
            });
        }
    }
    Ok(edges)
}

/// Colour-marking DFS from every node. Returns nodes in topological order.
fn topological_order(nodes: &[Node], edges: &[Vec<Edge>]) -> TrustResult<Vec<usize>> {
    fn visit(
        node: usize,
        nodes: &[Node],
        edges: &[Vec<Edge>],
        marks: &mut [Mark],
        post_order: &mut Vec<usize>,
    ) -> TrustResult<()> {
        marks[node] = Mark::Grey;
        for edge in &edges[node] {
            match marks[edge.to] {
                Mark::Grey => {
                    return Err(TrustError::CycleDetected(nodes[edge.to].document.role.clone()));
                }
                Mark::White => visit(edge.to, nodes, edges, marks, post_order)?,
                Mark::Black => {}
            }
        }
        marks[node] = Mark::Black;
        post_order.push(node);
        Ok(())
    }

    let mut marks = vec![Mark::White; nodes.len()];
    let mut post_order = Vec::with_capacity(nodes.len());
    for node in 0..nodes.len() {
        if marks[node] == Mark::White {
            visit(node, nodes, edges, &mut marks, &mut post_order)?;
        }
    }
    post_order.reverse();
    Ok(post_order)
}

impl TrustSnapshot {
    fn node(&self, role: &RoleName) -> Option<&Node> {
        self.index.get(role).map(|&i| &self.nodes[i])
    }

    pub fn is_trusted(&self, role: &RoleName) -> bool {
        self.effective(role).is_some()
    }

    /// Effective authority of a trusted role.
    pub fn effective(&self, role: &RoleName) -> Option<&EffectiveRole> {
        self.node(role).and_then(|n| n.effective.as_ref())
    }

    /// Any supplied document, trusted or not.
    pub fn document(&self, role: &RoleName) -> Option<&RoleMetadata> {
        self.node(role).map(|n| &n.document)
    }

    /// Document of a trusted role.
    ///
    /// # Errors
    /// `UntrustedRole` if the role is missing or not trusted.
    pub fn trusted_document(&self, role: &RoleName) -> TrustResult<&RoleMetadata> {
        match self.node(role) {
            Some(Node {
                document,
                effective: Some(_),
            }) => Ok(document),
            _ => Err(TrustError::UntrustedRole(role.clone())),
        }
    }

    /// The trusted root document.
    pub fn root(&self) -> &RoleMetadata {
        &self.nodes[self.root].document
    }

    pub fn root_body(&self) -> Option<&RootBody> {
        self.root().root_body()
    }

    /// Keys and threshold a trusted delegator currently declares for `role`,
    /// whether or not the role's own document verifies against them.
    pub fn declared_authority(&self, role: &RoleName) -> Option<(&RoleKeys, &BTreeMap<KeyId, Key>)> {
        match role {
            RoleName::Delegated(_) => self
                .nodes
                .iter()
                .filter(|n| n.effective.is_some())
                .filter_map(|n| n.document.delegations())
                .find_map(|d| d.role(role).map(|r| (&r.keys, &d.keys))),
            _ => {
                let body = self.root_body()?;
                Some((body.role_keys(role)?, &body.keys))
            }
        }
    }

    /// Role whose trusted document declares `role`: root for the other
    /// top-level roles, the parent targets role for delegated ones.
    pub fn declaring_role(&self, role: &RoleName) -> Option<&RoleName> {
        match role {
            RoleName::Root => None,
            RoleName::Delegated(_) => self
                .nodes
                .iter()
                .filter(|n| n.effective.is_some())
                .find(|n| n.document.delegations().and_then(|d| d.role(role)).is_some())
                .map(|n| &n.document.role),
            _ => Some(&self.nodes[self.root].document.role),
        }
    }

    pub fn delegator_of(&self, role: &RoleName) -> Option<&RoleName> {
        self.effective(role).and_then(|e| e.delegator.as_ref())
    }

    pub fn trusted_roles(&self) -> impl Iterator<Item = &RoleName> {
        self.nodes
            .iter()
            .filter(|n| n.effective.is_some())
            .map(|n| &n.document.role)
    }

    /// Supplied roles that did not verify.
    pub fn untrusted_roles(&self) -> Vec<RoleName> {
        self.nodes
            .iter()
            .filter(|n| n.effective.is_none())
            .map(|n| n.document.role.clone())
            .collect()
    }

    /// Delegated roles declared by a targets-kind document, in declaration order.
    pub fn delegated_roles(&self, parent: &RoleName) -> &[DelegatedRole] {
        self.document(parent)
            .and_then(|d| d.delegations())
            .map(|d| d.roles.as_slice())
            .unwrap_or(&[])
    }

    /// Role responsible for `path`.
    ///
    /// Descends from `targets`, at each level taking the delegation whose
    /// pattern matches `path` with the longest literal prefix; among equally
    /// specific matches the first declared wins. Stops where no delegation
    /// matches.
    ///
    /// # Errors
    /// `UntrustedRole` if any role on the way is not trusted.
    pub fn authorize(&self, path: &str) -> TrustResult<RoleName> {
        let mut current = RoleName::Targets;
        loop {
            if !self.is_trusted(&current) {
                warn!("{} resolves to untrusted role {}", path, current);
                return Err(TrustError::UntrustedRole(current));
            }
            let mut best: Option<(usize, &DelegatedRole)> = None;
            for delegated in self.delegated_roles(&current) {
                if let Some(specificity) = delegated.match_specificity(path) {
                    if best.map(|(s, _)| specificity > s).unwrap_or(true) {
                        best = Some((specificity, delegated));
                    }
                }
            }
            match best {
                Some((_, delegated)) => current = delegated.name.clone(),
                None => return Ok(current),
            }
        }
    }

    /// Finds the trusted entry for `path`.
    ///
    /// Pre-order search from `targets` over trusted roles, visiting matching
    /// delegations in declaration order. A matching terminating delegation
    /// ends the search once its subtree is exhausted.
    pub fn lookup_target(&self, path: &str) -> Option<(&RoleName, &TargetFile)> {
        let mut stack = vec![RoleName::Targets];
        let mut visited = HashSet::new();
        while let Some(role) = stack.pop() {
            if !visited.insert(role.clone()) {
                continue;
            }
            let Ok(document) = self.trusted_document(&role) else {
                continue;
            };
            if let Some(target) = document.targets_body().and_then(|b| b.targets.get(path)) {
                return Some((&document.role, target));
            }
            let mut children = Vec::new();
            for delegated in self.delegated_roles(&role) {
                if delegated.match_specificity(path).is_none() {
                    continue;
                }
                children.push(delegated.name.clone());
                if delegated.terminating {
                    stack.clear();
                    break;
                }
            }
            stack.extend(children.into_iter().rev());
        }
        None
    }

    /// Trusted roles whose key set includes the given keys.
    ///
    /// With `check_threshold` a role is only returned if the keys alone meet
    /// its threshold; otherwise one matching key is enough.
    pub fn find_keys_roles(&self, key_ids: &[KeyId], check_threshold: bool) -> Vec<RoleName> {
        let wanted: BTreeSet<&KeyId> = key_ids.iter().collect();
        self.nodes
            .iter()
            .filter_map(|node| {
                let effective = node.effective.as_ref()?;
                let count = effective
                    .keys
                    .key_ids
                    .iter()
                    .filter(|k| wanted.contains(k))
                    .count() as u32;
                let needed = if check_threshold {
                    effective.keys.threshold
                } else {
                    1
                };
                (count >= needed).then(|| node.document.role.clone())
            })
            .collect()
    }

    /// Version, expiry and authority of every trusted role.
    pub fn roles_description(&self) -> BTreeMap<RoleName, RoleDescription> {
        self.nodes
            .iter()
            .filter_map(|node| {
                let effective = node.effective.as_ref()?;
                Some((
                    node.document.role.clone(),
                    RoleDescription {
                        version: node.document.version,
                        expires: node.document.expires,
                        threshold: effective.keys.threshold,
                        key_ids: effective.keys.key_ids.iter().cloned().collect(),
                        delegator: effective.delegator.clone(),
                        paths: effective.paths.clone(),
                        terminating: effective.terminating,
                    },
                ))
            })
            .collect()
    }

    /// Every target listed by a trusted role, keyed by path.
    ///
    /// Only the entry [`TrustSnapshot::lookup_target`] would return is kept, so
    /// a path listed by several roles appears once with its authoritative
    /// entry.
    pub fn signed_targets(&self) -> BTreeMap<String, SignedTarget> {
        let mut listed = BTreeMap::new();
        for node in self.nodes.iter().filter(|n| n.effective.is_some()) {
            let Some(body) = node.document.targets_body() else {
                continue;
            };
            for path in body.targets.keys() {
                if listed.contains_key(path) {
                    continue;
                }
                if let Some((role, file)) = self.lookup_target(path) {
                    listed.insert(
                        path.clone(),
                        SignedTarget {
                            role: role.clone(),
                            file: file.clone(),
                        },
                    );
                }
            }
        }
        listed
    }

    /// All supplied documents, in supply order.
    pub fn documents(&self) -> impl Iterator<Item = &RoleMetadata> {
        self.nodes.iter().map(|n| &n.document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::delegation::Delegations;
    use crate::models::key::KeyScheme;
    use crate::models::metadata::{issue, Body, SnapshotBody, TargetsBody, ValidityPolicy};
    use crate::wallet::file_key::FileSigner;
    use crate::wallet::key_management::KeyRing;
    use crate::wallet::signer::Signer;
    use chrono::Duration;

    struct Keys {
        ring: KeyRing,
        ids: Vec<KeyId>,
        table: BTreeMap<KeyId, Key>,
    }

    impl Keys {
        fn new(count: usize) -> Self {
            let mut ring = KeyRing::new();
            let mut ids = Vec::new();
            let mut table = BTreeMap::new();
            for i in 0..count {
                let signer = FileSigner::generate(&format!("k{}", i), KeyScheme::Ed25519).unwrap();
                let key = signer.public_key().clone();
                table.insert(key.key_id.clone(), key);
                ids.push(ring.add_signer(Box::new(signer)));
            }
            Keys { ring, ids, table }
        }

        fn role_keys(&self, which: &[usize], threshold: u32) -> RoleKeys {
            RoleKeys::new(which.iter().map(|&i| self.ids[i].clone()), threshold).unwrap()
        }

        fn table(&self, which: &[usize]) -> BTreeMap<KeyId, Key> {
            which
                .iter()
                .map(|&i| (self.ids[i].clone(), self.table[&self.ids[i]].clone()))
                .collect()
        }

        fn signed(&self, role: RoleName, body: Body, signers: &[usize]) -> RoleMetadata {
            let now = Utc::now();
            let doc = issue(role, body, 1, now + Duration::days(7), 0, &ValidityPolicy::default(), now).unwrap();
            let ids: Vec<KeyId> = signers.iter().map(|&i| self.ids[i].clone()).collect();
            self.ring.sign_document(doc, &ids).unwrap()
        }

        /// root: k0; targets: k1; snapshot: k2
        fn root(&self) -> RoleMetadata {
            let mut roles = BTreeMap::new();
            roles.insert(RoleName::Root, self.role_keys(&[0], 1));
            roles.insert(RoleName::Targets, self.role_keys(&[1], 1));
            roles.insert(RoleName::Snapshot, self.role_keys(&[2], 1));
            roles.insert(RoleName::Timestamp, self.role_keys(&[2], 1));
            self.signed(
                RoleName::Root,
                Body::Root(RootBody {
                    keys: self.table(&[0, 1, 2]),
                    roles,
                }),
                &[0],
            )
        }

        fn delegation(&self, name: &str, key: usize, paths: &[&str], terminating: bool) -> DelegatedRole {
            DelegatedRole::new(
                RoleName::delegated(name).unwrap(),
                self.role_keys(&[key], 1),
                paths.iter().map(|p| p.to_string()).collect(),
                terminating,
            )
            .unwrap()
        }

        fn targets_doc(&self, role: RoleName, targets: &[&str], delegated: Vec<DelegatedRole>, signer: usize) -> RoleMetadata {
            let keys = delegated
                .iter()
                .flat_map(|d| d.keys.key_ids.iter())
                .map(|id| (id.clone(), self.table[id].clone()))
                .collect();
            let body = TargetsBody {
                targets: targets
                    .iter()
                    .map(|t| (t.to_string(), TargetFile::from_bytes(t.as_bytes(), None)))
                    .collect(),
                delegations: (!delegated.is_empty()).then(|| Delegations {
                    keys,
                    roles: delegated,
                }),
            };
            self.signed(role, Body::Targets(body), &[signer])
        }
    }

    fn role(name: &str) -> RoleName {
        RoleName::delegated(name).unwrap()
    }

    #[test]
    fn test_top_level_roles_trusted_through_root() {
        let keys = Keys::new(3);
        let targets = keys.targets_doc(RoleName::Targets, &["a.txt"], vec![], 1);
        let snapshot = keys.signed(RoleName::Snapshot, Body::Snapshot(SnapshotBody::default()), &[2]);

        let snapshot = resolve(vec![keys.root(), targets, snapshot]).unwrap();
        assert!(snapshot.is_trusted(&RoleName::Root));
        assert!(snapshot.is_trusted(&RoleName::Targets));
        assert!(snapshot.is_trusted(&RoleName::Snapshot));
        assert!(!snapshot.is_trusted(&RoleName::Timestamp));
        assert_eq!(snapshot.delegator_of(&RoleName::Targets), Some(&RoleName::Root));
    }

    #[test]
    fn test_unsigned_root_is_rejected() {
        let keys = Keys::new(3);
        let mut root = keys.root();
        root.signatures.clear();
        assert!(matches!(resolve(vec![root]), Err(TrustError::ThresholdNotMet { .. })));
    }

    #[test]
    fn test_wrongly_signed_role_is_untrusted_not_fatal() {
        let keys = Keys::new(3);
        let targets = keys.targets_doc(RoleName::Targets, &[], vec![], 2);

        let snapshot = resolve(vec![keys.root(), targets]).unwrap();
        assert!(!snapshot.is_trusted(&RoleName::Targets));
        assert_eq!(snapshot.untrusted_roles(), vec![RoleName::Targets]);
        assert!(matches!(
            snapshot.authorize("a.txt"),
            Err(TrustError::UntrustedRole(RoleName::Targets))
        ));
    }

    #[test]
    fn test_dangling_delegation() {
        let keys = Keys::new(4);
        let targets = keys.targets_doc(
            RoleName::Targets,
            &[],
            vec![keys.delegation("missing", 3, &["*"], false)],
            1,
        );
        assert!(matches!(
            resolve(vec![keys.root(), targets]),
            Err(TrustError::DanglingDelegation { .. })
        ));
    }

    #[test]
    fn test_cycle_between_delegated_roles() {
        let keys = Keys::new(4);
        let targets = keys.targets_doc(RoleName::Targets, &[], vec![keys.delegation("a", 3, &["*"], false)], 1);
        let a = keys.targets_doc(role("a"), &[], vec![keys.delegation("b", 3, &["*"], false)], 3);
        let b = keys.targets_doc(role("b"), &[], vec![keys.delegation("a", 3, &["*"], false)], 3);

        assert!(matches!(
            resolve(vec![keys.root(), targets, a, b]),
            Err(TrustError::CycleDetected(_))
        ));
    }

    #[test]
    fn test_cycle_unreachable_from_targets_is_still_detected() {
        let keys = Keys::new(4);
        let a = keys.targets_doc(role("a"), &[], vec![keys.delegation("b", 3, &["*"], false)], 3);
        let b = keys.targets_doc(role("b"), &[], vec![keys.delegation("a", 3, &["*"], false)], 3);
        assert!(matches!(
            resolve(vec![keys.root(), a, b]),
            Err(TrustError::CycleDetected(_))
        ));
    }

    #[test]
    fn test_authorize_prefers_most_specific_pattern() {
        let keys = Keys::new(4);
        let targets = keys.targets_doc(
            RoleName::Targets,
            &[],
            vec![
                keys.delegation("broad", 3, &["*"], false),
                keys.delegation("narrow", 3, &["namespace/*"], false),
                keys.delegation("narrow-too", 3, &["namespace/*"], false),
            ],
            1,
        );
        let docs = vec![
            keys.root(),
            targets,
            keys.targets_doc(role("broad"), &[], vec![], 3),
            keys.targets_doc(role("narrow"), &[], vec![], 3),
            keys.targets_doc(role("narrow-too"), &[], vec![], 3),
        ];
        let snapshot = resolve(docs).unwrap();

        assert_eq!(snapshot.authorize("namespace/repo").unwrap(), role("narrow"));
        assert_eq!(snapshot.authorize("other").unwrap(), role("broad"));
    }

    #[test]
    fn test_authorize_descends_nested_delegations() {
        let keys = Keys::new(4);
        let targets = keys.targets_doc(RoleName::Targets, &[], vec![keys.delegation("outer", 3, &["dir/*"], false)], 1);
        let outer = keys.targets_doc(role("outer"), &[], vec![keys.delegation("inner", 3, &["dir/sub/*"], false)], 3);
        let inner = keys.targets_doc(role("inner"), &[], vec![], 3);
        let snapshot = resolve(vec![keys.root(), targets, outer, inner]).unwrap();

        assert_eq!(snapshot.authorize("dir/sub/file").unwrap(), role("inner"));
        assert_eq!(snapshot.authorize("dir/file").unwrap(), role("outer"));
        assert_eq!(snapshot.authorize("top.txt").unwrap(), RoleName::Targets);
        assert_eq!(snapshot.delegator_of(&role("inner")), Some(&role("outer")));
    }

    #[test]
    fn test_lookup_target_honours_terminating() {
        let keys = Keys::new(4);
        let targets = keys.targets_doc(
            RoleName::Targets,
            &[],
            vec![
                keys.delegation("first", 3, &["files/*"], true),
                keys.delegation("second", 3, &["files/*"], false),
            ],
            1,
        );
        let first = keys.targets_doc(role("first"), &[], vec![], 3);
        let second = keys.targets_doc(role("second"), &["files/x"], vec![], 3);
        let snapshot = resolve(vec![keys.root(), targets, first, second]).unwrap();

        assert!(snapshot.lookup_target("files/x").is_none());
    }

    #[test]
    fn test_lookup_target_searches_in_declaration_order() {
        let keys = Keys::new(4);
        let targets = keys.targets_doc(
            RoleName::Targets,
            &["top"],
            vec![
                keys.delegation("first", 3, &["files/*"], false),
                keys.delegation("second", 3, &["files/*"], false),
            ],
            1,
        );
        let first = keys.targets_doc(role("first"), &[], vec![], 3);
        let second = keys.targets_doc(role("second"), &["files/x"], vec![], 3);
        let snapshot = resolve(vec![keys.root(), targets, first, second]).unwrap();

        let (found_in, entry) = snapshot.lookup_target("files/x").unwrap();
        assert_eq!(found_in, &role("second"));
        assert_eq!(entry.length, 7);
        assert_eq!(snapshot.lookup_target("top").unwrap().0, &RoleName::Targets);
    }

    #[test]
    fn test_find_keys_roles() {
        let keys = Keys::new(3);
        let snapshot = keys.signed(RoleName::Snapshot, Body::Snapshot(SnapshotBody::default()), &[2]);
        let resolved = resolve(vec![keys.root(), snapshot]).unwrap();

        assert_eq!(resolved.find_keys_roles(&[keys.ids[2].clone()], true), vec![RoleName::Snapshot]);
        assert_eq!(resolved.find_keys_roles(&[keys.ids[0].clone()], false), vec![RoleName::Root]);
        let description = resolved.roles_description();
        assert_eq!(description[&RoleName::Root].threshold, 1);
        assert!(!description.contains_key(&RoleName::Targets));
    }

    /// Root v2 with root keys `root`, signed by `signers`.
    fn next_root(keys: &Keys, root: &[usize], signers: &[usize]) -> RoleMetadata {
        let now = Utc::now();
        let mut roles = BTreeMap::new();
        roles.insert(RoleName::Root, keys.role_keys(root, 1));
        roles.insert(RoleName::Targets, keys.role_keys(&[1], 1));
        let body = RootBody {
            keys: keys.table(&[0, 1, 2, 3]),
            roles,
        };
        let doc = issue(RoleName::Root, Body::Root(body), 2, now + Duration::days(7), 1, &ValidityPolicy::default(), now).unwrap();
        let ids: Vec<KeyId> = signers.iter().map(|&i| keys.ids[i].clone()).collect();
        keys.ring.sign_document(doc, &ids).unwrap()
    }

    #[test]
    fn test_root_update_needs_previous_root_signature() {
        let keys = Keys::new(4);
        let trusted = keys.root();

        // self-signed by a key the previous root never named
        let forged = next_root(&keys, &[3], &[3]);
        assert!(matches!(
            verify_root_update(&trusted, &forged),
            Err(TrustError::ThresholdNotMet { role: RoleName::Root, .. })
        ));

        // cross-signed but not by its own new key
        let half = next_root(&keys, &[3], &[0]);
        assert!(verify_root_update(&trusted, &half).is_err());

        let rotated = next_root(&keys, &[3], &[0, 3]);
        let effective = verify_root_update(&trusted, &rotated).unwrap();
        assert!(effective.keys.contains(&keys.ids[3]));
        assert!(matches!(
            verify_root_update(&rotated, &trusted),
            Err(TrustError::VersionConflict { expected: 3, got: 1, .. })
        ));
    }

    #[test]
    fn test_signed_targets_lists_authoritative_entries() {
        let keys = Keys::new(4);
        let targets = keys.targets_doc(
            RoleName::Targets,
            &["top"],
            vec![keys.delegation("files", 3, &["files/*"], true)],
            1,
        );
        let files = keys.targets_doc(role("files"), &["files/a", "files/b"], vec![], 3);
        let rogue = keys.targets_doc(role("rogue"), &["files/c"], vec![], 3);
        let resolved = resolve(vec![keys.root(), targets, files, rogue]).unwrap();

        let listed = resolved.signed_targets();
        let paths: Vec<&str> = listed.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["files/a", "files/b", "top"]);
        assert_eq!(listed["files/a"].role, role("files"));
        assert_eq!(listed["top"].role, RoleName::Targets);
        assert_eq!(listed["top"].file.length, 3);
    }
}
