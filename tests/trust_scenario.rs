// tests/trust_scenario.rs
//! End-to-end trust scenarios against a filesystem store.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use taf_trust::models::delegation::{DelegatedRole, Delegations};
use taf_trust::models::metadata::{issue, Body, RootBody, TargetsBody, ValidityPolicy};
use taf_trust::models::role::MAIN_ROLES;
use taf_trust::services::repository::{RepositorySettings, RoleSetup, RolesSetup};
use taf_trust::services::rotation::{Rotation, RotationState};
use taf_trust::services::verifier::{verify_document, UnverifiedReason, Verification};
use taf_trust::storage::{FilesystemStore, MetadataStore};
use taf_trust::wallet::file_key::FileSigner;
use taf_trust::wallet::signer::Signer;
use taf_trust::{
    resolve, Key, KeyId, KeyRing, KeyScheme, RoleKeys, RoleMetadata, RoleName, TrustError, TrustRepository,
};

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-06-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// k1..k5 in a ring; `keys[i]` is the public half of `k{i + 1}`.
fn keys() -> (KeyRing, Vec<Key>) {
    let mut ring = KeyRing::new();
    let mut keys = Vec::new();
    for i in 1..=5 {
        let signer = FileSigner::generate(&format!("k{}", i), KeyScheme::Ed25519).unwrap();
        keys.push(signer.public_key().clone());
        ring.add_signer(Box::new(signer));
    }
    (ring, keys)
}

fn ids(keys: &[Key], which: &[usize]) -> Vec<KeyId> {
    which.iter().map(|&i| keys[i - 1].key_id.clone()).collect()
}

fn table(keys: &[Key]) -> BTreeMap<KeyId, Key> {
    keys.iter().map(|k| (k.key_id.clone(), k.clone())).collect()
}

/// Root 2 of {k1, k2, k3}; targets 1 of {k4}.
fn root_body(keys: &[Key]) -> RootBody {
    let mut roles = BTreeMap::new();
    roles.insert(RoleName::Root, RoleKeys::new(ids(keys, &[1, 2, 3]), 2).unwrap());
    roles.insert(RoleName::Targets, RoleKeys::new(ids(keys, &[4]), 1).unwrap());
    RootBody {
        keys: table(&keys[..4]),
        roles,
    }
}

fn targets(version: u64, body: TargetsBody) -> RoleMetadata {
    issue(
        RoleName::Targets,
        Body::Targets(body),
        version,
        now() + Duration::days(30),
        version - 1,
        &ValidityPolicy::default(),
        now(),
    )
    .unwrap()
}

#[test]
fn test_targets_threshold_and_root_rotation() {
    let (ring, keys) = keys();
    let dir = tempfile::tempdir().unwrap();
    let mut store = MetadataStore::new(FilesystemStore::open(dir.path()).unwrap());

    let root_v1 = issue(
        RoleName::Root,
        Body::Root(root_body(&keys)),
        1,
        now() + Duration::days(365),
        0,
        &ValidityPolicy::default(),
        now(),
    )
    .unwrap();
    let root_v1 = ring.sign_document(root_v1, &ids(&keys, &[1, 2])).unwrap();
    store.save(&root_v1).unwrap();

    // targets v1 signed by k4 verifies
    let authority = root_body(&keys).roles[&RoleName::Targets].clone();
    let targets_v1 = ring.sign_document(targets(1, TargetsBody::default()), &ids(&keys, &[4])).unwrap();
    let verification = verify_document(&targets_v1, &table(&keys), &authority);
    assert!(verification.is_verified());
    store.save(&targets_v1).unwrap();

    // an unsigned v2 does not
    let targets_v2 = targets(2, TargetsBody::default());
    assert_eq!(
        verify_document(&targets_v2, &table(&keys), &authority),
        Verification::Unverified(UnverifiedReason::ThresholdNotMet { required: 1, valid: 0 })
    );

    // root becomes 2 of {k1, k2, k5}
    let mut new_body = root_body(&keys);
    new_body.keys.insert(keys[4].key_id.clone(), keys[4].clone());
    new_body
        .roles
        .insert(RoleName::Root, RoleKeys::new(ids(&keys, &[1, 2, 5]), 2).unwrap());
    new_body.prune_keys();
    let current = store.load(&RoleName::Root, now()).unwrap();
    let mut rotation = Rotation::propose_root(
        &current,
        new_body,
        now() + Duration::days(365),
        &ValidityPolicy::default(),
        now(),
        Duration::hours(24),
    )
    .unwrap();

    // k5 alone satisfies neither threshold
    assert_eq!(rotation.sign_with(&ring, &ids(&keys, &[5]), now()).unwrap(), RotationState::Proposed);
    rotation.sign_with(&ring, &ids(&keys, &[1, 2]), now()).unwrap();
    assert_eq!(rotation.status(now()), RotationState::CoSigned);
    let root_v2 = rotation.activate(&mut store, now()).unwrap();
    assert_eq!(root_v2.version, 2);
    assert_eq!(rotation.state(), RotationState::Activated);

    let reloaded = store.load(&RoleName::Root, now()).unwrap();
    assert_eq!(reloaded, root_v2);
    let state = resolve(vec![reloaded, store.load(&RoleName::Targets, now()).unwrap()]).unwrap();
    assert!(state.is_trusted(&RoleName::Root));
    assert!(state.is_trusted(&RoleName::Targets));
    assert!(state
        .effective(&RoleName::Root)
        .unwrap()
        .keys
        .contains(&keys[4].key_id));
}

#[test]
fn test_pinned_client_refuses_older_root() {
    let (ring, keys) = keys();
    let dir = tempfile::tempdir().unwrap();
    let mut store = MetadataStore::new(FilesystemStore::open(dir.path()).unwrap());
    let root_v1 = issue(
        RoleName::Root,
        Body::Root(root_body(&keys)),
        1,
        now() + Duration::days(365),
        0,
        &ValidityPolicy::default(),
        now(),
    )
    .unwrap();
    store.save(&ring.sign_document(root_v1, &ids(&keys, &[1, 2])).unwrap()).unwrap();

    let mut client = MetadataStore::new(FilesystemStore::open(dir.path()).unwrap());
    client.pin(&RoleName::Root, 2);
    assert!(matches!(
        client.load(&RoleName::Root, now()),
        Err(TrustError::Rollback { pinned: 2, received: 1, .. })
    ));
}

#[test]
fn test_delegation_cycle_is_rejected() {
    let (ring, keys) = keys();
    let root = issue(
        RoleName::Root,
        Body::Root(root_body(&keys)),
        1,
        now() + Duration::days(365),
        0,
        &ValidityPolicy::default(),
        now(),
    )
    .unwrap();
    let root = ring.sign_document(root, &ids(&keys, &[1, 2])).unwrap();

    let a = RoleName::delegated("a").unwrap();
    let b = RoleName::delegated("b").unwrap();
    let delegate_to = |name: &RoleName| {
        let mut delegations = Delegations::default();
        delegations.keys = table(&keys[4..5]);
        delegations.roles.push(
            DelegatedRole::new(
                name.clone(),
                RoleKeys::new(ids(&keys, &[5]), 1).unwrap(),
                vec!["*".to_string()],
                false,
            )
            .unwrap(),
        );
        TargetsBody {
            targets: BTreeMap::new(),
            delegations: Some(delegations),
        }
    };
    let delegated = |role: &RoleName, body: TargetsBody| {
        let document = issue(
            role.clone(),
            Body::Targets(body),
            1,
            now() + Duration::days(30),
            0,
            &ValidityPolicy::default(),
            now(),
        )
        .unwrap();
        ring.sign_document(document, &ids(&keys, &[5])).unwrap()
    };

    let top = ring.sign_document(targets(1, delegate_to(&a)), &ids(&keys, &[4])).unwrap();
    let documents = vec![root, top, delegated(&a, delegate_to(&b)), delegated(&b, delegate_to(&a))];
    assert!(matches!(resolve(documents), Err(TrustError::CycleDetected(_))));
}

fn open_repository(dir: &std::path::Path, ring: KeyRing) -> TrustRepository<FilesystemStore> {
    TrustRepository::new(
        MetadataStore::new(FilesystemStore::open(dir).unwrap()),
        ring,
        RepositorySettings::default(),
    )
}

#[test]
fn test_client_walks_root_chain_and_rejects_self_signed_root() {
    let (ring, keys) = keys();
    let dir = tempfile::tempdir().unwrap();
    let role = |which: &[usize], threshold| RoleSetup {
        keys: which.iter().map(|&i| keys[i - 1].clone()).collect(),
        threshold,
    };
    let setup = RolesSetup {
        root: role(&[1, 2, 3], 2),
        targets: role(&[4], 1),
        snapshot: role(&[5], 1),
        timestamp: role(&[5], 1),
        delegations: Vec::new(),
    };
    let mut maintainer = open_repository(dir.path(), ring);
    maintainer.create(&setup, now()).unwrap();
    maintainer
        .rotate_root(RoleKeys::new(ids(&keys, &[1, 2, 5]), 2).unwrap(), vec![keys[4].clone()], now())
        .unwrap();

    // a client with no pins starts from v1 and follows the rotation
    let mut client = open_repository(dir.path(), KeyRing::new());
    let state = client.trusted_state(now()).unwrap();
    assert_eq!(state.root().version, 2);
    assert_eq!(client.store().pinned(&RoleName::Root), Some(2));

    // someone with write access to the store publishes a root of their own
    let mut intruder = KeyRing::new();
    let x = intruder.add_signer(Box::new(FileSigner::generate("x", KeyScheme::Ed25519).unwrap()));
    let only_x = RoleKeys::new(vec![x.clone()], 1).unwrap();
    let body = RootBody {
        keys: table(&[intruder.public_key(&x).unwrap()]),
        roles: MAIN_ROLES.iter().map(|r| (r.clone(), only_x.clone())).collect(),
    };
    let forged = issue(
        RoleName::Root,
        Body::Root(body),
        3,
        now() + Duration::days(365),
        2,
        &ValidityPolicy::default(),
        now(),
    )
    .unwrap();
    let mut writer = MetadataStore::new(FilesystemStore::open(dir.path()).unwrap());
    writer.save(&intruder.sign_document(forged, &[x]).unwrap()).unwrap();

    let mut fresh = open_repository(dir.path(), KeyRing::new());
    for client in [&mut client, &mut fresh] {
        let err = client.trusted_state(now()).unwrap_err();
        assert!(matches!(err, TrustError::ThresholdNotMet { role: RoleName::Root, .. }));
        assert_eq!(err.exit_code(), 10);
    }
    assert_eq!(client.store().pinned(&RoleName::Root), Some(2));
}
