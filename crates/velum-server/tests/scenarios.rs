//! End-to-end exercises of the component layer: one in-memory backend,
//! contexts built directly, certificates signed with throwaway keys.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use serde_bytes::ByteBuf;

use velum_certif::{
    Certificate, CertificateAuthor, DeviceCertificate, RealmRoleCertificate,
    RevokedUserCertificate, SequesterAuthorityCertificate, SequesterServiceCertificate,
    ShamirRecoveryBriefCertificate, ShamirRecoveryDeletionCertificate, UserCertificate,
};
use velum_core::ballpark::RequireGreaterTimestamp;
use velum_core::config::ServerConfig;
use velum_core::crypto::SigningKey;
use velum_core::id::{
    BlockId, DeviceId, DeviceLabel, HumanHandle, OrganizationId, RealmId, SequesterServiceId,
    UserId, VlobId,
};
use velum_core::time::Timestamp;
use velum_core::token::InvitationToken;
use velum_core::types::{ActiveUsersLimit, RealmRole, UserProfile};
use velum_server::auth::AuthenticatedContext;
use velum_server::components::organization::{
    CreateOrganizationParams, CreateSequesterServiceError,
};
use velum_server::components::block::CreateBlockError;
use velum_server::components::export::ExportError;
use velum_server::components::realm::{CreateRealmError, ShareRealmError};
use velum_server::components::shamir::{DeleteShamirError, SetupShamirError};
use velum_server::components::totp::{compute_one_time_password, TotpError};
use velum_server::components::user::{CreateUserError, RevokeUserError};
use velum_server::components::vlob::{CreateVlobError, ReadVlobError};
use velum_server::components::TimestampError;
use velum_server::Backend;
use velum_store::OrganizationStore;

struct TestBed {
    backend: Backend,
    organization: Arc<OrganizationStore>,
    alice: AuthenticatedContext,
    alice_key: SigningKey,
    bootstrap_timestamp: Timestamp,
}

fn signed_user_and_device(
    author: CertificateAuthor,
    signing_key: &SigningKey,
    email: &str,
    profile: UserProfile,
    timestamp: Timestamp,
) -> (UserId, DeviceId, SigningKey, [Vec<u8>; 4]) {
    let user_id = UserId::new();
    let device_key = SigningKey::generate();
    let device_id = DeviceId::new(user_id, "dev1".parse().unwrap());
    let user = UserCertificate {
        author: author.clone(),
        timestamp,
        user_id,
        human_handle: Some(HumanHandle::new(email, "Test User").unwrap()),
        public_key: ByteBuf::from(vec![0u8; 32]),
        profile,
    };
    let device = DeviceCertificate {
        author,
        timestamp,
        user_id,
        device_name: device_id.device_name.clone(),
        device_label: Some(DeviceLabel::new("laptop")),
        verify_key: device_key.verify_key(),
    };
    let raws = [
        user.dump_and_sign(signing_key),
        user.redacted().dump_and_sign(signing_key),
        device.dump_and_sign(signing_key),
        device.redacted().dump_and_sign(signing_key),
    ];
    (user_id, device_id, device_key, raws)
}

async fn bootstrap_backend(raw_id: &str, params: CreateOrganizationParams) -> TestBed {
    let backend = Backend::in_memory(ServerConfig::default());
    let organization_id: OrganizationId = raw_id.parse().unwrap();
    let token = backend
        .organization
        .create(organization_id.clone(), params)
        .unwrap();
    let organization = backend.store.organization(&organization_id).unwrap();

    let root_key = SigningKey::generate();
    let bootstrap_timestamp = Timestamp::now();
    let (user_id, device_id, alice_key, [user, redacted_user, device, redacted_device]) =
        signed_user_and_device(
            CertificateAuthor::Root,
            &root_key,
            "alice@example.com",
            UserProfile::Admin,
            bootstrap_timestamp,
        );
    backend
        .organization
        .bootstrap(
            &organization,
            Some(token),
            root_key.verify_key(),
            &user,
            &redacted_user,
            &device,
            &redacted_device,
            None,
        )
        .await
        .unwrap();

    let alice = AuthenticatedContext {
        organization: organization.clone(),
        device_id,
        user_id,
        profile: UserProfile::Admin,
    };
    TestBed {
        backend,
        organization,
        alice,
        alice_key,
        bootstrap_timestamp,
    }
}

/// Enroll a second user through `create_user`, authored by alice.
async fn enroll_user(
    bed: &TestBed,
    email: &str,
    profile: UserProfile,
    timestamp: Timestamp,
) -> (AuthenticatedContext, SigningKey, [Vec<u8>; 4]) {
    let (user_id, device_id, device_key, raws) = signed_user_and_device(
        CertificateAuthor::Device(bed.alice.device_id.clone()),
        &bed.alice_key,
        email,
        profile,
        timestamp,
    );
    bed.backend
        .user
        .create_user(&bed.alice, &raws[0], &raws[1], &raws[2], &raws[3])
        .await
        .unwrap();
    let ctx = AuthenticatedContext {
        organization: bed.organization.clone(),
        device_id,
        user_id,
        profile,
    };
    (ctx, device_key, raws)
}

fn role_certificate(
    ctx: &AuthenticatedContext,
    signing_key: &SigningKey,
    realm_id: RealmId,
    user_id: UserId,
    role: Option<RealmRole>,
    timestamp: Timestamp,
) -> Vec<u8> {
    RealmRoleCertificate {
        author: CertificateAuthor::Device(ctx.device_id.clone()),
        timestamp,
        realm_id,
        user_id,
        role,
    }
    .dump_and_sign(signing_key)
}

async fn create_realm(bed: &TestBed, timestamp: Timestamp) -> RealmId {
    let realm_id = RealmId::new();
    let raw = role_certificate(
        &bed.alice,
        &bed.alice_key,
        realm_id,
        bed.alice.user_id,
        Some(RealmRole::Owner),
        timestamp,
    );
    let created = bed.backend.realm.create(&bed.alice, &raw).await.unwrap();
    assert_eq!(created, realm_id);
    realm_id
}

#[tokio::test]
async fn bootstrap_then_certificate_streams() {
    let bed = bootstrap_backend("ScenarioBootstrap", CreateOrganizationParams::default()).await;

    let bundles = bed
        .backend
        .user
        .certificate_get(&bed.alice, None, None, None, &HashMap::new())
        .await;
    // One user and one device certificate, nothing else yet
    assert_eq!(bundles.common.len(), 2);
    assert!(bundles.sequester.is_empty());
    assert!(bundles.shamir_recovery.is_empty());
    assert!(bundles.realm.is_empty());

    // A watermark at the bootstrap timestamp filters everything out
    let bundles = bed
        .backend
        .user
        .certificate_get(
            &bed.alice,
            Some(bed.bootstrap_timestamp),
            None,
            None,
            &HashMap::new(),
        )
        .await;
    assert!(bundles.common.is_empty());
}

#[tokio::test]
async fn realm_create_resubmission_reports_the_existing_realm() {
    let bed = bootstrap_backend("ScenarioRealmDup", CreateOrganizationParams::default()).await;
    let timestamp = bed.bootstrap_timestamp + Duration::from_millis(10);
    let realm_id = RealmId::new();
    let raw = role_certificate(
        &bed.alice,
        &bed.alice_key,
        realm_id,
        bed.alice.user_id,
        Some(RealmRole::Owner),
        timestamp,
    );

    bed.backend.realm.create(&bed.alice, &raw).await.unwrap();
    // Resubmitting the exact same certificate is not idempotent: the
    // reply points at the realm's last certificate instead
    assert_matches!(
        bed.backend.realm.create(&bed.alice, &raw).await,
        Err(CreateRealmError::AlreadyExists(RequireGreaterTimestamp {
            strictly_greater_than,
        })) if strictly_greater_than == timestamp
    );
}

#[tokio::test]
async fn concurrent_vlob_creates_take_distinct_checkpoints() {
    let bed = bootstrap_backend("ScenarioVlobRace", CreateOrganizationParams::default()).await;
    let realm_timestamp = bed.bootstrap_timestamp + Duration::from_millis(10);
    let realm_id = create_realm(&bed, realm_timestamp).await;

    let vlob_a = VlobId::new();
    let vlob_b = VlobId::new();
    let ts_a = realm_timestamp + Duration::from_millis(10);
    let ts_b = realm_timestamp + Duration::from_millis(20);
    let (first, second) = tokio::join!(
        bed.backend
            .vlob
            .create(&bed.alice, realm_id, vlob_a, 0, ts_a, b"a".to_vec(), None),
        bed.backend
            .vlob
            .create(&bed.alice, realm_id, vlob_b, 0, ts_b, b"b".to_vec(), None),
    );
    first.unwrap();
    second.unwrap();

    let changes = bed
        .backend
        .vlob
        .poll_changes(&bed.alice, realm_id, 0)
        .await
        .unwrap();
    assert_eq!(changes.current_checkpoint, 2);
    assert_eq!(changes.changes.len(), 2);
    let ids: Vec<VlobId> = changes.changes.iter().map(|(id, _)| *id).collect();
    assert!(ids.contains(&vlob_a));
    assert!(ids.contains(&vlob_b));
    // Both are at version 1; the ordering carries the checkpoints
    assert!(changes.changes.iter().all(|(_, version)| *version == 1));
}

#[tokio::test]
async fn common_topic_rejects_non_increasing_timestamps() {
    let bed = bootstrap_backend("ScenarioWatermark", CreateOrganizationParams::default()).await;

    // Same timestamp as the bootstrap certificates: not strictly greater
    let (_, _, _, raws) = signed_user_and_device(
        CertificateAuthor::Device(bed.alice.device_id.clone()),
        &bed.alice_key,
        "bob@example.com",
        UserProfile::Standard,
        bed.bootstrap_timestamp,
    );
    assert_matches!(
        bed.backend
            .user
            .create_user(&bed.alice, &raws[0], &raws[1], &raws[2], &raws[3])
            .await,
        Err(CreateUserError::Timestamp(TimestampError::RequireGreater(
            RequireGreaterTimestamp { strictly_greater_than },
        ))) if strictly_greater_than == bed.bootstrap_timestamp
    );
}

#[tokio::test]
async fn vlob_writes_reject_out_of_ballpark_timestamps() {
    let bed = bootstrap_backend("ScenarioBallpark", CreateOrganizationParams::default()).await;
    let realm_timestamp = bed.bootstrap_timestamp + Duration::from_millis(10);
    let realm_id = create_realm(&bed, realm_timestamp).await;

    let stale = Timestamp::now() - Duration::from_secs(3600);
    assert_matches!(
        bed.backend
            .vlob
            .create(&bed.alice, realm_id, VlobId::new(), 0, stale, b"x".to_vec(), None)
            .await,
        Err(CreateVlobError::Timestamp(TimestampError::OutOfBallpark(_)))
    );
}

#[tokio::test]
async fn unshare_cuts_read_access() {
    let bed = bootstrap_backend("ScenarioUnshare", CreateOrganizationParams::default()).await;
    let t1 = bed.bootstrap_timestamp + Duration::from_millis(10);
    let (bob, _bob_key, _) = enroll_user(&bed, "bob@example.com", UserProfile::Standard, t1).await;

    let t2 = t1 + Duration::from_millis(10);
    let realm_id = create_realm(&bed, t2).await;
    let t3 = t2 + Duration::from_millis(10);
    let share = role_certificate(
        &bed.alice,
        &bed.alice_key,
        realm_id,
        bob.user_id,
        Some(RealmRole::Reader),
        t3,
    );
    bed.backend
        .realm
        .share(&bed.alice, &share, 0, b"access".to_vec())
        .await
        .unwrap();

    let vlob_id = VlobId::new();
    let t4 = t3 + Duration::from_millis(10);
    bed.backend
        .vlob
        .create(&bed.alice, realm_id, vlob_id, 0, t4, b"payload".to_vec(), None)
        .await
        .unwrap();

    let batch = bed
        .backend
        .vlob
        .read_batch(&bob, realm_id, &[(vlob_id, None)])
        .await
        .unwrap();
    assert!(batch.items[0].is_some());

    let t5 = t4 + Duration::from_millis(10);
    let unshare = role_certificate(&bed.alice, &bed.alice_key, realm_id, bob.user_id, None, t5);
    bed.backend.realm.unshare(&bed.alice, &unshare).await.unwrap();

    assert_matches!(
        bed.backend
            .vlob
            .read_batch(&bob, realm_id, &[(vlob_id, None)])
            .await,
        Err(ReadVlobError::AuthorNotAllowed)
    );
}

fn code_not_valid_at(secret: &[u8], now: Timestamp) -> String {
    let step = Duration::from_secs(30);
    let valid = [
        compute_one_time_password(secret, now - step),
        compute_one_time_password(secret, now),
        compute_one_time_password(secret, now + step),
    ];
    ["000000", "111111", "222222", "333333"]
        .iter()
        .find(|candidate| !valid.iter().any(|v| v == *candidate))
        .map(|candidate| (*candidate).to_owned())
        .unwrap()
}

#[tokio::test]
async fn totp_throttles_after_repeated_failures_and_recovers() {
    let bed = bootstrap_backend("ScenarioTotp", CreateOrganizationParams::default()).await;
    let totp = &bed.backend.totp;
    let now = Timestamp::now();

    let secret = totp.setup_get_secret(&bed.alice);
    totp.setup_confirm(&bed.alice, &compute_one_time_password(&secret, now), now)
        .unwrap();
    totp.create_opaque_key(&bed.alice, b"opaque".to_vec()).unwrap();

    let wrong = code_not_valid_at(&secret, now);
    for _ in 0..5 {
        assert_matches!(
            totp.fetch_opaque_key(&bed.alice, &wrong, now),
            Err(TotpError::InvalidOneTimePassword)
        );
    }
    // The fifth failure armed the throttle: even a correct code is
    // refused until the deadline
    let good = compute_one_time_password(&secret, now);
    let wait_until = match totp.fetch_opaque_key(&bed.alice, &good, now) {
        Err(TotpError::Throttled { wait_until }) => wait_until,
        other => panic!("expected throttled, got {other:?}"),
    };
    assert!(wait_until > now);

    let later = wait_until;
    let key = totp
        .fetch_opaque_key(&bed.alice, &compute_one_time_password(&secret, later), later)
        .unwrap();
    assert_eq!(key, b"opaque");

    // Success cleared the failure counter: one more wrong code is a
    // plain rejection, not a throttle
    assert_matches!(
        totp.fetch_opaque_key(&bed.alice, &code_not_valid_at(&secret, later), later),
        Err(TotpError::InvalidOneTimePassword)
    );
}

#[tokio::test]
async fn active_users_limit_blocks_enrollment() {
    let bed = bootstrap_backend(
        "ScenarioUserLimit",
        CreateOrganizationParams {
            active_users_limit: Some(ActiveUsersLimit::LimitedTo(1)),
            ..Default::default()
        },
    )
    .await;

    let timestamp = bed.bootstrap_timestamp + Duration::from_millis(10);
    let (_, _, _, raws) = signed_user_and_device(
        CertificateAuthor::Device(bed.alice.device_id.clone()),
        &bed.alice_key,
        "bob@example.com",
        UserProfile::Standard,
        timestamp,
    );
    assert_matches!(
        bed.backend
            .user
            .create_user(&bed.alice, &raws[0], &raws[1], &raws[2], &raws[3])
            .await,
        Err(CreateUserError::ActiveUsersLimitReached)
    );
}

#[tokio::test]
async fn shamir_setup_streams_to_participants_and_retires_on_delete() {
    let bed = bootstrap_backend("ScenarioShamir", CreateOrganizationParams::default()).await;
    let t1 = bed.bootstrap_timestamp + Duration::from_millis(10);
    let (bob, _, _) = enroll_user(&bed, "bob@example.com", UserProfile::Standard, t1).await;
    let t2 = t1 + Duration::from_millis(10);
    let (carol, _, _) = enroll_user(&bed, "carol@example.com", UserProfile::Standard, t2).await;

    let t3 = t2 + Duration::from_millis(10);
    let brief = ShamirRecoveryBriefCertificate {
        author: CertificateAuthor::Device(bed.alice.device_id.clone()),
        timestamp: t3,
        user_id: bed.alice.user_id,
        threshold: 1,
        per_recipient_shares: [(bob.user_id, 1)].into(),
    };
    let brief_raw = brief.dump_and_sign(&bed.alice_key);
    let shares = HashMap::from([(bob.user_id, b"share-for-bob".to_vec())]);
    bed.backend
        .shamir
        .setup(
            &bed.alice,
            b"ciphered".to_vec(),
            InvitationToken::new(),
            &brief_raw,
            shares.clone(),
        )
        .await
        .unwrap();

    // The recipient sees the brief; a bystander sees nothing
    let bundles = bed
        .backend
        .user
        .certificate_get(&bob, None, None, None, &HashMap::new())
        .await;
    assert_eq!(bundles.shamir_recovery, vec![brief_raw.clone()]);
    let bundles = bed
        .backend
        .user
        .certificate_get(&carol, None, None, None, &HashMap::new())
        .await;
    assert!(bundles.shamir_recovery.is_empty());

    // Only one setup may be in force
    let t4 = t3 + Duration::from_millis(10);
    let second = ShamirRecoveryBriefCertificate {
        timestamp: t4,
        ..brief.clone()
    }
    .dump_and_sign(&bed.alice_key);
    assert_matches!(
        bed.backend
            .shamir
            .setup(
                &bed.alice,
                b"ciphered".to_vec(),
                InvitationToken::new(),
                &second,
                shares,
            )
            .await,
        Err(SetupShamirError::AlreadyExists(RequireGreaterTimestamp {
            strictly_greater_than,
        })) if strictly_greater_than == t3
    );

    let t5 = t4 + Duration::from_millis(10);
    let deletion_raw = ShamirRecoveryDeletionCertificate {
        author: CertificateAuthor::Device(bed.alice.device_id.clone()),
        timestamp: t5,
        setup_to_delete_user_id: bed.alice.user_id,
        setup_to_delete_timestamp: t3,
        share_recipients: vec![bob.user_id],
    }
    .dump_and_sign(&bed.alice_key);
    bed.backend.shamir.delete(&bed.alice, &deletion_raw).await.unwrap();

    // The deletion joins the stream; retiring twice is refused
    let bundles = bed
        .backend
        .user
        .certificate_get(&bob, None, None, None, &HashMap::new())
        .await;
    assert_eq!(bundles.shamir_recovery, vec![brief_raw, deletion_raw]);
    let t6 = t5 + Duration::from_millis(10);
    let again = ShamirRecoveryDeletionCertificate {
        author: CertificateAuthor::Device(bed.alice.device_id.clone()),
        timestamp: t6,
        setup_to_delete_user_id: bed.alice.user_id,
        setup_to_delete_timestamp: t3,
        share_recipients: vec![bob.user_id],
    }
    .dump_and_sign(&bed.alice_key);
    assert_matches!(
        bed.backend.shamir.delete(&bed.alice, &again).await,
        Err(DeleteShamirError::AlreadyDeleted(RequireGreaterTimestamp {
            strictly_greater_than,
        })) if strictly_greater_than == t5
    );
}

#[tokio::test]
async fn sequester_services_require_the_bootstrap_authority() {
    // Not sequestered: no authority, no services
    let plain = bootstrap_backend("ScenarioNoSequester", CreateOrganizationParams::default()).await;
    assert_matches!(
        plain
            .backend
            .organization
            .create_sequester_service(plain.organization.id(), b"whatever")
            .await,
        Err(CreateSequesterServiceError::NotSequestered)
    );

    // Sequestered organization: bootstrap carries the authority
    let backend = Backend::in_memory(ServerConfig::default());
    let organization_id: OrganizationId = "ScenarioSequester".parse().unwrap();
    let token = backend
        .organization
        .create(organization_id.clone(), CreateOrganizationParams::default())
        .unwrap();
    let organization = backend.store.organization(&organization_id).unwrap();

    let root_key = SigningKey::generate();
    let authority_key = SigningKey::generate();
    let bootstrap_timestamp = Timestamp::now();
    let (alice_id, _, _, [user, redacted_user, device, redacted_device]) = signed_user_and_device(
        CertificateAuthor::Root,
        &root_key,
        "alice@example.com",
        UserProfile::Admin,
        bootstrap_timestamp,
    );
    let authority_raw = SequesterAuthorityCertificate {
        author: CertificateAuthor::Root,
        timestamp: bootstrap_timestamp,
        verify_key_der: ByteBuf::from(authority_key.verify_key().to_bytes().to_vec()),
    }
    .dump_and_sign(&root_key);
    backend
        .organization
        .bootstrap(
            &organization,
            Some(token),
            root_key.verify_key(),
            &user,
            &redacted_user,
            &device,
            &redacted_device,
            Some(&authority_raw),
        )
        .await
        .unwrap();

    let t1 = bootstrap_timestamp + Duration::from_millis(10);
    let service_id = SequesterServiceId::new();
    let service = SequesterServiceCertificate {
        author: CertificateAuthor::Root,
        timestamp: t1,
        service_id,
        service_label: "Escrow".to_owned(),
        encryption_key_der: ByteBuf::from(vec![0u8; 32]),
    };
    // Signed by the root key instead of the authority: refused
    assert_matches!(
        backend
            .organization
            .create_sequester_service(&organization_id, &service.dump_and_sign(&root_key))
            .await,
        Err(CreateSequesterServiceError::InvalidCertificate)
    );
    let service_raw = service.dump_and_sign(&authority_key);
    let created = backend
        .organization
        .create_sequester_service(&organization_id, &service_raw)
        .await
        .unwrap();
    assert_eq!(created, service_id);

    // Same service id again, later timestamp: still refused
    let t2 = t1 + Duration::from_millis(10);
    let resubmit = SequesterServiceCertificate {
        timestamp: t2,
        ..service
    }
    .dump_and_sign(&authority_key);
    assert_matches!(
        backend
            .organization
            .create_sequester_service(&organization_id, &resubmit)
            .await,
        Err(CreateSequesterServiceError::ServiceAlreadyExists)
    );

    // Both sequester certificates reach the authenticated stream
    let alice = AuthenticatedContext {
        organization: organization.clone(),
        device_id: DeviceId::new(alice_id, "dev1".parse().unwrap()),
        user_id: alice_id,
        profile: UserProfile::Admin,
    };
    let bundles = backend
        .user
        .certificate_get(&alice, None, None, None, &HashMap::new())
        .await;
    assert_eq!(bundles.sequester, vec![authority_raw, service_raw]);
}

#[tokio::test]
async fn rejected_block_create_leaves_no_payload_behind() {
    let bed = bootstrap_backend("ScenarioBlockSquat", CreateOrganizationParams::default()).await;
    let t1 = bed.bootstrap_timestamp + Duration::from_millis(10);
    let (bob, _, _) = enroll_user(&bed, "bob@example.com", UserProfile::Standard, t1).await;
    let t2 = t1 + Duration::from_millis(10);
    let realm_id = create_realm(&bed, t2).await;

    // Bob holds no role in the realm: his bytes must never reach the
    // first-write-wins blockstore under this id
    let block_id = BlockId::new();
    assert_matches!(
        bed.backend
            .block
            .create(&bob, realm_id, block_id, 0, b"squatted".to_vec())
            .await,
        Err(CreateBlockError::AuthorNotAllowed)
    );

    bed.backend
        .block
        .create(&bed.alice, realm_id, block_id, 0, b"legit".to_vec())
        .await
        .unwrap();
    let read = bed.backend.block.read(&bed.alice, block_id).await.unwrap();
    assert_eq!(read.payload, b"legit");
}

#[tokio::test]
async fn sharing_with_a_frozen_recipient_is_refused() {
    let bed = bootstrap_backend("ScenarioFrozenShare", CreateOrganizationParams::default()).await;
    let t1 = bed.bootstrap_timestamp + Duration::from_millis(10);
    let (bob, _, _) = enroll_user(&bed, "bob@example.com", UserProfile::Standard, t1).await;
    let t2 = t1 + Duration::from_millis(10);
    let realm_id = create_realm(&bed, t2).await;

    bed.backend
        .user
        .freeze_user(bed.organization.id(), Some(bob.user_id), None, true)
        .unwrap();

    let t3 = t2 + Duration::from_millis(10);
    let share = role_certificate(
        &bed.alice,
        &bed.alice_key,
        realm_id,
        bob.user_id,
        Some(RealmRole::Reader),
        t3,
    );
    assert_matches!(
        bed.backend
            .realm
            .share(&bed.alice, &share, 0, b"access".to_vec())
            .await,
        Err(ShareRealmError::RecipientFrozen)
    );

    // Thawed, the same certificate goes through
    bed.backend
        .user
        .freeze_user(bed.organization.id(), Some(bob.user_id), None, false)
        .unwrap();
    bed.backend
        .realm
        .share(&bed.alice, &share, 0, b"access".to_vec())
        .await
        .unwrap();
}

#[tokio::test]
async fn revocation_is_bounded_by_the_targets_own_vlob_writes() {
    let bed = bootstrap_backend("ScenarioRevokeBound", CreateOrganizationParams::default()).await;
    let t1 = bed.bootstrap_timestamp + Duration::from_millis(10);
    let (bob, _, _) = enroll_user(&bed, "bob@example.com", UserProfile::Standard, t1).await;
    let t2 = t1 + Duration::from_millis(10);
    let realm_id = create_realm(&bed, t2).await;
    let t3 = t2 + Duration::from_millis(10);
    let share = role_certificate(
        &bed.alice,
        &bed.alice_key,
        realm_id,
        bob.user_id,
        Some(RealmRole::Contributor),
        t3,
    );
    bed.backend
        .realm
        .share(&bed.alice, &share, 0, b"access".to_vec())
        .await
        .unwrap();

    let t4 = t3 + Duration::from_millis(10);
    bed.backend
        .vlob
        .create(&bob, realm_id, VlobId::new(), 0, t4, b"from-bob".to_vec(), None)
        .await
        .unwrap();
    let t6 = t4 + Duration::from_millis(20);
    bed.backend
        .vlob
        .create(&bed.alice, realm_id, VlobId::new(), 0, t6, b"from-alice".to_vec(), None)
        .await
        .unwrap();

    // A revocation not newer than bob's last write loses the race
    let stale = RevokedUserCertificate {
        author: CertificateAuthor::Device(bed.alice.device_id.clone()),
        timestamp: t4,
        user_id: bob.user_id,
    }
    .dump_and_sign(&bed.alice_key);
    assert_matches!(
        bed.backend.user.revoke_user(&bed.alice, &stale).await,
        Err(RevokeUserError::Timestamp(TimestampError::RequireGreater(
            RequireGreaterTimestamp {
                strictly_greater_than,
            },
        ))) if strictly_greater_than == t4
    );

    // Alice's own later write does not shield bob: the bound is the
    // target's writes, not the realm's
    let t5 = t4 + Duration::from_millis(10);
    let revoke = RevokedUserCertificate {
        author: CertificateAuthor::Device(bed.alice.device_id.clone()),
        timestamp: t5,
        user_id: bob.user_id,
    }
    .dump_and_sign(&bed.alice_key);
    let revoked = bed
        .backend
        .user
        .revoke_user(&bed.alice, &revoke)
        .await
        .unwrap();
    assert_eq!(revoked, bob.user_id);
}

#[tokio::test]
async fn export_pages_deterministically_below_the_snapshot() {
    let bed = bootstrap_backend("ScenarioExport", CreateOrganizationParams::default()).await;
    let t1 = bed.bootstrap_timestamp + Duration::from_millis(10);
    let realm_id = create_realm(&bed, t1).await;

    for offset in [20, 30, 40] {
        let timestamp = t1 + Duration::from_millis(offset);
        bed.backend
            .vlob
            .create(
                &bed.alice,
                realm_id,
                VlobId::new(),
                0,
                timestamp,
                b"atom".to_vec(),
                None,
            )
            .await
            .unwrap();
    }
    for _ in 0..2 {
        bed.backend
            .block
            .create(&bed.alice, realm_id, BlockId::new(), 0, b"data".to_vec())
            .await
            .unwrap();
    }

    let snapshot_timestamp = Timestamp::now() + Duration::from_secs(5);
    // The snapshot must lag the clock by the late ballpark offset
    assert_matches!(
        bed.backend.export.snapshot(
            bed.organization.id(),
            realm_id,
            snapshot_timestamp,
            snapshot_timestamp,
        ),
        Err(ExportError::SnapshotTooRecent { .. })
    );
    let far_now = snapshot_timestamp + Duration::from_secs(600);
    let snapshot = bed
        .backend
        .export
        .snapshot(bed.organization.id(), realm_id, snapshot_timestamp, far_now)
        .unwrap();
    assert_eq!(snapshot.vlob_upper_bound, 3);
    assert_eq!(snapshot.block_count, 2);

    // Vlob pages follow the checkpoint sequence exactly
    let first = bed
        .backend
        .export
        .vlob_batch(bed.organization.id(), &snapshot, 0, 2)
        .unwrap();
    let checkpoints: Vec<_> = first.iter().map(|item| item.checkpoint).collect();
    assert_eq!(checkpoints, vec![1, 2]);
    let second = bed
        .backend
        .export
        .vlob_batch(bed.organization.id(), &snapshot, 2, 2)
        .unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].checkpoint, 3);
    assert!(bed
        .backend
        .export
        .vlob_batch(bed.organization.id(), &snapshot, 3, 2)
        .unwrap()
        .is_empty());

    // Block pages are stable across runs
    let page_a = bed
        .backend
        .export
        .block_batch(bed.organization.id(), &snapshot, 0, 1)
        .unwrap();
    let page_b = bed
        .backend
        .export
        .block_batch(bed.organization.id(), &snapshot, 1, 5)
        .unwrap();
    assert_eq!(page_a.len(), 1);
    assert_eq!(page_b.len(), 1);
    assert_ne!(page_a[0].block_id, page_b[0].block_id);
    let replay = bed
        .backend
        .export
        .block_batch(bed.organization.id(), &snapshot, 0, 1)
        .unwrap();
    assert_eq!(replay[0].block_id, page_a[0].block_id);
}

#[tokio::test]
async fn outsiders_receive_redacted_certificates() {
    let bed = bootstrap_backend("ScenarioOutsider", CreateOrganizationParams::default()).await;
    let timestamp = bed.bootstrap_timestamp + Duration::from_millis(10);
    let (bob, _, [full_user, redacted_user, _, _]) =
        enroll_user(&bed, "bob@example.com", UserProfile::Outsider, timestamp).await;

    let bundles = bed
        .backend
        .user
        .certificate_get(&bob, None, None, None, &HashMap::new())
        .await;
    // Bootstrap user+device, bob's user+device
    assert_eq!(bundles.common.len(), 4);
    assert!(bundles.common.iter().any(|raw| *raw == redacted_user));
    assert!(!bundles.common.iter().any(|raw| *raw == full_user));

    // An ADMIN sees the full forms
    let bundles = bed
        .backend
        .user
        .certificate_get(&bed.alice, None, None, None, &HashMap::new())
        .await;
    assert!(bundles.common.iter().any(|raw| *raw == full_user));
}
