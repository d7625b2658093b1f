//! Integration tests for temp-identity access migration

mod common;

use std::sync::Arc;

use cask::crypto::SecretKey;
use cask::engine::{
    encode_invitation, AccessRole, ContentBackend, Invitation, InvitationPath, Mailbox,
    MemoryContentBackend, MemoryMessaging, Messaging,
};
use cask::identity::{CredentialIssuer, Identity, MemoryCredentialIssuer};
use cask::catalog::MemoryReplicaStore;

async fn authed(secret: SecretKey) -> Identity {
    let auth = MemoryCredentialIssuer.issue(&secret).await.unwrap();
    Identity::with_auth(secret, auth)
}

/// Inviter shares `/shared/report.pdf` in their bucket with the temp
/// identity: grants it admin and queues an invitation in its mailbox.
async fn stage_invitation(
    inviter_env: &common::TestEnv,
    temp_identity: &Identity,
) -> InvitationPath {
    use cask::engine::{AddItemsFile, AddItemsRequest, UploadEvent};

    let request = AddItemsRequest {
        bucket: "personal".to_string(),
        files: vec![AddItemsFile {
            path: "/shared/report.pdf".to_string(),
            data: b"report".to_vec(),
            mime_type: None,
            progress: None,
        }],
    };
    let rx = inviter_env.engine.add_items(request).await.unwrap();
    while let Ok(event) = rx.recv_async().await {
        if let UploadEvent::Done(_) = event {
            break;
        }
    }

    let bucket = inviter_env
        .engine
        .get_or_create_bucket("personal")
        .await
        .unwrap();

    let item_path = InvitationPath {
        db_id: bucket.metadata.db_id.clone(),
        bucket_key: bucket.root.key.clone(),
        bucket: "personal".to_string(),
        path: "/shared/report.pdf".to_string(),
    };

    let invitation = Invitation {
        invitation_id: "inv-1".to_string(),
        inviter_public_key: inviter_env.identity.public_key_hex(),
        invitee_public_key: temp_identity.public_key_hex(),
        item_paths: vec![item_path.clone()],
    };

    let inviter_mailbox = Mailbox::create(
        inviter_env.identity.clone(),
        Arc::new(inviter_env.messaging.clone()) as Arc<dyn Messaging>,
    )
    .await
    .unwrap();
    inviter_mailbox
        .send_message(
            &temp_identity.public(),
            &encode_invitation(&invitation).unwrap(),
        )
        .await
        .unwrap();

    item_path
}

#[tokio::test]
async fn test_invitation_roles_transfer_to_permanent_identity() {
    let replica = MemoryReplicaStore::new();
    let backend = MemoryContentBackend::new();
    let messaging = MemoryMessaging::new();

    let inviter = common::setup_on(replica.clone(), backend.clone(), messaging.clone()).await;
    let permanent = common::setup_on(replica, backend.clone(), messaging.clone()).await;

    let temp_secret = SecretKey::generate();
    let temp_identity = authed(temp_secret.clone()).await;
    let item_path = stage_invitation(&inviter, &temp_identity).await;

    permanent
        .engine
        .sync_from_temp_key(&temp_secret.to_hex())
        .await
        .unwrap();

    // the permanent identity now holds admin, the temp identity is revoked
    let roles = backend
        .pull_path_access_roles(
            permanent.identity.auth().unwrap(),
            &item_path.bucket_key,
            &item_path.path,
        )
        .await
        .unwrap();
    assert_eq!(
        roles.get(&permanent.identity.public_key_hex()),
        Some(&AccessRole::Admin)
    );
    assert_eq!(
        roles.get(&temp_identity.public_key_hex()),
        Some(&AccessRole::Unspecified)
    );

    // the temp mailbox is drained
    let temp_mailbox = Mailbox::create(
        temp_identity,
        Arc::new(messaging.clone()) as Arc<dyn Messaging>,
    )
    .await
    .unwrap();
    assert!(temp_mailbox.list_inbox_messages().await.unwrap().is_empty());

    // the forwarded invitation names the permanent identity as invitee
    let own_mailbox = Mailbox::create(
        permanent.identity.clone(),
        Arc::new(messaging) as Arc<dyn Messaging>,
    )
    .await
    .unwrap();
    let inbox = own_mailbox.list_inbox_messages().await.unwrap();
    assert_eq!(inbox.len(), 1);
    let (_, invitation) = cask::engine::decode_body(&inbox[0].body).unwrap();
    assert_eq!(
        invitation.unwrap().invitee_public_key,
        permanent.identity.public_key_hex()
    );
}

#[tokio::test]
async fn test_empty_temp_inbox_is_a_no_op() {
    let env = common::setup().await;

    let temp_secret = SecretKey::generate();
    env.engine
        .sync_from_temp_key(&temp_secret.to_hex())
        .await
        .unwrap();

    // nothing was forwarded
    let own_mailbox = Mailbox::create(
        env.identity.clone(),
        Arc::new(env.messaging.clone()) as Arc<dyn Messaging>,
    )
    .await
    .unwrap();
    assert!(own_mailbox.list_inbox_messages().await.unwrap().is_empty());
}
