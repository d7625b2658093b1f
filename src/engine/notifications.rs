use serde::{Deserialize, Serialize};

/// Errors raised while encoding or decoding notification bodies
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unknown notification type")]
    UnknownType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationType {
    Invitation,
}

/// One path subtree referenced by an invitation, with everything needed to
/// reach it: the replica-group id, the bucket root key, the bucket name, and
/// the in-bucket path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationPath {
    pub db_id: String,
    pub bucket_key: String,
    pub bucket: String,
    pub path: String,
}

/// A grant sharing path subtrees with another identity, delivered inside a
/// sealed mailbox message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub invitation_id: String,
    pub inviter_public_key: String,
    pub invitee_public_key: String,
    pub item_paths: Vec<InvitationPath>,
}

/// A decrypted, classified mailbox message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: String,
    pub from: String,
    pub created_at: u64,
    pub notification_type: NotificationType,
    /// Set when `notification_type` is `Invitation`
    pub invitation: Option<Invitation>,
}

/// Wire shape of every notification body: `{ "type": ..., "body": ... }`
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: NotificationType,
    body: serde_json::Value,
}

/// Encode an invitation into the notification wire form
pub fn encode_invitation(invitation: &Invitation) -> Result<Vec<u8>, NotificationError> {
    let wire = WireMessage {
        kind: NotificationType::Invitation,
        body: serde_json::to_value(invitation)?,
    };
    Ok(serde_json::to_vec(&wire)?)
}

/// Classify a decrypted message body
pub fn decode_body(body: &[u8]) -> Result<(NotificationType, Option<Invitation>), NotificationError> {
    let wire: WireMessage = serde_json::from_slice(body)?;
    match wire.kind {
        NotificationType::Invitation => {
            let invitation: Invitation = serde_json::from_value(wire.body)?;
            Ok((NotificationType::Invitation, Some(invitation)))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn invitation() -> Invitation {
        Invitation {
            invitation_id: "inv-1".to_string(),
            inviter_public_key: "inviter-pk".to_string(),
            invitee_public_key: "invitee-pk".to_string(),
            item_paths: vec![InvitationPath {
                db_id: "db-1".to_string(),
                bucket_key: "bk-1".to_string(),
                bucket: "personal".to_string(),
                path: "/shared/report.pdf".to_string(),
            }],
        }
    }

    #[test]
    fn test_invitation_wire_roundtrip() {
        let encoded = encode_invitation(&invitation()).unwrap();
        let (kind, decoded) = decode_body(&encoded).unwrap();
        assert_eq!(kind, NotificationType::Invitation);
        assert_eq!(decoded.unwrap(), invitation());
    }

    #[test]
    fn test_wire_shape() {
        let encoded = encode_invitation(&invitation()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value["type"], "invitation");
        assert_eq!(value["body"]["invitationId"], "inv-1");
        assert_eq!(value["body"]["itemPaths"][0]["dbId"], "db-1");
    }

    #[test]
    fn test_garbage_body_rejected() {
        assert!(decode_body(b"not json").is_err());
        assert!(decode_body(b"{\"type\":\"unheard-of\",\"body\":{}}").is_err());
    }
}
