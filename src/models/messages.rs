use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One entry of a presence snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUser {
    pub user_id: String,
    pub user_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingMessage {
    pub section_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default = "default_true")]
    pub is_typing: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SectionFocusMessage {
    pub section_index: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EditMessage {
    pub section_index: u32,
    pub field: String,
    pub value: String,
    #[serde(default)]
    pub persist: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CursorMessage {
    pub position: CursorPosition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_index: Option<u32>,
}

/// Messages a client sends over the lesson channel.
///
/// Identity fields a client might add (`userId`, `userName`) are not part of
/// any payload and are ignored on decode; the server stamps the identity bound
/// at handshake time onto every relay.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "typing")]
    Typing(TypingMessage),
    #[serde(rename = "section_focus")]
    SectionFocus(SectionFocusMessage),
    #[serde(rename = "edit")]
    Edit(EditMessage),
    #[serde(rename = "cursor")]
    Cursor(CursorMessage),
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "get_active_users")]
    GetActiveUsers,
    /// Any kind this build does not know about.
    #[serde(other, skip_serializing)]
    Unknown,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Typing(_) => "typing",
            ClientMessage::SectionFocus(_) => "section_focus",
            ClientMessage::Edit(_) => "edit",
            ClientMessage::Cursor(_) => "cursor",
            ClientMessage::Ping => "ping",
            ClientMessage::GetActiveUsers => "get_active_users",
            ClientMessage::Unknown => "unknown",
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    Joined,
    Left,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<PresenceAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub active_users: Vec<ActiveUser>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUsersMessage {
    #[serde(alias = "users")]
    pub active_users: Vec<ActiveUser>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingRelay {
    pub user_id: String,
    pub user_name: String,
    pub section_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub is_typing: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SectionFocusRelay {
    pub user_id: String,
    pub user_name: String,
    pub section_index: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EditRelay {
    pub user_id: String,
    pub user_name: String,
    pub section_index: u32,
    pub field: String,
    pub value: String,
    #[serde(default)]
    pub persist: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CursorRelay {
    pub user_id: String,
    pub user_name: String,
    pub position: CursorPosition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_index: Option<u32>,
}

/// Messages the server sends over the lesson channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "presence")]
    Presence(PresenceMessage),
    #[serde(rename = "active_users")]
    ActiveUsers(ActiveUsersMessage),
    #[serde(rename = "typing")]
    Typing(TypingRelay),
    #[serde(rename = "section_focus")]
    SectionFocus(SectionFocusRelay),
    #[serde(rename = "edit")]
    Edit(EditRelay),
    #[serde(rename = "cursor")]
    Cursor(CursorRelay),
    #[serde(rename = "pong")]
    Pong,
    #[serde(other, skip_serializing)]
    Unknown,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Stamp the sender identity onto a relayable client message.
    ///
    /// Returns `None` for kinds that are never relayed to peers.
    pub fn relay_of(msg: &ClientMessage, user_id: &str, user_name: &str) -> Option<Self> {
        let user_id = user_id.to_string();
        let user_name = user_name.to_string();
        match msg {
            ClientMessage::Typing(m) => Some(ServerMessage::Typing(TypingRelay {
                user_id,
                user_name,
                section_index: m.section_index,
                field: m.field.clone(),
                is_typing: m.is_typing,
            })),
            ClientMessage::SectionFocus(m) => Some(ServerMessage::SectionFocus(SectionFocusRelay {
                user_id,
                user_name,
                section_index: m.section_index,
            })),
            ClientMessage::Edit(m) => Some(ServerMessage::Edit(EditRelay {
                user_id,
                user_name,
                section_index: m.section_index,
                field: m.field.clone(),
                value: m.value.clone(),
                persist: m.persist,
                timestamp: Some(Utc::now()),
            })),
            ClientMessage::Cursor(m) => Some(ServerMessage::Cursor(CursorRelay {
                user_id,
                user_name,
                position: m.position,
                section_index: m.section_index,
            })),
            ClientMessage::Ping | ClientMessage::GetActiveUsers | ClientMessage::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_client_kind_decodes_as_unknown() {
        let msg = ClientMessage::parse(r#"{"type":"lock_section","sectionIndex":1}"#).unwrap();
        assert_eq!(msg, ClientMessage::Unknown);
    }

    #[test]
    fn client_asserted_identity_is_ignored() {
        let msg = ClientMessage::parse(
            r#"{"type":"edit","userId":"mallory","sectionIndex":2,"field":"title","value":"x"}"#,
        )
        .unwrap();
        let relay = ServerMessage::relay_of(&msg, "u-b", "Bea").unwrap();
        match relay {
            ServerMessage::Edit(edit) => {
                assert_eq!(edit.user_id, "u-b");
                assert_eq!(edit.user_name, "Bea");
                assert!(!edit.persist);
            }
            other => panic!("unexpected relay {:?}", other),
        }
    }

    #[test]
    fn typing_defaults_to_true() {
        let msg = ClientMessage::parse(r#"{"type":"typing","sectionIndex":0}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Typing(TypingMessage { section_index: 0, field: None, is_typing: true })
        );
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(ClientMessage::parse(r#"{"type":"edit","sectionIndex":"two"}"#).is_err());
        assert!(ClientMessage::parse("not json").is_err());
    }

    #[test]
    fn active_users_accepts_users_alias() {
        let msg = ServerMessage::parse(
            r#"{"type":"active_users","users":[{"userId":"a","userName":"Ann"}]}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ServerMessage::ActiveUsers(ActiveUsersMessage {
                active_users: vec![ActiveUser { user_id: "a".into(), user_name: "Ann".into() }],
            })
        );
    }

    #[test]
    fn presence_uses_camel_case_keys() {
        let msg = ServerMessage::Presence(PresenceMessage {
            action: Some(PresenceAction::Joined),
            user_id: Some("a".into()),
            user_name: Some("Ann".into()),
            timestamp: None,
            active_users: vec![],
        });
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "presence");
        assert_eq!(json["action"], "joined");
        assert_eq!(json["userId"], "a");
        assert!(json["activeUsers"].as_array().unwrap().is_empty());
    }

    #[test]
    fn pings_are_not_relayed() {
        assert!(ServerMessage::relay_of(&ClientMessage::Ping, "a", "Ann").is_none());
        assert!(ServerMessage::relay_of(&ClientMessage::GetActiveUsers, "a", "Ann").is_none());
    }
}
