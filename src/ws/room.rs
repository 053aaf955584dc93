use chrono::Utc;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::error;
use uuid::Uuid;

use crate::models::{ActiveUser, PresenceAction, PresenceMessage, ServerMessage};
use super::session::{Delivery, Session};

/// The sessions collaborating on one lesson, keyed by user id.
///
/// A user appears at most once; a newer connection replaces the older one.
#[derive(Debug)]
pub struct Room {
    document_id: String,
    sessions: BTreeMap<String, Session>,
}

impl Room {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            sessions: BTreeMap::new(),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn session(&self, user_id: &str) -> Option<&Session> {
        self.sessions.get(user_id)
    }

    /// Returns the session this one replaced, if any.
    pub fn insert(&mut self, session: Session) -> Option<Session> {
        self.sessions.insert(session.user_id.clone(), session)
    }

    pub fn remove(&mut self, user_id: &str) -> Option<Session> {
        self.sessions.remove(user_id)
    }

    /// Remove `user_id` only while `conn_id` is still its live connection.
    pub fn remove_connection(&mut self, user_id: &str, conn_id: Uuid) -> Option<Session> {
        match self.sessions.get(user_id) {
            Some(session) if session.channel.conn_id() == conn_id => self.sessions.remove(user_id),
            _ => None,
        }
    }

    pub fn touch(&mut self, user_id: &str, conn_id: Uuid, now: Instant) -> bool {
        match self.sessions.get_mut(user_id) {
            Some(session) if session.channel.conn_id() == conn_id => {
                session.touch(now);
                true
            }
            _ => false,
        }
    }

    pub fn expired(&self, now: Instant, ttl: Duration) -> Vec<String> {
        self.sessions
            .values()
            .filter(|s| s.is_expired(now, ttl))
            .map(|s| s.user_id.clone())
            .collect()
    }

    pub fn active_users(&self, excluding: Option<&str>) -> Vec<ActiveUser> {
        self.sessions
            .values()
            .filter(|s| Some(s.user_id.as_str()) != excluding)
            .map(Session::active_user)
            .collect()
    }

    /// Send every session its own presence snapshot (which never lists itself).
    ///
    /// Returns the user ids whose delivery failed.
    pub fn broadcast_presence(&self, action: PresenceAction, user_id: &str, user_name: &str) -> Vec<String> {
        let timestamp = Utc::now();
        let mut failed = Vec::new();
        for session in self.sessions.values() {
            let msg = ServerMessage::Presence(PresenceMessage {
                action: Some(action),
                user_id: Some(user_id.to_string()),
                user_name: Some(user_name.to_string()),
                timestamp: Some(timestamp),
                active_users: self.active_users(Some(&session.user_id)),
            });
            let text = match msg.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode presence for {}: {}", self.document_id, e);
                    continue;
                }
            };
            if session.channel.deliver(text) != Delivery::Queued {
                failed.push(session.user_id.clone());
            }
        }
        failed
    }

    /// Send `msg` to every session except `from_user_id`.
    ///
    /// Returns the user ids whose delivery failed.
    pub fn relay(&self, from_user_id: &str, msg: &ServerMessage) -> Vec<String> {
        let text = match msg.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode relay for {}: {}", self.document_id, e);
                return Vec::new();
            }
        };
        self.sessions
            .values()
            .filter(|s| s.user_id != from_user_id)
            .filter(|s| s.channel.deliver(text.clone()) != Delivery::Queued)
            .map(|s| s.user_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::session::{Outbound, SessionChannel};
    use tokio::sync::mpsc::Receiver;

    fn join(room: &mut Room, user_id: &str) -> (Uuid, Receiver<Outbound>) {
        let (channel, rx) = SessionChannel::new(8);
        let conn_id = channel.conn_id();
        room.insert(Session::new(user_id, user_id.to_uppercase(), channel, Instant::now()));
        (conn_id, rx)
    }

    fn presence_of(rx: &mut Receiver<Outbound>) -> Vec<String> {
        match rx.try_recv().unwrap() {
            Outbound::Text(text) => match ServerMessage::parse(&text).unwrap() {
                ServerMessage::Presence(p) => p.active_users.into_iter().map(|u| u.user_id).collect(),
                other => panic!("expected presence, got {:?}", other),
            },
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn presence_snapshot_excludes_the_recipient() {
        let mut room = Room::new("L1");
        let (_, mut a) = join(&mut room, "a");
        let (_, mut b) = join(&mut room, "b");
        let (_, mut c) = join(&mut room, "c");

        assert!(room.broadcast_presence(PresenceAction::Joined, "c", "C").is_empty());
        assert_eq!(presence_of(&mut a), vec!["b", "c"]);
        assert_eq!(presence_of(&mut b), vec!["a", "c"]);
        assert_eq!(presence_of(&mut c), vec!["a", "b"]);
    }

    #[test]
    fn relay_skips_the_sender() {
        let mut room = Room::new("L1");
        let (_, mut a) = join(&mut room, "a");
        let (_, mut b) = join(&mut room, "b");

        assert!(room.relay("a", &ServerMessage::Pong).is_empty());
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_ok());
    }

    #[test]
    fn stale_connection_cannot_remove_its_replacement() {
        let mut room = Room::new("L1");
        let (old_conn, _old_rx) = join(&mut room, "a");
        let (new_conn, _new_rx) = join(&mut room, "a");
        assert_eq!(room.len(), 1);

        assert!(room.remove_connection("a", old_conn).is_none());
        assert!(!room.touch("a", old_conn, Instant::now()));
        assert!(room.remove_connection("a", new_conn).is_some());
        assert!(room.is_empty());
    }

    #[test]
    fn failed_deliveries_are_reported() {
        let mut room = Room::new("L1");
        let (_, _a) = join(&mut room, "a");
        let (_, b) = join(&mut room, "b");
        drop(b);
        assert_eq!(room.relay("a", &ServerMessage::Pong), vec!["b".to_string()]);
    }
}
