use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::models::{ActiveUser, ServerMessage};

/// Close codes the server puts on a lesson channel.
pub mod close_code {
    pub const GOING_AWAY: u16 = 1001;
    pub const REPLACED: u16 = 4000;
    pub const UNAUTHORIZED: u16 = 4001;
    pub const EXPIRED: u16 = 4002;
    pub const OVERFLOW: u16 = 4003;
}

/// One frame queued for a session's socket writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The outbound queue is full; the peer is not keeping up.
    Full,
    /// The socket writer is gone.
    Closed,
}

/// Server side of one connection: a bounded queue drained by the socket writer.
#[derive(Debug)]
pub struct SessionChannel {
    conn_id: Uuid,
    tx: mpsc::Sender<Outbound>,
}

impl SessionChannel {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { conn_id: Uuid::new_v4(), tx }, rx)
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// A handle that can answer the connection directly without keeping it alive.
    pub fn replier(&self) -> SessionReplier {
        SessionReplier { tx: self.tx.downgrade() }
    }

    pub fn deliver(&self, text: String) -> Delivery {
        match self.tx.try_send(Outbound::Text(text)) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Best effort: a full queue still ends the connection once the session is dropped.
    pub fn close(&self, code: u16, reason: &'static str) {
        let _ = self.tx.try_send(Outbound::Close { code, reason });
    }
}

/// Weak sender used by a connection's read loop for direct replies (`pong`, `active_users`).
#[derive(Debug, Clone)]
pub struct SessionReplier {
    tx: mpsc::WeakSender<Outbound>,
}

impl SessionReplier {
    pub fn send(&self, msg: &ServerMessage) -> Delivery {
        let Some(tx) = self.tx.upgrade() else {
            return Delivery::Closed;
        };
        let text = match msg.to_json() {
            Ok(text) => text,
            Err(_) => return Delivery::Closed,
        };
        match tx.try_send(Outbound::Text(text)) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// One authenticated connection admitted to a room.
#[derive(Debug)]
pub struct Session {
    pub user_id: String,
    pub user_name: String,
    pub connected_at: DateTime<Utc>,
    last_seen: Instant,
    pub channel: SessionChannel,
}

impl Session {
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>, channel: SessionChannel, now: Instant) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            connected_at: Utc::now(),
            last_seen: now,
            channel,
        }
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Refresh `last_seen`; never moves it backwards.
    pub fn touch(&mut self, now: Instant) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > ttl
    }

    pub fn active_user(&self) -> ActiveUser {
        ActiveUser {
            user_id: self.user_id.clone(),
            user_name: self.user_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_seen_is_monotonic() {
        let start = Instant::now();
        let (channel, _rx) = SessionChannel::new(4);
        let mut session = Session::new("u1", "Ann", channel, start + Duration::from_secs(5));
        session.touch(start);
        assert_eq!(session.last_seen(), start + Duration::from_secs(5));
        session.touch(start + Duration::from_secs(9));
        assert_eq!(session.last_seen(), start + Duration::from_secs(9));
    }

    #[test]
    fn expiry_is_strictly_past_the_ttl() {
        let start = Instant::now();
        let (channel, _rx) = SessionChannel::new(4);
        let session = Session::new("u1", "Ann", channel, start);
        let ttl = Duration::from_secs(30);
        assert!(!session.is_expired(start + ttl, ttl));
        assert!(session.is_expired(start + ttl + Duration::from_millis(1), ttl));
    }

    #[test]
    fn full_and_closed_queues_are_reported() {
        let (channel, rx) = SessionChannel::new(1);
        assert_eq!(channel.deliver("a".into()), Delivery::Queued);
        assert_eq!(channel.deliver("b".into()), Delivery::Full);
        drop(rx);
        assert_eq!(channel.deliver("c".into()), Delivery::Closed);
    }

    #[test]
    fn replier_does_not_keep_the_channel_alive() {
        let (channel, mut rx) = SessionChannel::new(4);
        let replier = channel.replier();
        assert_eq!(replier.send(&ServerMessage::Pong), Delivery::Queued);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Text(r#"{"type":"pong"}"#.to_string()));

        drop(channel);
        assert_eq!(replier.send(&ServerMessage::Pong), Delivery::Closed);
        assert!(rx.try_recv().is_err());
    }
}
