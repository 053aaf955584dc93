//! Per-lesson room registry.
//!
//! Every mutation of a room happens under that room's lock and every delivery
//! is a non-blocking `try_send`, so broadcasts from one room reach each peer in
//! the order the hub processed them. Membership changes take the registry lock
//! first, then the room lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::Identity;
use crate::models::{ActiveUser, ActiveUsersMessage, ClientMessage, PresenceAction, ServerMessage};
use crate::services::lesson_store::LessonStore;
use super::room::Room;
use super::session::{close_code, Outbound, Session, SessionChannel};

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Grace period without inbound traffic before a session is evicted
    pub session_ttl: Duration,
    /// Bounded outbound queue per session
    pub outbound_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(30),
            outbound_queue_capacity: 256,
        }
    }
}

type RoomHandle = Arc<Mutex<Room>>;

/// One durable write waiting for the lesson store.
#[derive(Debug)]
struct PersistJob {
    document_id: String,
    section_index: u32,
    field: String,
    value: String,
}

/// Single writer in front of the lesson store, so writes land in relay order.
struct Persister {
    tx: mpsc::UnboundedSender<PersistJob>,
    task: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct RoomHub {
    config: HubConfig,
    rooms: Mutex<HashMap<String, RoomHandle>>,
    store: Arc<dyn LessonStore>,
    persister: Mutex<Option<Persister>>,
}

impl RoomHub {
    pub fn new(config: HubConfig, store: Arc<dyn LessonStore>) -> Self {
        Self {
            config,
            rooms: Mutex::new(HashMap::new()),
            store,
            persister: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// A fresh channel sized for this hub, plus the receiver its socket writer drains.
    pub fn open_channel(&self) -> (SessionChannel, mpsc::Receiver<Outbound>) {
        SessionChannel::new(self.config.outbound_queue_capacity)
    }

    pub fn room_count(&self) -> usize {
        lock(&self.rooms).len()
    }

    pub fn session_count(&self) -> usize {
        lock(&self.rooms).values().map(|room| lock(room).len()).sum()
    }

    fn room(&self, document_id: &str) -> Option<RoomHandle> {
        lock(&self.rooms).get(document_id).cloned()
    }

    /// Admit a session, replacing any previous connection of the same user,
    /// and send everyone in the room an updated presence snapshot.
    pub fn join(&self, document_id: &str, identity: &Identity, channel: SessionChannel) {
        let mut rooms = lock(&self.rooms);
        let handle = rooms
            .entry(document_id.to_string())
            .or_insert_with(|| {
                debug!("Opening room {}", document_id);
                Arc::new(Mutex::new(Room::new(document_id)))
            })
            .clone();
        let mut room = lock(&handle);

        let session = Session::new(&identity.user_id, &identity.user_name, channel, Instant::now());
        if let Some(previous) = room.insert(session) {
            info!(
                "User {} reconnected to {}, closing connection {}",
                identity.user_id,
                document_id,
                previous.channel.conn_id()
            );
            previous.channel.close(close_code::REPLACED, "Replaced by a newer session");
        } else {
            info!("User {} ({}) joined {}", identity.user_name, identity.user_id, document_id);
        }

        let failed = room.broadcast_presence(PresenceAction::Joined, &identity.user_id, &identity.user_name);
        Self::settle(&mut room, failed);

        if room.is_empty() {
            drop(room);
            rooms.remove(document_id);
        }
    }

    /// Remove the user's session, whatever connection it is on.
    pub fn leave(&self, document_id: &str, user_id: &str) -> bool {
        self.remove_where(document_id, |room| room.remove(user_id))
    }

    /// Remove the user's session only if `conn_id` is still its live connection.
    ///
    /// Used by connection teardown, so that an orphaned connection going away
    /// does not take its replacement with it.
    pub fn leave_connection(&self, document_id: &str, user_id: &str, conn_id: Uuid) -> bool {
        self.remove_where(document_id, |room| room.remove_connection(user_id, conn_id))
    }

    fn remove_where(&self, document_id: &str, remove: impl FnOnce(&mut Room) -> Option<Session>) -> bool {
        let mut rooms = lock(&self.rooms);
        let Some(handle) = rooms.get(document_id).cloned() else {
            return false;
        };
        let mut room = lock(&handle);

        let removed = match remove(&mut room) {
            Some(session) => {
                info!("User {} left {}", session.user_id, document_id);
                Self::announce_departure(&mut room, &session);
                true
            }
            None => false,
        };

        if room.is_empty() {
            debug!("Closing empty room {}", document_id);
            drop(room);
            rooms.remove(document_id);
        }
        removed
    }

    fn announce_departure(room: &mut Room, session: &Session) {
        let failed = room.broadcast_presence(PresenceAction::Left, &session.user_id, &session.user_name);
        Self::settle(room, failed);
    }

    /// Disconnect peers whose delivery failed and tell the rest, until every
    /// remaining peer has been reached.
    fn settle(room: &mut Room, mut failed: Vec<String>) {
        while let Some(user_id) = failed.pop() {
            if let Some(session) = room.remove(&user_id) {
                warn!(
                    "Dropping {} from {}: outbound queue full or closed",
                    user_id,
                    room.document_id()
                );
                session.channel.close(close_code::OVERFLOW, "Outbound queue overflow");
                failed.extend(room.broadcast_presence(PresenceAction::Left, &session.user_id, &session.user_name));
            }
        }
    }

    /// Drop a room that emptied outside of a membership change.
    fn prune(&self, document_id: &str) {
        let mut rooms = lock(&self.rooms);
        let empty = rooms
            .get(document_id)
            .map(|handle| lock(handle).is_empty())
            .unwrap_or(false);
        if empty {
            debug!("Closing empty room {}", document_id);
            rooms.remove(document_id);
        }
    }

    /// Record inbound traffic for a connection.
    pub fn touch(&self, document_id: &str, user_id: &str, conn_id: Uuid, now: Instant) -> bool {
        match self.room(document_id) {
            Some(handle) => lock(&handle).touch(user_id, conn_id, now),
            None => false,
        }
    }

    /// Relay an ephemeral or edit message to every other session in the room.
    ///
    /// The relay carries the identity bound at handshake, never one asserted by
    /// the client, and only the user's live connection `conn_id` may send.
    /// Edits flagged `persist` are additionally queued for the lesson store
    /// once the peers have been served.
    pub fn relay(&self, document_id: &str, from_user_id: &str, conn_id: Uuid, message: &ClientMessage) {
        let Some(handle) = self.room(document_id) else {
            debug!("Dropping {} for unknown room {}", message.kind(), document_id);
            return;
        };

        let now_empty = {
            let mut room = lock(&handle);
            let Some(sender) = room.session(from_user_id) else {
                debug!("Dropping {} from {} who is not in {}", message.kind(), from_user_id, document_id);
                return;
            };
            if sender.channel.conn_id() != conn_id {
                debug!("Dropping {} from replaced connection {} of {}", message.kind(), conn_id, from_user_id);
                return;
            }
            let Some(relay) = ServerMessage::relay_of(message, &sender.user_id, &sender.user_name) else {
                return;
            };

            let failed = room.relay(from_user_id, &relay);
            Self::settle(&mut room, failed);
            room.is_empty()
        };
        if now_empty {
            self.prune(document_id);
        }

        if let ClientMessage::Edit(edit) = message {
            if edit.persist {
                self.persist(document_id, edit.section_index, &edit.field, &edit.value);
            }
        }
    }

    fn persist(&self, document_id: &str, section_index: u32, field: &str, value: &str) {
        let job = PersistJob {
            document_id: document_id.to_string(),
            section_index,
            field: field.to_string(),
            value: value.to_string(),
        };

        let mut persister = lock(&self.persister);
        if persister.as_ref().map_or(true, |p| p.tx.is_closed()) {
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                error!("No runtime available to persist edit for {}", document_id);
                return;
            };
            let (tx, rx) = mpsc::unbounded_channel();
            let task = runtime.spawn(run_persister(self.store.clone(), rx));
            *persister = Some(Persister { tx, task });
        }
        if let Some(p) = persister.as_ref() {
            if let Err(e) = p.tx.send(job) {
                error!("Persist queue closed, dropping edit for {}", e.0.document_id);
            }
        }
    }

    /// Wait until every queued durable write has reached the store.
    pub async fn flush_persists(&self) {
        let persister = lock(&self.persister).take();
        if let Some(Persister { tx, task }) = persister {
            drop(tx);
            if let Err(e) = task.await {
                error!("Persist worker failed: {}", e);
            }
        }
    }

    /// Presence snapshot for a direct query, without the requester.
    pub fn get_active_users(&self, document_id: &str, requesting_user_id: &str) -> ServerMessage {
        let active_users = self
            .room(document_id)
            .map(|handle| lock(&handle).active_users(Some(requesting_user_id)))
            .unwrap_or_default();
        ServerMessage::ActiveUsers(ActiveUsersMessage { active_users })
    }

    /// Everyone currently in a lesson, for observers outside the channel.
    pub fn active_users(&self, document_id: &str) -> Vec<ActiveUser> {
        self.room(document_id)
            .map(|handle| lock(&handle).active_users(None))
            .unwrap_or_default()
    }

    /// Evict every session silent for longer than the TTL, exactly as if it had left.
    pub fn sweep(&self, now: Instant) -> usize {
        let ttl = self.config.session_ttl;
        let mut evicted = 0;
        let mut rooms = lock(&self.rooms);
        rooms.retain(|document_id, handle| {
            let mut room = lock(handle);
            for user_id in room.expired(now, ttl) {
                if let Some(session) = room.remove(&user_id) {
                    info!("Session of {} in {} expired", user_id, document_id);
                    session.channel.close(close_code::EXPIRED, "Session expired");
                    Self::announce_departure(&mut room, &session);
                    evicted += 1;
                }
            }
            !room.is_empty()
        });
        evicted
    }

    /// Close every session and forget every room.
    pub fn shutdown(&self) {
        let mut rooms = lock(&self.rooms);
        for (document_id, handle) in rooms.drain() {
            let room = lock(&handle);
            debug!("Closing room {} with {} sessions", document_id, room.len());
            for session in room.sessions() {
                session.channel.close(close_code::GOING_AWAY, "Server shutting down");
            }
        }
        info!("Room hub shut down");
    }
}

async fn run_persister(store: Arc<dyn LessonStore>, mut rx: mpsc::UnboundedReceiver<PersistJob>) {
    while let Some(job) = rx.recv().await {
        match store.persist_edit(&job.document_id, job.section_index, &job.field, &job.value).await {
            Ok(()) => debug!("Persisted {}#{}.{}", job.document_id, job.section_index, job.field),
            Err(e) => error!(
                "Failed to persist edit for {} (section {}, field '{}'): {}",
                job.document_id, job.section_index, job.field, e
            ),
        }
    }
}

/// Run the TTL sweep every `interval` until `shutdown` flips to true.
pub fn spawn_sweeper(hub: Arc<RoomHub>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = hub.sweep(Instant::now());
                    if evicted > 0 {
                        info!("TTL sweep evicted {} sessions", evicted);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Sweeper stopping");
                        break;
                    }
                }
            }
        }
    })
}
