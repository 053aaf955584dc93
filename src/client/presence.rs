//! Presence, typing and focus view-models, built only from inbound messages.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::{ActiveUser, ServerMessage};
use super::color::color_for_user;
use super::connection::CollabHandler;

/// A typing indicator clears itself after this long without a refresh.
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPresence {
    pub user_id: String,
    pub user_name: String,
    pub color: &'static str,
}

impl From<&ActiveUser> for UserPresence {
    fn from(user: &ActiveUser) -> Self {
        Self {
            user_id: user.user_id.clone(),
            user_name: user.user_name.clone(),
            color: color_for_user(&user.user_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypingKey {
    pub user_id: String,
    pub section_index: u32,
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEntry {
    pub user_name: String,
    pub since: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValue {
    pub value: String,
    pub user_id: String,
}

/// Everything a lesson editor needs to render collaborators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollabState {
    self_user_id: Option<String>,
    active_users: BTreeMap<String, UserPresence>,
    typing: BTreeMap<TypingKey, TypingEntry>,
    focus: BTreeMap<String, u32>,
    fields: BTreeMap<(u32, String), FieldValue>,
}

impl CollabState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for a client that knows its own user id; that id is never listed.
    pub fn for_user(self_user_id: impl Into<String>) -> Self {
        Self {
            self_user_id: Some(self_user_id.into()),
            ..Self::default()
        }
    }

    /// Fold one inbound message into the state. Returns whether anything changed.
    pub fn apply(&mut self, msg: &ServerMessage, now: Instant) -> bool {
        match msg {
            ServerMessage::Presence(p) => self.replace_users(&p.active_users),
            ServerMessage::ActiveUsers(m) => self.replace_users(&m.active_users),
            ServerMessage::Typing(t) => {
                let key = TypingKey {
                    user_id: t.user_id.clone(),
                    section_index: t.section_index,
                    field: t.field.clone(),
                };
                if t.is_typing {
                    let entry = TypingEntry { user_name: t.user_name.clone(), since: now };
                    self.typing.insert(key, entry.clone()) != Some(entry)
                } else {
                    self.typing.remove(&key).is_some()
                }
            }
            ServerMessage::SectionFocus(f) => {
                self.focus.insert(f.user_id.clone(), f.section_index) != Some(f.section_index)
            }
            ServerMessage::Edit(e) => {
                let value = FieldValue { value: e.value.clone(), user_id: e.user_id.clone() };
                self.fields.insert((e.section_index, e.field.clone()), value.clone()) != Some(value)
            }
            ServerMessage::Cursor(_) | ServerMessage::Pong | ServerMessage::Unknown => false,
        }
    }

    /// The server snapshot is authoritative: replace the set, and forget the
    /// typing and focus of anyone no longer in it.
    fn replace_users(&mut self, users: &[ActiveUser]) -> bool {
        let next: BTreeMap<String, UserPresence> = users
            .iter()
            .filter(|u| Some(&u.user_id) != self.self_user_id.as_ref())
            .map(|u| (u.user_id.clone(), UserPresence::from(u)))
            .collect();

        let present: BTreeSet<&String> = next.keys().collect();
        let typing_before = self.typing.len();
        let focus_before = self.focus.len();
        self.typing.retain(|key, _| present.contains(&key.user_id));
        self.focus.retain(|user_id, _| present.contains(user_id));
        let pruned = typing_before != self.typing.len() || focus_before != self.focus.len();

        if next == self.active_users {
            return pruned;
        }
        self.active_users = next;
        true
    }

    /// Clear typing indicators older than [`TYPING_TIMEOUT`].
    pub fn expire_typing(&mut self, now: Instant) -> bool {
        let before = self.typing.len();
        self.typing
            .retain(|_, entry| now.saturating_duration_since(entry.since) < TYPING_TIMEOUT);
        before != self.typing.len()
    }

    /// Forget everything learned from the channel (used when it closes).
    pub fn clear(&mut self) {
        self.active_users.clear();
        self.typing.clear();
        self.focus.clear();
    }

    pub fn active_users(&self) -> impl Iterator<Item = &UserPresence> {
        self.active_users.values()
    }

    pub fn is_typing(&self, user_id: &str, section_index: u32) -> bool {
        self.typing
            .keys()
            .any(|k| k.user_id == user_id && k.section_index == section_index)
    }

    /// Users with a live typing indicator in a section, by name.
    pub fn typing_in(&self, section_index: u32) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .typing
            .iter()
            .filter(|(k, _)| k.section_index == section_index)
            .map(|(_, entry)| entry.user_name.as_str())
            .collect();
        names.dedup();
        names
    }

    pub fn focus_of(&self, user_id: &str) -> Option<u32> {
        self.focus.get(user_id).copied()
    }

    pub fn users_in_section(&self, section_index: u32) -> Vec<&str> {
        self.focus
            .iter()
            .filter(|(_, s)| **s == section_index)
            .map(|(user_id, _)| user_id.as_str())
            .collect()
    }

    /// Latest live value of a field, last writer wins.
    pub fn field_value(&self, section_index: u32, field: &str) -> Option<&str> {
        self.fields
            .get(&(section_index, field.to_string()))
            .map(|v| v.value.as_str())
    }
}

/// Keeps a shared [`CollabState`] current for a rendering layer.
impl CollabHandler for Mutex<CollabState> {
    fn on_close(&self) {
        let mut state = self.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.clear();
    }

    fn on_message(&self, message: ServerMessage) {
        let now = Instant::now();
        let mut state = self.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.expire_typing(now);
        state.apply(&message, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActiveUsersMessage, EditRelay, PresenceMessage, SectionFocusRelay, TypingRelay};

    fn user(id: &str) -> ActiveUser {
        ActiveUser { user_id: id.into(), user_name: id.to_uppercase() }
    }

    fn presence(ids: &[&str]) -> ServerMessage {
        ServerMessage::Presence(PresenceMessage {
            action: None,
            user_id: None,
            user_name: None,
            timestamp: None,
            active_users: ids.iter().map(|id| user(id)).collect(),
        })
    }

    fn typing(user_id: &str, section_index: u32, is_typing: bool) -> ServerMessage {
        ServerMessage::Typing(TypingRelay {
            user_id: user_id.into(),
            user_name: user_id.to_uppercase(),
            section_index,
            field: None,
            is_typing,
        })
    }

    fn focus(user_id: &str, section_index: u32) -> ServerMessage {
        ServerMessage::SectionFocus(SectionFocusRelay {
            user_id: user_id.into(),
            user_name: user_id.to_uppercase(),
            section_index,
        })
    }

    #[test]
    fn presence_replaces_wholesale_and_replays_are_noops() {
        let now = Instant::now();
        let mut state = CollabState::new();
        assert!(state.apply(&presence(&["a", "b"]), now));
        let snapshot = state.clone();
        assert!(!state.apply(&presence(&["a", "b"]), now));
        assert_eq!(state, snapshot);

        assert!(state.apply(&presence(&["c"]), now));
        let ids: Vec<&str> = state.active_users().map(|u| u.user_id.as_str()).collect();
        assert_eq!(ids, vec!["c"]);
    }

    #[test]
    fn active_users_reply_uses_the_same_reducer() {
        let now = Instant::now();
        let mut state = CollabState::new();
        state.apply(&presence(&["a"]), now);
        let reply = ServerMessage::ActiveUsers(ActiveUsersMessage { active_users: vec![user("a")] });
        assert!(!state.apply(&reply, now));
    }

    #[test]
    fn own_id_is_never_listed() {
        let mut state = CollabState::for_user("me");
        state.apply(&presence(&["me", "a"]), Instant::now());
        let ids: Vec<&str> = state.active_users().map(|u| u.user_id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn typing_on_then_off_round_trips() {
        let now = Instant::now();
        let mut state = CollabState::new();
        state.apply(&presence(&["a", "b"]), now);
        state.apply(&typing("b", 0, true), now);
        let before = state.clone();

        assert!(state.apply(&typing("a", 1, true), now));
        assert!(state.is_typing("a", 1));
        assert!(state.apply(&typing("a", 1, false), now));
        assert_eq!(state, before);
        assert!(!state.apply(&typing("a", 1, false), now));
    }

    #[test]
    fn typing_expires_after_timeout() {
        let now = Instant::now();
        let mut state = CollabState::new();
        state.apply(&typing("a", 1, true), now);
        assert!(!state.expire_typing(now + Duration::from_secs(2)));
        assert_eq!(state.typing_in(1), vec!["A"]);
        assert!(state.expire_typing(now + TYPING_TIMEOUT));
        assert!(state.typing_in(1).is_empty());
    }

    #[test]
    fn focus_keeps_only_the_latest_section() {
        let now = Instant::now();
        let mut state = CollabState::new();
        assert!(state.apply(&focus("a", 1), now));
        assert!(state.apply(&focus("a", 4), now));
        assert!(!state.apply(&focus("a", 4), now));
        assert_eq!(state.focus_of("a"), Some(4));
        assert!(state.users_in_section(1).is_empty());
        assert_eq!(state.users_in_section(4), vec!["a"]);
    }

    #[test]
    fn leaving_users_lose_typing_and_focus() {
        let now = Instant::now();
        let mut state = CollabState::new();
        state.apply(&presence(&["a", "b"]), now);
        state.apply(&typing("b", 2, true), now);
        state.apply(&focus("b", 2), now);

        assert!(state.apply(&presence(&["a"]), now));
        assert!(!state.is_typing("b", 2));
        assert_eq!(state.focus_of("b"), None);
    }

    #[test]
    fn edits_update_the_live_view() {
        let now = Instant::now();
        let mut state = CollabState::new();
        let edit = ServerMessage::Edit(EditRelay {
            user_id: "b".into(),
            user_name: "B".into(),
            section_index: 2,
            field: "title".into(),
            value: "New Title".into(),
            persist: false,
            timestamp: None,
        });
        assert!(state.apply(&edit, now));
        assert_eq!(state.field_value(2, "title"), Some("New Title"));
        assert!(!state.apply(&edit, now));
    }

    #[test]
    fn shared_state_handler_clears_on_close() {
        let shared = Mutex::new(CollabState::new());
        shared.on_message(presence(&["a"]));
        assert_eq!(shared.lock().unwrap().active_users().count(), 1);
        shared.on_close();
        assert_eq!(shared.lock().unwrap().active_users().count(), 0);
    }
}
