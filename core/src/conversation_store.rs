/// Conversation summaries keyed by peer id, plus the derived unread total
use crate::chat_types::{ConversationSummary, JUST_NOW};
use std::collections::HashSet;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationStore {
    summaries: Vec<ConversationSummary>,
    total_unread: u32,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything with the server's list. First entry wins on duplicate ids.
    pub fn replace_all(&mut self, list: Vec<ConversationSummary>) {
        let mut seen = HashSet::with_capacity(list.len());
        let mut summaries = Vec::with_capacity(list.len());
        for summary in list {
            if seen.insert(summary.peer_id.clone()) {
                summaries.push(summary);
            } else {
                warn!("Duplicate conversation for peer {} dropped", summary.peer_id);
            }
        }
        self.summaries = summaries;
        self.recompute();
    }

    pub fn get(&self, peer_id: &str) -> Option<&ConversationSummary> {
        self.summaries.iter().find(|s| s.peer_id == peer_id)
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.get(peer_id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversationSummary> {
        self.summaries.iter()
    }

    pub fn as_slice(&self) -> &[ConversationSummary] {
        &self.summaries
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }

    pub fn total_unread(&self) -> u32 {
        self.total_unread
    }

    pub fn unread(&self, peer_id: &str) -> u32 {
        self.get(peer_id).map(|s| s.unread).unwrap_or(0)
    }

    /// Set a peer's unread count. Returns false when the peer is unknown.
    pub fn set_unread(&mut self, peer_id: &str, unread: u32) -> bool {
        let found = match self.get_mut(peer_id) {
            Some(summary) => {
                summary.unread = unread;
                true
            }
            None => false,
        };
        self.recompute();
        found
    }

    /// Bump a peer's unread count by one. Returns false when the peer is unknown.
    pub fn increment_unread(&mut self, peer_id: &str) -> bool {
        let found = match self.get_mut(peer_id) {
            Some(summary) => {
                summary.unread = summary.unread.saturating_add(1);
                true
            }
            None => false,
        };
        self.recompute();
        found
    }

    /// Append a summary unless one already exists for that peer
    pub fn insert_if_absent(&mut self, summary: ConversationSummary) -> bool {
        if self.contains(&summary.peer_id) {
            return false;
        }
        self.summaries.push(summary);
        self.recompute();
        true
    }

    /// Record a message we just sent: preview, "Just now", read.
    /// `fallback` builds the summary when the peer is new.
    pub fn record_sent<F>(&mut self, peer_id: &str, content: &str, fallback: F)
    where
        F: FnOnce() -> ConversationSummary,
    {
        match self.get_mut(peer_id) {
            Some(summary) => {
                summary.last_message = content.to_string();
                summary.last_activity = JUST_NOW.to_string();
                summary.unread = 0;
            }
            None => {
                let mut summary = fallback();
                summary.last_message = content.to_string();
                summary.last_activity = JUST_NOW.to_string();
                summary.unread = 0;
                self.summaries.push(summary);
            }
        }
        self.recompute();
    }

    fn get_mut(&mut self, peer_id: &str) -> Option<&mut ConversationSummary> {
        self.summaries.iter_mut().find(|s| s.peer_id == peer_id)
    }

    /// Always a full pass over the store; never adjusted incrementally
    fn recompute(&mut self) {
        self.total_unread = self
            .summaries
            .iter()
            .fold(0u32, |acc, s| acc.saturating_add(s.unread));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(peer: &str, unread: u32) -> ConversationSummary {
        ConversationSummary {
            peer_id: peer.to_string(),
            display_name: peer.to_uppercase(),
            avatar: String::new(),
            last_activity: "09:00".to_string(),
            last_message: "hi".to_string(),
            unread,
        }
    }

    #[test]
    fn test_replace_all_is_full_replace() {
        let mut store = ConversationStore::new();
        store.replace_all(vec![summary("a", 1), summary("b", 2)]);
        assert_eq!(store.total_unread(), 3);

        store.replace_all(vec![summary("c", 4)]);
        assert!(!store.contains("a"));
        assert!(!store.contains("b"));
        assert_eq!(store.total_unread(), 4);
    }

    #[test]
    fn test_replace_all_dedups_peers() {
        let mut store = ConversationStore::new();
        store.replace_all(vec![summary("a", 1), summary("a", 5)]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.unread("a"), 1);
        assert_eq!(store.total_unread(), 1);
    }

    #[test]
    fn test_unknown_peer_is_left_alone() {
        let mut store = ConversationStore::new();
        store.replace_all(vec![summary("a", 1)]);
        assert!(!store.increment_unread("ghost"));
        assert!(!store.set_unread("ghost", 0));
        assert_eq!(store.total_unread(), 1);
    }

    #[test]
    fn test_record_sent_creates_or_updates() {
        let mut store = ConversationStore::new();
        store.replace_all(vec![summary("a", 2)]);

        store.record_sent("a", "yo", || unreachable!());
        let a = store.get("a").unwrap();
        assert_eq!(a.last_message, "yo");
        assert_eq!(a.last_activity, JUST_NOW);
        assert_eq!(a.unread, 0);

        store.record_sent("n", "first", || ConversationSummary::placeholder("n", "New", ""));
        assert_eq!(store.get("n").unwrap().last_message, "first");
        assert_eq!(store.total_unread(), 0);
    }
}
