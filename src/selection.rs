use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use indexmap::IndexSet;

use crate::types::{ChatId, Client, Range};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("quantity must be a positive whole number")]
pub struct InvalidQuantity;

/// Keep only the digits of `text` and read them as a quantity.
///
/// Signs and separators are dropped, so `"-3"` reads as `3` and `"1,000"` as
/// `1000`. Empty, zero or overflowing input is rejected.
pub fn parse_quantity(text: &str) -> Result<u32, InvalidQuantity> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    match digits.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(InvalidQuantity),
    }
}

/// One operator's in-progress multi-select.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub clients: IndexSet<String>,
    pub ranges: IndexSet<String>,
    pub pending_quantity_prompt: bool,
    /// Last client list shown; menu buttons refer to it by index.
    pub known_clients: Vec<Client>,
    /// Last allocatable ranges shown for the selected clients.
    pub known_ranges: Vec<Range>,
}

impl Selection {
    /// Returns whether the client is selected afterwards.
    pub fn toggle_client(&mut self, id: &str) -> bool {
        if self.clients.shift_remove(id) {
            false
        } else {
            self.clients.insert(id.to_string());
            true
        }
    }

    /// Empty tokens are not allocatable and never enter the selection.
    pub fn toggle_range(&mut self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        if self.ranges.shift_remove(token) {
            false
        } else {
            self.ranges.insert(token.to_string());
            true
        }
    }

    pub fn select_all_clients(&mut self, available: &[Client]) {
        self.clients
            .extend(available.iter().map(|c| c.external_id.clone()));
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// A fresh client list invalidates everything chosen from the old one.
    pub fn replace_clients(&mut self, clients: Vec<Client>) {
        self.clear();
        self.known_clients = clients;
    }

    pub fn replace_ranges(&mut self, ranges: Vec<Range>) {
        self.ranges.clear();
        self.known_ranges = ranges;
    }

    pub fn begin_custom_quantity(&mut self) {
        self.pending_quantity_prompt = true;
    }

    /// Parses the operator's reply; the prompt stays open on bad input.
    pub fn resolve_custom_quantity(&mut self, text: &str) -> Result<u32, InvalidQuantity> {
        let quantity = parse_quantity(text)?;
        self.pending_quantity_prompt = false;
        Ok(quantity)
    }

    pub fn is_ready(&self) -> bool {
        !self.clients.is_empty() && !self.ranges.is_empty()
    }

    /// Move the chosen clients and ranges out for submission, leaving both
    /// sets empty. `None` (and nothing taken) unless both are non-empty.
    pub fn take_pairs(&mut self) -> Option<(IndexSet<String>, IndexSet<String>)> {
        if !self.is_ready() {
            return None;
        }
        self.pending_quantity_prompt = false;
        Some((
            std::mem::take(&mut self.clients),
            std::mem::take(&mut self.ranges),
        ))
    }

    /// Put back pairs taken by [`Selection::take_pairs`] that were never sent.
    pub fn restore_pairs(&mut self, clients: IndexSet<String>, ranges: IndexSet<String>) {
        self.clients.extend(clients);
        self.ranges.extend(ranges);
    }
}

/// Selections keyed by conversation. State lives only as long as the process.
#[derive(Debug, Default)]
pub struct SelectionStore {
    inner: Mutex<HashMap<ChatId, Selection>>,
}

impl SelectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChatId, Selection>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` against the chat's selection, creating an empty one on first use.
    pub fn with<R>(&self, chat: ChatId, f: impl FnOnce(&mut Selection) -> R) -> R {
        let mut map = self.lock();
        f(map.entry(chat).or_default())
    }

    pub fn snapshot(&self, chat: ChatId) -> Selection {
        self.lock().get(&chat).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::{InvalidQuantity, Selection, SelectionStore, parse_quantity};
    use crate::types::{ChatId, Client};

    fn client(id: &str) -> Client {
        Client {
            name: format!("client {id}"),
            external_id: id.to_string(),
        }
    }

    #[test]
    fn custom_quantity_keeps_digits_only() {
        assert_eq!(parse_quantity("12"), Ok(12));
        assert_eq!(parse_quantity("  7 "), Ok(7));
        assert_eq!(parse_quantity("abc"), Err(InvalidQuantity));
        assert_eq!(parse_quantity(""), Err(InvalidQuantity));
        assert_eq!(parse_quantity("0"), Err(InvalidQuantity));
        assert_eq!(parse_quantity("99999999999"), Err(InvalidQuantity));
    }

    #[test]
    fn leading_sign_is_dropped_not_rejected() {
        assert_eq!(parse_quantity("-3"), Ok(3));
        assert_eq!(parse_quantity("1,000 numbers"), Ok(1000));
    }

    #[test]
    fn toggles_flip_membership_and_keep_order() {
        let mut sel = Selection::default();
        assert!(sel.toggle_client("b"));
        assert!(sel.toggle_client("a"));
        assert!(!sel.toggle_client("b"));
        assert!(sel.toggle_client("b"));
        assert_eq!(sel.clients.iter().collect::<Vec<_>>(), vec!["a", "b"]);

        assert!(!sel.toggle_range(""));
        assert!(sel.ranges.is_empty());
        assert!(sel.toggle_range("r1"));
        assert!(sel.is_ready());
    }

    #[test]
    fn select_all_is_a_union() {
        let mut sel = Selection::default();
        sel.toggle_client("2");
        sel.select_all_clients(&[client("1"), client("2"), client("3")]);
        assert_eq!(sel.clients.len(), 3);
        assert_eq!(sel.clients.first().map(String::as_str), Some("2"));
    }

    #[test]
    fn pending_prompt_survives_bad_input() {
        let mut sel = Selection::default();
        sel.begin_custom_quantity();
        assert!(sel.resolve_custom_quantity("lots").is_err());
        assert!(sel.pending_quantity_prompt);
        assert_eq!(sel.resolve_custom_quantity("25"), Ok(25));
        assert!(!sel.pending_quantity_prompt);
    }

    #[test]
    fn refetch_replaces_selection() {
        let mut sel = Selection::default();
        sel.toggle_client("old");
        sel.toggle_range("r");
        sel.replace_clients(vec![client("new")]);
        assert!(sel.clients.is_empty());
        assert!(sel.ranges.is_empty());
        assert_eq!(sel.known_clients.len(), 1);
    }

    #[test]
    fn taking_pairs_empties_the_selection_once() {
        let mut sel = Selection::default();
        assert!(sel.take_pairs().is_none());
        sel.toggle_client("a");
        assert!(sel.take_pairs().is_none());
        assert_eq!(sel.clients.len(), 1);

        sel.toggle_range("x");
        let (clients, ranges) = sel.take_pairs().unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(ranges.len(), 1);
        assert!(!sel.is_ready());
        assert!(sel.take_pairs().is_none());

        sel.restore_pairs(clients, ranges);
        assert!(sel.is_ready());
    }

    #[test]
    fn store_isolates_conversations() {
        let store = SelectionStore::new();
        store.with(ChatId(1), |s| s.toggle_client("a"));
        store.with(ChatId(2), |s| s.toggle_range("x"));
        assert_eq!(store.snapshot(ChatId(1)).clients.len(), 1);
        assert!(store.snapshot(ChatId(1)).ranges.is_empty());
        assert!(store.snapshot(ChatId(2)).clients.is_empty());
        assert!(store.snapshot(ChatId(3)).clients.is_empty());
        store.with(ChatId(1), Selection::clear);
        assert!(store.snapshot(ChatId(1)).clients.is_empty());
    }
}
