//! Token registry for reactor-owned sockets.
//!
//! Every socket registered with the poller gets a slab key, used as its
//! `mio::Token`. Handles held by other threads refer to sockets by a
//! process-unique id instead, so a stale command for a closed connection
//! can never hit a newer socket that reused the same slab key.

use mio::Token;
use slab::Slab;
use std::collections::HashMap;

/// Slab of reactor entries with a secondary index by unique id.
pub(crate) struct TokenRegistry<T> {
    entries: Slab<(u64, T)>,
    by_id: HashMap<u64, usize>,
}

impl<T> TokenRegistry<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Slab::with_capacity(capacity),
            by_id: HashMap::with_capacity(capacity),
        }
    }

    /// Insert an entry and return the token to register it under.
    pub fn insert(&mut self, id: u64, entry: T) -> Token {
        let key = self.entries.insert((id, entry));
        self.by_id.insert(id, key);
        Token(key)
    }

    pub fn token_of(&self, id: u64) -> Option<Token> {
        self.by_id.get(&id).copied().map(Token)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut T> {
        self.entries.get_mut(token.0).map(|(_, entry)| entry)
    }

    pub fn remove(&mut self, token: Token) -> Option<T> {
        let (id, entry) = self.entries.try_remove(token.0)?;
        self.by_id.remove(&id);
        Some(entry)
    }

    /// Tokens of all live entries.
    pub fn tokens(&self) -> Vec<Token> {
        self.entries.iter().map(|(key, _)| Token(key)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup_by_id() {
        let mut registry = TokenRegistry::with_capacity(4);

        let t1 = registry.insert(100, "listener");
        let t2 = registry.insert(101, "stream");

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.token_of(100), Some(t1));
        assert_eq!(registry.get_mut(t2), Some(&mut "stream"));

        assert_eq!(registry.remove(t1), Some("listener"));
        assert!(registry.token_of(100).is_none());
        assert!(registry.remove(t1).is_none());
    }

    #[test]
    fn test_reused_key_does_not_alias_old_id() {
        let mut registry = TokenRegistry::with_capacity(1);

        let old = registry.insert(1, 'a');
        registry.remove(old);
        let new = registry.insert(2, 'b');

        // Slab reuses the key, the id index does not
        assert_eq!(old, new);
        assert!(registry.token_of(1).is_none());
        assert_eq!(registry.token_of(2), Some(new));
    }
}
