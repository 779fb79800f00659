//! Compression token bookkeeping
//!
//! The agent compresses a payload, possibly several times until it is short
//! enough, and then sends a request referring to the result by token in the
//! same turn. Tokens are remembered only for the turn in which they were made.

use serde_json::Value;
use std::collections::HashMap;

/// Token to payload map scoped to scheduler turns
#[derive(Debug, Clone, Default)]
pub(crate) struct CompressionMap {
    entries: HashMap<String, (Value, u64)>,
}

impl CompressionMap {
    pub(crate) fn remember(&mut self, token: String, payload: Value, turn: u64) {
        self.entries.insert(token, (payload, turn));
    }

    /// Payload for `token`, if it was made during `turn`
    pub(crate) fn get(&self, token: &str, turn: u64) -> Option<Value> {
        self.entries
            .get(token)
            .filter(|(_, made)| *made == turn)
            .map(|(payload, _)| payload.clone())
    }

    /// Drop every token made before `turn`
    pub(crate) fn evict_before(&mut self, turn: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, (_, made)| *made >= turn);
        before - self.entries.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tokens_live_for_one_turn() {
        let mut map = CompressionMap::default();
        map.remember("t".to_string(), json!({ "a": 1 }), 3);
        assert_eq!(map.get("t", 3), Some(json!({ "a": 1 })));
        assert_eq!(map.get("t", 4), None);
        assert_eq!(map.evict_before(4), 1);
        assert_eq!(map.len(), 0);
    }
}
