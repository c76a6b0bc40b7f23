use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

/// Per-unit cancellation tokens hanging off one replaceable root.
///
/// Cancelling the root cancels every outstanding token at once; a fresh root
/// is installed right after so later units are unaffected.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    root: CancellationToken,
    tokens: HashMap<u64, CancellationToken>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self, id: u64) -> CancellationToken {
        let token = self.root.child_token();
        self.tokens.insert(id, token.clone());
        token
    }

    pub fn cancel(&mut self, id: u64) -> bool {
        match self.tokens.remove(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel everything issued so far. Returns how many tokens were live.
    pub fn cancel_all(&mut self) -> usize {
        let live = self.tokens.len();
        self.root.cancel();
        self.root = CancellationToken::new();
        self.tokens.clear();
        live
    }

    pub fn release(&mut self, id: u64) {
        self.tokens.remove(&id);
    }

    /// Ids whose tokens were cancelled from outside the registry.
    pub fn take_cancelled(&mut self) -> Vec<u64> {
        let cancelled: Vec<u64> = self
            .tokens
            .iter()
            .filter(|(_, token)| token.is_cancelled())
            .map(|(&id, _)| id)
            .collect();
        for id in &cancelled {
            self.tokens.remove(id);
        }
        cancelled
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_all_reaches_every_issued_token_but_not_later_ones() {
        let mut registry = CancellationRegistry::new();
        let a = registry.issue(1);
        let b = registry.issue(2);
        assert_eq!(registry.cancel_all(), 2);
        assert!(a.is_cancelled() && b.is_cancelled());

        let c = registry.issue(3);
        assert!(!c.is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn externally_cancelled_tokens_are_collected_once() {
        let mut registry = CancellationRegistry::new();
        let a = registry.issue(7);
        registry.issue(8);
        a.cancel();
        assert_eq!(registry.take_cancelled(), vec![7]);
        assert!(registry.take_cancelled().is_empty());
        assert!(!registry.cancel(7));
        assert!(registry.cancel(8));
    }
}
