//! Parent redirection for dropped spans

use std::collections::HashMap;

use crate::domain::span::ROOT_PARENT_ID;

/// Guard against cycles in malformed input
pub const MAX_REDIRECT_HOPS: usize = 1_000;

/// Resolves a parent id to its nearest surviving ancestor
///
/// `redirect` maps each dropped span id to its own parent. Terminal results
/// are memoized for every id on a resolved path, so resolving all survivors
/// is linear in the size of the forest.
pub(super) struct ParentResolver<'a> {
    redirect: &'a HashMap<String, String>,
    resolved: HashMap<String, String>,
}

impl<'a> ParentResolver<'a> {
    pub(super) fn new(redirect: &'a HashMap<String, String>) -> Self {
        Self {
            redirect,
            resolved: HashMap::new(),
        }
    }

    pub(super) fn resolve(&mut self, parent_id: &str) -> String {
        let mut current = parent_id.to_string();
        let mut path: Vec<String> = Vec::new();

        for _ in 0..MAX_REDIRECT_HOPS {
            if let Some(terminal) = self.resolved.get(&current) {
                current = terminal.clone();
                return self.memoize(path, current);
            }
            match self.redirect.get(&current) {
                Some(next) => {
                    let next = next.clone();
                    path.push(std::mem::replace(&mut current, next));
                }
                None => return self.memoize(path, current),
            }
        }

        // Only reachable through a cycle of dropped spans; nothing on it
        // survives, so anchor the span at the root
        tracing::warn!(
            parent_id,
            hops = MAX_REDIRECT_HOPS,
            "Parent redirect did not terminate, re-rooting span"
        );
        ROOT_PARENT_ID.to_string()
    }

    fn memoize(&mut self, path: Vec<String>, terminal: String) -> String {
        for id in path {
            self.resolved.insert(id, terminal.clone());
        }
        terminal
    }
}
