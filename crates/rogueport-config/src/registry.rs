//! The game registry: an ordered map from game id to definition.
//!
//! Merging only ever adds new ids at the end or replaces the definition of
//! an existing id in place. Nothing is removed and nothing moves, so any
//! id a client could pick before a reload is still there after it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::GameDefinition;

/// What a merge changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
}

impl MergeReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty()
    }
}

/// Ordered game definitions.
///
/// Cloning is cheap: definitions are shared through `Arc`, so a reload
/// copies the registry, merges into the copy and leaves the original
/// untouched until the copy is committed.
#[derive(Debug, Clone, Default)]
pub struct GameRegistry {
    entries: Vec<Arc<GameDefinition>>,
    index: HashMap<String, usize>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a game by id.
    pub fn get(&self, id: &str) -> Option<&Arc<GameDefinition>> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    /// The first game, used when a client doesn't choose one.
    pub fn first(&self) -> Option<&Arc<GameDefinition>> {
        self.entries.first()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Ids in registry order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|g| g.id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<GameDefinition>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds `game` at the end, or replaces the existing definition with
    /// the same id in place. Returns `true` if the id was new.
    pub fn upsert(&mut self, game: GameDefinition) -> bool {
        match self.index.get(&game.id) {
            Some(&i) => {
                self.entries[i] = Arc::new(game);
                false
            }
            None => {
                self.index.insert(game.id.clone(), self.entries.len());
                self.entries.push(Arc::new(game));
                true
            }
        }
    }

    /// Upserts every definition of `delta` in order.
    pub fn merge(&mut self, delta: impl IntoIterator<Item = GameDefinition>) -> MergeReport {
        let mut report = MergeReport::default();
        for game in delta {
            let id = game.id.clone();
            if self.upsert(game) {
                report.added.push(id);
            } else {
                report.updated.push(id);
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game(id: &str, name: &str) -> GameDefinition {
        GameDefinition {
            id: id.into(),
            name: name.into(),
            crawl_binary: "/bin/true".into(),
            rcfile_path: "rcs".into(),
            macro_path: "rcs".into(),
            morgue_path: "morgue".into(),
            inprogress_path: "running".into(),
            ttyrec_path: "ttyrec".into(),
            socket_path: "sockets".into(),
            client_path: "/tmp".into(),
            dir_path: None,
            cwd: None,
            morgue_url: None,
            milestone_path: None,
            separator: None,
            send_json_options: false,
            options: Vec::new(),
            env: Default::default(),
        }
    }

    #[test]
    fn test_merge_appends_new_and_updates_in_place() {
        let mut reg = GameRegistry::new();
        reg.merge([game("a", "A"), game("b", "B")]);

        let report = reg.merge([game("c", "C"), game("a", "A2")]);

        assert_eq!(report.added, vec!["c"]);
        assert_eq!(report.updated, vec!["a"]);
        assert_eq!(reg.ids().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(reg.get("a").unwrap().name, "A2");
    }

    #[test]
    fn test_merge_never_shrinks_across_passes() {
        let mut reg = GameRegistry::new();
        let mut previous: Vec<String> = Vec::new();
        let passes: [&[&str]; 4] = [&["a", "b"], &["c"], &[], &["b", "d"]];

        for ids in passes {
            reg.merge(ids.iter().map(|id| game(id, id)));
            let now: Vec<String> = reg.ids().map(str::to_owned).collect();
            assert!(now.starts_with(&previous), "{previous:?} not a prefix of {now:?}");
            previous = now;
        }
        assert_eq!(reg.len(), 4);
    }

    #[test]
    fn test_first_and_get() {
        let mut reg = GameRegistry::new();
        assert!(reg.first().is_none());
        assert!(reg.is_empty());

        reg.upsert(game("x", "X"));
        reg.upsert(game("y", "Y"));
        assert_eq!(reg.first().unwrap().id, "x");
        assert!(reg.contains("y"));
        assert!(reg.get("z").is_none());
    }

    #[test]
    fn test_clone_is_independent_of_original() {
        let mut live = GameRegistry::new();
        live.upsert(game("a", "A"));

        let mut copy = live.clone();
        copy.upsert(game("a", "changed"));
        copy.upsert(game("b", "B"));

        assert_eq!(live.len(), 1);
        assert_eq!(live.get("a").unwrap().name, "A");
    }
}
