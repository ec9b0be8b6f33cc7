//! Games directory scanning.

use std::collections::HashSet;
use std::path::Path;

use crate::{ConfigError, GameDefinition};

/// Reads every `*.toml` file in `dir`, in sorted filename order, and
/// returns the valid game definitions found.
///
/// Each file holds a top-level `games` array of tables. Within one pass
/// the first definition of an id wins: ids in `claimed` (the primary
/// config's own games) and ids seen in an earlier file are skipped with a
/// warning.
///
/// Problems confined to one file or one definition are logged and
/// skipped.
///
/// # Errors
///
/// [`ConfigError::Io`] if the directory itself can't be listed.
pub fn load_games_dir(
    dir: &Path,
    claimed: &HashSet<String>,
) -> Result<Vec<GameDefinition>, ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = std::fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    paths.sort();

    let mut seen = claimed.clone();
    let mut delta = Vec::new();

    for path in paths {
        let file = path.display();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") || !path.is_file() {
            tracing::warn!(%file, "skipping non-toml file in games directory");
            continue;
        }
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(%file, error = %e, "couldn't read game file, skipping");
                continue;
            }
        };
        let mut data = match content.parse::<toml::Table>() {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(%file, error = %e, "failed to parse game file, skipping");
                continue;
            }
        };
        let Some(games) = data.remove("games") else {
            tracing::warn!(%file, "no 'games' key in game file, skipping");
            continue;
        };
        if !data.is_empty() {
            let extra: Vec<&str> = data.keys().map(String::as_str).collect();
            tracing::warn!(%file, extra = %extra.join(","), "ignoring extra top-level keys");
        }
        let Some(games) = games.as_array() else {
            tracing::warn!(%file, "'games' should be a list of tables, skipping");
            continue;
        };

        tracing::info!(%file, "loading game definitions");
        for entry in games {
            let Some(table) = entry.as_table() else {
                tracing::warn!(%file, "game entry is not a table, skipping");
                continue;
            };
            let game = match GameDefinition::from_table(table) {
                Ok(game) => game,
                Err(e) => {
                    tracing::warn!(%file, error = %e, "skipping game definition");
                    continue;
                }
            };
            if !seen.insert(game.id.clone()) {
                tracing::warn!(
                    %file,
                    game = %game.id,
                    "game was defined earlier in this load, skipping"
                );
                continue;
            }
            delta.push(game);
        }
    }

    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game_toml(id: &str, name: &str) -> String {
        format!(
            r#"
[[games]]
id = "{id}"
name = "{name}"
crawl_binary = "/bin/true"
rcfile_path = "rcs"
macro_path = "rcs"
morgue_path = "morgue"
inprogress_path = "running"
ttyrec_path = "ttyrec"
socket_path = "sockets"
client_path = "/tmp"
"#
        )
    }

    fn ids(games: &[GameDefinition]) -> Vec<&str> {
        games.iter().map(|g| g.id.as_str()).collect()
    }

    #[test]
    fn test_load_games_dir_reads_files_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("20-b.toml"), game_toml("b", "B")).unwrap();
        std::fs::write(dir.path().join("10-a.toml"), game_toml("a", "A")).unwrap();

        let games = load_games_dir(dir.path(), &HashSet::new()).unwrap();
        assert_eq!(ids(&games), vec!["a", "b"]);
    }

    #[test]
    fn test_load_games_dir_first_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1.toml"), game_toml("a", "first")).unwrap();
        std::fs::write(dir.path().join("2.toml"), game_toml("a", "second")).unwrap();

        let games = load_games_dir(dir.path(), &HashSet::new()).unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].name, "first");
    }

    #[test]
    fn test_load_games_dir_skips_ids_claimed_by_primary_config() {
        let dir = tempfile::tempdir().unwrap();
        let both = format!("{}{}", game_toml("main", "M"), game_toml("extra", "E"));
        std::fs::write(dir.path().join("games.toml"), both).unwrap();

        let claimed = HashSet::from(["main".to_string()]);
        let games = load_games_dir(dir.path(), &claimed).unwrap();
        assert_eq!(ids(&games), vec!["extra"]);
    }

    #[test]
    fn test_load_games_dir_skips_bad_files_and_definitions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.toml"), "not [valid toml").unwrap();
        std::fs::write(dir.path().join("b.toml"), "other = 1\n").unwrap();
        std::fs::write(dir.path().join("c.yaml"), game_toml("yaml", "Y")).unwrap();
        std::fs::write(
            dir.path().join("d.toml"),
            "[[games]]\nid = \"broken\"\nname = \"no paths\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("e.toml"),
            format!("motd = \"hi\"\n{}", game_toml("good", "G")),
        )
        .unwrap();

        let games = load_games_dir(dir.path(), &HashSet::new()).unwrap();
        assert_eq!(ids(&games), vec!["good"]);
    }

    #[test]
    fn test_load_games_dir_missing_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_games_dir(&dir.path().join("nope"), &HashSet::new()).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
