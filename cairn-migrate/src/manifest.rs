//! Changelog manifest reading and loading.
//!
//! A manifest is a TOML document listing changelog nodes in authoring order:
//!
//! ```toml
//! [[changelog]]
//! id = "001_init"
//! kind = "sql"
//! author = "alice"
//! labels = "bootstrap"
//! include = { file = "sql/001_up.sql", relative_to_changelog_file = true }
//! include_down = { file = "sql/001_down.sql", relative_to_changelog_file = true }
//! ```
//!
//! [`read_manifest`] parses the document; [`ManifestLoader`] validates each node,
//! resolves its scripts, orders the entries by numeric ID prefix and partitions
//! them into the transactional and non-transactional batches.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MigrateResult, MigrationError};
use crate::model::{ChangeSet, ChangelogEntry, Direction, Manifest};

/// Default manifest file name inside the migrations folder.
pub const MANIFEST_FILE_NAME: &str = "changelog.toml";

/// A parsed manifest document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangelogDocument {
    #[serde(default, rename = "changelog")]
    pub items: Vec<ChangelogNode>,
}

/// One raw changelog node. Every attribute may be absent; validation happens in the loader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangelogNode {
    pub id: String,
    pub kind: String,
    pub author: String,
    pub labels: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transactional: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<ScriptRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_down: Option<ScriptRef>,
}

/// A reference to a script file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRef {
    pub file: String,
    #[serde(default)]
    pub relative_to_changelog_file: bool,
}

impl ScriptRef {
    /// Resolve against the manifest's base directory when marked relative.
    pub fn resolve(&self, base_dir: &Path) -> PathBuf {
        if self.relative_to_changelog_file {
            base_dir.join(&self.file)
        } else {
            PathBuf::from(&self.file)
        }
    }
}

/// Read and parse a manifest file, returning the document and its base directory.
pub async fn read_manifest(path: impl AsRef<Path>) -> MigrateResult<(ChangelogDocument, PathBuf)> {
    let path = path.as_ref();

    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        MigrationError::manifest(format!("failed to read {}: {}", path.display(), e))
    })?;

    let document = parse_manifest(&content)
        .map_err(|e| MigrationError::manifest(format!("{}: {}", path.display(), e)))?;

    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    debug!(path = %path.display(), entries = document.items.len(), "Read manifest");
    Ok((document, base_dir))
}

/// Parse manifest content.
pub fn parse_manifest(content: &str) -> Result<ChangelogDocument, toml::de::Error> {
    toml::from_str(content)
}

/// The integer before the first `_` of an ID.
///
/// Prefixes that are not a valid `i64` (non-numeric, empty or out of range)
/// sort as 0.
pub fn id_prefix(id: &str) -> i64 {
    id.split('_').next().and_then(|p| p.parse().ok()).unwrap_or(0)
}

/// Stable sort by numeric ID prefix.
pub fn sort_by_id_prefix(nodes: &mut [ChangelogNode]) {
    nodes.sort_by_key(|node| id_prefix(&node.id));
}

/// Turns raw changelog nodes into a [`Manifest`].
#[derive(Debug, Clone)]
pub struct ManifestLoader {
    base_dir: PathBuf,
}

impl ManifestLoader {
    /// Create a loader resolving relative scripts against `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Base directory for relative script references.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Read a manifest file and load it.
    pub async fn load_file(path: impl AsRef<Path>) -> MigrateResult<Manifest> {
        let (document, base_dir) = read_manifest(path).await?;
        Self::new(base_dir).load(document.items).await
    }

    /// Validate, order and partition the nodes.
    ///
    /// Fails on the first invalid node; no partial manifest is returned.
    pub async fn load(&self, mut nodes: Vec<ChangelogNode>) -> MigrateResult<Manifest> {
        sort_by_id_prefix(&mut nodes);

        let mut entries = Vec::with_capacity(nodes.len());
        for node in &nodes {
            entries.push(self.load_node(node).await?);
        }

        let manifest = Manifest::from_entries(entries);
        debug!(
            tx = manifest.transactional.len(),
            notx = manifest.non_transactional.len(),
            "Loaded manifest"
        );
        Ok(manifest)
    }

    async fn load_node(&self, node: &ChangelogNode) -> MigrateResult<ChangelogEntry> {
        validate_node(node)?;

        let change = match node.kind.as_str() {
            "sql" => {
                let up_ref = node.include.as_ref().ok_or_else(|| MigrationError::MissingScript {
                    id: node.id.clone(),
                })?;
                let up = self.read_script(&node.id, Direction::Up, up_ref).await?;

                // A blank down file is treated as no down file.
                let down = match &node.include_down {
                    Some(down_ref) => Some(self.read_script(&node.id, Direction::Down, down_ref).await?)
                        .filter(|body| !body.trim().is_empty()),
                    None => None,
                };

                ChangeSet::Sql { up, down }
            }
            other => {
                return Err(MigrationError::UnsupportedKind {
                    id: node.id.clone(),
                    kind: other.to_string(),
                });
            }
        };

        Ok(ChangelogEntry {
            id: node.id.clone(),
            author: node.author.clone(),
            labels: node.labels.clone(),
            transactional: node.transactional.unwrap_or(true),
            change,
        })
    }

    async fn read_script(
        &self,
        id: &str,
        direction: Direction,
        script: &ScriptRef,
    ) -> MigrateResult<String> {
        let path = script.resolve(&self.base_dir);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| MigrationError::ScriptRead {
                id: id.to_string(),
                direction,
                path,
                source,
            })
    }
}

/// Check mandatory attributes in order: author, labels, kind, id.
fn validate_node(node: &ChangelogNode) -> MigrateResult<()> {
    let required = [
        ("author", &node.author),
        ("labels", &node.labels),
        ("kind", &node.kind),
        ("id", &node.id),
    ];

    for (field, value) in required {
        if value.is_empty() {
            return Err(MigrationError::MissingField {
                id: node.id.clone(),
                field,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn node(id: &str) -> ChangelogNode {
        ChangelogNode {
            id: id.to_string(),
            kind: "sql".to_string(),
            author: "a".to_string(),
            labels: "l".to_string(),
            transactional: None,
            include: Some(ScriptRef {
                file: format!("{}.sql", id),
                relative_to_changelog_file: true,
            }),
            include_down: None,
        }
    }

    fn write(dir: &TempDir, name: &str, content: &str) {
        std::fs::write(dir.path().join(name), content).unwrap();
    }

    #[test]
    fn test_id_prefix() {
        assert_eq!(id_prefix("007_add_index"), 7);
        assert_eq!(id_prefix("12"), 12);
        assert_eq!(id_prefix("abc_init"), 0);
        assert_eq!(id_prefix(""), 0);
        assert_eq!(id_prefix("_leading"), 0);
        // Prefixes beyond i64 fall back to 0 like any other unparsable prefix.
        assert_eq!(id_prefix("99999999999999999999_x"), 0);
        assert_eq!(id_prefix("9223372036854775807_max"), i64::MAX);
    }

    #[test]
    fn test_sort_is_stable_and_numeric() {
        let mut nodes = vec![
            node("010_c"),
            node("2_b"),
            node("x_malformed"),
            node("002_a"),
            node("001_first"),
        ];
        sort_by_id_prefix(&mut nodes);

        let ids: Vec<_> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["x_malformed", "001_first", "2_b", "002_a", "010_c"]);
    }

    #[test]
    fn test_script_ref_resolution() {
        let base = Path::new("/srv/migrations");
        let relative = ScriptRef {
            file: "sql/up.sql".to_string(),
            relative_to_changelog_file: true,
        };
        let literal = ScriptRef {
            file: "/abs/up.sql".to_string(),
            relative_to_changelog_file: false,
        };
        assert_eq!(relative.resolve(base), PathBuf::from("/srv/migrations/sql/up.sql"));
        assert_eq!(literal.resolve(base), PathBuf::from("/abs/up.sql"));
    }

    #[test]
    fn test_parse_manifest_defaults() {
        let doc = parse_manifest(
            r#"
            [[changelog]]
            id = "001_init"
            kind = "sql"
            author = "a"
            labels = "l"
            include = { file = "001.sql" }

            [[changelog]]
            id = "002_index"
            transactional = false
            "#,
        )
        .unwrap();

        assert_eq!(doc.items.len(), 2);
        assert_eq!(doc.items[0].transactional, None);
        assert!(!doc.items[0].include.as_ref().unwrap().relative_to_changelog_file);
        assert_eq!(doc.items[1].transactional, Some(false));
        assert!(doc.items[1].author.is_empty());
    }

    #[tokio::test]
    async fn test_load_orders_and_partitions() {
        let dir = TempDir::new().unwrap();
        write(&dir, "002_add_col.sql", "ALTER TABLE t ADD c int;");
        write(&dir, "001_init.sql", "CREATE TABLE t();");
        write(&dir, "003_index.sql", "CREATE INDEX CONCURRENTLY i ON t(c);");
        write(&dir, "001_init_down.sql", "DROP TABLE t;");

        let mut init = node("001_init");
        init.include_down = Some(ScriptRef {
            file: "001_init_down.sql".to_string(),
            relative_to_changelog_file: true,
        });
        let mut index = node("003_index");
        index.transactional = Some(false);

        let manifest = ManifestLoader::new(dir.path())
            .load(vec![node("002_add_col"), index, init])
            .await
            .unwrap();

        let tx: Vec<_> = manifest.transactional.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(tx, vec!["001_init", "002_add_col"]);
        assert_eq!(manifest.non_transactional.entries()[0].id, "003_index");

        let first = &manifest.transactional.entries()[0];
        assert_eq!(first.change.up_script(), "CREATE TABLE t();");
        assert_eq!(first.change.down_script(), Some("DROP TABLE t;"));
        assert_eq!(manifest.transactional.entries()[1].change.down_script(), None);
        assert!(!manifest.non_transactional.metas()["003_index"].transactional);
    }

    #[tokio::test]
    async fn test_blank_down_file_loads_as_missing() {
        let dir = TempDir::new().unwrap();
        write(&dir, "001_init.sql", "CREATE TABLE t();");
        write(&dir, "001_init_down.sql", "  \n");

        let mut init = node("001_init");
        init.include_down = Some(ScriptRef {
            file: "001_init_down.sql".to_string(),
            relative_to_changelog_file: true,
        });

        let manifest = ManifestLoader::new(dir.path()).load(vec![init]).await.unwrap();
        assert_eq!(manifest.transactional.entries()[0].change.down_script(), None);
    }

    #[tokio::test]
    async fn test_load_missing_author_names_entry() {
        let mut bad = node("004_bad");
        bad.author.clear();

        let err = ManifestLoader::new(".").load(vec![bad]).await.unwrap_err();
        assert!(matches!(
            &err,
            MigrationError::MissingField { id, field: "author" } if id == "004_bad"
        ));
        assert!(err.is_load_error());
    }

    #[tokio::test]
    async fn test_validation_order() {
        let mut bad = node("005");
        bad.labels.clear();
        bad.kind.clear();
        let err = ManifestLoader::new(".").load(vec![bad]).await.unwrap_err();
        assert!(matches!(err, MigrationError::MissingField { field: "labels", .. }));

        let mut no_id = node("");
        no_id.include = None;
        let err = ManifestLoader::new(".").load(vec![no_id]).await.unwrap_err();
        assert!(matches!(&err, MigrationError::MissingField { id, field: "id" } if id.is_empty()));
    }

    #[tokio::test]
    async fn test_unsupported_kind_is_hard_error() {
        let mut bad = node("006_struct");
        bad.kind = "struct".to_string();

        let err = ManifestLoader::new(".").load(vec![bad]).await.unwrap_err();
        assert_eq!(err.to_string(), "006_struct: unsupported kind=struct");
    }

    #[tokio::test]
    async fn test_missing_up_include() {
        let mut bad = node("007");
        bad.include = None;

        let err = ManifestLoader::new(".").load(vec![bad]).await.unwrap_err();
        assert!(matches!(err, MigrationError::MissingScript { .. }));
    }

    #[tokio::test]
    async fn test_unreadable_script() {
        let dir = TempDir::new().unwrap();
        let err = ManifestLoader::new(dir.path())
            .load(vec![node("008_missing")])
            .await
            .unwrap_err();

        match err {
            MigrationError::ScriptRead { id, direction, path, .. } => {
                assert_eq!(id, "008_missing");
                assert_eq!(direction, Direction::Up);
                assert_eq!(path, dir.path().join("008_missing.sql"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_load_file_uses_manifest_dir() {
        let dir = TempDir::new().unwrap();
        write(&dir, "001_init.sql", "CREATE TABLE t();");
        write(
            &dir,
            MANIFEST_FILE_NAME,
            r#"
            [[changelog]]
            id = "001_init"
            kind = "sql"
            author = "a"
            labels = "l"
            include = { file = "001_init.sql", relative_to_changelog_file = true }
            "#,
        );

        let manifest = ManifestLoader::load_file(dir.path().join(MANIFEST_FILE_NAME))
            .await
            .unwrap();
        assert_eq!(manifest.len(), 1);
        assert!(manifest.non_transactional.is_empty());
    }

    #[tokio::test]
    async fn test_read_manifest_parse_error() {
        let dir = TempDir::new().unwrap();
        write(&dir, MANIFEST_FILE_NAME, "[[changelog]\nid = ");

        let err = read_manifest(dir.path().join(MANIFEST_FILE_NAME)).await.unwrap_err();
        assert!(matches!(err, MigrationError::Manifest(_)));
    }
}
