//! Plugin manifest discovery and parsing.
//!
//! # Responsibility
//! - Scan a plugin root for `plugin.json` metadata files.
//! - Produce an ordered, exclusively owned snapshot of parsed manifests.
//!
//! # Invariants
//! - Discovery never fails: a missing root yields an empty snapshot.
//! - Manifests with an empty `name` are excluded.
//! - Lookup returns the first match in snapshot order; duplicates are kept
//!   but shadowed.

use log::{debug, warn};
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Metadata file expected in each plugin directory.
pub const MANIFEST_FILE_NAME: &str = "plugin.json";

/// Parsed metadata for one plugin directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginManifest {
    /// Lookup key used by `Kernel::run`.
    pub name: String,
    /// Entry script name used on Windows hosts, relative to `directory`.
    pub entry_windows: String,
    /// Entry script name used on POSIX hosts, relative to `directory`.
    pub entry_posix: String,
    /// Plugin directory that owns this manifest.
    pub directory: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ManifestDocument {
    name: String,
    entry_win: String,
    entry_lin: String,
}

/// Parses manifest JSON text for a plugin located in `directory`.
///
/// Missing fields become empty strings. Unknown fields are ignored.
pub fn parse_manifest(
    text: &str,
    directory: impl Into<PathBuf>,
) -> Result<PluginManifest, ManifestParseError> {
    let document: ManifestDocument =
        serde_json::from_str(text).map_err(|err| ManifestParseError::InvalidJson {
            line: err.line(),
            column: err.column(),
            message: err.to_string(),
        })?;
    Ok(PluginManifest {
        name: document.name.trim().to_string(),
        entry_windows: document.entry_win,
        entry_posix: document.entry_lin,
        directory: directory.into(),
    })
}

/// Reads and parses `<directory>/plugin.json`.
pub fn load_manifest(directory: &Path) -> Result<PluginManifest, ManifestParseError> {
    let path = directory.join(MANIFEST_FILE_NAME);
    let text = std::fs::read_to_string(&path).map_err(|err| ManifestParseError::Unreadable {
        path: path.clone(),
        message: err.to_string(),
    })?;
    parse_manifest(&text, directory)
}

/// Plugin directory that had a metadata file but could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedManifest {
    pub directory: PathBuf,
    pub reason: String,
}

/// Ordered result of one discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestSnapshot {
    manifests: Vec<PluginManifest>,
    rejected: Vec<RejectedManifest>,
}

impl ManifestSnapshot {
    pub fn new(manifests: Vec<PluginManifest>) -> Self {
        Self {
            manifests,
            rejected: Vec::new(),
        }
    }

    /// Scans immediate subdirectories of `root`.
    ///
    /// Subdirectories are visited in path order so snapshot order does not
    /// depend on the host filesystem.
    pub fn discover(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let mut snapshot = Self::default();

        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(
                    "event=plugin_discover module=manifest status=empty root={} reason={}",
                    root.display(),
                    err
                );
                return snapshot;
            }
        };

        let mut directories: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        directories.sort();

        for directory in directories {
            if !directory.join(MANIFEST_FILE_NAME).is_file() {
                continue;
            }
            match load_manifest(&directory) {
                Ok(manifest) if !manifest.name.is_empty() => snapshot.manifests.push(manifest),
                Ok(_) => {
                    debug!(
                        "event=plugin_discover module=manifest status=skipped dir={} reason=empty_name",
                        directory.display()
                    );
                }
                Err(err) => {
                    warn!(
                        "event=plugin_discover module=manifest status=rejected dir={} error={}",
                        directory.display(),
                        err
                    );
                    snapshot.rejected.push(RejectedManifest {
                        directory,
                        reason: err.to_string(),
                    });
                }
            }
        }

        debug!(
            "event=plugin_discover module=manifest status=ok root={} plugins={} rejected={}",
            root.display(),
            snapshot.manifests.len(),
            snapshot.rejected.len()
        );
        snapshot
    }

    /// First manifest named `name`, in snapshot order.
    pub fn find(&self, name: &str) -> Option<&PluginManifest> {
        self.manifests.iter().find(|manifest| manifest.name == name)
    }

    pub fn manifests(&self) -> &[PluginManifest] {
        &self.manifests
    }

    /// Directories skipped because their metadata could not be parsed.
    pub fn rejected(&self) -> &[RejectedManifest] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }
}

/// Manifest read/parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestParseError {
    Unreadable {
        path: PathBuf,
        message: String,
    },
    InvalidJson {
        line: usize,
        column: usize,
        message: String,
    },
}

impl Display for ManifestParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreadable { path, message } => {
                write!(f, "cannot read manifest `{}`: {message}", path.display())
            }
            Self::InvalidJson {
                line,
                column,
                message,
            } => write!(f, "manifest is not valid at {line}:{column}: {message}"),
        }
    }
}

impl Error for ManifestParseError {}

#[cfg(test)]
mod tests {
    use super::{parse_manifest, ManifestParseError, ManifestSnapshot, PluginManifest};
    use std::path::PathBuf;

    fn manifest(name: &str, dir: &str) -> PluginManifest {
        PluginManifest {
            name: name.to_string(),
            entry_windows: "run.bat".to_string(),
            entry_posix: "run.sh".to_string(),
            directory: PathBuf::from(dir),
        }
    }

    #[test]
    fn parses_all_fields_and_ignores_unknown_keys() {
        let parsed = parse_manifest(
            r#"{"name": "fmt", "entry_win": "run.bat", "entry_lin": "run.sh", "version": 3}"#,
            "plugins/fmt",
        )
        .expect("manifest should parse");
        assert_eq!(parsed, manifest("fmt", "plugins/fmt"));
    }

    #[test]
    fn missing_fields_become_empty() {
        let parsed = parse_manifest(r#"{"name": "only-name"}"#, "p").expect("manifest parse");
        assert_eq!(parsed.name, "only-name");
        assert!(parsed.entry_windows.is_empty());
        assert!(parsed.entry_posix.is_empty());
    }

    #[test]
    fn handles_escaped_quotes_in_values() {
        let parsed =
            parse_manifest(r#"{"name": "say \"hi\"", "entry_lin": "a b.sh"}"#, "p").unwrap();
        assert_eq!(parsed.name, "say \"hi\"");
        assert_eq!(parsed.entry_posix, "a b.sh");
    }

    #[test]
    fn rejects_malformed_json() {
        let err = parse_manifest(r#"{"name": "broken""#, "p").unwrap_err();
        assert!(matches!(err, ManifestParseError::InvalidJson { .. }));
    }

    #[test]
    fn rejects_non_string_fields() {
        let err = parse_manifest(r#"{"name": 42}"#, "p").unwrap_err();
        assert!(matches!(err, ManifestParseError::InvalidJson { .. }));
    }

    #[test]
    fn find_returns_first_duplicate() {
        let snapshot = ManifestSnapshot::new(vec![
            manifest("dup", "plugins/a"),
            manifest("dup", "plugins/b"),
        ]);
        assert_eq!(snapshot.len(), 2);
        let found = snapshot.find("dup").expect("dup should be found");
        assert_eq!(found.directory, PathBuf::from("plugins/a"));
        assert!(snapshot.find("missing").is_none());
    }

    #[test]
    fn missing_root_gives_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = ManifestSnapshot::discover(dir.path().join("nope"));
        assert!(snapshot.is_empty());
        assert!(snapshot.rejected().is_empty());
    }
}
