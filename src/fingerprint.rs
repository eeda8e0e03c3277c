//! The fingerprint store records, per project, what source state its
//! artifacts were last successfully built from.  It is what makes builds
//! incremental: a project whose live source state matches its fingerprint
//! needs no build.
//!
//! Each record is a small JSON document, overwritten wholesale after a
//! successful build and never merged.  A build that fails or is interrupted
//! leaves the previous record in place, so the next run retries it.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

const STATUS_FILE: &str = "status.txt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    #[serde(rename = "project")]
    pub name: String,
    /// Source locator; absent for local directory projects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<String>,
    /// Revision id the last successful build used.
    #[serde(rename = "sha")]
    pub revision: String,
    #[serde(rename = "packageversion")]
    pub version: String,
}

/// Per-project fingerprints under `<workspace>/projects/<name>/`.
pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn new(workspace: &Path) -> Self {
        Store {
            dir: workspace.join("projects"),
        }
    }

    /// Directory holding all per-project state for `name`.
    pub fn project_dir(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn path(&self, name: &str) -> PathBuf {
        self.project_dir(name).join(STATUS_FILE)
    }

    /// The last recorded fingerprint, or None if the project was never built.
    pub fn load(&self, name: &str) -> anyhow::Result<Option<Fingerprint>> {
        let path = self.path(name);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
        };
        let fingerprint = serde_json::from_str(&text)
            .with_context(|| format!("parse fingerprint {}", path.display()))?;
        Ok(Some(fingerprint))
    }

    pub fn save(&self, fingerprint: &Fingerprint) -> anyhow::Result<()> {
        let path = self.path(&fingerprint.name);
        debug!("updating fingerprint {}", path.display());
        std::fs::create_dir_all(self.project_dir(&fingerprint.name))?;
        let json = serde_json::to_string(fingerprint)?;
        std::fs::write(&path, json).with_context(|| format!("write {}", path.display()))
    }

    /// Remove state of projects no longer configured.  Returns removed names.
    pub fn remove_stale(&self, keep: impl Fn(&str) -> bool) -> anyhow::Result<Vec<String>> {
        let mut removed = Vec::new();
        if !self.dir.is_dir() {
            return Ok(removed);
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.path().is_dir() || keep(&name) {
                continue;
            }
            debug!("removing stale project directory {}", entry.path().display());
            std::fs::remove_dir_all(entry.path())?;
            removed.push(name);
        }
        removed.sort();
        Ok(removed)
    }
}

/// Revision of the builder's own configuration at the last successful run.
/// A change means every project has to be rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderStamp {
    #[serde(rename = "sha")]
    pub revision: String,
}

impl BuilderStamp {
    fn path(workspace: &Path) -> PathBuf {
        workspace.join("mocksettings").join(STATUS_FILE)
    }

    pub fn load(workspace: &Path) -> anyhow::Result<Option<BuilderStamp>> {
        let path = Self::path(workspace);
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        let stamp = serde_json::from_str(&text)
            .with_context(|| format!("parse builder stamp {}", path.display()))?;
        Ok(Some(stamp))
    }

    pub fn save(&self, workspace: &Path) -> anyhow::Result<()> {
        let path = Self::path(workspace);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string(self)?)
            .with_context(|| format!("write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint() -> Fingerprint {
        Fingerprint {
            name: "hello".into(),
            url: Some("https://example.com/hello.git".into()),
            reference: Some("master".into()),
            spec: None,
            revision: "de71b7e7fc0410df3d74cf209f5216b24157988a".into(),
            version: "2.4".into(),
        }
    }

    #[test]
    fn missing_is_none() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = Store::new(dir.path());
        assert_eq!(store.load("hello")?, None);
        Ok(())
    }

    #[test]
    fn save_overwrites() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = Store::new(dir.path());
        store.save(&fingerprint())?;
        let mut next = fingerprint();
        next.revision = "0123".into();
        next.url = None;
        store.save(&next)?;
        assert_eq!(store.load("hello")?, Some(next));
        Ok(())
    }

    #[test]
    fn reads_existing_status_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = Store::new(dir.path());
        std::fs::create_dir_all(store.project_dir("hello"))?;
        std::fs::write(
            dir.path().join("projects/hello/status.txt"),
            r#"{"url": "https://example.com/hello.git", "ref": "master", "spec": null,
               "packageversion": "2.4", "sha": "de71b7e7fc0410df3d74cf209f5216b24157988a",
               "project": "hello"}"#,
        )?;
        assert_eq!(store.load("hello")?, Some(fingerprint()));
        Ok(())
    }

    #[test]
    fn corrupt_is_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = Store::new(dir.path());
        std::fs::create_dir_all(store.project_dir("hello"))?;
        std::fs::write(dir.path().join("projects/hello/status.txt"), "{")?;
        assert!(store.load("hello").is_err());
        Ok(())
    }

    #[test]
    fn stale_dirs() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = Store::new(dir.path());
        std::fs::create_dir_all(store.project_dir("keep"))?;
        std::fs::create_dir_all(store.project_dir("old"))?;
        assert_eq!(store.remove_stale(|name| name == "keep")?, vec!["old"]);
        assert!(store.project_dir("keep").is_dir());
        assert!(!store.project_dir("old").exists());
        Ok(())
    }

    #[test]
    fn builder_stamp() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        assert_eq!(BuilderStamp::load(dir.path())?, None);
        let stamp = BuilderStamp {
            revision: "abc".into(),
        };
        stamp.save(dir.path())?;
        assert_eq!(BuilderStamp::load(dir.path())?, Some(stamp));
        Ok(())
    }
}
