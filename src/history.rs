//! Build history: what each run built, and from which revision.
//!
//! Two files under the common repository: `buildhistory.log`, appended to
//! for people, and `buildhistory.json`, a one-element array whose object maps
//! run timestamps to entries.  The JSON document is read, merged by
//! timestamp and rewritten whole; older entries pass through untouched.

use crate::project::{BuildRoot, ProjectId, Registry};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// What one project built in a run, over all roots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    #[serde(rename = "rpmArtifacts", alias = "rpmfiles", default)]
    pub rpms: Vec<String>,
    #[serde(rename = "srpmArtifacts", alias = "srpmfiles", default)]
    pub srpms: Vec<String>,
    /// Source revision, present when the project's sources changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

/// One run's records by project name.
pub type Entry = BTreeMap<String, ProjectRecord>;

/// Run timestamps in the format history keys use.
pub fn timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.6f")
        .to_string()
}

/// Collect the records of `built` projects.
pub fn gather(registry: &Registry, built: &[ProjectId], roots: &[BuildRoot]) -> Entry {
    let mut entry = Entry::new();
    for &id in built {
        let project = registry.get(id);
        let mut record = ProjectRecord::default();
        for root in roots {
            if let Some(artifacts) = project.artifacts(root) {
                record.rpms.extend(artifacts.rpms.iter().cloned());
                record.srpms.extend(artifacts.srpms.iter().cloned());
            }
        }
        if project.changed {
            record.commit = project.source.revision.clone();
        }
        entry.insert(project.name.clone(), record);
    }
    entry
}

pub struct History {
    log: PathBuf,
    json: PathBuf,
}

impl History {
    /// History files inside `dir`, normally `<workspace>/buildrepository`.
    pub fn new(dir: &Path) -> Self {
        History {
            log: dir.join("buildhistory.log"),
            json: dir.join("buildhistory.json"),
        }
    }

    pub fn record(&self, timestamp: &str, entry: &Entry) -> anyhow::Result<()> {
        if let Some(dir) = self.log.parent() {
            std::fs::create_dir_all(dir)?;
        }
        self.append_log(timestamp, entry)
            .with_context(|| format!("write {}", self.log.display()))?;
        self.merge_json(timestamp, entry)
            .with_context(|| format!("write {}", self.json.display()))
    }

    fn append_log(&self, timestamp: &str, entry: &Entry) -> anyhow::Result<()> {
        info!("writing build history to {}", self.log.display());
        let mut text = format!("{}\n", timestamp);
        for (name, record) in entry {
            text.push_str("  ");
            text.push_str(name);
            if let Some(commit) = &record.commit {
                text.push_str("  ");
                text.push_str(commit);
            }
            text.push('\n');
            for file in record.rpms.iter().chain(&record.srpms) {
                text.push_str("    ");
                text.push_str(file);
                text.push('\n');
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log)?;
        file.write_all(text.as_bytes())?;
        Ok(())
    }

    /// Entries in the document as raw JSON.
    fn read_raw(&self) -> anyhow::Result<BTreeMap<String, serde_json::Value>> {
        if !self.json.is_file() {
            return Ok(BTreeMap::new());
        }
        let text = std::fs::read_to_string(&self.json)?;
        let doc: Vec<BTreeMap<String, serde_json::Value>> = serde_json::from_str(&text)
            .with_context(|| format!("parse {}", self.json.display()))?;
        Ok(doc.into_iter().next().unwrap_or_default())
    }

    fn merge_json(&self, timestamp: &str, entry: &Entry) -> anyhow::Result<()> {
        info!("writing build history to {}", self.json.display());
        let mut doc = self.read_raw()?;
        doc.insert(timestamp.to_string(), serde_json::to_value(entry)?);
        let mut text = serde_json::to_string_pretty(&[doc])?;
        text.push('\n');
        std::fs::write(&self.json, text)?;
        Ok(())
    }

    /// All recorded runs, oldest first.
    pub fn load(&self) -> anyhow::Result<BTreeMap<String, Entry>> {
        let mut runs = BTreeMap::new();
        for (timestamp, value) in self.read_raw()? {
            let entry = serde_json::from_value(value)
                .with_context(|| format!("history entry {}", timestamp))?;
            runs.insert(timestamp, entry);
        }
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PackageMetadata;
    use crate::project::{Artifacts, Project};

    fn entry(name: &str, rpm: &str, commit: Option<&str>) -> Entry {
        let mut entry = Entry::new();
        entry.insert(
            name.to_string(),
            ProjectRecord {
                rpms: vec![rpm.to_string()],
                srpms: vec![],
                commit: commit.map(String::from),
            },
        );
        entry
    }

    #[test]
    fn merge_keeps_earlier_runs() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let history = History::new(dir.path());
        let t1 = entry("a", "a-1-1.x86_64.rpm", Some("abc"));
        let t2 = entry("b", "b-1-1.x86_64.rpm", None);
        let t3 = entry("a", "a-1-2.x86_64.rpm", Some("def"));
        history.record("2024-01-01 10:00:00.000001", &t1)?;
        history.record("2024-01-02 10:00:00.000001", &t2)?;
        history.record("2024-01-03 10:00:00.000001", &t3)?;

        let runs = history.load()?;
        assert_eq!(runs.len(), 3);
        assert_eq!(runs["2024-01-01 10:00:00.000001"], t1);
        assert_eq!(runs["2024-01-02 10:00:00.000001"], t2);
        assert_eq!(runs["2024-01-03 10:00:00.000001"], t3);
        Ok(())
    }

    #[test]
    fn legacy_fields_survive_rewrite() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let history = History::new(dir.path());
        std::fs::write(
            dir.path().join("buildhistory.json"),
            r#"[{"2018-10-11 08:39:16.918914": {"ansible-fm": {
                "rpmfiles": ["ansible-fm-c46.gde71b7e-1.el7.centos.noarch.rpm"],
                "commit": "de71b7e7fc0410df3d74cf209f5216b24157988a",
                "srpmfiles": ["ansible-fm-c46.gde71b7e-1.el7.centos.src.rpm"]}}}]"#,
        )?;
        history.record("2024-01-01 00:00:00.000000", &entry("b", "b.rpm", None))?;

        let text = std::fs::read_to_string(dir.path().join("buildhistory.json"))?;
        // The old entry is copied as is, not renamed.
        assert!(text.contains("\"rpmfiles\""));
        assert!(text.contains("\"rpmArtifacts\""));
        let runs = history.load()?;
        let old = &runs["2018-10-11 08:39:16.918914"]["ansible-fm"];
        assert_eq!(
            old.srpms,
            vec!["ansible-fm-c46.gde71b7e-1.el7.centos.src.rpm"]
        );
        Ok(())
    }

    #[test]
    fn log_format() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let history = History::new(dir.path());
        let mut e = entry("a", "a.rpm", Some("abc"));
        e.get_mut("a").unwrap().srpms.push("a.src.rpm".into());
        history.record("T1", &e)?;
        history.record("T2", &entry("b", "b.rpm", None))?;
        assert_eq!(
            std::fs::read_to_string(dir.path().join("buildhistory.log"))?,
            "T1\n  a  abc\n    a.rpm\n    a.src.rpm\nT2\n  b\n    b.rpm\n"
        );
        Ok(())
    }

    #[test]
    fn gather_over_roots() {
        let mut reg = Registry::new();
        let meta = PackageMetadata {
            name: "a".into(),
            ..Default::default()
        };
        let id = reg.add(Project::new("a", meta.clone(), "a".into())).unwrap();
        let other = reg.add(Project::new("b", meta, "b".into())).unwrap();
        let roots = [BuildRoot::new("r1"), BuildRoot::new("r2")];
        for (i, root) in roots.iter().enumerate() {
            reg.get_mut(id).mark_built(
                root,
                Artifacts {
                    rpms: vec![format!("a-{}.rpm", i)],
                    srpms: vec![format!("a-{}.src.rpm", i)],
                },
            );
        }
        reg.get_mut(id).changed = true;
        reg.get_mut(id).source.revision = Some("abc".into());
        reg.get_mut(other).source.revision = Some("def".into());
        reg.get_mut(other).mark_built(&roots[0], Artifacts::default());

        let entry = gather(&reg, &[id, other], &roots);
        assert_eq!(entry["a"].rpms, vec!["a-0.rpm", "a-1.rpm"]);
        assert_eq!(entry["a"].srpms, vec!["a-0.src.rpm", "a-1.src.rpm"]);
        assert_eq!(entry["a"].commit.as_deref(), Some("abc"));
        // Rebuilt only because of an upstream: no commit.
        assert_eq!(entry["b"].commit, None);
    }

    #[test]
    fn timestamp_shape() {
        let ts = timestamp();
        // "2024-01-01 10:00:00.123456"
        assert_eq!(ts.len(), 26);
        assert_eq!(&ts[10..11], " ");
    }
}
