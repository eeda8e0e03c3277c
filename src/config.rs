//! Run configuration: the build configuration file, parsed run options and
//! the tools found on the host.

use crate::project::BuildRoot;
use crate::vcs::Locator;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid section name {0:?}: only letters, digits and dashes are allowed")]
    InvalidName(String),
    #[error("section [{section}] is missing {field:?}")]
    MissingField {
        section: String,
        field: &'static str,
    },
    #[error("no projects to build")]
    NoProjects,
    #[error("build root {0:?} listed twice")]
    DuplicateRoot(String),
    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuilderSection {
    #[serde(default)]
    roots: Vec<String>,
    configdir: Option<PathBuf>,
    url: Option<String>,
    #[serde(rename = "ref")]
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectSection {
    url: Option<String>,
    #[serde(rename = "ref")]
    reference: Option<String>,
    spec: Option<String>,
    #[serde(default = "enabled_default")]
    enabled: bool,
}

fn enabled_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    builder: Option<BuilderSection>,
    #[serde(default)]
    projects: BTreeMap<String, ProjectSection>,
}

/// Where the builder's own settings, e.g. mock root configurations, live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderSource {
    /// A directory on disk.
    Local(PathBuf),
    /// A git repository, checked out into the workspace.
    Git(Locator),
}

/// A project fetched from source control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteProject {
    pub name: String,
    pub locator: Locator,
    /// Spec file to use when the repository holds several.
    pub spec: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildConfig {
    pub builder: Option<BuilderSource>,
    pub roots: Vec<BuildRoot>,
    /// Enabled projects, sorted by name.
    pub projects: Vec<RemoteProject>,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Fails on the first root named more than once.
pub fn check_roots(roots: &[BuildRoot]) -> Result<(), ConfigError> {
    let mut seen = rustc_hash::FxHashSet::default();
    for root in roots {
        if !seen.insert(root.name()) {
            return Err(ConfigError::DuplicateRoot(root.name().to_string()));
        }
    }
    Ok(())
}

fn required(
    value: Option<String>,
    section: &str,
    field: &'static str,
) -> Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingField {
        section: section.to_string(),
        field,
    })
}

impl BuildConfig {
    pub fn parse(text: &str, path: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;

        let (builder, roots) = match raw.builder {
            None => (None, Vec::new()),
            Some(section) => {
                let source = match (section.configdir, section.url) {
                    (Some(dir), _) => Some(BuilderSource::Local(dir)),
                    (None, Some(url)) => Some(BuilderSource::Git(Locator {
                        url,
                        reference: required(section.reference, "builder", "ref")?,
                    })),
                    (None, None) => None,
                };
                let roots: Vec<BuildRoot> =
                    section.roots.into_iter().map(BuildRoot::new).collect();
                check_roots(&roots)?;
                (source, roots)
            }
        };

        let mut projects = Vec::new();
        for (name, section) in raw.projects {
            if !valid_name(&name) {
                return Err(ConfigError::InvalidName(name));
            }
            if !section.enabled {
                debug!("project {} disabled", name);
                continue;
            }
            let section_name = format!("projects.{}", name);
            projects.push(RemoteProject {
                locator: Locator {
                    url: required(section.url, &section_name, "url")?,
                    reference: required(section.reference, &section_name, "ref")?,
                },
                spec: section.spec,
                name,
            });
        }
        Ok(BuildConfig {
            builder,
            roots,
            projects,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        Self::parse(&text, &display)
    }
}

/// Options of one run, after argument and config parsing.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub workspace: PathBuf,
    pub roots: Vec<BuildRoot>,
    /// Rebuild every project regardless of changes.
    pub force_rebuild: bool,
    /// Remove build roots after the run, and after a failed build.
    pub scrub: bool,
    /// Initialise each root before building in it.
    pub init: bool,
    /// Build binaries straight from the source archive, skipping the
    /// source package.
    pub nosrpm: bool,
    /// Suffix keeping concurrent runs' chroots apart.
    pub uniqueext: String,
    /// Extra arguments for every mock invocation.
    pub mock_arguments: Vec<String>,
}

/// Optional tools found on the host, probed once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub pigz: bool,
    pub pbzip2: bool,
    pub pxz: bool,
}

fn on_path(path: Option<&std::ffi::OsStr>, tool: &str) -> bool {
    path.map_or(false, |path| {
        std::env::split_paths(path).any(|dir| dir.join(tool).is_file())
    })
}

impl Capabilities {
    pub fn detect() -> Self {
        let path = std::env::var_os("PATH");
        let caps = Capabilities {
            pigz: on_path(path.as_deref(), "pigz"),
            pbzip2: on_path(path.as_deref(), "pbzip2"),
            pxz: on_path(path.as_deref(), "pxz"),
        };
        debug!("host capabilities: {:?}", caps);
        caps
    }

    pub fn gzip_command(&self) -> &'static str {
        if self.pigz {
            "pigz"
        } else {
            "gzip"
        }
    }

    pub fn bzip2_command(&self) -> &'static str {
        if self.pbzip2 {
            "pbzip2"
        } else {
            "bzip2"
        }
    }

    pub fn xz_command(&self) -> &'static str {
        if self.pxz {
            "pxz"
        } else {
            "xz"
        }
    }
}
