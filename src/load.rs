//! Project loading: fetches sources, reads metadata and fills the registry.

use crate::config::{BuildConfig, BuilderSource, RemoteProject};
use crate::fingerprint::{BuilderStamp, Store};
use crate::metadata::{self, MetadataSource, SpecReader};
use crate::project::{Project, ProjectId, Registry};
use crate::vcs::{Git, Locator, SourceControl, Unversioned};
use crate::version::{self, TagStrategy};
use anyhow::{anyhow, Context};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A project directory given on the command line, with the spec to use
/// when the directory holds several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalProject {
    pub name: String,
    pub dir: PathBuf,
    pub spec: Option<String>,
}

/// One project per spec file in each directory.  A directory with a single
/// spec is named after the directory; with several, each project is named
/// `<dir>_<spec stem>`.
pub fn local_projects(dirs: &[PathBuf]) -> anyhow::Result<Vec<LocalProject>> {
    let mut projects = Vec::new();
    for dir in dirs {
        let dir = dir
            .canonicalize()
            .with_context(|| format!("project directory {}", dir.display()))?;
        let base = dir
            .file_name()
            .ok_or_else(|| anyhow!("{} has no name", dir.display()))?
            .to_string_lossy()
            .into_owned();
        let specs = metadata::find_specs(&dir)?;
        if specs.len() <= 1 {
            // No spec at all is reported when the metadata is read.
            projects.push(LocalProject {
                name: base,
                dir,
                spec: None,
            });
            continue;
        }
        for spec in specs {
            let (Some(stem), Some(file)) = (spec.file_stem(), spec.file_name()) else {
                continue;
            };
            projects.push(LocalProject {
                name: format!("{}_{}", base, stem.to_string_lossy()),
                dir: dir.clone(),
                spec: Some(file.to_string_lossy().into_owned()),
            });
        }
    }
    Ok(projects)
}

/// Fills a registry from project sources.
pub struct Loader<'a> {
    registry: Registry,
    metadata: &'a dyn MetadataSource,
    strategies: Vec<Box<dyn TagStrategy>>,
}

impl<'a> Loader<'a> {
    pub fn new(metadata: &'a dyn MetadataSource) -> Self {
        Loader {
            registry: Registry::new(),
            metadata,
            strategies: version::default_strategies(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Read the project in `dir` and add it.  `vcs` answers source control
    /// queries about `dir`.
    pub fn add(
        &mut self,
        name: &str,
        dir: &Path,
        locator: Option<Locator>,
        spec: Option<&str>,
        vcs: &dyn SourceControl,
    ) -> anyhow::Result<ProjectId> {
        let meta = self
            .metadata
            .read(dir, spec)
            .with_context(|| format!("project {}", name))?;
        let mut project = Project::new(name, meta, dir.to_path_buf());
        project.source = vcs
            .state()
            .with_context(|| format!("query sources of {}", name))?;
        project.locator = locator;

        if project.meta.version == version::VERSION_MACRO {
            project.version = match project.source.revision {
                Some(_) => version::resolve_tag(&self.strategies, vcs)
                    .with_context(|| format!("version of {}", name))?,
                None => version::UNVERSIONED_TAG.to_string(),
            };
        }
        let release = &project.meta.release;
        if release.contains(version::COMMIT_COUNT_MACRO)
            || release.contains(version::COMMIT_HASH_MACRO)
        {
            project.release = Some(version::expand_commit_macros(release, vcs)?);
        }
        debug!(
            "{}: {} {} from {}",
            name,
            project.meta.name,
            project.version,
            dir.display()
        );
        self.registry.add(project)
    }

    pub fn finish(self) -> Registry {
        self.registry
    }
}

/// Everything a run starts from.
pub struct State {
    pub registry: Registry,
    /// Directory holding the builder's root configurations.
    pub configdir: PathBuf,
    /// Revision of builder settings taken from git.
    pub stamp: Option<BuilderStamp>,
    /// The builder settings differ from the last successful run.
    pub builder_changed: bool,
}

/// Check out the builder settings, returning the directory holding them and
/// their revision when they come from git.
fn builder_settings(
    workspace: &Path,
    source: &BuilderSource,
) -> anyhow::Result<(PathBuf, Option<BuilderStamp>)> {
    match source {
        BuilderSource::Local(dir) => Ok((dir.clone(), None)),
        BuilderSource::Git(locator) => {
            let dir = workspace.join("mocksettings").join("checkout");
            let mut git = Git::new(&dir);
            git.update_to_ref(locator)
                .context("fetch builder settings")?;
            let revision = git
                .current_revision()?
                .ok_or_else(|| anyhow!("builder settings in {} have no revision", dir.display()))?;
            Ok((dir, Some(BuilderStamp { revision })))
        }
    }
}

fn fetch(workspace: &Path, remote: &RemoteProject) -> anyhow::Result<Git> {
    let dir = Store::new(workspace).project_dir(&remote.name).join("checkout");
    let mut git = Git::new(dir);
    info!("updating {} to {}", remote.name, remote.locator.reference);
    git.update_to_ref(&remote.locator)
        .with_context(|| format!("project {}", remote.name))?;
    Ok(git)
}

/// Fetch every project and read its metadata.  Local projects shadow
/// configured projects of the same name.
pub fn read(
    workspace: &Path,
    config: &BuildConfig,
    local_dirs: &[PathBuf],
    mockconf: Option<&Path>,
) -> anyhow::Result<State> {
    let source = match (mockconf, &config.builder) {
        (Some(dir), _) => BuilderSource::Local(dir.to_path_buf()),
        (None, Some(source)) => source.clone(),
        (None, None) => anyhow::bail!("no builder settings: give a mock config directory"),
    };
    let (configdir, stamp) = builder_settings(workspace, &source)?;
    let builder_changed = match &stamp {
        Some(stamp) => BuilderStamp::load(workspace)?.as_ref() != Some(stamp),
        None => false,
    };

    let reader = SpecReader;
    let mut loader = Loader::new(&reader);
    for local in local_projects(local_dirs)? {
        let git = Git::new(&local.dir);
        let vcs: Box<dyn SourceControl> = if git.current_revision()?.is_some() {
            Box::new(git)
        } else {
            Box::new(Unversioned::new(&local.dir))
        };
        loader.add(&local.name, &local.dir, None, local.spec.as_deref(), vcs.as_ref())?;
    }
    for remote in &config.projects {
        if loader.contains(&remote.name) {
            warn!(
                "project {} given as a local directory, ignoring its configuration",
                remote.name
            );
            continue;
        }
        let git = fetch(workspace, remote)?;
        let dir = git.dir().to_path_buf();
        loader.add(
            &remote.name,
            &dir,
            Some(remote.locator.clone()),
            remote.spec.as_deref(),
            &git,
        )?;
    }

    Ok(State {
        registry: loader.finish(),
        configdir,
        stamp,
        builder_changed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_project_per_spec() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let single = dir.path().join("hello");
        let multi = dir.path().join("tools");
        std::fs::create_dir_all(&single)?;
        std::fs::create_dir_all(&multi)?;
        std::fs::write(single.join("hello.spec"), "")?;
        std::fs::write(multi.join("a.spec"), "")?;
        std::fs::write(multi.join("b.spec"), "")?;

        let projects = local_projects(&[single, multi])?;
        let names: Vec<&str> = projects.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["hello", "tools_a", "tools_b"]);
        assert_eq!(projects[0].spec, None);
        assert_eq!(projects[2].spec.as_deref(), Some("b.spec"));
        Ok(())
    }

    #[test]
    fn missing_dir() {
        let err = local_projects(&[PathBuf::from("/nonexistent/project")]).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/project"));
    }
}
