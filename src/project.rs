//! The project registry: every project known to a run, plus the buildrequires
//! edges between them.

use crate::metadata::PackageMetadata;
use crate::vcs::{Locator, SourceState};
use anyhow::bail;
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::PathBuf;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ProjectId(usize);
impl ProjectId {
    fn index(&self) -> usize {
        self.0
    }
}

/// An isolated, reusable build environment, e.g. the name of a mock chroot
/// configuration.  Projects are built once per root.
#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BuildRoot(String);

impl BuildRoot {
    pub fn new(name: impl Into<String>) -> Self {
        BuildRoot(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BuildRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Files produced by building a project in one root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifacts {
    /// Binary package file names.
    pub rpms: Vec<String>,
    /// Source package file names.
    pub srpms: Vec<String>,
}

#[derive(Debug)]
pub struct Project {
    pub name: String,
    pub meta: PackageMetadata,
    /// Directory holding the project sources.
    pub checkout: PathBuf,
    /// Where the sources were fetched from; None for local directories.
    pub locator: Option<Locator>,
    /// Live state of the sources, as queried at the start of the run.
    pub source: SourceState,
    /// Version identity the build will produce.
    pub version: String,
    /// Release fixed by source control; None leaves it to the release policy.
    pub release: Option<String>,
    /// The sources differ from the last successful build.
    pub changed: bool,
    rebuild_needed: bool,
    /// Presence of a root means the project was built there in this run.
    built: FxHashMap<BuildRoot, Artifacts>,
    upstream: FxHashSet<ProjectId>,
    downstream: FxHashSet<ProjectId>,
}

impl Project {
    pub fn new(name: impl Into<String>, meta: PackageMetadata, checkout: PathBuf) -> Self {
        let version = meta.version.clone();
        Project {
            name: name.into(),
            meta,
            checkout,
            locator: None,
            source: SourceState::default(),
            version,
            release: None,
            changed: false,
            rebuild_needed: false,
            built: FxHashMap::default(),
            upstream: FxHashSet::default(),
            downstream: FxHashSet::default(),
        }
    }

    /// Whether the project needs building because something it depends on
    /// is being rebuilt, or because a rebuild was forced.
    pub fn rebuild_needed(&self) -> bool {
        self.rebuild_needed
    }

    /// Flag for rebuild.  Never cleared within a run.
    pub fn mark_for_rebuild(&mut self) {
        self.rebuild_needed = true;
    }

    /// Either flag puts the project into the candidate set.
    pub fn needs_build(&self) -> bool {
        self.changed || self.rebuild_needed
    }

    pub fn is_built(&self, root: &BuildRoot) -> bool {
        self.built.contains_key(root)
    }

    /// Record a completed build in `root`.
    pub fn mark_built(&mut self, root: &BuildRoot, artifacts: Artifacts) {
        if self.built.insert(root.clone(), artifacts).is_some() {
            panic!("{} already built in {}", self.name, root);
        }
    }

    pub fn artifacts(&self, root: &BuildRoot) -> Option<&Artifacts> {
        self.built.get(root)
    }

    /// Projects whose artifacts this project needs to build.
    pub fn upstream(&self) -> &FxHashSet<ProjectId> {
        &self.upstream
    }

    /// Projects that need this project's artifacts to build.
    pub fn downstream(&self) -> &FxHashSet<ProjectId> {
        &self.downstream
    }
}

#[derive(Default)]
pub struct Registry {
    projects: Vec<Project>,
    by_name: FxHashMap<String, ProjectId>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn add(&mut self, project: Project) -> anyhow::Result<ProjectId> {
        if self.by_name.contains_key(&project.name) {
            bail!("project {:?} defined twice", project.name);
        }
        let id = ProjectId(self.projects.len());
        self.by_name.insert(project.name.clone(), id);
        self.projects.push(project);
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<ProjectId> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn get(&self, id: ProjectId) -> &Project {
        &self.projects[id.index()]
    }

    pub fn get_mut(&mut self, id: ProjectId) -> &mut Project {
        &mut self.projects[id.index()]
    }

    pub fn ids(&self) -> impl Iterator<Item = ProjectId> {
        (0..self.projects.len()).map(ProjectId)
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Order ids by project name, the order every pass visits them in.
    pub fn sort_by_name(&self, ids: &mut [ProjectId]) {
        ids.sort_by(|&a, &b| self.get(a).name.cmp(&self.get(b).name));
    }

    /// Sorted names of the given projects, for reporting.
    pub fn names(&self, ids: impl IntoIterator<Item = ProjectId>) -> Vec<String> {
        let mut names: Vec<String> = ids
            .into_iter()
            .map(|id| self.get(id).name.clone())
            .collect();
        names.sort();
        names
    }

    /// Record that `to` needs an artifact `from` produces.
    pub(crate) fn add_edge(&mut self, from: ProjectId, to: ProjectId) {
        self.projects[from.index()].downstream.insert(to);
        self.projects[to.index()].upstream.insert(from);
    }

    pub(crate) fn clear_edges(&mut self) {
        for project in &mut self.projects {
            project.upstream.clear();
            project.downstream.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(name: &str) -> Project {
        Project::new(name, PackageMetadata::default(), PathBuf::from(name))
    }

    #[test]
    fn duplicate_name() {
        let mut reg = Registry::new();
        reg.add(project("a")).unwrap();
        let err = reg.add(project("a")).unwrap_err();
        assert!(err.to_string().contains("defined twice"));
    }

    #[test]
    fn edges_are_bidirectional() {
        let mut reg = Registry::new();
        let a = reg.add(project("a")).unwrap();
        let b = reg.add(project("b")).unwrap();
        reg.add_edge(a, b);
        assert!(reg.get(a).downstream().contains(&b));
        assert!(reg.get(b).upstream().contains(&a));
        reg.clear_edges();
        assert!(reg.get(a).downstream().is_empty());
        assert!(reg.get(b).upstream().is_empty());
    }

    #[test]
    fn sorted_by_name() {
        let mut reg = Registry::new();
        let c = reg.add(project("c")).unwrap();
        let a = reg.add(project("a")).unwrap();
        let b = reg.add(project("b")).unwrap();
        let mut ids = vec![c, b, a];
        reg.sort_by_name(&mut ids);
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    #[should_panic(expected = "already built")]
    fn double_build_panics() {
        let mut p = project("a");
        let root = BuildRoot::new("epel-7");
        p.mark_built(&root, Artifacts::default());
        p.mark_built(&root, Artifacts::default());
    }

    #[test]
    fn built_per_root() {
        let mut p = project("a");
        let r1 = BuildRoot::new("r1");
        let r2 = BuildRoot::new("r2");
        p.mark_built(&r1, Artifacts::default());
        assert!(p.is_built(&r1));
        assert!(!p.is_built(&r2));
    }
}
