//! Build runner: schedules candidate projects over build roots.
//!
//! Roots are processed one at a time.  Within a root the scheduler makes
//! passes over the projects still to build; a project is attempted only
//! once none of its upstream projects remains to be built in this root.
//! Passes continue while the previous pass built something.

use crate::builder::Builder;
use crate::config::Options;
use crate::progress::Progress;
use crate::project::{BuildRoot, ProjectId, Registry};
use anyhow::Context;
use tracing::{debug, info, warn};

/// Why a project could not be built in a root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StuckReason {
    /// Upstream projects that were themselves never built.
    BlockedBy(Vec<String>),
    /// The builder reported the build requirements unavailable.
    RequirementsUnavailable,
    /// Checking the requirements failed outright.
    ResolveFailed(String),
}

impl std::fmt::Display for StuckReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StuckReason::BlockedBy(names) => write!(f, "waiting for {}", names.join(", ")),
            StuckReason::RequirementsUnavailable => write!(f, "build requirements unavailable"),
            StuckReason::ResolveFailed(msg) => write!(f, "requirement check failed: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stuck {
    pub name: String,
    pub reason: StuckReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootOutcome {
    /// Every candidate was built, in this order.
    Built(Vec<ProjectId>),
    /// A pass made no progress; these projects were left, sorted by name.
    Unresolved(Vec<Stuck>),
}

impl RootOutcome {
    pub fn is_built(&self) -> bool {
        matches!(self, RootOutcome::Built(_))
    }
}

/// Outcomes of the roots processed in a run, in processing order.  Roots
/// after a failed one are absent.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub roots: Vec<(BuildRoot, RootOutcome)>,
}

impl RunSummary {
    /// Whether all of `roots` were processed and fully built.
    pub fn succeeded(&self, roots: &[BuildRoot]) -> bool {
        self.roots.len() == roots.len() && self.roots.iter().all(|(_, o)| o.is_built())
    }

    /// The first root that failed, with what was left in it.
    pub fn failure(&self) -> Option<(&BuildRoot, &[Stuck])> {
        self.roots.iter().find_map(|(root, outcome)| match outcome {
            RootOutcome::Unresolved(stuck) => Some((root, stuck.as_slice())),
            RootOutcome::Built(_) => None,
        })
    }
}

pub struct Work<'a> {
    registry: &'a mut Registry,
    builder: &'a mut dyn Builder,
    progress: &'a mut dyn Progress,
    /// Wipe a root after a backend failure.
    scrub: bool,
    /// Start every root from a freshly initialised environment.
    init: bool,
}

impl<'a> Work<'a> {
    pub fn new(
        registry: &'a mut Registry,
        builder: &'a mut dyn Builder,
        progress: &'a mut dyn Progress,
        options: &Options,
    ) -> Self {
        Work {
            registry,
            builder,
            progress,
            scrub: options.scrub,
            init: options.init,
        }
    }

    /// On a backend failure, wipe the root if configured to; the original
    /// error is what gets reported.
    fn backend_failed(&mut self, root: &BuildRoot, err: anyhow::Error) -> anyhow::Error {
        if self.scrub {
            if let Err(wipe_err) = self.builder.wipe(root) {
                warn!("could not wipe {} after failure: {:#}", root, wipe_err);
            }
        } else {
            warn!("build root {} kept for inspection", root);
        }
        err
    }

    /// Build every project of `candidates` in `root`.  Backend failures are
    /// errors; failing to make progress is an `Unresolved` outcome.
    pub fn build_root(
        &mut self,
        root: &BuildRoot,
        candidates: &[ProjectId],
    ) -> anyhow::Result<RootOutcome> {
        let mut remaining: Vec<ProjectId> = candidates.to_vec();
        remaining.sort();
        remaining.dedup();
        self.registry.sort_by_name(&mut remaining);
        self.progress.root_started(root, remaining.len());
        info!("building {} projects in {}", remaining.len(), root);

        if let Err(err) = self.prepare(root).with_context(|| format!("prepare {}", root)) {
            return Err(self.backend_failed(root, err));
        }

        let mut order = Vec::new();
        let mut pass = 0;
        loop {
            if remaining.is_empty() {
                return Ok(RootOutcome::Built(order));
            }
            pass += 1;
            let mut built = 0;
            let mut stuck = Vec::new();
            for id in remaining.clone() {
                let project = self.registry.get(id);
                let blockers: Vec<ProjectId> = project
                    .upstream()
                    .iter()
                    .copied()
                    .filter(|up| remaining.contains(up))
                    .collect();
                let reason = if !blockers.is_empty() {
                    StuckReason::BlockedBy(self.registry.names(blockers))
                } else {
                    match self.builder.resolve_requirements(root, project) {
                        Ok(true) => {
                            self.build_one(root, id)?;
                            remaining.retain(|&r| r != id);
                            order.push(id);
                            built += 1;
                            continue;
                        }
                        Ok(false) => StuckReason::RequirementsUnavailable,
                        Err(err) => StuckReason::ResolveFailed(format!("{:#}", err)),
                    }
                };
                let project = self.registry.get(id);
                debug!("{}: deferred in {}: {}", project.name, root, reason);
                self.progress.deferred(root, project, &reason.to_string());
                stuck.push(Stuck {
                    name: project.name.clone(),
                    reason,
                });
            }
            self.progress
                .pass_finished(root, pass, built, remaining.len());
            if built == 0 {
                warn!(
                    "{}: no progress in pass {}, unresolved: {}",
                    root,
                    pass,
                    stuck
                        .iter()
                        .map(|s| s.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                return Ok(RootOutcome::Unresolved(stuck));
            }
        }
    }

    fn prepare(&mut self, root: &BuildRoot) -> anyhow::Result<()> {
        if self.init {
            self.builder.init_root(root)?;
        }
        self.builder.update_local_repository(root)
    }

    /// Build one project whose upstreams are done and whose requirements
    /// are installed, then refresh the local repository for the next check.
    fn build_one(&mut self, root: &BuildRoot, id: ProjectId) -> anyhow::Result<()> {
        let project = self.registry.get(id);
        self.progress.build_started(root, project);
        let artifacts = match self
            .builder
            .build(root, project)
            .with_context(|| format!("build {} in {}", project.name, root))
        {
            Ok(artifacts) => artifacts,
            Err(err) => return Err(self.backend_failed(root, err)),
        };
        let project = self.registry.get_mut(id);
        project.mark_built(root, artifacts);
        self.progress.build_finished(root, self.registry.get(id));
        if let Err(err) = self
            .builder
            .update_local_repository(root)
            .with_context(|| format!("update local repository of {}", root))
        {
            return Err(self.backend_failed(root, err));
        }
        Ok(())
    }

    /// Build `candidates` in each root in order, stopping after the first
    /// root that cannot be completed.
    pub fn run(
        &mut self,
        candidates: &[ProjectId],
        roots: &[BuildRoot],
    ) -> anyhow::Result<RunSummary> {
        crate::config::check_roots(roots)?;
        let mut summary = RunSummary::default();
        for root in roots {
            let outcome = self.build_root(root, candidates)?;
            let failed = !outcome.is_built();
            summary.roots.push((root.clone(), outcome));
            if failed {
                break;
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PackageMetadata;
    use crate::progress::NoProgress;
    use crate::project::{Artifacts, Project};
    use crate::resolve;
    use anyhow::bail;
    use std::path::PathBuf;

    /// Requirements are available once every required package was built.
    #[derive(Default)]
    struct FakeBuilder {
        available: Vec<String>,
        built: Vec<String>,
        fail_build: Option<&'static str>,
        wiped: usize,
    }

    impl Builder for FakeBuilder {
        fn init_root(&mut self, _root: &BuildRoot) -> anyhow::Result<()> {
            Ok(())
        }
        fn resolve_requirements(
            &mut self,
            _root: &BuildRoot,
            project: &Project,
        ) -> anyhow::Result<bool> {
            Ok(project
                .meta
                .build_requires
                .iter()
                .all(|r| self.available.contains(r)))
        }
        fn build(&mut self, _root: &BuildRoot, project: &Project) -> anyhow::Result<Artifacts> {
            if self.fail_build == Some(project.name.as_str()) {
                bail!("compiler exploded");
            }
            self.built.push(project.name.clone());
            self.available.extend(project.meta.produces.iter().cloned());
            Ok(Artifacts::default())
        }
        fn update_local_repository(&mut self, _root: &BuildRoot) -> anyhow::Result<()> {
            Ok(())
        }
        fn wipe(&mut self, _root: &BuildRoot) -> anyhow::Result<()> {
            self.wiped += 1;
            Ok(())
        }
    }

    fn add(reg: &mut Registry, name: &str, requires: &[&str]) -> ProjectId {
        let meta = PackageMetadata {
            name: name.to_string(),
            produces: vec![name.to_string()],
            build_requires: requires.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        };
        reg.add(Project::new(name, meta, PathBuf::from(name))).unwrap()
    }

    fn options() -> Options {
        Options {
            scrub: true,
            ..Options::default()
        }
    }

    #[test]
    fn upstream_built_first() -> anyhow::Result<()> {
        let mut reg = Registry::new();
        // By name, zlib sorts after app.
        let lib = add(&mut reg, "zlib", &[]);
        let app = add(&mut reg, "app", &["zlib"]);
        resolve::link(&mut reg);
        let mut builder = FakeBuilder::default();
        let root = BuildRoot::new("r");
        let outcome = Work::new(&mut reg, &mut builder, &mut NoProgress, &options())
            .build_root(&root, &[app, lib])?;
        assert_eq!(outcome, RootOutcome::Built(vec![lib, app]));
        assert_eq!(builder.built, vec!["zlib", "app"]);
        assert!(reg.get(lib).is_built(&root) && reg.get(app).is_built(&root));
        Ok(())
    }

    #[test]
    fn unbuilt_upstream_leaves_only_downstream_unresolved() -> anyhow::Result<()> {
        let mut reg = Registry::new();
        let _p1 = add(&mut reg, "p1", &[]);
        let p2 = add(&mut reg, "p2", &["p1"]);
        resolve::link(&mut reg);
        let mut builder = FakeBuilder::default();
        let outcome = Work::new(&mut reg, &mut builder, &mut NoProgress, &options())
            .build_root(&BuildRoot::new("r"), &[p2])?;
        assert_eq!(
            outcome,
            RootOutcome::Unresolved(vec![Stuck {
                name: "p2".into(),
                reason: StuckReason::RequirementsUnavailable,
            }])
        );
        assert!(builder.built.is_empty());
        Ok(())
    }

    #[test]
    fn duplicate_root_rejected_before_building() {
        let mut reg = Registry::new();
        let a = add(&mut reg, "a", &[]);
        let mut builder = FakeBuilder::default();
        let root = BuildRoot::new("epel-7");
        let err = Work::new(&mut reg, &mut builder, &mut NoProgress, &options())
            .run(&[a], &[root.clone(), root.clone()])
            .unwrap_err();
        assert_eq!(err.to_string(), "build root \"epel-7\" listed twice");
        assert!(builder.built.is_empty());
        assert!(!reg.get(a).is_built(&root));
    }

    #[test]
    fn build_failure_wipes() {
        let mut reg = Registry::new();
        let a = add(&mut reg, "a", &[]);
        let mut builder = FakeBuilder {
            fail_build: Some("a"),
            ..Default::default()
        };
        let root = BuildRoot::new("epel-7");
        let err = Work::new(&mut reg, &mut builder, &mut NoProgress, &options())
            .build_root(&root, &[a])
            .unwrap_err();
        assert_eq!(err.to_string(), "build a in epel-7");
        assert_eq!(format!("{:#}", err), "build a in epel-7: compiler exploded");
        assert_eq!(builder.wiped, 1);
        assert!(!reg.get(a).is_built(&root));
    }

    #[test]
    fn build_failure_keeps_root_without_scrub() {
        let mut reg = Registry::new();
        let a = add(&mut reg, "a", &[]);
        let mut builder = FakeBuilder {
            fail_build: Some("a"),
            ..Default::default()
        };
        let root = BuildRoot::new("r");
        let result = Work::new(&mut reg, &mut builder, &mut NoProgress, &Options::default())
            .build_root(&root, &[a]);
        assert!(result.is_err());
        assert_eq!(builder.wiped, 0);
    }

    #[test]
    fn blocked_diagnostics() -> anyhow::Result<()> {
        let mut reg = Registry::new();
        let a = add(&mut reg, "a", &["b"]);
        let b = add(&mut reg, "b", &["a"]);
        let c = add(&mut reg, "c", &["missing"]);
        resolve::link(&mut reg);
        let mut builder = FakeBuilder::default();
        let outcome = Work::new(&mut reg, &mut builder, &mut NoProgress, &options())
            .build_root(&BuildRoot::new("r"), &[a, b, c])?;
        assert_eq!(
            outcome,
            RootOutcome::Unresolved(vec![
                Stuck {
                    name: "a".into(),
                    reason: StuckReason::BlockedBy(vec!["b".into()]),
                },
                Stuck {
                    name: "b".into(),
                    reason: StuckReason::BlockedBy(vec!["a".into()]),
                },
                Stuck {
                    name: "c".into(),
                    reason: StuckReason::RequirementsUnavailable,
                },
            ])
        );
        Ok(())
    }
}
