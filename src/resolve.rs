//! Dependency resolution: buildrequires edges between projects, and the
//! transitive set of projects a change forces to rebuild.

use crate::project::{ProjectId, Registry};
use rustc_hash::FxHashSet;
use tracing::debug;

/// Derive buildrequires edges from current metadata: P -> Q whenever Q needs
/// at build time a package P produces.  Replaces any previous edges.
pub fn link(registry: &mut Registry) {
    registry.clear_edges();
    let ids: Vec<ProjectId> = registry.ids().collect();
    let mut edges = Vec::new();
    for &producer in &ids {
        for package in &registry.get(producer).meta.produces {
            for &consumer in &ids {
                if consumer == producer {
                    continue;
                }
                if registry.get(consumer).meta.requires_at_build(package) {
                    debug!(
                        "{} buildrequires {} from {}",
                        registry.get(consumer).name,
                        package,
                        registry.get(producer).name
                    );
                    edges.push((producer, consumer));
                }
            }
        }
    }
    for (from, to) in edges {
        registry.add_edge(from, to);
    }
}

/// Flag everything downstream of `dirty` for rebuild.  Returns the projects
/// newly reached, excluding members of `dirty` and projects that were
/// already flagged.  Terminates on cyclic graphs: a visited project is never
/// expanded twice.
pub fn expand(registry: &mut Registry, dirty: &[ProjectId]) -> FxHashSet<ProjectId> {
    let mut seen: FxHashSet<ProjectId> = dirty.iter().copied().collect();
    let mut reached = FxHashSet::default();
    let mut queue: Vec<ProjectId> = dirty.to_vec();
    while let Some(id) = queue.pop() {
        let downstream: Vec<ProjectId> = registry.get(id).downstream().iter().copied().collect();
        for next in downstream {
            if seen.contains(&next) || registry.get(next).rebuild_needed() {
                continue;
            }
            debug!(
                "{} needs rebuild because of {}",
                registry.get(next).name,
                registry.get(id).name
            );
            registry.get_mut(next).mark_for_rebuild();
            seen.insert(next);
            reached.insert(next);
            queue.push(next);
        }
    }
    reached
}

/// The candidate set of a run: changed and forced projects plus everything
/// downstream of them, sorted by name.
pub fn plan(registry: &mut Registry) -> Vec<ProjectId> {
    let dirty: Vec<ProjectId> = registry
        .ids()
        .filter(|&id| registry.get(id).needs_build())
        .collect();
    let mut candidates = dirty.clone();
    if !dirty.is_empty() {
        candidates.extend(expand(registry, &dirty));
    }
    registry.sort_by_name(&mut candidates);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PackageMetadata;
    use crate::project::Project;
    use std::path::PathBuf;

    fn add(reg: &mut Registry, name: &str, requires: &[&str]) -> ProjectId {
        let meta = PackageMetadata {
            name: name.to_string(),
            produces: vec![name.to_string()],
            build_requires: requires.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        };
        reg.add(Project::new(name, meta, PathBuf::from(name))).unwrap()
    }

    #[test]
    fn link_by_produced_package() {
        let mut reg = Registry::new();
        let a = add(&mut reg, "a", &[]);
        let b = add(&mut reg, "b", &["a", "gcc"]);
        link(&mut reg);
        assert!(reg.get(a).downstream().contains(&b));
        assert!(reg.get(b).upstream().contains(&a));
        assert!(reg.get(a).upstream().is_empty());
    }

    #[test]
    fn link_ignores_self_requirement() {
        let mut reg = Registry::new();
        let a = add(&mut reg, "a", &["a"]);
        link(&mut reg);
        assert!(reg.get(a).downstream().is_empty());
    }

    #[test]
    fn link_is_fresh() {
        let mut reg = Registry::new();
        let a = add(&mut reg, "a", &[]);
        let b = add(&mut reg, "b", &["a"]);
        link(&mut reg);
        reg.get_mut(b).meta.build_requires.clear();
        link(&mut reg);
        assert!(reg.get(a).downstream().is_empty());
    }

    #[test]
    fn expand_chain() {
        let mut reg = Registry::new();
        let a = add(&mut reg, "a", &[]);
        let b = add(&mut reg, "b", &["a"]);
        let c = add(&mut reg, "c", &["b"]);
        let d = add(&mut reg, "d", &[]);
        link(&mut reg);
        let reached = expand(&mut reg, &[a]);
        assert_eq!(reached, [b, c].into_iter().collect());
        assert!(reg.get(c).rebuild_needed());
        assert!(!reg.get(d).rebuild_needed());
        assert!(!reg.get(a).rebuild_needed());
    }

    #[test]
    fn expand_cycle() {
        // b needs a, c needs b, a needs c.
        let mut reg = Registry::new();
        let a = add(&mut reg, "a", &["c"]);
        let b = add(&mut reg, "b", &["a"]);
        let c = add(&mut reg, "c", &["b"]);
        link(&mut reg);
        let reached = expand(&mut reg, &[b]);
        assert_eq!(reached, [a, c].into_iter().collect());
    }

    #[test]
    fn expand_skips_already_flagged() {
        let mut reg = Registry::new();
        let a = add(&mut reg, "a", &[]);
        let b = add(&mut reg, "b", &["a"]);
        let c = add(&mut reg, "c", &["b"]);
        link(&mut reg);
        reg.get_mut(b).mark_for_rebuild();
        let reached = expand(&mut reg, &[a]);
        assert!(reached.is_empty());
        assert!(!reg.get(c).rebuild_needed());
    }

    #[test]
    fn plan_sorted_union() {
        let mut reg = Registry::new();
        let z = add(&mut reg, "z", &[]);
        let m = add(&mut reg, "m", &["z"]);
        let _idle = add(&mut reg, "idle", &[]);
        let a = add(&mut reg, "a", &["m"]);
        link(&mut reg);
        reg.get_mut(z).changed = true;
        assert_eq!(plan(&mut reg), vec![a, m, z]);
    }

    #[test]
    fn plan_nothing_changed() {
        let mut reg = Registry::new();
        add(&mut reg, "a", &[]);
        link(&mut reg);
        assert!(plan(&mut reg).is_empty());
    }
}
