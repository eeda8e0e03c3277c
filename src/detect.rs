//! Change detection: compares a project's live source state against the
//! fingerprint of its last successful build.
//!
//! Detection only reads; fingerprints are written after successful builds
//! elsewhere.  Running it twice over an unmodified checkout gives the same
//! answer, and an interrupted build still looks changed next time.

use crate::fingerprint::{Fingerprint, Store};
use crate::project::Registry;
use crate::vcs::{Locator, SourceState};
use tracing::{debug, info};

/// Why a project is, or is not, considered changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// No fingerprint: never built before.
    FirstBuild,
    /// Sources are not version controlled, so nothing can be compared.
    Unversioned,
    /// The working copy has uncommitted modifications.
    DirtyWorkingCopy,
    /// The project is now fetched from a different url or reference.
    LocatorChanged,
    /// The checkout moved to a different revision.
    NewRevision { previous: String, current: String },
    Unchanged,
}

impl Change {
    pub fn is_changed(&self) -> bool {
        *self != Change::Unchanged
    }
}

impl std::fmt::Display for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Change::FirstBuild => write!(f, "no previous build"),
            Change::Unversioned => write!(f, "sources are not version controlled"),
            Change::DirtyWorkingCopy => write!(f, "uncommitted changes"),
            Change::LocatorChanged => write!(f, "source url or reference changed"),
            Change::NewRevision { previous, current } => {
                write!(f, "revision {} -> {}", previous, current)
            }
            Change::Unchanged => write!(f, "no changes"),
        }
    }
}

fn locator_matches(previous: &Fingerprint, locator: Option<&Locator>) -> bool {
    match locator {
        // Local projects have no locator to compare.
        None => true,
        Some(locator) => {
            previous.url.as_deref() == Some(locator.url.as_str())
                && previous.reference.as_deref() == Some(locator.reference.as_str())
        }
    }
}

/// Classify one project, rules in priority order.
pub fn classify(
    previous: Option<&Fingerprint>,
    live: &SourceState,
    locator: Option<&Locator>,
) -> Change {
    let previous = match previous {
        None => return Change::FirstBuild,
        Some(previous) => previous,
    };
    let current = match &live.revision {
        None => return Change::Unversioned,
        Some(revision) => revision,
    };
    if live.dirty {
        return Change::DirtyWorkingCopy;
    }
    if !locator_matches(previous, locator) {
        return Change::LocatorChanged;
    }
    if previous.revision != *current {
        return Change::NewRevision {
            previous: previous.revision.clone(),
            current: current.clone(),
        };
    }
    Change::Unchanged
}

/// Classify every project in the registry against the store, setting each
/// project's `changed` flag.  Returns the reasons, in registry order.
pub fn detect_changes(registry: &mut Registry, store: &Store) -> anyhow::Result<Vec<Change>> {
    let mut changes = Vec::with_capacity(registry.len());
    for id in registry.ids().collect::<Vec<_>>() {
        let project = registry.get_mut(id);
        let previous = store.load(&project.name)?;
        let change = classify(previous.as_ref(), &project.source, project.locator.as_ref());
        if change.is_changed() {
            info!("{}: needs build: {}", project.name, change);
        } else {
            debug!("{}: already built", project.name);
        }
        project.changed = change.is_changed();
        changes.push(change);
    }
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint(revision: &str) -> Fingerprint {
        Fingerprint {
            name: "p".into(),
            url: Some("u".into()),
            reference: Some("master".into()),
            spec: None,
            revision: revision.into(),
            version: "1".into(),
        }
    }

    fn live(revision: Option<&str>, dirty: bool) -> SourceState {
        SourceState {
            revision: revision.map(String::from),
            dirty,
        }
    }

    fn locator(reference: &str) -> Locator {
        Locator {
            url: "u".into(),
            reference: reference.into(),
        }
    }

    #[test]
    fn first_build() {
        assert_eq!(
            classify(None, &live(Some("a"), false), None),
            Change::FirstBuild
        );
        // Even a dirty checkout reports the higher-priority rule.
        assert_eq!(
            classify(None, &live(Some("a"), true), None),
            Change::FirstBuild
        );
    }

    #[test]
    fn dirty_beats_revision() {
        let fp = fingerprint("a");
        assert_eq!(
            classify(Some(&fp), &live(Some("b"), true), Some(&locator("master"))),
            Change::DirtyWorkingCopy
        );
    }

    #[test]
    fn locator_change() {
        let fp = fingerprint("a");
        assert_eq!(
            classify(Some(&fp), &live(Some("a"), false), Some(&locator("stable"))),
            Change::LocatorChanged
        );
    }

    #[test]
    fn new_revision() {
        let fp = fingerprint("a");
        assert_eq!(
            classify(Some(&fp), &live(Some("b"), false), Some(&locator("master"))),
            Change::NewRevision {
                previous: "a".into(),
                current: "b".into()
            }
        );
    }

    #[test]
    fn unchanged() {
        let fp = fingerprint("a");
        let change = classify(Some(&fp), &live(Some("a"), false), Some(&locator("master")));
        assert_eq!(change, Change::Unchanged);
        assert!(!change.is_changed());
        // Local projects have no locator; revision alone decides.
        assert_eq!(
            classify(Some(&fp), &live(Some("a"), false), None),
            Change::Unchanged
        );
    }

    #[test]
    fn unversioned_always_changed() {
        let fp = fingerprint("a");
        assert_eq!(
            classify(Some(&fp), &live(None, false), None),
            Change::Unversioned
        );
    }
}
