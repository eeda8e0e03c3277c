//! Version and release naming for built packages.
//!
//! A version tag is derived from source control by trying an ordered list of
//! strategies; the first that yields a tag wins.  The release number is a
//! replaceable policy.

use crate::project::Project;
use crate::vcs::SourceControl;
use anyhow::{anyhow, bail, Context};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Spec version value meaning "take the version from source control".
pub const VERSION_MACRO: &str = "%{_version}";
pub const COMMIT_COUNT_MACRO: &str = "%{_commit_count}";
pub const COMMIT_HASH_MACRO: &str = "%{_commit_hash}";

/// Version used for sources outside version control.
pub const UNVERSIONED_TAG: &str = "a.b";

pub trait TagStrategy {
    fn name(&self) -> &'static str;
    fn resolve(&self, vcs: &dyn SourceControl) -> anyhow::Result<String>;
}

/// `python setup.py --version`, for Python projects versioned by pbr.
pub struct PbrVersion;

impl TagStrategy for PbrVersion {
    fn name(&self) -> &'static str {
        "pbr"
    }

    fn resolve(&self, vcs: &dyn SourceControl) -> anyhow::Result<String> {
        let dir = vcs
            .workdir()
            .ok_or_else(|| anyhow!("no working copy to inspect"))?;
        let setup = dir.join("setup.py");
        let text = std::fs::read_to_string(&setup)
            .with_context(|| format!("read {}", setup.display()))?;
        if !uses_pbr(&text) {
            bail!("{} does not use pbr", setup.display());
        }
        let mut output = setup_version(dir)?;
        if output.contains(char::is_whitespace) {
            // The first run may also report eggs it installed.
            output = setup_version(dir)?;
        }
        pbr_version(&output).ok_or_else(|| anyhow!("setup.py printed no version: {:?}", output))
    }
}

fn setup_version(dir: &Path) -> anyhow::Result<String> {
    let output = Command::new("python")
        .args(["setup.py", "--version"])
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .context("run python setup.py --version")?;
    if !output.status.success() {
        bail!(
            "python setup.py --version failed with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Whether a `setup.py` pulls in pbr through `setup_requires`.
fn uses_pbr(setup_py: &str) -> bool {
    setup_py.lines().any(|line| {
        line.split_once("setup_requires=")
            .map_or(false, |(_, rest)| rest.contains("pbr"))
    })
}

/// The version in `setup.py --version` output: its last line.
fn pbr_version(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .filter(|line| !line.contains(char::is_whitespace))
        .map(sanitize)
}

/// `git describe --tags`, from a tagged ancestor.
pub struct DescribeTags;

impl TagStrategy for DescribeTags {
    fn name(&self) -> &'static str {
        "describe"
    }

    fn resolve(&self, vcs: &dyn SourceControl) -> anyhow::Result<String> {
        let describe = vcs.describe()?;
        normalize_describe(&describe)
            .ok_or_else(|| anyhow!("describe output {:?} is not tag-relative", describe))
    }
}

/// `c<commit count>.g<short hash>`, available for any revision.
pub struct CommitCount;

impl TagStrategy for CommitCount {
    fn name(&self) -> &'static str {
        "commit count"
    }

    fn resolve(&self, vcs: &dyn SourceControl) -> anyhow::Result<String> {
        let count = vcs.commit_count()?;
        let hash = vcs.short_hash()?;
        Ok(sanitize(&format!("c{}.g{}", count, hash)))
    }
}

/// The strategies tried for version controlled sources, in order.
pub fn default_strategies() -> Vec<Box<dyn TagStrategy>> {
    vec![Box::new(PbrVersion), Box::new(DescribeTags), Box::new(CommitCount)]
}

/// Try each strategy in order; the first success wins.
pub fn resolve_tag(
    strategies: &[Box<dyn TagStrategy>],
    vcs: &dyn SourceControl,
) -> anyhow::Result<String> {
    let mut failures = Vec::new();
    for strategy in strategies {
        match strategy.resolve(vcs) {
            Ok(tag) => {
                debug!("version tag {} from {}", tag, strategy.name());
                return Ok(tag);
            }
            Err(err) => {
                debug!("version tag strategy {} failed: {}", strategy.name(), err);
                failures.push(format!("{}: {}", strategy.name(), err));
            }
        }
    }
    bail!("could not name a version: {}", failures.join("; "))
}

/// Turn `git describe` output into a package version.
/// `2.3` stays as is; `2.3-3-g4324323` becomes `2.3.c3.g4324323`.
/// Returns None for output that is not `<tag>-<count>-g<hash>` shaped
/// but still contains dashes.
pub fn normalize_describe(describe: &str) -> Option<String> {
    if !describe.contains('-') {
        return Some(describe.to_string());
    }
    // Trailing "-dirty" from --dirty is not part of the shape check.
    let core = describe.strip_suffix("-dirty").unwrap_or(describe);
    let mut parts = core.rsplitn(3, '-');
    let hash = parts.next()?;
    let count = parts.next()?;
    let tag = parts.next()?;
    let hash_ok = hash.len() >= 8
        && hash.starts_with('g')
        && hash[1..].chars().all(|c| c.is_ascii_hexdigit());
    let count_ok = !count.is_empty() && count.chars().all(|c| c.is_ascii_digit());
    if tag.is_empty() || !hash_ok || !count_ok {
        return None;
    }
    Some(sanitize(&describe.replacen('-', "-c", 1)))
}

/// Dashes are not allowed in package versions.
fn sanitize(tag: &str) -> String {
    tag.replace('-', ".")
}

/// Expand the commit macros a spec release may contain.
pub fn expand_commit_macros(release: &str, vcs: &dyn SourceControl) -> anyhow::Result<String> {
    let mut out = release.to_string();
    if out.contains(COMMIT_COUNT_MACRO) {
        out = out.replace(COMMIT_COUNT_MACRO, &vcs.commit_count()?);
    }
    if out.contains(COMMIT_HASH_MACRO) {
        out = out.replace(COMMIT_HASH_MACRO, &vcs.short_hash()?);
    }
    Ok(out)
}

/// Decides the release field of a package about to be built.
pub trait ReleasePolicy {
    /// `repo` is the directory holding previously built binary packages.
    fn release(&self, project: &Project, repo: &Path) -> anyhow::Result<String>;
}

/// One above the highest release already in the repository for the same
/// name and version, keeping the spec release's suffix: a spec release of
/// `1%{?dist}` with `foo-1.0-4.el7` already built yields `5%{?dist}`.
/// Projects that only need a rebuild get a new release of the same version
/// this way, as do changed projects whose version did not move.
#[derive(Default)]
pub struct NextRelease {
    /// Release to count up from when the repository has none,
    /// e.g. a CI build number.
    pub base: Option<u32>,
}

impl ReleasePolicy for NextRelease {
    fn release(&self, project: &Project, repo: &Path) -> anyhow::Result<String> {
        let existing = existing_releases(repo, &project.meta.name, &project.version)?;
        let latest = existing.into_iter().max().or(self.base).unwrap_or(0);
        Ok(next_release(&project.meta.release, latest))
    }
}

/// Build the release string following `latest`, keeping the suffix of
/// `spec_release`.
pub fn next_release(spec_release: &str, latest: u32) -> String {
    let digits = spec_release
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(spec_release.len());
    let suffix = if digits == 0 {
        ""
    } else {
        &spec_release[digits..]
    };
    format!("{}{}", latest + 1, suffix)
}

/// Split `name-version-release.arch.rpm` into its parts.
pub fn split_rpm_filename(file: &str) -> Option<(&str, &str, &str)> {
    let base = file.strip_suffix(".rpm")?;
    let (nvr, _arch) = base.rsplit_once('.')?;
    let mut parts = nvr.rsplitn(3, '-');
    let release = parts.next()?;
    let version = parts.next()?;
    let name = parts.next()?;
    Some((name, version, release))
}

/// Leading release numbers of binary packages in `repo` matching the name
/// and version.
fn existing_releases(repo: &Path, name: &str, version: &str) -> anyhow::Result<Vec<u32>> {
    let mut releases = Vec::new();
    if !repo.is_dir() {
        return Ok(releases);
    }
    for entry in std::fs::read_dir(repo)? {
        let file = entry?.file_name().to_string_lossy().into_owned();
        if file.ends_with(".src.rpm") {
            continue;
        }
        let (n, v, r) = match split_rpm_filename(&file) {
            Some(parts) => parts,
            None => continue,
        };
        if n != name || v != version {
            continue;
        }
        let digits: String = r.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(release) = digits.parse() {
            releases.push(release);
        }
    }
    Ok(releases)
}
