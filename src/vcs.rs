//! Source control: querying and updating project checkouts.

use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Where a project's sources come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub url: String,
    /// Branch, tag or commit.
    pub reference: String,
}

/// Live state of a checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceState {
    /// Current revision id; None when the sources are not version controlled.
    pub revision: Option<String>,
    /// The working copy has uncommitted modifications.
    pub dirty: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("could not check out {reference:?} from {url}")]
    Checkout { url: String, reference: String },
    #[error("{} is not under version control", .0.display())]
    NotVersioned(PathBuf),
    #[error("{cmd:?} failed: {output}")]
    Command { cmd: String, output: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub trait SourceControl {
    /// The current revision id, or None if the directory is not a checkout.
    fn current_revision(&self) -> Result<Option<String>, VcsError>;

    fn is_dirty(&self) -> Result<bool, VcsError>;

    /// Fetch `locator.url` and point the checkout at `locator.reference`.
    /// Fails with `VcsError::Checkout` if the reference does not exist.
    fn update_to_ref(&mut self, locator: &Locator) -> Result<(), VcsError>;

    /// Tag-relative description of the current revision, e.g. `2.3-3-g4324323`.
    fn describe(&self) -> Result<String, VcsError>;

    /// Number of commits reachable from the current revision.
    fn commit_count(&self) -> Result<String, VcsError>;

    /// Abbreviated id of the current revision.
    fn short_hash(&self) -> Result<String, VcsError>;

    /// The working copy on disk, for tools that inspect the sources.
    fn workdir(&self) -> Option<&Path> {
        None
    }

    fn state(&self) -> Result<SourceState, VcsError> {
        let revision = self.current_revision()?;
        let dirty = match revision {
            Some(_) => self.is_dirty()?,
            None => false,
        };
        Ok(SourceState { revision, dirty })
    }
}

/// A git working copy, driven through the `git` command.
pub struct Git {
    dir: PathBuf,
}

impl Git {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Git { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn run_in(&self, cwd: Option<&Path>, args: &[&str]) -> Result<String, VcsError> {
        let mut cmd = Command::new("git");
        cmd.args(args);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        debug!("running git {} in {:?}", args.join(" "), cwd);
        let out = cmd.output()?;
        if !out.status.success() {
            return Err(VcsError::Command {
                cmd: format!("git {}", args.join(" ")),
                output: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    fn run(&self, args: &[&str]) -> Result<String, VcsError> {
        self.run_in(Some(&self.dir), args)
    }

    /// Clone `url`, or refresh an existing clone of it.
    fn fetch(&self, url: &str) -> Result<(), VcsError> {
        if !self.dir.is_dir() {
            debug!("cloning {} into {}", url, self.dir.display());
            let dir = self.dir.to_string_lossy();
            self.run_in(None, &["clone", url, &dir])?;
            return Ok(());
        }
        self.run(&["reset", "--hard"])?;
        let remote = self.run(&["config", "--get", "remote.origin.url"])?;
        if remote != url {
            debug!("switching remote of {} from {} to {}", self.dir.display(), remote, url);
            self.run(&["remote", "set-url", "origin", url])?;
        }
        self.run(&["fetch", "origin"])?;
        self.run(&["fetch", "origin", "--tags"])?;
        Ok(())
    }
}

impl SourceControl for Git {
    fn current_revision(&self) -> Result<Option<String>, VcsError> {
        if !self.dir.is_dir() {
            return Ok(None);
        }
        match self.run(&["log", "-1", "--pretty=%H"]) {
            Ok(sha) if !sha.is_empty() => Ok(Some(sha)),
            Ok(_) | Err(VcsError::Command { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn is_dirty(&self) -> Result<bool, VcsError> {
        Ok(!self.run(&["status", "--porcelain"])?.is_empty())
    }

    fn update_to_ref(&mut self, locator: &Locator) -> Result<(), VcsError> {
        self.fetch(&locator.url)?;
        // A branch name resolves against the remote; tags and commits don't.
        let remote_ref = format!("origin/{}", locator.reference);
        for target in [remote_ref.as_str(), locator.reference.as_str()] {
            match self.run(&["checkout", "--force", "--detach", target]) {
                Ok(_) => return Ok(()),
                Err(VcsError::Command { .. }) => {
                    debug!("{} is not a usable reference", target);
                }
                Err(err) => return Err(err),
            }
        }
        Err(VcsError::Checkout {
            url: locator.url.clone(),
            reference: locator.reference.clone(),
        })
    }

    fn describe(&self) -> Result<String, VcsError> {
        self.run(&["describe", "--dirty", "--tags"])
    }

    fn commit_count(&self) -> Result<String, VcsError> {
        self.run(&["rev-list", "HEAD", "--count"])
    }

    fn short_hash(&self) -> Result<String, VcsError> {
        self.run(&["rev-parse", "--short", "HEAD"])
    }

    fn workdir(&self) -> Option<&Path> {
        Some(&self.dir)
    }
}

/// Sources that are not under version control at all.
pub struct Unversioned {
    dir: PathBuf,
}

impl Unversioned {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Unversioned { dir: dir.into() }
    }

    fn err(&self) -> VcsError {
        VcsError::NotVersioned(self.dir.clone())
    }
}

impl SourceControl for Unversioned {
    fn current_revision(&self) -> Result<Option<String>, VcsError> {
        Ok(None)
    }

    fn is_dirty(&self) -> Result<bool, VcsError> {
        Err(self.err())
    }

    fn update_to_ref(&mut self, _locator: &Locator) -> Result<(), VcsError> {
        Err(self.err())
    }

    fn describe(&self) -> Result<String, VcsError> {
        Err(self.err())
    }

    fn commit_count(&self) -> Result<String, VcsError> {
        Err(self.err())
    }

    fn short_hash(&self) -> Result<String, VcsError> {
        Err(self.err())
    }
}
