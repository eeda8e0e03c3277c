//! Build progress reporting, for the purpose of display to the user.
//! Diagnostics go through `tracing`; this is the user-facing channel.

use crate::project::{BuildRoot, Project};
use std::time::{Duration, Instant};

/// Trait for build progress notifications.
pub trait Progress {
    /// Called when work on a root begins, with the number of candidates.
    fn root_started(&mut self, root: &BuildRoot, candidates: usize);

    /// Called at the end of each scheduling pass.
    fn pass_finished(&mut self, root: &BuildRoot, pass: usize, built: usize, remaining: usize);

    /// Called when a project's build starts.
    fn build_started(&mut self, root: &BuildRoot, project: &Project);

    /// Called when a project's build completes successfully.
    fn build_finished(&mut self, root: &BuildRoot, project: &Project);

    /// Called when a project is put back for a later pass.
    fn deferred(&mut self, root: &BuildRoot, project: &Project, reason: &str);

    /// Log a line of output.
    fn log(&mut self, msg: &str);
}

/// Progress implementation printing plain lines to the console.
#[derive(Default)]
pub struct ConsoleProgress {
    /// Whether to print deferrals and pass summaries too.
    verbose: bool,
    /// When the current build started.
    started: Option<Instant>,
}

impl ConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        ConsoleProgress {
            verbose,
            started: None,
        }
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else {
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

impl Progress for ConsoleProgress {
    fn root_started(&mut self, root: &BuildRoot, candidates: usize) {
        self.log(&format!("==== {}: {} projects to build", root, candidates));
    }

    fn pass_finished(&mut self, root: &BuildRoot, pass: usize, built: usize, remaining: usize) {
        if self.verbose {
            self.log(&format!(
                "{}: pass {} built {}, {} remaining",
                root, pass, built, remaining
            ));
        }
    }

    fn build_started(&mut self, root: &BuildRoot, project: &Project) {
        self.started = Some(Instant::now());
        self.log(&format!(
            "building {} {} in {}",
            project.name, project.version, root
        ));
    }

    fn build_finished(&mut self, root: &BuildRoot, project: &Project) {
        let took = self
            .started
            .take()
            .map(|start| format!(" in {}", format_duration(start.elapsed())))
            .unwrap_or_default();
        self.log(&format!("built {} in {}{}", project.name, root, took));
    }

    fn deferred(&mut self, _root: &BuildRoot, project: &Project, reason: &str) {
        if self.verbose {
            self.log(&format!("deferring {}: {}", project.name, reason));
        }
    }

    fn log(&mut self, msg: &str) {
        println!("{}", msg);
    }
}

/// Progress implementation that discards everything.
pub struct NoProgress;

impl Progress for NoProgress {
    fn root_started(&mut self, _root: &BuildRoot, _candidates: usize) {}
    fn pass_finished(&mut self, _root: &BuildRoot, _pass: usize, _built: usize, _remaining: usize) {
    }
    fn build_started(&mut self, _root: &BuildRoot, _project: &Project) {}
    fn build_finished(&mut self, _root: &BuildRoot, _project: &Project) {}
    fn deferred(&mut self, _root: &BuildRoot, _project: &Project, _reason: &str) {}
    fn log(&mut self, _msg: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m05s");
    }
}
