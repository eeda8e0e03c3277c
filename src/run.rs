use anyhow::{anyhow, Context};
use argh::FromArgs;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::builder::{Builder, MockBuilder};
use crate::config::{BuildConfig, Capabilities, ConfigError, Options};
use crate::fingerprint::{BuilderStamp, Fingerprint, Store};
use crate::history::{self, History};
use crate::progress::{ConsoleProgress, Progress};
use crate::project::{ProjectId, Registry};
use crate::version::NextRelease;
use crate::work::{RootOutcome, Work};
use crate::{detect, load, resolve};

/// Incrementally build rpm packages in mock chroots.
#[derive(FromArgs, Debug)]
pub struct Args {
    /// workspace directory holding checkouts, build state and repositories
    #[argh(option, short = 'w')]
    pub workspace: PathBuf,

    /// build configuration file (TOML)
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    /// local mock configuration directory, overriding the configured one
    #[argh(option, short = 'm')]
    pub mockconf: Option<PathBuf>,

    /// build root to use instead of the configured ones; repeatable
    #[argh(option, short = 'r')]
    pub root: Vec<String>,

    /// extra arguments for every mock invocation, space separated
    #[argh(option)]
    pub mock_arguments: Option<String>,

    /// print debug logging and scheduling details
    #[argh(switch, short = 'v')]
    pub verbose: bool,

    /// rebuild every project regardless of changes
    #[argh(switch, short = 'f')]
    pub force_rebuild: bool,

    /// keep build roots after the run and after failures
    #[argh(switch)]
    pub nowipe: bool,

    /// build binaries straight from the source archive
    #[argh(switch)]
    pub nosrpm: bool,

    /// reuse build roots as they are instead of initialising them
    #[argh(switch)]
    pub noinit: bool,

    /// suffix keeping the chroots of concurrent runs apart
    #[argh(option, default = "String::from(\"0\")")]
    pub uniqueext: String,

    /// directories of local projects to build
    #[argh(positional)]
    pub projects: Vec<PathBuf>,
}

/// The result of a build.
#[derive(Debug, PartialEq, Eq)]
pub enum BuildResult {
    /// Nothing changed since the last successful run.
    UpToDate,
    /// A root could not be completed; later roots were not attempted.
    Unresolved,
    /// Build succeeded, and the number is the count of built projects.
    Success(usize),
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    // A subscriber may already be set when embedded, e.g. in tests.
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .try_init();
}

/// Print the candidates with why each is built and what it waits for.
fn print_plan(registry: &Registry, candidates: &[ProjectId], progress: &mut dyn Progress) {
    let width = candidates
        .iter()
        .map(|&id| registry.get(id).name.len())
        .max()
        .unwrap_or(0)
        .max("project".len());
    progress.log(&format!(
        "{:width$}  {:7}  {:7}  {}",
        "project",
        "changed",
        "rebuild",
        "buildrequires",
        width = width
    ));
    for &id in candidates {
        let project = registry.get(id);
        let upstream = registry.names(project.upstream().iter().copied());
        progress.log(&format!(
            "{:width$}  {:7}  {:7}  {}",
            project.name,
            project.changed,
            project.rebuild_needed(),
            upstream.join(", "),
            width = width
        ));
    }
}

fn fingerprint(registry: &Registry, id: ProjectId) -> Option<Fingerprint> {
    let project = registry.get(id);
    let revision = project.source.revision.clone()?;
    Some(Fingerprint {
        name: project.name.clone(),
        url: project.locator.as_ref().map(|l| l.url.clone()),
        reference: project.locator.as_ref().map(|l| l.reference.clone()),
        spec: project
            .meta
            .spec_path
            .as_ref()
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned()),
        revision,
        version: project.version.clone(),
    })
}

/// After every root succeeded: publish products, record fingerprints of
/// projects built in every root, then history and builder stamp.
fn finalize(
    registry: &Registry,
    builder: &mut dyn Builder,
    options: &Options,
    built: &[ProjectId],
    stamp: Option<&BuilderStamp>,
) -> anyhow::Result<()> {
    for root in &options.roots {
        for &id in built {
            let project = registry.get(id);
            builder
                .publish(root, project)
                .with_context(|| format!("publish {} from {}", project.name, root))?;
        }
        builder
            .finalize(root)
            .with_context(|| format!("index repository of {}", root))?;
    }

    let store = Store::new(&options.workspace);
    for &id in built {
        match fingerprint(registry, id) {
            Some(fp) => store.save(&fp)?,
            None => debug!("{}: unversioned, no fingerprint", registry.get(id).name),
        }
    }

    let history = History::new(&options.workspace.join("buildrepository"));
    history.record(
        &history::timestamp(),
        &history::gather(registry, built, &options.roots),
    )?;

    if let Some(stamp) = stamp {
        stamp.save(&options.workspace)?;
    }
    Ok(())
}

/// Mark every unchanged project for rebuild; changed ones build anyway.
pub fn force_rebuild(registry: &mut Registry) {
    for id in registry.ids().collect::<Vec<_>>() {
        let project = registry.get_mut(id);
        if !project.changed {
            project.mark_for_rebuild();
        }
    }
}

/// Detect changes, plan and build the projects of `registry`, then record
/// the results.  `stamp` is the builder settings revision to store after a
/// successful run.
pub fn build(
    registry: &mut Registry,
    builder: &mut dyn Builder,
    progress: &mut dyn Progress,
    options: &Options,
    stamp: Option<&BuilderStamp>,
) -> anyhow::Result<BuildResult> {
    let store = Store::new(&options.workspace);
    detect::detect_changes(registry, &store)?;
    if options.force_rebuild {
        info!("rebuilding every project");
        force_rebuild(registry);
    }
    resolve::link(registry);
    let candidates = resolve::plan(registry);
    if candidates.is_empty() {
        progress.log("all projects up to date");
        if let Some(stamp) = stamp {
            stamp.save(&options.workspace)?;
        }
        return Ok(BuildResult::UpToDate);
    }
    print_plan(registry, &candidates, progress);

    let summary = Work::new(registry, builder, progress, options).run(&candidates, &options.roots)?;

    let result = if summary.succeeded(&options.roots) {
        let built: Vec<ProjectId> = candidates
            .iter()
            .copied()
            .filter(|&id| options.roots.iter().all(|root| registry.get(id).is_built(root)))
            .collect();
        let n = built.len();
        finalize(registry, builder, options, &built, stamp).map(|()| BuildResult::Success(n))
    } else {
        if let Some((root, stuck)) = summary.failure() {
            progress.log(&format!("could not build everything in {}:", root));
            for s in stuck {
                progress.log(&format!("  {}: {}", s.name, s.reason));
            }
        }
        Ok(BuildResult::Unresolved)
    };

    if options.scrub {
        for (root, _) in &summary.roots {
            if let Err(err) = builder.wipe(root) {
                warn!("could not wipe {}: {:#}", root, err);
            }
        }
    }
    for (root, outcome) in &summary.roots {
        if let RootOutcome::Built(order) = outcome {
            debug!("{}: built {}", root, registry.names(order.iter().copied()).join(", "));
        }
    }
    result
}

fn run_impl() -> anyhow::Result<i32> {
    let args: Args = argh::from_env();
    init_logging(args.verbose);

    let config = match &args.config {
        Some(path) => BuildConfig::load(path)?,
        None => BuildConfig::default(),
    };
    if config.projects.is_empty() && args.projects.is_empty() {
        return Err(ConfigError::NoProjects.into());
    }
    let roots = if args.root.is_empty() {
        config.roots.clone()
    } else {
        args.root.iter().map(crate::project::BuildRoot::new).collect()
    };
    if roots.is_empty() {
        anyhow::bail!("no build roots configured");
    }
    crate::config::check_roots(&roots)?;

    std::fs::create_dir_all(&args.workspace)
        .with_context(|| format!("create workspace {}", args.workspace.display()))?;
    let workspace = args
        .workspace
        .canonicalize()
        .map_err(|err| anyhow!("workspace {}: {}", args.workspace.display(), err))?;

    let mut options = Options {
        workspace,
        roots,
        force_rebuild: args.force_rebuild,
        scrub: !args.nowipe,
        init: !args.noinit,
        nosrpm: args.nosrpm,
        uniqueext: args.uniqueext.clone(),
        mock_arguments: args
            .mock_arguments
            .as_deref()
            .map(|a| a.split_whitespace().map(String::from).collect())
            .unwrap_or_default(),
    };
    let capabilities = Capabilities::detect();

    let load::State {
        mut registry,
        configdir,
        stamp,
        builder_changed,
    } = load::read(
        &options.workspace,
        &config,
        &args.projects,
        args.mockconf.as_deref(),
    )?;
    for name in Store::new(&options.workspace).remove_stale(|name| registry.contains(name))? {
        info!("removed state of unconfigured project {}", name);
    }
    if builder_changed {
        info!("builder settings changed, rebuilding everything");
        options.force_rebuild = true;
    }

    let base = match std::env::var("BUILD_NUMBER") {
        Ok(n) => Some(
            n.parse()
                .map_err(|err| anyhow!("invalid BUILD_NUMBER {:?}: {}", n, err))?,
        ),
        Err(_) => None,
    };
    let mut builder = MockBuilder::new(
        configdir,
        options.clone(),
        capabilities,
        Box::new(NextRelease { base }),
    );
    let mut progress = ConsoleProgress::new(args.verbose);

    match build(
        &mut registry,
        &mut builder,
        &mut progress,
        &options,
        stamp.as_ref(),
    )? {
        BuildResult::UpToDate => Ok(0),
        BuildResult::Unresolved => Ok(1),
        BuildResult::Success(n) => {
            println!(
                "mockmake: built {} project{}",
                n,
                if n == 1 { "" } else { "s" }
            );
            Ok(0)
        }
    }
}

pub fn run() -> anyhow::Result<i32> {
    let res = run_impl();
    if let Err(err) = &res {
        // Backend failures leave details in the mock logs.
        debug!("run failed: {:?}", err);
    }
    res
}
