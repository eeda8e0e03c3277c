//! The build backend.  The scheduler drives a `Builder`; `MockBuilder`
//! implements it with the `mock` chroot tool.

use crate::config::{Capabilities, Options};
use crate::metadata::{self, ArchiveKind, Layout};
use crate::project::{Artifacts, BuildRoot, Project};
use crate::version::{self, ReleasePolicy};
use anyhow::{anyhow, bail, Context};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Operations the scheduler needs from a build backend.  Every call blocks
/// until the backend is done.
pub trait Builder {
    /// Prepare a clean build environment for `root`.
    fn init_root(&mut self, root: &BuildRoot) -> anyhow::Result<()>;

    /// Install the build requirements of `project` in `root`.  Ok(false)
    /// means they are not available yet; the project is deferred.
    fn resolve_requirements(&mut self, root: &BuildRoot, project: &Project)
        -> anyhow::Result<bool>;

    /// Build `project` in `root`.  Errors are fatal to the run.
    fn build(&mut self, root: &BuildRoot, project: &Project) -> anyhow::Result<Artifacts>;

    /// Make freshly built artifacts in `root` available to later requirement
    /// checks.
    fn update_local_repository(&mut self, root: &BuildRoot) -> anyhow::Result<()>;

    /// Remove the build environment of `root`.
    fn wipe(&mut self, root: &BuildRoot) -> anyhow::Result<()>;

    /// Store what `project` built in `root` in the common repository.
    fn publish(&mut self, _root: &BuildRoot, _project: &Project) -> anyhow::Result<()> {
        Ok(())
    }

    /// Index the common repository of `root` after publishing.
    fn finalize(&mut self, _root: &BuildRoot) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Inside-chroot directory the local repository lives in.
const CHROOT_REPO: &str = "/usr/localrepo";

/// Per-project working directories under `<workspace>/projects/<name>`.
struct ProjectDirs {
    spec: PathBuf,
    sources: PathBuf,
    srpms: PathBuf,
    rpms: PathBuf,
}

impl ProjectDirs {
    fn new(workspace: &Path, name: &str) -> Self {
        let base = workspace.join("projects").join(name).join("rpmbuild");
        ProjectDirs {
            spec: base.join("spec"),
            sources: base.join("sources"),
            srpms: base.join("srpm"),
            rpms: base.join("rpm"),
        }
    }

    fn rpms_for(&self, root: &BuildRoot) -> PathBuf {
        self.rpms.join(root.name())
    }
}

/// Make sure `dir` exists and is empty.
fn clean_dir(dir: &Path) -> anyhow::Result<()> {
    if dir.is_dir() {
        std::fs::remove_dir_all(dir).with_context(|| format!("clean {}", dir.display()))?;
    }
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))
}

/// Sources fetched over the network rather than found in the checkout.
fn is_remote(source: &str) -> bool {
    ["http://", "https://", "ftp://"]
        .iter()
        .any(|scheme| source.starts_with(scheme))
}

/// Arguments downloading the remote sources of `spec` into `sources`.
fn spectool_args(spec: &Path, sources: &Path) -> Vec<String> {
    vec![
        "-d".to_string(),
        format!("KVERSION {}", version::UNVERSIONED_TAG),
        "-g".to_string(),
        "--directory".to_string(),
        sources.display().to_string(),
        spec.display().to_string(),
    ]
}

/// The source archive of kind `kind` in `dir`, if any.
fn find_archive(dir: &Path, kind: ArchiveKind) -> anyhow::Result<Option<String>> {
    Ok(list_files(dir, &format!(".{}", kind.extension()))?
        .into_iter()
        .next())
}

/// Move every `.rpm` below `from` into `to`, leaving architecture
/// subdirectories behind.
fn move_packages(from: &Path, to: &Path) -> anyhow::Result<()> {
    if !from.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(to).with_context(|| format!("create {}", to.display()))?;
    for entry in std::fs::read_dir(from)? {
        let path = entry?.path();
        if path.is_dir() {
            move_packages(&path, to)?;
        } else if path.extension().map_or(false, |ext| ext == "rpm") {
            if let Some(name) = path.file_name() {
                std::fs::rename(&path, to.join(name))
                    .with_context(|| format!("move {}", path.display()))?;
            }
        }
    }
    Ok(())
}

/// File names in `dir` ending in `suffix`, sorted.
fn list_files(dir: &Path, suffix: &str) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    if !dir.is_dir() {
        return Ok(names);
    }
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if name.ends_with(suffix) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

pub struct MockBuilder {
    workspace: PathBuf,
    /// Directory holding the mock root configurations.
    configdir: PathBuf,
    options: Options,
    capabilities: Capabilities,
    release: Box<dyn ReleasePolicy>,
}

impl MockBuilder {
    pub fn new(
        configdir: PathBuf,
        options: Options,
        capabilities: Capabilities,
        release: Box<dyn ReleasePolicy>,
    ) -> Self {
        MockBuilder {
            workspace: options.workspace.clone(),
            configdir,
            options,
            capabilities,
            release,
        }
    }

    fn log_dir(&self) -> PathBuf {
        self.workspace.join("mocksettings").join("logs")
    }

    /// Common repository directory for one root and package kind.
    fn repo_dir(&self, root: &BuildRoot, kind: &str) -> PathBuf {
        self.workspace
            .join("buildrepository")
            .join(root.name())
            .join(kind)
    }

    fn mock_command(&self, root: &BuildRoot) -> Command {
        let mut cmd = Command::new("/usr/bin/mock");
        cmd.arg(format!("--configdir={}", self.configdir.display()))
            .arg(format!("--root={}", root))
            .arg(format!("--uniqueext={}", self.options.uniqueext));
        cmd
    }

    /// Run mock with `args`, appending its output to `log`.  Returns whether
    /// mock exited successfully.
    fn try_mock(&self, root: &BuildRoot, args: &[String], log: &Path) -> anyhow::Result<bool> {
        if let Some(parent) = log.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log)
            .with_context(|| format!("open {}", log.display()))?;
        let mut cmd = self.mock_command(root);
        cmd.args(["--verbose", "--old-chroot", "--enable-network"])
            .args(args)
            .args(&self.options.mock_arguments)
            .stdout(Stdio::from(out.try_clone()?))
            .stderr(Stdio::from(out));
        info!("running mock in {}, log goes to {}", root, log.display());
        debug!("{:?}", cmd);
        let start = Instant::now();
        let status = cmd
            .status()
            .map_err(|err| anyhow!("run mock: {}; is mock installed?", err))?;
        debug!("mock finished in {:?} with {}", start.elapsed(), status);
        Ok(status.success())
    }

    /// Like try_mock, but a failure is an error.
    fn mock(&self, root: &BuildRoot, args: &[String], log: &Path) -> anyhow::Result<()> {
        if self.try_mock(root, args, log)? {
            return Ok(());
        }
        if !self.options.scrub {
            let mut shell = self.mock_command(root);
            shell.arg("--shell");
            warn!("chroot {} left for inspection, open it with {:?}", root, shell);
        }
        bail!("mock failed in {}, see {}", root, log.display())
    }

    fn chroot(&self, root: &BuildRoot, script: &str, log: &Path) -> anyhow::Result<()> {
        self.mock(root, &["--chroot".to_string(), script.to_string()], log)
    }

    /// Create `<name>-<version>.tar` from the checkout and compress it.
    fn create_source_archive(
        &self,
        project: &Project,
        dirs: &ProjectDirs,
        kind: ArchiveKind,
    ) -> anyhow::Result<PathBuf> {
        let package = format!("{}-{}", project.meta.name, project.version);
        let tar = dirs.sources.join(format!("{}.tar", package));
        let (compressor, compressed) = match kind {
            ArchiveKind::TarGz | ArchiveKind::Tgz => (
                self.capabilities.gzip_command(),
                dirs.sources.join(format!("{}.tar.gz", package)),
            ),
            ArchiveKind::TarBz2 => (
                self.capabilities.bzip2_command(),
                dirs.sources.join(format!("{}.tar.bz2", package)),
            ),
            ArchiveKind::TarXz => (
                self.capabilities.xz_command(),
                dirs.sources.join(format!("{}.tar.xz", package)),
            ),
            ArchiveKind::Tar | ArchiveKind::Zip => {
                bail!("{}: cannot create a {} archive", project.name, kind.extension())
            }
        };
        if compressed.is_file() && !project.changed {
            info!("using cached {}", compressed.display());
            return Ok(compressed);
        }

        let checkout = &project.checkout;
        let parent = checkout
            .parent()
            .ok_or_else(|| anyhow!("{} has no parent directory", checkout.display()))?;
        let base = checkout
            .file_name()
            .ok_or_else(|| anyhow!("{} has no name", checkout.display()))?
            .to_string_lossy()
            .into_owned();
        info!("creating source archive {}", tar.display());
        let status = Command::new("tar")
            .arg("cf")
            .arg(&tar)
            .arg(format!("--directory={}", parent.display()))
            .arg("--exclude-vcs")
            .arg(format!("--transform=s/^{}/{}/", base, package))
            .arg(&base)
            .status()
            .context("run tar")?;
        if !status.success() {
            bail!("{}: tar failed with {}", project.name, status);
        }
        let status = Command::new(compressor)
            .arg("-f")
            .arg(&tar)
            .status()
            .with_context(|| format!("run {}", compressor))?;
        if !status.success() {
            bail!("{}: {} failed with {}", project.name, compressor, status);
        }
        Ok(compressed)
    }

    /// Download the remote sources a spec lists with spectool.
    fn download_sources(
        &self,
        project: &Project,
        spec: &Path,
        dirs: &ProjectDirs,
    ) -> anyhow::Result<()> {
        let args = spectool_args(spec, &dirs.sources);
        info!("{}: downloading sources: spectool {}", project.name, args.join(" "));
        let status = Command::new("spectool")
            .args(&args)
            .stdin(Stdio::null())
            .status()
            .with_context(|| format!("{}: run spectool", project.name))?;
        if !status.success() {
            bail!("{}: spectool failed with {}", project.name, status);
        }
        Ok(())
    }

    /// Collect source and patch files into the project's source directory.
    fn gather_sources(
        &self,
        project: &Project,
        spec: &Path,
        dirs: &ProjectDirs,
    ) -> anyhow::Result<()> {
        std::fs::create_dir_all(&dirs.sources)?;
        let find = |name: &str| {
            ["", "SOURCES"]
                .iter()
                .map(|sub| project.checkout.join(sub).join(name))
                .find(|path| path.is_file())
        };
        if project.meta.sources.iter().any(|s| is_remote(s)) {
            self.download_sources(project, spec, dirs)?;
        }
        for source in &project.meta.sources {
            let name = metadata::source_file_name(source)?;
            if is_remote(source) {
                if !dirs.sources.join(name).is_file() {
                    bail!("{}: download of {} produced no {}", project.name, source, name);
                }
                continue;
            }
            match find(name) {
                Some(path) => {
                    std::fs::copy(&path, dirs.sources.join(name))
                        .with_context(|| format!("copy {}", path.display()))?;
                }
                None => {
                    let kind = project
                        .meta
                        .archive
                        .ok_or_else(|| anyhow!("{}: unknown source archive format", project.name))?;
                    self.create_source_archive(project, dirs, kind)?;
                }
            }
        }
        for patch in &project.meta.patches {
            let path = find(patch).ok_or_else(|| {
                anyhow!("{}: spec lists patch {:?} but no file found", project.name, patch)
            })?;
            std::fs::copy(&path, dirs.sources.join(patch))
                .with_context(|| format!("copy {}", path.display()))?;
        }
        Ok(())
    }

    /// Build a CentOS style tree as it is: its spec and `SOURCES` go into
    /// the chroot and rpmbuild makes both source and binary packages there.
    /// Lookaside files must already be present in the checkout.
    fn build_tree(
        &self,
        root: &BuildRoot,
        project: &Project,
        spec: &Path,
        dirs: &ProjectDirs,
    ) -> anyhow::Result<()> {
        let checkout = &project.checkout;
        for (_, file) in metadata::lookaside_files(checkout)? {
            if !checkout.join(&file).is_file() {
                bail!(
                    "{}: lookaside source {} is not in {}",
                    project.name,
                    file,
                    checkout.display()
                );
            }
        }
        let spec_name = spec
            .file_name()
            .ok_or_else(|| anyhow!("{} has no name", spec.display()))?
            .to_string_lossy()
            .into_owned();
        let rpms = dirs.rpms_for(root);
        let resultdir = format!("--resultdir={}", rpms.display());
        let build_dir = "/builddir/build";
        let log = rpms.join("mock-copyin.log");

        let copy = [
            resultdir.clone(),
            "--copyin".to_string(),
            spec.display().to_string(),
            format!("{}/{}/{}", build_dir, metadata::SPECS_DIR, spec_name),
        ];
        self.mock(root, &copy, &log)?;
        let sources_dir = checkout.join(metadata::SOURCES_DIR);
        let sources = list_files(&sources_dir, "")?;
        if !sources.is_empty() {
            let mut copy = vec![resultdir.clone(), "--copyin".to_string()];
            copy.extend(
                sources
                    .iter()
                    .map(|name| sources_dir.join(name).display().to_string()),
            );
            copy.push(format!("{}/{}/", build_dir, metadata::SOURCES_DIR));
            self.mock(root, &copy, &log)?;
        }
        self.chroot(
            root,
            &format!("chown -R root:root {}", build_dir),
            &rpms.join("mock-chown.log"),
        )?;
        let args = [
            resultdir,
            "--chroot".to_string(),
            format!(
                "/usr/bin/rpmbuild --noclean -ba -v {}/{}/{}",
                build_dir,
                metadata::SPECS_DIR,
                spec_name
            ),
        ];
        self.mock(root, &args, &rpms.join("mock-rpmbuild.log"))?;

        let staging = rpms.join("tmp");
        clean_dir(&staging)?;
        let packages = staging.join("packages");
        let copy = [
            "--copyout".to_string(),
            build_dir.to_string(),
            packages.display().to_string(),
        ];
        self.mock(root, &copy, &rpms.join("mock-copyout.log"))?;
        clean_dir(&dirs.srpms)?;
        move_packages(&packages.join("RPMS"), &rpms)?;
        move_packages(&packages.join("SRPMS"), &dirs.srpms)?;
        std::fs::remove_dir_all(&staging)
            .with_context(|| format!("remove {}", staging.display()))?;
        Ok(())
    }

    /// The spec to build from, patched with version and release when the
    /// spec takes its version from source control.
    fn prepare_spec(
        &self,
        root: &BuildRoot,
        project: &Project,
        dirs: &ProjectDirs,
    ) -> anyhow::Result<PathBuf> {
        let spec = project
            .meta
            .spec_path
            .clone()
            .ok_or_else(|| anyhow!("{}: no spec file", project.name))?;
        if project.meta.version != version::VERSION_MACRO {
            return Ok(spec);
        }
        let release = match &project.release {
            Some(release) => release.clone(),
            None => {
                let first_root = self.options.roots.first().unwrap_or(root);
                self.release
                    .release(project, &self.repo_dir(first_root, "rpm"))?
            }
        };
        debug!(
            "{}: patching spec to version {} release {}",
            project.name, project.version, release
        );
        let text = std::fs::read_to_string(&spec)?;
        clean_dir(&dirs.spec)?;
        let file_name = spec
            .file_name()
            .ok_or_else(|| anyhow!("{} has no name", spec.display()))?;
        let patched = dirs.spec.join(file_name);
        std::fs::write(
            &patched,
            metadata::patch_spec(&text, &project.version, &release),
        )?;
        Ok(patched)
    }
}

impl Builder for MockBuilder {
    fn init_root(&mut self, root: &BuildRoot) -> anyhow::Result<()> {
        let log = self.log_dir().join(format!("mock-init-{}.log", root));
        self.mock(root, &["--scrub=all".to_string()], &log)?;
        // Builds inside the chroot may need sudo without a terminal.
        self.chroot(
            root,
            "grep 'mockbuild ALL=(ALL) NOPASSWD: ALL' /etc/sudoers || \
             echo -e 'mockbuild ALL=(ALL) NOPASSWD: ALL\\nDefaults:mockbuild !requiretty' >> /etc/sudoers",
            &log,
        )?;
        let repo = self.repo_dir(root, "rpm");
        if repo.join("repodata").is_dir() {
            info!("restoring local repository into {}", root);
            let args = [
                "--copyin".to_string(),
                repo.display().to_string(),
                CHROOT_REPO.to_string(),
            ];
            self.mock(root, &args, &self.workspace.join("restore-mock-env-yum-repository.log"))?;
        }
        Ok(())
    }

    fn resolve_requirements(
        &mut self,
        root: &BuildRoot,
        project: &Project,
    ) -> anyhow::Result<bool> {
        let dirs = ProjectDirs::new(&self.workspace, &project.name);
        let spec = project
            .meta
            .spec_path
            .as_ref()
            .ok_or_else(|| anyhow!("{}: no spec file", project.name))?;
        let file_name = spec
            .file_name()
            .ok_or_else(|| anyhow!("{} has no name", spec.display()))?
            .to_string_lossy()
            .into_owned();
        let log = dirs.srpms.join("mock-builddep.log");
        let copy = [
            "--copyin".to_string(),
            spec.display().to_string(),
            format!("/builddir/{}", file_name),
        ];
        self.mock(root, &copy, &log)?;
        let builddep = [
            "--chroot".to_string(),
            format!("/usr/bin/yum-builddep -y /builddir/{}", file_name),
        ];
        self.try_mock(root, &builddep, &log)
    }

    fn build(&mut self, root: &BuildRoot, project: &Project) -> anyhow::Result<Artifacts> {
        let dirs = ProjectDirs::new(&self.workspace, &project.name);
        let spec = self.prepare_spec(root, project, &dirs)?;
        let tree = project.meta.layout == Layout::Centos;
        if !tree {
            self.gather_sources(project, &spec, &dirs)?;
        }

        let rpms = dirs.rpms_for(root);
        clean_dir(&rpms)?;
        if tree {
            self.build_tree(root, project, &spec, &dirs)?;
        } else if self.options.nosrpm {
            let kind = project
                .meta
                .archive
                .ok_or_else(|| anyhow!("{}: unknown source archive format", project.name))?;
            let archive = find_archive(&dirs.sources, kind)?.ok_or_else(|| {
                anyhow!("{}: no .{} archive to build from", project.name, kind.extension())
            })?;
            let chroot_sources = "/builddir/build/SOURCES/";
            let copy = [
                format!("--resultdir={}", rpms.display()),
                "--copyin".to_string(),
                dirs.sources.join(&archive).display().to_string(),
                chroot_sources.to_string(),
            ];
            self.mock(root, &copy, &rpms.join("mock-copyin.log"))?;
            let args = [
                format!("--resultdir={}", rpms.display()),
                "--chroot".to_string(),
                format!("/usr/bin/rpmbuild --noclean -tb -v {}{}", chroot_sources, archive),
            ];
            self.mock(root, &args, &rpms.join("mock-rpmbuild.log"))?;
        } else {
            clean_dir(&dirs.srpms)?;
            let args = [
                format!("--resultdir={}", dirs.srpms.display()),
                "--no-clean".to_string(),
                "--no-cleanup-after".to_string(),
                "--buildsrpm".to_string(),
                format!("--sources={}", dirs.sources.display()),
                format!("--spec={}", spec.display()),
            ];
            self.mock(root, &args, &dirs.srpms.join("mock.log"))?;
            let srpm = match list_files(&dirs.srpms, ".src.rpm")?.as_slice() {
                [one] => dirs.srpms.join(one),
                found => bail!(
                    "{}: expected one source package, found {}",
                    project.name,
                    found.len()
                ),
            };
            let args = [
                format!("--resultdir={}", rpms.display()),
                "--no-clean".to_string(),
                "--no-cleanup-after".to_string(),
                "--rebuild".to_string(),
                srpm.display().to_string(),
            ];
            self.mock(root, &args, &rpms.join("mock.log"))?;
            // The rebuild leaves a copy of the source package among the binaries.
            if let Some(name) = srpm.file_name() {
                let copy = rpms.join(name);
                if copy.is_file() {
                    std::fs::remove_file(copy)?;
                }
            }
        }

        // Keep the chroot but drop this build's tree; binaries go to the
        // local repository for later builds.
        self.chroot(
            root,
            &format!(
                "mkdir -pv {repo} && cp -v /builddir/build/RPMS/*.rpm {repo}/. ; \
                 rm -rf /builddir/build/{{BUILD,RPMS,SOURCES,SPECS,SRPMS}}/*",
                repo = CHROOT_REPO
            ),
            &dirs.rpms.join("mock-wipe-buildroot.log"),
        )?;

        Ok(Artifacts {
            rpms: list_files(&rpms, ".rpm")?
                .into_iter()
                .filter(|name| !name.ends_with(".src.rpm"))
                .collect(),
            srpms: list_files(&dirs.srpms, ".src.rpm")?,
        })
    }

    fn update_local_repository(&mut self, root: &BuildRoot) -> anyhow::Result<()> {
        self.chroot(
            root,
            &format!(
                "mkdir -pv {repo} && createrepo --update {repo} && yum clean expire-cache",
                repo = CHROOT_REPO
            ),
            &self.log_dir().join(format!("update-repository-{}.log", root)),
        )
    }

    fn wipe(&mut self, root: &BuildRoot) -> anyhow::Result<()> {
        info!("removing mock chroot {}", root);
        let status = self
            .mock_command(root)
            .args(["--orphanskill", "--scrub=chroot"])
            .status()
            .map_err(|err| anyhow!("run mock: {}", err))?;
        if !status.success() {
            bail!("removing chroot {} failed with {}", root, status);
        }
        Ok(())
    }

    fn publish(&mut self, root: &BuildRoot, project: &Project) -> anyhow::Result<()> {
        let artifacts = match project.artifacts(root) {
            Some(artifacts) => artifacts,
            None => return Ok(()),
        };
        let dirs = ProjectDirs::new(&self.workspace, &project.name);
        let link = |from: PathBuf, to_dir: PathBuf, name: &str| -> anyhow::Result<()> {
            std::fs::create_dir_all(&to_dir)?;
            let to = to_dir.join(name);
            if to.exists() {
                debug!("{} already published", name);
                return Ok(());
            }
            info!("hard linking {}", name);
            std::fs::hard_link(&from, &to)
                .with_context(|| format!("link {} to {}", from.display(), to.display()))
        };
        for rpm in &artifacts.rpms {
            link(dirs.rpms_for(root).join(rpm), self.repo_dir(root, "rpm"), rpm)?;
        }
        for srpm in &artifacts.srpms {
            link(dirs.srpms.join(srpm), self.repo_dir(root, "srpm"), srpm)?;
        }
        Ok(())
    }

    fn finalize(&mut self, root: &BuildRoot) -> anyhow::Result<()> {
        for kind in ["rpm", "srpm"] {
            let dir = self.repo_dir(root, kind);
            std::fs::create_dir_all(&dir)?;
            let log = std::fs::File::create(dir.join("log.txt"))?;
            let status = Command::new("/usr/bin/createrepo")
                .arg("--update")
                .arg(&dir)
                .stdout(Stdio::from(log.try_clone()?))
                .stderr(Stdio::from(log))
                .status()
                .map_err(|err| anyhow!("run createrepo: {}", err))?;
            if !status.success() {
                bail!("createrepo failed for {}", dir.display());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_dirs_per_root() {
        let dirs = ProjectDirs::new(Path::new("/ws"), "hello");
        assert_eq!(
            dirs.rpms_for(&BuildRoot::new("epel-7")),
            PathBuf::from("/ws/projects/hello/rpmbuild/rpm/epel-7")
        );
        assert_eq!(dirs.srpms, PathBuf::from("/ws/projects/hello/rpmbuild/srpm"));
    }

    #[test]
    fn list_sorted_by_suffix() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["b.rpm", "a.rpm", "a.src.rpm", "mock.log"] {
            std::fs::write(dir.path().join(name), "")?;
        }
        assert_eq!(
            list_files(dir.path(), ".rpm")?,
            vec!["a.rpm", "a.src.rpm", "b.rpm"]
        );
        assert!(list_files(&dir.path().join("missing"), ".rpm")?.is_empty());
        Ok(())
    }

    #[test]
    fn archive_by_kind() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["hello-1.0.tar.bz2", "hello.spec", "fix.patch"] {
            std::fs::write(dir.path().join(name), "")?;
        }
        assert_eq!(
            find_archive(dir.path(), ArchiveKind::TarBz2)?.as_deref(),
            Some("hello-1.0.tar.bz2")
        );
        assert_eq!(find_archive(dir.path(), ArchiveKind::TarGz)?, None);
        Ok(())
    }

    #[test]
    fn remote_sources() {
        assert!(is_remote("https://example.com/hello-1.0.tar.gz"));
        assert!(is_remote("ftp://example.com/hello-1.0.tar.gz"));
        assert!(!is_remote("hello-1.0.tar.gz"));
        assert!(!is_remote("file:///tmp/hello-1.0.tar.gz"));
        assert_eq!(
            spectool_args(Path::new("/p/hello.spec"), Path::new("/p/sources")),
            vec![
                "-d",
                "KVERSION a.b",
                "-g",
                "--directory",
                "/p/sources",
                "/p/hello.spec"
            ]
        );
    }

    #[test]
    fn packages_flattened() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let from = dir.path().join("RPMS");
        std::fs::create_dir_all(from.join("x86_64"))?;
        std::fs::create_dir_all(from.join("noarch"))?;
        std::fs::write(from.join("x86_64/bash-4.2-1.x86_64.rpm"), "")?;
        std::fs::write(from.join("noarch/bash-doc-4.2-1.noarch.rpm"), "")?;
        std::fs::write(from.join("x86_64/build.log"), "")?;
        let to = dir.path().join("out");
        move_packages(&from, &to)?;
        assert_eq!(
            list_files(&to, "")?,
            vec!["bash-4.2-1.x86_64.rpm", "bash-doc-4.2-1.noarch.rpm"]
        );
        move_packages(&dir.path().join("missing"), &to)?;
        Ok(())
    }

    #[test]
    fn clean_dir_empties() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let sub = dir.path().join("x");
        std::fs::create_dir_all(&sub)?;
        std::fs::write(sub.join("f"), "")?;
        clean_dir(&sub)?;
        assert!(sub.is_dir());
        assert_eq!(std::fs::read_dir(&sub)?.count(), 0);
        Ok(())
    }
}
