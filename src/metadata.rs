//! Package metadata as declared by a project's spec file.
//!
//! Only what the build engine needs is read: the package names a project
//! produces, the names it requires, and the source and patch files it
//! references.  Conditionals and most macros are not evaluated.

use anyhow::{anyhow, bail, Context};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

/// How a project's sources are packed for the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Tgz,
    Tar,
    TarBz2,
    TarXz,
    Zip,
}

impl ArchiveKind {
    /// Guess the archive kind from a source file name.
    pub fn from_source(source: &str) -> Option<Self> {
        // Longest suffixes first: ".tar.gz" also ends with ".gz".
        const SUFFIXES: [(&str, ArchiveKind); 6] = [
            (".tar.gz", ArchiveKind::TarGz),
            (".tar.bz2", ArchiveKind::TarBz2),
            (".tar.xz", ArchiveKind::TarXz),
            (".tgz", ArchiveKind::Tgz),
            (".tar", ArchiveKind::Tar),
            (".zip", ArchiveKind::Zip),
        ];
        SUFFIXES
            .iter()
            .find(|(suffix, _)| source.ends_with(suffix))
            .map(|&(_, kind)| kind)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveKind::TarGz => "tar.gz",
            ArchiveKind::Tgz => "tgz",
            ArchiveKind::Tar => "tar",
            ArchiveKind::TarBz2 => "tar.bz2",
            ArchiveKind::TarXz => "tar.xz",
            ArchiveKind::Zip => "zip",
        }
    }
}

/// How a project directory is organised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Layout {
    /// Spec at the top, sources beside it or under `SOURCES`.
    #[default]
    Plain,
    /// CentOS package repository: `SPECS/`, `SOURCES/` and a
    /// `.<repo>.metadata` list of lookaside files.  Built straight from
    /// the tree.
    Centos,
}

/// Subdirectory holding the spec in a CentOS style tree.
pub const SPECS_DIR: &str = "SPECS";
/// Subdirectory holding the sources in a CentOS style tree.
pub const SOURCES_DIR: &str = "SOURCES";

impl Layout {
    pub fn detect(dir: &Path) -> anyhow::Result<Self> {
        if dir.join(SPECS_DIR).is_dir()
            && dir.join(SOURCES_DIR).is_dir()
            && lookaside_list(dir)?.is_some()
        {
            Ok(Layout::Centos)
        } else {
            Ok(Layout::Plain)
        }
    }
}

/// The `.<repo>.metadata` file of `dir`, if there is one.
fn lookaside_list(dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let repo = name
            .strip_prefix('.')
            .and_then(|rest| rest.strip_suffix(".metadata"));
        if matches!(repo, Some(repo) if !repo.is_empty() && !repo.contains('.')) {
            found.push(entry.path());
        }
    }
    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        _ => bail!("more than one lookaside metadata file in {}", dir.display()),
    }
}

/// Files a CentOS style tree lists in its lookaside metadata, as
/// `(checksum, path relative to dir)`.
pub fn lookaside_files(dir: &Path) -> anyhow::Result<Vec<(String, String)>> {
    let path = match lookaside_list(dir)? {
        Some(path) => path,
        None => return Ok(Vec::new()),
    };
    let text =
        std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let mut files = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(checksum), Some(file)) => files.push((checksum.to_string(), file.to_string())),
            (None, _) => {}
            (Some(_), None) => bail!("{}:{}: expected checksum and path", path.display(), n + 1),
        }
    }
    Ok(files)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageMetadata {
    /// Main package name.
    pub name: String,
    pub version: String,
    pub release: String,
    /// Package names the build outputs, main package first.
    pub produces: Vec<String>,
    /// Package names needed at build time.
    pub build_requires: Vec<String>,
    /// Package names needed at run time.
    pub requires: Vec<String>,
    pub sources: Vec<String>,
    pub patches: Vec<String>,
    /// None when the spec lists no source in a known archive format.
    pub archive: Option<ArchiveKind>,
    /// The spec file the metadata was read from, if any.
    pub spec_path: Option<PathBuf>,
    pub layout: Layout,
}

impl PackageMetadata {
    pub fn requires_at_build(&self, package: &str) -> bool {
        self.build_requires.iter().any(|r| r == package)
    }
}

/// Supplies metadata for a project directory.
pub trait MetadataSource {
    /// Read the metadata of the project in `dir`.  `spec` names the spec file
    /// to use when the directory may hold several.
    fn read(&self, dir: &Path, spec: Option<&str>) -> anyhow::Result<PackageMetadata>;
}

/// Reads metadata straight from `.spec` files on disk.
pub struct SpecReader;

impl MetadataSource for SpecReader {
    fn read(&self, dir: &Path, spec: Option<&str>) -> anyhow::Result<PackageMetadata> {
        let specs_dir = dir.join(SPECS_DIR);
        let path = match spec {
            Some(name) => {
                if !name.ends_with(".spec") {
                    bail!("spec file {:?} does not end with .spec", name);
                }
                let top = dir.join(name);
                if !top.is_file() && specs_dir.join(name).is_file() {
                    specs_dir.join(name)
                } else {
                    top
                }
            }
            None if find_specs(dir)?.is_empty() && specs_dir.is_dir() => {
                locate_spec(&specs_dir)?
            }
            None => locate_spec(dir)?,
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))?;
        let mut meta =
            parse_spec(&text).with_context(|| format!("in spec {}", path.display()))?;
        meta.layout = if path.starts_with(&specs_dir) {
            Layout::Centos
        } else {
            Layout::detect(dir)?
        };
        meta.spec_path = Some(path);
        Ok(meta)
    }
}

/// All `.spec` files directly inside `dir`, sorted.
pub fn find_specs(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut specs = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "spec") {
            specs.push(path);
        }
    }
    specs.sort();
    Ok(specs)
}

/// The single spec file in `dir`.
pub fn locate_spec(dir: &Path) -> anyhow::Result<PathBuf> {
    let mut specs = find_specs(dir)?;
    match specs.len() {
        0 => bail!("no spec file in {}", dir.display()),
        1 => Ok(specs.remove(0)),
        _ => bail!(
            "more than one spec file in {}, name the one to use",
            dir.display()
        ),
    }
}

/// Which part of the spec a line belongs to.  Tags are only meaningful in
/// the preamble and in `%package` headers.
#[derive(PartialEq)]
enum Section {
    Preamble,
    Body,
}

struct Macros(FxHashMap<String, String>);

impl Macros {
    fn define(&mut self, name: &str, value: &str) {
        let value = self.expand(value);
        self.0.insert(name.to_lowercase(), value);
    }

    /// Substitute `%{name}` and `%{?name}` references to known macros.
    /// Unknown `%{?name}` expands to nothing; other unknown macros are kept.
    fn expand(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("%{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = match after.find('}') {
                Some(end) => end,
                None => {
                    out.push_str(&rest[start..]);
                    return out;
                }
            };
            let inner = &after[..end];
            let (optional, key) = match inner.strip_prefix('?') {
                Some(key) => (true, key),
                None => (false, inner),
            };
            match self.0.get(&key.to_lowercase()) {
                Some(value) => out.push_str(value),
                None if optional => {}
                None => out.push_str(&rest[start..start + 2 + end + 1]),
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        out
    }
}

/// Split a requirement list into package names, dropping version constraints:
/// `foo >= 1.2, bar` and `foo>=1.2, bar` both yield `["foo", "bar"]`.
fn requirement_names(value: &str) -> Vec<String> {
    let is_op = |c: char| matches!(c, '<' | '>' | '=');
    let mut names = Vec::new();
    let mut tokens = value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty());
    while let Some(token) = tokens.next() {
        let (name, constraint) = match token.find(is_op) {
            Some(i) => token.split_at(i),
            None => (token, ""),
        };
        if !name.is_empty() {
            names.push(name.to_string());
        }
        if !constraint.is_empty() && constraint.trim_start_matches(is_op).is_empty() {
            // The operator ends the token, so the version is the next one.
            tokens.next();
        }
    }
    names
}

fn split_tag(line: &str) -> Option<(&str, &str)> {
    let (tag, value) = line.split_once(':')?;
    if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some((tag, value.trim()))
}

/// Tags like `Source0` or `Patch12`.
fn is_numbered(tag: &str, prefix: &str) -> bool {
    tag.len() >= prefix.len()
        && tag[..prefix.len()].eq_ignore_ascii_case(prefix)
        && tag[prefix.len()..].chars().all(|c| c.is_ascii_digit())
}

/// Parse the text of a spec file.
pub fn parse_spec(text: &str) -> anyhow::Result<PackageMetadata> {
    let mut meta = PackageMetadata::default();
    let mut macros = Macros(FxHashMap::default());
    let mut section = Section::Preamble;

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(directive) = line.strip_prefix('%') {
            let mut words = directive.split_whitespace();
            let keyword = words.next().unwrap_or("");
            match keyword {
                "define" | "global" => {
                    let name = words.next();
                    let value = words.collect::<Vec<_>>().join(" ");
                    match name {
                        Some(name) if !value.is_empty() => macros.define(name, &value),
                        _ => bail!("line {}: malformed %{} macro", lineno + 1, keyword),
                    }
                }
                "package" => {
                    if meta.name.is_empty() {
                        bail!(
                            "line {}: %package before the package Name is defined",
                            lineno + 1
                        );
                    }
                    let args: Vec<&str> = words.collect();
                    let package = match args.as_slice() {
                        ["-n", full] => macros.expand(full),
                        [sub] => format!("{}-{}", meta.name, macros.expand(sub)),
                        _ => bail!("line {}: malformed %package", lineno + 1),
                    };
                    meta.produces.push(package);
                    section = Section::Preamble;
                }
                // Conditionals are not evaluated; both branches are read.
                "if" | "ifarch" | "ifnarch" | "ifos" | "else" | "endif" => {}
                _ => section = Section::Body,
            }
            continue;
        }

        if section != Section::Preamble {
            continue;
        }
        let (tag, value) = match split_tag(line) {
            Some(tv) => tv,
            None => continue,
        };
        let value = macros.expand(value);
        match tag.to_lowercase().as_str() {
            "name" => {
                macros.define("name", &value);
                meta.produces.insert(0, value.clone());
                meta.name = value;
            }
            "version" => {
                macros.define("version", &value);
                meta.version = value;
            }
            "release" => {
                macros.define("release", &value);
                meta.release = value;
            }
            "buildrequires" => meta.build_requires.extend(requirement_names(&value)),
            "requires" => meta.requires.extend(requirement_names(&value)),
            _ if is_numbered(tag, "source") => meta.sources.push(value),
            _ if is_numbered(tag, "patch") => meta.patches.push(value),
            _ => {}
        }
    }

    if meta.name.is_empty() {
        bail!("spec does not define Name");
    }
    if meta.version.is_empty() {
        bail!("spec of {} does not define Version", meta.name);
    }
    if meta.release.is_empty() {
        bail!("spec of {} does not define Release", meta.name);
    }
    meta.archive = meta
        .sources
        .first()
        .and_then(|source| ArchiveKind::from_source(source));
    Ok(meta)
}

/// Rewrite the `Version:` and `Release:` tags of a spec.
pub fn patch_spec(text: &str, version: &str, release: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let lower = line.trim().to_lowercase();
        if lower.starts_with("version:") {
            out.push_str(&format!("Version: {}", version));
        } else if lower.starts_with("release:") {
            out.push_str(&format!("Release: {}", release));
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

/// File name of a source reference, which may be a URL.
pub fn source_file_name(source: &str) -> anyhow::Result<&str> {
    source
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| anyhow!("source {:?} has no file name", source))
}
