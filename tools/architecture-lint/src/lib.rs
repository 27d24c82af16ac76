//! Repo-local architectural lint for the event producer's hexagonal layout.
//!
//! `producer/src` is split into `domain` (producer logic and ports),
//! `inbound` (JSON invocation), and `outbound` (database, broker, and
//! filesystem adapters). The lint parses every source file of those layers
//! and reports:
//!
//! - `domain` code naming adapter modules or infrastructure crates
//! - `inbound` code naming `outbound` modules or infrastructure crates
//! - `outbound` code naming `inbound` modules or CLI crates
//!
//! Run it with `cargo run -p architecture-lint`.

use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use cap_std::{ambient_authority, fs::Dir};
use syn::visit::Visit;

/// Name under which integration tests and binaries import the crate.
const CRATE_NAME: &str = "eventproducer";

const LAYER_DIRS: [&str; 3] = ["domain", "inbound", "outbound"];

/// Crates that only adapters may use.
const INFRASTRUCTURE_CRATES: [&str; 7] = [
    "cap_std",
    "diesel",
    "diesel_async",
    "diesel_migrations",
    "lapin",
    "ortho_config",
    "tracing_subscriber",
];

/// Crates reserved for the binary entry point.
const ENTRY_POINT_CRATES: [&str; 3] = ["clap", "color_eyre", "tracing_subscriber"];

/// A single boundary violation discovered by the linter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File path relative to the crate's `src` directory.
    pub file: PathBuf,
    /// Human-readable description of the violated rule.
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.file.display(), self.message)
    }
}

/// Failure modes returned by the architecture lint.
#[derive(Debug)]
pub enum ArchitectureLintError {
    /// Filesystem traversal or reading failed.
    Io(io::Error),
    /// Rust source parsing failed.
    Parse { file: PathBuf, message: String },
    /// One or more boundary violations were found.
    Violations(Vec<Violation>),
}

impl fmt::Display for ArchitectureLintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error while linting architecture: {err}"),
            Self::Parse { file, message } => {
                write!(f, "failed to parse {}: {message}", file.display())
            }
            Self::Violations(violations) => {
                writeln!(f, "Architecture boundary violations:")?;
                for violation in violations {
                    writeln!(f, "- {violation}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ArchitectureLintError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ArchitectureLintError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Lint the sources of the crate rooted at `crate_dir` (the directory
/// holding its `Cargo.toml`).
pub fn lint_crate_sources(crate_dir: &Path) -> Result<(), ArchitectureLintError> {
    let src = Dir::open_ambient_dir(crate_dir.join("src"), ambient_authority())?;
    let mut sources = Vec::new();
    for layer in LAYER_DIRS {
        match src.open_dir(layer) {
            Ok(dir) => collect_sources(&dir, Path::new(layer), &mut sources)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    lint_sources(&sources)
}

/// Lint the provided Rust sources. Intended for unit and behaviour tests.
pub fn lint_sources(sources: &[LintSource]) -> Result<(), ArchitectureLintError> {
    let mut violations = Vec::new();

    for source in sources {
        let layer = Layer::from_path(&source.file).ok_or_else(|| ArchitectureLintError::Parse {
            file: source.file.clone(),
            message: "file is outside the domain, inbound, and outbound layers".to_owned(),
        })?;
        let parsed =
            syn::parse_file(&source.contents).map_err(|err| ArchitectureLintError::Parse {
                file: source.file.clone(),
                message: err.to_string(),
            })?;
        violations.extend(layer.check(&source.file, &parsed));
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ArchitectureLintError::Violations(violations))
    }
}

/// A Rust source file to be linted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintSource {
    /// Path relative to the crate's `src` directory.
    pub file: PathBuf,
    /// File contents.
    pub contents: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layer {
    Domain,
    Inbound,
    Outbound,
}

impl Layer {
    fn from_path(relative_path: &Path) -> Option<Self> {
        match relative_path.components().next()?.as_os_str().to_str()? {
            "domain" => Some(Self::Domain),
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    fn forbidden_layers(self) -> &'static [&'static str] {
        match self {
            Self::Domain => &["inbound", "outbound"],
            Self::Inbound => &["outbound"],
            Self::Outbound => &["inbound"],
        }
    }

    fn forbids_crate(self, root: &str) -> bool {
        match self {
            Self::Domain | Self::Inbound => {
                INFRASTRUCTURE_CRATES.contains(&root) || ENTRY_POINT_CRATES.contains(&root)
            }
            Self::Outbound => ENTRY_POINT_CRATES.contains(&root),
        }
    }

    fn check(self, file: &Path, parsed: &syn::File) -> Vec<Violation> {
        let mut collector = PathCollector::default();
        collector.visit_file(parsed);

        let mut messages = BTreeSet::new();
        for segments in &collector.paths {
            if let Some(layer) = internal_layer(segments)
                .filter(|layer| self.forbidden_layers().contains(layer))
            {
                messages.insert(format!(
                    "{} module must not depend on crate::{layer}",
                    self.name()
                ));
            }
            if let Some(root) = external_crate(segments).filter(|root| self.forbids_crate(root)) {
                messages.insert(format!(
                    "{} module must not depend on external crate `{root}`",
                    self.name()
                ));
            }
        }

        messages
            .into_iter()
            .map(|message| Violation {
                file: file.to_path_buf(),
                message,
            })
            .collect()
    }
}

fn is_relative(segment: &str) -> bool {
    matches!(segment, "crate" | "self" | "super")
}

/// Layer named by a path, for `crate::`, `super::`, bare, and
/// `eventproducer::` forms.
fn internal_layer(segments: &[String]) -> Option<&str> {
    let first = segments.first()?.as_str();
    let layer = if is_relative(first) {
        segments.iter().find(|segment| !is_relative(segment))?
    } else if first == CRATE_NAME {
        segments.get(1)?
    } else {
        segments.first()?
    };
    LAYER_DIRS
        .iter()
        .find(|candidate| **candidate == layer.as_str())
        .copied()
}

fn external_crate(segments: &[String]) -> Option<&str> {
    let root = segments.first()?.as_str();
    (!is_relative(root) && root != CRATE_NAME).then_some(root)
}

#[derive(Default)]
struct PathCollector {
    paths: BTreeSet<Vec<String>>,
}

impl PathCollector {
    fn record_use_tree(&mut self, tree: &syn::UseTree, mut prefix: Vec<String>) {
        match tree {
            syn::UseTree::Path(path) => {
                prefix.push(path.ident.to_string());
                self.record_use_tree(&path.tree, prefix);
            }
            syn::UseTree::Name(name) => {
                prefix.push(name.ident.to_string());
                self.paths.insert(prefix);
            }
            syn::UseTree::Rename(rename) => {
                prefix.push(rename.ident.to_string());
                self.paths.insert(prefix);
            }
            syn::UseTree::Glob(_) => {
                prefix.push("*".to_owned());
                self.paths.insert(prefix);
            }
            syn::UseTree::Group(group) => {
                for item in &group.items {
                    self.record_use_tree(item, prefix.clone());
                }
            }
        }
    }
}

impl<'ast> Visit<'ast> for PathCollector {
    fn visit_path(&mut self, node: &'ast syn::Path) {
        let segments: Vec<String> = node
            .segments
            .iter()
            .map(|segment| segment.ident.to_string())
            .collect();
        if !segments.is_empty() {
            self.paths.insert(segments);
        }
        syn::visit::visit_path(self, node);
    }

    fn visit_item_use(&mut self, node: &'ast syn::ItemUse) {
        self.record_use_tree(&node.tree, Vec::new());
    }
}

fn collect_sources(
    dir: &Dir,
    relative: &Path,
    sources: &mut Vec<LintSource>,
) -> Result<(), ArchitectureLintError> {
    let mut entries = Vec::new();
    for entry in dir.entries()? {
        let entry = entry?;
        entries.push((PathBuf::from(entry.file_name()), entry.file_type()?.is_dir()));
    }
    entries.sort();

    for (name, is_dir) in entries {
        let path = relative.join(&name);
        if is_dir {
            collect_sources(&dir.open_dir(&name)?, &path, sources)?;
        } else if name.extension().and_then(|ext| ext.to_str()) == Some("rs") {
            let contents = dir.read_to_string(&name)?;
            sources.push(LintSource {
                file: path,
                contents,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
