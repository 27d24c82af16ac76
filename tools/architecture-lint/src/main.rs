//! CLI entry point for the repo-local architecture lint.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use cap_std::{ambient_authority, fs::Dir};

/// Crate directory linted, relative to the workspace root.
const LINTED_CRATE: &str = "producer";

fn main() -> ExitCode {
    let Some(root) = workspace_root() else {
        let _ = writeln!(
            io::stderr().lock(),
            "unable to locate workspace root (directory containing a workspace Cargo.toml)"
        );
        return ExitCode::FAILURE;
    };
    match architecture_lint::lint_crate_sources(&root.join(LINTED_CRATE)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let _ = writeln!(io::stderr().lock(), "{err}");
            ExitCode::FAILURE
        }
    }
}

fn workspace_root() -> Option<PathBuf> {
    let candidates = [
        std::env::var_os("CARGO_WORKSPACE_DIR").map(PathBuf::from),
        std::env::current_dir().ok(),
        Some(PathBuf::from(env!("CARGO_MANIFEST_DIR"))),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|start| start.ancestors().find(|dir| declares_workspace(dir)).map(Path::to_path_buf))
}

fn declares_workspace(dir: &Path) -> bool {
    Dir::open_ambient_dir(dir, ambient_authority())
        .and_then(|dir| dir.read_to_string("Cargo.toml"))
        .is_ok_and(|manifest| manifest.contains("[workspace]"))
}
