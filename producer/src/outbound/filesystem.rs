//! Capability-scoped loaders for the schema descriptor and mapping files.
//!
//! Mapping definitions live at `{dir}/{catalogue}/{collection}.json`. Only
//! `.json` files one level below a catalogue directory are read; anything
//! else is ignored. A missing mapping directory yields an empty registry so
//! deployments without external consumers need no configuration.

use std::io;
use std::path::{Path, PathBuf};

use cap_std::{ambient_authority, fs::Dir};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::mapping::{MappingLoadError, MappingRegistry};
use crate::domain::schema::{SchemaError, SchemaRegistry};

const MAPPING_EXTENSION: &str = "json";

/// Errors raised while loading definition files.
#[derive(Debug, Error)]
pub enum DefinitionLoadError {
    /// The schema descriptor could not be read.
    #[error("failed to read schema descriptor at {path}: {source}")]
    SchemaRead {
        /// Path to the descriptor.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The schema descriptor is invalid.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// A mapping definition is invalid or duplicated.
    #[error(transparent)]
    Mapping(#[from] MappingLoadError),
}

/// Read and parse the schema descriptor at `path`.
pub fn load_schema_registry(path: &Path) -> Result<SchemaRegistry, DefinitionLoadError> {
    let read_error = |source| DefinitionLoadError::SchemaRead {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path.file_name().ok_or_else(|| {
        read_error(io::Error::new(
            io::ErrorKind::InvalidInput,
            "schema path has no file name",
        ))
    })?;
    let directory = Dir::open_ambient_dir(parent, ambient_authority()).map_err(read_error)?;
    let json = directory
        .read_to_string(Path::new(file_name))
        .map_err(read_error)?;
    let registry = SchemaRegistry::from_json_str(&json)?;
    info!(path = %path.display(), "loaded schema descriptor");
    Ok(registry)
}

/// Load every mapping definition below `root`.
pub fn load_mapping_registry(root: &Path) -> Result<MappingRegistry, DefinitionLoadError> {
    let io_error = |origin: &Path, err: io::Error| MappingLoadError::Io {
        origin: origin.display().to_string(),
        message: err.to_string(),
    };
    let mut registry = MappingRegistry::new();
    let directory = match Dir::open_ambient_dir(root, ambient_authority()) {
        Ok(directory) => directory,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %root.display(), "mapping directory absent; no mappings loaded");
            return Ok(registry);
        }
        Err(err) => return Err(io_error(root, err).into()),
    };

    for catalogue in sorted_entries(&directory).map_err(|err| io_error(root, err))? {
        let catalogue_path = root.join(&catalogue);
        let Ok(catalogue_dir) = directory.open_dir(&catalogue) else {
            continue;
        };
        for file in sorted_entries(&catalogue_dir).map_err(|err| io_error(&catalogue_path, err))? {
            let file_path = catalogue_path.join(&file);
            if file_path.extension().and_then(|ext| ext.to_str()) != Some(MAPPING_EXTENSION) {
                continue;
            }
            let json = catalogue_dir
                .read_to_string(&file)
                .map_err(|err| io_error(&file_path, err))?;
            registry.insert_json(&file_path.display().to_string(), &json)?;
        }
    }
    info!(
        path = %root.display(),
        definitions = registry.len(),
        "loaded mapping definitions"
    );
    Ok(registry)
}

fn sorted_entries(directory: &Dir) -> io::Result<Vec<PathBuf>> {
    let mut names = Vec::new();
    for entry in directory.entries()? {
        names.push(PathBuf::from(entry?.file_name()));
    }
    names.sort();
    Ok(names)
}
