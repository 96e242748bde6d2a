//! Manifest loading: parse, apply defaults, validate, freeze.
//!
//! The pipeline is strict about order: interpolation happens on the raw
//! text, defaults are applied to the parsed model, validation sees the
//! final shape, and the returned manifest is never mutated again.

use crate::error::{Error, Result};
use crate::manifest::interpolate::{self, Mode};
use crate::manifest::{is_valid_name, Manifest};
use std::path::{Path, PathBuf};

/// Compose file names probed, in order, when a stack lists none
const COMPOSE_FILE_CANDIDATES: [&str; 4] = [
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

/// Options for manifest loading
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// How `${NAME}` references are treated
    pub interpolation: Mode,
}

/// Load and validate a manifest file
///
/// # Errors
///
/// `Internal` on I/O, `Validation` on shape violations, `NotFound` when
/// referenced files are absent.
pub fn load(path: &Path, options: LoadOptions) -> Result<Manifest> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::internal(
            "manifest.load",
            format!("failed to read {}: {e}", path.display()),
        )
        .with_source(e)
    })?;
    let base_dir = path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    load_str(&content, &base_dir, options)
}

/// Load and validate a manifest from a string
///
/// # Errors
///
/// As [`load`]; `base_dir` anchors every relative path.
pub fn load_str(content: &str, base_dir: &Path, options: LoadOptions) -> Result<Manifest> {
    let expanded = interpolate::expand(content, options.interpolation)?;
    let mut manifest: Manifest = serde_yaml_ng::from_str(&expanded)
        .map_err(|e| Error::validation("manifest.parse", e.to_string()).with_source(e))?;
    manifest.base_dir = base_dir.to_path_buf();

    apply_defaults(&mut manifest)?;
    validate(&manifest)?;
    Ok(manifest)
}

fn apply_defaults(manifest: &mut Manifest) -> Result<()> {
    let base_dir = manifest.base_dir.clone();

    for (name, stack) in &mut manifest.stacks {
        if stack.project_name.is_none() {
            stack.project_name = Some(name.clone());
        }

        let root = base_dir.join(&stack.root);
        if stack.compose_files.is_empty() {
            let discovered = COMPOSE_FILE_CANDIDATES
                .iter()
                .map(PathBuf::from)
                .find(|candidate| root.join(candidate).is_file());
            match discovered {
                Some(file) => stack.compose_files.push(file),
                None => {
                    return Err(Error::not_found(
                        format!("manifest.stacks[{name}]"),
                        format!("no compose file found in {}", root.display()),
                    ));
                }
            }
        }

        // Env files resolve against the stack root first, then the
        // manifest base; the frozen model stores absolute paths.
        for env_file in &mut stack.env_files {
            let in_root = root.join(&*env_file);
            let in_base = base_dir.join(&*env_file);
            if in_root.is_file() {
                *env_file = in_root;
            } else if in_base.is_file() {
                *env_file = in_base;
            } else {
                return Err(Error::not_found(
                    format!("manifest.stacks[{name}]"),
                    format!("env file not found: {}", env_file.display()),
                ));
            }
        }
    }

    for fileset in manifest.filesets.values_mut() {
        fileset.excludes = crate::fileset::normalize_excludes(&fileset.excludes);
        fileset.target_path = normalize_target_path(&fileset.target_path);
    }

    Ok(())
}

fn validate(manifest: &Manifest) -> Result<()> {
    if !is_valid_name(&manifest.project_identifier) {
        return Err(Error::validation(
            "manifest.project_identifier",
            format!(
                "must match [a-z0-9._-]+, got {:?}",
                manifest.project_identifier
            ),
        ));
    }

    for (name, stack) in &manifest.stacks {
        let op = format!("manifest.stacks[{name}]");
        if !is_valid_name(name) {
            return Err(Error::validation(op, "stack name must match [a-z0-9._-]+"));
        }
        if stack.root.as_os_str().is_empty() {
            return Err(Error::validation(op, "stack root is required"));
        }
        let root = manifest.base_dir.join(&stack.root);
        if !root.is_dir() {
            return Err(Error::not_found(
                op,
                format!("stack root not found: {}", root.display()),
            ));
        }
        for entry in &stack.env_inline {
            if !entry.contains('=') {
                return Err(Error::validation(
                    op,
                    format!("env_inline entry must be KEY=VALUE, got {entry:?}"),
                ));
            }
        }
        if let Some(ref context) = stack.context {
            if context != "default" && !manifest.contexts.contains_key(context) {
                return Err(Error::validation(
                    op,
                    format!("unknown context {context:?}"),
                ));
            }
        }
    }

    let mut targets: Vec<(&str, &str, &str)> = Vec::new();
    for (name, fileset) in &manifest.filesets {
        let op = format!("manifest.filesets[{name}]");
        if !is_valid_name(name) {
            return Err(Error::validation(op, "fileset name must match [a-z0-9._-]+"));
        }
        let source = manifest.base_dir.join(&fileset.source);
        if !source.is_dir() {
            return Err(Error::not_found(
                op,
                format!("fileset source not found: {}", source.display()),
            ));
        }
        if !fileset.target_path.starts_with('/') {
            return Err(Error::validation(
                op,
                format!(
                    "target_path must be absolute, got {:?}",
                    fileset.target_path
                ),
            ));
        }
        for mode in [&fileset.ownership.file_mode, &fileset.ownership.dir_mode]
            .into_iter()
            .flatten()
        {
            if u32::from_str_radix(mode, 8).is_err() {
                return Err(Error::validation(
                    op,
                    format!("mode must be octal, got {mode:?}"),
                ));
            }
        }
        for service in &fileset.restart_services {
            if !manifest.stacks.contains_key(&service.stack) {
                return Err(Error::validation(
                    op.clone(),
                    format!("restart target references unknown stack {:?}", service.stack),
                ));
            }
        }
        targets.push((name, &fileset.target_volume, &fileset.target_path));
    }

    // Overlap check covers exact duplicates and nesting within one volume.
    for (i, (name_a, volume_a, path_a)) in targets.iter().enumerate() {
        for (name_b, volume_b, path_b) in &targets[i + 1..] {
            if volume_a == volume_b && paths_overlap(path_a, path_b) {
                return Err(Error::validation(
                    "manifest.filesets",
                    format!(
                        "{name_a} and {name_b} overlap on {volume_a}:{}",
                        if path_a.len() <= path_b.len() { path_a } else { path_b }
                    ),
                ));
            }
        }
    }

    Ok(())
}

/// Trim trailing slashes, keeping the root path intact
fn normalize_target_path(path: &str) -> String {
    if path == "/" {
        return path.to_string();
    }
    path.trim_end_matches('/').to_string()
}

fn paths_overlap(a: &str, b: &str) -> bool {
    a == b
        || a.strip_prefix(b).is_some_and(|rest| rest.starts_with('/'))
        || b.strip_prefix(a).is_some_and(|rest| rest.starts_with('/'))
        || a == "/"
        || b == "/"
}
