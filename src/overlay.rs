//! Labeled compose overlay.
//!
//! Compose's config hash is the drift oracle for services, so the
//! project identifier must be part of the hash input. For each stack the
//! builder resolves the user's compose files, injects the identifier
//! label into every service, and materializes the result as a temporary
//! file. Every subsequent compose invocation for the stack uses exactly
//! that file, so the argv is stable and relabeling can never drift.

use crate::client::DockerClient;
use crate::compose::{ComposeDocument, ComposeProject};
use crate::error::{Error, Result};
use crate::manifest::Stack;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Overlay construction options
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlayOptions {
    /// Keep the overlay file on disk when a run fails, for inspection
    pub keep_on_failure: bool,
}

/// A materialized overlay for one stack.
///
/// The temporary file lives exactly as long as this value; dropping the
/// overlay removes it unless [`preserve`](Self::preserve) was called.
#[derive(Debug)]
pub struct Overlay {
    stack_name: String,
    project: ComposeProject,
    document: ComposeDocument,
    fingerprint: String,
    file: Option<NamedTempFile>,
    keep_on_failure: bool,
}

impl Overlay {
    /// Resolve a stack's compose files and build its labeled overlay
    ///
    /// # Errors
    ///
    /// Propagates compose resolution failures; `Internal` when the
    /// overlay file cannot be written.
    pub async fn build(
        client: &DockerClient,
        identifier: &str,
        stack_name: &str,
        stack: &Stack,
        base_dir: &Path,
        options: OverlayOptions,
    ) -> Result<Self> {
        let workdir = base_dir.join(&stack.root);
        let mut user_project = ComposeProject::new(&workdir)
            .files(stack.compose_files.clone());
        if let Some(ref name) = stack.project_name {
            user_project = user_project.project_name(name.clone());
        }
        for profile in &stack.profiles {
            user_project = user_project.profile(profile.clone());
        }
        for env_file in &stack.env_files {
            user_project = user_project.env_file(env_file.clone());
        }
        for (key, value) in stack.inline_env_pairs() {
            user_project = user_project.inline(key, value);
        }

        let resolved = client.config_full(&user_project).await?;
        let mut document = (*resolved).clone();
        for service in document.services.values_mut() {
            service.ensure_label(crate::IDENTIFIER_LABEL, identifier);
        }

        let yaml = document.to_yaml()?;
        let fingerprint = fingerprint(identifier, stack_name, &yaml);

        let mut file = tempfile::Builder::new()
            .prefix("dockform-overlay-")
            .suffix(".yaml")
            .tempfile()
            .map_err(|e| {
                Error::internal(
                    format!("overlay.write[{stack_name}]"),
                    format!("failed to create overlay file: {e}"),
                )
                .with_source(e)
            })?;
        file.write_all(yaml.as_bytes()).map_err(|e| {
            Error::internal(
                format!("overlay.write[{stack_name}]"),
                format!("failed to write overlay file: {e}"),
            )
            .with_source(e)
        })?;
        debug!(stack = stack_name, path = %file.path().display(), "overlay materialized");

        // The overlay file replaces the user file list entirely; workdir,
        // project name, profiles and env stay as the user configured them.
        let project = user_project.files([file.path().to_path_buf()]);

        Ok(Self {
            stack_name: stack_name.to_string(),
            project,
            document,
            fingerprint,
            file: Some(file),
            keep_on_failure: options.keep_on_failure,
        })
    }

    /// The stack this overlay belongs to
    #[must_use]
    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    /// Project options whose file list is exactly the overlay file
    #[must_use]
    pub fn project(&self) -> &ComposeProject {
        &self.project
    }

    /// The resolved document with the identifier label injected
    #[must_use]
    pub fn document(&self) -> &ComposeDocument {
        &self.document
    }

    /// Deterministic digest over identifier, stack and rendered overlay
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Path of the overlay file on disk
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.as_ref().map_or(Path::new(""), NamedTempFile::path)
    }

    /// Called by the orchestrator when the stack's run failed; honors the
    /// keep-on-failure flag and returns the preserved path, if any
    pub fn preserve(&mut self) -> Option<PathBuf> {
        if !self.keep_on_failure {
            return None;
        }
        let file = self.file.take()?;
        match file.keep() {
            Ok((_, path)) => {
                debug!(stack = %self.stack_name, path = %path.display(), "overlay preserved");
                Some(path)
            }
            Err(e) => {
                debug!(stack = %self.stack_name, error = %e, "failed to preserve overlay");
                None
            }
        }
    }
}

fn fingerprint(identifier: &str, stack_name: &str, yaml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identifier.as_bytes());
    hasher.update([0]);
    hasher.update(stack_name.as_bytes());
    hasher.update([0]);
    hasher.update(yaml.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_changes_with_any_input() {
        let base = fingerprint("demo", "web", "services: {}\n");
        assert_ne!(base, fingerprint("other", "web", "services: {}\n"));
        assert_ne!(base, fingerprint("demo", "api", "services: {}\n"));
        assert_ne!(base, fingerprint("demo", "web", "services: {a: {}}\n"));
        assert_eq!(base, fingerprint("demo", "web", "services: {}\n"));
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let digest = fingerprint("demo", "web", "x");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
