//! Web bundle build step.
//!
//! The web UI is compiled by an external JavaScript toolchain before its
//! listener binds. Dependencies are installed only when a manifest exists
//! and the dependency cache does not; then the build script runs. Any
//! failure is fatal so a stale or missing bundle is never served.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use tokio::process::Command;
use tracing::info;

/// Errors from the web bundle build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// `package.json` is missing or unreadable.
    #[error("web app manifest '{}' not found: {source}", path.display())]
    MissingManifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The build tool could not be started.
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The build tool exited unsuccessfully.
    #[error("`{command}` failed with {status}")]
    Failed { command: String, status: ExitStatus },
}

/// Produces the web bundle inside a web app directory.
#[async_trait::async_trait]
pub trait AssetBuilder: Send + Sync {
    /// Build the bundle in `web_dir`. Blocks until the build finishes.
    async fn build(&self, web_dir: &Path) -> Result<(), BuildError>;
}

/// Builds the bundle with `npm install` (when needed) and `npm run <script>`.
#[derive(Debug, Clone)]
pub struct NpmBuilder {
    program: String,
    leading_args: Vec<String>,
    script: String,
}

impl NpmBuilder {
    /// Use `npm` from `PATH` with the given build script.
    #[must_use]
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            program: "npm".to_owned(),
            leading_args: Vec::new(),
            script: script.into(),
        }
    }

    /// Use a different npm-compatible command, e.g. `["pnpm"]` or
    /// `["sh", "./npm-wrapper"]`. An empty command is ignored.
    #[must_use]
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parts = command.into_iter().map(Into::into);
        if let Some(program) = parts.next() {
            self.program = program;
            self.leading_args = parts.collect();
        }
        self
    }

    async fn run(&self, web_dir: &Path, args: &[&str]) -> Result<(), BuildError> {
        let command = std::iter::once(self.program.as_str())
            .chain(self.leading_args.iter().map(String::as_str))
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        let status = Command::new(&self.program)
            .args(&self.leading_args)
            .args(args)
            .current_dir(web_dir)
            .status()
            .await
            .map_err(|source| BuildError::Spawn {
                command: command.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(BuildError::Failed { command, status })
        }
    }
}

#[async_trait::async_trait]
impl AssetBuilder for NpmBuilder {
    async fn build(&self, web_dir: &Path) -> Result<(), BuildError> {
        let manifest = web_dir.join("package.json");
        tokio::fs::metadata(&manifest)
            .await
            .map_err(|source| BuildError::MissingManifest {
                path: manifest,
                source,
            })?;

        if !tokio::fs::try_exists(web_dir.join("node_modules"))
            .await
            .unwrap_or(false)
        {
            self.run(web_dir, &["install"]).await?;
            info!(dir = %web_dir.display(), "web dependencies installed");
        }

        self.run(web_dir, &["run", self.script.as_str()]).await?;
        info!(dir = %web_dir.display(), script = %self.script, "web assets compiled");
        Ok(())
    }
}
