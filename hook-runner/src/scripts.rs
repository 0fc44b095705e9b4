//! Ref → script lookup and script execution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use thiserror::Error;
use tokio::process::Command;
use tracing::info;

use crate::config::Setting;

/// A script that could not be run to a successful exit.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to start {script}: {source}")]
    Spawn {
        script: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{script} failed: {status}")]
    Failed { script: PathBuf, status: ExitStatus },
}

/// Immutable mapping from ref to the ordered scripts it triggers.
#[derive(Debug, Clone, Default)]
pub struct ScriptTable {
    scripts: HashMap<String, Vec<PathBuf>>,
}

impl ScriptTable {
    /// Build the table from settings groups.
    ///
    /// A ref listed in several groups collects the scripts of each group,
    /// in the order the groups appear.
    pub fn from_settings(settings: &[Setting]) -> Self {
        let mut scripts: HashMap<String, Vec<PathBuf>> = HashMap::new();

        for setting in settings {
            for git_ref in &setting.refs {
                scripts
                    .entry(git_ref.clone())
                    .or_default()
                    .extend(setting.scripts.iter().cloned());
            }
        }

        Self { scripts }
    }

    /// Scripts configured for `git_ref`; empty when the ref is unknown.
    pub fn get(&self, git_ref: &str) -> &[PathBuf] {
        self.scripts.get(git_ref).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct refs.
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

/// Run a single script with no arguments and wait for it to exit.
///
/// Environment and stdio are inherited. There is no timeout.
pub async fn run_script(script: &Path) -> Result<(), ScriptError> {
    info!(script = %script.display(), "script_running");

    let status = Command::new(script)
        .status()
        .await
        .map_err(|source| ScriptError::Spawn {
            script: script.to_path_buf(),
            source,
        })?;

    if !status.success() {
        return Err(ScriptError::Failed {
            script: script.to_path_buf(),
            status,
        });
    }

    info!(script = %script.display(), "script_complete");

    Ok(())
}
