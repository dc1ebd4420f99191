//! Invocation of the external `hidpi.sh` configuration script.

use crate::config::ScriptConfig;
use crate::display::DisplayConfiguration;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// First argument passed to the script; selects what it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptMode {
    Info,
    Auto,
    Diagnostics,
    Configure,
    Reset,
}

impl ScriptMode {
    pub fn flag(self) -> &'static str {
        match self {
            ScriptMode::Info => "--info",
            ScriptMode::Auto => "--auto",
            ScriptMode::Diagnostics => "--diagnostics",
            ScriptMode::Configure => "--configure",
            ScriptMode::Reset => "--reset",
        }
    }
}

impl fmt::Display for ScriptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInvocation {
    pub mode: ScriptMode,
    pub args: Vec<String>,
}

impl ScriptInvocation {
    pub fn new(mode: ScriptMode) -> Self {
        Self {
            mode,
            args: Vec::new(),
        }
    }

    /// `--configure <resolution> <icon> <custom name>`; the name is always
    /// passed, empty when unset.
    pub fn configure(cfg: &DisplayConfiguration) -> Self {
        Self {
            mode: ScriptMode::Configure,
            args: vec![
                cfg.resolution.to_string(),
                cfg.icon.as_str().to_string(),
                cfg.custom_name.clone(),
            ],
        }
    }

    /// Full argument vector after the script path.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.mode.flag().to_string());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl ScriptOutput {
    pub fn success_exit(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to run {program} {mode}: {source}")]
    Launch {
        program: String,
        mode: ScriptMode,
        source: std::io::Error,
    },
}

/// Runs one script invocation to completion.
///
/// There is no timeout and no cancellation: a script that never exits keeps
/// the returned future pending forever.
#[async_trait]
pub trait ScriptRunner: Send + Sync + 'static {
    async fn run(&self, invocation: &ScriptInvocation) -> Result<ScriptOutput, ScriptError>;
}

/// Runs the script through a shell with `tokio::process`.
#[derive(Debug, Clone)]
pub struct ShellScriptRunner {
    shell: PathBuf,
    script: PathBuf,
    working_dir: Option<PathBuf>,
}

impl ShellScriptRunner {
    pub fn new(shell: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            script: script.into(),
            working_dir: None,
        }
    }

    pub fn from_config(cfg: &ScriptConfig) -> Self {
        let runner = Self::new(&cfg.shell, &cfg.path);
        match &cfg.working_dir {
            Some(dir) => runner.with_working_dir(dir),
            None => runner,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl ScriptRunner for ShellScriptRunner {
    async fn run(&self, invocation: &ScriptInvocation) -> Result<ScriptOutput, ScriptError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg(&self.script)
            .args(invocation.argv())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        debug!(
            shell = %self.shell.display(),
            script = %self.script.display(),
            mode = %invocation.mode,
            args = ?invocation.args,
            "running script"
        );

        let output = cmd.output().await.map_err(|source| ScriptError::Launch {
            program: self.shell.display().to_string(),
            mode: invocation.mode,
            source,
        })?;

        let out = ScriptOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };

        if !out.success_exit() {
            warn!(
                mode = %invocation.mode,
                exit_code = ?out.exit_code,
                "script exited with non-zero status"
            );
        }
        if !out.stderr.trim().is_empty() {
            warn!(mode = %invocation.mode, stderr = %out.stderr.trim(), "script wrote to stderr");
        }

        Ok(out)
    }
}
