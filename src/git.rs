use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Replacement text for credentials in logs and error messages
const REDACTED: &str = "***";

/// Captured result of a command run to completion
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, or -1 when the process was terminated by a signal
    pub status: i32,
    /// Combined stdout and stderr
    pub output: String,
}

/// Executes external commands on behalf of the mirror synchronizer
///
/// Every call names its working directory explicitly; implementations must
/// never depend on or change the process-wide current directory.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture combined output. A non-zero exit is an error.
    async fn run(&self, dir: Option<&Path>, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Run with stdout/stderr inherited so progress is visible. A non-zero exit is an error.
    async fn run_streamed(&self, dir: Option<&Path>, program: &str, args: &[&str]) -> Result<()>;
}

/// Command runner backed by `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct GitCommandRunner {
    timeout: Option<Duration>,
}

impl GitCommandRunner {
    /// Create a runner, optionally killing commands that exceed `timeout`
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    fn command(dir: Option<&Path>, program: &str, args: &[&str]) -> AsyncCommand {
        let mut command = AsyncCommand::new(program);
        command.args(args).stdin(Stdio::null()).kill_on_drop(true);
        if let Some(dir) = dir {
            command.current_dir(dir);
        }
        command
    }

    async fn wait<T>(
        &self,
        label: &str,
        future: impl Future<Output = std::io::Result<T>>,
    ) -> Result<T> {
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, future).await {
                Ok(result) => result.with_context(|| format!("Failed to execute {}", label)),
                Err(_) => Err(anyhow!("{} timed out after {}s", label, limit.as_secs())),
            },
            None => future
                .await
                .with_context(|| format!("Failed to execute {}", label)),
        }
    }
}

#[async_trait]
impl CommandRunner for GitCommandRunner {
    async fn run(&self, dir: Option<&Path>, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let label = describe(program, args);
        let mut command = Self::command(dir, program, args);

        let output = self.wait(&label, command.output()).await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let status = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            bail!("{} failed (exit status {}): {}", label, status, combined.trim());
        }

        Ok(CommandOutput {
            status,
            output: combined,
        })
    }

    async fn run_streamed(&self, dir: Option<&Path>, program: &str, args: &[&str]) -> Result<()> {
        let label = describe(program, args);
        let mut command = Self::command(dir, program, args);
        command.stdout(Stdio::inherit()).stderr(Stdio::inherit());

        let status = self.wait(&label, command.status()).await?;

        if !status.success() {
            bail!(
                "{} failed (exit status {})",
                label,
                status.code().unwrap_or(-1)
            );
        }

        Ok(())
    }
}

/// Short command label made of the program and its leading subcommand words.
/// URLs and paths never appear in it.
pub fn describe(program: &str, args: &[&str]) -> String {
    let mut label = program.to_string();
    for word in args
        .iter()
        .take_while(|arg| arg.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') && !arg.starts_with('-'))
        .take(2)
    {
        label.push(' ');
        label.push_str(word);
    }
    label
}

/// Replace every occurrence of `secret` in `text`
pub fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        text.to_string()
    } else {
        text.replace(secret, REDACTED)
    }
}

/// Authenticated and unauthenticated forms of a mirror's origin URL
#[derive(Clone, PartialEq, Eq)]
pub struct MirrorRemote {
    authenticated: String,
    unauthenticated: String,
}

impl MirrorRemote {
    /// Build both URL forms from the repository's `owner/name`
    pub fn new(host: &str, login: &str, token: &str, full_name: &str) -> Self {
        Self {
            authenticated: format!("https://{}:{}@{}/{}.git", login, token, host, full_name),
            unauthenticated: format!("https://{}/{}.git", host, full_name),
        }
    }

    /// URL carrying `login:token@`, only ever set during a transfer
    pub fn authenticated(&self) -> &str {
        &self.authenticated
    }

    /// URL persisted in the mirror's config at rest
    pub fn unauthenticated(&self) -> &str {
        &self.unauthenticated
    }
}

impl fmt::Debug for MirrorRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorRemote")
            .field("url", &self.unauthenticated)
            .finish_non_exhaustive()
    }
}

/// Allow git to operate on mirrors owned by any user (`safe.directory = *`).
///
/// Existing `*` entries are replaced rather than appended to, so repeated
/// runs leave a single entry in the global config.
pub async fn mark_all_directories_safe(runner: &dyn CommandRunner) -> Result<()> {
    debug!("Setting git safe.directory * in the global config");
    runner
        .run(
            None,
            "git",
            &["config", "--global", "--replace-all", "safe.directory", "*", r"^\*$"],
        )
        .await?;
    Ok(())
}

/// Create a bare mirror of `url` at `path`
pub async fn clone_mirror(runner: &dyn CommandRunner, url: &str, path: &Path) -> Result<()> {
    let path = path.to_string_lossy();
    runner
        .run_streamed(
            None,
            "git",
            &["clone", "--mirror", "--no-checkout", "--progress", url, &*path],
        )
        .await
}

/// Fetch every LFS object referenced by any ref of the mirror
pub async fn fetch_lfs_objects(runner: &dyn CommandRunner, path: &Path) -> Result<()> {
    runner
        .run_streamed(Some(path), "git", &["lfs", "fetch", "--all"])
        .await
}

/// Fetch all remotes of an existing mirror
pub async fn update_remotes(runner: &dyn CommandRunner, path: &Path) -> Result<()> {
    runner
        .run_streamed(Some(path), "git", &["remote", "update"])
        .await
}

/// Point the mirror's `origin` at `url`
pub async fn set_origin_url(runner: &dyn CommandRunner, path: &Path, url: &str) -> Result<()> {
    runner
        .run(Some(path), "git", &["remote", "set-url", "origin", url])
        .await?;
    Ok(())
}
