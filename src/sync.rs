//! Sync Engine - Orchestrates mirror backups of every accessible repository
//!
//! A run lists repositories once, then walks them sequentially. Each
//! repository is either cloned as a new bare mirror or refreshed in place.
//! The token is written into the mirror's `origin` only for the duration of
//! the transfer and removed again afterwards.

use crate::config::{resolve_backup_root, Config, TOKEN_ENV};
use crate::filesystem::{FileSystem, LocalFileSystem};
use crate::git::{self, redact, CommandRunner, GitCommandRunner, MirrorRemote};
use crate::github::{list_all_repositories, GitHubClient, RepoLister, Repository};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Run-wide settings resolved from configuration and the environment
#[derive(Clone)]
pub struct BackupSettings {
    token: String,
    backup_root: PathBuf,
    host: String,
    per_page: u8,
}

impl BackupSettings {
    /// Settings for `github.com` with a blank `backup_folder` meaning the default root.
    /// Surrounding whitespace in the token is dropped.
    pub fn new(token: impl Into<String>, backup_folder: &str) -> Self {
        Self {
            token: token.into().trim().to_string(),
            backup_root: resolve_backup_root(backup_folder),
            host: "github.com".to_string(),
            per_page: 100,
        }
    }

    /// Settings from a loaded configuration
    pub fn from_config(config: &Config, token: impl Into<String>) -> Self {
        Self {
            host: config.github.host.clone(),
            per_page: config.github.per_page.clamp(1, 100),
            ..Self::new(token, &config.backup_folder)
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Whether a usable credential is present
    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }

    /// Fail with a message naming the credential variable when no token is set
    pub fn require_token(&self) -> Result<()> {
        if !self.has_token() {
            bail!(
                "{} environment variable is not set. A GitHub token is required to run a backup.",
                TOKEN_ENV
            );
        }
        Ok(())
    }

    /// Mirror location for a repository: `<root>/<owner>/<name>.git`
    pub fn mirror_path(&self, repo: &Repository) -> Option<PathBuf> {
        let (owner, name) = repo.path_segments()?;
        Some(self.backup_root.join(owner).join(format!("{}.git", name)))
    }
}

impl std::fmt::Debug for BackupSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupSettings")
            .field("backup_root", &self.backup_root)
            .field("host", &self.host)
            .field("per_page", &self.per_page)
            .finish_non_exhaustive()
    }
}

/// Outcome of backing up a single repository
#[derive(Debug, Clone)]
pub enum SyncResult {
    /// A new mirror was cloned
    Cloned {
        repo: String,
        path: PathBuf,
        warnings: Vec<String>,
    },
    /// An existing mirror was refreshed
    Updated {
        repo: String,
        path: PathBuf,
        warnings: Vec<String>,
    },
    /// The repository was not touched
    Skipped { repo: String, reason: String },
    /// A required step failed; remaining steps were not attempted
    Failed {
        repo: String,
        path: PathBuf,
        error: String,
    },
}

impl SyncResult {
    pub fn repo(&self) -> &str {
        match self {
            SyncResult::Cloned { repo, .. }
            | SyncResult::Updated { repo, .. }
            | SyncResult::Skipped { repo, .. }
            | SyncResult::Failed { repo, .. } => repo,
        }
    }

    /// Best-effort step failures recorded on an otherwise successful backup
    pub fn warnings(&self) -> &[String] {
        match self {
            SyncResult::Cloned { warnings, .. } | SyncResult::Updated { warnings, .. } => warnings,
            _ => &[],
        }
    }
}

/// Results from a complete backup run
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub total_repositories: usize,
    pub cloned: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub warnings: usize,
    pub duration: Duration,
    pub results: Vec<SyncResult>,
}

impl SyncSummary {
    fn compile(results: Vec<SyncResult>, duration: Duration) -> Self {
        let mut summary = Self {
            total_repositories: results.len(),
            cloned: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            warnings: 0,
            duration,
            results: Vec::new(),
        };

        for result in &results {
            match result {
                SyncResult::Cloned { .. } => summary.cloned += 1,
                SyncResult::Updated { .. } => summary.updated += 1,
                SyncResult::Skipped { .. } => summary.skipped += 1,
                SyncResult::Failed { .. } => summary.failed += 1,
            }
            summary.warnings += result.warnings().len();
        }

        summary.results = results;
        summary
    }
}

/// Drives a backup run through injected API, command and filesystem ports
#[derive(Clone)]
pub struct SyncEngine {
    settings: BackupSettings,
    lister: Arc<dyn RepoLister>,
    runner: Arc<dyn CommandRunner>,
    fs: Arc<dyn FileSystem>,
}

impl SyncEngine {
    pub fn new(
        settings: BackupSettings,
        lister: Arc<dyn RepoLister>,
        runner: Arc<dyn CommandRunner>,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            settings,
            lister,
            runner,
            fs,
        }
    }

    /// Build an engine wired to GitHub, `git` and the local disk
    pub fn from_config(config: &Config, token: &str) -> Result<Self> {
        let settings = BackupSettings::from_config(config, token);
        settings.require_token()?;

        let lister = GitHubClient::new(&settings.token, config.github.api_url.as_deref())?;

        Ok(Self::new(
            settings,
            Arc::new(lister),
            Arc::new(GitCommandRunner::new(config.command_timeout())),
            Arc::new(LocalFileSystem),
        ))
    }

    pub fn settings(&self) -> &BackupSettings {
        &self.settings
    }

    /// Run a complete backup: setup, enumerate, then mirror each repository.
    ///
    /// Only run-wide setup failures are returned as errors. Per-repository
    /// failures are logged and reported in the summary.
    pub async fn run(&self) -> Result<SyncSummary> {
        self.run_until_stopped(&AtomicBool::new(false)).await
    }

    /// Like [`SyncEngine::run`], but checks `stop` before each repository.
    ///
    /// A repository already in progress always runs to completion, so its
    /// remote is never left holding the credential.
    pub async fn run_until_stopped(&self, stop: &AtomicBool) -> Result<SyncSummary> {
        let start_time = Instant::now();

        info!("Starting GitHub mirror backup");

        self.settings.require_token()?;

        let root = self.settings.backup_root();
        self.fs
            .create_dir_all(root)
            .with_context(|| format!("Failed to create backup folder {}", root.display()))?;

        git::mark_all_directories_safe(self.runner.as_ref())
            .await
            .context("Failed to set global git safe.directory")?;

        let login = self
            .lister
            .authenticated_login()
            .await
            .context("Failed to get authenticated GitHub user")?;
        info!("Authenticated as GitHub user: {}", login);

        let repositories = list_all_repositories(self.lister.as_ref(), self.settings.per_page)
            .await
            .context("Failed to list repositories")?;

        info!("Found {} repositories to back up", repositories.len());

        let mut results = Vec::with_capacity(repositories.len());
        for (index, repo) in repositories.iter().enumerate() {
            if stop.load(Ordering::SeqCst) {
                info!(
                    "Stop requested, leaving {} repositories for the next run",
                    repositories.len() - index
                );
                break;
            }
            results.push(self.backup_repository(&login, repo).await);
        }

        let summary = SyncSummary::compile(results, start_time.elapsed());

        info!(
            "Backup completed in {:.2}s: {} cloned, {} updated, {} skipped, {} failed, {} warnings",
            summary.duration.as_secs_f64(),
            summary.cloned,
            summary.updated,
            summary.skipped,
            summary.failed,
            summary.warnings
        );

        Ok(summary)
    }

    /// Decide clone vs update for one repository and run the matching sequence
    pub async fn backup_repository(&self, login: &str, repo: &Repository) -> SyncResult {
        let full_name = repo.full_name.as_str();
        info!("Backing up repository: {}", full_name);

        let Some(path) = self.settings.mirror_path(repo) else {
            warn!("Skipping {}: name is not a plain owner/name pair", full_name);
            return SyncResult::Skipped {
                repo: full_name.to_string(),
                reason: "Repository name cannot be mapped to a backup path".to_string(),
            };
        };

        let remote = MirrorRemote::new(&self.settings.host, login, &self.settings.token, full_name);

        let result = match self.fs.exists(&path) {
            Ok(false) => {
                info!("Backup for {} does not exist, cloning...", full_name);
                self.clone_mirror(full_name, &remote, path).await
            }
            Ok(true) => {
                info!("Backup for {} exists, updating...", full_name);
                self.update_mirror(full_name, &remote, path).await
            }
            Err(e) => {
                warn!("Error checking backup status for {}: {}", full_name, e);
                SyncResult::Skipped {
                    repo: full_name.to_string(),
                    reason: format!("Failed to check backup path {}: {}", path.display(), e),
                }
            }
        };

        match &result {
            SyncResult::Cloned { .. } | SyncResult::Updated { .. } => {
                info!("Finished backing up repository: {}", full_name)
            }
            SyncResult::Skipped { .. } | SyncResult::Failed { .. } => {}
        }

        result
    }

    async fn clone_mirror(&self, full_name: &str, remote: &MirrorRemote, path: PathBuf) -> SyncResult {
        let runner = self.runner.as_ref();

        debug!("Cloning {} into {}", remote.unauthenticated(), path.display());
        if let Err(e) = git::clone_mirror(runner, remote.authenticated(), &path).await {
            let error = self.scrub(&e);
            warn!("Error cloning repository {}: {}", full_name, error);

            // An interrupted clone can leave a config holding the authenticated URL
            if let Ok(true) = self.fs.exists(&path) {
                let mut ignored = Vec::new();
                self.deauthenticate(full_name, remote, &path, &mut ignored).await;
            }

            return SyncResult::Failed {
                repo: full_name.to_string(),
                path,
                error,
            };
        }

        let mut warnings = Vec::new();
        self.fetch_lfs(full_name, &path, &mut warnings).await;
        self.deauthenticate(full_name, remote, &path, &mut warnings).await;

        SyncResult::Cloned {
            repo: full_name.to_string(),
            path,
            warnings,
        }
    }

    async fn update_mirror(&self, full_name: &str, remote: &MirrorRemote, path: PathBuf) -> SyncResult {
        let runner = self.runner.as_ref();

        debug!("Setting remote URL to authenticated for {}", full_name);
        if let Err(e) = git::set_origin_url(runner, &path, remote.authenticated()).await {
            let error = self.scrub(&e);
            warn!(
                "Error setting remote URL to authenticated for {}: {}",
                full_name, error
            );
            return SyncResult::Failed {
                repo: full_name.to_string(),
                path,
                error,
            };
        }

        let mut warnings = Vec::new();

        info!("Updating remote for {}", full_name);
        if let Err(e) = git::update_remotes(runner, &path).await {
            let error = self.scrub(&e);
            warn!("Error updating remote for {}: {}", full_name, error);
            warnings.push(format!("remote update: {}", error));
        }

        self.fetch_lfs(full_name, &path, &mut warnings).await;
        self.deauthenticate(full_name, remote, &path, &mut warnings).await;

        SyncResult::Updated {
            repo: full_name.to_string(),
            path,
            warnings,
        }
    }

    async fn fetch_lfs(&self, full_name: &str, path: &Path, warnings: &mut Vec<String>) {
        info!("Fetching LFS objects for {}", full_name);
        if let Err(e) = git::fetch_lfs_objects(self.runner.as_ref(), path).await {
            let error = self.scrub(&e);
            warn!("Error fetching LFS objects for {}: {}", full_name, error);
            warnings.push(format!("lfs fetch: {}", error));
        }
    }

    async fn deauthenticate(
        &self,
        full_name: &str,
        remote: &MirrorRemote,
        path: &Path,
        warnings: &mut Vec<String>,
    ) {
        debug!("Setting remote URL to unauthenticated for {}", full_name);
        if let Err(e) = git::set_origin_url(self.runner.as_ref(), path, remote.unauthenticated()).await {
            let error = self.scrub(&e);
            error!(
                "Error setting remote URL to unauthenticated for {}, credential may remain in {}: {}",
                full_name,
                path.display(),
                error
            );
            warnings.push(format!("remote set-url: {}", error));
        }
    }

    fn scrub(&self, error: &anyhow::Error) -> String {
        redact(&format!("{:#}", error), &self.settings.token)
    }
}
