//! ghbackup - Scheduled GitHub mirror backups
//!
//! Enumerates every repository a GitHub token can access and keeps a local
//! bare mirror of each under `<backup-root>/<owner>/<name>.git`, including
//! Git LFS objects.
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`github`]: Repository enumeration via the GitHub API
//! - [`git`]: Command execution and the git mirror protocol
//! - [`filesystem`]: Filesystem access used by a run
//! - [`sync`]: Per-repository clone/update orchestration
//! - [`lock`]: Run lock against overlapping invocations
//! - [`daemon`]: Interval scheduling
//! - [`health`]: Preflight diagnostics

pub mod config;
pub mod daemon;
pub mod filesystem;
pub mod git;
pub mod github;
pub mod health;
pub mod lock;
pub mod sync;

pub use config::Config;
pub use daemon::{run_exclusive, run_graceful, run_once, Daemon};
pub use filesystem::{FileSystem, LocalFileSystem};
pub use git::{CommandOutput, CommandRunner, GitCommandRunner, MirrorRemote};
pub use github::{GitHubClient, RepoLister, RepoPage, Repository};
pub use health::HealthCheck;
pub use lock::RunLock;
pub use sync::{BackupSettings, SyncEngine, SyncResult, SyncSummary};
