//! Common test utilities and fakes for ghbackup tests
#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use ghbackup::git::describe;
use ghbackup::{
    BackupSettings, CommandOutput, CommandRunner, FileSystem, RepoLister, RepoPage, Repository,
    SyncEngine,
};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const TOKEN: &str = "ghp_testtoken123";
pub const LOGIN: &str = "octocat";

pub fn repo(full_name: &str) -> Repository {
    let name = full_name.rsplit('/').next().unwrap_or(full_name);
    Repository::new(full_name, name)
}

/// Listing fake serving fixed pages, 1-based
pub struct FakeLister {
    login: Option<String>,
    pages: Vec<Vec<Repository>>,
    failing_page: Option<u32>,
    login_calls: AtomicUsize,
    page_calls: AtomicUsize,
}

impl FakeLister {
    pub fn new(pages: Vec<Vec<Repository>>) -> Self {
        Self {
            login: Some(LOGIN.to_string()),
            pages,
            failing_page: None,
            login_calls: AtomicUsize::new(0),
            page_calls: AtomicUsize::new(0),
        }
    }

    pub fn single_page(repos: &[&str]) -> Self {
        Self::new(vec![repos.iter().map(|r| repo(r)).collect()])
    }

    pub fn without_identity(mut self) -> Self {
        self.login = None;
        self
    }

    pub fn failing_page(mut self, page: u32) -> Self {
        self.failing_page = Some(page);
        self
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepoLister for FakeLister {
    async fn authenticated_login(&self) -> Result<String> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login
            .clone()
            .ok_or_else(|| anyhow!("401 Bad credentials"))
    }

    async fn list_repositories(&self, page: u32, _per_page: u8) -> Result<RepoPage> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_page == Some(page) {
            bail!("502 Bad Gateway");
        }

        let index = page.saturating_sub(1) as usize;
        let repositories = self.pages.get(index).cloned().unwrap_or_default();
        let next_page = (index + 1 < self.pages.len()).then_some(page + 1);

        Ok(RepoPage {
            repositories,
            next_page,
        })
    }
}

/// One command as observed by [`RecordingRunner`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub dir: Option<PathBuf>,
    pub program: String,
    pub args: Vec<String>,
    pub streamed: bool,
}

impl Invocation {
    pub fn line(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Command fake that records every invocation and fails on request
#[derive(Default)]
pub struct RecordingRunner {
    invocations: Mutex<Vec<Invocation>>,
    failures: Vec<Vec<String>>,
    delays: Vec<(Vec<String>, Duration)>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any command whose line contains every one of `needles`
    pub fn fail_when(mut self, needles: &[&str]) -> Self {
        self.failures
            .push(needles.iter().map(|n| n.to_string()).collect());
        self
    }

    /// Make any command whose line contains every one of `needles` take `delay`
    pub fn delay_when(mut self, needles: &[&str], delay: Duration) -> Self {
        self.delays
            .push((needles.iter().map(|n| n.to_string()).collect(), delay));
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.invocations().iter().map(Invocation::line).collect()
    }

    async fn record(&self, dir: Option<&Path>, program: &str, args: &[&str], streamed: bool) -> Result<()> {
        let invocation = Invocation {
            dir: dir.map(Path::to_path_buf),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            streamed,
        };
        let line = invocation.line();
        self.invocations.lock().unwrap().push(invocation);

        let matches = |needles: &Vec<String>| needles.iter().all(|n| line.contains(n.as_str()));
        if let Some((_, delay)) = self.delays.iter().find(|(needles, _)| matches(needles)) {
            tokio::time::sleep(*delay).await;
        }

        let fails = self.failures.iter().any(matches);
        if fails {
            bail!(
                "{} failed (exit status 128): fatal: unable to access '{}'",
                describe(program, args),
                line
            );
        }
        Ok(())
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, dir: Option<&Path>, program: &str, args: &[&str]) -> Result<CommandOutput> {
        self.record(dir, program, args, false).await?;
        Ok(CommandOutput {
            status: 0,
            output: String::new(),
        })
    }

    async fn run_streamed(&self, dir: Option<&Path>, program: &str, args: &[&str]) -> Result<()> {
        self.record(dir, program, args, true).await
    }
}

/// In-memory filesystem fake
#[derive(Default)]
pub struct FakeFileSystem {
    existing: HashSet<PathBuf>,
    appearing: HashSet<PathBuf>,
    stats_by_path: Mutex<HashMap<PathBuf, usize>>,
    broken: HashSet<PathBuf>,
    fail_create: bool,
    created: Mutex<Vec<PathBuf>>,
    stat_calls: AtomicUsize,
}

impl FakeFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_existing(mut self, path: impl Into<PathBuf>) -> Self {
        self.existing.insert(path.into());
        self
    }

    /// Report `path` missing on its first stat and present afterwards,
    /// as a clone interrupted after creating its directory would
    pub fn with_appearing(mut self, path: impl Into<PathBuf>) -> Self {
        self.appearing.insert(path.into());
        self
    }

    /// Make stat on `path` fail with permission denied
    pub fn with_broken(mut self, path: impl Into<PathBuf>) -> Self {
        self.broken.insert(path.into());
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn created(&self) -> Vec<PathBuf> {
        self.created.lock().unwrap().clone()
    }

    pub fn stat_calls(&self) -> usize {
        self.stat_calls.load(Ordering::SeqCst)
    }
}

impl FileSystem for FakeFileSystem {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        self.stat_calls.fetch_add(1, Ordering::SeqCst);
        if self.broken.contains(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"));
        }
        let previous_stats = {
            let mut stats = self.stats_by_path.lock().unwrap();
            let count = stats.entry(path.to_path_buf()).or_insert(0);
            *count += 1;
            *count - 1
        };
        if self.appearing.contains(path) {
            return Ok(previous_stats > 0);
        }
        Ok(self.existing.contains(path))
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        if self.fail_create {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only file system"));
        }
        self.created.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

/// Fakes wired into an engine, kept reachable for assertions
pub struct Harness {
    pub lister: Arc<FakeLister>,
    pub runner: Arc<RecordingRunner>,
    pub fs: Arc<FakeFileSystem>,
    pub engine: SyncEngine,
}

impl Harness {
    pub fn new(
        settings: BackupSettings,
        lister: FakeLister,
        runner: RecordingRunner,
        fs: FakeFileSystem,
    ) -> Self {
        let lister = Arc::new(lister);
        let runner = Arc::new(runner);
        let fs = Arc::new(fs);
        let engine = SyncEngine::new(settings, lister.clone(), runner.clone(), fs.clone());

        Self {
            lister,
            runner,
            fs,
            engine,
        }
    }
}

/// Isolated environment for running the compiled binary
pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn create_test_config(&self, content: &str) -> PathBuf {
        let config_path = self.path().join("config.yml");
        std::fs::write(&config_path, content).expect("Failed to write test config");
        config_path
    }

    /// `ghbackup` with config, credentials and logging isolated from the host
    pub fn command(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_ghbackup"));
        command
            .env("XDG_CONFIG_HOME", self.path().join("config"))
            .env("XDG_RUNTIME_DIR", self.path().join("run"))
            .env_remove("GITHUB_SECRET")
            .env_remove("BACKUP_FOLDER")
            .env_remove("BACKUP_INTERVAL")
            .env_remove("RUST_LOG");
        command
    }
}

/// Assertion helper for command output
pub fn assert_contains_all(text: &str, expected: &[&str]) {
    for item in expected {
        assert!(
            text.contains(item),
            "Expected text to contain '{}', but it didn't. Text: {}",
            item,
            text
        );
    }
}
