//! System health checks for ghbackup
//!
//! Preflight checks that the host can run a backup: the git toolchain,
//! credentials, the backup root and GitHub access.

use crate::config::{Config, TOKEN_ENV};
use crate::github::{GitHubClient, RepoLister};
use std::path::Path;
use std::process::Command;

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Git installation status
    pub git: CheckResult,
    /// Git LFS installation status
    pub git_lfs: CheckResult,
    /// Token presence
    pub credential: CheckResult,
    /// Backup root status
    pub backup_root: CheckResult,
    /// GitHub authentication status
    pub github_auth: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all health checks
    pub async fn run(config: &Config, token: Option<&str>) -> Self {
        let token = token.map(str::trim).filter(|t| !t.is_empty());

        Self {
            git: Self::check_command("Git", &["--version"], "Install git: https://git-scm.com/downloads"),
            git_lfs: Self::check_command(
                "Git LFS",
                &["lfs", "version"],
                "Install git-lfs: https://git-lfs.com",
            ),
            credential: Self::check_credential(token),
            backup_root: Self::check_backup_root(&config.backup_root()),
            github_auth: Self::check_github_auth(config, token).await,
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.all_checks().iter().all(|(_, result)| result.passed)
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, result)| result)
            .filter(|r| r.is_warning)
            .collect()
    }

    /// Get all checks as a slice for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 5] {
        [
            ("Git Installation", &self.git),
            ("Git LFS", &self.git_lfs),
            ("Credential", &self.credential),
            ("Backup Folder", &self.backup_root),
            ("GitHub Authentication", &self.github_auth),
        ]
    }

    /// Check that `git <args>` runs
    fn check_command(name: &str, args: &[&str], install_hint: &str) -> CheckResult {
        match Command::new("git").args(args).output() {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                CheckResult::ok_with_details(format!("{} installed", name), version.trim().to_string())
            }
            Ok(_) => CheckResult::error_with_details(format!("{} is not available", name), install_hint),
            Err(_) => CheckResult::error_with_details("Git not found in PATH", install_hint),
        }
    }

    fn check_credential(token: Option<&str>) -> CheckResult {
        match token {
            Some(_) => CheckResult::ok_with_details("GitHub token provided", format!("From {} or --token", TOKEN_ENV)),
            None => CheckResult::error_with_details(
                "GitHub token missing",
                format!("Set the {} environment variable", TOKEN_ENV),
            ),
        }
    }

    /// Check the backup root exists, or that its nearest existing ancestor does
    fn check_backup_root(root: &Path) -> CheckResult {
        if root.is_dir() {
            return CheckResult::ok_with_details("Backup folder exists", root.display().to_string());
        }
        if root.exists() {
            return CheckResult::error_with_details(
                "Backup folder path is not a directory",
                root.display().to_string(),
            );
        }

        match root.ancestors().skip(1).find(|p| p.exists()) {
            Some(ancestor) if ancestor.is_dir() => CheckResult::warning_with_details(
                "Backup folder will be created on first run",
                format!("{} (under {})", root.display(), ancestor.display()),
            ),
            _ => CheckResult::error_with_details(
                "Backup folder cannot be created",
                root.display().to_string(),
            ),
        }
    }

    /// Check GitHub authentication
    async fn check_github_auth(config: &Config, token: Option<&str>) -> CheckResult {
        let Some(token) = token else {
            return CheckResult::error("Skipped: no GitHub token");
        };

        let client = match GitHubClient::new(token, config.github.api_url.as_deref()) {
            Ok(client) => client,
            Err(e) => return CheckResult::error_with_details("GitHub client setup failed", format!("{:#}", e)),
        };

        match client.authenticated_login().await {
            Ok(login) => CheckResult::ok_with_details("GitHub authentication successful", format!("Username: {}", login)),
            Err(e) => CheckResult::error_with_details("GitHub authentication failed", format!("{:#}", e)),
        }
    }
}
