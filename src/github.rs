use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use octocrab::Octocrab;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// A repository visible to the authenticated identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repository {
    /// `owner/name`
    pub full_name: String,
    /// Repository name without the owner
    pub name: String,
}

impl Repository {
    pub fn new(full_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            name: name.into(),
        }
    }

    /// Owner and name segments, if the full name is a plain `owner/name` pair
    /// that is safe to use as a relative path
    pub fn path_segments(&self) -> Option<(&str, &str)> {
        let (owner, name) = self.full_name.split_once('/')?;
        let is_safe = |segment: &str| {
            !segment.is_empty() && segment != "." && segment != ".." && !segment.contains(['/', '\\'])
        };
        (is_safe(owner) && is_safe(name)).then_some((owner, name))
    }
}

impl From<&octocrab::models::Repository> for Repository {
    fn from(repo: &octocrab::models::Repository) -> Self {
        let full_name = repo.full_name.clone().unwrap_or_else(|| {
            let owner = repo
                .owner
                .as_ref()
                .map(|o| o.login.as_str())
                .unwrap_or("unknown");
            format!("{}/{}", owner, repo.name)
        });

        Self {
            full_name,
            name: repo.name.clone(),
        }
    }
}

/// One page of the repository listing
#[derive(Debug, Clone, Default)]
pub struct RepoPage {
    pub repositories: Vec<Repository>,
    /// Page to request next, `None` once the listing is exhausted
    pub next_page: Option<u32>,
}

/// Identity lookup and repository enumeration against a hosting API
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepoLister: Send + Sync {
    /// Login name of the identity the credentials belong to
    async fn authenticated_login(&self) -> Result<String>;

    /// Fetch one page (1-based) of repositories visible to that identity
    async fn list_repositories(&self, page: u32, per_page: u8) -> Result<RepoPage>;
}

/// Enumerate every repository across all pages, de-duplicated by full name.
///
/// Any page failure aborts the whole listing: a partial list would silently
/// skip backups.
pub async fn list_all_repositories(lister: &dyn RepoLister, per_page: u8) -> Result<Vec<Repository>> {
    let mut repositories = Vec::new();
    let mut seen = HashSet::new();
    let mut page = 1u32;

    loop {
        let result = lister
            .list_repositories(page, per_page)
            .await
            .with_context(|| format!("Failed to fetch repositories page {}", page))?;

        debug!(
            "Page {} returned {} repositories",
            page,
            result.repositories.len()
        );

        for repo in result.repositories {
            if seen.insert(repo.full_name.clone()) {
                repositories.push(repo);
            } else {
                debug!("Skipping duplicate listing entry: {}", repo.full_name);
            }
        }

        match result.next_page {
            None => break,
            Some(next) if next <= page => {
                warn!(
                    "GitHub returned next page {} after page {}, stopping pagination",
                    next, page
                );
                break;
            }
            Some(next) => page = next,
        }
    }

    info!("Found {} repositories", repositories.len());
    Ok(repositories)
}

static PAGE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]page=(\d+)").expect("page parameter pattern is valid"));

/// Extract the `page` query parameter from a pagination link
pub fn next_page_number(link: &str) -> Option<u32> {
    PAGE_PARAM.captures(link)?.get(1)?.as_str().parse().ok()
}

/// GitHub API client authenticated with a personal access token
pub struct GitHubClient {
    client: Octocrab,
}

impl GitHubClient {
    /// Create a client. No request is made until the first API call.
    pub fn new(token: &str, api_url: Option<&str>) -> Result<Self> {
        let mut builder = Octocrab::builder().personal_token(token.to_string());

        if let Some(api_url) = api_url {
            debug!("Using GitHub API at {}", api_url);
            builder = builder
                .base_uri(api_url)
                .with_context(|| format!("Invalid GitHub API URL: {}", api_url))?;
        }

        let client = builder.build().context("Failed to create GitHub client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl RepoLister for GitHubClient {
    async fn authenticated_login(&self) -> Result<String> {
        let user = self
            .client
            .current()
            .user()
            .await
            .context("Failed to get current user information. Check your token.")?;

        Ok(user.login)
    }

    async fn list_repositories(&self, page: u32, per_page: u8) -> Result<RepoPage> {
        let page_number = u8::try_from(page)
            .map_err(|_| anyhow!("Repository listing beyond page {} is not supported", u8::MAX))?;

        let response = self
            .client
            .current()
            .list_repos_for_authenticated_user()
            .per_page(per_page)
            .page(page_number)
            .send()
            .await?;

        let next_page = response
            .next
            .as_ref()
            .and_then(|link| next_page_number(&link.to_string()));

        Ok(RepoPage {
            repositories: response.items.iter().map(Repository::from).collect(),
            next_page,
        })
    }
}
