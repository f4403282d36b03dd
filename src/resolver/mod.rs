//! Git ref resolution
//!
//! Resolves a user-supplied ref (tag, branch, PR ref, commit) against
//! github.com to a full and short commit SHA so provisioning is
//! reproducible. The resolver never retries; retry policy belongs to the
//! caller.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;

use crate::errors::ResolverError;

/// Matches `https://github.com/O/N(.git)`, `git@github.com:O/N.git` and
/// `github.com/O/N`. Anything else is a distinct error, not a fallthrough.
static GITHUB_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https://github\.com/|git@github\.com:|github\.com/)([^/]+)/([^/]+?)(?:\.git)?/?$")
        .expect("invalid GITHUB_URL_RE pattern")
});

/// Client-side HTTP timeout; the outer deadline is longer so this fires first
/// on a hung connection.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const OUTER_DEADLINE: Duration = Duration::from_secs(35);

const DEFAULT_API_BASE: &str = "https://api.github.com";

/// A resolved commit: the full 40-hex SHA and its 8-hex prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    pub full: String,
    pub short: String,
}

impl ResolvedRef {
    pub fn new(full: String) -> Self {
        let short = full[..full.len().min(8)].to_string();
        Self { full, short }
    }
}

#[derive(Deserialize)]
struct CommitResponse {
    #[serde(default)]
    sha: String,
}

/// Resolves refs against the GitHub commits API.
pub struct RefResolver {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl RefResolver {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent("holodeck")
            .build()
            .expect("reqwest client construction only fails on TLS misconfiguration");
        Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            token: std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()),
        }
    }

    /// Point the resolver at a different API base (tests use a local stub).
    #[cfg(test)]
    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        let mut resolver = Self::new();
        resolver.api_base = api_base.into();
        resolver.token = None;
        resolver
    }

    /// Resolve `reference` in `repo_url` to a commit.
    pub async fn resolve(
        &self,
        repo_url: &str,
        reference: &str,
    ) -> Result<ResolvedRef, ResolverError> {
        let (owner, name) = parse_repo_url(repo_url)?;
        let reference = normalize_ref(reference);

        tracing::debug!(repo = %format!("{owner}/{name}"), reference = %reference, "resolving ref");

        let fut = self.fetch_commit(&owner, &name, &reference, repo_url);
        match tokio::time::timeout(OUTER_DEADLINE, fut).await {
            Ok(result) => result,
            Err(_) => Err(ResolverError::DeadlineExceeded),
        }
    }

    async fn fetch_commit(
        &self,
        owner: &str,
        name: &str,
        reference: &str,
        repo_url: &str,
    ) -> Result<ResolvedRef, ResolverError> {
        let url = format!("{}/repos/{owner}/{name}/commits/{reference}", self.api_base);

        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ResolverError::Request(e.to_string()))?;

        let status = response.status();
        match status.as_u16() {
            200 => {
                let commit: CommitResponse = response
                    .json()
                    .await
                    .map_err(|e| ResolverError::Request(e.to_string()))?;
                if commit.sha.is_empty() {
                    return Err(ResolverError::MissingSha);
                }
                Ok(ResolvedRef::new(commit.sha))
            }
            404 => Err(ResolverError::RefNotFound {
                repo: repo_url.to_string(),
                reference: reference.to_string(),
            }),
            429 => Err(ResolverError::RateLimited {
                repo: repo_url.to_string(),
                reference: reference.to_string(),
            }),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(ResolverError::Failed {
                    status: status.as_u16(),
                    body: body.chars().take(512).collect(),
                })
            }
        }
    }
}

impl Default for RefResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract (owner, name) from a GitHub repository URL.
pub fn parse_repo_url(repo_url: &str) -> Result<(String, String), ResolverError> {
    GITHUB_URL_RE
        .captures(repo_url)
        .map(|captures| (captures[1].to_string(), captures[2].to_string()))
        .ok_or_else(|| ResolverError::InvalidRepoUrl {
            url: repo_url.to_string(),
        })
}

/// Strip `refs/tags/` and `refs/heads/` prefixes; keep `refs/pull/...`
/// intact since the commits API needs the full pull ref.
pub fn normalize_ref(reference: &str) -> String {
    if let Some(stripped) = reference.strip_prefix("refs/tags/") {
        return stripped.to_string();
    }
    if let Some(stripped) = reference.strip_prefix("refs/heads/") {
        return stripped.to_string();
    }
    reference.to_string()
}
