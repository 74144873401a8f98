//! Usage: Typed wrappers over the Bitbucket Cloud 2.0 endpoints the gateway
//! exposes — repositories, branches, commits, pull requests, user/workspaces.

use crate::api::executor::BitbucketClient;
use crate::shared::error::{GatewayError, GatewayResult};
use regex::Regex;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::OnceLock;

const DEFAULT_COMMITS_PAGELEN: u32 = 30;

/// `workspace/repo_slug` pair extracted from a Bitbucket URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySlug {
    pub workspace: String,
    pub repo_slug: String,
}

/// Pull request states accepted by the list endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullRequestState {
    Open,
    Merged,
    Declined,
    Superseded,
}

impl PullRequestState {
    fn as_query(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Merged => "MERGED",
            Self::Declined => "DECLINED",
            Self::Superseded => "SUPERSEDED",
        }
    }
}

/// Pull `workspace` and `repo_slug` out of any bitbucket.org repository URL,
/// with or without `.git` or a trailing path.
pub fn parse_repository_url(url: &str) -> GatewayResult<RepositorySlug> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"bitbucket\.org/([^/]+)/([^/]+?)(?:\.git)?(?:/|$)")
            .expect("repository url pattern")
    });

    let captures = pattern.captures(url.trim()).ok_or_else(|| {
        GatewayError::config(format!("not a bitbucket repository url: {url}"))
    })?;
    Ok(RepositorySlug {
        workspace: captures[1].to_string(),
        repo_slug: captures[2].to_string(),
    })
}

impl BitbucketClient {
    pub async fn get_repository(&self, repo: &RepositorySlug) -> GatewayResult<Value> {
        self.request(
            Method::GET,
            &format!("repositories/{}/{}", repo.workspace, repo.repo_slug),
            None,
        )
        .await
    }

    pub async fn list_branches(&self, repo: &RepositorySlug) -> GatewayResult<Value> {
        self.request(
            Method::GET,
            &format!(
                "repositories/{}/{}/refs/branches",
                repo.workspace, repo.repo_slug
            ),
            None,
        )
        .await
    }

    pub async fn get_branch(&self, repo: &RepositorySlug, branch: &str) -> GatewayResult<Value> {
        self.request(
            Method::GET,
            &format!(
                "repositories/{}/{}/refs/branches/{}",
                repo.workspace,
                repo.repo_slug,
                urlencoding::encode(branch)
            ),
            None,
        )
        .await
    }

    /// Commit history, newest first. `branch` narrows it to one ref.
    pub async fn list_commits(
        &self,
        repo: &RepositorySlug,
        branch: Option<&str>,
        pagelen: Option<u32>,
    ) -> GatewayResult<Value> {
        let mut endpoint = format!(
            "repositories/{}/{}/commits",
            repo.workspace, repo.repo_slug
        );
        if let Some(branch) = branch {
            endpoint.push('/');
            endpoint.push_str(&urlencoding::encode(branch));
        }
        endpoint.push_str(&format!(
            "?pagelen={}",
            pagelen.unwrap_or(DEFAULT_COMMITS_PAGELEN)
        ));
        self.request(Method::GET, &endpoint, None).await
    }

    pub async fn list_pull_requests(
        &self,
        repo: &RepositorySlug,
        state: PullRequestState,
    ) -> GatewayResult<Value> {
        self.request(
            Method::GET,
            &format!(
                "repositories/{}/{}/pullrequests?state={}",
                repo.workspace,
                repo.repo_slug,
                state.as_query()
            ),
            None,
        )
        .await
    }

    /// `body` is the raw Bitbucket pull request payload (title, source,
    /// destination, and so on); the API's shape is passed through untouched.
    pub async fn create_pull_request(
        &self,
        repo: &RepositorySlug,
        body: Value,
    ) -> GatewayResult<Value> {
        self.request(
            Method::POST,
            &format!(
                "repositories/{}/{}/pullrequests",
                repo.workspace, repo.repo_slug
            ),
            Some(body),
        )
        .await
    }

    pub async fn get_pull_request(&self, repo: &RepositorySlug, id: u64) -> GatewayResult<Value> {
        self.request(
            Method::GET,
            &format!(
                "repositories/{}/{}/pullrequests/{id}",
                repo.workspace, repo.repo_slug
            ),
            None,
        )
        .await
    }

    pub async fn list_pull_request_comments(
        &self,
        repo: &RepositorySlug,
        id: u64,
    ) -> GatewayResult<Value> {
        self.request(
            Method::GET,
            &format!(
                "repositories/{}/{}/pullrequests/{id}/comments",
                repo.workspace, repo.repo_slug
            ),
            None,
        )
        .await
    }

    pub async fn add_pull_request_comment(
        &self,
        repo: &RepositorySlug,
        id: u64,
        content: &str,
    ) -> GatewayResult<Value> {
        self.request(
            Method::POST,
            &format!(
                "repositories/{}/{}/pullrequests/{id}/comments",
                repo.workspace, repo.repo_slug
            ),
            Some(json!({ "content": { "raw": content } })),
        )
        .await
    }

    pub async fn current_user(&self) -> GatewayResult<Value> {
        self.request(Method::GET, "user", None).await
    }

    pub async fn list_workspaces(&self) -> GatewayResult<Value> {
        self.request(Method::GET, "workspaces", None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_repository_url_accepts_https() {
        let slug = parse_repository_url("https://bitbucket.org/acme/widgets").expect("slug");
        assert_eq!(slug.workspace, "acme");
        assert_eq!(slug.repo_slug, "widgets");
    }

    #[test]
    fn parse_repository_url_strips_dot_git() {
        let slug = parse_repository_url("https://bitbucket.org/acme/widgets.git").expect("slug");
        assert_eq!(slug.repo_slug, "widgets");
    }

    #[test]
    fn parse_repository_url_ignores_trailing_path() {
        let slug =
            parse_repository_url("https://bitbucket.org/acme/widgets/src/main/").expect("slug");
        assert_eq!(slug.workspace, "acme");
        assert_eq!(slug.repo_slug, "widgets");
    }

    #[test]
    fn parse_repository_url_rejects_other_hosts() {
        assert!(parse_repository_url("https://github.com/acme/widgets").is_err());
    }

    #[test]
    fn pull_request_state_maps_to_query_values() {
        assert_eq!(PullRequestState::Open.as_query(), "OPEN");
        assert_eq!(PullRequestState::Superseded.as_query(), "SUPERSEDED");
    }
}
