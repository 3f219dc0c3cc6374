//! Issue tracker client: comment listing and creation, acknowledgment
//! reactions, and pull request detail with classified diff lines.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use scout_core::{classify_diff_line, parse_rfc3339_to_unix_ms, DiffLineKind};

#[derive(Debug, Error)]
/// Failure taxonomy for the tracker boundary, mirrored on the agent-service
/// side so callers can tell the two origins apart.
pub enum GithubApiError {
    #[error("issue tracker authentication failed (status {status}): {message}")]
    Auth { status: u16, message: String },
    #[error("issue tracker resource not found: {0}")]
    NotFound(String),
    #[error("issue tracker transport error: {0}")]
    Transport(String),
    #[error("issue tracker returned a malformed payload: {0}")]
    Malformed(String),
}

impl GithubApiError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// A 403 on a write call means the token lacks tracker-write permission.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Auth { status: 403, .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let Some((owner, name)) = trimmed.split_once('/') else {
            bail!("invalid repo '{raw}', expected owner/repo");
        };
        let owner = owner.trim();
        let name = name.trim();
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            bail!("invalid repo '{raw}', expected owner/repo");
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn as_slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// One tracker comment, flattened to what the bridge needs.
pub struct IssueComment {
    pub id: u64,
    pub body: String,
    pub author_login: String,
    pub created_at_unix_ms: u64,
    pub html_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostedComment {
    pub id: u64,
    pub created_at_unix_ms: u64,
    pub html_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiffLine {
    pub text: String,
    pub kind: DiffLineClass,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiffLineClass {
    Added,
    Removed,
    Context,
}

impl From<DiffLineKind> for DiffLineClass {
    fn from(kind: DiffLineKind) -> Self {
        match kind {
            DiffLineKind::Added => Self::Added,
            DiffLineKind::Removed => Self::Removed,
            DiffLineKind::Context => Self::Context,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangedFile {
    pub filename: String,
    pub lines: Vec<DiffLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PullRequestDetail {
    pub title: String,
    pub branch: String,
    pub changed_files: Vec<ChangedFile>,
}

#[async_trait]
/// Capability interface for the issue tracker; transport stays behind it.
pub trait IssueTrackerApi: Send + Sync {
    async fn list_comments(
        &self,
        issue_number: u64,
        since_unix_ms: Option<u64>,
    ) -> Result<Vec<IssueComment>, GithubApiError>;

    async fn create_comment(
        &self,
        issue_number: u64,
        body: &str,
    ) -> Result<PostedComment, GithubApiError>;

    async fn create_reaction(&self, comment_id: u64) -> Result<(), GithubApiError>;

    async fn get_pull_request(&self, number: u64) -> Result<PullRequestDetail, GithubApiError>;
}

#[derive(Debug, Clone, Deserialize)]
struct CommentUserWire {
    #[serde(default)]
    login: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CommentWire {
    id: u64,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<CommentUserWire>,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    html_url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PullHeadWire {
    #[serde(default)]
    r#ref: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PullWire {
    #[serde(default)]
    title: String,
    #[serde(default)]
    head: Option<PullHeadWire>,
}

#[derive(Debug, Clone, Deserialize)]
struct PullFileWire {
    filename: String,
    #[serde(default)]
    patch: Option<String>,
}

#[derive(Clone)]
pub struct HttpGithubClient {
    http: reqwest::Client,
    api_base: String,
    repo: RepoRef,
}

impl HttpGithubClient {
    pub fn new(
        api_base: &str,
        token: &str,
        repo: RepoRef,
        request_timeout_ms: u64,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("scout-triage-bridge"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            reqwest::header::HeaderValue::from_static("2022-11-28"),
        );
        let auth_header = format!("Bearer {}", token.trim());
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&auth_header)
                .context("invalid github authorization header")?,
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create github api client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            repo,
        })
    }

    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, GithubApiError> {
        let response = request
            .send()
            .await
            .map_err(|error| GithubApiError::Transport(format!("{operation}: {error}")))?;
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|error| {
                GithubApiError::Malformed(format!("failed to decode {operation}: {error}"))
            });
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(operation, status.as_u16(), &body))
    }
}

fn classify_status(operation: &str, status: u16, body: &str) -> GithubApiError {
    let message = format!("{operation}: {}", truncate_for_error(body, 400));
    match status {
        401 | 403 => GithubApiError::Auth { status, message },
        404 => GithubApiError::NotFound(message),
        _ => GithubApiError::Transport(format!("status {status}, {message}")),
    }
}

fn truncate_for_error(body: &str, limit: usize) -> String {
    if body.chars().count() <= limit {
        return body.to_string();
    }
    let truncated: String = body.chars().take(limit).collect();
    format!("{truncated}…")
}

fn unix_ms_to_rfc3339(unix_ms: u64) -> Option<String> {
    let millis = i64::try_from(unix_ms).ok()?;
    Some(
        Utc.timestamp_millis_opt(millis)
            .single()?
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    )
}

fn comment_from_wire(wire: CommentWire) -> IssueComment {
    IssueComment {
        id: wire.id,
        body: wire.body.unwrap_or_default(),
        author_login: wire.user.map(|user| user.login).unwrap_or_default(),
        created_at_unix_ms: parse_rfc3339_to_unix_ms(&wire.created_at).unwrap_or(0),
        html_url: wire.html_url,
    }
}

fn classify_patch(patch: &str) -> Vec<DiffLine> {
    patch
        .lines()
        .map(|line| DiffLine {
            text: line.to_string(),
            kind: classify_diff_line(line).into(),
        })
        .collect()
}

#[async_trait]
impl IssueTrackerApi for HttpGithubClient {
    async fn list_comments(
        &self,
        issue_number: u64,
        since_unix_ms: Option<u64>,
    ) -> Result<Vec<IssueComment>, GithubApiError> {
        let mut request = self.http.get(format!(
            "{}/repos/{}/{}/issues/{issue_number}/comments",
            self.api_base, self.repo.owner, self.repo.name
        ));
        if let Some(since) = since_unix_ms.and_then(unix_ms_to_rfc3339) {
            request = request.query(&[("since", since.as_str())]);
        }
        let wires: Vec<CommentWire> = self.request_json("list issue comments", request).await?;
        Ok(wires.into_iter().map(comment_from_wire).collect())
    }

    async fn create_comment(
        &self,
        issue_number: u64,
        body: &str,
    ) -> Result<PostedComment, GithubApiError> {
        let wire: CommentWire = self
            .request_json(
                "create issue comment",
                self.http
                    .post(format!(
                        "{}/repos/{}/{}/issues/{issue_number}/comments",
                        self.api_base, self.repo.owner, self.repo.name
                    ))
                    .json(&json!({ "body": body })),
            )
            .await?;
        Ok(PostedComment {
            id: wire.id,
            created_at_unix_ms: parse_rfc3339_to_unix_ms(&wire.created_at).unwrap_or(0),
            html_url: wire.html_url,
        })
    }

    async fn create_reaction(&self, comment_id: u64) -> Result<(), GithubApiError> {
        let _: serde_json::Value = self
            .request_json(
                "create comment reaction",
                self.http
                    .post(format!(
                        "{}/repos/{}/{}/issues/comments/{comment_id}/reactions",
                        self.api_base, self.repo.owner, self.repo.name
                    ))
                    .json(&json!({ "content": "eyes" })),
            )
            .await?;
        Ok(())
    }

    async fn get_pull_request(&self, number: u64) -> Result<PullRequestDetail, GithubApiError> {
        let pull: PullWire = self
            .request_json(
                "get pull request",
                self.http.get(format!(
                    "{}/repos/{}/{}/pulls/{number}",
                    self.api_base, self.repo.owner, self.repo.name
                )),
            )
            .await?;
        let files: Vec<PullFileWire> = self
            .request_json(
                "list pull request files",
                self.http.get(format!(
                    "{}/repos/{}/{}/pulls/{number}/files",
                    self.api_base, self.repo.owner, self.repo.name
                )),
            )
            .await?;
        Ok(PullRequestDetail {
            title: pull.title,
            branch: pull.head.map(|head| head.r#ref).unwrap_or_default(),
            changed_files: files
                .into_iter()
                .map(|file| ChangedFile {
                    filename: file.filename,
                    lines: file.patch.as_deref().map(classify_patch).unwrap_or_default(),
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DiffLineClass, GithubApiError, HttpGithubClient, IssueTrackerApi, RepoRef,
    };
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> HttpGithubClient {
        HttpGithubClient::new(
            &server.base_url(),
            "gh-token",
            RepoRef::parse("octo/widgets").expect("repo should parse"),
            2_000,
        )
        .expect("client should build")
    }

    #[test]
    fn unit_repo_ref_parse_accepts_owner_slash_repo_only() {
        assert!(RepoRef::parse("octo/widgets").is_ok());
        assert!(RepoRef::parse("octo").is_err());
        assert!(RepoRef::parse("octo/w/extra").is_err());
        assert!(RepoRef::parse(" / ").is_err());
        assert_eq!(
            RepoRef::parse(" octo / widgets ").expect("should parse").as_slug(),
            "octo/widgets"
        );
    }

    #[tokio::test]
    async fn functional_list_comments_passes_since_watermark() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/repos/octo/widgets/issues/12/comments")
                    .query_param("since", "2023-11-14T22:13:20Z");
                then.status(200).json_body(json!([{
                    "id": 91,
                    "body": "use the sandbox env",
                    "user": {"login": "maintainer"},
                    "created_at": "2023-11-14T22:15:00Z",
                    "html_url": "https://github.com/octo/widgets/issues/12#issuecomment-91",
                }]));
            })
            .await;
        let comments = client(&server)
            .list_comments(12, Some(1_700_000_000_000))
            .await
            .expect("list should succeed");
        mock.assert_async().await;
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].author_login, "maintainer");
        assert!(comments[0].created_at_unix_ms > 0);
    }

    #[tokio::test]
    async fn unit_create_comment_permission_denied_maps_to_auth_403() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/repos/octo/widgets/issues/12/comments");
                then.status(403).body("Resource not accessible by integration");
            })
            .await;
        let error = client(&server)
            .create_comment(12, "hello")
            .await
            .expect_err("should fail");
        assert!(error.is_permission_denied());
    }

    #[tokio::test]
    async fn functional_create_reaction_posts_to_reactions_endpoint() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/repos/octo/widgets/issues/comments/91/reactions")
                    .json_body(json!({"content": "eyes"}));
                then.status(201).json_body(json!({"id": 7, "content": "eyes"}));
            })
            .await;
        client(&server)
            .create_reaction(91)
            .await
            .expect("reaction should succeed");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn functional_get_pull_request_classifies_patch_lines() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/octo/widgets/pulls/42");
                then.status(200).json_body(json!({
                    "title": "Fix nil guard",
                    "head": {"ref": "scout/fix-12"},
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/octo/widgets/pulls/42/files");
                then.status(200).json_body(json!([{
                    "filename": "src/parser.rs",
                    "patch": "@@ -1,2 +1,3 @@\n context\n-old line\n+new line",
                }]));
            })
            .await;
        let detail = client(&server)
            .get_pull_request(42)
            .await
            .expect("pull detail should succeed");
        assert_eq!(detail.title, "Fix nil guard");
        assert_eq!(detail.branch, "scout/fix-12");
        let kinds: Vec<DiffLineClass> = detail.changed_files[0]
            .lines
            .iter()
            .map(|line| line.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                DiffLineClass::Context,
                DiffLineClass::Context,
                DiffLineClass::Removed,
                DiffLineClass::Added,
            ]
        );
    }

    #[tokio::test]
    async fn regression_transport_failure_is_not_auth() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/octo/widgets/issues/12/comments");
                then.status(500).body("oops");
            })
            .await;
        let error = client(&server)
            .list_comments(12, None)
            .await
            .expect_err("should fail");
        assert!(matches!(error, GithubApiError::Transport(_)));
        assert!(!error.is_auth());
    }
}
