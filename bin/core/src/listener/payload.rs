//! The subset of the GitHub webhook payloads the operator reads.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserRef {
  #[serde(default)]
  pub login: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepoRef {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub owner: UserRef,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitRef {
  #[serde(default)]
  pub sha: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BaseRef {
  #[serde(default)]
  pub repo: RepoRef,
}

/// GitHub's ping hook event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PingPayload {
  #[serde(default)]
  pub hook_id: i64,
}

/// GitHub's pull_request hook event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullRequestPayload {
  #[serde(default)]
  pub action: String,
  #[serde(default)]
  pub number: i64,
  #[serde(default)]
  pub pull_request: PullRequestRef,
  #[serde(default)]
  pub sender: UserRef,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullRequestRef {
  #[serde(default)]
  pub head: CommitRef,
  #[serde(default)]
  pub base: BaseRef,
}

/// GitHub's issue_comment hook event. The `pull_request` field on
/// the issue is only present when the issue is a pull request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueCommentPayload {
  #[serde(default)]
  pub action: String,
  #[serde(default)]
  pub issue: IssueRef,
  #[serde(default)]
  pub comment: CommentRef,
  #[serde(default)]
  pub sender: UserRef,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueRef {
  #[serde(default)]
  pub pull_request: Option<IssuePullRequestRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssuePullRequestRef {
  #[serde(default)]
  pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommentRef {
  #[serde(default)]
  pub body: String,
}

/// Response from the GET pull_request api, used to resolve the
/// head of a pull request from a comment payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullRequestResponse {
  #[serde(default)]
  pub number: i64,
  #[serde(default)]
  pub head: CommitRef,
  #[serde(default)]
  pub base: BaseRef,
}
