//! Thin GitHub api client used for archives, commit statuses and
//! pull request comments.

use std::time::Duration;

use anyhow::{Context, anyhow};
use reqwest::header::{
  ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue,
};
use serde::de::DeserializeOwned;
use serde_json::json;

/// Ceiling applied to every GitHub api call.
const TIMEOUT: Duration = Duration::from_secs(3 * 60);

const BASE_URL: &str = "https://api.github.com";

/// Commit status states accepted by the forge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusState {
  Pending,
  Success,
  Error,
  Failure,
}

impl StatusState {
  pub fn as_str(self) -> &'static str {
    match self {
      StatusState::Pending => "pending",
      StatusState::Success => "success",
      StatusState::Error => "error",
      StatusState::Failure => "failure",
    }
  }
}

pub struct Github {
  http: reqwest::Client,
}

impl Github {
  pub fn new(access_token: &str) -> anyhow::Result<Github> {
    let mut headers = HeaderMap::new();
    let mut auth =
      HeaderValue::from_str(&format!("token {access_token}"))
        .context("invalid github access token")?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    headers.insert(
      ACCEPT,
      HeaderValue::from_static("application/vnd.github.v3+json"),
    );

    let http = reqwest::Client::builder()
      .user_agent(concat!(
        "testenv-core/",
        env!("CARGO_PKG_VERSION")
      ))
      .default_headers(headers)
      .timeout(TIMEOUT)
      .build()
      .context("failed to build github http client")?;

    Ok(Github { http })
  }

  /// Downloads a tarball snapshot of the given ref.
  pub async fn archive(
    &self,
    owner: &str,
    repository: &str,
    r#ref: &str,
  ) -> anyhow::Result<Vec<u8>> {
    let url = format!(
      "{BASE_URL}/repos/{owner}/{repository}/tarball/{git_ref}",
      git_ref = r#ref,
    );

    let res = self
      .http
      .get(&url)
      .send()
      .await
      .context("failed to request repository archive")?;

    if !res.status().is_success() {
      return Err(anyhow!(
        "repository archive request returned status {}",
        res.status()
      ));
    }

    Ok(
      res
        .bytes()
        .await
        .context("failed to download repository archive")?
        .to_vec(),
    )
  }

  /// Updates the commit status on the given ref.
  pub async fn create_status(
    &self,
    owner: &str,
    repository: &str,
    r#ref: &str,
    state: StatusState,
    description: &str,
    target_url: &str,
  ) -> anyhow::Result<()> {
    let url = format!(
      "{BASE_URL}/repos/{owner}/{repository}/statuses/{git_ref}",
      git_ref = r#ref,
    );

    let res = self
      .http
      .post(&url)
      .json(&json!({
        "state": state.as_str(),
        "description": description,
        "target_url": target_url,
        "context": "test-environment",
      }))
      .send()
      .await
      .context("failed to post commit status")?;

    if !res.status().is_success() {
      return Err(anyhow!(
        "commit status request returned status {}",
        res.status()
      ));
    }

    Ok(())
  }

  /// Creates a new comment on a pull request.
  pub async fn create_issue_comment(
    &self,
    owner: &str,
    repository: &str,
    pull_request_number: i64,
    body: &str,
  ) -> anyhow::Result<()> {
    let url = format!(
      "{BASE_URL}/repos/{owner}/{repository}/issues/{pull_request_number}/comments"
    );

    let res = self
      .http
      .post(&url)
      .json(&json!({ "body": body }))
      .send()
      .await
      .context("failed to post issue comment")?;

    if !res.status().is_success() {
      return Err(anyhow!(
        "issue comment request returned status {}",
        res.status()
      ));
    }

    Ok(())
  }

  /// Generic json GET against the api, used where webhook payloads
  /// are missing information (eg the pull request head).
  pub async fn get<T: DeserializeOwned>(
    &self,
    url: &str,
  ) -> anyhow::Result<T> {
    let res = self
      .http
      .get(url)
      .send()
      .await
      .context("github api request failed")?;

    let content_type = res
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|value| value.to_str().ok())
      .unwrap_or_default()
      .to_string();
    if content_type != "application/json; charset=utf-8" {
      return Err(anyhow!(
        "content type not application/json; charset=utf-8, actual value {content_type}"
      ));
    }

    if !res.status().is_success() {
      return Err(anyhow!(
        "response status not in range [200, 300], actual code {}",
        res.status()
      ));
    }

    res
      .json()
      .await
      .context("failed to parse github api response")
  }
}
