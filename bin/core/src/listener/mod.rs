//! The public webhook server: receives forge deliveries and
//! translates them into build / delete requests.

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use axum::{
  Router,
  body::Bytes,
  http::{HeaderMap, StatusCode},
  routing::{get, post},
};
use serror::{AddStatusCode, AddStatusCodeError};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;

use crate::{builder::NewBuild, config::core_config, state};

mod parser;
mod payload;

use parser::WebhookEvent;
use payload::PullRequestResponse;

pub fn router() -> Router {
  Router::new()
    .route("/health", get(|| async { StatusCode::OK }))
    .route("/webhook", post(webhook))
    .layer(TimeoutLayer::new(Duration::from_secs(30)))
}

/// Serves the webhook endpoint until cancelled.
pub async fn run(cancel: CancellationToken) -> anyhow::Result<()> {
  let config = core_config();

  let socket_addr =
    format!("{}:{}", config.bind_ip, config.port)
      .parse::<SocketAddr>()
      .context("invalid webhook listen address")?;

  let listener = TcpListener::bind(&socket_addr)
    .await
    .context("failed to bind webhook listener")?;

  info!("webhook server listening on {socket_addr}");

  axum::serve(listener, router().into_make_service())
    .with_graceful_shutdown(async move {
      cancel.cancelled().await
    })
    .await
    .context("webhook server crashed")
}

async fn webhook(
  headers: HeaderMap,
  body: Bytes,
) -> serror::Result<StatusCode> {
  let config = core_config();

  let event = parser::parse(
    &config.github_webhook_secret,
    &headers,
    &body,
  )
  .map_err(|e| {
    warn!("could not parse webhook payload | {e}");
    anyhow::Error::from(e).status_code(StatusCode::BAD_REQUEST)
  })?;

  match event {
    WebhookEvent::PullRequest(payload) => {
      info!("received pull request payload");

      match payload.action.as_str() {
        // Create a new build on the opened, synchronize (new
        // commit) and reopened actions.
        "opened" | "synchronize" | "reopened" => {
          state::builder()
            .new_build(NewBuild {
              owner: payload
                .pull_request
                .base
                .repo
                .owner
                .login
                .clone(),
              repository: payload
                .pull_request
                .base
                .repo
                .name
                .clone(),
              number: payload.number,
              r#ref: payload.pull_request.head.sha.clone(),
              user: payload.sender.login.clone(),
              first_run: payload.action == "opened",
              clean: false,
              force: false,
            })
            .await
            .map_err(anyhow::Error::from)
            .status_code(StatusCode::NOT_ACCEPTABLE)?;
        }
        // Delete the build on the closed action (merged included)
        "closed" => {
          state::builder()
            .delete_build(
              payload
                .pull_request
                .base
                .repo
                .owner
                .login
                .clone(),
              payload.pull_request.base.repo.name.clone(),
              payload.number,
            )
            .await
            .map_err(anyhow::Error::from)
            .status_code(StatusCode::NOT_ACCEPTABLE)?;
        }
        _ => {}
      }
    }

    WebhookEvent::IssueComment(payload) => {
      info!("received issue comment payload");

      // Skip comments created by the operator itself
      if !config.github_username.is_empty()
        && payload.sender.login == config.github_username
      {
        info!("skipping comment, created by us");
        return Ok(StatusCode::ACCEPTED);
      }

      let pull_request_url = payload
        .issue
        .pull_request
        .as_ref()
        .map(|pull_request| pull_request.url.clone());
      let is_pr_comment = payload.action == "created"
        && pull_request_url.is_some();

      // Initialize a new build if a user comments "/rebuild"
      if is_pr_comment && payload.comment.body.contains("/rebuild")
      {
        enqueue_forced_build(
          pull_request_url.as_deref().unwrap(),
          &payload.sender.login,
          false,
        )
        .await?;
      }

      // Initialize a new build with a clean database if a user
      // comments "/clean"
      if is_pr_comment && payload.comment.body.contains("/clean") {
        enqueue_forced_build(
          pull_request_url.as_deref().unwrap(),
          &payload.sender.login,
          true,
        )
        .await?;
      }
    }

    WebhookEvent::Ping(_) => {
      info!("received ping payload");
    }
  }

  Ok(StatusCode::ACCEPTED)
}

/// The issue comment payload doesn't contain the PR head, fetch
/// it from the forge before enqueueing.
async fn enqueue_forced_build(
  pull_request_url: &str,
  user: &str,
  clean: bool,
) -> serror::Result<()> {
  let pull_request: PullRequestResponse = state::github()
    .get(pull_request_url)
    .await
    .status_code(StatusCode::NOT_ACCEPTABLE)?;

  state::builder()
    .new_build(NewBuild {
      owner: pull_request.base.repo.owner.login.clone(),
      repository: pull_request.base.repo.name.clone(),
      number: pull_request.number,
      r#ref: pull_request.head.sha.clone(),
      user: user.to_string(),
      first_run: false,
      clean,
      force: true,
    })
    .await
    .map_err(anyhow::Error::from)
    .status_code(StatusCode::NOT_ACCEPTABLE)?;

  Ok(())
}
