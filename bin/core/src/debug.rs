//! Debug server exposing prometheus metrics. Runs on every
//! replica, leader or not.

use std::net::SocketAddr;

use anyhow::Context;
use axum::{Router, http::StatusCode, routing::get};
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{config::core_config, state};

pub fn router() -> Router {
  Router::new()
    .route("/health", get(|| async { StatusCode::OK }))
    .route("/metrics", get(metrics))
}

pub async fn run(cancel: CancellationToken) -> anyhow::Result<()> {
  let config = core_config();

  let socket_addr =
    format!("{}:{}", config.bind_ip, config.debug_port)
      .parse::<SocketAddr>()
      .context("invalid debug listen address")?;

  let listener = TcpListener::bind(&socket_addr)
    .await
    .context("failed to bind debug listener")?;

  info!("debug server listening on {socket_addr}");

  axum::serve(listener, router().into_make_service())
    .with_graceful_shutdown(async move {
      cancel.cancelled().await
    })
    .await
    .context("debug server crashed")
}

async fn metrics() -> serror::Result<String> {
  let metric_families = state::metrics().registry.gather();
  let mut buffer = Vec::new();
  TextEncoder::new()
    .encode(&metric_families, &mut buffer)
    .map_err(anyhow::Error::from)?;
  Ok(String::from_utf8(buffer).map_err(anyhow::Error::from)?)
}
