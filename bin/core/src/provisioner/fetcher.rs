//! Dump file fetchers, selected by the url scheme of the
//! template's dump source.

use std::path::Path;

use anyhow::{Context, anyhow};
use base64::Engine;
use futures_util::StreamExt;
use google_cloud_storage::{
  client::{Client, ClientConfig, google_cloud_auth},
  http::objects::{download::Range, get::GetObjectRequest},
};
use tokio::io::AsyncWriteExt;

use super::ProcessorOpts;

/// Downloads the template's dump to the destination path.
pub(crate) async fn fetch(
  opts: &ProcessorOpts,
  destination: &Path,
) -> anyhow::Result<()> {
  match opts.dump_source.strip_prefix("gs://") {
    Some(path) => {
      fetch_google_storage(path, &opts.dump_credentials, destination)
        .await
    }
    None => Err(anyhow!(
      "unknown dump source scheme {}",
      opts.dump_source
    )),
  }
}

/// Streams a `gs://bucket/object` dump to disk, authenticated
/// with base64 encoded service account json.
async fn fetch_google_storage(
  path: &str,
  credentials: &str,
  destination: &Path,
) -> anyhow::Result<()> {
  let (bucket, object) = path
    .split_once('/')
    .context("could not lookup bucket and object")?;

  let json = base64::engine::general_purpose::STANDARD
    .decode(credentials)
    .context("could not decode dump credentials")?;
  let json = String::from_utf8(json)
    .context("dump credentials are not valid utf-8")?;

  let credentials =
    google_cloud_auth::credentials::CredentialsFile::new_from_str(
      &json,
    )
    .await
    .context("could not parse dump credentials")?;
  let config = ClientConfig::default()
    .with_credentials(credentials)
    .await
    .context("could not configure object storage client")?;
  let client = Client::new(config);

  let mut stream = client
    .download_streamed_object(
      &GetObjectRequest {
        bucket: bucket.to_string(),
        object: object.to_string(),
        ..Default::default()
      },
      &Range::default(),
    )
    .await
    .context("could not open dump object")?;

  let mut file = tokio::fs::File::create(destination)
    .await
    .context("could not create dump file")?;

  while let Some(chunk) = stream.next().await {
    let chunk = chunk.context("dump download failed")?;
    file
      .write_all(&chunk)
      .await
      .context("could not write dump file")?;
  }

  file.flush().await.context("could not flush dump file")?;

  Ok(())
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;

  #[tokio::test]
  async fn rejects_unknown_schemes() {
    let opts = ProcessorOpts {
      template_name: "t".into(),
      dump_source: "ftp://dumps/app".into(),
      dump_credentials: String::new(),
      dump_refresh_interval: Duration::from_secs(60),
    };

    let err = fetch(&opts, Path::new("/tmp/dumpfile"))
      .await
      .unwrap_err();
    assert!(err.to_string().contains("unknown dump source scheme"));
  }
}
