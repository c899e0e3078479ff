//! Image daemon client: builds the context into an image and
//! pushes it to the registry.

use anyhow::{Context, anyhow};
use bollard::{
  ClientVersion,
  auth::DockerCredentials,
  models::ErrorDetail,
  query_parameters::{
    BuildImageOptionsBuilder, PushImageOptions,
    PushImageOptionsBuilder,
  },
};
use futures_util::StreamExt;
use testenv_client::entities::config::core::CoreConfig;

/// Ceiling applied to every image daemon call. Image builds can
/// legitimately run for a long time.
const TIMEOUT_SECS: u64 = 30 * 60;

pub struct Docker {
  client: bollard::Docker,

  registry: String,
  username: String,
  password: String,
}

impl Docker {
  pub fn new(config: &CoreConfig) -> anyhow::Result<Docker> {
    let client = if config.docker_host.is_empty() {
      bollard::Docker::connect_with_defaults().context(
        "failed to connect to the docker daemon with platform defaults",
      )?
    } else {
      bollard::Docker::connect_with_http(
        &config.docker_host,
        TIMEOUT_SECS,
        &client_version(&config.docker_api_version),
      )
      .with_context(|| {
        format!(
          "failed to connect to the docker daemon at {}",
          config.docker_host
        )
      })?
    };

    Ok(Docker {
      client,
      registry: config.docker_registry.clone(),
      username: config.docker_registry_username.clone(),
      password: config.docker_registry_password.clone(),
    })
  }

  /// The image name based on repository, owner and ref.
  pub fn image_name(
    &self,
    owner: &str,
    repository: &str,
    r#ref: &str,
  ) -> String {
    image_name(&self.registry, owner, repository, r#ref)
  }

  /// Sends the build context to the daemon and streams the build,
  /// surfacing any reported error detail.
  pub async fn build_image(
    &self,
    build_context: Vec<u8>,
    image: &str,
    dockerfile: &str,
  ) -> anyhow::Result<()> {
    info!(%image, "building image");

    let options = BuildImageOptionsBuilder::default()
      .dockerfile(dockerfile)
      .t(image)
      .build();

    let mut stream = self.client.build_image(
      options,
      None,
      Some(bollard::body_full(build_context.into())),
    );

    while let Some(info) = stream.next().await {
      let info = info.context("docker image build failed")?;
      check_error_detail(info.error_detail)?;
    }

    Ok(())
  }

  /// Instructs the daemon to push an image to the registry.
  pub async fn push_image(&self, image: &str) -> anyhow::Result<()> {
    // The tag travels as a query parameter
    let (name, tag) = match image.rsplit_once(':') {
      Some((name, tag)) if !tag.contains('/') => (name, Some(tag)),
      _ => (image, None),
    };
    let options = tag.map(|tag| {
      PushImageOptionsBuilder::default().tag(tag).build()
    });

    let credentials = (!self.username.is_empty()
      && !self.password.is_empty())
    .then(|| DockerCredentials {
      username: Some(self.username.clone()),
      password: Some(self.password.clone()),
      ..Default::default()
    });

    if credentials.is_some() {
      info!(%image, "pushing image with credentials");
    } else {
      info!(%image, "pushing image");
    }

    let mut stream = self.client.push_image(
      name,
      options.or(Some(PushImageOptions::default())),
      credentials,
    );

    while let Some(info) = stream.next().await {
      let info = info.context("docker image push failed")?;
      check_error_detail(info.error_detail)?;
    }

    Ok(())
  }
}

fn image_name(
  registry: &str,
  owner: &str,
  repository: &str,
  r#ref: &str,
) -> String {
  if registry.is_empty() {
    format!("{owner}/{repository}:{}", r#ref)
  } else {
    format!("{registry}/{owner}/{repository}:{}", r#ref)
  }
}

fn client_version(version: &str) -> ClientVersion {
  let mut parts = version.splitn(2, '.');
  let major = parts.next().and_then(|p| p.parse().ok());
  let minor = parts.next().and_then(|p| p.parse().ok());

  match (major, minor) {
    (Some(major_version), Some(minor_version)) => ClientVersion {
      major_version,
      minor_version,
    },
    _ => bollard::API_DEFAULT_VERSION.clone(),
  }
}

/// The daemon streams newline-delimited progress objects. Any
/// object carrying a non-empty `errorDetail.message` aborts the
/// operation.
fn check_error_detail(
  error_detail: Option<ErrorDetail>,
) -> anyhow::Result<()> {
  match error_detail
    .and_then(|detail| detail.message)
    .filter(|message| !message.is_empty())
  {
    Some(message) => Err(anyhow!(message)),
    None => Ok(()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accepts_progress_without_error_detail() {
    assert!(check_error_detail(None).is_ok());
    assert!(
      check_error_detail(Some(ErrorDetail {
        code: None,
        message: None,
      }))
      .is_ok()
    );
    assert!(
      check_error_detail(Some(ErrorDetail {
        code: None,
        message: Some(String::new()),
      }))
      .is_ok()
    );
  }

  #[test]
  fn surfaces_the_error_detail_message() {
    let err = check_error_detail(Some(ErrorDetail {
      code: Some(1),
      message: Some("message".into()),
    }))
    .unwrap_err();
    assert_eq!(err.to_string(), "message");
  }

  #[test]
  fn image_names_include_the_registry_prefix() {
    assert_eq!(
      image_name("registry.example.dev", "acme", "widgets", "abc"),
      "registry.example.dev/acme/widgets:abc"
    );
    assert_eq!(
      image_name("", "acme", "widgets", "abc"),
      "acme/widgets:abc"
    );
  }

  #[test]
  fn client_version_parses_major_minor() {
    let version = client_version("1.39");
    assert_eq!(version.major_version, 1);
    assert_eq!(version.minor_version, 39);
  }
}
