use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// The git context a build is based on.
#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct GitSpec {
  pub owner: String,
  pub repository: String,
  pub r#ref: String,
  pub pull_request_number: i64,
}

/// Build is the realized desired state for one pull request at one
/// commit. It is created by the build worker after a successful
/// image build + push, and drives the build reconciler.
#[derive(
  CustomResource,
  Debug,
  Clone,
  Default,
  PartialEq,
  Serialize,
  Deserialize,
)]
#[kube(
  group = "testenvironment.dev",
  version = "v1alpha1",
  kind = "Build",
  namespaced,
  schema = "disabled"
)]
pub struct BuildSpec {
  /// Environment name the build is based on.
  pub environment: String,
  /// Image to base containers on.
  pub image: String,
  /// Git reference the build is based on.
  pub git: GitSpec,
}
