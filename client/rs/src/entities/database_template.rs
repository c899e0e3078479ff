use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
  ResourceRequirements, VolumeResourceRequirements,
};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// DatabaseTemplate describes a class of pre-warmed databases: the
/// dump to restore, the postgres flavor to run and the number of
/// ready instances to keep on standby.
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
  kind = "DatabaseTemplate",
  namespaced,
  schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseTemplateSpec {
  /// Dump location, dispatched on the url scheme (`gs://...`).
  pub dump_file: String,
  /// Base64 encoded credentials passed to the dump fetcher.
  #[serde(default)]
  pub credentials: String,
  /// How often the dump is re-downloaded, eg `12h`, `30m`.
  pub refresh_interval: String,
  /// Target number of non-claimed databases for this template.
  pub buffer_size: i64,

  pub database_name: String,
  pub database_user: String,
  /// Tag of the `postgres` image to run.
  pub database_version: String,

  #[serde(default)]
  pub resources: ResourceRequirements,
  #[serde(default)]
  pub volume_capacity: VolumeResourceRequirements,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub node_selector: BTreeMap<String, String>,
}
