use kube::CustomResource;
use serde::{Deserialize, Serialize};
use strum::Display;

/// The phases a database moves through. Transitions only go
/// forward: pending -> provisioning -> ready -> claimed.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DatabasePhase {
  #[default]
  Pending,
  Provisioning,
  Ready,
  Claimed,
}

/// Database is a single pre-warmed postgres instance drawn from a
/// DatabaseTemplate.
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
  kind = "Database",
  namespaced,
  schema = "disabled",
  status = "DatabaseStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
  pub template_name: String,
}

/// Connection details and lifecycle phase of a database instance.
/// The status is written with whole-object updates (no status
/// subresource), so it is populated at creation time.
#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStatus {
  /// Name of the Build that claimed this database, empty while
  /// unclaimed.
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub build_name: String,
  #[serde(default)]
  pub phase: DatabasePhase,
  #[serde(default)]
  pub host: String,
  #[serde(default)]
  pub port: i32,
  #[serde(default)]
  pub username: String,
  #[serde(default)]
  pub password: String,
  #[serde(default)]
  pub database_name: String,
}
