use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
  EnvVar, Probe, ResourceRequirements,
};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// A single shared environment variable. Values support `{{Name}}`
/// substitution over the build property bag.
#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
pub struct EnvSpec {
  pub name: String,
  pub value: String,
}

/// A port exposed by a service or container.
#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
pub struct PortSpec {
  pub name: String,
  pub port: i32,
}

/// Init container run before a service dependency starts.
#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct InitContainerSpec {
  pub name: String,
  pub image: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub env: Vec<EnvVar>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub command: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub args: Vec<String>,
}

/// A background dependency of the environment (postgres sidecar,
/// redis, ...) running a fixed image.
#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
  pub name: String,
  pub image: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub ports: Vec<PortSpec>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub env: Vec<EnvVar>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub args: Vec<String>,
  /// Protected services are not recreated when the build image
  /// changes.
  #[serde(default)]
  pub protected: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub readiness_probe: Option<Probe>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub liveness_probe: Option<Probe>,
  #[serde(default)]
  pub resources: ResourceRequirements,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub init_containers: Vec<InitContainerSpec>,
  /// EmptyDir mounts shared between the init containers and the
  /// service container.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub shared_dirs: Vec<String>,
}

/// One-shot job run from the build image (migrations etc).
#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
pub struct TaskSpec {
  pub name: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub env: Vec<EnvVar>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub args: Vec<String>,
  #[serde(default)]
  pub resources: ResourceRequirements,
}

/// Command reachable through the remote terminal proxy.
#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
pub struct ExecSpec {
  pub name: String,
  pub cmd: Vec<String>,
}

/// Long-running container started from the build image.
#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
  pub name: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub ports: Vec<PortSpec>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub env: Vec<EnvVar>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub args: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub readiness_probe: Option<Probe>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub liveness_probe: Option<Probe>,
  #[serde(default)]
  pub resources: ResourceRequirements,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub remote_terminal: Vec<ExecSpec>,
}

/// URL-prefix route into one of the environment containers.
#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct RoutingSpec {
  pub container_name: String,
  pub port: i32,
  #[serde(default)]
  pub url_prefix: String,
}

/// Redirect rule applied before the container routes.
#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct RedirectSpec {
  pub url_prefix: String,
  pub destination: String,
}

/// Link added to the PR comment. The url supports `{{Name}}`
/// substitution over the build property bag.
#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
pub struct LinkSpec {
  pub title: String,
  pub url: String,
}

/// Environment is the author-supplied description of the test
/// environment for one repository, named `<owner>-<repository>`.
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
  kind = "Environment",
  namespaced,
  schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSpec {
  /// Required background services, databases, caches.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub services: Vec<ServiceSpec>,
  /// Environment variables shared by all tasks and containers.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub shared_env: Vec<EnvSpec>,
  /// Tasks to execute before starting the long-running containers.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tasks: Vec<TaskSpec>,
  /// Containers to execute based on the build image.
  #[serde(default)]
  pub containers: Vec<ContainerSpec>,
  /// Routing rules used to reach the environment containers.
  #[serde(default)]
  pub routing: Vec<RoutingSpec>,
  /// Redirect rules used to direct traffic to other locations.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub redirects: Vec<RedirectSpec>,
  /// Allow scheduling of pods on nodes with labels matching this
  /// map.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub node_selector: BTreeMap<String, String>,
  /// Claim a database based on a template.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub database_template: Option<String>,
  /// Links included in the PR comment.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub links: Vec<LinkSpec>,
  /// Dont build prs on the first commit from these users.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub ignored_users: Vec<String>,
  /// Dont deploy on demand builds automatically.
  #[serde(default)]
  pub on_demand: bool,
}
