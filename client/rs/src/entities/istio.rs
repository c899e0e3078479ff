//! Minimal rendering of the istio VirtualService resource, limited
//! to the fields the build reconciler writes.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
pub struct StringMatch {
  pub prefix: String,
}

#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
pub struct PortSelector {
  pub number: i64,
}

#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
pub struct Destination {
  pub host: String,
  pub port: PortSelector,
}

#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
pub struct HttpMatchRequest {
  pub uri: StringMatch,
}

#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
pub struct DestinationWeight {
  pub destination: Destination,
}

#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
pub struct HttpRedirect {
  pub uri: String,
}

#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoute {
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub r#match: Vec<HttpMatchRequest>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub route: Vec<DestinationWeight>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub redirect: Option<HttpRedirect>,
  #[serde(default)]
  pub websocket_upgrade: bool,
}

/// VirtualService exposes one build behind its per-PR hostname.
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
  group = "networking.istio.io",
  version = "v1alpha3",
  kind = "VirtualService",
  namespaced,
  schema = "disabled"
)]
pub struct VirtualServiceSpec {
  pub hosts: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub gateways: Vec<String>,
  pub http: Vec<HttpRoute>,
}
