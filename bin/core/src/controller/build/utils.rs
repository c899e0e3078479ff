use std::collections::BTreeMap;

use k8s_openapi::api::{
  apps::v1::Deployment,
  core::v1::{ContainerPort, ServicePort},
};
use kube::Api;
use testenv_client::entities::environment::PortSpec;

use super::{BuildReconciler, Error};

/// Labels used to identify build children. The `app` label ties
/// pods and endpoints back to their Build for the watch mappers.
pub fn get_labels(
  build_name: &str,
  component: &str,
  version: Option<&str>,
) -> BTreeMap<String, String> {
  let mut labels = BTreeMap::new();
  labels.insert("app".to_string(), build_name.to_string());
  labels.insert("component".to_string(), component.to_string());

  if let Some(version) = version {
    labels.insert(
      "version".to_string(),
      version.chars().take(6).collect(),
    );
  }

  labels
}

pub fn convert_container_ports(
  ports: &[PortSpec],
) -> Vec<ContainerPort> {
  ports
    .iter()
    .map(|port| ContainerPort {
      name: Some(port.name.clone()),
      container_port: port.port,
      ..Default::default()
    })
    .collect()
}

pub fn convert_service_ports(
  ports: &[PortSpec],
) -> Vec<ServicePort> {
  ports
    .iter()
    .map(|port| ServicePort {
      name: Some(port.name.clone()),
      protocol: Some("TCP".to_string()),
      port: port.port,
      ..Default::default()
    })
    .collect()
}

impl BuildReconciler {
  /// Compares the image of any existing container deployment with
  /// the build image. A changed image forces downstream steps to
  /// recreate their children.
  pub async fn has_image_changed(&self) -> Result<bool, Error> {
    info!(namespace = %self.namespace, "checking for image changes");

    let deployments: Api<Deployment> =
      Api::namespaced(self.client(), &self.namespace);

    for container in &self.environment.spec.containers {
      let name = format!("{}-container", container.name);

      let Some(found) = deployments.get_opt(&name).await? else {
        continue;
      };

      let image = found
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .and_then(|spec| spec.containers.first())
        .and_then(|container| container.image.as_deref());
      let changed = image != Some(self.build.spec.image.as_str());
      info!(changed, "image detected");
      return Ok(changed);
    }

    warn!(namespace = %self.namespace, "no images detected");

    Ok(false)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn labels_carry_a_shortened_version() {
    let labels =
      get_labels("acme-widgets-42", "web-container", Some("abc123def"));
    assert_eq!(labels["app"], "acme-widgets-42");
    assert_eq!(labels["component"], "web-container");
    assert_eq!(labels["version"], "abc123");

    let labels = get_labels("acme-widgets-42", "web-container", None);
    assert!(!labels.contains_key("version"));
  }

  #[test]
  fn ports_convert_to_cluster_types() {
    let ports = vec![PortSpec {
      name: "http".into(),
      port: 8080,
    }];

    let container_ports = convert_container_ports(&ports);
    assert_eq!(container_ports[0].container_port, 8080);

    let service_ports = convert_service_ports(&ports);
    assert_eq!(service_ports[0].port, 8080);
    assert_eq!(service_ports[0].protocol.as_deref(), Some("TCP"));
  }
}
