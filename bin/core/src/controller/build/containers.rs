use k8s_openapi::api::{
  apps::v1::{Deployment, DeploymentSpec},
  core::v1::{
    ConfigMapEnvSource, Container, EnvFromSource, PodSpec,
    PodTemplateSpec, Service, ServiceSpec as K8sServiceSpec,
  },
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::{
  Api,
  api::{ObjectMeta, PostParams},
};
use testenv_client::entities::environment::ContainerSpec;

use super::{
  BuildReconciler, Error,
  utils::{
    convert_container_ports, convert_service_ports, get_labels,
  },
};
use crate::{controller::create_if_absent, helpers::BUILD_PREFIX};

impl BuildReconciler {
  /// Creates a deployment per declared container running the
  /// build image, and a cluster ip service when ports are
  /// declared.
  pub async fn reconcile_containers(
    &self,
    force: bool,
  ) -> Result<(), Error> {
    for container in &self.environment.spec.containers {
      self
        .reconcile_container_deployment(container, force)
        .await?;
      self.reconcile_container_service(container).await?;
    }

    Ok(())
  }

  async fn reconcile_container_deployment(
    &self,
    container: &ContainerSpec,
    _force: bool,
  ) -> Result<(), Error> {
    let name = format!("{}-container", container.name);
    let api: Api<Deployment> =
      Api::namespaced(self.client(), &self.namespace);

    let ports = convert_container_ports(&container.ports);
    let node_selector = &self.environment.spec.node_selector;

    let deployment = Deployment {
      metadata: ObjectMeta {
        name: Some(name.clone()),
        namespace: Some(self.namespace.clone()),
        labels: Some(get_labels(
          &self.build_name(),
          &name,
          Some(&self.git().r#ref),
        )),
        owner_references: Some(vec![self.owner_ref()?]),
        ..Default::default()
      },
      spec: Some(DeploymentSpec {
        selector: LabelSelector {
          match_labels: Some(get_labels(
            &self.build_name(),
            &name,
            None,
          )),
          ..Default::default()
        },
        template: PodTemplateSpec {
          metadata: Some(ObjectMeta {
            labels: Some(get_labels(
              &self.build_name(),
              &name,
              Some(&self.git().r#ref),
            )),
            ..Default::default()
          }),
          spec: Some(PodSpec {
            service_account_name: Some(
              self.service_account_name().to_string(),
            ),
            termination_grace_period_seconds: Some(0),
            node_selector: (!node_selector.is_empty())
              .then(|| node_selector.clone()),
            containers: vec![Container {
              name: container.name.clone(),
              image: Some(self.build.spec.image.clone()),
              image_pull_policy: Some("IfNotPresent".to_string()),
              args: (!container.args.is_empty())
                .then(|| container.args.clone()),
              env_from: Some(vec![EnvFromSource {
                config_map_ref: Some(ConfigMapEnvSource {
                  name: format!("{BUILD_PREFIX}sharedenv"),
                  optional: Some(false),
                }),
                ..Default::default()
              }]),
              env: (!container.env.is_empty())
                .then(|| container.env.clone()),
              ports: (!ports.is_empty()).then_some(ports),
              readiness_probe: container.readiness_probe.clone(),
              liveness_probe: container.liveness_probe.clone(),
              resources: Some(container.resources.clone()),
              ..Default::default()
            }],
            ..Default::default()
          }),
        },
        ..Default::default()
      }),
      ..Default::default()
    };

    let mut found = match api.get_opt(&name).await? {
      None => {
        info!(namespace = %self.namespace, container = %name, "creating container");
        api.create(&PostParams::default(), &deployment).await?;
        return Ok(());
      }
      Some(found) => found,
    };

    // Only update the deployment when the running image is wrong,
    // a full spec diff would churn on rewrites from other
    // controllers.
    let running = found
      .spec
      .as_ref()
      .and_then(|spec| spec.template.spec.as_ref())
      .map(|spec| &spec.containers);
    let image_matches = running.is_some_and(|containers| {
      containers.len() == 1
        && containers[0].image.as_deref()
          == Some(self.build.spec.image.as_str())
    });

    if !image_matches {
      info!(namespace = %self.namespace, container = %name, "updating container");
      if let (Some(found_spec), Some(spec)) =
        (found.spec.as_mut(), deployment.spec)
      {
        found_spec.template = spec.template;
      }
      api.replace(&name, &PostParams::default(), &found).await?;
    }

    Ok(())
  }

  async fn reconcile_container_service(
    &self,
    container: &ContainerSpec,
  ) -> Result<(), Error> {
    let ports = convert_service_ports(&container.ports);
    if ports.is_empty() {
      return Ok(());
    }

    let name = format!("{}-container", container.name);
    let api: Api<Service> =
      Api::namespaced(self.client(), &self.namespace);

    let service = Service {
      metadata: ObjectMeta {
        name: Some(name.clone()),
        namespace: Some(self.namespace.clone()),
        labels: Some(get_labels(
          &self.build_name(),
          &name,
          Some(&self.git().r#ref),
        )),
        owner_references: Some(vec![self.owner_ref()?]),
        ..Default::default()
      },
      spec: Some(K8sServiceSpec {
        type_: Some("ClusterIP".to_string()),
        selector: Some(get_labels(&self.build_name(), &name, None)),
        ports: Some(ports),
        ..Default::default()
      }),
      ..Default::default()
    };

    create_if_absent(&api, &service)
      .await
      .map_err(Error::Kube)
  }
}
