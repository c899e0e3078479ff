use std::time::Duration;

use k8s_openapi::api::{
  apps::v1::{Deployment, DeploymentSpec},
  core::v1::{
    Container, EmptyDirVolumeSource, PodSpec, PodTemplateSpec,
    Service, ServiceSpec as K8sServiceSpec, Volume, VolumeMount,
  },
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::{
  Api,
  api::{DeleteParams, ObjectMeta, PostParams},
};
use testenv_client::entities::environment::ServiceSpec;

use super::{
  BuildReconciler, Error,
  utils::{
    convert_container_ports, convert_service_ports, get_labels,
  },
};
use crate::controller::create_if_absent;

impl BuildReconciler {
  /// Creates a deployment and cluster ip service per declared
  /// service dependency.
  pub async fn reconcile_services(
    &self,
    force: bool,
  ) -> Result<(), Error> {
    for service in &self.environment.spec.services {
      self.reconcile_service_deployment(service, force).await?;
      self.reconcile_service_service(service).await?;
    }

    Ok(())
  }

  async fn reconcile_service_deployment(
    &self,
    service: &ServiceSpec,
    force: bool,
  ) -> Result<(), Error> {
    let name = format!("{}-service", service.name);
    let api: Api<Deployment> =
      Api::namespaced(self.client(), &self.namespace);

    let volumes: Vec<Volume> = (0..service.shared_dirs.len())
      .map(|id| Volume {
        name: format!("shareddir-{id}"),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
      })
      .collect();

    let volume_mounts: Vec<VolumeMount> = service
      .shared_dirs
      .iter()
      .enumerate()
      .map(|(id, shared_dir)| VolumeMount {
        name: format!("shareddir-{id}"),
        mount_path: shared_dir.clone(),
        ..Default::default()
      })
      .collect();

    let init_containers: Vec<Container> = service
      .init_containers
      .iter()
      .map(|init| Container {
        name: init.name.clone(),
        image: Some(init.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        env: (!init.env.is_empty()).then(|| init.env.clone()),
        command: (!init.command.is_empty())
          .then(|| init.command.clone()),
        args: (!init.args.is_empty()).then(|| init.args.clone()),
        volume_mounts: (!volume_mounts.is_empty())
          .then(|| volume_mounts.clone()),
        ..Default::default()
      })
      .collect();

    let ports = convert_container_ports(&service.ports);
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
            init_containers: (!init_containers.is_empty())
              .then_some(init_containers),
            containers: vec![Container {
              name: service.name.clone(),
              image: Some(service.image.clone()),
              image_pull_policy: Some("IfNotPresent".to_string()),
              args: (!service.args.is_empty())
                .then(|| service.args.clone()),
              env: (!service.env.is_empty())
                .then(|| service.env.clone()),
              ports: (!ports.is_empty()).then_some(ports),
              readiness_probe: service.readiness_probe.clone(),
              liveness_probe: service.liveness_probe.clone(),
              resources: Some(service.resources.clone()),
              volume_mounts: (!volume_mounts.is_empty())
                .then(|| volume_mounts.clone()),
              ..Default::default()
            }],
            volumes: (!volumes.is_empty()).then_some(volumes),
            ..Default::default()
          }),
        },
        ..Default::default()
      }),
      ..Default::default()
    };

    if api.get_opt(&name).await?.is_none() {
      info!(namespace = %self.namespace, service = %name, "creating service");
      api.create(&PostParams::default(), &deployment).await?;
      return Ok(());
    }

    // Recreate the dependency so it picks up the new image
    // context, unless the author protected it.
    if force && !service.protected {
      info!(namespace = %self.namespace, service = %name, "recreating service");
      match api.delete(&name, &DeleteParams::default()).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 404 => {}
        Err(e) => return Err(e.into()),
      }
      tokio::time::sleep(Duration::from_secs(1)).await;
      api.create(&PostParams::default(), &deployment).await?;
    }

    Ok(())
  }

  async fn reconcile_service_service(
    &self,
    service: &ServiceSpec,
  ) -> Result<(), Error> {
    let ports = convert_service_ports(&service.ports);
    if ports.is_empty() {
      return Ok(());
    }

    let name = format!("{}-service", service.name);
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
