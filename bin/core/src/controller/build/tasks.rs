use std::time::Duration;

use k8s_openapi::api::{
  batch::v1::{Job, JobSpec},
  core::v1::{
    ConfigMapEnvSource, Container, EnvFromSource, PodSpec,
    PodTemplateSpec,
  },
};
use kube::{
  Api,
  api::{DeleteParams, ObjectMeta, PostParams},
};
use testenv_client::entities::environment::TaskSpec;

use super::{BuildReconciler, Error, utils::get_labels};
use crate::helpers::BUILD_PREFIX;

impl BuildReconciler {
  /// Creates a one-shot job per declared task (migrations etc).
  pub async fn reconcile_tasks(
    &self,
    force: bool,
  ) -> Result<(), Error> {
    for task in &self.environment.spec.tasks {
      self.reconcile_task(task, force).await?;
    }

    Ok(())
  }

  async fn reconcile_task(
    &self,
    task: &TaskSpec,
    force: bool,
  ) -> Result<(), Error> {
    let name = format!("{}-task", task.name);
    let api: Api<Job> =
      Api::namespaced(self.client(), &self.namespace);

    let node_selector = &self.environment.spec.node_selector;

    let job = Job {
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
      spec: Some(JobSpec {
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
            restart_policy: Some("OnFailure".to_string()),
            node_selector: (!node_selector.is_empty())
              .then(|| node_selector.clone()),
            containers: vec![Container {
              name: task.name.clone(),
              image: Some(self.build.spec.image.clone()),
              args: (!task.args.is_empty())
                .then(|| task.args.clone()),
              env_from: Some(vec![EnvFromSource {
                config_map_ref: Some(ConfigMapEnvSource {
                  name: format!("{BUILD_PREFIX}sharedenv"),
                  optional: Some(false),
                }),
                ..Default::default()
              }]),
              env: (!task.env.is_empty())
                .then(|| task.env.clone()),
              resources: Some(task.resources.clone()),
              ..Default::default()
            }],
            ..Default::default()
          }),
        },
        ..Default::default()
      }),
      ..Default::default()
    };

    match api.get_opt(&name).await? {
      None => {
        info!(namespace = %self.namespace, task = %name, "creating task");
        api.create(&PostParams::default(), &job).await?;
      }
      Some(_) if force => {
        info!(namespace = %self.namespace, task = %name, "recreating task");
        match api.delete(&name, &DeleteParams::default()).await {
          Ok(_) => {}
          Err(kube::Error::Api(e)) if e.code == 404 => {}
          Err(e) => return Err(e.into()),
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        api.create(&PostParams::default(), &job).await?;
      }
      Some(_) => {}
    }

    Ok(())
  }
}
