//! Materializes a Build into a namespace with service accounts,
//! services, tasks, containers and routing.

use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use k8s_openapi::{
  api::{
    apps::v1::Deployment,
    batch::v1::Job,
    core::v1::{
      ConfigMap, Endpoints, Namespace, Pod, Service,
      ServiceAccount,
    },
    rbac::v1::RoleBinding,
  },
  apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{
  Api, Client, Resource, ResourceExt,
  runtime::{
    Controller, controller::Action, reflector::ObjectRef,
    watcher,
  },
};
use testenv_client::entities::{
  build::{Build, GitSpec},
  config::core::CoreConfig,
  environment::Environment,
  istio::VirtualService,
};
use thiserror::Error;

use super::Context;
use crate::helpers::{BUILD_SERVICE_ACCOUNT, build_namespace};

mod containers;
mod database_claim;
mod namespace;
mod routing;
mod service_account;
mod services;
mod shared_env;
mod tasks;
mod utils;

#[derive(Debug, Error)]
pub enum Error {
  #[error("kube api error: {0}")]
  Kube(#[from] kube::Error),
  #[error("no available databases based on requested template")]
  NoAvailableDatabases,
  #[error("missing object key: {name}")]
  MissingObjectKey { name: &'static str },
}

/// Starts the build controller. Child changes requeue the owning
/// Build; endpoints and pods carry no owner reference and are
/// mapped through their `app` label instead.
pub async fn run(ctx: Arc<Context>) {
  let client = ctx.client.clone();
  let namespace = ctx.config.namespace.clone();
  let wc = watcher::Config::default();

  let builds: Api<Build> =
    Api::namespaced(client.clone(), &namespace);

  Controller::new(builds, wc.clone())
    .owns(Api::<Namespace>::all(client.clone()), wc.clone())
    .owns(Api::<ServiceAccount>::all(client.clone()), wc.clone())
    .owns(Api::<RoleBinding>::all(client.clone()), wc.clone())
    .owns(Api::<ConfigMap>::all(client.clone()), wc.clone())
    .owns(Api::<Deployment>::all(client.clone()), wc.clone())
    .owns(Api::<Service>::all(client.clone()), wc.clone())
    .owns(Api::<Job>::all(client.clone()), wc.clone())
    .owns(Api::<VirtualService>::all(client.clone()), wc.clone())
    .watches(Api::<Endpoints>::all(client.clone()), wc.clone(), {
      let namespace = namespace.clone();
      move |endpoints: Endpoints| {
        map_app_label(
          endpoints.labels().get("app").cloned(),
          &namespace,
        )
      }
    })
    .watches(Api::<Pod>::all(client.clone()), wc.clone(), {
      let namespace = namespace.clone();
      move |pod: Pod| {
        map_app_label(pod.labels().get("app").cloned(), &namespace)
      }
    })
    .run(reconcile, error_policy, ctx)
    .for_each(|result| async move {
      match result {
        Ok(object) => debug!("reconciled build {object:?}"),
        Err(e) => warn!("build reconciler error | {e:?}"),
      }
    })
    .await;
}

fn map_app_label(
  app: Option<String>,
  namespace: &str,
) -> Option<ObjectRef<Build>> {
  app.map(|app| ObjectRef::new(&app).within(namespace))
}

async fn reconcile(
  build: Arc<Build>,
  ctx: Arc<Context>,
) -> Result<Action, Error> {
  // Fetch the environment the build is based on
  let environments: Api<Environment> = Api::namespaced(
    ctx.client.clone(),
    &ctx.config.namespace,
  );
  let environment =
    environments.get(&build.spec.environment).await?;

  let git = &build.spec.git;
  let namespace = build_namespace(
    &git.owner,
    &git.repository,
    git.pull_request_number,
  );

  let br = BuildReconciler {
    ctx,
    build,
    environment,
    namespace,
  };

  br.reconcile_namespace().await?;
  br.reconcile_service_account().await?;
  br.reconcile_role_binding().await?;

  // Check if the build image has changed, downstream steps
  // recreate their children when it has.
  let force = br.has_image_changed().await?;

  br.reconcile_services(force).await?;

  match br.reconcile_shared_env().await {
    // A database may need to be provisioned first, try again in
    // a minute.
    Err(Error::NoAvailableDatabases) => {
      warn!(
        namespace = %br.namespace,
        "no ready database for claim, requeueing"
      );
      return Ok(Action::requeue(Duration::from_secs(60)));
    }
    result => result?,
  }

  br.reconcile_tasks(force).await?;
  br.reconcile_containers(force).await?;
  br.reconcile_virtual_service().await?;

  Ok(Action::await_change())
}

fn error_policy(
  _build: Arc<Build>,
  error: &Error,
  _ctx: Arc<Context>,
) -> Action {
  warn!("build reconcile failed | {error}");
  Action::requeue(Duration::from_secs(10))
}

/// Shared props for one reconciliation run.
pub(crate) struct BuildReconciler {
  ctx: Arc<Context>,
  build: Arc<Build>,
  environment: Environment,
  namespace: String,
}

impl BuildReconciler {
  fn client(&self) -> Client {
    self.ctx.client.clone()
  }

  fn config(&self) -> &'static CoreConfig {
    self.ctx.config
  }

  fn git(&self) -> &GitSpec {
    &self.build.spec.git
  }

  fn build_name(&self) -> String {
    self.build.name_any()
  }

  fn service_account_name(&self) -> &'static str {
    BUILD_SERVICE_ACCOUNT
  }

  fn owner_ref(&self) -> Result<OwnerReference, Error> {
    self
      .build
      .controller_owner_ref(&())
      .ok_or(Error::MissingObjectKey {
        name: ".metadata.uid",
      })
  }
}
