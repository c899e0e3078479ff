//! Materializes a Database into a postgres pod, volume claim and
//! service inside the database namespace.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use futures_util::StreamExt;
use k8s_openapi::{
  api::{
    apps::v1::Deployment,
    core::v1::{PersistentVolumeClaim, Service},
  },
  apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{
  Api, Resource, ResourceExt,
  runtime::{Controller, controller::Action, watcher},
};
use testenv_client::entities::{
  database::Database, database_template::DatabaseTemplate,
};
use thiserror::Error;

use super::Context;

mod deployment;
mod persistent_volume_claim;
mod service;

#[derive(Debug, Error)]
pub enum Error {
  #[error("kube api error: {0}")]
  Kube(#[from] kube::Error),
  #[error("missing object key: {name}")]
  MissingObjectKey { name: &'static str },
}

/// Labels used to identify the children of a database.
pub fn labels(database_name: &str) -> BTreeMap<String, String> {
  let mut labels = BTreeMap::new();
  labels
    .insert("app".to_string(), "testenvironment-postgres".to_string());
  labels.insert("database".to_string(), database_name.to_string());
  labels
}

pub async fn run(ctx: Arc<Context>) {
  let client = ctx.client.clone();
  let namespace = ctx.config.database_namespace.clone();
  let wc = watcher::Config::default();

  let databases: Api<Database> =
    Api::namespaced(client.clone(), &namespace);

  Controller::new(databases, wc.clone())
    .owns(
      Api::<Deployment>::namespaced(client.clone(), &namespace),
      wc.clone(),
    )
    .owns(
      Api::<Service>::namespaced(client.clone(), &namespace),
      wc.clone(),
    )
    .owns(
      Api::<PersistentVolumeClaim>::namespaced(
        client.clone(),
        &namespace,
      ),
      wc.clone(),
    )
    .run(reconcile, error_policy, ctx)
    .for_each(|result| async move {
      match result {
        Ok(object) => debug!("reconciled database {object:?}"),
        Err(e) => warn!("database reconciler error | {e:?}"),
      }
    })
    .await;
}

async fn reconcile(
  database: Arc<Database>,
  ctx: Arc<Context>,
) -> Result<Action, Error> {
  let namespace = database
    .namespace()
    .unwrap_or_else(|| ctx.config.database_namespace.clone());

  // Fetch the template the database was drawn from
  let templates: Api<DatabaseTemplate> =
    Api::namespaced(ctx.client.clone(), &namespace);
  let Some(template) = templates
    .get_opt(&database.spec.template_name)
    .await?
  else {
    return Ok(Action::await_change());
  };

  let owner = database.controller_owner_ref(&()).ok_or(
    Error::MissingObjectKey {
      name: ".metadata.uid",
    },
  )?;

  persistent_volume_claim::reconcile(
    &ctx, &database, &template, &namespace, &owner,
  )
  .await?;
  deployment::reconcile(
    &ctx, &database, &template, &namespace, &owner,
  )
  .await?;
  service::reconcile(&ctx, &database, &namespace, &owner).await?;

  Ok(Action::await_change())
}

fn error_policy(
  _database: Arc<Database>,
  error: &Error,
  _ctx: Arc<Context>,
) -> Action {
  warn!("database reconcile failed | {error}");
  Action::requeue(Duration::from_secs(10))
}
