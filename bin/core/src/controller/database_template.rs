//! Keeps a buffer of pending databases around for every template.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use futures_util::StreamExt;
use kube::{
  Api, Resource, ResourceExt,
  api::{ListParams, ObjectMeta, PostParams},
  runtime::{Controller, controller::Action, watcher},
};
use testenv_client::entities::{
  LABEL_DATABASE_TEMPLATE,
  database::{
    Database, DatabasePhase, DatabaseSpec, DatabaseStatus,
  },
  database_template::DatabaseTemplate,
};
use thiserror::Error;

use super::Context;
use crate::{helpers::random_string, state};

#[derive(Debug, Error)]
pub enum Error {
  #[error("kube api error: {0}")]
  Kube(#[from] kube::Error),
  #[error("missing object key: {name}")]
  MissingObjectKey { name: &'static str },
}

pub async fn run(ctx: Arc<Context>) {
  let client = ctx.client.clone();
  let namespace = ctx.config.database_namespace.clone();
  let wc = watcher::Config::default();

  let templates: Api<DatabaseTemplate> =
    Api::namespaced(client.clone(), &namespace);

  Controller::new(templates, wc.clone())
    .owns(
      Api::<Database>::namespaced(client.clone(), &namespace),
      wc.clone(),
    )
    .run(reconcile, error_policy, ctx)
    .for_each(|result| async move {
      match result {
        Ok(object) => {
          debug!("reconciled databasetemplate {object:?}")
        }
        Err(e) => {
          warn!("databasetemplate reconciler error | {e:?}")
        }
      }
    })
    .await;
}

/// Counts databases until the buffer size is met and creates
/// pending instances for the shortfall.
async fn reconcile(
  template: Arc<DatabaseTemplate>,
  ctx: Arc<Context>,
) -> Result<Action, Error> {
  let name = template.name_any();
  let namespace = template
    .namespace()
    .unwrap_or_else(|| ctx.config.database_namespace.clone());

  let databases: Api<Database> =
    Api::namespaced(ctx.client.clone(), &namespace);

  let list = databases
    .list(
      &ListParams::default()
        .labels(&format!("{LABEL_DATABASE_TEMPLATE}={name}")),
    )
    .await?;

  // Create databases until the buffer size is satisfied
  let mut to_create =
    template.spec.buffer_size - count_unclaimed(&list.items);

  while to_create > 0 {
    let database_name = format!("{name}-{}", random_string(6));

    let database = Database {
      metadata: ObjectMeta {
        name: Some(database_name.clone()),
        namespace: Some(namespace.clone()),
        labels: Some(BTreeMap::from([(
          LABEL_DATABASE_TEMPLATE.to_string(),
          name.clone(),
        )])),
        owner_references: Some(vec![
          template.controller_owner_ref(&()).ok_or(
            Error::MissingObjectKey {
              name: ".metadata.uid",
            },
          )?,
        ]),
        ..Default::default()
      },
      spec: DatabaseSpec {
        template_name: name.clone(),
      },
      status: Some(DatabaseStatus {
        build_name: String::new(),
        phase: DatabasePhase::Pending,
        host: format!("{database_name}.{namespace}"),
        port: 5432,
        username: template.spec.database_user.clone(),
        password: random_string(10),
        database_name: template.spec.database_name.clone(),
      }),
    };

    info!(database = %database_name, template = %name, "creating pending database");
    databases.create(&PostParams::default(), &database).await?;
    state::metrics()
      .database_phases
      .with_label_values(&[name.as_str(), "pending"])
      .inc();

    to_create -= 1;
  }

  Ok(Action::await_change())
}

fn error_policy(
  _template: Arc<DatabaseTemplate>,
  error: &Error,
  _ctx: Arc<Context>,
) -> Action {
  warn!("databasetemplate reconcile failed | {error}");
  Action::requeue(Duration::from_secs(10))
}

/// The amount of databases not yet claimed by a build.
pub(crate) fn count_unclaimed(databases: &[Database]) -> i64 {
  databases
    .iter()
    .filter(|database| {
      database
        .status
        .as_ref()
        .map(|status| status.phase != DatabasePhase::Claimed)
        .unwrap_or(true)
    })
    .count() as i64
}

#[cfg(test)]
mod tests {
  use super::*;

  fn database(phase: DatabasePhase) -> Database {
    let mut database = Database::new(
      "t-abcdef",
      DatabaseSpec {
        template_name: "t".into(),
      },
    );
    database.status = Some(DatabaseStatus {
      phase,
      ..Default::default()
    });
    database
  }

  #[test]
  fn counts_all_phases_except_claimed() {
    let databases = vec![
      database(DatabasePhase::Pending),
      database(DatabasePhase::Provisioning),
      database(DatabasePhase::Ready),
      database(DatabasePhase::Claimed),
    ];

    assert_eq!(count_unclaimed(&databases), 3);
    assert_eq!(count_unclaimed(&[]), 0);
  }
}
