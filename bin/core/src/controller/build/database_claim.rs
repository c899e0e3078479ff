//! Claims a ready database for a build. The whole claim is held
//! under a process wide mutex so two concurrent reconciles can
//! never claim the same database.

use kube::{
  Api, Resource, ResourceExt,
  api::{ListParams, PostParams},
};
use testenv_client::entities::{
  LABEL_CLAIMED_BUILD, LABEL_DATABASE_TEMPLATE,
  database::{Database, DatabasePhase},
};

use super::{BuildReconciler, Error};
use crate::state;

/// Connection details of a claimed database.
pub struct ClaimedDatabase {
  pub database_name: String,
  pub username: String,
  pub password: String,
  pub host: String,
  pub port: i32,
}

fn to_claim(database: &Database) -> ClaimedDatabase {
  let status = database.status.clone().unwrap_or_default();
  ClaimedDatabase {
    database_name: status.database_name,
    username: status.username,
    password: status.password,
    host: status.host,
    port: status.port,
  }
}

/// Returns `None` when the environment declares no template,
/// the database already claimed by this build when one exists,
/// and otherwise claims the first ready database of the template.
pub async fn claim(
  br: &BuildReconciler,
) -> Result<Option<ClaimedDatabase>, Error> {
  let _guard = state::claim_lock().lock().await;

  let Some(template) = br
    .environment
    .spec
    .database_template
    .as_deref()
    .filter(|template| !template.is_empty())
  else {
    return Ok(None);
  };

  let api: Api<Database> = Api::namespaced(
    br.client(),
    &br.config().database_namespace,
  );
  let build_name = br.build_name();

  // Reuse the database already claimed by this build
  let claimed = api
    .list(&ListParams::default().labels(&format!(
      "{LABEL_DATABASE_TEMPLATE}={template},{LABEL_CLAIMED_BUILD}={build_name}"
    )))
    .await?;
  if let Some(database) = claimed.items.first() {
    return Ok(Some(to_claim(database)));
  }

  // Claim the first ready, unclaimed database of the template
  let databases = api
    .list(
      &ListParams::default()
        .labels(&format!("{LABEL_DATABASE_TEMPLATE}={template}")),
    )
    .await?;
  let mut database = find_ready(databases.items)
    .ok_or(Error::NoAvailableDatabases)?;

  database
    .labels_mut()
    .insert(LABEL_CLAIMED_BUILD.to_string(), build_name.clone());
  {
    let status = database.status.get_or_insert_default();
    status.build_name = build_name.clone();
    status.phase = DatabasePhase::Claimed;
  }
  // The database now lives and dies with the build
  database.metadata.owner_references = Some(vec![
    br.build.controller_owner_ref(&()).ok_or(
      Error::MissingObjectKey {
        name: ".metadata.uid",
      },
    )?,
  ]);

  let name = database.name_any();
  let database = api
    .replace(&name, &PostParams::default(), &database)
    .await?;

  state::metrics()
    .database_phases
    .with_label_values(&[template, "claimed"])
    .inc();
  info!(database = %name, build = %build_name, "claimed database");

  Ok(Some(to_claim(&database)))
}

/// The first database in ready phase that no build has claimed.
pub(crate) fn find_ready(
  databases: Vec<Database>,
) -> Option<Database> {
  databases.into_iter().find(|database| {
    database.status.as_ref().is_some_and(|status| {
      status.phase == DatabasePhase::Ready
        && status.build_name.is_empty()
    })
  })
}

#[cfg(test)]
mod tests {
  use testenv_client::entities::database::{
    DatabaseSpec, DatabaseStatus,
  };

  use super::*;

  fn database(
    name: &str,
    phase: DatabasePhase,
    build_name: &str,
  ) -> Database {
    let mut database = Database::new(
      name,
      DatabaseSpec {
        template_name: "t".into(),
      },
    );
    database.status = Some(DatabaseStatus {
      build_name: build_name.to_string(),
      phase,
      ..Default::default()
    });
    database
  }

  #[test]
  fn skips_unready_and_claimed_databases() {
    let databases = vec![
      database("a", DatabasePhase::Pending, ""),
      database("b", DatabasePhase::Provisioning, ""),
      database("c", DatabasePhase::Claimed, "acme-widgets-7"),
      database("d", DatabasePhase::Ready, "acme-widgets-8"),
      database("e", DatabasePhase::Ready, ""),
    ];

    let found = find_ready(databases).unwrap();
    assert_eq!(found.name_any(), "e");
  }

  #[test]
  fn returns_none_without_candidates() {
    assert!(find_ready(Vec::new()).is_none());
    assert!(
      find_ready(vec![database(
        "a",
        DatabasePhase::Provisioning,
        ""
      )])
      .is_none()
    );
  }
}
