use std::collections::BTreeMap;

use k8s_openapi::{
  api::{
    apps::v1::{
      Deployment, DeploymentSpec, DeploymentStrategy,
    },
    core::v1::{
      Container, ContainerPort, EnvVar,
      PersistentVolumeClaimVolumeSource, PodSpec,
      PodTemplateSpec, Probe, ResourceRequirements,
      TCPSocketAction, Volume, VolumeMount,
    },
  },
  apimachinery::pkg::{
    api::resource::Quantity,
    apis::meta::v1::{LabelSelector, OwnerReference},
    util::intstr::IntOrString,
  },
};
use kube::{
  Api, ResourceExt,
  api::{ObjectMeta, PostParams},
};
use testenv_client::entities::{
  database::{Database, DatabasePhase},
  database_template::DatabaseTemplate,
};

use super::{Error, labels};
use crate::controller::Context;

pub async fn reconcile(
  ctx: &Context,
  database: &Database,
  template: &DatabaseTemplate,
  namespace: &str,
  owner: &OwnerReference,
) -> Result<(), Error> {
  let name = database.name_any();
  let api: Api<Deployment> =
    Api::namespaced(ctx.client.clone(), namespace);

  let deployment = desired_deployment(
    database,
    template,
    namespace,
    &ctx.config.database_service_account_name,
    owner,
  );

  match api.get_opt(&name).await? {
    None => {
      api.create(&PostParams::default(), &deployment).await?;
    }
    // Deep equality, the container template is rewritten on
    // every phase change.
    Some(mut found) if found.spec != deployment.spec => {
      found.spec = deployment.spec;
      api.replace(&name, &PostParams::default(), &found).await?;
    }
    Some(_) => {}
  }

  Ok(())
}

/// The postgres deployment for a database. The phase selects both
/// the replica count (scaled to zero while pending or ready) and
/// the container tuning (bulk restore vs conservative serving).
pub(crate) fn desired_deployment(
  database: &Database,
  template: &DatabaseTemplate,
  namespace: &str,
  service_account_name: &str,
  owner: &OwnerReference,
) -> Deployment {
  let name = database.name_any();
  let labels = labels(&name);
  let phase = database
    .status
    .as_ref()
    .map(|status| status.phase)
    .unwrap_or_default();

  let container = match phase {
    DatabasePhase::Ready | DatabasePhase::Claimed => {
      serve_container(database, template)
    }
    _ => restore_container(database, template),
  };

  // No replicas while nothing needs the pod
  let replicas = match phase {
    DatabasePhase::Pending | DatabasePhase::Ready => 0,
    _ => 1,
  };

  let node_selector = &template.spec.node_selector;

  Deployment {
    metadata: ObjectMeta {
      name: Some(name.clone()),
      namespace: Some(namespace.to_string()),
      labels: Some(labels.clone()),
      owner_references: Some(vec![owner.clone()]),
      ..Default::default()
    },
    spec: Some(DeploymentSpec {
      selector: LabelSelector {
        match_labels: Some(labels.clone()),
        ..Default::default()
      },
      revision_history_limit: Some(0),
      strategy: Some(DeploymentStrategy {
        type_: Some("Recreate".to_string()),
        ..Default::default()
      }),
      replicas: Some(replicas),
      template: PodTemplateSpec {
        metadata: Some(ObjectMeta {
          labels: Some(labels),
          ..Default::default()
        }),
        spec: Some(PodSpec {
          service_account_name: Some(
            service_account_name.to_string(),
          ),
          termination_grace_period_seconds: Some(60 * 3),
          node_selector: (!node_selector.is_empty())
            .then(|| node_selector.clone()),
          containers: vec![container],
          volumes: Some(vec![Volume {
            name: "postgres-data".to_string(),
            persistent_volume_claim: Some(
              PersistentVolumeClaimVolumeSource {
                claim_name: name,
                ..Default::default()
              },
            ),
            ..Default::default()
          }]),
          ..Default::default()
        }),
      },
      ..Default::default()
    }),
    ..Default::default()
  }
}

fn base_container(
  database: &Database,
  template: &DatabaseTemplate,
) -> Container {
  let status = database.status.clone().unwrap_or_default();

  let probe = Probe {
    initial_delay_seconds: Some(10),
    timeout_seconds: Some(5),
    tcp_socket: Some(TCPSocketAction {
      port: IntOrString::String("tcp-postgres".to_string()),
      ..Default::default()
    }),
    ..Default::default()
  };

  Container {
    image: Some(format!(
      "postgres:{}",
      template.spec.database_version
    )),
    image_pull_policy: Some("IfNotPresent".to_string()),
    ports: Some(vec![ContainerPort {
      name: Some("tcp-postgres".to_string()),
      container_port: 5432,
      protocol: Some("TCP".to_string()),
      ..Default::default()
    }]),
    env: Some(vec![
      env("POSTGRES_DB", &status.database_name),
      env("POSTGRES_USER", &status.username),
      env("POSTGRES_PASSWORD", &status.password),
      env("PGDATA", "/var/lib/postgresql/data/pgdata"),
    ]),
    volume_mounts: Some(vec![VolumeMount {
      name: "postgres-data".to_string(),
      mount_path: "/var/lib/postgresql/data".to_string(),
      ..Default::default()
    }]),
    liveness_probe: Some(probe.clone()),
    readiness_probe: Some(probe),
    ..Default::default()
  }
}

/// High resources, postgres tuned for a bulk restore. Durability
/// is irrelevant, the data can always be restored again.
fn restore_container(
  database: &Database,
  template: &DatabaseTemplate,
) -> Container {
  let mut container = base_container(database, template);

  container.name = "restore".to_string();
  container.resources = Some(resources("2", "8Gi", "3", "10Gi"));
  container.command = Some(
    [
      "docker-entrypoint.sh",
      "-c",
      "shared_buffers=1GB",
      "-c",
      "effective_cache_size=6GB",
      "-c",
      "work_mem=100MB",
      "-c",
      "maintenance_work_mem=1GB",
      "-c",
      "effective_io_concurrency=200",
      "-c",
      "random_page_cost=1",
      "-c",
      "fsync=off",
      "-c",
      "synchronous_commit=off",
      "-c",
      "wal_level=minimal",
      "-c",
      "full_page_writes=off",
      "-c",
      "wal_buffers=64MB",
      "-c",
      "max_wal_size=20GB",
      "-c",
      "max_wal_senders=0",
      "-c",
      "archive_mode=off",
      "-c",
      "autovacuum=off",
    ]
    .map(String::from)
    .to_vec(),
  );

  container
}

/// Modest resources and conservative tuning for serving a claimed
/// database.
fn serve_container(
  database: &Database,
  template: &DatabaseTemplate,
) -> Container {
  let mut container = base_container(database, template);

  container.name = "serve".to_string();
  container.resources =
    Some(resources("400m", "2Gi", "800m", "2Gi"));
  container.command = Some(
    [
      "docker-entrypoint.sh",
      "-c",
      "shared_buffers=512MB",
      "-c",
      "effective_cache_size=1536MB",
      "-c",
      "work_mem=200MB",
      "-c",
      "effective_io_concurrency=200",
      "-c",
      "random_page_cost=1",
    ]
    .map(String::from)
    .to_vec(),
  );

  container
}

fn env(name: &str, value: &str) -> EnvVar {
  EnvVar {
    name: name.to_string(),
    value: Some(value.to_string()),
    ..Default::default()
  }
}

fn resources(
  request_cpu: &str,
  request_memory: &str,
  limit_cpu: &str,
  limit_memory: &str,
) -> ResourceRequirements {
  ResourceRequirements {
    requests: Some(BTreeMap::from([
      ("cpu".to_string(), Quantity(request_cpu.to_string())),
      ("memory".to_string(), Quantity(request_memory.to_string())),
    ])),
    limits: Some(BTreeMap::from([
      ("cpu".to_string(), Quantity(limit_cpu.to_string())),
      ("memory".to_string(), Quantity(limit_memory.to_string())),
    ])),
    ..Default::default()
  }
}

#[cfg(test)]
mod tests {
  use testenv_client::entities::{
    database::{DatabaseSpec, DatabaseStatus},
    database_template::DatabaseTemplateSpec,
  };

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
      host: "t-abcdef.databases".into(),
      port: 5432,
      username: "app".into(),
      password: "secret".into(),
      database_name: "app".into(),
      ..Default::default()
    });
    database
  }

  fn template() -> DatabaseTemplate {
    DatabaseTemplate::new(
      "t",
      DatabaseTemplateSpec {
        dump_file: "gs://dumps/app".into(),
        refresh_interval: "12h".into(),
        buffer_size: 2,
        database_name: "app".into(),
        database_user: "app".into(),
        database_version: "13.2".into(),
        ..Default::default()
      },
    )
  }

  fn owner() -> OwnerReference {
    OwnerReference {
      api_version: "testenvironment.dev/v1alpha1".into(),
      kind: "Database".into(),
      name: "t-abcdef".into(),
      uid: "uid".into(),
      controller: Some(true),
      ..Default::default()
    }
  }

  fn spec_of(deployment: &Deployment) -> &DeploymentSpec {
    deployment.spec.as_ref().unwrap()
  }

  fn container_of(deployment: &Deployment) -> &Container {
    &spec_of(deployment)
      .template
      .spec
      .as_ref()
      .unwrap()
      .containers[0]
  }

  #[test]
  fn pending_databases_scale_to_zero_with_restore_tuning() {
    let deployment = desired_deployment(
      &database(DatabasePhase::Pending),
      &template(),
      "databases",
      "database-sa",
      &owner(),
    );

    assert_eq!(spec_of(&deployment).replicas, Some(0));
    let container = container_of(&deployment);
    assert_eq!(container.name, "restore");
    assert_eq!(
      container.image.as_deref(),
      Some("postgres:13.2")
    );
    assert!(
      container
        .command
        .as_ref()
        .unwrap()
        .contains(&"fsync=off".to_string())
    );
  }

  #[test]
  fn provisioning_databases_run_the_restore_container() {
    let deployment = desired_deployment(
      &database(DatabasePhase::Provisioning),
      &template(),
      "databases",
      "database-sa",
      &owner(),
    );

    assert_eq!(spec_of(&deployment).replicas, Some(1));
    assert_eq!(container_of(&deployment).name, "restore");
  }

  #[test]
  fn ready_databases_scale_to_zero_with_serve_tuning() {
    let deployment = desired_deployment(
      &database(DatabasePhase::Ready),
      &template(),
      "databases",
      "database-sa",
      &owner(),
    );

    assert_eq!(spec_of(&deployment).replicas, Some(0));
    let container = container_of(&deployment);
    assert_eq!(container.name, "serve");
    assert!(
      !container
        .command
        .as_ref()
        .unwrap()
        .contains(&"fsync=off".to_string())
    );
  }

  #[test]
  fn claimed_databases_serve_with_one_replica() {
    let deployment = desired_deployment(
      &database(DatabasePhase::Claimed),
      &template(),
      "databases",
      "database-sa",
      &owner(),
    );

    assert_eq!(spec_of(&deployment).replicas, Some(1));
    assert_eq!(container_of(&deployment).name, "serve");
  }
}
