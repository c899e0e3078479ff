use k8s_openapi::{
  api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec,
  },
  apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{Api, ResourceExt, api::ObjectMeta};
use testenv_client::entities::{
  database::Database, database_template::DatabaseTemplate,
};

use super::Error;
use crate::controller::{Context, create_if_absent};

pub async fn reconcile(
  ctx: &Context,
  database: &Database,
  template: &DatabaseTemplate,
  namespace: &str,
  owner: &OwnerReference,
) -> Result<(), Error> {
  let api: Api<PersistentVolumeClaim> =
    Api::namespaced(ctx.client.clone(), namespace);

  let claim = PersistentVolumeClaim {
    metadata: ObjectMeta {
      name: Some(database.name_any()),
      namespace: Some(namespace.to_string()),
      owner_references: Some(vec![owner.clone()]),
      ..Default::default()
    },
    spec: Some(PersistentVolumeClaimSpec {
      access_modes: Some(vec!["ReadWriteOnce".to_string()]),
      storage_class_name: Some(
        ctx.config.database_storage_class_name.clone(),
      ),
      resources: Some(template.spec.volume_capacity.clone()),
      ..Default::default()
    }),
    ..Default::default()
  };

  create_if_absent(&api, &claim).await.map_err(Error::Kube)
}
