use k8s_openapi::{
  api::core::v1::{Service, ServicePort, ServiceSpec},
  apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{Api, ResourceExt, api::ObjectMeta};
use testenv_client::entities::database::Database;

use super::{Error, labels};
use crate::controller::{Context, create_if_absent};

pub async fn reconcile(
  ctx: &Context,
  database: &Database,
  namespace: &str,
  owner: &OwnerReference,
) -> Result<(), Error> {
  let api: Api<Service> =
    Api::namespaced(ctx.client.clone(), namespace);

  let service = Service {
    metadata: ObjectMeta {
      name: Some(database.name_any()),
      namespace: Some(namespace.to_string()),
      owner_references: Some(vec![owner.clone()]),
      ..Default::default()
    },
    spec: Some(ServiceSpec {
      type_: Some("ClusterIP".to_string()),
      selector: Some(labels(&database.name_any())),
      ports: Some(vec![ServicePort {
        name: Some("tcp-postgres".to_string()),
        protocol: Some("TCP".to_string()),
        port: 5432,
        ..Default::default()
      }]),
      ..Default::default()
    }),
    ..Default::default()
  };

  create_if_absent(&api, &service).await.map_err(Error::Kube)
}
