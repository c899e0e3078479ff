use k8s_openapi::api::core::v1::Namespace;
use kube::{Api, api::ObjectMeta};

use super::{BuildReconciler, Error};
use crate::controller::create_if_absent;

impl BuildReconciler {
  pub async fn reconcile_namespace(&self) -> Result<(), Error> {
    let api: Api<Namespace> = Api::all(self.client());

    let namespace = Namespace {
      metadata: ObjectMeta {
        name: Some(self.namespace.clone()),
        owner_references: Some(vec![self.owner_ref()?]),
        ..Default::default()
      },
      ..Default::default()
    };

    create_if_absent(&api, &namespace)
      .await
      .map_err(Error::Kube)
  }
}
