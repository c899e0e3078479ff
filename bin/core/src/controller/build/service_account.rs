use k8s_openapi::api::{
  core::v1::ServiceAccount,
  rbac::v1::{RoleBinding, RoleRef, Subject},
};
use kube::{Api, api::ObjectMeta};

use super::{BuildReconciler, Error};
use crate::controller::create_if_absent;

impl BuildReconciler {
  pub async fn reconcile_service_account(
    &self,
  ) -> Result<(), Error> {
    let api: Api<ServiceAccount> =
      Api::namespaced(self.client(), &self.namespace);

    let service_account = ServiceAccount {
      metadata: ObjectMeta {
        name: Some(self.service_account_name().to_string()),
        namespace: Some(self.namespace.clone()),
        owner_references: Some(vec![self.owner_ref()?]),
        ..Default::default()
      },
      ..Default::default()
    };

    create_if_absent(&api, &service_account)
      .await
      .map_err(Error::Kube)
  }

  /// Binds the build service account to the configured cluster
  /// role. Skipped when no role is configured.
  pub async fn reconcile_role_binding(&self) -> Result<(), Error> {
    if self.config().build_cluster_role.is_empty() {
      return Ok(());
    }

    let api: Api<RoleBinding> =
      Api::namespaced(self.client(), &self.namespace);

    let role_binding = RoleBinding {
      metadata: ObjectMeta {
        name: Some(self.service_account_name().to_string()),
        namespace: Some(self.namespace.clone()),
        owner_references: Some(vec![self.owner_ref()?]),
        ..Default::default()
      },
      subjects: Some(vec![Subject {
        kind: "ServiceAccount".to_string(),
        name: self.service_account_name().to_string(),
        namespace: Some(self.namespace.clone()),
        ..Default::default()
      }]),
      role_ref: RoleRef {
        api_group: "rbac.authorization.k8s.io".to_string(),
        kind: "ClusterRole".to_string(),
        name: self.config().build_cluster_role.clone(),
      },
    };

    create_if_absent(&api, &role_binding)
      .await
      .map_err(Error::Kube)
  }
}
