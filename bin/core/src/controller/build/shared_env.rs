use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, api::ObjectMeta};

use super::{BuildReconciler, Error, database_claim};
use crate::{
  controller::create_if_absent,
  helpers::{BUILD_PREFIX, build_url},
  template::{self, BuildProps},
};

impl BuildReconciler {
  /// Writes the shared environment config map consumed by all
  /// tasks and containers. Values are expanded over the build
  /// property bag, including the claimed database credentials
  /// when the environment requests one.
  pub async fn reconcile_shared_env(&self) -> Result<(), Error> {
    let name = format!("{BUILD_PREFIX}sharedenv");
    let git = self.git();

    let mut props = BuildProps {
      owner: git.owner.clone(),
      repository: git.repository.clone(),
      pull_request_number: git.pull_request_number,
      image: self.build.spec.image.clone(),
      server_domain: build_url(
        &git.repository,
        git.pull_request_number,
        &self.config().cluster_domain,
      ),
      namespace: self.namespace.clone(),
      version: git.r#ref.clone(),
      ..Default::default()
    };

    // Claim a database before templating when requested
    if let Some(database) = database_claim::claim(self).await? {
      props.database_name = database.database_name;
      props.database_user = database.username;
      props.database_password = database.password;
      props.database_host = database.host;
      props.database_port = database.port.to_string();
    }

    let mut data = BTreeMap::new();
    for env in &self.environment.spec.shared_env {
      data.insert(
        env.name.clone(),
        template::expand(&env.value, &props),
      );
    }

    let config_map = ConfigMap {
      metadata: ObjectMeta {
        name: Some(name.clone()),
        namespace: Some(self.namespace.clone()),
        owner_references: Some(vec![self.owner_ref()?]),
        ..Default::default()
      },
      data: Some(data),
      ..Default::default()
    };

    let api: Api<ConfigMap> =
      Api::namespaced(self.client(), &self.namespace);

    create_if_absent(&api, &config_map)
      .await
      .map_err(Error::Kube)
  }
}
