//! Level triggered reconciliation loops for the Build, Database
//! and DatabaseTemplate resources.

use std::{fmt::Debug, sync::Arc};

use kube::{
  Api, Client, Resource, ResourceExt, api::PostParams,
};
use serde::{Serialize, de::DeserializeOwned};
use testenv_client::entities::config::core::CoreConfig;
use tokio_util::sync::CancellationToken;

use crate::{config::core_config, state};

pub mod build;
pub mod database;
pub mod database_template;

/// Shared values handed to every reconciler.
pub struct Context {
  pub client: Client,
  pub config: &'static CoreConfig,
}

/// Runs all controllers until cancelled.
pub async fn run(cancel: CancellationToken) -> anyhow::Result<()> {
  let ctx = Arc::new(Context {
    client: state::kube_client().clone(),
    config: core_config(),
  });

  tokio::select! {
    _ = async {
      tokio::join!(
        build::run(ctx.clone()),
        database::run(ctx.clone()),
        database_template::run(ctx.clone()),
      )
    } => {}
    _ = cancel.cancelled() => {}
  }

  Ok(())
}

/// Creates the object unless an object with the same name already
/// exists. Most child objects are only written once and repaired
/// through the owner reference cascade.
pub(crate) async fn create_if_absent<K>(
  api: &Api<K>,
  obj: &K,
) -> Result<(), kube::Error>
where
  K: Resource
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned,
{
  match api.get_opt(&obj.name_any()).await? {
    Some(_) => Ok(()),
    None => api
      .create(&PostParams::default(), obj)
      .await
      .map(|_| ()),
  }
}
