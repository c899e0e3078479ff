use std::collections::HashSet;

use k8s_openapi::api::core::v1::Endpoints;
use kube::{
  Api,
  api::{ObjectMeta, PostParams},
};
use testenv_client::entities::{
  environment::EnvironmentSpec,
  istio::{
    Destination, DestinationWeight, HttpMatchRequest,
    HttpRedirect, HttpRoute, PortSelector, StringMatch,
    VirtualService, VirtualServiceSpec,
  },
};

use super::{BuildReconciler, Error};
use crate::helpers::{build_name, build_url};

impl BuildReconciler {
  /// Writes the virtualservice exposing the build behind its
  /// per-PR hostname. Routes whose container has no live
  /// endpoints are pointed at the status service, which acts as
  /// a loading page.
  pub async fn reconcile_virtual_service(
    &self,
  ) -> Result<(), Error> {
    let git = self.git();
    let config = self.config();

    let name = build_name(
      &git.owner,
      &git.repository,
      git.pull_request_number,
    );
    let url = build_url(
      &git.repository,
      git.pull_request_number,
      &config.cluster_domain,
    );

    // Collect the routes with live endpoint addresses
    let endpoints: Api<Endpoints> =
      Api::namespaced(self.client(), &self.namespace);
    let mut active = HashSet::new();
    for route in &self.environment.spec.routing {
      let service_name =
        format!("{}-container", route.container_name);
      let found = endpoints.get(&service_name).await?;

      let live = found
        .subsets
        .iter()
        .flatten()
        .filter(|subset| {
          subset
            .ports
            .iter()
            .flatten()
            .any(|port| port.port == route.port)
        })
        .any(|subset| {
          subset
            .addresses
            .as_ref()
            .is_some_and(|addresses| !addresses.is_empty())
        });
      if live {
        active.insert((service_name, route.port));
      }
    }

    let status_destination = Destination {
      host: format!(
        "{}.{}.svc.cluster.local",
        config.status_service_name, config.namespace,
      ),
      port: PortSelector {
        number: config.status_service_port,
      },
    };

    let http = build_routes(
      &self.environment.spec,
      &self.namespace,
      &status_destination,
      &active,
    );

    if http.is_empty() {
      warn!(virtualservice = %name, "skipping virtualservice without routes");
      return Ok(());
    }

    let virtual_service = VirtualService {
      metadata: ObjectMeta {
        name: Some(name.clone()),
        namespace: Some(config.istio_namespace.clone()),
        owner_references: Some(vec![self.owner_ref()?]),
        ..Default::default()
      },
      spec: VirtualServiceSpec {
        gateways: vec![config.istio_gateway.clone()],
        hosts: vec![url],
        http,
      },
    };

    let api: Api<VirtualService> =
      Api::namespaced(self.client(), &config.istio_namespace);

    match api.get_opt(&name).await? {
      None => {
        info!(virtualservice = %name, "creating virtualservice");
        api
          .create(&PostParams::default(), &virtual_service)
          .await?;
      }
      // Deep equality, endpoint liveness rewrites routes often
      Some(mut found) if found.spec != virtual_service.spec => {
        info!(virtualservice = %name, "updating virtualservice");
        found.spec = virtual_service.spec;
        api.replace(&name, &PostParams::default(), &found).await?;
      }
      Some(_) => {}
    }

    Ok(())
  }
}

/// Builds the http route list: the built-in `/term/` route first,
/// one route per routing rule (live containers direct, everything
/// else to the status service) and the redirects last.
pub(crate) fn build_routes(
  environment: &EnvironmentSpec,
  namespace: &str,
  status_destination: &Destination,
  active: &HashSet<(String, i32)>,
) -> Vec<HttpRoute> {
  let mut routes = Vec::new();

  // Remote terminal route, always handled by the status service
  routes.push(HttpRoute {
    r#match: vec![HttpMatchRequest {
      uri: StringMatch {
        prefix: "/term/".to_string(),
      },
    }],
    route: vec![DestinationWeight {
      destination: status_destination.clone(),
    }],
    redirect: None,
    websocket_upgrade: true,
  });

  // User defined routes
  for route in &environment.routing {
    let service_name =
      format!("{}-container", route.container_name);

    let destination =
      if active.contains(&(service_name.clone(), route.port)) {
        Destination {
          host: format!(
            "{service_name}.{namespace}.svc.cluster.local"
          ),
          port: PortSelector {
            number: route.port as i64,
          },
        }
      } else {
        status_destination.clone()
      };

    routes.push(HttpRoute {
      r#match: vec![HttpMatchRequest {
        uri: StringMatch {
          prefix: route.url_prefix.clone(),
        },
      }],
      route: vec![DestinationWeight { destination }],
      redirect: None,
      websocket_upgrade: true,
    });
  }

  // Redirects
  for redirect in &environment.redirects {
    routes.push(HttpRoute {
      r#match: vec![HttpMatchRequest {
        uri: StringMatch {
          prefix: redirect.url_prefix.clone(),
        },
      }],
      route: Vec::new(),
      redirect: Some(HttpRedirect {
        uri: redirect.destination.clone(),
      }),
      websocket_upgrade: false,
    });
  }

  routes
}

#[cfg(test)]
mod tests {
  use testenv_client::entities::environment::{
    RedirectSpec, RoutingSpec,
  };

  use super::*;

  fn status_destination() -> Destination {
    Destination {
      host: "status.operator.svc.cluster.local".to_string(),
      port: PortSelector { number: 8000 },
    }
  }

  fn environment() -> EnvironmentSpec {
    EnvironmentSpec {
      routing: vec![RoutingSpec {
        container_name: "web".into(),
        port: 8080,
        url_prefix: "/".into(),
      }],
      redirects: vec![RedirectSpec {
        url_prefix: "/old".into(),
        destination: "/new".into(),
      }],
      ..Default::default()
    }
  }

  #[test]
  fn term_route_comes_first() {
    let routes = build_routes(
      &environment(),
      "test-environment-acme-widgets-42",
      &status_destination(),
      &HashSet::new(),
    );

    assert_eq!(routes.len(), 3);
    assert_eq!(routes[0].r#match[0].uri.prefix, "/term/");
    assert!(routes[0].websocket_upgrade);
    assert_eq!(
      routes[0].route[0].destination,
      status_destination()
    );
  }

  #[test]
  fn live_containers_get_direct_destinations() {
    let mut active = HashSet::new();
    active.insert(("web-container".to_string(), 8080));

    let routes = build_routes(
      &environment(),
      "test-environment-acme-widgets-42",
      &status_destination(),
      &active,
    );

    assert_eq!(
      routes[1].route[0].destination.host,
      "web-container.test-environment-acme-widgets-42.svc.cluster.local"
    );
    assert_eq!(routes[1].route[0].destination.port.number, 8080);
  }

  #[test]
  fn dead_containers_fall_back_to_the_status_service() {
    let routes = build_routes(
      &environment(),
      "test-environment-acme-widgets-42",
      &status_destination(),
      &HashSet::new(),
    );

    assert_eq!(
      routes[1].route[0].destination,
      status_destination()
    );
  }

  #[test]
  fn redirects_come_last_without_websocket_upgrade() {
    let routes = build_routes(
      &environment(),
      "test-environment-acme-widgets-42",
      &status_destination(),
      &HashSet::new(),
    );

    let redirect = routes.last().unwrap();
    assert_eq!(redirect.redirect.as_ref().unwrap().uri, "/new");
    assert!(redirect.route.is_empty());
    assert!(!redirect.websocket_upgrade);
  }
}
