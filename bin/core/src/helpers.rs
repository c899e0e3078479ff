use rand::Rng;

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Static value prefix used to name build namespaces.
pub const BUILD_PREFIX: &str = "test-environment-";

/// Service account created inside every build namespace.
pub const BUILD_SERVICE_ACCOUNT: &str = "test-environment";

/// Random lowercase string, used for database names and passwords.
pub fn random_string(length: usize) -> String {
  let mut rng = rand::rng();
  (0..length)
    .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
    .collect()
}

/// The environment name based on the git owner / repository values.
pub fn environment_name(owner: &str, repository: &str) -> String {
  format!("{owner}-{repository}")
}

/// The build name based on the git owner / repository values.
pub fn build_name(
  owner: &str,
  repository: &str,
  pull_request_number: i64,
) -> String {
  format!("{owner}-{repository}-{pull_request_number}")
}

/// The namespace holding all child resources of a build.
pub fn build_namespace(
  owner: &str,
  repository: &str,
  pull_request_number: i64,
) -> String {
  format!(
    "{BUILD_PREFIX}{}",
    build_name(owner, repository, pull_request_number)
  )
}

/// The url that exposes the test environment (without protocol
/// prefix). The owner is left out to keep the url short.
pub fn build_url(
  repository: &str,
  pull_request_number: i64,
  cluster_domain: &str,
) -> String {
  format!("{repository}-{pull_request_number}.{cluster_domain}")
}

/// The url to the environment logs (without protocol prefix),
/// a kibana discover query filtered on the build namespace.
pub fn logs_url(
  owner: &str,
  repository: &str,
  pull_request_number: i64,
  kibana_url: &str,
) -> String {
  let namespace =
    build_namespace(owner, repository, pull_request_number);

  format!(
    "{kibana_url}/app/kibana#/discover?_g=()&_a=(columns:!(_source),\
    filters:!(('$state':(store:appState),meta:(alias:!n,disabled:!f,\
    key:kubernetes.namespace_name,negate:!f,params:(query:{namespace},\
    type:phrase),type:phrase,value:{namespace}),query:(match:\
    (kubernetes.namespace_name:(query:{namespace},type:phrase))))),\
    interval:auto,query:(language:lucene,query:''),\
    sort:!('@timestamp',desc))"
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn random_string_uses_lowercase_charset() {
    let value = random_string(10);
    assert_eq!(value.len(), 10);
    assert!(value.chars().all(|c| c.is_ascii_lowercase()));
  }

  #[test]
  fn names_follow_the_git_context() {
    assert_eq!(environment_name("acme", "widgets"), "acme-widgets");
    assert_eq!(build_name("acme", "widgets", 42), "acme-widgets-42");
    assert_eq!(
      build_namespace("acme", "widgets", 42),
      "test-environment-acme-widgets-42"
    );
  }

  #[test]
  fn build_url_omits_the_owner() {
    assert_eq!(
      build_url("widgets", 42, "example.dev"),
      "widgets-42.example.dev"
    );
  }

  #[test]
  fn logs_url_filters_on_the_build_namespace() {
    let url = logs_url("acme", "widgets", 42, "kibana.example.dev");
    assert!(url.starts_with("kibana.example.dev/app/kibana"));
    assert!(url.contains("test-environment-acme-widgets-42"));
  }
}
