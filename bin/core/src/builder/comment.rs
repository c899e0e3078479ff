//! Renders the PR comment with the environment information.

use testenv_client::entities::{
  config::core::CoreConfig, environment::Environment,
};

use super::Job;
use crate::{
  helpers::{build_namespace, build_url, logs_url},
  template::{self, BuildProps},
};

pub fn environment_information(
  job: &Job,
  environment: &Environment,
  image: &str,
  config: &CoreConfig,
) -> String {
  let url = build_url(
    &job.repository,
    job.pull_request_number,
    &config.cluster_domain,
  );
  let kibana = format!("kibana.{}", config.cluster_domain);
  let logs = logs_url(
    &job.owner,
    &job.repository,
    job.pull_request_number,
    &kibana,
  );

  let mut extra = Vec::new();

  // Remote terminal entrypoints
  for container in &environment.spec.containers {
    for terminal in &container.remote_terminal {
      extra.push(format!(
        "- {} {} [Click here](https://{}/term/{}-{}-{}/{}/{}/)",
        container.name,
        terminal.name,
        url,
        job.owner,
        job.repository,
        job.pull_request_number,
        container.name,
        terminal.name,
      ));
    }
  }

  // Environment links (urls support template values)
  let props = BuildProps {
    owner: job.owner.clone(),
    repository: job.repository.clone(),
    pull_request_number: job.pull_request_number,
    image: image.to_string(),
    server_domain: url.clone(),
    namespace: build_namespace(
      &job.owner,
      &job.repository,
      job.pull_request_number,
    ),
    version: job.r#ref.clone(),
    ..Default::default()
  };
  for link in &environment.spec.links {
    extra.push(format!(
      "- {}: {}",
      link.title,
      template::expand(&link.url, &props)
    ));
  }

  let on_demand = if environment.spec.on_demand {
    "<b>We don't deploy this build automatically, comment \
    `/rebuild` to deploy this branch to the test environment.\
    </b>\n\n"
  } else {
    ""
  };

  format!(
    "☁️ Find your changes in the cloud! ☁️\n\n\
    {on_demand}\
    - Environment URL: https://{url}\n\
    - Logs: [https://{kibana}](https://{logs})\n\
    {extra}\n\n\
    ---\n\n\
    <details>\n\
    <summary>test-environment commands</summary>\n\
    <br />\n\n\
    You can trigger test-environment actions by commenting on \
    this PR:\n\
    - `/rebuild` will issue a new deployment to the \
    test-environment based on the latest commit.\n\
    - `/clean` will remove the current test-environment build if \
    exists and issue a new deployment based on the latest \
    commit.\n\
    </details>\n",
    extra = extra.join("\n"),
  )
}

#[cfg(test)]
mod tests {
  use std::time::Instant;

  use testenv_client::entities::environment::{
    ContainerSpec, EnvironmentSpec, ExecSpec, LinkSpec,
  };

  use super::*;

  fn job() -> Job {
    Job {
      id: 1,
      owner: "acme".into(),
      repository: "widgets".into(),
      delete_environment: false,
      pull_request_number: 42,
      r#ref: "abc123".into(),
      user: "alice".into(),
      first_run: true,
      clean: false,
      force: false,
      create_time: Instant::now(),
    }
  }

  fn config() -> CoreConfig {
    CoreConfig {
      cluster_domain: "example.dev".into(),
      ..Default::default()
    }
  }

  #[test]
  fn contains_the_environment_url() {
    let environment = Environment::new(
      "acme-widgets",
      EnvironmentSpec::default(),
    );

    let comment = environment_information(
      &job(),
      &environment,
      "acme/widgets:abc123",
      &config(),
    );

    assert!(comment.contains("https://widgets-42.example.dev"));
    assert!(comment.contains("/rebuild"));
    assert!(!comment.contains("We don't deploy this build"));
  }

  #[test]
  fn renders_terminals_links_and_on_demand_notes() {
    let environment = Environment::new(
      "acme-widgets",
      EnvironmentSpec {
        on_demand: true,
        containers: vec![ContainerSpec {
          name: "web".into(),
          remote_terminal: vec![ExecSpec {
            name: "shell".into(),
            cmd: vec!["bash".into()],
          }],
          ..Default::default()
        }],
        links: vec![LinkSpec {
          title: "Admin".into(),
          url: "https://{{ServerDomain}}/admin".into(),
        }],
        ..Default::default()
      },
    );

    let comment = environment_information(
      &job(),
      &environment,
      "acme/widgets:abc123",
      &config(),
    );

    assert!(comment.contains("We don't deploy this build"));
    assert!(comment.contains(
      "https://widgets-42.example.dev/term/acme-widgets-42/web/shell/"
    ));
    assert!(
      comment
        .contains("- Admin: https://widgets-42.example.dev/admin")
    );
  }
}
