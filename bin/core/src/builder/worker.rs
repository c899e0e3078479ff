use std::{sync::Arc, time::Instant};

use anyhow::Context as _;
use kube::{
  Api, ResourceExt,
  api::{DeleteParams, ObjectMeta, PostParams},
};
use testenv_client::entities::{
  build::{Build, BuildSpec, GitSpec},
  environment::Environment,
};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::{Job, JobResult, archive, comment};
use crate::{
  config::core_config,
  github::StatusState,
  helpers::{build_name, build_url, environment_name},
  state,
};

/// Drains the job channel until it closes or the builder is
/// cancelled.
pub(crate) async fn run(
  id: usize,
  jobs_rx: Arc<Mutex<mpsc::Receiver<Job>>>,
  results_tx: mpsc::Sender<JobResult>,
  cancel: CancellationToken,
) {
  loop {
    let job = {
      let mut jobs_rx = jobs_rx.lock().await;
      tokio::select! {
        job = jobs_rx.recv() => job,
        _ = cancel.cancelled() => None,
      }
    };

    let Some(job) = job else {
      info!("worker {id} received all jobs, closing");
      return;
    };

    let error = process_job(&job).await.err();
    if results_tx.send(JobResult { job, error }).await.is_err() {
      return;
    }
  }
}

async fn process_job(job: &Job) -> anyhow::Result<()> {
  // Track queue delay
  observe(job, "queue_delay", job.create_time);

  if job.delete_environment {
    delete_build(job).await
  } else {
    create_build(job).await
  }
}

async fn create_build(job: &Job) -> anyhow::Result<()> {
  let config = core_config();
  let client = state::kube_client().clone();

  let environments: Api<Environment> =
    Api::namespaced(client.clone(), &config.namespace);
  let builds: Api<Build> =
    Api::namespaced(client, &config.namespace);

  // Dockerfile path inside the build context
  let dockerfile = "Dockerfile";
  // Full image name, including the registry prefix
  let image = state::docker().image_name(
    &job.owner,
    &job.repository,
    &job.r#ref,
  );

  info!(
    job_id = job.id,
    owner = %job.owner,
    repository = %job.repository,
    pull_request_number = job.pull_request_number,
    git_ref = %job.r#ref,
    user = %job.user,
    first_run = job.first_run,
    clean = job.clean,
    force = job.force,
    "creating build"
  );

  // Check if the environment exists
  begin_stage(job, "checkManifest", "Environment manifest lookup")
    .await;
  let start = Instant::now();
  let environment = match environments
    .get(&environment_name(&job.owner, &job.repository))
    .await
  {
    Ok(environment) => environment,
    Err(e) => {
      return fail_stage(job, "Unknown environment", e.into()).await;
    }
  };
  observe(job, "checkManifest", start);

  // Skip the build if the commit user is in ignored users and
  // this is not a forced build.
  if !job.force
    && environment.spec.ignored_users.contains(&job.user)
  {
    warn!(job_id = job.id, "job ignored, user in ignored users");
    update_build_status(
      job,
      StatusState::Success,
      "Build ignored (ignoring commits from this user)",
      "",
    )
    .await;
    return Ok(());
  }

  // Clone repository
  begin_stage(job, "cloneRepository", "Cloning repository").await;
  let start = Instant::now();
  let repository_archive = match state::github()
    .archive(&job.owner, &job.repository, &job.r#ref)
    .await
  {
    Ok(archive) => archive,
    Err(e) => {
      return fail_stage(job, "Could not clone repository", e).await;
    }
  };
  observe(job, "cloneRepository", start);

  // Process build context
  begin_stage(
    job,
    "processBuildContext",
    "Processing build context",
  )
  .await;
  let start = Instant::now();
  let build_context =
    match archive::repack(&repository_archive, dockerfile) {
      Ok(context) => context,
      Err(e) => {
        return fail_stage(
          job,
          "Could not process build context",
          e.into(),
        )
        .await;
      }
    };
  observe(job, "processBuildContext", start);

  // Building image
  begin_stage(job, "buildImage", "Building image").await;
  let start = Instant::now();
  if let Err(e) = state::docker()
    .build_image(build_context, &image, dockerfile)
    .await
  {
    return fail_stage(job, "Could not build image", e).await;
  }
  observe(job, "buildImage", start);

  // Pushing image
  begin_stage(
    job,
    "pushImage",
    "Pushing image to remote registry",
  )
  .await;
  let start = Instant::now();
  if let Err(e) = state::docker().push_image(&image).await {
    return fail_stage(
      job,
      "Could not push image to remote registry",
      e,
    )
    .await;
  }
  observe(job, "pushImage", start);

  // Skip the deploy if the environment is configured as an on
  // demand environment. Forced builds continue.
  let build_exists = match builds
    .get_opt(&build_name(
      &job.owner,
      &job.repository,
      job.pull_request_number,
    ))
    .await
  {
    Ok(found) => found.is_some(),
    Err(e) => {
      return fail_stage(
        job,
        "Could not lookup existing build manifest",
        e.into(),
      )
      .await;
    }
  };
  if environment.spec.on_demand && !job.force && !build_exists {
    if job.first_run {
      post_environment_information(job, &environment, &image)
        .await;
    }
    update_build_status(
      job,
      StatusState::Success,
      "Build ready, comment /rebuild to deploy the latest commit",
      "",
    )
    .await;
    return Ok(());
  }

  // Make sure a newer job for this pull request was not admitted
  // while the long-running stages ran. A later push must not be
  // overwritten by this older build.
  if let Err(e) = state::builder()
    .scheduler()
    .schedule_job(&job.key(), job.id)
  {
    return fail_stage(job, "Build outdated", e.into()).await;
  }

  // Delete the old build manifest first when a clean environment
  // was requested (fresh database claim).
  if job.clean {
    begin_stage(
      job,
      "deleteBuildManifest",
      "Deleting old build manifest (clean environment)",
    )
    .await;
    let start = Instant::now();
    if let Err(e) = delete_build_manifest(job, &builds).await {
      return fail_stage(
        job,
        "Could not delete old build manifest",
        e,
      )
      .await;
    }
    observe(job, "deleteBuildManifest", start);
  }

  // Create or update the build manifest
  begin_stage(
    job,
    "applyBuildManifest",
    "Creating build manifest",
  )
  .await;
  let start = Instant::now();
  if let Err(e) = apply_build_manifest(
    job,
    &environment.name_any(),
    &image,
    &builds,
  )
  .await
  {
    return fail_stage(job, "Could not create build manifest", e)
      .await;
  }
  observe(job, "applyBuildManifest", start);

  // Comment the environment information on the pull request
  if job.first_run {
    post_environment_information(job, &environment, &image).await;
  }

  // The build finished successfully
  update_build_status(
    job,
    StatusState::Success,
    "Build finished",
    &format!(
      "https://{}",
      build_url(
        &job.repository,
        job.pull_request_number,
        &config.cluster_domain
      )
    ),
  )
  .await;

  Ok(())
}

async fn delete_build(job: &Job) -> anyhow::Result<()> {
  let start = Instant::now();

  info!(
    job_id = job.id,
    owner = %job.owner,
    repository = %job.repository,
    pull_request_number = job.pull_request_number,
    "deleting build"
  );

  let builds: Api<Build> = Api::namespaced(
    state::kube_client().clone(),
    &core_config().namespace,
  );

  let result = delete_build_manifest(job, &builds).await;
  observe(job, "manifest_deletion", start);

  result
}

/// Create the build manifest, or update it when the spec changed.
async fn apply_build_manifest(
  job: &Job,
  environment: &str,
  image: &str,
  builds: &Api<Build>,
) -> anyhow::Result<()> {
  let name = build_name(
    &job.owner,
    &job.repository,
    job.pull_request_number,
  );

  let build = Build {
    metadata: ObjectMeta {
      name: Some(name.clone()),
      namespace: Some(core_config().namespace.clone()),
      ..Default::default()
    },
    spec: BuildSpec {
      environment: environment.to_string(),
      image: image.to_string(),
      git: GitSpec {
        owner: job.owner.clone(),
        repository: job.repository.clone(),
        r#ref: job.r#ref.clone(),
        pull_request_number: job.pull_request_number,
      },
    },
  };

  match builds
    .get_opt(&name)
    .await
    .context("could not lookup existing build manifest")?
  {
    None => {
      builds
        .create(&PostParams::default(), &build)
        .await
        .context("could not create build manifest")?;
    }
    Some(mut found) if found.spec != build.spec => {
      found.spec = build.spec;
      builds
        .replace(&name, &PostParams::default(), &found)
        .await
        .context("could not update build manifest")?;
    }
    Some(_) => {}
  }

  Ok(())
}

async fn delete_build_manifest(
  job: &Job,
  builds: &Api<Build>,
) -> anyhow::Result<()> {
  let name = build_name(
    &job.owner,
    &job.repository,
    job.pull_request_number,
  );

  match builds.delete(&name, &DeleteParams::default()).await {
    Ok(_) => Ok(()),
    Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
    Err(e) => Err(e).context("could not delete build manifest"),
  }
}

async fn post_environment_information(
  job: &Job,
  environment: &Environment,
  image: &str,
) {
  let body = comment::environment_information(
    job,
    environment,
    image,
    core_config(),
  );
  if let Err(e) = state::github()
    .create_issue_comment(
      &job.owner,
      &job.repository,
      job.pull_request_number,
      &body,
    )
    .await
  {
    warn!(
      job_id = job.id,
      "could not comment environment information | {e:#}"
    );
  }
}

async fn begin_stage(
  job: &Job,
  operation: &str,
  description: &str,
) {
  info!(job_id = job.id, operation, "{}", description.to_lowercase());
  update_build_status(job, StatusState::Pending, description, "")
    .await;
}

async fn fail_stage(
  job: &Job,
  message: &str,
  e: anyhow::Error,
) -> anyhow::Result<()> {
  error!(job_id = job.id, "{} | {e:#}", message.to_lowercase());
  update_build_status(job, StatusState::Error, message, "").await;
  Err(e.context(message.to_string()))
}

async fn update_build_status(
  job: &Job,
  status: StatusState,
  description: &str,
  url: &str,
) {
  if let Err(e) = state::github()
    .create_status(
      &job.owner,
      &job.repository,
      &job.r#ref,
      status,
      description,
      url,
    )
    .await
  {
    warn!(job_id = job.id, "could not update commit status | {e:#}");
  }
}

fn observe(job: &Job, operation: &str, start: Instant) {
  let pull_request = job.pull_request_number.to_string();
  let id = job.id.to_string();
  state::metrics()
    .job_duration_seconds
    .with_label_values(&[
      job.owner.as_str(),
      job.repository.as_str(),
      pull_request.as_str(),
      id.as_str(),
      operation,
    ])
    .observe(start.elapsed().as_secs_f64());
}
