use std::process::Stdio;

use tokio::process::Command;

mod output;

pub use output::*;

/// Commands are run directly, and cannot include '&&'
pub async fn run_standard_command(
  command: &str,
  envs: &[(&str, &str)],
) -> CommandOutput {
  let lexed = if let Some(lexed) = shlex::split(command)
    && !lexed.is_empty()
  {
    lexed
  } else {
    return CommandOutput::from_err(std::io::Error::other(
      "Command lexed into empty args",
    ));
  };

  let mut cmd = Command::new(&lexed[0]);

  cmd
    .args(&lexed[1..])
    .envs(envs.iter().copied())
    .kill_on_drop(true)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

  CommandOutput::from(cmd.output().await)
}
