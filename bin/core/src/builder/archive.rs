//! Repacks forge tarball snapshots into docker build contexts.

use std::{io::Read, path::Path};

use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepackError {
  #[error("no dockerfile found in repository")]
  NoDockerfile,
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// Strips the single top-level directory of the archive so the
/// repository files land at the root of the build context, and
/// asserts the dockerfile is present there.
pub fn repack(
  archive: &[u8],
  dockerfile: &str,
) -> Result<Vec<u8>, RepackError> {
  let mut tarball = Archive::new(GzDecoder::new(archive));

  let mut out = Vec::new();
  let mut dockerfile_found = false;

  {
    let mut builder = tar::Builder::new(&mut out);

    for entry in tarball.entries()? {
      let mut entry = entry?;
      let path = entry.path()?.into_owned();

      // Skip the root folder inside the archive
      let mut components = path.components();
      components.next();
      let stripped = components.as_path().to_path_buf();
      if stripped.as_os_str().is_empty() {
        continue;
      }

      if stripped == Path::new(dockerfile) {
        dockerfile_found = true;
      }

      let mut contents = Vec::with_capacity(entry.size() as usize);
      entry.read_to_end(&mut contents)?;

      let mut header = entry.header().clone();
      header.set_path(&stripped)?;
      header.set_cksum();

      builder.append(&header, contents.as_slice())?;
    }

    builder.finish()?;
  }

  if !dockerfile_found {
    return Err(RepackError::NoDockerfile);
  }

  Ok(out)
}

#[cfg(test)]
mod tests {
  use flate2::{Compression, write::GzEncoder};

  use super::*;

  fn archive_with(files: &[(&str, &str)]) -> Vec<u8> {
    let encoder =
      GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (path, contents) in files {
      let mut header = tar::Header::new_gnu();
      header.set_size(contents.len() as u64);
      header.set_mode(0o644);
      header.set_cksum();
      builder
        .append_data(&mut header, path, contents.as_bytes())
        .unwrap();
    }

    builder.into_inner().unwrap().finish().unwrap()
  }

  fn paths(archive: &[u8]) -> Vec<String> {
    Archive::new(archive)
      .entries()
      .unwrap()
      .map(|entry| {
        entry
          .unwrap()
          .path()
          .unwrap()
          .to_string_lossy()
          .into_owned()
      })
      .collect()
  }

  #[test]
  fn strips_the_archive_root_folder() {
    let archive = archive_with(&[
      ("acme-widgets-abc123/Dockerfile", "FROM scratch"),
      ("acme-widgets-abc123/src/main.py", "print('hi')"),
    ]);

    let context = repack(&archive, "Dockerfile").unwrap();

    assert_eq!(paths(&context), vec!["Dockerfile", "src/main.py"]);
  }

  #[test]
  fn keeps_file_contents() {
    let archive = archive_with(&[(
      "root/Dockerfile",
      "FROM scratch\nCOPY . /app\n",
    )]);

    let context = repack(&archive, "Dockerfile").unwrap();

    let mut tarball = Archive::new(context.as_slice());
    let mut entry =
      tarball.entries().unwrap().next().unwrap().unwrap();
    let mut contents = String::new();
    entry.read_to_string(&mut contents).unwrap();
    assert_eq!(contents, "FROM scratch\nCOPY . /app\n");
  }

  #[test]
  fn requires_a_dockerfile_at_the_context_root() {
    let archive = archive_with(&[
      ("root/README.md", "# widgets"),
      ("root/nested/Dockerfile", "FROM scratch"),
    ]);

    assert!(matches!(
      repack(&archive, "Dockerfile"),
      Err(RepackError::NoDockerfile)
    ));
  }
}
