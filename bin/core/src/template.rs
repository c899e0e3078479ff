//! Minimal `{{Name}}` substitution over a fixed property bag,
//! used for shared environment values and PR comment link urls.

/// The properties available to templated values. Database fields
/// are empty unless the build has claimed a database.
#[derive(Debug, Clone, Default)]
pub struct BuildProps {
  pub owner: String,
  pub repository: String,
  pub pull_request_number: i64,
  pub image: String,
  pub server_domain: String,
  pub namespace: String,
  pub version: String,

  pub database_name: String,
  pub database_user: String,
  pub database_password: String,
  pub database_host: String,
  pub database_port: String,
}

impl BuildProps {
  fn get(&self, name: &str) -> Option<String> {
    let value = match name {
      "Owner" => self.owner.clone(),
      "Repository" => self.repository.clone(),
      "PullRequestNumber" => self.pull_request_number.to_string(),
      "Image" => self.image.clone(),
      "ServerDomain" => self.server_domain.clone(),
      "Namespace" => self.namespace.clone(),
      "Version" => self.version.clone(),
      "DatabaseName" => self.database_name.clone(),
      "DatabaseUser" => self.database_user.clone(),
      "DatabasePassword" => self.database_password.clone(),
      "DatabaseHost" => self.database_host.clone(),
      "DatabasePort" => self.database_port.clone(),
      _ => return None,
    };
    Some(value)
  }
}

/// Replaces `{{Name}}` tokens with values from the property bag.
/// Unknown tokens are left untouched.
pub fn expand(template: &str, props: &BuildProps) -> String {
  let mut out = String::with_capacity(template.len());
  let mut rest = template;

  while let Some(start) = rest.find("{{") {
    out.push_str(&rest[..start]);
    let after = &rest[start + 2..];
    let Some(end) = after.find("}}") else {
      out.push_str(&rest[start..]);
      return out;
    };
    match props.get(after[..end].trim()) {
      Some(value) => out.push_str(&value),
      // Keep the raw token, including the braces
      None => out.push_str(&rest[start..start + end + 4]),
    }
    rest = &after[end + 2..];
  }

  out.push_str(rest);
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  fn props() -> BuildProps {
    BuildProps {
      owner: "acme".into(),
      repository: "widgets".into(),
      pull_request_number: 42,
      image: "registry/acme/widgets:abc123".into(),
      server_domain: "widgets-42.example.dev".into(),
      namespace: "test-environment-acme-widgets-42".into(),
      version: "abc123".into(),
      database_host: "t-abcdef.databases".into(),
      database_port: "5432".into(),
      ..Default::default()
    }
  }

  #[test]
  fn expands_known_properties() {
    assert_eq!(
      expand(
        "postgres://{{DatabaseHost}}:{{DatabasePort}}",
        &props()
      ),
      "postgres://t-abcdef.databases:5432"
    );
    assert_eq!(
      expand("https://{{ ServerDomain }}/api", &props()),
      "https://widgets-42.example.dev/api"
    );
    assert_eq!(expand("{{PullRequestNumber}}", &props()), "42");
  }

  #[test]
  fn keeps_unknown_tokens() {
    assert_eq!(
      expand("{{Owner}}-{{Unknown}}", &props()),
      "acme-{{Unknown}}"
    );
  }

  #[test]
  fn keeps_unterminated_tokens() {
    assert_eq!(expand("{{Owner", &props()), "{{Owner");
    assert_eq!(expand("plain value", &props()), "plain value");
  }
}
