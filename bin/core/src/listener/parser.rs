//! GitHub webhook parsing: signature verification and payload
//! deserialization.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use thiserror::Error;

use super::payload::{
  IssueCommentPayload, PingPayload, PullRequestPayload,
};

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Error)]
pub enum ParseError {
  #[error("missing X-GitHub-Event Header")]
  MissingEventHeader,
  #[error("missing X-Hub-Signature Header")]
  MissingSignatureHeader,
  #[error("error parsing payload")]
  InvalidPayload,
  #[error("HMAC verification failed")]
  HmacVerificationFailed,
  #[error("unknown event {0}")]
  UnknownEvent(String),
}

/// A verified webhook delivery.
#[derive(Debug)]
pub enum WebhookEvent {
  Ping(PingPayload),
  PullRequest(Box<PullRequestPayload>),
  IssueComment(Box<IssueCommentPayload>),
}

/// Verifies the delivery signature and parses the payload.
pub fn parse(
  secret: &str,
  headers: &HeaderMap,
  body: &[u8],
) -> Result<WebhookEvent, ParseError> {
  let event = headers
    .get("X-GitHub-Event")
    .and_then(|value| value.to_str().ok())
    .filter(|value| !value.is_empty())
    .ok_or(ParseError::MissingEventHeader)?;

  if body.is_empty() {
    return Err(ParseError::InvalidPayload);
  }

  let signature = headers
    .get("X-Hub-Signature")
    .and_then(|value| value.to_str().ok())
    .filter(|value| !value.is_empty())
    .ok_or(ParseError::MissingSignatureHeader)?;

  verify_signature(secret, signature, body)?;

  match event {
    "ping" => serde_json::from_slice(body)
      .map(WebhookEvent::Ping)
      .map_err(|_| ParseError::InvalidPayload),
    "pull_request" => serde_json::from_slice(body)
      .map(|payload| WebhookEvent::PullRequest(Box::new(payload)))
      .map_err(|_| ParseError::InvalidPayload),
    "issue_comment" => serde_json::from_slice(body)
      .map(|payload| WebhookEvent::IssueComment(Box::new(payload)))
      .map_err(|_| ParseError::InvalidPayload),
    event => Err(ParseError::UnknownEvent(event.to_string())),
  }
}

/// Checks the `sha1=<hex>` signature over the raw body. The digest
/// comparison is constant time.
pub fn verify_signature(
  secret: &str,
  signature: &str,
  body: &[u8],
) -> Result<(), ParseError> {
  let hex_digest = signature
    .strip_prefix("sha1=")
    .ok_or(ParseError::HmacVerificationFailed)?;
  let digest = hex::decode(hex_digest)
    .map_err(|_| ParseError::HmacVerificationFailed)?;

  let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
    .expect("HMAC accepts keys of any size");
  mac.update(body);
  mac
    .verify_slice(&digest)
    .map_err(|_| ParseError::HmacVerificationFailed)
}

#[cfg(test)]
mod tests {
  use axum::http::HeaderValue;

  use super::*;

  fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
      HmacSha1::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
  }

  fn headers(event: &str, signature: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
      "X-GitHub-Event",
      HeaderValue::from_str(event).unwrap(),
    );
    headers.insert(
      "X-Hub-Signature",
      HeaderValue::from_str(signature).unwrap(),
    );
    headers
  }

  #[test]
  fn accepts_a_signed_pull_request_payload() {
    let body = br#"{
      "action": "opened",
      "number": 42,
      "pull_request": {
        "head": { "sha": "abc123" },
        "base": { "repo": { "name": "widgets",
                            "owner": { "login": "acme" } } }
      },
      "sender": { "login": "alice" }
    }"#;

    let event = parse(
      "secret",
      &headers("pull_request", &sign("secret", body)),
      body,
    )
    .unwrap();

    let WebhookEvent::PullRequest(payload) = event else {
      panic!("expected a pull request event");
    };
    assert_eq!(payload.action, "opened");
    assert_eq!(payload.number, 42);
    assert_eq!(payload.pull_request.head.sha, "abc123");
    assert_eq!(payload.pull_request.base.repo.name, "widgets");
    assert_eq!(
      payload.pull_request.base.repo.owner.login,
      "acme"
    );
    assert_eq!(payload.sender.login, "alice");
  }

  #[test]
  fn rejects_bad_signatures() {
    let body = br#"{"hook_id": 1}"#;

    let err = parse(
      "secret",
      &headers("ping", &sign("other secret", body)),
      body,
    )
    .unwrap_err();
    assert!(matches!(err, ParseError::HmacVerificationFailed));

    let err = parse(
      "secret",
      &headers("ping", "not-a-signature"),
      body,
    )
    .unwrap_err();
    assert!(matches!(err, ParseError::HmacVerificationFailed));
  }

  #[test]
  fn rejects_missing_headers_and_unknown_events() {
    let body = br#"{"hook_id": 1}"#;
    let signature = sign("secret", body);

    let mut event_only = HeaderMap::new();
    event_only.insert(
      "X-GitHub-Event",
      HeaderValue::from_static("ping"),
    );
    assert!(matches!(
      parse("secret", &event_only, body),
      Err(ParseError::MissingSignatureHeader)
    ));

    let mut signature_only = HeaderMap::new();
    signature_only.insert(
      "X-Hub-Signature",
      HeaderValue::from_str(&signature).unwrap(),
    );
    assert!(matches!(
      parse("secret", &signature_only, body),
      Err(ParseError::MissingEventHeader)
    ));

    assert!(matches!(
      parse("secret", &headers("ping", &signature), b""),
      Err(ParseError::InvalidPayload)
    ));

    assert!(matches!(
      parse("secret", &headers("release", &signature), body),
      Err(ParseError::UnknownEvent(_))
    ));
  }

  #[test]
  fn comment_payloads_expose_the_pull_request_url() {
    let body = br#"{
      "action": "created",
      "issue": { "pull_request": { "url": "https://api/pr/9" } },
      "comment": { "body": "please /rebuild now" },
      "sender": { "login": "alice" }
    }"#;

    let event = parse(
      "secret",
      &headers("issue_comment", &sign("secret", body)),
      body,
    )
    .unwrap();

    let WebhookEvent::IssueComment(payload) = event else {
      panic!("expected an issue comment event");
    };
    assert_eq!(
      payload.issue.pull_request.as_ref().unwrap().url,
      "https://api/pr/9"
    );
    assert!(payload.comment.body.contains("/rebuild"));
  }
}
