use crate::config::append_publisher_log;
use serde_json::Value;
use std::fmt;

// ── Gateway contract ───────────────────────────────────────────────────

/// Remote publishing failures. Rate-limiting is split out because the
/// orchestrator's retry policy escalates its backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublisherError {
  RateLimited(String),
  Request(String),
}

impl fmt::Display for PublisherError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PublisherError::RateLimited(msg) => write!(f, "rate limited: {msg}"),
      PublisherError::Request(msg) => write!(f, "{msg}"),
    }
  }
}

impl PublisherError {
  pub fn is_rate_limited(&self) -> bool {
    matches!(self, PublisherError::RateLimited(_))
  }
}

#[derive(Debug, Clone)]
pub struct AlbumPhoto {
  pub id: String,
  pub caption: String,
  pub source_url: Option<String>,
}

/// The remote publish/comment/read-reactions boundary. No call retries
/// internally; the orchestrator owns the retry policy.
pub trait PublisherApi {
  fn publish_photo(&self, album_id: &str, image: &[u8], caption: &str)
    -> Result<String, PublisherError>;
  fn comment(&self, post_id: &str, message: &str) -> Result<(), PublisherError>;
  fn reaction_count(&self, post_id: &str, reaction: &str) -> Result<u64, PublisherError>;
  fn album_photos(&self, album_id: &str) -> Result<Vec<AlbumPhoto>, PublisherError>;
  fn download(&self, url: &str) -> Result<Vec<u8>, PublisherError>;
}

// ── Graph client ───────────────────────────────────────────────────────

// Graph error codes that indicate throttling or abuse detection.
const RATE_LIMIT_CODES: [i64; 4] = [4, 17, 32, 613];

pub struct GraphClient {
  api_base: String,
  access_token: String,
  client: reqwest::blocking::Client,
}

impl GraphClient {
  pub fn new(api_base: &str, access_token: &str) -> Self {
    GraphClient {
      api_base: api_base.trim_end_matches('/').to_string(),
      access_token: access_token.to_string(),
      client: reqwest::blocking::Client::new(),
    }
  }

  fn endpoint(&self, path: &str) -> String {
    format!("{}/{}", self.api_base, path.trim_start_matches('/'))
  }

  fn read_response(
    &self,
    label: &str,
    resp: reqwest::blocking::Response,
  ) -> Result<Value, PublisherError> {
    let status = resp.status();
    let body = resp
      .text()
      .map_err(|e| PublisherError::Request(format!("{label}: read response: {e}")))?;
    append_publisher_log(label, &format!("status: {status}\nbody:\n{body}"));
    parse_graph_response(label, status.as_u16(), &body)
  }
}

/// Classify a Graph-style response: 429 and the throttling error codes
/// map to `RateLimited`, everything else non-2xx to `Request`.
pub fn parse_graph_response(label: &str, status: u16, body: &str) -> Result<Value, PublisherError> {
  if status == 429 {
    return Err(PublisherError::RateLimited(format!("{label}: HTTP 429: {body}")));
  }
  let value = serde_json::from_str::<Value>(body).unwrap_or(Value::Null);
  if let Some(error) = value.get("error") {
    let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
    let message = error
      .get("message")
      .and_then(|m| m.as_str())
      .unwrap_or(body)
      .to_string();
    if RATE_LIMIT_CODES.contains(&code) {
      return Err(PublisherError::RateLimited(format!("{label}: {message} (code {code})")));
    }
    return Err(PublisherError::Request(format!("{label}: {message} (code {code})")));
  }
  if !(200..300).contains(&status) {
    return Err(PublisherError::Request(format!("{label}: HTTP {status}: {body}")));
  }
  if value.is_null() {
    return Err(PublisherError::Request(format!("{label}: unparseable response: {body}")));
  }
  Ok(value)
}

impl PublisherApi for GraphClient {
  fn publish_photo(
    &self,
    album_id: &str,
    image: &[u8],
    caption: &str,
  ) -> Result<String, PublisherError> {
    let url = self.endpoint(&format!("{album_id}/photos"));
    append_publisher_log(
      "Publish request",
      &format!("url: {url}\naccess_token: [redacted]\ncaption:\n{caption}\nimage: {} bytes", image.len()),
    );
    let part = reqwest::blocking::multipart::Part::bytes(image.to_vec())
      .file_name("match.jpg")
      .mime_str("image/jpeg")
      .map_err(|e| PublisherError::Request(format!("publish: build upload: {e}")))?;
    let form = reqwest::blocking::multipart::Form::new()
      .text("caption", caption.to_string())
      .text("access_token", self.access_token.clone())
      .part("source", part);
    let resp = self
      .client
      .post(&url)
      .multipart(form)
      .send()
      .map_err(|e| PublisherError::Request(format!("publish: send: {e}")))?;
    let value = self.read_response("Publish response", resp)?;
    value
      .get("post_id")
      .or_else(|| value.get("id"))
      .and_then(|id| id.as_str())
      .map(|id| id.to_string())
      .ok_or_else(|| PublisherError::Request(format!("publish: response missing post id: {value}")))
  }

  fn comment(&self, post_id: &str, message: &str) -> Result<(), PublisherError> {
    let url = self.endpoint(&format!("{post_id}/comments"));
    append_publisher_log(
      "Comment request",
      &format!("url: {url}\naccess_token: [redacted]\nmessage:\n{message}"),
    );
    let resp = self
      .client
      .post(&url)
      .form(&[("message", message), ("access_token", &self.access_token)])
      .send()
      .map_err(|e| PublisherError::Request(format!("comment: send: {e}")))?;
    self.read_response("Comment response", resp).map(|_| ())
  }

  fn reaction_count(&self, post_id: &str, reaction: &str) -> Result<u64, PublisherError> {
    let url = self.endpoint(&format!("{post_id}/reactions"));
    let reaction_type = reaction.to_ascii_uppercase();
    let resp = self
      .client
      .get(&url)
      .query(&[
        ("type", reaction_type.as_str()),
        ("summary", "total_count"),
        ("limit", "0"),
        ("access_token", &self.access_token),
      ])
      .send()
      .map_err(|e| PublisherError::Request(format!("reactions: send: {e}")))?;
    let value = self.read_response("Reactions response", resp)?;
    value
      .get("summary")
      .and_then(|summary| summary.get("total_count"))
      .and_then(|count| count.as_u64())
      .ok_or_else(|| {
        PublisherError::Request(format!("reactions: response missing summary.total_count: {value}"))
      })
  }

  fn album_photos(&self, album_id: &str) -> Result<Vec<AlbumPhoto>, PublisherError> {
    let mut out = Vec::new();
    let mut next_url = Some(format!(
      "{}?fields=id,name,images&access_token={}",
      self.endpoint(&format!("{album_id}/photos")),
      self.access_token
    ));
    while let Some(url) = next_url {
      let resp = self
        .client
        .get(&url)
        .send()
        .map_err(|e| PublisherError::Request(format!("album photos: send: {e}")))?;
      let value = self.read_response("Album photos response", resp)?;
      if let Some(photos) = value.get("data").and_then(|data| data.as_array()) {
        for photo in photos {
          let Some(id) = photo.get("id").and_then(|id| id.as_str()) else {
            continue;
          };
          let caption = photo
            .get("name")
            .and_then(|name| name.as_str())
            .unwrap_or("")
            .to_string();
          let source_url = photo
            .get("images")
            .and_then(|images| images.as_array())
            .and_then(|images| {
              images
                .iter()
                .max_by_key(|im| im.get("height").and_then(|h| h.as_u64()).unwrap_or(0))
            })
            .and_then(|best| best.get("source").and_then(|s| s.as_str()))
            .map(|s| s.to_string());
          out.push(AlbumPhoto {
            id: id.to_string(),
            caption,
            source_url,
          });
        }
      }
      next_url = value
        .get("paging")
        .and_then(|paging| paging.get("next"))
        .and_then(|next| next.as_str())
        .map(|next| next.to_string());
    }
    Ok(out)
  }

  fn download(&self, url: &str) -> Result<Vec<u8>, PublisherError> {
    let resp = self
      .client
      .get(url)
      .send()
      .map_err(|e| PublisherError::Request(format!("download {url}: send: {e}")))?;
    let status = resp.status();
    if !status.is_success() {
      return Err(PublisherError::Request(format!("download {url}: HTTP {status}")));
    }
    resp
      .bytes()
      .map(|bytes| bytes.to_vec())
      .map_err(|e| PublisherError::Request(format!("download {url}: read: {e}")))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_http_429_is_rate_limited() {
    let err = parse_graph_response("publish", 429, "slow down").unwrap_err();
    assert!(err.is_rate_limited());
  }

  #[test]
  fn test_throttle_error_codes_are_rate_limited() {
    for code in [4, 17, 32, 613] {
      let body = format!("{{\"error\":{{\"message\":\"throttled\",\"code\":{code}}}}}");
      let err = parse_graph_response("publish", 400, &body).unwrap_err();
      assert!(err.is_rate_limited(), "code {code} should be rate limited");
    }
  }

  #[test]
  fn test_other_graph_errors_are_plain_requests() {
    let body = "{\"error\":{\"message\":\"bad param\",\"code\":100}}";
    let err = parse_graph_response("publish", 400, body).unwrap_err();
    assert!(!err.is_rate_limited());
    assert!(err.to_string().contains("bad param"));
  }

  #[test]
  fn test_success_body_parses() {
    let value = parse_graph_response("publish", 200, "{\"id\":\"123_456\"}").unwrap();
    assert_eq!(value["id"].as_str(), Some("123_456"));
  }

  #[test]
  fn test_non_success_without_error_object_fails() {
    let err = parse_graph_response("publish", 500, "{\"oops\":true}").unwrap_err();
    assert!(!err.is_rate_limited());
  }
}
