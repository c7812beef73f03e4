//! Protocol types for client-daemon communication.
//!
//! A client opens the Unix socket, writes one JSON object naming the
//! credential it wants and reads until the daemon closes the connection:
//!
//! ```text
//! client -> daemon   {"Account":"me@example.com","Service":"smtp.example.com"}
//! daemon -> client   <raw secret bytes>, then EOF
//! ```
//!
//! There is no response envelope. Any failure (malformed request, unknown
//! credential, keychain error) is reported by closing the connection without
//! writing a single byte.

use std::fmt;

use serde::de::{IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default upper bound on the size of an encoded request.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 64 * 1024;

/// A request for the secret stored under `(service, account)`.
///
/// Field names on the wire are `Account` and `Service`, matched without
/// regard to ASCII case. When a field appears more than once the last value
/// wins. Unknown fields are ignored, and missing or `null` fields decode as
/// empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Request {
    #[serde(rename = "Account")]
    account: String,

    #[serde(rename = "Service")]
    service: String,
}

impl<'de> Deserialize<'de> for Request {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(RequestVisitor)
    }
}

struct RequestVisitor;

impl<'de> Visitor<'de> for RequestVisitor {
    type Value = Request;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an object with Account and Service fields")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Request, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut request = Request::new(String::new(), String::new());
        while let Some(key) = map.next_key::<String>()? {
            let slot = if key.eq_ignore_ascii_case("account") {
                &mut request.account
            } else if key.eq_ignore_ascii_case("service") {
                &mut request.service
            } else {
                map.next_value::<IgnoredAny>()?;
                continue;
            };
            // null leaves the field as it was
            if let Some(value) = map.next_value::<Option<String>>()? {
                *slot = value;
            }
        }
        Ok(request)
    }
}

impl Request {
    /// Create a request for the given account and service.
    pub fn new(account: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            service: service.into(),
        }
    }

    /// The account half of the selector.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// The service half of the selector.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Derive the canonical cache key for this request.
    ///
    /// The key is the JSON encoding of the request with fields in declaration
    /// order, so two requests with equal fields always share a key no matter
    /// how their fields were ordered or cased on the wire.
    ///
    /// # Example
    ///
    /// ```
    /// use passage_core::protocol::Request;
    ///
    /// let key = Request::new("name", "svc").cache_key().unwrap();
    /// assert_eq!(key.as_bytes(), br#"{"Account":"name","Service":"svc"}"#);
    /// ```
    pub fn cache_key(&self) -> Result<CacheKey, ProtocolError> {
        Ok(CacheKey(serde_json::to_vec(self)?))
    }

    /// Serialize the request for sending to the daemon.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Try to decode one request from the start of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` holds only a prefix of a request and more
    /// bytes are needed. Bytes following a complete object are ignored.
    pub fn decode_prefix(buf: &[u8]) -> Result<Option<Self>, ProtocolError> {
        let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<Self>();
        match stream.next() {
            None => Ok(None),
            Some(Ok(request)) => Ok(Some(request)),
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(ProtocolError::Serialization(e)),
        }
    }
}

/// Canonical byte encoding of a [`Request`], used as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Vec<u8>);

impl CacheKey {
    /// The canonical bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Errors that can occur while reading or encoding a request.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload is not a valid request object.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read from the socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client closed the connection before sending anything.
    #[error("connection closed")]
    ConnectionClosed,

    /// The client closed the connection in the middle of a request.
    #[error("connection closed mid-request after {0} bytes")]
    Truncated(usize),

    /// The request exceeded the size limit.
    #[error("request exceeds {0} bytes")]
    TooLarge(usize),
}

/// Read exactly one request from `reader`.
///
/// Reading stops as soon as a complete JSON object has arrived, so the client
/// does not have to half-close its side of the connection. Requests longer
/// than `max_len` bytes are rejected before they are buffered.
pub async fn read_request<R>(reader: &mut R, max_len: usize) -> Result<Request, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(256);
    let mut chunk = [0u8; 1024];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            if buf.iter().all(u8::is_ascii_whitespace) {
                return Err(ProtocolError::ConnectionClosed);
            }
            // Surface a syntax error in what did arrive before calling it truncated
            return match Request::decode_prefix(&buf)? {
                Some(request) => Ok(request),
                None => Err(ProtocolError::Truncated(buf.len())),
            };
        }
        if buf.len() + n > max_len {
            return Err(ProtocolError::TooLarge(max_len));
        }
        let first = buf.is_empty();
        buf.extend_from_slice(&chunk[..n]);

        // An object can only complete on a closing brace
        if first || chunk[..n].contains(&b'}') {
            if let Some(request) = Request::decode_prefix(&buf)? {
                return Ok(request);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn cache_key_matches_wire_encoding() {
        let key = Request::new("name", "svc").cache_key().unwrap();
        assert_eq!(key.as_bytes(), br#"{"Account":"name","Service":"svc"}"#);
    }

    #[test]
    fn cache_key_ignores_field_order_on_the_wire() {
        let a = Request::decode_prefix(br#"{"Account":"a","Service":"b"}"#)
            .unwrap()
            .unwrap();
        let b = Request::decode_prefix(br#"{"Service":"b","Account":"a"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cache_key().unwrap(), b.cache_key().unwrap());
    }

    #[test]
    fn cache_key_differs_for_swapped_values() {
        let a = Request::new("x", "y").cache_key().unwrap();
        let b = Request::new("y", "x").cache_key().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn decode_accepts_lowercase_fields() {
        let request = Request::decode_prefix(br#"{"account":"a","service":"b"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(request.account(), "a");
        assert_eq!(request.service(), "b");
    }

    #[test]
    fn decode_matches_field_names_case_insensitively() {
        for payload in [
            &br#"{"ACCOUNT":"a","SERVICE":"b"}"#[..],
            &br#"{"aCcOuNt":"a","sErViCe":"b"}"#[..],
        ] {
            let request = Request::decode_prefix(payload).unwrap().unwrap();
            assert_eq!(request, Request::new("a", "b"));
        }
    }

    #[test]
    fn decode_keeps_last_duplicate_field() {
        let request = Request::decode_prefix(br#"{"Account":"a","account":"b","Service":"s"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(request, Request::new("b", "s"));
    }

    #[test]
    fn decode_null_field_is_empty() {
        let request = Request::decode_prefix(br#"{"Account":null,"Service":"s"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(request, Request::new("", "s"));
    }

    #[test]
    fn decode_defaults_missing_fields() {
        let request = Request::decode_prefix(br#"{"Service":"b"}"#).unwrap().unwrap();
        assert_eq!(request.account(), "");
        assert_eq!(request.service(), "b");
    }

    #[test]
    fn decode_ignores_unknown_fields_and_trailing_bytes() {
        let request = Request::decode_prefix(br#"{"Account":"a","Service":"b","Extra":1} junk"#)
            .unwrap()
            .unwrap();
        assert_eq!(request, Request::new("a", "b"));
    }

    #[test]
    fn decode_partial_object_needs_more() {
        assert!(Request::decode_prefix(br#"{"Account":"a","Ser"#)
            .unwrap()
            .is_none());
        assert!(Request::decode_prefix(b"  ").unwrap().is_none());
    }

    #[test]
    fn decode_rejects_non_object() {
        assert!(Request::decode_prefix(b"not valid json").is_err());
        assert!(Request::decode_prefix(br#""just a string""#).is_err());
        assert!(Request::decode_prefix(br#"{"Account":42}"#).is_err());
    }

    #[test]
    fn to_json_roundtrip() {
        let request = Request::new("me", "imap");
        let json = request.to_json().unwrap();
        let parsed = Request::decode_prefix(json.as_bytes()).unwrap().unwrap();
        assert_eq!(parsed, request);
    }

    #[tokio::test]
    async fn read_request_without_eof() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(br#"{"Account":"a","#)
            .await
            .unwrap();
        let reader = tokio::spawn(async move {
            read_request(&mut server, DEFAULT_MAX_REQUEST_BYTES).await
        });
        client.write_all(br#""Service":"b"}"#).await.unwrap();

        // The client keeps its side open; decoding must not wait for EOF.
        let request = reader.await.unwrap().unwrap();
        assert_eq!(request, Request::new("a", "b"));
        drop(client);
    }

    #[tokio::test]
    async fn read_request_empty_connection() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let err = read_request(&mut server, DEFAULT_MAX_REQUEST_BYTES)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }

    #[tokio::test]
    async fn read_request_truncated() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(br#"{"Account":"#).await.unwrap();
        drop(client);
        let err = read_request(&mut server, DEFAULT_MAX_REQUEST_BYTES)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated(11)));
    }

    #[tokio::test]
    async fn read_request_rejects_complete_object_over_limit() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let payload = format!(r#"{{"Account":"{}","Service":"b"}}"#, "a".repeat(40));
        client.write_all(payload.as_bytes()).await.unwrap();
        let err = read_request(&mut server, 32).await.unwrap_err();
        assert!(matches!(err, ProtocolError::TooLarge(32)));
    }

    #[tokio::test]
    async fn read_request_accepts_object_at_limit() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let payload = br#"{"Account":"a","Service":"b"}"#;
        client.write_all(payload).await.unwrap();
        let request = read_request(&mut server, payload.len()).await.unwrap();
        assert_eq!(request, Request::new("a", "b"));
    }

    #[tokio::test]
    async fn read_request_byte_at_a_time() {
        let (mut client, mut server) = tokio::io::duplex(1);
        let writer = tokio::spawn(async move {
            for byte in br#"{"Account":"a","Service":"b"}"# {
                client.write_all(&[*byte]).await.unwrap();
            }
            client
        });

        let request = read_request(&mut server, DEFAULT_MAX_REQUEST_BYTES)
            .await
            .unwrap();
        assert_eq!(request, Request::new("a", "b"));
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn read_request_syntax_error_before_eof() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(br#"{"Account":"a""#).await.unwrap();
        let reader = tokio::spawn(async move {
            read_request(&mut server, DEFAULT_MAX_REQUEST_BYTES).await
        });
        client.write_all(b" garbage").await.unwrap();
        drop(client);

        let err = reader.await.unwrap().unwrap_err();
        assert!(matches!(err, ProtocolError::Serialization(_)));
    }

    #[tokio::test]
    async fn read_request_too_large() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let payload = format!(r#"{{"Account":"{}""#, "a".repeat(200));
        client.write_all(payload.as_bytes()).await.unwrap();
        let err = read_request(&mut server, 64).await.unwrap_err();
        assert!(matches!(err, ProtocolError::TooLarge(64)));
    }
}
