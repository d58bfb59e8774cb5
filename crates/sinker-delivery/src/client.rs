//! HTTP client for webhook delivery with configurable timeouts.
//!
//! Issues one outbound request per attempt. Any HTTP response, success or
//! error status alike, completes the attempt; the status code is recorded by
//! the dispatcher but never branched on here. Only transport failures
//! (refused connections, timeouts, truncated responses) surface as errors.

use std::{collections::HashMap, time::Duration};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use sinker_core::{EventId, HttpMethod};
use tracing::{debug, info_span, warn, Instrument};

use crate::error::{DeliveryError, Result};

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Timeout covering connect, send, and response read per request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("Sinker-Webhook-Delivery/{}", env!("CARGO_PKG_VERSION")),
            max_redirects: 3,
            verify_tls: true,
        }
    }
}

/// Body shapes a stored payload can take on the wire.
///
/// The dispatcher tries to parse the stored payload as JSON and falls back
/// to sending the raw text when parsing fails. The chosen variant decides
/// the Content-Type, overriding any stored header of the same name.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// Payload parsed as JSON, sent as `application/json`.
    Json(serde_json::Value),
    /// Payload that is not valid JSON, sent verbatim as `text/plain`.
    Text(String),
    /// Event was stored without a payload.
    Empty,
}

/// A single delivery attempt ready to go on the wire.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Event being delivered.
    pub event_id: EventId,
    /// Destination URL.
    pub url: String,
    /// HTTP method stored with the event.
    pub method: HttpMethod,
    /// Custom headers stored with the event.
    pub headers: HashMap<String, String>,
    /// Request body derived from the stored payload.
    pub body: RequestBody,
    /// 1-based attempt number, for the delivery span and metadata headers.
    pub attempt: i32,
}

/// Outcome of an attempt that reached the endpoint.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryResponse {
    /// HTTP status the endpoint answered with.
    pub status: u16,
}

/// HTTP client for delivering webhooks to subscriber endpoints.
///
/// Wraps a pooled `reqwest` client so concurrent attempts to the same host
/// reuse connections. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build http client: {e}"))
            })?;

        Ok(Self { client, timeout: config.timeout })
    }

    /// Delivers a webhook and reports the endpoint's status code.
    ///
    /// Returns `Ok` for every HTTP response regardless of status class.
    /// Returns `Err` only when no response arrived: connection failures,
    /// timeouts, or a body that could not be read to completion.
    pub async fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryResponse> {
        let span = info_span!(
            "webhook_delivery",
            event_id = %request.event_id,
            url = %request.url,
            method = %request.method,
            attempt = request.attempt,
        );
        self.execute(request).instrument(span).await
    }

    async fn execute(&self, request: &DeliveryRequest) -> Result<DeliveryResponse> {
        let mut headers = build_headers(request);
        let builder = match request.method {
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
            HttpMethod::Patch => self.client.patch(&request.url),
        };

        // The body variant decides the Content-Type; insert replaces any
        // stored header of the same name so the two cannot disagree.
        let builder = match &request.body {
            RequestBody::Json(value) => {
                headers.insert(
                    reqwest::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                builder.headers(headers).json(value)
            },
            RequestBody::Text(text) => {
                headers.insert(
                    reqwest::header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                );
                builder.headers(headers).body(text.clone())
            },
            RequestBody::Empty => builder.headers(headers),
        };

        let response = builder.send().await.map_err(|e| self.map_transport_error(&e))?;
        let status = response.status().as_u16();
        debug!(status, "endpoint responded");

        // Drain the body so a truncated or corrupt response fails this
        // attempt instead of poisoning the next one on the pooled connection.
        response
            .bytes()
            .await
            .map_err(|e| DeliveryError::network(format!("failed to read response body: {e}")))?;

        Ok(DeliveryResponse { status })
    }

    fn map_transport_error(&self, error: &reqwest::Error) -> DeliveryError {
        if error.is_timeout() {
            DeliveryError::timeout(self.timeout.as_secs())
        } else if error.is_connect() {
            DeliveryError::network(format!("connection failed: {error}"))
        } else {
            DeliveryError::network(error.to_string())
        }
    }
}

/// Builds the outbound header map from the event's stored headers plus
/// delivery metadata.
///
/// Connection-managed headers are dropped so stored values cannot corrupt
/// the transport; headers with names or values the HTTP layer rejects are
/// skipped with a warning rather than failing the attempt.
fn build_headers(request: &DeliveryRequest) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(request.headers.len() + 2);

    for (name, value) in &request.headers {
        if is_managed_header(name) {
            debug!(header = %name, "dropping connection-managed header");
            continue;
        }
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(parsed_name), Ok(parsed_value)) => {
                map.insert(parsed_name, parsed_value);
            },
            _ => warn!(header = %name, "skipping header with invalid name or value"),
        }
    }

    if let Ok(id) = HeaderValue::from_str(&request.event_id.to_string()) {
        map.insert(HeaderName::from_static("x-sinker-event-id"), id);
    }
    map.insert(HeaderName::from_static("x-sinker-attempt"), HeaderValue::from(request.attempt));

    map
}

/// True for headers the HTTP stack must control itself.
fn is_managed_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "content-length"
            | "host"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client() -> DeliveryClient {
        DeliveryClient::new(ClientConfig::default()).expect("default client config builds")
    }

    fn request_to(url: &str) -> DeliveryRequest {
        DeliveryRequest {
            event_id: EventId::new(),
            url: url.to_string(),
            method: HttpMethod::Post,
            headers: HashMap::new(),
            body: RequestBody::Json(serde_json::json!({"order": 42})),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn delivers_json_payload_with_stored_headers() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hooks/orders"))
            .and(matchers::header("x-tenant", "acme"))
            .and(matchers::header("content-type", "application/json"))
            .and(matchers::body_json(serde_json::json!({"order": 42})))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&server)
            .await;

        let mut request = request_to(&format!("{}/hooks/orders", server.uri()));
        request.headers.insert("X-Tenant".to_string(), "acme".to_string());

        let response = client().deliver(&request).await.expect("delivery should succeed");
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn error_statuses_still_count_as_responses() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let response =
            client().deliver(&request_to(&server.uri())).await.expect("500 is a response");
        assert_eq!(response.status, 500);

        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let response =
            client().deliver(&request_to(&server.uri())).await.expect("404 is a response");
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn put_and_patch_use_the_stored_method() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("PUT"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut request = request_to(&server.uri());
        request.method = HttpMethod::Put;
        let response = client().deliver(&request).await.expect("PUT should reach the endpoint");
        assert_eq!(response.status, 204);

        let server = MockServer::start().await;
        Mock::given(matchers::method("PATCH"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let mut request = request_to(&server.uri());
        request.method = HttpMethod::Patch;
        let response = client().deliver(&request).await.expect("PATCH should reach the endpoint");
        assert_eq!(response.status, 202);
    }

    #[tokio::test]
    async fn non_json_payload_is_sent_verbatim_as_text() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::body_string("order=42&status=paid"))
            .and(matchers::header("content-type", "text/plain; charset=utf-8"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut request = request_to(&server.uri());
        request.body = RequestBody::Text("order=42&status=paid".to_string());

        let response = client().deliver(&request).await.expect("text delivery should succeed");
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn metadata_headers_identify_the_event_and_attempt() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut request = request_to(&server.uri());
        request.attempt = 2;
        client().deliver(&request).await.expect("delivery should succeed");

        let received = server.received_requests().await.expect("requests recorded");
        assert_eq!(received.len(), 1);
        let headers = &received[0].headers;
        assert_eq!(
            headers.get("x-sinker-event-id").and_then(|v| v.to_str().ok()),
            Some(request.event_id.to_string().as_str())
        );
        assert_eq!(
            headers.get("x-sinker-attempt").and_then(|v| v.to_str().ok()),
            Some("2")
        );
    }

    #[tokio::test]
    async fn connection_managed_headers_are_dropped() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut request = request_to(&server.uri());
        request.headers.insert("Host".to_string(), "spoofed.example.com".to_string());
        request.headers.insert("Transfer-Encoding".to_string(), "chunked".to_string());
        request.headers.insert("X-Kept".to_string(), "yes".to_string());

        client().deliver(&request).await.expect("delivery should succeed");

        let received = server.received_requests().await.expect("requests recorded");
        let headers = &received[0].headers;
        assert_ne!(
            headers.get("host").and_then(|v| v.to_str().ok()),
            Some("spoofed.example.com")
        );
        assert!(headers.get("transfer-encoding").is_none());
        assert_eq!(headers.get("x-kept").and_then(|v| v.to_str().ok()), Some("yes"));
    }

    #[tokio::test]
    async fn invalid_stored_header_is_skipped_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut request = request_to(&server.uri());
        request.headers.insert("bad header name".to_string(), "value".to_string());
        request.headers.insert("x-newline".to_string(), "bad\nvalue".to_string());

        let response = client().deliver(&request).await.expect("delivery should still succeed");
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn refused_connection_maps_to_network_error() {
        // Port 1 is never listening.
        let request = request_to("http://127.0.0.1:1/webhook");
        let error = client().deliver(&request).await.expect_err("connection should fail");
        assert!(matches!(error, DeliveryError::Network { .. }), "got {error:?}");
    }

    #[tokio::test]
    async fn slow_endpoint_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let config = ClientConfig { timeout: Duration::from_millis(250), ..Default::default() };
        let client = DeliveryClient::new(config).expect("client builds");

        let error = client
            .deliver(&request_to(&server.uri()))
            .await
            .expect_err("request should time out");
        assert!(matches!(error, DeliveryError::Timeout { .. }), "got {error:?}");
    }
}
