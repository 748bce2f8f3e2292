//! Request forwarding to the backend
//!
//! The forwarder owns a pooled HTTP client and rewrites each inbound API
//! request into an equivalent outbound request against the backend, relaying
//! the response back with hop-by-hop headers filtered out.

use crate::config::{BackendConfig, ServerConfig};
use http_body_util::{combinators::BoxBody, BodyExt};
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderName;
use hyper::{Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

/// Error type for a failed forward, mapped to an HTTP error response by the
/// dispatcher
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The backend is unreachable, refused the connection, or timed out
    #[error("Bad Gateway: {0}")]
    BadGateway(String),
    /// Any other failure while building or relaying the request
    #[error("Internal Server Error: {0}")]
    Internal(String),
}

/// Headers that are meaningful only to the proxy's own connection and must
/// not be forwarded to the backend
fn should_forward_request_header(name: &HeaderName) -> bool {
    name != hyper::header::HOST && name != hyper::header::CONNECTION
}

/// Headers the backend's connection handling owns; the proxy re-frames the
/// response itself
fn should_relay_response_header(name: &HeaderName) -> bool {
    name != hyper::header::CONNECTION && name != hyper::header::TRANSFER_ENCODING
}

/// Forwards API requests to the single configured backend
#[derive(Debug)]
pub struct RequestForwarder {
    client: Client<HttpConnector, Incoming>,
    base_url: String,
    target: String,
    timeout: Duration,
}

impl RequestForwarder {
    pub fn new(backend: &BackendConfig, server: &ServerConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            base_url: backend.base_url(),
            target: format!("{}:{}", backend.host, backend.port),
            timeout: server.proxy_timeout(),
        }
    }

    /// Forward an inbound request to the backend and relay its response.
    ///
    /// The path and query are passed through unchanged; the body is streamed
    /// verbatim. Connection-level failures and timeouts map to
    /// [`ForwardError::BadGateway`], everything else to
    /// [`ForwardError::Internal`]. Nothing is retried here.
    pub async fn forward(
        &self,
        req: Request<Incoming>,
        client_addr: SocketAddr,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, ForwardError> {
        let method = req.method().clone();
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let uri = format!("{}{}", self.base_url, path_and_query);

        info!(client = %client_addr, method = %method, path = %path_and_query, "Proxying request");

        let (parts, body) = req.into_parts();
        let mut builder = Request::builder().method(parts.method).uri(&uri);

        // Copy headers, dropping the hop-by-hop ones; repeated headers are
        // appended so their values survive intact
        for (name, value) in parts.headers.iter() {
            if should_forward_request_header(name) {
                builder = builder.header(name, value);
            }
        }

        let outbound = builder.body(body).map_err(|e| {
            error!(client = %client_addr, error = %e, "Failed to build outbound request");
            ForwardError::Internal(format!("failed to build outbound request: {}", e))
        })?;

        let result = tokio::time::timeout(self.timeout, self.client.request(outbound)).await;

        let response = match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_connect() => {
                error!(client = %client_addr, target = %self.target, error = %e, "Failed to connect to backend");
                return Err(ForwardError::BadGateway(format!("{}: {}", self.target, e)));
            }
            Ok(Err(e)) => {
                error!(client = %client_addr, target = %self.target, error = %e, "Backend request failed");
                return Err(ForwardError::Internal(format!(
                    "backend request failed: {}",
                    e
                )));
            }
            Err(_) => {
                error!(
                    client = %client_addr,
                    target = %self.target,
                    timeout_secs = self.timeout.as_secs(),
                    "Backend request timed out"
                );
                return Err(ForwardError::BadGateway(format!(
                    "{}: timed out after {} seconds",
                    self.target,
                    self.timeout.as_secs()
                )));
            }
        };

        debug!(client = %client_addr, status = %response.status(), "Backend responded");

        let (mut parts, body) = response.into_parts();
        parts.headers.remove(hyper::header::CONNECTION);
        parts.headers.remove(hyper::header::TRANSFER_ENCODING);

        Ok(Response::from_parts(parts, body.boxed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use hyper::header::HeaderValue;
    use hyper::HeaderMap;

    #[test]
    fn test_request_header_filter() {
        assert!(!should_forward_request_header(&hyper::header::HOST));
        assert!(!should_forward_request_header(&hyper::header::CONNECTION));
        assert!(should_forward_request_header(&hyper::header::CONTENT_TYPE));
        assert!(should_forward_request_header(&hyper::header::AUTHORIZATION));
        assert!(should_forward_request_header(&HeaderName::from_static(
            "x-requested-with"
        )));
    }

    #[test]
    fn test_response_header_filter() {
        assert!(!should_relay_response_header(&hyper::header::CONNECTION));
        assert!(!should_relay_response_header(
            &hyper::header::TRANSFER_ENCODING
        ));
        assert!(should_relay_response_header(&hyper::header::CONTENT_TYPE));
        assert!(should_relay_response_header(&hyper::header::SET_COOKIE));
    }

    #[test]
    fn test_repeated_headers_survive_filtering() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));

        let kept: Vec<_> = headers
            .iter()
            .filter(|(name, _)| should_forward_request_header(name))
            .collect();

        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|(name, _)| *name == "set-cookie"));
    }

    #[test]
    fn test_bad_gateway_message_names_target() {
        let config = Config::default();
        let forwarder = RequestForwarder::new(&config.backend, &config.server);

        assert_eq!(forwarder.target, "localhost:5000");
        assert_eq!(forwarder.base_url, "http://localhost:5000");

        let err = ForwardError::BadGateway(format!("{}: connection refused", forwarder.target));
        assert!(err.to_string().contains("Bad Gateway"));
        assert!(err.to_string().contains("localhost:5000"));
    }
}
