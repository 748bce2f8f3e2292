//! Fixed CORS policy applied to every response the proxy sends
//!
//! The frontend is served from the proxy's own origin, but during development
//! it may also be opened from `file://` or another dev server, so the policy
//! is wide open. Headers are inserted, not appended: a value the backend
//! already set is replaced, so each header appears exactly once.

use http_body_util::{combinators::BoxBody, BodyExt, Empty};
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderValue};
use hyper::{Response, StatusCode};

const ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization, X-Requested-With";

/// Insert the CORS headers into a response header map
pub fn apply(headers: &mut HeaderMap) {
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        "Access-Control-Allow-Credentials",
        HeaderValue::from_static("true"),
    );
}

/// Build the response for a CORS preflight request: HTTP 200, the CORS
/// headers, and an empty body. Preflights never reach the forwarder or the
/// static handler.
pub fn preflight_response() -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
        .expect("valid response builder");
    apply(response.headers_mut());
    response
}
