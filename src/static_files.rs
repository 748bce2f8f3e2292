//! Minimal static file serving for the non-API paths
//!
//! The frontend is a directory of prebuilt files; anything the dispatcher
//! does not proxy lands here. Only GET and HEAD are supported.

use crate::error::{error_response, ProxyErrorCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Response, StatusCode};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Serves files from a single root directory
#[derive(Debug)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Serve the file at `path` (the URI path, query already stripped).
    ///
    /// `/` and directory paths resolve to their `index.html`. Paths that try
    /// to climb out of the root are treated as not found.
    pub async fn serve(
        &self,
        method: &Method,
        path: &str,
    ) -> Response<BoxBody<Bytes, hyper::Error>> {
        if method != Method::GET && method != Method::HEAD {
            return error_response(
                ProxyErrorCode::MethodNotAllowed,
                format!("static files only support GET and HEAD, got {}", method),
            );
        }

        let rel = path.trim_start_matches('/');
        if rel.split('/').any(|component| component == "..") {
            warn!(path, "Rejected path traversal attempt");
            return error_response(ProxyErrorCode::NotFound, format!("File not found: {}", path));
        }

        let mut file_path = if rel.is_empty() {
            self.root.join("index.html")
        } else {
            self.root.join(rel)
        };

        if path.ends_with('/') && !rel.is_empty() {
            file_path = file_path.join("index.html");
        } else if let Ok(metadata) = tokio::fs::metadata(&file_path).await {
            if metadata.is_dir() {
                file_path = file_path.join("index.html");
            }
        }

        match tokio::fs::read(&file_path).await {
            Ok(contents) => {
                let mime = mime_guess::from_path(&file_path).first_or_octet_stream();
                debug!(path, file = %file_path.display(), mime = %mime, "Serving static file");

                Response::builder()
                    .status(StatusCode::OK)
                    .header(hyper::header::CONTENT_TYPE, mime.as_ref())
                    .body(
                        Full::new(Bytes::from(contents))
                            .map_err(|never| match never {})
                            .boxed(),
                    )
                    .expect("valid response builder")
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path, "Static file not found");
                error_response(ProxyErrorCode::NotFound, format!("File not found: {}", path))
            }
            Err(e) => {
                warn!(path, error = %e, "Failed to read static file");
                error_response(
                    ProxyErrorCode::InternalError,
                    format!("failed to read file: {}", e),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_bytes(response: Response<BoxBody<Bytes, hyper::Error>>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    fn fixture_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>home</html>").unwrap();
        std::fs::write(dir.path().join("style.css"), "body {}").unwrap();
        std::fs::create_dir(dir.path().join("admin")).unwrap();
        std::fs::write(dir.path().join("admin/index.html"), "<html>admin</html>").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_serves_index_for_root() {
        let dir = fixture_root();
        let files = StaticFiles::new(dir.path());

        let response = files.serve(&Method::GET, "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/html"
        );
        assert_eq!(body_bytes(response).await, "<html>home</html>");
    }

    #[tokio::test]
    async fn test_serves_file_with_content_type() {
        let dir = fixture_root();
        let files = StaticFiles::new(dir.path());

        let response = files.serve(&Method::GET, "/style.css").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("content-type").unwrap(), "text/css");
    }

    #[tokio::test]
    async fn test_serves_directory_index() {
        let dir = fixture_root();
        let files = StaticFiles::new(dir.path());

        let response = files.serve(&Method::GET, "/admin/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, "<html>admin</html>");

        // Also without the trailing slash
        let response = files.serve(&Method::GET, "/admin").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_file_is_404() {
        let dir = fixture_root();
        let files = StaticFiles::new(dir.path());

        let response = files.serve(&Method::GET, "/missing.js").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = fixture_root();
        let files = StaticFiles::new(dir.path().join("admin"));

        let response = files.serve(&Method::GET, "/../index.html").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rejects_non_get_methods() {
        let dir = fixture_root();
        let files = StaticFiles::new(dir.path());

        let response = files.serve(&Method::POST, "/index.html").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = files.serve(&Method::HEAD, "/index.html").await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
