use crate::config::Config;
use crate::cors;
use crate::error::{error_response, ProxyErrorCode};
use crate::forward::{ForwardError, RequestForwarder};
use crate::static_files::StaticFiles;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// The proxy server: accepts connections and dispatches each request to the
/// forwarder (API prefix), the static handler (everything else), or the CORS
/// preflight short-circuit (OPTIONS).
#[derive(Debug)]
pub struct ProxyServer {
    listener: TcpListener,
    config: Arc<Config>,
    forwarder: Arc<RequestForwarder>,
    static_files: Arc<StaticFiles>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ProxyServer {
    /// Bind the listening socket. A port that cannot be bound is fatal and
    /// reported before any request handling begins.
    pub async fn bind(
        config: Arc<Config>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bind address: {}", e))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;

        let forwarder = Arc::new(RequestForwarder::new(&config.backend, &config.server));
        let static_files = Arc::new(StaticFiles::new(config.server.static_root.clone()));

        Ok(Self {
            listener,
            config,
            forwarder,
            static_files,
            shutdown_rx,
        })
    }

    /// The address the listener actually bound
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown is signalled. Each connection is
    /// handled on its own task; a slow backend only stalls the connections
    /// currently proxying.
    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            listener,
            config,
            forwarder,
            static_files,
            mut shutdown_rx,
        } = self;

        info!(
            addr = %listener.local_addr()?,
            api_prefix = %config.server.api_prefix,
            backend = %config.backend.base_url(),
            "Proxy server listening"
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let config = Arc::clone(&config);
                            let forwarder = Arc::clone(&forwarder);
                            let static_files = Arc::clone(&static_files);

                            tokio::spawn(async move {
                                if let Err(e) =
                                    handle_connection(stream, addr, config, forwarder, static_files).await
                                {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Proxy server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    config: Arc<Config>,
    forwarder: Arc<RequestForwarder>,
    static_files: Arc<StaticFiles>,
) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let config = Arc::clone(&config);
        let forwarder = Arc::clone(&forwarder);
        let static_files = Arc::clone(&static_files);
        async move { handle_request(req, config, forwarder, static_files, addr).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

/// Classify and dispatch one request. Every response leaving here carries
/// the CORS headers exactly once.
async fn handle_request(
    req: Request<Incoming>,
    config: Arc<Config>,
    forwarder: Arc<RequestForwarder>,
    static_files: Arc<StaticFiles>,
    client_addr: SocketAddr,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    // CORS preflight short-circuits before either handler
    if req.method() == Method::OPTIONS {
        debug!(client = %client_addr, path = %req.uri().path(), "CORS preflight");
        return Ok(cors::preflight_response());
    }

    let path = req.uri().path().to_string();

    let mut response = if path.starts_with(&config.server.api_prefix) {
        match forwarder.forward(req, client_addr).await {
            Ok(response) => response,
            Err(e @ ForwardError::BadGateway(_)) => {
                error_response(ProxyErrorCode::BadGateway, e.to_string())
            }
            Err(e) => error_response(ProxyErrorCode::InternalError, e.to_string()),
        }
    } else {
        let method = req.method().clone();
        static_files.serve(&method, &path).await
    };

    cors::apply(response.headers_mut());
    Ok(response)
}
