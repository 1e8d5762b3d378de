//! Proxy server: listener, optional TLS termination, graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, extract::ConnectInfo};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use super::AppState;
use super::router::create_router;
use crate::config::Config;
use crate::mtls::{PeerIdentity, build_tls_config};
use crate::{Error, Result};

/// The running proxy
pub struct ProxyServer {
    config: Config,
    state: Arc<AppState>,
}

impl ProxyServer {
    /// Load all startup material.
    ///
    /// # Errors
    ///
    /// Returns an error if the discovery document, endpoint registry or token
    /// key material cannot be loaded.
    pub async fn new(config: Config) -> Result<Self> {
        let state = Arc::new(AppState::from_config(&config).await?);
        Ok(Self { config, state })
    }

    /// Shared state, for embedding and tests.
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Serve until SIGINT/SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid, the port cannot be bound,
    /// or TLS material cannot be loaded.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        // TLS material is loaded before binding so a bad cert aborts startup
        let tls = if self.config.mtls.tls_enabled() {
            Some(Arc::new(build_tls_config(&self.config.mtls)?))
        } else {
            None
        };

        let app = create_router(Arc::clone(&self.state));
        let listener = TcpListener::bind(addr).await?;

        self.log_banner(tls.is_some());

        match tls {
            Some(tls) => serve_tls(listener, app, tls, self.config.mtls.client_auth_enabled()).await,
            None => axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string())),
        }
    }

    fn log_banner(&self, tls: bool) {
        let scheme = if tls { "https" } else { "http" };
        info!("============================================================");
        info!("ARMORIQ PROXY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, scheme, "Listening");
        info!(endpoints = self.state.registry.len(), "Endpoints registered");
        for endpoint in self.state.registry.list() {
            info!("  /proxy/{} -> {}", endpoint.id, endpoint.base_url);
        }

        if self.config.mtls.client_auth_enabled() {
            info!(
                require_client_cert = self.config.mtls.require_client_cert,
                "Client certificates verified against CA"
            );
        } else {
            info!("Client certificates not requested");
        }

        if self.state.verifier.is_configured() {
            info!(mode = self.state.verifier.mode().as_str(), "Token verification enabled");
        } else {
            warn!("No token key material: every proxied request will fail with 503");
        }
        info!("============================================================");
    }
}

/// Accept loop for TLS: each connection's peer certificate is parsed once and
/// attached, with the remote address, to every request on that connection.
async fn serve_tls(
    listener: TcpListener,
    app: Router,
    tls: Arc<rustls::ServerConfig>,
    client_auth: bool,
) -> Result<()> {
    let acceptor = TlsAcceptor::from(tls);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let (stream, remote) = tokio::select! {
            () = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    debug!(remote = %remote, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let peer = PeerIdentity::from_peer_chain(
                tls_stream.get_ref().1.peer_certificates(),
                client_auth,
            );
            debug!(
                remote = %remote,
                verified = peer.verified,
                subject = ?peer.certificate.as_ref().map(|c| c.display_name.as_str()),
                "TLS connection established"
            );

            let service = hyper::service::service_fn(move |mut req: hyper::Request<Incoming>| {
                req.extensions_mut().insert(peer.clone());
                req.extensions_mut().insert(ConnectInfo(remote));
                app.clone().oneshot(req)
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(tls_stream), service)
                .await
            {
                debug!(remote = %remote, error = %e, "Connection closed with error");
            }
        });
    }

    info!("Listener closed");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
