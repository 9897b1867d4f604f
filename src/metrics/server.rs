//! Pull endpoint for the exposition format.
//!
//! The server owns a dedicated thread with its own single-threaded tokio
//! runtime, so the blocking device loops never share an executor with it.
//! Binding happens before the thread starts; a port conflict fails startup
//! synchronously.

use crate::metrics::registry::Metrics;
use http::{Method, StatusCode};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use log::{error, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub struct MetricsServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MetricsServer {
    /// Binds the port and starts serving `/metrics` and `/status`.
    pub fn start(metrics: Arc<Metrics>, port: u16) -> std::io::Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_io().build() {
                Ok(runtime) => runtime,
                Err(err) => {
                    error!("Failed to start metrics server runtime caused by {}", err);
                    return;
                }
            };
            runtime.block_on(run_http(metrics, listener, shutdown_rx));
        });

        Ok(MetricsServer {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stops accepting connections and joins the server thread.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

async fn run_http(metrics: Arc<Metrics>, listener: std::net::TcpListener, mut shutdown: oneshot::Receiver<()>) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(err) => {
            error!("Failed to register metrics listener caused by {}", err);
            return;
        }
    };
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let metrics = Arc::clone(&metrics);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = service_fn(move |req: Request<Incoming>| {
                            let metrics = Arc::clone(&metrics);
                            async move { Ok::<_, std::convert::Infallible>(handle_request(&req, &metrics)) }
                        });
                        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                            warn!("Metrics connection error: {}", err);
                        }
                    });
                }
                Err(err) => warn!("Metrics accept error: {}", err),
            }
        }
    }
}

fn handle_request(req: &Request<Incoming>, metrics: &Metrics) -> Response<Full<Bytes>> {
    if req.uri().path() == "/metrics" {
        if req.method() == Method::GET {
            let body = match metrics.encode() {
                Ok(body) => body,
                Err(err) => {
                    warn!("Failed to encode metrics caused by {}", err);
                    return empty_response(StatusCode::INTERNAL_SERVER_ERROR);
                }
            };
            body_response(StatusCode::OK, "text/plain; version=0.0.4", Bytes::from(body))
        } else {
            empty_response(StatusCode::METHOD_NOT_ALLOWED)
        }
    } else if req.uri().path() == "/status" {
        if req.method() == Method::GET {
            body_response(StatusCode::OK, "text/plain", Bytes::from_static(b"OK"))
        } else {
            empty_response(StatusCode::METHOD_NOT_ALLOWED)
        }
    } else {
        empty_response(StatusCode::NOT_FOUND)
    }
}

fn body_response(status: StatusCode, content_type: &str, body: Bytes) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", content_type)
        .body(Full::new(body))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}
