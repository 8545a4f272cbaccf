use std::convert::Infallible;
use std::io::Write as _;
use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, header};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use metrics::{CONTENT_TYPE, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::ServeError;
use crate::selfstat;
use crate::store::MetricStore;

/// Everything a scrape renders: the latest snapshot, the exporter's own
/// metrics and the process gauges.
#[derive(Clone)]
pub struct Exporter {
    store: MetricStore,
    registry: Registry,
}

impl Exporter {
    pub fn new(store: MetricStore, registry: Registry) -> Self {
        Exporter { store, registry }
    }

    pub fn render(&self) -> String {
        let mut encoder = TextEncoder::new();

        self.store.current().report(&mut encoder);
        self.registry.report(&mut encoder);
        selfstat::report(&mut encoder);

        encoder.finish()
    }
}

pub fn handle<B>(req: &Request<B>, exporter: &Exporter) -> Response<Full<Bytes>> {
    if !matches!(req.uri().path(), "/" | "/metrics") {
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::default())
            .expect("Response build failed");
    }

    if req.method() != Method::GET && req.method() != Method::HEAD {
        return Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .header(header::ALLOW, HeaderValue::from_static("GET, HEAD"))
            .body(Full::default())
            .expect("Response build failed");
    }

    let text = exporter.render();

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, CONTENT_TYPE);

    let body = if should_compress(req.headers()) {
        match gzip(text.as_bytes()) {
            Ok(compressed) => {
                builder = builder.header(header::CONTENT_ENCODING, "gzip");
                compressed
            }
            Err(err) => {
                warn!(message = "gzip scrape response failed", %err);
                Bytes::from(text)
            }
        }
    } else {
        Bytes::from(text)
    };

    builder
        .body(Full::new(body))
        .expect("Response build failed") // error should never happened
}

fn should_compress(headers: &HeaderMap) -> bool {
    match headers.get(header::ACCEPT_ENCODING) {
        Some(value) => match value.to_str() {
            Ok(value) => value.contains("gzip"),
            Err(_err) => false,
        },
        None => false,
    }
}

fn gzip(data: &[u8]) -> std::io::Result<Bytes> {
    let mut encoder =
        flate2::write::GzEncoder::new(BytesMut::new().writer(), flate2::Compression::default());
    encoder.write_all(data)?;

    Ok(encoder.finish()?.into_inner().freeze())
}

pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServeError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServeError::Bind { addr, source })
}

/// Serve scrapes until `shutdown` is cancelled, connections in flight are
/// shut down gracefully.
pub async fn serve(listener: TcpListener, exporter: Exporter, shutdown: CancellationToken) {
    loop {
        let (stream, peer) = tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,
            result = listener.accept() => match result {
                Ok(conn) => conn,
                Err(err) => {
                    error!(message = "accept new connection failed", %err);

                    continue;
                }
            }
        };

        let exporter = exporter.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let response = handle(&req, &exporter);
                async move { Ok::<_, Infallible>(response) }
            });

            let builder = Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection(TokioIo::new(stream), service);
            tokio::pin!(conn);

            let mut draining = false;
            loop {
                tokio::select! {
                    result = conn.as_mut() => {
                        if let Err(err) = result {
                            trace!(
                                message = "failed to serve http connection",
                                %peer,
                                %err
                            );
                        }

                        break;
                    }
                    _ = shutdown.cancelled(), if !draining => {
                        draining = true;
                        conn.as_mut().graceful_shutdown();
                    }
                }
            }
        });
    }

    info!(message = "http server shutdown successful");
}
