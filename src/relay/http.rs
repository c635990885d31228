//! HTTP surface of the relay bridge.
//!
//! Serves the snapshot and proxy endpoints consumed by the dashboard:
//!
//! - `GET /latest.json` - cached aggregate, for initial paint
//! - `GET /discovery.json` - upstream channel list with overrides merged
//! - `GET /{channel}/historical.json` - proxied recent history
//! - `GET /minute` - server-sent events, one frame per aggregate tick
//!
//! Proxy failures answer 500 with an `{"error": …}` body; the caller
//! decides its fallback.

use std::convert::Infallible;
use std::net::SocketAddr;

use futures_util::stream;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Bytes, Frame};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::{RelayBridge, RelayError};

type Body = BoxBody<Bytes, Infallible>;

/// Routed meaning of a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Latest,
    Discovery,
    Minute,
    Health,
    Historical(String),
    NotFound,
}

fn route(path: &str) -> Route {
    match path {
        "/latest.json" => Route::Latest,
        "/discovery.json" => Route::Discovery,
        "/minute" => Route::Minute,
        "/health" | "/healthz" => Route::Health,
        _ => match path.strip_prefix('/').and_then(|p| p.split_once('/')) {
            Some((channel, "historical.json")) if !channel.is_empty() => {
                Route::Historical(channel.to_string())
            }
            _ => Route::NotFound,
        },
    }
}

/// Bind the relay endpoints and serve until the runtime shuts down.
pub fn run_server(listen_addr: String, bridge: RelayBridge) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr: SocketAddr = match listen_addr.parse() {
            Ok(addr) => addr,
            Err(e) => {
                error!(%listen_addr, error = %e, "invalid relay listen address");
                return;
            }
        };
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(%addr, error = %e, "relay server failed to bind");
                return;
            }
        };
        info!(%addr, "relay server listening");
        serve(listener, bridge).await;
    })
}

/// Accept loop, factored out so tests can bind an ephemeral port.
pub(crate) async fn serve(listener: TcpListener, bridge: RelayBridge) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "relay accept failed");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let bridge = bridge.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let bridge = bridge.clone();
                async move { Ok::<_, Infallible>(handle_request(req, &bridge).await) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                warn!(error = %e, "relay connection error");
            }
        });
    }
}

async fn handle_request(req: Request<hyper::body::Incoming>, bridge: &RelayBridge) -> Response<Body> {
    match route(req.uri().path()) {
        Route::Latest => json_response(StatusCode::OK, bridge.latest()),
        Route::Discovery => match bridge.discovery().await {
            Ok(merged) => json_response(StatusCode::OK, merged),
            Err(e) => fetch_failure(e),
        },
        Route::Historical(channel) => match bridge.historical(&channel).await {
            Ok((content_type, body)) => Response::builder()
                .status(StatusCode::OK)
                .header(
                    "Content-Type",
                    content_type.as_deref().unwrap_or("application/json; charset=utf-8"),
                )
                .body(Full::new(body).boxed())
                .expect("static response parts"),
            Err(e) => fetch_failure(e),
        },
        Route::Minute => sse_response(bridge.subscribe()),
        Route::Health => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain")
            .body(Full::new(Bytes::from("OK")).boxed())
            .expect("static response parts"),
        Route::NotFound => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("Content-Type", "text/plain")
            .body(Full::new(Bytes::from("Not Found")).boxed())
            .expect("static response parts"),
    }
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json; charset=utf-8")
        .body(Full::new(Bytes::from(value.to_string())).boxed())
        .expect("static response parts")
}

fn fetch_failure(err: RelayError) -> Response<Body> {
    error!(error = %err, "proxied fetch failed");
    json_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        serde_json::json!({ "error": err.to_string() }),
    )
}

/// Stream aggregate ticks as server-sent events.
///
/// A consumer that falls behind the topic buffer skips the missed ticks
/// and resumes from the oldest retained one.
fn sse_response(rx: broadcast::Receiver<serde_json::Value>) -> Response<Body> {
    let frames = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(value) => {
                    let frame = Frame::data(Bytes::from(format!("data: {}\n\n", value)));
                    return Some((Ok::<_, Infallible>(frame), rx));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "slow realtime consumer missed ticks");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .body(BodyExt::boxed(StreamBody::new(frames)))
        .expect("static response parts")
}
