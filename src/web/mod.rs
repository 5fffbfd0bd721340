//! The keep-alive endpoint. Hosting platforms that put idle processes to sleep
//! ping `/`; `/api/status` reports what the engine is doing.

mod util;

use std::{convert::Infallible, future::Future, io, net::SocketAddr, time::Duration};

use hyper::{
    body::Incoming, server::conn::http1, service::service_fn, Method, Request, Response,
    StatusCode,
};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;

use crate::engine::{Engine, StatusReport};

use self::util::{json_ok, json_response, text_response, Body};

const MAX_BIND_ATTEMPTS: u32 = 5;
const BASE_BACKOFF_MS: u64 = 200;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusPayload {
    version: &'static str,
    #[serde(flatten)]
    status: StatusReport,
}

#[derive(Debug, Serialize)]
struct ErrorPayload<'a> {
    error: &'a str,
}

pub struct KeepAliveServer {
    engine: Engine,
}

impl KeepAliveServer {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Binds `address`, retrying with exponential backoff while the port is
    /// still held by a previous process.
    pub async fn bind(address: SocketAddr) -> io::Result<TcpListener> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match TcpListener::bind(address).await {
                Ok(listener) => return Ok(listener),
                Err(err)
                    if err.kind() == io::ErrorKind::AddrInUse && attempts < MAX_BIND_ATTEMPTS =>
                {
                    let delay = BASE_BACKOFF_MS * 2u64.pow(attempts - 1);
                    log::warn!(
                        "Port {} in use, retrying in {}ms (attempt {}/{})",
                        address.port(),
                        delay,
                        attempts,
                        MAX_BIND_ATTEMPTS
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Accepts connections on `listener` until `shutdown` completes.
    pub async fn serve(self, listener: TcpListener, shutdown: impl Future<Output = ()>) {
        if let Ok(address) = listener.local_addr() {
            log::info!("Keep-alive server listening on http://{}", address);
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                result = listener.accept() => {
                    let stream = match result {
                        Ok((stream, _)) => stream,
                        Err(err) => {
                            log::warn!("Could not accept connection: {err}");
                            continue;
                        }
                    };

                    let engine = self.engine.clone();
                    tokio::spawn(async move {
                        let service = service_fn(move |request: Request<Incoming>| {
                            let response = route(&engine, request.method(), request.uri().path());
                            async move { Ok::<_, Infallible>(response) }
                        });

                        if let Err(err) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            log::debug!("Error serving connection: {err}");
                        }
                    });
                }
                _ = &mut shutdown => {
                    log::debug!("Keep-alive server shutting down");
                    break;
                }
            }
        }
    }
}

fn route(engine: &Engine, method: &Method, path: &str) -> Response<Body> {
    match (method, path) {
        (&Method::GET | &Method::HEAD, "/") => text_response("I'm alive!", StatusCode::OK),
        (&Method::GET, "/api/status") => json_ok(StatusPayload {
            version: env!("CARGO_PKG_VERSION"),
            status: engine.status(),
        }),
        _ => json_response(ErrorPayload { error: "Not found" }, StatusCode::NOT_FOUND),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http_body_util::BodyExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::{
        config::EnforcementPolicy,
        ids::{ChannelId, GuildId},
        platform::InMemoryPlatform,
        store::{MemoryStore, StateStore},
    };

    fn engine() -> Engine {
        let store = Arc::new(MemoryStore::new());
        store.set_lock(GuildId(1), ChannelId(2), "{vc}").unwrap();
        Engine::new(
            Arc::new(InMemoryPlatform::new()),
            store,
            EnforcementPolicy::default(),
        )
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn root_is_alive() {
        let response = route(&engine(), &Method::GET, "/");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "I'm alive!");
    }

    #[tokio::test]
    async fn status_reports_engine_counters() {
        let response = route(&engine(), &Method::GET, "/api/status");
        assert_eq!(response.status(), StatusCode::OK);

        let value: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(value["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(value["lockedChannels"], 1);
        assert_eq!(value["trackedChannels"], 0);
        assert_eq!(value["renamesApplied"], 0);
        assert_eq!(value["renamesFailed"], 0);
    }

    #[tokio::test]
    async fn unknown_paths_are_json_404() {
        let response = route(&engine(), &Method::GET, "/nope");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        insta::assert_snapshot!(body_text(response).await, @r#"{"error":"Not found"}"#);

        let response = route(&engine(), &Method::POST, "/");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn serves_over_tcp() {
        let listener = KeepAliveServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let address = listener.local_addr().unwrap();

        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(KeepAliveServer::new(engine()).serve(listener, async {
            let _ = stopped.await;
        }));

        let mut stream = tokio::net::TcpStream::connect(address).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.ends_with("I'm alive!"), "{response}");

        stop.send(()).unwrap();
        server.await.unwrap();
    }
}
