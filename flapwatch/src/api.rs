// flapwatch/src/api.rs
//
// HTTP exposition API.
//
// Endpoints (GET only):
//   /capabilities              — version + engine settings
//   /flaps/active              — active flaps with path history
//   /flaps/active/compact      — active flaps, counters and timestamps only
//   /flaps/prefix/<prefix>     — one tracked prefix, paths grouped by first AS
//   /flaps/metrics             — {ActiveFlapCount, ActiveFlapTotalPathChangeCount}
//   /flaps/metrics/prometheus  — text exposition
//
// Every handler takes a snapshot from the engine first; no engine lock is
// held while a body is serialized or written. A serialization failure is the
// only path to a 500.
//
// The server speaks just enough HTTP/1.1 for scrapers and dashboards: one
// request per connection, `Connection: close`. Put a reverse proxy in front
// for TLS or auth.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::ingest::queue::UpdateQueue;
use crate::state::engine::FlapEngine;

// Longest request line / header line we read before giving up.
const MAX_LINE: usize = 8 * 1024;
const MAX_HEADERS: usize = 100;

// Everything after this is the prefix, slash included: /flaps/prefix/10.0.0.0/24
const PREFIX_ROUTE: &str = "/flaps/prefix/";

// ── Responses ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status:       u16,
    pub content_type: &'static str,
    pub body:         Vec<u8>,
}

impl Response {
    fn text(status: u16, body: impl Into<String>) -> Self {
        Self { status, content_type: "text/plain; charset=utf-8", body: body.into().into_bytes() }
    }

    fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self { status: 200, content_type: "application/json", body },
            Err(e) => {
                error!("Failed to serialize API response: {}", e);
                Self::text(500, "internal server error")
            }
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            _   => "Internal Server Error",
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len()
        );
        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Capabilities<'a> {
    version:  &'static str,
    settings: &'a EngineConfig,
}

// ── Server ────────────────────────────────────────────────────────────────────

pub struct ApiServer {
    engine: Arc<FlapEngine>,
    queue:  Arc<UpdateQueue>,
    addr:   SocketAddr,
}

impl ApiServer {
    pub fn new(engine: Arc<FlapEngine>, queue: Arc<UpdateQueue>, addr: SocketAddr) -> Self {
        Self { engine, queue, addr }
    }

    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("HTTP API listening on {}", self.addr);
        self.accept_loop(listener).await
    }

    pub async fn accept_loop(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let srv = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = srv.handle_connection(stream).await {
                    warn!("API connection error from {}: {}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader).take(((MAX_HEADERS + 1) * MAX_LINE) as u64);

        let mut request_line = String::new();
        if reader.read_line(&mut request_line).await? == 0 {
            return Ok(());
        }

        // Drain headers; bodies are never needed for GET.
        for _ in 0..MAX_HEADERS {
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 || line.trim().is_empty() {
                break;
            }
        }

        let response = self.route(request_line.trim_end());
        debug!(request = %request_line.trim_end(), status = response.status, "API request");
        writer.write_all(&response.to_bytes()).await?;
        writer.shutdown().await?;
        Ok(())
    }

    /// Map a request line (`GET /flaps/active HTTP/1.1`) to a response.
    pub fn route(&self, request_line: &str) -> Response {
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
            return Response::text(400, "bad request");
        };
        if method != "GET" {
            return Response::text(405, "method not allowed");
        }
        let path = target.split('?').next().unwrap_or(target);

        match path {
            "/capabilities" => Response::json(&Capabilities {
                version:  env!("CARGO_PKG_VERSION"),
                settings: self.engine.config(),
            }),
            "/flaps/active"         => Response::json(&self.engine.active_flaps()),
            "/flaps/active/compact" => Response::json(&self.engine.active_flaps_compact()),
            "/flaps/metrics"        => Response::json(&self.engine.metrics()),
            _ if path.starts_with(PREFIX_ROUTE) => {
                match self.engine.lookup(&path[PREFIX_ROUTE.len()..]) {
                    Some(report) => Response::json(&report),
                    None         => Response::text(404, "prefix not tracked"),
                }
            }
            "/flaps/metrics/prometheus" => {
                let flaps = self.engine.metrics();
                let body = self.engine.metrics.prometheus_text(
                    &flaps,
                    self.engine.tracked_prefixes(),
                    self.queue.len(),
                );
                Response {
                    status:       200,
                    content_type: "text/plain; version=0.0.4",
                    body:         body.into_bytes(),
                }
            }
            _ => Response::text(404, "not found"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::UpdateEvent;
    use crate::metrics::EngineMetrics;

    fn server() -> Arc<ApiServer> {
        let cfg = EngineConfig { notify_threshold: 1, ..Default::default() };
        let engine = Arc::new(FlapEngine::new(cfg, EngineMetrics::new()));
        engine.apply_at(&UpdateEvent::announce("192.0.2.0/24", vec![65001, 65002]), 100);
        engine.apply_at(&UpdateEvent::announce("192.0.2.0/24", vec![65001, 65003]), 130);
        engine.apply_at(&UpdateEvent::announce("198.51.100.0/24", vec![65001]), 130);

        let queue = Arc::new(UpdateQueue::new(100));
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        Arc::new(ApiServer::new(engine, queue, addr))
    }

    fn body_json(r: &Response) -> serde_json::Value {
        serde_json::from_slice(&r.body).unwrap()
    }

    #[test]
    fn active_flaps_include_paths() {
        let r = server().route("GET /flaps/active HTTP/1.1");
        assert_eq!(r.status, 200);
        assert_eq!(r.content_type, "application/json");
        assert_eq!(
            body_json(&r),
            serde_json::json!([{
                "Prefix": "192.0.2.0/24",
                "Paths": [{"Asn": [65001, 65002]}, {"Asn": [65001, 65003]}],
                "FirstSeen": 100,
                "LastSeen": 130,
                "TotalCount": 1,
            }])
        );
    }

    #[test]
    fn compact_flaps_omit_paths() {
        let r = server().route("GET /flaps/active/compact HTTP/1.1");
        assert_eq!(
            body_json(&r),
            serde_json::json!([{
                "Prefix": "192.0.2.0/24",
                "FirstSeen": 100,
                "LastSeen": 130,
                "TotalCount": 1,
            }])
        );
    }

    #[test]
    fn metrics_json_and_text_agree() {
        let srv = server();
        let json = body_json(&srv.route("GET /flaps/metrics HTTP/1.1"));
        assert_eq!(json, serde_json::json!({"ActiveFlapCount": 1, "ActiveFlapTotalPathChangeCount": 1}));

        let text = srv.route("GET /flaps/metrics/prometheus HTTP/1.1");
        assert_eq!(text.content_type, "text/plain; version=0.0.4");
        let body = String::from_utf8(text.body).unwrap();
        assert!(body.contains("\nactive_flap_count 1\n"));
        assert!(body.contains("\nactive_flap_route_change_count 1\n"));
        assert!(body.contains("\nflapwatch_tracked_prefixes 2\n"));
    }

    #[test]
    fn prefix_lookup_groups_paths_by_first_asn() {
        let srv = server();
        let r = srv.route("GET /flaps/prefix/192.0.2.0/24 HTTP/1.1");
        assert_eq!(r.status, 200);
        assert_eq!(
            body_json(&r),
            serde_json::json!({
                "Prefix": "192.0.2.0/24",
                "Active": true,
                "FirstSeen": 100,
                "LastSeen": 130,
                "TotalCount": 1,
                "PathsByFirstAsn": {"65001": [{"Asn": [65001, 65002]}, {"Asn": [65001, 65003]}]},
            })
        );

        let quiet = body_json(&srv.route("GET /flaps/prefix/198.51.100.0/24 HTTP/1.1"));
        assert_eq!(quiet["Active"], false);
        assert_eq!(srv.route("GET /flaps/prefix/203.0.113.0/24 HTTP/1.1").status, 404);
        assert_eq!(srv.route("GET /flaps/prefix/ HTTP/1.1").status, 404);
    }

    #[test]
    fn capabilities_report_settings() {
        let json = body_json(&server().route("GET /capabilities?pretty HTTP/1.1"));
        assert_eq!(json["Version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(json["Settings"]["notify_threshold"], 1);
        assert_eq!(json["Settings"]["snapshot_mode"], "deep");
    }

    #[test]
    fn unknown_paths_and_methods() {
        let srv = server();
        assert_eq!(srv.route("GET /nope HTTP/1.1").status, 404);
        assert_eq!(srv.route("POST /flaps/active HTTP/1.1").status, 405);
        assert_eq!(srv.route("").status, 400);
    }

    #[test]
    fn response_framing() {
        let bytes = Response::text(404, "not found").to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Length: 9\r\n"));
        assert!(text.ends_with("\r\n\r\nnot found"));
    }

    #[tokio::test]
    async fn serves_over_tcp() {
        let srv = server();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(Arc::clone(&srv).accept_loop(listener));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /flaps/metrics HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();

        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(raw.ends_with(r#"{"ActiveFlapCount":1,"ActiveFlapTotalPathChangeCount":1}"#));
    }
}
