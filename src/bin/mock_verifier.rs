//! Mock access-verification server
//!
//! Answers the verification route with deterministic fixtures for local
//! end-to-end runs of the terminal.
//!
//! Behavior:
//! 1. Listens on configurable port (default 8088)
//! 2. Documents listed in `--unknown` answer 404 PERSON_NOT_FOUND
//! 3. Documents listed in `--expired` answer 403 QR_EXPIRED
//! 4. Documents listed in `--regenerate` answer 409 QR_REQUIRES_REGENERATION
//! 5. Any other document is granted; consecutive grants for the same document
//!    alternate entry and exit
//!
//! Usage:
//!   cargo run --bin mock_verifier -- --port 8088 --unknown 99999 --delay-ms 300

use access_terminal::domain::types::{codes, NormalizedIdentityRequest, ScanAction, Subject};
use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "mock_verifier")]
#[command(about = "Mock access-verification collaborator for local simulation")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "8088")]
    port: u16,

    /// Verification route
    #[arg(long, default_value = "/api/access/verify")]
    path: String,

    /// Artificial response delay (ms)
    #[arg(long, default_value = "0")]
    delay_ms: u64,

    /// Documents answered with PERSON_NOT_FOUND
    #[arg(long, value_delimiter = ',')]
    unknown: Vec<String>,

    /// Documents answered with QR_EXPIRED
    #[arg(long, value_delimiter = ',')]
    expired: Vec<String>,

    /// Documents answered with QR_REQUIRES_REGENERATION
    #[arg(long, value_delimiter = ',')]
    regenerate: Vec<String>,
}

struct Fixtures {
    path: String,
    delay: Duration,
    unknown: FxHashSet<String>,
    expired: FxHashSet<String>,
    regenerate: FxHashSet<String>,
    /// Last recorded action per document
    presence: Mutex<FxHashMap<String, ScanAction>>,
    requests: AtomicU64,
}

impl Fixtures {
    fn from_args(args: &Args) -> Self {
        Self {
            path: args.path.clone(),
            delay: Duration::from_millis(args.delay_ms),
            unknown: args.unknown.iter().cloned().collect(),
            expired: args.expired.iter().cloned().collect(),
            regenerate: args.regenerate.iter().cloned().collect(),
            presence: Mutex::new(FxHashMap::default()),
            requests: AtomicU64::new(0),
        }
    }

    /// Decide the fixture answer for one request
    fn answer(&self, request: &NormalizedIdentityRequest) -> (StatusCode, serde_json::Value) {
        let id = request.document_id.as_str();

        let denial = if self.unknown.contains(id) {
            Some((StatusCode::NOT_FOUND, codes::PERSON_NOT_FOUND, "Persona no encontrada"))
        } else if self.expired.contains(id) {
            Some((StatusCode::FORBIDDEN, codes::QR_EXPIRED, "Código QR expirado"))
        } else if self.regenerate.contains(id) {
            Some((StatusCode::CONFLICT, codes::QR_REQUIRES_REGENERATION, "Debe regenerar su código QR"))
        } else {
            None
        };

        if let Some((status, code, message)) = denial {
            return (
                status,
                serde_json::json!({ "success": false, "message": message, "errorCode": code }),
            );
        }

        let action = {
            let mut presence = self.presence.lock();
            let next = match presence.get(id) {
                Some(ScanAction::Entry) => ScanAction::Exit,
                _ => ScanAction::Entry,
            };
            presence.insert(id.to_string(), next);
            next
        };

        let subject = Subject {
            document_id: Some(id.to_string()),
            name: Some(request.claimed_name.clone().unwrap_or_else(|| format!("Persona {id}"))),
            role: request.declared_role.map(|r| r.as_str().to_string()),
            ..Default::default()
        };
        let message = match action {
            ScanAction::Entry => "Entrada registrada",
            ScanAction::Exit => "Salida registrada",
        };

        (
            StatusCode::OK,
            serde_json::json!({
                "success": true,
                "subject": subject,
                "action": action,
                "message": message,
            }),
        )
    }
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response should not fail")
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    fixtures: Arc<Fixtures>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::POST || req.uri().path() != fixtures.path {
        return Ok(json_response(StatusCode::NOT_FOUND, &serde_json::json!({ "error": "not found" })));
    }

    let terminal = req
        .headers()
        .get("x-terminal-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            eprintln!("[MOCK] Failed to read body: {}", e);
            return Ok(json_response(StatusCode::BAD_REQUEST, &serde_json::json!({ "error": "bad body" })));
        }
    };

    let request: NormalizedIdentityRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("[MOCK] Invalid request JSON: {}", e);
            return Ok(json_response(StatusCode::BAD_REQUEST, &serde_json::json!({ "error": e.to_string() })));
        }
    };

    let n = fixtures.requests.fetch_add(1, Ordering::Relaxed) + 1;
    if !fixtures.delay.is_zero() {
        tokio::time::sleep(fixtures.delay).await;
    }

    let (status, body) = fixtures.answer(&request);
    println!(
        "[MOCK] #{} terminal={} type={} document={} -> {}",
        n,
        terminal,
        request.subject_type,
        request.document_id,
        status.as_u16()
    );
    Ok(json_response(status, &body))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║           Mock Access Verifier                           ║");
    println!("╠══════════════════════════════════════════════════════════╣");
    println!("║ Port:            {:>5}                                   ║", args.port);
    println!("║ Route:           {:<38} ║", args.path);
    println!("║ Delay:           {:>5} ms                                ║", args.delay_ms);
    println!("║ Unknown:         {:>5} documents                         ║", args.unknown.len());
    println!("║ Expired:         {:>5} documents                         ║", args.expired.len());
    println!("║ Regenerate:      {:>5} documents                         ║", args.regenerate.len());
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();

    let fixtures = Arc::new(Fixtures::from_args(&args));
    let listener = TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;
    println!("[MOCK] Waiting for terminal requests...");

    loop {
        let (stream, _peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let fixtures = fixtures.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let fixtures = fixtures.clone();
                async move { handle_request(req, fixtures).await }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                eprintln!("[MOCK] Connection error: {}", e);
            }
        });
    }
}
