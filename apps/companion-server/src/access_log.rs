use axum::extract::{ConnectInfo, MatchedPath, Request};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use companion_otel::ACCESS_TARGET;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use sha2::Digest as _;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Clone, Debug, PartialEq)]
struct Cfg {
    enabled: bool,
    sample_n: u64,
    remote: bool,
    ua_hash: bool,
    device_hash: bool,
}

impl Cfg {
    fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| get(key).as_deref() == Some("1");
        Self {
            enabled: flag("COMPANION_ACCESS_LOG"),
            sample_n: get("COMPANION_ACCESS_SAMPLE_N")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1)
                .max(1),
            remote: flag("COMPANION_ACCESS_REMOTE"),
            ua_hash: flag("COMPANION_ACCESS_UA_HASH"),
            device_hash: flag("COMPANION_ACCESS_DEVICE_HASH"),
        }
    }
}

static CFG: Lazy<Cfg> = Lazy::new(|| Cfg::from_lookup(|key| std::env::var(key).ok()));

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn sha256_hex(value: &str) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

fn device_id(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == "deviceUUID")
        .map(|(_, value)| value.into_owned())
}

struct Observed {
    method: String,
    path: String,
    remote: Option<String>,
    device: Option<String>,
    headers: HeaderMap,
}

fn record(cfg: &Cfg, seen: &Observed, status: u16, dur_ms: u64) -> Value {
    let mut obj = json!({
        "ts": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "method": seen.method,
        "path": seen.path,
        "status": status,
        "dur_ms": dur_ms,
    });
    if cfg.remote {
        if let Some(ip) = &seen.remote {
            obj["remote"] = Value::String(ip.clone());
        }
    }
    if cfg.ua_hash {
        if let Some(ua) = seen
            .headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
        {
            obj["ua_hash"] = Value::String(sha256_hex(ua));
        }
    }
    if cfg.device_hash {
        if let Some(device) = &seen.device {
            obj["device_hash"] = Value::String(sha256_hex(device));
        }
    }
    obj
}

pub(crate) async fn access_log_mw(req: Request, next: Next) -> Response {
    if !CFG.enabled {
        return next.run(req).await;
    }
    let started = Instant::now();
    let seen = Observed {
        method: req.method().to_string(),
        path: req
            .extensions()
            .get::<MatchedPath>()
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| req.uri().path().to_string()),
        remote: req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|c| c.0.ip().to_string()),
        device: device_id(req.uri().query()),
        headers: req.headers().clone(),
    };
    let res = next.run(req).await;
    let dur_ms = started.elapsed().as_millis() as u64;
    let n = COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    if CFG.sample_n > 1 && n % CFG.sample_n != 0 {
        return res;
    }
    let obj = record(&CFG, &seen, res.status().as_u16(), dur_ms);
    tracing::info!(
        target: ACCESS_TARGET,
        "{}",
        serde_json::to_string(&obj).unwrap_or_else(|_| "{}".into())
    );
    res
}
