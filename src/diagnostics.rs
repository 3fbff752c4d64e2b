//! Connectivity diagnostics
//!
//! Checks behind `minerva-diag`: API key formats, provider reachability,
//! the Minerva HTTP and WebSocket endpoints, and the Engine.IO polling
//! handshake of a Socket.IO server (v3 and v4 framing).

use anyhow::{bail, Context, Result};
use futures::{SinkExt, Stream, StreamExt};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::config::ProvidersConfig;
use crate::providers::ProviderKind;
use crate::types::ChatRequest;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const WS_TIMEOUT: Duration = Duration::from_secs(60);
const MISTRAL_MIN_KEY_LEN: usize = 32;
const HUGGINGFACE_HUB: &str = "https://huggingface.co";

// ============================================================================
// API keys
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct KeyStatus {
    pub provider: ProviderKind,
    pub present: bool,
    pub valid_format: bool,
    pub masked: Option<String>,
}

/// Whether a key looks like one the provider issues
pub fn key_format_ok(kind: ProviderKind, key: &str) -> bool {
    let key = key.trim();
    match kind {
        ProviderKind::OpenAi => key.starts_with("sk-") && !key.starts_with("sk-ant-"),
        ProviderKind::Anthropic => key.starts_with("sk-ant-"),
        ProviderKind::HuggingFace => key.starts_with("hf_"),
        ProviderKind::Mistral => {
            key.len() >= MISTRAL_MIN_KEY_LEN && key.chars().all(|c| c.is_ascii_alphanumeric())
        }
        ProviderKind::Simulated => true,
    }
}

/// First and last four characters; short keys are fully hidden
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.trim().chars().collect();
    if chars.len() <= 12 {
        return "*".repeat(chars.len().max(4));
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

pub fn check_keys(providers: &ProvidersConfig) -> Vec<KeyStatus> {
    ProviderKind::REMOTE
        .iter()
        .map(|&kind| {
            let key = providers
                .settings(kind)
                .and_then(|s| s.api_key.as_deref())
                .map(str::trim)
                .filter(|k| !k.is_empty());
            KeyStatus {
                provider: kind,
                present: key.is_some(),
                valid_format: key.map(|k| key_format_ok(kind, k)).unwrap_or(false),
                masked: key.map(mask_key),
            }
        })
        .collect()
}

// ============================================================================
// Provider reachability
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ProviderProbe {
    pub provider: ProviderKind,
    pub url: String,
    pub status: Option<u16>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl ProviderProbe {
    pub fn ok(&self) -> bool {
        matches!(self.status, Some(s) if (200..300).contains(&s))
    }
}

/// Authenticated listing endpoint for a provider
pub fn listing_url(kind: ProviderKind, base_url: Option<&str>) -> String {
    match kind {
        ProviderKind::HuggingFace => {
            format!("{}/api/whoami-v2", base_url.unwrap_or(HUGGINGFACE_HUB).trim_end_matches('/'))
        }
        _ => format!("{}/v1/models", base_url.unwrap_or(kind.default_base_url()).trim_end_matches('/')),
    }
}

/// GET the provider's listing endpoint with its credentials
pub async fn probe_provider(
    client: &reqwest::Client,
    kind: ProviderKind,
    url: &str,
    api_key: &str,
) -> ProviderProbe {
    let request = match kind {
        ProviderKind::Anthropic => client
            .get(url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01"),
        _ => client.get(url).bearer_auth(api_key),
    };

    let start = Instant::now();
    let result = request.timeout(HTTP_TIMEOUT).send().await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(resp) => {
            let status = resp.status();
            let error = if status.is_success() {
                None
            } else {
                Some(resp.text().await.unwrap_or_default().chars().take(200).collect())
            };
            ProviderProbe { provider: kind, url: url.to_string(), status: Some(status.as_u16()), latency_ms, error }
        }
        Err(e) => ProviderProbe {
            provider: kind,
            url: url.to_string(),
            status: None,
            latency_ms,
            error: Some(e.to_string()),
        },
    }
}

// ============================================================================
// Minerva server
// ============================================================================

/// Port Minerva listens on out of the box
pub const DEFAULT_SERVER_PORT: u16 = 5000;

/// `--url` plus optional `--port`
///
/// An explicit port always wins. A bare host (`localhost`, `10.0.0.2`) with
/// no port gets [`DEFAULT_SERVER_PORT`]; a URL with a scheme keeps its own
/// port or the scheme default.
pub fn server_base(url: &str, port: Option<u16>) -> Result<Url> {
    let bare = !url.contains("://");
    let with_scheme = if bare { format!("http://{url}") } else { url.to_string() };
    let mut base = Url::parse(&with_scheme).with_context(|| format!("Invalid URL: {url}"))?;
    let port = match port {
        Some(port) => Some(port),
        None if bare && base.port().is_none() => Some(DEFAULT_SERVER_PORT),
        None => None,
    };
    if let Some(port) = port {
        if base.set_port(Some(port)).is_err() {
            bail!("Cannot set port on {}", base);
        }
    }
    Ok(base)
}

/// The `/ws` endpoint for an HTTP base URL
pub fn ws_url(base: &Url) -> Result<Url> {
    let mut url = base.join("/ws")?;
    let scheme = match base.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    if url.set_scheme(scheme).is_err() {
        bail!("Cannot use {} as a WebSocket URL", base);
    }
    Ok(url)
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerCheck {
    pub url: String,
    pub status: u16,
    pub latency_ms: u64,
    pub body: Option<Value>,
}

pub async fn check_server(client: &reqwest::Client, base: &Url) -> Result<ServerCheck> {
    let url = base.join("/health")?;
    let start = Instant::now();
    let resp = client
        .get(url.clone())
        .timeout(HTTP_TIMEOUT)
        .send()
        .await
        .with_context(|| format!("Cannot reach {url}"))?;
    let latency_ms = start.elapsed().as_millis() as u64;
    let status = resp.status().as_u16();
    let body = resp.json::<Value>().await.ok();
    Ok(ServerCheck { url: url.to_string(), status, latency_ms, body })
}

// ============================================================================
// Engine.IO handshake
// ============================================================================

/// Fields of an Engine.IO open packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineIoHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

/// Parse the body of the first polling response
///
/// v4 sends `0{json}` (packets separated by `\x1e`); v3 prefixes each
/// packet with its length: `<len>:0{json}`.
pub fn parse_open_packet(body: &str, eio: u8) -> Result<EngineIoHandshake> {
    let body = body.trim_start_matches('\u{feff}').trim();
    let packet = match eio {
        4 => body.split('\u{1e}').next().unwrap_or_default(),
        3 => {
            let Some((len, rest)) = body.split_once(':') else {
                bail!("EIO v3 payload has no length prefix: {:?}", preview(body));
            };
            let len: usize = len
                .trim()
                .parse()
                .with_context(|| format!("Bad EIO v3 length prefix {:?}", len))?;
            // v3 lengths count characters, not bytes
            let end = rest.char_indices().nth(len).map(|(i, _)| i).unwrap_or(rest.len());
            &rest[..end]
        }
        other => bail!("Unsupported Engine.IO version {}", other),
    };

    let Some(json) = packet.strip_prefix('0') else {
        bail!("Expected open packet (type 0), got {:?}", preview(packet));
    };
    serde_json::from_str(json).with_context(|| format!("Malformed open packet: {:?}", preview(json)))
}

fn preview(s: &str) -> String {
    s.chars().take(80).collect()
}

pub async fn socketio_handshake(client: &reqwest::Client, base: &Url, eio: u8) -> Result<EngineIoHandshake> {
    let mut url = base.join("/socket.io/")?;
    url.query_pairs_mut()
        .append_pair("EIO", &eio.to_string())
        .append_pair("transport", "polling")
        .append_pair("t", &chrono::Utc::now().timestamp_millis().to_string());
    if eio == 3 {
        // v3 polling answers in binary framing unless asked for base64 text
        url.query_pairs_mut().append_pair("b64", "1");
    }

    let resp = client
        .get(url.clone())
        .timeout(HTTP_TIMEOUT)
        .send()
        .await
        .with_context(|| format!("Cannot reach {url}"))?;
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        bail!("Handshake failed with HTTP {}: {}", status.as_u16(), preview(&body));
    }
    parse_open_packet(&body, eio)
}

// ============================================================================
// WebSocket round-trip
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct WsRoundTrip {
    pub url: String,
    pub latency_ms: u64,
    pub saw_typing: bool,
    pub model: Option<String>,
    pub response: String,
}

/// Send one chat message over `/ws` and wait for the answer
pub async fn ws_roundtrip(url: &Url, message: &str) -> Result<WsRoundTrip> {
    let start = Instant::now();
    let (mut stream, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .with_context(|| format!("WebSocket connect to {url} failed"))?;

    let request = serde_json::to_string(&ChatRequest::new(message))?;
    stream.send(Message::Text(request.into())).await?;

    let mut saw_typing = false;
    let answer = tokio::time::timeout(WS_TIMEOUT, read_answer(&mut stream, &mut saw_typing))
        .await
        .with_context(|| format!("No response within {}s", WS_TIMEOUT.as_secs()))??;

    let _ = stream.close(None).await;
    Ok(WsRoundTrip {
        url: url.to_string(),
        latency_ms: start.elapsed().as_millis() as u64,
        saw_typing,
        model: answer["model_info"]["model"].as_str().map(String::from),
        response: answer["response"].as_str().unwrap_or_default().to_string(),
    })
}

/// Read frames until a `response` or `error` frame arrives
async fn read_answer<S>(stream: &mut S, saw_typing: &mut bool) -> Result<Value>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        let text = match frame? {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };
        let value: Value = serde_json::from_str(&text)?;
        match value["type"].as_str() {
            Some("typing") => *saw_typing = true,
            Some("response") => return Ok(value),
            Some("error") => bail!("Server error: {}", value["error"].as_str().unwrap_or("unknown")),
            _ => tracing::debug!(frame = %text, "Ignoring frame"),
        }
    }
    bail!("Connection closed before a response arrived")
}
