//! Direct art channel. One reusable TLS websocket session against the
//! display's local control endpoint on port 8002; operations are JSON
//! request/reply exchanges on the art sub-channel, with image bytes streamed
//! over a one-shot TCP socket the display opens on demand.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use native_tls::TlsConnector;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Connector, Message, WebSocket, client_tls_with_config};
use uuid::Uuid;

use super::translate;
use super::types::{
    ChannelError, CurrentArt, Operation, OperationReply, UploadRequest, UploadResult,
};

const CONTROL_PORT: u16 = 8002;
const ART_CHANNEL: &str = "com.samsung.art-app";
const APP_NAME: &str = "FrameArtBridge";
const TIMEOUT: Duration = Duration::from_secs(10);
/// Socket poll granularity while waiting for frames; overall deadlines are
/// enforced per wait, not per read.
const READ_POLL: Duration = Duration::from_millis(200);

pub struct DirectChannel {
    host: String,
    token: Option<String>,
    session: Mutex<Option<ArtSession>>,
}

impl DirectChannel {
    pub fn new(host: String, token: Option<String>) -> Self {
        Self {
            host,
            token,
            session: Mutex::new(None),
        }
    }

    /// Run one operation against the display, reusing the live session or
    /// establishing one. The session mutex serializes concurrent operations
    /// onto the single logical connection. A transient failure discards the
    /// handle so the next call reconnects from scratch.
    pub fn execute(&self, op: &Operation) -> Result<OperationReply, ChannelError> {
        if matches!(op, Operation::GetDeviceInfo) {
            // The descriptor lives on the display's REST endpoint, not the
            // art socket; no session needed.
            return self.device_info().map(OperationReply::DeviceInfo);
        }
        let Some(payload) = translate::direct_request(op) else {
            return Err(ChannelError::Unsupported);
        };

        let mut guard = self.session.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard = Some(ArtSession::connect(&self.host, self.token.as_deref())?);
        }
        let Some(session) = guard.as_mut() else {
            return Err(ChannelError::Transient("no art session available".to_string()));
        };
        let result = session.run(op, payload);
        if matches!(result, Err(ChannelError::Transient(_))) {
            // A dead or desynchronized socket poisons every later exchange.
            warn!(host = %self.host, "discarding art session after transport failure");
            *guard = None;
        }
        result
    }

    /// Close the session if one is open. Safe to call repeatedly.
    pub fn close(&self) {
        let mut guard = self.session.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut session) = guard.take() {
            let _ = session.socket.close(None);
            info!(host = %self.host, "art channel closed");
        }
    }

    fn device_info(&self) -> Result<Value, ChannelError> {
        let url = format!("https://{}:{}/api/v2/", self.host, CONTROL_PORT);
        let client = reqwest::blocking::Client::builder()
            .timeout(TIMEOUT)
            // Self-signed device certificate.
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ChannelError::Transient(format!("http client: {e}")))?;
        let response = client
            .get(&url)
            .send()
            .map_err(|e| ChannelError::Transient(format!("device descriptor: {e}")))?;
        if !response.status().is_success() {
            return Err(ChannelError::Transient(format!(
                "device descriptor returned {}",
                response.status()
            )));
        }
        response
            .json::<Value>()
            .map_err(|e| ChannelError::Transient(format!("device descriptor body: {e}")))
    }
}

struct ArtSession {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl ArtSession {
    fn connect(host: &str, token: Option<&str>) -> Result<Self, ChannelError> {
        let url = build_ws_url(host, token);
        let addr = format!("{host}:{CONTROL_PORT}");
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| ChannelError::Transient(format!("resolve {addr}: {e}")))?
            .next()
            .ok_or_else(|| ChannelError::Transient(format!("no address for {addr}")))?;

        let stream = TcpStream::connect_timeout(&socket_addr, TIMEOUT)
            .map_err(|e| ChannelError::Transient(format!("connect {addr}: {e}")))?;
        let _ = stream.set_read_timeout(Some(TIMEOUT));
        let _ = stream.set_write_timeout(Some(TIMEOUT));

        // The display presents a self-signed certificate on the control port.
        let tls = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| ChannelError::Transient(format!("tls connector: {e}")))?;
        let (socket, _response) =
            client_tls_with_config(url.as_str(), stream, None, Some(Connector::NativeTls(tls)))
                .map_err(|e| ChannelError::Transient(format!("websocket handshake: {e}")))?;

        let mut session = Self { socket };
        // Switch to short poll reads so reply waits can enforce deadlines.
        if let MaybeTlsStream::NativeTls(tls_stream) = session.socket.get_ref() {
            let _ = tls_stream.get_ref().set_read_timeout(Some(READ_POLL));
        }
        session.wait_for_channel_event(&["ms.channel.ready", "ms.channel.connect"], TIMEOUT)?;
        info!(host, "art channel connected");
        Ok(session)
    }

    fn run(&mut self, op: &Operation, payload: Value) -> Result<OperationReply, ChannelError> {
        match op {
            Operation::ProbeSupport => match self
                .art_request(payload, &["api_version", "get_api_version"])
            {
                Ok(_) => Ok(OperationReply::Supported(true)),
                // An explicit rejection means the art app answered but the
                // capability is off the table: a legitimate negative.
                Err(ChannelError::Fatal(_)) => Ok(OperationReply::Supported(false)),
                Err(e) => Err(e),
            },
            Operation::Upload(request) => {
                self.upload(request, payload).map(OperationReply::Uploaded)
            }
            Operation::SelectImage { remote_id, .. } => {
                // The art app does not acknowledge selections; send-only.
                self.send_art(payload)?;
                debug!(remote_id = %remote_id, "selection sent on art channel");
                Ok(OperationReply::Selected { targeted: true })
            }
            Operation::GetCurrentArt => {
                let reply =
                    self.art_request(payload, &["current_artwork", "get_current_artwork"])?;
                let content_id = reply
                    .get("content_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ChannelError::Fatal("current artwork reply without content_id".to_string())
                    })?
                    .to_string();
                Ok(OperationReply::CurrentArt(CurrentArt::Artwork {
                    content_id,
                    details: reply,
                }))
            }
            // Handled before session dispatch.
            Operation::GetDeviceInfo => Err(ChannelError::Unsupported),
            Operation::SendKey(_) => {
                // Remote keys ride the same socket but bypass the art-app
                // envelope: the payload already is the full frame.
                self.socket
                    .send(Message::Text(payload.to_string()))
                    .map_err(|e| ChannelError::Transient(format!("websocket send: {e}")))?;
                Ok(OperationReply::KeySent)
            }
        }
    }

    /// Two-phase transfer: announce the image, stream the bytes to the
    /// one-shot socket the display advertises, then wait for the remote
    /// content id in the confirmation event.
    fn upload(
        &mut self,
        request: &UploadRequest,
        mut announce: Value,
    ) -> Result<UploadResult, ChannelError> {
        let (connection_id, ..) = Uuid::new_v4().as_fields();
        let transfer_id = Uuid::new_v4().to_string();
        announce["conn_info"] = json!({
            "d2d_mode": "socket",
            "connection_id": connection_id,
            "id": transfer_id,
        });

        let request_id = self.send_art(announce)?;
        let ready = self.wait_for_reply(&request_id, &["ready_to_use"], TIMEOUT)?;
        let (ip, port, key) = parse_conn_info(&ready)?;

        push_image(&ip, port, key.as_deref(), request)?;

        let added = self.wait_for_reply(&request_id, &["image_added"], TIMEOUT)?;
        let content_id = added
            .get("content_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ChannelError::Fatal("image_added without content_id".to_string()))?;
        info!(content_id, "image uploaded to display");
        Ok(UploadResult {
            remote_id: content_id.to_string(),
        })
    }

    /// Wrap an art-app request in the d2d envelope and send it. Returns the
    /// request id replies will be matched against.
    fn send_art(&mut self, mut data: Value) -> Result<String, ChannelError> {
        let request_id = Uuid::new_v4().to_string();
        data["id"] = json!(request_id);
        let envelope = json!({
            "method": "ms.channel.exchange",
            "params": {
                "event": "art_app_request",
                "to": "host",
                "data": data.to_string(),
            },
        });
        self.socket
            .send(Message::Text(envelope.to_string()))
            .map_err(|e| ChannelError::Transient(format!("websocket send: {e}")))?;
        Ok(request_id)
    }

    fn art_request(&mut self, data: Value, reply_events: &[&str]) -> Result<Value, ChannelError> {
        let request_id = self.send_art(data)?;
        self.wait_for_reply(&request_id, reply_events, TIMEOUT)
    }

    /// Read channel-level frames until one of `events` arrives.
    fn wait_for_channel_event(
        &mut self,
        events: &[&str],
        timeout: Duration,
    ) -> Result<Value, ChannelError> {
        let deadline = Instant::now() + timeout;
        loop {
            let frame = self.next_text_frame(deadline, events)?;
            let Some(event) = frame.get("event").and_then(Value::as_str) else {
                continue;
            };
            if events.contains(&event) {
                return Ok(frame);
            }
            if event == "ms.channel.unauthorized" {
                return Err(ChannelError::Fatal(
                    "display refused the connection (unauthorized)".to_string(),
                ));
            }
            debug!(event, "skipping unrelated channel frame");
        }
    }

    /// Read d2d frames until a reply to `request_id` arrives. Error events
    /// addressed to the request are explicit rejections.
    fn wait_for_reply(
        &mut self,
        request_id: &str,
        reply_events: &[&str],
        timeout: Duration,
    ) -> Result<Value, ChannelError> {
        let deadline = Instant::now() + timeout;
        loop {
            let frame = self.next_text_frame(deadline, reply_events)?;
            if frame.get("event").and_then(Value::as_str) != Some("d2d_service_message") {
                continue;
            }
            let Some(payload) = frame
                .get("data")
                .and_then(Value::as_str)
                .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            else {
                continue;
            };
            let Some(event) = payload.get("event").and_then(Value::as_str) else {
                continue;
            };
            // Replies from other in-flight exchanges can interleave; skip
            // anything addressed to a different request.
            let for_us = payload
                .get("id")
                .or_else(|| payload.get("request_id"))
                .and_then(Value::as_str)
                .is_none_or(|id| id == request_id);
            if !for_us {
                continue;
            }
            if event == "error" {
                let code = payload
                    .get("error_code")
                    .map(Value::to_string)
                    .unwrap_or_else(|| "unknown".to_string());
                return Err(ChannelError::Fatal(format!(
                    "display rejected request: error {code}"
                )));
            }
            if reply_events.contains(&event) {
                return Ok(payload);
            }
            debug!(event, "skipping unrelated art event");
        }
    }

    /// One parsed text frame, honoring the wait deadline across short-poll
    /// read timeouts. Pings are answered inline.
    fn next_text_frame(
        &mut self,
        deadline: Instant,
        waiting_for: &[&str],
    ) -> Result<Value, ChannelError> {
        loop {
            if Instant::now() >= deadline {
                return Err(ChannelError::Transient(format!(
                    "timed out waiting for {waiting_for:?}"
                )));
            }
            let message = match self.socket.read() {
                Ok(message) => message,
                Err(tungstenite::Error::Io(ref e))
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    return Err(ChannelError::Transient(format!("websocket read: {e}")));
                }
            };
            match message {
                Message::Text(text) => {
                    if let Ok(frame) = serde_json::from_str::<Value>(&text) {
                        return Ok(frame);
                    }
                }
                Message::Ping(body) => {
                    let _ = self.socket.send(Message::Pong(body));
                }
                Message::Close(_) => {
                    return Err(ChannelError::Transient(
                        "display closed the websocket".to_string(),
                    ));
                }
                _ => {}
            }
        }
    }
}

fn build_ws_url(host: &str, token: Option<&str>) -> String {
    let name = BASE64.encode(APP_NAME);
    match token {
        Some(token) => format!(
            "wss://{host}:{CONTROL_PORT}/api/v2/channels/{ART_CHANNEL}?name={name}&token={token}"
        ),
        None => format!("wss://{host}:{CONTROL_PORT}/api/v2/channels/{ART_CHANNEL}?name={name}"),
    }
}

/// Pull the transfer socket coordinates out of a `ready_to_use` reply. The
/// display sends `conn_info` as a JSON string; older firmware inlines it.
fn parse_conn_info(ready: &Value) -> Result<(String, u16, Option<String>), ChannelError> {
    let conn = match ready.get("conn_info") {
        Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
            .map_err(|e| ChannelError::Fatal(format!("malformed conn_info: {e}")))?,
        Some(value @ Value::Object(_)) => value.clone(),
        _ => {
            return Err(ChannelError::Fatal(
                "ready_to_use without conn_info".to_string(),
            ));
        }
    };
    let ip = conn
        .get("ip")
        .and_then(Value::as_str)
        .ok_or_else(|| ChannelError::Fatal("conn_info without ip".to_string()))?
        .to_string();
    let port = match conn.get("port") {
        Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(Value::String(s)) => s.parse::<u16>().ok(),
        _ => None,
    }
    .ok_or_else(|| ChannelError::Fatal("conn_info without usable port".to_string()))?;
    let key = conn
        .get("key")
        .or_else(|| conn.get("secKey"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok((ip, port, key))
}

/// Stream the length-prefixed transfer header and the raw bytes to the
/// one-shot socket the display opened for this upload.
fn push_image(
    ip: &str,
    port: u16,
    key: Option<&str>,
    request: &UploadRequest,
) -> Result<(), ChannelError> {
    let header = json!({
        "num": 0,
        "total": 1,
        "fileLength": request.bytes.len(),
        "fileName": "dummy",
        "fileType": request.format.direct_token(),
        "secKey": key.unwrap_or_default(),
        "version": "0.0.1",
    })
    .to_string();

    let addr = format!("{ip}:{port}");
    let socket_addr = addr
        .to_socket_addrs()
        .map_err(|e| ChannelError::Transient(format!("resolve transfer socket {addr}: {e}")))?
        .next()
        .ok_or_else(|| ChannelError::Transient(format!("no address for {addr}")))?;
    let mut stream = TcpStream::connect_timeout(&socket_addr, TIMEOUT)
        .map_err(|e| ChannelError::Transient(format!("connect transfer socket {addr}: {e}")))?;
    let _ = stream.set_write_timeout(Some(TIMEOUT));

    let write = |stream: &mut TcpStream, bytes: &[u8]| {
        stream
            .write_all(bytes)
            .map_err(|e| ChannelError::Transient(format!("image transfer: {e}")))
    };
    write(&mut stream, &(header.len() as u32).to_be_bytes())?;
    write(&mut stream, header.as_bytes())?;
    write(&mut stream, &request.bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_ws_url() {
        let url = build_ws_url("192.168.1.50", None);
        assert!(url.starts_with("wss://192.168.1.50:8002/api/v2/channels/com.samsung.art-app"));
        assert!(url.contains("?name="));
        assert!(!url.contains("token"));

        let with_token = build_ws_url("tv.local", Some("12345678"));
        assert!(with_token.ends_with("&token=12345678"));
    }

    #[test]
    fn test_parse_conn_info_string_form() {
        let ready = json!({
            "event": "ready_to_use",
            "conn_info": "{\"ip\":\"192.168.1.50\",\"port\":52345,\"key\":\"sec\"}",
        });
        let (ip, port, key) = parse_conn_info(&ready).unwrap();
        assert_eq!(ip, "192.168.1.50");
        assert_eq!(port, 52345);
        assert_eq!(key.as_deref(), Some("sec"));
    }

    #[test]
    fn test_parse_conn_info_inline_form() {
        let ready = json!({
            "event": "ready_to_use",
            "conn_info": { "ip": "10.0.0.9", "port": "4321" },
        });
        let (ip, port, key) = parse_conn_info(&ready).unwrap();
        assert_eq!(ip, "10.0.0.9");
        assert_eq!(port, 4321);
        assert!(key.is_none());
    }

    #[test]
    fn test_parse_conn_info_rejects_garbage() {
        assert!(parse_conn_info(&json!({ "event": "ready_to_use" })).is_err());
        let bad_port = json!({ "conn_info": { "ip": "10.0.0.9", "port": "not-a-port" } });
        assert!(parse_conn_info(&bad_port).is_err());
    }
}
