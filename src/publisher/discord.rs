//! Discord local RPC client
//!
//! Discord listens on a Unix socket named `discord-ipc-{0..9}`. Every message
//! is a frame of `u32 LE opcode | u32 LE length | JSON payload`. A session
//! opens with a handshake answered by a `READY` dispatch; each command
//! carries a nonce echoed back in its response.

use super::Publisher;
use crate::error::{Error, Result};
use crate::resolver::Activity;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, trace};

const RPC_VERSION: u32 = 1;
const SOCKET_SLOTS: usize = 10;
const MAX_FRAME_BYTES: usize = 1024 * 1024;
/// Discord answers every command; a silent socket is treated as dead
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Frame opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Handshake,
    Frame,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn code(self) -> u32 {
        match self {
            Self::Handshake => 0,
            Self::Frame => 1,
            Self::Close => 2,
            Self::Ping => 3,
            Self::Pong => 4,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Handshake),
            1 => Some(Self::Frame),
            2 => Some(Self::Close),
            3 => Some(Self::Ping),
            4 => Some(Self::Pong),
            _ => None,
        }
    }
}

pub fn encode_frame(opcode: Opcode, payload: &Value) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(payload)?;
    let len = u32::try_from(body.len())
        .map_err(|_| Error::Publisher(format!("frame too large ({} bytes)", body.len())))?;
    let mut frame = Vec::with_capacity(8 + body.len());
    frame.extend_from_slice(&opcode.code().to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Pop one complete frame off the front of `buffer`, if it holds one
pub fn decode_frame(buffer: &mut Vec<u8>) -> Result<Option<(Opcode, Value)>> {
    if buffer.len() < 8 {
        return Ok(None);
    }
    let code = u32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
    let len = u32::from_le_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]) as usize;

    let opcode =
        Opcode::from_code(code).ok_or_else(|| Error::Publisher(format!("unknown opcode {code}")))?;
    if len > MAX_FRAME_BYTES {
        return Err(Error::Publisher(format!("frame too large ({len} bytes)")));
    }
    if buffer.len() < 8 + len {
        return Ok(None);
    }

    let payload = if len == 0 {
        Value::Null
    } else {
        serde_json::from_slice(&buffer[8..8 + len])?
    };
    buffer.drain(..8 + len);
    Ok(Some((opcode, payload)))
}

/// Framed stream. Partial reads are buffered, so [`Connection::recv`] can be
/// dropped mid-frame without losing bytes.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    buffer: Vec<u8>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(4096),
        }
    }

    pub async fn send(&mut self, opcode: Opcode, payload: &Value) -> Result<()> {
        let frame = encode_frame(opcode, payload)?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Next frame; end of stream is an error
    pub async fn recv(&mut self) -> Result<(Opcode, Value)> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buffer)? {
                return Ok(frame);
            }
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(Error::Publisher("connection closed".into()));
            }
        }
    }

    async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// `SET_ACTIVITY` activity object for a resolved presence
pub fn activity_payload(activity: &Activity) -> Value {
    let mut assets = json!({
        "large_image": activity.large_image_key,
        "large_text": activity.large_image_text,
    });
    if let Some(key) = activity.small_image_key {
        assets["small_image"] = json!(key.key());
    }
    if let Some(text) = &activity.small_image_text {
        assets["small_text"] = json!(text);
    }

    json!({
        "details": activity.details,
        "state": activity.state,
        "timestamps": { "start": activity.start_timestamp },
        "assets": assets,
        "type": 0,
    })
}

/// Socket paths probed on connect, in order
pub fn default_candidates() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"]
        .iter()
        .filter_map(|key| std::env::var_os(key))
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .collect();
    dirs.push(PathBuf::from("/tmp"));
    dirs.dedup();

    let mut candidates = Vec::new();
    for dir in &dirs {
        // Sandboxed clients nest their socket one level down
        for base in [
            dir.clone(),
            dir.join("app/com.discordapp.Discord"),
            dir.join("snap.discord"),
        ] {
            for slot in 0..SOCKET_SLOTS {
                candidates.push(base.join(format!("discord-ipc-{slot}")));
            }
        }
    }
    candidates
}

async fn handshake<S>(conn: &mut Connection<S>, client_id: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.send(
        Opcode::Handshake,
        &json!({ "v": RPC_VERSION, "client_id": client_id }),
    )
    .await?;

    loop {
        let (opcode, payload) = conn.recv().await?;
        match opcode {
            Opcode::Frame if payload["evt"] == "READY" => return Ok(()),
            Opcode::Ping => conn.send(Opcode::Pong, &payload).await?,
            Opcode::Close => return Err(close_error(&payload)),
            _ => trace!(?opcode, "ignoring frame during handshake"),
        }
    }
}

/// Send one command and wait for the response carrying `nonce`
async fn exchange<S>(conn: &mut Connection<S>, command: &Value, nonce: &str) -> Result<Value>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.send(Opcode::Frame, command).await?;

    loop {
        let (opcode, payload) = conn.recv().await?;
        match opcode {
            Opcode::Frame if payload["nonce"] == nonce => {
                if payload["evt"] == "ERROR" {
                    let message = payload["data"]["message"].as_str().unwrap_or("unknown error");
                    return Err(Error::Publisher(format!("command rejected: {message}")));
                }
                return Ok(payload);
            }
            Opcode::Ping => conn.send(Opcode::Pong, &payload).await?,
            Opcode::Close => return Err(close_error(&payload)),
            _ => trace!(?opcode, "ignoring unrelated frame"),
        }
    }
}

fn close_error(payload: &Value) -> Error {
    let message = payload["message"].as_str().unwrap_or("connection closed");
    Error::Publisher(format!("closed by peer: {message}"))
}

/// Publisher backed by the Discord desktop client
#[derive(Debug)]
pub struct DiscordIpc {
    client_id: String,
    candidates: Vec<PathBuf>,
    connection: Option<Connection<UnixStream>>,
    nonce: u64,
}

impl DiscordIpc {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self::with_candidates(client_id, default_candidates())
    }

    pub fn with_candidates(client_id: impl Into<String>, candidates: Vec<PathBuf>) -> Self {
        Self {
            client_id: client_id.into(),
            candidates,
            connection: None,
            nonce: 0,
        }
    }

    async fn send_activity(&mut self, activity: Option<Value>) -> Result<()> {
        self.nonce += 1;
        let nonce = self.nonce.to_string();
        let mut args = json!({ "pid": std::process::id() });
        if let Some(activity) = activity {
            args["activity"] = activity;
        }
        let command = json!({ "cmd": "SET_ACTIVITY", "args": args, "nonce": nonce });

        let conn = self
            .connection
            .as_mut()
            .ok_or_else(|| Error::Publisher("not connected".into()))?;
        let result = tokio::time::timeout(RESPONSE_TIMEOUT, exchange(conn, &command, &nonce))
            .await
            .unwrap_or_else(|_| Err(Error::Publisher("response timed out".into())));

        if result.is_err() {
            self.connection = None;
        }
        result.map(|_| ())
    }
}

impl Publisher for DiscordIpc {
    async fn connect(&mut self) -> Result<()> {
        self.connection = None;
        for path in &self.candidates {
            let Ok(stream) = UnixStream::connect(path).await else {
                continue;
            };
            debug!("Found Discord IPC socket at {}", path.display());
            let mut conn = Connection::new(stream);
            let greeted =
                tokio::time::timeout(RESPONSE_TIMEOUT, handshake(&mut conn, &self.client_id))
                    .await
                    .unwrap_or_else(|_| Err(Error::Publisher("handshake timed out".into())));
            match greeted {
                Ok(()) => {
                    self.connection = Some(conn);
                    return Ok(());
                }
                Err(e) => debug!("Handshake on {} failed: {}", path.display(), e),
            }
        }
        Err(Error::Publisher("no Discord IPC socket available".into()))
    }

    async fn set_activity(&mut self, activity: &Activity) -> Result<()> {
        self.send_activity(Some(activity_payload(activity))).await
    }

    async fn clear_activity(&mut self) -> Result<()> {
        self.send_activity(None).await
    }

    async fn closed(&mut self) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        loop {
            match conn.recv().await {
                Ok((Opcode::Ping, payload)) => {
                    if conn.send(Opcode::Pong, &payload).await.is_err() {
                        break;
                    }
                }
                Ok((Opcode::Close, payload)) => {
                    debug!("{}", close_error(&payload));
                    break;
                }
                Ok((opcode, _)) => trace!(?opcode, "ignoring unsolicited frame"),
                Err(e) => {
                    debug!("Discord IPC read failed: {}", e);
                    break;
                }
            }
        }
        self.connection = None;
    }

    async fn close(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            let _ = conn.send(Opcode::Close, &json!({})).await;
            conn.shutdown().await;
        }
    }
}
