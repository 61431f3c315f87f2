//! JSON-line RPC client for the gateway.
//!
//! Speaks the hub's line-framed JSON with the roles swapped: this side
//! sends `{m, p, i}` requests terminated by `\r` and correlates replies by
//! their id.
//!
//! # Call sequence
//! 1. Drain buffered unsolicited notifications with a zero timeout.
//! 2. Generate a 4-character id from `[A-Za-z0-9_]`.
//! 3. Write the request object and a `\r`.
//! 4. Read messages until one carries the id; the rest are logged at debug
//!    and discarded.
//! 5. An `e` reply is base64-decoded and surfaced as [`RpcError::Hub`];
//!    otherwise the `r` value is returned.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hub_protocol::{LineFramer, decode_base64_text};
use rand::Rng;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Receive timeout for a single call.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(100);

/// Project id stamped into upload metadata.
const UPLOAD_PROJECT_ID: &str = "50uN1ZaRpHj2";

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_";
const ID_LEN: usize = 4;

/// Generate a request id: four characters from `[A-Za-z0-9_]`.
pub fn random_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Timeout")]
    Timeout,
    #[error("hub error: {0}")]
    Hub(Value),
    #[error("malformed reply: {0}")]
    Reply(String),
}

/// Reply to `start_write_program`: how to chunk and tag the upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadStart {
    pub blocksize: usize,
    pub transferid: String,
}

pub struct RpcClient {
    stream: TcpStream,
    framer: LineFramer,
    recv_timeout: Duration,
}

impl RpcClient {
    /// Connect to a gateway listening on localhost.
    pub async fn connect(port: u16) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(("127.0.0.1", port)).await?;
        Ok(RpcClient {
            stream,
            framer: LineFramer::new(),
            recv_timeout: RECV_TIMEOUT,
        })
    }

    /// Shorten or lengthen the per-call receive window.
    pub fn set_recv_timeout(&mut self, recv_timeout: Duration) {
        self.recv_timeout = recv_timeout;
    }

    /// Receive one parsed JSON message, or `None` if `wait` elapses first.
    /// Unparseable lines are logged at debug and skipped.
    async fn recv_message(&mut self, wait: Duration) -> Result<Option<Value>, RpcError> {
        loop {
            while let Some(line) = self.framer.next_line() {
                match serde_json::from_slice(&line.payload) {
                    Ok(value) => return Ok(Some(value)),
                    Err(_) => {
                        debug!(
                            line = %String::from_utf8_lossy(&line.payload),
                            "cannot parse json"
                        );
                    }
                }
            }
            let mut buf = [0u8; 1024];
            match timeout(wait, self.stream.read(&mut buf)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => {
                    return Err(RpcError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "gateway closed the connection",
                    )));
                }
                Ok(Ok(n)) => self.framer.push(&buf[..n]),
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Drop whatever notifications piled up since the last call.
    async fn drain(&mut self) -> Result<(), RpcError> {
        while self.recv_message(Duration::ZERO).await?.is_some() {}
        Ok(())
    }

    /// Call a hub method and return its result.
    pub async fn send_message(&mut self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.drain().await?;
        let id = random_id();
        let message = json!({"m": method, "p": params, "i": id});
        debug!(%message, "sending");
        self.stream
            .write_all(message.to_string().as_bytes())
            .await?;
        self.stream.write_all(b"\r").await?;
        self.recv_response(&id).await
    }

    async fn recv_response(&mut self, id: &str) -> Result<Value, RpcError> {
        loop {
            let Some(message) = self.recv_message(self.recv_timeout).await? else {
                return Err(RpcError::Timeout);
            };
            if message.get("i").and_then(Value::as_str) != Some(id) {
                debug!(%message, "while waiting for response");
                continue;
            }
            debug!(%message, "response");
            if let Some(encoded) = message.get("e").and_then(Value::as_str) {
                let body =
                    decode_base64_text(encoded).map_err(|e| RpcError::Reply(e.to_string()))?;
                let detail =
                    serde_json::from_str(&body).unwrap_or_else(|_| Value::String(body));
                return Err(RpcError::Hub(detail));
            }
            return Ok(message.get("r").cloned().unwrap_or(Value::Null));
        }
    }

    // Program methods

    pub async fn program_execute(&mut self, slot: u8) -> Result<Value, RpcError> {
        self.send_message("program_execute", json!({"slotid": slot}))
            .await
    }

    pub async fn program_terminate(&mut self) -> Result<Value, RpcError> {
        self.send_message("program_terminate", json!({})).await
    }

    pub async fn get_storage_status(&mut self) -> Result<Value, RpcError> {
        self.send_message("get_storage_status", json!({})).await
    }

    pub async fn start_write_program(
        &mut self,
        name: &str,
        size: u64,
        slot: u8,
        created_ms: i64,
        modified_ms: i64,
    ) -> Result<UploadStart, RpcError> {
        let meta = json!({
            "created": created_ms,
            "modified": modified_ms,
            "name": name,
            "type": "python",
            "project_id": UPLOAD_PROJECT_ID,
        });
        let reply = self
            .send_message(
                "start_write_program",
                json!({"slotid": slot, "size": size, "meta": meta}),
            )
            .await?;
        let blocksize = reply
            .get("blocksize")
            .and_then(Value::as_u64)
            .filter(|b| *b > 0)
            .ok_or_else(|| RpcError::Reply(reply.to_string()))?;
        let transferid = reply
            .get("transferid")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Reply(reply.to_string()))?
            .to_owned();
        Ok(UploadStart {
            blocksize: blocksize as usize,
            transferid,
        })
    }

    pub async fn write_package(
        &mut self,
        data: &[u8],
        transferid: &str,
    ) -> Result<Value, RpcError> {
        self.send_message(
            "write_package",
            json!({"data": BASE64.encode(data), "transferid": transferid}),
        )
        .await
    }

    pub async fn move_project(&mut self, from_slot: u8, to_slot: u8) -> Result<Value, RpcError> {
        self.send_message(
            "move_project",
            json!({"old_slotid": from_slot, "new_slotid": to_slot}),
        )
        .await
    }

    pub async fn remove_project(&mut self, slot: u8) -> Result<Value, RpcError> {
        self.send_message("remove_project", json!({"slotid": slot}))
            .await
    }

    // Display methods

    pub async fn display_set_pixel(
        &mut self,
        x: u8,
        y: u8,
        brightness: u8,
    ) -> Result<Value, RpcError> {
        self.send_message(
            "scratch.display_set_pixel",
            json!({"x": x, "y": y, "brightness": brightness}),
        )
        .await
    }

    pub async fn display_clear(&mut self) -> Result<Value, RpcError> {
        self.send_message("scratch.display_clear", json!({})).await
    }

    pub async fn display_image(&mut self, image: &str) -> Result<Value, RpcError> {
        self.send_message("scratch.display_image", json!({"image": image}))
            .await
    }

    pub async fn display_image_for(
        &mut self,
        image: &str,
        duration_ms: u64,
    ) -> Result<Value, RpcError> {
        self.send_message(
            "scratch.display_image_for",
            json!({"image": image, "duration": duration_ms}),
        )
        .await
    }

    pub async fn display_text(&mut self, text: &str) -> Result<Value, RpcError> {
        self.send_message("scratch.display_text", json!({"text": text}))
            .await
    }

    // Hub methods

    pub async fn get_hub_info(&mut self) -> Result<Value, RpcError> {
        self.send_message("get_hub_info", json!({})).await
    }

    /// Probe used by the `time` command.
    pub async fn storage_status(&mut self) -> Result<Value, RpcError> {
        self.send_message("storage_status", json!({})).await
    }
}

/// Upload `data` in `blocksize` chunks under one transfer id. `progress` is
/// called after every acknowledged chunk with (bytes sent, total). There is
/// no end-of-upload message; the final ack implies completion.
pub async fn upload_program(
    client: &mut RpcClient,
    name: &str,
    data: &[u8],
    slot: u8,
    progress: impl Fn(usize, usize),
) -> Result<(), RpcError> {
    let now = chrono::Utc::now().timestamp_millis();
    let start = client
        .start_write_program(name, data.len() as u64, slot, now, now)
        .await?;
    let mut sent = 0usize;
    for chunk in data.chunks(start.blocksize) {
        client.write_package(chunk, &start.transferid).await?;
        sent += chunk.len();
        progress(sent, data.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout as tokio_timeout};

    /// A one-connection mock gateway: reads `\r`-terminated requests and
    /// answers them with `respond`, reporting each request to the test.
    async fn spawn_gateway<F>(respond: F) -> (u16, mpsc::Receiver<Value>)
    where
        F: Fn(&Value) -> Vec<String> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, seen_rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut framer = LineFramer::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                framer.push(&buf[..n]);
                while let Some(line) = framer.next_line() {
                    let request: Value = serde_json::from_slice(&line.payload).unwrap();
                    let replies = respond(&request);
                    seen_tx.send(request).await.unwrap();
                    for reply in replies {
                        stream.write_all(reply.as_bytes()).await.unwrap();
                        stream.write_all(b"\r").await.unwrap();
                    }
                }
            }
        });

        (port, seen_rx)
    }

    fn request_id(request: &Value) -> String {
        request["i"].as_str().unwrap().to_owned()
    }

    #[test]
    fn random_ids_use_the_documented_alphabet() {
        for _ in 0..100 {
            let id = random_id();
            assert_eq!(id.len(), 4);
            assert!(
                id.bytes().all(|b| ID_ALPHABET.contains(&b)),
                "bad id: {id:?}"
            );
        }
    }

    #[tokio::test]
    async fn send_message_returns_the_matching_result() {
        let (port, mut seen) = spawn_gateway(|request| {
            let id = request_id(request);
            // Interleave unsolicited traffic before the real reply.
            vec![
                "{\"m\":2,\"p\":[7600,83,1]}".to_owned(),
                "{\"i\":\"????\",\"r\":\"someone elses\"}".to_owned(),
                format!("{{\"i\":\"{id}\",\"r\":42}}"),
            ]
        })
        .await;

        let mut client = RpcClient::connect(port).await.unwrap();
        let result = client
            .send_message("get_hub_info", json!({}))
            .await
            .unwrap();
        assert_eq!(result, json!(42));

        let request = seen.recv().await.unwrap();
        assert_eq!(request["m"], json!("get_hub_info"));
        assert_eq!(request["p"], json!({}));
        assert_eq!(request["i"].as_str().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn error_replies_surface_the_decoded_body() {
        let (port, _seen) = spawn_gateway(|request| {
            let id = request_id(request);
            let body = BASE64.encode(b"{\"message\":\"slot is empty\"}");
            vec![format!("{{\"i\":\"{id}\",\"e\":\"{body}\"}}")]
        })
        .await;

        let mut client = RpcClient::connect(port).await.unwrap();
        let err = client.program_execute(3).await.unwrap_err();
        match err {
            RpcError::Hub(detail) => assert_eq!(detail, json!({"message": "slot is empty"})),
            other => panic!("expected hub error, got: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_reply_is_a_timeout() {
        let (port, _seen) = spawn_gateway(|_| Vec::new()).await;

        let mut client = RpcClient::connect(port).await.unwrap();
        client.set_recv_timeout(Duration::from_millis(50));
        let err = client.program_terminate().await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout));
    }

    #[tokio::test]
    async fn pending_notifications_are_drained_before_sending() {
        let (port, mut seen) = spawn_gateway(|request| {
            let id = request_id(request);
            vec![format!("{{\"i\":\"{id}\",\"r\":null}}")]
        })
        .await;

        let mut client = RpcClient::connect(port).await.unwrap();
        // First call; afterwards the gateway pushes nothing, so any stale
        // bytes in the client buffer come from this exchange only.
        client.send_message("program_terminate", json!({})).await.unwrap();
        client.send_message("get_hub_info", json!({})).await.unwrap();

        assert_eq!(seen.recv().await.unwrap()["m"], json!("program_terminate"));
        assert_eq!(seen.recv().await.unwrap()["m"], json!("get_hub_info"));
    }

    #[tokio::test]
    async fn upload_chunks_by_blocksize_under_one_transfer_id() {
        let (port, mut seen) = spawn_gateway(|request| {
            let id = request_id(request);
            match request["m"].as_str().unwrap() {
                "start_write_program" => {
                    vec![format!(
                        "{{\"i\":\"{id}\",\"r\":{{\"blocksize\":512,\"transferid\":\"t0\"}}}}"
                    )]
                }
                "write_package" => vec![format!("{{\"i\":\"{id}\",\"r\":0}}")],
                other => panic!("unexpected method: {other}"),
            }
        })
        .await;

        let data = vec![7u8; 1200];
        let mut client = RpcClient::connect(port).await.unwrap();
        upload_program(&mut client, "demo.py", &data, 0, |_, _| {})
            .await
            .unwrap();

        let start = seen.recv().await.unwrap();
        assert_eq!(start["m"], json!("start_write_program"));
        assert_eq!(start["p"]["size"], json!(1200));
        assert_eq!(start["p"]["meta"]["name"], json!("demo.py"));
        assert_eq!(start["p"]["meta"]["type"], json!("python"));

        // 1200 bytes at blocksize 512: two full chunks and one 176-byte tail.
        let expected_b64_lens = [684, 684, 236];
        for expected in expected_b64_lens {
            let package = seen.recv().await.unwrap();
            assert_eq!(package["m"], json!("write_package"));
            assert_eq!(package["p"]["transferid"], json!("t0"));
            assert_eq!(
                package["p"]["data"].as_str().unwrap().len(),
                expected
            );
        }
        assert!(
            tokio_timeout(Duration::from_millis(100), seen.recv())
                .await
                .is_err(),
            "no extra write_package calls expected"
        );
    }

    #[tokio::test]
    async fn upload_reports_progress_per_chunk() {
        let (port, _seen) = spawn_gateway(|request| {
            let id = request_id(request);
            match request["m"].as_str().unwrap() {
                "start_write_program" => vec![format!(
                    "{{\"i\":\"{id}\",\"r\":{{\"blocksize\":100,\"transferid\":\"t1\"}}}}"
                )],
                _ => vec![format!("{{\"i\":\"{id}\",\"r\":0}}")],
            }
        })
        .await;

        let data = vec![1u8; 250];
        let mut client = RpcClient::connect(port).await.unwrap();
        let progress = std::sync::Mutex::new(Vec::new());
        upload_program(&mut client, "p", &data, 1, |sent, total| {
            progress.lock().unwrap().push((sent, total));
        })
        .await
        .unwrap();

        assert_eq!(
            *progress.lock().unwrap(),
            vec![(100, 250), (200, 250), (250, 250)]
        );
    }

    #[tokio::test]
    async fn malformed_upload_start_is_rejected() {
        let (port, _seen) = spawn_gateway(|request| {
            let id = request_id(request);
            vec![format!("{{\"i\":\"{id}\",\"r\":{{\"blocksize\":0}}}}")]
        })
        .await;

        let mut client = RpcClient::connect(port).await.unwrap();
        let err = client
            .start_write_program("p", 10, 0, 0, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Reply(_)));
    }

    #[tokio::test]
    async fn unparseable_lines_are_skipped() {
        let (port, _seen) = spawn_gateway(|request| {
            let id = request_id(request);
            vec![
                "garbage not json".to_owned(),
                format!("{{\"i\":\"{id}\",\"r\":1}}"),
            ]
        })
        .await;

        let mut client = RpcClient::connect(port).await.unwrap();
        let result = client.get_hub_info().await.unwrap();
        assert_eq!(result, json!(1));
        // Quiet period so the mock task finishes cleanly.
        sleep(Duration::from_millis(10)).await;
    }
}
