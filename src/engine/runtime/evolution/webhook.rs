// WhatsApp Gateway — Webhook HTTP Listener
// run_webhook_listener, translate_webhook

use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::runtime::{EventSender, InboundMessage, RuntimeEvent};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Bind the webhook port. Split from the accept loop so a bind failure
/// surfaces as an initialization error.
pub(crate) async fn bind_webhook(port: u16) -> EngineResult<TcpListener> {
    let addr = format!("127.0.0.1:{}", port);
    TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::Other(format!("Failed to bind webhook listener on {}: {}", addr, e)))
}

/// Minimal HTTP listener that receives webhooks from the gateway and turns
/// them into runtime events. Checks `stop` every 2 seconds.
pub(crate) async fn run_webhook_listener(listener: TcpListener, stop: Arc<AtomicBool>, events: EventSender, tag: String) {
    info!("[whatsapp:{}] Webhook listener started", tag);

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let accept_result = tokio::time::timeout(std::time::Duration::from_secs(2), listener.accept()).await;

        let (mut stream, _peer) = match accept_result {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!("[whatsapp:{}] Accept error: {}", tag, e);
                continue;
            }
            Err(_) => continue, // Timeout: check stop signal
        };

        let mut buf = vec![0u8; 65536];
        let n = match stream.read(&mut buf).await {
            Ok(n) => n,
            Err(_) => continue,
        };
        let request = String::from_utf8_lossy(&buf[..n]).to_string();

        // Answer immediately; the gateway expects a quick 200
        let response = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK";
        let _ = stream.write_all(response.as_bytes()).await;
        drop(stream);

        let body = match request.find("\r\n\r\n") {
            Some(idx) => &request[idx + 4..],
            None => continue,
        };

        let payload: serde_json::Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(_) => continue,
        };

        for event in translate_webhook(&payload) {
            debug!("[whatsapp:{}] Webhook event {}", tag, event.kind());
            if events.send(event).is_err() {
                // Receiver gone: the instance was torn down
                return;
            }
        }
    }

    info!("[whatsapp:{}] Webhook listener stopped", tag);
}

/// Map one webhook payload to zero or more runtime events.
pub(crate) fn translate_webhook(payload: &serde_json::Value) -> Vec<RuntimeEvent> {
    let data = &payload["data"];
    match payload["event"].as_str().unwrap_or("") {
        "qrcode.updated" => {
            let qr = data["qrcode"]["base64"]
                .as_str()
                .or_else(|| data["qrcode"].as_str())
                .unwrap_or("");
            if qr.is_empty() {
                vec![]
            } else {
                vec![RuntimeEvent::Qr(qr.to_string())]
            }
        }
        "connection.update" => {
            let state = data["state"].as_str().unwrap_or("");
            match state {
                "open" | "connected" => vec![RuntimeEvent::Authenticated, RuntimeEvent::Ready],
                "close" => {
                    let code = data["statusReason"].as_u64().unwrap_or(0);
                    if code == 401 {
                        vec![RuntimeEvent::AuthFailure("session rejected by WhatsApp (401)".into())]
                    } else {
                        vec![RuntimeEvent::Disconnected(format!("connection closed ({})", code))]
                    }
                }
                _ => vec![],
            }
        }
        "logout.instance" => vec![RuntimeEvent::Disconnected("logged out".into())],
        "messages.upsert" => {
            let messages = match data.as_array() {
                Some(arr) => arr.iter().collect::<Vec<_>>(),
                None => vec![data],
            };
            messages.into_iter().filter_map(inbound_from).map(RuntimeEvent::Message).collect()
        }
        _ => vec![],
    }
}

fn inbound_from(msg: &serde_json::Value) -> Option<InboundMessage> {
    let key = &msg["key"];
    let text = msg["message"]["conversation"]
        .as_str()
        .or_else(|| msg["message"]["extendedTextMessage"]["text"].as_str())
        .unwrap_or("");
    if text.is_empty() {
        return None;
    }

    let remote_jid = key["remoteJid"].as_str().unwrap_or("");
    if remote_jid.is_empty() {
        return None;
    }

    Some(InboundMessage {
        from: remote_jid.to_string(),
        body: text.to_string(),
        display_name: msg["pushName"].as_str().filter(|n| !n.trim().is_empty()).map(str::to_string),
        from_self: key["fromMe"].as_bool().unwrap_or(false),
        one_to_one: remote_jid.ends_with("@s.whatsapp.net") || remote_jid.ends_with("@c.us"),
    })
}
