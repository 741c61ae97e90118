// WhatsApp Gateway — Evolution API Helpers
// create_instance, extract_qr, delete_instance, connection_state,
// send_text, send_presence

use super::EvolutionSettings;
use crate::atoms::error::{EngineError, EngineResult};
use log::{info, warn};
use serde_json::json;

// ── Instance Management ────────────────────────────────────────────────

fn instance_token() -> String {
    format!("zap-{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

fn create_body(instance_name: &str, webhook_url: &str) -> serde_json::Value {
    // v1.x format: webhook is a plain string URL, no "integration" field.
    // A unique token per create avoids "Token already exists" collisions.
    json!({
        "instanceName": instance_name,
        "token": instance_token(),
        "qrcode": true,
        "webhook": webhook_url,
    })
}

/// Create the remote instance and return its QR payload (empty when the
/// session is already paired).
pub(crate) async fn create_instance(
    client: &reqwest::Client,
    settings: &EvolutionSettings,
    instance_name: &str,
    webhook_url: &str,
) -> EngineResult<String> {
    let url = format!("{}/instance/create", settings.api_url);

    info!("[whatsapp] Creating instance '{}'", instance_name);

    let resp = client
        .post(&url)
        .header("apikey", &settings.api_key)
        .json(&create_body(instance_name, webhook_url))
        .send()
        .await?;

    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    info!("[whatsapp] Instance create response [{}]: {}", status, preview(&text, 500));

    if status.is_success() {
        let resp_json: serde_json::Value = serde_json::from_str(&text)?;
        return Ok(extract_qr(&resp_json));
    }

    if !is_conflict(&text) {
        return Err(EngineError::Other(format!("Create instance failed ({}): {}", status, text)));
    }

    // Instance with this name already exists: delete it and retry once
    info!("[whatsapp] Instance/token conflict, deleting instance and recreating...");
    delete_instance(client, settings, instance_name).await;

    let retry = client
        .post(&url)
        .header("apikey", &settings.api_key)
        .json(&create_body(instance_name, webhook_url))
        .send()
        .await?;

    let status = retry.status();
    let text = retry.text().await.unwrap_or_default();
    info!("[whatsapp] Instance create (retry) response [{}]: {}", status, preview(&text, 500));

    if !status.is_success() {
        return Err(EngineError::Other(format!(
            "Create instance failed after delete ({}): {}",
            status, text
        )));
    }

    let resp_json: serde_json::Value = serde_json::from_str(&text).unwrap_or_default();
    Ok(extract_qr(&resp_json))
}

fn is_conflict(body: &str) -> bool {
    let lower = body.to_lowercase();
    let instance_exists = lower.contains("instance") && (lower.contains("already") || lower.contains("exists"));
    let token_exists = lower.contains("token") && lower.contains("already");
    instance_exists || token_exists
}

/// Extract the QR payload from the various Evolution API response shapes.
pub(crate) fn extract_qr(resp: &serde_json::Value) -> String {
    // v1.x create:  { "qrcode": { "base64": "data:image/..." } }
    // v1.x connect: { "base64": "data:image/..." }
    // webhook:      { "qrcode": "data:image/..." }
    let qr = resp["qrcode"]["base64"]
        .as_str()
        .or_else(|| resp["base64"].as_str())
        .or_else(|| resp["qrcode"].as_str().filter(|s| s.starts_with("data:")))
        .unwrap_or("")
        .to_string();

    if qr.is_empty() {
        warn!("[whatsapp] No QR code in response (session may already be paired)");
    } else {
        info!("[whatsapp] QR code extracted ({} bytes)", qr.len());
    }

    qr
}

/// Delete a remote instance. Failures are logged only.
pub(crate) async fn delete_instance(client: &reqwest::Client, settings: &EvolutionSettings, instance_name: &str) {
    let url = format!("{}/instance/delete/{}", settings.api_url, instance_name);

    match client.delete(&url).header("apikey", &settings.api_key).send().await {
        Ok(resp) => {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            info!("[whatsapp] Delete instance response [{}]: {}", status, preview(&text, 200));
        }
        Err(e) => warn!("[whatsapp] Delete instance failed: {}", e),
    }
    // Brief pause to let the API settle
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
}

/// Current connection state string ("open", "connecting", "close", ...).
pub(crate) async fn connection_state(
    client: &reqwest::Client,
    settings: &EvolutionSettings,
    instance_name: &str,
) -> EngineResult<String> {
    let url = format!("{}/instance/connectionState/{}", settings.api_url, instance_name);
    let body: serde_json::Value = client
        .get(&url)
        .header("apikey", &settings.api_key)
        .send()
        .await?
        .json()
        .await?;
    Ok(body["instance"]["state"]
        .as_str()
        .or_else(|| body["state"].as_str())
        .unwrap_or("")
        .to_string())
}

// ── Message Sending ────────────────────────────────────────────────────

pub(crate) async fn send_text(
    client: &reqwest::Client,
    settings: &EvolutionSettings,
    instance_name: &str,
    to: &str,
    text: &str,
) -> EngineResult<()> {
    let url = format!("{}/message/sendText/{}", settings.api_url, instance_name);
    let resp = client
        .post(&url)
        .header("apikey", &settings.api_key)
        .json(&json!({ "number": to, "text": text }))
        .send()
        .await
        .map_err(|e| EngineError::send(to, e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let err_text = resp.text().await.unwrap_or_default();
        return Err(EngineError::send(to, format!("sendText {}: {}", status, preview(&err_text, 200))));
    }
    Ok(())
}

pub(crate) async fn send_presence(
    client: &reqwest::Client,
    settings: &EvolutionSettings,
    instance_name: &str,
    to: &str,
) -> EngineResult<()> {
    let url = format!("{}/chat/sendPresence/{}", settings.api_url, instance_name);
    let resp = client
        .post(&url)
        .header("apikey", &settings.api_key)
        .json(&json!({
            "number": to,
            "options": { "presence": "composing", "delay": settings.typing_ms },
        }))
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(EngineError::Other(format!("sendPresence {}", resp.status())));
    }
    Ok(())
}

fn preview(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qr_from_create_response() {
        let v = json!({ "qrcode": { "base64": "data:image/png;base64,AAA" } });
        assert_eq!(extract_qr(&v), "data:image/png;base64,AAA");
    }

    #[test]
    fn qr_from_connect_response() {
        let v = json!({ "base64": "data:image/png;base64,BBB" });
        assert_eq!(extract_qr(&v), "data:image/png;base64,BBB");
    }

    #[test]
    fn qr_string_must_be_data_url() {
        assert_eq!(extract_qr(&json!({ "qrcode": "data:x" })), "data:x");
        assert_eq!(extract_qr(&json!({ "qrcode": "plain" })), "");
        assert_eq!(extract_qr(&json!({})), "");
    }

    #[test]
    fn conflict_detection() {
        assert!(is_conflict("This instance name is already in use"));
        assert!(is_conflict("Token already exists"));
        assert!(!is_conflict("Unauthorized"));
    }

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("olá mundo", 3), "olá");
        assert_eq!(preview("abc", 10), "abc");
    }
}
