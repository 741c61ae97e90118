// Zapmenu Engine — Licence Gate
//
// A pass/fail verdict consulted before an instance starts and periodically
// while it runs. Transport errors are distinct from an inactive verdict.

use crate::atoms::error::{EngineError, EngineResult};
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Active,
    Inactive(String),
}

#[async_trait]
pub trait EntitlementCheck: Send + Sync {
    async fn check(&self) -> EngineResult<Verdict>;
}

/// Gate that always passes (no licence server configured).
pub struct AlwaysActive;

#[async_trait]
impl EntitlementCheck for AlwaysActive {
    async fn check(&self) -> EngineResult<Verdict> {
        Ok(Verdict::Active)
    }
}

// ── HTTPS licence server ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntitlementSettings {
    pub url: String,
    pub key: String,
    /// Re-check cadence for running instances; 0 disables re-checks.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

fn default_interval() -> u64 {
    crate::atoms::constants::ENTITLEMENT_INTERVAL_SECS
}

#[derive(Debug, Deserialize)]
struct LicenceResponse {
    active: bool,
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpEntitlement {
    client: reqwest::Client,
    url: String,
    key: String,
}

impl HttpEntitlement {
    pub fn new(settings: &EntitlementSettings) -> Self {
        HttpEntitlement {
            client: reqwest::Client::new(),
            url: settings.url.clone(),
            key: settings.key.clone(),
        }
    }
}

#[async_trait]
impl EntitlementCheck for HttpEntitlement {
    async fn check(&self) -> EngineResult<Verdict> {
        let unreachable = |e: reqwest::Error| EngineError::Entitlement(format!("licence server unreachable: {}", e));

        let resp = self
            .client
            .get(&self.url)
            .query(&[("key", self.key.as_str())])
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await
            .map_err(unreachable)?;

        if !resp.status().is_success() {
            return Err(EngineError::Entitlement(format!("licence server answered {}", resp.status())));
        }

        let body: LicenceResponse = resp.json().await.map_err(unreachable)?;
        Ok(verdict_from(body))
    }
}

fn verdict_from(body: LicenceResponse) -> Verdict {
    if body.active {
        info!("[licence] Licence active");
        Verdict::Active
    } else {
        Verdict::Inactive(body.message.unwrap_or_else(|| "licence inactive or expired".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_active_passes() {
        assert_eq!(AlwaysActive.check().await.unwrap(), Verdict::Active);
    }

    #[test]
    fn inactive_body_carries_server_message() {
        let body: LicenceResponse = serde_json::from_str(r#"{"active": false, "message": "expirou"}"#).unwrap();
        assert_eq!(verdict_from(body), Verdict::Inactive("expirou".into()));
        let body: LicenceResponse = serde_json::from_str(r#"{"active": false}"#).unwrap();
        assert!(matches!(verdict_from(body), Verdict::Inactive(m) if m.contains("expired")));
    }

    #[test]
    fn settings_default_interval() {
        let s: EntitlementSettings = toml::from_str("url = \"https://x\"\nkey = \"k\"").unwrap();
        assert_eq!(s.interval_secs, 43_200);
    }
}
