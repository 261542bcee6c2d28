//! Best-effort webhook fan-out for `calculation.completed`, HMAC-signed
//! when a secret is configured. Never affects the transaction outcome.

use crate::types::CalcResultValue;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use std::time::Duration;

const DEADLINE: Duration = Duration::from_secs(5);
const MAX_ATTEMPTS: u32 = 3;

pub async fn send(
    client: &Client,
    url: &str,
    proposal_id: &str,
    result: &CalcResultValue,
    secret: Option<&str>,
) -> Result<(), String> {
    let body = serde_json::json!({
        "event": "calculation.completed",
        "proposalId": proposal_id,
        "result": result,
    })
    .to_string();

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let mut req = client.post(url).timeout(DEADLINE).body(body.clone()).header("content-type", "application/json");
        if let Some(secret) = secret {
            req = req.header("x-signature", sign(secret, &body));
        }

        match req.send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) if attempt >= MAX_ATTEMPTS => {
                return Err(format!("{url}: status {}", resp.status()));
            }
            Err(e) if attempt >= MAX_ATTEMPTS => return Err(format!("{url}: {e}")),
            Ok(resp) => {
                tracing::warn!(url, attempt, status = %resp.status(), "webhook attempt failed, retrying");
                tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt))).await;
            }
            Err(e) => {
                tracing::warn!(url, attempt, error = %e, "webhook attempt failed, retrying");
                tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt))).await;
            }
        }
    }
}

fn sign(secret: &str, body: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
