//! Line-delimited JSON-RPC front end.
//!
//! The host writes one request per line on stdin and reads one response per
//! line on stdout. Session transitions seen while an operation ran are
//! written as `event.publish` notifications ahead of that operation's response.

use std::io::Write;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::Config;
use crate::identity::{IdentityGateway, SessionChange, SessionSubscription};
use crate::relay::RelayClient;
use crate::samples;
use crate::store::EventLog;

// ─── JSON-RPC wire types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    #[serde(default)]
    jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const OPERATION_FAILED: i64 = -32000;

fn raw_response(id: Value, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        result: Some(result),
        error: None,
        id,
    }
}

fn ok_response(id: Value, data: Value) -> JsonRpcResponse {
    raw_response(
        id,
        json!({
            "success": true,
            "data": data,
            "message": null
        }),
    )
}

pub fn err_response(id: Value, code: i64, message: String) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        result: None,
        error: Some(JsonRpcError { code, message }),
        id,
    }
}

/// Write `value` as one line and flush.
pub fn emit_line(out: &mut dyn Write, value: &impl Serialize) {
    match serde_json::to_string(value) {
        Ok(line) => {
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize protocol message"),
    }
}

// ─── Shell ───────────────────────────────────────────────────────────────────

pub struct Shell {
    gateway: Arc<IdentityGateway>,
    relay: RelayClient,
    log: EventLog,
    webhook_url: String,
    sessions: SessionSubscription,
}

impl Shell {
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::new();
        Self::with_parts(
            Arc::new(IdentityGateway::from_config(&config.provider, client.clone())),
            RelayClient::new(client.clone()),
            EventLog::from_config(&config.provider, client),
            config.webhook_url.clone(),
        )
    }

    pub fn with_parts(
        gateway: Arc<IdentityGateway>,
        relay: RelayClient,
        log: EventLog,
        webhook_url: String,
    ) -> Self {
        let sessions = gateway.subscribe();
        Self {
            gateway,
            relay,
            log,
            webhook_url,
            sessions,
        }
    }

    pub async fn handle_request(
        &mut self,
        req: &JsonRpcRequest,
        out: &mut dyn Write,
    ) -> JsonRpcResponse {
        match req.method.as_str() {
            "initialize" => raw_response(
                req.id.clone(),
                json!({
                    "ready": true,
                    "identity_configured": self.gateway.is_configured(),
                    "store_configured": self.log.is_configured(),
                }),
            ),
            "shutdown" => {
                self.sessions.unsubscribe();
                raw_response(req.id.clone(), json!({}))
            }
            "execute" => self.handle_execute(req, out).await,
            _ => err_response(
                req.id.clone(),
                METHOD_NOT_FOUND,
                format!("Unknown method: {}", req.method),
            ),
        }
    }

    async fn handle_execute(
        &mut self,
        req: &JsonRpcRequest,
        out: &mut dyn Write,
    ) -> JsonRpcResponse {
        let operation = req
            .params
            .get("operation")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let input = req
            .params
            .get("input")
            .cloned()
            .unwrap_or(Value::Object(Default::default()));

        let result = match operation {
            "get_status" => Ok(self.op_get_status()),
            "sign_up" => self.op_sign_up(&input).await,
            "sign_in" => self.op_sign_in(&input).await,
            "sign_out" => to_value(self.gateway.sign_out().await),
            "get_current_user" => Ok(json!({ "user": self.gateway.current_user().await })),
            "send_test_webhook" => to_value(self.relay.test_connection(self.url(&input)).await),
            "send_crop_update" => self.op_send_crop_update(&input).await,
            "send_weather_alert" => self.op_send_weather_alert(&input).await,
            "send_sample_crop_update" => {
                let outcome = self
                    .relay
                    .send_crop_update(samples::crop_update(), self.url(&input))
                    .await;
                Ok(json!({ "outcome": outcome, "events": self.log.list().await }))
            }
            "send_sample_weather_alert" => {
                let outcome = self
                    .relay
                    .send_weather_alert(samples::weather_alert(Utc::now()), self.url(&input))
                    .await;
                Ok(json!({ "outcome": outcome, "events": self.log.list().await }))
            }
            "list_webhook_events" => to_value(self.log.list().await),
            _ => Err(format!("Unknown operation: {operation}")),
        };

        self.drain_session_events(out);

        match result {
            Ok(data) => ok_response(req.id.clone(), data),
            Err(msg) => err_response(req.id.clone(), OPERATION_FAILED, msg),
        }
    }

    /// Publish queued session transitions to the host.
    fn drain_session_events(&mut self, out: &mut dyn Write) {
        while let Some(change) = self.sessions.try_recv() {
            emit_line(out, &session_notification(&change));
        }
    }

    fn url<'a>(&'a self, input: &'a Value) -> &'a str {
        input
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.webhook_url)
    }

    // ─── Operations ──────────────────────────────────────────────────────────

    fn op_get_status(&self) -> Value {
        json!({
            "identity_configured": self.gateway.is_configured(),
            "store_configured": self.log.is_configured(),
            "webhook_url": self.webhook_url,
        })
    }

    async fn op_sign_up(&self, input: &Value) -> Result<Value, String> {
        let (email, password) = credentials(input)?;
        to_value(self.gateway.sign_up(email, password).await)
    }

    async fn op_sign_in(&self, input: &Value) -> Result<Value, String> {
        let (email, password) = credentials(input)?;
        to_value(self.gateway.sign_in(email, password).await)
    }

    async fn op_send_crop_update(&self, input: &Value) -> Result<Value, String> {
        let data = input.get("data").cloned().ok_or("missing required field: data")?;
        to_value(self.relay.send_crop_update(data, self.url(input)).await)
    }

    async fn op_send_weather_alert(&self, input: &Value) -> Result<Value, String> {
        let data = input.get("data").cloned().ok_or("missing required field: data")?;
        to_value(self.relay.send_weather_alert(data, self.url(input)).await)
    }
}

fn credentials(input: &Value) -> Result<(&str, &str), String> {
    let email = input
        .get("email")
        .and_then(|v| v.as_str())
        .ok_or("missing required field: email")?;
    let password = input
        .get("password")
        .and_then(|v| v.as_str())
        .ok_or("missing required field: password")?;
    Ok((email, password))
}

fn to_value(value: impl Serialize) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

fn session_notification(change: &SessionChange) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "event.publish",
        "params": {
            "type": change.event,
            "subject": "session",
            "data": change,
        }
    })
}
