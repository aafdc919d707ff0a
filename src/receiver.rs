//! Inbound webhook endpoint.
//!
//! Every path is served by one handler running a fixed pipeline:
//! preflight, method guard, parse, dispatch, respond. Nothing is shared
//! between requests except the immutable [`ReceiverState`].

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN,
        },
        HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::error::ReceiverError;
use crate::types::{EventKind, WebhookEnvelope};

pub const SUCCESS_MESSAGE: &str = "Webhook processed successfully";

/// Largest request body read before giving up on a delivery.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

const CORS_ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";
const CORS_ALLOW_METHODS: &str = "POST, OPTIONS";

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Per-event hooks. The defaults only log.
#[async_trait]
pub trait EventHandlers: Send + Sync {
    async fn crop_update(&self, data: &Value) -> HandlerResult {
        info!(%data, "Processing crop update");
        Ok(())
    }

    async fn weather_alert(&self, data: &Value) -> HandlerResult {
        info!(%data, "Processing weather alert");
        Ok(())
    }

    async fn sensor_data(&self, data: &Value) -> HandlerResult {
        info!(%data, "Processing sensor data");
        Ok(())
    }
}

pub struct LoggingHandlers;

impl EventHandlers for LoggingHandlers {}

/// What to do with an `event` name that has no handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// Log it and still answer 200.
    #[default]
    Lenient,
    /// Answer 400.
    Strict,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(DispatchMode::Lenient),
            "strict" => Ok(DispatchMode::Strict),
            other => Err(format!("unknown dispatch mode: {other}")),
        }
    }
}

#[derive(Clone)]
pub struct ReceiverState {
    handlers: Arc<dyn EventHandlers>,
    mode: DispatchMode,
}

impl ReceiverState {
    pub fn new(handlers: Arc<dyn EventHandlers>, mode: DispatchMode) -> Self {
        Self { handlers, mode }
    }
}

impl Default for ReceiverState {
    fn default() -> Self {
        Self::new(Arc::new(LoggingHandlers), DispatchMode::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookAck {
    pub success: bool,
    pub message: String,
    pub event: String,
}

pub fn router(state: ReceiverState) -> Router {
    Router::new()
        .fallback(handle_webhook)
        .with_state(state)
        .layer(SetResponseHeaderLayer::if_not_present(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(CORS_ALLOW_HEADERS),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(CORS_ALLOW_METHODS),
        ))
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` (port 0 picks a free one) and serve in the background.
pub async fn start(addr: SocketAddr, state: ReceiverState) -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!(%local, "Webhook receiver bound");

    let app = router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Webhook receiver stopped");
        }
    });

    Ok(local)
}

async fn handle_webhook(State(state): State<ReceiverState>, request: Request) -> Response {
    let delivery_id = Uuid::new_v4();
    let method = request.method().clone();
    let span = info_span!("webhook", %delivery_id, %method);

    async move {
        match process(&state, &method, request.into_body()).await {
            Ok(Some(ack)) => (StatusCode::OK, Json(ack)).into_response(),
            Ok(None) => StatusCode::OK.into_response(),
            Err(e) => e.into_response(),
        }
    }
    .instrument(span)
    .await
}

/// `Ok(None)` is a preflight answer with an empty body. The body is only
/// read once the method guard has passed.
async fn process(
    state: &ReceiverState,
    method: &Method,
    body: Body,
) -> Result<Option<WebhookAck>, ReceiverError> {
    if *method == Method::OPTIONS {
        return Ok(None);
    }
    if *method != Method::POST {
        return Err(ReceiverError::MethodNotAllowed);
    }

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ReceiverError::Parse(format!("reading body: {e}")))?;
    let envelope: WebhookEnvelope =
        serde_json::from_slice(&body).map_err(|e| ReceiverError::Parse(e.to_string()))?;

    info!(
        event = %envelope.event,
        timestamp = envelope.timestamp.as_deref().unwrap_or_default(),
        data = %envelope.data,
        "Webhook received"
    );

    dispatch(state, &envelope).await?;

    Ok(Some(WebhookAck {
        success: true,
        message: SUCCESS_MESSAGE.to_string(),
        event: envelope.event,
    }))
}

async fn dispatch(state: &ReceiverState, envelope: &WebhookEnvelope) -> Result<(), ReceiverError> {
    let handlers = &state.handlers;
    let result = match envelope.kind() {
        Some(EventKind::CropUpdate) => handlers.crop_update(&envelope.data).await,
        Some(EventKind::WeatherAlert) => handlers.weather_alert(&envelope.data).await,
        Some(EventKind::SensorData) => handlers.sensor_data(&envelope.data).await,
        // Connectivity check: acknowledged, nothing to run.
        Some(EventKind::TestConnection) => Ok(()),
        None => {
            info!(event = %envelope.event, "Unknown webhook event");
            if state.mode == DispatchMode::Strict {
                return Err(ReceiverError::UnknownEvent(envelope.event.clone()));
            }
            Ok(())
        }
    };

    result.map_err(|e| ReceiverError::Dispatch {
        event: envelope.event.clone(),
        message: e.to_string(),
    })
}
