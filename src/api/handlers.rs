use axum::{
    body::Bytes,
    extract::{FromRequestParts, Path, Query, Request},
    http::{request::Parts, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::{Map, Value};
use http_body_util::LengthLimitError;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::logic::{ExecutionContext, Interpreter, LogicError, RequestInfo};
use crate::model::{Claims, LogicStep, RequestSource};

/// Largest request body a generated endpoint will buffer
pub const BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    /// `error` carries the canonical reason phrase of `status`
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: message.into(),
        }
    }
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, message: impl Into<String>) -> HandlerError {
    (status, Json(ErrorResponse::new(status, message)))
}

impl From<LogicError> for HandlerError {
    fn from(err: LogicError) -> Self {
        error_response(err.status(), err.to_string())
    }
}

/// Request handler generated for one endpoint
pub struct EndpointHandler {
    pub label: String,
    pub source: RequestSource,
    pub status: StatusCode,
    pub steps: Vec<LogicStep>,
    pub deprecated: bool,
    pub timeout: Option<Duration>,
    pub interpreter: Arc<Interpreter>,
}

impl EndpointHandler {
    pub async fn handle(self: Arc<Self>, request: Request) -> Response {
        let deprecated = self.deprecated;
        let mut response = match self.run(request).await {
            Ok(result) => (self.status, Json(result)).into_response(),
            Err(error) => error.into_response(),
        };
        if deprecated {
            response
                .headers_mut()
                .insert("deprecation", HeaderValue::from_static("true"));
        }
        response
    }

    async fn run(&self, request: Request) -> Result<Value, HandlerError> {
        let (mut parts, body) = request.into_parts();

        let mut input = match self.source {
            RequestSource::Body => {
                let bytes = axum::body::to_bytes(body, BODY_LIMIT).await.map_err(body_error)?;
                body_input(&bytes)?
            }
            RequestSource::Query => query_input(&parts.uri),
            RequestSource::Header => header_input(&parts),
            RequestSource::Path => Value::Object(Map::new()),
        };
        merge_path_params(&mut input, &mut parts).await?;

        let cancellation = CancellationToken::new();
        let _cancel_on_drop = cancellation.clone().drop_guard();

        let info = RequestInfo::new(parts.method.clone(), parts.uri.clone(), parts.headers.clone());
        let mut ctx = ExecutionContext::new(info, cancellation);
        if let Some(deadline) = self
            .timeout
            .and_then(|timeout| tokio::time::Instant::now().checked_add(timeout))
        {
            ctx = ctx.with_deadline(deadline);
        }
        ctx.set_input(input);
        if let Some(claims) = parts.extensions.get::<Claims>() {
            ctx.set_claims(claims.clone());
        }

        let execution = self.interpreter.execute(&ctx, &self.steps);
        let outcome = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, execution)
                .await
                .unwrap_or(Err(LogicError::DeadlineExceeded)),
            None => execution.await,
        };

        outcome.map_err(|e| {
            if e.status().is_server_error() {
                log::error!("{} failed: {}", self.label, e);
            } else {
                log::debug!("{} rejected: {}", self.label, e);
            }
            e.into()
        })
    }
}

fn body_error(err: axum::Error) -> HandlerError {
    let mut source = Some(&err as &(dyn StdError + 'static));
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("request body exceeds {} bytes", BODY_LIMIT),
            );
        }
        source = e.source();
    }
    error_response(StatusCode::BAD_REQUEST, format!("could not read request body: {}", err))
}

/// JSON body as input; an empty body is an empty object
fn body_input(bytes: &Bytes) -> Result<Value, HandlerError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(bytes)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("invalid JSON body: {}", e)))
}

fn query_input(uri: &Uri) -> Value {
    let params = Query::<HashMap<String, String>>::try_from_uri(uri)
        .map(|Query(params)| params)
        .unwrap_or_default();
    Value::Object(
        params
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect(),
    )
}

fn header_input(parts: &Parts) -> Value {
    Value::Object(
        parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                let value = value.to_str().ok()?;
                Some((name.as_str().to_string(), Value::String(value.to_string())))
            })
            .collect(),
    )
}

/// Path parameters are merged into every input source and win over same-named keys
async fn merge_path_params(input: &mut Value, parts: &mut Parts) -> Result<(), HandlerError> {
    let params = match Path::<HashMap<String, String>>::from_request_parts(parts, &()).await {
        Ok(Path(params)) if !params.is_empty() => params,
        _ => return Ok(()),
    };
    match input {
        Value::Object(map) => {
            for (key, value) in params {
                map.insert(key, Value::String(value));
            }
            Ok(())
        }
        _ => Err(error_response(
            StatusCode::BAD_REQUEST,
            "request body must be a JSON object on routes with path parameters",
        )),
    }
}
