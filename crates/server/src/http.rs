use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use mama_contracts::{ErrorCode, ItemResponse};
use mama_core::{
    FieldCache, InitError, LookupError, LookupOutcome, MetadataLookup, MetadataStore,
};
use mama_store::PgMetadataStore;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::Instrument;
use ulid::Ulid;

use crate::config::{MamaConfig, StartupError};
use crate::instrumented::InstrumentedStore;

pub const REQUEST_ID_HEADER: &str = "x-mama-request-id";
const NO_STORE: &str = "must-revalidate,no-cache,no-store";
const MISSING_PARAMS_MESSAGE: &str = "Must supply field and value query parameters 'qf' and 'qv'";

#[derive(Clone)]
pub struct AppState {
    pub config: MamaConfig,
    lookup: MetadataLookup,
    shutdown: Arc<watch::Sender<bool>>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Resolves once `/shutdown` has been called with the configured key.
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub async fn requested(mut self) {
        let _ = self.rx.wait_for(|requested| *requested).await;
    }
}

/// Connects the Postgres store described by `config` and builds the router.
pub async fn router(config: MamaConfig) -> Result<(Router, ShutdownSignal), StartupError> {
    let pg = PgMetadataStore::connect(&config.store_options())
        .await
        .map_err(|err| StartupError {
            code: "ERR_DB_UNAVAILABLE",
            message: format!("failed to open metadata store: {}", err),
        })?;

    let store: Arc<dyn MetadataStore> = if config.db_metrics {
        Arc::new(InstrumentedStore::new(Arc::new(pg)))
    } else {
        Arc::new(pg)
    };

    router_with_store(config, store).await
}

pub async fn router_with_store(
    config: MamaConfig,
    store: Arc<dyn MetadataStore>,
) -> Result<(Router, ShutdownSignal), StartupError> {
    let lookup = MetadataLookup::new(
        store,
        Arc::new(FieldCache::new()),
        config.default_field.clone(),
    )
    .await
    .map_err(init_error)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState {
        config,
        lookup,
        shutdown: Arc::new(shutdown_tx),
    };

    let app = Router::new()
        .route("/item", get(item))
        .route("/ping", get(ping))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/shutdown", get(shutdown))
        .with_state(state);

    Ok((app, ShutdownSignal { rx: shutdown_rx }))
}

fn init_error(err: InitError) -> StartupError {
    let code = match &err {
        InitError::DefaultFieldInvalid(_) | InitError::DefaultFieldUnresolved(_) => {
            "ERR_DEFAULT_FIELD"
        }
        InitError::Lookup(_) => "ERR_DB_UNAVAILABLE",
    };
    StartupError {
        code,
        message: err.to_string(),
    }
}

#[derive(Debug, PartialEq, Eq)]
struct ItemParams {
    qf: String,
    qv: String,
    rf: Option<Vec<String>>,
}

/// First `qf` and `qv` win; every `rf` is kept in order. A blank `qf` is
/// rejected, while `qv` only has to be non-empty.
fn parse_item_params(pairs: Vec<(String, String)>) -> Result<ItemParams, ApiError> {
    let mut qf = None;
    let mut qv = None;
    let mut rf = Vec::new();

    for (key, value) in pairs {
        match key.as_str() {
            "qf" if qf.is_none() => qf = Some(value),
            "qv" if qv.is_none() => qv = Some(value),
            "rf" => rf.push(value),
            _ => {}
        }
    }

    match (qf, qv) {
        (Some(qf), Some(qv)) if !qf.trim().is_empty() && !qv.is_empty() => Ok(ItemParams {
            qf,
            qv,
            rf: (!rf.is_empty()).then_some(rf),
        }),
        _ => Err(json_error(
            StatusCode::BAD_REQUEST,
            ErrorCode::InvalidParams,
            MISSING_PARAMS_MESSAGE,
            false,
        )),
    }
}

async fn item(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Response {
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    let span = tracing::info_span!(
        "item.request",
        request_id = %request_id,
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let result: Result<Json<ItemResponse>, ApiError> = async {
        let Query(pairs) = query.map_err(|_| {
            json_error(
                StatusCode::BAD_REQUEST,
                ErrorCode::InvalidParams,
                MISSING_PARAMS_MESSAGE,
                false,
            )
        })?;
        let params = parse_item_params(pairs)?;

        let outcome = match state
            .lookup
            .lookup(&params.qf, &params.qv, params.rf.as_deref())
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                crate::metrics::observe_lookup_outcome("error");
                return Err(lookup_error_response(&err));
            }
        };
        crate::metrics::observe_lookup_outcome(outcome.as_str());

        match outcome {
            LookupOutcome::FieldNotFound(_) => Err(json_error(
                StatusCode::NOT_FOUND,
                ErrorCode::UnknownField,
                format!("No such field: {}", params.qf),
                false,
            )),
            LookupOutcome::NoMatches => Err(json_error(
                StatusCode::NOT_FOUND,
                ErrorCode::NoMatches,
                format!("No items found for: {}::{}", params.qf, params.qv),
                false,
            )),
            LookupOutcome::Matches(items) => Ok(Json(ItemResponse {
                field: params.qf,
                value: params.qv,
                items,
            })),
        }
    }
    .instrument(span.clone())
    .await;

    let mut response = match result {
        Ok(body) => body.into_response(),
        Err(err) => err.into_response(),
    };
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let status = response.status().as_u16();
    span.record("status", status);
    span.record("latency_ms", started.elapsed().as_millis() as u64);
    crate::metrics::observe_http_request("/item", "GET", status, started.elapsed());

    response
}

fn lookup_error_response(err: &LookupError) -> ApiError {
    if err.is_internal() {
        tracing::error!(alert = true, error = %err, "field cache invariant violated");
        return json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Internal,
            "Internal system error",
            false,
        );
    }

    tracing::warn!(error = %err, "metadata store unavailable");
    json_error(
        StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::StorageUnavailable,
        "metadata store unavailable",
        true,
    )
}

async fn ping() -> impl IntoResponse {
    let started = Instant::now();
    crate::metrics::observe_http_request("/ping", "GET", StatusCode::OK.as_u16(), started.elapsed());
    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, NO_STORE),
        ],
        "pong",
    )
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, bool>,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let mut checks = BTreeMap::new();

    let store_ready = state.lookup.store().ping().await.is_ok();
    checks.insert("store", store_ready);

    let all_ready = checks.values().all(|ok| *ok);
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    crate::metrics::observe_http_request("/readyz", "GET", status.as_u16(), started.elapsed());

    (
        status,
        Json(ReadyzResponse {
            status: if all_ready { "ready" } else { "not_ready" },
            checks,
        }),
    )
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    crate::metrics::set_field_cache_entries(state.lookup.resolver().cache().len());

    let rendered = crate::metrics::render();
    let status = if rendered.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    // Counted after rendering, so each scrape shows up in the next one.
    crate::metrics::observe_http_request("/metrics", "GET", status.as_u16(), started.elapsed());

    match rendered {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ShutdownParams {
    key: Option<String>,
}

async fn shutdown(
    State(state): State<AppState>,
    params: Result<Query<ShutdownParams>, QueryRejection>,
) -> Response {
    let started = Instant::now();
    let provided = params.ok().and_then(|Query(p)| p.key);

    let status = if shutdown_authorized(state.config.shutdown_key.as_deref(), provided.as_deref())
    {
        tracing::info!("shutdown requested");
        state.shutdown.send_replace(true);
        StatusCode::OK
    } else {
        tracing::warn!("rejected shutdown request");
        StatusCode::UNAUTHORIZED
    };

    let body = if status == StatusCode::OK {
        "Shutting down"
    } else {
        "Not authorized"
    };
    crate::metrics::observe_http_request("/shutdown", "GET", status.as_u16(), started.elapsed());

    (
        status,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, NO_STORE),
        ],
        body,
    )
        .into_response()
}

/// Both keys must be present and non-empty.
fn shutdown_authorized(expected: Option<&str>, provided: Option<&str>) -> bool {
    let expected = expected.map(str::trim).filter(|k| !k.is_empty());
    let provided = provided.map(str::trim).filter(|k| !k.is_empty());
    matches!((expected, provided), (Some(e), Some(p)) if e == p)
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let mut out = String::with_capacity(raw.len().min(MAX_LEN));

    for ch in raw.chars() {
        if out.len() >= MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    (!out.is_empty()).then_some(out)
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: ErrorCode,
    message: String,
    retryable: bool,
}

fn json_error(
    status: StatusCode,
    code: ErrorCode,
    message: impl Into<String>,
    retryable: bool,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            code,
            message: message.into(),
            retryable,
        }),
    )
}
