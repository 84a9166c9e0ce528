//! Axum HTTP boundary: tender queries plus the e-Zamówienia relay.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Html,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use przetarg_adapters::{EzamowieniaAdapter, EzamowieniaNotice};
use przetarg_core::{Source, Tender, TenderAttachment};
use przetarg_storage::{QueryFacade, TenderPage, TenderQuery};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

mod error;

pub use error::{ApiError, ValidationError};

pub const CRATE_NAME: &str = "przetarg-web";

const RELAY_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone)]
pub struct AppState {
    pub facade: QueryFacade,
    pub relay: EzamowieniaAdapter,
}

impl AppState {
    pub fn new(facade: QueryFacade, relay: EzamowieniaAdapter) -> Self {
        Self { facade, relay }
    }
}

#[derive(Debug, Deserialize, Default)]
struct TendersParams {
    source: Option<String>,
    page: Option<String>,
    per_page: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RelayParams {
    date_from: Option<String>,
    date_to: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/tenders", get(list_tenders_handler))
        .route("/api/v1/tenders/{id}", get(tender_handler))
        .route("/api/v1/tenders/{id}/html", get(tender_html_handler))
        .route("/api/v1/tenders/{id}/attachments", get(tender_attachments_handler))
        .route("/api/v1/ezamowienia", get(ezamowienia_relay_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Serves until `shutdown` resolves, then lets in-flight requests finish.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = %listener.local_addr()?, "http server listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn list_tenders_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TendersParams>,
) -> Result<Json<TenderPage>, ApiError> {
    let query = TenderQuery {
        source: params
            .source
            .as_deref()
            .map(|value| {
                value.parse::<Source>().map_err(|_| ValidationError::InvalidParameter {
                    param: "source",
                    value: value.to_string(),
                })
            })
            .transpose()?,
        page: parse_count("page", params.page.as_deref())?,
        per_page: parse_count("per_page", params.per_page.as_deref())?,
    };
    Ok(Json(state.facade.list_tenders(&query).await?))
}

async fn tender_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Tender>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.facade.tender_by_id(id).await?))
}

async fn tender_html_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Html<String>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Html(state.facade.description_by_id(id).await?))
}

async fn tender_attachments_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TenderAttachment>>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.facade.attachments_for_tender(id).await?))
}

/// Validates both dates before touching the upstream API.
async fn ezamowienia_relay_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RelayParams>,
) -> Result<Json<Vec<EzamowieniaNotice>>, ApiError> {
    let (from, to) = parse_relay_range(&params)?;
    Ok(Json(state.relay.fetch(from, to).await?))
}

fn parse_id(raw: &str) -> Result<i64, ValidationError> {
    raw.parse().map_err(|_| ValidationError::InvalidParameter {
        param: "id",
        value: raw.to_string(),
    })
}

fn parse_count(param: &'static str, raw: Option<&str>) -> Result<Option<usize>, ValidationError> {
    raw.map(|value| {
        value
            .parse()
            .map_err(|_| ValidationError::InvalidParameter {
                param,
                value: value.to_string(),
            })
    })
    .transpose()
}

fn parse_relay_range(params: &RelayParams) -> Result<(NaiveDate, NaiveDate), ValidationError> {
    let from = parse_date("date_from", params.date_from.as_deref())?;
    let to = parse_date("date_to", params.date_to.as_deref())?;
    if from > to {
        return Err(ValidationError::DateRangeReversed { from, to });
    }
    Ok((from, to))
}

fn parse_date(param: &'static str, raw: Option<&str>) -> Result<NaiveDate, ValidationError> {
    let value = raw
        .filter(|v| !v.is_empty())
        .ok_or(ValidationError::MissingParameter(param))?;
    let invalid = || ValidationError::InvalidDate {
        param,
        value: value.to_string(),
    };
    // chrono accepts unpadded fields; the wire format does not.
    if value.len() != 10 {
        return Err(invalid());
    }
    NaiveDate::parse_from_str(value, RELAY_DATE_FORMAT).map_err(|_| invalid())
}
