//! HTTP handlers for share record operations.
//! Streams upload and download bodies to avoid buffering in memory and
//! delegates lifecycle concerns to `ShareService`. Rate limiting gates the
//! upload and download entry points per client IP.

use crate::{
    errors::AppError,
    models::record::RecordView,
    ratelimit::Action,
    services::{
        sessions,
        share_service::{CreateRequest, EditRequest, ServiceStats, ShareError},
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration as TimeDelta, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::{io, net::SocketAddr, time::Duration};
use tokio_util::io::ReaderStream;

/// Upload metadata travels in headers so the body stays a raw byte stream.
const FILE_NAME_HEADER: &str = "x-file-name";
const SHARE_CODE_HEADER: &str = "x-share-code";
const SHARE_PASSWORD_HEADER: &str = "x-share-password";
const SHARE_TTL_HEADER: &str = "x-share-ttl-hours";
const SESSION_TOKEN_HEADER: &str = "x-session-token";
const UPLOAD_DEADLINE_HEADER: &str = "x-upload-deadline-secs";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub code: String,
    pub url: String,
    pub download_url: String,
    pub qr_url: String,
    pub filename: String,
    pub size_bytes: i64,
    pub is_protected: bool,
    pub expires_at: DateTime<Utc>,
    pub session_token: String,
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditBody {
    pub new_code: Option<String>,
    /// Empty string clears the password; absent leaves it unchanged.
    pub new_password: Option<String>,
    pub ttl_hours: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub code: String,
    pub available: bool,
}

/// POST `/files` — streaming upload.
pub async fn upload_file(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let client = addr.ip().to_string();
    state
        .limiter
        .check(&client, Action::Upload)
        .map_err(ShareError::from)?;

    let filename = header_str(&headers, FILE_NAME_HEADER)
        .ok_or(ShareError::MissingFileName)?
        .to_string();
    let session_token = sessions::identify(header_str(&headers, SESSION_TOKEN_HEADER));

    let declared_size = header_str(&headers, header::CONTENT_LENGTH.as_str())
        .and_then(|v| v.parse::<i64>().ok());
    let ttl = match header_str(&headers, SHARE_TTL_HEADER) {
        Some(raw) => Some(TimeDelta::hours(raw.parse::<i64>().map_err(|_| {
            AppError::new(StatusCode::BAD_REQUEST, "invalid x-share-ttl-hours")
        })?)),
        None => None,
    };
    let deadline = header_str(&headers, UPLOAD_DEADLINE_HEADER)
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);

    let request = CreateRequest {
        filename,
        declared_size,
        custom_code: header_str(&headers, SHARE_CODE_HEADER).map(str::to_string),
        password: header_str(&headers, SHARE_PASSWORD_HEADER).map(str::to_string),
        ttl,
        session_token: Some(session_token.clone()),
        deadline,
    };

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let view = state.shares.create(request, stream).await?;
    let url = state.shares.share_url(&view.code);
    let payload = UploadResponse {
        download_url: format!("{url}/download"),
        qr_url: format!("{url}/qr"),
        url,
        code: view.code,
        filename: view.filename,
        size_bytes: view.size_bytes,
        is_protected: view.is_protected,
        expires_at: view.expires_at,
        session_token: session_token.clone(),
    };

    let mut response = (StatusCode::CREATED, Json(payload)).into_response();
    if let Ok(value) = HeaderValue::from_str(&session_token) {
        response.headers_mut().insert(SESSION_TOKEN_HEADER, value);
    }
    Ok(response)
}

/// GET `/files/{code}` — record metadata.
pub async fn get_file(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<RecordView>, AppError> {
    Ok(Json(state.shares.read(&code).await?))
}

/// GET `/files/{code}/download?password=` — streamed payload.
pub async fn download_file(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(code): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let client = addr.ip().to_string();
    state
        .limiter
        .check(&client, Action::Download)
        .map_err(ShareError::from)?;

    let (view, file) = state
        .shares
        .authorize_and_open(&code, query.password.as_deref())
        .await?;

    let stream = ReaderStream::new(file);
    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = HeaderValue::from_str(&view.size_bytes.max(0).to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    let disposition = format!(
        "attachment; filename=\"{}\"",
        view.filename.replace(['"', '\r', '\n'], "_")
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// GET `/files/{code}/qr` — the access artifact.
pub async fn get_qr(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Response, AppError> {
    let svg = state.shares.open_artifact(&code).await?;
    let mut response = Response::new(Body::from(svg));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("image/svg+xml"),
    );
    Ok(response)
}

/// PATCH `/files/{code}` — partial edit.
pub async fn edit_file(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(body): Json<EditBody>,
) -> Result<Json<RecordView>, AppError> {
    let edit = EditRequest {
        new_code: body.new_code,
        new_password: body.new_password,
        new_ttl: body.ttl_hours.map(TimeDelta::hours),
    };
    Ok(Json(state.shares.edit(&code, edit).await?))
}

/// DELETE `/files/{code}` — soft-delete and reclaim.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<StatusCode, AppError> {
    state.shares.delete(&code).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/files` — records uploaded under the caller's session token.
pub async fn list_files(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<RecordView>>, AppError> {
    let records = match header_str(&headers, SESSION_TOKEN_HEADER) {
        Some(token) => state.shares.list_by_session(token).await?,
        None => Vec::new(),
    };
    Ok(Json(records))
}

/// GET `/codes/{code}/availability`.
pub async fn check_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let available = state.shares.check_code(&code).await?;
    Ok(Json(AvailabilityResponse { code, available }))
}

/// GET `/stats` — aggregate counters.
pub async fn get_stats(
    State(state): State<AppState>,
) -> Result<Json<ServiceStats>, AppError> {
    Ok(Json(state.shares.stats().await?))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
}
