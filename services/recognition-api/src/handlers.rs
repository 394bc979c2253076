//! HTTP surface of the service: the multipart recognition endpoint, upload
//! validation, and the success/error envelopes.

use actix_multipart::Multipart;
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use futures_util::StreamExt as _;
use serde_json::json;
use shared::config::Settings;
use shared::dto::{ErrorEnvelope, RequestContext, SuccessEnvelope};
use shared::error::{ErrorCatalog, ErrorCode};
use shared::llm::UpstreamClient;
use tracing::{error, info, warn};

use crate::{auth, decision};

pub const TRACE_HEADER: &str = "X-Trace-Id";

const ALLOWED_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/jpg"];

pub struct AppState {
    pub settings: Settings,
    pub catalog: ErrorCatalog,
    pub upstream: UpstreamClient,
}

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({"status": "ok"}))
}

struct Upload {
    image: Vec<u8>,
    mime: String,
    user_comment: Option<String>,
    locale: String,
}

pub async fn recognize_food(
    req: HttpRequest,
    payload: Multipart,
    state: web::Data<AppState>,
) -> HttpResponse {
    let ctx = RequestContext::new(
        req.headers()
            .get(TRACE_HEADER)
            .and_then(|value| value.to_str().ok()),
    );
    info!(trace_id = %ctx.trace_id, path = %req.path(), "recognition request received");

    if !auth::verify_api_key(&req, &state.settings.api_proxy_secret) {
        warn!(trace_id = %ctx.trace_id, "request rejected: invalid API key");
        return HttpResponse::Unauthorized()
            .insert_header((TRACE_HEADER, ctx.trace_id.clone()))
            .json(json!({"detail": "Invalid or missing API key"}));
    }

    // upload validation happens before any upstream call is made
    let upload = match read_upload(payload, &state.settings).await {
        Ok(upload) => upload,
        Err((code, detail)) => return error_response(&state, code, &detail, &ctx),
    };

    let outcome = decision::run(
        &state.upstream,
        &state.settings,
        &upload.image,
        &upload.mime,
        upload.user_comment.as_deref(),
        &upload.locale,
        &ctx,
    )
    .await;

    match outcome {
        decision::PipelineOutcome::Success { gate, recognition } => {
            info!(
                trace_id = %ctx.trace_id,
                items = recognition.items.len(),
                total_kcal = recognition.total.kcal,
                "recognition succeeded"
            );
            HttpResponse::Ok()
                .insert_header((TRACE_HEADER, ctx.trace_id.clone()))
                .json(SuccessEnvelope::new(&gate, recognition, &ctx.trace_id))
        }
        decision::PipelineOutcome::Rejected { code, detail } => {
            error_response(&state, code, &detail, &ctx)
        }
    }
}

async fn read_upload(
    mut payload: Multipart,
    settings: &Settings,
) -> Result<Upload, (ErrorCode, String)> {
    let mut image: Option<(Vec<u8>, String)> = None;
    let mut user_comment: Option<String> = None;
    let mut locale = "ru".to_string();

    while let Some(next) = payload.next().await {
        let mut field = next.map_err(|e| {
            (
                ErrorCode::InvalidImage,
                format!("malformed multipart payload: {e}"),
            )
        })?;
        let name = field.name().to_string();
        match name.as_str() {
            "image" => {
                let mime = field
                    .content_type()
                    .map(|m| m.to_string())
                    .unwrap_or_default();
                if !ALLOWED_CONTENT_TYPES.contains(&mime.as_str()) {
                    return Err((
                        ErrorCode::UnsupportedImageFormat,
                        format!("unsupported image content type: {mime:?}"),
                    ));
                }
                let mut buf: Vec<u8> = Vec::new();
                while let Some(chunk) = field.next().await {
                    let chunk = chunk.map_err(|e| {
                        (
                            ErrorCode::InvalidImage,
                            format!("failed reading image field: {e}"),
                        )
                    })?;
                    if buf.len() + chunk.len() > settings.max_image_size_bytes {
                        return Err((
                            ErrorCode::ImageTooLarge,
                            format!(
                                "image exceeds the {} byte limit",
                                settings.max_image_size_bytes
                            ),
                        ));
                    }
                    buf.extend_from_slice(&chunk);
                }
                if buf.is_empty() {
                    return Err((ErrorCode::InvalidImage, "uploaded image is empty".into()));
                }
                image = Some((buf, mime));
            }
            "user_comment" => user_comment = Some(read_text(&mut field).await?),
            "locale" => {
                let value = read_text(&mut field).await?;
                if !value.trim().is_empty() {
                    locale = value.trim().to_string();
                }
            }
            _ => drain(&mut field).await,
        }
    }

    let (image, mime) = image.ok_or_else(|| {
        (
            ErrorCode::InvalidImage,
            "multipart field `image` is missing".to_string(),
        )
    })?;
    Ok(Upload {
        image,
        mime,
        user_comment: user_comment.filter(|c| !c.trim().is_empty()),
        locale,
    })
}

async fn read_text(field: &mut actix_multipart::Field) -> Result<String, (ErrorCode, String)> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| {
            (
                ErrorCode::InvalidImage,
                format!("failed reading form field: {e}"),
            )
        })?;
        buf.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn drain(field: &mut actix_multipart::Field) {
    while let Some(_chunk) = field.next().await {}
}

/// Builds the error envelope for `code`. The full detail is logged server
/// side; the client only ever sees the catalog entry. In legacy mode the
/// HTTP status is forced to 200 and the body stays authoritative.
fn error_response(
    state: &web::Data<AppState>,
    code: ErrorCode,
    detail: &str,
    ctx: &RequestContext,
) -> HttpResponse {
    let descriptor = state.catalog.describe(code);
    error!(trace_id = %ctx.trace_id, code = %code, detail, "request failed");

    let body = ErrorEnvelope {
        status: "error",
        error_code: code,
        user_title: descriptor.user_title.to_string(),
        user_message: descriptor.user_message.to_string(),
        user_actions: descriptor
            .user_actions
            .iter()
            .map(|action| action.to_string())
            .collect(),
        allow_retry: descriptor.allow_retry,
        trace_id: ctx.trace_id.clone(),
    };

    let status = if state.settings.legacy_http_200 {
        StatusCode::OK
    } else {
        StatusCode::from_u16(descriptor.http_status).unwrap_or(StatusCode::BAD_GATEWAY)
    };
    HttpResponse::build(status)
        .insert_header((TRACE_HEADER, ctx.trace_id.clone()))
        .json(body)
}
