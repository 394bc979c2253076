//! Per-request orchestration: sequences gate and recognition and maps every
//! outcome onto the closed error taxonomy.
//!
//! The two upstream calls are strictly sequential; recognition only runs once
//! the gate has granted permission, which keeps the expensive call off
//! obvious non-food uploads.

use shared::config::Settings;
use shared::dto::{GateDecision, RecognitionOutcome, RequestContext};
use shared::error::{ErrorCode, UpstreamError};
use shared::gate;
use shared::llm::UpstreamClient;
use shared::recognition;
use tracing::{info, warn};

pub enum PipelineOutcome {
    Success {
        gate: GateDecision,
        recognition: RecognitionOutcome,
    },
    Rejected {
        code: ErrorCode,
        detail: String,
    },
}

/// Maps a recognition-stage transport failure onto its error code.
pub fn classify_recognition_failure(error: &UpstreamError) -> ErrorCode {
    if error.is_timeout() {
        ErrorCode::UpstreamTimeout
    } else if error.is_rate_limit() {
        ErrorCode::RateLimit
    } else {
        ErrorCode::UpstreamError
    }
}

pub async fn run(
    upstream: &UpstreamClient,
    settings: &Settings,
    image: &[u8],
    mime: &str,
    user_comment: Option<&str>,
    locale: &str,
    ctx: &RequestContext,
) -> PipelineOutcome {
    let decision = match gate::check_gate(upstream, settings, image, mime, locale).await {
        Ok(decision) => decision,
        Err(e) => {
            warn!(trace_id = %ctx.trace_id, error = %e, "gate stage failed");
            let code = if e.is_rate_limit() {
                ErrorCode::RateLimit
            } else {
                ErrorCode::GateError
            };
            return PipelineOutcome::Rejected { code, detail: e.to_string() };
        }
    };

    // None marks an unparseable upstream answer, which is a retryable fault,
    // not a statement about the image
    let Some(is_food) = decision.is_food else {
        warn!(trace_id = %ctx.trace_id, reason = %decision.reason, "gate answer unparseable");
        return PipelineOutcome::Rejected {
            code: ErrorCode::GateError,
            detail: "gate answer could not be parsed".into(),
        };
    };

    let confidence = decision.confidence.unwrap_or(0.0);
    if !is_food || confidence < settings.gate_min_confidence {
        info!(
            trace_id = %ctx.trace_id,
            is_food,
            confidence,
            reason = %decision.reason,
            "gate rejected content"
        );
        return PipelineOutcome::Rejected {
            code: ErrorCode::UnsupportedContent,
            detail: format!("gate verdict: is_food={is_food}, confidence={confidence:.2}"),
        };
    }

    let low_confidence_zone = confidence < settings.gate_med_confidence;
    info!(
        trace_id = %ctx.trace_id,
        confidence,
        low_confidence_zone,
        "gate passed, running recognition"
    );

    let outcome = match recognition::recognize(upstream, settings, image, mime, user_comment, locale)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(trace_id = %ctx.trace_id, error = %e, "recognition stage failed");
            return PipelineOutcome::Rejected {
                code: classify_recognition_failure(&e),
                detail: e.to_string(),
            };
        }
    };

    if outcome.items.is_empty() || !outcome.total.kcal.is_finite() {
        let code = if low_confidence_zone {
            ErrorCode::LowConfidence
        } else {
            ErrorCode::EmptyResult
        };
        info!(trace_id = %ctx.trace_id, code = %code, "recognition returned no usable items");
        return PipelineOutcome::Rejected {
            code,
            detail: outcome
                .model_notes
                .unwrap_or_else(|| "no items recognized".into()),
        };
    }

    PipelineOutcome::Success { gate: decision, recognition: outcome }
}
