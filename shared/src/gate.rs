//! Food detection gate.
//!
//! A cheap pre-check answering one question: could this image reasonably be
//! food? The gate grants permission, it does not identify anything. Uncertain
//! images pass with low confidence and are allowed to degrade downstream
//! instead of being rejected here, so the prompt is deliberately permissive.

use serde_json::Value;
use tracing::warn;

use crate::coerce;
use crate::config::Settings;
use crate::dto::GateDecision;
use crate::error::UpstreamError;
use crate::llm::{self, ChatRequest, UpstreamClient};
use crate::utils::preview;

pub const GATE_MAX_TOKENS: u32 = 200;

pub fn build_gate_prompt(locale: &str) -> &'static str {
    if locale == "ru" {
        "Проанализируй изображение. Это может быть еда или съедобный продукт?\n\
         \n\
         ПРАВИЛА:\n\
         - Если изображение МОЖЕТ разумно представлять еду или съедобный продукт → is_food=true\n\
         - Еда может быть в любом контексте: на тарелке, без контекста, один предмет, несколько предметов\n\
         - НЕ ОТВЕРГАЙ фрукты, овощи, продукты без тарелки или стола\n\
         - ТОЛЬКО для: скриншоты, мемы, интерфейсы, живые животные, лица людей, документы → is_food=false\n\
         - При сомнении между \"возможно еда\" и \"точно не еда\" → is_food=true с низкой уверенностью\n\
         \n\
         ОТВЕТ: Только валидный JSON:\n\
         {\"is_food\": boolean, \"confidence\": float от 0 до 1, \"reason\": \"короткая причина\"}"
    } else {
        "Analyze the image. Could this reasonably be food or an edible product?\n\
         \n\
         RULES:\n\
         - If the image COULD reasonably represent food or an edible product → is_food=true\n\
         - Food can be in any context: on a plate, without context, single item, multiple items\n\
         - DO NOT reject fruits, vegetables or products without a plate or table\n\
         - ONLY reject: screenshots, memes, interfaces, live animals, human faces, documents → is_food=false\n\
         - When in doubt between \"possibly food\" and \"definitely not food\" → is_food=true with low confidence\n\
         \n\
         OUTPUT: Only valid JSON:\n\
         {\"is_food\": boolean, \"confidence\": float 0-1, \"reason\": \"short reason\"}"
    }
}

/// Parses the gate completion text.
///
/// An answer that cannot be coerced into an object yields `is_food = None`,
/// which callers must treat as an upstream fault, never as "not food".
/// Within a valid object, missing fields take conservative defaults and the
/// confidence is clamped into [0, 1].
pub fn parse_gate_decision(text: &str) -> GateDecision {
    let obj = match coerce::coerce_object(text) {
        Ok(obj) => obj,
        Err(e) => {
            warn!(error = %e, raw_preview = %preview(text, 200), "gate answer not coercible");
            return GateDecision::invalid();
        }
    };

    let is_food = obj.get("is_food").and_then(Value::as_bool).unwrap_or(false);
    let confidence = obj
        .get("confidence")
        .and_then(coerce::as_f64_lenient)
        .unwrap_or(0.0);
    let reason = match obj.get("reason") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => "unknown".to_string(),
    };

    GateDecision {
        is_food: Some(is_food),
        confidence: Some(coerce::clamp_unit(confidence)),
        reason,
    }
}

/// Runs the gate call through the retrying upstream client.
///
/// A non-200 final status is an error, with 429 flagged so the caller can
/// classify it as a rate limit; it is never downgraded to a default decision.
pub async fn check_gate(
    upstream: &UpstreamClient,
    settings: &Settings,
    image: &[u8],
    mime: &str,
    locale: &str,
) -> Result<GateDecision, UpstreamError> {
    let data_url = llm::image_data_url(image, mime);
    let request = ChatRequest::vision(
        settings.gate_model(),
        GATE_MAX_TOKENS,
        build_gate_prompt(locale).to_string(),
        data_url,
    );

    let raw = upstream.send_chat(&request, settings.gate_timeout()).await?;
    if raw.status == 429 {
        return Err(UpstreamError::Status {
            status: 429,
            body: format!("gate rate limited: {}", preview(&raw.body, 200)),
        });
    }
    if raw.status != 200 {
        return Err(UpstreamError::Status {
            status: raw.status,
            body: preview(&raw.body, 200),
        });
    }

    let content = llm::extract_content(&raw)?;
    Ok(parse_gate_decision(&content))
}
