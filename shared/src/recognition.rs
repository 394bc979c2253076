//! Nutrition recognition stage: the full estimation call.
//!
//! The prompt encodes the weight-prioritization contract: weights stated by
//! the user ("курица 150 г") are ground truth and may only be overridden by
//! an outright visual contradiction. Comments listing several ingredients
//! produce one item per ingredient; an empty or dish-only comment produces a
//! single aggregate item.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::coerce;
use crate::config::Settings;
use crate::dto::{RecognitionOutcome, TotalNutrition};
use crate::error::UpstreamError;
use crate::llm::{self, ChatRequest, UpstreamClient};
use crate::utils::preview;

pub const RECOGNITION_MAX_TOKENS: u32 = 2000;

/// Explicit weight expressions such as "150 г", "200 гр" or "80 g".
static GRAMS_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\b\d+\s*(г|гр|g)\b").ok());

pub fn has_explicit_grams(user_comment: Option<&str>) -> bool {
    match (user_comment, GRAMS_RE.as_ref()) {
        (Some(comment), Some(re)) => re.is_match(comment),
        _ => false,
    }
}

pub fn build_recognition_prompt(user_comment: Option<&str>, locale: &str) -> String {
    let comment = user_comment.map(str::trim).filter(|c| !c.is_empty());
    let has_weights = has_explicit_grams(comment);

    if locale == "ru" {
        let comment_section = format!(
            "\n=== КОММЕНТАРИЙ ПОЛЬЗОВАТЕЛЯ ===\n{}\n================================\n",
            comment.unwrap_or("Комментарий отсутствует")
        );
        let weight_instruction = if has_weights {
            "\nВАЖНО: ПОЛЬЗОВАТЕЛЬ УКАЗАЛ ТОЧНЫЕ ВЕСА ПРОДУКТОВ. НЕ МЕНЯЙ ИХ БЕЗ ЯВНОГО ПРОТИВОРЕЧИЯ С ФОТО."
        } else {
            ""
        };
        format!(
            "Ты — профессиональный диетолог-технолог. Твоя задача — оценить КБЖУ по фото максимально точно.\n\
             {comment_section}{weight_instruction}\n\
             \n\
             ПРАВИЛА:\n\
             1) Распознавай ВСЮ ЕДУ И НАПИТКИ на фото. Игнорируй фоновые объекты (стол, техника, руки, мебель).\n\
             2) Если комментарий пустой или содержит только название блюда — верни ОДНО блюдо целиком.\n\
             3) Если в комментарии перечислены ингредиенты — верни каждый ингредиент отдельной строкой в items.\n\
             4) Если в комментарии указаны веса (например: \"курица 150 г, рис 200 г\"):\n\
                - Считай эти веса основным источником правды\n\
                - Не меняй grams, кроме явного противоречия с фото\n\
                - Если сомневаешься — оставь веса и опиши сомнения в model_notes\n\
             5) ВАЖНО: Даже если на фото только один предмет без контекста (фрукт, овощ, продукт) — распознай его и оцени\n\
             6) НЕ УГАДЫВАЙ: Если не можешь определить что это за еда — верни items=[] и укажи причину в model_notes\n\
             \n\
             ОТВЕТ: ВЕРНИ ТОЛЬКО ВАЛИДНЫЙ JSON ОБЪЕКТ (без текста/markdown).\n\
             \n\
             ФОРМАТ:\n\
             {{\n\
               \"items\": [\n\
                 {{\"name\": \"название продукта (ТОЛЬКО РУССКИЙ язык)\", \"grams\": число, \"kcal\": число, \"protein\": число, \"fat\": число, \"carbohydrates\": число}}\n\
               ],\n\
               \"total\": {{\"kcal\": число, \"protein\": число, \"fat\": число, \"carbohydrates\": число}},\n\
               \"model_notes\": \"краткие комментарии (ТОЛЬКО РУССКИЙ язык)\"\n\
             }}\n\
             \n\
             ЯЗЫКОВОЕ ПРАВИЛО: name и model_notes ТОЛЬКО НА РУССКОМ языке.\n"
        )
    } else {
        let comment_section = format!(
            "\n=== USER COMMENT ===\n{}\n====================\n",
            comment.unwrap_or("No comment provided")
        );
        let weight_instruction = if has_weights {
            "\nIMPORTANT: THE USER PROVIDED EXACT WEIGHTS. DO NOT CHANGE THEM WITHOUT AN EXPLICIT CONTRADICTION WITH THE PHOTO."
        } else {
            ""
        };
        format!(
            "You are a nutrition expert. Estimate nutrition from a photo.\n\
             {comment_section}{weight_instruction}\n\
             \n\
             RULES:\n\
             - Recognize all food and drinks; ignore background objects.\n\
             - If the comment is empty or only names a dish: return ONE dish item.\n\
             - If the comment lists ingredients: return each ingredient as a separate item.\n\
             - If the comment includes grams: treat them as primary truth; do not change unless the photo contradicts.\n\
             - IMPORTANT: Even if the photo shows only a single item without context (fruit, vegetable, product), recognize it and estimate.\n\
             - DO NOT GUESS: If you cannot determine what food this is, return items=[] and explain in model_notes.\n\
             \n\
             OUTPUT: ONLY a valid JSON object (no markdown, no extra text).\n\
             \n\
             FORMAT:\n\
             {{\n\
               \"items\": [\n\
                 {{\"name\": \"product/dish name\", \"grams\": number, \"kcal\": number, \"protein\": number, \"fat\": number, \"carbohydrates\": number}}\n\
               ],\n\
               \"total\": {{\"kcal\": number, \"protein\": number, \"fat\": number, \"carbohydrates\": number}},\n\
               \"model_notes\": \"brief notes\"\n\
             }}\n"
        )
    }
}

/// Runs the recognition call and validates its payload.
///
/// Transport and status failures surface as the corresponding
/// [`UpstreamError`]; a 200 whose content cannot be coerced into the items
/// contract is an upstream fault too and becomes [`UpstreamError::Payload`].
/// Totals are recomputed from the parsed items, never read from the model.
pub async fn recognize(
    upstream: &UpstreamClient,
    settings: &Settings,
    image: &[u8],
    mime: &str,
    user_comment: Option<&str>,
    locale: &str,
) -> Result<RecognitionOutcome, UpstreamError> {
    let data_url = llm::image_data_url(image, mime);
    let request = ChatRequest::vision(
        &settings.openrouter_model,
        RECOGNITION_MAX_TOKENS,
        build_recognition_prompt(user_comment, locale),
        data_url,
    );

    let raw = upstream
        .send_chat(&request, settings.recognition_timeout())
        .await?;
    if raw.status != 200 {
        return Err(UpstreamError::Status {
            status: raw.status,
            body: preview(&raw.body, 400),
        });
    }

    let content = llm::extract_content(&raw)?;
    info!(answer_preview = %preview(&content, 800), "recognition answer received");

    let data = coerce::coerce_object(&content)
        .map_err(|e| UpstreamError::Payload(e.to_string()))?;
    let (items, model_notes) =
        coerce::parse_food_items(&data).map_err(|e| UpstreamError::Payload(e.to_string()))?;

    let total = TotalNutrition::sum_of(&items);
    Ok(RecognitionOutcome { items, total, model_notes })
}
