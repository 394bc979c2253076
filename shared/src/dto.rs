//! Wire contracts of the recognition pipeline.
//!
//! The canonical field names are `grams`, `kcal` and `carbohydrates`; the
//! serializers additionally emit the `amount_grams` / `calories` / `carbs`
//! aliases that older API consumers still read.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::error::ErrorCode;

/// One recognized food item. Constructed only by response coercion, which
/// guarantees a non-empty name and finite, non-negative numeric fields.
#[derive(Debug, Clone, PartialEq)]
pub struct FoodItem {
    pub name: String,
    pub grams: f64,
    pub kcal: f64,
    pub protein: f64,
    pub fat: f64,
    pub carbohydrates: f64,
}

impl Serialize for FoodItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(9))?;
        map.serialize_entry("name", &self.name)?;
        map.serialize_entry("grams", &self.grams)?;
        map.serialize_entry("kcal", &self.kcal)?;
        map.serialize_entry("protein", &self.protein)?;
        map.serialize_entry("fat", &self.fat)?;
        map.serialize_entry("carbohydrates", &self.carbohydrates)?;
        map.serialize_entry("amount_grams", &self.grams)?;
        map.serialize_entry("calories", &self.kcal)?;
        map.serialize_entry("carbs", &self.carbohydrates)?;
        map.end()
    }
}

/// Field-wise sum over a list of items. Always derived, never taken from the
/// model output directly.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TotalNutrition {
    pub kcal: f64,
    pub protein: f64,
    pub fat: f64,
    pub carbohydrates: f64,
}

impl TotalNutrition {
    /// Sum over zero items yields all-zero totals; the orchestrator treats
    /// that as an invalid recognition outcome.
    pub fn sum_of(items: &[FoodItem]) -> Self {
        items.iter().fold(Self::default(), |acc, item| Self {
            kcal: acc.kcal + item.kcal,
            protein: acc.protein + item.protein,
            fat: acc.fat + item.fat,
            carbohydrates: acc.carbohydrates + item.carbohydrates,
        })
    }
}

impl Serialize for TotalNutrition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(6))?;
        map.serialize_entry("kcal", &self.kcal)?;
        map.serialize_entry("protein", &self.protein)?;
        map.serialize_entry("fat", &self.fat)?;
        map.serialize_entry("carbohydrates", &self.carbohydrates)?;
        map.serialize_entry("calories", &self.kcal)?;
        map.serialize_entry("carbs", &self.carbohydrates)?;
        map.end()
    }
}

/// Outcome of the food gate.
///
/// `is_food == None` means the upstream gate answer could not be coerced into
/// an object. That is an upstream fault (retryable GATE_ERROR), not a content
/// rejection, and must never be collapsed into `Some(false)`.
#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    pub is_food: Option<bool>,
    pub confidence: Option<f64>,
    pub reason: String,
}

impl GateDecision {
    pub fn invalid() -> Self {
        Self {
            is_food: None,
            confidence: None,
            reason: "invalid_gate_response".into(),
        }
    }
}

/// Parsed result of the recognition stage.
#[derive(Debug, Clone, Serialize)]
pub struct RecognitionOutcome {
    pub items: Vec<FoodItem>,
    pub total: TotalNutrition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_notes: Option<String>,
}

/// Per-request correlation id, taken from the X-Trace-Id request header or
/// freshly generated. Threaded explicitly through the pipeline and echoed in
/// the response header and body.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub trace_id: String,
}

impl RequestContext {
    pub fn new(inbound: Option<&str>) -> Self {
        let trace_id = match inbound.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => v.to_string(),
            None => uuid::Uuid::new_v4().to_string()[..8].to_string(),
        };
        Self { trace_id }
    }
}

#[derive(Debug, Serialize)]
pub struct SuccessEnvelope {
    pub status: &'static str,
    pub is_food: bool,
    pub confidence: f64,
    pub gate_reason: String,
    pub trace_id: String,
    pub result: RecognitionOutcome,
}

impl SuccessEnvelope {
    pub fn new(gate: &GateDecision, result: RecognitionOutcome, trace_id: &str) -> Self {
        Self {
            status: "success",
            is_food: true,
            confidence: gate.confidence.unwrap_or(0.0),
            gate_reason: gate.reason.clone(),
            trace_id: trace_id.to_string(),
            result,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub status: &'static str,
    pub error_code: ErrorCode,
    pub user_title: String,
    pub user_message: String,
    pub user_actions: Vec<String>,
    pub allow_retry: bool,
    pub trace_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(name: &str, kcal: f64) -> FoodItem {
        FoodItem {
            name: name.into(),
            grams: 100.0,
            kcal,
            protein: 10.0,
            fat: 5.0,
            carbohydrates: 20.0,
        }
    }

    #[test]
    fn totals_are_field_wise_sums() {
        let items = vec![item("rice", 130.0), item("chicken", 320.0)];
        let total = TotalNutrition::sum_of(&items);
        assert_eq!(total.kcal, 450.0);
        assert_eq!(total.protein, 20.0);
        assert_eq!(total.fat, 10.0);
        assert_eq!(total.carbohydrates, 40.0);
    }

    #[test]
    fn empty_sum_is_all_zero() {
        assert_eq!(TotalNutrition::sum_of(&[]), TotalNutrition::default());
    }

    #[test]
    fn item_serializes_with_legacy_aliases() {
        let value = serde_json::to_value(item("oatmeal", 150.0)).unwrap();
        assert_eq!(value["grams"], json!(100.0));
        assert_eq!(value["amount_grams"], json!(100.0));
        assert_eq!(value["calories"], json!(150.0));
        assert_eq!(value["carbs"], json!(20.0));
    }

    #[test]
    fn total_serializes_with_legacy_aliases() {
        let value = serde_json::to_value(TotalNutrition::sum_of(&[item("x", 90.0)])).unwrap();
        assert_eq!(value["calories"], json!(90.0));
        assert_eq!(value["carbs"], json!(20.0));
    }

    #[test]
    fn trace_id_prefers_inbound_header() {
        let ctx = RequestContext::new(Some("abc-123"));
        assert_eq!(ctx.trace_id, "abc-123");
    }

    #[test]
    fn trace_id_generated_when_header_blank() {
        let ctx = RequestContext::new(Some("   "));
        assert_eq!(ctx.trace_id.len(), 8);
        let ctx = RequestContext::new(None);
        assert_eq!(ctx.trace_id.len(), 8);
    }
}
