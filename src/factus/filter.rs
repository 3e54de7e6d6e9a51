//! Invoice list filter normalization.
//!
//! Turns a loosely-typed filter (query string values, JSON from the UI) into
//! the exact query shape the provider's list endpoint accepts. Normalization
//! is pure and total: bad values fall back to defaults, unknown keys vanish.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Invoice status filter: every status, or one provider status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Code(u32),
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusFilter::All => write!(f, "all"),
            StatusFilter::Code(code) => write!(f, "{}", code),
        }
    }
}

impl Serialize for StatusFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StatusFilter::All => serializer.serialize_str("all"),
            StatusFilter::Code(code) => serializer.serialize_u32(*code),
        }
    }
}

/// Normalized invoice list filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceFilter {
    pub page: u32,
    pub status: StatusFilter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identification: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub names: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_code: Option<String>,
}

impl Default for InvoiceFilter {
    fn default() -> Self {
        Self {
            page: 1,
            status: StatusFilter::All,
            identification: None,
            names: None,
            number: None,
            prefix: None,
            reference_code: None,
        }
    }
}

impl InvoiceFilter {
    /// Query pairs in provider order: page, status, then present filters.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("page", self.page.to_string()), ("status", self.status.to_string())];
        let optional = [
            ("identification", &self.identification),
            ("names", &self.names),
            ("number", &self.number),
            ("prefix", &self.prefix),
            ("reference_code", &self.reference_code),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                pairs.push((key, value.clone()));
            }
        }
        pairs
    }

    /// URL-encoded query string, used for logging.
    pub fn to_query_string(&self) -> String {
        serde_urlencoded::to_string(self.to_query_pairs()).unwrap_or_default()
    }
}

/// Normalize a loosely-typed filter object.
///
/// Rules, in order:
/// 1. Missing or unusable `status` → `"all"`
/// 2. Missing or unusable `page` → `1`
/// 3. String filters pass through only when non-empty
/// 4. Unknown keys are dropped
pub fn normalize(raw: &Value) -> InvoiceFilter {
    let Some(map) = raw.as_object() else {
        return InvoiceFilter::default();
    };

    InvoiceFilter {
        page: map.get("page").and_then(coerce_page).unwrap_or(1),
        status: map
            .get("status")
            .and_then(coerce_status)
            .unwrap_or(StatusFilter::All),
        identification: text(map, "identification"),
        names: text(map, "names"),
        number: text(map, "number"),
        prefix: text(map, "prefix"),
        reference_code: text(map, "reference_code"),
    }
}

/// Normalize query-string parameters.
pub fn normalize_params(params: &HashMap<String, String>) -> InvoiceFilter {
    let map: Map<String, Value> = params
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    normalize(&Value::Object(map))
}

fn coerce_page(value: &Value) -> Option<u32> {
    let page = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }?;
    u32::try_from(page).ok().filter(|p| *p >= 1)
}

fn coerce_status(value: &Value) -> Option<StatusFilter> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|c| u32::try_from(c).ok())
            .map(StatusFilter::Code),
        Value::String(s) => {
            let s = s.trim();
            if s.eq_ignore_ascii_case("all") {
                Some(StatusFilter::All)
            } else {
                s.parse::<u32>().ok().map(StatusFilter::Code)
            }
        }
        _ => None,
    }
}

fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_filter_gets_defaults() {
        let filter = normalize(&json!({}));
        assert_eq!(filter.status, StatusFilter::All);
        assert_eq!(filter.page, 1);
        assert_eq!(
            serde_json::to_value(&filter).unwrap(),
            json!({"status": "all", "page": 1})
        );
    }

    #[test]
    fn test_explicit_page_and_status_no_extra_keys() {
        let filter = normalize(&json!({"page": 3, "status": 1}));
        assert_eq!(
            serde_json::to_value(&filter).unwrap(),
            json!({"status": 1, "page": 3})
        );
    }

    #[test]
    fn test_string_filters_only_when_non_empty() {
        let filter = normalize(&json!({
            "identification": "900123456",
            "names": "",
            "number": "   ",
            "prefix": "SETP",
            "reference_code": null
        }));
        assert_eq!(filter.identification.as_deref(), Some("900123456"));
        assert_eq!(filter.names, None);
        assert_eq!(filter.number, None);
        assert_eq!(filter.prefix.as_deref(), Some("SETP"));
        assert_eq!(filter.reference_code, None);
    }

    #[test]
    fn test_unknown_keys_dropped() {
        let filter = normalize(&json!({"page": 2, "sort": "desc", "token": "x"}));
        assert_eq!(
            serde_json::to_value(&filter).unwrap(),
            json!({"page": 2, "status": "all"})
        );
    }

    #[test]
    fn test_loose_values_coerced() {
        let filter = normalize(&json!({"page": "4", "status": "0", "identification": 123}));
        assert_eq!(filter.page, 4);
        assert_eq!(filter.status, StatusFilter::Code(0));
        assert_eq!(filter.identification.as_deref(), Some("123"));

        let filter = normalize(&json!({"status": "ALL"}));
        assert_eq!(filter.status, StatusFilter::All);
    }

    #[test]
    fn test_unusable_values_fall_back_to_defaults() {
        let filter = normalize(&json!({"page": 0, "status": "pending"}));
        assert_eq!(filter.page, 1);
        assert_eq!(filter.status, StatusFilter::All);

        let filter = normalize(&json!({"page": -2, "status": -1}));
        assert_eq!(filter.page, 1);
        assert_eq!(filter.status, StatusFilter::All);

        let filter = normalize(&json!({"page": "abc", "status": true}));
        assert_eq!(filter.page, 1);
        assert_eq!(filter.status, StatusFilter::All);
    }

    #[test]
    fn test_non_object_input_is_default() {
        assert_eq!(normalize(&json!(null)), InvoiceFilter::default());
        assert_eq!(normalize(&json!([1, 2])), InvoiceFilter::default());
    }

    #[test]
    fn test_query_pairs_order() {
        let filter = normalize(&json!({"reference_code": "REF-9", "page": 2, "names": "Ana"}));
        assert_eq!(
            filter.to_query_pairs(),
            vec![
                ("page", "2".to_string()),
                ("status", "all".to_string()),
                ("names", "Ana".to_string()),
                ("reference_code", "REF-9".to_string()),
            ]
        );
        assert_eq!(
            filter.to_query_string(),
            "page=2&status=all&names=Ana&reference_code=REF-9"
        );
    }

    #[test]
    fn test_normalize_params_from_query_string() {
        let params: HashMap<String, String> = [
            ("page".to_string(), "5".to_string()),
            ("status".to_string(), "1".to_string()),
            ("number".to_string(), "SETP990000001".to_string()),
            ("extra".to_string(), "ignored".to_string()),
        ]
        .into_iter()
        .collect();

        let filter = normalize_params(&params);
        assert_eq!(filter.page, 5);
        assert_eq!(filter.status, StatusFilter::Code(1));
        assert_eq!(filter.number.as_deref(), Some("SETP990000001"));
        assert_eq!(filter.prefix, None);
    }
}
