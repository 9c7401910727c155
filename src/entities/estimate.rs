// 📋 Estimates - line-item documents keyed by subject id
//
// Sip-wall and roof estimates carry an ordered item list; the generic estimate
// exposes the contract price through `roofValues.contractPrice.value`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub total: Option<f64>,
}

impl LineItem {
    /// Fields of the wrong type read as missing
    fn from_value(value: &Value) -> Self {
        LineItem {
            name: value.get("name").and_then(Value::as_str).map(str::to_string),
            total: value.get("total").and_then(Value::as_f64),
        }
    }
}

/// Sip-wall or roof estimate
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LineItemDocument {
    #[serde(default, deserialize_with = "lenient_items")]
    pub items: Vec<LineItem>,
}

// One odd item must not hide the rest of the list
fn lenient_items<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<LineItem>, D::Error> {
    let raw = Vec::<Value>::deserialize(deserializer)?;
    Ok(raw.iter().map(LineItem::from_value).collect())
}

impl LineItemDocument {
    /// Total of the first item named exactly `name` (absent => 0)
    pub fn item_total(&self, name: &str) -> f64 {
        self.items
            .iter()
            .find(|item| item.name.as_deref() == Some(name))
            .and_then(|item| item.total)
            .unwrap_or(0.0)
    }

    /// Sum of `item_total` over several names
    pub fn sum_items<S: AsRef<str>>(&self, names: &[S]) -> f64 {
        names.iter().map(|name| self.item_total(name.as_ref())).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PricedValue {
    #[serde(default)]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoofValues {
    #[serde(default)]
    pub contract_price: Option<PricedValue>,
}

/// Generic estimate
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateDocument {
    #[serde(default)]
    pub roof_values: Option<RoofValues>,
}

impl EstimateDocument {
    /// `roofValues.contractPrice.value`, 0 when any level is missing
    pub fn contract_price(&self) -> f64 {
        self.roof_values
            .as_ref()
            .and_then(|roof| roof.contract_price.as_ref())
            .and_then(|price| price.value)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn line_items(value: serde_json::Value) -> LineItemDocument {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_item_total_first_match_wins() {
        let doc = line_items(json!({
            "items": [
                { "name": "a", "total": 10 },
                { "name": "b", "total": 20 },
                { "name": "a", "total": 99 }
            ]
        }));

        assert_eq!(doc.item_total("a"), 10.0);
        assert_eq!(doc.item_total("missing"), 0.0);
        assert_eq!(doc.sum_items(&["a", "b", "missing"]), 30.0);
    }

    #[test]
    fn test_item_without_total_contributes_zero() {
        let doc = line_items(json!({ "items": [{ "name": "a" }, { "name": "b", "total": null }] }));
        assert_eq!(doc.sum_items(&["a", "b"]), 0.0);

        let empty = line_items(json!({}));
        assert!(empty.items.is_empty());
    }

    #[test]
    fn test_odd_items_are_skipped_not_fatal() {
        let doc = line_items(json!({
            "items": [
                { "name": "a", "total": 10 },
                { "total": 7 },
                { "name": 42, "total": 1 },
                "garbage",
                { "name": "b", "total": "n/a" },
                { "name": "c", "total": 5.5 }
            ]
        }));

        assert_eq!(doc.items.len(), 6);
        assert_eq!(doc.sum_items(&["a", "b", "c"]), 15.5);
    }

    #[test]
    fn test_contract_price_nested_lookup() {
        let full: EstimateDocument = serde_json::from_value(json!({
            "roofValues": { "contractPrice": { "value": 5000000 } }
        }))
        .unwrap();
        assert_eq!(full.contract_price(), 5_000_000.0);

        for partial in [json!({}), json!({ "roofValues": {} }), json!({ "roofValues": { "contractPrice": {} } })] {
            let doc: EstimateDocument = serde_json::from_value(partial).unwrap();
            assert_eq!(doc.contract_price(), 0.0);
        }
    }
}
