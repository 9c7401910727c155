// 👤 Subject - the client/project the receipt calculation is built for
//
// Only the display-name pair is used: it becomes the lookup key that locates
// the subject's classification record.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    #[serde(default)]
    pub last_name: Option<String>,

    #[serde(default)]
    pub first_name: Option<String>,
}

impl Subject {
    pub fn new(last_name: impl Into<String>, first_name: impl Into<String>) -> Self {
        Subject {
            last_name: Some(last_name.into()),
            first_name: Some(first_name.into()),
        }
    }

    /// Lookup key: `"{last} {first}"`, a missing name reads as empty
    pub fn lookup_key(&self) -> String {
        format!(
            "{} {}",
            self.last_name.as_deref().unwrap_or_default(),
            self.first_name.as_deref().unwrap_or_default()
        )
    }

    /// Names of the fields the document did not carry
    pub fn missing_names(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.last_name.is_none() {
            missing.push("lastName");
        }
        if self.first_name.is_none() {
            missing.push("firstName");
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_key_is_last_then_first() {
        let subject = Subject::new("Иванов", "Иван");
        assert_eq!(subject.lookup_key(), "Иванов Иван");
    }

    #[test]
    fn test_decode_from_camel_case() {
        let subject: Subject = serde_json::from_value(serde_json::json!({
            "lastName": "Smith",
            "firstName": "Anna",
            "phone": "+7 700 000 00 00"
        }))
        .unwrap();

        assert_eq!(subject.lookup_key(), "Smith Anna");
    }

    #[test]
    fn test_missing_names_decode_empty() {
        let subject: Subject = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(subject, Subject::default());
        assert_eq!(subject.lookup_key(), " ");
        assert_eq!(subject.missing_names(), vec!["lastName", "firstName"]);

        let partial: Subject = serde_json::from_value(serde_json::json!({ "lastName": "Smith" })).unwrap();
        assert_eq!(partial.lookup_key(), "Smith ");
        assert_eq!(partial.missing_names(), vec!["firstName"]);
        assert!(Subject::new("Smith", "Anna").missing_names().is_empty());
    }
}
