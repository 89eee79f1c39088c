//! Roster entries.
//!
//! Unlike orders and menu items, the roster file uses snake_case keys. It is
//! produced by an out-of-band import, loaded once at startup, and replaced
//! wholesale into the shared state.

use serde::{Deserialize, Serialize};

/// One student on the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub grade: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Student {
    pub fn new(
        id: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        grade: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            grade: grade.into(),
            nickname: None,
            email: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case_keys() {
        let json = serde_json::to_string(&Student::new("s-1", "Ada", "Lovelace", "11")).unwrap();
        assert!(json.contains("\"first_name\""));
        assert!(json.contains("\"last_name\""));
    }

    #[test]
    fn test_partial_entry_loads_with_defaults() {
        let student: Student = serde_json::from_str(r#"{"first_name":"Ada"}"#).unwrap();
        assert_eq!(student.first_name, "Ada");
        assert_eq!(student.id, "");
        assert_eq!(student.nickname, None);
    }
}
