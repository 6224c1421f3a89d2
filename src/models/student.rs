use serde::{Deserialize, Serialize};

/// Shared across every tracked context in the same storage origin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    #[serde(default, alias = "nome")]
    pub first_name: String,
    #[serde(default, alias = "cognome")]
    pub last_name: String,
    #[serde(default, alias = "classe")]
    pub class_name: String,
}

impl StudentInfo {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        class_name: impl Into<String>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            class_name: class_name.into(),
        }
    }

    /// A record is only worth saving once both names are filled in.
    pub fn is_complete(&self) -> bool {
        !self.first_name.trim().is_empty() && !self.last_name.trim().is_empty()
    }
}
