//! Shared query parameter types for API handlers.

use serde::Deserialize;

/// Addresses one row by a key column and the text of its value
/// (`?key=sid&value=42`).
#[derive(Debug, Deserialize)]
pub struct RowKeyParams {
    pub key: String,
    pub value: String,
}

/// `?view=` restricts column statistics to a view's rows.
#[derive(Debug, Deserialize)]
pub struct StatisticsParams {
    pub view: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PreviewParams {
    #[serde(default)]
    pub index: usize,
}

#[derive(Debug, Deserialize)]
pub struct RunLogParams {
    /// Action name.
    pub action: Option<String>,
    pub limit: Option<i64>,
}

/// `?key_value=&format=html` for survey forms.
#[derive(Debug, Deserialize)]
pub struct SurveyParams {
    pub key_value: String,
    #[serde(default)]
    pub format: Option<String>,
}
