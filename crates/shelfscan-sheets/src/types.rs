//! Sheets v4 REST wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Values
// =============================================================================

/// A block of cell values addressed by an A1 range.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major_dimension: Option<String>,
    #[serde(default)]
    pub values: Vec<Vec<Value>>,
}

impl ValueRange {
    /// A single row to be written.
    pub fn row(cells: Vec<String>) -> Self {
        Self {
            range: None,
            major_dimension: None,
            values: vec![cells.into_iter().map(Value::String).collect()],
        }
    }

    /// A single row written to an explicit range.
    pub fn at(range: impl Into<String>, cells: Vec<String>) -> Self {
        Self {
            range: Some(range.into()),
            ..Self::row(cells)
        }
    }

    /// Cell values rendered as strings, row by row.
    pub fn string_rows(&self) -> Vec<Vec<String>> {
        self.values
            .iter()
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect()
    }
}

/// Render a cell as the text a user would see.
pub fn cell_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Body of `values:batchUpdate`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateValuesRequest {
    pub value_input_option: String,
    pub data: Vec<ValueRange>,
}

impl BatchUpdateValuesRequest {
    pub fn user_entered(data: Vec<ValueRange>) -> Self {
        Self {
            value_input_option: "USER_ENTERED".to_string(),
            data,
        }
    }
}

/// Response of `values:append`; only the updated range is of interest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendValuesResponse {
    #[serde(default)]
    pub updates: Option<UpdateValuesResponse>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateValuesResponse {
    #[serde(default)]
    pub updated_range: Option<String>,
    #[serde(default)]
    pub updated_rows: Option<u32>,
}

// =============================================================================
// Spreadsheet metadata
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadsheetMetadata {
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    #[serde(default)]
    pub sheets: Vec<Sheet>,
}

impl SpreadsheetMetadata {
    /// Find a tab by exact title.
    pub fn tab(&self, title: &str) -> Option<&SheetProperties> {
        self.sheets
            .iter()
            .map(|s| &s.properties)
            .find(|p| p.title == title)
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.sheets.iter().map(|s| s.properties.title.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sheet {
    #[serde(default)]
    pub properties: SheetProperties,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_id: Option<i64>,
    #[serde(default)]
    pub title: String,
}

// =============================================================================
// Structural batch updates
// =============================================================================

/// Body of `spreadsheets:batchUpdate`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchUpdateRequest {
    pub requests: Vec<SheetRequest>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SheetRequest {
    AddSheet { properties: SheetProperties },
    DeleteDimension { range: DimensionRange },
}

impl SheetRequest {
    pub fn add_sheet(title: impl Into<String>) -> Self {
        Self::AddSheet {
            properties: SheetProperties {
                sheet_id: None,
                title: title.into(),
            },
        }
    }

    /// Delete one row given its zero-based index.
    pub fn delete_row(sheet_id: i64, row_index: u32) -> Self {
        Self::DeleteDimension {
            range: DimensionRange {
                sheet_id,
                dimension: "ROWS".to_string(),
                start_index: row_index,
                end_index: row_index + 1,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionRange {
    pub sheet_id: i64,
    pub dimension: String,
    pub start_index: u32,
    pub end_index: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateResponse {
    #[serde(default)]
    pub replies: Vec<Reply>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    #[serde(default)]
    pub add_sheet: Option<AddSheetReply>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddSheetReply {
    #[serde(default)]
    pub properties: SheetProperties,
}

// =============================================================================
// A1 notation
// =============================================================================

/// Quote a tab title for use in A1 notation.
pub fn quote_tab(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

/// Range covering whole columns of a tab, e.g. `'Inventario'!A:Z`.
pub fn a1_range(tab: &str, cells: &str) -> String {
    format!("{}!{}", quote_tab(tab), cells)
}

/// Spreadsheet column letter for a zero-based column index.
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// A1 reference of one cell; `row` is one-based as in the sheet UI.
pub fn cell_ref(tab: &str, column: usize, row: u32) -> String {
    a1_range(tab, &format!("{}{}", column_letter(column), row))
}
