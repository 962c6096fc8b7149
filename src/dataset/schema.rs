//! Column schema stored in a table dataset's `schema.json` meta item.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{DatasetError, Result};

/// One column of a table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key_index: Option<u32>,
}

/// The ordered columns of a table dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    /// Parse a schema from the JSON value of the `schema.json` meta item.
    pub fn from_value(dataset: &str, value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(|e| DatasetError::Schema {
            dataset: dataset.to_string(),
            message: format!("cannot parse schema.json: {}", e),
        })
    }

    /// The single primary-key column.
    pub fn primary_key(&self, dataset: &str) -> Result<&Column> {
        let mut keys = self.columns.iter().filter(|c| c.primary_key_index.is_some());
        match (keys.next(), keys.next()) {
            (Some(column), None) => Ok(column),
            (None, _) => Err(DatasetError::Schema {
                dataset: dataset.to_string(),
                message: "schema has no primary key column".to_string(),
            }),
            (Some(_), Some(_)) => Err(DatasetError::Schema {
                dataset: dataset.to_string(),
                message: "multi-column primary keys are not supported".to_string(),
            }),
        }
    }
}
