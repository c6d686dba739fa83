//! Result shapes returned by the terminal operations.

use serde::{Deserialize, Serialize};

use crate::backends::Record;

/// One page of records with its position in the whole result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated {
    /// Number of matching records across all pages.
    pub total: u64,
    /// Page size.
    pub per_page: u64,
    /// 1-based page number.
    pub current_page: u64,
    /// Number of the last page, `0` when nothing matches.
    pub last_page: u64,
    /// 1-based position of the first record of the page.
    pub from: u64,
    /// 1-based position of the last possible record of the page.
    pub to: u64,
    /// The records.
    pub data: Vec<Record>,
}

impl Paginated {
    /// Computes the page arithmetic for `total` records.
    pub fn new(total: u64, per_page: u64, current_page: u64, data: Vec<Record>) -> Self {
        let per_page = per_page.max(1);
        let current_page = current_page.max(1);
        Self {
            total,
            per_page,
            current_page,
            last_page: total.div_ceil(per_page),
            from: per_page * (current_page - 1) + 1,
            to: per_page * current_page,
            data,
        }
    }
}

/// Count plus scalar aggregates of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Number of matching records.
    pub count: u64,
    /// Sum of the target field, `0` when nothing contributes.
    pub sum: serde_json::Value,
    /// Largest value of the target field.
    pub max: serde_json::Value,
    /// Smallest value of the target field.
    pub min: serde_json::Value,
    /// Grouped buckets when grouping is configured, otherwise empty.
    pub graph: Vec<Record>,
}

/// Outcome of an import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    /// `SUCCESS` when at least one row was written, otherwise `FAIL`.
    pub message: String,
    /// Whether at least one row was written.
    pub status: bool,
    /// Rows removed. Imports never delete, so this stays `0`.
    pub deleted: u64,
    /// Rows skipped: not an object, an empty unique key, or an update that matched nothing.
    pub ignored: u64,
    /// Rows created.
    pub imported: u64,
    /// Existing rows updated.
    pub updated: u64,
    /// The written records.
    pub data: Vec<Record>,
}

impl ImportReport {
    pub(crate) fn finish(mut self) -> Self {
        self.status = self.imported + self.updated > 0;
        self.message = if self.status { "SUCCESS" } else { "FAIL" }.to_string();
        self
    }
}

impl Default for ImportReport {
    fn default() -> Self {
        Self {
            message: "FAIL".to_string(),
            status: false,
            deleted: 0,
            ignored: 0,
            imported: 0,
            updated: 0,
            data: Vec::new(),
        }
    }
}

/// Outcome of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReport {
    /// Records removed.
    pub deleted: u64,
}
