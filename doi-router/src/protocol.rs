//! Wire types for the batch lookup endpoint.
//!
//! # Request
//! ```json
//! { "dois": ["10.1/a", "10.1/bad"] }
//! ```
//!
//! # Response
//! ```json
//! {
//!   "results": {
//!     "10.1/a": { "...": "provider payload, unchanged" },
//!     "10.1/bad": { "error": "not found", "message": "provider has no record for this identifier" }
//!   },
//!   "total": 2,
//!   "success": 1,
//!   "errors": 1,
//!   "errors_dict": {
//!     "10.1/bad": { "error": "not found", "message": "provider has no record for this identifier" }
//!   },
//!   "timed_out": false
//! }
//! ```
//!
//! `?include=jsonl,csv` adds line-oriented exports of the same results:
//! - `jsonl`: one JSON object per result, each tagged with its `doi`
//! - `csv`: a header row, then one row per result with a `doi` column, one
//!   column per top-level payload field and trailing `error`/`message` columns

use crate::errors::{DoiRouterError, Result};
use crate::types::{BatchResult, Identifier, LookupFailure, LookupOutcome};
use hyper::body::Bytes;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub dois: Vec<String>,
}

impl BatchRequest {
    pub fn from_bytes(bytes: &Bytes) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Error indicator used both for failed identifiers and rejected requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub error: String,
    pub message: String,
}

impl From<&LookupFailure> for ErrorEntry {
    fn from(failure: &LookupFailure) -> Self {
        Self {
            error: failure.category().to_string(),
            message: failure.to_string(),
        }
    }
}

impl From<&DoiRouterError> for ErrorEntry {
    fn from(err: &DoiRouterError) -> Self {
        Self {
            error: err.category().to_string(),
            message: err.to_string(),
        }
    }
}

/// Optional extras requested through the query string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseOptions {
    pub include_jsonl: bool,
    pub include_csv: bool,
}

impl ResponseOptions {
    /// Parses `include=jsonl,csv` (comma separated, repeatable) from a query string.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut options = Self::default();
        let Some(query) = query else {
            return options;
        };

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key != "include" {
                continue;
            }
            for format in value.split(',') {
                match format.trim() {
                    "jsonl" => options.include_jsonl = true,
                    "csv" => options.include_csv = true,
                    other => tracing::debug!(format = other, "Ignoring unknown include format"),
                }
            }
        }
        options
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    pub results: IndexMap<Identifier, JsonValue>,
    pub total: usize,
    pub success: usize,
    pub errors: usize,
    pub errors_dict: IndexMap<Identifier, ErrorEntry>,
    /// The batch deadline expired; entries marked `timeout` may have
    /// succeeded given more time.
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsonl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv: Option<String>,
}

impl BatchResponse {
    pub fn from_result(result: BatchResult, options: ResponseOptions) -> Result<Self> {
        let mut results = IndexMap::with_capacity(result.results.len());
        let mut errors_dict = IndexMap::new();

        for (identifier, outcome) in result.results {
            let value = match outcome {
                LookupOutcome::Success(payload) => payload,
                LookupOutcome::Failure(failure) => {
                    let entry = ErrorEntry::from(&failure);
                    let value = serde_json::to_value(&entry).map_err(serialization_error)?;
                    errors_dict.insert(identifier.clone(), entry);
                    value
                }
            };
            results.insert(identifier, value);
        }

        let jsonl = match options.include_jsonl {
            true => Some(render_jsonl(&results)?),
            false => None,
        };
        let csv = match options.include_csv {
            true => Some(render_csv(&results, &errors_dict)?),
            false => None,
        };

        Ok(Self {
            results,
            total: result.total,
            success: result.success,
            errors: result.errors,
            errors_dict,
            timed_out: result.timed_out,
            jsonl,
            csv,
        })
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let json = serde_json::to_vec(self).map_err(serialization_error)?;
        Ok(Bytes::from(json))
    }
}

fn serialization_error(e: impl std::fmt::Display) -> DoiRouterError {
    DoiRouterError::ResponseSerializationError(e.to_string())
}

/// One line per result. Objects get a `doi` field added; any other payload is
/// wrapped as `{"doi": .., "value": ..}`.
fn render_jsonl(results: &IndexMap<Identifier, JsonValue>) -> Result<String> {
    let mut lines = Vec::with_capacity(results.len());
    for (identifier, value) in results {
        let line = match value {
            JsonValue::Object(fields) => {
                let mut fields = fields.clone();
                fields.insert("doi".to_string(), JsonValue::from(identifier.as_str()));
                JsonValue::Object(fields)
            }
            other => serde_json::json!({ "doi": identifier.as_str(), "value": other }),
        };
        lines.push(serde_json::to_string(&line).map_err(serialization_error)?);
    }
    Ok(lines.join("\n"))
}

/// Columns written by the CSV export itself rather than taken from payloads.
const CSV_FIXED_COLUMNS: [&str; 3] = ["doi", "error", "message"];

/// Payload columns are the top-level fields of successful payloads in order of
/// first appearance. Nested values are written as compact JSON.
fn render_csv(
    results: &IndexMap<Identifier, JsonValue>,
    errors_dict: &IndexMap<Identifier, ErrorEntry>,
) -> Result<String> {
    let mut fields: IndexSet<&str> = IndexSet::new();
    for (identifier, value) in results {
        if errors_dict.contains_key(identifier) {
            continue;
        }
        if let JsonValue::Object(object) = value {
            fields.extend(
                object
                    .keys()
                    .map(String::as_str)
                    .filter(|key| !CSV_FIXED_COLUMNS.contains(key)),
            );
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(
            std::iter::once("doi")
                .chain(fields.iter().copied())
                .chain(["error", "message"]),
        )
        .map_err(serialization_error)?;

    for (identifier, value) in results {
        let mut record = Vec::with_capacity(fields.len() + CSV_FIXED_COLUMNS.len());
        record.push(identifier.as_str().to_string());
        match errors_dict.get(identifier) {
            Some(entry) => {
                record.extend(fields.iter().map(|_| String::new()));
                record.push(entry.error.clone());
                record.push(entry.message.clone());
            }
            None => {
                record.extend(fields.iter().map(|field| csv_cell(value.get(*field))));
                record.extend([String::new(), String::new()]);
            }
        }
        writer.write_record(&record).map_err(serialization_error)?;
    }

    let bytes = writer.into_inner().map_err(serialization_error)?;
    String::from_utf8(bytes).map_err(serialization_error)
}

fn csv_cell(value: Option<&JsonValue>) -> String {
    match value {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_result() -> BatchResult {
        let mut results = IndexMap::new();
        results.insert(
            Identifier::new("10.1/a"),
            LookupOutcome::Success(json!({"doi": "10.1/a", "is_oa": true})),
        );
        results.insert(
            Identifier::new("10.1/bad"),
            LookupOutcome::Failure(LookupFailure::NotFound),
        );
        BatchResult {
            results,
            total: 2,
            success: 1,
            errors: 1,
            timed_out: false,
        }
    }

    #[test]
    fn test_request_parsing() {
        let request =
            BatchRequest::from_bytes(&Bytes::from_static(br#"{"dois": ["10.1/a", "10.1/b"]}"#))
                .unwrap();
        assert_eq!(request.dois, vec!["10.1/a", "10.1/b"]);

        assert!(BatchRequest::from_bytes(&Bytes::from_static(br#"{"doi": "10.1/a"}"#)).is_err());
        assert!(BatchRequest::from_bytes(&Bytes::from_static(b"not json")).is_err());
    }

    #[test]
    fn test_response_shape() {
        let response = BatchResponse::from_result(sample_result(), ResponseOptions::default())
            .unwrap();
        let parsed: JsonValue = serde_json::from_slice(&response.to_bytes().unwrap()).unwrap();

        assert_eq!(
            parsed,
            json!({
                "results": {
                    "10.1/a": {"doi": "10.1/a", "is_oa": true},
                    "10.1/bad": {
                        "error": "not found",
                        "message": "provider has no record for this identifier"
                    }
                },
                "total": 2,
                "success": 1,
                "errors": 1,
                "errors_dict": {
                    "10.1/bad": {
                        "error": "not found",
                        "message": "provider has no record for this identifier"
                    }
                },
                "timed_out": false
            })
        );
    }

    #[test]
    fn test_jsonl_rendering() {
        let options = ResponseOptions::from_query(Some("include=csv,jsonl"));
        assert!(options.include_jsonl);

        let response = BatchResponse::from_result(sample_result(), options).unwrap();
        let jsonl = response.jsonl.unwrap();
        let lines: Vec<JsonValue> = jsonl
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["doi"], "10.1/a");
        assert_eq!(lines[0]["is_oa"], true);
        assert_eq!(lines[1]["doi"], "10.1/bad");
        assert_eq!(lines[1]["error"], "not found");
    }

    #[test]
    fn test_csv_rendering() {
        let mut result = sample_result();
        result.results.insert(
            Identifier::new("10.1/b"),
            LookupOutcome::Success(json!({
                "doi": "10.1/b",
                "title": "Commas, \"quotes\"",
                "oa_locations": [{"url": "https://example.org/b.pdf"}],
                "year": null
            })),
        );
        let options = ResponseOptions::from_query(Some("include=csv"));
        assert!(options.include_csv);
        assert!(!options.include_jsonl);

        let response = BatchResponse::from_result(result, options).unwrap();
        assert!(response.jsonl.is_none());
        let csv = response.csv.unwrap();

        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let headers: Vec<String> = reader
            .headers()
            .unwrap()
            .iter()
            .map(str::to_string)
            .collect();
        assert_eq!(
            headers,
            vec!["doi", "is_oa", "oa_locations", "title", "year", "error", "message"]
        );

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[0][0], "10.1/a");
        assert_eq!(&rows[0][1], "true");
        assert_eq!(&rows[0][5], "");

        assert_eq!(&rows[1][0], "10.1/bad");
        assert_eq!(&rows[1][1], "");
        assert_eq!(&rows[1][5], "not found");
        assert_eq!(&rows[1][6], "provider has no record for this identifier");

        assert_eq!(&rows[2][0], "10.1/b");
        assert_eq!(&rows[2][2], r#"[{"url":"https://example.org/b.pdf"}]"#);
        assert_eq!(&rows[2][3], "Commas, \"quotes\"");
        assert_eq!(&rows[2][4], "");
    }

    #[test]
    fn test_csv_for_empty_batch_is_header_only() {
        let options = ResponseOptions {
            include_csv: true,
            ..ResponseOptions::default()
        };
        let response = BatchResponse::from_result(BatchResult::empty(), options).unwrap();
        assert_eq!(response.csv.as_deref(), Some("doi,error,message\n"));
    }

    #[test]
    fn test_response_options_from_query() {
        assert_eq!(ResponseOptions::from_query(None), ResponseOptions::default());
        assert!(!ResponseOptions::from_query(Some("include=csv")).include_jsonl);
        assert!(!ResponseOptions::from_query(Some("format=jsonl")).include_jsonl);
        assert!(ResponseOptions::from_query(Some("a=1&include=jsonl")).include_jsonl);

        let both = ResponseOptions::from_query(Some("include=jsonl&include=csv"));
        assert!(both.include_jsonl && both.include_csv);
    }

    #[test]
    fn test_error_entry_for_rejected_batch() {
        let err = DoiRouterError::BatchTooLarge {
            size: 1001,
            max: 1000,
        };
        let entry = ErrorEntry::from(&err);
        assert_eq!(entry.error, "batch too large");
        assert!(entry.message.contains("1001"));
    }
}
