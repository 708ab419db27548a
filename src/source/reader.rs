// src/source/reader.rs
//
// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! Record reader over an object-store prefix.
//!
//! Objects are listed once, sorted by key and read one at a time, so only a
//! single (decompressed) object is held in memory. Records must already be
//! in non-decreasing timestamp order across the sorted objects.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::io::Cursor;
use tracing::{debug, info, warn};

use super::normalize::FieldMapping;
use super::{Record, RecordStream, SourceError};
use crate::config::SourceFormat;
use crate::constants::{DEFAULT_TIMESTAMP_ATTRIBUTE, RECORD_DATETIME_FORMAT};
use crate::object_store::{ObjectStore, store_for_uri};

/// How objects are selected and turned into records.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Field holding the domain timestamp, after normalisation.
    pub timestamp_attribute: String,
    pub format: SourceFormat,
    /// Only object URIs matching this pattern are read.
    pub pattern: Option<Regex>,
    pub mapping: FieldMapping,
    /// Skip unparsable records with a warning instead of failing the stream.
    pub skip_malformed: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            timestamp_attribute: DEFAULT_TIMESTAMP_ATTRIBUTE.to_string(),
            format: SourceFormat::Auto,
            pattern: None,
            mapping: FieldMapping::nyc_taxi(),
            skip_malformed: true,
        }
    }
}

impl ReaderOptions {
    pub fn with_timestamp_attribute(mut self, name: impl Into<String>) -> Self {
        self.timestamp_attribute = name.into();
        self
    }

    pub fn with_format(mut self, format: SourceFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn with_mapping(mut self, mapping: FieldMapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn skip_malformed(mut self, yes: bool) -> Self {
        self.skip_malformed = yes;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectFormat {
    Json,
    Csv,
}

impl ObjectFormat {
    /// Resolve `auto` from the object key; a trailing `.zst` is ignored.
    fn resolve(format: SourceFormat, uri: &str) -> Self {
        match format {
            SourceFormat::Json => ObjectFormat::Json,
            SourceFormat::Csv => ObjectFormat::Csv,
            SourceFormat::Auto => {
                let key = uri.strip_suffix(".zst").unwrap_or(uri).to_lowercase();
                if key.ends_with(".csv") {
                    ObjectFormat::Csv
                } else {
                    ObjectFormat::Json
                }
            }
        }
    }
}

/// Parse position inside the object currently being read.
enum ObjectCursor {
    Json {
        uri: String,
        text: String,
        offset: usize,
        line: usize,
    },
    Csv {
        uri: String,
        reader: csv::Reader<Cursor<Vec<u8>>>,
        header: Vec<String>,
        row: csv::StringRecord,
    },
}

impl ObjectCursor {
    fn open(uri: &str, format: ObjectFormat, data: Vec<u8>) -> Result<Self, SourceError> {
        let decode_err = |reason: String| SourceError::Decode {
            uri: uri.to_string(),
            reason,
        };

        match format {
            ObjectFormat::Json => {
                let text = String::from_utf8(data).map_err(|e| decode_err(e.to_string()))?;
                Ok(ObjectCursor::Json {
                    uri: uri.to_string(),
                    text,
                    offset: 0,
                    line: 0,
                })
            }
            ObjectFormat::Csv => {
                let mut reader = csv::ReaderBuilder::new()
                    .has_headers(true)
                    .flexible(true)
                    .comment(Some(b'#'))
                    .from_reader(Cursor::new(data));
                let header = reader
                    .headers()
                    .map_err(|e| decode_err(e.to_string()))?
                    .iter()
                    .map(str::to_string)
                    .collect();
                Ok(ObjectCursor::Csv {
                    uri: uri.to_string(),
                    reader,
                    header,
                    row: csv::StringRecord::new(),
                })
            }
        }
    }

    /// Next raw record with its `uri:line` location, or `None` at end of object.
    fn next_raw(&mut self, mapping: &FieldMapping) -> Option<(String, Result<Map<String, Value>, String>)> {
        match self {
            ObjectCursor::Json {
                uri,
                text,
                offset,
                line,
            } => loop {
                if *offset >= text.len() {
                    return None;
                }
                let rest = &text[*offset..];
                let (current, advance) = match rest.find('\n') {
                    Some(i) => (&rest[..i], i + 1),
                    None => (rest, rest.len()),
                };
                *offset += advance;
                *line += 1;

                let trimmed = current.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    continue;
                }

                let parsed = match serde_json::from_str::<Value>(trimmed) {
                    Ok(Value::Object(map)) => Ok(map),
                    Ok(other) => Err(format!("expected a JSON object, found {}", other)),
                    Err(e) => Err(e.to_string()),
                };
                return Some((format!("{}:{}", uri, line), parsed));
            },
            ObjectCursor::Csv {
                uri,
                reader,
                header,
                row,
            } => match reader.read_record(row) {
                Ok(true) => {
                    let line = row.position().map(|p| p.line()).unwrap_or(0);
                    Some((format!("{}:{}", uri, line), Ok(mapping.zip_row(header, row))))
                }
                Ok(false) => None,
                Err(e) => {
                    let line = e.position().map(|p| p.line()).unwrap_or(0);
                    Some((format!("{}:{}", uri, line), Err(e.to_string())))
                }
            },
        }
    }
}

/// [`RecordStream`] over every object below a prefix URI.
pub struct ObjectRecordReader {
    store: Box<dyn ObjectStore>,
    objects: VecDeque<String>,
    options: ReaderOptions,
    cursor: Option<ObjectCursor>,
    records_read: u64,
    skipped: u64,
}

impl ObjectRecordReader {
    /// List `prefix` using the backend selected by its scheme.
    pub async fn open(prefix: &str, options: ReaderOptions) -> Result<Self, SourceError> {
        let store = store_for_uri(prefix)?;
        Self::with_store(store, prefix, options).await
    }

    pub async fn with_store(
        store: Box<dyn ObjectStore>,
        prefix: &str,
        options: ReaderOptions,
    ) -> Result<Self, SourceError> {
        let mut objects = store.list(prefix, true).await?;
        if let Some(pattern) = &options.pattern {
            objects.retain(|uri| pattern.is_match(uri));
        }
        objects.sort();

        info!("found {} objects under {}", objects.len(), prefix);
        Ok(Self {
            store,
            objects: objects.into(),
            options,
            cursor: None,
            records_read: 0,
            skipped: 0,
        })
    }

    /// Objects not yet opened.
    pub fn remaining_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Malformed records dropped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    async fn open_object(&self, uri: &str) -> Result<ObjectCursor, SourceError> {
        debug!("reading {}", uri);
        let raw = self.store.get(uri).await?;

        let data = if uri.ends_with(".zst") {
            zstd::stream::decode_all(raw.as_ref()).map_err(|e| SourceError::Decode {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?
        } else {
            raw.to_vec()
        };

        ObjectCursor::open(uri, ObjectFormat::resolve(self.options.format, uri), data)
    }

    fn to_record(&self, raw: Map<String, Value>) -> Result<Record, String> {
        let normalized = self.options.mapping.normalize_record(raw)?;
        let attribute = self.options.mapping.normalize_name(&self.options.timestamp_attribute);
        let value = normalized
            .get(&attribute)
            .ok_or_else(|| format!("missing timestamp attribute {}", attribute))?;
        let timestamp = parse_timestamp(value)
            .ok_or_else(|| format!("invalid timestamp {}: {}", attribute, value))?;
        let payload = serde_json::to_vec(&normalized).map_err(|e| e.to_string())?;
        Ok(Record::new(timestamp, payload))
    }
}

#[async_trait]
impl RecordStream for ObjectRecordReader {
    async fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        loop {
            if self.cursor.is_none() {
                let Some(uri) = self.objects.pop_front() else {
                    if self.skipped > 0 {
                        info!("skipped {} malformed records", self.skipped);
                    }
                    return Ok(None);
                };
                self.cursor = Some(self.open_object(&uri).await?);
            }
            let Some(cursor) = self.cursor.as_mut() else {
                continue;
            };

            let Some((location, raw)) = cursor.next_raw(&self.options.mapping) else {
                self.cursor = None;
                continue;
            };

            match raw.and_then(|map| self.to_record(map)) {
                Ok(record) => {
                    self.records_read += 1;
                    return Ok(Some(record));
                }
                Err(reason) if self.options.skip_malformed => {
                    warn!("skipping malformed record at {}: {}", location, reason);
                    self.skipped += 1;
                }
                Err(reason) => return Err(SourceError::Malformed { location, reason }),
            }
        }
    }
}

/// Accepts `YYYY-MM-DD HH:MM:SS` (UTC), RFC 3339, or integer epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, RECORD_DATETIME_FORMAT) {
                return Some(naive.and_utc());
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            s.parse::<i64>()
                .ok()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}
