//! Line-protocol rendering.
//!
//! `measurement,tag=value,... field=value,... timestamp_ns`

use std::fmt::Write as _;

/// Backslash-escape commas, spaces and equals signs.
pub fn escape_identifier(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | ' ' | '=') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// One point: a measurement with ordered tags and float fields.
#[derive(Debug, Clone, PartialEq)]
pub struct LinePoint {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, f64)>,
    timestamp_ns: i64,
}

impl LinePoint {
    /// Start a point stamped with the current time.
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp_ns: chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: f64) -> Self {
        self.fields.push((key.into(), value));
        self
    }

    #[cfg(test)]
    pub fn timestamp(mut self, timestamp_ns: i64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    #[cfg(test)]
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    #[cfg(test)]
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[cfg(test)]
    pub fn field_value(&self, key: &str) -> Option<f64> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    /// Render without the trailing newline.
    ///
    /// Non-finite field values have no line-protocol form and are dropped.
    pub fn to_line(&self) -> String {
        let mut line = escape_identifier(&self.measurement);
        for (key, value) in &self.tags {
            let _ = write!(
                line,
                ",{}={}",
                escape_identifier(key),
                escape_identifier(value)
            );
        }

        let fields: Vec<String> = self
            .fields
            .iter()
            .filter(|(_, value)| value.is_finite())
            .map(|(key, value)| format!("{}={}", escape_identifier(key), value))
            .collect();
        let _ = write!(line, " {} {}", fields.join(","), self.timestamp_ns);
        line
    }
}
