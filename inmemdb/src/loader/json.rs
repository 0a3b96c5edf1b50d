//! JSON document loader.
//!
//! A `.json` source is a stream of concatenated JSON values, not an array:
//!
//! ```text
//! {"name": "first"}
//! {"name": "second"}
//! ```
//!
//! Each value becomes one document in the collection named after the file.

use super::{read_source, table_name, Loader};
use crate::database::Database;
use crate::error::{Error, Result};
use crate::source::Source;
use async_trait::async_trait;
use jzon::JsonValue;

/// Loads a stream of JSON documents into a collection.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLoader;

#[async_trait]
impl Loader for JsonLoader {
    fn extension(&self) -> &str {
        ".json"
    }

    fn name(&self) -> &str {
        "json"
    }

    async fn load(&self, database: &dyn Database, source: &Source) -> Result<usize> {
        let name = database.config().name().to_string();
        if !database.is_started() {
            return Err(Error::NotStarted(name));
        }
        let documents = database.as_documents().ok_or(Error::Unsupported {
            database: name,
            capability: "JSON documents",
        })?;

        let text = read_source(source, database.config().classpath()).await?;
        let collection = table_name(source, self.extension());

        let mut inserted = 0;
        for value in JsonStream::new(&text) {
            let value = value.map_err(|e| Error::processing(source.locator(), e))?;
            documents.insert_document(&collection, value)?;
            inserted += 1;
        }
        tracing::debug!(collection = %collection, inserted, "inserted documents");
        Ok(inserted)
    }
}

/// Iterates over the top-level values of concatenated JSON text.
///
/// Values may be separated by whitespace or nothing at all. Iteration stops
/// after the first malformed value.
///
/// `jzon` only parses a complete document, so the text is split here: a
/// scanner finds where each top-level value ends and `jzon::parse` handles
/// the slice.
#[derive(Debug)]
pub struct JsonStream<'a> {
    text: &'a str,
    position: usize,
    failed: bool,
}

impl<'a> JsonStream<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text: text.strip_prefix('\u{feff}').unwrap_or(text),
            position: 0,
            failed: false,
        }
    }

    /// Byte offset one past the value starting at `start`.
    fn value_end(&self, start: usize) -> std::result::Result<usize, String> {
        let bytes = self.text.as_bytes();
        match bytes[start] {
            b'{' | b'[' => {
                let mut depth = 0usize;
                let mut in_string = false;
                let mut escaped = false;
                for (offset, &byte) in bytes[start..].iter().enumerate() {
                    if in_string {
                        match byte {
                            _ if escaped => escaped = false,
                            b'\\' => escaped = true,
                            b'"' => in_string = false,
                            _ => {}
                        }
                        continue;
                    }
                    match byte {
                        b'"' => in_string = true,
                        b'{' | b'[' => depth += 1,
                        b'}' | b']' => {
                            depth = depth.saturating_sub(1);
                            if depth == 0 {
                                return Ok(start + offset + 1);
                            }
                        }
                        _ => {}
                    }
                }
                Err(format!("unterminated value at byte {}", start))
            }
            b'"' => {
                let mut escaped = false;
                for (offset, &byte) in bytes[start + 1..].iter().enumerate() {
                    match byte {
                        _ if escaped => escaped = false,
                        b'\\' => escaped = true,
                        b'"' => return Ok(start + offset + 2),
                        _ => {}
                    }
                }
                Err(format!("unterminated string at byte {}", start))
            }
            _ => {
                let end = bytes[start..]
                    .iter()
                    .position(|b| b.is_ascii_whitespace() || matches!(b, b'{' | b'[' | b'"'))
                    .map_or(bytes.len(), |offset| start + offset);
                Ok(end)
            }
        }
    }
}

impl Iterator for JsonStream<'_> {
    type Item = std::result::Result<JsonValue, String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let rest = &self.text[self.position..];
        let start = self.position + (rest.len() - rest.trim_start().len());
        if start >= self.text.len() {
            return None;
        }

        let parsed = self.value_end(start).and_then(|end| {
            self.position = end;
            jzon::parse(&self.text[start..end])
                .map_err(|e| format!("invalid JSON value at byte {}: {}", start, e))
        });
        if parsed.is_err() {
            self.failed = true;
        }
        Some(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(text: &str) -> Vec<String> {
        JsonStream::new(text)
            .map(|value| value.unwrap().dump())
            .collect()
    }

    #[test]
    fn test_concatenated_objects() {
        assert_eq!(values(r#"{"a":1}{"a":2}{"a":3}"#), vec![r#"{"a":1}"#, r#"{"a":2}"#, r#"{"a":3}"#]);
    }

    #[test]
    fn test_whitespace_and_nesting() {
        let text = "\u{feff}\n{\"a\": {\"b\": [1, {\"c\": \"}\"}]}}\n\n[1,2]  \"s\\\"x\" 42 true null\n";
        assert_eq!(
            values(text),
            vec![r#"{"a":{"b":[1,{"c":"}"}]}}"#, "[1,2]", r#""s\"x""#, "42", "true", "null"]
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(values("").is_empty());
        assert!(values(" \n\t ").is_empty());
    }

    #[test]
    fn test_stops_after_malformed_value() {
        let mut stream = JsonStream::new(r#"{"a":1} {"a": } {"a":3}"#);
        assert!(stream.next().unwrap().is_ok());
        assert!(stream.next().unwrap().is_err());
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_unterminated_value() {
        let mut stream = JsonStream::new(r#"{"a":1"#);
        assert!(stream.next().unwrap().is_err());
    }
}
