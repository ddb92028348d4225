//! Request documents: a front-matter header selecting files, followed by the
//! free-text request.
//!
//! ```text
//! ---
//! include:
//!   - "src/**/*.rs"
//! ignore:
//!   - "src/generated/"
//! ---
//! Why does the parser reject trailing commas?
//! ```
//!
//! TOML headers delimited by `+++` are accepted as well.

use crate::error::{AppError, Result};
use log;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

pub type Metadata = Map<String, Value>;

/// Splits a request document into its header mapping and body text.
pub trait RequestParser {
    fn parse(&self, text: &str) -> Result<(Metadata, String)>;
}

pub struct YamlFrontMatter;
pub struct TomlFrontMatter;

const YAML_DELIMITER: &str = "---";
const TOML_DELIMITER: &str = "+++";

/// Returns `(header, body)` when `text` opens with `delimiter` on its own line
/// and a closing delimiter line follows.
fn split_front_matter<'a>(text: &'a str, delimiter: &str) -> Option<(&'a str, &'a str)> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.split_inclusive('\n');
    let first = lines.next()?;
    if first.trim_end() != delimiter {
        return None;
    }
    let header_start = first.len();
    let mut offset = header_start;
    for line in lines {
        if line.trim_end() == delimiter {
            let header = &text[header_start..offset];
            let body = &text[offset + line.len()..];
            return Some((header, body));
        }
        offset += line.len();
    }
    None
}

fn into_metadata(value: Value, format: &str) -> Result<Metadata> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Metadata::new()),
        other => Err(AppError::RequestDocument(format!(
            "{} front matter must be a mapping, found {}",
            format, other
        ))),
    }
}

impl RequestParser for YamlFrontMatter {
    fn parse(&self, text: &str) -> Result<(Metadata, String)> {
        match split_front_matter(text, YAML_DELIMITER) {
            Some((header, body)) => {
                let value: Value = serde_yml::from_str(header)?;
                Ok((into_metadata(value, "YAML")?, body.trim().to_string()))
            }
            None => Ok((Metadata::new(), text.trim().to_string())),
        }
    }
}

impl RequestParser for TomlFrontMatter {
    fn parse(&self, text: &str) -> Result<(Metadata, String)> {
        match split_front_matter(text, TOML_DELIMITER) {
            Some((header, body)) => {
                let value: Value = toml::from_str(header)?;
                Ok((into_metadata(value, "TOML")?, body.trim().to_string()))
            }
            None => Ok((Metadata::new(), text.trim().to_string())),
        }
    }
}

/// Picks the parser by the document's opening delimiter; YAML otherwise.
pub fn parser_for(text: &str) -> &'static dyn RequestParser {
    let first_line = text
        .trim_start_matches('\u{feff}')
        .lines()
        .next()
        .unwrap_or_default()
        .trim_end();
    if first_line == TOML_DELIMITER {
        &TomlFrontMatter
    } else {
        &YamlFrontMatter
    }
}

#[derive(Debug, Deserialize)]
struct RequestHeader {
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    ignore: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestConfig {
    pub include: Vec<String>,
    pub ignore: Vec<String>,
    pub body: String,
    /// Header keys other than `include` and `ignore`, kept for logging.
    pub extra: Metadata,
}

impl RequestConfig {
    pub fn from_parts(mut metadata: Metadata, body: String) -> Result<Self> {
        let header_value = Value::Object(
            ["include", "ignore"]
                .iter()
                .filter_map(|key| metadata.remove(*key).map(|v| (key.to_string(), v)))
                .collect(),
        );
        let header: RequestHeader = serde_json::from_value(header_value).map_err(|e| {
            AppError::RequestDocument(format!(
                "`include` and `ignore` must be lists of glob strings: {}",
                e
            ))
        })?;
        if !metadata.is_empty() {
            log::debug!(
                "Request header carries extra keys: {:?}",
                metadata.keys().collect::<Vec<_>>()
            );
        }
        Ok(Self {
            include: header.include,
            ignore: header.ignore,
            body,
            extra: metadata,
        })
    }
}

pub fn parse_request_document(text: &str) -> Result<RequestConfig> {
    let (metadata, body) = parser_for(text).parse(text)?;
    RequestConfig::from_parts(metadata, body)
}

pub fn load_request_document(path: &Path) -> Result<RequestConfig> {
    log::info!("Reading request document: {}", path.display());
    let text = fs::read_to_string(path).map_err(|e| AppError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_request_document(&text)
}
