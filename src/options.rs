//! Session options.
//!
//! Options arrive as a single agent-style string: comma-separated flags and
//! `key=value` pairs, e.g. `caller_depth=4,source_ext=java:kt:scala,no_log_args`.
//! An empty string yields [`SessionOptions::default`].

use std::str::FromStr;

use crate::{Error, Result};

/// Tunables for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Index into [`Instrumentation::call_stack`](crate::host::Instrumentation::call_stack)
    /// of the frame treated as the reflective caller.
    pub caller_depth: usize,
    /// File extensions (without the dot, lower-case) marking a frame as source-mapped.
    pub source_extensions: Vec<String>,
    /// Origin label used for captures that come from memory.
    pub memory_label: String,
    /// Split file-path arguments on `:` and capture each listed module.
    pub split_paths: bool,
    /// Include argument values in dynamic-hook log events.
    pub log_args: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            caller_depth: 3,
            source_extensions: vec!["java".to_string(), "kt".to_string()],
            memory_label: "memory".to_string(),
            split_paths: true,
            log_args: true,
        }
    }
}

impl SessionOptions {
    /// Parse an options string. See the module documentation for the format.
    pub fn parse(options: &str) -> Result<Self> {
        let mut parsed = Self::default();

        for item in options.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = match item.split_once('=') {
                Some((key, value)) => (key.trim(), Some(value.trim())),
                None => (item, None),
            };

            match (key, value) {
                ("caller_depth", Some(v)) => {
                    parsed.caller_depth = v.parse().map_err(|_| invalid(item, "expected a frame index"))?;
                }
                ("source_ext", Some(v)) => {
                    let exts: Vec<String> = v
                        .split(':')
                        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                        .filter(|e| !e.is_empty())
                        .collect();
                    if exts.is_empty() {
                        return Err(invalid(item, "at least one extension is required"));
                    }
                    parsed.source_extensions = exts;
                }
                ("memory_label", Some(v)) if !v.is_empty() => parsed.memory_label = v.to_string(),
                ("memory_label", _) => return Err(invalid(item, "label must not be empty")),
                ("split_paths", None) => parsed.split_paths = true,
                ("no_split_paths", None) => parsed.split_paths = false,
                ("log_args", None) => parsed.log_args = true,
                ("no_log_args", None) => parsed.log_args = false,
                _ => return Err(invalid(item, "unknown option")),
            }
        }

        Ok(parsed)
    }

    /// Whether a frame's reported file name carries a source-level extension.
    pub fn is_source_file(&self, file_name: &str) -> bool {
        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => self
                .source_extensions
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext)),
            _ => false,
        }
    }
}

impl FromStr for SessionOptions {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn invalid(option: &str, reason: &str) -> Error {
    Error::InvalidOption {
        option: option.to_string(),
        reason: reason.to_string(),
    }
}
