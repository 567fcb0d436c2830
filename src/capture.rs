//! Capture encoder: content-addressed ids for loaded bytecode modules.
//!
//! A captured module is identified as `<origin-label>-<content-hash>`. The
//! label is the module's file name when it was loaded from a path, or a fixed
//! label (default `memory`) when it came from an in-memory buffer. The hash is
//! SHA-256 over the module bytes, so the same bytes always share a suffix no
//! matter how they were loaded.
//!
//! ```rust
//! use dexcap::capture::{content_hash, origin_label, CapturedModuleId};
//!
//! let bytes = b"dex\n035\0";
//! let from_file = CapturedModuleId::new(origin_label("/data/app/base.apk!classes2.dex"), &content_hash(bytes));
//! let from_memory = CapturedModuleId::new("memory", &content_hash(bytes));
//!
//! assert_eq!(from_file.label(), "classes2.dex");
//! assert_eq!(from_file.hash(), from_memory.hash());
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::host::{ByteSource, Value};
use crate::protocol::{Channel, Event};
use crate::{Error, Result};

/// `<origin-label>-<content-hash>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapturedModuleId(String);

impl CapturedModuleId {
    pub fn new(label: &str, hash: &str) -> Self {
        CapturedModuleId(format!("{label}-{hash}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn label(&self) -> &str {
        self.0.rsplit_once('-').map_or("", |(label, _)| label)
    }

    pub fn hash(&self) -> &str {
        self.0.rsplit_once('-').map_or(self.0.as_str(), |(_, hash)| hash)
    }
}

impl fmt::Display for CapturedModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lower-case hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// File name component of a module path. Archive entries (`base.apk!classes2.dex`)
/// are named by the entry.
pub fn origin_label(path: &str) -> &str {
    path.rsplit(|c: char| c == '/' || c == '!').next().unwrap_or(path)
}

/// How a loader's arguments carry the bytecode being loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureStrategy {
    /// First argument is a path string (or a `:`-separated list of paths).
    File,
    /// First argument is a single in-memory buffer.
    MemorySingle,
    /// First argument is an array of in-memory buffers, each its own module.
    MemoryArray,
}

/// One module to capture, borrowed from an intercepted call's arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload<'a> {
    Path(&'a str),
    Memory(&'a [u8]),
}

impl CaptureStrategy {
    /// Pull the modules out of a loader call's arguments.
    ///
    /// Each entry is an independent capture; a malformed element of a buffer
    /// array does not affect its siblings.
    pub fn extract<'a>(self, args: &'a [Value], split_paths: bool) -> Vec<Result<Payload<'a>>> {
        let first = args.first().unwrap_or(MISSING);

        match self {
            CaptureStrategy::File => match first.as_str() {
                Some(path) if split_paths => {
                    let paths: Vec<_> = path
                        .split(':')
                        .filter(|p| !p.is_empty())
                        .map(|p| Ok(Payload::Path(p)))
                        .collect();
                    if paths.is_empty() {
                        vec![Err(Error::BadArgument {
                            expected: "non-empty path list",
                            found: format!("{path:?}"),
                        })]
                    } else {
                        paths
                    }
                }
                Some(path) => vec![Ok(Payload::Path(path))],
                None => vec![Err(bad_argument("path string", first))],
            },
            CaptureStrategy::MemorySingle => vec![memory(first)],
            CaptureStrategy::MemoryArray => match first.as_array() {
                Some(items) => items.iter().map(memory).collect(),
                None => vec![Err(bad_argument("buffer array", first))],
            },
        }
    }
}

const MISSING: &Value = &Value::Null;

fn memory(value: &Value) -> Result<Payload<'_>> {
    value
        .as_buffer()
        .map(Payload::Memory)
        .ok_or_else(|| bad_argument("buffer", value))
}

fn bad_argument(expected: &'static str, found: &Value) -> Error {
    Error::BadArgument {
        expected,
        found: found.type_name().to_string(),
    }
}

/// Hashes captured modules, remembers their ids and streams them to the controller.
pub struct CaptureEncoder {
    channel: Arc<dyn Channel>,
    source: Arc<dyn ByteSource>,
    memory_label: String,
    captured: Mutex<Vec<CapturedModuleId>>,
}

impl CaptureEncoder {
    pub fn new(channel: Arc<dyn Channel>, source: Arc<dyn ByteSource>, memory_label: impl Into<String>) -> Self {
        Self {
            channel,
            source,
            memory_label: memory_label.into(),
            captured: Mutex::new(Vec::new()),
        }
    }

    pub fn capture(&self, payload: Payload<'_>) -> Result<CapturedModuleId> {
        match payload {
            Payload::Path(path) => self.capture_file(path),
            Payload::Memory(bytes) => self.capture_memory(bytes),
        }
    }

    /// Read a module from `path` and emit it labelled with its file name.
    pub fn capture_file(&self, path: &str) -> Result<CapturedModuleId> {
        let bytes = self.source.read_bytes(Path::new(path))?;
        self.emit(origin_label(path), &bytes)
    }

    /// Emit an in-memory module under the memory label.
    pub fn capture_memory(&self, bytes: &[u8]) -> Result<CapturedModuleId> {
        self.emit(&self.memory_label, bytes)
    }

    /// Ids of every module captured so far, in capture order.
    pub fn captured(&self) -> Vec<CapturedModuleId> {
        self.captured.lock().clone()
    }

    fn emit(&self, label: &str, bytes: &[u8]) -> Result<CapturedModuleId> {
        let id = CapturedModuleId::new(label, &content_hash(bytes));
        let event = Event::Dex {
            filename: id.to_string(),
        };
        // Only delivered modules are listed in snapshots.
        self.channel.send(&event, Some(bytes))?;

        self.captured.lock().push(id.clone());
        info!(id = %id, size = bytes.len(), "captured bytecode module");
        Ok(id)
    }
}
