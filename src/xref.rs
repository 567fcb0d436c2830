//! Cross-reference table: reflectively invoked methods and their call sites.
//!
//! Every observation is a ([`MethodSignature`], [`CallLocation`]) pair. The
//! [`XrefTable`] keeps one record per distinct pair with an occurrence count.
//! Folding an observation is a single atomic find-or-insert-and-increment, so
//! concurrent application threads reporting the same pair can neither create
//! two records nor lose an increment.
//!
//! ```rust
//! use dexcap::xref::{CallLocation, MethodSignature, SourceKind, XrefTable};
//!
//! let table = XrefTable::new();
//! let method = MethodSignature::new("com.example.Foo", "bar", "void ()");
//! let site = CallLocation::new("com.example.Main.run", 42, SourceKind::Debug);
//!
//! table.record(method.clone(), site.clone());
//! table.record(method, site);
//!
//! let records = table.snapshot();
//! assert_eq!(records.len(), 1);
//! assert_eq!(records[0].count, 2);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Identity of a method: declaring type, name and prototype.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodSignature {
    #[serde(rename = "declaringTypeName")]
    pub declaring_type: String,
    #[serde(rename = "methodName")]
    pub name: String,
    /// Return type followed by the ordered parameter types, e.g. `void (int, java.lang.String)`.
    pub prototype: String,
}

impl MethodSignature {
    pub fn new(declaring_type: impl Into<String>, name: impl Into<String>, prototype: impl Into<String>) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            name: name.into(),
            prototype: prototype.into(),
        }
    }

    /// Build a signature from a return type and parameter types.
    pub fn from_parts<S: AsRef<str>>(
        declaring_type: impl Into<String>,
        name: impl Into<String>,
        return_type: &str,
        parameter_types: &[S],
    ) -> Self {
        Self::new(declaring_type, name, prototype(return_type, parameter_types))
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} {}", self.declaring_type, self.name, self.prototype)
    }
}

/// Render a prototype string.
///
/// ```rust
/// assert_eq!(dexcap::xref::prototype("void", &["int", "java.lang.String"]), "void (int, java.lang.String)");
/// assert_eq!(dexcap::xref::prototype::<&str>("java.lang.Object", &[]), "java.lang.Object ()");
/// ```
pub fn prototype<S: AsRef<str>>(return_type: &str, parameter_types: &[S]) -> String {
    let params: Vec<&str> = parameter_types.iter().map(AsRef::as_ref).collect();
    format!("{} ({})", return_type, params.join(", "))
}

/// Whether a call site's frame carried source-level debug information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceKind {
    /// The frame reported a source file name (`Foo.java`).
    Debug,
    /// Only compiled-artifact provenance was available.
    Binary,
}

/// The immediate caller of a reflective invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLocation {
    #[serde(rename = "callingMethodName")]
    pub calling_method: String,
    /// Reported line number; negative when the runtime does not know it.
    #[serde(rename = "sourcePosition")]
    pub position: i64,
    pub source_kind: SourceKind,
}

impl CallLocation {
    pub fn new(calling_method: impl Into<String>, position: i64, source_kind: SourceKind) -> Self {
        Self {
            calling_method: calling_method.into(),
            position,
            source_kind,
        }
    }

    /// Location used when the stack has no frame at the caller depth.
    pub fn unknown() -> Self {
        Self::new("<unknown>", -1, SourceKind::Binary)
    }
}

/// One aggregated observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XrefRecord {
    pub method: MethodSignature,
    pub location: CallLocation,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct XrefKey {
    method: MethodSignature,
    location: CallLocation,
}

#[derive(Debug, Clone, Copy)]
struct Tally {
    first_seen: u64,
    count: u64,
}

/// Deduplicating, concurrently updated aggregate of [`XrefRecord`]s.
///
/// Records are never removed. [`snapshot`](Self::snapshot) reads without
/// clearing and lists records in first-observation order.
#[derive(Debug, Default)]
pub struct XrefTable {
    entries: DashMap<XrefKey, Tally>,
    next_seq: AtomicU64,
}

impl XrefTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observation into the table and return the pair's new count.
    pub fn record(&self, method: MethodSignature, location: CallLocation) -> u64 {
        let key = XrefKey { method, location };
        // The entry guard holds the shard lock across lookup, insert and increment.
        let mut tally = self.entries.entry(key).or_insert_with(|| Tally {
            first_seen: self.next_seq.fetch_add(1, Ordering::Relaxed),
            count: 0,
        });
        tally.count += 1;
        tally.count
    }

    /// Current count for a pair, if it has been observed.
    pub fn count(&self, method: &MethodSignature, location: &CallLocation) -> Option<u64> {
        let key = XrefKey {
            method: method.clone(),
            location: location.clone(),
        };
        self.entries.get(&key).map(|tally| tally.count)
    }

    /// Number of distinct pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of every record, oldest first.
    pub fn snapshot(&self) -> Vec<XrefRecord> {
        let mut rows: Vec<(u64, XrefRecord)> = self
            .entries
            .iter()
            .map(|entry| {
                let tally = *entry.value();
                (
                    tally.first_seen,
                    XrefRecord {
                        method: entry.key().method.clone(),
                        location: entry.key().location.clone(),
                        count: tally.count,
                    },
                )
            })
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, record)| record).collect()
    }
}
