use std::path::PathBuf;

use thiserror::Error;

/// The error type shared by every fallible operation in this crate.
///
/// Most variants describe conditions that are *expected* while instrumenting a
/// live application and never escape the registration unit that produced them:
///
/// ## Degrade to a skip
/// - [`Error::Unavailable`] - an entry point does not exist on this runtime version
/// - [`Error::NotFound`] - a configured class or method is not resolvable in a loading context
/// - [`Error::Ambiguous`] - a method has several overloads and none was named
///
/// ## Abort a single capture event
/// - [`Error::Io`] - a file-backed bytecode module could not be read
/// - [`Error::BadArgument`] - an intercepted call carried an argument of an unexpected shape
///
/// ## Surface to the embedder
/// - [`Error::Channel`] - the controller channel is closed
/// - [`Error::Json`] - a payload could not be (de)serialised
/// - [`Error::InvalidOption`] - the session options string is malformed
///
/// # Examples
///
/// ```rust
/// use dexcap::Error;
///
/// let err = Error::Unavailable { what: "dalvik.system.DexFile(java.lang.String)".into() };
/// assert!(err.is_expected());
/// assert_eq!(err.to_string(), "entry point unavailable: dalvik.system.DexFile(java.lang.String)");
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The described entry point does not exist on the current runtime.
    ///
    /// Loader descriptors cover several historical overloads, so on any given
    /// runtime version some of them are expected to be missing.
    #[error("entry point unavailable: {what}")]
    Unavailable {
        /// Human readable description of the entry point
        what: String,
    },

    /// A class or method could not be resolved in a loading context.
    #[error("not found: {what}")]
    NotFound {
        /// Human readable description of what was looked up
        what: String,
    },

    /// A method name matched more than one overload and no overload was given.
    #[error("{type_name}.{method} has several overloads")]
    Ambiguous {
        /// Declaring type of the method
        type_name: String,
        /// The overloaded method name
        method: String,
    },

    /// Reading a file-backed bytecode module failed.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// The path that was being read
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// An intercepted call carried an argument the capture strategy cannot use.
    #[error("expected {expected}, found {found}")]
    BadArgument {
        /// What the capture strategy required
        expected: &'static str,
        /// Type name of what was actually passed
        found: String,
    },

    /// The controller channel is closed or disconnected.
    #[error("channel error: {0}")]
    Channel(String),

    /// A message payload could not be serialised or deserialised.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The session options string could not be parsed.
    #[error("invalid option `{option}`: {reason}")]
    InvalidOption {
        /// The offending option as written
        option: String,
        /// Why it was rejected
        reason: String,
    },
}

impl Error {
    /// Returns `true` for conditions that are a normal part of instrumenting
    /// an arbitrary runtime and only reduce observability.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Error::Unavailable { .. } | Error::NotFound { .. } | Error::Ambiguous { .. }
        )
    }
}

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;
