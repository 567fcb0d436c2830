//! Common imports for embedding a session.
//!
//! This prelude is intentionally small. It covers the types most embedders
//! touch while avoiding over-broad re-exports.

pub use crate::host::{
    ByteSource, CallResult, Instrumentation, Interceptor, Invocation, LocalFs, StackFrame, Value,
};
pub use crate::protocol::{Channel, Event, Inbound, LoopbackChannel};
pub use crate::session::{Session, SessionBuilder, Snapshot};
pub use crate::xref::{CallLocation, MethodSignature, SourceKind, XrefRecord};
pub use crate::{Error, Result, SessionOptions};
