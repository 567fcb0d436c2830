//! # dexcap
//!
//! Runtime bytecode capture and reflective call-site tracking for an
//! instrumented managed runtime.
//!
//! Static inspection of an application package misses code that is assembled,
//! decrypted or downloaded after start. This crate sits inside the running
//! process, on top of whatever instrumentation engine is attached, and:
//!
//! - **captures** every bytecode module handed to a class loader, from a file
//!   path or straight from memory, as a content-addressed `dex` event;
//! - **tracks** every reflective method invocation as a deduplicated
//!   (method, call site) cross-reference with an occurrence count;
//! - **hooks on demand** methods named by an external controller, as soon as
//!   the classes that declare them are loaded.
//!
//! ## Quick Start
//!
//! Implement [`host::Instrumentation`] on top of your engine, pick a
//! [`protocol::Channel`] to the controller, and attach:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dexcap::prelude::*;
//!
//! let host: Arc<dyn Instrumentation> = Arc::new(MyEngine::new());
//! let channel: Arc<dyn Channel> = Arc::new(MyControllerLink::connect()?);
//!
//! // Sends `setup`, then blocks until the controller answers with `hooks`.
//! let session = Session::attach(host, channel, "caller_depth=3")?;
//!
//! for skipped in session.report().loaders.skipped() {
//!     println!("not on this runtime: {}", skipped.descriptor);
//! }
//!
//! // Later, in-process, or via a `rundata` message from the controller:
//! let snapshot = session.snapshot();
//! println!("{} modules, {} xrefs", snapshot.dex_files.len(), snapshot.xrefs.len());
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Session                           │
//! │   startup sequence, SessionState, rundata snapshots      │
//! ├──────────────────┬──────────────────┬───────────────────┤
//! │ Loader Registry  │ Dynamic Hooks    │ Reflection Tracker│
//! │ registry::       │ dynamic::        │ tracker::         │
//! ├──────────────────┴──────┬───────────┴───────────────────┤
//! │ Capture Encoder         │ Xref Table                     │
//! │ capture::               │ xref::                         │
//! ├─────────────────────────┴───────────────────────────────┤
//! │ Capability interfaces: host::Instrumentation,            │
//! │ host::ByteSource, protocol::Channel                      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`host`] | Capability traits the embedder implements, interception model |
//! | [`protocol`] | Controller messages, [`protocol::Channel`], in-process loopback |
//! | [`capture`] | Content-addressed ids, capture strategies, the encoder |
//! | [`registry`] | Built-in loader table and per-descriptor registration |
//! | [`dynamic`] | Controller-configured hooks installed as classes load |
//! | [`tracker`] | Reflective invocation hook |
//! | [`xref`] | Deduplicating cross-reference table |
//! | [`session`] | [`Session`], [`SessionBuilder`], [`Snapshot`] |
//! | [`options`] | [`SessionOptions`] and its option-string format |
//!
//! ## Thread Safety
//!
//! Hooks run synchronously on whichever application thread triggered them,
//! often several at once. Shared state is either read-only after attach
//! ([`dynamic::HookConfig`]) or updated atomically ([`xref::XrefTable`],
//! captured module ids).
//!
//! ## Failure Model
//!
//! Nothing here is allowed to break the application. A loader overload that
//! does not exist on this runtime, a configured class missing from one loader,
//! or an unreadable module file only reduces what gets observed; the
//! intercepted call always proceeds with its original arguments and its
//! original result or exception.

pub mod capture;
pub mod dynamic;
pub mod error;
pub mod host;
pub mod options;
pub mod prelude;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod tracker;
pub mod xref;

pub use error::{Error, Result};
pub use options::SessionOptions;
pub use session::{Session, SessionBuilder, Snapshot};
