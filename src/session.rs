//! Session: the state owned for the lifetime of an attached process.
//!
//! A [`Session`] is created once at attach. Construction performs the whole
//! startup sequence in order:
//!
//! 1. send `setup` to the controller,
//! 2. block until the controller answers with `hooks` and build the [`HookConfig`],
//! 3. register the loader hooks ([`registry::register_all`]),
//! 4. hook the class-loading entry points for dynamic hooks,
//! 5. hook the reflective entry point,
//! 6. start answering `rundata` requests with a [`Snapshot`].
//!
//! No hook exists before the configuration is in place, so handlers never
//! observe a partially built [`HookConfig`].
//!
//! Hooks only hold weak references to the session's components. Dropping the
//! [`Session`] turns every installed hook into a plain pass-through.

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::capture::{CaptureEncoder, CapturedModuleId};
use crate::dynamic::{DynamicHookInstaller, EntryPoint, HookConfig};
use crate::host::{ByteSource, Instrumentation, LocalFs};
use crate::options::SessionOptions;
use crate::protocol::{tags, Channel, Event};
use crate::registry::{self, LoaderDescriptor, Outcome, RegistrationReport, LOADERS};
use crate::tracker::ReflectionTracker;
use crate::xref::{XrefRecord, XrefTable};
use crate::{Error, Result};

/// The session's aggregate state, as sent in answer to `rundata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub dex_files: Vec<CapturedModuleId>,
    pub xrefs: Vec<XrefRecord>,
}

/// Everything the session's handlers share.
pub struct SessionState {
    options: SessionOptions,
    hooks: Arc<HookConfig>,
    xrefs: Arc<XrefTable>,
    capture: Arc<CaptureEncoder>,
}

impl SessionState {
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn hooks(&self) -> &HookConfig {
        &self.hooks
    }

    pub fn xrefs(&self) -> &XrefTable {
        &self.xrefs
    }

    pub fn captured_modules(&self) -> Vec<CapturedModuleId> {
        self.capture.captured()
    }

    /// Copy the current state without clearing anything.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            dex_files: self.capture.captured(),
            xrefs: self.xrefs.snapshot(),
        }
    }
}

/// What got installed at attach.
#[derive(Debug)]
pub struct AttachReport {
    pub loaders: RegistrationReport,
    pub class_loaders: Vec<EntryPoint>,
    pub tracker: Outcome,
}

/// Configures and attaches a [`Session`].
///
/// ```rust,ignore
/// let session = SessionBuilder::new(host, channel)
///     .options_str("caller_depth=4")?
///     .source(Arc::new(ApkEntryReader::new()))
///     .attach()?;
/// ```
pub struct SessionBuilder {
    host: Arc<dyn Instrumentation>,
    channel: Arc<dyn Channel>,
    source: Arc<dyn ByteSource>,
    options: SessionOptions,
    loaders: &'static [LoaderDescriptor],
}

impl SessionBuilder {
    pub fn new(host: Arc<dyn Instrumentation>, channel: Arc<dyn Channel>) -> Self {
        Self {
            host,
            channel,
            source: Arc::new(LocalFs),
            options: SessionOptions::default(),
            loaders: LOADERS,
        }
    }

    /// Where file-backed modules are read from. Defaults to [`LocalFs`].
    pub fn source(mut self, source: Arc<dyn ByteSource>) -> Self {
        self.source = source;
        self
    }

    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Parse and apply an options string.
    pub fn options_str(self, options: &str) -> Result<Self> {
        Ok(self.options(SessionOptions::parse(options)?))
    }

    /// Replace the loader table. Defaults to [`LOADERS`].
    pub fn loaders(mut self, loaders: &'static [LoaderDescriptor]) -> Self {
        self.loaders = loaders;
        self
    }

    /// Run the startup sequence. Blocks until the controller sends `hooks`.
    pub fn attach(self) -> Result<Session> {
        let SessionBuilder {
            host,
            channel,
            source,
            options,
            loaders,
        } = self;

        channel.send(&Event::Setup, None)?;
        info!("setup sent, waiting for hook configuration");

        let message = channel.await_message(tags::HOOKS)?;
        let text = message.text().ok_or_else(|| Error::BadArgument {
            expected: "string payload",
            found: message.payload.to_string(),
        })?;
        let hooks = Arc::new(HookConfig::parse(text));
        info!(classes = hooks.len(), "hook configuration received");

        let capture = Arc::new(CaptureEncoder::new(
            Arc::clone(&channel),
            source,
            options.memory_label.clone(),
        ));
        let xrefs = Arc::new(XrefTable::new());
        let state = Arc::new(SessionState {
            options: options.clone(),
            hooks: Arc::clone(&hooks),
            xrefs: Arc::clone(&xrefs),
            capture: Arc::clone(&capture),
        });

        let loader_report = registry::register_all(host.as_ref(), loaders, &capture, options.split_paths);

        let installer = DynamicHookInstaller::new(Arc::clone(&host), hooks, options.log_args);
        let class_loaders = installer.install_entry_points();

        let tracker = ReflectionTracker::new(Arc::clone(&host), xrefs, options);
        let tracker_outcome = tracker.install();

        let weak_state: Weak<SessionState> = Arc::downgrade(&state);
        let weak_channel: Weak<dyn Channel> = Arc::downgrade(&channel);
        channel.on_message(
            tags::RUNDATA,
            Box::new(move |_| {
                let (Some(state), Some(channel)) = (weak_state.upgrade(), weak_channel.upgrade()) else {
                    return;
                };
                if let Err(err) = channel.send(&Event::Rundata(state.snapshot()), None) {
                    warn!(error = %err, "failed to answer rundata");
                }
            }),
        )?;

        info!(
            loaders = loader_report.installed().count(),
            class_loaders = class_loaders.iter().filter(|e| e.outcome.is_installed()).count(),
            tracker = tracker_outcome.is_installed(),
            "session attached"
        );

        Ok(Session {
            state,
            _installer: installer,
            _tracker: tracker,
            report: AttachReport {
                loaders: loader_report,
                class_loaders,
                tracker: tracker_outcome,
            },
        })
    }
}

/// An attached instrumentation session.
pub struct Session {
    state: Arc<SessionState>,
    // Hooks reference these weakly; the session keeps them alive.
    _installer: Arc<DynamicHookInstaller>,
    _tracker: Arc<ReflectionTracker>,
    report: AttachReport,
}

impl Session {
    /// Attach with the default byte source and loader table, parsing `options`
    /// as a [`SessionOptions`] string.
    pub fn attach(host: Arc<dyn Instrumentation>, channel: Arc<dyn Channel>, options: &str) -> Result<Self> {
        SessionBuilder::new(host, channel).options_str(options)?.attach()
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub fn report(&self) -> &AttachReport {
        &self.report
    }

    /// The same data a `rundata` request returns.
    pub fn snapshot(&self) -> Snapshot {
        self.state.snapshot()
    }
}
