//! Loader registry and dispatcher.
//!
//! [`LOADERS`] lists every bytecode-loading constructor this crate knows how
//! to observe, with the [`CaptureStrategy`] that pulls the bytecode out of its
//! arguments. Several entries may name the same type with different
//! parameter lists; runtimes keep historical overloads of their loading
//! primitives around and each one is registered on its own.
//!
//! [`register_all`] installs one hook per descriptor. A descriptor whose
//! constructor does not exist on the running runtime is skipped without
//! affecting the others, and the outcome of every attempt is collected into a
//! [`RegistrationReport`].
//!
//! Installed hooks capture first and then call the original constructor with
//! the arguments untouched, returning its result (or exception) unchanged.

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::{debug, info, warn};

use crate::capture::{CaptureEncoder, CaptureStrategy};
use crate::host::{CallResult, HookHandle, Instrumentation, Interceptor, Invocation};
use crate::Error;

/// One recognised bytecode-loading constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderDescriptor {
    pub target: &'static str,
    /// Constructor parameter types, in order.
    pub params: &'static [&'static str],
    pub strategy: CaptureStrategy,
    /// Short name used in logs and reports.
    pub label: &'static str,
}

impl fmt::Display for LoaderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.target, self.params.join(", "))
    }
}

const STRING: &str = "java.lang.String";
const CLASS_LOADER: &str = "java.lang.ClassLoader";
const BYTE_BUFFER: &str = "java.nio.ByteBuffer";
const BYTE_BUFFER_ARRAY: &str = "[Ljava.nio.ByteBuffer;";

/// The built-in loader table.
pub static LOADERS: &[LoaderDescriptor] = &[
    LoaderDescriptor {
        target: "dalvik.system.DexClassLoader",
        params: &[STRING, STRING, STRING, CLASS_LOADER],
        strategy: CaptureStrategy::File,
        label: "DexClassLoader",
    },
    LoaderDescriptor {
        target: "dalvik.system.PathClassLoader",
        params: &[STRING, CLASS_LOADER],
        strategy: CaptureStrategy::File,
        label: "PathClassLoader",
    },
    LoaderDescriptor {
        target: "dalvik.system.PathClassLoader",
        params: &[STRING, STRING, CLASS_LOADER],
        strategy: CaptureStrategy::File,
        label: "PathClassLoader",
    },
    LoaderDescriptor {
        target: "dalvik.system.DelegateLastClassLoader",
        params: &[STRING, CLASS_LOADER],
        strategy: CaptureStrategy::File,
        label: "DelegateLastClassLoader",
    },
    LoaderDescriptor {
        target: "dalvik.system.DelegateLastClassLoader",
        params: &[STRING, STRING, CLASS_LOADER],
        strategy: CaptureStrategy::File,
        label: "DelegateLastClassLoader",
    },
    LoaderDescriptor {
        target: "dalvik.system.DexFile",
        params: &[STRING],
        strategy: CaptureStrategy::File,
        label: "DexFile",
    },
    LoaderDescriptor {
        target: "dalvik.system.InMemoryDexClassLoader",
        params: &[BYTE_BUFFER, CLASS_LOADER],
        strategy: CaptureStrategy::MemorySingle,
        label: "InMemoryDexClassLoader",
    },
    LoaderDescriptor {
        target: "dalvik.system.InMemoryDexClassLoader",
        params: &[BYTE_BUFFER_ARRAY, CLASS_LOADER],
        strategy: CaptureStrategy::MemoryArray,
        label: "InMemoryDexClassLoader",
    },
    LoaderDescriptor {
        target: "dalvik.system.InMemoryDexClassLoader",
        params: &[BYTE_BUFFER_ARRAY, STRING, CLASS_LOADER],
        strategy: CaptureStrategy::MemoryArray,
        label: "InMemoryDexClassLoader",
    },
];

/// Result of one isolated registration attempt.
#[derive(Debug)]
pub enum Outcome {
    Installed(HookHandle),
    Skipped(Error),
}

impl Outcome {
    pub fn is_installed(&self) -> bool {
        matches!(self, Outcome::Installed(_))
    }
}

impl From<crate::Result<HookHandle>> for Outcome {
    fn from(result: crate::Result<HookHandle>) -> Self {
        match result {
            Ok(handle) => Outcome::Installed(handle),
            Err(err) => Outcome::Skipped(err),
        }
    }
}

#[derive(Debug)]
pub struct Registration {
    pub descriptor: LoaderDescriptor,
    pub outcome: Outcome,
}

/// Outcome of [`register_all`], one entry per descriptor in table order.
#[derive(Debug, Default)]
pub struct RegistrationReport {
    pub registrations: Vec<Registration>,
}

impl RegistrationReport {
    pub fn installed(&self) -> impl Iterator<Item = &Registration> {
        self.registrations.iter().filter(|r| r.outcome.is_installed())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &Registration> {
        self.registrations.iter().filter(|r| !r.outcome.is_installed())
    }
}

/// Hook substituted for a loader constructor.
///
/// Holds the encoder weakly: once the owning session is gone the hook only
/// calls through.
pub struct LoaderHook {
    descriptor: LoaderDescriptor,
    encoder: Weak<CaptureEncoder>,
    split_paths: bool,
}

impl LoaderHook {
    pub fn new(descriptor: LoaderDescriptor, encoder: &Arc<CaptureEncoder>, split_paths: bool) -> Self {
        Self {
            descriptor,
            encoder: Arc::downgrade(encoder),
            split_paths,
        }
    }
}

impl Interceptor for LoaderHook {
    fn intercept(&self, call: &Invocation<'_>) -> CallResult {
        if let Some(encoder) = self.encoder.upgrade() {
            for payload in self.descriptor.strategy.extract(call.args(), self.split_paths) {
                if let Err(err) = payload.and_then(|payload| encoder.capture(payload)) {
                    warn!(loader = self.descriptor.label, error = %err, "capture aborted");
                }
            }
        }
        call.proceed()
    }
}

/// Install a [`LoaderHook`] for every descriptor the host supports.
pub fn register_all(
    host: &dyn Instrumentation,
    descriptors: &[LoaderDescriptor],
    encoder: &Arc<CaptureEncoder>,
    split_paths: bool,
) -> RegistrationReport {
    let mut report = RegistrationReport::default();

    for descriptor in descriptors {
        let hook = LoaderHook::new(*descriptor, encoder, split_paths);
        let outcome = Outcome::from(host.hook_constructor(descriptor.target, descriptor.params, Arc::new(hook)));

        match &outcome {
            Outcome::Installed(_) => debug!(loader = %descriptor, "loader hook installed"),
            Outcome::Skipped(err) => debug!(loader = %descriptor, error = %err, "loader hook skipped"),
        }
        report.registrations.push(Registration {
            descriptor: *descriptor,
            outcome,
        });
    }

    info!(
        installed = report.installed().count(),
        skipped = report.skipped().count(),
        "loader registration finished"
    );
    report
}
