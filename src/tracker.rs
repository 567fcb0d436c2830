//! Reflective invocation tracker.
//!
//! Hooks the runtime's single reflective entry point,
//! `java.lang.reflect.Method.invoke(Object, Object[])`. Every call is folded
//! into the [`XrefTable`] as (invoked method, immediate caller) and then
//! forwarded untouched, exceptions included.
//!
//! The caller is read from the current thread's stack at a fixed depth
//! ([`SessionOptions::caller_depth`], default 3). The frames above it belong to
//! the stack walk and the interception machinery, so the right depth depends
//! on the host engine and should be checked against the target runtime.

use std::sync::{Arc, Weak};

use tracing::{debug, trace};

use crate::host::{
    CallResult, Instrumentation, Interceptor, Invocation, Overload, ReflectedMethod, Scope,
    StackFrame, Value,
};
use crate::options::SessionOptions;
use crate::registry::Outcome;
use crate::xref::{CallLocation, MethodSignature, SourceKind, XrefTable};
use crate::Result;

pub const REFLECT_TYPE: &str = "java.lang.reflect.Method";
pub const REFLECT_METHOD: &str = "invoke";
pub const REFLECT_PARAMS: &[&str] = &["java.lang.Object", "[Ljava.lang.Object;"];

pub struct ReflectionTracker {
    host: Arc<dyn Instrumentation>,
    xrefs: Arc<XrefTable>,
    options: SessionOptions,
}

impl ReflectionTracker {
    pub fn new(host: Arc<dyn Instrumentation>, xrefs: Arc<XrefTable>, options: SessionOptions) -> Arc<Self> {
        Arc::new(Self { host, xrefs, options })
    }

    /// Hook the reflective entry point.
    pub fn install(self: &Arc<Self>) -> Outcome {
        let hook = TrackerHook {
            tracker: Arc::downgrade(self),
        };
        let outcome: Outcome = self
            .host
            .resolve_type(Scope::Default, REFLECT_TYPE)
            .and_then(|ty| {
                self.host
                    .hook_method(&ty, REFLECT_METHOD, Overload::Exact(REFLECT_PARAMS), Arc::new(hook))
            })
            .into();
        if let Outcome::Skipped(err) = &outcome {
            debug!(error = %err, "reflective invocation hook skipped");
        }
        outcome
    }

    /// Record one reflective call of `method_handle` made from the current thread.
    /// Returns the pair's new count.
    pub fn observe(&self, method_handle: &Value) -> Result<u64> {
        let method = signature_of(&self.host.reflect_method(method_handle)?);
        let location = self.caller_location();
        let count = self.xrefs.record(method, location);
        trace!(count, "reflective call recorded");
        Ok(count)
    }

    fn caller_location(&self) -> CallLocation {
        self.host
            .call_stack()
            .get(self.options.caller_depth)
            .map_or_else(CallLocation::unknown, |frame| location_of(frame, &self.options))
    }
}

fn signature_of(method: &ReflectedMethod) -> MethodSignature {
    MethodSignature::from_parts(
        method.declaring_type.as_str(),
        method.name.as_str(),
        &method.return_type,
        method.parameter_types.as_slice(),
    )
}

fn location_of(frame: &StackFrame, options: &SessionOptions) -> CallLocation {
    let source_kind = match frame.file_name.as_deref() {
        Some(name) if options.is_source_file(name) => SourceKind::Debug,
        _ => SourceKind::Binary,
    };
    CallLocation::new(frame.method_name.as_str(), i64::from(frame.line_number), source_kind)
}

struct TrackerHook {
    tracker: Weak<ReflectionTracker>,
}

impl Interceptor for TrackerHook {
    fn intercept(&self, call: &Invocation<'_>) -> CallResult {
        if let (Some(tracker), Some(handle)) = (self.tracker.upgrade(), call.receiver()) {
            if let Err(err) = tracker.observe(handle) {
                debug!(error = %err, "reflective call not recorded");
            }
        }
        call.proceed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(file: Option<&str>, line: i32) -> StackFrame {
        StackFrame {
            method_name: "com.example.Main.run".to_string(),
            file_name: file.map(str::to_string),
            line_number: line,
        }
    }

    #[test]
    fn source_kind_follows_file_name() {
        let options = SessionOptions::default();
        assert_eq!(location_of(&frame(Some("Main.java"), 12), &options).source_kind, SourceKind::Debug);
        assert_eq!(location_of(&frame(Some("classes.dex"), 12), &options).source_kind, SourceKind::Binary);
        assert_eq!(location_of(&frame(None, 12), &options).source_kind, SourceKind::Binary);
    }

    #[test]
    fn signature_prototype() {
        let reflected = ReflectedMethod {
            declaring_type: "com.example.Foo".to_string(),
            name: "bar".to_string(),
            return_type: "void".to_string(),
            parameter_types: vec!["int".to_string(), "java.lang.String".to_string()],
        };
        let sig = signature_of(&reflected);
        assert_eq!(sig.prototype, "void (int, java.lang.String)");
        assert_eq!(sig.to_string(), "com.example.Foo.bar void (int, java.lang.String)");
    }
}
