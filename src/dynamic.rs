//! Dynamic hook installer.
//!
//! The controller names methods to watch as `fully.qualified.Class.method`
//! lines. Those classes usually do not exist yet when the session starts;
//! they arrive later through one of the class loaders. The installer hooks
//! `loadClass(String)` on every known loader type, and when a configured class
//! has just been loaded it walks every live loading context and puts a
//! logging hook on each configured method it can resolve there.
//!
//! Missing classes, missing methods and overload mismatches are routine (a
//! class exists in one loader and not another) and are reported per
//! context/method, never raised.
//!
//! ```rust
//! use dexcap::dynamic::HookConfig;
//!
//! let config = HookConfig::parse("com.example.Foo.bar\ncom.example.Foo.baz\norg.Other.run");
//! assert_eq!(config.len(), 2);
//! assert!(config.methods("com.example.Foo").unwrap().contains("baz"));
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::host::{
    CallResult, ContextHandle, Instrumentation, Interceptor, Invocation, Overload, Scope, Value,
};
use crate::registry::Outcome;
use crate::Error;

/// Class name to the set of method names to hook once that class loads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookConfig {
    classes: BTreeMap<String, BTreeSet<String>>,
}

impl HookConfig {
    /// Parse newline-separated `Class.method` entries.
    ///
    /// Each line is split on its final `.`. Blank lines are ignored; lines that
    /// do not split into a non-empty class and method are skipped.
    pub fn parse(text: &str) -> Self {
        let mut config = Self::default();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match line.rsplit_once('.') {
                Some((class, method)) if !class.is_empty() && !method.is_empty() => {
                    config.insert(class, method);
                }
                _ => debug!(entry = line, "ignoring malformed hook entry"),
            }
        }
        config
    }

    pub fn insert(&mut self, class: &str, method: &str) {
        self.classes
            .entry(class.to_string())
            .or_default()
            .insert(method.to_string());
    }

    pub fn methods(&self, class: &str) -> Option<&BTreeSet<String>> {
        self.classes.get(class)
    }

    pub fn contains_class(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    /// Number of configured classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.classes.iter().map(|(class, methods)| (class.as_str(), methods))
    }
}

/// Loader types whose `loadClass(String)` is watched.
pub static CLASS_LOADER_TYPES: &[&str] = &[
    "java.lang.ClassLoader",
    "dalvik.system.BaseDexClassLoader",
    "dalvik.system.PathClassLoader",
    "dalvik.system.DexClassLoader",
    "dalvik.system.InMemoryDexClassLoader",
    "dalvik.system.DelegateLastClassLoader",
];

const LOAD_CLASS: &str = "loadClass";
const LOAD_CLASS_PARAMS: &[&str] = &["java.lang.String"];

/// Outcome of hooking `loadClass` on one loader type.
#[derive(Debug)]
pub struct EntryPoint {
    pub type_name: &'static str,
    pub outcome: Outcome,
}

/// Outcome of hooking one configured method in one context.
#[derive(Debug)]
pub struct MethodHook {
    pub context: ContextHandle,
    pub method: String,
    pub outcome: Outcome,
}

/// What happened when a configured class was loaded.
#[derive(Debug, Default)]
pub struct InstallReport {
    pub class_name: String,
    /// Contexts in which the class could not be resolved.
    pub unresolved: Vec<(ContextHandle, Error)>,
    /// Attempts on methods not already hooked in that context.
    pub methods: Vec<MethodHook>,
}

impl InstallReport {
    pub fn installed(&self) -> usize {
        self.methods.iter().filter(|m| m.outcome.is_installed()).count()
    }
}

/// Installs logging hooks on configured methods as their classes load.
pub struct DynamicHookInstaller {
    host: Arc<dyn Instrumentation>,
    config: Arc<HookConfig>,
    log_args: bool,
    installed: Mutex<HashSet<(ContextHandle, String, String)>>,
}

impl DynamicHookInstaller {
    pub fn new(host: Arc<dyn Instrumentation>, config: Arc<HookConfig>, log_args: bool) -> Arc<Self> {
        Arc::new(Self {
            host,
            config,
            log_args,
            installed: Mutex::new(HashSet::new()),
        })
    }

    pub fn config(&self) -> &HookConfig {
        &self.config
    }

    /// Hook `loadClass(String)` on every type in [`CLASS_LOADER_TYPES`] the host has.
    pub fn install_entry_points(self: &Arc<Self>) -> Vec<EntryPoint> {
        CLASS_LOADER_TYPES
            .iter()
            .map(|&type_name| {
                let hook = LoadClassHook {
                    installer: Arc::downgrade(self),
                };
                let outcome: Outcome = self
                    .host
                    .resolve_type(Scope::Default, type_name)
                    .and_then(|ty| {
                        self.host
                            .hook_method(&ty, LOAD_CLASS, Overload::Exact(LOAD_CLASS_PARAMS), Arc::new(hook))
                    })
                    .into();
                if let Outcome::Skipped(err) = &outcome {
                    debug!(loader = type_name, error = %err, "loadClass hook skipped");
                }
                EntryPoint { type_name, outcome }
            })
            .collect()
    }

    /// React to `class_name` having been loaded. Returns `None` when the class
    /// is not configured.
    pub fn on_class_loaded(&self, class_name: &str) -> Option<InstallReport> {
        let methods = self.config.methods(class_name)?;
        let mut report = InstallReport {
            class_name: class_name.to_string(),
            ..InstallReport::default()
        };

        for context in self.host.loading_contexts() {
            let pending: Vec<&String> = methods
                .iter()
                .filter(|method| self.reserve(context, class_name, method))
                .collect();
            if pending.is_empty() {
                continue;
            }

            let ty = match self.host.resolve_type(Scope::Context(context), class_name) {
                Ok(ty) => ty,
                Err(err) => {
                    debug!(class = class_name, %context, error = %err, "class not resolvable in context");
                    for method in pending {
                        self.release(context, class_name, method);
                    }
                    report.unresolved.push((context, err));
                    continue;
                }
            };

            for method in pending {
                let logger = CallLogger {
                    class_name: class_name.to_string(),
                    method: method.clone(),
                    log_args: self.log_args,
                };
                let outcome: Outcome = self
                    .host
                    .hook_method(&ty, method, Overload::Any, Arc::new(logger))
                    .into();

                match &outcome {
                    Outcome::Installed(_) => info!(class = class_name, method = %method, %context, "dynamic hook installed"),
                    Outcome::Skipped(err) => {
                        debug!(class = class_name, method = %method, %context, error = %err, "dynamic hook skipped");
                        self.release(context, class_name, method);
                    }
                }
                report.methods.push(MethodHook {
                    context,
                    method: method.clone(),
                    outcome,
                });
            }
        }

        Some(report)
    }

    // The set is never locked across host calls: hooking may itself load
    // classes and re-enter this installer on the same thread.
    fn reserve(&self, context: ContextHandle, class_name: &str, method: &str) -> bool {
        self.installed
            .lock()
            .insert((context, class_name.to_string(), method.to_string()))
    }

    fn release(&self, context: ContextHandle, class_name: &str, method: &str) {
        self.installed
            .lock()
            .remove(&(context, class_name.to_string(), method.to_string()));
    }
}

struct LoadClassHook {
    installer: Weak<DynamicHookInstaller>,
}

impl Interceptor for LoadClassHook {
    fn intercept(&self, call: &Invocation<'_>) -> CallResult {
        let result = call.proceed();
        if result.is_ok() {
            if let (Some(installer), Some(name)) = (
                self.installer.upgrade(),
                call.args().first().and_then(Value::as_str),
            ) {
                installer.on_class_loaded(name);
            }
        }
        result
    }
}

/// Diagnostic hook: logs argument types (and values) then calls through.
struct CallLogger {
    class_name: String,
    method: String,
    log_args: bool,
}

impl Interceptor for CallLogger {
    fn intercept(&self, call: &Invocation<'_>) -> CallResult {
        let arg_types: Vec<&str> = call.args().iter().map(Value::type_name).collect();
        if self.log_args {
            let args: Vec<String> = call.args().iter().map(ToString::to_string).collect();
            info!(class = %self.class_name, method = %self.method, ?arg_types, ?args, "hooked method called");
        } else {
            info!(class = %self.class_name, method = %self.method, ?arg_types, "hooked method called");
        }
        call.proceed()
    }
}
