#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dexcap::dynamic::CLASS_LOADER_TYPES;
use dexcap::host::{
    ByteSource, CallResult, ContextHandle, HookHandle, Instrumentation, Interceptor, Invocation,
    ObjectRef, Original, Overload, ReflectedMethod, Scope, StackFrame, TypeHandle, Value,
};
use dexcap::protocol::LoopbackChannel;
use dexcap::registry::LOADERS;
use dexcap::tracker::{REFLECT_METHOD, REFLECT_PARAMS, REFLECT_TYPE};
use dexcap::{Error, Result, Session, SessionBuilder, SessionOptions};
use parking_lot::Mutex;

pub const CONSTRUCTOR: &str = "<init>";

thread_local! {
    static STACK: RefCell<Vec<StackFrame>> = const { RefCell::new(Vec::new()) };
}

/// Set the stack the fake host reports for the current thread.
pub fn set_stack(frames: Vec<StackFrame>) {
    STACK.with(|stack| *stack.borrow_mut() = frames);
}

pub fn frame(method: &str, file: Option<&str>, line: i32) -> StackFrame {
    StackFrame {
        method_name: method.to_string(),
        file_name: file.map(str::to_string),
        line_number: line,
    }
}

/// The stack as seen from inside the `Method.invoke` hook: three frames of
/// stack-walk and reflection machinery, then the caller.
pub fn reflective_stack(caller: &str, file: Option<&str>, line: i32) -> Vec<StackFrame> {
    vec![
        frame("dalvik.system.VMStack.getThreadStackTrace", None, -2),
        frame("java.lang.Thread.getStackTrace", Some("Thread.java"), 1720),
        frame("java.lang.reflect.Method.invoke", None, -2),
        frame(caller, file, line),
        frame("android.app.ActivityThread.main", Some("ActivityThread.java"), 8177),
    ]
}

type Overloads = HashMap<String, Vec<Vec<String>>>;

struct InstalledHook {
    type_name: String,
    context: Option<ContextHandle>,
    member: String,
    params: Vec<String>,
    handler: Arc<dyn Interceptor>,
}

#[derive(Default)]
struct State {
    constructors: HashMap<String, Vec<Vec<String>>>,
    system_types: HashMap<String, Overloads>,
    contexts: Vec<ContextHandle>,
    context_classes: HashMap<ContextHandle, HashMap<String, Overloads>>,
    reflected: HashMap<u64, ReflectedMethod>,
    hooks: Vec<InstalledHook>,
}

/// Scripted stand-in for an instrumentation engine.
#[derive(Default)]
pub struct FakeHost {
    state: Mutex<State>,
    next_id: AtomicU64,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn same(a: &[String], b: &[&str]) -> bool {
    a.iter().map(String::as_str).eq(b.iter().copied())
}

impl FakeHost {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A runtime exposing every built-in loader overload, `loadClass` on every
    /// loader type, and `Method.invoke`.
    pub fn android() -> Self {
        let host = Self::empty();
        {
            let mut state = host.state.lock();
            for descriptor in LOADERS {
                state
                    .constructors
                    .entry(descriptor.target.to_string())
                    .or_default()
                    .push(strings(descriptor.params));
            }
            for loader in CLASS_LOADER_TYPES {
                state.system_types.entry(loader.to_string()).or_default().insert(
                    "loadClass".to_string(),
                    vec![strings(&["java.lang.String"]), strings(&["java.lang.String", "boolean"])],
                );
            }
            state
                .system_types
                .entry(REFLECT_TYPE.to_string())
                .or_default()
                .insert(REFLECT_METHOD.to_string(), vec![strings(REFLECT_PARAMS)]);
        }
        host
    }

    pub fn remove_constructor(&self, target: &str, params: &[&str]) {
        if let Some(overloads) = self.state.lock().constructors.get_mut(target) {
            overloads.retain(|p| !same(p, params));
        }
    }

    pub fn remove_type(&self, name: &str) {
        let mut state = self.state.lock();
        state.system_types.remove(name);
        state.constructors.remove(name);
    }

    pub fn add_context(&self) -> ContextHandle {
        let handle = ContextHandle(self.next_id.fetch_add(1, Ordering::Relaxed) + 1000);
        self.state.lock().contexts.push(handle);
        handle
    }

    /// Make `class` resolvable in `context`, each method with a single no-arg overload.
    pub fn define_class(&self, context: ContextHandle, class: &str, methods: &[&str]) {
        for method in methods {
            self.add_overload(context, class, method, &[]);
        }
    }

    pub fn add_overload(&self, context: ContextHandle, class: &str, method: &str, params: &[&str]) {
        self.state
            .lock()
            .context_classes
            .entry(context)
            .or_default()
            .entry(class.to_string())
            .or_default()
            .entry(method.to_string())
            .or_default()
            .push(strings(params));
    }

    /// A reflective method handle the host can describe.
    pub fn method_handle(&self, declaring_type: &str, name: &str, return_type: &str, params: &[&str]) -> Value {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.lock().reflected.insert(
            id,
            ReflectedMethod {
                declaring_type: declaring_type.to_string(),
                name: name.to_string(),
                return_type: return_type.to_string(),
                parameter_types: strings(params),
            },
        );
        Value::Object(ObjectRef {
            type_name: REFLECT_TYPE.to_string(),
            id,
        })
    }

    pub fn hook_count(&self) -> usize {
        self.state.lock().hooks.len()
    }

    /// Hooks installed on `member` of `type_name` in any context.
    pub fn hooks_on(&self, type_name: &str, member: &str) -> usize {
        self.state
            .lock()
            .hooks
            .iter()
            .filter(|h| h.type_name == type_name && h.member == member)
            .count()
    }

    pub fn hooked_in(&self, context: ContextHandle, type_name: &str, member: &str) -> bool {
        self.find(type_name, Some(context), member, None).is_some()
    }

    fn find(
        &self,
        type_name: &str,
        context: Option<ContextHandle>,
        member: &str,
        params: Option<&[&str]>,
    ) -> Option<Arc<dyn Interceptor>> {
        self.state
            .lock()
            .hooks
            .iter()
            .find(|h| {
                h.type_name == type_name
                    && h.context == context
                    && h.member == member
                    && params.map_or(true, |p| same(&h.params, p))
            })
            .map(|h| Arc::clone(&h.handler))
    }

    fn dispatch(
        handler: Option<Arc<dyn Interceptor>>,
        receiver: Option<&Value>,
        args: &[Value],
        original: &Original<'_>,
    ) -> CallResult {
        match handler {
            Some(handler) => handler.intercept(&Invocation::new(receiver, args, original)),
            None => original(receiver, args),
        }
    }

    /// Run a constructor as the application would, through any installed hook.
    pub fn construct(&self, type_name: &str, params: &[&str], args: &[Value], original: &Original<'_>) -> CallResult {
        let handler = self.find(type_name, None, CONSTRUCTOR, Some(params));
        Self::dispatch(handler, None, args, original)
    }

    /// Run a method as the application would, through any installed hook.
    pub fn call(
        &self,
        type_name: &str,
        context: Option<ContextHandle>,
        method: &str,
        receiver: Option<&Value>,
        args: &[Value],
        original: &Original<'_>,
    ) -> CallResult {
        let handler = self.find(type_name, context, method, None);
        Self::dispatch(handler, receiver, args, original)
    }

    pub fn load_class(&self, loader_type: &str, name: &str, original: &Original<'_>) -> CallResult {
        let loader = Value::Object(ObjectRef {
            type_name: loader_type.to_string(),
            id: 1,
        });
        self.call(loader_type, None, "loadClass", Some(&loader), &[Value::Str(name.to_string())], original)
    }

    pub fn reflect_invoke(&self, method: &Value, target: Value, args: Vec<Value>, original: &Original<'_>) -> CallResult {
        self.call(REFLECT_TYPE, None, REFLECT_METHOD, Some(method), &[target, Value::Array(args)], original)
    }

    fn next_handle(&self) -> HookHandle {
        HookHandle(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Instrumentation for FakeHost {
    fn hook_constructor(&self, type_name: &str, params: &[&str], handler: Arc<dyn Interceptor>) -> Result<HookHandle> {
        let handle = self.next_handle();
        let mut state = self.state.lock();
        let known = state
            .constructors
            .get(type_name)
            .map_or(false, |overloads| overloads.iter().any(|p| same(p, params)));
        if !known {
            return Err(Error::Unavailable {
                what: format!("{type_name}({})", params.join(", ")),
            });
        }
        state.hooks.push(InstalledHook {
            type_name: type_name.to_string(),
            context: None,
            member: CONSTRUCTOR.to_string(),
            params: strings(params),
            handler,
        });
        Ok(handle)
    }

    fn resolve_type(&self, scope: Scope, type_name: &str) -> Result<TypeHandle> {
        let state = self.state.lock();
        let found = match scope {
            Scope::Default => state.system_types.contains_key(type_name),
            Scope::Context(context) => state
                .context_classes
                .get(&context)
                .map_or(false, |classes| classes.contains_key(type_name)),
        };
        if !found {
            return Err(Error::NotFound {
                what: type_name.to_string(),
            });
        }
        Ok(TypeHandle {
            name: type_name.to_string(),
            context: match scope {
                Scope::Default => None,
                Scope::Context(context) => Some(context),
            },
        })
    }

    fn hook_method(
        &self,
        target: &TypeHandle,
        method: &str,
        overload: Overload<'_>,
        handler: Arc<dyn Interceptor>,
    ) -> Result<HookHandle> {
        let handle = self.next_handle();
        let mut state = self.state.lock();
        let methods = match target.context {
            None => state.system_types.get(&target.name),
            Some(context) => state
                .context_classes
                .get(&context)
                .and_then(|classes| classes.get(&target.name)),
        };
        let not_found = || Error::NotFound {
            what: format!("{}.{}", target.name, method),
        };
        let overloads = methods.and_then(|m| m.get(method)).ok_or_else(not_found)?;

        let params = match overload {
            Overload::Any if overloads.len() == 1 => overloads[0].clone(),
            Overload::Any => {
                return Err(Error::Ambiguous {
                    type_name: target.name.clone(),
                    method: method.to_string(),
                })
            }
            Overload::Exact(wanted) => overloads
                .iter()
                .find(|p| same(p, wanted))
                .cloned()
                .ok_or_else(not_found)?,
        };

        state.hooks.push(InstalledHook {
            type_name: target.name.clone(),
            context: target.context,
            member: method.to_string(),
            params,
            handler,
        });
        Ok(handle)
    }

    fn loading_contexts(&self) -> Vec<ContextHandle> {
        self.state.lock().contexts.clone()
    }

    fn call_stack(&self) -> Vec<StackFrame> {
        STACK.with(|stack| stack.borrow().clone())
    }

    fn reflect_method(&self, method: &Value) -> Result<ReflectedMethod> {
        match method {
            Value::Object(obj) => self
                .state
                .lock()
                .reflected
                .get(&obj.id)
                .cloned()
                .ok_or_else(|| Error::NotFound {
                    what: format!("method handle {}", obj.id),
                }),
            other => Err(Error::BadArgument {
                expected: "method handle",
                found: other.type_name().to_string(),
            }),
        }
    }
}

/// In-memory [`ByteSource`] keyed by path.
#[derive(Default)]
pub struct MapSource {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl MapSource {
    pub fn with(self, path: &str, bytes: &[u8]) -> Self {
        self.files.lock().insert(PathBuf::from(path), bytes.to_vec());
        self
    }
}

impl ByteSource for MapSource {
    fn read_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        self.files.lock().get(path).cloned().ok_or_else(|| Error::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        })
    }
}

/// Queue `hooks` and attach a session with the given byte source and options.
pub fn attach_with(
    host: &Arc<FakeHost>,
    channel: &Arc<LoopbackChannel>,
    hooks: &str,
    source: MapSource,
    options: SessionOptions,
) -> Session {
    channel.post("hooks", serde_json::Value::String(hooks.to_string()));
    SessionBuilder::new(host.clone(), channel.clone())
        .source(Arc::new(source))
        .options(options)
        .attach()
        .expect("session attaches")
}

pub fn attach(host: &Arc<FakeHost>, channel: &Arc<LoopbackChannel>, hooks: &str) -> Session {
    attach_with(host, channel, hooks, MapSource::default(), SessionOptions::default())
}

/// An original operation that returns `value`.
pub fn returns(value: Value) -> impl Fn(Option<&Value>, &[Value]) -> CallResult {
    move |_, _| Ok(value.clone())
}
