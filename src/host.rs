//! Capability interfaces consumed from the host instrumentation engine.
//!
//! Nothing in this module talks to a runtime directly. The engine that can
//! intercept constructors and methods, enumerate class-loading contexts and
//! walk a thread's stack is provided by the embedder as an implementation of
//! [`Instrumentation`]; file access goes through [`ByteSource`]. Every other
//! module in the crate depends only on these traits, so a scripted fake host
//! can stand in for a real runtime in tests.
//!
//! # Interception model
//!
//! A hook is an [`Interceptor`]. When the application triggers a hooked
//! operation, the host builds an [`Invocation`] describing the call and hands
//! it to the interceptor on the application's own thread. The interceptor
//! observes the call and then forwards it with [`Invocation::proceed`]:
//!
//! ```rust
//! use dexcap::host::{CallResult, Invocation, Value};
//!
//! fn observe(call: &Invocation<'_>) -> CallResult {
//!     println!("called with {} arguments", call.args().len());
//!     call.proceed()
//! }
//!
//! let original = |_: Option<&Value>, args: &[Value]| Ok(Value::Int(args.len() as i64));
//! let args = [Value::Null, Value::Bool(true)];
//! let call = Invocation::new(None, &args, &original);
//! assert_eq!(observe(&call), Ok(Value::Int(2)));
//! ```
//!
//! [`Invocation`] only hands out shared references to the receiver and the
//! arguments, and `proceed` always forwards exactly those values. A hook can
//! look at a call but cannot rewrite it.
//!
//! # Thread Safety
//!
//! Hooks fire on whichever application thread triggers them, so several may
//! run at once. [`Instrumentation`] and [`Interceptor`] are `Send + Sync`.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::{Error, Result};

/// A value crossing the interception boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A null reference.
    Null,
    /// The result of a `void` method or a constructor.
    Void,
    Bool(bool),
    /// Any integral primitive, widened.
    Int(i64),
    /// Any floating point primitive, widened.
    Float(f64),
    /// A managed string.
    Str(String),
    /// The backing bytes of an in-memory buffer object.
    Buffer(Arc<[u8]>),
    /// A managed array.
    Array(Vec<Value>),
    /// Any other managed object, by reference.
    Object(ObjectRef),
}

/// An opaque reference to a managed object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// Fully-qualified runtime type of the object
    pub type_name: String,
    /// Host-assigned identity
    pub id: u64,
}

impl Value {
    /// Convenience constructor for [`Value::Buffer`].
    pub fn buffer(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Buffer(Arc::from(bytes.into()))
    }

    /// Runtime type name of the value, as the diagnostic hooks report it.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Void => "void",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "long",
            Value::Float(_) => "double",
            Value::Str(_) => "java.lang.String",
            Value::Buffer(_) => "java.nio.ByteBuffer",
            Value::Array(_) => "array",
            Value::Object(obj) => &obj.type_name,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&[u8]> {
        match self {
            Value::Buffer(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Void => f.write_str("void"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Buffer(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Object(obj) => write!(f, "{}@{:x}", obj.type_name, obj.id),
        }
    }
}

/// A managed exception raised by the original operation.
///
/// Interceptors hand this back to the host untouched so the application sees
/// the same exception it would have seen without instrumentation.
#[derive(Debug, Clone, PartialEq)]
pub struct Thrown {
    pub class_name: String,
    pub message: Option<String>,
}

impl fmt::Display for Thrown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.class_name, message),
            None => f.write_str(&self.class_name),
        }
    }
}

impl std::error::Error for Thrown {}

/// Outcome of a managed call: a return value or a propagating exception.
pub type CallResult = std::result::Result<Value, Thrown>;

/// The uninstrumented behaviour of a hooked operation.
pub type Original<'a> = dyn Fn(Option<&Value>, &[Value]) -> CallResult + 'a;

/// One intercepted call, as handed to an [`Interceptor`].
pub struct Invocation<'a> {
    receiver: Option<&'a Value>,
    args: &'a [Value],
    original: &'a Original<'a>,
}

impl<'a> Invocation<'a> {
    /// Describe a call. Hosts build one per intercepted invocation.
    pub fn new(receiver: Option<&'a Value>, args: &'a [Value], original: &'a Original<'a>) -> Self {
        Self {
            receiver,
            args,
            original,
        }
    }

    /// The object the method was invoked on; `None` for constructors and statics.
    pub fn receiver(&self) -> Option<&Value> {
        self.receiver
    }

    pub fn args(&self) -> &[Value] {
        self.args
    }

    /// Run the original operation with the unmodified receiver and arguments.
    pub fn proceed(&self) -> CallResult {
        (self.original)(self.receiver, self.args)
    }
}

/// A handler substituted for an operation by the host.
pub trait Interceptor: Send + Sync {
    /// Handle one call. Implementations must call [`Invocation::proceed`]
    /// exactly once and return its outcome unchanged.
    fn intercept(&self, call: &Invocation<'_>) -> CallResult;
}

impl<F> Interceptor for F
where
    F: Fn(&Invocation<'_>) -> CallResult + Send + Sync,
{
    fn intercept(&self, call: &Invocation<'_>) -> CallResult {
        self(call)
    }
}

/// Identifies an installed hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle(pub u64);

/// Identifies an active class-loading context (a live class loader).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextHandle(pub u64);

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context#{}", self.0)
    }
}

/// Where a type lookup happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The host's default loader (system and boot classes).
    Default,
    /// A specific loading context returned by [`Instrumentation::loading_contexts`].
    Context(ContextHandle),
}

/// A type resolved through [`Instrumentation::resolve_type`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeHandle {
    pub name: String,
    /// `None` when resolved in [`Scope::Default`].
    pub context: Option<ContextHandle>,
}

/// Which overload of a method to hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overload<'a> {
    /// The method's only overload. Hosts fail with [`Error::Ambiguous`] when there are several.
    Any,
    /// The overload with exactly these parameter types.
    Exact(&'a [&'a str]),
}

/// One frame of a thread's call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub method_name: String,
    /// Source file recorded in the frame's debug info, if any.
    pub file_name: Option<String>,
    /// Reported line number; negative when unknown.
    pub line_number: i32,
}

/// Identity of a method handle, read through the host's reflection accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedMethod {
    pub declaring_type: String,
    pub name: String,
    pub return_type: String,
    pub parameter_types: Vec<String>,
}

/// The instrumentation engine's capabilities.
///
/// Implemented by the embedder on top of whatever engine is attached to the
/// process. All methods may be called from any application thread.
///
/// Lookups that fail because the current runtime simply lacks an API report
/// [`Error::Unavailable`] or [`Error::NotFound`]; callers treat both as an
/// expected skip.
pub trait Instrumentation: Send + Sync {
    /// Substitute `handler` for the constructor of `type_name` whose parameter
    /// types are exactly `params`.
    fn hook_constructor(
        &self,
        type_name: &str,
        params: &[&str],
        handler: Arc<dyn Interceptor>,
    ) -> Result<HookHandle>;

    /// Resolve a type by fully-qualified name.
    fn resolve_type(&self, scope: Scope, type_name: &str) -> Result<TypeHandle>;

    /// Substitute `handler` for `method` on a resolved type.
    fn hook_method(
        &self,
        target: &TypeHandle,
        method: &str,
        overload: Overload<'_>,
        handler: Arc<dyn Interceptor>,
    ) -> Result<HookHandle>;

    /// Every class-loading context currently alive in the process.
    fn loading_contexts(&self) -> Vec<ContextHandle>;

    /// The calling thread's stack, innermost frame first, including the
    /// frames of the interception machinery itself.
    fn call_stack(&self) -> Vec<StackFrame>;

    /// Read the identity of a reflective method handle.
    fn reflect_method(&self, method: &Value) -> Result<ReflectedMethod>;
}

/// Reads file-backed bytecode modules.
pub trait ByteSource: Send + Sync {
    fn read_bytes(&self, path: &Path) -> Result<Vec<u8>>;
}

/// [`ByteSource`] over the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl ByteSource for LocalFs {
    fn read_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        std::fs::read(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
