//! Contract model: the data describing every RPC method a server exposes or
//! a client proxy consumes.
//!
//! Contracts are configuration, not a runtime hot path: they are built once
//! through [`ServerContractBuilder`] / [`ClientContractBuilder`] (which is
//! where naming conversion happens) and then only read. Multiple
//! [`MethodEntry`] values may share an rpc name; the binder picks one per
//! request by parameter shape.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::binder::Arguments;
use crate::context::RequestContext;
use crate::message::ResponseError;

mod naming;

pub use naming::NamingConvention;

/// Declared-type family of a parameter or return value.
///
/// JSON cannot distinguish dates, URIs, or GUIDs from plain strings, so all
/// of those collapse into [`ParamKind::String`]; the typed conversion at the
/// [`Arguments`] boundary is what enforces the finer shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Integer,
    Number,
    Boolean,
    String,
    Array,
    Object,
    /// A [`crate::MessageId`]: accepts integer, string, and null tokens.
    Id,
    /// Wildcard: accepts any JSON token.
    Any,
    /// The ambient cancellation handle. Never bound from `params`; the
    /// binder fills the slot from the request context and ignores it during
    /// method selection.
    Cancellation,
}

/// One declared parameter of a method.
#[derive(Clone, Debug)]
pub struct ParameterEntry {
    pub name: String,
    pub kind: ParamKind,
    pub optional: bool,
    pub nullable: bool,
    pub default: Option<Value>,
}

impl ParameterEntry {
    pub fn required(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            nullable: false,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: true,
            nullable: false,
            default: None,
        }
    }

    /// An ambient cancellation slot; implicitly optional.
    pub fn cancellation() -> Self {
        Self {
            name: "cancellation".to_string(),
            kind: ParamKind::Cancellation,
            optional: true,
            nullable: false,
            default: None,
        }
    }

    /// Marks the parameter optional with an explicit substitute value.
    pub fn with_default(mut self, default: Value) -> Self {
        self.optional = true;
        self.default = Some(default);
        self
    }

    /// Accept an explicit `null` token for this parameter.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub(crate) fn is_cancellation(&self) -> bool {
        self.kind == ParamKind::Cancellation
    }

    /// Substitute for an optional parameter with no declared default.
    pub(crate) fn zero_value(&self) -> Value {
        match self.kind {
            ParamKind::Integer | ParamKind::Number => Value::from(0),
            ParamKind::Boolean => Value::Bool(false),
            ParamKind::String => Value::String(String::new()),
            ParamKind::Array => Value::Array(Vec::new()),
            ParamKind::Object => Value::Object(serde_json::Map::new()),
            ParamKind::Id | ParamKind::Any | ParamKind::Cancellation => Value::Null,
        }
    }
}

/// Logical return shape of a method, with one layer of asynchronous-return
/// wrapping already stripped (every handler here is async).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReturnKind {
    /// The method produces no value; the response carries `result: null`.
    #[default]
    Void,
    Value(ParamKind),
}

/// Boxed future produced by a handler body.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, ResponseError>> + Send>>;

/// Executable body of a method, invoked with the bound argument vector.
pub type Handler = Arc<dyn Fn(Arguments, RequestContext) -> HandlerFuture + Send + Sync>;

/// One callable method as the dispatcher sees it.
#[derive(Clone)]
pub struct MethodEntry {
    pub rpc_name: String,
    pub is_notification: bool,
    pub allow_extra_params: bool,
    pub params: Vec<ParameterEntry>,
    pub returns: ReturnKind,
    pub(crate) handler: Handler,
}

impl std::fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodEntry")
            .field("rpc_name", &self.rpc_name)
            .field("is_notification", &self.is_notification)
            .field("allow_extra_params", &self.allow_extra_params)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

impl MethodEntry {
    pub fn builder(name: impl Into<String>) -> MethodBuilder {
        MethodBuilder {
            name: name.into(),
            is_notification: false,
            allow_extra_params: false,
            params: Vec::new(),
            returns: ReturnKind::Void,
        }
    }

    /// Declared parameters that participate in binding, i.e. everything
    /// except ambient cancellation slots.
    pub(crate) fn bindable_params(&self) -> impl Iterator<Item = &ParameterEntry> {
        self.params.iter().filter(|param| !param.is_cancellation())
    }
}

/// Fluent construction of a [`MethodEntry`]; finished by [`MethodBuilder::handler`].
pub struct MethodBuilder {
    name: String,
    is_notification: bool,
    allow_extra_params: bool,
    params: Vec<ParameterEntry>,
    returns: ReturnKind,
}

impl MethodBuilder {
    /// Declares the method as fire-and-forget: it may only be invoked as a
    /// notification. A request carrying an id is rejected as invalid instead
    /// of being dispatched.
    pub fn notification(mut self) -> Self {
        self.is_notification = true;
        self
    }

    /// Accept and ignore object properties / array elements beyond the
    /// declared parameters.
    pub fn allow_extra_params(mut self) -> Self {
        self.allow_extra_params = true;
        self
    }

    pub fn param(mut self, param: ParameterEntry) -> Self {
        self.params.push(param);
        self
    }

    pub fn returns(mut self, kind: ParamKind) -> Self {
        self.returns = ReturnKind::Value(kind);
        self
    }

    /// Attaches the executable body and validates the entry.
    pub fn handler<F, Fut>(self, body: F) -> Result<MethodEntry, ContractError>
    where
        F: Fn(Arguments, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ResponseError>> + Send + 'static,
    {
        if self.name.is_empty() {
            return Err(ContractError::EmptyMethodName);
        }
        let mut seen = HashSet::new();
        for param in &self.params {
            if !seen.insert(param.name.clone()) {
                return Err(ContractError::DuplicateParameter {
                    method: self.name,
                    parameter: param.name.clone(),
                });
            }
        }

        Ok(MethodEntry {
            rpc_name: self.name,
            is_notification: self.is_notification,
            allow_extra_params: self.allow_extra_params,
            params: self.params,
            returns: self.returns,
            handler: Arc::new(move |args, ctx| Box::pin(body(args, ctx)) as HandlerFuture),
        })
    }
}

/// Errors raised while building contracts.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("method name must not be empty")]
    EmptyMethodName,
    #[error("method `{method}` declares parameter `{parameter}` twice")]
    DuplicateParameter { method: String, parameter: String },
    #[error("client method descriptor `{0}` registered twice")]
    DuplicateDescriptor(String),
}

/// Server-side contract: rpc name to its candidate set.
#[derive(Clone, Debug, Default)]
pub struct ServerContract {
    methods: HashMap<String, Vec<Arc<MethodEntry>>>,
}

impl ServerContract {
    pub fn builder() -> ServerContractBuilder {
        ServerContractBuilder {
            naming: NamingConvention::default(),
            entries: Vec::new(),
        }
    }

    pub fn candidates(&self, rpc_name: &str) -> Option<&[Arc<MethodEntry>]> {
        self.methods.get(rpc_name).map(Vec::as_slice)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

/// Accumulates method entries, then applies the naming convention once.
pub struct ServerContractBuilder {
    naming: NamingConvention,
    entries: Vec<MethodEntry>,
}

impl ServerContractBuilder {
    pub fn naming(mut self, naming: NamingConvention) -> Self {
        self.naming = naming;
        self
    }

    pub fn method(mut self, entry: MethodEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn build(self) -> ServerContract {
        let mut methods: HashMap<String, Vec<Arc<MethodEntry>>> = HashMap::new();
        for mut entry in self.entries {
            entry.rpc_name = self.naming.apply(&entry.rpc_name);
            for param in &mut entry.params {
                if !param.is_cancellation() {
                    param.name = self.naming.apply(&param.name);
                }
            }
            methods.entry(entry.rpc_name.clone()).or_default().push(Arc::new(entry));
        }
        ServerContract { methods }
    }
}

/// One client-side method descriptor, consumed by typed proxies.
#[derive(Clone, Debug)]
pub struct ClientMethod {
    pub rpc_name: String,
    pub is_notification: bool,
    /// Marshal positional arguments into an object keyed by parameter name
    /// rather than an array.
    pub by_name: bool,
    pub params: Vec<ParameterEntry>,
    pub returns: ReturnKind,
}

impl ClientMethod {
    pub fn new(rpc_name: impl Into<String>) -> Self {
        Self {
            rpc_name: rpc_name.into(),
            is_notification: false,
            by_name: false,
            params: Vec::new(),
            returns: ReturnKind::Void,
        }
    }

    pub fn notification(mut self) -> Self {
        self.is_notification = true;
        self
    }

    pub fn by_name(mut self) -> Self {
        self.by_name = true;
        self
    }

    pub fn param(mut self, param: ParameterEntry) -> Self {
        self.params.push(param);
        self
    }

    pub fn returns(mut self, kind: ParamKind) -> Self {
        self.returns = ReturnKind::Value(kind);
        self
    }
}

/// Client-side contract: user-facing descriptor to wire method, one-to-one.
#[derive(Clone, Debug, Default)]
pub struct ClientContract {
    methods: HashMap<String, ClientMethod>,
}

impl ClientContract {
    pub fn builder() -> ClientContractBuilder {
        ClientContractBuilder {
            naming: NamingConvention::default(),
            methods: Vec::new(),
        }
    }

    pub fn method(&self, descriptor: &str) -> Option<&ClientMethod> {
        self.methods.get(descriptor)
    }
}

pub struct ClientContractBuilder {
    naming: NamingConvention,
    methods: Vec<(String, ClientMethod)>,
}

impl ClientContractBuilder {
    pub fn naming(mut self, naming: NamingConvention) -> Self {
        self.naming = naming;
        self
    }

    /// Registers `method` under the user-facing `descriptor` name.
    pub fn method(mut self, descriptor: impl Into<String>, method: ClientMethod) -> Self {
        self.methods.push((descriptor.into(), method));
        self
    }

    pub fn build(self) -> Result<ClientContract, ContractError> {
        let mut methods = HashMap::new();
        for (descriptor, mut method) in self.methods {
            method.rpc_name = self.naming.apply(&method.rpc_name);
            for param in &mut method.params {
                param.name = self.naming.apply(&param.name);
            }
            if methods.insert(descriptor.clone(), method).is_some() {
                return Err(ContractError::DuplicateDescriptor(descriptor));
            }
        }
        Ok(ClientContract { methods })
    }
}
