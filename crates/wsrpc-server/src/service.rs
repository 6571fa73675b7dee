//! Services: named bundles of remotely callable methods.

use crate::context::{CallContext, Return};
use crate::error::RegistrationError;
use crate::handler::{erase, BoxedHandler, Handler};
use crate::param::ParamKind;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use wsrpc_protocol::TARGET_SEPARATOR;

/// One registered method: its name, declared parameters and handler.
#[derive(Clone)]
pub struct MethodDescriptor {
    name: String,
    params: &'static [ParamKind],
    handler: BoxedHandler,
}

impl MethodDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &'static [ParamKind] {
        self.params
    }

    /// `Name(kind, kind)`, for logs and diagnostics.
    pub fn signature(&self) -> String {
        let params: Vec<&str> = self.params.iter().map(ParamKind::as_str).collect();
        format!("{}({})", self.name, params.join(", "))
    }

    /// Run the handler on the calling thread.
    pub fn invoke(&self, ctx: CallContext, args: Vec<Value>) -> Return {
        (self.handler)(ctx, args)
    }

    /// Whether both descriptors share the same stored handler.
    pub fn same_handler(&self, other: &MethodDescriptor) -> bool {
        std::sync::Arc::ptr_eq(&self.handler, &other.handler)
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// A set of methods registered under one service path.
///
/// Built fluently before the server starts:
///
/// ```ignore
/// let user = Service::new()
///     .reply("SayHello", |ctx: CallContext, name: String| ctx.ok(format!("hello {name}")))?
///     .reply("Ping", |ctx: CallContext| ctx.ok("pong"))?;
/// ```
#[derive(Default, Clone)]
pub struct Service {
    methods: HashMap<String, MethodDescriptor>,
}

impl Service {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`.
    pub fn reply<Args, H>(mut self, name: &str, handler: H) -> Result<Self, RegistrationError>
    where
        H: Handler<Args>,
        Args: 'static,
    {
        if !is_valid_name(name) {
            return Err(RegistrationError::InvalidMethodName(name.to_string()));
        }
        if self.methods.contains_key(name) {
            return Err(RegistrationError::DuplicateMethod(name.to_string()));
        }

        self.methods.insert(
            name.to_string(),
            MethodDescriptor {
                name: name.to_string(),
                params: H::PARAMS,
                handler: erase(handler),
            },
        );
        Ok(self)
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.get(name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.values()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Service").field("methods", &names).finish()
    }
}

/// Names may not be empty, contain the target separator, a path slash or
/// whitespace/control characters.
pub(crate) fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c == TARGET_SEPARATOR || c == '/' || c.is_whitespace() || c.is_control())
}
