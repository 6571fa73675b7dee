//! Server-wide lookup table from service path to [`Service`].
//!
//! Mutated only while the server is being configured. Once serving starts
//! the registry is moved into an `Arc` and only read, so workers resolve
//! calls without locking.

use crate::error::{RegistrationError, ResolutionError};
use crate::service::{is_valid_name, MethodDescriptor, Service};
use std::collections::HashMap;
use wsrpc_protocol::TARGET_SEPARATOR;

#[derive(Debug, Default, Clone)]
pub struct Registry {
    services: HashMap<String, Service>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `service` under `path`. An existing registration is never replaced.
    pub fn add_service(&mut self, path: &str, service: Service) -> Result<(), RegistrationError> {
        if !is_valid_name(path) {
            return Err(RegistrationError::InvalidPath(path.to_string()));
        }
        if self.services.contains_key(path) {
            return Err(RegistrationError::DuplicatePath(path.to_string()));
        }
        self.services.insert(path.to_string(), service);
        Ok(())
    }

    /// Look up the handler for `path` / `method`.
    pub fn resolve(&self, path: &str, method: &str) -> Result<&MethodDescriptor, ResolutionError> {
        let service = self
            .services
            .get(path)
            .ok_or_else(|| ResolutionError::ServiceNotFound(path.to_string()))?;
        service
            .method(method)
            .ok_or_else(|| ResolutionError::MethodNotFound {
                service: path.to_string(),
                method: method.to_string(),
            })
    }

    /// Look up a `path.method` target.
    pub fn resolve_target(&self, target: &str) -> Result<&MethodDescriptor, ResolutionError> {
        match target.split_once(TARGET_SEPARATOR) {
            Some((path, method)) => self.resolve(path, method),
            None => Err(ResolutionError::ServiceNotFound(target.to_string())),
        }
    }

    pub fn service(&self, path: &str) -> Option<&Service> {
        self.services.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.services.contains_key(path)
    }

    /// Every registered `path.method`, sorted.
    pub fn routes(&self) -> Vec<String> {
        let mut routes: Vec<String> = self
            .services
            .iter()
            .flat_map(|(path, service)| {
                service
                    .methods()
                    .map(move |m| format!("{}{}{}", path, TARGET_SEPARATOR, m.name()))
            })
            .collect();
        routes.sort();
        routes
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CallContext, Return};
    use crate::dispatcher::CallRequest;
    use crate::transport::ConnectionId;
    use proptest::prelude::*;
    use serde_json::json;
    use test_case::test_case;
    use wsrpc_protocol::{CallFrame, ErrorKind};

    fn user_service() -> Service {
        Service::new()
            .reply("SayHello", |ctx: CallContext, name: String| {
                ctx.ok(format!("hello {name}"))
            })
            .unwrap()
    }

    fn invoke(method: &MethodDescriptor, args: Vec<serde_json::Value>) -> Return {
        let frame = CallFrame::new(1, "any", method.name(), args.clone());
        let request = CallRequest::from_frame(frame, ConnectionId::new(), "test");
        method.invoke(CallContext::new(&request), args)
    }

    #[test]
    fn test_resolve_registered_method() {
        let mut registry = Registry::new();
        registry.add_service("user", user_service()).unwrap();

        let method = registry.resolve("user", "SayHello").unwrap();
        assert_eq!(
            invoke(method, vec![json!("Ann")]),
            Return::Success(json!("hello Ann"))
        );
        assert!(method.same_handler(registry.resolve_target("user.SayHello").unwrap()));
    }

    #[test]
    fn test_resolve_unknown_targets() {
        let mut registry = Registry::new();
        registry.add_service("user", user_service()).unwrap();

        assert_eq!(
            registry.resolve("user", "Goodbye").unwrap_err(),
            ResolutionError::MethodNotFound {
                service: "user".into(),
                method: "Goodbye".into()
            }
        );
        assert_eq!(
            registry.resolve("admin", "SayHello").unwrap_err(),
            ResolutionError::ServiceNotFound("admin".into())
        );
        assert!(matches!(
            registry.resolve_target("nodot"),
            Err(ResolutionError::ServiceNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_path_keeps_first_registration() {
        let mut registry = Registry::new();
        registry.add_service("user", user_service()).unwrap();

        let other = Service::new()
            .reply("Other", |ctx: CallContext| ctx.ok(0))
            .unwrap();
        assert_eq!(
            registry.add_service("user", other),
            Err(RegistrationError::DuplicatePath("user".into()))
        );

        assert_eq!(registry.len(), 1);
        assert!(registry.resolve("user", "SayHello").is_ok());
        assert!(registry.resolve("user", "Other").is_err());
    }

    #[test_case("" ; "empty")]
    #[test_case("user.admin" ; "separator")]
    #[test_case("user admin" ; "whitespace")]
    fn test_invalid_paths(path: &str) {
        let mut registry = Registry::new();
        assert_eq!(
            registry.add_service(path, user_service()),
            Err(RegistrationError::InvalidPath(path.into()))
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_routes_are_sorted() {
        let mut registry = Registry::new();
        registry.add_service("user", user_service()).unwrap();
        registry
            .add_service(
                "admin",
                Service::new()
                    .reply("Kick", |ctx: CallContext, _id: u64| ctx.ok(true))
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(registry.routes(), vec!["admin.Kick", "user.SayHello"]);
    }

    fn name() -> impl Strategy<Value = String> {
        "[A-Za-z_][A-Za-z0-9_]{0,8}"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn resolve_finds_exactly_what_was_registered(
            table in prop::collection::btree_map(name(), prop::collection::btree_set(name(), 1..5), 1..6),
            query_path in name(),
            query_method in name(),
        ) {
            let mut registry = Registry::new();
            for (path, methods) in &table {
                let mut service = Service::new();
                for method in methods {
                    let tag = format!("{path}.{method}");
                    service = service
                        .reply(method, move |ctx: CallContext| ctx.ok(tag.clone()))
                        .unwrap();
                }
                registry.add_service(path, service).unwrap();
            }

            for (path, methods) in &table {
                for method in methods {
                    let found = registry.resolve(path, method).unwrap();
                    prop_assert_eq!(
                        invoke(found, vec![]),
                        Return::Success(json!(format!("{path}.{method}")))
                    );
                }
            }

            match table.get(&query_path) {
                None => prop_assert_eq!(
                    registry.resolve(&query_path, &query_method).unwrap_err(),
                    ResolutionError::ServiceNotFound(query_path.clone())
                ),
                Some(methods) if !methods.contains(&query_method) => prop_assert_eq!(
                    registry.resolve(&query_path, &query_method).unwrap_err().kind(),
                    ErrorKind::MethodNotFound
                ),
                Some(_) => prop_assert!(registry.resolve(&query_path, &query_method).is_ok()),
            }
        }
    }
}
