//! Capability registry mapping endpoint names to their declarations.
//!
//! Built once at worker startup from explicitly declared capabilities and
//! immutable afterwards: registration problems (duplicate names, malformed
//! metadata) fail construction loudly instead of shadowing an endpoint at
//! dispatch time. Resolution is by name only; declaration order is
//! preserved for external route generation.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::endpoint::{EndpointDecl, RouteSpec};

/// Errors raised while building the registry. All of them are fatal to
/// worker startup.
#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    /// Two capabilities declared the same endpoint name.
    #[error("duplicate endpoint name: {name}")]
    #[diagnostic(
        code(tickrelay::registry::duplicate),
        help("Endpoint names must be unique across all capability modules; rename one of the declarations.")
    )]
    Duplicate { name: String },

    /// An endpoint was declared with an empty name.
    #[error("endpoint declared with an empty name")]
    #[diagnostic(code(tickrelay::registry::empty_name))]
    EmptyName,

    /// A declaration repeats a parameter name.
    #[error("endpoint {name}: duplicate parameter {param}")]
    #[diagnostic(code(tickrelay::registry::duplicate_param))]
    DuplicateParam { name: String, param: String },
}

/// Registry of remote-callable endpoints (name → declaration).
///
/// Mutable while the worker initializes, then used immutably by the
/// dispatch loop — the same build-then-freeze shape the rest of the crate
/// uses, which keeps dispatch lock-free.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    index: FxHashMap<String, usize>,
    decls: Vec<EndpointDecl>,
}

impl EndpointRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one endpoint declaration.
    ///
    /// Re-registration of an existing name fails; there is no clearing or
    /// overwrite path by design.
    pub fn register(&mut self, decl: EndpointDecl) -> Result<(), RegistryError> {
        if decl.name().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        for (i, param) in decl.params().iter().enumerate() {
            if decl.params()[..i].contains(param) {
                return Err(RegistryError::DuplicateParam {
                    name: decl.name().to_string(),
                    param: param.clone(),
                });
            }
        }
        if self.index.contains_key(decl.name()) {
            return Err(RegistryError::Duplicate {
                name: decl.name().to_string(),
            });
        }
        self.index.insert(decl.name().to_string(), self.decls.len());
        self.decls.push(decl);
        Ok(())
    }

    /// Register a whole capability's declaration list.
    pub fn register_all(
        &mut self,
        decls: impl IntoIterator<Item = EndpointDecl>,
    ) -> Result<(), RegistryError> {
        for decl in decls {
            self.register(decl)?;
        }
        Ok(())
    }

    /// Look up an endpoint by name. `None` is the not-found marker the
    /// dispatch loop converts into a null reply.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&EndpointDecl> {
        self.index.get(name).map(|&i| &self.decls[i])
    }

    /// All declarations in registration order, for external template
    /// generation. Not part of core dispatch.
    #[must_use]
    pub fn declarations(&self) -> &[EndpointDecl] {
        &self.decls
    }

    /// Serializable route descriptions in registration order.
    #[must_use]
    pub fn route_specs(&self) -> Vec<RouteSpec> {
        self.decls.iter().map(EndpointDecl::route_spec).collect()
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::Outcome;
    use crate::endpoint::{Handler, HandlerError, Verb};
    use async_trait::async_trait;
    use serde_json::Value;

    struct Nop;

    #[async_trait]
    impl Handler for Nop {
        async fn call(&self, _args: Vec<Value>) -> Result<Outcome, HandlerError> {
            Ok(Outcome::Final(Value::Null))
        }
    }

    #[test]
    fn resolves_registered_names_and_rejects_unknown() {
        let mut registry = EndpointRegistry::new();
        registry
            .register(EndpointDecl::new("a", Verb::Get, Nop))
            .unwrap();
        registry
            .register(EndpointDecl::new("b", Verb::Post, Nop))
            .unwrap();

        assert_eq!(registry.resolve("a").unwrap().verb(), Verb::Get);
        assert_eq!(registry.resolve("b").unwrap().verb(), Verb::Post);
        assert!(registry.resolve("c").is_none());
    }

    #[test]
    fn resolution_is_order_independent() {
        let mut forward = EndpointRegistry::new();
        forward.register(EndpointDecl::new("a", Verb::Get, Nop)).unwrap();
        forward.register(EndpointDecl::new("b", Verb::Post, Nop)).unwrap();

        let mut reversed = EndpointRegistry::new();
        reversed.register(EndpointDecl::new("b", Verb::Post, Nop)).unwrap();
        reversed.register(EndpointDecl::new("a", Verb::Get, Nop)).unwrap();

        for registry in [&forward, &reversed] {
            assert!(registry.resolve("a").is_some());
            assert!(registry.resolve("b").is_some());
            assert!(registry.resolve("c").is_none());
        }
    }

    #[test]
    fn duplicate_registration_fails_loudly() {
        let mut registry = EndpointRegistry::new();
        registry
            .register(EndpointDecl::new("status", Verb::Get, Nop))
            .unwrap();
        let err = registry
            .register(EndpointDecl::new("status", Verb::Post, Nop))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { name } if name == "status"));
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut registry = EndpointRegistry::new();
        let err = registry
            .register(EndpointDecl::new("", Verb::Get, Nop))
            .unwrap_err();
        assert!(matches!(err, RegistryError::EmptyName));
    }

    #[test]
    fn duplicate_parameter_is_rejected() {
        let mut registry = EndpointRegistry::new();
        let err = registry
            .register(EndpointDecl::new("job", Verb::Post, Nop).with_params(["x", "x"]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateParam { .. }));
    }

    #[test]
    fn declarations_preserve_registration_order() {
        let mut registry = EndpointRegistry::new();
        for name in ["third", "first", "second"] {
            registry
                .register(EndpointDecl::new(name, Verb::Get, Nop))
                .unwrap();
        }
        let names: Vec<&str> = registry.declarations().iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["third", "first", "second"]);
    }
}
