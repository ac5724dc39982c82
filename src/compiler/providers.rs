//! Function registry: the signature oracle consulted whenever a pass emits a call.
//!
//! Passes never invent result types. When a rewrite introduces `numel(A)` or
//! `matisse_new_array_from_dims(1, n)`, it asks the [`FunctionRegistry`] which
//! [`FunctionSignature`] that call has for the argument types at hand. Each name maps to an
//! [`InstanceProvider`]; the registry is populated once and only read afterwards, so it can be
//! shared between threads compiling different functions.
//!
//! Instantiations (the specialized implementations the backend will emit) are memoized once per
//! `(name, argument types)` key.
//!
//! # Example
//!
//! ```rust
//! use matssa::analysis::{ElementKind, Shape, VarType};
//! use matssa::compiler::{FunctionRegistry, ProviderData};
//!
//! let registry = FunctionRegistry::with_builtins();
//! let data = ProviderData::new(vec![VarType::matrix(ElementKind::Double, Shape::row(None))]);
//! let signature = registry.resolve("numel", &data)?;
//! assert_eq!(signature.outputs, vec![VarType::double()]);
//! # Ok::<(), matssa::Error>(())
//! ```

use std::{collections::HashMap, fmt, sync::Arc};

use dashmap::DashMap;

use crate::{
    analysis::{FunctionSignature, VarType},
    Error, Result,
};

/// Inputs of a signature request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProviderData {
    /// Argument types.
    pub inputs: Vec<VarType>,
    /// Number of requested results.
    pub output_count: usize,
    /// Result types the caller intends to bind, when they already exist.
    pub outputs: Option<Vec<VarType>>,
}

impl ProviderData {
    /// Creates a request for a single result.
    #[must_use]
    pub fn new(inputs: Vec<VarType>) -> Self {
        Self {
            inputs,
            output_count: 1,
            outputs: None,
        }
    }

    /// Sets the number of requested results.
    #[must_use]
    pub fn with_output_count(mut self, count: usize) -> Self {
        self.output_count = count;
        self
    }

    /// Sets the intended result types; the result count follows.
    #[must_use]
    pub fn with_outputs(mut self, outputs: Vec<VarType>) -> Self {
        self.output_count = outputs.len();
        self.outputs = Some(outputs);
        self
    }

    /// Renders the argument types, used in error messages and memo keys.
    #[must_use]
    pub fn argument_list(&self) -> String {
        self.inputs
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A specialized function implementation handed to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Implementation {
    /// Unique symbol of this specialization.
    pub symbol: String,
    /// Resolved signature.
    pub signature: FunctionSignature,
}

impl fmt::Display for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.symbol, self.signature)
    }
}

/// Resolves and instantiates one function name.
pub trait InstanceProvider: Send + Sync {
    /// Returns the signature of the function for the given argument types.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvableFunction`] if no overload accepts the arguments.
    fn resolve_type(&self, data: &ProviderData) -> Result<FunctionSignature>;

    /// Produces the specialized implementation for the given argument types.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvableFunction`] if no overload accepts the arguments.
    fn instantiate(&self, function: &str, data: &ProviderData) -> Result<Implementation> {
        let signature = self.resolve_type(data)?;
        let mangled = data
            .inputs
            .iter()
            .map(mangle)
            .collect::<Vec<_>>()
            .join("_");
        let symbol = if mangled.is_empty() {
            function.to_string()
        } else {
            format!("{function}_{mangled}")
        };
        Ok(Implementation { symbol, signature })
    }
}

fn mangle(ty: &VarType) -> String {
    match ty {
        VarType::Scalar { element, .. } => element.to_string(),
        VarType::Matrix { element, .. } => format!("{element}m"),
        VarType::String => "s".to_string(),
    }
}

/// Name to provider table with memoized instantiations.
pub struct FunctionRegistry {
    /// Providers by function name; fixed after population.
    providers: HashMap<String, Arc<dyn InstanceProvider>>,
    /// Instantiations by `name(argument types)`.
    instances: DashMap<String, Arc<Implementation>>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            instances: DashMap::new(),
        }
    }

    /// Creates a registry holding every builtin the passes emit.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::compiler::builtins::register_builtins(&mut registry);
        registry
    }

    /// Registers `provider` under `name`, replacing any previous provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn InstanceProvider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Returns `true` if a provider exists for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Returns the registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn provider(&self, name: &str, data: &ProviderData) -> Result<&Arc<dyn InstanceProvider>> {
        self.providers
            .get(name)
            .ok_or_else(|| Error::UnresolvableFunction {
                function: name.to_string(),
                arguments: data.argument_list(),
            })
    }

    /// Resolves the signature of `name` for the given request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvableFunction`] if `name` has no provider or the provider
    /// rejects the arguments.
    pub fn resolve(&self, name: &str, data: &ProviderData) -> Result<FunctionSignature> {
        self.provider(name, data)?.resolve_type(data)
    }

    /// Instantiates `name` for the given request, once per argument type list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvableFunction`] if `name` has no provider or the provider
    /// rejects the arguments.
    pub fn instantiate(&self, name: &str, data: &ProviderData) -> Result<Arc<Implementation>> {
        let key = format!("{name}({})", data.argument_list());
        if let Some(existing) = self.instances.get(&key) {
            return Ok(Arc::clone(existing.value()));
        }

        let implementation = Arc::new(self.provider(name, data)?.instantiate(name, data)?);
        let entry = self.instances.entry(key).or_insert(implementation);
        Ok(Arc::clone(entry.value()))
    }

    /// Returns the number of memoized instantiations.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{ElementKind, Shape};

    struct Fixed;

    impl InstanceProvider for Fixed {
        fn resolve_type(&self, data: &ProviderData) -> Result<FunctionSignature> {
            Ok(FunctionSignature::new(
                data.inputs.clone(),
                vec![VarType::logical()],
            ))
        }
    }

    #[test]
    fn test_unknown_function_is_unresolvable() {
        let registry = FunctionRegistry::new();
        let err = registry
            .resolve("nope", &ProviderData::new(vec![VarType::double()]))
            .unwrap_err();
        match err {
            Error::UnresolvableFunction {
                function,
                arguments,
            } => {
                assert_eq!(function, "nope");
                assert_eq!(arguments, "double");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_instantiate_is_memoized() {
        let mut registry = FunctionRegistry::new();
        registry.register("isok", Arc::new(Fixed));
        let data = ProviderData::new(vec![VarType::matrix(
            ElementKind::Int32,
            Shape::row(None),
        )]);

        let first = registry.instantiate("isok", &data).expect("first");
        let second = registry.instantiate("isok", &data).expect("second");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.symbol, "isok_int32m");
        assert_eq!(registry.instance_count(), 1);

        registry
            .instantiate("isok", &ProviderData::new(vec![VarType::double()]))
            .expect("third");
        assert_eq!(registry.instance_count(), 2);
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = FunctionRegistry::new();
        registry.register("b", Arc::new(Fixed));
        registry.register("a", Arc::new(Fixed));
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.contains("a"));
    }
}
