//! Mapping from SSA variable names to their static types.

use std::{collections::BTreeMap, fmt};

use crate::analysis::ssa::types::VarType;

/// Total mapping from variable name to [`VarType`].
///
/// Entries are kept in name order so that rendering is deterministic. Passes add entries only
/// for the temporaries they create, through [`TypeMap::make_temporary`]; existing entries are
/// never rewritten.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeMap {
    types: BTreeMap<String, VarType>,
}

impl TypeMap {
    /// Creates an empty type map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            types: BTreeMap::new(),
        }
    }

    /// Returns the type of `variable`.
    #[must_use]
    pub fn get(&self, variable: &str) -> Option<&VarType> {
        self.types.get(variable)
    }

    /// Returns `true` if `variable` has a type entry.
    #[must_use]
    pub fn contains(&self, variable: &str) -> bool {
        self.types.contains_key(variable)
    }

    /// Records the type of a variable introduced by the front end.
    ///
    /// Returns the previous entry, if any.
    pub fn insert(&mut self, variable: impl Into<String>, ty: VarType) -> Option<VarType> {
        self.types.insert(variable.into(), ty)
    }

    /// Returns the number of typed variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if no variable is typed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Iterates over `(name, type)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &VarType)> {
        self.types.iter().map(|(name, ty)| (name.as_str(), ty))
    }

    /// Creates a fresh temporary variable of the given type.
    ///
    /// The name is `$<semantics>$<n>` with `n` the smallest positive integer for which the
    /// name is not yet taken.
    ///
    /// # Arguments
    ///
    /// * `semantics` - Short description of the value, for example `numel_result`.
    /// * `ty` - The type of the new variable.
    ///
    /// # Returns
    ///
    /// The name of the new variable.
    pub fn make_temporary(&mut self, semantics: &str, ty: VarType) -> String {
        let mut counter = 1usize;
        loop {
            let name = format!("${semantics}${counter}");
            if !self.types.contains_key(&name) {
                self.types.insert(name.clone(), ty);
                return name;
            }
            counter += 1;
        }
    }
}

impl fmt::Display for TypeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, ty) in &self.types {
            writeln!(f, "{name}: {ty}")?;
        }
        Ok(())
    }
}
