//! Symbolic equivalence of scalar values and matrix sizes.
//!
//! Several passes must prove that two scalar variables always hold the same value: loop
//! fusion compares loop bounds, allocation value elimination compares a loop bound with the
//! size of the matrix the loop fills, trivial loop elimination compares start and end.
//!
//! [`ScalarValueInfo`] maps every scalar variable to a canonical [`ValueKey`]. Two variables
//! with equal keys hold equal values. Keys are built from:
//!
//! - constants known from literals or the type map,
//! - copies (`x = y`),
//! - `numel`, `size(X, k)` and `end` of matrices whose shape is traced back through
//!   allocations (`zeros`, `ones`, `matisse_new_array_from_dims`, ...), copies, element
//!   writes and loop-carried phis,
//! - pure arithmetic calls, with `plus` and `times` operands in canonical order.
//!
//! Anything else is opaque and equal only to itself.

use std::collections::HashSet;

use crate::analysis::{
    defuse::DefUseIndex,
    ssa::{AssignedValue, FunctionInstance, SsaInstruction, VarType},
};

/// Maximum definition chain length followed before a value is treated as opaque.
const MAX_DEPTH: usize = 64;

/// Allocation functions whose scalar arguments are the dimensions of the result.
pub const DIMENSION_ALLOCATIONS: &[&str] = &["zeros", "ones", "matisse_new_array_from_dims"];

/// Canonical symbolic value of a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKey {
    /// Known constant, stored as IEEE bits.
    Constant(u64),
    /// Value of a variable nothing more is known about.
    Opaque(String),
    /// Element count of an opaque matrix.
    Numel(String),
    /// Size of an opaque matrix along a 0-based dimension.
    Size(String, usize),
    /// Product of the sizes of an opaque matrix from a 0-based dimension on.
    SizeFrom(String, usize),
    /// Result of a pure function applied to values.
    Call(String, Vec<ValueKey>),
}

impl ValueKey {
    /// Creates a constant key.
    #[must_use]
    pub fn constant(value: f64) -> Self {
        // Normalize -0.0 so it compares equal to 0.0.
        let value = if value == 0.0 { 0.0 } else { value };
        ValueKey::Constant(value.to_bits())
    }

    /// Returns the constant value of a constant key.
    #[must_use]
    pub fn as_constant(&self) -> Option<f64> {
        match self {
            ValueKey::Constant(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }
}

/// Symbolic shape of a matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ShapeKey {
    /// One key per dimension.
    Dims(Vec<ValueKey>),
    /// Nothing is known beyond the type of the named root matrix.
    Opaque(String),
}

/// Scalar value equivalence over one function instance.
pub struct ScalarValueInfo<'a> {
    instance: &'a FunctionInstance,
    index: DefUseIndex,
}

impl<'a> ScalarValueInfo<'a> {
    /// Indexes `instance` for value queries.
    #[must_use]
    pub fn new(instance: &'a FunctionInstance) -> Self {
        Self {
            instance,
            index: DefUseIndex::build(&instance.body),
        }
    }

    /// Returns `true` if `a` and `b` provably hold the same value.
    #[must_use]
    pub fn are_same_value(&self, a: &str, b: &str) -> bool {
        a == b || self.value_key(a) == self.value_key(b)
    }

    /// Returns the known constant value of `variable`.
    #[must_use]
    pub fn constant(&self, variable: &str) -> Option<f64> {
        self.value_key(variable).as_constant()
    }

    /// Returns the canonical value of a scalar variable.
    #[must_use]
    pub fn value_key(&self, variable: &str) -> ValueKey {
        self.scalar_key(variable, &mut Vec::new())
    }

    /// Returns `true` if `scalar` provably equals `numel(matrix)`.
    #[must_use]
    pub fn is_numel_of(&self, scalar: &str, matrix: &str) -> bool {
        self.value_key(scalar) == self.numel_key(matrix, &mut Vec::new())
    }

    /// Returns `true` if `scalar` provably equals `size(matrix, dim + 1)`.
    #[must_use]
    pub fn is_size_of(&self, scalar: &str, matrix: &str, dim: usize) -> bool {
        self.value_key(scalar) == self.size_key(matrix, dim, &mut Vec::new())
    }

    /// Returns `true` if `scalar` provably equals the product of the sizes of `matrix` from
    /// 0-based dimension `dim` on.
    #[must_use]
    pub fn is_size_from_of(&self, scalar: &str, matrix: &str, dim: usize) -> bool {
        self.value_key(scalar) == self.size_from_key(matrix, dim, &mut Vec::new())
    }

    /// Returns `true` if both matrices provably have the same shape.
    #[must_use]
    pub fn have_same_shape(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        let shape_a = self.shape_key(a, &mut Vec::new());
        let shape_b = self.shape_key(b, &mut Vec::new());
        match (&shape_a, &shape_b) {
            (ShapeKey::Opaque(x), ShapeKey::Opaque(y)) => x == y,
            _ => shape_a == shape_b,
        }
    }

    fn type_of(&self, variable: &str) -> Option<&VarType> {
        self.instance.types.get(variable)
    }

    fn definition(&self, variable: &str) -> Option<&'a SsaInstruction> {
        self.index.def_instruction(&self.instance.body, variable)
    }

    fn scalar_key(&self, variable: &str, stack: &mut Vec<String>) -> ValueKey {
        if let Some(value) = self.type_of(variable).and_then(VarType::constant_value) {
            return ValueKey::constant(value);
        }
        if stack.len() >= MAX_DEPTH || stack.iter().any(|v| v == variable) {
            return ValueKey::Opaque(variable.to_string());
        }

        stack.push(variable.to_string());
        let key = self.scalar_key_uncached(variable, stack);
        stack.pop();
        key
    }

    fn scalar_key_uncached(&self, variable: &str, stack: &mut Vec<String>) -> ValueKey {
        let opaque = || ValueKey::Opaque(variable.to_string());
        let Some(definition) = self.definition(variable) else {
            return opaque();
        };

        match definition {
            SsaInstruction::Assignment { value, .. } => match value {
                AssignedValue::Number(n) => ValueKey::constant(*n),
                AssignedValue::Variable(source) => self.scalar_key(source, stack),
                AssignedValue::Undefined => opaque(),
            },
            SsaInstruction::End {
                base,
                axis,
                axis_count,
                ..
            } => {
                if *axis + 1 == *axis_count {
                    self.size_from_key(base, *axis, stack)
                } else {
                    self.size_key(base, *axis, stack)
                }
            }
            SsaInstruction::TypedCall {
                function,
                signature,
                outputs,
                inputs,
            } if outputs.len() == 1 && !signature.side_effects => {
                self.call_key(variable, function, inputs, stack)
            }
            _ => opaque(),
        }
    }

    fn call_key(
        &self,
        variable: &str,
        function: &str,
        inputs: &[String],
        stack: &mut Vec<String>,
    ) -> ValueKey {
        let opaque = || ValueKey::Opaque(variable.to_string());
        match (function, inputs) {
            ("numel", [matrix]) => self.numel_key(matrix, stack),
            ("size", [matrix, dim]) => match self.integer(dim, stack) {
                Some(d) if d >= 1 => self.size_key(matrix, d - 1, stack),
                _ => opaque(),
            },
            _ => {
                if !inputs
                    .iter()
                    .all(|i| self.type_of(i).is_some_and(VarType::is_scalar))
                {
                    return opaque();
                }
                let keys: Vec<ValueKey> =
                    inputs.iter().map(|i| self.scalar_key(i, stack)).collect();
                match function {
                    "times" => product(keys),
                    "plus" => {
                        if let Some(sum) = fold_constants(&keys, |a, b| a + b) {
                            return ValueKey::constant(sum);
                        }
                        let mut keys = keys;
                        keys.sort();
                        ValueKey::Call("plus".to_string(), keys)
                    }
                    "minus" => match fold_constants(&keys, |a, b| a - b) {
                        Some(diff) if keys.len() == 2 => ValueKey::constant(diff),
                        _ => ValueKey::Call("minus".to_string(), keys),
                    },
                    _ => ValueKey::Call(function.to_string(), keys),
                }
            }
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn integer(&self, variable: &str, stack: &mut Vec<String>) -> Option<usize> {
        let value = self.scalar_key(variable, stack).as_constant()?;
        if value.fract() == 0.0 && value >= 0.0 {
            Some(value as usize)
        } else {
            None
        }
    }

    fn shape_key(&self, matrix: &str, stack: &mut Vec<String>) -> ShapeKey {
        let opaque = ShapeKey::Opaque(matrix.to_string());
        if let Some(shape) = self.type_of(matrix).and_then(VarType::shape) {
            if let Some(dims) = shape.dims() {
                if dims.iter().all(Option::is_some) {
                    return ShapeKey::Dims(
                        dims.iter()
                            .map(|d| ValueKey::constant(d.unwrap_or(1) as f64))
                            .collect(),
                    );
                }
            }
        }
        if stack.len() >= MAX_DEPTH || stack.iter().any(|v| v == matrix) {
            return opaque;
        }
        let Some(definition) = self.definition(matrix) else {
            return opaque;
        };

        stack.push(matrix.to_string());
        let key = match definition {
            SsaInstruction::Assignment {
                value: AssignedValue::Variable(source),
                ..
            } => self.shape_key(source, stack),
            SsaInstruction::SimpleSet { base, .. } => self.shape_key(base, stack),
            SsaInstruction::Phi { sources, .. } => {
                let shapes: Vec<ShapeKey> = sources
                    .iter()
                    .map(|s| self.shape_key(&s.variable, stack))
                    .collect();
                // Sources leading back to a matrix being resolved carry no information; if
                // every source does, the cycle root is passed up.
                let (cyclic, shapes): (Vec<ShapeKey>, Vec<ShapeKey>) = shapes
                    .into_iter()
                    .partition(|shape| matches!(shape, ShapeKey::Opaque(root) if stack.contains(root)));
                match shapes.split_first() {
                    Some((first, rest)) if rest.iter().all(|s| s == first) => first.clone(),
                    None => cyclic.into_iter().next().unwrap_or(opaque),
                    _ => opaque,
                }
            }
            SsaInstruction::TypedCall {
                function,
                outputs,
                inputs,
                ..
            } if outputs.len() == 1 => self.allocation_shape(function, inputs, stack).unwrap_or(opaque),
            _ => opaque,
        };
        stack.pop();
        key
    }

    fn allocation_shape(
        &self,
        function: &str,
        inputs: &[String],
        stack: &mut Vec<String>,
    ) -> Option<ShapeKey> {
        // Element class arguments such as 'int32' do not contribute dimensions.
        let inputs: Vec<&String> = inputs
            .iter()
            .filter(|i| !matches!(self.type_of(i), Some(VarType::String)))
            .collect();

        if function == "matisse_new_array_from_matrix" {
            return match inputs.as_slice() {
                [source] => Some(self.shape_key(source, stack)),
                _ => None,
            };
        }

        let is_dims = DIMENSION_ALLOCATIONS.contains(&function);
        if !is_dims && function != "matisse_new_array" {
            return None;
        }

        let all_scalar = inputs
            .iter()
            .all(|i| self.type_of(i).is_some_and(VarType::is_scalar));

        match inputs.as_slice() {
            [] if is_dims => Some(ShapeKey::Dims(vec![
                ValueKey::constant(1.0),
                ValueKey::constant(1.0),
            ])),
            [single] if !all_scalar => {
                // zeros(size(X)) and matisse_new_array(size(X)) copy the shape of X.
                match self.definition(single) {
                    Some(SsaInstruction::TypedCall {
                        function, inputs, ..
                    }) if function == "size" && inputs.len() == 1 => {
                        Some(self.shape_key(&inputs[0], stack))
                    }
                    _ => None,
                }
            }
            [single] if is_dims => {
                let key = self.scalar_key(single, stack);
                Some(ShapeKey::Dims(vec![key.clone(), key]))
            }
            many if is_dims && all_scalar => {
                let mut keys: Vec<ValueKey> =
                    many.iter().map(|i| self.scalar_key(i, stack)).collect();
                while keys.len() > 2 && keys.last() == Some(&ValueKey::constant(1.0)) {
                    keys.pop();
                }
                Some(ShapeKey::Dims(keys))
            }
            _ => None,
        }
    }

    fn rank_of(&self, matrix: &str) -> Option<usize> {
        self.type_of(matrix)
            .and_then(VarType::shape)
            .and_then(|s| s.rank())
    }

    fn size_key(&self, matrix: &str, dim: usize, stack: &mut Vec<String>) -> ValueKey {
        match self.shape_key(matrix, stack) {
            ShapeKey::Dims(keys) => keys
                .get(dim)
                .cloned()
                .unwrap_or_else(|| ValueKey::constant(1.0)),
            ShapeKey::Opaque(root) => self.opaque_size(&root, dim),
        }
    }

    fn opaque_size(&self, root: &str, dim: usize) -> ValueKey {
        match self
            .type_of(root)
            .and_then(VarType::shape)
            .and_then(|s| s.dim(dim))
        {
            Some(d) => ValueKey::constant(d as f64),
            None => ValueKey::Size(root.to_string(), dim),
        }
    }

    fn size_from_key(&self, matrix: &str, dim: usize, stack: &mut Vec<String>) -> ValueKey {
        match self.shape_key(matrix, stack) {
            ShapeKey::Dims(keys) => product(keys.into_iter().skip(dim).collect()),
            ShapeKey::Opaque(root) => match self.rank_of(&root) {
                Some(rank) => product((dim..rank).map(|d| self.opaque_size(&root, d)).collect()),
                None if dim == 0 => ValueKey::Numel(root),
                None => ValueKey::SizeFrom(root, dim),
            },
        }
    }

    fn numel_key(&self, matrix: &str, stack: &mut Vec<String>) -> ValueKey {
        self.size_from_key(matrix, 0, stack)
    }
}

fn fold_constants(keys: &[ValueKey], op: impl Fn(f64, f64) -> f64) -> Option<f64> {
    let mut values = keys.iter().map(ValueKey::as_constant);
    let first = values.next()??;
    values.try_fold(first, |acc, v| v.map(|v| op(acc, v)))
}

/// Canonical product: nested products flattened, constants folded, unit factors dropped and
/// remaining factors sorted.
fn product(keys: Vec<ValueKey>) -> ValueKey {
    let mut constant = 1.0f64;
    let mut factors = Vec::new();
    let mut pending = keys;
    while let Some(key) = pending.pop() {
        match key {
            ValueKey::Call(name, args) if name == "times" => pending.extend(args),
            other => match other.as_constant() {
                Some(value) => constant *= value,
                None => factors.push(other),
            },
        }
    }

    factors.sort();
    if factors.is_empty() {
        return ValueKey::constant(constant);
    }
    if constant == 1.0 && factors.len() == 1 {
        return factors.remove(0);
    }
    if constant != 1.0 {
        factors.insert(0, ValueKey::constant(constant));
    }
    ValueKey::Call("times".to_string(), factors)
}

/// Returns the names of all variables aliasing `variable` through plain copies.
#[must_use]
pub fn copy_aliases(instance: &FunctionInstance, variable: &str) -> HashSet<String> {
    let mut aliases: HashSet<String> = HashSet::new();
    aliases.insert(variable.to_string());
    let mut changed = true;
    while changed {
        changed = false;
        for (_, _, instruction) in instance.body.instructions() {
            if let SsaInstruction::Assignment {
                output,
                value: AssignedValue::Variable(source),
            } = instruction
            {
                if aliases.contains(source) && aliases.insert(output.clone()) {
                    changed = true;
                }
            }
        }
    }
    aliases
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ssa::{ElementKind, FunctionBuilder, Shape};

    #[test]
    fn test_copies_and_constants() {
        let instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["n$1", "m$1", "k$1"]);
            f.block(0, |b| {
                b.argument("n$1", 0);
                b.assign("m$1", "n$1");
                b.number("c$1", 3.0);
                b.number("d$1", 3.0);
                b.argument("k$1", 1);
            });
        });
        let info = ScalarValueInfo::new(&instance);
        assert!(info.are_same_value("n$1", "m$1"));
        assert!(info.are_same_value("c$1", "d$1"));
        assert!(!info.are_same_value("n$1", "k$1"));
        assert_eq!(info.constant("c$1"), Some(3.0));
    }

    #[test]
    fn test_numel_of_allocation() {
        let instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["a$1", "b$1", "p$1", "q$1", "s$1"]);
            f.matrix("X$1", Shape::with_rank(2));
            f.block(0, |b| {
                b.argument("a$1", 0);
                b.argument("b$1", 1);
                b.call("zeros", &["X$1"], &["a$1", "b$1"]);
                b.call("numel", &["p$1"], &["X$1"]);
                b.call("times", &["q$1"], &["b$1", "a$1"]);
                b.number("two$1", 2.0);
                b.call("size", &["s$1"], &["X$1", "two$1"]);
            });
        });
        let info = ScalarValueInfo::new(&instance);
        assert!(info.are_same_value("p$1", "q$1"));
        assert!(info.is_numel_of("q$1", "X$1"));
        assert!(info.is_size_of("b$1", "X$1", 1));
        assert!(info.are_same_value("s$1", "b$1"));
        assert!(info.is_size_from_of("b$1", "X$1", 1));
    }

    #[test]
    fn test_row_numel_equals_width() {
        let instance = FunctionBuilder::new("f").build_with(|f| {
            f.matrix("A$1", Shape::row(None));
            f.scalars(&["n$1", "w$1"]);
            f.block(0, |b| {
                b.argument("A$1", 0);
                b.call("numel", &["n$1"], &["A$1"]);
                b.number("two$1", 2.0);
                b.call("size", &["w$1"], &["A$1", "two$1"]);
            });
        });
        let info = ScalarValueInfo::new(&instance);
        assert!(info.are_same_value("n$1", "w$1"));
    }

    #[test]
    fn test_loop_carried_shape() {
        let instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["n$1", "v$1"]);
            f.var("X$1", VarType::matrix(ElementKind::Double, Shape::with_rank(2)));
            f.matrix("X$2", Shape::with_rank(2));
            f.matrix("X$3", Shape::with_rank(2));
            f.block(0, |b| {
                b.argument("n$1", 0);
                b.call("zeros", &["X$1"], &["n$1"]);
                b.number("one$1", 1.0);
                b.for_loop("one$1", "one$1", "n$1", 1, 2);
            });
            f.block(1, |b| {
                b.phi("X$2", &[(0, "X$1"), (1, "X$3")]);
                b.iter("i$1");
                b.number("v$1", 0.0);
                b.simple_set("X$3", "X$2", &["i$1"], "v$1");
            });
            f.block(2, |_| {});
        });
        let info = ScalarValueInfo::new(&instance);
        assert!(info.is_size_of("n$1", "X$3", 0));
        assert!(info.is_size_of("n$1", "X$2", 0));
        assert!(info.have_same_shape("X$1", "X$3"));
    }

    #[test]
    fn test_copy_aliases() {
        let instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["a$1", "b$1", "c$1"]);
            f.block(0, |b| {
                b.argument("a$1", 0);
                b.assign("b$1", "a$1");
                b.assign("c$1", "b$1");
            });
        });
        let aliases = copy_aliases(&instance, "a$1");
        assert_eq!(aliases.len(), 3);
    }
}
