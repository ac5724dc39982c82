//! Builtin instance providers.
//!
//! Typing rules for every function the passes emit. Each rule maps the argument types of a
//! request to result types, or rejects the request. The rules are deliberately conservative:
//! a result dimension is only known when every argument that determines it is known.

use std::sync::Arc;

use crate::{
    analysis::{ElementKind, FunctionSignature, Shape, VarType},
    compiler::providers::{FunctionRegistry, InstanceProvider, ProviderData},
    Error, Result,
};

type Rule = fn(&ProviderData) -> Option<Vec<VarType>>;

/// A builtin provider backed by a typing rule.
struct Builtin {
    name: &'static str,
    rule: Rule,
}

impl InstanceProvider for Builtin {
    fn resolve_type(&self, data: &ProviderData) -> Result<FunctionSignature> {
        let unresolvable = || Error::UnresolvableFunction {
            function: self.name.to_string(),
            arguments: data.argument_list(),
        };

        let mut outputs = (self.rule)(data).ok_or_else(unresolvable)?;
        if data.output_count > outputs.len() {
            return Err(unresolvable());
        }
        outputs.truncate(data.output_count);

        if let Some(intended) = &data.outputs {
            if intended.len() != outputs.len() {
                return Err(unresolvable());
            }
            outputs.clone_from(intended);
        }

        Ok(FunctionSignature::new(data.inputs.clone(), outputs))
    }
}

const BUILTINS: &[(&str, Rule)] = &[
    ("numel", numel),
    ("size", size),
    ("ndims", ndims),
    ("length", length),
    ("plus", plus),
    ("minus", minus),
    ("times", times),
    ("rdivide", rdivide),
    ("mod", modulo),
    ("idivide", idivide),
    ("eq", comparison),
    ("ne", comparison),
    ("lt", comparison),
    ("le", comparison),
    ("gt", comparison),
    ("ge", comparison),
    ("and", comparison),
    ("or", comparison),
    ("not", negation),
    ("zeros", allocation),
    ("ones", allocation),
    ("matisse_new_array", allocation),
    ("matisse_new_array_from_dims", allocation),
    ("matisse_new_array_from_matrix", allocation_from_matrix),
    ("horzcat", horzcat),
    ("colon", colon),
    ("min", min_max),
    ("max", min_max),
    ("sum", sum_mean),
    ("mean", sum_mean),
    ("dot", dot),
];

/// Registers every builtin provider.
pub(crate) fn register_builtins(registry: &mut FunctionRegistry) {
    for (name, rule) in BUILTINS {
        registry.register(*name, Arc::new(Builtin { name: *name, rule: *rule }));
    }
}

#[allow(clippy::cast_precision_loss)]
fn count(value: usize) -> f64 {
    value as f64
}

fn known_double(value: Option<usize>) -> VarType {
    match value {
        Some(v) => VarType::constant(ElementKind::Double, count(v)),
        None => VarType::double(),
    }
}

fn is_value(ty: &VarType) -> bool {
    !matches!(ty, VarType::String)
}

fn scalar_shape(ty: &VarType) -> Shape {
    match ty {
        VarType::Matrix { shape, .. } => shape.clone(),
        _ => Shape::known(&[1, 1]),
    }
}

fn numel(data: &ProviderData) -> Option<Vec<VarType>> {
    match data.inputs.as_slice() {
        [x] if is_value(x) => Some(vec![known_double(scalar_shape(x).numel())]),
        _ => None,
    }
}

fn ndims(data: &ProviderData) -> Option<Vec<VarType>> {
    match data.inputs.as_slice() {
        [x] if is_value(x) => Some(vec![known_double(scalar_shape(x).rank())]),
        _ => None,
    }
}

fn length(data: &ProviderData) -> Option<Vec<VarType>> {
    match data.inputs.as_slice() {
        [x] if is_value(x) => {
            let shape = scalar_shape(x);
            let longest = shape.dims().and_then(|dims| {
                let known: Option<Vec<usize>> = dims.iter().copied().collect();
                let known = known?;
                if known.contains(&0) {
                    Some(0)
                } else {
                    known.into_iter().max()
                }
            });
            Some(vec![known_double(longest)])
        }
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn size(data: &ProviderData) -> Option<Vec<VarType>> {
    match data.inputs.as_slice() {
        [x] if is_value(x) => {
            let shape = scalar_shape(x);
            if data.output_count > 1 {
                let mut outputs: Vec<VarType> = (0..data.output_count)
                    .map(|d| known_double(shape.dim(d)))
                    .collect();
                // The last output absorbs the remaining dimensions.
                if let (Some(rank), Some(last)) = (shape.rank(), outputs.last_mut()) {
                    if rank > data.output_count {
                        *last = VarType::double();
                    }
                }
                return Some(outputs);
            }
            Some(vec![VarType::matrix(
                ElementKind::Double,
                Shape::row(shape.rank()),
            )])
        }
        [x, d] if is_value(x) && d.is_scalar() => match d.integer_constant() {
            Some(dim) if dim >= 1 => {
                Some(vec![known_double(scalar_shape(x).dim(dim as usize - 1))])
            }
            Some(_) => None,
            None => Some(vec![VarType::double()]),
        },
        _ => None,
    }
}

fn numeric_element(a: ElementKind, b: ElementKind) -> ElementKind {
    match (a, b) {
        (ElementKind::Int32, _) | (_, ElementKind::Int32) => ElementKind::Int32,
        (ElementKind::Single, _) | (_, ElementKind::Single) => ElementKind::Single,
        _ => ElementKind::Double,
    }
}

fn broadcast(a: &VarType, b: &VarType, element: ElementKind) -> VarType {
    match (a, b) {
        (VarType::Matrix { shape, .. }, VarType::Scalar { .. })
        | (VarType::Scalar { .. }, VarType::Matrix { shape, .. }) => {
            VarType::matrix(element, shape.clone())
        }
        (VarType::Matrix { shape: sa, .. }, VarType::Matrix { shape: sb, .. }) => {
            let shape = if sa == sb {
                sa.clone()
            } else {
                sa.rank()
                    .zip(sb.rank())
                    .map_or_else(Shape::unknown, |(ra, rb)| Shape::with_rank(ra.max(rb)))
            };
            VarType::matrix(element, shape)
        }
        _ => VarType::scalar(element),
    }
}

fn arithmetic(data: &ProviderData, fold: fn(f64, f64) -> Option<f64>) -> Option<Vec<VarType>> {
    let [a, b] = data.inputs.as_slice() else {
        return None;
    };
    if !is_value(a) || !is_value(b) {
        return None;
    }
    let element = numeric_element(a.element()?, b.element()?);
    if let (Some(x), Some(y)) = (a.constant_value(), b.constant_value()) {
        if let Some(value) = fold(x, y) {
            return Some(vec![VarType::constant(element, value)]);
        }
    }
    Some(vec![broadcast(a, b, element)])
}

fn plus(data: &ProviderData) -> Option<Vec<VarType>> {
    arithmetic(data, |a, b| Some(a + b))
}

fn minus(data: &ProviderData) -> Option<Vec<VarType>> {
    arithmetic(data, |a, b| Some(a - b))
}

fn times(data: &ProviderData) -> Option<Vec<VarType>> {
    arithmetic(data, |a, b| Some(a * b))
}

fn rdivide(data: &ProviderData) -> Option<Vec<VarType>> {
    arithmetic(data, |a, b| Some(a / b))
}

fn modulo(data: &ProviderData) -> Option<Vec<VarType>> {
    arithmetic(data, |a, b| (b != 0.0).then(|| a - (a / b).floor() * b))
}

fn idivide(data: &ProviderData) -> Option<Vec<VarType>> {
    arithmetic(data, |a, b| (b != 0.0).then(|| (a / b).trunc()))
}

fn comparison(data: &ProviderData) -> Option<Vec<VarType>> {
    match data.inputs.as_slice() {
        [a, b] if is_value(a) && is_value(b) => {
            Some(vec![broadcast(a, b, ElementKind::Logical)])
        }
        _ => None,
    }
}

fn negation(data: &ProviderData) -> Option<Vec<VarType>> {
    match data.inputs.as_slice() {
        [VarType::Matrix { shape, .. }] => {
            Some(vec![VarType::matrix(ElementKind::Logical, shape.clone())])
        }
        [x] if x.is_scalar() => Some(vec![VarType::logical()]),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn dimension_of(ty: &VarType) -> Option<usize> {
    ty.integer_constant()
        .filter(|v| *v >= 0)
        .map(|v| v as usize)
}

fn allocation(data: &ProviderData) -> Option<Vec<VarType>> {
    // Trailing class names such as 'int32' carry no dimension.
    let dims: Vec<&VarType> = data.inputs.iter().filter(|t| is_value(t)).collect();
    let shape = match dims.as_slice() {
        [] => Shape::known(&[1, 1]),
        [VarType::Matrix { shape, .. }] => {
            // A size vector: its width is the rank of the result.
            match shape.dims() {
                Some([Some(1), Some(width)]) => Shape::with_rank(*width),
                _ => Shape::unknown(),
            }
        }
        [n] if n.is_scalar() => {
            let n = dimension_of(n);
            Shape::new(vec![n, n])
        }
        many if many.iter().all(|t| t.is_scalar()) => {
            Shape::new(many.iter().map(|t| dimension_of(t)).collect())
        }
        _ => return None,
    };
    Some(vec![VarType::matrix(ElementKind::Double, shape)])
}

fn allocation_from_matrix(data: &ProviderData) -> Option<Vec<VarType>> {
    match data.inputs.as_slice() {
        [VarType::Matrix { element, shape }] => {
            Some(vec![VarType::matrix(*element, shape.clone())])
        }
        [VarType::Scalar { element, .. }] => {
            Some(vec![VarType::matrix(*element, Shape::known(&[1, 1]))])
        }
        _ => None,
    }
}

fn horzcat(data: &ProviderData) -> Option<Vec<VarType>> {
    let first = data.inputs.first()?;
    let mut element = first.element()?;
    let mut all_rows = true;
    let mut width = Some(0usize);
    for input in &data.inputs {
        if !is_value(input) {
            return None;
        }
        element = numeric_element(element, input.element()?);
        match input {
            VarType::Scalar { .. } => width = width.map(|w| w + 1),
            VarType::Matrix { shape, .. } => {
                if shape.is_known_row() {
                    width = width.zip(shape.dim(1)).map(|(w, d)| w + d);
                } else {
                    all_rows = false;
                }
            }
            VarType::String => return None,
        }
    }
    if matches!(first.element(), Some(ElementKind::Logical | ElementKind::Char)) {
        element = first.element()?;
    }
    let shape = if all_rows {
        Shape::row(width)
    } else {
        Shape::with_rank(2)
    };
    Some(vec![VarType::matrix(element, shape)])
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn colon(data: &ProviderData) -> Option<Vec<VarType>> {
    let (start, step, end) = match data.inputs.as_slice() {
        [a, b] => (a, None, b),
        [a, s, b] => (a, Some(s), b),
        _ => return None,
    };
    if !start.is_scalar() || !end.is_scalar() || step.is_some_and(|s| !s.is_scalar()) {
        return None;
    }
    let step_value = match step {
        Some(s) => s.constant_value(),
        None => Some(1.0),
    };
    let width = match (start.constant_value(), step_value, end.constant_value()) {
        (Some(a), Some(s), Some(b)) if s != 0.0 => {
            let n = ((b - a) / s).floor() + 1.0;
            Some(if n > 0.0 { n as usize } else { 0 })
        }
        _ => None,
    };
    Some(vec![VarType::matrix(ElementKind::Double, Shape::row(width))])
}

fn reduced(input: &VarType) -> VarType {
    match input {
        VarType::Scalar { element, .. } => VarType::scalar(*element),
        VarType::Matrix { element, shape } if shape.is_known_1d() => VarType::scalar(*element),
        VarType::Matrix { element, shape } => {
            let shape = shape.rank().map_or_else(Shape::unknown, Shape::with_rank);
            VarType::matrix(*element, shape)
        }
        VarType::String => VarType::double(),
    }
}

fn index_of(value: &VarType) -> VarType {
    match value {
        VarType::Matrix { shape, .. } => VarType::matrix(ElementKind::Double, shape.clone()),
        _ => VarType::double(),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn min_max(data: &ProviderData) -> Option<Vec<VarType>> {
    match data.inputs.as_slice() {
        [a] if is_value(a) => {
            let value = reduced(a);
            let index = index_of(&value);
            Some(vec![value, index])
        }
        [a, b] if is_value(a) && is_value(b) => {
            let element = numeric_element(a.element()?, b.element()?);
            Some(vec![broadcast(a, b, element)])
        }
        [a, empty, d] if is_value(a) && empty.is_known_empty() && d.is_scalar() => {
            let element = a.element()?;
            let shape = scalar_shape(a);
            let value = match (shape.dims(), d.integer_constant()) {
                (Some(dims), Some(dim)) if dim >= 1 => {
                    let mut dims = dims.to_vec();
                    let dim = dim as usize - 1;
                    if dim < dims.len() {
                        dims[dim] = Some(1);
                    }
                    VarType::matrix(element, Shape::new(dims))
                }
                (Some(dims), _) => VarType::matrix(element, Shape::with_rank(dims.len())),
                (None, _) => VarType::matrix(element, Shape::unknown()),
            };
            let index = index_of(&value);
            Some(vec![value, index])
        }
        _ => None,
    }
}

fn sum_mean(data: &ProviderData) -> Option<Vec<VarType>> {
    match data.inputs.as_slice() {
        [x] if is_value(x) => {
            let out = match reduced(x) {
                VarType::Scalar { element, .. } if element == ElementKind::Logical => {
                    VarType::double()
                }
                other => other,
            };
            Some(vec![out])
        }
        _ => None,
    }
}

fn dot(data: &ProviderData) -> Option<Vec<VarType>> {
    match data.inputs.as_slice() {
        [a, b] if is_value(a) && is_value(b) => {
            let element = numeric_element(a.element()?, b.element()?);
            Some(vec![VarType::scalar(element)])
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(name: &str, inputs: Vec<VarType>) -> Result<FunctionSignature> {
        FunctionRegistry::with_builtins().resolve(name, &ProviderData::new(inputs))
    }

    fn constant(value: f64) -> VarType {
        VarType::constant(ElementKind::Double, value)
    }

    #[test]
    fn test_every_builtin_registered() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(registry.names().len(), BUILTINS.len());
        for name in ["numel", "horzcat", "matisse_new_array_from_dims", "dot"] {
            assert!(registry.contains(name), "{name}");
        }
    }

    #[test]
    fn test_numel_of_known_shape_is_constant() {
        let sig = resolve(
            "numel",
            vec![VarType::matrix(ElementKind::Double, Shape::known(&[2, 3]))],
        )
        .expect("numel");
        assert_eq!(sig.outputs, vec![constant(6.0)]);
    }

    #[test]
    fn test_arithmetic_folds_constants() {
        let sig = resolve("plus", vec![constant(1.0), constant(2.0)]).expect("plus");
        assert_eq!(sig.outputs, vec![constant(3.0)]);

        let sig = resolve("times", vec![VarType::int32(), VarType::double()]).expect("times");
        assert_eq!(sig.outputs, vec![VarType::int32()]);
    }

    #[test]
    fn test_allocation_shapes() {
        let sig = resolve("zeros", vec![VarType::double()]).expect("zeros");
        assert_eq!(
            sig.outputs,
            vec![VarType::matrix(ElementKind::Double, Shape::with_rank(2))]
        );

        let sig = resolve(
            "matisse_new_array_from_dims",
            vec![constant(1.0), constant(4.0)],
        )
        .expect("alloc");
        assert_eq!(
            sig.outputs,
            vec![VarType::matrix(ElementKind::Double, Shape::row(Some(4)))]
        );
    }

    #[test]
    fn test_horzcat_width() {
        let sig = resolve(
            "horzcat",
            vec![
                VarType::double(),
                VarType::matrix(ElementKind::Double, Shape::row(Some(2))),
            ],
        )
        .expect("horzcat");
        assert_eq!(
            sig.outputs,
            vec![VarType::matrix(ElementKind::Double, Shape::row(Some(3)))]
        );
    }

    #[test]
    fn test_min_with_dimension() {
        let empty = VarType::matrix(ElementKind::Double, Shape::known(&[0, 0]));
        let data = ProviderData::new(vec![
            VarType::matrix(ElementKind::Double, Shape::with_rank(2)),
            empty,
            constant(1.0),
        ])
        .with_output_count(2);
        let sig = FunctionRegistry::with_builtins()
            .resolve("min", &data)
            .expect("min");
        assert_eq!(
            sig.outputs[0],
            VarType::matrix(ElementKind::Double, Shape::new(vec![Some(1), None]))
        );
        assert_eq!(sig.outputs.len(), 2);
    }

    #[test]
    fn test_intended_outputs_are_kept() {
        let data = ProviderData::new(vec![VarType::double(), VarType::double()])
            .with_outputs(vec![constant(9.0)]);
        let sig = FunctionRegistry::with_builtins()
            .resolve("times", &data)
            .expect("times");
        assert_eq!(sig.outputs, vec![constant(9.0)]);
    }

    #[test]
    fn test_size_with_runtime_dimension() {
        let sig = resolve("size", vec![VarType::double(), VarType::double()]).expect("size");
        assert_eq!(sig.outputs, vec![VarType::double()]);
    }

    #[test]
    fn test_rejected_arguments() {
        assert!(resolve("numel", vec![]).is_err());
        assert!(resolve(
            "size",
            vec![VarType::double(), VarType::double(), VarType::double()]
        )
        .is_err());
        assert!(resolve("dot", vec![VarType::String, VarType::double()]).is_err());
    }
}
