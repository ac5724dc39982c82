//! Static types attached to SSA variables.
//!
//! Type inference assigns every variable a [`VarType`]: a scalar (optionally with a known
//! constant value), a matrix with a possibly partial [`Shape`], or a string. Passes only ever
//! read these types to decide whether a rewrite is provably safe; they never refine the type
//! of a variable they did not create.
//!
//! # Rendering
//!
//! | Type                         | Text          |
//! |------------------------------|---------------|
//! | double scalar                | `double`      |
//! | int32 scalar known to be 3   | `int32(3)`    |
//! | double row of unknown width  | `double[1x?]` |
//! | matrix of unknown rank       | `double[*]`   |
//! | string                       | `string`      |

use std::fmt;

use strum::{Display, EnumIter, EnumString};

/// Element kind of a scalar or matrix value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum ElementKind {
    /// IEEE double precision
    Double,
    /// IEEE single precision
    Single,
    /// 32-bit signed integer
    Int32,
    /// Boolean
    Logical,
    /// Character
    Char,
}

/// The shape of a matrix as far as it is statically known.
///
/// A known shape always has at least two dimensions and never carries trailing singleton
/// dimensions beyond the second, matching how matrix sizes behave at runtime. Each dimension
/// may individually be unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Option<Vec<Option<usize>>>,
}

impl Shape {
    /// Shape whose rank is unknown.
    #[must_use]
    pub fn unknown() -> Self {
        Self { dims: None }
    }

    /// Creates a shape from partially known dimensions.
    ///
    /// Fewer than two dimensions are padded with `1`; trailing known `1` dimensions past the
    /// second are dropped.
    #[must_use]
    pub fn new(mut dims: Vec<Option<usize>>) -> Self {
        while dims.len() < 2 {
            dims.push(Some(1));
        }
        while dims.len() > 2 && dims.last() == Some(&Some(1)) {
            dims.pop();
        }
        Self { dims: Some(dims) }
    }

    /// Creates a fully known shape.
    #[must_use]
    pub fn known(dims: &[usize]) -> Self {
        Self::new(dims.iter().map(|&d| Some(d)).collect())
    }

    /// Creates a 1xN row shape.
    #[must_use]
    pub fn row(columns: Option<usize>) -> Self {
        Self::new(vec![Some(1), columns])
    }

    /// Creates an Nx1 column shape.
    #[must_use]
    pub fn column(rows: Option<usize>) -> Self {
        Self::new(vec![rows, Some(1)])
    }

    /// Creates a matrix shape of the given rank with all dimensions unknown.
    #[must_use]
    pub fn with_rank(rank: usize) -> Self {
        Self::new(vec![None; rank.max(2)])
    }

    /// Returns the number of dimensions, if known.
    #[must_use]
    pub fn rank(&self) -> Option<usize> {
        self.dims.as_ref().map(Vec::len)
    }

    /// Returns the per-dimension sizes, if the rank is known.
    #[must_use]
    pub fn dims(&self) -> Option<&[Option<usize>]> {
        self.dims.as_deref()
    }

    /// Returns the size of dimension `index` (0-based).
    ///
    /// Dimensions at or past the known rank are singleton. Returns `None` when the rank or
    /// the dimension itself is unknown.
    #[must_use]
    pub fn dim(&self, index: usize) -> Option<usize> {
        let dims = self.dims.as_ref()?;
        match dims.get(index) {
            Some(dim) => *dim,
            None => Some(1),
        }
    }

    /// Returns `true` if the shape is statically known to be a 1xN row.
    #[must_use]
    pub fn is_known_row(&self) -> bool {
        self.rank() == Some(2) && self.dim(0) == Some(1)
    }

    /// Returns `true` if the shape is statically known to be an Nx1 column.
    #[must_use]
    pub fn is_known_column(&self) -> bool {
        self.rank() == Some(2) && self.dim(1) == Some(1)
    }

    /// Returns `true` if the shape is statically known to be a row or a column.
    #[must_use]
    pub fn is_known_1d(&self) -> bool {
        self.is_known_row() || self.is_known_column()
    }

    /// Returns `true` if the shape is statically known to be 1x1.
    #[must_use]
    pub fn is_known_scalar(&self) -> bool {
        self.is_known_row() && self.is_known_column()
    }

    /// Returns `true` if some dimension is statically known to be zero.
    #[must_use]
    pub fn is_known_empty(&self) -> bool {
        self.dims
            .as_ref()
            .is_some_and(|dims| dims.iter().any(|d| *d == Some(0)))
    }

    /// Returns `true` if the shape is statically known not to be a vector.
    ///
    /// That is the case for ranks above two and for 2-D shapes whose dimensions are both
    /// known to differ from one.
    #[must_use]
    pub fn is_known_not_1d(&self) -> bool {
        match self.rank() {
            Some(rank) if rank > 2 => true,
            Some(_) => matches!((self.dim(0), self.dim(1)), (Some(r), Some(c)) if r != 1 && c != 1),
            None => false,
        }
    }

    /// Returns `true` if the rank and every dimension are known.
    #[must_use]
    pub fn is_fully_defined(&self) -> bool {
        self.dims
            .as_ref()
            .is_some_and(|dims| dims.iter().all(Option::is_some))
    }

    /// Returns the total number of elements, if statically known.
    #[must_use]
    pub fn numel(&self) -> Option<usize> {
        let dims = self.dims.as_ref()?;
        dims.iter().try_fold(1usize, |acc, d| d.map(|d| acc * d))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dims {
            None => f.write_str("*"),
            Some(dims) => {
                for (i, dim) in dims.iter().enumerate() {
                    if i > 0 {
                        f.write_str("x")?;
                    }
                    match dim {
                        Some(d) => write!(f, "{d}")?,
                        None => f.write_str("?")?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// The static type of an SSA variable.
#[derive(Debug, Clone, PartialEq)]
pub enum VarType {
    /// A single value, with its constant value when type inference proved one.
    Scalar {
        /// Element kind
        element: ElementKind,
        /// Known constant value
        constant: Option<f64>,
    },
    /// A matrix with a possibly partial shape.
    Matrix {
        /// Element kind
        element: ElementKind,
        /// Statically known shape
        shape: Shape,
    },
    /// A character string literal.
    String,
}

impl VarType {
    /// Scalar of unknown value.
    #[must_use]
    pub fn scalar(element: ElementKind) -> Self {
        VarType::Scalar {
            element,
            constant: None,
        }
    }

    /// Scalar with a known constant value.
    #[must_use]
    pub fn constant(element: ElementKind, value: f64) -> Self {
        VarType::Scalar {
            element,
            constant: Some(value),
        }
    }

    /// Matrix of the given shape.
    #[must_use]
    pub fn matrix(element: ElementKind, shape: Shape) -> Self {
        VarType::Matrix { element, shape }
    }

    /// Double scalar of unknown value.
    #[must_use]
    pub fn double() -> Self {
        Self::scalar(ElementKind::Double)
    }

    /// Int32 scalar of unknown value.
    #[must_use]
    pub fn int32() -> Self {
        Self::scalar(ElementKind::Int32)
    }

    /// Logical scalar of unknown value.
    #[must_use]
    pub fn logical() -> Self {
        Self::scalar(ElementKind::Logical)
    }

    /// Returns `true` for scalar types.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(self, VarType::Scalar { .. })
    }

    /// Returns `true` for matrix types.
    #[must_use]
    pub fn is_matrix(&self) -> bool {
        matches!(self, VarType::Matrix { .. })
    }

    /// Returns the element kind of scalars and matrices.
    #[must_use]
    pub fn element(&self) -> Option<ElementKind> {
        match self {
            VarType::Scalar { element, .. } | VarType::Matrix { element, .. } => Some(*element),
            VarType::String => Some(ElementKind::Char),
        }
    }

    /// Returns the matrix shape, or `None` for non-matrix types.
    #[must_use]
    pub fn shape(&self) -> Option<&Shape> {
        match self {
            VarType::Matrix { shape, .. } => Some(shape),
            _ => None,
        }
    }

    /// Returns the known constant value of a scalar.
    #[must_use]
    pub fn constant_value(&self) -> Option<f64> {
        match self {
            VarType::Scalar { constant, .. } => *constant,
            _ => None,
        }
    }

    /// Returns the known constant value of a scalar if it is integral.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn integer_constant(&self) -> Option<i64> {
        let value = self.constant_value()?;
        if value.fract() == 0.0 && value.is_finite() {
            Some(value as i64)
        } else {
            None
        }
    }

    /// Returns `true` if this is a matrix statically known to have no elements.
    #[must_use]
    pub fn is_known_empty(&self) -> bool {
        self.shape().is_some_and(Shape::is_known_empty)
    }

    /// Returns the scalar type of a single element of this type.
    #[must_use]
    pub fn element_scalar(&self) -> Self {
        VarType::scalar(self.element().unwrap_or(ElementKind::Double))
    }

    /// Returns this type without its constant value.
    #[must_use]
    pub fn without_constant(&self) -> Self {
        match self {
            VarType::Scalar { element, .. } => VarType::scalar(*element),
            other => other.clone(),
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarType::Scalar {
                element,
                constant: None,
            } => write!(f, "{element}"),
            VarType::Scalar {
                element,
                constant: Some(value),
            } => write!(f, "{element}({})", format_number(*value)),
            VarType::Matrix { element, shape } => write!(f, "{element}[{shape}]"),
            VarType::String => f.write_str("string"),
        }
    }
}

/// Renders a numeric literal without a trailing `.0` for integral values.
#[must_use]
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_normalization() {
        assert_eq!(Shape::known(&[3]), Shape::known(&[3, 1]));
        assert_eq!(Shape::known(&[2, 3, 1, 1]).rank(), Some(2));
        assert_eq!(Shape::known(&[2, 3, 4]).rank(), Some(3));
        assert_eq!(Shape::unknown().rank(), None);
    }

    #[test]
    fn test_shape_queries() {
        let row = Shape::row(None);
        assert!(row.is_known_row());
        assert!(!row.is_known_column());
        assert!(row.is_known_1d());
        assert!(!row.is_fully_defined());
        assert_eq!(row.dim(5), Some(1));
        assert_eq!(row.numel(), None);

        let cube = Shape::known(&[2, 3, 4]);
        assert_eq!(cube.numel(), Some(24));
        assert!(cube.is_known_not_1d());
        assert!(!cube.is_known_1d());

        assert!(Shape::known(&[1, 1]).is_known_scalar());
        assert!(Shape::known(&[0, 3]).is_known_empty());
        assert_eq!(Shape::unknown().dim(0), None);
    }

    #[test]
    fn test_type_rendering() {
        assert_eq!(VarType::double().to_string(), "double");
        assert_eq!(VarType::constant(ElementKind::Int32, 3.0).to_string(), "int32(3)");
        assert_eq!(
            VarType::constant(ElementKind::Double, 0.5).to_string(),
            "double(0.5)"
        );
        assert_eq!(
            VarType::matrix(ElementKind::Double, Shape::row(None)).to_string(),
            "double[1x?]"
        );
        assert_eq!(
            VarType::matrix(ElementKind::Single, Shape::unknown()).to_string(),
            "single[*]"
        );
        assert_eq!(VarType::String.to_string(), "string");
    }

    #[test]
    fn test_integer_constant() {
        assert_eq!(VarType::constant(ElementKind::Double, 4.0).integer_constant(), Some(4));
        assert_eq!(VarType::constant(ElementKind::Double, 4.5).integer_constant(), None);
        assert_eq!(VarType::double().integer_constant(), None);
    }

    #[test]
    fn test_element_kind_parse() {
        assert_eq!("int32".parse::<ElementKind>().ok(), Some(ElementKind::Int32));
        assert_eq!(ElementKind::Logical.to_string(), "logical");
    }
}
