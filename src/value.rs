//! Constant value model (spec §4.2): the tagged-union `DataValueComponent`,
//! the `DataValue` array it builds into, and the `valop` primitive table the
//! folder (`fold.rs`) and native functions (`native/`) share.
//!
//! Every operation here is total: an `Undefined` operand infects the result
//! rather than panicking, matching the original's "undefined propagates"
//! rule (`original_source/.../renderingShaderNativeFunctions_Math.cpp`).

use crate::program::ProgramInstance;
use crate::types::{BaseType, DataType};
use crate::arena::Id;
use smallvec::SmallVec;
use smol_str::SmolStr;

/// A single scalar slot of a `DataValue`. Distinct integer widths exist
/// because native functions operating on packed/typed buffers need to fold
/// 64-bit loads without losing precision, even though the shading language
/// surface itself only exposes 32-bit int/uint/float.
#[derive(Clone, Debug, PartialEq)]
pub enum DataValueComponent {
    Undefined,
    Bool(bool),
    Int32(i32),
    Uint32(u32),
    Float32(f32),
    Int64(i64),
    Uint64(u64),
    Float64(f64),
    Name(SmolStr),
    ProgramInstance(Id<ProgramInstance>),
}

impl DataValueComponent {
    pub fn is_defined(&self) -> bool {
        !matches!(self, DataValueComponent::Undefined)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataValueComponent::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValueComponent::Int32(v) => Some(*v as f64),
            DataValueComponent::Uint32(v) => Some(*v as f64),
            DataValueComponent::Float32(v) => Some(*v as f64),
            DataValueComponent::Int64(v) => Some(*v as f64),
            DataValueComponent::Uint64(v) => Some(*v as f64),
            DataValueComponent::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// The literal `0`/`1` of `base`, for the `Zero`/`One` swizzle mask bits
    /// (spec §8 property 4).
    pub fn literal(base: BaseType, one: bool) -> DataValueComponent {
        match base {
            BaseType::Bool => DataValueComponent::Bool(one),
            BaseType::Int => DataValueComponent::Int32(one as i32),
            BaseType::Uint => DataValueComponent::Uint32(one as u32),
            BaseType::Float | BaseType::Void => DataValueComponent::Float32(one as u8 as f32),
        }
    }
}

/// A (possibly partially-defined) constant of some `DataType`: one
/// component per scalar slot the type occupies (1 for scalars, `cols` for
/// vectors, `cols * rows` for matrices).
#[derive(Clone, Debug, PartialEq)]
pub struct DataValue {
    pub components: SmallVec<[DataValueComponent; 4]>,
}

impl DataValue {
    pub fn scalar(c: DataValueComponent) -> Self {
        DataValue::of([c])
    }

    pub fn of(components: impl IntoIterator<Item = DataValueComponent>) -> Self {
        DataValue { components: components.into_iter().collect() }
    }

    pub fn undefined(width: usize) -> Self {
        DataValue { components: std::iter::repeat(DataValueComponent::Undefined).take(width).collect() }
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// §4.2 "isWholeValueDefined": every component must be defined, not just
    /// some of them — the folder treats a partially-initialized composite
    /// as not foldable as a whole (spec §9 open question on that warning).
    pub fn is_whole_value_defined(&self) -> bool {
        !self.components.is_empty() && self.components.iter().all(DataValueComponent::is_defined)
    }

    pub fn get(&self, index: usize) -> &DataValueComponent {
        self.components.get(index).unwrap_or(&DataValueComponent::Undefined)
    }
}

/// A value paired with the type it was produced as, used on the
/// interpreter's (`fold.rs::ExecutionStack`) working stack — `DataValue`
/// alone is ambiguous about reinterpretation (e.g. `0u` vs `0i`).
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionValue {
    pub ty: DataType,
    pub value: DataValue,
}

impl ExecutionValue {
    pub fn new(ty: DataType, value: DataValue) -> Self {
        ExecutionValue { ty, value }
    }
}

/// Scalar arithmetic/compare/logical primitives on `DataValueComponent`,
/// with `Undefined` propagating through every operation (spec §4.2).
///
/// Grounded on the per-type switch tables in
/// `original_source/.../renderingShaderNativeFunctions_Math.cpp` and
/// `..._Compare.cpp`, collapsed into one macro-generated dispatch per
/// operation instead of one native-function struct per type combination.
pub mod valop {
    use super::DataValueComponent as C;

    macro_rules! numeric_binop {
        ($name:ident, $intop:expr, $uintop:expr, $floatop:expr) => {
            pub fn $name(a: &C, b: &C) -> C {
                match (a, b) {
                    (C::Undefined, _) | (_, C::Undefined) => C::Undefined,
                    (C::Int32(x), C::Int32(y)) => C::Int32(($intop)(*x, *y)),
                    (C::Uint32(x), C::Uint32(y)) => C::Uint32(($uintop)(*x, *y)),
                    (C::Float32(x), C::Float32(y)) => C::Float32(($floatop)(*x, *y)),
                    (C::Int64(x), C::Int64(y)) => C::Int64(($intop)(*x as i32, *y as i32) as i64),
                    (C::Uint64(x), C::Uint64(y)) => C::Uint64(($uintop)(*x as u32, *y as u32) as u64),
                    (C::Float64(x), C::Float64(y)) => C::Float64(($floatop)(*x as f32, *y as f32) as f64),
                    _ => C::Undefined,
                }
            }
        };
    }

    numeric_binop!(add, |x: i32, y: i32| x.wrapping_add(y), |x: u32, y: u32| x.wrapping_add(y), |x: f32, y: f32| x + y);
    numeric_binop!(sub, |x: i32, y: i32| x.wrapping_sub(y), |x: u32, y: u32| x.wrapping_sub(y), |x: f32, y: f32| x - y);
    numeric_binop!(mul, |x: i32, y: i32| x.wrapping_mul(y), |x: u32, y: u32| x.wrapping_mul(y), |x: f32, y: f32| x * y);

    pub fn div(a: &C, b: &C) -> C {
        match (a, b) {
            (C::Undefined, _) | (_, C::Undefined) => C::Undefined,
            (C::Int32(_), C::Int32(0)) | (C::Uint32(_), C::Uint32(0)) => C::Undefined,
            (C::Int32(x), C::Int32(y)) => C::Int32(x.wrapping_div(*y)),
            (C::Uint32(x), C::Uint32(y)) => C::Uint32(x / y),
            (C::Float32(x), C::Float32(y)) => C::Float32(x / y),
            (C::Float64(x), C::Float64(y)) => C::Float64(x / y),
            _ => C::Undefined,
        }
    }

    pub fn rem(a: &C, b: &C) -> C {
        match (a, b) {
            (C::Undefined, _) | (_, C::Undefined) => C::Undefined,
            (C::Int32(_), C::Int32(0)) | (C::Uint32(_), C::Uint32(0)) => C::Undefined,
            (C::Int32(x), C::Int32(y)) => C::Int32(x.wrapping_rem(*y)),
            (C::Uint32(x), C::Uint32(y)) => C::Uint32(x % y),
            (C::Float32(x), C::Float32(y)) => C::Float32(x % y),
            _ => C::Undefined,
        }
    }

    pub fn neg(a: &C) -> C {
        match a {
            C::Undefined => C::Undefined,
            C::Int32(x) => C::Int32(x.wrapping_neg()),
            C::Float32(x) => C::Float32(-x),
            C::Float64(x) => C::Float64(-x),
            _ => C::Undefined,
        }
    }

    macro_rules! bitwise_binop {
        ($name:ident, $op:tt) => {
            pub fn $name(a: &C, b: &C) -> C {
                match (a, b) {
                    (C::Undefined, _) | (_, C::Undefined) => C::Undefined,
                    (C::Int32(x), C::Int32(y)) => C::Int32(*x $op *y),
                    (C::Uint32(x), C::Uint32(y)) => C::Uint32(*x $op *y),
                    (C::Bool(x), C::Bool(y)) => C::Bool(*x $op *y),
                    _ => C::Undefined,
                }
            }
        };
    }

    bitwise_binop!(bit_and, &);
    bitwise_binop!(bit_or, |);
    bitwise_binop!(bit_xor, ^);

    pub fn bit_not(a: &C) -> C {
        match a {
            C::Undefined => C::Undefined,
            C::Int32(x) => C::Int32(!x),
            C::Uint32(x) => C::Uint32(!x),
            C::Bool(x) => C::Bool(!x),
            _ => C::Undefined,
        }
    }

    pub fn shl(a: &C, b: &C) -> C {
        match (a, b) {
            (C::Undefined, _) | (_, C::Undefined) => C::Undefined,
            (C::Int32(x), C::Int32(y)) => C::Int32(x.wrapping_shl(*y as u32)),
            (C::Uint32(x), C::Int32(y)) => C::Uint32(x.wrapping_shl(*y as u32)),
            (C::Uint32(x), C::Uint32(y)) => C::Uint32(x.wrapping_shl(*y)),
            _ => C::Undefined,
        }
    }

    pub fn shr(a: &C, b: &C) -> C {
        match (a, b) {
            (C::Undefined, _) | (_, C::Undefined) => C::Undefined,
            (C::Int32(x), C::Int32(y)) => C::Int32(x.wrapping_shr(*y as u32)),
            (C::Uint32(x), C::Int32(y)) => C::Uint32(x.wrapping_shr(*y as u32)),
            (C::Uint32(x), C::Uint32(y)) => C::Uint32(x.wrapping_shr(*y)),
            _ => C::Undefined,
        }
    }

    fn partial_cmp(a: &C, b: &C) -> Option<std::cmp::Ordering> {
        match (a, b) {
            (C::Int32(x), C::Int32(y)) => x.partial_cmp(y),
            (C::Uint32(x), C::Uint32(y)) => x.partial_cmp(y),
            (C::Float32(x), C::Float32(y)) => x.partial_cmp(y),
            (C::Float64(x), C::Float64(y)) => x.partial_cmp(y),
            (C::Int64(x), C::Int64(y)) => x.partial_cmp(y),
            (C::Uint64(x), C::Uint64(y)) => x.partial_cmp(y),
            _ => None,
        }
    }

    pub fn eq(a: &C, b: &C) -> C {
        if !a.is_defined() || !b.is_defined() {
            return C::Undefined;
        }
        match (a, b) {
            (C::Bool(x), C::Bool(y)) => C::Bool(x == y),
            (C::Name(x), C::Name(y)) => C::Bool(x == y),
            _ => match partial_cmp(a, b) {
                Some(o) => C::Bool(o == std::cmp::Ordering::Equal),
                None => C::Undefined,
            },
        }
    }

    pub fn ne(a: &C, b: &C) -> C {
        match eq(a, b) {
            C::Bool(x) => C::Bool(!x),
            other => other,
        }
    }

    macro_rules! ordering_cmp {
        ($name:ident, $ord:expr) => {
            pub fn $name(a: &C, b: &C) -> C {
                match partial_cmp(a, b) {
                    Some(o) => C::Bool(($ord)(o)),
                    None => C::Undefined,
                }
            }
        };
    }

    ordering_cmp!(lt, |o: std::cmp::Ordering| o == std::cmp::Ordering::Less);
    ordering_cmp!(le, |o: std::cmp::Ordering| o != std::cmp::Ordering::Greater);
    ordering_cmp!(gt, |o: std::cmp::Ordering| o == std::cmp::Ordering::Greater);
    ordering_cmp!(ge, |o: std::cmp::Ordering| o != std::cmp::Ordering::Less);

    pub fn logic_and(a: &C, b: &C) -> C {
        match (a.as_bool(), b.as_bool()) {
            (Some(false), _) | (_, Some(false)) => C::Bool(false),
            (Some(true), Some(true)) => C::Bool(true),
            _ => C::Undefined,
        }
    }

    pub fn logic_or(a: &C, b: &C) -> C {
        match (a.as_bool(), b.as_bool()) {
            (Some(true), _) | (_, Some(true)) => C::Bool(true),
            (Some(false), Some(false)) => C::Bool(false),
            _ => C::Undefined,
        }
    }

    pub fn logic_not(a: &C) -> C {
        match a.as_bool() {
            Some(b) => C::Bool(!b),
            None => C::Undefined,
        }
    }

    pub fn select(cond: &C, a: &C, b: &C) -> C {
        match cond.as_bool() {
            Some(true) => a.clone(),
            Some(false) => b.clone(),
            None => C::Undefined,
        }
    }

    pub fn min(a: &C, b: &C) -> C {
        match partial_cmp(a, b) {
            Some(std::cmp::Ordering::Greater) => b.clone(),
            Some(_) => a.clone(),
            None => C::Undefined,
        }
    }

    pub fn max(a: &C, b: &C) -> C {
        match partial_cmp(a, b) {
            Some(std::cmp::Ordering::Less) => b.clone(),
            Some(_) => a.clone(),
            None => C::Undefined,
        }
    }

    macro_rules! float_unop {
        ($name:ident, $f:expr) => {
            pub fn $name(a: &C) -> C {
                match a {
                    C::Undefined => C::Undefined,
                    C::Float32(x) => C::Float32(($f)(*x as f64) as f32),
                    C::Float64(x) => C::Float64(($f)(*x)),
                    _ => C::Undefined,
                }
            }
        };
    }

    float_unop!(abs_f, f64::abs);
    float_unop!(floor, f64::floor);
    float_unop!(ceil, f64::ceil);
    float_unop!(round, f64::round);
    float_unop!(sqrt, f64::sqrt);
    float_unop!(sin, f64::sin);
    float_unop!(cos, f64::cos);
    float_unop!(tan, f64::tan);
    float_unop!(exp, f64::exp);
    float_unop!(log, f64::ln);
    float_unop!(asin, f64::asin);
    float_unop!(acos, f64::acos);
    float_unop!(atan, f64::atan);
    float_unop!(sinh, f64::sinh);
    float_unop!(cosh, f64::cosh);
    float_unop!(tanh, f64::tanh);
    float_unop!(asinh, f64::asinh);
    float_unop!(acosh, f64::acosh);
    float_unop!(atanh, f64::atanh);
    float_unop!(log2, f64::log2);
    float_unop!(exp2, f64::exp2);
    fn round_ties_even(x: f64) -> f64 {
        let floor = x.floor();
        let diff = x - floor;
        if diff < 0.5 {
            floor
        } else if diff > 0.5 {
            floor + 1.0
        } else if (floor as i64) % 2 == 0 {
            floor
        } else {
            floor + 1.0
        }
    }

    float_unop!(round_even, round_ties_even);
    float_unop!(trunc, f64::trunc);
    float_unop!(rsqrt, |x: f64| 1.0 / x.sqrt());
    float_unop!(frac, |x: f64| x - x.floor());

    pub fn abs(a: &C) -> C {
        match a {
            C::Undefined => C::Undefined,
            C::Int32(x) => C::Int32(x.wrapping_abs()),
            other => abs_f(other),
        }
    }

    pub fn sign(a: &C) -> C {
        fn signum(x: f64) -> f64 {
            if x > 0.0 {
                1.0
            } else if x < 0.0 {
                -1.0
            } else {
                0.0
            }
        }
        match a {
            C::Undefined => C::Undefined,
            C::Int32(x) => C::Int32(x.signum()),
            C::Float32(x) => C::Float32(signum(*x as f64) as f32),
            C::Float64(x) => C::Float64(signum(*x)),
            _ => C::Undefined,
        }
    }

    pub fn pow(a: &C, b: &C) -> C {
        match (a, b) {
            (C::Float32(x), C::Float32(y)) => C::Float32(x.powf(*y)),
            (C::Float64(x), C::Float64(y)) => C::Float64(x.powf(*y)),
            _ => C::Undefined,
        }
    }

    pub fn atan2(a: &C, b: &C) -> C {
        match (a.as_f64(), b.as_f64()) {
            (Some(y), Some(x)) => C::Float32(y.atan2(x) as f32),
            _ => C::Undefined,
        }
    }

    /// GLSL `mod`: `x - y * floor(x / y)`, distinct from the truncating
    /// `rem` the `%` operator folds to.
    pub fn glsl_mod(a: &C, b: &C) -> C {
        match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => C::Float32((x - y * (x / y).floor()) as f32),
            _ => C::Undefined,
        }
    }

    pub fn step(edge: &C, x: &C) -> C {
        match (edge.as_f64(), x.as_f64()) {
            (Some(e), Some(v)) => C::Float32(if v < e { 0.0 } else { 1.0 }),
            _ => C::Undefined,
        }
    }

    pub fn saturate(a: &C) -> C {
        match a.as_f64() {
            Some(v) => C::Float32(v.clamp(0.0, 1.0) as f32),
            None => C::Undefined,
        }
    }

    pub fn smoothstep(edge0: &C, edge1: &C, x: &C) -> C {
        match (edge0.as_f64(), edge1.as_f64(), x.as_f64()) {
            (Some(e0), Some(e1), Some(v)) => {
                let t = ((v - e0) / (e1 - e0)).clamp(0.0, 1.0);
                C::Float32((t * t * (3.0 - 2.0 * t)) as f32)
            }
            _ => C::Undefined,
        }
    }

    /// `MatchType`'s `toBool`/`toInt`/`toUint`/`toFloat` realized as value
    /// conversions, used when the folder inserts an implicit cast around a
    /// constant operand instead of a runtime `Cast` node.
    pub fn cast(a: &C, to: super::BaseType) -> C {
        use super::BaseType::*;
        let as_f64 = match a {
            C::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => a.as_f64(),
        };
        match (to, as_f64) {
            (Bool, Some(v)) => C::Bool(v != 0.0),
            (Int, Some(v)) => C::Int32(v as i32),
            (Uint, Some(v)) => C::Uint32(v as u32),
            (Float, Some(v)) => C::Float32(v as f32),
            (Void, _) => C::Undefined,
            _ => C::Undefined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::valop::*;

    #[test]
    fn undefined_propagates_through_arithmetic() {
        let u = DataValueComponent::Undefined;
        let one = DataValueComponent::Int32(1);
        assert_eq!(add(&u, &one), DataValueComponent::Undefined);
        assert_eq!(mul(&one, &u), DataValueComponent::Undefined);
    }

    #[test]
    fn whole_value_defined_requires_every_component() {
        let partial = DataValue::of([DataValueComponent::Int32(1), DataValueComponent::Undefined]);
        assert!(!partial.is_whole_value_defined());
        let whole = DataValue::of([DataValueComponent::Int32(1), DataValueComponent::Int32(2)]);
        assert!(whole.is_whole_value_defined());
    }

    #[test]
    fn division_by_zero_is_undefined_not_a_panic() {
        let zero = DataValueComponent::Int32(0);
        let one = DataValueComponent::Int32(1);
        assert_eq!(div(&one, &zero), DataValueComponent::Undefined);
    }

    #[test]
    fn logic_and_short_circuits_on_false() {
        let f = DataValueComponent::Bool(false);
        assert_eq!(logic_and(&f, &DataValueComponent::Undefined), DataValueComponent::Bool(false));
    }

    #[test]
    fn cast_to_int_truncates() {
        let f = DataValueComponent::Float32(3.9);
        assert_eq!(cast(&f, BaseType::Int), DataValueComponent::Int32(3));
    }
}
