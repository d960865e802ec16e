//! Elementwise and vector math builtins
//! (`original_source/.../renderingShaderNativeFunctions_Math.cpp`).

use super::{register_one, NativeFunctionRegistry};
use crate::types::{self, BaseType, DataType, TypeLibrary};
use crate::value::{valop, DataValue, DataValueComponent};

macro_rules! unary_float_fn {
    ($struct_name:ident, $name:literal, $op:path) => {
        pub struct $struct_name;
        impl super::NativeFunction for $struct_name {
            fn name(&self) -> &'static str {
                $name
            }
            fn determine_return_type(&self, _lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
                if arg_types.len() != 1 {
                    return Err(format!("'{}' takes 1 argument", $name));
                }
                Ok(arg_types[0])
            }
            fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
                Some(DataValue::of(args.first()?.components.iter().map($op)))
            }
        }
    };
}

unary_float_fn!(Abs, "abs", valop::abs);
unary_float_fn!(Floor, "floor", valop::floor);
unary_float_fn!(Ceil, "ceil", valop::ceil);
unary_float_fn!(Round, "round", valop::round);
unary_float_fn!(Sqrt, "sqrt", valop::sqrt);
unary_float_fn!(Sin, "sin", valop::sin);
unary_float_fn!(Cos, "cos", valop::cos);
unary_float_fn!(Tan, "tan", valop::tan);
unary_float_fn!(Exp, "exp", valop::exp);
unary_float_fn!(Log, "log", valop::log);
unary_float_fn!(Asin, "asin", valop::asin);
unary_float_fn!(Acos, "acos", valop::acos);
unary_float_fn!(Atan, "atan", valop::atan);
unary_float_fn!(Sinh, "sinh", valop::sinh);
unary_float_fn!(Cosh, "cosh", valop::cosh);
unary_float_fn!(Tanh, "tanh", valop::tanh);
unary_float_fn!(Asinh, "asinh", valop::asinh);
unary_float_fn!(Acosh, "acosh", valop::acosh);
unary_float_fn!(Atanh, "atanh", valop::atanh);
unary_float_fn!(RoundEven, "roundEven", valop::round_even);
unary_float_fn!(Frac, "frac", valop::frac);
unary_float_fn!(Trunc, "trunc", valop::trunc);
unary_float_fn!(Sign, "sign", valop::sign);
unary_float_fn!(Saturate, "saturate", valop::saturate);
unary_float_fn!(Log2, "log2", valop::log2);
unary_float_fn!(Exp2, "exp2", valop::exp2);
unary_float_fn!(Rsqrt, "rsqrt", valop::rsqrt);

macro_rules! binary_same_shape_fn {
    ($struct_name:ident, $name:literal, $op:path) => {
        pub struct $struct_name;
        impl super::NativeFunction for $struct_name {
            fn name(&self) -> &'static str {
                $name
            }
            fn determine_return_type(&self, _lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
                if arg_types.len() != 2 {
                    return Err(format!("'{}' takes 2 arguments", $name));
                }
                Ok(arg_types[0])
            }
            fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
                if args.len() != 2 {
                    return None;
                }
                let (a, b) = (&args[0], &args[1]);
                let n = a.len().max(b.len());
                Some(DataValue::of((0..n).map(|i| $op(a.get(i.min(a.len() - 1)), b.get(i.min(b.len() - 1))))))
            }
        }
    };
}

binary_same_shape_fn!(Min, "min", valop::min);
binary_same_shape_fn!(Max, "max", valop::max);
binary_same_shape_fn!(Pow, "pow", valop::pow);
binary_same_shape_fn!(Atan2, "atan2", valop::atan2);
binary_same_shape_fn!(Step, "step", valop::step);
binary_same_shape_fn!(Mod, "mod", valop::glsl_mod);

pub struct Clamp;
impl super::NativeFunction for Clamp {
    fn name(&self) -> &'static str {
        "clamp"
    }
    fn determine_return_type(&self, _lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 3 {
            return Err("'clamp' takes 3 arguments".into());
        }
        Ok(arg_types[0])
    }
    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        if args.len() != 3 {
            return None;
        }
        let (x, lo, hi) = (&args[0], &args[1], &args[2]);
        Some(DataValue::of((0..x.len()).map(|i| {
            let l = if lo.len() == 1 { lo.get(0) } else { lo.get(i) };
            let h = if hi.len() == 1 { hi.get(0) } else { hi.get(i) };
            valop::min(&valop::max(x.get(i), l), h)
        })))
    }
}

pub struct Lerp;
impl super::NativeFunction for Lerp {
    fn name(&self) -> &'static str {
        "lerp"
    }
    fn determine_return_type(&self, _lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 3 {
            return Err("'lerp' takes 3 arguments".into());
        }
        Ok(arg_types[0])
    }
    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        if args.len() != 3 {
            return None;
        }
        let (a, b, t) = (&args[0], &args[1], &args[2]);
        Some(DataValue::of((0..a.len()).map(|i| {
            let tt = if t.len() == 1 { t.get(0) } else { t.get(i) };
            let diff = valop::sub(b.get(i), a.get(i));
            valop::add(a.get(i), &valop::mul(&diff, tt))
        })))
    }
}

pub struct Smoothstep;
impl super::NativeFunction for Smoothstep {
    fn name(&self) -> &'static str {
        "smoothstep"
    }
    fn determine_return_type(&self, _lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 3 {
            return Err("'smoothstep' takes 3 arguments".into());
        }
        Ok(arg_types[2])
    }
    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        if args.len() != 3 {
            return None;
        }
        let (edge0, edge1, x) = (&args[0], &args[1], &args[2]);
        Some(DataValue::of((0..x.len()).map(|i| {
            let e0 = if edge0.len() == 1 { edge0.get(0) } else { edge0.get(i) };
            let e1 = if edge1.len() == 1 { edge1.get(0) } else { edge1.get(i) };
            valop::smoothstep(e0, e1, x.get(i))
        })))
    }
}

pub struct Dot;
impl super::NativeFunction for Dot {
    fn name(&self) -> &'static str {
        "dot"
    }
    fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 2 {
            return Err("'dot' takes 2 arguments".into());
        }
        let base = types::extract_base_type(lib, arg_types[0]).unwrap_or(BaseType::Float);
        Ok(lib.simple_composite_type(base, 1, 1))
    }
    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        if args.len() != 2 {
            return None;
        }
        let (a, b) = (&args[0], &args[1]);
        let mut acc = DataValueComponent::Float32(0.0);
        for i in 0..a.len().min(b.len()) {
            acc = valop::add(&acc, &valop::mul(a.get(i), b.get(i)));
        }
        Some(DataValue::scalar(acc))
    }
}

pub struct Length;
impl super::NativeFunction for Length {
    fn name(&self) -> &'static str {
        "length"
    }
    fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 1 {
            return Err("'length' takes 1 argument".into());
        }
        Ok(lib.float_type(1))
    }
    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        let v = args.first()?;
        let sum: f64 = v.components.iter().filter_map(|c| c.as_f64()).map(|f| f * f).sum();
        Some(DataValue::scalar(DataValueComponent::Float32(sum.sqrt() as f32)))
    }
}

pub struct Normalize;
impl super::NativeFunction for Normalize {
    fn name(&self) -> &'static str {
        "normalize"
    }
    fn determine_return_type(&self, _lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 1 {
            return Err("'normalize' takes 1 argument".into());
        }
        Ok(arg_types[0])
    }
    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        let v = args.first()?;
        let sum: f64 = v.components.iter().filter_map(|c| c.as_f64()).map(|f| f * f).sum();
        if sum == 0.0 {
            return None;
        }
        let inv_len = 1.0 / sum.sqrt();
        Some(DataValue::of(v.components.iter().map(|c| match c.as_f64() {
            Some(f) => DataValueComponent::Float32((f * inv_len) as f32),
            None => DataValueComponent::Undefined,
        })))
    }
}

pub struct Cross;
impl super::NativeFunction for Cross {
    fn name(&self) -> &'static str {
        "cross"
    }
    fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 2 || types::extract_component_count(lib, arg_types[0]) != 3 {
            return Err("'cross' takes two 3-component vectors".into());
        }
        Ok(arg_types[0])
    }
    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        if args.len() != 2 || args[0].len() != 3 || args[1].len() != 3 {
            return None;
        }
        let (a, b) = (&args[0], &args[1]);
        let cx = valop::sub(&valop::mul(a.get(1), b.get(2)), &valop::mul(a.get(2), b.get(1)));
        let cy = valop::sub(&valop::mul(a.get(2), b.get(0)), &valop::mul(a.get(0), b.get(2)));
        let cz = valop::sub(&valop::mul(a.get(0), b.get(1)), &valop::mul(a.get(1), b.get(0)));
        Some(DataValue::of([cx, cy, cz]))
    }
}

pub fn register(reg: &mut NativeFunctionRegistry) {
    register_one(reg, Abs);
    register_one(reg, Floor);
    register_one(reg, Ceil);
    register_one(reg, Round);
    register_one(reg, Sqrt);
    register_one(reg, Sin);
    register_one(reg, Cos);
    register_one(reg, Tan);
    register_one(reg, Exp);
    register_one(reg, Log);
    register_one(reg, Min);
    register_one(reg, Max);
    register_one(reg, Pow);
    register_one(reg, Clamp);
    register_one(reg, Lerp);
    register_one(reg, Dot);
    register_one(reg, Length);
    register_one(reg, Normalize);
    register_one(reg, Cross);
    register_one(reg, Asin);
    register_one(reg, Acos);
    register_one(reg, Atan);
    register_one(reg, Atan2);
    register_one(reg, Sinh);
    register_one(reg, Cosh);
    register_one(reg, Tanh);
    register_one(reg, Asinh);
    register_one(reg, Acosh);
    register_one(reg, Atanh);
    register_one(reg, RoundEven);
    register_one(reg, Frac);
    register_one(reg, Trunc);
    register_one(reg, Sign);
    register_one(reg, Step);
    register_one(reg, Smoothstep);
    register_one(reg, Saturate);
    register_one(reg, Mod);
    register_one(reg, Log2);
    register_one(reg, Exp2);
    register_one(reg, Rsqrt);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeFunction;

    #[test]
    fn dot_of_orthogonal_vectors_is_zero() {
        let a = DataValue::of([DataValueComponent::Float32(1.0), DataValueComponent::Float32(0.0)]);
        let b = DataValue::of([DataValueComponent::Float32(0.0), DataValueComponent::Float32(1.0)]);
        let r = Dot.evaluate(&[a, b]).unwrap();
        assert_eq!(r.components[0], DataValueComponent::Float32(0.0));
    }

    #[test]
    fn clamp_bounds_the_value() {
        let x = DataValue::scalar(DataValueComponent::Float32(5.0));
        let lo = DataValue::scalar(DataValueComponent::Float32(0.0));
        let hi = DataValue::scalar(DataValueComponent::Float32(1.0));
        let r = Clamp.evaluate(&[x, lo, hi]).unwrap();
        assert_eq!(r.components[0], DataValueComponent::Float32(1.0));
    }

    #[test]
    fn sign_of_negative_zero_and_positive() {
        let r = Sign.evaluate(&[DataValue::of([DataValueComponent::Float32(-3.0), DataValueComponent::Float32(0.0), DataValueComponent::Float32(2.0)])]).unwrap();
        assert_eq!(r.components[0], DataValueComponent::Float32(-1.0));
        assert_eq!(r.components[1], DataValueComponent::Float32(0.0));
        assert_eq!(r.components[2], DataValueComponent::Float32(1.0));
    }

    #[test]
    fn saturate_clamps_to_unit_range() {
        let r = Saturate.evaluate(&[DataValue::scalar(DataValueComponent::Float32(5.0))]).unwrap();
        assert_eq!(r.components[0], DataValueComponent::Float32(1.0));
        let r = Saturate.evaluate(&[DataValue::scalar(DataValueComponent::Float32(-5.0))]).unwrap();
        assert_eq!(r.components[0], DataValueComponent::Float32(0.0));
    }

    #[test]
    fn smoothstep_at_midpoint_is_one_half() {
        let edge0 = DataValue::scalar(DataValueComponent::Float32(0.0));
        let edge1 = DataValue::scalar(DataValueComponent::Float32(1.0));
        let x = DataValue::scalar(DataValueComponent::Float32(0.5));
        let r = Smoothstep.evaluate(&[edge0, edge1, x]).unwrap();
        assert_eq!(r.components[0], DataValueComponent::Float32(0.5));
    }

    #[test]
    fn mod_wraps_like_glsl_not_truncating_rem() {
        let x = DataValue::scalar(DataValueComponent::Float32(-1.5));
        let y = DataValue::scalar(DataValueComponent::Float32(1.0));
        let r = Mod.evaluate(&[x, y]).unwrap();
        assert_eq!(r.components[0], DataValueComponent::Float32(0.5));
    }
}
