//! Component-wise arithmetic operators (`+ - * / % unary-`), modeled as
//! native functions the way
//! `original_source/.../renderingShaderNativeFunctions_Math.cpp` represents
//! `opAdd`/`opSub`/... rather than as special-cased opcodes.

use super::{register_one, NativeFunctionRegistry};
use crate::types::{self, BaseType, DataType, TypeLibrary};
use crate::value::{valop, DataValue, DataValueComponent};

fn numeric_binop_shape(lib: &mut TypeLibrary, arg_types: &[DataType], name: &str) -> Result<DataType, String> {
    if arg_types.len() != 2 {
        return Err(format!("'{name}' takes 2 arguments"));
    }
    let (a, b) = (arg_types[0], arg_types[1]);
    let base_a = types::extract_base_type(lib, a).ok_or_else(|| "non-numeric operand".to_string())?;
    let base_b = types::extract_base_type(lib, b).ok_or_else(|| "non-numeric operand".to_string())?;
    let base = if base_a == base_b {
        base_a
    } else if base_a == BaseType::Float || base_b == BaseType::Float {
        BaseType::Float
    } else {
        base_a
    };
    let cols_a = types::extract_component_count(lib, a);
    let cols_b = types::extract_component_count(lib, b);
    let cols = match (cols_a, cols_b) {
        (x, y) if x == y => x,
        (1, y) => y,
        (x, 1) => x,
        _ => return Err(format!("'{name}': operand component counts {cols_a} and {cols_b} disagree")),
    };
    Ok(lib.simple_composite_type(base, cols.max(1) as u8, 1))
}

fn zip_broadcast(a: &DataValue, b: &DataValue) -> Vec<(DataValueComponent, DataValueComponent)> {
    let n = a.len().max(b.len());
    (0..n)
        .map(|i| {
            let x = if a.len() == 1 { a.get(0) } else { a.get(i) };
            let y = if b.len() == 1 { b.get(0) } else { b.get(i) };
            (x.clone(), y.clone())
        })
        .collect()
}

macro_rules! binop_fn {
    ($struct_name:ident, $name:literal, $op:path) => {
        pub struct $struct_name;
        impl super::NativeFunction for $struct_name {
            fn name(&self) -> &'static str {
                $name
            }
            fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
                numeric_binop_shape(lib, arg_types, $name)
            }
            fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
                if args.len() != 2 {
                    return None;
                }
                let pairs = zip_broadcast(&args[0], &args[1]);
                Some(DataValue::of(pairs.into_iter().map(|(x, y)| $op(&x, &y))))
            }
        }
    };
}

binop_fn!(Add, "__opAdd", valop::add);
binop_fn!(Sub, "__opSub", valop::sub);
binop_fn!(Mul, "__opMul", valop::mul);
binop_fn!(Div, "__opDiv", valop::div);
binop_fn!(Rem, "__opMod", valop::rem);

pub struct Neg;
impl super::NativeFunction for Neg {
    fn name(&self) -> &'static str {
        "__opNeg"
    }
    fn determine_return_type(&self, _lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 1 {
            return Err("'__opNeg' takes 1 argument".into());
        }
        Ok(arg_types[0])
    }
    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        let a = args.first()?;
        Some(DataValue::of(a.components.iter().map(valop::neg)))
    }
}

pub fn register(reg: &mut NativeFunctionRegistry) {
    register_one(reg, Add);
    register_one(reg, Sub);
    register_one(reg, Mul);
    register_one(reg, Div);
    register_one(reg, Rem);
    register_one(reg, Neg);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeFunction;

    #[test]
    fn add_broadcasts_scalar_over_vector() {
        let a = DataValue::of([DataValueComponent::Float32(1.0), DataValueComponent::Float32(2.0)]);
        let b = DataValue::of([DataValueComponent::Float32(10.0)]);
        let result = Add.evaluate(&[a, b]).unwrap();
        assert_eq!(result.components[0], DataValueComponent::Float32(11.0));
        assert_eq!(result.components[1], DataValueComponent::Float32(12.0));
    }

    #[test]
    fn mismatched_component_counts_are_rejected() {
        let mut lib = TypeLibrary::new();
        let v2 = lib.float_type(2);
        let v3 = lib.float_type(3);
        assert!(Add.determine_return_type(&mut lib, &[v2, v3]).is_err());
    }
}
