//! Comparison operators. Always return a `bool`-base vector of the same
//! component count as the (broadcast-compatible) operands.

use super::{register_one, NativeFunctionRegistry};
use crate::types::{self, DataType, TypeLibrary};
use crate::value::{valop, DataValue};

fn compare_shape(lib: &mut TypeLibrary, arg_types: &[DataType], name: &str) -> Result<DataType, String> {
    if arg_types.len() != 2 {
        return Err(format!("'{name}' takes 2 arguments"));
    }
    let cols_a = types::extract_component_count(lib, arg_types[0]);
    let cols_b = types::extract_component_count(lib, arg_types[1]);
    let cols = match (cols_a, cols_b) {
        (x, y) if x == y => x,
        (1, y) => y,
        (x, 1) => x,
        _ => return Err(format!("'{name}': operand component counts {cols_a} and {cols_b} disagree")),
    };
    Ok(lib.boolean_type(cols.max(1) as u8))
}

macro_rules! cmp_fn {
    ($struct_name:ident, $name:literal, $op:path) => {
        pub struct $struct_name;
        impl super::NativeFunction for $struct_name {
            fn name(&self) -> &'static str {
                $name
            }
            fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
                compare_shape(lib, arg_types, $name)
            }
            fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
                if args.len() != 2 {
                    return None;
                }
                let (a, b) = (&args[0], &args[1]);
                let n = a.len().max(b.len());
                Some(DataValue::of((0..n).map(|i| {
                    let x = if a.len() == 1 { a.get(0) } else { a.get(i) };
                    let y = if b.len() == 1 { b.get(0) } else { b.get(i) };
                    $op(x, y)
                })))
            }
        }
    };
}

cmp_fn!(Eq, "__opEq", valop::eq);
cmp_fn!(Ne, "__opNe", valop::ne);
cmp_fn!(Lt, "__opLt", valop::lt);
cmp_fn!(Le, "__opLe", valop::le);
cmp_fn!(Gt, "__opGt", valop::gt);
cmp_fn!(Ge, "__opGe", valop::ge);

pub fn register(reg: &mut NativeFunctionRegistry) {
    register_one(reg, Eq);
    register_one(reg, Ne);
    register_one(reg, Lt);
    register_one(reg, Le);
    register_one(reg, Gt);
    register_one(reg, Ge);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeFunction;
    use crate::value::DataValueComponent;

    #[test]
    fn lt_folds_componentwise() {
        let a = DataValue::of([DataValueComponent::Int32(1), DataValueComponent::Int32(5)]);
        let b = DataValue::of([DataValueComponent::Int32(2), DataValueComponent::Int32(2)]);
        let result = Lt.evaluate(&[a, b]).unwrap();
        assert_eq!(result.components[0], DataValueComponent::Bool(true));
        assert_eq!(result.components[1], DataValueComponent::Bool(false));
    }
}
