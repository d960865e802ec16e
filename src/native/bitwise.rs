//! Integer bitwise operators (`& | ^ ~ << >>`).

use super::{register_one, NativeFunctionRegistry};
use crate::types::{DataType, TypeLibrary};
use crate::value::{valop, DataValue};

fn bitwise_shape(_lib: &mut TypeLibrary, arg_types: &[DataType], name: &str) -> Result<DataType, String> {
    if arg_types.len() != 2 {
        return Err(format!("'{name}' takes 2 arguments"));
    }
    Ok(arg_types[0])
}

macro_rules! bitop_fn {
    ($struct_name:ident, $name:literal, $op:path) => {
        pub struct $struct_name;
        impl super::NativeFunction for $struct_name {
            fn name(&self) -> &'static str {
                $name
            }
            fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
                bitwise_shape(lib, arg_types, $name)
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

bitop_fn!(BitAnd, "__opBitAnd", valop::bit_and);
bitop_fn!(BitOr, "__opBitOr", valop::bit_or);
bitop_fn!(BitXor, "__opBitXor", valop::bit_xor);
bitop_fn!(Shl, "__opShl", valop::shl);
bitop_fn!(Shr, "__opShr", valop::shr);

pub struct BitNot;
impl super::NativeFunction for BitNot {
    fn name(&self) -> &'static str {
        "__opBitNot"
    }
    fn determine_return_type(&self, _lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 1 {
            return Err("'~' takes 1 argument".into());
        }
        Ok(arg_types[0])
    }
    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        Some(DataValue::of(args.first()?.components.iter().map(valop::bit_not)))
    }
}

pub fn register(reg: &mut NativeFunctionRegistry) {
    register_one(reg, BitAnd);
    register_one(reg, BitOr);
    register_one(reg, BitXor);
    register_one(reg, Shl);
    register_one(reg, Shr);
    register_one(reg, BitNot);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeFunction;
    use crate::value::DataValueComponent;

    #[test]
    fn bit_and_folds() {
        let a = DataValue::scalar(DataValueComponent::Uint32(0b1100));
        let b = DataValue::scalar(DataValueComponent::Uint32(0b1010));
        let r = BitAnd.evaluate(&[a, b]).unwrap();
        assert_eq!(r.components[0], DataValueComponent::Uint32(0b1000));
    }
}
