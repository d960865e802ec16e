//! Boolean vector reductions (`all`/`any`) and bit-counting reductions
//! (`countbits`, `reversebits`, `firstbitlow`/`firstbithigh`).

use super::{register_one, NativeFunctionRegistry};
use crate::types::{DataType, TypeLibrary};
use crate::value::{DataValue, DataValueComponent};

pub struct All;
impl super::NativeFunction for All {
    fn name(&self) -> &'static str {
        "all"
    }
    fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 1 {
            return Err("'all' takes 1 argument".into());
        }
        Ok(lib.boolean_type(1))
    }
    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        let v = args.first()?;
        let mut result = true;
        for c in &v.components {
            match c.as_bool() {
                Some(b) => result &= b,
                None => return None,
            }
        }
        Some(DataValue::scalar(DataValueComponent::Bool(result)))
    }
}

pub struct Any;
impl super::NativeFunction for Any {
    fn name(&self) -> &'static str {
        "any"
    }
    fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 1 {
            return Err("'any' takes 1 argument".into());
        }
        Ok(lib.boolean_type(1))
    }
    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        let v = args.first()?;
        let mut result = false;
        for c in &v.components {
            match c.as_bool() {
                Some(b) => result |= b,
                None => return None,
            }
        }
        Some(DataValue::scalar(DataValueComponent::Bool(result)))
    }
}

pub struct CountBits;
impl super::NativeFunction for CountBits {
    fn name(&self) -> &'static str {
        "countbits"
    }
    fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 1 {
            return Err("'countbits' takes 1 argument".into());
        }
        Ok(lib.unsigned_type(1))
    }
    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        let c = args.first()?.get(0);
        let bits = match c {
            DataValueComponent::Uint32(v) => v.count_ones(),
            DataValueComponent::Int32(v) => v.count_ones(),
            _ => return None,
        };
        Some(DataValue::scalar(DataValueComponent::Uint32(bits)))
    }
}

pub struct ReverseBits;
impl super::NativeFunction for ReverseBits {
    fn name(&self) -> &'static str {
        "reversebits"
    }
    fn determine_return_type(&self, _lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 1 {
            return Err("'reversebits' takes 1 argument".into());
        }
        Ok(arg_types[0])
    }
    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        match args.first()?.get(0) {
            DataValueComponent::Uint32(v) => Some(DataValue::scalar(DataValueComponent::Uint32(v.reverse_bits()))),
            DataValueComponent::Int32(v) => Some(DataValue::scalar(DataValueComponent::Int32(v.reverse_bits()))),
            _ => None,
        }
    }
}

pub fn register(reg: &mut NativeFunctionRegistry) {
    register_one(reg, All);
    register_one(reg, Any);
    register_one(reg, CountBits);
    register_one(reg, ReverseBits);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeFunction;

    #[test]
    fn all_is_false_if_any_component_is_false() {
        let v = DataValue::of([DataValueComponent::Bool(true), DataValueComponent::Bool(false)]);
        let r = All.evaluate(&[v]).unwrap();
        assert_eq!(r.components[0], DataValueComponent::Bool(false));
    }
}
