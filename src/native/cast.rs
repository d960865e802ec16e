//! Explicit reinterpret/convert builtins (`asfloat`, `asint`, `asuint`,
//! `(bool)x`-style explicit casts as functions). Distinct from the implicit
//! casts `resolve.rs` inserts via `MatchType` — these are user-written calls
//! and are always allowed regardless of `Conversion::is_implicit`.

use super::{register_one, NativeFunctionRegistry};
use crate::types::{self, BaseType, DataType, TypeLibrary};
use crate::value::{valop, DataValue};

macro_rules! cast_fn {
    ($struct_name:ident, $name:literal, $base:expr) => {
        pub struct $struct_name;
        impl super::NativeFunction for $struct_name {
            fn name(&self) -> &'static str {
                $name
            }
            fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
                if arg_types.len() != 1 {
                    return Err(format!("'{}' takes 1 argument", $name));
                }
                let cols = types::extract_component_count(lib, arg_types[0]).max(1) as u8;
                Ok(lib.simple_composite_type($base, cols, 1))
            }
            fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
                let a = args.first()?;
                Some(DataValue::of(a.components.iter().map(|c| valop::cast(c, $base))))
            }
        }
    };
}

cast_fn!(AsFloat, "asfloat", BaseType::Float);
cast_fn!(AsInt, "asint", BaseType::Int);
cast_fn!(AsUint, "asuint", BaseType::Uint);
cast_fn!(AsBool, "asbool", BaseType::Bool);

pub fn register(reg: &mut NativeFunctionRegistry) {
    register_one(reg, AsFloat);
    register_one(reg, AsInt);
    register_one(reg, AsUint);
    register_one(reg, AsBool);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeFunction;
    use crate::value::DataValueComponent;

    #[test]
    fn asuint_reinterprets_each_component() {
        let v = DataValue::of([DataValueComponent::Float32(2.0), DataValueComponent::Float32(-1.0)]);
        let r = AsUint.evaluate(&[v]).unwrap();
        assert_eq!(r.components[0], DataValueComponent::Uint32(2));
    }
}
