//! Vector constructors (`float2(...)`, `int4(...)`, ...). Arguments are
//! concatenated component-wise; a single scalar argument broadcasts to fill
//! every slot (`float4(0.0)`), matching
//! `original_source/.../renderingShaderNativeFunctions_Construct.cpp`.
//! Matrix construction (`CreateMatrix`) is deliberately not represented as a
//! native function here: it stays a dedicated, symbolically-folded AST
//! opcode (see `fold.rs`, DESIGN.md open question 1).

use super::{register_one, NativeFunctionRegistry};
use crate::types::{self, BaseType, DataType, TypeLibrary};
use crate::value::DataValue;

pub struct Construct {
    name: &'static str,
    base: BaseType,
    count: u8,
}

impl super::NativeFunction for Construct {
    fn name(&self) -> &'static str {
        self.name
    }

    fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.is_empty() {
            return Err(format!("'{}' requires at least one argument", self.name));
        }
        if arg_types.len() == 1 && types::extract_component_count(lib, arg_types[0]) == 1 {
            return Ok(lib.simple_composite_type(self.base, self.count, 1));
        }
        let total: u32 = arg_types.iter().map(|t| types::extract_component_count(lib, *t).max(1)).sum();
        if total != self.count as u32 {
            return Err(format!("'{}' expects {} components total, got {total}", self.name, self.count));
        }
        Ok(lib.simple_composite_type(self.base, self.count, 1))
    }

    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        if args.len() == 1 && args[0].len() == 1 {
            let c = args[0].get(0).clone();
            return Some(DataValue::of(std::iter::repeat(c).take(self.count as usize)));
        }
        let components: Vec<_> = args.iter().flat_map(|v| v.components.iter().cloned()).collect();
        if components.len() != self.count as usize {
            return None;
        }
        Some(DataValue::of(components))
    }
}

pub fn register(reg: &mut NativeFunctionRegistry) {
    for (prefix, base) in [("float", BaseType::Float), ("int", BaseType::Int), ("uint", BaseType::Uint), ("bool", BaseType::Bool)] {
        for count in 1..=4u8 {
            let name: &'static str = Box::leak(format!("{prefix}{count}").into_boxed_str());
            register_one(reg, Construct { name, base, count });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeFunction;
    use crate::value::DataValueComponent;

    #[test]
    fn scalar_broadcasts_to_fill_vector() {
        let f4 = Construct { name: "float4", base: BaseType::Float, count: 4 };
        let arg = DataValue::scalar(DataValueComponent::Float32(1.0));
        let result = f4.evaluate(&[arg]).unwrap();
        assert_eq!(result.len(), 4);
        assert!(result.components.iter().all(|c| *c == DataValueComponent::Float32(1.0)));
    }

    #[test]
    fn components_concatenate_in_order() {
        let f3 = Construct { name: "float3", base: BaseType::Float, count: 3 };
        let xy = DataValue::of([DataValueComponent::Float32(1.0), DataValueComponent::Float32(2.0)]);
        let z = DataValue::scalar(DataValueComponent::Float32(3.0));
        let result = f3.evaluate(&[xy, z]).unwrap();
        assert_eq!(result.components[2], DataValueComponent::Float32(3.0));
    }
}
