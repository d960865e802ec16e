//! Screen-space derivative builtins (`ddx`/`ddy` and coarse variants),
//! pixel-stage only. Depend on neighboring fragment invocations the folder
//! has no visibility into, so these never fold regardless of operand
//! constancy.

use super::{register_one, NativeFunctionRegistry};
use crate::types::{DataType, TypeLibrary};

pub struct Derivative {
    name: &'static str,
}

impl super::NativeFunction for Derivative {
    fn name(&self) -> &'static str {
        self.name
    }

    fn determine_return_type(&self, _lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 1 {
            return Err(format!("'{}' takes 1 argument", self.name));
        }
        Ok(arg_types[0])
    }

    fn is_foldable(&self) -> bool {
        false
    }
}

pub fn register(reg: &mut NativeFunctionRegistry) {
    for name in ["ddx", "ddy", "ddx_coarse", "ddy_coarse", "ddx_fine", "ddy_fine", "fwidth"] {
        register_one(reg, Derivative { name });
    }
}
