//! Execution/memory barriers (`GroupMemoryBarrierWithGroupSync` and
//! friends). Void-returning, side-effecting markers: never foldable, never
//! dead-code-eliminated by the folder (the folder only removes pure nodes).

use super::{register_one, NativeFunctionRegistry};
use crate::types::{DataType, TypeLibrary};

pub struct Barrier {
    name: &'static str,
}

impl super::NativeFunction for Barrier {
    fn name(&self) -> &'static str {
        self.name
    }

    fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if !arg_types.is_empty() {
            return Err(format!("'{}' takes no arguments", self.name));
        }
        Ok(lib.void_type())
    }

    fn is_foldable(&self) -> bool {
        false
    }
}

pub fn register(reg: &mut NativeFunctionRegistry) {
    for name in ["GroupMemoryBarrier", "GroupMemoryBarrierWithGroupSync", "DeviceMemoryBarrier", "AllMemoryBarrier"] {
        register_one(reg, Barrier { name });
    }
}
