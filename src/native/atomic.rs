//! Atomic read-modify-write builtins on group-shared/buffer storage
//! (`InterlockedAdd` and friends). These touch mutable device/group-shared
//! state and are never foldable, even when every argument is a constant —
//! the whole point is the side effect on storage the folder cannot see.

use super::{register_one, NativeFunctionRegistry};
use crate::types::{DataType, TypeLibrary};

pub struct Atomic {
    name: &'static str,
}

impl super::NativeFunction for Atomic {
    fn name(&self) -> &'static str {
        self.name
    }

    fn determine_return_type(&self, _lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        let storage = arg_types.first().ok_or_else(|| format!("'{}' requires a storage reference argument", self.name))?;
        Ok(*storage)
    }

    fn is_foldable(&self) -> bool {
        false
    }
}

pub fn register(reg: &mut NativeFunctionRegistry) {
    for name in ["InterlockedAdd", "InterlockedExchange", "InterlockedCompareExchange", "InterlockedMin", "InterlockedMax", "InterlockedAnd", "InterlockedOr", "InterlockedXor"] {
        register_one(reg, Atomic { name });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeFunction;

    #[test]
    fn atomics_never_fold() {
        let a = Atomic { name: "InterlockedAdd" };
        assert!(!a.is_foldable());
        assert!(a.evaluate(&[]).is_none());
    }
}
