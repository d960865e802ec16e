//! Bit-packing builtins (`packUnorm4x8`/`unpackUnorm4x8` and friends),
//! grounded on the format table implied by
//! `renderingShaderNativeFunctions_Image.cpp`'s typed-buffer read/write path.

use super::{register_one, NativeFunctionRegistry};
use crate::types::{BaseType, DataType, TypeLibrary};
use crate::value::{DataValue, DataValueComponent};

fn unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub struct PackUnorm4x8;
impl super::NativeFunction for PackUnorm4x8 {
    fn name(&self) -> &'static str {
        "packUnorm4x8"
    }
    fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 1 {
            return Err("'packUnorm4x8' takes 1 argument".into());
        }
        Ok(lib.unsigned_type(1))
    }
    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        let v = args.first()?;
        if v.len() != 4 {
            return None;
        }
        let mut packed: u32 = 0;
        for i in 0..4 {
            let f = v.get(i).as_f64()? as f32;
            packed |= (unorm8(f) as u32) << (i * 8);
        }
        Some(DataValue::scalar(DataValueComponent::Uint32(packed)))
    }
}

pub struct UnpackUnorm4x8;
impl super::NativeFunction for UnpackUnorm4x8 {
    fn name(&self) -> &'static str {
        "unpackUnorm4x8"
    }
    fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 1 {
            return Err("'unpackUnorm4x8' takes 1 argument".into());
        }
        Ok(lib.float_type(4))
    }
    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        let packed = match args.first()?.get(0) {
            DataValueComponent::Uint32(v) => *v,
            _ => return None,
        };
        Some(DataValue::of((0..4).map(|i| {
            let byte = ((packed >> (i * 8)) & 0xFF) as f32;
            DataValueComponent::Float32(byte / 255.0)
        })))
    }
}

pub fn register(reg: &mut NativeFunctionRegistry) {
    register_one(reg, PackUnorm4x8);
    register_one(reg, UnpackUnorm4x8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeFunction;

    #[test]
    fn pack_unpack_round_trips() {
        let v = DataValue::of([
            DataValueComponent::Float32(1.0),
            DataValueComponent::Float32(0.0),
            DataValueComponent::Float32(1.0),
            DataValueComponent::Float32(0.0),
        ]);
        let packed = PackUnorm4x8.evaluate(&[v]).unwrap();
        let unpacked = UnpackUnorm4x8.evaluate(&[packed]).unwrap();
        assert_eq!(unpacked.components[0], DataValueComponent::Float32(1.0));
        assert_eq!(unpacked.components[1], DataValueComponent::Float32(0.0));
    }
}
