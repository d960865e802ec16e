//! Texture/resource sampling and load builtins. Reads through a device
//! object view are never compile-time constants, so these never fold; their
//! only job is to type-check against the resource's declared element type.

use super::{register_one, NativeFunctionRegistry};
use crate::types::{self, BaseType, DataType, TypeLibrary};

pub struct Sample {
    name: &'static str,
}

impl super::NativeFunction for Sample {
    fn name(&self) -> &'static str {
        self.name
    }

    fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        let resource_ty = *arg_types.first().ok_or_else(|| format!("'{}' requires a resource argument", self.name))?;
        let resource = lib.resource(resource_ty).ok_or_else(|| format!("'{}': first argument is not a resource", self.name))?;
        let format = resource.element_format;
        Ok(match format {
            Some(f) => f.element_type(lib),
            None => lib.float_type(4),
        })
    }

    fn is_foldable(&self) -> bool {
        false
    }
}

pub struct TextureSize;
impl super::NativeFunction for TextureSize {
    fn name(&self) -> &'static str {
        "textureSize"
    }
    fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.is_empty() {
            return Err("'textureSize' requires a resource argument".into());
        }
        let dim = lib.resource(arg_types[0]).and_then(|r| r.dim).map(|d| d.address_component_count()).unwrap_or(2);
        Ok(lib.simple_composite_type(BaseType::Int, dim, 1))
    }
    fn is_foldable(&self) -> bool {
        false
    }
}

pub fn register(reg: &mut NativeFunctionRegistry) {
    for name in ["textureSample", "textureSampleLevel", "textureLoad", "textureGather"] {
        register_one(reg, Sample { name });
    }
    register_one(reg, TextureSize);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeFunction;
    use crate::types::{DeviceObjectViewType, PackedFormat, ResourceType};

    #[test]
    fn sample_return_type_follows_resource_format() {
        let mut lib = TypeLibrary::new();
        let resource = lib.resource_type(ResourceType {
            view: DeviceObjectViewType::SampledImage,
            dim: Some(types::ImageDimension::Dim2D),
            multisampled: false,
            element_format: Some(PackedFormat::Rgba32Float),
            struct_layout: None,
            readonly: true,
        });
        let sample = Sample { name: "textureSample" };
        let ret = sample.determine_return_type(&mut lib, &[resource]).unwrap();
        assert_eq!(types::extract_component_count(&lib, ret), 4);
    }
}
