//! Metadata builder (spec §4.7): `ShaderMetadata::build_from_stubs` walks a
//! `StubProgram` into the runtime-facing record the device layer uses to
//! build root signatures / descriptor set layouts.
//!
//! Grounded on `original_source/.../renderingShaderMetadataBuilder.cpp` and
//! `shaderMetadata.{h,cpp}`; the descriptor/element walk mirrors
//! `stubs.rs`'s own table layout since both read the same `StubProgram`
//! arenas in the same arena order (spec's "stable under ordering").

use crate::ast::{find_attribute, int_attribute};
use crate::program::{ShaderStage, ShaderStageMask, StaticRenderStateBlock};
use crate::stubs::{StubDescriptorMemberKind, StubProgram, StubSamplerState, StubVertexInputStream};
use fxhash::FxHasher;
use smol_str::SmolStr;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

/// Classification of a descriptor member, independent of its stub payload
/// shape (spec §4.7 "member type is derived from the member's stub
/// subclass").
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MetadataElementKind {
    ConstantBufferElement,
    ConstantBuffer,
    FormatBuffer,
    StructuredBuffer,
    Image,
    Sampler,
}

impl From<&StubDescriptorMemberKind> for MetadataElementKind {
    fn from(kind: &StubDescriptorMemberKind) -> Self {
        match kind {
            StubDescriptorMemberKind::ConstantBufferElement { .. } => MetadataElementKind::ConstantBufferElement,
            StubDescriptorMemberKind::ConstantBuffer { .. } => MetadataElementKind::ConstantBuffer,
            StubDescriptorMemberKind::FormatBuffer { .. } => MetadataElementKind::FormatBuffer,
            StubDescriptorMemberKind::StructuredBuffer { .. } => MetadataElementKind::StructuredBuffer,
            StubDescriptorMemberKind::Image { .. } => MetadataElementKind::Image,
            StubDescriptorMemberKind::Sampler => MetadataElementKind::Sampler,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetadataDescriptorElement {
    pub name: SmolStr,
    pub kind: MetadataElementKind,
    /// Constant-buffer size, structured-buffer stride, static-sampler index
    /// `(+1)`, dynamic-sampler descriptor index `(-(index+1))`, or `0` for
    /// "no sampler" (spec §4.7). This crate's exporter does not model a
    /// separate static/dynamic sampler link on `Image` members (DESIGN.md),
    /// so every `Image`/`Sampler` element always reports `0` here.
    pub number: i32,
    pub stage_mask: ShaderStageMask,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetadataDescriptor {
    pub index: u32,
    pub name: SmolStr,
    pub elements: Vec<MetadataDescriptorElement>,
    pub stage_mask: ShaderStageMask,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetadataVertexStream {
    pub name: SmolStr,
    pub instanced: bool,
    pub element_count: u32,
    pub stride: u32,
}

impl From<&StubVertexInputStream> for MetadataVertexStream {
    fn from(s: &StubVertexInputStream) -> Self {
        MetadataVertexStream {
            name: s.name.clone(),
            instanced: s.instanced,
            element_count: s.elements.len() as u32,
            stride: s.elements.iter().map(|e| e.size as u32).sum(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetadataStaticSampler {
    pub index: u32,
    pub name: SmolStr,
}

impl From<&StubSamplerState> for MetadataStaticSampler {
    fn from(s: &StubSamplerState) -> Self {
        MetadataStaticSampler { index: s.index, name: s.name.clone() }
    }
}

/// The runtime-facing record (spec §3 "Metadata"). This is the last thing
/// the core produces; everything past it belongs to the device layer.
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderMetadata {
    pub stage_mask: ShaderStageMask,
    pub content_key: u64,
    pub vertex_layout_key: u64,
    pub descriptor_layout_key: u64,
    pub compute_group_size: [u32; 3],
    pub uses_pixel_shader_early_test: bool,
    pub descriptors: Vec<MetadataDescriptor>,
    pub vertex_streams: Vec<MetadataVertexStream>,
    pub static_samplers: Vec<MetadataStaticSampler>,
    pub render_states: StaticRenderStateBlock,
}

impl ShaderMetadata {
    /// `ShaderMetadata::BuildFromStubs(stubProgram, contentKey)` (spec
    /// §4.7). `content_key` is supplied by the caller (typically a hash of
    /// the original shader source plus compile options); it does not come
    /// from the `StubProgram` itself.
    pub fn build_from_stubs(program: &StubProgram, content_key: u64) -> ShaderMetadata {
        let mut stage_mask = ShaderStageMask::empty();
        let mut descriptor_stage_masks: Vec<ShaderStageMask> = vec![ShaderStageMask::empty(); program.descriptors.len()];
        let mut member_stage_masks: Vec<ShaderStageMask> = vec![ShaderStageMask::empty(); program.descriptor_members.len()];
        let mut compute_group_size = [0u32; 3];
        let mut uses_pixel_shader_early_test = false;
        let mut referenced_streams = HashSet::new();

        for stage in &program.stages {
            let bit = ShaderStageMask::single(stage.stage);
            stage_mask |= bit;

            for &member_id in &stage.descriptor_members {
                member_stage_masks[member_id.index()] |= bit;
                let owner = program.descriptor_members[member_id].descriptor;
                descriptor_stage_masks[owner.index()] |= bit;
            }
            for &stream_id in &stage.vertex_streams {
                referenced_streams.insert(stream_id);
            }

            match stage.stage {
                ShaderStage::Pixel => {
                    if find_attribute(&stage.entry_attributes, "early_fragment_tests").is_some() {
                        uses_pixel_shader_early_test = true;
                    }
                }
                ShaderStage::Compute => {
                    compute_group_size[0] = int_attribute(&stage.entry_attributes, "local_size_x").unwrap_or(1) as u32;
                    compute_group_size[1] = int_attribute(&stage.entry_attributes, "local_size_y").unwrap_or(1) as u32;
                    compute_group_size[2] = int_attribute(&stage.entry_attributes, "local_size_z").unwrap_or(1) as u32;
                }
                _ => {}
            }
        }

        let descriptors = program
            .descriptors
            .iter_ids()
            .map(|(id, descriptor)| {
                let elements = descriptor
                    .members
                    .iter()
                    .map(|&member_id| {
                        let member = &program.descriptor_members[member_id];
                        MetadataDescriptorElement {
                            name: member.name.clone(),
                            kind: MetadataElementKind::from(&member.kind),
                            number: descriptor_member_number(&member.kind),
                            stage_mask: member_stage_masks[member_id.index()],
                        }
                    })
                    .collect();
                MetadataDescriptor {
                    index: id.index() as u32,
                    name: descriptor.name.clone(),
                    elements,
                    stage_mask: descriptor_stage_masks[id.index()],
                }
            })
            .collect::<Vec<_>>();

        let vertex_streams: Vec<_> = program
            .vertex_streams
            .iter_ids()
            .filter(|(id, _)| referenced_streams.contains(id))
            .map(|(_, s)| MetadataVertexStream::from(s))
            .collect();

        let static_samplers: Vec<_> = program.samplers.iter().map(MetadataStaticSampler::from).collect();

        let vertex_layout_key = hash_vertex_streams(&vertex_streams);
        let descriptor_layout_key = hash_descriptors(&descriptors);

        ShaderMetadata {
            stage_mask,
            content_key,
            vertex_layout_key,
            descriptor_layout_key,
            compute_group_size,
            uses_pixel_shader_early_test,
            descriptors,
            vertex_streams,
            static_samplers,
            render_states: program.render_states.clone(),
        }
    }

    /// A single stable key combining content, vertex-layout and
    /// descriptor-layout keys (spec §8 property #11: a round-tripped
    /// `StubProgram` must yield the same `ShaderMetadata::key`).
    pub fn key(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.content_key.hash(&mut hasher);
        self.vertex_layout_key.hash(&mut hasher);
        self.descriptor_layout_key.hash(&mut hasher);
        self.stage_mask.bits().hash(&mut hasher);
        hasher.finish()
    }
}

fn descriptor_member_number(kind: &StubDescriptorMemberKind) -> i32 {
    match kind {
        StubDescriptorMemberKind::ConstantBuffer { size } => *size as i32,
        StubDescriptorMemberKind::StructuredBuffer { stride, .. } => *stride as i32,
        _ => 0,
    }
}

fn hash_vertex_streams(streams: &[MetadataVertexStream]) -> u64 {
    let mut hasher = FxHasher::default();
    for s in streams {
        s.name.hash(&mut hasher);
        s.instanced.hash(&mut hasher);
        s.element_count.hash(&mut hasher);
        s.stride.hash(&mut hasher);
    }
    hasher.finish()
}

fn hash_descriptors(descriptors: &[MetadataDescriptor]) -> u64 {
    let mut hasher = FxHasher::default();
    for d in descriptors {
        d.name.hash(&mut hasher);
        d.stage_mask.bits().hash(&mut hasher);
        for e in &d.elements {
            e.name.hash(&mut hasher);
            std::mem::discriminant(&e.kind).hash(&mut hasher);
            e.number.hash(&mut hasher);
            e.stage_mask.bits().hash(&mut hasher);
        }
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Id;
    use crate::ast::{Attribute, CodeNode, DataParameter, DataParameterScope, ExtraData, OpCode};
    use crate::diagnostics::{CollectingReporter, Location};
    use crate::fold::FunctionFolder;
    use crate::program::{CodeLibrary, Function, Program};
    use crate::stubs::StubExporter;
    use crate::value::DataValue;

    fn build_pixel_program_with_descriptor(lib: &mut CodeLibrary) -> Id<Program> {
        let float4 = lib.types.float_type(4);
        let output = lib.parameters.push(DataParameter::plain("Target", DataParameterScope::StageOutput, float4.with_reference(true), Vec::new(), Location::UNKNOWN));

        let mut const_node = CodeNode::new(OpCode::Const, Location::UNKNOWN);
        const_node.extra = ExtraData::None;
        const_node.data_type = Some(float4);
        const_node.value = Some(DataValue::undefined(4));
        const_node.types_resolved = true;
        let const_node = lib.nodes.push(const_node);

        let mut output_ident = CodeNode::new(OpCode::Ident, Location::UNKNOWN);
        output_ident.extra = ExtraData::ParameterRef(output);
        output_ident.data_type = Some(float4.with_reference(true));
        output_ident.types_resolved = true;
        let output_ident = lib.nodes.push(output_ident);

        let store = lib.nodes.push(CodeNode::new(OpCode::Store, Location::UNKNOWN).with_children([output_ident, const_node]));
        let void_ty = lib.types.void_type();
        let mut body = CodeNode::new(OpCode::Scope, Location::UNKNOWN).with_children([store]);
        body.data_type = Some(void_ty);
        body.types_resolved = true;
        let body = lib.nodes.push(body);

        let main = lib.functions.push(Function {
            name: "main".into(),
            params: Vec::new(),
            return_type: void_ty,
            body,
            attributes: vec![Attribute::flag("early_fragment_tests")],
            stage_mask: crate::program::ShaderStageMask::single(ShaderStage::Pixel),
            location: Location::UNKNOWN,
        });

        let mut program = Program::new("Root");
        program.functions.push(main);
        lib.programs.push(program)
    }

    #[test]
    fn pixel_entry_point_attribute_sets_early_test_flag() {
        let mut lib = CodeLibrary::new();
        let program_id = build_pixel_program_with_descriptor(&mut lib);
        let mut folder = FunctionFolder::new(4096);
        let mut reporter = CollectingReporter::new();

        let stub_program = {
            let exporter = StubExporter::new(&mut lib, &mut folder);
            exporter.export_program("Root", &[(ShaderStage::Pixel, program_id, "main")], None, &mut reporter)
        };

        let metadata = ShaderMetadata::build_from_stubs(&stub_program, 42);
        assert!(metadata.uses_pixel_shader_early_test);
        assert_eq!(metadata.stage_mask, ShaderStageMask::single(ShaderStage::Pixel));
        assert_eq!(metadata.content_key, 42);
    }

    #[test]
    fn metadata_key_is_stable_across_equal_content() {
        let mut lib = CodeLibrary::new();
        let program_id = build_pixel_program_with_descriptor(&mut lib);
        let mut folder = FunctionFolder::new(4096);
        let mut reporter = CollectingReporter::new();

        let stub_program = {
            let exporter = StubExporter::new(&mut lib, &mut folder);
            exporter.export_program("Root", &[(ShaderStage::Pixel, program_id, "main")], None, &mut reporter)
        };

        let a = ShaderMetadata::build_from_stubs(&stub_program, 7);
        let b = ShaderMetadata::build_from_stubs(&stub_program, 7);
        assert_eq!(a.key(), b.key());
    }
}
