//! IR exporter (spec §4.6): converts a folded per-stage `CodeNode` tree into
//! the flat, back-end-neutral "stub" graph (`StubProgram`) that back-end
//! codegens and the metadata builder (`metadata.rs`) consume, plus a
//! stub-factory binary writer/reader (spec §6).
//!
//! Grounded on `original_source/.../renderingShaderStubs.h` for the stub
//! shapes and `renderingShaderExporter.{h,cpp}` for the export walk. The
//! original's `Stub`/`StubOpcode` hierarchies are virtual-dispatch class
//! trees; per spec §9 "Tagged unions" these become closed Rust enums here,
//! not a `Box<dyn Stub>` hierarchy. Every stub lives in one of `StubProgram`'s
//! arenas and is referenced by `Id<T>`, exactly like `CodeLibrary`'s AST —
//! there is no separate pointer-fixup pass on load, since an `Id<T>` is
//! already a plain table index.

use crate::arena::{Arena, Id};
use crate::ast::{Attribute, ComponentMask, DataParameter, DataParameterScope, ExtraData, OpCode};
use crate::diagnostics::IErrorReporter;
use crate::fold::FunctionFolder;
use crate::program::{BuiltinParameter, CodeLibrary, Function, Program, ProgramConstants, ProgramInstance, ShaderStage, StaticRenderStateBlock};
use crate::types::{self, BaseType, CompositeHint, CompositeType, DataType, DeviceObjectViewType, ImageDimension, PackedFormat};
use crate::value::{DataValue, DataValueComponent};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fxhash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use std::io::{self, Read, Write};
use tracing::{debug, warn};

//------------------------------------------------------------------------
// Stub data shapes
//------------------------------------------------------------------------

/// Stub-level mirror of `BaseType`; kept as its own type rather than reused
/// directly so the binary format's tag numbering doesn't depend on the
/// in-memory type library's enum layout.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ScalarType {
    Void,
    Bool,
    Int,
    Uint,
    Float,
}

impl From<BaseType> for ScalarType {
    fn from(b: BaseType) -> Self {
        match b {
            BaseType::Void => ScalarType::Void,
            BaseType::Bool => ScalarType::Bool,
            BaseType::Int => ScalarType::Int,
            BaseType::Uint => ScalarType::Uint,
            BaseType::Float => ScalarType::Float,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StubTypeDecl {
    Scalar(ScalarType),
    Vector { scalar: ScalarType, components: u8 },
    Matrix { scalar: ScalarType, columns: u8, rows: u8 },
    Array { inner: Id<StubTypeDecl>, count: u32 },
    Struct(Id<StubStruct>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct StubStructMember {
    pub name: SmolStr,
    pub ty: Id<StubTypeDecl>,
    pub offset: u32,
    pub size: u32,
    pub alignment: u32,
    pub array_stride: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StubStruct {
    pub name: SmolStr,
    pub members: Vec<StubStructMember>,
}

/// Per-member binding shape (spec GLOSSARY "Descriptor member"). A
/// simplification from the original's per-kind subclass hierarchy: every
/// shape that needs a type carries a `StubTypeDecl`/`StubStruct` id rather
/// than duplicating layout fields already captured there.
#[derive(Clone, Debug, PartialEq)]
pub enum StubDescriptorMemberKind {
    ConstantBufferElement { ty: Id<StubTypeDecl> },
    ConstantBuffer { size: u32 },
    FormatBuffer { format: PackedFormat, writable: bool },
    StructuredBuffer { layout: Id<StubStruct>, stride: u32, writable: bool },
    Image { dim: ImageDimension, multisampled: bool, format: Option<PackedFormat>, writable: bool },
    Sampler,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StubDescriptorMember {
    pub descriptor: Id<StubDescriptor>,
    pub name: SmolStr,
    pub kind: StubDescriptorMemberKind,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StubDescriptor {
    pub name: SmolStr,
    pub members: Vec<Id<StubDescriptorMember>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StubSamplerState {
    pub index: u32,
    pub name: SmolStr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StubVertexInputElement {
    pub name: SmolStr,
    pub ty: Id<StubTypeDecl>,
    pub offset: u16,
    pub size: u16,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StubVertexInputStream {
    pub name: SmolStr,
    pub instanced: bool,
    pub elements: Vec<StubVertexInputElement>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StubStageInput {
    pub name: SmolStr,
    pub ty: Id<StubTypeDecl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StubStageOutput {
    pub name: SmolStr,
    pub ty: Id<StubTypeDecl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StubSharedMemory {
    pub name: SmolStr,
    pub ty: Id<StubTypeDecl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StubBuiltinVariable {
    pub builtin: BuiltinParameter,
    pub ty: Id<StubTypeDecl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StubScopeLocalVariable {
    pub name: SmolStr,
    pub ty: Id<StubTypeDecl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StubFunctionParameter {
    pub name: SmolStr,
    pub reference: bool,
    pub ty: Id<StubTypeDecl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StubFunction {
    pub name: SmolStr,
    pub return_type: Id<StubTypeDecl>,
    pub parameters: Vec<StubFunctionParameter>,
    /// Parameters the folder specialized away at this call site (spec §4.5
    /// point 4). Left empty: `fold.rs`'s `FunctionFolder` does not retain
    /// per-call constant provenance on the folded `Function` it produces,
    /// so the exporter cannot reconstruct which parameters were dropped
    /// from call-site argument lists. Noted as an open gap in DESIGN.md.
    pub static_parameters: Vec<SmolStr>,
    pub code: Option<Id<StubOpcode>>,
}

/// Where a `DataRef` opcode points (spec §4.6 point 2).
#[derive(Clone, Debug, PartialEq)]
pub enum StubDataRef {
    DescriptorMember(Id<StubDescriptorMember>),
    StageInput(Id<StubStageInput>),
    StageOutput(Id<StubStageOutput>),
    SharedMemory(Id<StubSharedMemory>),
    Builtin(Id<StubBuiltinVariable>),
    VertexElement { stream: Id<StubVertexInputStream>, name: SmolStr },
    /// A function-local (parameter or `Scope`-declared variable) the
    /// back-end resolves by name within its enclosing `StubFunction`.
    Local(SmolStr),
}

/// The closed opcode family (spec §3 "Exporter IR", §9 "Tagged unions").
/// Mirrors `ast::OpCode` but drops source locations and interpreter-only
/// state; `Ident` becomes `DataRef`, and `AccessMember` with a `Mask` extra
/// becomes its own `Swizzle` variant (spec §4.6 point 2's swizzle
/// normalization).
#[derive(Clone, Debug, PartialEq)]
pub enum StubOpcode {
    Nop,
    Const { ty: Id<StubTypeDecl>, value: DataValue },
    DataRef { ty: Id<StubTypeDecl>, target: StubDataRef },
    Load { value: Id<StubOpcode> },
    Store { lvalue: Id<StubOpcode>, rvalue: Id<StubOpcode> },
    Cast { ty: Id<StubTypeDecl>, value: Id<StubOpcode> },
    AccessMember { value: Id<StubOpcode>, member_index: u32 },
    Swizzle { value: Id<StubOpcode>, mask: [u8; 4], len: u8 },
    AccessArray { array: Id<StubOpcode>, index: Id<StubOpcode> },
    CreateVector { ty: Id<StubTypeDecl>, elements: Vec<Id<StubOpcode>> },
    CreateMatrix { ty: Id<StubTypeDecl>, elements: Vec<Id<StubOpcode>> },
    NativeCall { name: SmolStr, return_type: Id<StubTypeDecl>, arguments: Vec<Id<StubOpcode>> },
    Call { function: Id<StubFunction>, arguments: Vec<Id<StubOpcode>> },
    Scope { statements: Vec<Id<StubOpcode>>, locals: Vec<StubScopeLocalVariable> },
    VariableDecl { local: StubScopeLocalVariable, init: Option<Id<StubOpcode>> },
    IfElse { condition: Id<StubOpcode>, then_branch: Id<StubOpcode>, else_branch: Option<Id<StubOpcode>> },
    Loop { condition: Option<Id<StubOpcode>>, body: Option<Id<StubOpcode>> },
    Break,
    Continue,
    Return { value: Option<Id<StubOpcode>> },
    ExprStatement { value: Id<StubOpcode> },
}

/// One pipeline stage's slice of a `StubProgram`: its entry point, every
/// function it transitively calls, and the subset of the shared binding
/// tables it actually references (spec §4.6 point 4).
#[derive(Clone, Debug, PartialEq)]
pub struct StubStage {
    pub stage: ShaderStage,
    pub entry_function: Id<StubFunction>,
    /// The entry point's own attributes (`early_fragment_tests`,
    /// `local_size_x/y/z`), carried separately from `StubFunction` since
    /// the metadata builder (spec §4.7) only ever reads them off the entry
    /// point, never off an arbitrary callee.
    pub entry_attributes: Vec<Attribute>,
    pub functions: Vec<Id<StubFunction>>,
    pub inputs: Vec<Id<StubStageInput>>,
    pub outputs: Vec<Id<StubStageOutput>>,
    pub shared_memory: Vec<Id<StubSharedMemory>>,
    pub builtins: Vec<Id<StubBuiltinVariable>>,
    pub descriptor_members: Vec<Id<StubDescriptorMember>>,
    pub vertex_streams: Vec<Id<StubVertexInputStream>>,
}

/// Root of the exporter IR (spec §3 "Exporter IR"). Owns every shared table;
/// `StubStage`s reference into it by `Id`.
#[derive(Clone, Debug, PartialEq)]
pub struct StubProgram {
    pub name: SmolStr,
    pub types: Arena<StubTypeDecl>,
    pub structs: Arena<StubStruct>,
    pub descriptors: Arena<StubDescriptor>,
    pub descriptor_members: Arena<StubDescriptorMember>,
    pub samplers: Arena<StubSamplerState>,
    pub vertex_streams: Arena<StubVertexInputStream>,
    pub stage_inputs: Arena<StubStageInput>,
    pub stage_outputs: Arena<StubStageOutput>,
    pub shared_memory: Arena<StubSharedMemory>,
    pub builtins: Arena<StubBuiltinVariable>,
    pub functions: Arena<StubFunction>,
    pub opcodes: Arena<StubOpcode>,
    pub stages: Vec<StubStage>,
    pub render_states: StaticRenderStateBlock,
}

impl StubProgram {
    fn empty() -> Self {
        StubProgram {
            name: SmolStr::new(""),
            types: Arena::new(),
            structs: Arena::new(),
            descriptors: Arena::new(),
            descriptor_members: Arena::new(),
            samplers: Arena::new(),
            vertex_streams: Arena::new(),
            stage_inputs: Arena::new(),
            stage_outputs: Arena::new(),
            shared_memory: Arena::new(),
            builtins: Arena::new(),
            functions: Arena::new(),
            opcodes: Arena::new(),
            stages: Vec::new(),
            render_states: StaticRenderStateBlock::default(),
        }
    }
}

//------------------------------------------------------------------------
// Exporter
//------------------------------------------------------------------------

fn record<T: Eq + std::hash::Hash + Copy>(list: &mut Vec<T>, seen: &mut FxHashSet<T>, item: T) {
    if seen.insert(item) {
        list.push(item);
    }
}

#[derive(Default)]
struct StageAccum {
    functions: Vec<Id<StubFunction>>,
    functions_seen: FxHashSet<Id<StubFunction>>,
    inputs: Vec<Id<StubStageInput>>,
    seen_inputs: FxHashSet<Id<StubStageInput>>,
    outputs: Vec<Id<StubStageOutput>>,
    seen_outputs: FxHashSet<Id<StubStageOutput>>,
    shared: Vec<Id<StubSharedMemory>>,
    seen_shared: FxHashSet<Id<StubSharedMemory>>,
    builtins: Vec<Id<StubBuiltinVariable>>,
    seen_builtins: FxHashSet<Id<StubBuiltinVariable>>,
    descriptor_members: Vec<Id<StubDescriptorMember>>,
    seen_descriptor_members: FxHashSet<Id<StubDescriptorMember>>,
    vertex_streams: Vec<Id<StubVertexInputStream>>,
    seen_vertex_streams: FxHashSet<Id<StubVertexInputStream>>,
}

/// Walks a program's folded entry points into a `StubProgram` (spec §4.6).
/// One exporter accumulates every stage of a single compiled program, so
/// its shared tables dedupe across stages as the spec requires.
pub struct StubExporter<'a> {
    lib: &'a mut CodeLibrary,
    folder: &'a mut FunctionFolder,
    program: StubProgram,
    type_cache: FxHashMap<DataType, Id<StubTypeDecl>>,
    struct_cache: FxHashMap<SmolStr, Id<StubStruct>>,
    descriptor_cache: FxHashMap<SmolStr, Id<StubDescriptor>>,
    descriptor_member_cache: FxHashMap<(SmolStr, SmolStr), Id<StubDescriptorMember>>,
    stage_input_cache: FxHashMap<SmolStr, Id<StubStageInput>>,
    stage_output_cache: FxHashMap<SmolStr, Id<StubStageOutput>>,
    shared_cache: FxHashMap<SmolStr, Id<StubSharedMemory>>,
    builtin_cache: FxHashMap<BuiltinParameter, Id<StubBuiltinVariable>>,
    vertex_stream_cache: FxHashMap<SmolStr, Id<StubVertexInputStream>>,
    function_cache: FxHashMap<Id<Function>, Id<StubFunction>>,
}

impl<'a> StubExporter<'a> {
    pub fn new(lib: &'a mut CodeLibrary, folder: &'a mut FunctionFolder) -> Self {
        StubExporter {
            lib,
            folder,
            program: StubProgram::empty(),
            type_cache: FxHashMap::default(),
            struct_cache: FxHashMap::default(),
            descriptor_cache: FxHashMap::default(),
            descriptor_member_cache: FxHashMap::default(),
            stage_input_cache: FxHashMap::default(),
            stage_output_cache: FxHashMap::default(),
            shared_cache: FxHashMap::default(),
            builtin_cache: FxHashMap::default(),
            vertex_stream_cache: FxHashMap::default(),
            function_cache: FxHashMap::default(),
        }
    }

    /// Exports every `(stage, program, entry point name)` triple into one
    /// `StubProgram`. Render states are taken from the pixel-stage program's
    /// resolved ancestry, if a pixel stage is present (spec §3 "Metadata":
    /// render states are a graphics concept).
    pub fn export_program(mut self, name: impl Into<SmolStr>, stages: &[(ShaderStage, Id<Program>, &str)], this_instance: Option<Id<ProgramInstance>>, reporter: &mut dyn IErrorReporter) -> StubProgram {
        self.program.name = name.into();
        debug!(stage_count = stages.len(), "exporting program");
        let mut pixel_program = None;
        for &(stage, program_id, entry_name) in stages {
            if stage == ShaderStage::Pixel {
                pixel_program = Some(program_id);
            }
            if let Some(stub_stage) = self.export_stage(stage, program_id, this_instance, entry_name, reporter) {
                self.program.stages.push(stub_stage);
            } else {
                warn!(%stage, entry_name, "stage has no matching entry point, skipping");
                reporter.report_warning(crate::diagnostics::Location::UNKNOWN, format!("stage '{stage}' has no entry point '{entry_name}'"));
            }
        }
        if let Some(pixel) = pixel_program {
            self.program.render_states = self.lib.programs[pixel].resolved_render_states(&self.lib.programs);
        }
        self.program
    }

    /// Folds `entry_name` with an empty `ProgramConstants` (spec §4.6 step
    /// 1) and walks the result into a `StubStage`.
    fn export_stage(&mut self, stage: ShaderStage, program: Id<Program>, this_instance: Option<Id<ProgramInstance>>, entry_name: &str, reporter: &mut dyn IErrorReporter) -> Option<StubStage> {
        let entry_fn = self.lib.programs[program].find_function(entry_name, &self.lib.programs, &self.lib.functions)?;
        let locals = ProgramConstants::new();
        let folded_entry = self.folder.fold_function(self.lib, entry_fn, this_instance, &locals, reporter);

        let mut accum = StageAccum::default();
        let entry_attributes = self.lib.functions[folded_entry].attributes.clone();
        let entry_function = self.export_function(&mut accum, folded_entry);
        Some(StubStage {
            stage,
            entry_function,
            entry_attributes,
            functions: accum.functions,
            inputs: accum.inputs,
            outputs: accum.outputs,
            shared_memory: accum.shared,
            builtins: accum.builtins,
            descriptor_members: accum.descriptor_members,
            vertex_streams: accum.vertex_streams,
        })
    }

    fn export_type(&mut self, ty: DataType) -> Id<StubTypeDecl> {
        let key = ty.with_reference(false).with_atomic(false);
        if let Some(&id) = self.type_cache.get(&key) {
            return id;
        }
        let decl = if self.lib.types.is_array(key) {
            let inner_ty = self.lib.types.array_inner_type(key).expect("array type always has an inner type");
            let count = self.lib.types.array_length(key).unwrap_or(0);
            let inner = self.export_type(inner_ty);
            StubTypeDecl::Array { inner, count }
        } else if let Some(composite) = self.lib.types.composite(key).cloned() {
            match composite.hint {
                CompositeHint::Vector => StubTypeDecl::Vector { scalar: composite.element_base.into(), components: composite.cols },
                CompositeHint::Matrix => StubTypeDecl::Matrix { scalar: composite.element_base.into(), columns: composite.cols, rows: composite.rows },
                CompositeHint::Struct => StubTypeDecl::Struct(self.export_struct(&composite)),
            }
        } else if let Some(base) = types::extract_base_type(&self.lib.types, key) {
            StubTypeDecl::Scalar(base.into())
        } else {
            StubTypeDecl::Scalar(ScalarType::Void)
        };
        let id = self.program.types.push(decl);
        self.type_cache.insert(key, id);
        id
    }

    /// Reserves the struct before exporting its members so a self-
    /// referential (pointer-indirected) struct doesn't recurse forever —
    /// the same pattern `fold.rs::fold_function` uses for recursive calls.
    fn export_struct(&mut self, composite: &CompositeType) -> Id<StubStruct> {
        if let Some(&id) = self.struct_cache.get(&composite.name) {
            return id;
        }
        let reserved = self.program.structs.push(StubStruct { name: composite.name.clone(), members: Vec::new() });
        self.struct_cache.insert(composite.name.clone(), reserved);
        let members = composite
            .members
            .iter()
            .map(|m| {
                let ty = self.export_type(m.ty);
                StubStructMember {
                    name: m.name.clone(),
                    ty,
                    offset: m.layout.offset,
                    size: m.layout.size,
                    alignment: m.layout.alignment,
                    array_stride: m.layout.array_stride,
                }
            })
            .collect();
        self.program.structs[reserved].members = members;
        reserved
    }

    /// Lowers a `res:<descriptor>.<entry>` (or bare) name into a descriptor
    /// member, creating the owning `StubDescriptor` on first reference
    /// (spec §4.6 point 2 "resource 'constants' ... become descriptor-member
    /// references").
    fn export_descriptor_member(&mut self, stage: &mut StageAccum, full_name: &str, ty: DataType) -> Id<StubDescriptorMember> {
        let body = full_name.strip_prefix("res:").unwrap_or(full_name);
        let (descriptor_name, entry_name) = match body.split_once('.') {
            Some((d, e)) => (SmolStr::new(d), SmolStr::new(e)),
            None => (SmolStr::new(body), SmolStr::new(body)),
        };
        let cache_key = (descriptor_name.clone(), entry_name.clone());
        if let Some(&id) = self.descriptor_member_cache.get(&cache_key) {
            record(&mut stage.descriptor_members, &mut stage.seen_descriptor_members, id);
            return id;
        }

        let descriptor_id = if let Some(&id) = self.descriptor_cache.get(&descriptor_name) {
            id
        } else {
            let id = self.program.descriptors.push(StubDescriptor { name: descriptor_name.clone(), members: Vec::new() });
            self.descriptor_cache.insert(descriptor_name.clone(), id);
            id
        };

        let deref_ty = ty.dereferenced();
        let kind = if let Some(resource) = self.lib.types.resource(deref_ty).cloned() {
            self.export_resource_kind(&resource)
        } else {
            let member_ty = self.export_type(deref_ty);
            StubDescriptorMemberKind::ConstantBufferElement { ty: member_ty }
        };

        let member_id = self.program.descriptor_members.push(StubDescriptorMember { descriptor: descriptor_id, name: entry_name, kind });
        self.program.descriptors[descriptor_id].members.push(member_id);
        self.descriptor_member_cache.insert(cache_key, member_id);
        record(&mut stage.descriptor_members, &mut stage.seen_descriptor_members, member_id);
        member_id
    }

    fn export_resource_kind(&mut self, resource: &types::ResourceType) -> StubDescriptorMemberKind {
        use DeviceObjectViewType::*;
        match resource.view {
            ConstantBuffer => StubDescriptorMemberKind::ConstantBuffer { size: self.struct_layout_byte_size(resource) },
            Buffer | BufferWritable => StubDescriptorMemberKind::FormatBuffer {
                format: resource.element_format.unwrap_or(PackedFormat::Rgba32Float),
                writable: matches!(resource.view, BufferWritable),
            },
            BufferStructured | BufferStructuredWritable => {
                let stride = self.struct_layout_byte_size(resource);
                let layout = self.struct_layout_id(resource).unwrap_or_else(|| self.program.structs.push(StubStruct { name: SmolStr::new("<anonymous>"), members: Vec::new() }));
                StubDescriptorMemberKind::StructuredBuffer { layout, stride, writable: matches!(resource.view, BufferStructuredWritable) }
            }
            Image | ImageWritable | SampledImage => StubDescriptorMemberKind::Image {
                dim: resource.dim.unwrap_or(ImageDimension::Dim2D),
                multisampled: resource.multisampled,
                format: resource.element_format,
                writable: matches!(resource.view, ImageWritable),
            },
            Sampler | ShadowSampler => StubDescriptorMemberKind::Sampler,
        }
    }

    fn struct_layout_id(&mut self, resource: &types::ResourceType) -> Option<Id<StubStruct>> {
        let cid = resource.struct_layout?;
        let handle = self.lib.types.composite_type_handle(cid);
        let composite = self.lib.types.composite(handle).expect("struct_layout id always names a composite").clone();
        Some(self.export_struct(&composite))
    }

    fn struct_layout_byte_size(&mut self, resource: &types::ResourceType) -> u32 {
        match resource.struct_layout {
            Some(cid) => {
                let handle = self.lib.types.composite_type_handle(cid);
                self.lib.types.scalar_width(handle) as u32 * 4
            }
            None => 0,
        }
    }

    fn export_stage_input(&mut self, stage: &mut StageAccum, name: &str, ty: DataType) -> Id<StubStageInput> {
        let id = if let Some(&id) = self.stage_input_cache.get(name) {
            id
        } else {
            let stub_ty = self.export_type(ty);
            let id = self.program.stage_inputs.push(StubStageInput { name: SmolStr::new(name), ty: stub_ty });
            self.stage_input_cache.insert(SmolStr::new(name), id);
            id
        };
        record(&mut stage.inputs, &mut stage.seen_inputs, id);
        id
    }

    fn export_stage_output(&mut self, stage: &mut StageAccum, name: &str, ty: DataType) -> Id<StubStageOutput> {
        let id = if let Some(&id) = self.stage_output_cache.get(name) {
            id
        } else {
            let stub_ty = self.export_type(ty);
            let id = self.program.stage_outputs.push(StubStageOutput { name: SmolStr::new(name), ty: stub_ty });
            self.stage_output_cache.insert(SmolStr::new(name), id);
            id
        };
        record(&mut stage.outputs, &mut stage.seen_outputs, id);
        id
    }

    fn export_shared_memory(&mut self, stage: &mut StageAccum, name: &str, ty: DataType) -> Id<StubSharedMemory> {
        let id = if let Some(&id) = self.shared_cache.get(name) {
            id
        } else {
            let stub_ty = self.export_type(ty);
            let id = self.program.shared_memory.push(StubSharedMemory { name: SmolStr::new(name), ty: stub_ty });
            self.shared_cache.insert(SmolStr::new(name), id);
            id
        };
        record(&mut stage.shared, &mut stage.seen_shared, id);
        id
    }

    fn export_builtin(&mut self, stage: &mut StageAccum, name: &str, ty: DataType) -> Id<StubBuiltinVariable> {
        let builtin = BuiltinParameter::from_glsl_name(name).unwrap_or(BuiltinParameter::Position);
        let id = if let Some(&id) = self.builtin_cache.get(&builtin) {
            id
        } else {
            let stub_ty = self.export_type(ty);
            let id = self.program.builtins.push(StubBuiltinVariable { builtin, ty: stub_ty });
            self.builtin_cache.insert(builtin, id);
            id
        };
        record(&mut stage.builtins, &mut stage.seen_builtins, id);
        id
    }

    /// Vertex inputs collapse into a single implicit stream: `DataParameter`
    /// carries no stream/instancing metadata in this model (DESIGN.md notes
    /// this as a simplification relative to the original's explicit
    /// `StubVertexInputStream` declarations). Offsets accumulate in
    /// declaration order.
    fn export_vertex_element(&mut self, stage: &mut StageAccum, name: &str, ty: DataType) -> Id<StubVertexInputStream> {
        let stream_name: SmolStr = SmolStr::new("input");
        let stream_id = if let Some(&id) = self.vertex_stream_cache.get(&stream_name) {
            id
        } else {
            let id = self.program.vertex_streams.push(StubVertexInputStream { name: stream_name.clone(), instanced: false, elements: Vec::new() });
            self.vertex_stream_cache.insert(stream_name.clone(), id);
            id
        };
        if !self.program.vertex_streams[stream_id].elements.iter().any(|e| e.name == name) {
            let stub_ty = self.export_type(ty);
            let offset: u16 = self.program.vertex_streams[stream_id].elements.iter().map(|e| e.size).sum();
            let size = (self.lib.types.scalar_width(ty) * 4) as u16;
            self.program.vertex_streams[stream_id].elements.push(StubVertexInputElement { name: SmolStr::new(name), ty: stub_ty, offset, size });
        }
        record(&mut stage.vertex_streams, &mut stage.seen_vertex_streams, stream_id);
        stream_id
    }

    /// Reserves before recursing so a recursive user function exports once
    /// (the cycle is broken exactly like `fold_function`'s dummy-body
    /// reservation).
    fn export_function(&mut self, stage: &mut StageAccum, function: Id<Function>) -> Id<StubFunction> {
        if let Some(&id) = self.function_cache.get(&function) {
            record(&mut stage.functions, &mut stage.functions_seen, id);
            return id;
        }
        let f = self.lib.functions[function].clone();
        let return_type = self.export_type(f.return_type);
        let parameters: Vec<_> = f
            .params
            .iter()
            .map(|&p| {
                let param = self.lib.parameters[p].clone();
                StubFunctionParameter { name: param.name, reference: param.ty.is_reference(), ty: self.export_type(param.ty.dereferenced()) }
            })
            .collect();
        let reserved = self.program.functions.push(StubFunction { name: f.name.clone(), return_type, parameters, static_parameters: Vec::new(), code: None });
        self.function_cache.insert(function, reserved);
        record(&mut stage.functions, &mut stage.functions_seen, reserved);

        let code = self.export_code(stage, f.body);
        self.program.functions[reserved].code = Some(code);
        reserved
    }

    fn node_type(&mut self, node: Id<crate::ast::CodeNode>) -> DataType {
        self.lib.nodes[node].data_type.unwrap_or_else(|| self.lib.types.void_type())
    }

    /// A 1-component `DataType` of `base`, for the literal `Const`s a
    /// `Zero`/`One` swizzle component lowers to.
    fn scalar_type_of(&mut self, base: BaseType) -> DataType {
        match base {
            BaseType::Bool => self.lib.types.boolean_type(1),
            BaseType::Int => self.lib.types.integer_type(1),
            BaseType::Uint => self.lib.types.unsigned_type(1),
            BaseType::Float | BaseType::Void => self.lib.types.float_type(1),
        }
    }

    /// `foldCode`'s exporter counterpart: the per-opcode walk from spec
    /// §4.6 point 2.
    fn export_code(&mut self, stage: &mut StageAccum, node: Id<crate::ast::CodeNode>) -> Id<StubOpcode> {
        match self.lib.nodes[node].opcode {
            OpCode::Nop => self.program.opcodes.push(StubOpcode::Nop),
            OpCode::Const => self.export_const(stage, node),
            OpCode::Ident => self.export_ident(stage, node),
            OpCode::AccessMember => self.export_access_member(stage, node),
            OpCode::AccessArray => {
                let children = self.lib.nodes[node].children.to_vec();
                let array = self.export_code(stage, children[0]);
                let index = self.export_code(stage, children[1]);
                self.program.opcodes.push(StubOpcode::AccessArray { array, index })
            }
            OpCode::Load => {
                let child = self.lib.nodes[node].children[0];
                let value = self.export_code(stage, child);
                self.program.opcodes.push(StubOpcode::Load { value })
            }
            OpCode::Store | OpCode::Assign | OpCode::CompoundAssign => {
                let children = self.lib.nodes[node].children.to_vec();
                let lvalue = self.export_code(stage, children[0]);
                let rvalue = self.export_code(stage, children[1]);
                self.program.opcodes.push(StubOpcode::Store { lvalue, rvalue })
            }
            OpCode::Cast => {
                let ty = self.node_type(node);
                let ty = self.export_type(ty);
                let child = self.lib.nodes[node].children[0];
                let value = self.export_code(stage, child);
                self.program.opcodes.push(StubOpcode::Cast { ty, value })
            }
            OpCode::CreateMatrix => {
                let ty = self.node_type(node);
                let ty = self.export_type(ty);
                let children = self.lib.nodes[node].children.to_vec();
                let elements = children.iter().map(|&c| self.export_code(stage, c)).collect();
                self.program.opcodes.push(StubOpcode::CreateMatrix { ty, elements })
            }
            OpCode::Call => self.export_call(stage, node),
            OpCode::IfElse => {
                let children = self.lib.nodes[node].children.to_vec();
                let condition = self.export_code(stage, children[0]);
                let then_branch = match children.get(1) {
                    Some(&c) => self.export_code(stage, c),
                    None => self.program.opcodes.push(StubOpcode::Nop),
                };
                let else_branch = children.get(2).map(|&c| self.export_code(stage, c));
                self.program.opcodes.push(StubOpcode::IfElse { condition, then_branch, else_branch })
            }
            OpCode::Loop => {
                let children = self.lib.nodes[node].children.to_vec();
                let condition = children.first().map(|&c| self.export_code(stage, c));
                let body = children.get(1).map(|&c| self.export_code(stage, c));
                self.program.opcodes.push(StubOpcode::Loop { condition, body })
            }
            OpCode::Break => self.program.opcodes.push(StubOpcode::Break),
            OpCode::Continue => self.program.opcodes.push(StubOpcode::Continue),
            OpCode::Return => {
                let value = self.lib.nodes[node].children.first().copied().map(|c| self.export_code(stage, c));
                self.program.opcodes.push(StubOpcode::Return { value })
            }
            OpCode::Scope => self.export_scope(stage, node),
            OpCode::VariableDecl => self.export_variable_decl(stage, node),
            OpCode::ExprStatement => {
                let child = self.lib.nodes[node].children[0];
                let value = self.export_code(stage, child);
                self.program.opcodes.push(StubOpcode::ExprStatement { value })
            }
            // `This`/`ProgramInstance` only ever reach the exporter unfolded
            // when `fold_function` ran with no known `thisInstance` — no
            // back-end representation exists for an instance that compile
            // time couldn't pin down, so they lower to a no-op (mirrors
            // `export_ident`'s fallback for a reference with no resolved
            // parameter).
            OpCode::This | OpCode::ProgramInstance => self.program.opcodes.push(StubOpcode::Nop),
            // Only ever visited as a `ProgramInstance` child; pass its value
            // through unchanged.
            OpCode::ProgramInstanceParam => {
                let child = self.lib.nodes[node].children[0];
                self.export_code(stage, child)
            }
            // Consumed in place by `export_access_member`'s `ResourceTable`
            // handling; a bare reference never reaches here.
            OpCode::ResourceTable => self.program.opcodes.push(StubOpcode::Nop),
        }
    }

    fn export_const(&mut self, stage: &mut StageAccum, node: Id<crate::ast::CodeNode>) -> Id<StubOpcode> {
        let ty = self.node_type(node);
        let value = self.lib.nodes[node].value.clone().unwrap_or_else(|| DataValue::undefined(1));
        if value.len() == 1 {
            if let DataValueComponent::Name(name) = value.get(0) {
                if name.starts_with("res:") {
                    let name = name.clone();
                    let member = self.export_descriptor_member(stage, &name, ty);
                    let stub_ty = self.export_type(ty.dereferenced());
                    return self.program.opcodes.push(StubOpcode::DataRef { ty: stub_ty, target: StubDataRef::DescriptorMember(member) });
                }
            }
        }
        let stub_ty = self.export_type(ty);
        self.program.opcodes.push(StubOpcode::Const { ty: stub_ty, value })
    }

    /// An `Ident` left in the folded tree is always a reference to
    /// something the folder could not resolve to a constant: stage IO,
    /// group-shared memory, a builtin, vertex input, or a function-local —
    /// every case the spec's `ParamRef` sub-cases enumerate.
    fn export_ident(&mut self, stage: &mut StageAccum, node: Id<crate::ast::CodeNode>) -> Id<StubOpcode> {
        let param = match &self.lib.nodes[node].extra {
            ExtraData::ParameterRef(p) => *p,
            _ => return self.program.opcodes.push(StubOpcode::Nop),
        };
        let ty = self.node_type(node).dereferenced();
        self.export_parameter_ref(stage, param, ty)
    }

    /// `ParamRef` lowering (spec §4.6 point 2): dispatches on the
    /// parameter's scope to the matching collected-object table. Shared by
    /// `export_ident` and `export_access_member`'s `ResourceTable.member`
    /// case, which resolves straight to a `DataParameter` without an
    /// intervening `Ident` node.
    fn export_parameter_ref(&mut self, stage: &mut StageAccum, param: Id<DataParameter>, ty: DataType) -> Id<StubOpcode> {
        let DataParameter { name, scope, .. } = self.lib.parameters[param].clone();
        let stub_ty = self.export_type(ty);
        let target = match scope {
            DataParameterScope::StageInput => StubDataRef::StageInput(self.export_stage_input(stage, &name, ty)),
            DataParameterScope::StageOutput => StubDataRef::StageOutput(self.export_stage_output(stage, &name, ty)),
            DataParameterScope::GroupShared => StubDataRef::SharedMemory(self.export_shared_memory(stage, &name, ty)),
            DataParameterScope::GlobalBuiltin => StubDataRef::Builtin(self.export_builtin(stage, &name, ty)),
            DataParameterScope::VertexInput => StubDataRef::VertexElement { stream: self.export_vertex_element(stage, &name, ty), name: name.clone() },
            DataParameterScope::GlobalParameter => StubDataRef::DescriptorMember(self.export_descriptor_member(stage, &name, ty)),
            _ => StubDataRef::Local(name),
        };
        self.program.opcodes.push(StubOpcode::DataRef { ty: stub_ty, target })
    }

    /// `AccessMember`: struct/array member access lowers to `AccessMember`
    /// unchanged; a swizzle mask normalizes into one of three shapes (spec
    /// §4.6 point 2): pass-through (identity mask, same width as the
    /// source — the value is already the result, no opcode needed),
    /// cast-by-construction (identity mask narrowing a wider vector — the
    /// result is the source's leading components, so a `Cast` reinterprets
    /// it instead of shuffling), or a true swizzle. `Zero`/`One` mask
    /// components never reach `Swizzle` (the back end has no literal slot
    /// there) — they're built as literal `Const`s and combined with the
    /// real, singly-swizzled components via `CreateVector`.
    fn export_access_member(&mut self, stage: &mut StageAccum, node: Id<crate::ast::CodeNode>) -> Id<StubOpcode> {
        if let ExtraData::ParameterRef(param) = self.lib.nodes[node].extra {
            let ty = self.node_type(node).dereferenced();
            return self.export_parameter_ref(stage, param, ty);
        }

        let base = self.lib.nodes[node].children[0];
        let base_stub = self.export_code(stage, base);
        match self.lib.nodes[node].extra.clone() {
            ExtraData::MemberIndex(index) => self.program.opcodes.push(StubOpcode::AccessMember { value: base_stub, member_index: index }),
            ExtraData::Mask(mask) => {
                let base_ty = self.node_type(base).dereferenced();
                let base_count = types::extract_component_count(&self.lib.types, base_ty);
                let components = mask.as_slice();
                let has_literal = components.iter().any(|&c| c == ComponentMask::ZERO || c == ComponentMask::ONE);
                let is_identity = !has_literal && components.iter().enumerate().all(|(i, &c)| c as usize == i);

                if is_identity && components.len() == base_count as usize {
                    return base_stub;
                }
                if is_identity {
                    let ty = self.node_type(node);
                    let stub_ty = self.export_type(ty);
                    return self.program.opcodes.push(StubOpcode::Cast { ty: stub_ty, value: base_stub });
                }
                if !has_literal {
                    let mut fixed = [0u8; 4];
                    fixed[..mask.len as usize].copy_from_slice(components);
                    return self.program.opcodes.push(StubOpcode::Swizzle { value: base_stub, mask: fixed, len: mask.len });
                }

                let base_scalar = types::extract_base_type(&self.lib.types, base_ty).unwrap_or(BaseType::Float);
                let scalar_ty = self.scalar_type_of(base_scalar);
                let scalar_stub_ty = self.export_type(scalar_ty);
                let elements = components
                    .iter()
                    .map(|&c| match c {
                        ComponentMask::ZERO => self.program.opcodes.push(StubOpcode::Const { ty: scalar_stub_ty, value: DataValue::scalar(DataValueComponent::literal(base_scalar, false)) }),
                        ComponentMask::ONE => self.program.opcodes.push(StubOpcode::Const { ty: scalar_stub_ty, value: DataValue::scalar(DataValueComponent::literal(base_scalar, true)) }),
                        _ => self.program.opcodes.push(StubOpcode::Swizzle { value: base_stub, mask: [c, 0, 0, 0], len: 1 }),
                    })
                    .collect();
                let ty = self.node_type(node);
                let stub_ty = self.export_type(ty);
                self.program.opcodes.push(StubOpcode::CreateVector { ty: stub_ty, elements })
            }
            _ => self.program.opcodes.push(StubOpcode::AccessMember { value: base_stub, member_index: 0 }),
        }
    }

    fn export_scope(&mut self, stage: &mut StageAccum, node: Id<crate::ast::CodeNode>) -> Id<StubOpcode> {
        let declarations = self.lib.nodes[node].declarations.clone();
        let children = self.lib.nodes[node].children.to_vec();
        let statements = children.iter().map(|&c| self.export_code(stage, c)).collect();
        let locals = declarations
            .iter()
            .map(|&p| {
                let param = self.lib.parameters[p].clone();
                StubScopeLocalVariable { name: param.name, ty: self.export_type(param.ty) }
            })
            .collect();
        self.program.opcodes.push(StubOpcode::Scope { statements, locals })
    }

    fn export_variable_decl(&mut self, stage: &mut StageAccum, node: Id<crate::ast::CodeNode>) -> Id<StubOpcode> {
        let param = match &self.lib.nodes[node].extra {
            ExtraData::ParameterRef(p) => *p,
            _ => return self.program.opcodes.push(StubOpcode::Nop),
        };
        let decl = self.lib.parameters[param].clone();
        let local = StubScopeLocalVariable { name: decl.name, ty: self.export_type(decl.ty) };
        let init = self.lib.nodes[node].children.first().copied().map(|c| self.export_code(stage, c));
        self.program.opcodes.push(StubOpcode::VariableDecl { local, init })
    }

    fn export_call(&mut self, stage: &mut StageAccum, node: Id<crate::ast::CodeNode>) -> Id<StubOpcode> {
        let children = self.lib.nodes[node].children.to_vec();
        let arguments: Vec<_> = children.iter().map(|&c| self.export_code(stage, c)).collect();
        match self.lib.nodes[node].extra.clone() {
            ExtraData::Name(name) => {
                let ty = self.node_type(node);
                let return_type = self.export_type(ty);
                self.program.opcodes.push(StubOpcode::NativeCall { name, return_type, arguments })
            }
            ExtraData::FunctionRef(callee) => {
                let function = self.export_function(stage, callee);
                self.program.opcodes.push(StubOpcode::Call { function, arguments })
            }
            _ => self.program.opcodes.push(StubOpcode::Nop),
        }
    }
}

//------------------------------------------------------------------------
// Stub-factory binary format (spec §6 "Compiled-shader on-disk form")
//------------------------------------------------------------------------

const STUB_FORMAT_VERSION: u8 = 1;

fn invalid_tag(what: &str, tag: u8) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("unknown {what} tag {tag} in stub binary"))
}

fn write_id<W: Write, T>(w: &mut W, id: Id<T>) -> io::Result<()> {
    w.write_u32::<LittleEndian>(id.index() as u32)
}

fn read_id<R: Read, T>(r: &mut R) -> io::Result<Id<T>> {
    let index = r.read_u32::<LittleEndian>()? as usize;
    Ok(Id::from_raw_index(index))
}

fn write_option_id<W: Write, T>(w: &mut W, id: Option<Id<T>>) -> io::Result<()> {
    match id {
        Some(id) => {
            w.write_u8(1)?;
            write_id(w, id)
        }
        None => w.write_u8(0),
    }
}

fn read_option_id<R: Read, T>(r: &mut R) -> io::Result<Option<Id<T>>> {
    match r.read_u8()? {
        0 => Ok(None),
        _ => Ok(Some(read_id(r)?)),
    }
}

fn write_id_vec<W: Write, T>(w: &mut W, ids: &[Id<T>]) -> io::Result<()> {
    w.write_u32::<LittleEndian>(ids.len() as u32)?;
    for &id in ids {
        write_id(w, id)?;
    }
    Ok(())
}

fn read_id_vec<R: Read, T>(r: &mut R) -> io::Result<Vec<Id<T>>> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    (0..len).map(|_| read_id(r)).collect()
}

fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_u32::<LittleEndian>(s.len() as u32)?;
    w.write_all(s.as_bytes())
}

fn read_string<R: Read>(r: &mut R) -> io::Result<SmolStr> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map(|s| SmolStr::new(&s)).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn write_bool<W: Write>(w: &mut W, b: bool) -> io::Result<()> {
    w.write_u8(b as u8)
}

fn read_bool<R: Read>(r: &mut R) -> io::Result<bool> {
    Ok(r.read_u8()? != 0)
}

fn write_option_bool<W: Write>(w: &mut W, b: Option<bool>) -> io::Result<()> {
    match b {
        Some(b) => {
            w.write_u8(1)?;
            write_bool(w, b)
        }
        None => w.write_u8(0),
    }
}

fn read_option_bool<R: Read>(r: &mut R) -> io::Result<Option<bool>> {
    match r.read_u8()? {
        0 => Ok(None),
        _ => Ok(Some(read_bool(r)?)),
    }
}

fn write_option_u8<W: Write>(w: &mut W, v: Option<u8>) -> io::Result<()> {
    match v {
        Some(v) => {
            w.write_u8(1)?;
            w.write_u8(v)
        }
        None => w.write_u8(0),
    }
}

fn read_option_u8<R: Read>(r: &mut R) -> io::Result<Option<u8>> {
    match r.read_u8()? {
        0 => Ok(None),
        _ => Ok(Some(r.read_u8()?)),
    }
}

fn write_arena<W: Write, T>(w: &mut W, arena: &Arena<T>, mut f: impl FnMut(&mut W, &T) -> io::Result<()>) -> io::Result<()> {
    w.write_u32::<LittleEndian>(arena.len() as u32)?;
    for item in arena.iter() {
        f(w, item)?;
    }
    Ok(())
}

fn read_arena<R: Read, T>(r: &mut R, mut f: impl FnMut(&mut R) -> io::Result<T>) -> io::Result<Arena<T>> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut arena = Arena::new();
    for _ in 0..len {
        arena.push(f(r)?);
    }
    Ok(arena)
}

fn write_scalar_type<W: Write>(w: &mut W, s: ScalarType) -> io::Result<()> {
    w.write_u8(match s {
        ScalarType::Void => 0,
        ScalarType::Bool => 1,
        ScalarType::Int => 2,
        ScalarType::Uint => 3,
        ScalarType::Float => 4,
    })
}

fn read_scalar_type<R: Read>(r: &mut R) -> io::Result<ScalarType> {
    Ok(match r.read_u8()? {
        0 => ScalarType::Void,
        1 => ScalarType::Bool,
        2 => ScalarType::Int,
        3 => ScalarType::Uint,
        4 => ScalarType::Float,
        tag => return Err(invalid_tag("ScalarType", tag)),
    })
}

fn write_image_dimension<W: Write>(w: &mut W, d: ImageDimension) -> io::Result<()> {
    w.write_u8(match d {
        ImageDimension::Dim1D => 0,
        ImageDimension::Dim2D => 1,
        ImageDimension::Dim3D => 2,
        ImageDimension::DimCube => 3,
        ImageDimension::Dim1DArray => 4,
        ImageDimension::Dim2DArray => 5,
    })
}

fn read_image_dimension<R: Read>(r: &mut R) -> io::Result<ImageDimension> {
    Ok(match r.read_u8()? {
        0 => ImageDimension::Dim1D,
        1 => ImageDimension::Dim2D,
        2 => ImageDimension::Dim3D,
        3 => ImageDimension::DimCube,
        4 => ImageDimension::Dim1DArray,
        5 => ImageDimension::Dim2DArray,
        tag => return Err(invalid_tag("ImageDimension", tag)),
    })
}

fn write_packed_format<W: Write>(w: &mut W, f: PackedFormat) -> io::Result<()> {
    w.write_u8(match f {
        PackedFormat::R32Float => 0,
        PackedFormat::Rg32Float => 1,
        PackedFormat::Rgba32Float => 2,
        PackedFormat::R32Uint => 3,
        PackedFormat::R32Sint => 4,
        PackedFormat::Rgba32Uint => 5,
        PackedFormat::Rgba32Sint => 6,
        PackedFormat::Rgba8Unorm => 7,
        PackedFormat::Rgba8Snorm => 8,
        PackedFormat::Rgba16Float => 9,
    })
}

fn read_packed_format<R: Read>(r: &mut R) -> io::Result<PackedFormat> {
    Ok(match r.read_u8()? {
        0 => PackedFormat::R32Float,
        1 => PackedFormat::Rg32Float,
        2 => PackedFormat::Rgba32Float,
        3 => PackedFormat::R32Uint,
        4 => PackedFormat::R32Sint,
        5 => PackedFormat::Rgba32Uint,
        6 => PackedFormat::Rgba32Sint,
        7 => PackedFormat::Rgba8Unorm,
        8 => PackedFormat::Rgba8Snorm,
        9 => PackedFormat::Rgba16Float,
        tag => return Err(invalid_tag("PackedFormat", tag)),
    })
}

fn write_option_packed_format<W: Write>(w: &mut W, f: Option<PackedFormat>) -> io::Result<()> {
    match f {
        Some(f) => {
            w.write_u8(1)?;
            write_packed_format(w, f)
        }
        None => w.write_u8(0),
    }
}

fn read_option_packed_format<R: Read>(r: &mut R) -> io::Result<Option<PackedFormat>> {
    match r.read_u8()? {
        0 => Ok(None),
        _ => Ok(Some(read_packed_format(r)?)),
    }
}

fn write_shader_stage<W: Write>(w: &mut W, s: ShaderStage) -> io::Result<()> {
    w.write_u8(match s {
        ShaderStage::Vertex => 0,
        ShaderStage::Hull => 1,
        ShaderStage::Domain => 2,
        ShaderStage::Geometry => 3,
        ShaderStage::Pixel => 4,
        ShaderStage::Compute => 5,
        ShaderStage::Task => 6,
        ShaderStage::Mesh => 7,
    })
}

fn read_shader_stage<R: Read>(r: &mut R) -> io::Result<ShaderStage> {
    Ok(match r.read_u8()? {
        0 => ShaderStage::Vertex,
        1 => ShaderStage::Hull,
        2 => ShaderStage::Domain,
        3 => ShaderStage::Geometry,
        4 => ShaderStage::Pixel,
        5 => ShaderStage::Compute,
        6 => ShaderStage::Task,
        7 => ShaderStage::Mesh,
        tag => return Err(invalid_tag("ShaderStage", tag)),
    })
}

fn write_builtin_parameter<W: Write>(w: &mut W, b: BuiltinParameter) -> io::Result<()> {
    w.write_u8(match b {
        BuiltinParameter::Position => 0,
        BuiltinParameter::PositionIn => 1,
        BuiltinParameter::PointSize => 2,
        BuiltinParameter::PointSizeIn => 3,
        BuiltinParameter::ClipDistance => 4,
        BuiltinParameter::VertexId => 5,
        BuiltinParameter::InstanceId => 6,
        BuiltinParameter::DrawId => 7,
        BuiltinParameter::BaseVertex => 8,
        BuiltinParameter::BaseInstance => 9,
        BuiltinParameter::PatchVerticesIn => 10,
        BuiltinParameter::PrimitiveId => 11,
        BuiltinParameter::PrimitiveIdIn => 12,
        BuiltinParameter::InvocationId => 13,
        BuiltinParameter::Layer => 14,
        BuiltinParameter::ViewportIndex => 15,
        BuiltinParameter::TessLevelOuter => 16,
        BuiltinParameter::TessLevelInner => 17,
        BuiltinParameter::TessCoord => 18,
        BuiltinParameter::FragCoord => 19,
        BuiltinParameter::FrontFacing => 20,
        BuiltinParameter::PointCoord => 21,
        BuiltinParameter::SampleId => 22,
        BuiltinParameter::SamplePosition => 23,
        BuiltinParameter::SampleMaskIn => 24,
        BuiltinParameter::SampleMask => 25,
        BuiltinParameter::Target0 => 26,
        BuiltinParameter::Target1 => 27,
        BuiltinParameter::Target2 => 28,
        BuiltinParameter::Target3 => 29,
        BuiltinParameter::Target4 => 30,
        BuiltinParameter::Target5 => 31,
        BuiltinParameter::Target6 => 32,
        BuiltinParameter::Target7 => 33,
        BuiltinParameter::FragDepth => 34,
        BuiltinParameter::NumWorkGroups => 35,
        BuiltinParameter::GlobalInvocationId => 36,
        BuiltinParameter::LocalInvocationId => 37,
        BuiltinParameter::WorkGroupId => 38,
        BuiltinParameter::LocalInvocationIndex => 39,
    })
}

fn read_builtin_parameter<R: Read>(r: &mut R) -> io::Result<BuiltinParameter> {
    Ok(match r.read_u8()? {
        0 => BuiltinParameter::Position,
        1 => BuiltinParameter::PositionIn,
        2 => BuiltinParameter::PointSize,
        3 => BuiltinParameter::PointSizeIn,
        4 => BuiltinParameter::ClipDistance,
        5 => BuiltinParameter::VertexId,
        6 => BuiltinParameter::InstanceId,
        7 => BuiltinParameter::DrawId,
        8 => BuiltinParameter::BaseVertex,
        9 => BuiltinParameter::BaseInstance,
        10 => BuiltinParameter::PatchVerticesIn,
        11 => BuiltinParameter::PrimitiveId,
        12 => BuiltinParameter::PrimitiveIdIn,
        13 => BuiltinParameter::InvocationId,
        14 => BuiltinParameter::Layer,
        15 => BuiltinParameter::ViewportIndex,
        16 => BuiltinParameter::TessLevelOuter,
        17 => BuiltinParameter::TessLevelInner,
        18 => BuiltinParameter::TessCoord,
        19 => BuiltinParameter::FragCoord,
        20 => BuiltinParameter::FrontFacing,
        21 => BuiltinParameter::PointCoord,
        22 => BuiltinParameter::SampleId,
        23 => BuiltinParameter::SamplePosition,
        24 => BuiltinParameter::SampleMaskIn,
        25 => BuiltinParameter::SampleMask,
        26 => BuiltinParameter::Target0,
        27 => BuiltinParameter::Target1,
        28 => BuiltinParameter::Target2,
        29 => BuiltinParameter::Target3,
        30 => BuiltinParameter::Target4,
        31 => BuiltinParameter::Target5,
        32 => BuiltinParameter::Target6,
        33 => BuiltinParameter::Target7,
        34 => BuiltinParameter::FragDepth,
        35 => BuiltinParameter::NumWorkGroups,
        36 => BuiltinParameter::GlobalInvocationId,
        37 => BuiltinParameter::LocalInvocationId,
        38 => BuiltinParameter::WorkGroupId,
        39 => BuiltinParameter::LocalInvocationIndex,
        tag => return Err(invalid_tag("BuiltinParameter", tag)),
    })
}

fn write_data_value_component<W: Write>(w: &mut W, c: &DataValueComponent) -> io::Result<()> {
    match c {
        DataValueComponent::Undefined => w.write_u8(0),
        DataValueComponent::Bool(b) => {
            w.write_u8(1)?;
            write_bool(w, *b)
        }
        DataValueComponent::Int32(v) => {
            w.write_u8(2)?;
            w.write_i32::<LittleEndian>(*v)
        }
        DataValueComponent::Uint32(v) => {
            w.write_u8(3)?;
            w.write_u32::<LittleEndian>(*v)
        }
        DataValueComponent::Float32(v) => {
            w.write_u8(4)?;
            w.write_f32::<LittleEndian>(*v)
        }
        DataValueComponent::Int64(v) => {
            w.write_u8(5)?;
            w.write_i64::<LittleEndian>(*v)
        }
        DataValueComponent::Uint64(v) => {
            w.write_u8(6)?;
            w.write_u64::<LittleEndian>(*v)
        }
        DataValueComponent::Float64(v) => {
            w.write_u8(7)?;
            w.write_f64::<LittleEndian>(*v)
        }
        DataValueComponent::Name(n) => {
            w.write_u8(8)?;
            write_string(w, n)
        }
        DataValueComponent::ProgramInstance(id) => {
            w.write_u8(9)?;
            write_id(w, *id)
        }
    }
}

fn read_data_value_component<R: Read>(r: &mut R) -> io::Result<DataValueComponent> {
    Ok(match r.read_u8()? {
        0 => DataValueComponent::Undefined,
        1 => DataValueComponent::Bool(read_bool(r)?),
        2 => DataValueComponent::Int32(r.read_i32::<LittleEndian>()?),
        3 => DataValueComponent::Uint32(r.read_u32::<LittleEndian>()?),
        4 => DataValueComponent::Float32(r.read_f32::<LittleEndian>()?),
        5 => DataValueComponent::Int64(r.read_i64::<LittleEndian>()?),
        6 => DataValueComponent::Uint64(r.read_u64::<LittleEndian>()?),
        7 => DataValueComponent::Float64(r.read_f64::<LittleEndian>()?),
        8 => DataValueComponent::Name(read_string(r)?),
        9 => DataValueComponent::ProgramInstance(read_id(r)?),
        tag => return Err(invalid_tag("DataValueComponent", tag)),
    })
}

fn write_data_value<W: Write>(w: &mut W, v: &DataValue) -> io::Result<()> {
    w.write_u32::<LittleEndian>(v.components.len() as u32)?;
    for c in &v.components {
        write_data_value_component(w, c)?;
    }
    Ok(())
}

fn read_data_value<R: Read>(r: &mut R) -> io::Result<DataValue> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut components = Vec::with_capacity(len);
    for _ in 0..len {
        components.push(read_data_value_component(r)?);
    }
    Ok(DataValue::of(components))
}

fn write_type_decl<W: Write>(w: &mut W, t: &StubTypeDecl) -> io::Result<()> {
    match t {
        StubTypeDecl::Scalar(s) => {
            w.write_u8(0)?;
            write_scalar_type(w, *s)
        }
        StubTypeDecl::Vector { scalar, components } => {
            w.write_u8(1)?;
            write_scalar_type(w, *scalar)?;
            w.write_u8(*components)
        }
        StubTypeDecl::Matrix { scalar, columns, rows } => {
            w.write_u8(2)?;
            write_scalar_type(w, *scalar)?;
            w.write_u8(*columns)?;
            w.write_u8(*rows)
        }
        StubTypeDecl::Array { inner, count } => {
            w.write_u8(3)?;
            write_id(w, *inner)?;
            w.write_u32::<LittleEndian>(*count)
        }
        StubTypeDecl::Struct(id) => {
            w.write_u8(4)?;
            write_id(w, *id)
        }
    }
}

fn read_type_decl<R: Read>(r: &mut R) -> io::Result<StubTypeDecl> {
    Ok(match r.read_u8()? {
        0 => StubTypeDecl::Scalar(read_scalar_type(r)?),
        1 => StubTypeDecl::Vector { scalar: read_scalar_type(r)?, components: r.read_u8()? },
        2 => StubTypeDecl::Matrix { scalar: read_scalar_type(r)?, columns: r.read_u8()?, rows: r.read_u8()? },
        3 => StubTypeDecl::Array { inner: read_id(r)?, count: r.read_u32::<LittleEndian>()? },
        4 => StubTypeDecl::Struct(read_id(r)?),
        tag => return Err(invalid_tag("StubTypeDecl", tag)),
    })
}

fn write_struct<W: Write>(w: &mut W, s: &StubStruct) -> io::Result<()> {
    write_string(w, &s.name)?;
    w.write_u32::<LittleEndian>(s.members.len() as u32)?;
    for m in &s.members {
        write_string(w, &m.name)?;
        write_id(w, m.ty)?;
        w.write_u32::<LittleEndian>(m.offset)?;
        w.write_u32::<LittleEndian>(m.size)?;
        w.write_u32::<LittleEndian>(m.alignment)?;
        w.write_u32::<LittleEndian>(m.array_stride)?;
    }
    Ok(())
}

fn read_struct<R: Read>(r: &mut R) -> io::Result<StubStruct> {
    let name = read_string(r)?;
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut members = Vec::with_capacity(len);
    for _ in 0..len {
        members.push(StubStructMember {
            name: read_string(r)?,
            ty: read_id(r)?,
            offset: r.read_u32::<LittleEndian>()?,
            size: r.read_u32::<LittleEndian>()?,
            alignment: r.read_u32::<LittleEndian>()?,
            array_stride: r.read_u32::<LittleEndian>()?,
        });
    }
    Ok(StubStruct { name, members })
}

fn write_descriptor<W: Write>(w: &mut W, d: &StubDescriptor) -> io::Result<()> {
    write_string(w, &d.name)?;
    write_id_vec(w, &d.members)
}

fn read_descriptor<R: Read>(r: &mut R) -> io::Result<StubDescriptor> {
    Ok(StubDescriptor { name: read_string(r)?, members: read_id_vec(r)? })
}

fn write_descriptor_member<W: Write>(w: &mut W, m: &StubDescriptorMember) -> io::Result<()> {
    write_id(w, m.descriptor)?;
    write_string(w, &m.name)?;
    match &m.kind {
        StubDescriptorMemberKind::ConstantBufferElement { ty } => {
            w.write_u8(0)?;
            write_id(w, *ty)
        }
        StubDescriptorMemberKind::ConstantBuffer { size } => {
            w.write_u8(1)?;
            w.write_u32::<LittleEndian>(*size)
        }
        StubDescriptorMemberKind::FormatBuffer { format, writable } => {
            w.write_u8(2)?;
            write_packed_format(w, *format)?;
            write_bool(w, *writable)
        }
        StubDescriptorMemberKind::StructuredBuffer { layout, stride, writable } => {
            w.write_u8(3)?;
            write_id(w, *layout)?;
            w.write_u32::<LittleEndian>(*stride)?;
            write_bool(w, *writable)
        }
        StubDescriptorMemberKind::Image { dim, multisampled, format, writable } => {
            w.write_u8(4)?;
            write_image_dimension(w, *dim)?;
            write_bool(w, *multisampled)?;
            write_option_packed_format(w, *format)?;
            write_bool(w, *writable)
        }
        StubDescriptorMemberKind::Sampler => w.write_u8(5),
    }
}

fn read_descriptor_member<R: Read>(r: &mut R) -> io::Result<StubDescriptorMember> {
    let descriptor = read_id(r)?;
    let name = read_string(r)?;
    let kind = match r.read_u8()? {
        0 => StubDescriptorMemberKind::ConstantBufferElement { ty: read_id(r)? },
        1 => StubDescriptorMemberKind::ConstantBuffer { size: r.read_u32::<LittleEndian>()? },
        2 => StubDescriptorMemberKind::FormatBuffer { format: read_packed_format(r)?, writable: read_bool(r)? },
        3 => StubDescriptorMemberKind::StructuredBuffer { layout: read_id(r)?, stride: r.read_u32::<LittleEndian>()?, writable: read_bool(r)? },
        4 => StubDescriptorMemberKind::Image { dim: read_image_dimension(r)?, multisampled: read_bool(r)?, format: read_option_packed_format(r)?, writable: read_bool(r)? },
        5 => StubDescriptorMemberKind::Sampler,
        tag => return Err(invalid_tag("StubDescriptorMemberKind", tag)),
    };
    Ok(StubDescriptorMember { descriptor, name, kind })
}

fn write_sampler<W: Write>(w: &mut W, s: &StubSamplerState) -> io::Result<()> {
    w.write_u32::<LittleEndian>(s.index)?;
    write_string(w, &s.name)
}

fn read_sampler<R: Read>(r: &mut R) -> io::Result<StubSamplerState> {
    Ok(StubSamplerState { index: r.read_u32::<LittleEndian>()?, name: read_string(r)? })
}

fn write_vertex_stream<W: Write>(w: &mut W, s: &StubVertexInputStream) -> io::Result<()> {
    write_string(w, &s.name)?;
    write_bool(w, s.instanced)?;
    w.write_u32::<LittleEndian>(s.elements.len() as u32)?;
    for e in &s.elements {
        write_string(w, &e.name)?;
        write_id(w, e.ty)?;
        w.write_u16::<LittleEndian>(e.offset)?;
        w.write_u16::<LittleEndian>(e.size)?;
    }
    Ok(())
}

fn read_vertex_stream<R: Read>(r: &mut R) -> io::Result<StubVertexInputStream> {
    let name = read_string(r)?;
    let instanced = read_bool(r)?;
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut elements = Vec::with_capacity(len);
    for _ in 0..len {
        elements.push(StubVertexInputElement { name: read_string(r)?, ty: read_id(r)?, offset: r.read_u16::<LittleEndian>()?, size: r.read_u16::<LittleEndian>()? });
    }
    Ok(StubVertexInputStream { name, instanced, elements })
}

fn write_stage_input<W: Write>(w: &mut W, i: &StubStageInput) -> io::Result<()> {
    write_string(w, &i.name)?;
    write_id(w, i.ty)
}

fn read_stage_input<R: Read>(r: &mut R) -> io::Result<StubStageInput> {
    Ok(StubStageInput { name: read_string(r)?, ty: read_id(r)? })
}

fn write_stage_output<W: Write>(w: &mut W, o: &StubStageOutput) -> io::Result<()> {
    write_string(w, &o.name)?;
    write_id(w, o.ty)
}

fn read_stage_output<R: Read>(r: &mut R) -> io::Result<StubStageOutput> {
    Ok(StubStageOutput { name: read_string(r)?, ty: read_id(r)? })
}

fn write_shared_memory<W: Write>(w: &mut W, s: &StubSharedMemory) -> io::Result<()> {
    write_string(w, &s.name)?;
    write_id(w, s.ty)
}

fn read_shared_memory<R: Read>(r: &mut R) -> io::Result<StubSharedMemory> {
    Ok(StubSharedMemory { name: read_string(r)?, ty: read_id(r)? })
}

fn write_builtin<W: Write>(w: &mut W, b: &StubBuiltinVariable) -> io::Result<()> {
    write_builtin_parameter(w, b.builtin)?;
    write_id(w, b.ty)
}

fn read_builtin<R: Read>(r: &mut R) -> io::Result<StubBuiltinVariable> {
    Ok(StubBuiltinVariable { builtin: read_builtin_parameter(r)?, ty: read_id(r)? })
}

fn write_function<W: Write>(w: &mut W, f: &StubFunction) -> io::Result<()> {
    write_string(w, &f.name)?;
    write_id(w, f.return_type)?;
    w.write_u32::<LittleEndian>(f.parameters.len() as u32)?;
    for p in &f.parameters {
        write_string(w, &p.name)?;
        write_bool(w, p.reference)?;
        write_id(w, p.ty)?;
    }
    w.write_u32::<LittleEndian>(f.static_parameters.len() as u32)?;
    for s in &f.static_parameters {
        write_string(w, s)?;
    }
    write_option_id(w, f.code)
}

fn read_function<R: Read>(r: &mut R) -> io::Result<StubFunction> {
    let name = read_string(r)?;
    let return_type = read_id(r)?;
    let plen = r.read_u32::<LittleEndian>()? as usize;
    let mut parameters = Vec::with_capacity(plen);
    for _ in 0..plen {
        parameters.push(StubFunctionParameter { name: read_string(r)?, reference: read_bool(r)?, ty: read_id(r)? });
    }
    let slen = r.read_u32::<LittleEndian>()? as usize;
    let mut static_parameters = Vec::with_capacity(slen);
    for _ in 0..slen {
        static_parameters.push(read_string(r)?);
    }
    let code = read_option_id(r)?;
    Ok(StubFunction { name, return_type, parameters, static_parameters, code })
}

fn write_data_ref<W: Write>(w: &mut W, d: &StubDataRef) -> io::Result<()> {
    match d {
        StubDataRef::DescriptorMember(id) => {
            w.write_u8(0)?;
            write_id(w, *id)
        }
        StubDataRef::StageInput(id) => {
            w.write_u8(1)?;
            write_id(w, *id)
        }
        StubDataRef::StageOutput(id) => {
            w.write_u8(2)?;
            write_id(w, *id)
        }
        StubDataRef::SharedMemory(id) => {
            w.write_u8(3)?;
            write_id(w, *id)
        }
        StubDataRef::Builtin(id) => {
            w.write_u8(4)?;
            write_id(w, *id)
        }
        StubDataRef::VertexElement { stream, name } => {
            w.write_u8(5)?;
            write_id(w, *stream)?;
            write_string(w, name)
        }
        StubDataRef::Local(name) => {
            w.write_u8(6)?;
            write_string(w, name)
        }
    }
}

fn read_data_ref<R: Read>(r: &mut R) -> io::Result<StubDataRef> {
    Ok(match r.read_u8()? {
        0 => StubDataRef::DescriptorMember(read_id(r)?),
        1 => StubDataRef::StageInput(read_id(r)?),
        2 => StubDataRef::StageOutput(read_id(r)?),
        3 => StubDataRef::SharedMemory(read_id(r)?),
        4 => StubDataRef::Builtin(read_id(r)?),
        5 => StubDataRef::VertexElement { stream: read_id(r)?, name: read_string(r)? },
        6 => StubDataRef::Local(read_string(r)?),
        tag => return Err(invalid_tag("StubDataRef", tag)),
    })
}

fn write_opcode<W: Write>(w: &mut W, op: &StubOpcode) -> io::Result<()> {
    match op {
        StubOpcode::Nop => w.write_u8(0),
        StubOpcode::Const { ty, value } => {
            w.write_u8(1)?;
            write_id(w, *ty)?;
            write_data_value(w, value)
        }
        StubOpcode::DataRef { ty, target } => {
            w.write_u8(2)?;
            write_id(w, *ty)?;
            write_data_ref(w, target)
        }
        StubOpcode::Load { value } => {
            w.write_u8(3)?;
            write_id(w, *value)
        }
        StubOpcode::Store { lvalue, rvalue } => {
            w.write_u8(4)?;
            write_id(w, *lvalue)?;
            write_id(w, *rvalue)
        }
        StubOpcode::Cast { ty, value } => {
            w.write_u8(5)?;
            write_id(w, *ty)?;
            write_id(w, *value)
        }
        StubOpcode::AccessMember { value, member_index } => {
            w.write_u8(6)?;
            write_id(w, *value)?;
            w.write_u32::<LittleEndian>(*member_index)
        }
        StubOpcode::Swizzle { value, mask, len } => {
            w.write_u8(7)?;
            write_id(w, *value)?;
            w.write_all(mask)?;
            w.write_u8(*len)
        }
        StubOpcode::AccessArray { array, index } => {
            w.write_u8(8)?;
            write_id(w, *array)?;
            write_id(w, *index)
        }
        StubOpcode::CreateVector { ty, elements } => {
            w.write_u8(9)?;
            write_id(w, *ty)?;
            write_id_vec(w, elements)
        }
        StubOpcode::CreateMatrix { ty, elements } => {
            w.write_u8(10)?;
            write_id(w, *ty)?;
            write_id_vec(w, elements)
        }
        StubOpcode::NativeCall { name, return_type, arguments } => {
            w.write_u8(11)?;
            write_string(w, name)?;
            write_id(w, *return_type)?;
            write_id_vec(w, arguments)
        }
        StubOpcode::Call { function, arguments } => {
            w.write_u8(12)?;
            write_id(w, *function)?;
            write_id_vec(w, arguments)
        }
        StubOpcode::Scope { statements, locals } => {
            w.write_u8(13)?;
            write_id_vec(w, statements)?;
            w.write_u32::<LittleEndian>(locals.len() as u32)?;
            for l in locals {
                write_string(w, &l.name)?;
                write_id(w, l.ty)?;
            }
            Ok(())
        }
        StubOpcode::VariableDecl { local, init } => {
            w.write_u8(14)?;
            write_string(w, &local.name)?;
            write_id(w, local.ty)?;
            write_option_id(w, *init)
        }
        StubOpcode::IfElse { condition, then_branch, else_branch } => {
            w.write_u8(15)?;
            write_id(w, *condition)?;
            write_id(w, *then_branch)?;
            write_option_id(w, *else_branch)
        }
        StubOpcode::Loop { condition, body } => {
            w.write_u8(16)?;
            write_option_id(w, *condition)?;
            write_option_id(w, *body)
        }
        StubOpcode::Break => w.write_u8(17),
        StubOpcode::Continue => w.write_u8(18),
        StubOpcode::Return { value } => {
            w.write_u8(19)?;
            write_option_id(w, *value)
        }
        StubOpcode::ExprStatement { value } => {
            w.write_u8(20)?;
            write_id(w, *value)
        }
    }
}

fn read_opcode<R: Read>(r: &mut R) -> io::Result<StubOpcode> {
    Ok(match r.read_u8()? {
        0 => StubOpcode::Nop,
        1 => StubOpcode::Const { ty: read_id(r)?, value: read_data_value(r)? },
        2 => StubOpcode::DataRef { ty: read_id(r)?, target: read_data_ref(r)? },
        3 => StubOpcode::Load { value: read_id(r)? },
        4 => StubOpcode::Store { lvalue: read_id(r)?, rvalue: read_id(r)? },
        5 => StubOpcode::Cast { ty: read_id(r)?, value: read_id(r)? },
        6 => StubOpcode::AccessMember { value: read_id(r)?, member_index: r.read_u32::<LittleEndian>()? },
        7 => {
            let value = read_id(r)?;
            let mut mask = [0u8; 4];
            r.read_exact(&mut mask)?;
            let len = r.read_u8()?;
            StubOpcode::Swizzle { value, mask, len }
        }
        8 => StubOpcode::AccessArray { array: read_id(r)?, index: read_id(r)? },
        9 => StubOpcode::CreateVector { ty: read_id(r)?, elements: read_id_vec(r)? },
        10 => StubOpcode::CreateMatrix { ty: read_id(r)?, elements: read_id_vec(r)? },
        11 => StubOpcode::NativeCall { name: read_string(r)?, return_type: read_id(r)?, arguments: read_id_vec(r)? },
        12 => StubOpcode::Call { function: read_id(r)?, arguments: read_id_vec(r)? },
        13 => {
            let statements = read_id_vec(r)?;
            let len = r.read_u32::<LittleEndian>()? as usize;
            let mut locals = Vec::with_capacity(len);
            for _ in 0..len {
                locals.push(StubScopeLocalVariable { name: read_string(r)?, ty: read_id(r)? });
            }
            StubOpcode::Scope { statements, locals }
        }
        14 => StubOpcode::VariableDecl { local: StubScopeLocalVariable { name: read_string(r)?, ty: read_id(r)? }, init: read_option_id(r)? },
        15 => StubOpcode::IfElse { condition: read_id(r)?, then_branch: read_id(r)?, else_branch: read_option_id(r)? },
        16 => StubOpcode::Loop { condition: read_option_id(r)?, body: read_option_id(r)? },
        17 => StubOpcode::Break,
        18 => StubOpcode::Continue,
        19 => StubOpcode::Return { value: read_option_id(r)? },
        20 => StubOpcode::ExprStatement { value: read_id(r)? },
        tag => return Err(invalid_tag("StubOpcode", tag)),
    })
}

fn write_render_states<W: Write>(w: &mut W, r: &StaticRenderStateBlock) -> io::Result<()> {
    write_option_bool(w, r.depth_test)?;
    write_option_bool(w, r.depth_write)?;
    write_option_bool(w, r.blend_enabled)?;
    write_option_u8(w, r.cull_mode)
}

fn read_render_states<R: Read>(r: &mut R) -> io::Result<StaticRenderStateBlock> {
    Ok(StaticRenderStateBlock {
        depth_test: read_option_bool(r)?,
        depth_write: read_option_bool(r)?,
        blend_enabled: read_option_bool(r)?,
        cull_mode: read_option_u8(r)?,
    })
}

fn write_attribute<W: Write>(w: &mut W, a: &Attribute) -> io::Result<()> {
    write_string(w, &a.name)?;
    w.write_u32::<LittleEndian>(a.args.len() as u32)?;
    for arg in &a.args {
        write_data_value(w, arg)?;
    }
    Ok(())
}

fn read_attribute<R: Read>(r: &mut R) -> io::Result<Attribute> {
    let name = read_string(r)?;
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut args = smallvec::SmallVec::new();
    for _ in 0..len {
        args.push(read_data_value(r)?);
    }
    Ok(Attribute { name, args })
}

fn write_stage<W: Write>(w: &mut W, s: &StubStage) -> io::Result<()> {
    write_shader_stage(w, s.stage)?;
    write_id(w, s.entry_function)?;
    w.write_u32::<LittleEndian>(s.entry_attributes.len() as u32)?;
    for a in &s.entry_attributes {
        write_attribute(w, a)?;
    }
    write_id_vec(w, &s.functions)?;
    write_id_vec(w, &s.inputs)?;
    write_id_vec(w, &s.outputs)?;
    write_id_vec(w, &s.shared_memory)?;
    write_id_vec(w, &s.builtins)?;
    write_id_vec(w, &s.descriptor_members)?;
    write_id_vec(w, &s.vertex_streams)
}

fn read_stage<R: Read>(r: &mut R) -> io::Result<StubStage> {
    let stage = read_shader_stage(r)?;
    let entry_function = read_id(r)?;
    let attr_len = r.read_u32::<LittleEndian>()? as usize;
    let mut entry_attributes = Vec::with_capacity(attr_len);
    for _ in 0..attr_len {
        entry_attributes.push(read_attribute(r)?);
    }
    Ok(StubStage {
        stage,
        entry_function,
        entry_attributes,
        functions: read_id_vec(r)?,
        inputs: read_id_vec(r)?,
        outputs: read_id_vec(r)?,
        shared_memory: read_id_vec(r)?,
        builtins: read_id_vec(r)?,
        descriptor_members: read_id_vec(r)?,
        vertex_streams: read_id_vec(r)?,
    })
}

/// Writes `program` in the stub-factory format (spec §6): a version byte,
/// then one length-prefixed table per arena in definition order, then the
/// per-program render states and stage list. Every cross-stub reference is
/// already a plain `Id<T>` table index, so there is no separate pointer-
/// patching step on write.
pub fn write_stub_program<W: Write>(program: &StubProgram, w: &mut W) -> io::Result<()> {
    w.write_u8(STUB_FORMAT_VERSION)?;
    write_string(w, &program.name)?;
    write_arena(w, &program.types, write_type_decl)?;
    write_arena(w, &program.structs, write_struct)?;
    write_arena(w, &program.descriptors, write_descriptor)?;
    write_arena(w, &program.descriptor_members, write_descriptor_member)?;
    write_arena(w, &program.samplers, write_sampler)?;
    write_arena(w, &program.vertex_streams, write_vertex_stream)?;
    write_arena(w, &program.stage_inputs, write_stage_input)?;
    write_arena(w, &program.stage_outputs, write_stage_output)?;
    write_arena(w, &program.shared_memory, write_shared_memory)?;
    write_arena(w, &program.builtins, write_builtin)?;
    write_arena(w, &program.functions, write_function)?;
    write_arena(w, &program.opcodes, write_opcode)?;
    write_render_states(w, &program.render_states)?;
    w.write_u32::<LittleEndian>(program.stages.len() as u32)?;
    for stage in &program.stages {
        write_stage(w, stage)?;
    }
    Ok(())
}

/// Reads back a `StubProgram` written by `write_stub_program`. An unrecognized
/// stub tag or format version aborts with `io::ErrorKind::InvalidData`
/// rather than panicking (spec §6 "unknown tags abort the load cleanly"). No
/// separate `postLoad()` pass is needed: arena ids are rebuilt in the same
/// order they were written, so every reference is valid the instant its
/// target table finishes loading.
pub fn read_stub_program<R: Read>(r: &mut R) -> io::Result<StubProgram> {
    let version = r.read_u8()?;
    if version != STUB_FORMAT_VERSION {
        return Err(io::Error::new(io::ErrorKind::InvalidData, format!("unsupported stub format version {version}")));
    }
    let name = read_string(r)?;
    let types = read_arena(r, read_type_decl)?;
    let structs = read_arena(r, read_struct)?;
    let descriptors = read_arena(r, read_descriptor)?;
    let descriptor_members = read_arena(r, read_descriptor_member)?;
    let samplers = read_arena(r, read_sampler)?;
    let vertex_streams = read_arena(r, read_vertex_stream)?;
    let stage_inputs = read_arena(r, read_stage_input)?;
    let stage_outputs = read_arena(r, read_stage_output)?;
    let shared_memory = read_arena(r, read_shared_memory)?;
    let builtins = read_arena(r, read_builtin)?;
    let functions = read_arena(r, read_function)?;
    let opcodes = read_arena(r, read_opcode)?;
    let render_states = read_render_states(r)?;
    let stage_count = r.read_u32::<LittleEndian>()? as usize;
    let mut stages = Vec::with_capacity(stage_count);
    for _ in 0..stage_count {
        stages.push(read_stage(r)?);
    }
    Ok(StubProgram {
        name,
        types,
        structs,
        descriptors,
        descriptor_members,
        samplers,
        vertex_streams,
        stage_inputs,
        stage_outputs,
        shared_memory,
        builtins,
        functions,
        opcodes,
        stages,
        render_states,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Attribute, CodeNode};
    use crate::diagnostics::{CollectingReporter, Location};
    use crate::program::ShaderStageMask;

    fn build_simple_vertex_program(lib: &mut CodeLibrary) -> (Id<Program>, DataType) {
        let float4 = lib.types.float_type(4);
        let input = lib.parameters.push(DataParameter::plain("position", DataParameterScope::VertexInput, float4, Vec::new(), Location::UNKNOWN));
        let mut output_param = DataParameter::plain("gl_Position", DataParameterScope::GlobalBuiltin, float4.with_reference(true), Vec::new(), Location::UNKNOWN);
        output_param.builtin = Some(crate::program::BuiltinParameter::Position);
        let output = lib.parameters.push(output_param);

        let mut input_ident = CodeNode::new(OpCode::Ident, Location::UNKNOWN);
        input_ident.extra = ExtraData::ParameterRef(input);
        input_ident.data_type = Some(float4);
        input_ident.types_resolved = true;
        let input_ident = lib.nodes.push(input_ident);

        let mut output_ident = CodeNode::new(OpCode::Ident, Location::UNKNOWN);
        output_ident.extra = ExtraData::ParameterRef(output);
        output_ident.data_type = Some(float4.with_reference(true));
        output_ident.types_resolved = true;
        let output_ident = lib.nodes.push(output_ident);

        let store = lib.nodes.push(CodeNode::new(OpCode::Store, Location::UNKNOWN).with_children([output_ident, input_ident]));
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
            attributes: vec![Attribute::flag("vertex")],
            stage_mask: ShaderStageMask::single(ShaderStage::Vertex),
            location: Location::UNKNOWN,
        });

        let mut program = Program::new("Root");
        program.functions.push(main);
        let program_id = lib.programs.push(program);
        (program_id, float4)
    }

    #[test]
    fn exports_vertex_input_and_builtin_as_data_refs() {
        let mut lib = CodeLibrary::new();
        let (program_id, _) = build_simple_vertex_program(&mut lib);
        let mut folder = FunctionFolder::new(4096);
        let mut reporter = CollectingReporter::new();

        let stub_program = {
            let exporter = StubExporter::new(&mut lib, &mut folder);
            exporter.export_program("Root", &[(ShaderStage::Vertex, program_id, "main")], None, &mut reporter)
        };

        assert_eq!(stub_program.stages.len(), 1);
        let stage = &stub_program.stages[0];
        assert_eq!(stage.vertex_streams.len(), 1);
        assert_eq!(stage.builtins.len(), 1);

        let entry = &stub_program.functions[stage.entry_function];
        let code = entry.code.expect("entry function has a body");
        match &stub_program.opcodes[code] {
            StubOpcode::Scope { statements, .. } => assert_eq!(statements.len(), 1),
            other => panic!("expected a Scope opcode, got {other:?}"),
        }
    }

    #[test]
    fn stub_program_round_trips_through_the_binary_format() {
        let mut lib = CodeLibrary::new();
        let (program_id, _) = build_simple_vertex_program(&mut lib);
        let mut folder = FunctionFolder::new(4096);
        let mut reporter = CollectingReporter::new();

        let original = {
            let exporter = StubExporter::new(&mut lib, &mut folder);
            exporter.export_program("Root", &[(ShaderStage::Vertex, program_id, "main")], None, &mut reporter)
        };

        let mut bytes = Vec::new();
        write_stub_program(&original, &mut bytes).unwrap();
        let read_back = read_stub_program(&mut std::io::Cursor::new(&bytes)).unwrap();

        assert_eq!(original, read_back);
    }

    #[test]
    fn unknown_opcode_tag_aborts_cleanly() {
        let mut bytes = vec![0xFFu8];
        let err = read_opcode(&mut std::io::Cursor::new(&mut bytes)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
