//! Program/function model (spec §4.4): `Function`, `Program` (a DAG of
//! "based on" parents with inheritance-based dynamic dispatch),
//! `ProgramInstance` (a program plus a binding of its static constants,
//! content-addressed and interned), and `CodeLibrary`, the session-lifetime
//! store everything above lives in.
//!
//! Grounded on `original_source/.../renderingShaderProgram.cpp` and
//! `renderingShaderFunction.{h,cpp}`; the arena/interning machinery is
//! `ashley/src/ast.rs`'s pattern applied to programs instead of AST nodes.

use crate::arena::{Arena, Id, UniqueArena};
use crate::ast::{Attribute, CodeNode, DataParameter};
use crate::diagnostics::Location;
use crate::types::{DataType, TypeLibrary};
use crate::value::DataValue;
use bitflags::bitflags;
use fxhash::{FxHashMap, FxHasher};
use smol_str::SmolStr;
use std::hash::{Hash, Hasher};

/// The closed set of pipeline stages a program can target (GLOSSARY
/// "Stage"; `renderingShaderStubs.h`'s `StubStage::stage`).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, strum::Display)]
#[repr(u8)]
pub enum ShaderStage {
    Vertex,
    Hull,
    Domain,
    Geometry,
    Pixel,
    Compute,
    Task,
    Mesh,
}

bitflags! {
    pub struct ShaderStageMask: u8 {
        const VERTEX   = 1 << 0;
        const HULL     = 1 << 1;
        const DOMAIN   = 1 << 2;
        const GEOMETRY = 1 << 3;
        const PIXEL    = 1 << 4;
        const COMPUTE  = 1 << 5;
        const TASK     = 1 << 6;
        const MESH     = 1 << 7;
    }
}

impl ShaderStageMask {
    pub fn single(stage: ShaderStage) -> Self {
        ShaderStageMask::from_bits_truncate(1 << stage as u8)
    }
}

/// The builtin `gl_*` parameter identity a `GlobalBuiltin`-scoped
/// `DataParameter` resolves to (spec §6 closed enumeration).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, strum::Display)]
pub enum BuiltinParameter {
    Position,
    PositionIn,
    PointSize,
    PointSizeIn,
    ClipDistance,
    VertexId,
    InstanceId,
    DrawId,
    BaseVertex,
    BaseInstance,
    PatchVerticesIn,
    PrimitiveId,
    PrimitiveIdIn,
    InvocationId,
    Layer,
    ViewportIndex,
    TessLevelOuter,
    TessLevelInner,
    TessCoord,
    FragCoord,
    FrontFacing,
    PointCoord,
    SampleId,
    SamplePosition,
    SampleMaskIn,
    SampleMask,
    Target0,
    Target1,
    Target2,
    Target3,
    Target4,
    Target5,
    Target6,
    Target7,
    FragDepth,
    NumWorkGroups,
    GlobalInvocationId,
    LocalInvocationId,
    WorkGroupId,
    LocalInvocationIndex,
}

impl BuiltinParameter {
    pub fn glsl_name(self) -> &'static str {
        match self {
            BuiltinParameter::Position => "gl_Position",
            BuiltinParameter::PositionIn => "gl_PositionIn",
            BuiltinParameter::PointSize => "gl_PointSize",
            BuiltinParameter::PointSizeIn => "gl_PointSizeIn",
            BuiltinParameter::ClipDistance => "gl_ClipDistance",
            BuiltinParameter::VertexId => "gl_VertexID",
            BuiltinParameter::InstanceId => "gl_InstanceID",
            BuiltinParameter::DrawId => "gl_DrawID",
            BuiltinParameter::BaseVertex => "gl_BaseVertex",
            BuiltinParameter::BaseInstance => "gl_BaseInstance",
            BuiltinParameter::PatchVerticesIn => "gl_PatchVerticesIn",
            BuiltinParameter::PrimitiveId => "gl_PrimitiveID",
            BuiltinParameter::PrimitiveIdIn => "gl_PrimitiveIDIn",
            BuiltinParameter::InvocationId => "gl_InvocationID",
            BuiltinParameter::Layer => "gl_Layer",
            BuiltinParameter::ViewportIndex => "gl_ViewportIndex",
            BuiltinParameter::TessLevelOuter => "gl_TessLevelOuter",
            BuiltinParameter::TessLevelInner => "gl_TessLevelInner",
            BuiltinParameter::TessCoord => "gl_TessCoord",
            BuiltinParameter::FragCoord => "gl_FragCoord",
            BuiltinParameter::FrontFacing => "gl_FrontFacing",
            BuiltinParameter::PointCoord => "gl_PointCoord",
            BuiltinParameter::SampleId => "gl_SampleID",
            BuiltinParameter::SamplePosition => "gl_SamplePosition",
            BuiltinParameter::SampleMaskIn => "gl_SampleMaskIn",
            BuiltinParameter::SampleMask => "gl_SampleMask",
            BuiltinParameter::Target0 => "gl_Target0",
            BuiltinParameter::Target1 => "gl_Target1",
            BuiltinParameter::Target2 => "gl_Target2",
            BuiltinParameter::Target3 => "gl_Target3",
            BuiltinParameter::Target4 => "gl_Target4",
            BuiltinParameter::Target5 => "gl_Target5",
            BuiltinParameter::Target6 => "gl_Target6",
            BuiltinParameter::Target7 => "gl_Target7",
            BuiltinParameter::FragDepth => "gl_FragDepth",
            BuiltinParameter::NumWorkGroups => "gl_NumWorkGroups",
            BuiltinParameter::GlobalInvocationId => "gl_GlobalInvocationID",
            BuiltinParameter::LocalInvocationId => "gl_LocalInvocationID",
            BuiltinParameter::WorkGroupId => "gl_WorkGroupID",
            BuiltinParameter::LocalInvocationIndex => "gl_LocalInvocationIndex",
        }
    }

    /// Reverse of `glsl_name`; the exporter uses this to recover which
    /// builtin a `GlobalBuiltin`-scoped `DataParameter` names.
    pub fn from_glsl_name(name: &str) -> Option<BuiltinParameter> {
        match name {
            "gl_Position" => Some(BuiltinParameter::Position),
            "gl_PositionIn" => Some(BuiltinParameter::PositionIn),
            "gl_PointSize" => Some(BuiltinParameter::PointSize),
            "gl_PointSizeIn" => Some(BuiltinParameter::PointSizeIn),
            "gl_ClipDistance" => Some(BuiltinParameter::ClipDistance),
            "gl_VertexID" => Some(BuiltinParameter::VertexId),
            "gl_InstanceID" => Some(BuiltinParameter::InstanceId),
            "gl_DrawID" => Some(BuiltinParameter::DrawId),
            "gl_BaseVertex" => Some(BuiltinParameter::BaseVertex),
            "gl_BaseInstance" => Some(BuiltinParameter::BaseInstance),
            "gl_PatchVerticesIn" => Some(BuiltinParameter::PatchVerticesIn),
            "gl_PrimitiveID" => Some(BuiltinParameter::PrimitiveId),
            "gl_PrimitiveIDIn" => Some(BuiltinParameter::PrimitiveIdIn),
            "gl_InvocationID" => Some(BuiltinParameter::InvocationId),
            "gl_Layer" => Some(BuiltinParameter::Layer),
            "gl_ViewportIndex" => Some(BuiltinParameter::ViewportIndex),
            "gl_TessLevelOuter" => Some(BuiltinParameter::TessLevelOuter),
            "gl_TessLevelInner" => Some(BuiltinParameter::TessLevelInner),
            "gl_TessCoord" => Some(BuiltinParameter::TessCoord),
            "gl_FragCoord" => Some(BuiltinParameter::FragCoord),
            "gl_FrontFacing" => Some(BuiltinParameter::FrontFacing),
            "gl_PointCoord" => Some(BuiltinParameter::PointCoord),
            "gl_SampleID" => Some(BuiltinParameter::SampleId),
            "gl_SamplePosition" => Some(BuiltinParameter::SamplePosition),
            "gl_SampleMaskIn" => Some(BuiltinParameter::SampleMaskIn),
            "gl_SampleMask" => Some(BuiltinParameter::SampleMask),
            "gl_Target0" => Some(BuiltinParameter::Target0),
            "gl_Target1" => Some(BuiltinParameter::Target1),
            "gl_Target2" => Some(BuiltinParameter::Target2),
            "gl_Target3" => Some(BuiltinParameter::Target3),
            "gl_Target4" => Some(BuiltinParameter::Target4),
            "gl_Target5" => Some(BuiltinParameter::Target5),
            "gl_Target6" => Some(BuiltinParameter::Target6),
            "gl_Target7" => Some(BuiltinParameter::Target7),
            "gl_FragDepth" => Some(BuiltinParameter::FragDepth),
            "gl_NumWorkGroups" => Some(BuiltinParameter::NumWorkGroups),
            "gl_GlobalInvocationID" => Some(BuiltinParameter::GlobalInvocationId),
            "gl_LocalInvocationID" => Some(BuiltinParameter::LocalInvocationId),
            "gl_WorkGroupID" => Some(BuiltinParameter::WorkGroupId),
            "gl_LocalInvocationIndex" => Some(BuiltinParameter::LocalInvocationIndex),
            _ => None,
        }
    }

    /// Whether the resolver should hand back an assignable (reference-typed)
    /// parameter for this builtin — only the shader-stage output builtins
    /// are written to; every input builtin is read-only (spec §4.4).
    pub fn is_assignable(self) -> bool {
        matches!(
            self,
            BuiltinParameter::Position
                | BuiltinParameter::PointSize
                | BuiltinParameter::ClipDistance
                | BuiltinParameter::Layer
                | BuiltinParameter::ViewportIndex
                | BuiltinParameter::TessLevelOuter
                | BuiltinParameter::TessLevelInner
                | BuiltinParameter::FragDepth
                | BuiltinParameter::SampleMask
                | BuiltinParameter::Target0
                | BuiltinParameter::Target1
                | BuiltinParameter::Target2
                | BuiltinParameter::Target3
                | BuiltinParameter::Target4
                | BuiltinParameter::Target5
                | BuiltinParameter::Target6
                | BuiltinParameter::Target7
        )
    }
}

/// Render states accumulated from a program's ancestry (§C "Static
/// render-state accumulation ordering").
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StaticRenderStateBlock {
    pub depth_test: Option<bool>,
    pub depth_write: Option<bool>,
    pub blend_enabled: Option<bool>,
    pub cull_mode: Option<u8>,
}

impl StaticRenderStateBlock {
    fn merge_from_parent(&mut self, parent: &StaticRenderStateBlock) {
        if self.depth_test.is_none() {
            self.depth_test = parent.depth_test;
        }
        if self.depth_write.is_none() {
            self.depth_write = parent.depth_write;
        }
        if self.blend_enabled.is_none() {
            self.blend_enabled = parent.blend_enabled;
        }
        if self.cull_mode.is_none() {
            self.cull_mode = parent.cull_mode;
        }
    }
}

/// Immutable once constructed: the resolver and folder build a `Function`
/// exactly once and never mutate it afterward (spec §4.4).
#[derive(Clone, Debug)]
pub struct Function {
    pub name: SmolStr,
    pub params: Vec<Id<DataParameter>>,
    pub return_type: DataType,
    pub body: Id<CodeNode>,
    pub attributes: Vec<Attribute>,
    pub stage_mask: ShaderStageMask,
    pub location: Location,
}

/// A named, inheritable bundle of parameters and functions. `parents` forms
/// a DAG (multiple inheritance is allowed, as in the original); lookups walk
/// `self` before `parents`, so a derived program's own declaration always
/// wins — the "inheritance-based dynamic dispatch" spec §8 property S7
/// checks.
#[derive(Clone, Debug)]
pub struct Program {
    pub name: SmolStr,
    pub parents: Vec<Id<Program>>,
    pub parameters: Vec<Id<DataParameter>>,
    pub functions: Vec<Id<Function>>,
    pub render_states: StaticRenderStateBlock,
}

impl Program {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Program {
            name: name.into(),
            parents: Vec::new(),
            parameters: Vec::new(),
            functions: Vec::new(),
            render_states: StaticRenderStateBlock::default(),
        }
    }

    /// `isBasedOnProgram`: `self_id` (or any ancestor) is `target`. Takes
    /// `self_id` explicitly since a `Program` does not carry its own `Id`.
    pub fn is_based_on(&self, self_id: Id<Program>, target: Id<Program>, programs: &Arena<Program>) -> bool {
        if self_id == target {
            return true;
        }
        self.parents.iter().any(|&p| programs[p].is_based_on(p, target, programs))
    }

    pub fn find_parameter<'a>(&self, name: &str, programs: &'a Arena<Program>, params: &'a Arena<DataParameter>) -> Option<Id<DataParameter>> {
        if let Some(&id) = self.parameters.iter().find(|&&id| params[id].name == name) {
            return Some(id);
        }
        self.parents.iter().find_map(|&p| programs[p].find_parameter(name, programs, params))
    }

    pub fn find_function<'a>(&self, name: &str, programs: &'a Arena<Program>, functions: &'a Arena<Function>) -> Option<Id<Function>> {
        if let Some(&id) = self.functions.iter().find(|&&id| functions[id].name == name) {
            return Some(id);
        }
        self.parents.iter().find_map(|&p| programs[p].find_function(name, programs, functions))
    }

    /// Depth-first parent accumulation, self applied last, diffed against
    /// defaults elsewhere by the caller (§C).
    pub fn resolved_render_states(&self, programs: &Arena<Program>) -> StaticRenderStateBlock {
        let mut result = StaticRenderStateBlock::default();
        for &parent in &self.parents {
            let parent_resolved = programs[parent].resolved_render_states(programs);
            result.merge_from_parent(&parent_resolved);
        }
        let mut own = self.render_states.clone();
        own.merge_from_parent(&result);
        own
    }
}

/// A binding of a program's static/global constants to concrete values
/// (spec §4.4). Interned by content, not by the `HashMap`'s own identity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgramConstants {
    // Kept as a sorted vector rather than a `HashMap` so `key()` is a pure
    // function of content (DESIGN.md open question 3).
    entries: Vec<(SmolStr, DataValue)>,
}

impl ProgramConstants {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn set(&mut self, name: impl Into<SmolStr>, value: DataValue) {
        let name = name.into();
        match self.entries.binary_search_by(|(n, _)| n.cmp(&name)) {
            Ok(i) => self.entries[i].1 = value,
            Err(i) => self.entries.insert(i, (name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&DataValue> {
        self.entries.binary_search_by(|(n, _)| n.as_str().cmp(name)).ok().map(|i| &self.entries[i].1)
    }

    /// Content-addressed 64-bit key: entries are already sorted by name, so
    /// hashing the vector directly is a pure function of content.
    pub fn key(&self) -> u64 {
        let mut hasher = FxHasher::default();
        for (name, value) in &self.entries {
            name.hash(&mut hasher);
            for component in &value.components {
                std::mem::discriminant(component).hash(&mut hasher);
                match component {
                    crate::value::DataValueComponent::Bool(b) => b.hash(&mut hasher),
                    crate::value::DataValueComponent::Int32(v) => v.hash(&mut hasher),
                    crate::value::DataValueComponent::Uint32(v) => v.hash(&mut hasher),
                    crate::value::DataValueComponent::Float32(v) => v.to_bits().hash(&mut hasher),
                    crate::value::DataValueComponent::Int64(v) => v.hash(&mut hasher),
                    crate::value::DataValueComponent::Uint64(v) => v.hash(&mut hasher),
                    crate::value::DataValueComponent::Float64(v) => v.to_bits().hash(&mut hasher),
                    crate::value::DataValueComponent::Name(n) => n.hash(&mut hasher),
                    crate::value::DataValueComponent::ProgramInstance(id) => id.hash(&mut hasher),
                    crate::value::DataValueComponent::Undefined => {}
                }
            }
        }
        hasher.finish()
    }
}

/// `(Program, ProgramConstants)`, interned: two instances with the same
/// program and the same constant bindings are pointer-equal (spec §4.4).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProgramInstance {
    pub program: Id<Program>,
    constants_key: u64,
}

impl ProgramInstance {
    fn new(program: Id<Program>, constants: &ProgramConstants) -> Self {
        ProgramInstance { program, constants_key: constants.key() }
    }
}

/// A descriptor member known to the compilation (spec §4.3 rule `Ident`(e):
/// "all descriptor entries known to the compilation"). The descriptor
/// grammar itself belongs to the out-of-scope type library/parser; this is
/// the flat fact table the resolver's tier (e) lookup searches, populated by
/// the embedder before resolution begins.
#[derive(Clone, Debug)]
pub struct DescriptorEntry {
    pub descriptor: SmolStr,
    pub member: SmolStr,
    pub ty: DataType,
    pub attributes: Vec<Attribute>,
}

/// The session-lifetime store for every program, function, AST node and
/// parameter. Owns the `TypeLibrary` too, since resolving any of the above
/// needs it.
pub struct CodeLibrary {
    pub types: TypeLibrary,
    pub programs: Arena<Program>,
    pub functions: Arena<Function>,
    pub nodes: Arena<CodeNode>,
    pub parameters: Arena<DataParameter>,
    /// Registered by the embedder; searched by `Ident` resolution tier (e).
    pub descriptor_entries: Vec<DescriptorEntry>,
    /// Functions not owned by any `Program`; searched by `Ident`/`Call`
    /// resolution tier (g) ("global functions").
    pub global_functions: Vec<Id<Function>>,
    instances: UniqueArena<ProgramInstance>,
    instance_constants: Vec<ProgramConstants>,
    builtin_cache: FxHashMap<BuiltinParameter, Id<DataParameter>>,
    descriptor_cache: FxHashMap<SmolStr, Id<DataParameter>>,
}

impl Default for CodeLibrary {
    fn default() -> Self {
        CodeLibrary {
            types: TypeLibrary::new(),
            programs: Arena::new(),
            functions: Arena::new(),
            nodes: Arena::new(),
            parameters: Arena::new(),
            descriptor_entries: Vec::new(),
            global_functions: Vec::new(),
            instances: UniqueArena::new(),
            instance_constants: Vec::new(),
            builtin_cache: FxHashMap::default(),
            descriptor_cache: FxHashMap::default(),
        }
    }
}

impl CodeLibrary {
    pub fn new() -> Self {
        Default::default()
    }

    /// Interns `(program, constants)`; repeated calls with equal content
    /// return the same `Id<ProgramInstance>` (spec §8 property S7/"dynamic
    /// dispatch via inheritance" depends on this for per-instance caching
    /// in `fold.rs`).
    pub fn intern_program_instance(&mut self, program: Id<Program>, constants: ProgramConstants) -> Id<ProgramInstance> {
        let key = ProgramInstance::new(program, &constants);
        let id = self.instances.add(key);
        if id.index() == self.instance_constants.len() {
            self.instance_constants.push(constants);
        }
        id
    }

    pub fn instance_constants(&self, id: Id<ProgramInstance>) -> &ProgramConstants {
        &self.instance_constants[id.index()]
    }

    pub fn instance(&self, id: Id<ProgramInstance>) -> &ProgramInstance {
        &self.instances[id]
    }

    /// Materializes the enumerated `gl_*` variable on first use (spec §4.4
    /// `createBuildinParameterReference`); repeated calls for the same
    /// builtin return the same `Id<DataParameter>` so references share
    /// pointer identity.
    pub fn create_builtin_parameter_reference(&mut self, builtin: BuiltinParameter, ty: DataType) -> Id<DataParameter> {
        if let Some(&id) = self.builtin_cache.get(&builtin) {
            return id;
        }
        let mut param = DataParameter::plain(builtin.glsl_name(), crate::ast::DataParameterScope::GlobalBuiltin, ty, Vec::new(), Location::UNKNOWN);
        param.builtin = Some(builtin);
        let id = self.parameters.push(param);
        self.builtin_cache.insert(builtin, id);
        id
    }

    /// Memoizes a `DataParameter` per synthesized descriptor-member name
    /// (spec §4.4 `createDescriptorElementReference`: "memoizes... so
    /// repeated references have pointer identity"). `resource_table` names
    /// the descriptor the member belongs to.
    pub fn create_descriptor_element_reference(&mut self, name: impl Into<SmolStr>, ty: DataType, attributes: Vec<Attribute>, resource_table: Option<SmolStr>) -> Id<DataParameter> {
        let name = name.into();
        if let Some(&id) = self.descriptor_cache.get(&name) {
            return id;
        }
        let mut param = DataParameter::plain(name.clone(), crate::ast::DataParameterScope::GlobalParameter, ty, attributes, Location::UNKNOWN);
        param.resource_table = resource_table;
        let id = self.parameters.push(param);
        self.descriptor_cache.insert(name, id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_constants_key_is_order_independent() {
        let mut a = ProgramConstants::new();
        a.set("b", DataValue::scalar(crate::value::DataValueComponent::Int32(2)));
        a.set("a", DataValue::scalar(crate::value::DataValueComponent::Int32(1)));

        let mut b = ProgramConstants::new();
        b.set("a", DataValue::scalar(crate::value::DataValueComponent::Int32(1)));
        b.set("b", DataValue::scalar(crate::value::DataValueComponent::Int32(2)));

        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn program_instances_intern_by_content() {
        let mut lib = CodeLibrary::new();
        let program = lib.programs.push(Program::new("Foo"));
        let mut c1 = ProgramConstants::new();
        c1.set("x", DataValue::scalar(crate::value::DataValueComponent::Int32(1)));
        let mut c2 = ProgramConstants::new();
        c2.set("x", DataValue::scalar(crate::value::DataValueComponent::Int32(1)));

        let i1 = lib.intern_program_instance(program, c1);
        let i2 = lib.intern_program_instance(program, c2);
        assert_eq!(i1, i2);
    }

    #[test]
    fn derived_program_parameter_shadows_parent() {
        let mut programs: Arena<Program> = Arena::new();
        let mut params: Arena<DataParameter> = Arena::new();
        let mut types = TypeLibrary::new();
        let float_ty = types.float_type(1);

        let parent_param = params.push(DataParameter::plain("value", crate::ast::DataParameterScope::GlobalParameter, float_ty, Vec::new(), Location::UNKNOWN));
        let mut parent = Program::new("Base");
        parent.parameters.push(parent_param);
        let parent_id = programs.push(parent);

        let child_param = params.push(DataParameter::plain("value", crate::ast::DataParameterScope::GlobalParameter, float_ty, Vec::new(), Location::UNKNOWN));
        let mut child = Program::new("Derived");
        child.parents.push(parent_id);
        child.parameters.push(child_param);
        let child = programs.push(child);

        let found = programs[child].find_parameter("value", &programs, &params);
        assert_eq!(found, Some(child_param));
    }
}
