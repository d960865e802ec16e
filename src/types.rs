//! Type library (spec §4.1): interns scalar, vector, matrix, array,
//! struct, resource, program and function types and hands back canonical,
//! `Copy`-able `DataType` handles.
//!
//! A `DataType` is a reference-counted-free, `Copy` value: the structural
//! part (base kind + array-counts stack) is interned once into a
//! `TypeNode` and referenced by `Id<TypeNode>`; the reference/atomic
//! modifier flags ride alongside, outside the interned identity, since a
//! reference to `float` and a plain `float` should still intern to the same
//! underlying node (spec: "references always wrap a non-reference inner
//! type").

use crate::arena::{Id, UniqueArena};
use crate::program::Program;
use bitflags::bitflags;
use smallvec::SmallVec;
use smol_str::SmolStr;
use std::fmt;

/// Scalar base kind. `Void` only ever appears as a bare scalar `DataType`
/// (function return type, or the type of a `Nop`/`Return` placeholder).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, strum::Display)]
pub enum BaseType {
    Void,
    Bool,
    Int,
    Uint,
    Float,
}

impl BaseType {
    pub fn is_numeric(self) -> bool {
        !matches!(self, BaseType::Void | BaseType::Bool)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CompositeHint {
    Vector,
    Matrix,
    Struct,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct MemberLayout {
    pub offset: u32,
    pub size: u32,
    pub alignment: u32,
    pub array_stride: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Member {
    pub name: SmolStr,
    pub ty: DataType,
    pub layout: MemberLayout,
}

/// Named aggregate. Vectors and matrices are represented as composites too
/// (`hint` distinguishes them) so that swizzle/member resolution has one
/// code path to special-case instead of two parallel type hierarchies.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CompositeType {
    pub name: SmolStr,
    pub hint: CompositeHint,
    /// scalar element base; for `Struct` this is `BaseType::Void` (unused)
    pub element_base: BaseType,
    pub cols: u8,
    pub rows: u8,
    pub members: Vec<Member>,
}

impl CompositeType {
    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ImageDimension {
    Dim1D,
    Dim2D,
    Dim3D,
    DimCube,
    Dim1DArray,
    Dim2DArray,
}

impl ImageDimension {
    /// Number of integer address components `AccessArray` must coerce the
    /// index expression to (spec §4.3.1).
    pub fn address_component_count(self) -> u8 {
        match self {
            ImageDimension::Dim1D => 1,
            ImageDimension::Dim2D | ImageDimension::DimCube | ImageDimension::Dim1DArray => 2,
            ImageDimension::Dim3D | ImageDimension::Dim2DArray => 3,
        }
    }
}

/// Hardware pixel formats usable for typed buffers/images (spec §3,
/// `packedFormatElementType`).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PackedFormat {
    R32Float,
    Rg32Float,
    Rgba32Float,
    R32Uint,
    R32Sint,
    Rgba32Uint,
    Rgba32Sint,
    Rgba8Unorm,
    Rgba8Snorm,
    Rgba16Float,
}

impl PackedFormat {
    pub fn element_type(self, lib: &mut TypeLibrary) -> DataType {
        use PackedFormat::*;
        match self {
            R32Float => lib.float_type(1),
            Rg32Float => lib.float_type(2),
            Rgba32Float | Rgba16Float | Rgba8Unorm | Rgba8Snorm => lib.float_type(4),
            R32Uint => lib.unsigned_type(1),
            R32Sint => lib.integer_type(1),
            Rgba32Uint => lib.unsigned_type(4),
            Rgba32Sint => lib.integer_type(4),
        }
    }
}

/// The kind of binding a resource presents (GLOSSARY "View type").
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DeviceObjectViewType {
    ConstantBuffer,
    Buffer,
    BufferWritable,
    BufferStructured,
    BufferStructuredWritable,
    Image,
    ImageWritable,
    SampledImage,
    Sampler,
    ShadowSampler,
}

impl DeviceObjectViewType {
    pub fn is_array_accessible(self) -> bool {
        use DeviceObjectViewType::*;
        matches!(
            self,
            Image | ImageWritable | SampledImage | Buffer | BufferWritable | BufferStructured | BufferStructuredWritable
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ResourceType {
    pub view: DeviceObjectViewType,
    pub dim: Option<ImageDimension>,
    pub multisampled: bool,
    pub element_format: Option<PackedFormat>,
    pub struct_layout: Option<Id<CompositeType>>,
    pub readonly: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct FunctionSignature {
    pub return_type: DataType,
    pub params: Vec<DataType>,
}

bitflags! {
    pub struct TypeFlags: u8 {
        /// This `DataType` denotes a reference (lvalue) to its interned core.
        const REFERENCE = 0b01;
        /// The referenced storage is atomic (image/buffer atomic access).
        const ATOMIC    = 0b10;
    }
}

impl Default for TypeFlags {
    fn default() -> Self {
        TypeFlags::empty()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
enum TypeBaseKind {
    Scalar(BaseType),
    Composite(Id<CompositeType>),
    Resource(Id<ResourceType>),
    Program(Id<Program>),
    Function(Id<FunctionSignature>),
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct TypeNode {
    kind: TypeBaseKind,
    /// innermost-first; empty means "not an array"
    array_counts: SmallVec<[u32; 2]>,
}

/// An interned, `Copy`-able type handle (spec §3 `DataType`).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DataType {
    core: Id<TypeNode>,
    flags: TypeFlags,
}

pub struct TypeLibrary {
    nodes: UniqueArena<TypeNode>,
    composites: UniqueArena<CompositeType>,
    resources: UniqueArena<ResourceType>,
    functions: UniqueArena<FunctionSignature>,
}

impl Default for TypeLibrary {
    fn default() -> Self {
        TypeLibrary {
            nodes: UniqueArena::new(),
            composites: UniqueArena::new(),
            resources: UniqueArena::new(),
            functions: UniqueArena::new(),
        }
    }
}

impl TypeLibrary {
    pub fn new() -> Self {
        Default::default()
    }

    fn make(&mut self, kind: TypeBaseKind, array_counts: SmallVec<[u32; 2]>) -> DataType {
        let core = self.nodes.add(TypeNode { kind, array_counts });
        DataType { core, flags: TypeFlags::empty() }
    }

    fn scalar(&mut self, base: BaseType) -> DataType {
        self.make(TypeBaseKind::Scalar(base), SmallVec::new())
    }

    pub fn void_type(&mut self) -> DataType {
        self.scalar(BaseType::Void)
    }

    pub fn boolean_type(&mut self, n: u8) -> DataType {
        self.simple_composite_type(BaseType::Bool, n, 1)
    }

    pub fn integer_type(&mut self, n: u8) -> DataType {
        self.simple_composite_type(BaseType::Int, n, 1)
    }

    pub fn unsigned_type(&mut self, n: u8) -> DataType {
        self.simple_composite_type(BaseType::Uint, n, 1)
    }

    pub fn float_type(&mut self, n: u8) -> DataType {
        self.simple_composite_type(BaseType::Float, n, 1)
    }

    /// `simpleCompositeType(base, cols[, rows])` (spec §4.1). Scalars
    /// (`cols == 1 && rows == 1`) are returned directly without creating a
    /// composite; repeated calls with the same arguments return the same
    /// interned handle (spec §8 property 1).
    pub fn simple_composite_type(&mut self, base: BaseType, cols: u8, rows: u8) -> DataType {
        if cols <= 1 && rows <= 1 {
            return self.scalar(base);
        }
        let hint = if rows > 1 { CompositeHint::Matrix } else { CompositeHint::Vector };
        let name = composite_name(base, cols, rows);
        let composite = CompositeType {
            name,
            hint,
            element_base: base,
            cols,
            rows,
            members: Vec::new(),
        };
        let cid = self.composites.add(composite);
        self.make(TypeBaseKind::Composite(cid), SmallVec::new())
    }

    pub fn struct_type(&mut self, name: impl Into<SmolStr>, members: Vec<Member>) -> DataType {
        let composite = CompositeType {
            name: name.into(),
            hint: CompositeHint::Struct,
            element_base: BaseType::Void,
            cols: 1,
            rows: 1,
            members,
        };
        let cid = self.composites.add(composite);
        self.make(TypeBaseKind::Composite(cid), SmallVec::new())
    }

    /// Wraps an already-interned `CompositeType` (e.g. a structured
    /// buffer's element layout, stored by `Id` on `ResourceType`) back into
    /// a `DataType` handle.
    pub fn composite_type_handle(&mut self, id: Id<CompositeType>) -> DataType {
        self.make(TypeBaseKind::Composite(id), SmallVec::new())
    }

    pub fn resource_type(&mut self, resource: ResourceType) -> DataType {
        let rid = self.resources.add(resource);
        self.make(TypeBaseKind::Resource(rid), SmallVec::new())
    }

    pub fn program_type(&mut self, program: Id<Program>) -> DataType {
        self.make(TypeBaseKind::Program(program), SmallVec::new())
    }

    pub fn function_type(&mut self, signature: FunctionSignature) -> DataType {
        let fid = self.functions.add(signature);
        self.make(TypeBaseKind::Function(fid), SmallVec::new())
    }

    pub fn packed_format_element_type(&mut self, format: PackedFormat) -> DataType {
        format.element_type(self)
    }

    pub fn composite(&self, ty: DataType) -> Option<&CompositeType> {
        match &self.nodes[ty.core].kind {
            TypeBaseKind::Composite(id) => Some(&self.composites[*id]),
            _ => None,
        }
    }

    pub fn resource(&self, ty: DataType) -> Option<&ResourceType> {
        match &self.nodes[ty.core].kind {
            TypeBaseKind::Resource(id) => Some(&self.resources[*id]),
            _ => None,
        }
    }

    pub fn program(&self, ty: DataType) -> Option<Id<Program>> {
        match &self.nodes[ty.core].kind {
            TypeBaseKind::Program(id) => Some(*id),
            _ => None,
        }
    }

    pub fn function_signature(&self, ty: DataType) -> Option<&FunctionSignature> {
        match &self.nodes[ty.core].kind {
            TypeBaseKind::Function(id) => Some(&self.functions[*id]),
            _ => None,
        }
    }

    fn array_counts(&self, ty: DataType) -> &[u32] {
        &self.nodes[ty.core].array_counts
    }

    /// `GetArrayInnerType`: `int[5] -> int`; peels exactly one dimension.
    pub fn array_inner_type(&mut self, ty: DataType) -> Option<DataType> {
        let node = &self.nodes[ty.core];
        if node.array_counts.is_empty() {
            return None;
        }
        let mut counts = node.array_counts.clone();
        counts.remove(0);
        let kind = node.kind.clone();
        Some(self.make(kind, counts))
    }

    /// Builds `element[count, ...outer_counts] of inner`, pushing `count`
    /// as the new outermost dimension.
    pub fn array_of(&mut self, inner: DataType, count: u32) -> DataType {
        let node = &self.nodes[inner.core];
        let mut counts = node.array_counts.clone();
        counts.push(count);
        let kind = node.kind.clone();
        self.make(kind, counts)
    }

    pub fn is_array(&self, ty: DataType) -> bool {
        !self.array_counts(ty).is_empty()
    }

    /// Outermost array dimension's element count (the exporter's
    /// `StubTypeDeclArray::arraySize`); `None` if `ty` is not an array.
    pub fn array_length(&self, ty: DataType) -> Option<u32> {
        self.array_counts(ty).first().copied()
    }

    pub fn is_composite(&self, ty: DataType) -> bool {
        matches!(self.nodes[ty.core].kind, TypeBaseKind::Composite(_))
    }

    pub fn is_resource(&self, ty: DataType) -> bool {
        matches!(self.nodes[ty.core].kind, TypeBaseKind::Resource(_))
    }

    pub fn is_function(&self, ty: DataType) -> bool {
        matches!(self.nodes[ty.core].kind, TypeBaseKind::Function(_))
    }

    pub fn is_void(&self, ty: DataType) -> bool {
        matches!(self.nodes[ty.core].kind, TypeBaseKind::Scalar(BaseType::Void)) && !self.is_array(ty)
    }

    pub fn is_numeric_scalar(&self, ty: DataType) -> bool {
        !self.is_array(ty) && matches!(self.nodes[ty.core].kind, TypeBaseKind::Scalar(b) if b.is_numeric())
    }

    /// `isBasedOnProgram`: nominal subtyping for program types (spec §4.3.2).
    pub fn program_compatible(&self, current: Id<Program>, required: Id<Program>, programs: &crate::arena::Arena<Program>) -> bool {
        programs[current].is_based_on(current, required, programs)
    }

    /// Total scalar-component width of `ty`: 1 for scalars, `cols * rows`
    /// for vector/matrix composites, the summed member widths for structs,
    /// multiplied by every array dimension. The folder (`fold.rs`) uses
    /// this to slice a flat `DataValue` by member or array element.
    pub fn scalar_width(&self, ty: DataType) -> usize {
        let node = &self.nodes[ty.core];
        let mut width = match &node.kind {
            TypeBaseKind::Scalar(_) => 1,
            TypeBaseKind::Composite(id) => {
                let c = &self.composites[*id];
                match c.hint {
                    CompositeHint::Vector | CompositeHint::Matrix => (c.cols as usize) * (c.rows.max(1) as usize),
                    CompositeHint::Struct => c.members.iter().map(|m| self.scalar_width(m.ty)).sum(),
                }
            }
            TypeBaseKind::Resource(_) | TypeBaseKind::Program(_) | TypeBaseKind::Function(_) => 1,
        };
        for &count in &node.array_counts {
            width *= count as usize;
        }
        width
    }

    /// Component offset of `composite.members[member_index]` within the
    /// struct's flat `DataValue` representation.
    pub fn member_component_offset(&self, composite: &CompositeType, member_index: usize) -> usize {
        composite.members[..member_index].iter().map(|m| self.scalar_width(m.ty)).sum()
    }
}

impl DataType {
    pub fn with_reference(self, is_reference: bool) -> DataType {
        let mut flags = self.flags;
        flags.set(TypeFlags::REFERENCE, is_reference);
        DataType { core: self.core, flags }
    }

    pub fn with_atomic(self, is_atomic: bool) -> DataType {
        let mut flags = self.flags;
        flags.set(TypeFlags::ATOMIC, is_atomic);
        DataType { core: self.core, flags }
    }

    pub fn is_reference(self) -> bool {
        self.flags.contains(TypeFlags::REFERENCE)
    }

    pub fn is_atomic(self) -> bool {
        self.flags.contains(TypeFlags::ATOMIC)
    }

    /// The pointee of a reference type (spec §4.3 `Load`: "child must be a
    /// reference; result is its pointee").
    pub fn dereferenced(self) -> DataType {
        self.with_reference(false)
    }

    /// Structural identity, ignoring reference/atomic modifier flags.
    pub fn same_core(self, other: DataType) -> bool {
        self.core == other.core
    }
}

fn composite_name(base: BaseType, cols: u8, rows: u8) -> SmolStr {
    let prefix = match base {
        BaseType::Float => "",
        BaseType::Int => "i",
        BaseType::Uint => "u",
        BaseType::Bool => "b",
        BaseType::Void => "?",
    };
    if rows > 1 {
        SmolStr::new(format!("{prefix}mat{rows}x{cols}"))
    } else {
        SmolStr::new(format!("{prefix}vec{cols}"))
    }
}

//------------------------------------------------------------------------
// Extraction helpers (spec §4.1)
//------------------------------------------------------------------------

/// For scalars: the scalar's own base type. For vector/matrix composites:
/// the element base type. Anything else returns `None`.
pub fn extract_base_type(lib: &TypeLibrary, ty: DataType) -> Option<BaseType> {
    if lib.is_array(ty) {
        return None;
    }
    match &lib.nodes[ty.core].kind {
        TypeBaseKind::Scalar(b) => Some(*b),
        TypeBaseKind::Composite(id) => {
            let c = &lib.composites[*id];
            match c.hint {
                CompositeHint::Vector | CompositeHint::Matrix => Some(c.element_base),
                CompositeHint::Struct => None,
            }
        }
        _ => None,
    }
}

/// Number of columns/components; 1 for scalars, 0 for types this doesn't
/// apply to.
pub fn extract_component_count(lib: &TypeLibrary, ty: DataType) -> u32 {
    if lib.is_array(ty) {
        return 0;
    }
    match &lib.nodes[ty.core].kind {
        TypeBaseKind::Scalar(_) => 1,
        TypeBaseKind::Composite(id) => lib.composites[*id].cols as u32,
        _ => 0,
    }
}

/// Number of rows; 1 for scalars and vectors, >=2 for matrices, 0 otherwise.
pub fn extract_row_count(lib: &TypeLibrary, ty: DataType) -> u32 {
    if lib.is_array(ty) {
        return 0;
    }
    match &lib.nodes[ty.core].kind {
        TypeBaseKind::Scalar(_) => 1,
        TypeBaseKind::Composite(id) => lib.composites[*id].rows.max(1) as u32,
        _ => 0,
    }
}

pub fn can_swizzle(lib: &TypeLibrary, ty: DataType) -> bool {
    if lib.is_array(ty) {
        return false;
    }
    match &lib.nodes[ty.core].kind {
        TypeBaseKind::Scalar(b) => b.is_numeric(),
        TypeBaseKind::Composite(id) => lib.composites[*id].hint == CompositeHint::Vector,
        _ => false,
    }
}

pub fn can_use_component_mask(lib: &TypeLibrary, ty: DataType, components_needed: u32) -> bool {
    can_swizzle(lib, ty) && components_needed <= extract_component_count(lib, ty).max(1)
}

/// `GetCastedType`: same shape, different scalar base (spec §4.1).
pub fn get_casted_type(lib: &mut TypeLibrary, ty: DataType, base: BaseType) -> DataType {
    let cols = extract_component_count(lib, ty).max(1) as u8;
    let rows = extract_row_count(lib, ty).max(1) as u8;
    lib.simple_composite_type(base, cols, rows).with_reference(false)
}

/// `GetContractedType`: same base, fewer components (vector/matrix -> smaller vector, or scalar).
pub fn get_contracted_type(lib: &mut TypeLibrary, ty: DataType, component_count: u32) -> DataType {
    let base = extract_base_type(lib, ty).unwrap_or(BaseType::Float);
    lib.simple_composite_type(base, component_count.max(1) as u8, 1)
}

/// `GetExpandedType`: scalar -> vector of `n` components, broadcasting the
/// scalar (spec §4.1 "scalar/vector expansion").
pub fn get_expanded_type(lib: &mut TypeLibrary, ty: DataType, n: u8) -> DataType {
    let base = extract_base_type(lib, ty).unwrap_or(BaseType::Float);
    lib.simple_composite_type(base, n, 1)
}

pub fn get_array_inner_type(lib: &mut TypeLibrary, ty: DataType) -> Option<DataType> {
    lib.array_inner_type(ty)
}

//------------------------------------------------------------------------
// Type matching (spec §4.3.2)
//------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Conversion {
    Matches,
    ToBool,
    ToInt,
    ToUint,
    ToFloat,
    NoMatch,
}

impl Conversion {
    /// Only the `toX` scalar-base conversions are implicit when paired with
    /// `Matches`-level shape agreement; everything else needs an explicit
    /// cast or a `Const` operand.
    pub fn is_implicit(self) -> bool {
        matches!(self, Conversion::Matches | Conversion::ToBool | Conversion::ToInt | Conversion::ToUint | Conversion::ToFloat)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExpandMode {
    ExpandTo(u8),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MatchResult {
    pub conversion: Conversion,
    pub expansion: Option<ExpandMode>,
}

impl MatchResult {
    pub fn no_match() -> Self {
        MatchResult { conversion: Conversion::NoMatch, expansion: None }
    }

    pub fn is_match(&self) -> bool {
        self.conversion != Conversion::NoMatch
    }
}

fn scalar_conversion(from: BaseType, to: BaseType) -> Conversion {
    if from == to {
        return Conversion::Matches;
    }
    match to {
        BaseType::Bool => Conversion::ToBool,
        BaseType::Int => Conversion::ToInt,
        BaseType::Uint => Conversion::ToUint,
        BaseType::Float => Conversion::ToFloat,
        BaseType::Void => Conversion::NoMatch,
    }
}

/// `MatchType(current, required)` (spec §4.3.2).
pub fn match_type(lib: &TypeLibrary, programs: &crate::arena::Arena<Program>, current: DataType, required: DataType) -> MatchResult {
    if current.same_core(required) {
        return MatchResult { conversion: Conversion::Matches, expansion: None };
    }

    // Nominal subtyping for program types.
    if let (Some(cur_prog), Some(req_prog)) = (lib.program(current), lib.program(required)) {
        return if lib.program_compatible(cur_prog, req_prog, programs) {
            MatchResult { conversion: Conversion::Matches, expansion: None }
        } else {
            MatchResult::no_match()
        };
    }

    if lib.is_array(current) || lib.is_array(required) {
        return MatchResult::no_match();
    }

    let cur_base = extract_base_type(lib, current);
    let req_base = extract_base_type(lib, required);
    let cur_cols = extract_component_count(lib, current);
    let req_cols = extract_component_count(lib, required);
    let cur_rows = extract_row_count(lib, current);
    let req_rows = extract_row_count(lib, required);

    match (cur_base, req_base) {
        (Some(cb), Some(rb)) if cur_rows <= 1 && req_rows <= 1 => {
            if cur_cols == req_cols {
                MatchResult { conversion: scalar_conversion(cb, rb), expansion: None }
            } else if cur_cols == 1 && req_cols > 1 {
                MatchResult { conversion: scalar_conversion(cb, rb), expansion: Some(ExpandMode::ExpandTo(req_cols as u8)) }
            } else {
                MatchResult::no_match()
            }
        }
        _ => MatchResult::no_match(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    fn lib() -> TypeLibrary {
        TypeLibrary::new()
    }

    #[test]
    fn interning_is_pointer_equal() {
        let mut lib = lib();
        let a = lib.simple_composite_type(BaseType::Float, 4, 1);
        let b = lib.simple_composite_type(BaseType::Float, 4, 1);
        assert_eq!(a, b);
        let c = lib.simple_composite_type(BaseType::Float, 3, 1);
        assert_ne!(a, c);
    }

    #[test]
    fn scalars_skip_composite_creation() {
        let mut lib = lib();
        let f = lib.float_type(1);
        assert!(!lib.is_composite(f));
        assert_eq!(extract_component_count(&lib, f), 1);
        assert_eq!(extract_row_count(&lib, f), 1);
    }

    #[test]
    fn match_reflexive_for_every_constructed_type() {
        let mut lib = lib();
        let programs = Arena::new();
        let candidates = [
            lib.void_type(),
            lib.float_type(1),
            lib.float_type(4),
            lib.integer_type(2),
            lib.simple_composite_type(BaseType::Float, 4, 4),
        ];
        for t in candidates {
            assert_eq!(match_type(&lib, &programs, t, t).conversion, Conversion::Matches);
        }
    }

    #[test]
    fn float_to_int_is_the_to_int_conversion() {
        let mut lib = lib();
        let programs = Arena::new();
        let f = lib.float_type(1);
        let i = lib.integer_type(1);
        let m = match_type(&lib, &programs, f, i);
        assert_eq!(m.conversion, Conversion::ToInt);
        assert!(m.is_implicit());
    }

    #[test]
    fn scalar_expands_to_vector() {
        let mut lib = lib();
        let programs = Arena::new();
        let f = lib.float_type(1);
        let v4 = lib.float_type(4);
        let m = match_type(&lib, &programs, f, v4);
        assert_eq!(m.conversion, Conversion::Matches);
        assert_eq!(m.expansion, Some(ExpandMode::ExpandTo(4)));
    }

    #[test]
    fn array_inner_type_peels_one_dimension() {
        let mut lib = lib();
        let f = lib.float_type(4);
        let arr = lib.array_of(f, 5);
        assert!(lib.is_array(arr));
        let inner = get_array_inner_type(&mut lib, arr).unwrap();
        assert_eq!(inner, f);
        assert!(get_array_inner_type(&mut lib, f).is_none());
    }
}
