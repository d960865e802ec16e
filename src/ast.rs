//! The AST the resolver, folder and exporter all operate on (spec §3
//! `CodeNode`). Nodes live in an `Arena<CodeNode>` and reference each other
//! by `Id<CodeNode>`; a node starts life with `data_type: None` and
//! `types_resolved: false` and is filled in by `resolve.rs`.
//!
//! Grounded on `ashley/src/ast.rs`'s `Expr`/opcode shape (tagged node +
//! children + extra payload) and on the opcode semantics documented per-case
//! in `original_source/.../renderingShaderCodeNode_TypeResolve.cpp`.

use crate::arena::Id;
use crate::diagnostics::Location;
use crate::program::{BuiltinParameter, Function, Program};
use crate::types::DataType;
use crate::value::DataValue;
use smallvec::SmallVec;
use smol_str::SmolStr;

/// The closed set of AST node kinds (spec §3). Anything not in this list is
/// out of scope (there is no user-definable opcode).
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display)]
pub enum OpCode {
    /// No-op placeholder; folds away to nothing.
    Nop,
    /// A literal constant; carries its value directly in `CodeNode::value`.
    Const,
    /// An unresolved name reference; `MutateNode` rewrites this into a
    /// `ParameterRef`/`FunctionRef`-carrying node once the name is linked.
    Ident,
    /// `a.b` / swizzle (`v.xyz`) — carries a `Mask` or a struct member index
    /// in `ExtraData`.
    AccessMember,
    /// `a[i]` — arrays, and resource element access
    /// (`Image`/`Buffer`/... dispatch, spec §4.3.1).
    AccessArray,
    /// Dereferences a reference-typed child to an rvalue.
    Load,
    /// Stores into a reference-typed child.
    Store,
    /// A call to a native function or a user-defined `Function`.
    Call,
    /// Legal only inside a program's member function; resolves to the
    /// enclosing program's type (spec §4.3 rule `This`).
    This,
    /// `ProgramName{ a: v, ... }` — each child is a `ProgramInstanceParam`;
    /// resolves/folds to a `ProgramInstance` constant (spec §4.3 rule
    /// `ProgramInstance`, §4.5).
    ProgramInstance,
    /// One `name: value` binding inside a `ProgramInstance` literal; carries
    /// the parameter name in `ExtraData::Name` and the value as its sole
    /// child.
    ProgramInstanceParam,
    /// A reference to the implicit table of resource/descriptor members
    /// visible to the enclosing program; folds away once its single member
    /// access is known (spec §3's `extraData` "resource-table pointer").
    ResourceTable,
    /// Constructs a matrix from its children; stays symbolic (never folds
    /// to `Const`, DESIGN.md open question 1).
    CreateMatrix,
    /// An explicit or implicit cast, inserted by `MatchType`'s conversion
    /// rules or written directly in source.
    Cast,
    /// `cond ? then : else` / `if (cond) { } else { }`.
    IfElse,
    /// A bounded loop; folding can prune it entirely if the folder proves
    /// the trip count is zero.
    Loop,
    Break,
    Continue,
    Return,
    /// Introduces a new lexical scope; `declarations` on the node lists the
    /// `DataParameter`s declared directly inside it.
    Scope,
    /// A local variable declaration, optionally with an initializer child.
    VariableDecl,
    Assign,
    /// `+=` etc.; resolver desugars this to `Store(Load(lhs) op rhs)` but
    /// keeps the opcode for diagnostics/locations.
    CompoundAssign,
    ExprStatement,
}

impl OpCode {
    pub fn is_statement(self) -> bool {
        matches!(
            self,
            OpCode::IfElse | OpCode::Loop | OpCode::Break | OpCode::Continue | OpCode::Return | OpCode::Scope | OpCode::VariableDecl | OpCode::ExprStatement
        )
    }
}

/// A parsed swizzle/component mask (`.xyzw`, `.rgba`), up to 4 components,
/// each a 0-based index into the source vector.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ComponentMask {
    pub components: [u8; 4],
    pub len: u8,
}

impl ComponentMask {
    /// Sentinel component indices outside the 0-3 range a real component
    /// could take: `v.wyz0` reads three components of `v` and a literal
    /// zero of the base type (spec §8 property 4).
    pub const ZERO: u8 = 4;
    pub const ONE: u8 = 5;

    pub fn single(index: u8) -> Self {
        ComponentMask { components: [index, 0, 0, 0], len: 1 }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.components[..self.len as usize]
    }

    /// Parses `xyzw`/`rgba`/`stpq` style swizzles, with `0`/`1` digits
    /// anywhere in the mask standing for a literal zero/one of the base
    /// type rather than indexing into the source value.
    ///
    /// Returns `None` on mixed component-name families or an empty/too-long
    /// mask.
    pub fn parse(text: &str) -> Option<ComponentMask> {
        if text.is_empty() || text.len() > 4 {
            return None;
        }
        const FAMILIES: [&[u8]; 3] = [b"xyzw", b"rgba", b"stpq"];
        let mut components = [0u8; 4];
        let mut len = 0u8;
        let mut family: Option<usize> = None;
        for ch in text.bytes() {
            match ch {
                b'0' => {
                    components[len as usize] = ComponentMask::ZERO;
                    len += 1;
                    continue;
                }
                b'1' => {
                    components[len as usize] = ComponentMask::ONE;
                    len += 1;
                    continue;
                }
                _ => {}
            }
            let lower = ch.to_ascii_lowercase();
            let (fam_idx, comp_idx) = FAMILIES.iter().enumerate().find_map(|(fi, fam)| fam.iter().position(|&c| c == lower).map(|ci| (fi, ci)))?;
            match family {
                None => family = Some(fam_idx),
                Some(f) if f != fam_idx => return None,
                _ => {}
            }
            components[len as usize] = comp_idx as u8;
            len += 1;
        }
        Some(ComponentMask { components, len })
    }

    /// `X`/`XX`/`XXX`/`XXXX`-style "all same component" masks the resolver
    /// uses when expanding a scalar-write mask (spec §4.1's swizzle note).
    pub fn repeated(index: u8, count: u8) -> ComponentMask {
        let mut components = [0u8; 4];
        for slot in components.iter_mut().take(count as usize) {
            *slot = index;
        }
        ComponentMask { components, len: count }
    }

    pub fn is_writable(&self) -> bool {
        // A mask with repeated components (`v.xx = ...`) or a literal
        // zero/one component (`v.x0`) cannot be an lvalue.
        let seen = self.as_slice();
        seen.iter().all(|&c| c < ComponentMask::ZERO) && seen.iter().enumerate().all(|(i, c)| !seen[..i].contains(c))
    }
}

/// Where a `DataParameter` lives (spec §4.4 scope list).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, strum::Display)]
pub enum DataParameterScope {
    StaticConstant,
    GlobalConst,
    GlobalParameter,
    GlobalBuiltin,
    VertexInput,
    StageInput,
    StageOutput,
    GroupShared,
    FunctionInput,
    ScopeLocal,
    Export,
}

/// A `name: args...` tag on a parameter, function, or descriptor member
/// (§C "Attribute parsing"): `layout(location=0)`, `early_fragment_tests`,
/// `local_size_x`, `readonly`, `const`.
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    pub name: SmolStr,
    pub args: SmallVec<[DataValue; 2]>,
}

impl Attribute {
    pub fn flag(name: impl Into<SmolStr>) -> Self {
        Attribute { name: name.into(), args: SmallVec::new() }
    }
}

pub fn find_attribute<'a>(attributes: &'a [Attribute], name: &str) -> Option<&'a Attribute> {
    attributes.iter().find(|a| a.name == name)
}

pub fn int_attribute(attributes: &[Attribute], name: &str) -> Option<i64> {
    find_attribute(attributes, name).and_then(|a| a.args.first()).and_then(|v| match v.get(0) {
        crate::value::DataValueComponent::Int32(i) => Some(*i as i64),
        crate::value::DataValueComponent::Uint32(u) => Some(*u as i64),
        crate::value::DataValueComponent::Int64(i) => Some(*i),
        crate::value::DataValueComponent::Uint64(u) => Some(*u as i64),
        _ => None,
    })
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataParameter {
    pub name: SmolStr,
    pub scope: DataParameterScope,
    pub ty: DataType,
    pub attributes: Vec<Attribute>,
    pub location: Location,
    /// The parsed initializer AST (spec §3). `global-const`/`static-constant`
    /// parameters fold this when no instance value overrides it; `None` for
    /// parameters the source never gave a default.
    pub initializer: Option<Id<CodeNode>>,
    /// For a `global-parameter` synthesized from a descriptor member, the
    /// name of the descriptor it belongs to (spec §3 "resource-table
    /// back-references for globals"). `None` for every other scope.
    pub resource_table: Option<SmolStr>,
    /// For `global-builtin`-scoped parameters, which enumerated `gl_*`
    /// variable this is (spec §3 "for builtins the enumerated builtin
    /// kind").
    pub builtin: Option<BuiltinParameter>,
}

impl DataParameter {
    /// Builds a parameter with no initializer, resource-table back-reference
    /// or builtin kind — the common case for locals, function inputs, and
    /// stage IO.
    pub fn plain(name: impl Into<SmolStr>, scope: DataParameterScope, ty: DataType, attributes: Vec<Attribute>, location: Location) -> Self {
        DataParameter { name: name.into(), scope, ty, attributes, location, initializer: None, resource_table: None, builtin: None }
    }
}

/// Payload carried by opcodes that need more than children (spec §3
/// `extraData`).
#[derive(Clone, Debug, PartialEq)]
pub enum ExtraData {
    None,
    Name(SmolStr),
    Mask(ComponentMask),
    ParameterRef(Id<DataParameter>),
    FunctionRef(Id<Function>),
    MemberIndex(u32),
    Attributes(Vec<Attribute>),
    /// The target program of a `ProgramInstance` literal.
    ProgramRef(Id<Program>),
}

/// One AST node. `data_type`/`value` start empty and are filled in by
/// `resolve.rs`/`fold.rs`; `declarations` is only meaningful on `Scope`
/// nodes (and the implicit function-body scope).
#[derive(Clone, Debug)]
pub struct CodeNode {
    pub opcode: OpCode,
    pub location: Location,
    pub children: SmallVec<[Id<CodeNode>; 4]>,
    pub extra: ExtraData,
    pub data_type: Option<DataType>,
    pub value: Option<DataValue>,
    pub declarations: Vec<Id<DataParameter>>,
    pub types_resolved: bool,
}

impl CodeNode {
    pub fn new(opcode: OpCode, location: Location) -> Self {
        CodeNode {
            opcode,
            location,
            children: SmallVec::new(),
            extra: ExtraData::None,
            data_type: None,
            value: None,
            declarations: Vec::new(),
            types_resolved: false,
        }
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Id<CodeNode>>) -> Self {
        self.children = children.into_iter().collect();
        self
    }

    pub fn with_extra(mut self, extra: ExtraData) -> Self {
        self.extra = extra;
        self
    }

    pub fn with_value(mut self, ty: DataType, value: DataValue) -> Self {
        self.data_type = Some(ty);
        self.value = Some(value);
        self.types_resolved = true;
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.types_resolved && self.data_type.is_some()
    }

    pub fn is_constant(&self) -> bool {
        self.opcode == OpCode::Const && self.value.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swizzle_parses_same_family_only() {
        assert_eq!(ComponentMask::parse("xyz").unwrap().as_slice(), &[0, 1, 2]);
        assert_eq!(ComponentMask::parse("rgba").unwrap().as_slice(), &[0, 1, 2, 3]);
        assert!(ComponentMask::parse("xr").is_none());
        assert!(ComponentMask::parse("").is_none());
        assert!(ComponentMask::parse("xyzwx").is_none());
    }

    #[test]
    fn repeated_mask_is_not_writable() {
        let mask = ComponentMask::parse("xx").unwrap();
        assert!(!mask.is_writable());
        let mask = ComponentMask::parse("xy").unwrap();
        assert!(mask.is_writable());
    }

    #[test]
    fn zero_and_one_digits_parse_as_literal_components() {
        let mask = ComponentMask::parse("wyz0").unwrap();
        assert_eq!(mask.as_slice(), &[3, 1, 2, ComponentMask::ZERO]);
        assert!(!mask.is_writable());

        let mask = ComponentMask::parse("x1").unwrap();
        assert_eq!(mask.as_slice(), &[0, ComponentMask::ONE]);
    }

    #[test]
    fn node_builder_round_trips_children() {
        use crate::arena::Arena;
        let mut arena: Arena<CodeNode> = Arena::new();
        let leaf = arena.push(CodeNode::new(OpCode::Nop, Location::UNKNOWN));
        let parent = CodeNode::new(OpCode::Scope, Location::UNKNOWN).with_children([leaf]);
        assert_eq!(parent.children.as_slice(), &[leaf]);
    }
}
