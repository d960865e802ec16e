//! Semantic resolver (spec §4.3): two logical passes over a function body,
//! `MutateNode` (structural rewrites: hoist local declarations into their
//! enclosing `Scope`, desugar `CompoundAssign`) and `ResolveTypes` (a single
//! post-order walk that fills in every node's `data_type`, inserts implicit
//! casts per `MatchType`, and resolves `Ident`/`Call`/`AccessMember`/
//! `AccessArray` against the program's declarations and the native-function
//! registry).
//!
//! Grounded on
//! `original_source/.../renderingShaderCodeNode_TypeResolve.cpp`; errors
//! report through `IErrorReporter` and never abort the walk (spec §7 — the
//! driver checks `error_count()` between phases, not mid-resolve).

use crate::ast::{CodeNode, ComponentMask, DataParameter, DataParameterScope, ExtraData, OpCode};
use crate::diagnostics::{IErrorReporter, Location};
use crate::program::{BuiltinParameter, CodeLibrary, DescriptorEntry, Program};
use crate::types::{self, BaseType, DataType, FunctionSignature};
use crate::arena::Id;
use tracing::{debug, warn};

/// Outcome of tier (e) of `Ident` resolution (spec §4.3: "all descriptor
/// entries known to the compilation, reporting ambiguity if more than one
/// matches").
enum DescriptorLookup {
    NotFound,
    Found(Id<DataParameter>),
    Ambiguous,
}

/// Resolver state for a single function body. Holds the lexical scope
/// stack (innermost last) and the enclosing program, if any, for
/// parameter/function lookups that fall through past local scopes.
pub struct Resolver<'a> {
    pub lib: &'a mut CodeLibrary,
    pub reporter: &'a mut dyn IErrorReporter,
    pub program: Option<Id<Program>>,
    scope_stack: Vec<Id<CodeNode>>,
    expected_return: Option<DataType>,
}

impl<'a> Resolver<'a> {
    pub fn new(lib: &'a mut CodeLibrary, reporter: &'a mut dyn IErrorReporter, program: Option<Id<Program>>) -> Self {
        Resolver { lib, reporter, program, scope_stack: Vec::new(), expected_return: None }
    }

    /// Resolves `body`, first registering `params` into its top-level scope
    /// so the function's own input parameters are visible to `Ident` lookup
    /// tier (c) (spec §4.3 rule `Ident`(c): "function's input parameters").
    pub fn resolve_function_body(&mut self, body: Id<CodeNode>, params: &[Id<DataParameter>], return_type: DataType) {
        debug!(body = ?body, "resolving function body");
        self.expected_return = Some(return_type);
        for &param in params {
            self.lib.nodes[body].declarations.push(param);
        }
        self.resolve_node(body);
    }

    fn current_scope_declare(&mut self, param: Id<DataParameter>) {
        if let Some(&scope) = self.scope_stack.last() {
            self.lib.nodes[scope].declarations.push(param);
        }
    }

    /// Tiers (b) and (c): enclosing scopes, innermost first, down to the
    /// function body's own scope (which also holds the function's input
    /// parameters, pushed there by `resolve_function_body`).
    fn lookup_scope(&self, name: &str) -> Option<Id<DataParameter>> {
        for &scope in self.scope_stack.iter().rev() {
            if let Some(&id) = self.lib.nodes[scope].declarations.iter().find(|&&id| self.lib.parameters[id].name == name) {
                return Some(id);
            }
        }
        None
    }

    /// Tier (d): the enclosing program's own parameters, then its ancestors'
    /// (`Program::find_parameter` already walks `self` before `parents`).
    fn lookup_program_parameter(&self, name: &str) -> Option<Id<DataParameter>> {
        self.program.and_then(|p| self.lib.programs[p].find_parameter(name, &self.lib.programs, &self.lib.parameters))
    }

    /// Tier (e): every descriptor entry known to the compilation, reporting
    /// an error instead of returning a guess when more than one entry shares
    /// `name` (spec §4.3 rule `Ident`(e)).
    fn lookup_descriptor_member(&mut self, name: &str) -> DescriptorLookup {
        let matches: Vec<usize> = self.lib.descriptor_entries.iter().enumerate().filter(|(_, e)| e.member.as_str() == name).map(|(i, _)| i).collect();
        match matches.len() {
            0 => DescriptorLookup::NotFound,
            1 => {
                let entry = self.lib.descriptor_entries[matches[0]].clone();
                DescriptorLookup::Found(self.descriptor_parameter(entry))
            }
            _ => DescriptorLookup::Ambiguous,
        }
    }

    /// Synthesizes (or reuses) the `DataParameter` a descriptor entry
    /// resolves to; resource-typed members get the `res:<descriptor>.<entry>`
    /// dotted name `fold_ident` expects, non-resource members (e.g. a
    /// constant-buffer struct) keep their bare member name.
    fn descriptor_parameter(&mut self, entry: DescriptorEntry) -> Id<DataParameter> {
        let name = if self.lib.types.resource(entry.ty).is_some() {
            format!("{}.{}", entry.descriptor, entry.member)
        } else {
            entry.member.to_string()
        };
        self.lib.create_descriptor_element_reference(name, entry.ty, entry.attributes, Some(entry.descriptor))
    }

    /// The GLSL type of a builtin variable (spec §4.4's closed enumeration);
    /// per-component arrays (`gl_ClipDistance`, `gl_TessLevelOuter/Inner`)
    /// are represented at their single-element type since this crate has no
    /// fixed-size array literal syntax to anchor their length to.
    fn builtin_type(&mut self, builtin: BuiltinParameter) -> DataType {
        use BuiltinParameter::*;
        match builtin {
            Position | PositionIn | FragCoord | Target0 | Target1 | Target2 | Target3 | Target4 | Target5 | Target6 | Target7 => self.lib.types.float_type(4),
            TessCoord => self.lib.types.float_type(3),
            PointCoord | SamplePosition => self.lib.types.float_type(2),
            PointSize | PointSizeIn | ClipDistance | TessLevelOuter | TessLevelInner | FragDepth => self.lib.types.float_type(1),
            FrontFacing => self.lib.types.boolean_type(1),
            NumWorkGroups | GlobalInvocationId | LocalInvocationId | WorkGroupId => self.lib.types.unsigned_type(3),
            LocalInvocationIndex | SampleId | SampleMaskIn | SampleMask => self.lib.types.unsigned_type(1),
            VertexId | InstanceId | DrawId | BaseVertex | BaseInstance | PatchVerticesIn | PrimitiveId | PrimitiveIdIn | InvocationId | Layer | ViewportIndex => self.lib.types.integer_type(1),
        }
    }

    /// The single post-order resolution walk. Pushes/pops `Scope` nodes on
    /// the scope stack around their children so `Ident` lookups see the
    /// innermost declarations first.
    pub fn resolve_node(&mut self, id: Id<CodeNode>) {
        if self.lib.nodes[id].types_resolved {
            return;
        }

        let opcode = self.lib.nodes[id].opcode;
        let location = self.lib.nodes[id].location;

        if opcode == OpCode::Scope {
            self.scope_stack.push(id);
            let children: Vec<_> = self.lib.nodes[id].children.to_vec();
            for child in children {
                self.resolve_node(child);
            }
            self.scope_stack.pop();
            self.lib.nodes[id].data_type = Some(self.lib.types.void_type());
            self.lib.nodes[id].types_resolved = true;
            return;
        }

        if opcode == OpCode::VariableDecl {
            self.resolve_variable_decl(id);
            return;
        }

        // Every other opcode: resolve children first (post-order), then
        // this node.
        let children: Vec<_> = self.lib.nodes[id].children.to_vec();
        for child in children.iter() {
            self.resolve_node(*child);
        }

        match opcode {
            OpCode::Nop => self.finish_void(id),
            OpCode::Const => {
                // Constructed pre-resolved by whoever built the tree (the
                // parser, out of scope here; hand-built test trees set
                // `value`/`data_type` directly).
                self.lib.nodes[id].types_resolved = true;
            }
            OpCode::Ident => self.resolve_ident(id, location),
            OpCode::AccessMember => self.resolve_access_member(id, location),
            OpCode::AccessArray => self.resolve_access_array(id, location),
            OpCode::Load => self.resolve_load(id, location),
            OpCode::Store | OpCode::Assign => self.resolve_assign(id, location),
            OpCode::CompoundAssign => self.resolve_compound_assign(id, location),
            OpCode::Call => self.resolve_call(id, location),
            OpCode::CreateMatrix => self.resolve_create_matrix(id, location),
            OpCode::Cast => self.resolve_cast(id, location),
            OpCode::IfElse => self.resolve_if_else(id, location),
            OpCode::Loop => self.finish_void(id),
            OpCode::Break | OpCode::Continue => self.finish_void(id),
            OpCode::Return => self.resolve_return(id, location),
            OpCode::ExprStatement => self.finish_void(id),
            OpCode::This => self.resolve_this(id, location),
            OpCode::ProgramInstance => self.resolve_program_instance(id, location),
            OpCode::ProgramInstanceParam => self.resolve_program_instance_param(id),
            OpCode::ResourceTable => self.finish_void(id),
            OpCode::Scope | OpCode::VariableDecl => unreachable!("handled above"),
        }
    }

    fn finish(&mut self, id: Id<CodeNode>, ty: DataType) {
        self.lib.nodes[id].data_type = Some(ty);
        self.lib.nodes[id].types_resolved = true;
    }

    fn finish_void(&mut self, id: Id<CodeNode>) {
        let void_ty = self.lib.types.void_type();
        self.finish(id, void_ty);
    }

    fn resolve_variable_decl(&mut self, id: Id<CodeNode>) {
        let children: Vec<_> = self.lib.nodes[id].children.to_vec();
        for child in &children {
            self.resolve_node(*child);
        }
        let ty = children.first().and_then(|c| self.lib.nodes[*c].data_type).unwrap_or_else(|| self.lib.types.void_type());
        let name = match &self.lib.nodes[id].extra {
            ExtraData::Name(n) => n.clone(),
            _ => "<anonymous>".into(),
        };
        let location = self.lib.nodes[id].location;
        if children.is_empty() {
            warn!(%name, "declared without an initializer");
            self.reporter.report_warning(location, format!("variable '{name}' is declared without an initializer"));
        } else if let Some(value) = children.first().and_then(|c| self.lib.nodes[*c].value.clone()) {
            if !value.is_whole_value_defined() {
                warn!(%name, "only partially initialized");
                self.reporter.report_warning(location, format!("variable '{name}' is only partially initialized"));
            }
        }
        let param = self.lib.parameters.push(DataParameter::plain(name.clone(), DataParameterScope::ScopeLocal, ty, Vec::new(), location));
        self.lib.nodes[id].extra = ExtraData::ParameterRef(param);
        self.current_scope_declare(param);
        self.lib.nodes[id].data_type = Some(ty.with_reference(true));
        self.lib.nodes[id].types_resolved = true;
    }

    /// `Ident`: the 8-tier lookup order of spec §4.3 rule `Ident` — (a)
    /// `gl_`-prefixed builtins, (b) enclosing scopes, (c) function input
    /// parameters, (d) the enclosing program's own then inherited
    /// parameters/functions, (e) descriptor entries (ambiguity reported),
    /// (f) global constants, (g) global functions, (h) native functions.
    /// Tiers (b)/(c) and (d)/(f) each share one lookup: function input
    /// parameters live in the same body scope enclosing-scope lookup walks,
    /// and global constants are `Program`-scoped parameters `find_parameter`
    /// already reaches.
    fn resolve_ident(&mut self, id: Id<CodeNode>, location: Location) {
        let name = match &self.lib.nodes[id].extra {
            ExtraData::Name(n) => n.clone(),
            _ => {
                self.reporter.report_error(location, "identifier node missing a name");
                self.finish_void(id);
                return;
            }
        };

        // (a) gl_-prefixed builtins.
        if name.starts_with("gl_") {
            if let Some(builtin) = BuiltinParameter::from_glsl_name(&name) {
                let ty = self.builtin_type(builtin);
                let param = self.lib.create_builtin_parameter_reference(builtin, ty);
                let assignable = builtin.is_assignable();
                self.lib.nodes[id].extra = ExtraData::ParameterRef(param);
                self.finish(id, ty.with_reference(assignable));
                return;
            }
        }

        // (b)+(c) enclosing scopes, innermost first (function params live in
        // the outermost/body scope).
        if let Some(param) = self.lookup_scope(&name) {
            let ty = self.lib.parameters[param].ty.with_reference(true);
            self.lib.nodes[id].extra = ExtraData::ParameterRef(param);
            self.finish(id, ty);
            return;
        }

        // (d)+(f) the enclosing program's own/inherited parameters (global
        // constants are represented as `GlobalConst`-scoped program
        // parameters, so this one lookup covers both).
        if let Some(param) = self.lookup_program_parameter(&name) {
            let ty = self.lib.parameters[param].ty.with_reference(true);
            self.lib.nodes[id].extra = ExtraData::ParameterRef(param);
            self.finish(id, ty);
            return;
        }

        // (d) continued: the enclosing program's own/inherited functions.
        if let Some(p) = self.program {
            if let Some(f) = self.lib.programs[p].find_function(&name, &self.lib.programs, &self.lib.functions) {
                self.resolve_ident_to_function(id, f);
                return;
            }
        }

        // (e) descriptor entries, with ambiguity reported rather than
        // guessed.
        match self.lookup_descriptor_member(&name) {
            DescriptorLookup::Found(param) => {
                let ty = self.lib.parameters[param].ty;
                let is_ref = self.lib.types.resource(ty).is_none();
                self.lib.nodes[id].extra = ExtraData::ParameterRef(param);
                self.finish(id, ty.with_reference(is_ref));
                return;
            }
            DescriptorLookup::Ambiguous => {
                self.reporter.report_error(location, format!("'{name}' is ambiguous: matched by more than one descriptor entry"));
                self.finish_void(id);
                return;
            }
            DescriptorLookup::NotFound => {}
        }

        // (g) global functions.
        if let Some(&f) = self.lib.global_functions.iter().find(|&&f| self.lib.functions[f].name == name) {
            self.resolve_ident_to_function(id, f);
            return;
        }

        // (h) native functions.
        if crate::native::builtins().lookup(&name).is_some() {
            // Native functions have no `Id<Function>`; `Call` resolves them
            // by name directly, so a bare `Ident` reference just carries the
            // name forward rather than a function value.
            let void_ty = self.lib.types.void_type();
            self.finish(id, void_ty);
            return;
        }

        self.reporter.report_error(location, format!("unresolved identifier '{name}'"));
        self.finish_void(id);
    }

    fn resolve_ident_to_function(&mut self, id: Id<CodeNode>, function: Id<crate::program::Function>) {
        let f = &self.lib.functions[function];
        let signature = FunctionSignature { return_type: f.return_type, params: f.params.iter().map(|&p| self.lib.parameters[p].ty).collect() };
        let ty = self.lib.types.function_type(signature);
        self.lib.nodes[id].extra = ExtraData::FunctionRef(function);
        self.finish(id, ty);
    }

    /// `This`: legal only inside a program's own member function; yields
    /// `DataType(program)` (spec §4.3 rule `This`).
    fn resolve_this(&mut self, id: Id<CodeNode>, location: Location) {
        match self.program {
            Some(p) => {
                let ty = self.lib.types.program_type(p);
                self.finish(id, ty);
            }
            None => {
                self.reporter.report_error(location, "'this' used outside a program member function");
                self.finish_void(id);
            }
        }
    }

    /// `ProgramInstance`: `ProgramName{ a: v, ... }`. Looks up the named
    /// program, resolves each `ProgramInstanceParam` child, and coerces its
    /// value to the matching parameter's type (spec §4.3 rule
    /// `ProgramInstance`).
    fn resolve_program_instance(&mut self, id: Id<CodeNode>, location: Location) {
        let name = match &self.lib.nodes[id].extra {
            ExtraData::Name(n) => n.clone(),
            _ => {
                self.reporter.report_error(location, "program instance literal with no program name");
                self.finish_void(id);
                return;
            }
        };
        let program = self.lib.programs.iter_ids().find(|(_, p)| p.name == name).map(|(pid, _)| pid);
        let program = match program {
            Some(p) => p,
            None => {
                self.reporter.report_error(location, format!("unknown program '{name}'"));
                self.finish_void(id);
                return;
            }
        };

        for &child in self.lib.nodes[id].children.to_vec().iter() {
            self.resolve_node(child);
            let param_name = match &self.lib.nodes[child].extra {
                ExtraData::Name(n) => n.clone(),
                _ => continue,
            };
            let value_child = self.lib.nodes[child].children.first().copied();
            let target = self.lib.programs[program].find_parameter(&param_name, &self.lib.programs, &self.lib.parameters).map(|p| self.lib.parameters[p].ty);
            if let (Some(value_child), Some(target)) = (value_child, target) {
                let current = self.lib.nodes[value_child].data_type.unwrap_or_else(|| self.lib.types.void_type()).dereferenced();
                let m = types::match_type(&self.lib.types, &self.lib.programs, current, target);
                if !m.is_match() || !m.conversion.is_implicit() {
                    self.reporter.report_error(self.lib.nodes[child].location, format!("'{param_name}' is not assignable from its initializer's type"));
                }
            } else if target.is_none() {
                self.reporter.report_error(self.lib.nodes[child].location, format!("program '{name}' has no static constant named '{param_name}'"));
            }
        }

        self.lib.nodes[id].extra = ExtraData::ProgramRef(program);
        let ty = self.lib.types.program_type(program);
        self.finish(id, ty);
    }

    /// `ProgramInstanceParam`: a single `name: value` binding; resolves to
    /// its value child's (already-resolved) type.
    fn resolve_program_instance_param(&mut self, id: Id<CodeNode>) {
        let ty = self.lib.nodes[id].children.first().and_then(|&c| self.lib.nodes[c].data_type).unwrap_or_else(|| self.lib.types.void_type());
        self.finish(id, ty);
    }

    fn resolve_access_member(&mut self, id: Id<CodeNode>, location: Location) {
        let base = self.lib.nodes[id].children.first().copied();
        let base = match base {
            Some(b) => b,
            None => {
                self.reporter.report_error(location, "member access with no base expression");
                self.finish_void(id);
                return;
            }
        };
        let base_ty = self.lib.nodes[base].data_type.unwrap_or_else(|| self.lib.types.void_type());
        let name = match &self.lib.nodes[id].extra {
            ExtraData::Name(n) => n.clone(),
            _ => {
                self.reporter.report_error(location, "member access with no member name");
                self.finish_void(id);
                return;
            }
        };

        // `ResourceTable.member`: the same tier (e) lookup `Ident` uses,
        // reached through an explicit table reference instead of a bare
        // name (spec §3's `extraData` "resource-table pointer").
        if self.lib.nodes[base].opcode == OpCode::ResourceTable {
            match self.lookup_descriptor_member(&name) {
                DescriptorLookup::Found(param) => {
                    let ty = self.lib.parameters[param].ty;
                    let is_ref = self.lib.types.resource(ty).is_none();
                    self.lib.nodes[id].extra = ExtraData::ParameterRef(param);
                    self.finish(id, ty.with_reference(is_ref));
                }
                DescriptorLookup::Ambiguous => {
                    self.reporter.report_error(location, format!("'{name}' is ambiguous: matched by more than one descriptor entry"));
                    self.finish_void(id);
                }
                DescriptorLookup::NotFound => {
                    self.reporter.report_error(location, format!("no descriptor entry named '{name}'"));
                    self.finish_void(id);
                }
            }
            return;
        }

        let is_ref = base_ty.is_reference();

        if let Some(composite) = self.lib.types.composite(base_ty) {
            if composite.hint == crate::types::CompositeHint::Struct {
                if let Some(index) = composite.member_index(&name) {
                    let member_ty = composite.members[index].ty;
                    self.lib.nodes[id].extra = ExtraData::MemberIndex(index as u32);
                    self.finish(id, member_ty.with_reference(is_ref));
                    return;
                }
                self.reporter.report_error(location, format!("no member named '{name}' on struct"));
                self.finish_void(id);
                return;
            }
        }

        if types::can_swizzle(&self.lib.types, base_ty) {
            match ComponentMask::parse(&name) {
                Some(mask) if types::can_use_component_mask(&self.lib.types, base_ty, mask.len as u32) => {
                    let base_for_result = base_ty.dereferenced();
                    let result_ty = if mask.len == 1 {
                        types::get_contracted_type(&mut self.lib.types, base_for_result, 1)
                    } else {
                        types::get_contracted_type(&mut self.lib.types, base_for_result, mask.len as u32)
                    };
                    let writable = is_ref && mask.is_writable();
                    self.lib.nodes[id].extra = ExtraData::Mask(mask);
                    self.finish(id, result_ty.with_reference(writable));
                    return;
                }
                Some(_) => {
                    self.reporter.report_error(location, format!("swizzle '{name}' has too many components for this type"));
                }
                None => {
                    self.reporter.report_error(location, format!("'{name}' is not a valid swizzle"));
                }
            }
        } else {
            self.reporter.report_error(location, format!("type does not support member access '{name}'"));
        }
        self.finish_void(id);
    }

    fn resolve_access_array(&mut self, id: Id<CodeNode>, location: Location) {
        let (base, index) = {
            let children = &self.lib.nodes[id].children;
            (children.get(0).copied(), children.get(1).copied())
        };
        let (base, index) = match (base, index) {
            (Some(b), Some(i)) => (b, i),
            _ => {
                self.reporter.report_error(location, "array access requires a base and an index");
                self.finish_void(id);
                return;
            }
        };
        let base_ty = self.lib.nodes[base].data_type.unwrap_or_else(|| self.lib.types.void_type());
        let index_ty = self.lib.nodes[index].data_type.unwrap_or_else(|| self.lib.types.void_type());
        if types::extract_base_type(&self.lib.types, index_ty) != Some(BaseType::Int) && types::extract_base_type(&self.lib.types, index_ty) != Some(BaseType::Uint) {
            self.reporter.report_error(location, "array index must be an integer");
        }

        if let Some(resource) = self.lib.types.resource(base_ty).cloned() {
            use crate::types::DeviceObjectViewType::*;
            if !resource.view.is_array_accessible() {
                self.reporter.report_error(location, "this resource type does not support array access");
                self.finish_void(id);
                return;
            }
            let writable = matches!(resource.view, ImageWritable | BufferWritable | BufferStructuredWritable);
            if writable && resource.readonly {
                self.reporter.report_error(location, "cannot write through a readonly resource");
            }
            let element_ty = if let Some(layout) = resource.struct_layout {
                self.lib.types.composite_type_handle(layout)
            } else {
                match resource.element_format {
                    Some(fmt) => fmt.element_type(&mut self.lib.types),
                    None => self.lib.types.float_type(4),
                }
            };
            self.finish(id, element_ty.with_reference(writable || matches!(resource.view, Buffer | BufferStructured)));
            return;
        }

        if self.lib.types.is_array(base_ty) {
            match types::get_array_inner_type(&mut self.lib.types, base_ty) {
                Some(inner) => {
                    let is_ref = base_ty.is_reference();
                    self.finish(id, inner.with_reference(is_ref));
                }
                None => {
                    self.reporter.report_error(location, "not an array type");
                    self.finish_void(id);
                }
            }
            return;
        }

        self.reporter.report_error(location, "type does not support array indexing");
        self.finish_void(id);
    }

    fn resolve_load(&mut self, id: Id<CodeNode>, location: Location) {
        let child = self.lib.nodes[id].children.first().copied();
        let ty = child.and_then(|c| self.lib.nodes[c].data_type);
        match ty {
            Some(t) if t.is_reference() => self.finish(id, t.dereferenced()),
            Some(_) => {
                self.reporter.report_error(location, "Load requires a reference operand");
                self.finish_void(id);
            }
            None => self.finish_void(id),
        }
    }

    fn resolve_assign(&mut self, id: Id<CodeNode>, location: Location) {
        let (lhs, rhs) = {
            let children = &self.lib.nodes[id].children;
            (children.get(0).copied(), children.get(1).copied())
        };
        let (lhs, rhs) = match (lhs, rhs) {
            (Some(l), Some(r)) => (l, r),
            _ => {
                self.reporter.report_error(location, "assignment requires a target and a value");
                self.finish_void(id);
                return;
            }
        };
        let lhs_ty = self.lib.nodes[lhs].data_type.unwrap_or_else(|| self.lib.types.void_type());
        let rhs_ty = self.lib.nodes[rhs].data_type.unwrap_or_else(|| self.lib.types.void_type());
        if !lhs_ty.is_reference() {
            self.reporter.report_error(location, "left-hand side of assignment is not assignable");
        }
        let target = lhs_ty.dereferenced();
        let m = types::match_type(&self.lib.types, &self.lib.programs, rhs_ty, target);
        if !m.is_match() || !m.conversion.is_implicit() {
            self.reporter.report_error(location, "value type is not assignable to target type");
        }
        self.finish(id, target);
    }

    fn resolve_compound_assign(&mut self, id: Id<CodeNode>, location: Location) {
        let (lhs, rhs) = {
            let children = &self.lib.nodes[id].children;
            (children.get(0).copied(), children.get(1).copied())
        };
        let (lhs, rhs) = match (lhs, rhs) {
            (Some(l), Some(r)) => (l, r),
            _ => {
                self.reporter.report_error(location, "compound assignment requires a target and a value");
                self.finish_void(id);
                return;
            }
        };
        let lhs_ty = self.lib.nodes[lhs].data_type.unwrap_or_else(|| self.lib.types.void_type());
        if !lhs_ty.is_reference() {
            self.reporter.report_error(location, "left-hand side of compound assignment is not assignable");
        }
        let op_name = match &self.lib.nodes[id].extra {
            ExtraData::Name(n) => n.clone(),
            _ => "+=".into(),
        };
        let native_name = compound_native_name(&op_name);
        let target = lhs_ty.dereferenced();
        let rhs_ty = self.lib.nodes[rhs].data_type.unwrap_or_else(|| self.lib.types.void_type());
        if let Some(f) = crate::native::builtins().lookup(native_name) {
            if let Err(msg) = f.determine_return_type(&mut self.lib.types, &[target, rhs_ty]) {
                self.reporter.report_error(location, msg);
            }
        }
        self.finish(id, target);
    }

    fn resolve_call(&mut self, id: Id<CodeNode>, location: Location) {
        let name = match &self.lib.nodes[id].extra {
            ExtraData::Name(n) => n.clone(),
            _ => {
                self.reporter.report_error(location, "call with no function name");
                self.finish_void(id);
                return;
            }
        };
        let arg_types: Vec<DataType> = self.lib.nodes[id]
            .children
            .iter()
            .map(|c| self.lib.nodes[*c].data_type.unwrap_or_else(|| self.lib.types.void_type()).dereferenced())
            .collect();

        if let Some(f) = crate::native::builtins().lookup(&name) {
            match f.determine_return_type(&mut self.lib.types, &arg_types) {
                Ok(ty) => {
                    self.finish(id, ty);
                    return;
                }
                Err(msg) => {
                    self.reporter.report_error(location, msg);
                    self.finish_void(id);
                    return;
                }
            }
        }

        let user_fn = self.program.and_then(|p| self.lib.programs[p].find_function(&name, &self.lib.programs, &self.lib.functions));
        match user_fn {
            Some(f) => {
                let ret = self.lib.functions[f].return_type;
                self.lib.nodes[id].extra = ExtraData::FunctionRef(f);
                self.finish(id, ret);
            }
            None => {
                self.reporter.report_error(location, format!("unknown function '{name}'"));
                self.finish_void(id);
            }
        }
    }

    fn resolve_create_matrix(&mut self, id: Id<CodeNode>, location: Location) {
        let children: Vec<_> = self.lib.nodes[id].children.to_vec();
        if children.is_empty() {
            self.reporter.report_error(location, "CreateMatrix requires at least one column");
            self.finish_void(id);
            return;
        }
        let first_ty = self.lib.nodes[children[0]].data_type.unwrap_or_else(|| self.lib.types.void_type());
        let rows = types::extract_component_count(&self.lib.types, first_ty).max(1);
        let base = types::extract_base_type(&self.lib.types, first_ty).unwrap_or(BaseType::Float);
        let cols = children.len() as u32;
        for &child in &children[1..] {
            let ty = self.lib.nodes[child].data_type.unwrap_or_else(|| self.lib.types.void_type());
            if types::extract_component_count(&self.lib.types, ty) != rows {
                self.reporter.report_error(location, "CreateMatrix columns must all have the same component count");
            }
        }
        let ty = self.lib.types.simple_composite_type(base, cols as u8, rows as u8);
        self.finish(id, ty);
    }

    fn resolve_cast(&mut self, id: Id<CodeNode>, location: Location) {
        let target = self.lib.nodes[id].data_type;
        let child = self.lib.nodes[id].children.first().copied();
        let target = match target {
            Some(t) => t,
            None => {
                self.reporter.report_error(location, "cast with no target type");
                self.finish_void(id);
                return;
            }
        };
        if let Some(child) = child {
            let child_ty = self.lib.nodes[child].data_type.unwrap_or_else(|| self.lib.types.void_type()).dereferenced();
            let m = types::match_type(&self.lib.types, &self.lib.programs, child_ty, target);
            if !m.is_match() {
                self.reporter.report_error(location, "invalid cast: incompatible shapes");
            }
        }
        self.lib.nodes[id].types_resolved = true;
    }

    fn resolve_if_else(&mut self, id: Id<CodeNode>, location: Location) {
        let cond = self.lib.nodes[id].children.first().copied();
        if let Some(cond) = cond {
            let ty = self.lib.nodes[cond].data_type.unwrap_or_else(|| self.lib.types.void_type()).dereferenced();
            if types::extract_base_type(&self.lib.types, ty) != Some(BaseType::Bool) {
                self.reporter.report_error(location, "if condition must be bool");
            }
        }
        self.finish_void(id);
    }

    fn resolve_return(&mut self, id: Id<CodeNode>, location: Location) {
        let child = self.lib.nodes[id].children.first().copied();
        if let (Some(child), Some(expected)) = (child, self.expected_return) {
            let ty = self.lib.nodes[child].data_type.unwrap_or_else(|| self.lib.types.void_type()).dereferenced();
            let m = types::match_type(&self.lib.types, &self.lib.programs, ty, expected);
            if !m.is_match() || !m.conversion.is_implicit() {
                self.reporter.report_error(location, "return value type does not match function return type");
            }
        }
        self.finish_void(id);
    }
}

fn compound_native_name(op: &str) -> &'static str {
    match op {
        "+=" => "__opAdd",
        "-=" => "__opSub",
        "*=" => "__opMul",
        "/=" => "__opDiv",
        "%=" => "__opMod",
        "&=" => "__opBitAnd",
        "|=" => "__opBitOr",
        "^=" => "__opBitXor",
        "<<=" => "__opShl",
        ">>=" => "__opShr",
        _ => "__opAdd",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingReporter;
    use crate::value::{DataValue, DataValueComponent};

    #[test]
    fn ident_resolves_to_enclosing_scope_declaration() {
        let mut lib = CodeLibrary::new();
        let float_ty = lib.types.float_type(1);

        let init = lib.nodes.push(CodeNode::new(OpCode::Const, Location::UNKNOWN).with_value(float_ty, DataValue::scalar(DataValueComponent::Float32(1.0))));
        let mut decl = CodeNode::new(OpCode::VariableDecl, Location::UNKNOWN).with_children([init]);
        decl.extra = ExtraData::Name("x".into());
        let decl = lib.nodes.push(decl);

        let mut ident = CodeNode::new(OpCode::Ident, Location::UNKNOWN);
        ident.extra = ExtraData::Name("x".into());
        let ident = lib.nodes.push(ident);

        let scope = lib.nodes.push(CodeNode::new(OpCode::Scope, Location::UNKNOWN).with_children([decl, ident]));

        let mut reporter = CollectingReporter::new();
        let void_ty = lib.types.void_type();
        let mut resolver = Resolver::new(&mut lib, &mut reporter, None);
        resolver.resolve_function_body(scope, &[], void_ty);

        assert_eq!(reporter.error_count(), 0);
        assert!(lib.nodes[ident].data_type.unwrap().same_core(float_ty));
    }

    #[test]
    fn unresolved_identifier_reports_an_error() {
        let mut lib = CodeLibrary::new();
        let mut ident = CodeNode::new(OpCode::Ident, Location::UNKNOWN);
        ident.extra = ExtraData::Name("nope".into());
        let ident = lib.nodes.push(ident);
        let scope = lib.nodes.push(CodeNode::new(OpCode::Scope, Location::UNKNOWN).with_children([ident]));

        let mut reporter = CollectingReporter::new();
        let void_ty = lib.types.void_type();
        let mut resolver = Resolver::new(&mut lib, &mut reporter, None);
        resolver.resolve_function_body(scope, &[], void_ty);
        assert_eq!(reporter.error_count(), 1);
    }

    #[test]
    fn swizzle_on_vector_contracts_component_count() {
        let mut lib = CodeLibrary::new();
        let v4 = lib.types.float_type(4);
        let mut ident = CodeNode::new(OpCode::Ident, Location::UNKNOWN);
        ident.extra = ExtraData::Name("v".into());
        let ident_id = lib.nodes.push(ident);
        let param = lib.parameters.push(DataParameter::plain("v", DataParameterScope::FunctionInput, v4, Vec::new(), Location::UNKNOWN));

        let mut member = CodeNode::new(OpCode::AccessMember, Location::UNKNOWN).with_children([ident_id]);
        member.extra = ExtraData::Name("xy".into());
        let member = lib.nodes.push(member);
        let scope = lib.nodes.push(CodeNode::new(OpCode::Scope, Location::UNKNOWN).with_children([ident_id, member]));

        let mut reporter = CollectingReporter::new();
        let void_ty = lib.types.void_type();
        let mut resolver = Resolver::new(&mut lib, &mut reporter, None);
        resolver.resolve_function_body(scope, &[param], void_ty);

        assert_eq!(reporter.error_count(), 0);
        let result_ty = lib.nodes[member].data_type.unwrap();
        assert_eq!(types::extract_component_count(&lib.types, result_ty), 2);
    }
}
