//! Constant-folding partial evaluator (spec §4.5): `FunctionFolder` walks a
//! resolved function body and rewrites it into an equivalent tree with every
//! statically-knowable subexpression collapsed to a `Const`, specializing
//! user-function calls against the constants known at each call site.
//!
//! Grounded on `original_source/.../renderingShaderFunctionFolder.cpp`. The
//! folder never mutates the tree it is given — `fold_code` always returns a
//! fresh `Id<CodeNode>` in the same `Arena`, so a function can be folded
//! against several different call sites without the results aliasing.

use crate::arena::Id;
use crate::ast::{CodeNode, DataParameter, DataParameterScope, ExtraData, OpCode};
use crate::diagnostics::{IErrorReporter, Location};
use crate::program::{CodeLibrary, Function, ProgramConstants, ProgramInstance};
use crate::types::{self, BaseType, DataType};
use crate::value::{valop, DataValue, DataValueComponent, ExecutionValue};
use fxhash::{FxHashMap, FxHasher};
use smol_str::SmolStr;
use std::hash::{Hash, Hasher};
use tracing::{debug, trace, warn};

/// Reads swizzle mask component `i` out of `value`, substituting the
/// literal `0`/`1` of `base` for `ComponentMask::ZERO`/`ONE` (spec §8
/// property 4) instead of indexing.
fn mask_component(value: &DataValue, base: BaseType, i: u8) -> DataValueComponent {
    match i {
        crate::ast::ComponentMask::ZERO => DataValueComponent::literal(base, false),
        crate::ast::ComponentMask::ONE => DataValueComponent::literal(base, true),
        _ => value.get(i as usize).clone(),
    }
}

/// A zero value of `ty`'s scalar shape, used when a `global-const` has
/// neither an instance override nor a foldable initializer (spec §4.5
/// sub-case 1).
fn zero_value(types: &crate::types::TypeLibrary, ty: DataType) -> DataValue {
    let width = types.scalar_width(ty);
    let base = types::extract_base_type(types, ty).unwrap_or(BaseType::Float);
    DataValue::of((0..width).map(|_| DataValueComponent::literal(base, false)))
}

fn as_index(c: &DataValueComponent) -> Option<usize> {
    match c {
        DataValueComponent::Int32(v) if *v >= 0 => Some(*v as usize),
        DataValueComponent::Uint32(v) => Some(*v as usize),
        _ => None,
    }
}

fn push_node(
    lib: &mut CodeLibrary,
    opcode: OpCode,
    location: Location,
    children: impl IntoIterator<Item = Id<CodeNode>>,
    extra: ExtraData,
    ty: Option<DataType>,
    value: Option<DataValue>,
) -> Id<CodeNode> {
    let mut node = CodeNode::new(opcode, location).with_children(children).with_extra(extra);
    node.types_resolved = ty.is_some();
    node.data_type = ty;
    node.value = value;
    lib.nodes.push(node)
}

/// Interning key for `foldFunction`: a folded function is identified by the
/// original function, the dispatching instance (if any), and a hash of the
/// caller-known constants — two calls with the same three never need to be
/// folded twice (spec §5's recursion-safety requirement falls out of this
/// cache: a self-recursive call always hits the in-progress reservation).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
struct FoldedFunctionKey {
    function: Id<Function>,
    instance_key: Option<u64>,
    args_hash: u64,
}

/// Session-lifetime folding state: the function cache and the per-base-name
/// counter that disambiguates folded clones (`foo`, `foo2`, `foo3`, ...).
pub struct FunctionFolder {
    cache: FxHashMap<FoldedFunctionKey, Id<Function>>,
    name_counters: FxHashMap<SmolStr, u32>,
    /// `static-constant` parameters fold their own initializer exactly once,
    /// independent of `thisInstance`/`L` (spec §4.5 `ParamRef` sub-case 3).
    static_const_cache: FxHashMap<Id<DataParameter>, Option<DataValue>>,
    step_budget: u32,
}

impl FunctionFolder {
    pub fn new(step_budget: u32) -> Self {
        FunctionFolder { cache: FxHashMap::default(), name_counters: FxHashMap::default(), static_const_cache: FxHashMap::default(), step_budget }
    }

    /// Folds a `static-constant` parameter's own initializer, caching the
    /// result so repeated references never redo the work.
    fn fold_static_constant(&mut self, lib: &mut CodeLibrary, param: Id<DataParameter>, reporter: &mut dyn IErrorReporter) -> Option<DataValue> {
        if let Some(cached) = self.static_const_cache.get(&param) {
            return cached.clone();
        }
        let initializer = lib.parameters[param].initializer;
        let empty = ProgramConstants::new();
        let value = initializer.and_then(|init| {
            let folded = self.fold_code(lib, None, &empty, init, reporter);
            lib.nodes[folded].value.clone()
        });
        self.static_const_cache.insert(param, value.clone());
        value
    }

    fn key_for(&self, lib: &CodeLibrary, function: Id<Function>, this_instance: Option<Id<ProgramInstance>>, locals: &ProgramConstants) -> FoldedFunctionKey {
        let instance_key = this_instance.map(|id| {
            let mut hasher = FxHasher::default();
            lib.instance(id).hash(&mut hasher);
            hasher.finish()
        });
        FoldedFunctionKey { function, instance_key, args_hash: locals.key() }
    }

    fn rename(&mut self, base: &SmolStr) -> SmolStr {
        let counter = self.name_counters.entry(base.clone()).or_insert(0);
        *counter += 1;
        if *counter == 1 {
            base.clone()
        } else {
            SmolStr::new(format!("{base}{}", counter))
        }
    }

    /// `foldFunction(F, thisInstance, L)`: specializes `function` against the
    /// constants in `locals`, reusing a previous folding with the same key.
    /// Recursion safety: the new `Function` is reserved in `lib.functions`
    /// (with a dummy body) and cached *before* its body is folded, so a call
    /// to the same `(function, instance, locals)` triple encountered while
    /// folding its own body resolves to the reservation instead of recursing.
    pub fn fold_function(&mut self, lib: &mut CodeLibrary, function: Id<Function>, this_instance: Option<Id<ProgramInstance>>, locals: &ProgramConstants, reporter: &mut dyn IErrorReporter) -> Id<Function> {
        let key = self.key_for(lib, function, this_instance, locals);
        if let Some(&cached) = self.cache.get(&key) {
            trace!(function = %lib.functions[function].name, "fold_function cache hit");
            return cached;
        }

        let original = lib.functions[function].clone();
        debug!(function = %original.name, "folding function");
        let new_name = self.rename(&original.name);
        let reserved = lib.functions.push(Function {
            name: new_name.clone(),
            params: original.params.clone(),
            return_type: original.return_type,
            body: Id::dummy(),
            attributes: original.attributes.clone(),
            stage_mask: original.stage_mask,
            location: original.location,
        });
        self.cache.insert(key, reserved);

        let folded_body = self.fold_code(lib, this_instance, locals, original.body, reporter);
        lib.functions[reserved] = Function {
            name: new_name,
            params: original.params,
            return_type: original.return_type,
            body: folded_body,
            attributes: original.attributes,
            stage_mask: original.stage_mask,
            location: original.location,
        };
        reserved
    }

    /// `foldCode(node)`: the per-opcode table from spec §4.5.
    fn fold_code(&mut self, lib: &mut CodeLibrary, this_instance: Option<Id<ProgramInstance>>, locals: &ProgramConstants, node: Id<CodeNode>, reporter: &mut dyn IErrorReporter) -> Id<CodeNode> {
        match lib.nodes[node].opcode {
            OpCode::Nop => {
                let (location, ty) = (lib.nodes[node].location, lib.nodes[node].data_type);
                push_node(lib, OpCode::Nop, location, [], ExtraData::None, ty, None)
            }
            OpCode::Const => {
                let (location, ty, value) = (lib.nodes[node].location, lib.nodes[node].data_type, lib.nodes[node].value.clone());
                push_node(lib, OpCode::Const, location, [], ExtraData::None, ty, value)
            }
            OpCode::Ident => self.fold_ident(lib, this_instance, locals, node, reporter),
            OpCode::AccessMember => self.fold_access_member(lib, this_instance, locals, node, reporter),
            OpCode::AccessArray => self.fold_access_array(lib, this_instance, locals, node, reporter),
            OpCode::Load => self.fold_load(lib, this_instance, locals, node, reporter),
            OpCode::Cast => self.fold_cast(lib, this_instance, locals, node, reporter),
            OpCode::Call => self.fold_call(lib, this_instance, locals, node, reporter),
            OpCode::IfElse => self.fold_if_else(lib, this_instance, locals, node, reporter),
            OpCode::Scope => self.fold_scope(lib, this_instance, locals, node, reporter),
            OpCode::This => self.fold_this(lib, this_instance, node, reporter),
            OpCode::ProgramInstance => self.fold_program_instance(lib, this_instance, locals, node, reporter),
            _ => self.fold_children_unchanged(lib, this_instance, locals, node, reporter),
        }
    }

    /// `This`: collapses to a `Const` carrying `thisInstance` when folding is
    /// happening against a known instance, otherwise stays symbolic (spec
    /// §4.5 rule `This`).
    fn fold_this(&mut self, lib: &mut CodeLibrary, this_instance: Option<Id<ProgramInstance>>, node: Id<CodeNode>, _reporter: &mut dyn IErrorReporter) -> Id<CodeNode> {
        let location = lib.nodes[node].location;
        let ty = lib.nodes[node].data_type;
        match this_instance {
            Some(inst) => push_node(lib, OpCode::Const, location, [], ExtraData::None, ty, Some(DataValue::scalar(DataValueComponent::ProgramInstance(inst)))),
            None => push_node(lib, OpCode::This, location, [], ExtraData::None, ty, None),
        }
    }

    /// `ProgramInstance`: folds every `ProgramInstanceParam` child and, when
    /// all resolve to whole values, interns `(program, constants)` and
    /// collapses to the resulting `Const` (spec §4.5 rule `ProgramInstance`).
    /// Falls back to a symbolic node with folded children when any parameter
    /// value is not yet statically known.
    fn fold_program_instance(&mut self, lib: &mut CodeLibrary, this_instance: Option<Id<ProgramInstance>>, locals: &ProgramConstants, node: Id<CodeNode>, reporter: &mut dyn IErrorReporter) -> Id<CodeNode> {
        let location = lib.nodes[node].location;
        let ty = lib.nodes[node].data_type;
        let extra = lib.nodes[node].extra.clone();
        let children = lib.nodes[node].children.to_vec();
        let folded: Vec<_> = children.iter().map(|&c| self.fold_code(lib, this_instance, locals, c, reporter)).collect();

        let program = match &extra {
            ExtraData::ProgramRef(p) => Some(*p),
            _ => None,
        };

        if let Some(program) = program {
            let mut constants = ProgramConstants::new();
            let mut all_defined = true;
            for &child in &folded {
                let name = match &lib.nodes[child].extra {
                    ExtraData::Name(n) => n.clone(),
                    _ => {
                        all_defined = false;
                        break;
                    }
                };
                let value_child = lib.nodes[child].children.first().copied();
                match value_child.and_then(|v| lib.nodes[v].value.clone()) {
                    Some(value) if value.is_whole_value_defined() => constants.set(name, value),
                    _ => {
                        all_defined = false;
                        break;
                    }
                }
            }
            if all_defined {
                let instance = lib.intern_program_instance(program, constants);
                return push_node(lib, OpCode::Const, location, [], ExtraData::None, ty, Some(DataValue::scalar(DataValueComponent::ProgramInstance(instance))));
            }
        }
        push_node(lib, OpCode::ProgramInstance, location, folded, extra, ty, None)
    }

    /// `Store`/`Assign`/`CompoundAssign`/`CreateMatrix`/`Loop`/`Break`/
    /// `Continue`/`Return`/`VariableDecl`/`ExprStatement`: fold every child,
    /// never collapse the node itself (each is either side-effecting or, for
    /// `CreateMatrix`, kept symbolic — DESIGN.md open question 1).
    fn fold_children_unchanged(&mut self, lib: &mut CodeLibrary, this_instance: Option<Id<ProgramInstance>>, locals: &ProgramConstants, node: Id<CodeNode>, reporter: &mut dyn IErrorReporter) -> Id<CodeNode> {
        let opcode = lib.nodes[node].opcode;
        let location = lib.nodes[node].location;
        let extra = lib.nodes[node].extra.clone();
        let ty = lib.nodes[node].data_type;
        let children = lib.nodes[node].children.to_vec();
        let folded: Vec<_> = children.iter().map(|&c| self.fold_code(lib, this_instance, locals, c, reporter)).collect();
        push_node(lib, opcode, location, folded, extra, ty, None)
    }

    fn fold_scope(&mut self, lib: &mut CodeLibrary, this_instance: Option<Id<ProgramInstance>>, locals: &ProgramConstants, node: Id<CodeNode>, reporter: &mut dyn IErrorReporter) -> Id<CodeNode> {
        let location = lib.nodes[node].location;
        let ty = lib.nodes[node].data_type;
        let declarations = lib.nodes[node].declarations.clone();
        let children = lib.nodes[node].children.to_vec();
        let folded: Vec<_> = children.iter().map(|&c| self.fold_code(lib, this_instance, locals, c, reporter)).collect();
        let id = push_node(lib, OpCode::Scope, location, folded, ExtraData::None, ty, None);
        lib.nodes[id].declarations = declarations;
        id
    }

    /// `ParamRef`: substitutes a constant value when the parameter's scope
    /// makes one available, otherwise rebuilds an unresolved-but-typed
    /// reference unchanged (spec §4.5's four `ParamRef` sub-cases).
    fn fold_ident(&mut self, lib: &mut CodeLibrary, this_instance: Option<Id<ProgramInstance>>, locals: &ProgramConstants, node: Id<CodeNode>, reporter: &mut dyn IErrorReporter) -> Id<CodeNode> {
        let location = lib.nodes[node].location;
        let ty = lib.nodes[node].data_type.unwrap_or_else(|| lib.types.void_type());
        let param = match &lib.nodes[node].extra {
            ExtraData::ParameterRef(p) => *p,
            _ => return push_node(lib, OpCode::Ident, location, [], lib.nodes[node].extra.clone(), Some(ty), None),
        };
        self.fold_parameter_ref(lib, this_instance, locals, OpCode::Ident, location, ty, param, reporter)
    }

    /// Shared by `fold_ident` and `fold_access_member` (the latter when a
    /// member access was resolved straight to a descriptor `DataParameter`
    /// through `ResourceTable.member`, spec §3's "resource-table pointer"):
    /// the four `ParamRef` sub-cases of spec §4.5.
    fn fold_parameter_ref(&mut self, lib: &mut CodeLibrary, this_instance: Option<Id<ProgramInstance>>, locals: &ProgramConstants, opcode: OpCode, location: Location, ty: DataType, param: Id<DataParameter>, reporter: &mut dyn IErrorReporter) -> Id<CodeNode> {
        let name = lib.parameters[param].name.clone();
        let scope = lib.parameters[param].scope;
        let deref_ty = ty.dereferenced();

        match scope {
            // `static-constant`: folds its own initializer once, never
            // consulting `thisInstance`/`L` at all (spec §4.5 sub-case 3).
            DataParameterScope::StaticConstant => match self.fold_static_constant(lib, param, reporter) {
                Some(value) if value.is_whole_value_defined() => push_node(lib, OpCode::Const, location, [], ExtraData::None, Some(deref_ty), Some(value)),
                _ => {
                    warn!(%name, "static constant initializer did not fold to a whole value");
                    reporter.report_warning(location, format!("'{name}' is not constant at compile time"));
                    push_node(lib, opcode, location, [], ExtraData::ParameterRef(param), Some(ty), None)
                }
            },
            // `global-const`: an instance override wins; otherwise fold the
            // declared initializer; with neither, synthesize a zero value and
            // report the error (spec §4.5 sub-case 1).
            DataParameterScope::GlobalConst => {
                let from_instance = this_instance.and_then(|inst| lib.instance_constants(inst).get(&name).cloned()).filter(DataValue::is_whole_value_defined);
                if let Some(value) = from_instance {
                    return push_node(lib, OpCode::Const, location, [], ExtraData::None, Some(deref_ty), Some(value));
                }
                let initializer = lib.parameters[param].initializer;
                if let Some(init) = initializer {
                    let empty = ProgramConstants::new();
                    let folded_init = self.fold_code(lib, None, &empty, init, reporter);
                    if let Some(value) = lib.nodes[folded_init].value.clone() {
                        if value.is_whole_value_defined() {
                            return push_node(lib, OpCode::Const, location, [], ExtraData::None, Some(deref_ty), Some(value));
                        }
                    }
                }
                warn!(%name, "global constant has no compile-time value, substituting zero");
                reporter.report_error(location, format!("global constant '{name}' has no compile-time default; substituting zero"));
                let zero = zero_value(&lib.types, deref_ty);
                push_node(lib, OpCode::Const, location, [], ExtraData::None, Some(deref_ty), Some(zero))
            }
            // `function-input`: substitute from the caller-known locals `L`
            // when available, otherwise leave the reference in place (spec
            // §4.5 sub-case 2).
            DataParameterScope::FunctionInput => match locals.get(&name) {
                Some(value) if value.is_whole_value_defined() => push_node(lib, OpCode::Const, location, [], ExtraData::None, Some(deref_ty), Some(value.clone())),
                _ => push_node(lib, opcode, location, [], ExtraData::ParameterRef(param), Some(ty), None),
            },
            // `global-parameter` naming a resource: collapses to a `Const`
            // carrying the resource's table-qualified name (spec §4.5
            // sub-case 4).
            DataParameterScope::GlobalParameter if lib.types.resource(deref_ty).is_some() => {
                let value = DataValue::scalar(DataValueComponent::Name(SmolStr::new(format!("res:{name}"))));
                push_node(lib, OpCode::Const, location, [], ExtraData::None, Some(deref_ty), Some(value))
            }
            _ => push_node(lib, opcode, location, [], ExtraData::ParameterRef(param), Some(ty), None),
        }
    }

    fn fold_access_member(&mut self, lib: &mut CodeLibrary, this_instance: Option<Id<ProgramInstance>>, locals: &ProgramConstants, node: Id<CodeNode>, reporter: &mut dyn IErrorReporter) -> Id<CodeNode> {
        let location = lib.nodes[node].location;
        let ty = lib.nodes[node].data_type.unwrap_or_else(|| lib.types.void_type());
        let extra = lib.nodes[node].extra.clone();

        // `ResourceTable.member` was rewritten at resolve time to carry a
        // `ParameterRef` directly (spec §3's "resource-table pointer"); fold
        // it exactly like an `Ident` referencing the same parameter.
        if let ExtraData::ParameterRef(param) = extra.clone() {
            return self.fold_parameter_ref(lib, this_instance, locals, OpCode::AccessMember, location, ty, param, reporter);
        }

        let ty = Some(ty);
        let base = lib.nodes[node].children[0];
        let folded_base = self.fold_code(lib, this_instance, locals, base, reporter);

        if let Some(value) = lib.nodes[folded_base].value.clone() {
            if value.is_whole_value_defined() {
                let base_ty = lib.nodes[folded_base].data_type.unwrap_or_else(|| lib.types.void_type());
                match &extra {
                    ExtraData::MemberIndex(index) => {
                        if let Some(composite) = lib.types.composite(base_ty) {
                            let offset = lib.types.member_component_offset(composite, *index as usize);
                            let width = lib.types.scalar_width(composite.members[*index as usize].ty);
                            let slice: Vec<_> = (offset..offset + width).map(|i| value.get(i).clone()).collect();
                            return push_node(lib, OpCode::Const, location, [], ExtraData::None, ty, Some(DataValue::of(slice)));
                        }
                    }
                    ExtraData::Mask(mask) => {
                        let base_scalar = types::extract_base_type(&lib.types, base_ty).unwrap_or(BaseType::Float);
                        let slice: Vec<_> = mask.as_slice().iter().map(|&i| mask_component(&value, base_scalar, i)).collect();
                        return push_node(lib, OpCode::Const, location, [], ExtraData::None, ty, Some(DataValue::of(slice)));
                    }
                    _ => {}
                }
            }
        }
        push_node(lib, OpCode::AccessMember, location, [folded_base], extra, ty, None)
    }

    fn fold_access_array(&mut self, lib: &mut CodeLibrary, this_instance: Option<Id<ProgramInstance>>, locals: &ProgramConstants, node: Id<CodeNode>, reporter: &mut dyn IErrorReporter) -> Id<CodeNode> {
        let location = lib.nodes[node].location;
        let ty = lib.nodes[node].data_type;
        let children = lib.nodes[node].children.to_vec();
        let folded_base = self.fold_code(lib, this_instance, locals, children[0], reporter);
        let folded_index = self.fold_code(lib, this_instance, locals, children[1], reporter);

        if let (Some(base_value), Some(index_value), Some(element_ty)) = (lib.nodes[folded_base].value.clone(), lib.nodes[folded_index].value.clone(), ty) {
            if base_value.is_whole_value_defined() && index_value.is_whole_value_defined() {
                if let Some(idx) = as_index(index_value.get(0)) {
                    let element_ty = element_ty.dereferenced();
                    let width = lib.types.scalar_width(element_ty);
                    let offset = idx * width;
                    if width > 0 && offset + width <= base_value.len() {
                        let slice: Vec<_> = (offset..offset + width).map(|i| base_value.get(i).clone()).collect();
                        return push_node(lib, OpCode::Const, location, [], ExtraData::None, Some(element_ty), Some(DataValue::of(slice)));
                    }
                }
            }
        }
        push_node(lib, OpCode::AccessArray, location, [folded_base, folded_index], ExtraData::None, ty, None)
    }

    fn fold_load(&mut self, lib: &mut CodeLibrary, this_instance: Option<Id<ProgramInstance>>, locals: &ProgramConstants, node: Id<CodeNode>, reporter: &mut dyn IErrorReporter) -> Id<CodeNode> {
        let location = lib.nodes[node].location;
        let ty = lib.nodes[node].data_type;
        let child = lib.nodes[node].children[0];
        let folded_child = self.fold_code(lib, this_instance, locals, child, reporter);
        if let Some(value) = lib.nodes[folded_child].value.clone() {
            return push_node(lib, OpCode::Const, location, [], ExtraData::None, ty, Some(value));
        }
        push_node(lib, OpCode::Load, location, [folded_child], ExtraData::None, ty, None)
    }

    fn fold_cast(&mut self, lib: &mut CodeLibrary, this_instance: Option<Id<ProgramInstance>>, locals: &ProgramConstants, node: Id<CodeNode>, reporter: &mut dyn IErrorReporter) -> Id<CodeNode> {
        let location = lib.nodes[node].location;
        let ty = lib.nodes[node].data_type;
        let child = lib.nodes[node].children[0];
        let folded_child = self.fold_code(lib, this_instance, locals, child, reporter);
        if let (Some(value), Some(target)) = (lib.nodes[folded_child].value.clone(), ty) {
            if value.is_whole_value_defined() {
                if let Some(base) = types::extract_base_type(&lib.types, target) {
                    let casted = DataValue::of(value.components.iter().map(|c| valop::cast(c, base)));
                    return push_node(lib, OpCode::Const, location, [], ExtraData::None, Some(target), Some(casted));
                }
            }
        }
        push_node(lib, OpCode::Cast, location, [folded_child], ExtraData::None, ty, None)
    }

    /// Folds the condition, then either recurses into the surviving branch
    /// alone (pruning the other) or, if the condition isn't decidable, folds
    /// both branches and rebuilds the `IfElse` (spec §8 property "branch
    /// pruning").
    fn fold_if_else(&mut self, lib: &mut CodeLibrary, this_instance: Option<Id<ProgramInstance>>, locals: &ProgramConstants, node: Id<CodeNode>, reporter: &mut dyn IErrorReporter) -> Id<CodeNode> {
        let location = lib.nodes[node].location;
        let children = lib.nodes[node].children.to_vec();
        let cond = children[0];
        let then_branch = children.get(1).copied();
        let else_branch = children.get(2).copied();
        let folded_cond = self.fold_code(lib, this_instance, locals, cond, reporter);

        if let Some(value) = lib.nodes[folded_cond].value.clone() {
            if value.is_whole_value_defined() {
                if let DataValueComponent::Bool(taken) = value.get(0) {
                    trace!(taken, "if-else condition constant, pruning dead branch");
                    let branch = if *taken { then_branch } else { else_branch };
                    return match branch {
                        Some(b) => self.fold_code(lib, this_instance, locals, b, reporter),
                        None => {
                            let void_ty = lib.types.void_type();
                            push_node(lib, OpCode::Nop, location, [], ExtraData::None, Some(void_ty), None)
                        }
                    };
                }
            }
        }

        let mut new_children = vec![folded_cond];
        new_children.extend(then_branch.map(|t| self.fold_code(lib, this_instance, locals, t, reporter)));
        new_children.extend(else_branch.map(|e| self.fold_code(lib, this_instance, locals, e, reporter)));
        let void_ty = lib.types.void_type();
        push_node(lib, OpCode::IfElse, location, new_children, ExtraData::None, Some(void_ty), None)
    }

    /// `Call`: native calls fold through `partial_evaluate`/`evaluate`;
    /// user-function calls re-dispatch against `this_instance`'s program
    /// (the override, if any, wins — spec §8 property "dynamic dispatch via
    /// inheritance"), then recursively fold the callee specialized to the
    /// statically-known arguments, and attempt to interpret the whole call
    /// through an `ExecutionStack` bounded by the step budget.
    fn fold_call(&mut self, lib: &mut CodeLibrary, this_instance: Option<Id<ProgramInstance>>, locals: &ProgramConstants, node: Id<CodeNode>, reporter: &mut dyn IErrorReporter) -> Id<CodeNode> {
        let location = lib.nodes[node].location;
        let ty = lib.nodes[node].data_type;
        let extra = lib.nodes[node].extra.clone();
        let children = lib.nodes[node].children.to_vec();
        let folded_args: Vec<_> = children.iter().map(|&c| self.fold_code(lib, this_instance, locals, c, reporter)).collect();

        match &extra {
            ExtraData::Name(name) => {
                if let Some(f) = crate::native::builtins().lookup(name) {
                    if f.is_foldable() {
                        let arg_opts: Vec<Option<&DataValue>> = folded_args.iter().map(|&a| lib.nodes[a].value.as_ref()).collect();
                        if let Some(value) = f.partial_evaluate(&arg_opts) {
                            return push_node(lib, OpCode::Const, location, [], ExtraData::None, ty, Some(value));
                        }
                        if arg_opts.iter().all(|v| v.is_some_and(DataValue::is_whole_value_defined)) {
                            let owned: Vec<DataValue> = arg_opts.into_iter().map(|v| v.unwrap().clone()).collect();
                            if let Some(value) = f.evaluate(&owned) {
                                return push_node(lib, OpCode::Const, location, [], ExtraData::None, ty, Some(value));
                            }
                        }
                    }
                }
                push_node(lib, OpCode::Call, location, folded_args, extra, ty, None)
            }
            ExtraData::FunctionRef(callee) => {
                let callee_name = lib.functions[*callee].name.clone();
                let dispatched = this_instance
                    .and_then(|inst| lib.programs[lib.instance(inst).program].find_function(&callee_name, &lib.programs, &lib.functions))
                    .unwrap_or(*callee);

                let params = lib.functions[dispatched].params.clone();
                let mut call_locals = ProgramConstants::new();
                let mut execution_args = Vec::new();
                for (&arg_node, &param_id) in folded_args.iter().zip(params.iter()) {
                    let param_name = lib.parameters[param_id].name.clone();
                    let arg_ty = lib.nodes[arg_node].data_type.unwrap_or_else(|| lib.types.void_type()).dereferenced();
                    match lib.nodes[arg_node].value.clone() {
                        Some(value) => {
                            if value.is_whole_value_defined() {
                                call_locals.set(param_name, value.clone());
                            }
                            execution_args.push(ExecutionValue::new(arg_ty, value));
                        }
                        None => execution_args.push(ExecutionValue::new(arg_ty, DataValue::undefined(lib.types.scalar_width(arg_ty)))),
                    }
                }

                let folded_callee = self.fold_function(lib, dispatched, this_instance, &call_locals, reporter);

                let mut stack = ExecutionStack::new(self.step_budget);
                let return_value = stack.call(lib, folded_callee, this_instance, execution_args, reporter);

                if let Some(value) = return_value {
                    if value.is_whole_value_defined() {
                        debug!(callee = %callee_name, "call fully evaluated to a constant");
                        return push_node(lib, OpCode::Const, location, [], ExtraData::None, ty, Some(value));
                    }
                }
                push_node(lib, OpCode::Call, location, folded_args, ExtraData::FunctionRef(folded_callee), ty, None)
            }
            _ => push_node(lib, OpCode::Call, location, folded_args, extra, ty, None),
        }
    }
}

/// Control flow signal an interpreted statement can raise, bubbling up
/// through nested `Scope`s exactly like the real language's `break`/
/// `continue`/`return`.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Option<DataValue>),
}

/// A tree-walking interpreter over already-typed `CodeNode`s, used by
/// `fold_call` to attempt full evaluation of a function call whose arguments
/// are (partially) known constants. Bounded by a step budget so a
/// non-terminating or merely very long loop fails gracefully ("could not
/// execute") instead of hanging the compiler (spec §5).
pub struct ExecutionStack {
    steps: u32,
    budget: u32,
}

impl ExecutionStack {
    pub fn new(budget: u32) -> Self {
        ExecutionStack { steps: 0, budget }
    }

    fn tick(&mut self) -> bool {
        self.steps += 1;
        self.steps <= self.budget
    }

    /// Runs `function`'s body with `args` bound to its parameters in order.
    /// Returns `None` if the function falls off its end without a `Return`,
    /// hits an op it cannot execute, or exceeds the step budget.
    pub fn call(&mut self, lib: &CodeLibrary, function: Id<Function>, this_instance: Option<Id<ProgramInstance>>, args: Vec<ExecutionValue>, reporter: &mut dyn IErrorReporter) -> Option<DataValue> {
        let params = lib.functions[function].params.clone();
        let mut locals: FxHashMap<Id<DataParameter>, DataValue> = FxHashMap::default();
        for (param, arg) in params.into_iter().zip(args) {
            locals.insert(param, arg.value);
        }
        let body = lib.functions[function].body;
        match self.exec_stmt(lib, this_instance, &mut locals, body, reporter) {
            Flow::Return(value) => value,
            _ => None,
        }
    }

    fn lvalue_param(&self, lib: &CodeLibrary, node: Id<CodeNode>) -> Option<Id<DataParameter>> {
        match (lib.nodes[node].opcode, &lib.nodes[node].extra) {
            (OpCode::Ident, ExtraData::ParameterRef(p)) => Some(*p),
            _ => None,
        }
    }

    fn exec_stmt(&mut self, lib: &CodeLibrary, this_instance: Option<Id<ProgramInstance>>, locals: &mut FxHashMap<Id<DataParameter>, DataValue>, node: Id<CodeNode>, reporter: &mut dyn IErrorReporter) -> Flow {
        if !self.tick() {
            warn!(budget = self.budget, "interpreter step budget exceeded while folding a call");
            reporter.report_error(lib.nodes[node].location, "interpreter step budget exceeded while folding a call");
            return Flow::Return(None);
        }
        match lib.nodes[node].opcode {
            OpCode::Scope => {
                for &child in lib.nodes[node].children.clone().iter() {
                    match self.exec_stmt(lib, this_instance, locals, child, reporter) {
                        Flow::Normal => {}
                        other => return other,
                    }
                }
                Flow::Normal
            }
            OpCode::VariableDecl => {
                let param = match &lib.nodes[node].extra {
                    ExtraData::ParameterRef(p) => *p,
                    _ => return Flow::Normal,
                };
                if let Some(init) = lib.nodes[node].children.first().copied() {
                    match self.eval(lib, this_instance, locals, init, reporter) {
                        Some(value) => {
                            locals.insert(param, value);
                        }
                        None => return Flow::Return(None),
                    }
                }
                Flow::Normal
            }
            OpCode::Assign | OpCode::Store => {
                let (lhs, rhs) = (lib.nodes[node].children[0], lib.nodes[node].children[1]);
                match (self.lvalue_param(lib, lhs), self.eval(lib, this_instance, locals, rhs, reporter)) {
                    (Some(param), Some(value)) => {
                        locals.insert(param, value);
                        Flow::Normal
                    }
                    _ => Flow::Return(None),
                }
            }
            OpCode::IfElse => {
                let children = lib.nodes[node].children.clone();
                let cond = self.eval(lib, this_instance, locals, children[0], reporter).and_then(|v| v.get(0).as_bool());
                match cond {
                    Some(true) => match children.get(1) {
                        Some(&t) => self.exec_stmt(lib, this_instance, locals, t, reporter),
                        None => Flow::Normal,
                    },
                    Some(false) => match children.get(2) {
                        Some(&e) => self.exec_stmt(lib, this_instance, locals, e, reporter),
                        None => Flow::Normal,
                    },
                    None => Flow::Return(None),
                }
            }
            OpCode::Loop => {
                let children = lib.nodes[node].children.clone();
                let cond = children.first().copied();
                let body = children.get(1).copied();
                loop {
                    if !self.tick() {
                        reporter.report_error(lib.nodes[node].location, "interpreter step budget exceeded while folding a call");
                        return Flow::Return(None);
                    }
                    if let Some(cond) = cond {
                        match self.eval(lib, this_instance, locals, cond, reporter).and_then(|v| v.get(0).as_bool()) {
                            Some(true) => {}
                            Some(false) => break,
                            None => return Flow::Return(None),
                        }
                    }
                    if let Some(body) = body {
                        match self.exec_stmt(lib, this_instance, locals, body, reporter) {
                            Flow::Break => break,
                            Flow::Continue | Flow::Normal => {}
                            other => return other,
                        }
                    }
                }
                Flow::Normal
            }
            OpCode::Break => Flow::Break,
            OpCode::Continue => Flow::Continue,
            OpCode::Return => {
                let value = match lib.nodes[node].children.first().copied() {
                    Some(child) => self.eval(lib, this_instance, locals, child, reporter),
                    None => None,
                };
                Flow::Return(value)
            }
            OpCode::ExprStatement => {
                self.eval(lib, this_instance, locals, lib.nodes[node].children[0], reporter);
                Flow::Normal
            }
            OpCode::Nop => Flow::Normal,
            _ => Flow::Return(None),
        }
    }

    fn eval(&mut self, lib: &CodeLibrary, this_instance: Option<Id<ProgramInstance>>, locals: &mut FxHashMap<Id<DataParameter>, DataValue>, node: Id<CodeNode>, reporter: &mut dyn IErrorReporter) -> Option<DataValue> {
        if !self.tick() {
            return None;
        }
        match lib.nodes[node].opcode {
            OpCode::Const => lib.nodes[node].value.clone(),
            OpCode::Ident => match &lib.nodes[node].extra {
                ExtraData::ParameterRef(p) => locals.get(p).cloned(),
                _ => None,
            },
            OpCode::Load => self.eval(lib, this_instance, locals, lib.nodes[node].children.first().copied()?, reporter),
            OpCode::Cast => {
                let value = self.eval(lib, this_instance, locals, lib.nodes[node].children.first().copied()?, reporter)?;
                let target = lib.nodes[node].data_type?;
                let base = types::extract_base_type(&lib.types, target)?;
                Some(DataValue::of(value.components.iter().map(|c| valop::cast(c, base))))
            }
            OpCode::AccessMember => {
                let base = lib.nodes[node].children.first().copied()?;
                let value = self.eval(lib, this_instance, locals, base, reporter)?;
                let base_ty = lib.nodes[base].data_type?.dereferenced();
                match &lib.nodes[node].extra {
                    ExtraData::MemberIndex(index) => {
                        let composite = lib.types.composite(base_ty)?;
                        let offset = lib.types.member_component_offset(composite, *index as usize);
                        let width = lib.types.scalar_width(composite.members[*index as usize].ty);
                        Some(DataValue::of((offset..offset + width).map(|i| value.get(i).clone())))
                    }
                    ExtraData::Mask(mask) => {
                        let base_scalar = types::extract_base_type(&lib.types, base_ty).unwrap_or(BaseType::Float);
                        Some(DataValue::of(mask.as_slice().iter().map(|&i| mask_component(&value, base_scalar, i))))
                    }
                    _ => None,
                }
            }
            OpCode::AccessArray => {
                let base = lib.nodes[node].children.get(0).copied()?;
                let index = lib.nodes[node].children.get(1).copied()?;
                let base_value = self.eval(lib, this_instance, locals, base, reporter)?;
                let index_value = self.eval(lib, this_instance, locals, index, reporter)?;
                let idx = as_index(index_value.get(0))?;
                let element_ty = lib.nodes[node].data_type?.dereferenced();
                let width = lib.types.scalar_width(element_ty);
                let offset = idx * width;
                if width == 0 || offset + width > base_value.len() {
                    return None;
                }
                Some(DataValue::of((offset..offset + width).map(|i| base_value.get(i).clone())))
            }
            OpCode::Call => self.eval_call(lib, this_instance, locals, node, reporter),
            _ => None,
        }
    }

    fn eval_call(&mut self, lib: &CodeLibrary, this_instance: Option<Id<ProgramInstance>>, locals: &mut FxHashMap<Id<DataParameter>, DataValue>, node: Id<CodeNode>, reporter: &mut dyn IErrorReporter) -> Option<DataValue> {
        let children = lib.nodes[node].children.clone();
        let mut args = Vec::with_capacity(children.len());
        for &child in children.iter() {
            args.push(self.eval(lib, this_instance, locals, child, reporter)?);
        }
        match &lib.nodes[node].extra {
            ExtraData::Name(name) => {
                let f = crate::native::builtins().lookup(name)?;
                if !f.is_foldable() {
                    return None;
                }
                f.evaluate(&args)
            }
            ExtraData::FunctionRef(callee) => {
                let callee_name = lib.functions[*callee].name.clone();
                let dispatched = this_instance
                    .and_then(|inst| lib.programs[lib.instance(inst).program].find_function(&callee_name, &lib.programs, &lib.functions))
                    .unwrap_or(*callee);
                let params = lib.functions[dispatched].params.clone();
                let arg_values: Vec<ExecutionValue> = params.iter().zip(args).map(|(&p, v)| ExecutionValue::new(lib.parameters[p].ty, v)).collect();
                self.call(lib, dispatched, this_instance, arg_values, reporter)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingReporter;
    use crate::program::Program;

    fn const_node(lib: &mut CodeLibrary, ty: DataType, value: DataValue) -> Id<CodeNode> {
        lib.nodes.push(CodeNode::new(OpCode::Const, Location::UNKNOWN).with_value(ty, value))
    }

    #[test]
    fn folds_constant_arithmetic_call() {
        let mut lib = CodeLibrary::new();
        let float_ty = lib.types.float_type(1);
        let a = const_node(&mut lib, float_ty, DataValue::scalar(DataValueComponent::Float32(1.0)));
        let b = const_node(&mut lib, float_ty, DataValue::scalar(DataValueComponent::Float32(2.0)));
        let mut call = CodeNode::new(OpCode::Call, Location::UNKNOWN).with_children([a, b]);
        call.extra = ExtraData::Name("__opAdd".into());
        call.data_type = Some(float_ty);
        call.types_resolved = true;
        let call = lib.nodes.push(call);

        let mut reporter = CollectingReporter::new();
        let mut folder = FunctionFolder::new(4096);
        let locals = ProgramConstants::new();
        let folded = folder.fold_code(&mut lib, None, &locals, call, &mut reporter);

        assert_eq!(lib.nodes[folded].opcode, OpCode::Const);
        assert_eq!(lib.nodes[folded].value.as_ref().unwrap().get(0), &DataValueComponent::Float32(3.0));
    }

    #[test]
    fn branch_with_constant_condition_prunes_dead_branch() {
        let mut lib = CodeLibrary::new();
        let bool_ty = lib.types.boolean_type(1);
        let float_ty = lib.types.float_type(1);
        let cond = const_node(&mut lib, bool_ty, DataValue::scalar(DataValueComponent::Bool(true)));
        let then_val = const_node(&mut lib, float_ty, DataValue::scalar(DataValueComponent::Float32(1.0)));
        let else_val = const_node(&mut lib, float_ty, DataValue::scalar(DataValueComponent::Float32(2.0)));
        let if_else = lib.nodes.push(CodeNode::new(OpCode::IfElse, Location::UNKNOWN).with_children([cond, then_val, else_val]));

        let mut reporter = CollectingReporter::new();
        let mut folder = FunctionFolder::new(4096);
        let locals = ProgramConstants::new();
        let folded = folder.fold_code(&mut lib, None, &locals, if_else, &mut reporter);

        assert_eq!(lib.nodes[folded].opcode, OpCode::Const);
        assert_eq!(lib.nodes[folded].value.as_ref().unwrap().get(0), &DataValueComponent::Float32(1.0));
    }

    #[test]
    fn folding_a_function_call_specializes_and_evaluates_it() {
        let mut lib = CodeLibrary::new();
        let float_ty = lib.types.float_type(1);

        let mut param_ident = CodeNode::new(OpCode::Ident, Location::UNKNOWN);
        let param = lib.parameters.push(DataParameter::plain("x", DataParameterScope::FunctionInput, float_ty, Vec::new(), Location::UNKNOWN));
        param_ident.extra = ExtraData::ParameterRef(param);
        param_ident.data_type = Some(float_ty.with_reference(true));
        param_ident.types_resolved = true;
        let param_ident = lib.nodes.push(param_ident);

        let load = lib.nodes.push(CodeNode::new(OpCode::Load, Location::UNKNOWN).with_children([param_ident]).with_value(float_ty, DataValue::undefined(1)));
        let ret = lib.nodes.push(CodeNode::new(OpCode::Return, Location::UNKNOWN).with_children([load]));
        let void_ty = lib.types.void_type();
        let mut body = CodeNode::new(OpCode::Scope, Location::UNKNOWN).with_children([ret]);
        body.data_type = Some(void_ty);
        body.types_resolved = true;
        let body = lib.nodes.push(body);

        let callee = lib.functions.push(Function {
            name: "identity".into(),
            params: vec![param],
            return_type: float_ty,
            body,
            attributes: Vec::new(),
            stage_mask: crate::program::ShaderStageMask::empty(),
            location: Location::UNKNOWN,
        });

        let arg = const_node(&mut lib, float_ty, DataValue::scalar(DataValueComponent::Float32(5.0)));
        let mut call = CodeNode::new(OpCode::Call, Location::UNKNOWN).with_children([arg]);
        call.extra = ExtraData::FunctionRef(callee);
        call.data_type = Some(float_ty);
        call.types_resolved = true;
        let call = lib.nodes.push(call);

        let _program = lib.programs.push(Program::new("Root"));
        let mut reporter = CollectingReporter::new();
        let mut folder = FunctionFolder::new(4096);
        let locals = ProgramConstants::new();
        let folded = folder.fold_code(&mut lib, None, &locals, call, &mut reporter);

        assert_eq!(lib.nodes[folded].opcode, OpCode::Const);
        assert_eq!(lib.nodes[folded].value.as_ref().unwrap().get(0), &DataValueComponent::Float32(5.0));
    }
}
