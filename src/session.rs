//! Top-level driver (spec §5, §7): `CompilationSession` ties resolution,
//! folding, export and metadata building into the phase-gated pipeline the
//! spec describes — each phase runs only if the previous one left the
//! reporter's error count at zero.
//!
//! Grounded on `original_source/.../renderingShaderCompiler.cpp`'s phase
//! sequencing; the resolver/folder/exporter themselves never throw, so this
//! is the one place that decides whether to keep going.

use crate::arena::Id;
use crate::diagnostics::IErrorReporter;
use crate::fold::FunctionFolder;
use crate::metadata::ShaderMetadata;
use crate::program::{CodeLibrary, Function, Program, ProgramInstance, ShaderStage, ShaderStageMask};
use crate::resolve::Resolver;
use crate::stubs::{StubExporter, StubProgram};
use smol_str::SmolStr;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

/// One stage's compilation entry point: which program declares it, which
/// stage slot it fills, and the name of the function to resolve/fold as its
/// entry (the parser/embedder picks the name; this crate never guesses it).
pub struct EntryPoint<'a> {
    pub stage: ShaderStage,
    pub program: Id<Program>,
    pub entry_name: &'a str,
}

/// Tunables the spec leaves as implementation choices (§5, §9).
#[derive(Clone, Debug)]
pub struct CompileOptions {
    /// Interpreter step budget per call, spec §5's suggested hard-cap.
    pub loop_step_budget: u32,
    /// DESIGN.md open question 2: the original only warns on partially
    /// initialized composite locals; set this to escalate to errors.
    pub promote_warnings_to_errors: bool,
    /// Stages outside this mask are skipped (and logged) rather than compiled.
    pub stage_mask: ShaderStageMask,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions { loop_step_budget: 65_536, promote_warnings_to_errors: false, stage_mask: ShaderStageMask::all() }
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("resolution failed with {0} error(s)")]
    ResolutionFailed(usize),
    #[error("constant folding / export failed with {0} error(s)")]
    FoldingFailed(usize),
}

/// The pair of artifacts the spec says outlive the session (§5): the
/// serialized IR and the runtime-facing metadata derived from it.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledShader {
    pub stub_program: StubProgram,
    pub metadata: ShaderMetadata,
}

/// Owns the arena for one compilation (§5: "a compilation session is
/// single-threaded and owns its arena"). The folder is kept alive across
/// `compile` calls so its folded-function cache (§8 property 5, "folding
/// idempotence") is shared by every stage of every program compiled through
/// this session, not just within one call.
pub struct CompilationSession {
    pub lib: CodeLibrary,
    folder: FunctionFolder,
    options: CompileOptions,
}

impl CompilationSession {
    pub fn new(options: CompileOptions) -> Self {
        let folder = FunctionFolder::new(options.loop_step_budget);
        CompilationSession { lib: CodeLibrary::new(), folder, options }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    fn collect_functions(&self, program: Id<Program>, seen_programs: &mut HashSet<Id<Program>>, functions: &mut Vec<Id<Function>>) {
        if !seen_programs.insert(program) {
            return;
        }
        let prog = &self.lib.programs[program];
        functions.extend(prog.functions.iter().copied());
        for parent in prog.parents.clone() {
            self.collect_functions(parent, seen_programs, functions);
        }
    }

    /// Resolves every function transitively reachable from `program` (itself
    /// and its parent-DAG ancestors), deduping by `Id<Function>` so a shared
    /// base-class function is only resolved once. Returns the number of new
    /// errors the resolver reported.
    fn resolve_program(&mut self, program: Id<Program>, reporter: &mut dyn IErrorReporter) -> usize {
        let mut seen_programs = HashSet::new();
        let mut function_ids = Vec::new();
        self.collect_functions(program, &mut seen_programs, &mut function_ids);

        let mut seen_functions = HashSet::new();
        let before = reporter.error_count();
        for function in function_ids {
            if !seen_functions.insert(function) {
                continue;
            }
            let (body, params, return_type) = {
                let f = &self.lib.functions[function];
                (f.body, f.params.clone(), f.return_type)
            };
            debug!(function = %self.lib.functions[function].name, "resolving function");
            Resolver::new(&mut self.lib, reporter, Some(program)).resolve_function_body(body, &params, return_type);
        }
        reporter.error_count() - before
    }

    /// The pipeline from spec §7: resolve every entry point's program (and
    /// its ancestry), stop if that reported any errors, export the surviving
    /// stages (folding happens inside the exporter, spec §4.6), stop if that
    /// reported any errors, then build metadata from the exported stubs.
    pub fn compile(
        &mut self,
        name: impl Into<SmolStr>,
        entry_points: &[EntryPoint<'_>],
        this_instance: Option<Id<ProgramInstance>>,
        content_key: u64,
        reporter: &mut dyn IErrorReporter,
    ) -> Result<CompiledShader, CompileError> {
        let mut resolved_programs = HashSet::new();
        let mut new_errors = 0;
        for entry in entry_points {
            if resolved_programs.insert(entry.program) {
                new_errors += self.resolve_program(entry.program, reporter);
            }
        }
        if new_errors > 0 {
            warn!(new_errors, "resolution failed, stopping before export");
            return Err(CompileError::ResolutionFailed(new_errors));
        }

        let active: Vec<(ShaderStage, Id<Program>, &str)> = entry_points
            .iter()
            .filter_map(|entry| {
                if self.options.stage_mask.contains(ShaderStageMask::single(entry.stage)) {
                    Some((entry.stage, entry.program, entry.entry_name))
                } else {
                    warn!(stage = ?entry.stage, "stage excluded by CompileOptions::stage_mask, skipping");
                    None
                }
            })
            .collect();

        let before_export = reporter.error_count();
        let stub_program = StubExporter::new(&mut self.lib, &mut self.folder).export_program(name, &active, this_instance, reporter);
        let export_errors = reporter.error_count() - before_export;
        if export_errors > 0 {
            return Err(CompileError::FoldingFailed(export_errors));
        }

        let metadata = ShaderMetadata::build_from_stubs(&stub_program, content_key);
        info!(name = %stub_program.name, stages = active.len(), "compiled shader");
        Ok(CompiledShader { stub_program, metadata })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CodeNode, ExtraData, OpCode};
    use crate::diagnostics::{CollectingReporter, Location};
    use crate::program::ShaderStageMask;
    use crate::value::{DataValue, DataValueComponent};

    fn build_trivial_vertex_program(session: &mut CompilationSession) -> Id<Program> {
        let float_ty = session.lib.types.float_type(4);
        let void_ty = session.lib.types.void_type();

        let position = session.lib.create_builtin_parameter_reference(crate::program::BuiltinParameter::Position, float_ty);
        let mut ident = CodeNode::new(OpCode::Ident, Location::UNKNOWN);
        ident.extra = ExtraData::ParameterRef(position);
        // Built directly against a known parameter (not a parsed name), so
        // it's already resolved, the same as a hand-built `Const`.
        ident.data_type = Some(float_ty.with_reference(true));
        ident.types_resolved = true;
        let ident = session.lib.nodes.push(ident);

        let value = session.lib.nodes.push(CodeNode::new(OpCode::Const, Location::UNKNOWN).with_value(float_ty, DataValue::of((0..4).map(|_| DataValueComponent::Float32(0.0)))));
        let store = session.lib.nodes.push(CodeNode::new(OpCode::Store, Location::UNKNOWN).with_children([ident, value]));
        let body = session.lib.nodes.push(CodeNode::new(OpCode::Scope, Location::UNKNOWN).with_children([store]));

        let main = session.lib.functions.push(Function {
            name: "main".into(),
            params: Vec::new(),
            return_type: void_ty,
            body,
            attributes: Vec::new(),
            stage_mask: ShaderStageMask::single(ShaderStage::Vertex),
            location: Location::UNKNOWN,
        });

        let mut program = Program::new("Root");
        program.functions.push(main);
        session.lib.programs.push(program)
    }

    #[test]
    fn compile_resolves_exports_and_builds_metadata() {
        let mut session = CompilationSession::new(CompileOptions::default());
        let program = build_trivial_vertex_program(&mut session);
        let entries = [EntryPoint { stage: ShaderStage::Vertex, program, entry_name: "main" }];
        let mut reporter = CollectingReporter::new();

        let result = session.compile("Trivial", &entries, None, 0xABCD, &mut reporter).expect("compile should succeed");

        assert_eq!(reporter.error_count(), 0);
        assert!(result.metadata.stage_mask.contains(ShaderStageMask::single(ShaderStage::Vertex)));
        assert_eq!(result.metadata.content_key, 0xABCD);
    }

    #[test]
    fn stage_mask_excludes_requested_entry_point() {
        let mut session = CompilationSession::new(CompileOptions { stage_mask: ShaderStageMask::empty(), ..CompileOptions::default() });
        let program = build_trivial_vertex_program(&mut session);
        let entries = [EntryPoint { stage: ShaderStage::Vertex, program, entry_name: "main" }];
        let mut reporter = CollectingReporter::new();

        let result = session.compile("Trivial", &entries, None, 0, &mut reporter).expect("compile should succeed with zero active stages");
        assert!(result.metadata.stage_mask.is_empty());
    }
}
