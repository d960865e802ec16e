//! A GPU shader compiler core: semantic resolution, constant-folding
//! partial evaluation, and IR/metadata emission for back-end consumption.
//!
//! This crate takes an already-parsed `CodeNode` AST (spec §6 — lexing and
//! parsing are an external collaborator's job) through three phases:
//! [`resolve`] fills in types and links identifiers to declarations,
//! [`fold`] specializes and partially evaluates functions against known
//! constants, and [`stubs`] exports the folded graph into a serializable IR
//! consumed by a back-end codegen. [`metadata`] derives the
//! [`metadata::ShaderMetadata`] record a device layer needs to build root
//! signatures / descriptor set layouts. [`session`] ties the three phases
//! together behind the error-gated pipeline spec §7 describes.
//!
//! Out of scope (spec §1): the lexer/parser, the type-library's own symbol
//! table construction from source text, back-end codegens (SPIR-V, DXIL,
//! ...), the GPU device abstraction, and a render test harness — all are
//! external collaborators this crate hands its output to.

pub mod arena;
pub mod ast;
pub mod diagnostics;
pub mod fold;
pub mod metadata;
pub mod native;
pub mod program;
pub mod resolve;
pub mod session;
pub mod stubs;
pub mod types;
pub mod value;

pub use diagnostics::{CollectingReporter, Diagnostic, IErrorReporter, Location, Severity};
pub use fold::{ExecutionStack, FunctionFolder};
pub use metadata::ShaderMetadata;
pub use native::builtins;
pub use program::{CodeLibrary, Function, Program, ProgramConstants, ProgramInstance, ShaderStage, ShaderStageMask};
pub use resolve::Resolver;
pub use session::{CompilationSession, CompileError, CompileOptions, CompiledShader, EntryPoint};
pub use stubs::{read_stub_program, write_stub_program, StubExporter, StubProgram};
