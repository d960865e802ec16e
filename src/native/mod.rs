//! Native-function registry (spec §4.2, §6).
//!
//! Every builtin the language surface exposes (`dot`, `normalize`, `asint`,
//! `InterlockedAdd`, `ddx`, ...) is one `NativeFunction` impl registered here
//! by name. The resolver looks functions up by name to type-check a call;
//! the folder looks the same function up to fold it when every argument is
//! a whole, defined constant. Functions that touch device state (atomics,
//! barriers, texture sampling, derivatives) simply refuse to fold.
//!
//! Grounded on `original_source/.../renderingShaderNativeFunction.{h,cpp}`:
//! the original is one class hierarchy with virtual `determineReturnType`/
//! `evaluate`; this is the trait-object equivalent, split by family into the
//! same `NativeFunctions_*.cpp` groups the original uses.

pub mod arith;
pub mod assign;
pub mod atomic;
pub mod barrier;
pub mod bitwise;
pub mod cast;
pub mod compare;
pub mod construct;
pub mod derivative;
pub mod logic;
pub mod math;
pub mod matmul;
pub mod pack;
pub mod reduce;
pub mod texture;

use crate::diagnostics::{IErrorReporter, Location};
use crate::types::{DataType, TypeLibrary};
use crate::value::DataValue;
use fxhash::FxHashMap;
use once_cell::sync::OnceCell;

/// One builtin function. `determine_return_type` is the typing rule the
/// resolver calls during `ResolveTypes`; `evaluate` is only ever invoked by
/// the folder once every argument is known to be a whole defined constant
/// (`DataValue::is_whole_value_defined`).
pub trait NativeFunction: Send + Sync {
    fn name(&self) -> &'static str;

    fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String>;

    /// Folds a call whose arguments are all whole, defined constants.
    /// Default: not foldable (side-effecting or nondeterministic builtins
    /// — atomics, barriers, texture fetches, derivatives — override nothing
    /// and stay unfoldable).
    fn evaluate(&self, _args: &[DataValue]) -> Option<DataValue> {
        None
    }

    /// Short-circuit folding with possibly-undefined/non-constant operands
    /// (`select`, `&&`, `||`): return `Some` only when the result is
    /// determined without needing every argument, e.g. `false && x` folds
    /// to `false` regardless of `x`.
    fn partial_evaluate(&self, _args: &[Option<&DataValue>]) -> Option<DataValue> {
        None
    }

    /// Functions this crate cannot fold at all regardless of argument
    /// constancy (device reads, barriers, derivatives).
    fn is_foldable(&self) -> bool {
        true
    }
}

pub struct NativeFunctionRegistry {
    functions: FxHashMap<&'static str, Box<dyn NativeFunction>>,
}

impl NativeFunctionRegistry {
    fn new() -> Self {
        NativeFunctionRegistry { functions: FxHashMap::default() }
    }

    fn register(&mut self, f: Box<dyn NativeFunction>) {
        self.functions.insert(f.name(), f);
    }

    pub fn lookup(&self, name: &str) -> Option<&dyn NativeFunction> {
        self.functions.get(name).map(|b| b.as_ref())
    }

    pub fn resolve_call(
        &self,
        lib: &mut TypeLibrary,
        reporter: &mut dyn IErrorReporter,
        location: Location,
        name: &str,
        arg_types: &[DataType],
    ) -> Option<DataType> {
        match self.lookup(name) {
            Some(f) => match f.determine_return_type(lib, arg_types) {
                Ok(ty) => Some(ty),
                Err(msg) => {
                    reporter.report_error(location, format!("call to '{name}': {msg}"));
                    None
                }
            },
            None => {
                reporter.report_error(location, format!("unknown native function '{name}'"));
                None
            }
        }
    }
}

static REGISTRY: OnceCell<NativeFunctionRegistry> = OnceCell::new();

/// Builds the process-wide builtin table once (spec §6's closed
/// native-function name set). Safe to call repeatedly; only the first call
/// does the work.
pub fn builtins() -> &'static NativeFunctionRegistry {
    REGISTRY.get_or_init(register_builtins)
}

fn register_builtins() -> NativeFunctionRegistry {
    let mut reg = NativeFunctionRegistry::new();
    arith::register(&mut reg);
    compare::register(&mut reg);
    logic::register(&mut reg);
    bitwise::register(&mut reg);
    cast::register(&mut reg);
    construct::register(&mut reg);
    math::register(&mut reg);
    matmul::register(&mut reg);
    pack::register(&mut reg);
    atomic::register(&mut reg);
    barrier::register(&mut reg);
    derivative::register(&mut reg);
    texture::register(&mut reg);
    reduce::register(&mut reg);
    assign::register(&mut reg);
    reg
}

pub(crate) fn register_one(reg: &mut NativeFunctionRegistry, f: impl NativeFunction + 'static) {
    reg.register(Box::new(f));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_populated_once() {
        let r1 = builtins();
        let r2 = builtins();
        assert!(std::ptr::eq(r1, r2));
        assert!(r1.lookup("dot").is_some());
        assert!(r1.lookup("not_a_real_function").is_none());
    }
}
