//! Boolean operators. `&&`/`||`/`select` support short-circuit folding via
//! `partial_evaluate` (spec §4.5's "short-circuit ops" note), matching the
//! original's `__logicAnd`/`__logicOr`/`__select` special cases in
//! `renderingShaderFunctionFolder.cpp`.

use super::{register_one, NativeFunctionRegistry};
use crate::types::{BaseType, DataType, TypeLibrary};
use crate::value::{valop, DataValue, DataValueComponent};

pub struct LogicAnd;
impl super::NativeFunction for LogicAnd {
    fn name(&self) -> &'static str {
        "__logicAnd"
    }
    fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 2 {
            return Err("'&&' takes 2 arguments".into());
        }
        Ok(lib.boolean_type(1))
    }
    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        Some(DataValue::scalar(valop::logic_and(args.get(0)?.get(0), args.get(1)?.get(0))))
    }
    fn partial_evaluate(&self, args: &[Option<&DataValue>]) -> Option<DataValue> {
        if let Some(Some(a)) = args.get(0) {
            if a.get(0) == &DataValueComponent::Bool(false) {
                return Some(DataValue::scalar(DataValueComponent::Bool(false)));
            }
        }
        None
    }
}

pub struct LogicOr;
impl super::NativeFunction for LogicOr {
    fn name(&self) -> &'static str {
        "__logicOr"
    }
    fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 2 {
            return Err("'||' takes 2 arguments".into());
        }
        Ok(lib.boolean_type(1))
    }
    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        Some(DataValue::scalar(valop::logic_or(args.get(0)?.get(0), args.get(1)?.get(0))))
    }
    fn partial_evaluate(&self, args: &[Option<&DataValue>]) -> Option<DataValue> {
        if let Some(Some(a)) = args.get(0) {
            if a.get(0) == &DataValueComponent::Bool(true) {
                return Some(DataValue::scalar(DataValueComponent::Bool(true)));
            }
        }
        None
    }
}

pub struct LogicNot;
impl super::NativeFunction for LogicNot {
    fn name(&self) -> &'static str {
        "__logicNot"
    }
    fn determine_return_type(&self, lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 1 {
            return Err("'!' takes 1 argument".into());
        }
        Ok(lib.boolean_type(1))
    }
    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        Some(DataValue::scalar(valop::logic_not(args.first()?.get(0))))
    }
}

/// `select(cond, a, b)`: ternary. Foldable as soon as `cond` is a defined
/// constant, regardless of whether `a`/`b` are — matching the original's
/// branch-pruning short circuit (spec §8 property "branch pruning").
pub struct Select;
impl super::NativeFunction for Select {
    fn name(&self) -> &'static str {
        "select"
    }
    fn determine_return_type(&self, _lib: &mut TypeLibrary, arg_types: &[DataType]) -> Result<DataType, String> {
        if arg_types.len() != 3 {
            return Err("'select' takes 3 arguments".into());
        }
        if crate::types::extract_base_type(_lib, arg_types[0]) != Some(BaseType::Bool) {
            return Err("'select' condition must be bool".into());
        }
        Ok(arg_types[1])
    }
    fn evaluate(&self, args: &[DataValue]) -> Option<DataValue> {
        let cond = args.first()?.get(0);
        match cond.as_bool() {
            Some(true) => Some(args.get(1)?.clone()),
            Some(false) => Some(args.get(2)?.clone()),
            None => None,
        }
    }
    fn partial_evaluate(&self, args: &[Option<&DataValue>]) -> Option<DataValue> {
        let cond = args.first().copied().flatten()?;
        match cond.get(0).as_bool()? {
            true => args.get(1).copied().flatten().cloned(),
            false => args.get(2).copied().flatten().cloned(),
        }
    }
}

pub fn register(reg: &mut NativeFunctionRegistry) {
    register_one(reg, LogicAnd);
    register_one(reg, LogicOr);
    register_one(reg, LogicNot);
    register_one(reg, Select);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeFunction;

    #[test]
    fn logic_and_short_circuits_on_false_without_needing_rhs() {
        let lhs = DataValue::scalar(DataValueComponent::Bool(false));
        let result = LogicAnd.partial_evaluate(&[Some(&lhs), None]);
        assert_eq!(result, Some(DataValue::scalar(DataValueComponent::Bool(false))));
    }

    #[test]
    fn select_picks_branch_without_the_other() {
        let cond = DataValue::scalar(DataValueComponent::Bool(true));
        let a = DataValue::scalar(DataValueComponent::Int32(1));
        let result = Select.partial_evaluate(&[Some(&cond), Some(&a), None]);
        assert_eq!(result, Some(a));
    }
}
