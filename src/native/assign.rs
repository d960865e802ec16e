//! Compound-assignment desugaring (`+=`, `-=`, ...).
//!
//! Unlike the rest of `native/`, these are not registered in the function
//! table: a compound assignment needs an lvalue, not a value-returning
//! call, so the resolver desugars `a += b` directly into `a = a + b` using
//! the same component op `arith.rs` uses, rather than routing through
//! `NativeFunctionRegistry::lookup`. `register` is a no-op kept only so
//! `native::register_builtins` can loop over every family uniformly.

use crate::value::{valop, DataValueComponent};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CompoundOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl CompoundOp {
    pub fn apply(self, a: &DataValueComponent, b: &DataValueComponent) -> DataValueComponent {
        match self {
            CompoundOp::Add => valop::add(a, b),
            CompoundOp::Sub => valop::sub(a, b),
            CompoundOp::Mul => valop::mul(a, b),
            CompoundOp::Div => valop::div(a, b),
            CompoundOp::Rem => valop::rem(a, b),
            CompoundOp::BitAnd => valop::bit_and(a, b),
            CompoundOp::BitOr => valop::bit_or(a, b),
            CompoundOp::BitXor => valop::bit_xor(a, b),
            CompoundOp::Shl => valop::shl(a, b),
            CompoundOp::Shr => valop::shr(a, b),
        }
    }
}

pub fn register(_reg: &mut super::NativeFunctionRegistry) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_add_matches_plain_add() {
        let a = DataValueComponent::Int32(3);
        let b = DataValueComponent::Int32(4);
        assert_eq!(CompoundOp::Add.apply(&a, &b), valop::add(&a, &b));
    }
}
