//! Lowering of AST arguments to RAM expressions and of body literals to RAM
//! conditions.
//!
//! Values are read exclusively through the clause's [`ValueIndex`]: a variable
//! lowers to the tuple element of its canonical reference, an aggregator to
//! its generator slot. String constants are interned into the shared symbol
//! table as a side effect.

use crate::ast::{Argument, Literal, NumericConstant, NumericType};
use crate::error::{TranslateError, TranslateResult};
use crate::ram::{Condition, Expression};
use crate::symbols::SymbolTable;
use crate::value_index::ValueIndex;

/// Lower a constant argument to a RAM expression.
///
/// Numeric constants are parsed at their finalized type; `nil` is the signed
/// zero; strings intern into the symbol table.
pub fn translate_constant(
    arg: &Argument,
    symbols: &SymbolTable,
) -> TranslateResult<Expression> {
    match arg {
        Argument::NumericConstant(constant) => translate_numeric_constant(constant),
        Argument::StringConstant(text) => Ok(Expression::SymbolConstant(symbols.lookup(text))),
        Argument::NilConstant => Ok(Expression::SignedConstant(0)),
        other => Err(TranslateError::UnsupportedConstruct(format!(
            "expected a constant, found '{other}'"
        ))),
    }
}

fn translate_numeric_constant(constant: &NumericConstant) -> TranslateResult<Expression> {
    let final_type = constant
        .final_type
        .ok_or_else(|| TranslateError::UnresolvedConstant(constant.text.clone()))?;
    match final_type {
        NumericType::Signed => constant
            .text
            .parse::<i64>()
            .map(Expression::SignedConstant)
            .map_err(|_| TranslateError::MalformedConstant {
                kind: "signed",
                text: constant.text.clone(),
            }),
        NumericType::Unsigned => constant
            .text
            .parse::<u64>()
            .map(Expression::UnsignedConstant)
            .map_err(|_| TranslateError::MalformedConstant {
                kind: "unsigned",
                text: constant.text.clone(),
            }),
        NumericType::Float => constant
            .text
            .parse::<f64>()
            .map(Expression::FloatConstant)
            .map_err(|_| TranslateError::MalformedConstant {
                kind: "float",
                text: constant.text.clone(),
            }),
    }
}

/// Lower an argument to a RAM expression, consulting the value index.
pub fn translate_value(
    arg: &Argument,
    index: &ValueIndex,
    symbols: &SymbolTable,
) -> TranslateResult<Expression> {
    match arg {
        Argument::Variable(name) => {
            let loc = index.canonical_reference(name).ok_or_else(|| {
                TranslateError::UnsupportedConstruct(format!("ungrounded variable '{name}'"))
            })?;
            Ok(Expression::tuple_element(loc.tuple, loc.element))
        }
        Argument::UnnamedVariable => Ok(Expression::Undef),
        Argument::NumericConstant(_) | Argument::StringConstant(_) | Argument::NilConstant => {
            translate_constant(arg, symbols)
        }
        Argument::Record(args) => {
            let children = args
                .iter()
                .map(|sub| translate_value(sub, index, symbols))
                .collect::<TranslateResult<Vec<_>>>()?;
            Ok(Expression::PackRecord(children))
        }
        Argument::Branch(branch) => Err(TranslateError::UnsupportedConstruct(format!(
            "sum-type constructor '{}' survived erasure",
            branch.constructor
        ))),
        Argument::Aggregator(_) => {
            let loc = index.generator_loc(arg).ok_or_else(|| {
                TranslateError::UnsupportedConstruct(
                    "aggregator used outside a generator context".to_string(),
                )
            })?;
            Ok(Expression::tuple_element(loc.tuple, loc.element))
        }
        Argument::Intrinsic(func) => {
            if func.op.is_multi_result() {
                let loc = index.generator_loc(arg).ok_or_else(|| {
                    TranslateError::UnsupportedConstruct(format!(
                        "multi-result functor '{}' used outside a generator context",
                        func.op
                    ))
                })?;
                return Ok(Expression::tuple_element(loc.tuple, loc.element));
            }
            let args = func
                .args
                .iter()
                .map(|sub| translate_value(sub, index, symbols))
                .collect::<TranslateResult<Vec<_>>>()?;
            Ok(Expression::Intrinsic { op: func.op, args })
        }
        Argument::UserFunctor(func) => {
            let args = func
                .args
                .iter()
                .map(|sub| translate_value(sub, index, symbols))
                .collect::<TranslateResult<Vec<_>>>()?;
            Ok(Expression::UserDefined {
                name: func.name.clone(),
                args,
            })
        }
    }
}

/// Lower a body literal to a RAM condition.
///
/// Positive atoms yield `None`: they are consumed by level introduction, not
/// as filters. Negating a nullary atom is an emptiness check.
pub fn translate_constraint(
    lit: &Literal,
    index: &ValueIndex,
    symbols: &SymbolTable,
) -> TranslateResult<Option<Condition>> {
    match lit {
        Literal::Atom(_) => Ok(None),
        Literal::Negation(atom) => {
            if atom.arity() == 0 {
                return Ok(Some(Condition::EmptinessCheck(atom.relation.clone())));
            }
            let values = atom
                .args
                .iter()
                .map(|arg| translate_value(arg, index, symbols))
                .collect::<TranslateResult<Vec<_>>>()?;
            Ok(Some(
                Condition::ExistenceCheck {
                    relation: atom.relation.clone(),
                    values,
                }
                .negate(),
            ))
        }
        Literal::Constraint(constraint) => {
            let lhs = translate_value(&constraint.lhs, index, symbols)?;
            let rhs = translate_value(&constraint.rhs, index, symbols)?;
            Ok(Some(Condition::Constraint {
                op: constraint.op,
                lhs,
                rhs,
            }))
        }
    }
}
