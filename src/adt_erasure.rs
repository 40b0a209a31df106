//! Sum-type erasure.
//!
//! Rewrites every sum-type constructor in a program to its record
//! representation, bottom-up:
//!
//! - enum types (all branches nullary) erase to the signed branch id,
//! - single-argument branches to `[branch_id, arg]`,
//! - everything else to `[branch_id, [args…]]`.
//!
//! Branch ids are positions in the lexicographic ordering of the type's
//! branch names. Runs before clause translation on a freshly cloned program;
//! no constructor survives into the translator.

use crate::analysis::SumTypeBranches;
use crate::ast::{Argument, Atom, Clause, Literal, NumericConstant, Program};
use tracing::debug;

/// Erase every sum-type constructor in the program.
///
/// Returns whether anything was rewritten.
pub fn erase_sum_types(program: &mut Program, branches: &SumTypeBranches) -> bool {
    let mut changed = false;
    for clause in &mut program.clauses {
        erase_clause(clause, branches, &mut changed);
    }
    if changed {
        debug!("sum-type constructors erased to record representation");
    }
    changed
}

fn erase_clause(clause: &mut Clause, branches: &SumTypeBranches, changed: &mut bool) {
    erase_atom(&mut clause.head, branches, changed);
    for lit in &mut clause.body {
        erase_literal(lit, branches, changed);
    }
}

fn erase_literal(lit: &mut Literal, branches: &SumTypeBranches, changed: &mut bool) {
    match lit {
        Literal::Atom(atom) | Literal::Negation(atom) => erase_atom(atom, branches, changed),
        Literal::Constraint(constraint) => {
            erase_argument(&mut constraint.lhs, branches, changed);
            erase_argument(&mut constraint.rhs, branches, changed);
        }
    }
}

fn erase_atom(atom: &mut Atom, branches: &SumTypeBranches, changed: &mut bool) {
    for arg in &mut atom.args {
        erase_argument(arg, branches, changed);
    }
}

fn erase_argument(arg: &mut Argument, branches: &SumTypeBranches, changed: &mut bool) {
    // rewrite sub-expressions first
    match arg {
        Argument::Record(args) => {
            for sub in args.iter_mut() {
                erase_argument(sub, branches, changed);
            }
        }
        Argument::Branch(branch) => {
            for sub in branch.args.iter_mut() {
                erase_argument(sub, branches, changed);
            }
        }
        Argument::Intrinsic(func) => {
            for sub in func.args.iter_mut() {
                erase_argument(sub, branches, changed);
            }
        }
        Argument::UserFunctor(func) => {
            for sub in func.args.iter_mut() {
                erase_argument(sub, branches, changed);
            }
        }
        Argument::Aggregator(agg) => {
            if let Some(target) = &mut agg.target {
                erase_argument(target, branches, changed);
            }
            for lit in &mut agg.body {
                erase_literal(lit, branches, changed);
            }
        }
        Argument::Variable(_)
        | Argument::UnnamedVariable
        | Argument::NumericConstant(_)
        | Argument::StringConstant(_)
        | Argument::NilConstant => {}
    }

    let Argument::Branch(branch) = arg else {
        return;
    };
    let Some(info) = branches.branch(&branch.constructor) else {
        // an unknown constructor is left for the translator to reject
        return;
    };

    *changed = true;
    let tag = Argument::NumericConstant(NumericConstant::signed(info.branch_id));

    if info.is_enum {
        *arg = tag;
        return;
    }

    let mut args = std::mem::take(&mut branch.args);
    let payload = if args.len() == 1 {
        args.swap_remove(0)
    } else {
        Argument::Record(args)
    };
    *arg = Argument::Record(vec![tag, payload]);
}
