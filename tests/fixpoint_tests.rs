//! Tests for the semi-naive fixpoint skeleton: scratch relation triples,
//! preamble/loop/exit/update/postamble structure, version coverage, and the
//! non-duplication guards.

use ramlayer::ast::builders::{ClauseBuilder, ProgramBuilder};
use ramlayer::ast::Program;
use ramlayer::ram::{Condition, Expression, Operation, Statement};
use ramlayer::{translate, TranslatorConfig};

fn transitive_closure() -> Program {
    ProgramBuilder::new()
        .relation("edge", 2)
        .relation("path", 2)
        .input("edge")
        .output("path")
        .clause(
            ClauseBuilder::new("path")
                .head_vars(["x", "y"])
                .body_atom("edge", ["x", "y"])
                .build(),
        )
        .clause(
            ClauseBuilder::new("path")
                .head_vars(["x", "z"])
                .body_atom("edge", ["x", "y"])
                .body_atom("path", ["y", "z"])
                .build(),
        )
        .build()
}

fn flatten<'s>(stmt: &'s Statement, out: &mut Vec<&'s Statement>) {
    out.push(stmt);
    for child in stmt.children() {
        flatten(child, out);
    }
}

fn stratum_statements<'p>(
    program: &'p ramlayer::ram::Program,
    name: &str,
) -> Vec<&'p Statement> {
    let mut out = Vec::new();
    flatten(program.subroutine(name).expect("stratum exists"), &mut out);
    out
}

fn operations<'o>(op: &'o Operation) -> Vec<&'o Operation> {
    let mut out = Vec::new();
    let mut cursor = Some(op);
    while let Some(cur) = cursor {
        out.push(cur);
        cursor = cur.inner();
    }
    out
}

#[test]
fn test_recursive_relation_declares_triple() {
    let unit = translate(transitive_closure(), TranslatorConfig::default()).unwrap();
    let main = unit.program.relation("path").expect("path declared");
    let delta = unit.program.relation("@delta_path").expect("delta declared");
    let new = unit.program.relation("@new_path").expect("new declared");

    for scratch in [delta, new] {
        assert_eq!(scratch.arity, main.arity);
        assert_eq!(scratch.aux_arity, main.aux_arity);
        assert_eq!(scratch.attribute_names, main.attribute_names);
        assert_eq!(scratch.attribute_types, main.attribute_types);
        assert_eq!(scratch.representation, main.representation);
    }

    // non-recursive relations stay single
    assert!(unit.program.relation("@delta_edge").is_none());
    assert!(unit.program.relation("@new_edge").is_none());
}

#[test]
fn test_stratum_structure() {
    // S2: preamble seeds path and copies into the delta; the loop body reads
    // the delta and guards against the main relation; exit on empty new;
    // update merges, swaps, clears; postamble clears the scratch relations
    let unit = translate(transitive_closure(), TranslatorConfig::default()).unwrap();
    let stmts = stratum_statements(&unit.program, "stratum_1");

    // preamble: a query scans path into @delta_path
    let seeds_delta = stmts.iter().any(|stmt| {
        matches!(stmt, Statement::Query(op)
            if matches!(op, Operation::Scan { relation, .. } if relation == "path")
            && matches!(op.sink(), Operation::Insert { relation, .. } if relation == "@delta_path"))
    });
    assert!(seeds_delta, "preamble must copy path into @delta_path");

    // the loop exists and contains a parallel section
    assert!(stmts.iter().any(|s| matches!(s, Statement::Loop(_))));
    assert!(stmts.iter().any(|s| matches!(s, Statement::Parallel(_))));

    // exit on emptiness of @new_path
    let exits: Vec<_> = stmts
        .iter()
        .filter_map(|s| match s {
            Statement::Exit(cond) => Some(cond),
            _ => None,
        })
        .collect();
    assert!(exits
        .iter()
        .any(|cond| matches!(cond, Condition::EmptinessCheck(rel) if rel == "@new_path")));

    // update: merge @new_path into path, swap, clear
    let merges_new = stmts.iter().any(|stmt| {
        matches!(stmt, Statement::Query(op)
            if matches!(op, Operation::Scan { relation, .. } if relation == "@new_path")
            && matches!(op.sink(), Operation::Insert { relation, .. } if relation == "path"))
    });
    assert!(merges_new, "update must merge @new_path into path");
    assert!(stmts.iter().any(|s| matches!(
        s,
        Statement::Swap { lhs, rhs } if lhs == "@delta_path" && rhs == "@new_path"
    )));

    // postamble (and update) clear the scratch relations
    let cleared: Vec<_> = stmts
        .iter()
        .filter_map(|s| match s {
            Statement::Clear(rel) => Some(rel.as_str()),
            _ => None,
        })
        .collect();
    assert!(cleared.contains(&"@delta_path"));
    assert!(cleared.contains(&"@new_path"));
}

#[test]
fn test_loop_rule_reads_delta_and_writes_new() {
    let unit = translate(transitive_closure(), TranslatorConfig::default()).unwrap();
    let stmts = stratum_statements(&unit.program, "stratum_1");

    let rule = stmts
        .iter()
        .filter_map(|s| match s {
            Statement::Query(op) => Some(op),
            _ => None,
        })
        .find(|op| op.scanned_relations().contains(&"@delta_path"))
        .expect("loop rule reads the delta");

    match rule.sink() {
        Operation::Insert { relation, .. } => assert_eq!(relation, "@new_path"),
        other => panic!("expected insert into @new_path, got {other:?}"),
    }

    // the re-derivation guard against the main relation is present
    let guarded = operations(rule).iter().any(|op| {
        matches!(op, Operation::Filter {
            condition: Condition::Negation(inner),
            ..
        } if matches!(&**inner, Condition::ExistenceCheck { relation, .. } if relation == "path"))
    });
    assert!(guarded, "loop rule must guard against re-derivation");
}

#[test]
fn test_version_coverage_two_recursive_atoms() {
    // same(x, z) :- same(x, y), same(y, z) has two SCC atoms, so exactly two
    // versions with delta at positions 0 and 1 respectively
    let program = ProgramBuilder::new()
        .relation("same", 2)
        .clause(
            ClauseBuilder::new("same")
                .head_vars(["x", "z"])
                .body_atom("same", ["x", "y"])
                .body_atom("same", ["y", "z"])
                .build(),
        )
        .build();

    let unit = translate(program, TranslatorConfig::default()).unwrap();
    let stmts = stratum_statements(&unit.program, "stratum_0");

    let loop_rules: Vec<_> = stmts
        .iter()
        .filter_map(|s| match s {
            Statement::Query(op) => Some(op),
            _ => None,
        })
        .filter(|op| matches!(op.sink(), Operation::Insert { relation, .. } if relation == "@new_same"))
        .collect();
    assert_eq!(loop_rules.len(), 2, "one rule instantiation per version");

    let scan_orders: Vec<Vec<&str>> =
        loop_rules.iter().map(|op| op.scanned_relations()).collect();
    assert!(scan_orders.contains(&vec!["@delta_same", "same"]));
    assert!(scan_orders.contains(&vec!["same", "@delta_same"]));
}

#[test]
fn test_semi_naive_non_duplication_guard() {
    // in version 0, the second SCC atom must be guarded against the delta
    let program = ProgramBuilder::new()
        .relation("same", 2)
        .clause(
            ClauseBuilder::new("same")
                .head_vars(["x", "z"])
                .body_atom("same", ["x", "y"])
                .body_atom("same", ["y", "z"])
                .build(),
        )
        .build();

    let unit = translate(program, TranslatorConfig::default()).unwrap();
    let stmts = stratum_statements(&unit.program, "stratum_0");

    let version0 = stmts
        .iter()
        .filter_map(|s| match s {
            Statement::Query(op) => Some(op),
            _ => None,
        })
        .find(|op| op.scanned_relations() == vec!["@delta_same", "same"])
        .expect("version 0 exists");

    let delta_guard = operations(version0).iter().any(|op| {
        matches!(op, Operation::Filter {
            condition: Condition::Negation(inner),
            ..
        } if matches!(&**inner, Condition::ExistenceCheck { relation, .. } if relation == "@delta_same"))
    });
    assert!(
        delta_guard,
        "version 0 must negate the delta for the later SCC atom"
    );
}

#[test]
fn test_limitsize_adds_second_exit() {
    // S5: .limitsize path(n=100)
    let mut program = transitive_closure();
    program.directives.extend(
        ProgramBuilder::new()
            .limitsize("path", 100)
            .build()
            .directives,
    );

    let unit = translate(program, TranslatorConfig::default()).unwrap();
    let stmts = stratum_statements(&unit.program, "stratum_1");

    let limit_exit = stmts.iter().any(|s| {
        matches!(s, Statement::Exit(Condition::Constraint {
            op: ramlayer::ast::ConstraintOp::Ge,
            lhs: Expression::RelationSize(rel),
            rhs: Expression::SignedConstant(100),
        }) if rel == "path")
    });
    assert!(limit_exit, "limitsize must add a RelationSize exit");
}

#[test]
fn test_mutually_recursive_relations_share_stratum() {
    let program = ProgramBuilder::new()
        .relation("even", 1)
        .relation("odd", 1)
        .relation("succ", 2)
        .clause(
            ClauseBuilder::new("even")
                .head_vars(["y"])
                .body_atom("odd", ["x"])
                .body_atom("succ", ["x", "y"])
                .build(),
        )
        .clause(
            ClauseBuilder::new("odd")
                .head_vars(["y"])
                .body_atom("even", ["x"])
                .body_atom("succ", ["x", "y"])
                .build(),
        )
        .build();

    let unit = translate(program, TranslatorConfig::default()).unwrap();

    // both relations get their triples
    for rel in ["even", "odd"] {
        assert!(unit.program.relation(&format!("@delta_{rel}")).is_some());
        assert!(unit.program.relation(&format!("@new_{rel}")).is_some());
    }

    // their rules share one parallel section in one stratum
    let strata: Vec<_> = unit
        .program
        .subroutines
        .values()
        .filter(|body| {
            let mut out = Vec::new();
            flatten(body, &mut out);
            out.iter().any(|s| matches!(s, Statement::Parallel(_)))
        })
        .collect();
    assert_eq!(strata.len(), 1, "one recursive stratum expected");

    let mut out = Vec::new();
    flatten(strata[0], &mut out);
    let parallel_arms = out
        .iter()
        .find_map(|s| match s {
            Statement::Parallel(arms) => Some(arms.len()),
            _ => None,
        })
        .unwrap();
    assert_eq!(parallel_arms, 2, "one parallel arm per relation");

    // the exit condition is the conjunction over both new relations
    let exit = out
        .iter()
        .find_map(|s| match s {
            Statement::Exit(cond @ Condition::Conjunction(..)) => Some(cond),
            _ => None,
        })
        .expect("conjunction exit over the SCC");
    let text = format!("{exit}");
    assert!(text.contains("@new_even") && text.contains("@new_odd"));
}
