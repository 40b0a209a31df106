//! Tests for subsumptive clause lowering: the four translation modes, their
//! relation-variant table, the self-distinctness filters, and the reject/
//! delete maintenance around the fixpoint update.

use ramlayer::ast::builders::{ClauseBuilder, ProgramBuilder};
use ramlayer::ast::{Argument, ConstraintOp, Program, RelationRepresentation};
use ramlayer::ram::{Condition, Operation, Statement};
use ramlayer::{translate, TranslatorConfig};

/// p(x, y) <= p(x, y2) :- y <= y2, keeping only the largest y per x
fn min_program() -> Program {
    ProgramBuilder::new()
        .relation("p", 2)
        .clause(
            ClauseBuilder::new("p")
                .head_vars(["x", "y"])
                .body_atom("p", ["x", "y"])
                .body_atom("p", ["x", "y2"])
                .constraint(
                    ConstraintOp::Le,
                    Argument::Variable("y".to_string()),
                    Argument::Variable("y2".to_string()),
                )
                .subsumptive()
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

fn all_queries(program: &ramlayer::ram::Program) -> Vec<&Operation> {
    let mut stmts = Vec::new();
    for body in program.subroutines.values() {
        flatten(body, &mut stmts);
    }
    stmts
        .into_iter()
        .filter_map(|stmt| match stmt {
            Statement::Query(op) => Some(op),
            _ => None,
        })
        .collect()
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

fn has_distinctness(op: &Operation) -> bool {
    operations(op).iter().any(|cur| {
        matches!(cur, Operation::Filter {
            condition: Condition::Negation(inner),
            ..
        } if matches!(&**inner, Condition::Constraint { op: ConstraintOp::Eq, .. }))
    })
}

#[test]
fn test_subsumptive_relation_declares_all_variants() {
    let unit = translate(min_program(), TranslatorConfig::default()).unwrap();
    for name in ["p", "@delta_p", "@new_p", "@reject_p", "@delete_p"] {
        assert!(
            unit.program.relation(name).is_some(),
            "missing declaration for {name}"
        );
    }
    // subsumption needs tuple deletion
    assert_eq!(
        unit.program.relation("p").unwrap().representation,
        RelationRepresentation::BtreeDelete
    );
}

#[test]
fn test_four_modes_emitted() {
    // S6: one translation per mode, targeting @reject_p twice and
    // @delete_p twice
    let unit = translate(min_program(), TranslatorConfig::default()).unwrap();
    let queries = all_queries(&unit.program);

    let reject_queries: Vec<_> = queries
        .iter()
        .filter(|op| matches!(op.sink(), Operation::Insert { relation, .. } if relation == "@reject_p"))
        .collect();
    let delete_queries: Vec<_> = queries
        .iter()
        .filter(|op| matches!(op.sink(), Operation::Insert { relation, .. } if relation == "@delete_p"))
        .collect();
    assert_eq!(reject_queries.len(), 2, "two reject modes");
    assert_eq!(delete_queries.len(), 2, "two delete modes");

    // RejectNewNew reads @new_p twice, RejectNewCurrent mixes @new_p and p
    let mut reject_sources: Vec<Vec<&str>> = reject_queries
        .iter()
        .map(|op| op.scanned_relations())
        .collect();
    reject_sources.sort();
    assert_eq!(
        reject_sources,
        vec![vec!["@new_p", "@new_p"], vec!["@new_p", "p"]]
    );

    // DeleteCurrentDelta reads p and @delta_p, DeleteCurrentCurrent p twice
    let mut delete_sources: Vec<Vec<&str>> = delete_queries
        .iter()
        .map(|op| op.scanned_relations())
        .collect();
    delete_sources.sort();
    assert_eq!(
        delete_sources,
        vec![vec!["p", "@delta_p"], vec!["p", "p"]]
    );
}

#[test]
fn test_distinctness_on_coinciding_sources_only() {
    let unit = translate(min_program(), TranslatorConfig::default()).unwrap();
    let queries = all_queries(&unit.program);

    for op in queries {
        let sources = op.scanned_relations();
        match op.sink() {
            Operation::Insert { relation, .. } if relation == "@reject_p" => {
                let same_source = sources == vec!["@new_p", "@new_p"];
                assert_eq!(
                    has_distinctness(op),
                    same_source,
                    "distinctness exactly when both sources coincide: {sources:?}"
                );
            }
            Operation::Insert { relation, .. } if relation == "@delete_p" => {
                let same_source = sources == vec!["p", "p"];
                assert_eq!(
                    has_distinctness(op),
                    same_source,
                    "distinctness exactly when both sources coincide: {sources:?}"
                );
            }
            _ => {}
        }
    }
}

#[test]
fn test_reject_and_delete_applied_and_cleared() {
    let unit = translate(min_program(), TranslatorConfig::default()).unwrap();
    let mut stmts = Vec::new();
    for body in unit.program.subroutines.values() {
        flatten(body, &mut stmts);
    }

    // rejected tuples are erased from @new_p, deleted ones from p
    let queries: Vec<_> = stmts
        .iter()
        .filter_map(|stmt| match stmt {
            Statement::Query(op) => Some(op),
            _ => None,
        })
        .collect();
    let erases_new = queries.iter().any(|op| {
        matches!(op, Operation::Scan { relation, .. } if relation == "@reject_p")
            && matches!(op.sink(), Operation::Erase { relation, .. } if relation == "@new_p")
    });
    let erases_concrete = queries.iter().any(|op| {
        matches!(op, Operation::Scan { relation, .. } if relation == "@delete_p")
            && matches!(op.sink(), Operation::Erase { relation, .. } if relation == "p")
    });
    assert!(erases_new, "rejects must be erased from @new_p");
    assert!(erases_concrete, "deletes must be erased from p");

    // both scratch relations are cleared
    let cleared: Vec<_> = stmts
        .iter()
        .filter_map(|s| match s {
            Statement::Clear(rel) => Some(rel.as_str()),
            _ => None,
        })
        .collect();
    assert!(cleared.contains(&"@reject_p"));
    assert!(cleared.contains(&"@delete_p"));
}

#[test]
fn test_mode_placement_around_the_loop() {
    // rejects prune @new_p inside the loop arms before the exit check;
    // deletes run outside the arms (preamble and update phase)
    let unit = translate(min_program(), TranslatorConfig::default()).unwrap();
    let mut stmts = Vec::new();
    for body in unit.program.subroutines.values() {
        flatten(body, &mut stmts);
    }

    let arms = stmts
        .iter()
        .find_map(|s| match s {
            Statement::Parallel(arms) => Some(arms),
            _ => None,
        })
        .expect("subsumptive relation still gets a fixpoint loop");
    let mut inner = Vec::new();
    for arm in arms {
        flatten(arm, &mut inner);
    }

    let arm_sinks: Vec<&str> = inner
        .iter()
        .filter_map(|stmt| match stmt {
            Statement::Query(op) => match op.sink() {
                Operation::Insert { relation, .. } => Some(relation.as_str()),
                _ => None,
            },
            _ => None,
        })
        .collect();
    assert!(
        arm_sinks.iter().any(|rel| *rel == "@reject_p"),
        "reject modes belong to the loop arm"
    );
    assert!(
        !arm_sinks.iter().any(|rel| *rel == "@delete_p"),
        "delete modes run outside the loop arms"
    );
}
