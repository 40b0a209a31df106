//! End-to-end translation tests: facts, non-recursive rules, sum-type
//! erasure, and plan handling.

use ramlayer::ast::builders::{AtomBuilder, ClauseBuilder, ProgramBuilder};
use ramlayer::ast::{Argument, NumericConstant};
use ramlayer::ram::{Condition, Expression, Operation, Statement};
use ramlayer::{translate, SchedulerStatistics, TranslateError, TranslationUnit, TranslatorConfig};

fn flatten<'s>(stmt: &'s Statement, out: &mut Vec<&'s Statement>) {
    out.push(stmt);
    for child in stmt.children() {
        flatten(child, out);
    }
}

fn all_statements(program: &ramlayer::ram::Program) -> Vec<&Statement> {
    let mut out = Vec::new();
    for body in program.subroutines.values() {
        flatten(body, &mut out);
    }
    for stmt in &program.statements {
        flatten(stmt, &mut out);
    }
    out
}

fn queries(program: &ramlayer::ram::Program) -> Vec<&Operation> {
    all_statements(program)
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

#[test]
fn test_empty_program_translates_to_empty_ram() {
    let unit = translate(ramlayer::ast::Program::default(), TranslatorConfig::default()).unwrap();
    assert!(unit.program.statements.is_empty());
    assert!(unit.program.subroutines.is_empty());
    assert!(unit.program.relations.is_empty());
}

#[test]
fn test_fact_and_copy_rule() {
    // S1: edge(1, 2). and path(x, y) :- edge(x, y).
    let program = ProgramBuilder::new()
        .relation("edge", 2)
        .relation("path", 2)
        .output("path")
        .clause(
            ClauseBuilder::new("edge")
                .head_args([
                    Argument::NumericConstant(NumericConstant::signed(1)),
                    Argument::NumericConstant(NumericConstant::signed(2)),
                ])
                .build(),
        )
        .clause(
            ClauseBuilder::new("path")
                .head_vars(["x", "y"])
                .body_atom("edge", ["x", "y"])
                .build(),
        )
        .build();

    let unit = translate(program, TranslatorConfig::default()).unwrap();

    // exactly the two concrete declarations, no scratch relations
    assert_eq!(unit.program.relations.len(), 2);
    assert!(unit.program.relation("edge").is_some());
    assert!(unit.program.relation("path").is_some());

    // the fact is a bare insert with constant values
    let all = queries(&unit.program);
    let fact = all
        .iter()
        .find(|op| matches!(op, Operation::Insert { relation, .. } if relation == "edge"))
        .expect("fact insert exists");
    match fact {
        Operation::Insert { values, .. } => {
            assert_eq!(
                values,
                &vec![Expression::SignedConstant(1), Expression::SignedConstant(2)]
            );
        }
        _ => unreachable!(),
    }

    // the rule scans edge at level 0 and inserts into path
    let rule = all
        .iter()
        .find(|op| matches!(op, Operation::Scan { relation, .. } if relation == "edge"))
        .expect("rule scan exists");
    match rule {
        Operation::Scan { level, .. } => assert_eq!(*level, 0),
        _ => unreachable!(),
    }
    assert!(operations(rule).iter().any(|op| matches!(
        op,
        Operation::Insert { relation, .. } if relation == "path"
    )));

    // the main program calls the strata in dependency order
    let calls: Vec<_> = unit
        .program
        .statements
        .iter()
        .filter_map(|stmt| match stmt {
            Statement::Call(name) => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(calls, vec!["stratum_0", "stratum_1"]);
}

#[test]
fn test_enum_adt_uses_become_constants() {
    // S3: type Color = Red | Green | Blue, lexicographically Blue=0,
    // Green=1, Red=2
    let program = ProgramBuilder::new()
        .relation("favorite", 1)
        .sum_type("Color", [("Red", vec![]), ("Green", vec![]), ("Blue", vec![])])
        .clause(
            ClauseBuilder::new("favorite")
                .head_args([Argument::Branch(ramlayer::ast::BranchInit {
                    constructor: "Red".to_string(),
                    args: vec![],
                })])
                .build(),
        )
        .build();

    let unit = translate(program, TranslatorConfig::default()).unwrap();
    let all = queries(&unit.program);
    let fact = all
        .iter()
        .find(|op| matches!(op, Operation::Insert { relation, .. } if relation == "favorite"))
        .expect("fact insert exists");
    match fact {
        Operation::Insert { values, .. } => {
            assert_eq!(values, &vec![Expression::SignedConstant(2)]);
        }
        _ => unreachable!(),
    }
}

#[test]
fn test_general_adt_match_unpacks_twice_with_tag_equality() {
    // S4: type Tree = Leaf | Node {l, r}; matching Node(x, y) needs two
    // nested unpacks plus a tag equality on the outer level
    let program = ProgramBuilder::new()
        .relation("tree", 1)
        .relation("children", 2)
        .sum_type("Tree", [("Leaf", vec![]), ("Node", vec!["Tree", "Tree"])])
        .clause(
            ClauseBuilder::new("children")
                .head_vars(["x", "y"])
                .literal(ramlayer::ast::Literal::Atom(
                    AtomBuilder::new("tree")
                        .arg(Argument::Branch(ramlayer::ast::BranchInit {
                            constructor: "Node".to_string(),
                            args: vec![
                                Argument::Variable("x".to_string()),
                                Argument::Variable("y".to_string()),
                            ],
                        }))
                        .build(),
                ))
                .build(),
        )
        .build();

    let unit = translate(program, TranslatorConfig::default()).unwrap();
    let all = queries(&unit.program);
    let rule = all
        .iter()
        .find(|op| matches!(op, Operation::Scan { relation, .. } if relation == "tree"))
        .expect("rule scan exists");
    let chain = operations(rule);

    // two unpack levels: [tag, payload] then the payload pair
    let unpacks: Vec<_> = chain
        .iter()
        .filter_map(|op| match op {
            Operation::UnpackRecord { level, arity, expr, .. } => Some((*level, *arity, expr)),
            _ => None,
        })
        .collect();
    assert_eq!(unpacks.len(), 2, "general branch needs two unpack levels");
    assert_eq!(unpacks[0].0, 1);
    assert_eq!(unpacks[0].1, 2);
    assert_eq!(unpacks[1].0, 2);
    assert_eq!(unpacks[1].1, 2);
    // the payload record is read from the outer level's second column
    assert_eq!(*unpacks[1].2, Expression::tuple_element(1, 1));

    // the Node tag (lexicographic id 1) is checked on the outer level
    assert!(
        chain.iter().any(|op| matches!(
            op,
            Operation::Filter {
                condition: Condition::Constraint {
                    lhs: Expression::TupleElement { tuple: 1, element: 0 },
                    rhs: Expression::SignedConstant(1),
                    ..
                },
                ..
            }
        )),
        "tag equality missing on the outer unpack level"
    );
}

#[test]
fn test_plan_override_is_honoured() {
    let program = ProgramBuilder::new()
        .relation("a", 1)
        .relation("b", 1)
        .relation("c", 1)
        .relation("p", 1)
        .clause(
            ClauseBuilder::new("p")
                .head_vars(["x"])
                .body_atom("a", ["x"])
                .body_atom("b", ["x"])
                .body_atom("c", ["x"])
                .plan_order(0, vec![3, 1, 2])
                .build(),
        )
        .build();

    let unit = translate(program, TranslatorConfig::default()).unwrap();
    let all = queries(&unit.program);
    let rule = all
        .iter()
        .find(|op| matches!(op, Operation::Scan { .. }))
        .expect("rule scan exists");
    assert_eq!(rule.scanned_relations(), vec!["c", "a", "b"]);
}

#[test]
fn test_auto_schedule_without_stats_is_an_error() {
    let program = ProgramBuilder::new()
        .relation("a", 1)
        .relation("b", 1)
        .relation("p", 1)
        .clause(
            ClauseBuilder::new("p")
                .head_vars(["x"])
                .body_atom("a", ["x"])
                .body_atom("b", ["x"])
                .build(),
        )
        .build();

    let config = TranslatorConfig {
        auto_schedule: true,
        ..TranslatorConfig::default()
    };
    let result = translate(program, config);
    assert_eq!(result.unwrap_err(), TranslateError::MissingSchedulerStats);
}

#[test]
fn test_auto_schedule_orders_by_size() {
    let program = ProgramBuilder::new()
        .relation("big", 2)
        .relation("small", 2)
        .relation("p", 2)
        .clause(
            ClauseBuilder::new("p")
                .head_vars(["x", "z"])
                .body_atom("big", ["x", "y"])
                .body_atom("small", ["y", "z"])
                .build(),
        )
        .build();

    let mut stats = SchedulerStatistics::new();
    stats.set_relation_size("big", 1_000_000);
    stats.set_relation_size("small", 4);

    let config = TranslatorConfig {
        auto_schedule: true,
        ..TranslatorConfig::default()
    };
    let unit = ramlayer::translate_unit(TranslationUnit::new(program, config).with_stats(stats))
        .unwrap();
    let all = queries(&unit.program);
    let rule = all
        .iter()
        .find(|op| matches!(op, Operation::Scan { .. }))
        .expect("rule scan exists");
    assert_eq!(rule.scanned_relations(), vec!["small", "big"]);
}

#[test]
fn test_io_directives_emit_loads_and_stores() {
    let program = ProgramBuilder::new()
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
        .build();

    let unit = translate(program, TranslatorConfig::default()).unwrap();
    let ios: Vec<_> = all_statements(&unit.program)
        .into_iter()
        .filter_map(|stmt| match stmt {
            Statement::Io { relation, .. } => Some(relation.as_str()),
            _ => None,
        })
        .collect();
    assert!(ios.contains(&"edge"), "input load missing");
    assert!(ios.contains(&"path"), "output store missing");
}

#[test]
fn test_expired_relations_are_cleared() {
    // edge feeds path and is not an output: the path stratum clears it
    let program = ProgramBuilder::new()
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
        .build();

    let unit = translate(program, TranslatorConfig::default()).unwrap();
    let path_stratum = unit.program.subroutine("stratum_1").unwrap();
    let mut stmts = Vec::new();
    flatten(path_stratum, &mut stmts);
    assert!(
        stmts
            .iter()
            .any(|stmt| matches!(stmt, Statement::Clear(rel) if rel == "edge")),
        "expired input relation should be cleared"
    );
}

#[test]
fn test_debug_report_carries_ram_dump() {
    let program = ProgramBuilder::new()
        .relation("edge", 2)
        .clause(
            ClauseBuilder::new("edge")
                .head_args([
                    Argument::NumericConstant(NumericConstant::signed(1)),
                    Argument::NumericConstant(NumericConstant::signed(2)),
                ])
                .build(),
        )
        .build();

    let config = TranslatorConfig {
        debug_report: true,
        ..TranslatorConfig::default()
    };
    let unit = translate(program, config).unwrap();
    let section = unit
        .debug_report
        .section("ram-program")
        .expect("debug report section exists");
    assert!(section.title.starts_with("RAM Program ("));
    assert!(section.title.ends_with("s)"));
    assert!(section.body.contains("DECL edge"));
}

#[test]
fn test_profile_emits_timers() {
    let program = ProgramBuilder::new()
        .relation("edge", 2)
        .relation("path", 2)
        .clause(
            ClauseBuilder::new("path")
                .head_vars(["x", "y"])
                .body_atom("edge", ["x", "y"])
                .build(),
        )
        .build();

    let config = TranslatorConfig {
        profile: true,
        ..TranslatorConfig::default()
    };
    let unit = translate(program, config).unwrap();
    let stmts = all_statements(&unit.program);
    assert!(stmts
        .iter()
        .any(|s| matches!(s, Statement::LogTimer { .. })));
    assert!(stmts
        .iter()
        .any(|s| matches!(s, Statement::LogRelationTimer { .. })));
}

#[test]
fn test_symbol_table_carries_interned_strings() {
    let program = ProgramBuilder::new()
        .relation("name", 1)
        .clause(
            ClauseBuilder::new("name")
                .head_args([Argument::StringConstant("alice".to_string())])
                .build(),
        )
        .build();

    let unit = translate(program, TranslatorConfig::default()).unwrap();
    assert_eq!(unit.symbols.resolve(0).as_deref(), Some("alice"));
    let all = queries(&unit.program);
    let fact = all
        .iter()
        .find(|op| matches!(op, Operation::Insert { .. }))
        .unwrap();
    match fact {
        Operation::Insert { values, .. } => {
            assert_eq!(values, &vec![Expression::SymbolConstant(0)]);
        }
        _ => unreachable!(),
    }
}
