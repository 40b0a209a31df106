//! # Program Translator
//!
//! The SCC driver and program assembler. For every strongly-connected
//! component of the predicate-dependency graph, in topological order:
//!
//! - load every internal input relation,
//! - translate a non-recursive component into a plain statement sequence, or
//!   emit the semi-naive fixpoint skeleton for a recursive one
//!   (preamble → loop(parallel bodies, exits, update) → postamble),
//! - store every internal output relation,
//! - clear the relations the liveness schedule expires at this stratum.
//!
//! Each component becomes a named subroutine `stratum_i`; the main program is
//! the ordered sequence of `Call`s. Relation declarations are created up
//! front, including the `@delta_`/`@new_` triples of recursive relations and
//! the `@reject_`/`@delete_` siblings of subsumptive ones.

use crate::adt_erasure::erase_sum_types;
use crate::analysis::{Analyses, SchedulerStatistics, SumTypeBranches};
use crate::ast::{Argument, DirectiveKind, NumericType, Program, RelationRepresentation};
use crate::clause_translator::{ClauseContext, ClauseTranslator, TranslationMode};
use crate::config::TranslatorConfig;
use crate::error::{TranslateError, TranslateResult};
use crate::names;
use crate::ram;
use crate::ram::{Condition, Expression, Operation, RelationDecl, Statement};
use crate::report::{DebugReport, ErrorReport};
use crate::symbols::SymbolTable;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

/// Input to one translation run: the rule program plus its surroundings.
#[derive(Debug, Clone, Default)]
pub struct TranslationUnit {
    pub program: Program,
    pub config: TranslatorConfig,
    pub stats: Option<SchedulerStatistics>,
    pub error_report: ErrorReport,
    pub debug_report: DebugReport,
}

impl TranslationUnit {
    pub fn new(program: Program, config: TranslatorConfig) -> Self {
        TranslationUnit {
            program,
            config,
            stats: None,
            error_report: ErrorReport::new(),
            debug_report: DebugReport::new(),
        }
    }

    /// Attach scheduler statistics (required when auto-scheduling is on)
    pub fn with_stats(mut self, stats: SchedulerStatistics) -> Self {
        self.stats = Some(stats);
        self
    }
}

/// Output of one translation run.
#[derive(Debug, Clone)]
pub struct RamTranslationUnit {
    pub program: ram::Program,
    pub symbols: SymbolTable,
    pub error_report: ErrorReport,
    pub debug_report: DebugReport,
}

/// Translate a rule program into a RAM translation unit.
///
/// The program is consumed: type finalisation and sum-type erasure rewrite it
/// in place before the analyses are computed against the erased AST.
pub fn translate_unit(unit: TranslationUnit) -> TranslateResult<RamTranslationUnit> {
    let start = Instant::now();
    let TranslationUnit {
        mut program,
        config,
        stats,
        error_report,
        mut debug_report,
    } = unit;

    if config.ram_sips != crate::config::SipsStrategy::AllBound {
        debug!(sips = ?config.ram_sips, "non-default SIPS selected; planner uses the all-bound cost model");
    }

    finalize_types(&mut program);
    let branches = SumTypeBranches::compute(&program);
    erase_sum_types(&mut program, &branches);

    let analyses = Analyses::compute(&program, config.provenance, stats);
    let symbols = SymbolTable::new();

    let mut translator = ProgramTranslator {
        program: &program,
        analyses: &analyses,
        config: &config,
        symbols: &symbols,
        subroutines: BTreeMap::new(),
        relations: BTreeMap::new(),
    };
    let ram_program = translator.translate_program()?;

    if config.debug_report {
        let elapsed = start.elapsed().as_secs_f64();
        debug_report.add_section(
            "ram-program",
            format!("RAM Program ({elapsed}s)"),
            ram_program.to_string(),
        );
    }
    info!(
        strata = ram_program.subroutines.len(),
        relations = ram_program.relations.len(),
        "rule program lowered to RAM"
    );

    Ok(RamTranslationUnit {
        program: ram_program,
        symbols,
        error_report,
        debug_report,
    })
}

/// Stamp a default signed type on any numeric constant the polymorphism
/// analysis left open.
fn finalize_types(program: &mut Program) {
    fn finalize_argument(arg: &mut Argument) {
        match arg {
            Argument::NumericConstant(constant) => {
                constant.final_type.get_or_insert(NumericType::Signed);
            }
            Argument::Record(args) => args.iter_mut().for_each(finalize_argument),
            Argument::Branch(branch) => branch.args.iter_mut().for_each(finalize_argument),
            Argument::Intrinsic(func) => func.args.iter_mut().for_each(finalize_argument),
            Argument::UserFunctor(func) => func.args.iter_mut().for_each(finalize_argument),
            Argument::Aggregator(agg) => {
                if let Some(target) = &mut agg.target {
                    finalize_argument(target);
                }
                for lit in &mut agg.body {
                    finalize_literal(lit);
                }
            }
            _ => {}
        }
    }
    fn finalize_literal(lit: &mut crate::ast::Literal) {
        match lit {
            crate::ast::Literal::Atom(atom) | crate::ast::Literal::Negation(atom) => {
                atom.args.iter_mut().for_each(finalize_argument);
            }
            crate::ast::Literal::Constraint(c) => {
                finalize_argument(&mut c.lhs);
                finalize_argument(&mut c.rhs);
            }
        }
    }

    for clause in &mut program.clauses {
        clause.head.args.iter_mut().for_each(finalize_argument);
        for lit in &mut clause.body {
            finalize_literal(lit);
        }
    }
}

/// State of one program translation run.
struct ProgramTranslator<'a> {
    program: &'a Program,
    analyses: &'a Analyses,
    config: &'a TranslatorConfig,
    symbols: &'a SymbolTable,
    subroutines: BTreeMap<String, Statement>,
    relations: BTreeMap<String, RelationDecl>,
}

impl<'a> ProgramTranslator<'a> {
    fn clause_ctx(&self) -> ClauseContext<'a> {
        ClauseContext {
            program: self.program,
            analyses: self.analyses,
            config: self.config,
            symbols: self.symbols,
        }
    }

    fn add_subroutine(&mut self, name: String, body: Statement) -> TranslateResult<()> {
        if self.subroutines.contains_key(&name) {
            return Err(TranslateError::DuplicateSubroutine(name));
        }
        self.subroutines.insert(name, body);
        Ok(())
    }

    fn add_relation(&mut self, decl: RelationDecl) -> TranslateResult<()> {
        if self.relations.contains_key(&decl.name) {
            return Err(TranslateError::DuplicateRelation(decl.name));
        }
        self.relations.insert(decl.name.clone(), decl);
        Ok(())
    }

    fn translate_program(&mut self) -> TranslateResult<ram::Program> {
        let scc_count = self.analyses.scc.num_sccs();
        // an empty SCC graph is an empty program, not an error
        if scc_count == 0 {
            return Ok(ram::Program::default());
        }

        for scc in 0..scc_count {
            self.create_ram_relations(scc)?;
        }

        for scc in 0..scc_count {
            let body = self.translate_scc(scc)?;
            self.add_subroutine(format!("stratum_{scc}"), body)?;
        }

        let mut statements: Vec<Statement> = (0..scc_count)
            .map(|scc| Statement::Call(format!("stratum_{scc}")))
            .collect();
        if self.config.profile && !statements.is_empty() {
            statements = vec![Statement::LogTimer {
                inner: Box::new(Statement::Sequence(statements)),
                message: "@runtime;".to_string(),
            }];
        }

        Ok(ram::Program {
            statements,
            subroutines: std::mem::take(&mut self.subroutines),
            relations: std::mem::take(&mut self.relations),
        })
    }

    /// Declare the relations of an SCC: the concrete relation, the
    /// `@delta_`/`@new_` pair for recursive ones, and the `@reject_`/
    /// `@delete_` pair for subsumptive ones.
    fn create_ram_relations(&mut self, scc: usize) -> TranslateResult<()> {
        let recursive = self.analyses.scc.is_recursive(scc);
        for name in self.analyses.scc.relations(scc) {
            let Some(rel) = self.program.relation(name) else {
                // a relation only ever read; declare it with unknown shape
                continue;
            };
            let aux_arity = self.analyses.aux_arity.arity(rel);
            let representation = if self.has_subsumptive_clauses(name) {
                RelationRepresentation::BtreeDelete
            } else {
                rel.representation
            };
            let decl = RelationDecl {
                name: name.clone(),
                arity: rel.arity(),
                aux_arity,
                attribute_names: rel.attributes.iter().map(|a| a.name.clone()).collect(),
                attribute_types: rel.attributes.iter().map(|a| a.type_name.clone()).collect(),
                representation,
            };

            if recursive {
                for variant in [names::delta_name(name), names::new_name(name)] {
                    self.add_relation(RelationDecl {
                        name: variant,
                        ..decl.clone()
                    })?;
                }
                if self.has_subsumptive_clauses(name) {
                    for variant in [names::reject_name(name), names::delete_name(name)] {
                        self.add_relation(RelationDecl {
                            name: variant,
                            ..decl.clone()
                        })?;
                    }
                }
            }
            self.add_relation(decl)?;
        }
        Ok(())
    }

    fn has_subsumptive_clauses(&self, relation: &str) -> bool {
        self.analyses
            .details
            .clauses_for(relation)
            .iter()
            .any(|&idx| self.program.clauses[idx].is_subsumptive())
    }

    fn translate_scc(&mut self, scc: usize) -> TranslateResult<Statement> {
        debug!(scc, recursive = self.analyses.scc.is_recursive(scc), "translating stratum");
        let mut stmts = Vec::new();

        // load internal inputs
        for name in self.analyses.scc.relations(scc) {
            if self.analyses.io.is_input(name) {
                self.make_ram_load(&mut stmts, name);
            }
        }

        // the component body
        let body = if self.analyses.scc.is_recursive(scc) {
            self.translate_recursive_scc(scc)?
        } else {
            let name = &self.analyses.scc.relations(scc)[0];
            self.translate_non_recursive_relation(name)?
        };
        stmts.push(body);

        // store internal outputs
        for name in self.analyses.scc.relations(scc) {
            if self.analyses.io.is_output(name) {
                self.make_ram_store(&mut stmts, name);
            }
        }

        // clear relations the liveness schedule expires here
        for name in self.analyses.schedule.expired(scc) {
            stmts.push(Statement::Clear(name.clone()));
        }

        Ok(Statement::Sequence(stmts))
    }

    fn make_ram_load(&self, stmts: &mut Vec<Statement>, relation: &str) {
        for directives in self.io_directives(relation, DirectiveKind::Input) {
            let mut stmt = Statement::Io {
                relation: names::concrete_name(relation),
                directives,
            };
            if self.config.profile {
                stmt = Statement::LogRelationTimer {
                    inner: Box::new(stmt),
                    message: format!("@t-relation-load;{relation};"),
                    relation: names::concrete_name(relation),
                };
            }
            stmts.push(stmt);
        }
    }

    fn make_ram_store(&self, stmts: &mut Vec<Statement>, relation: &str) {
        let mut directive_sets = self.io_directives(relation, DirectiveKind::Output);
        directive_sets.extend(self.io_directives_of_kind(relation, DirectiveKind::PrintSize));
        for directives in directive_sets {
            let mut stmt = Statement::Io {
                relation: names::concrete_name(relation),
                directives,
            };
            if self.config.profile {
                stmt = Statement::LogRelationTimer {
                    inner: Box::new(stmt),
                    message: format!("@t-relation-save;{relation};"),
                    relation: names::concrete_name(relation),
                };
            }
            stmts.push(stmt);
        }
    }

    /// Directive parameter maps of a kind; none means one default load/store.
    fn io_directives(
        &self,
        relation: &str,
        kind: DirectiveKind,
    ) -> Vec<BTreeMap<String, String>> {
        let sets = self.io_directives_of_kind(relation, kind);
        if sets.is_empty() {
            return vec![BTreeMap::new()];
        }
        sets
    }

    fn io_directives_of_kind(
        &self,
        relation: &str,
        kind: DirectiveKind,
    ) -> Vec<BTreeMap<String, String>> {
        self.program
            .directives_for(relation)
            .into_iter()
            .filter(|d| d.kind == kind)
            .map(|d| d.params.clone())
            .collect()
    }

    /// Translate every non-recursive clause of a relation into a sequence.
    fn translate_non_recursive_relation(&self, relation: &str) -> TranslateResult<Statement> {
        let mut res = Vec::new();
        for &idx in self.analyses.details.clauses_for(relation) {
            if self.analyses.recursive_clauses.is_recursive(idx) {
                continue;
            }
            let clause = &self.program.clauses[idx];
            let mut rule = ClauseTranslator::new(self.clause_ctx(), TranslationMode::Normal)
                .translate_clause(clause)?;
            if self.config.profile {
                rule = Statement::LogRelationTimer {
                    inner: Box::new(rule),
                    message: format!("@t-nonrecursive-rule;{relation};{clause}"),
                    relation: names::concrete_name(relation),
                };
            }
            res.push(Statement::DebugInfo {
                inner: Box::new(rule),
                text: clause.to_string(),
            });
        }

        if self.config.profile {
            if res.is_empty() {
                res.push(Statement::LogSize {
                    relation: names::concrete_name(relation),
                    message: format!("@n-nonrecursive-relation;{relation};"),
                });
            } else {
                let seq = Statement::Sequence(std::mem::take(&mut res));
                res.push(Statement::LogRelationTimer {
                    inner: Box::new(seq),
                    message: format!("@t-nonrecursive-relation;{relation};"),
                    relation: names::concrete_name(relation),
                });
            }
        }

        Ok(Statement::Sequence(res))
    }

    /// Copy every tuple of `src` into `dest`; equivalence relations also
    /// extend so transitive closure is preserved.
    fn merge_relations(
        &self,
        relation: &str,
        dest: String,
        src: String,
    ) -> TranslateResult<Statement> {
        let rel = self
            .program
            .relation(relation)
            .ok_or_else(|| TranslateError::UnknownRelation(relation.to_string()))?;

        let stmt = if rel.arity() == 0 {
            Statement::Query(Operation::Filter {
                condition: Condition::EmptinessCheck(src.clone()).negate(),
                inner: Box::new(Operation::Insert {
                    relation: dest.clone(),
                    values: vec![],
                }),
            })
        } else {
            let values = (0..rel.arity()).map(|i| Expression::tuple_element(0, i)).collect();
            Statement::Query(Operation::Scan {
                relation: src.clone(),
                level: 0,
                inner: Box::new(Operation::Insert {
                    relation: dest.clone(),
                    values,
                }),
                profile_text: None,
            })
        };

        if rel.representation == RelationRepresentation::Eqrel {
            return Ok(Statement::Sequence(vec![
                Statement::Extend { target: dest, source: src },
                stmt,
            ]));
        }
        Ok(stmt)
    }

    /// Scan `src` and erase each of its tuples from `dest`.
    fn erase_merge(&self, relation: &str, dest: String, src: String) -> TranslateResult<Statement> {
        let rel = self
            .program
            .relation(relation)
            .ok_or_else(|| TranslateError::UnknownRelation(relation.to_string()))?;
        if rel.arity() == 0 {
            return Ok(Statement::Query(Operation::Filter {
                condition: Condition::EmptinessCheck(src).negate(),
                inner: Box::new(Operation::Erase { relation: dest, values: vec![] }),
            }));
        }
        let values = (0..rel.arity()).map(|i| Expression::tuple_element(0, i)).collect();
        Ok(Statement::Query(Operation::Scan {
            relation: src,
            level: 0,
            inner: Box::new(Operation::Erase { relation: dest, values }),
            profile_text: None,
        }))
    }

    // Recursive strata
    fn translate_recursive_scc(&self, scc: usize) -> TranslateResult<Statement> {
        let rels = self.analyses.scc.relations(scc);

        let preamble = self.stratum_preamble(scc, rels)?;
        let loop_body = self.stratum_main_loop(scc)?;
        let exits = self.stratum_exit_conditions(rels);
        let updates = self.stratum_table_updates(scc)?;
        let postamble = self.stratum_postamble(rels);

        let mut res = Vec::new();
        if !preamble.is_empty() {
            res.push(Statement::Sequence(preamble));
        }
        if !loop_body.is_empty() {
            res.push(Statement::Loop(Box::new(Statement::Sequence(vec![
                Statement::Parallel(loop_body),
                Statement::Sequence(exits),
                Statement::Sequence(updates),
            ]))));
        }
        if !postamble.is_empty() {
            res.push(Statement::Sequence(postamble));
        }
        Ok(Statement::Sequence(res))
    }

    /// Seed each relation from its non-recursive clauses and copy the result
    /// into the delta. Subsumptive relations prune their seeds first.
    fn stratum_preamble(&self, scc: usize, rels: &[String]) -> TranslateResult<Vec<Statement>> {
        let mut preamble = Vec::new();
        for rel in rels {
            preamble.push(self.translate_non_recursive_relation(rel)?);
            if self.has_subsumptive_clauses(rel) {
                preamble.extend(self.subsumption_delete_phase(
                    scc,
                    rel,
                    TranslationMode::SubsumeDeleteCurrentCurrent,
                )?);
            }
            preamble.push(self.merge_relations(
                rel,
                names::delta_name(rel),
                names::concrete_name(rel),
            )?);
        }
        Ok(preamble)
    }

    /// One parallel arm per relation, holding its version-indexed rules.
    /// Subsumptive relations prune their `@new_` tuples at the end of the
    /// arm, before the emptiness exit is evaluated.
    fn stratum_main_loop(&self, scc: usize) -> TranslateResult<Vec<Statement>> {
        let rels = self.analyses.scc.relations(scc);
        let mut loop_seq = Vec::new();
        for rel in rels {
            let mut rel_seq = self.recursive_clause_versions(scc, rel)?;
            if self.has_subsumptive_clauses(rel) {
                rel_seq.extend(self.subsumption_reject_phase(scc, rel)?);
            }
            if rel_seq.is_empty() {
                continue;
            }
            if self.config.profile {
                let seq = Statement::Sequence(std::mem::take(&mut rel_seq));
                rel_seq.push(Statement::LogRelationTimer {
                    inner: Box::new(seq),
                    message: format!("@t-recursive-relation;{rel};"),
                    relation: names::new_name(rel),
                });
            }
            loop_seq.push(Statement::Sequence(rel_seq));
        }
        Ok(loop_seq)
    }

    /// Translate each recursive clause of the relation once per version.
    fn recursive_clause_versions(
        &self,
        scc: usize,
        relation: &str,
    ) -> TranslateResult<Vec<Statement>> {
        let scc_rels = self.analyses.scc.relations(scc);
        let mut out = Vec::new();

        for &idx in self.analyses.details.clauses_for(relation) {
            if !self.analyses.recursive_clauses.is_recursive(idx) {
                continue;
            }
            let clause = &self.program.clauses[idx];
            if clause.is_subsumptive() {
                // subsumptive clauses run in their own maintenance phases
                continue;
            }

            let mut version = 0;
            for (_, atom) in clause.body_atoms() {
                if !scc_rels.iter().any(|rel| rel == &atom.relation) {
                    continue;
                }
                let mut rule =
                    ClauseTranslator::new(self.clause_ctx(), TranslationMode::Normal)
                        .translate_recursive_clause(clause, scc_rels, version)?;
                if self.config.profile {
                    rule = Statement::LogRelationTimer {
                        inner: Box::new(rule),
                        message: format!("@t-recursive-rule;{relation};{version};{clause}"),
                        relation: names::new_name(relation),
                    };
                }
                out.push(Statement::DebugInfo {
                    inner: Box::new(rule),
                    text: clause.to_string(),
                });
                version += 1;
            }

            // an explicit plan must not name versions that were never built
            if let Some(max) = clause.plan.as_ref().and_then(|plan| plan.max_version()) {
                if max >= version {
                    return Err(TranslateError::PlanVersionOutOfRange {
                        relation: relation.to_string(),
                        version: max,
                        versions: version,
                    });
                }
            }
        }
        Ok(out)
    }

    /// Exit when nothing new was derived, or when a limitsize bound is hit.
    fn stratum_exit_conditions(&self, rels: &[String]) -> Vec<Statement> {
        let mut exits = Vec::new();

        let emptiness = Condition::all(
            rels.iter()
                .map(|rel| Condition::EmptinessCheck(names::new_name(rel)))
                .collect(),
        );
        exits.push(Statement::Exit(emptiness));

        for rel in rels {
            if let Some(limit) = self.analyses.io.limit_size(rel) {
                exits.push(Statement::Exit(Condition::Constraint {
                    op: crate::ast::ConstraintOp::Ge,
                    lhs: Expression::RelationSize(names::concrete_name(rel)),
                    rhs: Expression::SignedConstant(limit as i64),
                }));
            }
        }
        exits
    }

    /// Merge `@new_` into the concrete relation, swap delta and new, clear
    /// new; subsumptive relations then delete dominated concrete tuples.
    fn stratum_table_updates(&self, scc: usize) -> TranslateResult<Vec<Statement>> {
        let rels = self.analyses.scc.relations(scc);
        let mut updates = Vec::new();
        for rel in rels {
            let mut seq = Vec::new();

            seq.push(self.merge_relations(
                rel,
                names::concrete_name(rel),
                names::new_name(rel),
            )?);
            seq.push(Statement::Swap {
                lhs: names::delta_name(rel),
                rhs: names::new_name(rel),
            });
            seq.push(Statement::Clear(names::new_name(rel)));

            if self.has_subsumptive_clauses(rel) {
                // the just-promoted tuples (now in the delta) dominate older
                // concrete ones
                seq.extend(self.subsumption_delete_phase(
                    scc,
                    rel,
                    TranslationMode::SubsumeDeleteCurrentDelta,
                )?);
            }

            let mut update = Statement::Sequence(seq);
            if self.config.profile {
                update = Statement::LogRelationTimer {
                    inner: Box::new(update),
                    message: format!("@c-recursive-relation;{rel};"),
                    relation: names::new_name(rel),
                };
            }
            updates.push(update);
        }
        Ok(updates)
    }

    /// Reject modes: dominated `@new_` tuples lose against `@new_`/concrete
    /// dominators and are erased from `@new_` before the merge.
    fn subsumption_reject_phase(&self, scc: usize, relation: &str) -> TranslateResult<Vec<Statement>> {
        let modes = [
            TranslationMode::SubsumeRejectNewNew,
            TranslationMode::SubsumeRejectNewCurrent,
        ];
        let mut seq = self.subsumption_queries(scc, relation, &modes)?;
        seq.push(self.erase_merge(
            relation,
            names::new_name(relation),
            names::reject_name(relation),
        )?);
        seq.push(Statement::Clear(names::reject_name(relation)));
        Ok(seq)
    }

    /// One delete mode: dominated concrete tuples land in `@delete_` and are
    /// erased from the concrete relation.
    fn subsumption_delete_phase(
        &self,
        scc: usize,
        relation: &str,
        mode: TranslationMode,
    ) -> TranslateResult<Vec<Statement>> {
        let mut seq = self.subsumption_queries(scc, relation, &[mode])?;
        seq.push(self.erase_merge(
            relation,
            names::concrete_name(relation),
            names::delete_name(relation),
        )?);
        seq.push(Statement::Clear(names::delete_name(relation)));
        Ok(seq)
    }

    fn subsumption_queries(
        &self,
        scc: usize,
        relation: &str,
        modes: &[TranslationMode],
    ) -> TranslateResult<Vec<Statement>> {
        let scc_rels = self.analyses.scc.relations(scc);
        let mut seq = Vec::new();
        for &idx in self.analyses.details.clauses_for(relation) {
            let clause = &self.program.clauses[idx];
            if !clause.is_subsumptive() {
                continue;
            }
            for &mode in modes {
                let stmt = ClauseTranslator::new(self.clause_ctx(), mode)
                    .translate_recursive_clause(clause, scc_rels, 0)?;
                seq.push(Statement::DebugInfo {
                    inner: Box::new(stmt),
                    text: clause.to_string(),
                });
            }
        }
        Ok(seq)
    }

    /// Drop the scratch relations after the fixpoint.
    fn stratum_postamble(&self, rels: &[String]) -> Vec<Statement> {
        let mut postamble = Vec::new();
        for rel in rels {
            postamble.push(Statement::Clear(names::delta_name(rel)));
            postamble.push(Statement::Clear(names::new_name(rel)));
        }
        postamble
    }
}
