//! # Clause Translator
//!
//! Lowers one clause into one RAM `Query` per firing. The algorithm is a
//! two-phase walk:
//!
//! 1. **Indexing**: order the body atoms (explicit plan, source order, or the
//!    Selinger planner), then assign every atom and nested record a tuple
//!    level and record every variable occurrence and generator slot in the
//!    clause's [`ValueIndex`].
//! 2. **Construction**: build the operation tree bottom-up: the head
//!    insertion, body-literal filters, semi-naive negations, variable-binding
//!    equalities, generator levels, and finally the scans and unpacks, one per
//!    level in reverse assignment order.
//!
//! Recursive rules are translated once per *version*: version `v` drives the
//! `v`-th SCC body atom from the delta relation and writes into `@new_`.
//! Subsumptive clauses are translated once per [`TranslationMode`], which
//! selects the head/dominated/dominating relation variants.

use crate::analysis::Analyses;
use crate::ast::{
    Aggregator, Argument, Atom, Clause, ConstraintOp, FunctorOp, IntrinsicFunctor, Literal,
    NumericType, Program,
};
use crate::config::TranslatorConfig;
use crate::error::{TranslateError, TranslateResult};
use crate::join_planner::{selinger_order, PlannerAtom};
use crate::names;
use crate::ram::{Condition, Expression, NestedIntrinsicOp, Operation, Statement};
use crate::symbols::SymbolTable;
use crate::value_index::{Location, ValueIndex};
use crate::value_translator::{translate_constant, translate_constraint, translate_value};

/// Which firing of a clause is being translated.
///
/// Subsumption translates each subsumptive clause four times; the mode picks
/// the relation variants for the head and the two head-position body atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationMode {
    /// Facts, ordinary rules, and recursive rule versions
    Normal,
    /// Reject: dominated from `@new_`, dominating from `@new_`
    SubsumeRejectNewNew,
    /// Reject: dominated from `@new_`, dominating from the concrete relation
    SubsumeRejectNewCurrent,
    /// Delete: dominated from concrete, dominating from `@delta_`
    SubsumeDeleteCurrentDelta,
    /// Delete: dominated and dominating both from the concrete relation
    SubsumeDeleteCurrentCurrent,
}

impl TranslationMode {
    fn is_delete(self) -> bool {
        matches!(
            self,
            TranslationMode::SubsumeDeleteCurrentDelta
                | TranslationMode::SubsumeDeleteCurrentCurrent
        )
    }

    /// Modes whose dominated/dominating sources coincide need a distinctness
    /// filter against trivial self-subsumption
    fn needs_distinctness(self) -> bool {
        matches!(
            self,
            TranslationMode::SubsumeRejectNewNew | TranslationMode::SubsumeDeleteCurrentCurrent
        )
    }
}

/// Everything the clause translator borrows from the driver
#[derive(Debug, Clone, Copy)]
pub struct ClauseContext<'a> {
    pub program: &'a Program,
    pub analyses: &'a Analyses,
    pub config: &'a TranslatorConfig,
    pub symbols: &'a SymbolTable,
}

/// Position of an atom within the clause under translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AtomPosition {
    Head,
    Body(usize),
}

/// Structural levels introduced by the indexing pass
#[derive(Debug, Clone)]
enum Operator {
    Atom { atom: Atom, body_index: usize },
    Record { args: Vec<Argument> },
}

/// Generator levels introduced by the indexing pass
#[derive(Debug, Clone)]
enum Generator {
    Aggregate(Aggregator),
    MultiResult(IntrinsicFunctor),
}

/// Translator for a single clause firing.
///
/// Construct a fresh instance per clause and mode; the per-clause state
/// (levels, value index, version) is not reusable.
pub struct ClauseTranslator<'a> {
    ctx: ClauseContext<'a>,
    mode: TranslationMode,
    /// Body-literal indices of atoms whose relation is in the head's SCC
    scc_atom_positions: Vec<usize>,
    version: usize,
    operators: Vec<Operator>,
    generators: Vec<Generator>,
    index: ValueIndex,
}

impl<'a> ClauseTranslator<'a> {
    pub fn new(ctx: ClauseContext<'a>, mode: TranslationMode) -> Self {
        ClauseTranslator {
            ctx,
            mode,
            scc_atom_positions: Vec::new(),
            version: 0,
            operators: Vec::new(),
            generators: Vec::new(),
            index: ValueIndex::new(),
        }
    }

    /// Translate a non-recursive clause (fact or rule).
    pub fn translate_clause(&mut self, clause: &Clause) -> TranslateResult<Statement> {
        if clause.is_fact() {
            return self.create_fact_query(clause);
        }
        self.create_rule_query(clause)
    }

    /// Translate one version of a recursive clause.
    ///
    /// The SCC names which body atoms are mutually recursive with the head;
    /// `version` selects the one driven from its delta relation.
    pub fn translate_recursive_clause(
        &mut self,
        clause: &Clause,
        scc: &[String],
        version: usize,
    ) -> TranslateResult<Statement> {
        self.scc_atom_positions = clause
            .body_atoms()
            .into_iter()
            .filter(|(_, atom)| scc.iter().any(|rel| rel == &atom.relation))
            .map(|(idx, _)| idx)
            .collect();
        self.version = version;
        self.create_rule_query(clause)
    }

    fn is_recursive(&self) -> bool {
        !self.scc_atom_positions.is_empty()
    }

    // Relation naming
    /// RAM relation name of an atom, given the clause kind, the translation
    /// mode, and the current version.
    fn clause_atom_name(&self, clause: &Clause, position: AtomPosition) -> String {
        let atom_relation = |pos: AtomPosition| -> &str {
            match pos {
                AtomPosition::Head => &clause.head.relation,
                AtomPosition::Body(idx) => match &clause.body[idx] {
                    Literal::Atom(atom) => &atom.relation,
                    _ => unreachable!("body position must hold an atom"),
                },
            }
        };
        let relation = atom_relation(position);

        if clause.is_subsumptive() {
            if position == AtomPosition::Head {
                if self.mode.is_delete() {
                    return names::delete_name(relation);
                }
                return names::reject_name(relation);
            }
            if position == AtomPosition::Body(0) {
                // dominated head atom
                if self.mode.is_delete() {
                    return names::concrete_name(relation);
                }
                return names::new_name(relation);
            }
            if position == AtomPosition::Body(1) {
                // dominating head atom
                return match self.mode {
                    TranslationMode::SubsumeRejectNewCurrent
                    | TranslationMode::SubsumeDeleteCurrentCurrent => {
                        names::concrete_name(relation)
                    }
                    TranslationMode::SubsumeDeleteCurrentDelta => names::delta_name(relation),
                    _ => names::new_name(relation),
                };
            }
            if self.is_recursive() {
                if let AtomPosition::Body(idx) = position {
                    if self.scc_atom_positions.get(self.version + 1) == Some(&idx) {
                        return names::delta_name(relation);
                    }
                }
            }
        }

        if !self.is_recursive() {
            return names::concrete_name(relation);
        }
        if position == AtomPosition::Head {
            return names::new_name(relation);
        }
        if let AtomPosition::Body(idx) = position {
            if self.scc_atom_positions.get(self.version) == Some(&idx) {
                return names::delta_name(relation);
            }
        }
        names::concrete_name(relation)
    }

    // Fact translation
    fn create_fact_query(&mut self, clause: &Clause) -> TranslateResult<Statement> {
        debug_assert!(!self.is_recursive(), "recursive clauses cannot be facts");
        let insertion = self.create_insertion(clause)?;
        Ok(Statement::Query(insertion))
    }

    // Rule translation
    fn create_rule_query(&mut self, clause: &Clause) -> TranslateResult<Statement> {
        self.index_clause(clause)?;

        let mut op = self.create_insertion(clause)?;
        op = self.add_body_literal_constraints(clause, op)?;
        op = self.add_variable_binding_constraints(op);
        op = self.add_generator_levels(clause, op)?;
        op = self.add_variable_introductions(clause, op)?;
        op = self.add_entry_point(clause, op);
        Ok(Statement::Query(op))
    }

    /// Head insertion: the innermost operation of the query.
    fn create_insertion(&self, clause: &Clause) -> TranslateResult<Operation> {
        let head_name = self.clause_atom_name(clause, AtomPosition::Head);
        let values = clause
            .head
            .args
            .iter()
            .map(|arg| translate_value(arg, &self.index, self.ctx.symbols))
            .collect::<TranslateResult<Vec<_>>>()?;

        // a proposition fires at most once
        if clause.head.arity() == 0 {
            return Ok(Operation::Filter {
                condition: Condition::EmptinessCheck(head_name.clone()),
                inner: Box::new(Operation::Insert {
                    relation: head_name,
                    values,
                }),
            });
        }

        if let Some(guard) = self.functional_dependency_guard(clause, &head_name)? {
            return Ok(Operation::GuardedInsert {
                relation: head_name,
                values,
                guard,
            });
        }

        Ok(Operation::Insert {
            relation: head_name,
            values,
        })
    }

    /// Functional-dependency guard for the head insertion, if any.
    ///
    /// Key columns project the matching head arguments, the rest are ⊥; a
    /// recursive clause guards both the target and the concrete relation.
    fn functional_dependency_guard(
        &self,
        clause: &Clause,
        head_name: &str,
    ) -> TranslateResult<Option<Condition>> {
        let relation = self
            .ctx
            .program
            .relation(&clause.head.relation)
            .ok_or_else(|| TranslateError::UnknownRelation(clause.head.relation.clone()))?;
        if relation.functional_dependencies.is_empty() {
            return Ok(None);
        }

        let mut dependencies = Vec::new();
        let mut seen: Vec<&crate::ast::FunctionalConstraint> = Vec::new();
        for fd in &relation.functional_dependencies {
            if seen.iter().any(|other| other.equivalent(fd)) {
                continue;
            }
            seen.push(fd);

            let mut values = Vec::new();
            for (i, attribute) in relation.attributes.iter().enumerate() {
                if fd.keys.contains(&attribute.name) {
                    let arg = clause.head.args.get(i).ok_or_else(|| {
                        TranslateError::UnsupportedConstruct(format!(
                            "head arity does not match declaration of '{}'",
                            relation.name
                        ))
                    })?;
                    values.push(translate_value(arg, &self.index, self.ctx.symbols)?);
                } else {
                    values.push(Expression::Undef);
                }
            }

            dependencies.push(
                Condition::ExistenceCheck {
                    relation: head_name.to_string(),
                    values: values.clone(),
                }
                .negate(),
            );
            if self.is_recursive() {
                dependencies.push(
                    Condition::ExistenceCheck {
                        relation: names::concrete_name(&relation.name),
                        values,
                    }
                    .negate(),
                );
            }
        }

        Ok(Some(Condition::all(dependencies)))
    }

    /// Non-atom body literals become filters; subsumption adds distinctness;
    /// recursion adds the re-derivation guards.
    fn add_body_literal_constraints(
        &self,
        clause: &Clause,
        mut op: Operation,
    ) -> TranslateResult<Operation> {
        for lit in &clause.body {
            if let Some(condition) = translate_constraint(lit, &self.index, self.ctx.symbols)? {
                op = Operation::Filter {
                    condition,
                    inner: Box::new(op),
                };
            }
        }

        if clause.is_subsumptive() {
            if self.mode.needs_distinctness() {
                let dominated = clause.dominated_atom().ok_or_else(|| {
                    TranslateError::UnsupportedConstruct(
                        "subsumptive clause lacks a dominated head atom".to_string(),
                    )
                })?;
                let dominating = clause.dominating_atom().ok_or_else(|| {
                    TranslateError::UnsupportedConstruct(
                        "subsumptive clause lacks a dominating head atom".to_string(),
                    )
                })?;
                op = self.add_distinctness(op, dominated, dominating)?;
            }
            return Ok(op);
        }

        if self.is_recursive() {
            if clause.head.arity() > 0 {
                // do not re-derive tuples the head already holds
                op = self.add_negated_atom(op, &clause.head, &clause.head.relation)?;
            }
            // nor tuples already seen by later versions of this rule
            for &body_idx in &self.scc_atom_positions[self.version + 1..] {
                let Literal::Atom(atom) = &clause.body[body_idx] else {
                    continue;
                };
                op = self.add_negated_delta_atom(op, atom)?;
            }
        }

        Ok(op)
    }

    /// Filter out firings where the dominated and dominating tuples coincide.
    fn add_distinctness(
        &self,
        op: Operation,
        dominated: &Atom,
        dominating: &Atom,
    ) -> TranslateResult<Operation> {
        let mut equalities = Vec::new();
        for (lhs, rhs) in dominated.args.iter().zip(&dominating.args) {
            let a = translate_value(lhs, &self.index, self.ctx.symbols)?;
            let b = translate_value(rhs, &self.index, self.ctx.symbols)?;
            if a != b {
                equalities.push(Condition::Constraint {
                    op: ConstraintOp::Eq,
                    lhs: a,
                    rhs: b,
                });
            }
        }
        Ok(Operation::Filter {
            condition: Condition::all(equalities).negate(),
            inner: Box::new(op),
        })
    }

    fn add_negated_atom(
        &self,
        op: Operation,
        atom: &Atom,
        relation: &str,
    ) -> TranslateResult<Operation> {
        let name = names::concrete_name(relation);
        self.add_negated_existence(op, atom, name)
    }

    fn add_negated_delta_atom(&self, op: Operation, atom: &Atom) -> TranslateResult<Operation> {
        let name = names::delta_name(&atom.relation);
        self.add_negated_existence(op, atom, name)
    }

    fn add_negated_existence(
        &self,
        op: Operation,
        atom: &Atom,
        name: String,
    ) -> TranslateResult<Operation> {
        if atom.arity() == 0 {
            return Ok(Operation::Filter {
                condition: Condition::EmptinessCheck(name),
                inner: Box::new(op),
            });
        }
        let values = atom
            .args
            .iter()
            .map(|arg| translate_value(arg, &self.index, self.ctx.symbols))
            .collect::<TranslateResult<Vec<_>>>()?;
        Ok(Operation::Filter {
            condition: Condition::ExistenceCheck {
                relation: name,
                values,
            }
            .negate(),
            inner: Box::new(op),
        })
    }

    /// Equate every later occurrence of a variable with its canonical one.
    fn add_variable_binding_constraints(&self, mut op: Operation) -> Operation {
        for (_, references) in self.index.variables() {
            let mut refs = references.iter();
            let Some(first) = refs.next() else { continue };
            for reference in refs {
                if self.index.is_generator(reference.tuple) {
                    // generator slots receive values by construction
                    continue;
                }
                op = Operation::Filter {
                    condition: Condition::Constraint {
                        op: ConstraintOp::Eq,
                        lhs: Expression::tuple_element(first.tuple, first.element),
                        rhs: Expression::tuple_element(reference.tuple, reference.element),
                    },
                    inner: Box::new(op),
                };
            }
        }
        op
    }

    /// Instantiate generator levels innermost-last.
    fn add_generator_levels(
        &self,
        clause: &Clause,
        mut op: Operation,
    ) -> TranslateResult<Operation> {
        let mut level = self.operators.len() + self.generators.len();
        for generator in self.generators.iter().rev() {
            level -= 1;
            op = match generator {
                Generator::Aggregate(agg) => self.instantiate_aggregator(op, clause, agg, level)?,
                Generator::MultiResult(func) => {
                    self.instantiate_multi_result_functor(op, func, level)?
                }
            };
        }
        Ok(op)
    }

    fn instantiate_aggregator(
        &self,
        op: Operation,
        clause: &Clause,
        agg: &Aggregator,
        level: usize,
    ) -> TranslateResult<Operation> {
        let mut conditions = Vec::new();

        // constraints of the aggregator body
        for lit in &agg.body {
            if let Some(condition) = translate_constraint(lit, &self.index, self.ctx.symbols)? {
                conditions.push(condition);
            }
        }

        let atom = agg.body_atom().ok_or_else(|| {
            TranslateError::UnsupportedConstruct(
                "aggregator body must contain exactly one atom".to_string(),
            )
        })?;

        // arguments of the aggregated atom become equalities on the
        // aggregate's tuple, avoiding self-referential bindings
        for (i, arg) in atom.args.iter().enumerate() {
            match arg {
                Argument::Variable(name) => {
                    for loc in self.index.references(name) {
                        if loc.tuple != level || loc.element != i {
                            conditions.push(Condition::Constraint {
                                op: ConstraintOp::Eq,
                                lhs: Expression::tuple_element(level, i),
                                rhs: Expression::tuple_element(loc.tuple, loc.element),
                            });
                            break;
                        }
                    }
                }
                Argument::UnnamedVariable => {}
                other => {
                    let value = translate_value(other, &self.index, self.ctx.symbols)?;
                    if value != Expression::Undef {
                        conditions.push(Condition::Constraint {
                            op: ConstraintOp::Eq,
                            lhs: Expression::tuple_element(level, i),
                            rhs: value,
                        });
                    }
                }
            }
        }

        let target = agg
            .target
            .as_ref()
            .map(|expr| translate_value(expr, &self.index, self.ctx.symbols))
            .transpose()?;

        // recursive strata aggregate over the delta of SCC-local relations
        let relation = if self.is_recursive()
            && self
                .ctx
                .analyses
                .scc
                .same_scc(&clause.head.relation, &atom.relation)
        {
            names::delta_name(&atom.relation)
        } else {
            names::concrete_name(&atom.relation)
        };

        Ok(Operation::Aggregate {
            op: agg.op.clone(),
            relation,
            target,
            condition: Condition::all(conditions),
            level,
            inner: Box::new(op),
        })
    }

    fn instantiate_multi_result_functor(
        &self,
        op: Operation,
        func: &IntrinsicFunctor,
        level: usize,
    ) -> TranslateResult<Operation> {
        let nested_op = match func.op {
            FunctorOp::Range => NestedIntrinsicOp::Range,
            FunctorOp::Urange => NestedIntrinsicOp::Urange,
            FunctorOp::Frange => NestedIntrinsicOp::Frange,
            other => {
                return Err(TranslateError::UnsupportedConstruct(format!(
                    "functor '{other}' cannot be used as a generator"
                )))
            }
        };
        let args = func
            .args
            .iter()
            .map(|arg| translate_value(arg, &self.index, self.ctx.symbols))
            .collect::<TranslateResult<Vec<_>>>()?;
        Ok(Operation::NestedIntrinsic {
            op: nested_op,
            args,
            level,
            inner: Box::new(op),
        })
    }

    /// Wrap the scans and unpacks around the operation, one per structural
    /// level, in reverse assignment order.
    fn add_variable_introductions(
        &self,
        clause: &Clause,
        mut op: Operation,
    ) -> TranslateResult<Operation> {
        for (level, operator) in self.operators.iter().enumerate().rev() {
            op = match operator {
                Operator::Atom { atom, body_index } => {
                    self.add_atom_scan(op, clause, atom, *body_index, level)?
                }
                Operator::Record { args } => self.add_record_unpack(op, args, level)?,
            };
        }
        Ok(op)
    }

    fn add_atom_scan(
        &self,
        mut op: Operation,
        clause: &Clause,
        atom: &Atom,
        body_index: usize,
        level: usize,
    ) -> TranslateResult<Operation> {
        let name = self.clause_atom_name(clause, AtomPosition::Body(body_index));

        op = self.add_constant_constraints(level, &atom.args, op)?;
        op = Operation::Filter {
            condition: Condition::EmptinessCheck(name.clone()).negate(),
            inner: Box::new(op),
        };

        let all_unnamed = atom
            .args
            .iter()
            .all(|arg| matches!(arg, Argument::UnnamedVariable));
        if atom.arity() == 0 || all_unnamed {
            // no tuple to bind; the non-emptiness filter is all that remains
            return Ok(op);
        }

        if clause.head.arity() == 0 {
            // a derived proposition ends the search early
            let head_name = self.clause_atom_name(clause, AtomPosition::Head);
            op = Operation::Break {
                condition: Condition::EmptinessCheck(head_name).negate(),
                inner: Box::new(op),
            };
        }

        let profile_text = self.ctx.config.profile.then(|| {
            format!(
                "@frequency-atom;{};{};{};{}",
                clause.head.relation, self.version, name, level
            )
        });

        Ok(Operation::Scan {
            relation: name,
            level,
            inner: Box::new(op),
            profile_text,
        })
    }

    fn add_record_unpack(
        &self,
        mut op: Operation,
        args: &[Argument],
        level: usize,
    ) -> TranslateResult<Operation> {
        op = self.add_constant_constraints(level, args, op)?;
        let source = self.index.definition_point(level).ok_or_else(|| {
            TranslateError::UnsupportedConstruct(format!(
                "record level {level} has no definition point"
            ))
        })?;
        Ok(Operation::UnpackRecord {
            expr: Expression::tuple_element(source.tuple, source.element),
            level,
            arity: args.len(),
            inner: Box::new(op),
        })
    }

    /// Equate constant slots of a level with their lowered constants.
    fn add_constant_constraints(
        &self,
        level: usize,
        args: &[Argument],
        mut op: Operation,
    ) -> TranslateResult<Operation> {
        for (i, arg) in args.iter().enumerate() {
            if !arg.is_constant() {
                continue;
            }
            let is_float = matches!(
                arg,
                Argument::NumericConstant(c) if c.final_type == Some(NumericType::Float)
            );
            let eq = if is_float {
                ConstraintOp::Feq
            } else {
                ConstraintOp::Eq
            };
            op = Operation::Filter {
                condition: Condition::Constraint {
                    op: eq,
                    lhs: Expression::tuple_element(level, i),
                    rhs: translate_constant(arg, self.ctx.symbols)?,
                },
                inner: Box::new(op),
            };
        }
        Ok(op)
    }

    /// A nullary recursive head fires at most once per stratum.
    fn add_entry_point(&self, clause: &Clause, op: Operation) -> Operation {
        if self.is_recursive() && clause.head.arity() == 0 {
            return Operation::Filter {
                condition: Condition::EmptinessCheck(names::concrete_name(&clause.head.relation)),
                inner: Box::new(op),
            };
        }
        op
    }

    // Indexing pass
    fn index_clause(&mut self, clause: &Clause) -> TranslateResult<()> {
        let ordering = self.atom_ordering(clause)?;
        for (body_index, atom) in ordering {
            let level = self.add_operator(Operator::Atom {
                atom: atom.clone(),
                body_index,
            });
            self.index_node_args(level, &atom.args);
        }
        self.index_aggregators(clause);
        self.index_multi_result_functors(clause);
        Ok(())
    }

    /// Order the body atoms: explicit plan first, then source order, then the
    /// Selinger planner when auto-scheduling is on.
    fn atom_ordering(&self, clause: &Clause) -> TranslateResult<Vec<(usize, Atom)>> {
        let atoms: Vec<(usize, Atom)> = clause
            .body_atoms()
            .into_iter()
            .map(|(idx, atom)| (idx, atom.clone()))
            .collect();

        // an explicit plan for the current version always wins
        if let Some(order) = clause
            .plan
            .as_ref()
            .and_then(|plan| plan.orders.get(&self.version))
        {
            return reorder_atoms(&clause.head.relation, atoms, order);
        }

        if atoms.len() <= 1 || !self.ctx.config.auto_schedule {
            return Ok(atoms);
        }

        let stats = self
            .ctx
            .analyses
            .stats
            .as_ref()
            .ok_or(TranslateError::MissingSchedulerStats)?;

        let planner_atoms: Vec<PlannerAtom> = atoms
            .iter()
            .map(|(body_index, atom)| PlannerAtom {
                body_index: *body_index,
                relation_name: self.clause_atom_name(clause, AtomPosition::Body(*body_index)),
                args: &atom.args,
            })
            .collect();
        let constraints = clause.body_constraints();
        let order = selinger_order(&planner_atoms, &constraints, stats);
        tracing::debug!(head = %clause.head.relation, ?order, "auto-scheduled atom order");

        Ok(order.into_iter().map(|pos| atoms[pos].clone()).collect())
    }

    fn add_operator(&mut self, operator: Operator) -> usize {
        let level = self.operators.len() + self.generators.len();
        self.operators.push(operator);
        level
    }

    fn add_generator(&mut self, generator: Generator) -> usize {
        let level = self.operators.len() + self.generators.len();
        self.generators.push(generator);
        level
    }

    /// Record variable occurrences at a level; nested records open their own
    /// unpack levels.
    fn index_node_args(&mut self, level: usize, args: &[Argument]) {
        for (i, arg) in args.iter().enumerate() {
            match arg {
                Argument::Variable(name) => {
                    self.index.add_var_reference(name, Location::new(level, i));
                }
                Argument::Record(rec_args) => {
                    let unpack_level = self.add_operator(Operator::Record {
                        args: rec_args.clone(),
                    });
                    self.index
                        .set_definition_point(unpack_level, Location::new(level, i));
                    self.index_node_args(unpack_level, rec_args);
                }
                _ => {}
            }
        }
    }

    fn index_aggregators(&mut self, clause: &Clause) {
        // each aggregator becomes an internal generator
        let aggregators = collect_aggregator_args(clause);
        for arg in &aggregators {
            let level = self.add_generator(match arg {
                Argument::Aggregator(agg) => Generator::Aggregate((**agg).clone()),
                _ => unreachable!("collector yields aggregator arguments only"),
            });
            self.index
                .set_generator_loc(arg.clone(), Location::new(level, 0));
        }

        // variable references inside each aggregator's atom
        for arg in &aggregators {
            let Argument::Aggregator(agg) = arg else { continue };
            let Some(loc) = self.index.generator_loc(arg) else { continue };
            let Some(atom) = agg.body_atom() else { continue };
            for (i, atom_arg) in atom.args.iter().enumerate() {
                if let Argument::Variable(name) = atom_arg {
                    self.index
                        .add_var_reference(name, Location::new(loc.tuple, i));
                }
            }
        }

        // `x = agg` binds x to the generator slot
        for constraint in clause.body_constraints() {
            if !constraint.op.is_equality() {
                continue;
            }
            let (Argument::Variable(name), rhs @ Argument::Aggregator(_)) =
                (&constraint.lhs, &constraint.rhs)
            else {
                continue;
            };
            if let Some(loc) = self.index.generator_loc(rhs) {
                self.index.add_var_reference(name, loc);
            }
        }
    }

    fn index_multi_result_functors(&mut self, clause: &Clause) {
        let functors = collect_multi_result_args(clause);
        for arg in &functors {
            let level = self.add_generator(match arg {
                Argument::Intrinsic(func) => Generator::MultiResult(func.clone()),
                _ => unreachable!("collector yields intrinsic arguments only"),
            });
            self.index
                .set_generator_loc(arg.clone(), Location::new(level, 0));
        }

        // `x = range(...)` binds x to the generator slot
        for constraint in clause.body_constraints() {
            if !constraint.op.is_equality() {
                continue;
            }
            let (Argument::Variable(name), rhs @ Argument::Intrinsic(func)) =
                (&constraint.lhs, &constraint.rhs)
            else {
                continue;
            };
            if !func.op.is_multi_result() {
                continue;
            }
            if let Some(loc) = self.index.generator_loc(rhs) {
                self.index.add_var_reference(name, loc);
            }
        }
    }
}

/// Apply an explicit, 1-based plan order to the body atoms.
fn reorder_atoms(
    relation: &str,
    atoms: Vec<(usize, Atom)>,
    order: &[usize],
) -> TranslateResult<Vec<(usize, Atom)>> {
    if order.len() != atoms.len() {
        return Err(TranslateError::InvalidPlanOrder {
            relation: relation.to_string(),
            message: format!("plan names {} atoms, clause has {}", order.len(), atoms.len()),
        });
    }
    let mut seen = vec![false; atoms.len()];
    let mut reordered = Vec::with_capacity(atoms.len());
    for &pos in order {
        let idx = pos.checked_sub(1).filter(|&i| i < atoms.len()).ok_or_else(|| {
            TranslateError::InvalidPlanOrder {
                relation: relation.to_string(),
                message: format!("atom index {pos} out of range"),
            }
        })?;
        if seen[idx] {
            return Err(TranslateError::InvalidPlanOrder {
                relation: relation.to_string(),
                message: format!("atom index {pos} repeated"),
            });
        }
        seen[idx] = true;
        reordered.push(atoms[idx].clone());
    }
    Ok(reordered)
}

/// Aggregator arguments of the clause, in pre-order
fn collect_aggregator_args(clause: &Clause) -> Vec<Argument> {
    let mut out = Vec::new();
    visit_arguments(clause, &mut |arg| {
        if matches!(arg, Argument::Aggregator(_)) {
            out.push(arg.clone());
        }
    });
    out
}

/// Multi-result intrinsic arguments of the clause, in pre-order
fn collect_multi_result_args(clause: &Clause) -> Vec<Argument> {
    let mut out = Vec::new();
    visit_arguments(clause, &mut |arg| {
        if let Argument::Intrinsic(func) = arg {
            if func.op.is_multi_result() {
                out.push(arg.clone());
            }
        }
    });
    out
}

/// Pre-order walk over every argument of the clause
fn visit_arguments(clause: &Clause, visit: &mut impl FnMut(&Argument)) {
    fn walk(arg: &Argument, visit: &mut impl FnMut(&Argument)) {
        visit(arg);
        match arg {
            Argument::Record(args) => args.iter().for_each(|a| walk(a, visit)),
            Argument::Branch(branch) => branch.args.iter().for_each(|a| walk(a, visit)),
            Argument::Intrinsic(func) => func.args.iter().for_each(|a| walk(a, visit)),
            Argument::UserFunctor(func) => func.args.iter().for_each(|a| walk(a, visit)),
            Argument::Aggregator(agg) => {
                if let Some(target) = &agg.target {
                    walk(target, visit);
                }
                for lit in &agg.body {
                    walk_literal(lit, visit);
                }
            }
            _ => {}
        }
    }
    fn walk_literal(lit: &Literal, visit: &mut impl FnMut(&Argument)) {
        match lit {
            Literal::Atom(atom) | Literal::Negation(atom) => {
                atom.args.iter().for_each(|a| walk(a, visit));
            }
            Literal::Constraint(c) => {
                walk(&c.lhs, visit);
                walk(&c.rhs, visit);
            }
        }
    }

    clause.head.args.iter().for_each(|a| walk(a, visit));
    for lit in &clause.body {
        walk_literal(lit, visit);
    }
}
