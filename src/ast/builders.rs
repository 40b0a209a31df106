//! Builder patterns for AST construction.
//!
//! Fluent APIs for assembling programs programmatically, particularly useful
//! for tests and for drivers that synthesize rules.
//!
//! ## Example
//!
//! ```rust
//! use ramlayer::ast::builders::{AtomBuilder, ClauseBuilder};
//!
//! // path(x, y) :- edge(x, y).
//! let clause = ClauseBuilder::new("path")
//!     .head_vars(["x", "y"])
//!     .body_atom("edge", ["x", "y"])
//!     .build();
//! assert_eq!(clause.to_string(), "path(x, y) :- edge(x, y).");
//! ```

use super::{
    Argument, Atom, Attribute, BinaryConstraint, Clause, ClauseKind, ConstraintOp, Directive,
    DirectiveKind, ExecutionPlan, Literal, NumericConstant, Program, Relation, SumType,
    SumTypeBranch,
};
use std::collections::BTreeMap;

// AtomBuilder
/// Builder for [`Atom`] instances
#[derive(Debug, Clone)]
pub struct AtomBuilder {
    relation: String,
    args: Vec<Argument>,
}

impl AtomBuilder {
    pub fn new(relation: impl Into<String>) -> Self {
        AtomBuilder {
            relation: relation.into(),
            args: Vec::new(),
        }
    }

    /// Add a variable argument
    pub fn var(mut self, name: impl Into<String>) -> Self {
        self.args.push(Argument::Variable(name.into()));
        self
    }

    /// Add a signed integer constant
    pub fn int(mut self, value: i64) -> Self {
        self.args
            .push(Argument::NumericConstant(NumericConstant::signed(value)));
        self
    }

    /// Add a string constant
    pub fn string(mut self, value: impl Into<String>) -> Self {
        self.args.push(Argument::StringConstant(value.into()));
        self
    }

    /// Add a wildcard argument
    pub fn wildcard(mut self) -> Self {
        self.args.push(Argument::UnnamedVariable);
        self
    }

    /// Add an argument directly
    pub fn arg(mut self, arg: Argument) -> Self {
        self.args.push(arg);
        self
    }

    /// Add multiple variable arguments
    pub fn vars<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.args.push(Argument::Variable(name.into()));
        }
        self
    }

    pub fn build(self) -> Atom {
        Atom::new(self.relation, self.args)
    }
}

// ClauseBuilder
/// Builder for [`Clause`] instances
#[derive(Debug, Clone)]
pub struct ClauseBuilder {
    head_relation: String,
    head_args: Vec<Argument>,
    body: Vec<Literal>,
    plan: Option<ExecutionPlan>,
    kind: ClauseKind,
}

impl ClauseBuilder {
    pub fn new(head_relation: impl Into<String>) -> Self {
        ClauseBuilder {
            head_relation: head_relation.into(),
            head_args: Vec::new(),
            body: Vec::new(),
            plan: None,
            kind: ClauseKind::Standard,
        }
    }

    /// Set the head variables
    pub fn head_vars<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.head_args = vars
            .into_iter()
            .map(|v| Argument::Variable(v.into()))
            .collect();
        self
    }

    /// Set the head arguments directly (constants, records, ...)
    pub fn head_args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = Argument>,
    {
        self.head_args = args.into_iter().collect();
        self
    }

    /// Add a positive body atom with variable arguments
    pub fn body_atom<I, S>(mut self, relation: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.body.push(Literal::Atom(
            AtomBuilder::new(relation).vars(vars).build(),
        ));
        self
    }

    /// Add a fully formed body literal
    pub fn literal(mut self, lit: Literal) -> Self {
        self.body.push(lit);
        self
    }

    /// Add a negated body atom with variable arguments
    pub fn negated_atom<I, S>(mut self, relation: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.body.push(Literal::Negation(
            AtomBuilder::new(relation).vars(vars).build(),
        ));
        self
    }

    /// Add a binary constraint
    pub fn constraint(mut self, op: ConstraintOp, lhs: Argument, rhs: Argument) -> Self {
        self.body
            .push(Literal::Constraint(BinaryConstraint { op, lhs, rhs }));
        self
    }

    /// Attach an explicit execution plan order for a version (1-based indices)
    pub fn plan_order(mut self, version: usize, order: Vec<usize>) -> Self {
        self.plan
            .get_or_insert_with(ExecutionPlan::default)
            .orders
            .insert(version, order);
        self
    }

    /// Mark the clause as subsumptive
    pub fn subsumptive(mut self) -> Self {
        self.kind = ClauseKind::Subsumptive;
        self
    }

    pub fn build(self) -> Clause {
        Clause {
            head: Atom::new(self.head_relation, self.head_args),
            body: self.body,
            plan: self.plan,
            kind: self.kind,
        }
    }
}

// ProgramBuilder
/// Builder for complete [`Program`]s
#[derive(Debug, Clone, Default)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        ProgramBuilder::default()
    }

    /// Declare a relation with symbol-typed attributes named `a0..an`
    pub fn relation(mut self, name: impl Into<String>, arity: usize) -> Self {
        let attributes = (0..arity)
            .map(|i| Attribute {
                name: format!("a{i}"),
                type_name: "number".to_string(),
            })
            .collect();
        self.program.relations.push(Relation::new(name, attributes));
        self
    }

    /// Declare a relation with explicit metadata
    pub fn relation_decl(mut self, relation: Relation) -> Self {
        self.program.relations.push(relation);
        self
    }

    pub fn clause(mut self, clause: Clause) -> Self {
        self.program.clauses.push(clause);
        self
    }

    /// Attach an input directive with no parameters
    pub fn input(self, relation: impl Into<String>) -> Self {
        self.directive(DirectiveKind::Input, relation, BTreeMap::new())
    }

    /// Attach an output directive with no parameters
    pub fn output(self, relation: impl Into<String>) -> Self {
        self.directive(DirectiveKind::Output, relation, BTreeMap::new())
    }

    /// Attach a limitsize directive with the given bound
    pub fn limitsize(self, relation: impl Into<String>, limit: usize) -> Self {
        let mut params = BTreeMap::new();
        params.insert("n".to_string(), limit.to_string());
        self.directive(DirectiveKind::LimitSize, relation, params)
    }

    pub fn directive(
        mut self,
        kind: DirectiveKind,
        relation: impl Into<String>,
        params: BTreeMap<String, String>,
    ) -> Self {
        self.program.directives.push(Directive {
            kind,
            relation: relation.into(),
            params,
        });
        self
    }

    /// Declare a sum type from `(branch name, field types)` pairs
    pub fn sum_type<I, S>(mut self, name: impl Into<String>, branches: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<S>)>,
        S: Into<String>,
    {
        self.program.sum_types.push(SumType {
            name: name.into(),
            branches: branches
                .into_iter()
                .map(|(name, fields)| SumTypeBranch {
                    name: name.into(),
                    fields: fields.into_iter().map(Into::into).collect(),
                })
                .collect(),
        });
        self
    }

    pub fn build(self) -> Program {
        self.program
    }
}
