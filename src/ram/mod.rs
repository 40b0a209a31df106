//! # RAM: the relational abstract machine IR
//!
//! Low-level relational algebra program produced by the translator and
//! consumed by an interpreter or code generator. A program is an ordered
//! sequence of top-level statements, a map of named subroutines, and a map of
//! named relation declarations.
//!
//! Statements form the control skeleton (sequences, fixpoint loops, exits,
//! relation maintenance); each `Query` statement owns a tree of nested
//! relational *operations* ending in an insertion; conditions and expressions
//! are the leaf languages shared by both.

use crate::ast::{AggregateOp, ConstraintOp, FunctorOp, RelationRepresentation};
use std::collections::BTreeMap;
use std::fmt;

/// Domain type of RAM values
pub type RamDomain = i64;

// Expressions
/// RAM expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Signed integer constant
    SignedConstant(i64),
    /// Unsigned integer constant
    UnsignedConstant(u64),
    /// Floating point constant
    FloatConstant(f64),
    /// Interned string constant (index into the shared symbol table)
    SymbolConstant(usize),
    /// Element of the tuple bound at a level
    TupleElement { tuple: usize, element: usize },
    /// Record constructor
    PackRecord(Vec<Expression>),
    /// Intrinsic functor application
    Intrinsic { op: FunctorOp, args: Vec<Expression> },
    /// User-defined functor application
    UserDefined { name: String, args: Vec<Expression> },
    /// Current size of a relation
    RelationSize(String),
    /// The undefined value ⊥
    Undef,
}

impl Expression {
    pub fn tuple_element(tuple: usize, element: usize) -> Self {
        Expression::TupleElement { tuple, element }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expression::SignedConstant(v) => write!(f, "number({v})"),
            Expression::UnsignedConstant(v) => write!(f, "unsigned({v})"),
            Expression::FloatConstant(v) => write!(f, "float({v})"),
            Expression::SymbolConstant(idx) => write!(f, "symbol(#{idx})"),
            Expression::TupleElement { tuple, element } => write!(f, "t{tuple}.{element}"),
            Expression::PackRecord(args) => {
                write!(f, "[")?;
                write_separated(f, args)?;
                write!(f, "]")
            }
            Expression::Intrinsic { op, args } => {
                write!(f, "{op}(")?;
                write_separated(f, args)?;
                write!(f, ")")
            }
            Expression::UserDefined { name, args } => {
                write!(f, "@{name}(")?;
                write_separated(f, args)?;
                write!(f, ")")
            }
            Expression::RelationSize(rel) => write!(f, "size({rel})"),
            Expression::Undef => write!(f, "⊥"),
        }
    }
}

fn write_separated<T: fmt::Display>(f: &mut fmt::Formatter, items: &[T]) -> fmt::Result {
    let mut first = true;
    for item in items {
        if !first {
            write!(f, ", ")?;
        }
        first = false;
        write!(f, "{item}")?;
    }
    Ok(())
}

// Conditions
/// RAM conditions
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    True,
    Conjunction(Box<Condition>, Box<Condition>),
    Negation(Box<Condition>),
    /// The relation holds no tuples
    EmptinessCheck(String),
    /// The relation holds the given tuple (⊥ columns are unconstrained)
    ExistenceCheck {
        relation: String,
        values: Vec<Expression>,
    },
    /// Binary constraint between two expressions
    Constraint {
        op: ConstraintOp,
        lhs: Expression,
        rhs: Expression,
    },
}

impl Condition {
    /// Conjoin an optional accumulator with a new term
    pub fn and(acc: Option<Condition>, term: Condition) -> Condition {
        match acc {
            None => term,
            Some(prev) => Condition::Conjunction(Box::new(prev), Box::new(term)),
        }
    }

    /// Fold a list of conditions into one conjunction (`True` when empty)
    pub fn all(conditions: Vec<Condition>) -> Condition {
        let mut acc = None;
        for cond in conditions {
            acc = Some(Condition::and(acc, cond));
        }
        acc.unwrap_or(Condition::True)
    }

    pub fn negate(self) -> Condition {
        Condition::Negation(Box::new(self))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Condition::True => write!(f, "true"),
            Condition::Conjunction(lhs, rhs) => write!(f, "({lhs} ∧ {rhs})"),
            Condition::Negation(inner) => write!(f, "¬{inner}"),
            Condition::EmptinessCheck(rel) => write!(f, "({rel} = ∅)"),
            Condition::ExistenceCheck { relation, values } => {
                write!(f, "(")?;
                write_separated(f, values)?;
                write!(f, ") ∈ {relation}")
            }
            Condition::Constraint { op, lhs, rhs } => write!(f, "{lhs} {op} {rhs}"),
        }
    }
}

// Operations
/// Multi-result intrinsic operators usable as nested generators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestedIntrinsicOp {
    Range,
    Urange,
    Frange,
}

impl fmt::Display for NestedIntrinsicOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NestedIntrinsicOp::Range => write!(f, "range"),
            NestedIntrinsicOp::Urange => write!(f, "urange"),
            NestedIntrinsicOp::Frange => write!(f, "frange"),
        }
    }
}

/// Nested relational operations forming the body of a `Query`.
///
/// The tree is read outside-in: a `Scan` binds a tuple level and runs its
/// inner operation once per tuple; the innermost operation is an insertion.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Insert the evaluated values into a relation
    Insert {
        relation: String,
        values: Vec<Expression>,
    },
    /// Insert only when the guard holds; guard and insert are one indivisible
    /// step per tuple
    GuardedInsert {
        relation: String,
        values: Vec<Expression>,
        guard: Condition,
    },
    /// Remove the evaluated values from a delete-capable relation
    Erase {
        relation: String,
        values: Vec<Expression>,
    },
    /// Bind each tuple of a relation at the given level
    Scan {
        relation: String,
        level: usize,
        inner: Box<Operation>,
        /// Frequency annotation under profiling
        profile_text: Option<String>,
    },
    /// Run the inner operation until the condition holds
    Break {
        condition: Condition,
        inner: Box<Operation>,
    },
    /// Run the inner operation only when the condition holds
    Filter {
        condition: Condition,
        inner: Box<Operation>,
    },
    /// Destructure a record value into a tuple level
    UnpackRecord {
        expr: Expression,
        level: usize,
        arity: usize,
        inner: Box<Operation>,
    },
    /// Fold the matching tuples of a relation into a single value bound at
    /// the given level
    Aggregate {
        op: AggregateOp,
        relation: String,
        target: Option<Expression>,
        condition: Condition,
        level: usize,
        inner: Box<Operation>,
    },
    /// Bind each result of a multi-result intrinsic at the given level
    NestedIntrinsic {
        op: NestedIntrinsicOp,
        args: Vec<Expression>,
        level: usize,
        inner: Box<Operation>,
    },
}

impl Operation {
    /// The inner operation, if this node has one
    pub fn inner(&self) -> Option<&Operation> {
        match self {
            Operation::Scan { inner, .. }
            | Operation::Break { inner, .. }
            | Operation::Filter { inner, .. }
            | Operation::UnpackRecord { inner, .. }
            | Operation::Aggregate { inner, .. }
            | Operation::NestedIntrinsic { inner, .. } => Some(inner),
            Operation::Insert { .. }
            | Operation::GuardedInsert { .. }
            | Operation::Erase { .. } => None,
        }
    }

    /// The innermost insertion/erase of the operation chain
    pub fn sink(&self) -> &Operation {
        let mut op = self;
        while let Some(inner) = op.inner() {
            op = inner;
        }
        op
    }

    /// Relation names scanned anywhere in this operation tree, outermost first
    pub fn scanned_relations(&self) -> Vec<&str> {
        let mut names = Vec::new();
        let mut op = Some(self);
        while let Some(cur) = op {
            if let Operation::Scan { relation, .. } = cur {
                names.push(relation.as_str());
            }
            op = cur.inner();
        }
        names
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter, indent: usize) -> fmt::Result {
        let pad = " ".repeat(indent);
        match self {
            Operation::Insert { relation, values } => {
                write!(f, "{pad}INSERT (")?;
                write_separated(f, values)?;
                writeln!(f, ") INTO {relation}")
            }
            Operation::GuardedInsert {
                relation,
                values,
                guard,
            } => {
                write!(f, "{pad}INSERT (")?;
                write_separated(f, values)?;
                writeln!(f, ") INTO {relation} IF {guard}")
            }
            Operation::Erase { relation, values } => {
                write!(f, "{pad}ERASE (")?;
                write_separated(f, values)?;
                writeln!(f, ") FROM {relation}")
            }
            Operation::Scan {
                relation,
                level,
                inner,
                ..
            } => {
                writeln!(f, "{pad}FOR t{level} IN {relation}")?;
                inner.fmt_indented(f, indent + 1)
            }
            Operation::Break { condition, inner } => {
                writeln!(f, "{pad}BREAK IF {condition}")?;
                inner.fmt_indented(f, indent + 1)
            }
            Operation::Filter { condition, inner } => {
                writeln!(f, "{pad}IF {condition}")?;
                inner.fmt_indented(f, indent + 1)
            }
            Operation::UnpackRecord {
                expr,
                level,
                arity,
                inner,
            } => {
                writeln!(f, "{pad}UNPACK t{level} ARITY {arity} FROM {expr}")?;
                inner.fmt_indented(f, indent + 1)
            }
            Operation::Aggregate {
                op,
                relation,
                target,
                condition,
                level,
                inner,
            } => {
                write!(f, "{pad}t{level}.0 = {op} ")?;
                if let Some(target) = target {
                    write!(f, "{target} ")?;
                }
                writeln!(f, "FOR ALL IN {relation} WHERE {condition}")?;
                inner.fmt_indented(f, indent + 1)
            }
            Operation::NestedIntrinsic {
                op,
                args,
                level,
                inner,
            } => {
                write!(f, "{pad}FOR t{level} IN {op}(")?;
                write_separated(f, args)?;
                writeln!(f, ")")?;
                inner.fmt_indented(f, indent + 1)
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

// Statements
/// Top-level and control statements
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Ordered execution
    Sequence(Vec<Statement>),
    /// Statements with no ordering constraint between them; workers may run
    /// them on independent threads
    Parallel(Vec<Statement>),
    /// Repeat the body until an `Exit` fires
    Loop(Box<Statement>),
    /// Leave the enclosing loop when the condition holds; evaluated at
    /// iteration boundaries
    Exit(Condition),
    /// One firing of a translated clause
    Query(Operation),
    /// Exchange the storage handles of two relations (constant-time)
    Swap { lhs: String, rhs: String },
    /// Merge source into target preserving equivalence-relation closure
    Extend { target: String, source: String },
    /// Remove all tuples, keeping the storage alive
    Clear(String),
    /// Load or store a relation per its directive parameters
    Io {
        relation: String,
        directives: BTreeMap<String, String>,
    },
    /// Invoke a named subroutine
    Call(String),
    /// Timed execution of the wrapped statement, attributed to a relation
    LogRelationTimer {
        inner: Box<Statement>,
        message: String,
        relation: String,
    },
    /// Timed execution of the wrapped statement
    LogTimer {
        inner: Box<Statement>,
        message: String,
    },
    /// Log the size of a relation
    LogSize { relation: String, message: String },
    /// Attach clause provenance text to the wrapped statement
    DebugInfo {
        inner: Box<Statement>,
        text: String,
    },
}

impl Statement {
    /// Strip profiling/debug wrappers off a statement
    pub fn unwrapped(&self) -> &Statement {
        let mut stmt = self;
        loop {
            match stmt {
                Statement::LogRelationTimer { inner, .. }
                | Statement::LogTimer { inner, .. }
                | Statement::DebugInfo { inner, .. } => stmt = inner,
                other => return other,
            }
        }
    }

    /// Child statements in a flat list (one level deep)
    pub fn children(&self) -> Vec<&Statement> {
        match self {
            Statement::Sequence(stmts) | Statement::Parallel(stmts) => stmts.iter().collect(),
            Statement::Loop(inner) => vec![inner],
            Statement::LogRelationTimer { inner, .. }
            | Statement::LogTimer { inner, .. }
            | Statement::DebugInfo { inner, .. } => vec![inner],
            _ => Vec::new(),
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter, indent: usize) -> fmt::Result {
        let pad = " ".repeat(indent);
        match self {
            Statement::Sequence(stmts) => {
                writeln!(f, "{pad}BEGIN")?;
                for stmt in stmts {
                    stmt.fmt_indented(f, indent + 1)?;
                }
                writeln!(f, "{pad}END")
            }
            Statement::Parallel(stmts) => {
                writeln!(f, "{pad}PARALLEL")?;
                for stmt in stmts {
                    stmt.fmt_indented(f, indent + 1)?;
                }
                writeln!(f, "{pad}END PARALLEL")
            }
            Statement::Loop(inner) => {
                writeln!(f, "{pad}LOOP")?;
                inner.fmt_indented(f, indent + 1)?;
                writeln!(f, "{pad}END LOOP")
            }
            Statement::Exit(cond) => writeln!(f, "{pad}EXIT {cond}"),
            Statement::Query(op) => {
                writeln!(f, "{pad}QUERY")?;
                op.fmt_indented(f, indent + 1)
            }
            Statement::Swap { lhs, rhs } => writeln!(f, "{pad}SWAP ({lhs}, {rhs})"),
            Statement::Extend { target, source } => {
                writeln!(f, "{pad}EXTEND {target} WITH {source}")
            }
            Statement::Clear(rel) => writeln!(f, "{pad}CLEAR {rel}"),
            Statement::Io {
                relation,
                directives,
            } => {
                write!(f, "{pad}IO {relation} (")?;
                let mut first = true;
                for (key, value) in directives {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{key}={value}")?;
                }
                writeln!(f, ")")
            }
            Statement::Call(name) => writeln!(f, "{pad}CALL {name}"),
            Statement::LogRelationTimer {
                inner,
                message,
                relation,
            } => {
                writeln!(f, "{pad}START_TIMER ON {relation} \"{message}\"")?;
                inner.fmt_indented(f, indent + 1)?;
                writeln!(f, "{pad}END_TIMER")
            }
            Statement::LogTimer { inner, message } => {
                writeln!(f, "{pad}START_TIMER \"{message}\"")?;
                inner.fmt_indented(f, indent + 1)?;
                writeln!(f, "{pad}END_TIMER")
            }
            Statement::LogSize { relation, message } => {
                writeln!(f, "{pad}LOGSIZE {relation} \"{message}\"")
            }
            Statement::DebugInfo { inner, text } => {
                writeln!(f, "{pad}DEBUG \"{}\"", text.replace('\n', " "))?;
                inner.fmt_indented(f, indent + 1)
            }
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

// Relations & programs
/// Declaration of a RAM relation
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDecl {
    pub name: String,
    pub arity: usize,
    /// Trailing columns reserved for provenance/bookkeeping
    pub aux_arity: usize,
    pub attribute_names: Vec<String>,
    pub attribute_types: Vec<String>,
    pub representation: RelationRepresentation,
}

impl fmt::Display for RelationDecl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DECL {}(", self.name)?;
        let mut first = true;
        for (name, ty) in self.attribute_names.iter().zip(&self.attribute_types) {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{name}:{ty}")?;
        }
        write!(
            f,
            ") arity={} aux={} repr={:?}",
            self.arity, self.aux_arity, self.representation
        )
    }
}

/// A complete RAM program.
///
/// `subroutines` and `relations` are ordered maps so that iteration, and with
/// it the textual dump fed to the debug report, is deterministic across runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    /// The top-level statement sequence (usually `Call`s of the strata)
    pub statements: Vec<Statement>,
    /// Named subroutines, one per stratum
    pub subroutines: BTreeMap<String, Statement>,
    /// All declared relations
    pub relations: BTreeMap<String, RelationDecl>,
}

impl Program {
    /// Look up a subroutine by name
    pub fn subroutine(&self, name: &str) -> Option<&Statement> {
        self.subroutines.get(name)
    }

    /// Look up a relation declaration by name
    pub fn relation(&self, name: &str) -> Option<&RelationDecl> {
        self.relations.get(name)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "PROGRAM")?;
        for decl in self.relations.values() {
            writeln!(f, " {decl}")?;
        }
        for (name, body) in &self.subroutines {
            writeln!(f, " SUBROUTINE {name}")?;
            body.fmt_indented(f, 2)?;
        }
        writeln!(f, " MAIN")?;
        for stmt in &self.statements {
            stmt.fmt_indented(f, 2)?;
        }
        writeln!(f, "END PROGRAM")
    }
}
