//! # Rule AST
//!
//! Abstract syntax tree for the semantically-checked rule programs the
//! translator consumes. The surface parser and the semantic checker live in
//! earlier compiler phases; by the time a [`Program`] reaches this crate,
//! polymorphic operators are resolved and every clause is well-typed.
//!
//! ## Builders
//!
//! For programmatic construction (mainly in tests), see the [`builders`]
//! module which provides fluent APIs like `AtomBuilder` and `ClauseBuilder`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod builders;

// Values
/// Final numeric type assigned by the polymorphism analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumericType {
    Signed,
    Unsigned,
    Float,
}

/// A numeric literal together with its finalized type.
///
/// The literal keeps its source text; the translator parses it at the
/// finalized type. An unset `final_type` at translation time is an internal
/// error (the polymorphism analysis finalizes every constant first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericConstant {
    pub text: String,
    pub final_type: Option<NumericType>,
}

impl NumericConstant {
    pub fn signed(value: i64) -> Self {
        NumericConstant {
            text: value.to_string(),
            final_type: Some(NumericType::Signed),
        }
    }

    pub fn unsigned(value: u64) -> Self {
        NumericConstant {
            text: value.to_string(),
            final_type: Some(NumericType::Unsigned),
        }
    }

    pub fn float(value: f64) -> Self {
        NumericConstant {
            text: value.to_string(),
            final_type: Some(NumericType::Float),
        }
    }
}

/// Aggregate operators, overload-resolved by the polymorphism analysis
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateOp {
    Min,
    Max,
    Sum,
    Count,
    Mean,
    /// User-defined aggregate, dispatched by name
    UserDefined(String),
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AggregateOp::Min => write!(f, "min"),
            AggregateOp::Max => write!(f, "max"),
            AggregateOp::Sum => write!(f, "sum"),
            AggregateOp::Count => write!(f, "count"),
            AggregateOp::Mean => write!(f, "mean"),
            AggregateOp::UserDefined(name) => write!(f, "@{name}"),
        }
    }
}

/// Intrinsic functor operators with their overloads resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctorOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Band,
    Bor,
    Bxor,
    Max,
    Min,
    Cat,
    Ord,
    /// Signed range generator (multi-result)
    Range,
    /// Unsigned range generator (multi-result)
    Urange,
    /// Float range generator (multi-result)
    Frange,
}

impl FunctorOp {
    /// Multi-result functors produce a stream of values and must be handled
    /// as generators rather than as expressions.
    pub fn is_multi_result(self) -> bool {
        matches!(self, FunctorOp::Range | FunctorOp::Urange | FunctorOp::Frange)
    }
}

impl fmt::Display for FunctorOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            FunctorOp::Add => "add",
            FunctorOp::Sub => "sub",
            FunctorOp::Mul => "mul",
            FunctorOp::Div => "div",
            FunctorOp::Mod => "mod",
            FunctorOp::Neg => "neg",
            FunctorOp::Band => "band",
            FunctorOp::Bor => "bor",
            FunctorOp::Bxor => "bxor",
            FunctorOp::Max => "max",
            FunctorOp::Min => "min",
            FunctorOp::Cat => "cat",
            FunctorOp::Ord => "ord",
            FunctorOp::Range => "range",
            FunctorOp::Urange => "urange",
            FunctorOp::Frange => "frange",
        };
        write!(f, "{name}")
    }
}

/// An aggregator sub-clause, e.g. `s = sum y : { weight(_, y) }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregator {
    pub op: AggregateOp,
    /// Target expression; `None` for count
    pub target: Option<Box<Argument>>,
    /// Body literals: exactly one atom plus any number of constraints
    pub body: Vec<Literal>,
}

impl Aggregator {
    /// The single atom inside the aggregator body
    pub fn body_atom(&self) -> Option<&Atom> {
        self.body.iter().find_map(|lit| match lit {
            Literal::Atom(atom) => Some(atom),
            _ => None,
        })
    }
}

/// An intrinsic functor application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicFunctor {
    pub op: FunctorOp,
    pub args: Vec<Argument>,
}

/// A user-defined functor application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFunctor {
    pub name: String,
    pub args: Vec<Argument>,
}

/// A sum-type constructor use, e.g. `Node(l, r)`.
///
/// Erased before clause translation; see the eraser module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchInit {
    pub constructor: String,
    pub args: Vec<Argument>,
}

/// Arguments of atoms and functors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Argument {
    /// Named variable
    Variable(String),
    /// Wildcard `_`
    UnnamedVariable,
    /// Numeric literal with finalized type
    NumericConstant(NumericConstant),
    /// String literal, interned during translation
    StringConstant(String),
    /// The zero-valued record `nil`
    NilConstant,
    /// Record constructor `[a, b, c]`
    Record(Vec<Argument>),
    /// Sum-type constructor (removed by erasure)
    Branch(BranchInit),
    /// Aggregator sub-clause
    Aggregator(Box<Aggregator>),
    /// Intrinsic functor application
    Intrinsic(IntrinsicFunctor),
    /// User-defined functor application
    UserFunctor(UserFunctor),
}

impl Argument {
    /// Whether this argument is a constant the translator can lower directly
    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            Argument::NumericConstant(_) | Argument::StringConstant(_) | Argument::NilConstant
        )
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Argument::Variable(name) => write!(f, "{name}"),
            Argument::UnnamedVariable => write!(f, "_"),
            Argument::NumericConstant(c) => write!(f, "{}", c.text),
            Argument::StringConstant(s) => write!(f, "{s:?}"),
            Argument::NilConstant => write!(f, "nil"),
            Argument::Record(args) => {
                write!(f, "[")?;
                write_separated(f, args)?;
                write!(f, "]")
            }
            Argument::Branch(b) => {
                write!(f, "${}(", b.constructor)?;
                write_separated(f, &b.args)?;
                write!(f, ")")
            }
            Argument::Aggregator(agg) => match &agg.target {
                Some(target) => write!(f, "{} {target} : {{...}}", agg.op),
                None => write!(f, "{} : {{...}}", agg.op),
            },
            Argument::Intrinsic(func) => {
                write!(f, "{}(", func.op)?;
                write_separated(f, &func.args)?;
                write!(f, ")")
            }
            Argument::UserFunctor(func) => {
                write!(f, "@{}(", func.name)?;
                write_separated(f, &func.args)?;
                write!(f, ")")
            }
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

// Literals
/// Binary constraint operators with their overloads resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintOp {
    Eq,
    /// Float equality
    Feq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ConstraintOp {
    pub fn is_equality(self) -> bool {
        matches!(self, ConstraintOp::Eq | ConstraintOp::Feq)
    }

    pub fn is_inequality(self) -> bool {
        matches!(
            self,
            ConstraintOp::Lt | ConstraintOp::Le | ConstraintOp::Gt | ConstraintOp::Ge
        )
    }

    pub fn is_lower_bound(self) -> bool {
        matches!(self, ConstraintOp::Gt | ConstraintOp::Ge)
    }

    pub fn is_upper_bound(self) -> bool {
        matches!(self, ConstraintOp::Lt | ConstraintOp::Le)
    }
}

impl fmt::Display for ConstraintOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let symbol = match self {
            ConstraintOp::Eq => "=",
            ConstraintOp::Feq => "=f",
            ConstraintOp::Ne => "!=",
            ConstraintOp::Lt => "<",
            ConstraintOp::Le => "<=",
            ConstraintOp::Gt => ">",
            ConstraintOp::Ge => ">=",
        };
        write!(f, "{symbol}")
    }
}

/// A positive atom `rel(args...)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub relation: String,
    pub args: Vec<Argument>,
}

impl Atom {
    pub fn new(relation: impl Into<String>, args: Vec<Argument>) -> Self {
        Atom {
            relation: relation.into(),
            args,
        }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}(", self.relation)?;
        write_separated(f, &self.args)?;
        write!(f, ")")
    }
}

/// A binary constraint literal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryConstraint {
    pub op: ConstraintOp,
    pub lhs: Argument,
    pub rhs: Argument,
}

impl fmt::Display for BinaryConstraint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

/// Body literals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Atom(Atom),
    Negation(Atom),
    Constraint(BinaryConstraint),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Literal::Atom(atom) => write!(f, "{atom}"),
            Literal::Negation(atom) => write!(f, "!{atom}"),
            Literal::Constraint(c) => write!(f, "{c}"),
        }
    }
}

// Clauses
/// Explicit execution plan: version number → 1-based atom ordering
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub orders: BTreeMap<usize, Vec<usize>>,
}

impl ExecutionPlan {
    pub fn max_version(&self) -> Option<usize> {
        self.orders.keys().next_back().copied()
    }
}

/// Clause kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClauseKind {
    /// Fact or ordinary rule
    Standard,
    /// Subsumptive clause: body position 0 is the dominated head atom,
    /// position 1 the dominating one
    Subsumptive,
}

/// A clause: head atom, body literals, optional execution plan.
///
/// A fact has no body atoms; a rule has at least one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    pub head: Atom,
    pub body: Vec<Literal>,
    pub plan: Option<ExecutionPlan>,
    pub kind: ClauseKind,
}

impl Clause {
    pub fn new(head: Atom, body: Vec<Literal>) -> Self {
        Clause {
            head,
            body,
            plan: None,
            kind: ClauseKind::Standard,
        }
    }

    /// Positive body atoms, with their body-literal indices
    pub fn body_atoms(&self) -> Vec<(usize, &Atom)> {
        self.body
            .iter()
            .enumerate()
            .filter_map(|(i, lit)| match lit {
                Literal::Atom(atom) => Some((i, atom)),
                _ => None,
            })
            .collect()
    }

    /// Binary constraints of the body
    pub fn body_constraints(&self) -> Vec<&BinaryConstraint> {
        self.body
            .iter()
            .filter_map(|lit| match lit {
                Literal::Constraint(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    /// A fact has no positive body atoms
    pub fn is_fact(&self) -> bool {
        self.kind == ClauseKind::Standard && self.body_atoms().is_empty()
    }

    pub fn is_subsumptive(&self) -> bool {
        self.kind == ClauseKind::Subsumptive
    }

    /// Dominated head atom of a subsumptive clause (body position 0)
    pub fn dominated_atom(&self) -> Option<&Atom> {
        match self.body.first() {
            Some(Literal::Atom(atom)) if self.is_subsumptive() => Some(atom),
            _ => None,
        }
    }

    /// Dominating head atom of a subsumptive clause (body position 1)
    pub fn dominating_atom(&self) -> Option<&Atom> {
        match self.body.get(1) {
            Some(Literal::Atom(atom)) if self.is_subsumptive() => Some(atom),
            _ => None,
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.body.is_empty() {
            return write!(f, "{}.", self.head);
        }
        let connector = if self.is_subsumptive() { "<=" } else { ":-" };
        write!(f, "{} {} ", self.head, connector)?;
        write_separated(f, &self.body)?;
        write!(f, ".")
    }
}

// Relations & directives
/// Physical representation of a relation's storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationRepresentation {
    /// Default ordered set
    #[default]
    Btree,
    /// Union-find backed equivalence relation
    Eqrel,
    /// Ordered set with tuple deletion
    BtreeDelete,
    /// Provenance-augmented ordered set
    Provenance,
}

/// A named, typed attribute of a relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub type_name: String,
}

/// Functional dependency: the named key columns determine the rest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionalConstraint {
    pub keys: Vec<String>,
}

impl FunctionalConstraint {
    /// Two constraints are equivalent when they name the same key set
    pub fn equivalent(&self, other: &FunctionalConstraint) -> bool {
        let mut a = self.keys.clone();
        let mut b = other.keys.clone();
        a.sort();
        b.sort();
        a == b
    }
}

/// A relation declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub representation: RelationRepresentation,
    pub functional_dependencies: Vec<FunctionalConstraint>,
}

impl Relation {
    pub fn new(name: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        Relation {
            name: name.into(),
            attributes,
            representation: RelationRepresentation::Btree,
            functional_dependencies: Vec::new(),
        }
    }

    pub fn arity(&self) -> usize {
        self.attributes.len()
    }
}

/// I/O and sizing directives attached to relations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectiveKind {
    Input,
    Output,
    PrintSize,
    LimitSize,
}

/// A directive with its parameter map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub relation: String,
    pub params: BTreeMap<String, String>,
}

// Sum types
/// One branch of a sum type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumTypeBranch {
    pub name: String,
    /// Field type names; the branch arity is the field count
    pub fields: Vec<String>,
}

/// An algebraic data type declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumType {
    pub name: String,
    pub branches: Vec<SumTypeBranch>,
}

// Program
/// A complete rule program handed to the translator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub relations: Vec<Relation>,
    pub clauses: Vec<Clause>,
    pub directives: Vec<Directive>,
    pub sum_types: Vec<SumType>,
}

impl Program {
    /// Look up a relation declaration by name
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|rel| rel.name == name)
    }

    /// Directives attached to a given relation
    pub fn directives_for(&self, relation: &str) -> Vec<&Directive> {
        self.directives
            .iter()
            .filter(|d| d.relation == relation)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clause_display() {
        let clause = Clause::new(
            Atom::new(
                "path",
                vec![
                    Argument::Variable("x".to_string()),
                    Argument::Variable("y".to_string()),
                ],
            ),
            vec![Literal::Atom(Atom::new(
                "edge",
                vec![
                    Argument::Variable("x".to_string()),
                    Argument::Variable("y".to_string()),
                ],
            ))],
        );
        assert_eq!(clause.to_string(), "path(x, y) :- edge(x, y).");
    }

    #[test]
    fn test_fact_detection() {
        let fact = Clause::new(
            Atom::new(
                "edge",
                vec![
                    Argument::NumericConstant(NumericConstant::signed(1)),
                    Argument::NumericConstant(NumericConstant::signed(2)),
                ],
            ),
            vec![],
        );
        assert!(fact.is_fact());
        assert_eq!(fact.to_string(), "edge(1, 2).");
    }

    #[test]
    fn test_body_atoms_skip_negations() {
        let clause = Clause::new(
            Atom::new("p", vec![Argument::Variable("x".to_string())]),
            vec![
                Literal::Atom(Atom::new("q", vec![Argument::Variable("x".to_string())])),
                Literal::Negation(Atom::new("r", vec![Argument::Variable("x".to_string())])),
            ],
        );
        let atoms = clause.body_atoms();
        assert_eq!(atoms.len(), 1);
        assert_eq!(atoms[0].1.relation, "q");
    }

    #[test]
    fn test_functional_constraint_equivalence() {
        let a = FunctionalConstraint {
            keys: vec!["x".to_string(), "y".to_string()],
        };
        let b = FunctionalConstraint {
            keys: vec!["y".to_string(), "x".to_string()],
        };
        assert!(a.equivalent(&b));
    }

    #[test]
    fn test_multi_result_ops() {
        assert!(FunctorOp::Range.is_multi_result());
        assert!(FunctorOp::Frange.is_multi_result());
        assert!(!FunctorOp::Add.is_multi_result());
    }
}
