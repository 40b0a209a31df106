//! # Interpreter Shadow Nodes
//!
//! A decorated, type-tagged shadow of the RAM tree for fast interpretation.
//! Visitor walks with their double dispatch are too slow for an inner loop;
//! instead every node carries a [`NodeType`], an `(opcode, representation,
//! arity)` tuple with a dense dispatch index, so the interpreter selects its
//! specialised evaluator path with integer arithmetic.
//!
//! Nodes are additionally decorated with the data the interpreter would
//! otherwise look up per tuple:
//!
//! - a cached handle to the relation an operation touches,
//! - an integer id naming a pre-built index view,
//! - a [`SuperInstruction`] with prebaked constant bounds, tuple-element
//!   references, and residual expression subtrees,
//! - a shared per-query [`ViewContext`] consulted by worker threads,
//! - a cached user-functor pointer,
//! - a relation id pair for swap/extend.
//!
//! RAM stays an owned tree; the generator numbers its nodes in pre-order and
//! the shadow refers back through opaque [`RamNodeId`]s, never pointers. This
//! is a data model only; the interpreter that walks it lives downstream.

use crate::ast::RelationRepresentation;
use crate::ram::{self, Condition, Expression, Operation, RamDomain, Statement};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Opaque id of a RAM node, assigned in pre-order by the generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RamNodeId(pub u32);

/// Cached handle to a relation, dense per program
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelationHandle(pub usize);

/// Id of a pre-built index view, dense per query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId(pub usize);

/// Arities above this share one dispatch slot
pub const MAX_SPECIALIZED_ARITY: usize = 22;

/// Generic opcode of a shadow node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Opcode {
    NumericConstant,
    StringConstant,
    TupleElement,
    Undef,
    IntrinsicOperator,
    UserDefinedOperator,
    NestedIntrinsicOperator,
    PackRecord,
    True,
    Conjunction,
    Negation,
    EmptinessCheck,
    RelationSize,
    ExistenceCheck,
    Constraint,
    Scan,
    ParallelScan,
    UnpackRecord,
    Aggregate,
    ParallelAggregate,
    Break,
    Filter,
    GuardedInsert,
    Insert,
    Erase,
    Sequence,
    Parallel,
    Loop,
    Exit,
    LogRelationTimer,
    LogTimer,
    LogSize,
    DebugInfo,
    Clear,
    Io,
    Query,
    Extend,
    Swap,
    Call,
}

const OPCODE_COUNT: usize = Opcode::Call as usize + 1;
// none + four representations
const REPR_SLOTS: usize = 5;
const ARITY_SLOTS: usize = MAX_SPECIALIZED_ARITY + 2;

/// The dispatch tag: opcode × relation representation × arity.
///
/// Relation-touching opcodes are specialised on the representation and arity
/// of their relation; everything else leaves both fields empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeType {
    pub opcode: Opcode,
    pub representation: Option<RelationRepresentation>,
    pub arity: Option<usize>,
}

impl NodeType {
    /// An unspecialised tag
    pub fn generic(opcode: Opcode) -> Self {
        NodeType {
            opcode,
            representation: None,
            arity: None,
        }
    }

    /// A tag specialised on a relation's representation and arity.
    ///
    /// The provenance flag upgrades the default representation; it is read
    /// once at generator construction, the configuration being immutable for
    /// the lifetime of a translation run.
    pub fn specialized(opcode: Opcode, decl: &ram::RelationDecl, provenance: bool) -> Self {
        let representation = match decl.representation {
            RelationRepresentation::Btree if provenance => RelationRepresentation::Provenance,
            other => other,
        };
        NodeType {
            opcode,
            representation: Some(representation),
            arity: Some(decl.arity.min(MAX_SPECIALIZED_ARITY)),
        }
    }

    /// Dense index for table-driven dispatch
    pub fn dispatch_index(&self) -> usize {
        let repr_rank = match self.representation {
            None => 0,
            Some(RelationRepresentation::Btree) => 1,
            Some(RelationRepresentation::Eqrel) => 2,
            Some(RelationRepresentation::BtreeDelete) => 3,
            Some(RelationRepresentation::Provenance) => 4,
        };
        let arity_rank = match self.arity {
            None => 0,
            Some(a) => a.min(MAX_SPECIALIZED_ARITY) + 1,
        };
        (self.opcode as usize) * REPR_SLOTS * ARITY_SLOTS + repr_rank * ARITY_SLOTS + arity_rank
    }

    /// Number of dispatch slots a jump table needs
    pub const fn dispatch_table_size() -> usize {
        OPCODE_COUNT * REPR_SLOTS * ARITY_SLOTS
    }
}

/// A prebaked tuple-element reference inside a super-instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleRef {
    pub tuple: usize,
    pub element: usize,
    /// Target column in the key being assembled
    pub target: usize,
}

/// Precomputed per-operation table that bakes constant bounds and
/// tuple-element references into index lookups, so keys are not rebuilt per
/// tuple at runtime.
#[derive(Debug, Clone, Default)]
pub struct SuperInstruction {
    /// Constant values in the lower bound / pattern (`None` = unconstrained)
    pub first: Vec<Option<RamDomain>>,
    /// Constant values in the upper bound
    pub second: Vec<Option<RamDomain>>,
    /// Tuple-element references in the lower bound / pattern
    pub tuple_first: Vec<TupleRef>,
    /// Tuple-element references in the upper bound
    pub tuple_second: Vec<TupleRef>,
    /// Residual expression subtrees in the lower bound / pattern
    pub expr_first: Vec<(usize, Node)>,
    /// Residual expression subtrees in the upper bound
    pub expr_second: Vec<(usize, Node)>,
}

impl SuperInstruction {
    fn with_arity(arity: usize) -> Self {
        SuperInstruction {
            first: vec![None; arity],
            second: vec![None; arity],
            ..SuperInstruction::default()
        }
    }
}

/// Per-query context shared by worker threads for their index views
#[derive(Debug, Clone, Default)]
pub struct ViewContext {
    /// `(relation, view)` pairs to materialise before the query runs
    pub view_relations: Vec<(RelationHandle, ViewId)>,
}

/// Cached dispatch data for a user-defined operator
pub type UserFunctorPointer = fn(&[RamDomain]) -> RamDomain;

/// User-functor decoration; the interpreter fills the pointer at load time
#[derive(Debug, Clone)]
pub struct FunctorInfo {
    pub name: String,
    pub pointer: Option<UserFunctorPointer>,
}

/// Child shape of a shadow node
#[derive(Debug, Clone)]
pub enum Shape {
    Leaf,
    Unary(Box<Node>),
    Binary(Box<Node>, Box<Node>),
    Compound(Vec<Node>),
}

impl Shape {
    pub fn children(&self) -> Vec<&Node> {
        match self {
            Shape::Leaf => Vec::new(),
            Shape::Unary(child) => vec![child],
            Shape::Binary(lhs, rhs) => vec![lhs, rhs],
            Shape::Compound(children) => children.iter().collect(),
        }
    }
}

/// One shadow node: a type tag, the id of its RAM origin, its children, and
/// the orthogonal decorations the specialised evaluators consume.
#[derive(Debug, Clone)]
pub struct Node {
    pub ty: NodeType,
    pub shadow: RamNodeId,
    pub shape: Shape,
    pub relation: Option<RelationHandle>,
    pub view: Option<ViewId>,
    pub super_inst: Option<SuperInstruction>,
    pub view_context: Option<Arc<ViewContext>>,
    pub functor: Option<FunctorInfo>,
    pub bin_rel: Option<(RelationHandle, RelationHandle)>,
    /// Subroutine name for `Call` nodes
    pub name: Option<String>,
}

impl Node {
    fn new(ty: NodeType, shadow: RamNodeId, shape: Shape) -> Self {
        Node {
            ty,
            shadow,
            shape,
            relation: None,
            view: None,
            super_inst: None,
            view_context: None,
            functor: None,
            bin_rel: None,
            name: None,
        }
    }
}

/// A complete shadow program
#[derive(Debug, Clone)]
pub struct ShadowProgram {
    pub main: Vec<Node>,
    pub subroutines: BTreeMap<String, Node>,
    /// Relation name → dense handle, shared with the interpreter's storage
    pub relation_handles: BTreeMap<String, RelationHandle>,
}

/// Builder walking a RAM program into its shadow.
pub struct NodeGenerator<'a> {
    program: &'a ram::Program,
    provenance: bool,
    next_id: u32,
    relation_handles: BTreeMap<String, RelationHandle>,
    /// Collects view requests while inside a query
    query_views: Vec<(RelationHandle, ViewId)>,
    /// The outermost tuple operation of a query runs on worker threads
    parallelize_next: bool,
}

impl<'a> NodeGenerator<'a> {
    pub fn new(program: &'a ram::Program, provenance: bool) -> Self {
        let relation_handles = program
            .relations
            .keys()
            .enumerate()
            .map(|(idx, name)| (name.clone(), RelationHandle(idx)))
            .collect();
        NodeGenerator {
            program,
            provenance,
            next_id: 0,
            relation_handles,
            query_views: Vec::new(),
            parallelize_next: false,
        }
    }

    pub fn generate(mut self) -> ShadowProgram {
        let program = self.program;
        let subroutines = program
            .subroutines
            .iter()
            .map(|(name, body)| (name.clone(), self.statement(body)))
            .collect();
        let main = program
            .statements
            .iter()
            .map(|stmt| self.statement(stmt))
            .collect();
        ShadowProgram {
            main,
            subroutines,
            relation_handles: self.relation_handles,
        }
    }

    fn next_id(&mut self) -> RamNodeId {
        let id = RamNodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn handle(&self, relation: &str) -> Option<RelationHandle> {
        self.relation_handles.get(relation).copied()
    }

    fn relation_type(&self, opcode: Opcode, relation: &str) -> NodeType {
        match self.program.relation(relation) {
            Some(decl) => NodeType::specialized(opcode, decl, self.provenance),
            None => NodeType::generic(opcode),
        }
    }

    fn statement(&mut self, stmt: &Statement) -> Node {
        let id = self.next_id();
        match stmt {
            Statement::Sequence(stmts) => {
                let children = stmts.iter().map(|s| self.statement(s)).collect();
                Node::new(
                    NodeType::generic(Opcode::Sequence),
                    id,
                    Shape::Compound(children),
                )
            }
            Statement::Parallel(stmts) => {
                let children = stmts.iter().map(|s| self.statement(s)).collect();
                Node::new(
                    NodeType::generic(Opcode::Parallel),
                    id,
                    Shape::Compound(children),
                )
            }
            Statement::Loop(inner) => {
                let child = self.statement(inner);
                Node::new(
                    NodeType::generic(Opcode::Loop),
                    id,
                    Shape::Unary(Box::new(child)),
                )
            }
            Statement::Exit(cond) => {
                let child = self.condition(cond);
                Node::new(
                    NodeType::generic(Opcode::Exit),
                    id,
                    Shape::Unary(Box::new(child)),
                )
            }
            Statement::Query(op) => {
                // the query owns the views its operations request
                self.query_views.clear();
                self.parallelize_next = true;
                let child = self.operation(op);
                self.parallelize_next = false;
                let mut node = Node::new(
                    NodeType::generic(Opcode::Query),
                    id,
                    Shape::Unary(Box::new(child)),
                );
                node.view_context = Some(Arc::new(ViewContext {
                    view_relations: std::mem::take(&mut self.query_views),
                }));
                node
            }
            Statement::Swap { lhs, rhs } => {
                let mut node = Node::new(self.relation_type(Opcode::Swap, lhs), id, Shape::Leaf);
                node.bin_rel = self.handle(lhs).zip(self.handle(rhs));
                node
            }
            Statement::Extend { target, source } => {
                let mut node =
                    Node::new(self.relation_type(Opcode::Extend, target), id, Shape::Leaf);
                node.bin_rel = self.handle(target).zip(self.handle(source));
                node
            }
            Statement::Clear(relation) => {
                let mut node =
                    Node::new(self.relation_type(Opcode::Clear, relation), id, Shape::Leaf);
                node.relation = self.handle(relation);
                node
            }
            Statement::Io { relation, .. } => {
                let mut node = Node::new(self.relation_type(Opcode::Io, relation), id, Shape::Leaf);
                node.relation = self.handle(relation);
                node
            }
            Statement::Call(name) => {
                let mut node = Node::new(NodeType::generic(Opcode::Call), id, Shape::Leaf);
                node.name = Some(name.clone());
                node
            }
            Statement::LogRelationTimer { inner, relation, .. } => {
                let child = self.statement(inner);
                let mut node = Node::new(
                    NodeType::generic(Opcode::LogRelationTimer),
                    id,
                    Shape::Unary(Box::new(child)),
                );
                node.relation = self.handle(relation);
                node
            }
            Statement::LogTimer { inner, .. } => {
                let child = self.statement(inner);
                Node::new(
                    NodeType::generic(Opcode::LogTimer),
                    id,
                    Shape::Unary(Box::new(child)),
                )
            }
            Statement::LogSize { relation, .. } => {
                let mut node = Node::new(NodeType::generic(Opcode::LogSize), id, Shape::Leaf);
                node.relation = self.handle(relation);
                node
            }
            Statement::DebugInfo { inner, .. } => {
                let child = self.statement(inner);
                Node::new(
                    NodeType::generic(Opcode::DebugInfo),
                    id,
                    Shape::Unary(Box::new(child)),
                )
            }
        }
    }

    fn operation(&mut self, op: &Operation) -> Node {
        let id = self.next_id();
        match op {
            Operation::Insert { relation, values } => {
                let mut node = Node::new(
                    self.relation_type(Opcode::Insert, relation),
                    id,
                    Shape::Leaf,
                );
                node.relation = self.handle(relation);
                node.super_inst = Some(self.super_instruction(values, None));
                node
            }
            Operation::GuardedInsert {
                relation,
                values,
                guard,
            } => {
                let cond = self.condition(guard);
                let mut node = Node::new(
                    self.relation_type(Opcode::GuardedInsert, relation),
                    id,
                    Shape::Unary(Box::new(cond)),
                );
                node.relation = self.handle(relation);
                node.super_inst = Some(self.super_instruction(values, None));
                node
            }
            Operation::Erase { relation, values } => {
                let mut node = Node::new(
                    self.relation_type(Opcode::Erase, relation),
                    id,
                    Shape::Leaf,
                );
                node.relation = self.handle(relation);
                node.super_inst = Some(self.super_instruction(values, None));
                node
            }
            Operation::Scan {
                relation, inner, ..
            } => {
                let opcode = if std::mem::take(&mut self.parallelize_next) {
                    Opcode::ParallelScan
                } else {
                    Opcode::Scan
                };
                let child = self.operation(inner);
                let mut node = Node::new(
                    self.relation_type(opcode, relation),
                    id,
                    Shape::Unary(Box::new(child)),
                );
                node.relation = self.handle(relation);
                node
            }
            Operation::Break { condition, inner } => {
                let cond = self.condition(condition);
                let nested = self.operation(inner);
                Node::new(
                    NodeType::generic(Opcode::Break),
                    id,
                    Shape::Binary(Box::new(cond), Box::new(nested)),
                )
            }
            Operation::Filter { condition, inner } => {
                let cond = self.condition(condition);
                let nested = self.operation(inner);
                Node::new(
                    NodeType::generic(Opcode::Filter),
                    id,
                    Shape::Binary(Box::new(cond), Box::new(nested)),
                )
            }
            Operation::UnpackRecord { expr, inner, .. } => {
                let expr_node = self.expression(expr);
                let nested = self.operation(inner);
                Node::new(
                    NodeType::generic(Opcode::UnpackRecord),
                    id,
                    Shape::Binary(Box::new(expr_node), Box::new(nested)),
                )
            }
            Operation::Aggregate {
                relation,
                target,
                condition,
                inner,
                ..
            } => {
                let opcode = if std::mem::take(&mut self.parallelize_next) {
                    Opcode::ParallelAggregate
                } else {
                    Opcode::Aggregate
                };
                let mut children = Vec::new();
                if let Some(target) = target {
                    children.push(self.expression(target));
                }
                children.push(self.condition(condition));
                children.push(self.operation(inner));
                let mut node = Node::new(
                    self.relation_type(opcode, relation),
                    id,
                    Shape::Compound(children),
                );
                node.relation = self.handle(relation);
                node.view = Some(self.request_view(relation));
                node
            }
            Operation::NestedIntrinsic { args, inner, .. } => {
                let mut children: Vec<Node> =
                    args.iter().map(|arg| self.expression(arg)).collect();
                children.push(self.operation(inner));
                Node::new(
                    NodeType::generic(Opcode::NestedIntrinsicOperator),
                    id,
                    Shape::Compound(children),
                )
            }
        }
    }

    fn condition(&mut self, cond: &Condition) -> Node {
        let id = self.next_id();
        match cond {
            Condition::True => Node::new(NodeType::generic(Opcode::True), id, Shape::Leaf),
            Condition::Conjunction(lhs, rhs) => {
                let left = self.condition(lhs);
                let right = self.condition(rhs);
                Node::new(
                    NodeType::generic(Opcode::Conjunction),
                    id,
                    Shape::Binary(Box::new(left), Box::new(right)),
                )
            }
            Condition::Negation(inner) => {
                let child = self.condition(inner);
                Node::new(
                    NodeType::generic(Opcode::Negation),
                    id,
                    Shape::Unary(Box::new(child)),
                )
            }
            Condition::EmptinessCheck(relation) => {
                let mut node = Node::new(
                    self.relation_type(Opcode::EmptinessCheck, relation),
                    id,
                    Shape::Leaf,
                );
                node.relation = self.handle(relation);
                node
            }
            Condition::ExistenceCheck { relation, values } => {
                let mut node = Node::new(
                    self.relation_type(Opcode::ExistenceCheck, relation),
                    id,
                    Shape::Leaf,
                );
                node.relation = self.handle(relation);
                node.view = Some(self.request_view(relation));
                node.super_inst = Some(self.super_instruction(values, None));
                node
            }
            Condition::Constraint { lhs, rhs, .. } => {
                let left = self.expression(lhs);
                let right = self.expression(rhs);
                Node::new(
                    NodeType::generic(Opcode::Constraint),
                    id,
                    Shape::Binary(Box::new(left), Box::new(right)),
                )
            }
        }
    }

    fn expression(&mut self, expr: &Expression) -> Node {
        let id = self.next_id();
        match expr {
            Expression::SignedConstant(_)
            | Expression::UnsignedConstant(_)
            | Expression::FloatConstant(_) => {
                Node::new(NodeType::generic(Opcode::NumericConstant), id, Shape::Leaf)
            }
            Expression::SymbolConstant(_) => {
                Node::new(NodeType::generic(Opcode::StringConstant), id, Shape::Leaf)
            }
            Expression::TupleElement { .. } => {
                Node::new(NodeType::generic(Opcode::TupleElement), id, Shape::Leaf)
            }
            Expression::PackRecord(args) => {
                let children = args.iter().map(|arg| self.expression(arg)).collect();
                Node::new(
                    NodeType::generic(Opcode::PackRecord),
                    id,
                    Shape::Compound(children),
                )
            }
            Expression::Intrinsic { args, .. } => {
                let children = args.iter().map(|arg| self.expression(arg)).collect();
                Node::new(
                    NodeType::generic(Opcode::IntrinsicOperator),
                    id,
                    Shape::Compound(children),
                )
            }
            Expression::UserDefined { name, args } => {
                let children = args.iter().map(|arg| self.expression(arg)).collect();
                let mut node = Node::new(
                    NodeType::generic(Opcode::UserDefinedOperator),
                    id,
                    Shape::Compound(children),
                );
                node.functor = Some(FunctorInfo {
                    name: name.clone(),
                    pointer: None,
                });
                node
            }
            Expression::RelationSize(relation) => {
                let mut node = Node::new(
                    self.relation_type(Opcode::RelationSize, relation),
                    id,
                    Shape::Leaf,
                );
                node.relation = self.handle(relation);
                node
            }
            Expression::Undef => Node::new(NodeType::generic(Opcode::Undef), id, Shape::Leaf),
        }
    }

    fn request_view(&mut self, relation: &str) -> ViewId {
        let view = ViewId(self.query_views.len());
        if let Some(handle) = self.handle(relation) {
            self.query_views.push((handle, view));
        }
        view
    }

    /// Bake the value vector of an insert/erase/existence operation into a
    /// super-instruction: constants into the bound arrays, tuple elements
    /// into prebaked references, everything else into residual expressions.
    fn super_instruction(
        &mut self,
        values: &[Expression],
        upper: Option<&[Expression]>,
    ) -> SuperInstruction {
        let mut inst = SuperInstruction::with_arity(values.len());
        for (pos, value) in values.iter().enumerate() {
            self.bake_value(value, pos, &mut inst, false);
        }
        if let Some(upper_values) = upper {
            for (pos, value) in upper_values.iter().enumerate() {
                self.bake_value(value, pos, &mut inst, true);
            }
        } else {
            // a point lookup has equal lower and upper bounds
            inst.second = inst.first.clone();
            inst.tuple_second = inst.tuple_first.clone();
        }
        inst
    }

    fn bake_value(
        &mut self,
        value: &Expression,
        pos: usize,
        inst: &mut SuperInstruction,
        upper: bool,
    ) {
        let constant = match value {
            Expression::SignedConstant(v) => Some(*v),
            Expression::UnsignedConstant(v) => Some(*v as RamDomain),
            Expression::FloatConstant(v) => Some(v.to_bits() as RamDomain),
            Expression::SymbolConstant(idx) => Some(*idx as RamDomain),
            Expression::Undef => None,
            _ => {
                match value {
                    Expression::TupleElement { tuple, element } => {
                        let reference = TupleRef {
                            tuple: *tuple,
                            element: *element,
                            target: pos,
                        };
                        if upper {
                            inst.tuple_second.push(reference);
                        } else {
                            inst.tuple_first.push(reference);
                        }
                    }
                    other => {
                        let node = self.expression(other);
                        if upper {
                            inst.expr_second.push((pos, node));
                        } else {
                            inst.expr_first.push((pos, node));
                        }
                    }
                }
                return;
            }
        };
        if upper {
            inst.second[pos] = constant;
        } else {
            inst.first[pos] = constant;
        }
    }
}
