//! # Program Analyses
//!
//! The read-only analyses the translator consumes: the SCC graph of the
//! predicate-dependency relation (Tarjan), its topological order, the set of
//! recursive clauses, the relation-liveness schedule, I/O types, auxiliary
//! arity, the sum-type branch table, the per-relation clause cache, and the
//! scheduler statistics interface.
//!
//! Everything here is computed once up front and then only queried; the
//! translator itself never mutates an analysis.

use crate::ast::{DirectiveKind, Literal, Program, Relation};
use crate::names;
use std::collections::{BTreeMap, HashMap, HashSet};

// I/O types
/// Input/output classification and size limits from directives
#[derive(Debug, Clone, Default)]
pub struct IoTypes {
    inputs: HashSet<String>,
    outputs: HashSet<String>,
    printsize: HashSet<String>,
    limits: HashMap<String, usize>,
}

impl IoTypes {
    pub fn compute(program: &Program) -> Self {
        let mut io = IoTypes::default();
        for directive in &program.directives {
            match directive.kind {
                DirectiveKind::Input => {
                    io.inputs.insert(directive.relation.clone());
                }
                DirectiveKind::Output => {
                    io.outputs.insert(directive.relation.clone());
                }
                DirectiveKind::PrintSize => {
                    io.printsize.insert(directive.relation.clone());
                }
                DirectiveKind::LimitSize => {
                    if let Some(limit) = directive
                        .params
                        .get("n")
                        .and_then(|n| n.parse::<usize>().ok())
                    {
                        io.limits.insert(directive.relation.clone(), limit);
                    }
                }
            }
        }
        io
    }

    pub fn is_input(&self, relation: &str) -> bool {
        self.inputs.contains(relation)
    }

    /// Output or printsize relations are stored at the end of their stratum
    pub fn is_output(&self, relation: &str) -> bool {
        self.outputs.contains(relation) || self.printsize.contains(relation)
    }

    pub fn limit_size(&self, relation: &str) -> Option<usize> {
        self.limits.get(relation).copied()
    }
}

// SCC graph
/// Strongly-connected components of the predicate-dependency graph.
///
/// Components are stored in topological order: every component appears after
/// the components it depends on, so iterating `0..num_sccs()` is a valid
/// evaluation order.
#[derive(Debug, Clone)]
pub struct SccGraph {
    components: Vec<Vec<String>>,
    component_of: HashMap<String, usize>,
    recursive: Vec<bool>,
}

impl SccGraph {
    pub fn compute(program: &Program) -> Self {
        // head depends on every relation its body reads
        let mut dependencies: HashMap<&str, HashSet<&str>> = HashMap::new();
        for rel in &program.relations {
            dependencies.entry(&rel.name).or_default();
        }
        for clause in &program.clauses {
            let deps = dependencies.entry(&clause.head.relation).or_default();
            for lit in &clause.body {
                match lit {
                    Literal::Atom(atom) | Literal::Negation(atom) => {
                        deps.insert(&atom.relation);
                    }
                    Literal::Constraint(_) => {}
                }
            }
        }

        let components = tarjan(&dependencies);
        let mut component_of = HashMap::new();
        for (idx, component) in components.iter().enumerate() {
            for name in component {
                component_of.insert(name.clone(), idx);
            }
        }

        // a component is recursive if it has several relations or a self-loop
        let mut recursive = vec![false; components.len()];
        for (idx, component) in components.iter().enumerate() {
            if component.len() > 1 {
                recursive[idx] = true;
                continue;
            }
            let name = component[0].as_str();
            if dependencies
                .get(name)
                .is_some_and(|deps| deps.contains(name))
            {
                recursive[idx] = true;
            }
        }

        SccGraph {
            components,
            component_of,
            recursive,
        }
    }

    pub fn num_sccs(&self) -> usize {
        self.components.len()
    }

    /// Relations of the component, in declaration order
    pub fn relations(&self, scc: usize) -> &[String] {
        &self.components[scc]
    }

    pub fn is_recursive(&self, scc: usize) -> bool {
        self.recursive[scc]
    }

    pub fn scc_of(&self, relation: &str) -> Option<usize> {
        self.component_of.get(relation).copied()
    }

    /// Whether two relations are mutually recursive
    pub fn same_scc(&self, a: &str, b: &str) -> bool {
        match (self.scc_of(a), self.scc_of(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }
}

/// Iterative Tarjan SCC over the dependency map.
///
/// Emits components in dependency-first order: a component is popped only
/// after every component it points to has been popped.
fn tarjan(dependencies: &HashMap<&str, HashSet<&str>>) -> Vec<Vec<String>> {
    #[derive(Default)]
    struct State<'a> {
        index: HashMap<&'a str, usize>,
        lowlink: HashMap<&'a str, usize>,
        on_stack: HashSet<&'a str>,
        stack: Vec<&'a str>,
        next_index: usize,
        components: Vec<Vec<String>>,
    }

    // deterministic iteration over nodes
    let mut nodes: Vec<&str> = dependencies.keys().copied().collect();
    nodes.sort_unstable();

    let mut state = State::default();
    let empty = HashSet::new();

    let sorted_successors = |node: &str| -> Vec<&str> {
        let mut succs: Vec<&str> = dependencies
            .get(node)
            .unwrap_or(&empty)
            .iter()
            .copied()
            .collect();
        succs.sort_unstable();
        succs
    };

    for root in nodes {
        if state.index.contains_key(root) {
            continue;
        }

        // explicit DFS stack of (node, successors, cursor)
        let mut work: Vec<(&str, Vec<&str>, usize)> = Vec::new();
        state.index.insert(root, state.next_index);
        state.lowlink.insert(root, state.next_index);
        state.next_index += 1;
        state.stack.push(root);
        state.on_stack.insert(root);
        work.push((root, sorted_successors(root), 0));

        loop {
            let (node, next_succ) = match work.last_mut() {
                None => break,
                Some(frame) => {
                    let node = frame.0;
                    if frame.2 < frame.1.len() {
                        let succ = frame.1[frame.2];
                        frame.2 += 1;
                        (node, Some(succ))
                    } else {
                        (node, None)
                    }
                }
            };

            match next_succ {
                Some(succ) => {
                    if !state.index.contains_key(succ) {
                        state.index.insert(succ, state.next_index);
                        state.lowlink.insert(succ, state.next_index);
                        state.next_index += 1;
                        state.stack.push(succ);
                        state.on_stack.insert(succ);
                        work.push((succ, sorted_successors(succ), 0));
                    } else if state.on_stack.contains(succ) {
                        let succ_index = state.index[succ];
                        let low = state.lowlink.get_mut(node).unwrap();
                        *low = (*low).min(succ_index);
                    }
                }
                None => {
                    work.pop();
                    if let Some(frame) = work.last() {
                        let parent = frame.0;
                        let node_low = state.lowlink[node];
                        let low = state.lowlink.get_mut(parent).unwrap();
                        *low = (*low).min(node_low);
                    }
                    if state.lowlink[node] == state.index[node] {
                        let mut component = Vec::new();
                        while let Some(top) = state.stack.pop() {
                            state.on_stack.remove(top);
                            component.push(top.to_string());
                            if top == node {
                                break;
                            }
                        }
                        component.reverse();
                        state.components.push(component);
                    }
                }
            }
        }
    }

    state.components
}

// Recursive clauses
/// The set of clauses participating in recursion.
///
/// A clause is recursive when some body atom's relation shares an SCC with
/// the head relation. Subsumptive clauses always qualify (they read the
/// relation they refine).
#[derive(Debug, Clone, Default)]
pub struct RecursiveClauses {
    recursive: HashSet<usize>,
}

impl RecursiveClauses {
    pub fn compute(program: &Program, scc: &SccGraph) -> Self {
        let mut recursive = HashSet::new();
        for (idx, clause) in program.clauses.iter().enumerate() {
            let is_recursive = clause
                .body_atoms()
                .iter()
                .any(|(_, atom)| scc.same_scc(&clause.head.relation, &atom.relation));
            if is_recursive {
                recursive.insert(idx);
            }
        }
        RecursiveClauses { recursive }
    }

    pub fn is_recursive(&self, clause_index: usize) -> bool {
        self.recursive.contains(&clause_index)
    }
}

// Relation details
/// Per-relation clause cache and declaration lookup
#[derive(Debug, Clone, Default)]
pub struct RelationDetails {
    clause_indices: HashMap<String, Vec<usize>>,
}

impl RelationDetails {
    pub fn compute(program: &Program) -> Self {
        let mut clause_indices: HashMap<String, Vec<usize>> = HashMap::new();
        for rel in &program.relations {
            clause_indices.entry(rel.name.clone()).or_default();
        }
        for (idx, clause) in program.clauses.iter().enumerate() {
            clause_indices
                .entry(clause.head.relation.clone())
                .or_default()
                .push(idx);
        }
        RelationDetails { clause_indices }
    }

    /// Indices into `program.clauses` of the clauses defining a relation
    pub fn clauses_for(&self, relation: &str) -> &[usize] {
        self.clause_indices
            .get(relation)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

// Liveness schedule
/// For each stratum index, the relations whose last use is that stratum.
///
/// Expired relations are cleared (not destroyed) at the end of the stratum;
/// output relations never expire.
#[derive(Debug, Clone, Default)]
pub struct RelationSchedule {
    expired: Vec<Vec<String>>,
}

impl RelationSchedule {
    pub fn compute(program: &Program, scc: &SccGraph, io: &IoTypes) -> Self {
        let mut last_use: HashMap<&str, usize> = HashMap::new();
        for rel in &program.relations {
            if let Some(idx) = scc.scc_of(&rel.name) {
                last_use.insert(&rel.name, idx);
            }
        }
        for clause in &program.clauses {
            let Some(consumer) = scc.scc_of(&clause.head.relation) else {
                continue;
            };
            for lit in &clause.body {
                let atom = match lit {
                    Literal::Atom(atom) | Literal::Negation(atom) => atom,
                    Literal::Constraint(_) => continue,
                };
                let entry = last_use.entry(&atom.relation).or_insert(consumer);
                *entry = (*entry).max(consumer);
            }
        }

        let mut expired = vec![Vec::new(); scc.num_sccs()];
        for (name, last) in last_use {
            if io.is_output(name) {
                continue;
            }
            expired[last].push(name.to_string());
        }
        for names in &mut expired {
            names.sort_unstable();
        }
        RelationSchedule { expired }
    }

    /// Relations to clear after the stratum at the given topological index
    pub fn expired(&self, stratum: usize) -> &[String] {
        self.expired.get(stratum).map(Vec::as_slice).unwrap_or(&[])
    }
}

// Auxiliary arity
/// Trailing bookkeeping columns per relation.
///
/// Provenance evaluation reserves two columns (rule number and proof height);
/// everything else carries none.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuxArity {
    provenance: bool,
}

impl AuxArity {
    pub fn new(provenance: bool) -> Self {
        AuxArity { provenance }
    }

    pub fn arity(&self, _relation: &Relation) -> usize {
        if self.provenance {
            2
        } else {
            0
        }
    }

    /// Evaluation arity of an atom by its RAM name: info relations evaluate
    /// with arity 0, and `@delta_`/`@new_` variants share their base
    /// relation's auxiliary arity.
    pub fn evaluation_arity(&self, atom_name: &str, program: &Program) -> usize {
        if names::is_info_name(atom_name) {
            return 0;
        }
        let base = names::strip_fixpoint_prefix(atom_name);
        program
            .relation(base)
            .map(|rel| rel.arity() + self.arity(rel))
            .unwrap_or(0)
    }
}

// Sum-type branches
/// Facts about one constructor of a sum type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    pub type_name: String,
    /// Position in the lexicographic ordering of the type's branches
    pub branch_id: i64,
    /// Number of branch arguments
    pub arity: usize,
    /// Whether the owning type is an enum (all branches nullary)
    pub is_enum: bool,
}

impl BranchInfo {
    /// Simple branches (arity ≤ 1) erase without a payload record
    pub fn is_simple(&self) -> bool {
        self.arity <= 1
    }
}

/// Constructor name → branch facts, for the eraser
#[derive(Debug, Clone, Default)]
pub struct SumTypeBranches {
    branches: HashMap<String, BranchInfo>,
}

impl SumTypeBranches {
    pub fn compute(program: &Program) -> Self {
        let mut branches = HashMap::new();
        for sum_type in &program.sum_types {
            let mut sorted: Vec<_> = sum_type.branches.iter().collect();
            sorted.sort_by(|a, b| a.name.cmp(&b.name));
            let is_enum = sorted.iter().all(|b| b.fields.is_empty());
            for (id, branch) in sorted.iter().enumerate() {
                branches.insert(
                    branch.name.clone(),
                    BranchInfo {
                        type_name: sum_type.name.clone(),
                        branch_id: id as i64,
                        arity: branch.fields.len(),
                        is_enum,
                    },
                );
            }
        }
        SumTypeBranches { branches }
    }

    pub fn branch(&self, constructor: &str) -> Option<&BranchInfo> {
        self.branches.get(constructor)
    }
}

// Scheduler statistics
/// Size estimates consumed by the Selinger planner.
///
/// Keys are the relation name plus canonical renderings of the bound-column
/// set and constant map, so identical queries hit identical entries across
/// runs. Missing sizes default to zero tuples; missing key counts clamp to
/// one so the planner never divides by zero.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStatistics {
    sizes: HashMap<String, u64>,
    keyed: HashMap<String, u64>,
}

impl SchedulerStatistics {
    pub fn new() -> Self {
        SchedulerStatistics::default()
    }

    /// Record the total tuple count of a relation
    pub fn set_relation_size(&mut self, relation: &str, size: u64) {
        self.sizes.insert(relation.to_string(), size);
    }

    /// Record the distinct-tuple count over a column set under constants
    pub fn set_unique_keys(
        &mut self,
        relation: &str,
        join_columns: &[usize],
        constants: &BTreeMap<usize, String>,
        count: u64,
    ) {
        let key = Self::key(relation, join_columns, constants);
        self.keyed.insert(key, count);
    }

    /// Estimated tuple count of a relation restricted by bound constants
    pub fn relation_size(&self, relation: &str, constants: &BTreeMap<usize, String>) -> u64 {
        if constants.is_empty() {
            return self.sizes.get(relation).copied().unwrap_or(0);
        }
        let key = Self::key(relation, &[], constants);
        self.keyed
            .get(&key)
            .or_else(|| self.sizes.get(relation))
            .copied()
            .unwrap_or(0)
    }

    /// Estimated distinct-tuple count across the join columns; always ≥ 1
    pub fn unique_keys(
        &self,
        relation: &str,
        join_columns: &[usize],
        constants: &BTreeMap<usize, String>,
    ) -> u64 {
        let key = Self::key(relation, join_columns, constants);
        self.keyed.get(&key).copied().unwrap_or(1).max(1)
    }

    fn key(relation: &str, join_columns: &[usize], constants: &BTreeMap<usize, String>) -> String {
        let mut columns: Vec<usize> = join_columns.to_vec();
        columns.extend(constants.keys().copied());
        columns.sort_unstable();
        columns.dedup();
        let cols: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let consts: Vec<String> = constants.iter().map(|(k, v)| format!("{k}->{v}")).collect();
        format!("{relation}|[{}]|[{}]", cols.join(","), consts.join(","))
    }
}

// Bundle
/// Every analysis the translator consults, computed once per run
#[derive(Debug, Clone)]
pub struct Analyses {
    pub io: IoTypes,
    pub scc: SccGraph,
    pub recursive_clauses: RecursiveClauses,
    pub details: RelationDetails,
    pub schedule: RelationSchedule,
    pub aux_arity: AuxArity,
    pub branches: SumTypeBranches,
    pub stats: Option<SchedulerStatistics>,
}

impl Analyses {
    /// Compute all analyses against a (post-erasure) program
    pub fn compute(program: &Program, provenance: bool, stats: Option<SchedulerStatistics>) -> Self {
        let io = IoTypes::compute(program);
        let scc = SccGraph::compute(program);
        let recursive_clauses = RecursiveClauses::compute(program, &scc);
        let details = RelationDetails::compute(program);
        let schedule = RelationSchedule::compute(program, &scc, &io);
        let aux_arity = AuxArity::new(provenance);
        let branches = SumTypeBranches::compute(program);
        Analyses {
            io,
            scc,
            recursive_clauses,
            details,
            schedule,
            aux_arity,
            branches,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{ClauseBuilder, ProgramBuilder};

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
                    .body_atom("path", ["x", "y"])
                    .body_atom("edge", ["y", "z"])
                    .build(),
            )
            .build()
    }

    #[test]
    fn test_scc_topological_order() {
        let program = transitive_closure();
        let scc = SccGraph::compute(&program);
        assert_eq!(scc.num_sccs(), 2);
        let edge_scc = scc.scc_of("edge").unwrap();
        let path_scc = scc.scc_of("path").unwrap();
        assert!(edge_scc < path_scc, "dependencies must come first");
        assert!(!scc.is_recursive(edge_scc));
        assert!(scc.is_recursive(path_scc));
    }

    #[test]
    fn test_mutual_recursion_single_scc() {
        let program = ProgramBuilder::new()
            .relation("even", 1)
            .relation("odd", 1)
            .clause(
                ClauseBuilder::new("even")
                    .head_vars(["x"])
                    .body_atom("odd", ["x"])
                    .build(),
            )
            .clause(
                ClauseBuilder::new("odd")
                    .head_vars(["x"])
                    .body_atom("even", ["x"])
                    .build(),
            )
            .build();
        let scc = SccGraph::compute(&program);
        assert!(scc.same_scc("even", "odd"));
        assert!(scc.is_recursive(scc.scc_of("even").unwrap()));
    }

    #[test]
    fn test_recursive_clauses() {
        let program = transitive_closure();
        let scc = SccGraph::compute(&program);
        let recursive = RecursiveClauses::compute(&program, &scc);
        assert!(!recursive.is_recursive(0), "base case is not recursive");
        assert!(recursive.is_recursive(1), "step case is recursive");
    }

    #[test]
    fn test_schedule_expires_inputs_after_last_use() {
        let program = transitive_closure();
        let scc = SccGraph::compute(&program);
        let io = IoTypes::compute(&program);
        let schedule = RelationSchedule::compute(&program, &scc, &io);
        let path_scc = scc.scc_of("path").unwrap();
        // edge is last read by the path stratum and is not an output
        assert!(schedule.expired(path_scc).contains(&"edge".to_string()));
        // path is an output, it never expires
        assert!(!schedule.expired(path_scc).contains(&"path".to_string()));
    }

    #[test]
    fn test_limitsize_parsing() {
        let program = ProgramBuilder::new()
            .relation("path", 2)
            .limitsize("path", 100)
            .build();
        let io = IoTypes::compute(&program);
        assert_eq!(io.limit_size("path"), Some(100));
    }

    #[test]
    fn test_branch_ids_are_lexicographic() {
        let program = ProgramBuilder::new()
            .sum_type("Color", [("Red", vec![]), ("Green", vec![]), ("Blue", vec![])])
            .build();
        let branches = SumTypeBranches::compute(&program);
        assert_eq!(branches.branch("Blue").unwrap().branch_id, 0);
        assert_eq!(branches.branch("Green").unwrap().branch_id, 1);
        assert_eq!(branches.branch("Red").unwrap().branch_id, 2);
        assert!(branches.branch("Red").unwrap().is_enum);
    }

    #[test]
    fn test_stats_clamp_unique_keys() {
        let stats = SchedulerStatistics::new();
        assert_eq!(stats.unique_keys("edge", &[0], &BTreeMap::new()), 1);
    }

    #[test]
    fn test_stats_keyed_lookup() {
        let mut stats = SchedulerStatistics::new();
        stats.set_relation_size("edge", 100);
        let mut constants = BTreeMap::new();
        constants.insert(0, "number(1)".to_string());
        stats.set_unique_keys("edge", &[1], &constants, 5);
        assert_eq!(stats.relation_size("edge", &BTreeMap::new()), 100);
        assert_eq!(stats.unique_keys("edge", &[1], &constants), 5);
    }

    #[test]
    fn test_aux_arity_provenance() {
        let program = transitive_closure();
        let aux = AuxArity::new(true);
        let rel = program.relation("edge").unwrap();
        assert_eq!(aux.arity(rel), 2);
        assert_eq!(aux.evaluation_arity("@delta_edge", &program), 4);
        assert_eq!(aux.evaluation_arity("@info_edge", &program), 0);
    }
}
