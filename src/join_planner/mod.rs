//! # Join Planner
//!
//! Selinger-style dynamic programming over body-atom subsets, costed with the
//! scheduler statistics. For every subset `S` and every atom `a ∈ S`, the best
//! plan for `S` is the cheapest extension of the best plan for `S \ {a}`:
//!
//! - an atom whose columns are all bound (by constants, wildcards, or
//!   variables grounded by the subset) contributes a single tuple,
//! - otherwise it contributes `relSize / max(1, uniqueKeys)` tuples across its
//!   join columns, and adds `newTuples × arity` to the running cost.
//!
//! Ties keep the first plan found, and subsets are enumerated in lexicographic
//! order, so planning is deterministic. The planner is only consulted when
//! auto-scheduling is enabled and statistics are populated.

use crate::analysis::SchedulerStatistics;
use crate::ast::{Argument, BinaryConstraint, NumericType};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// One body atom as the planner sees it
#[derive(Debug, Clone)]
pub struct PlannerAtom<'a> {
    /// Position of the atom in the clause body
    pub body_index: usize,
    /// RAM-level relation name, delta variants already applied
    pub relation_name: String,
    pub args: &'a [Argument],
}

/// Memoised plan for one atom subset
#[derive(Debug, Clone)]
struct PlanTuplesCost {
    plan: Vec<usize>,
    tuples: f64,
    cost: f64,
}

/// Compute the cheapest join order over the given atoms.
///
/// Returns positions into `atoms` (not body indices). With fewer than two
/// atoms the input order is returned unchanged.
pub fn selinger_order(
    atoms: &[PlannerAtom],
    constraints: &[&BinaryConstraint],
    stats: &SchedulerStatistics,
) -> Vec<usize> {
    let n = atoms.len();
    if n <= 1 {
        return (0..n).collect();
    }

    let bindings = Bindings::collect(constraints);

    // variables grounded by each atom
    let grounded: Vec<BTreeSet<String>> = atoms
        .iter()
        .map(|atom| {
            let mut vars = BTreeSet::new();
            for arg in atom.args {
                collect_variables(arg, &mut vars);
            }
            vars
        })
        .collect();

    // per-atom map of column index to bound constant
    let constants: Vec<BTreeMap<usize, String>> = atoms
        .iter()
        .map(|atom| {
            let mut map = BTreeMap::new();
            for (i, arg) in atom.args.iter().enumerate() {
                let arg = match arg {
                    Argument::Variable(name) => {
                        bindings.var_to_constant.get(name.as_str()).copied().unwrap_or(arg)
                    }
                    other => other,
                };
                if let Some(key) = constant_key(arg) {
                    map.insert(i, key);
                }
            }
            map
        })
        .collect();

    // singleton seeds
    let mut cache: Vec<HashMap<BTreeSet<usize>, PlanTuplesCost>> = vec![HashMap::new(); n + 1];
    for (idx, atom) in atoms.iter().enumerate() {
        let tuples = stats.relation_size(&atom.relation_name, &constants[idx]) as f64;
        let cost = tuples * atom.args.len() as f64;
        let mut set = BTreeSet::new();
        set.insert(idx);
        cache[1].insert(
            set,
            PlanTuplesCost {
                plan: vec![idx],
                tuples,
                cost,
            },
        );
    }

    for k in 2..=n {
        for subset in subsets(n, k) {
            for (i, &atom_idx) in subset.iter().enumerate() {
                let mut smaller: BTreeSet<usize> = subset.iter().copied().collect();
                smaller.remove(&subset[i]);

                let Some(prev) = cache[k - 1].get(&smaller) else {
                    continue;
                };
                let (old_plan, old_tuples, old_cost) =
                    (prev.plan.clone(), prev.tuples, prev.cost);

                // variables grounded by the smaller subset
                let mut subset_vars: BTreeSet<&str> = BTreeSet::new();
                for &idx in &smaller {
                    subset_vars.extend(grounded[idx].iter().map(String::as_str));
                }

                let atom = &atoms[atom_idx];
                let arity = atom.args.len();
                let mut join_columns = Vec::new();
                let mut num_bound = 0usize;

                for (col, arg) in atom.args.iter().enumerate() {
                    if constants[atom_idx].contains_key(&col) {
                        num_bound += 1;
                        continue;
                    }
                    if matches!(arg, Argument::UnnamedVariable) {
                        num_bound += 1;
                        continue;
                    }
                    if let Argument::Variable(name) = arg {
                        // a variable bound through its dependencies counts too
                        if let Some(deps) = bindings.var_to_other_vars.get(name.as_str()) {
                            if deps.iter().all(|dep| subset_vars.contains(dep.as_str())) {
                                join_columns.push(col);
                                num_bound += 1;
                                continue;
                            }
                        }
                        if subset_vars.contains(name.as_str()) {
                            join_columns.push(col);
                            num_bound += 1;
                        }
                    }
                }

                let expected_tuples = if num_bound == arity {
                    1.0
                } else {
                    let size =
                        stats.relation_size(&atom.relation_name, &constants[atom_idx]) as f64;
                    if join_columns.is_empty() {
                        size
                    } else {
                        let unique = stats.unique_keys(
                            &atom.relation_name,
                            &join_columns,
                            &constants[atom_idx],
                        ) as f64;
                        size / unique.max(1.0)
                    }
                };

                let new_tuples = old_tuples * expected_tuples;
                let new_cost = old_cost + new_tuples * arity as f64;

                let full: BTreeSet<usize> = subset.iter().copied().collect();
                let replace = match cache[k].get(&full) {
                    None => true,
                    // first plan found wins on ties
                    Some(existing) => new_cost < existing.cost,
                };
                if replace {
                    let mut plan = old_plan;
                    plan.push(atom_idx);
                    cache[k].insert(
                        full,
                        PlanTuplesCost {
                            plan,
                            tuples: new_tuples,
                            cost: new_cost,
                        },
                    );
                }
            }
        }
    }

    let full: BTreeSet<usize> = (0..n).collect();
    let best = cache[n]
        .get(&full)
        .expect("every full subset has at least one plan");
    debug!(plan = ?best.plan, cost = best.cost, "join order selected");
    best.plan.clone()
}

/// Variable binding facts extracted from the clause's binary constraints
#[derive(Debug, Default)]
struct Bindings<'a> {
    /// `x = 2` makes every use of `x` a bound constant
    var_to_constant: HashMap<&'a str, &'a Argument>,
    /// `x = f(y, z)` grounds `x` once `{y, z}` are ground; a bounded
    /// inequality `l ≤ x ≤ u` with `vars(l) ⊆ vars(u)` behaves the same
    var_to_other_vars: HashMap<&'a str, BTreeSet<String>>,
}

impl<'a> Bindings<'a> {
    fn collect(constraints: &[&'a BinaryConstraint]) -> Self {
        let mut bindings = Bindings::default();
        let mut bounds: HashMap<&str, (BTreeSet<String>, BTreeSet<String>)> = HashMap::new();

        for constraint in constraints {
            if constraint.op.is_inequality() {
                if let Argument::Variable(name) = &constraint.lhs {
                    let mut others = BTreeSet::new();
                    collect_variables(&constraint.rhs, &mut others);
                    let entry = bounds.entry(name.as_str()).or_default();
                    if constraint.op.is_upper_bound() {
                        entry.1 = others;
                    } else {
                        entry.0 = others;
                    }
                }
                if let Argument::Variable(name) = &constraint.rhs {
                    let mut others = BTreeSet::new();
                    collect_variables(&constraint.lhs, &mut others);
                    let entry = bounds.entry(name.as_str()).or_default();
                    // `l < x` bounds x from below
                    if constraint.op.is_upper_bound() {
                        entry.0 = others;
                    } else {
                        entry.1 = others;
                    }
                }
                continue;
            }

            if !constraint.op.is_equality() {
                continue;
            }

            match (&constraint.lhs, &constraint.rhs) {
                (Argument::Variable(name), rhs) if rhs.is_constant() => {
                    bindings.var_to_constant.insert(name.as_str(), rhs);
                }
                (lhs, Argument::Variable(name)) if lhs.is_constant() => {
                    bindings.var_to_constant.insert(name.as_str(), lhs);
                }
                (Argument::Variable(name), rhs) => {
                    let mut others = BTreeSet::new();
                    collect_variables(rhs, &mut others);
                    bindings.var_to_other_vars.insert(name.as_str(), others);
                }
                (lhs, Argument::Variable(name)) => {
                    let mut others = BTreeSet::new();
                    collect_variables(lhs, &mut others);
                    bindings.var_to_other_vars.insert(name.as_str(), others);
                }
                _ => {}
            }
        }

        // a bounded inequality with lower ⊆ upper grounds like an equality
        for (name, (lower, upper)) in bounds {
            if !lower.is_empty() && !upper.is_empty() && lower.is_subset(&upper) {
                bindings.var_to_other_vars.insert(name, upper);
            }
        }

        bindings
    }
}

/// Collect every variable name inside an argument
fn collect_variables(arg: &Argument, out: &mut BTreeSet<String>) {
    match arg {
        Argument::Variable(name) => {
            out.insert(name.clone());
        }
        Argument::Record(args) => {
            for sub in args {
                collect_variables(sub, out);
            }
        }
        Argument::Branch(branch) => {
            for sub in &branch.args {
                collect_variables(sub, out);
            }
        }
        Argument::Intrinsic(func) => {
            for sub in &func.args {
                collect_variables(sub, out);
            }
        }
        Argument::UserFunctor(func) => {
            for sub in &func.args {
                collect_variables(sub, out);
            }
        }
        Argument::Aggregator(agg) => {
            if let Some(target) = &agg.target {
                collect_variables(target, out);
            }
        }
        Argument::UnnamedVariable
        | Argument::NumericConstant(_)
        | Argument::StringConstant(_)
        | Argument::NilConstant => {}
    }
}

/// Canonical rendering of a constant for the statistics key
fn constant_key(arg: &Argument) -> Option<String> {
    match arg {
        Argument::NumericConstant(constant) => match constant.final_type {
            Some(NumericType::Float) => Some(format!("float({})", constant.text)),
            Some(NumericType::Unsigned) => Some(format!("unsigned({})", constant.text)),
            _ => Some(format!("number({})", constant.text)),
        },
        Argument::StringConstant(text) => Some(format!("symbol({text})")),
        Argument::NilConstant => Some("number(0)".to_string()),
        _ => None,
    }
}

/// All `k`-element subsets of `0..n` in lexicographic order
fn subsets(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    let mut current: Vec<usize> = (0..k).collect();
    loop {
        out.push(current.clone());
        // advance to the next combination
        let mut i = k;
        loop {
            if i == 0 {
                return out;
            }
            i -= 1;
            if current[i] != i + n - k {
                break;
            }
            if i == 0 {
                return out;
            }
        }
        current[i] += 1;
        for j in i + 1..k {
            current[j] = current[j - 1] + 1;
        }
    }
}
