//! Relation name mangling.
//!
//! The translator materializes several variants of each logical relation:
//! the concrete relation itself, the `@delta_`/`@new_` scratch relations of the
//! semi-naive fixpoint, and the `@reject_`/`@delete_` relations of subsumption.
//! The prefixes are part of the external contract with any tool that reads RAM
//! dumps, so they are centralized here.

const DELTA_PREFIX: &str = "@delta_";
const NEW_PREFIX: &str = "@new_";
const REJECT_PREFIX: &str = "@reject_";
const DELETE_PREFIX: &str = "@delete_";
const INFO_PREFIX: &str = "@info_";

/// Name of the concrete (main) relation.
pub fn concrete_name(name: &str) -> String {
    name.to_string()
}

/// Name of the delta relation holding the previous iteration's new tuples.
pub fn delta_name(name: &str) -> String {
    format!("{DELTA_PREFIX}{name}")
}

/// Name of the new relation accumulating the current iteration's tuples.
pub fn new_name(name: &str) -> String {
    format!("{NEW_PREFIX}{name}")
}

/// Name of the reject relation of a subsumptive relation.
pub fn reject_name(name: &str) -> String {
    format!("{REJECT_PREFIX}{name}")
}

/// Name of the delete relation of a subsumptive relation.
pub fn delete_name(name: &str) -> String {
    format!("{DELETE_PREFIX}{name}")
}

/// Info relations carry metadata only and have evaluation arity 0.
pub fn is_info_name(name: &str) -> bool {
    name.starts_with(INFO_PREFIX)
}

/// Recover the base relation name from a `@delta_`/`@new_` variant.
///
/// This is the only reverse mapping the translator needs: evaluation arity is
/// looked up on the base relation.
pub fn strip_fixpoint_prefix(name: &str) -> &str {
    if let Some(stripped) = name.strip_prefix(DELTA_PREFIX) {
        return stripped;
    }
    if let Some(stripped) = name.strip_prefix(NEW_PREFIX) {
        return stripped;
    }
    name
}
