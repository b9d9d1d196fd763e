//! Small set helpers for hostname lists.
//!
//! Host lists per app are short (tens of entries), so [`unique_union`] uses a
//! quadratic scan rather than hashing. Do not feed it large inputs.

use std::collections::HashSet;
use std::hash::Hash;

/// All of `a`, followed by the elements of `b` that do not appear in `a`.
///
/// O(|a|·|b|). Duplicates already inside `b` are kept; run [`dedup`] first if
/// that matters.
pub fn unique_union<T: PartialEq + Clone>(a: &[T], b: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.extend_from_slice(a);
    for item in b {
        if !a.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

/// Remove duplicates in place by swapping each repeat with the last element
/// and shrinking. The resulting order is unspecified.
pub fn dedup<T: PartialEq>(items: &mut Vec<T>) {
    let mut i = 0;
    while i < items.len() {
        let mut j = i + 1;
        while j < items.len() {
            if items[i] == items[j] {
                items.swap_remove(j);
            } else {
                j += 1;
            }
        }
        i += 1;
    }
}

/// Membership set for O(1) containment checks.
pub fn to_set<T, I>(items: I) -> HashSet<T>
where
    T: Eq + Hash,
    I: IntoIterator<Item = T>,
{
    items.into_iter().collect()
}

/// Union of two membership sets, reusing `a`'s allocation.
pub fn combine<T: Eq + Hash>(mut a: HashSet<T>, b: HashSet<T>) -> HashSet<T> {
    a.extend(b);
    a
}
