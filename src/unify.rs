//! Pattern unification over content.
//!
//! Patterns are ordinary [`Content`] values in which a text node of the form
//! `?name` is a variable. Unification is single-pass and deterministic: a
//! variable binds to the first value it meets, and every later occurrence
//! must match that binding exactly. There is no backtracking and variables
//! appear only on the pattern side.

use std::collections::BTreeMap;

use crate::content::Content;

/// Variable bindings accumulated during unification.
pub type Bindings = BTreeMap<String, Content>;

/// Attempts to unify `pattern` against `value`, extending `bindings`.
///
/// Returns true on success; on failure `bindings` may hold partial entries
/// and the caller should discard it. Rules:
///
/// - a variable matches any value, consistently across repeats;
/// - text matches equal text;
/// - lists match element-wise and must have equal length;
/// - a map pattern requires each of its keys to be present and match in the
///   value map; extra keys in the value are allowed (subset semantics).
pub fn unify(pattern: &Content, value: &Content, bindings: &mut Bindings) -> bool {
    if let Some(name) = pattern.as_variable() {
        return match bindings.get(name) {
            Some(bound) => bound == value,
            None => {
                bindings.insert(name.to_string(), value.clone());
                true
            }
        };
    }

    match (pattern, value) {
        (Content::Text(p), Content::Text(v)) => p == v,
        (Content::List(ps), Content::List(vs)) => {
            ps.len() == vs.len() && ps.iter().zip(vs).all(|(p, v)| unify(p, v, bindings))
        }
        (Content::Map(pm), Content::Map(vm)) => pm
            .iter()
            .all(|(key, p)| vm.get(key).is_some_and(|v| unify(p, v, bindings))),
        _ => false,
    }
}

/// Instantiates a template by replacing bound variables with their values.
///
/// Unbound variables are left verbatim so a partially instantiated template
/// is visible as such rather than silently malformed.
#[must_use]
pub fn substitute(template: &Content, bindings: &Bindings) -> Content {
    if let Some(name) = template.as_variable() {
        return bindings
            .get(name)
            .cloned()
            .unwrap_or_else(|| template.clone());
    }

    match template {
        Content::Text(_) => template.clone(),
        Content::List(items) => {
            Content::List(items.iter().map(|t| substitute(t, bindings)).collect())
        }
        Content::Map(map) => Content::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, bindings)))
                .collect(),
        ),
    }
}
