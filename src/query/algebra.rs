//! Tree rewriting and inspection
//!
//! [`try_map`] is the single traversal every rewrite is built on:
//! simplification, repository expansion, ref pinning and the per-repository
//! commit substitution all go through it.

use crate::query::ast::{Q, Type};
use std::convert::Infallible;

/// Rewrite a tree with `pre` applied top-down and `post` bottom-up.
///
/// `pre` sees each node before its children and returns the node that is
/// descended into, so nodes it introduces are visited too. `post` sees each
/// node after its children have been rewritten. Children are visited in
/// declared order. Pass [`std::convert::identity`] for a no-op hook.
pub fn map<F, G>(q: Q, mut pre: F, mut post: G) -> Q
where
    F: FnMut(Q) -> Q,
    G: FnMut(Q) -> Q,
{
    let result: Result<Q, Infallible> = try_map(q, |q| Ok(pre(q)), |q| Ok(post(q)));
    match result {
        Ok(q) => q,
        Err(never) => match never {},
    }
}

/// Fallible [`map`]. The first error aborts the traversal and nothing of
/// the partially rewritten tree escapes.
pub fn try_map<E, F, G>(q: Q, mut pre: F, mut post: G) -> Result<Q, E>
where
    F: FnMut(Q) -> Result<Q, E>,
    G: FnMut(Q) -> Result<Q, E>,
{
    map_node(q, &mut pre, &mut post)
}

fn map_node<E, F, G>(q: Q, pre: &mut F, post: &mut G) -> Result<Q, E>
where
    F: FnMut(Q) -> Result<Q, E>,
    G: FnMut(Q) -> Result<Q, E>,
{
    let q = pre(q)?;
    let q = match q {
        Q::And(children) => Q::And(map_children(children, pre, post)?),
        Q::Or(children) => Q::Or(map_children(children, pre, post)?),
        Q::Not(child) => Q::Not(Box::new(map_node(*child, pre, post)?)),
        Q::Type(t) => Q::Type(Type {
            kind: t.kind,
            child: Box::new(map_node(*t.child, pre, post)?),
        }),
        atom => atom,
    };
    post(q)
}

fn map_children<E, F, G>(children: Vec<Q>, pre: &mut F, post: &mut G) -> Result<Vec<Q>, E>
where
    F: FnMut(Q) -> Result<Q, E>,
    G: FnMut(Q) -> Result<Q, E>,
{
    let mut mapped = Vec::with_capacity(children.len());
    for child in children {
        mapped.push(map_node(child, pre, post)?);
    }
    Ok(mapped)
}

/// Call `v` for every atom, depth-first and left to right
pub fn visit_atoms<'a>(q: &'a Q, mut v: impl FnMut(&'a Q)) {
    fn walk<'a>(q: &'a Q, v: &mut impl FnMut(&'a Q)) {
        match q {
            Q::And(children) | Q::Or(children) => {
                for child in children {
                    walk(child, v);
                }
            }
            Q::Not(child) => walk(child, v),
            Q::Type(t) => walk(&t.child, v),
            atom => v(atom),
        }
    }
    walk(q, &mut v);
}

/// Evaluate a query to a boolean under three-valued logic.
///
/// `eval` returns `Some(value)` for atoms it is certain about and `None`
/// otherwise; `Const` atoms are always certain. `Some(false)` from a single
/// And child decides the And regardless of its siblings (dually for Or).
/// Returns `None` when the value can't be determined.
pub fn eval_constant(q: &Q, mut eval: impl FnMut(&Q) -> Option<bool>) -> Option<bool> {
    fn eval_node(q: &Q, eval: &mut impl FnMut(&Q) -> Option<bool>) -> Option<bool> {
        match q {
            Q::Const(value) => Some(*value),
            Q::And(children) => {
                let mut certain = true;
                for child in children {
                    match eval_node(child, eval) {
                        Some(false) => return Some(false),
                        Some(true) => {}
                        None => certain = false,
                    }
                }
                certain.then_some(true)
            }
            Q::Or(children) => {
                let mut certain = true;
                for child in children {
                    match eval_node(child, eval) {
                        Some(true) => return Some(true),
                        Some(false) => {}
                        None => certain = false,
                    }
                }
                certain.then_some(false)
            }
            Q::Not(child) => eval_node(child, eval).map(|v| !v),
            Q::Type(t) => eval_node(&t.child, eval),
            atom => eval(atom),
        }
    }
    eval_node(q, &mut eval)
}

/// Replace atoms for which `eval` is certain with the matching `Const`
/// and simplify the result.
pub fn substitute(q: Q, mut eval: impl FnMut(&Q) -> Option<bool>) -> Q {
    let folded = map(q, std::convert::identity, |node| {
        if node.is_atom() {
            if let Some(value) = eval(&node) {
                return Q::Const(value);
            }
        }
        node
    });
    simplify(folded)
}

/// Fold constants and flatten nested And/Or.
///
/// The result contains no `(and (and ..))`, no `(or (or ..))`, no
/// single-child And/Or and no `Const` below the root. Applying it twice
/// yields the same tree.
pub fn simplify(q: Q) -> Q {
    map(q, std::convert::identity, simplify_node)
}

/// Simplify one node whose children are already simplified
fn simplify_node(q: Q) -> Q {
    match q {
        Q::Substring(s) if s.pattern.is_empty() => Q::Const(true),
        Q::RepoSet(rs) if rs.set.is_empty() => Q::Const(false),
        Q::Type(t) => match *t.child {
            Q::Const(value) => Q::Const(value),
            child => Q::Type(Type {
                kind: t.kind,
                child: Box::new(child),
            }),
        },
        Q::Not(child) => match *child {
            Q::Const(value) => Q::Const(!value),
            Q::Not(inner) => *inner,
            child => Q::not(child),
        },
        Q::And(children) => fold_list(children, true),
        Q::Or(children) => fold_list(children, false),
        other => other,
    }
}

/// Shared And/Or folding. `identity` is the neutral constant for the
/// operator (true for And, false for Or); its negation absorbs the list.
fn fold_list(children: Vec<Q>, identity: bool) -> Q {
    let mut kept = Vec::with_capacity(children.len());
    for child in children {
        match child {
            Q::Const(value) if value == identity => {}
            Q::Const(value) => return Q::Const(value),
            Q::And(grand) if identity => kept.extend(grand),
            Q::Or(grand) if !identity => kept.extend(grand),
            other => kept.push(other),
        }
    }
    match kept.len() {
        0 => Q::Const(identity),
        1 => kept.pop().unwrap_or(Q::Const(identity)),
        _ if identity => Q::And(kept),
        _ => Q::Or(kept),
    }
}
