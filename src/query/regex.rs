//! Regex to substring lowering
//!
//! A bare search term with regex metacharacters is parsed into a regex
//! syntax tree. When that tree denotes nothing more than literal
//! concatenation and alternation, it is replaced by the equivalent
//! `Substring`/`And`/`Or` query, which every backend evaluates faster.

use crate::query::algebra::simplify;
use crate::query::ast::Q;
use regex_syntax::hir::{Hir, HirKind};

/// Lower a regex into a substring query.
///
/// Returns `Some` only when the lowered query matches exactly the same
/// documents as the regex.
pub fn lower(pattern: &str) -> Result<Option<Q>, regex_syntax::Error> {
    let hir = regex_syntax::Parser::new().parse(pattern)?;
    let (q, equivalent) = lower_hir(&hir);
    Ok(equivalent.then(|| simplify(q)))
}

/// Lower one node. The flag says whether the query is equivalent to the
/// node; when it is not, the query is still a necessary condition.
fn lower_hir(hir: &Hir) -> (Q, bool) {
    match hir.kind() {
        HirKind::Empty => (Q::Const(true), true),
        HirKind::Literal(lit) => match std::str::from_utf8(&lit.0) {
            Ok(text) => (Q::substring(text), true),
            Err(_) => (Q::Const(true), false),
        },
        HirKind::Capture(cap) => lower_hir(&cap.sub),
        // zero repetitions match anywhere
        HirKind::Repetition(rep) if rep.min == 0 => (Q::Const(true), true),
        HirKind::Repetition(rep) => (lower_hir(&rep.sub).0, false),
        HirKind::Concat(subs) => {
            let mut equivalent = true;
            let mut parts = Vec::with_capacity(subs.len());
            for sub in subs {
                let (q, eq) = lower_hir(sub);
                let q = simplify(q);
                equivalent &= eq;
                if q != Q::Const(true) {
                    parts.push(q);
                }
            }
            // adjacency is lost once two parts become separate atoms
            if parts.len() > 1 {
                equivalent = false;
            }
            (Q::and(parts), equivalent)
        }
        HirKind::Alternation(subs) => {
            let mut equivalent = true;
            let mut parts = Vec::with_capacity(subs.len());
            for sub in subs {
                let (q, eq) = lower_hir(sub);
                equivalent &= eq;
                parts.push(q);
            }
            (simplify(Q::or(parts)), equivalent)
        }
        HirKind::Class(_) | HirKind::Look(_) => (Q::Const(true), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lowered(pattern: &str) -> Option<String> {
        lower(pattern).unwrap().map(|q| q.to_string())
    }

    #[test]
    fn test_literal() {
        assert_eq!(lowered("foo").as_deref(), Some(r#"substr:"foo""#));
        assert_eq!(lowered(r"foo\.bar").as_deref(), Some(r#"substr:"foo.bar""#));
    }

    #[test]
    fn test_optional_prefix_drops_out() {
        assert_eq!(lowered("(foo|)bar").as_deref(), Some(r#"substr:"bar""#));
        assert_eq!(lowered("(foo)?bar").as_deref(), Some(r#"substr:"bar""#));
    }

    #[test]
    fn test_alternation() {
        assert_eq!(
            lowered("foo|bar").as_deref(),
            Some(r#"(or substr:"foo" substr:"bar")"#)
        );
    }

    #[test]
    fn test_not_equivalent() {
        assert_eq!(lowered("foo.*bar"), None);
        assert_eq!(lowered("[a-z]+"), None);
        assert_eq!(lowered("^foo"), None);
        assert_eq!(lowered("a+"), None);
    }

    #[test]
    fn test_star_matches_everything() {
        assert_eq!(lowered("x*").as_deref(), Some("TRUE"));
    }

    #[test]
    fn test_invalid_regex() {
        assert!(lower("foo(").is_err());
    }
}
