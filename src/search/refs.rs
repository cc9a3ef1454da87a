//! Ref expansion and per-repository commit pinning
//!
//! Both entry points decide "does this (repository, ref) pair survive the
//! query" with the same evaluator, [`pin_atom`], so a pair dropped by
//! [`expand_repo_refs`] always pins to `FALSE` in
//! [`expand_for_repo_at_commit`] and vice versa.

use crate::query::{Q, eval_constant, simplify, substitute};
use crate::search::{Repository, SearchError};

/// Value of `atom` for one repository at one ref.
///
/// `RepoSet` and `Ref` atoms are certain; every other atom is unknown.
pub fn pin_atom(atom: &Q, repo: &str, ref_pattern: &str) -> Option<bool> {
    match atom {
        Q::RepoSet(set) => Some(set.contains(repo)),
        Q::Ref(r) => Some(r.pattern == ref_pattern),
        _ => None,
    }
}

/// Expand `repos` into the (repository, ref) pairs the query may touch.
///
/// Without `Ref` atoms every repository is searched at the ref it was
/// requested with. Otherwise each repository is paired with its requested
/// ref and with every ref named in the query, keeping a pair unless the
/// query provably excludes it.
pub fn expand_repo_refs(q: &Q, repos: &[Repository]) -> Vec<Repository> {
    let refs = query_refs(q);
    if refs.is_empty() {
        return repos.to_vec();
    }

    let mut expanded = Vec::new();
    for repo in repos {
        let mut candidates = vec![repo.ref_pattern.as_str()];
        candidates.extend(refs.iter().map(String::as_str).filter(|r| *r != repo.ref_pattern));

        for ref_pattern in candidates {
            let verdict = eval_constant(q, |atom| pin_atom(atom, &repo.name, ref_pattern));
            if verdict != Some(false) {
                expanded.push(Repository::at_ref(repo.name.clone(), ref_pattern));
            }
        }
    }
    expanded
}

/// Ref patterns named by the query, in first-seen order
fn query_refs(q: &Q) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    crate::query::visit_atoms(q, |atom| {
        if let Q::Ref(r) = atom {
            if !refs.contains(&r.pattern) {
                refs.push(r.pattern.clone());
            }
        }
    });
    refs
}

/// Rewrite `q` for a single repository pinned at its resolved commit.
///
/// `RepoSet` and `Ref` atoms become constants for this repository, and a
/// `Ref(commit)` term is conjoined so the backend reads exactly that commit.
/// A surviving `Repo` atom means expansion was skipped upstream and is an
/// error.
pub fn expand_for_repo_at_commit(q: &Q, repo: &Repository) -> Result<Q, SearchError> {
    let Some(commit) = repo.commit.as_deref() else {
        return Err(SearchError::internal(format!(
            "repository {} has no resolved commit",
            repo.name
        )));
    };

    if q.any_atom(|atom| matches!(atom, Q::Repo(_))) {
        return Err(SearchError::InvalidQuery {
            message: format!("unexpanded repository pattern in query for {}", repo.name),
        });
    }

    let pinned = substitute(q.clone(), |atom| pin_atom(atom, &repo.name, &repo.ref_pattern));
    Ok(simplify(Q::and(vec![pinned, Q::branch(commit)])))
}

/// Resolve `Ref` atoms against a single ref, leaving everything else.
/// The index only holds the default branch, so it searches with `""`.
pub fn restrict_to_ref(q: Q, ref_pattern: &str) -> Q {
    substitute(q, |atom| match atom {
        Q::Ref(r) => Some(r.pattern == ref_pattern),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse;

    fn pairs(repos: &[Repository]) -> Vec<String> {
        repos.iter().map(|r| r.to_string()).collect()
    }

    fn scoped(repos: &[&str], query: &str) -> Q {
        Q::and(vec![Q::repo_set(repos.iter().copied()), parse(query).unwrap()])
    }

    #[test]
    fn test_no_refs_keeps_requested() {
        let repos = vec![Repository::new("a"), Repository::at_ref("b", "dev")];
        let out = expand_repo_refs(&parse("foo").unwrap(), &repos);
        assert_eq!(out, repos);
    }

    #[test]
    fn test_or_does_not_scope_ref() {
        let q = scoped(&["a"], "(foo ref:x) or bar");
        let out = expand_repo_refs(&q, &[Repository::new("a")]);
        assert_eq!(pairs(&out), vec!["a", "a@x"]);
    }

    #[test]
    fn test_ref_restricts() {
        let q = scoped(&["a", "b"], "foo ref:x");
        let out = expand_repo_refs(&q, &[Repository::new("a"), Repository::new("b")]);
        assert_eq!(pairs(&out), vec!["a@x", "b@x"]);
    }

    #[test]
    fn test_repo_outside_set_dropped() {
        let q = scoped(&["a"], "foo ref:x");
        let out = expand_repo_refs(&q, &[Repository::new("a"), Repository::new("c")]);
        assert_eq!(pairs(&out), vec!["a@x"]);
    }

    #[test]
    fn test_negated_ref() {
        let q = parse("foo -ref:x").unwrap();
        let out = expand_repo_refs(&q, &[Repository::new("a")]);
        assert_eq!(pairs(&out), vec!["a"]);
    }

    #[test]
    fn test_pin_at_commit() {
        let q = scoped(&["a"], "(foo ref:x) or bar");
        let mut repo = Repository::new("a");
        repo.commit = Some("c0ffee".to_string());
        let out = expand_for_repo_at_commit(&q, &repo).unwrap();
        assert_eq!(out.to_string(), r#"(and substr:"bar" branch:"c0ffee")"#);

        let mut repo = Repository::at_ref("a", "x");
        repo.commit = Some("c0ffee".to_string());
        let out = expand_for_repo_at_commit(&q, &repo).unwrap();
        assert_eq!(
            out.to_string(),
            r#"(and (or substr:"foo" substr:"bar") branch:"c0ffee")"#
        );
    }

    #[test]
    fn test_pin_excluded_repo_is_false() {
        let q = scoped(&["a"], "foo");
        let mut repo = Repository::new("other");
        repo.commit = Some("c0ffee".to_string());
        assert_eq!(expand_for_repo_at_commit(&q, &repo).unwrap(), Q::Const(false));
    }

    #[test]
    fn test_pin_rejects_repo_atom() {
        let q = parse("r:foo bar").unwrap();
        let mut repo = Repository::new("foo");
        repo.commit = Some("c0ffee".to_string());
        assert!(matches!(
            expand_for_repo_at_commit(&q, &repo),
            Err(SearchError::InvalidQuery { .. })
        ));
    }

    #[test]
    fn test_pin_requires_commit() {
        let q = parse("foo").unwrap();
        assert!(expand_for_repo_at_commit(&q, &Repository::new("a")).is_err());
    }

    #[test]
    fn test_restrict_to_default_ref() {
        let q = scoped(&["a"], "(foo ref:x) or bar");
        let out = restrict_to_ref(q, "");
        assert_eq!(out.to_string(), r#"(and (reposet a) substr:"bar")"#);
    }

    #[test]
    fn test_expansion_and_pinning_agree() {
        let queries = [
            "(foo ref:x) or bar",
            "foo ref:x",
            "foo -ref:x",
            "(ref:x or ref:y) baz",
            "(ref:x qux) or (ref:y -quux)",
        ];
        let requested = [Repository::new("a"), Repository::new("b"), Repository::new("c")];

        for text in queries {
            let q = Q::and(vec![Q::repo_set(["a", "b"]), parse(text).unwrap()]);
            let kept = expand_repo_refs(&q, &requested);

            for repo in &requested {
                for ref_pattern in ["", "x", "y"] {
                    let mut pinned = Repository::at_ref(repo.name.clone(), ref_pattern);
                    pinned.commit = Some("c0ffee".to_string());
                    let pinned_false =
                        expand_for_repo_at_commit(&q, &pinned).unwrap() == Q::Const(false);
                    let is_kept = kept
                        .iter()
                        .any(|r| r.name == repo.name && r.ref_pattern == ref_pattern);
                    if is_kept {
                        assert!(!pinned_false, "{text}: {} kept but pins to FALSE", pinned);
                    } else if query_refs(&q).iter().any(|r| r == ref_pattern) || ref_pattern.is_empty() {
                        assert!(pinned_false, "{text}: {} dropped but survives pinning", pinned);
                    }
                }
            }
        }
    }
}
