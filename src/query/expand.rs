//! Repository pattern expansion
//!
//! `Repo` atoms are patterns; the execution layer only understands closed
//! `RepoSet`s. [`expand_repo`] resolves every pattern through a caller
//! supplied list function.

use crate::query::algebra::{simplify, try_map};
use crate::query::ast::{Q, RepoSet};
use regex::Regex;
use std::collections::BTreeSet;

/// Resolve all `Repo` atoms into `RepoSet`s.
///
/// The `Repo` and `Not(Repo)` children of an And are resolved together with
/// one `list(includes, excludes)` call and replaced by a single `RepoSet`
/// child. Any other `Repo` atom is resolved on its own: `list([p], [])` for
/// `Repo(p)`, `list([], [p])` for `Not(Repo(p))`. An empty set becomes
/// `FALSE`. The first error from `list` aborts the expansion.
pub fn expand_repo<E, F>(q: Q, mut list: F) -> Result<Q, E>
where
    F: FnMut(&[String], &[String]) -> Result<BTreeSet<String>, E>,
{
    let expanded = try_map(
        q,
        |node| match node {
            Q::And(children) => expand_and(children, &mut list),
            Q::Repo(repo) => list(&[repo.pattern], &[]).map(set_or_false),
            Q::Not(child) => match *child {
                Q::Repo(repo) => list(&[], &[repo.pattern]).map(set_or_false),
                child => Ok(Q::not(child)),
            },
            other => Ok(other),
        },
        Ok,
    )?;
    Ok(simplify(expanded))
}

fn expand_and<E, F>(children: Vec<Q>, list: &mut F) -> Result<Q, E>
where
    F: FnMut(&[String], &[String]) -> Result<BTreeSet<String>, E>,
{
    let mut includes = Vec::new();
    let mut excludes = Vec::new();
    let mut rest = Vec::with_capacity(children.len());

    for child in children {
        match child {
            Q::Repo(repo) => includes.push(repo.pattern),
            Q::Not(inner) => match *inner {
                Q::Repo(repo) => excludes.push(repo.pattern),
                inner => rest.push(Q::not(inner)),
            },
            other => rest.push(other),
        }
    }

    if includes.is_empty() && excludes.is_empty() {
        return Ok(Q::And(rest));
    }

    let set = list(&includes, &excludes)?;
    rest.push(set_or_false(set));
    Ok(Q::And(rest))
}

fn set_or_false(set: BTreeSet<String>) -> Q {
    if set.is_empty() {
        Q::Const(false)
    } else {
        Q::RepoSet(RepoSet { set })
    }
}

/// List function over a fixed repository universe.
///
/// Patterns are regular expressions matched against the full repository
/// name. A repository is listed when it matches every include and no
/// exclude.
#[derive(Debug, Clone, Default)]
pub struct RepoMatcher {
    repos: Vec<String>,
}

impl RepoMatcher {
    pub fn new<I, S>(repos: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            repos: repos.into_iter().map(Into::into).collect(),
        }
    }

    pub fn list(
        &self,
        includes: &[String],
        excludes: &[String],
    ) -> Result<BTreeSet<String>, regex::Error> {
        let includes = compile_all(includes)?;
        let excludes = compile_all(excludes)?;

        Ok(self
            .repos
            .iter()
            .filter(|name| includes.iter().all(|re| re.is_match(name)))
            .filter(|name| !excludes.iter().any(|re| re.is_match(name)))
            .cloned()
            .collect())
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, regex::Error> {
    patterns.iter().map(|p| Regex::new(p)).collect()
}
