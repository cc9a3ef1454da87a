//! Index engine query algebra and client interface
//!
//! The index engine has its own, smaller query language: no repository
//! patterns, only closed repository sets. [`to_native`] translates an
//! expanded [`Q`] into it.

use crate::query::{Q, TypeKind};
use crate::search::{LineMatch, Options, SearchError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Query understood by the index engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NativeQuery {
    Substring {
        pattern: String,
        case_sensitive: bool,
        file_name: bool,
        content: bool,
    },
    Regexp {
        pattern: String,
        case_sensitive: bool,
        file_name: bool,
        content: bool,
    },
    Symbol {
        expr: Box<NativeQuery>,
    },
    RepoSet {
        repos: BTreeSet<String>,
    },
    Branch {
        pattern: String,
    },
    Language {
        name: String,
    },
    Type {
        kind: TypeKind,
        child: Box<NativeQuery>,
    },
    And {
        children: Vec<NativeQuery>,
    },
    Or {
        children: Vec<NativeQuery>,
    },
    Not {
        child: Box<NativeQuery>,
    },
    Const {
        value: bool,
    },
}

impl NativeQuery {
    /// Matches every document; used to list all repositories
    pub fn all() -> Self {
        NativeQuery::Const { value: true }
    }
}

/// Translate an expanded query. `Repo` atoms must have been resolved into
/// `RepoSet`s first.
pub fn to_native(q: &Q) -> Result<NativeQuery, SearchError> {
    let native = match q {
        Q::Substring(s) => NativeQuery::Substring {
            pattern: s.pattern.clone(),
            case_sensitive: s.case_sensitive,
            file_name: s.file_name,
            content: s.content,
        },
        Q::Regexp(re) => NativeQuery::Regexp {
            pattern: re.pattern().to_string(),
            case_sensitive: re.case_sensitive,
            file_name: re.file_name,
            content: re.content,
        },
        Q::Symbol(s) => NativeQuery::Symbol {
            expr: Box::new(to_native(&Q::Substring(s.clone()))?),
        },
        Q::Repo(repo) => {
            return Err(SearchError::InvalidQuery {
                message: format!("repository pattern {:?} reached the index unexpanded", repo.pattern),
            });
        }
        Q::RepoSet(set) => NativeQuery::RepoSet {
            repos: set.set.clone(),
        },
        Q::Ref(r) => NativeQuery::Branch {
            pattern: r.pattern.clone(),
        },
        Q::Language(l) => NativeQuery::Language {
            name: l.name.clone(),
        },
        Q::Type(t) => NativeQuery::Type {
            kind: t.kind,
            child: Box::new(to_native(&t.child)?),
        },
        Q::And(children) => NativeQuery::And {
            children: children.iter().map(to_native).collect::<Result<_, _>>()?,
        },
        Q::Or(children) => NativeQuery::Or {
            children: children.iter().map(to_native).collect::<Result<_, _>>()?,
        },
        Q::Not(child) => NativeQuery::Not {
            child: Box::new(to_native(child)?),
        },
        Q::Const(value) => NativeQuery::Const { value: *value },
    };
    Ok(native)
}

/// Index engine search options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeOptions {
    pub total_max_match_count: usize,
    pub max_wall_time: Option<Duration>,
    pub max_doc_display_count: usize,
}

impl From<&Options> for NativeOptions {
    fn from(opts: &Options) -> Self {
        Self {
            total_max_match_count: opts.total_max_match_count,
            max_wall_time: opts.max_wall_time,
            max_doc_display_count: opts.max_doc_display_count,
        }
    }
}

impl fmt::Display for NativeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.total_max_match_count > 0 {
            parts.push(format!("TotalMaxMatchCount={}", self.total_max_match_count));
        }
        if let Some(wall) = self.max_wall_time {
            parts.push(format!("MaxWallTime={:?}", wall));
        }
        if self.max_doc_display_count > 0 {
            parts.push(format!("MaxDocDisplayCount={}", self.max_doc_display_count));
        }
        write!(f, "{}", parts.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeFileMatch {
    pub repository: String,
    /// Branches the file was found on
    pub branches: Vec<String>,
    /// Commit of the indexed branch
    pub version: String,
    pub path: String,
    pub line_matches: Vec<LineMatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeResult {
    pub files: Vec<NativeFileMatch>,
    pub match_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeBranch {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeRepo {
    pub name: String,
    pub branches: Vec<NativeBranch>,
}

impl NativeRepo {
    /// Indexed commit of the default branch
    pub fn head_version(&self) -> Option<&str> {
        self.branches
            .iter()
            .find(|b| b.name == "HEAD")
            .map(|b| b.version.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeRepoList {
    pub repos: Vec<NativeRepo>,
}

/// Client of an index engine
#[async_trait]
pub trait IndexEngine: Send + Sync {
    async fn search(
        &self,
        q: &NativeQuery,
        opts: &NativeOptions,
    ) -> Result<NativeResult, SearchError>;

    async fn list(&self, q: &NativeQuery) -> Result<NativeRepoList, SearchError>;
}

/// Engine holding nothing. Answers every search and list with an empty
/// result.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyIndex;

#[async_trait]
impl IndexEngine for EmptyIndex {
    async fn search(
        &self,
        _q: &NativeQuery,
        _opts: &NativeOptions,
    ) -> Result<NativeResult, SearchError> {
        Ok(NativeResult::default())
    }

    async fn list(&self, _q: &NativeQuery) -> Result<NativeRepoList, SearchError> {
        Ok(NativeRepoList::default())
    }
}
