//! Query tree
//!
//! A [`Q`] is an immutable expression tree. Every rewrite in this crate
//! consumes a tree and produces a fresh one; nothing is patched in place.
//! Two trees are considered equivalent when their canonical [`fmt::Display`]
//! forms agree.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Query expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Q {
    /// Literal substring match
    Substring(Substring),
    /// Regular expression match
    Regexp(Regexp),
    /// Match against a symbol name
    Symbol(Substring),
    /// Repository name pattern, resolved into a `RepoSet` before execution
    Repo(Repo),
    /// Closed set of repository names
    RepoSet(RepoSet),
    /// Restrict to a named ref or branch (or a pinned commit)
    Ref(Ref),
    /// Restrict to files of a language
    Language(Language),
    /// Changes the shape of the result
    Type(Type),
    /// All children must match
    And(Vec<Q>),
    /// At least one child must match
    Or(Vec<Q>),
    /// Child must not match
    Not(Box<Q>),
    /// Resolved tautology or contradiction
    Const(bool),
}

/// Substring atom
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Substring {
    pub pattern: String,
    pub case_sensitive: bool,
    /// Only match file names
    pub file_name: bool,
    /// Only match file contents
    pub content: bool,
}

/// Regular expression atom
///
/// Holds the compiled regex alongside its source so the atom can be shipped
/// over the wire and recompiled on the other side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RegexpWire", into = "RegexpWire")]
pub struct Regexp {
    regex: Regex,
    pattern: String,
    pub case_sensitive: bool,
    pub file_name: bool,
    pub content: bool,
}

#[derive(Serialize, Deserialize)]
struct RegexpWire {
    pattern: String,
    case_sensitive: bool,
    file_name: bool,
    content: bool,
}

/// Repository name pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub pattern: String,
}

/// Resolved set of repository names
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RepoSet {
    pub set: BTreeSet<String>,
}

/// Ref, branch or commit restriction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    pub pattern: String,
}

/// Language restriction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub name: String,
}

/// Result shape wrapper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Type {
    pub kind: TypeKind,
    pub child: Box<Q>,
}

/// What a `Type` wrapper turns the result into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    FileMatch,
    FileName,
    Repo,
}

impl Q {
    pub fn substring(pattern: impl Into<String>) -> Self {
        Q::Substring(Substring {
            pattern: pattern.into(),
            ..Substring::default()
        })
    }

    pub fn repo(pattern: impl Into<String>) -> Self {
        Q::Repo(Repo {
            pattern: pattern.into(),
        })
    }

    pub fn repo_set<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Q::RepoSet(RepoSet {
            set: names.into_iter().map(Into::into).collect(),
        })
    }

    /// Ref restriction (`branch:` in query text)
    pub fn branch(pattern: impl Into<String>) -> Self {
        Q::Ref(Ref {
            pattern: pattern.into(),
        })
    }

    pub fn language(name: impl Into<String>) -> Self {
        Q::Language(Language { name: name.into() })
    }

    pub fn and(children: Vec<Q>) -> Self {
        Q::And(children)
    }

    pub fn or(children: Vec<Q>) -> Self {
        Q::Or(children)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: Q) -> Self {
        Q::Not(Box::new(child))
    }

    pub fn typed(kind: TypeKind, child: Q) -> Self {
        Q::Type(Type {
            kind,
            child: Box::new(child),
        })
    }

    /// Leaf nodes: everything except And, Or, Not and Type
    pub fn is_atom(&self) -> bool {
        !matches!(self, Q::And(_) | Q::Or(_) | Q::Not(_) | Q::Type(_))
    }

    /// Whether any atom in the tree satisfies `pred`
    pub fn any_atom(&self, mut pred: impl FnMut(&Q) -> bool) -> bool {
        let mut found = false;
        crate::query::visit_atoms(self, |atom| found = found || pred(atom));
        found
    }

    /// Whether the query restricts refs anywhere
    pub fn has_ref(&self) -> bool {
        self.any_atom(|atom| matches!(atom, Q::Ref(_)))
    }
}

impl Substring {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Self::default()
        }
    }
}

impl Regexp {
    /// Compile a regex atom matching both file names and contents
    pub fn new(pattern: impl Into<String>, case_sensitive: bool) -> Result<Self, regex::Error> {
        let pattern = pattern.into();
        let regex = compile(&pattern, case_sensitive)?;
        Ok(Self {
            regex,
            pattern,
            case_sensitive,
            file_name: false,
            content: false,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Recompile with a different case sensitivity
    pub fn with_case_sensitive(self, case_sensitive: bool) -> Result<Self, regex::Error> {
        if case_sensitive == self.case_sensitive {
            return Ok(self);
        }
        Ok(Self {
            regex: compile(&self.pattern, case_sensitive)?,
            case_sensitive,
            ..self
        })
    }
}

fn compile(pattern: &str, case_sensitive: bool) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()
}

impl PartialEq for Regexp {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
            && self.case_sensitive == other.case_sensitive
            && self.file_name == other.file_name
            && self.content == other.content
    }
}

impl TryFrom<RegexpWire> for Regexp {
    type Error = regex::Error;

    fn try_from(wire: RegexpWire) -> Result<Self, Self::Error> {
        let mut re = Regexp::new(wire.pattern, wire.case_sensitive)?;
        re.file_name = wire.file_name;
        re.content = wire.content;
        Ok(re)
    }
}

impl From<Regexp> for RegexpWire {
    fn from(re: Regexp) -> Self {
        Self {
            pattern: re.pattern,
            case_sensitive: re.case_sensitive,
            file_name: re.file_name,
            content: re.content,
        }
    }
}

impl RepoSet {
    pub fn contains(&self, name: &str) -> bool {
        self.set.contains(name)
    }
}

fn scope_prefix(file_name: bool, content: bool, case_sensitive: bool) -> String {
    let mut prefix = String::new();
    if file_name {
        prefix.push_str("file_");
    } else if content {
        prefix.push_str("content_");
    }
    if case_sensitive {
        prefix.push_str("case_");
    }
    prefix
}

impl fmt::Display for Substring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = scope_prefix(self.file_name, self.content, self.case_sensitive);
        write!(f, "{}substr:{:?}", prefix, self.pattern)
    }
}

impl fmt::Display for Regexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = scope_prefix(self.file_name, self.content, self.case_sensitive);
        write!(f, "{}regex:{:?}", prefix, self.pattern)
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeKind::FileMatch => write!(f, "filematch"),
            TypeKind::FileName => write!(f, "filename"),
            TypeKind::Repo => write!(f, "repo"),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, op: &str, children: &[Q]) -> fmt::Result {
    write!(f, "({}", op)?;
    for child in children {
        write!(f, " {}", child)?;
    }
    write!(f, ")")
}

impl fmt::Display for Q {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Q::Substring(s) => write!(f, "{}", s),
            Q::Regexp(r) => write!(f, "{}", r),
            Q::Symbol(s) => write!(f, "sym:{}", s),
            Q::Repo(r) => write!(f, "repo:{}", r.pattern),
            Q::RepoSet(rs) => {
                write!(f, "(reposet")?;
                for name in &rs.set {
                    write!(f, " {}", name)?;
                }
                write!(f, ")")
            }
            Q::Ref(r) => write!(f, "branch:{:?}", r.pattern),
            Q::Language(l) => write!(f, "lang:{}", l.name),
            Q::Type(t) => write!(f, "(type:{} {})", t.kind, t.child),
            Q::And(children) => write_list(f, "and", children),
            Q::Or(children) => write_list(f, "or", children),
            Q::Not(child) => write!(f, "(not {})", child),
            Q::Const(true) => write!(f, "TRUE"),
            Q::Const(false) => write!(f, "FALSE"),
        }
    }
}
