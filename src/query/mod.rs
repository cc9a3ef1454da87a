pub mod algebra;
pub mod ast;
pub mod expand;
pub mod parser;
pub mod regex;

pub use algebra::{eval_constant, map, simplify, substitute, try_map, visit_atoms};
pub use ast::{Language, Q, Ref, Regexp, Repo, RepoSet, Substring, Type, TypeKind};
pub use expand::{RepoMatcher, expand_repo};
pub use parser::{ParseError, parse};
