//! # textsearch - query algebra and sharded search execution
//!
//! Parses code search queries into a boolean algebra, resolves repository
//! patterns and refs, and executes the result across an indexed backend
//! and a just-in-time (JIT) backend that searches repositories the index
//! doesn't cover.
//!
//! ## Architecture
//!
//! - [`query`] - Query AST, parser, simplifier and repository expansion
//! - [`search`] - `Searcher` trait, results, cancelable scopes and the
//!   sharded dispatcher every fan-out goes through
//! - [`index`] - Indexed backend and its background-refreshed repository list
//! - [`jit`] - JIT backend: commit resolution, pinning and endpoint routing
//! - [`server`] - Shard RPC (length-prefixed JSON over TCP)
//! - [`config`] - On-disk configuration with environment overrides
//! - [`output`] - Result formatting
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use textsearch::index::Zoekt;
//! use textsearch::jit::{GitResolver, HashRing, TextJit};
//! use textsearch::query::parse;
//! use textsearch::search::{Options, Repository, SearchContext, Searcher, Text};
//!
//! let q = parse("foo.*bar lang:go")?;
//! let jit = TextJit::new(
//!     Arc::new(HashRing::new(["searcher-0:6070", "searcher-1:6070"])),
//!     Arc::new(GitResolver::new("/srv/repos")),
//! );
//! let text = Text::new(Arc::new(Zoekt::disabled()), Arc::new(jit));
//! let opts = Options::for_repositories(vec![Repository::new("github.com/a/b")]);
//! let result = text.search(&SearchContext::new(), &q, &opts).await?;
//! ```

pub mod config;
pub mod index;
pub mod jit;
pub mod output;
pub mod query;
pub mod search;
pub mod server;
