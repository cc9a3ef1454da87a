use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use textsearch::config::Config;
use textsearch::index::{EmptyIndex, IndexEngine, NativeQuery, Zoekt};
use textsearch::jit::{GitResolver, HashRing, TextJit};
use textsearch::output;
use textsearch::query::{Q, RepoMatcher, eval_constant, expand_repo, parse, simplify};
use textsearch::search::{
    Options, Repository, SearchContext, SearchResult, Searcher, StaticSearcher, Text,
};
use textsearch::server::{RpcClient, ShardServer};
use tokio::net::TcpListener;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "textsearch")]
#[command(about = "Code search across indexed and just-in-time searched repositories")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a query and print its canonical and simplified forms
    Parse {
        #[arg(required = true, allow_hyphen_values = true)]
        query: Vec<String>,
    },
    /// Search repositories
    Search {
        /// Repository to search, optionally at a ref (NAME[@REF]). Defaults
        /// to every repository the index knows.
        #[arg(short, long = "repo", value_name = "NAME[@REF]")]
        repos: Vec<String>,

        /// Stop after this many matches (0 = backend default)
        #[arg(short = 'm', long, default_value_t = 0)]
        max_matches: usize,

        /// Wall time budget in milliseconds
        #[arg(short = 't', long)]
        max_wall_time_ms: Option<u64>,

        /// Print at most this many files (0 = all)
        #[arg(long, default_value_t = 0)]
        max_display: usize,

        /// Group matches under a file heading
        #[arg(long)]
        heading: bool,

        /// Only print matching file names
        #[arg(short = 'l', long)]
        files_with_matches: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,

        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        query: Vec<String>,
    },
    /// Run a shard server answering every search with an empty result
    ServeStatic {
        #[arg(long, default_value = "127.0.0.1:6070")]
        addr: String,
    },
    /// Show a shard server's status
    Status {
        addr: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Parse { query } => {
            let q = parse(&query.join(" "))?;
            println!("{}", q);
            println!("{}", simplify(q));
        }
        Commands::Search {
            repos,
            max_matches,
            max_wall_time_ms,
            max_display,
            heading,
            files_with_matches,
            no_color,
            query,
        } => {
            let config = Config::load()?;
            let opts = Options {
                repositories: Vec::new(),
                total_max_match_count: max_matches,
                max_wall_time: max_wall_time_ms.map(Duration::from_millis),
                max_doc_display_count: max_display,
            };
            let result = run_search(&config, &query.join(" "), &repos, opts).await?;
            if files_with_matches {
                output::print_files_only(&result)?;
            } else {
                output::print_result(&result, !no_color, heading)?;
            }
        }
        Commands::ServeStatic { addr } => {
            let config = Config::load()?;
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind to {}", addr))?;
            let server = ShardServer::with_settings(
                Arc::new(StaticSearcher::ok(SearchResult::default()).named("static")),
                Some(Arc::new(EmptyIndex)),
                config.shard_settings(),
            );
            server.serve(listener).await?;
        }
        Commands::Status { addr } => {
            let status = RpcClient::new(addr.as_str())
                .status()
                .await
                .with_context(|| format!("Failed to get status from {}", addr))?;
            println!("shard {} status:", addr);
            println!("  Searcher: {}", status.searcher);
            println!("  Uptime: {}s", status.uptime_secs);
            println!("  Queries served: {}", status.queries_served);
            println!("  Cache entries: {}", status.cache_entries);
            println!("  Cache hit rate: {:.1}%", status.cache_hit_rate * 100.0);
        }
    }

    Ok(())
}

/// Parse, expand repository patterns, then route through the index and
/// the JIT searchers
async fn run_search(
    config: &Config,
    query: &str,
    repo_args: &[String],
    mut opts: Options,
) -> Result<SearchResult> {
    let q = parse(query)?;

    let index_client = config
        .index_addr
        .as_deref()
        .map(|addr| RpcClient::new(addr).with_io_timeout(config.rpc_io_timeout()));

    let universe: Vec<Repository> = if !repo_args.is_empty() {
        repo_args.iter().map(|arg| parse_repo_arg(arg)).collect()
    } else if let Some(client) = &index_client {
        let list = client
            .list(&NativeQuery::all())
            .await
            .context("Failed to list indexed repositories")?;
        list.repos.into_iter().map(|r| Repository::new(r.name)).collect()
    } else {
        bail!("no repositories to search: pass --repo or configure index_addr");
    };

    let matcher = RepoMatcher::new(universe.iter().map(|r| r.name.clone()));
    let q = expand_repo(q, |inc, exc| matcher.list(inc, exc))
        .context("Invalid repository pattern")?;
    debug!(query = %q, "expanded query");

    opts.repositories = universe
        .into_iter()
        .filter(|repo| survives(&q, repo))
        .collect();
    if opts.repositories.is_empty() || matches!(q, Q::Const(false)) {
        info!("query matches no repositories");
        return Ok(SearchResult::default());
    }

    let zoekt = match index_client {
        Some(client) => Zoekt::new(Arc::new(client) as Arc<dyn IndexEngine>, config.refresh_settings())
            .with_split_timeout(config.split_list_timeout()),
        None => Zoekt::disabled(),
    };
    let io_timeout = config.rpc_io_timeout();
    let jit = TextJit::with_connector(
        Arc::new(HashRing::new(config.searcher_endpoints.iter().cloned())),
        Arc::new(GitResolver::new(config.repos_root.clone())),
        Arc::new(move |addr: &str| {
            Arc::new(RpcClient::new(addr).with_io_timeout(io_timeout)) as Arc<dyn Searcher>
        }),
    )
    .with_concurrency_per_endpoint(config.jit_concurrency_per_endpoint);

    let text = Text::new(Arc::new(zoekt), Arc::new(jit));
    info!(searcher = %text, options = %opts, "searching");
    let result = text.search(&SearchContext::new(), &q, &opts).await?;
    text.close();
    Ok(result)
}

/// `NAME[@REF]`
fn parse_repo_arg(arg: &str) -> Repository {
    match arg.split_once('@') {
        Some((name, ref_pattern)) => Repository::at_ref(name, ref_pattern),
        None => Repository::new(arg),
    }
}

/// Whether the query can match anything in `repo`, judging by repository
/// names only. Refs are expanded per repository later.
fn survives(q: &Q, repo: &Repository) -> bool {
    eval_constant(q, |atom| match atom {
        Q::RepoSet(set) => Some(set.contains(&repo.name)),
        _ => None,
    }) != Some(false)
}
