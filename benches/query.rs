//! Query benchmarks
//!
//! Run with: cargo bench

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use textsearch::query::{RepoMatcher, Q, expand_repo, parse, simplify};
use textsearch::search::Repository;
use textsearch::search::refs::{expand_for_repo_at_commit, expand_repo_refs};

const QUERIES: &[&str] = &[
    "simple",
    "two words",
    "\"exact phrase\"",
    "lang:go func",
    "foo.*bar",
    "repo:^github\\.com/a/ -repo:archive branch:main error",
    "(foo or bar) -baz type:file",
    "file:\\.rs$ case:yes Result",
];

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for query in QUERIES {
        group.bench_with_input(BenchmarkId::from_parameter(query), query, |b, &q| {
            b.iter(|| parse(black_box(q)))
        });
    }
    group.finish();
}

fn bench_simplify(c: &mut Criterion) {
    let parsed: Vec<Q> = QUERIES.iter().filter_map(|q| parse(q).ok()).collect();

    c.bench_function("simplify", |b| {
        b.iter(|| {
            for q in &parsed {
                black_box(simplify(q.clone()));
            }
        })
    });
}

fn bench_expand(c: &mut Criterion) {
    let names: Vec<String> = (0..1000)
        .map(|i| format!("github.com/org{}/repo{}", i % 20, i))
        .collect();
    let matcher = RepoMatcher::new(names.iter().cloned());
    let q = parse("repo:org1/ -repo:repo1$ branch:main branch:dev error").unwrap();

    c.bench_function("expand_repo", |b| {
        b.iter(|| expand_repo(black_box(q.clone()), |inc, exc| matcher.list(inc, exc)))
    });

    let expanded = expand_repo(q, |inc, exc| matcher.list(inc, exc)).unwrap();
    let repos: Vec<Repository> = names.iter().map(Repository::new).collect();
    c.bench_function("expand_repo_refs", |b| {
        b.iter(|| expand_repo_refs(black_box(&expanded), &repos))
    });

    let pinned = Repository {
        name: names[1].clone(),
        ref_pattern: "main".to_string(),
        commit: Some("0123456789abcdef0123456789abcdef01234567".to_string()),
    };
    c.bench_function("expand_for_repo_at_commit", |b| {
        b.iter(|| expand_for_repo_at_commit(black_box(&expanded), &pinned))
    });
}

criterion_group!(benches, bench_parse, bench_simplify, bench_expand);
criterion_main!(benches);
