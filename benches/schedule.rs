use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use mockmake::builder::Builder;
use mockmake::config::Options;
use mockmake::metadata::PackageMetadata;
use mockmake::progress::NoProgress;
use mockmake::project::{Artifacts, BuildRoot, Project, Registry};
use mockmake::resolve;
use mockmake::work::Work;

/// Builder whose every step succeeds instantly.
struct NullBuilder;

impl Builder for NullBuilder {
    fn init_root(&mut self, _root: &BuildRoot) -> anyhow::Result<()> {
        Ok(())
    }
    fn resolve_requirements(&mut self, _root: &BuildRoot, _p: &Project) -> anyhow::Result<bool> {
        Ok(true)
    }
    fn build(&mut self, _root: &BuildRoot, _p: &Project) -> anyhow::Result<Artifacts> {
        Ok(Artifacts::default())
    }
    fn update_local_repository(&mut self, _root: &BuildRoot) -> anyhow::Result<()> {
        Ok(())
    }
    fn wipe(&mut self, _root: &BuildRoot) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A chain where each project needs the previous one.  Names are chosen so
/// that sorting puts the chain in reverse, the worst case for passes.
fn chain(n: usize) -> Registry {
    let mut registry = Registry::new();
    for i in 0..n {
        let name = format!("p{:05}", n - i);
        let requires = if i == 0 {
            vec![]
        } else {
            vec![format!("p{:05}", n - i + 1)]
        };
        let meta = PackageMetadata {
            name: name.clone(),
            produces: vec![name.clone()],
            build_requires: requires,
            ..Default::default()
        };
        registry
            .add(Project::new(name.clone(), meta, name.into()))
            .unwrap();
    }
    registry
}

pub fn bench_link(c: &mut Criterion) {
    let mut registry = chain(300);
    c.bench_function("link chain 300", |b| b.iter(|| resolve::link(&mut registry)));
}

pub fn bench_schedule(c: &mut Criterion) {
    let root = BuildRoot::new("bench");
    c.bench_function("schedule chain 100", |b| {
        b.iter_batched(
            || {
                let mut registry = chain(100);
                resolve::link(&mut registry);
                let ids: Vec<_> = registry.ids().collect();
                (registry, ids)
            },
            |(mut registry, ids)| {
                let mut builder = NullBuilder;
                Work::new(&mut registry, &mut builder, &mut NoProgress, &Options::default())
                    .build_root(&root, &ids)
                    .unwrap()
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_link, bench_schedule);
criterion_main!(benches);
