use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use snippetbox::models::Snippet;
use snippetbox::{Renderer, TemplateCache, TemplateFunctions, ViewModel};

fn template_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("ui/html")
}

fn snippets(count: usize) -> Vec<Snippet> {
    let created = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    (0..count)
        .map(|i| Snippet {
            id: i as i64 + 1,
            title: format!("Snippet <{}>", i),
            content: "O snail\nClimb Mount Fuji,\nBut slowly, slowly!".to_string(),
            created,
            expires: created + Duration::days(365),
        })
        .collect()
}

fn cache_build_benchmark(c: &mut Criterion) {
    let dir = template_dir();
    let functions = TemplateFunctions::standard();

    c.bench_function("template_cache_build", |b| {
        b.iter(|| {
            let cache = TemplateCache::build(black_box(dir.as_path()), &functions).unwrap();
            black_box(cache.len());
        });
    });
}

fn cache_lookup_benchmark(c: &mut Criterion) {
    let cache = TemplateCache::build(&template_dir(), &TemplateFunctions::standard()).unwrap();

    c.bench_function("template_cache_lookup", |b| {
        b.iter(|| {
            black_box(cache.get(black_box("home.page.tmpl")).is_some());
        });
    });
}

fn home_render_benchmark(c: &mut Criterion) {
    let cache = TemplateCache::build(&template_dir(), &TemplateFunctions::standard()).unwrap();
    let renderer = Renderer::new(Arc::new(cache));
    let mut group = c.benchmark_group("home_render");

    for count in [0usize, 10, 100] {
        let view = ViewModel {
            csrf_token: "token".to_string(),
            current_year: 2024,
            ..Default::default()
        }
        .with_snippets(snippets(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &view, |b, view| {
            b.iter(|| {
                let body = renderer.render("home.page.tmpl", black_box(view)).unwrap();
                black_box(body.len());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    cache_build_benchmark,
    cache_lookup_benchmark,
    home_render_benchmark
);
criterion_main!(benches);
