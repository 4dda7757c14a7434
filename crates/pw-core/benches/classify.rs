use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pw_core::{Classifier, MemoryDom, MemoryElement, MemorySink, PageScanner, Recorder, ScanSteps};

const URLS: &[&str] = &[
    "https://pagead2.googlesyndication.com/pagead/js/adsbygoogle.js",
    "https://www.google-analytics.com/analytics.js",
    "https://coinhive.com/lib/coinhive.min.js",
    "https://cdn.example.com/static/app.3f9a1c.js",
    "https://fonts.googleapis.com/css2?family=Inter",
    "https://connect.facebook.net/en_US/fbevents.js",
    "https://news.example.org/assets/vendor.js",
    "https://cdn.taboola.com/libtrc/loader.js",
];

fn bench_classify(c: &mut Criterion) {
    let Ok(classifier) = Classifier::builtin() else {
        return;
    };

    let mut group = c.benchmark_group("classify");
    group.throughput(Throughput::Elements(URLS.len() as u64));
    group.bench_function("urls", |b| {
        b.iter(|| {
            for url in URLS {
                black_box(classifier.classify(black_box(url)));
            }
        })
    });
    group.bench_function("infer", |b| {
        b.iter(|| {
            for url in URLS {
                black_box(classifier.infer_category(black_box(url)));
            }
        })
    });
    group.finish();
}

fn page(elements: usize) -> MemoryDom {
    let mut dom = MemoryDom::new();
    for i in 0..elements {
        let url = URLS[i % URLS.len()];
        match i % 4 {
            0 => dom.append(MemoryElement::script(url)),
            1 => dom.append(MemoryElement::new("img").with_src(url).with_size(1.0, 1.0)),
            2 => dom.append(MemoryElement::new("div").with_class("ad-slot").with_size(300.0, 250.0)),
            _ => dom.append(MemoryElement::new("p").with_class("story")),
        };
    }
    dom
}

fn bench_scan(c: &mut Criterion) {
    let Ok(classifier) = Classifier::builtin() else {
        return;
    };
    let scanner = PageScanner::new(&classifier, Default::default());

    let mut group = c.benchmark_group("scan");
    for size in [100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || (page(size), Recorder::new(MemorySink::new(), || 0)),
                |(mut dom, mut recorder)| scanner.scan(&mut dom, ScanSteps::ALL, &mut recorder),
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_classify, bench_scan);
criterion_main!(benches);
