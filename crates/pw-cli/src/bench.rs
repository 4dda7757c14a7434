use std::cmp::Ordering;
use std::time::Instant;

use clap::ValueEnum;
use pw_core::{Classifier, MemoryDom, MemoryElement, MemorySink, PageScanner, Recorder, ScanSteps};

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum BenchMode {
    /// Script URL classification
    Classify,
    /// Page-realm blocked-domain check
    Guard,
    /// Full scan over synthetic pages
    Scan,
    All,
}

pub struct BenchOptions {
    pub mode: BenchMode,
    pub urls: usize,
    pub iterations: usize,
    pub sample_batch_ops: usize,
    pub pages: usize,
    pub elements_per_page: usize,
    pub seed: u32,
}

pub const DEFAULT_SEED: u32 = 0xc0ffee;

struct BenchResult {
    name: String,
    op_count: usize,
    total_ms: f64,
    avg_us: f64,
    p50_us: f64,
    p95_us: f64,
    p99_us: f64,
    ops_per_sec: u64,
    matched_pct: f64,
}

pub fn run(opts: BenchOptions) -> Result<(), String> {
    let classifier = Classifier::builtin().map_err(|e| format!("Failed to build rules: {}", e))?;
    let urls = generate_urls(opts.urls, opts.seed);

    println!(
        "Workload: {} URLs x {} iterations (seed {:#x})",
        urls.len(),
        opts.iterations,
        opts.seed
    );
    println!();

    if matches!(opts.mode, BenchMode::Classify | BenchMode::All) {
        let result = run_bench_batched("classify", &urls, opts.iterations, opts.sample_batch_ops, |url| {
            classifier.classify(url).is_some()
        });
        println!("{}\n", format_result(&result));
    }

    if matches!(opts.mode, BenchMode::Guard | BenchMode::All) {
        let result = run_bench_batched("is_blocked_url", &urls, opts.iterations, opts.sample_batch_ops, |url| {
            classifier.is_blocked_url(url)
        });
        println!("{}\n", format_result(&result));
    }

    if matches!(opts.mode, BenchMode::Scan | BenchMode::All) {
        let result = run_scan_bench(&classifier, &urls, opts.pages, opts.elements_per_page);
        println!("{}", format_result(&result));
    }

    Ok(())
}

fn run_bench_batched(
    name: &str,
    urls: &[String],
    iterations: usize,
    sample_batch_ops: usize,
    mut f: impl FnMut(&str) -> bool,
) -> BenchResult {
    let sample_batch_ops = sample_batch_ops.max(1);
    let mut samples_us = Vec::new();
    let mut matched = 0usize;
    let total_ops = urls.len() * iterations.max(1);

    let mut batch_ops = 0usize;
    let mut batch_start = Instant::now();
    let start = Instant::now();

    for _ in 0..iterations.max(1) {
        for url in urls {
            if f(url) {
                matched += 1;
            }
            batch_ops += 1;
            if batch_ops == sample_batch_ops {
                let dt = batch_start.elapsed();
                samples_us.push(dt.as_secs_f64() * 1_000_000.0 / sample_batch_ops as f64);
                batch_ops = 0;
                batch_start = Instant::now();
            }
        }
    }

    let total_ms = start.elapsed().as_secs_f64() * 1000.0;
    summarize(name, total_ops, total_ms, samples_us, matched)
}

fn run_scan_bench(classifier: &Classifier, urls: &[String], pages: usize, elements_per_page: usize) -> BenchResult {
    let scanner = PageScanner::new(classifier, Default::default());
    let mut samples_us = Vec::with_capacity(pages);
    let mut suppressed = 0usize;
    let mut total_ms = 0.0;

    for page in 0..pages.max(1) {
        let mut dom = synthetic_page(urls, page, elements_per_page);
        let mut recorder = Recorder::new(MemorySink::new(), || 0);

        let start = Instant::now();
        let report = scanner.scan(&mut dom, ScanSteps::ALL, &mut recorder);
        let elapsed = start.elapsed().as_secs_f64();

        suppressed += report.total();
        total_ms += elapsed * 1000.0;
        samples_us.push(elapsed * 1_000_000.0);
    }

    let mut result = summarize("scan", pages.max(1), total_ms, samples_us, 0);
    let elements = pages.max(1) * elements_per_page;
    result.matched_pct = if elements > 0 {
        suppressed as f64 / elements as f64 * 100.0
    } else {
        0.0
    };
    result
}

fn summarize(name: &str, op_count: usize, total_ms: f64, mut samples_us: Vec<f64>, matched: usize) -> BenchResult {
    samples_us.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    BenchResult {
        name: name.to_string(),
        op_count,
        total_ms,
        avg_us: if op_count == 0 { 0.0 } else { total_ms * 1000.0 / op_count as f64 },
        p50_us: percentile(&samples_us, 0.50),
        p95_us: percentile(&samples_us, 0.95),
        p99_us: percentile(&samples_us, 0.99),
        ops_per_sec: if total_ms > 0.0 { (op_count as f64 / (total_ms / 1000.0)) as u64 } else { 0 },
        matched_pct: if op_count > 0 { matched as f64 / op_count as f64 * 100.0 } else { 0.0 },
    }
}

fn format_result(result: &BenchResult) -> String {
    format!(
        "{}:\n  Ops: {}\n  Total: {:.2} ms\n  Avg: {:.2} us\n  P50: {:.2} us\n  P95: {:.2} us\n  P99: {:.2} us\n  Throughput: {} ops/sec\n  Matched: {:.1}%",
        result.name,
        result.op_count,
        result.total_ms,
        result.avg_us,
        result.p50_us,
        result.p95_us,
        result.p99_us,
        result.ops_per_sec,
        result.matched_pct,
    )
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let idx = ((values.len() as f64) * p).ceil() as usize;
    values[idx.saturating_sub(1).min(values.len() - 1)]
}

// =============================================================================
// Synthetic Workload
// =============================================================================

fn create_rng(seed: u32) -> impl FnMut() -> f64 {
    let mut state = seed;
    move || {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        (state as f64) / (u32::MAX as f64)
    }
}

fn pick<'a>(items: &[&'a str], rand: &mut impl FnMut() -> f64) -> &'a str {
    let idx = (rand() * items.len() as f64).floor() as usize;
    items[idx.min(items.len() - 1)]
}

fn rand_hex(rand: &mut impl FnMut() -> f64, len: usize) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    (0..len)
        .map(|_| HEX[((rand() * 16.0) as usize).min(15)] as char)
        .collect()
}

/// Roughly one in four URLs points at an ad, tracker or miner host.
fn generate_urls(count: usize, seed: u32) -> Vec<String> {
    const UNWANTED: &[&str] = &[
        "https://pagead2.googlesyndication.com/pagead/js/adsbygoogle.js",
        "https://securepubads.g.doubleclick.net/tag/js/gpt.js",
        "https://www.google-analytics.com/analytics.js",
        "https://cdn.segment.com/analytics.js/v1/key/analytics.min.js",
        "https://cdn.taboola.com/libtrc/publisher/loader.js",
        "https://coinhive.com/lib/coinhive.min.js",
        "https://c.amazon-adsystem.com/aax2/apstag.js",
    ];
    const HOSTS: &[&str] = &[
        "cdn.example.com",
        "static.news.example.org",
        "assets.shop.example.net",
        "fonts.gstatic.com",
        "cdnjs.cloudflare.com",
    ];
    const PATHS: &[&str] = &["js/app", "vendor/react", "bundle/main", "lib/jquery", "widgets/comments"];

    let mut rand = create_rng(seed);
    (0..count)
        .map(|_| {
            if rand() < 0.25 {
                pick(UNWANTED, &mut rand).to_string()
            } else {
                let host = pick(HOSTS, &mut rand);
                let path = pick(PATHS, &mut rand);
                format!("https://{}/{}.{}.js", host, path, rand_hex(&mut rand, 8))
            }
        })
        .collect()
}

fn synthetic_page(urls: &[String], page: usize, elements: usize) -> MemoryDom {
    let mut dom = MemoryDom::new();
    if urls.is_empty() {
        return dom;
    }
    for i in 0..elements {
        let url = &urls[(page * elements + i) % urls.len()];
        let element = match i % 5 {
            0 | 1 => MemoryElement::script(url),
            2 => MemoryElement::new("img").with_src(url).with_size(1.0, 1.0),
            3 => MemoryElement::new("div").with_class("ad-slot").with_size(300.0, 250.0),
            _ => MemoryElement::new("p").with_class("story"),
        };
        dom.append(element);
    }
    dom
}
