//! PageWarden CLI
//!
//! Inspect the built-in rules, classify URLs and dry-run page scans against
//! JSON fixtures without a browser.

mod bench;
#[cfg(feature = "e2e")]
mod e2e;
mod fixture;

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use pw_core::rules::RuleSetDump;
use pw_core::Classifier;

#[derive(Parser)]
#[command(name = "pw-cli")]
#[command(about = "PageWarden rule inspection and dry-run tools")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify resource URLs
    Classify {
        /// URLs to classify
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Check an inline script body for miner keywords
    Inline {
        /// Script file, `-` for stdin
        #[arg(short, long)]
        file: String,
    },

    /// Dump the built-in rule sets as JSON
    Rules {
        /// Pretty-print
        #[arg(short, long)]
        pretty: bool,
    },

    /// Run a page load against a JSON fixture
    Scan {
        /// Fixture file: `{"url": ..., "elements": [...]}`
        #[arg(short, long)]
        fixture: PathBuf,

        /// Storage-shaped config: `{"isEnabled": ..., "whitelist": [...]}`
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Hostname to use instead of the fixture URL's
        #[arg(long)]
        hostname: Option<String>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export TypeScript definitions of the runtime message types
    #[cfg(feature = "ts")]
    ExportTypes {
        /// Output file
        #[arg(short, long, default_value = "bindings/pagewarden.ts")]
        output: PathBuf,
    },

    /// Benchmark classification and scanning
    Bench {
        #[arg(long, value_enum, default_value_t = bench::BenchMode::All)]
        mode: bench::BenchMode,

        /// Synthetic URLs per iteration
        #[arg(long, default_value_t = 10_000)]
        urls: usize,

        #[arg(long, default_value_t = 10)]
        iterations: usize,

        /// Operations per latency sample
        #[arg(long, default_value_t = 1_000)]
        sample_batch_ops: usize,

        /// Synthetic pages for the scan benchmark
        #[arg(long, default_value_t = 100)]
        pages: usize,

        #[arg(long, default_value_t = 500)]
        elements_per_page: usize,

        #[arg(long, default_value_t = bench::DEFAULT_SEED)]
        seed: u32,
    },

    /// Drive Chrome with the unpacked extension loaded
    #[cfg(feature = "e2e")]
    E2e {
        #[arg(long, default_value = "http://localhost:9515")]
        chromedriver_url: String,

        /// Unpacked extension directory
        #[arg(long)]
        extension_path: String,

        #[arg(long, default_value = "https://example.com")]
        page_url: String,

        #[arg(long)]
        headless: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let result = match cli.command {
        Commands::Classify { urls } => cmd_classify(&urls),
        Commands::Inline { file } => cmd_inline(&file),
        Commands::Rules { pretty } => cmd_rules(pretty),
        Commands::Scan {
            fixture,
            config,
            hostname,
            json,
        } => cmd_scan(&fixture, config.as_deref(), hostname.as_deref(), json),
        #[cfg(feature = "ts")]
        Commands::ExportTypes { output } => cmd_export_types(&output),
        Commands::Bench {
            mode,
            urls,
            iterations,
            sample_batch_ops,
            pages,
            elements_per_page,
            seed,
        } => bench::run(bench::BenchOptions {
            mode,
            urls,
            iterations,
            sample_batch_ops,
            pages,
            elements_per_page,
            seed,
        }),
        #[cfg(feature = "e2e")]
        Commands::E2e {
            chromedriver_url,
            extension_path,
            page_url,
            headless,
        } => e2e::run_e2e(e2e::E2eOptions {
            chromedriver_url,
            extension_path,
            page_url,
            headless,
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn classifier() -> Result<Classifier, String> {
    Classifier::builtin().map_err(|e| format!("Failed to build rules: {}", e))
}

fn cmd_classify(urls: &[String]) -> Result<(), String> {
    let classifier = classifier()?;

    println!("{:<10} {:<10} {:<8} URL", "CATEGORY", "INFERRED", "GUARD");
    for url in urls {
        let category = classifier.classify(url).map_or("-", |c| c.as_str());
        let inferred = classifier.infer_category(url).map_or("-", |c| c.as_str());
        let guard = if classifier.is_blocked_url(url) { "block" } else { "pass" };
        println!("{:<10} {:<10} {:<8} {}", category, inferred, guard, url);
    }
    Ok(())
}

fn cmd_inline(file: &str) -> Result<(), String> {
    let text = if file == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| format!("Failed to read stdin: {}", e))?;
        text
    } else {
        fs::read_to_string(file).map_err(|e| format!("Failed to read '{}': {}", file, e))?
    };

    let classifier = classifier()?;
    if classifier.classify_inline_content(&text) {
        println!("miner: inline script matches a miner keyword");
    } else {
        println!("clean");
    }
    Ok(())
}

fn cmd_rules(pretty: bool) -> Result<(), String> {
    let dump = RuleSetDump::builtin();
    let json = if pretty {
        serde_json::to_string_pretty(&dump)
    } else {
        serde_json::to_string(&dump)
    }
    .map_err(|e| format!("Failed to serialise rules: {}", e))?;
    println!("{}", json);
    Ok(())
}

fn cmd_scan(fixture_path: &Path, config: Option<&Path>, hostname: Option<&str>, json: bool) -> Result<(), String> {
    let page = fixture::read_fixture(fixture_path)?;
    let config = fixture::read_config(config);
    let outcome = fixture::scan_fixture(page, &config, hostname)?;

    if json {
        let text = serde_json::to_string_pretty(&outcome).map_err(|e| format!("Failed to serialise outcome: {}", e))?;
        println!("{}", text);
        return Ok(());
    }

    println!("Page:       {}", outcome.hostname);
    println!("Activation: {}", outcome.activation);
    let Some(report) = outcome.report else {
        return Ok(());
    };
    println!();
    println!("Suppressed {} element(s):", report.total());
    println!("  Scripts:         {}", report.scripts);
    println!("  Inline scripts:  {}", report.inline_scripts);
    println!("  Iframes:         {}", report.iframes);
    println!("  Ad containers:   {}", report.structural);
    println!("  Tracking pixels: {}", report.images);
    println!();
    println!(
        "Counts: {} ads, {} trackers, {} miners, {} distinct site(s)",
        outcome.counts.ads, outcome.counts.trackers, outcome.counts.miners, outcome.counts.distinct_sites
    );
    if !outcome.events.is_empty() {
        println!();
        println!("Reported:");
        for event in &outcome.events {
            println!("  {:<8} {}", event.category, event.identifier);
        }
    }
    println!();
    println!("{} element(s) left attached", outcome.remaining);
    Ok(())
}

#[cfg(feature = "ts")]
fn cmd_export_types(output: &Path) -> Result<(), String> {
    use pw_core::{BlockMessage, Category, SuppressionEvent};
    use ts_rs::{Config, TS};

    let cfg = Config::new();
    let decls = [Category::decl(&cfg), SuppressionEvent::decl(&cfg), BlockMessage::decl(&cfg)];
    let mut text = String::from("// Generated by pw-cli export-types\n\n");
    for decl in &decls {
        text.push_str("export ");
        text.push_str(decl);
        text.push_str("\n\n");
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
    }
    fs::write(output, text).map_err(|e| format!("Failed to write '{}': {}", output.display(), e))?;
    println!("Wrote {} type(s) to '{}'", decls.len(), output.display());
    Ok(())
}
