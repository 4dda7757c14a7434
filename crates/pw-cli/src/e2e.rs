use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use thirtyfour::prelude::*;
use thirtyfour::ChromeCapabilities;

pub struct E2eOptions {
    pub chromedriver_url: String,
    pub extension_path: String,
    pub page_url: String,
    pub headless: bool,
}

/// Debounce window plus slack for the re-check to land.
const WATCHER_SETTLE: Duration = Duration::from_millis(1500);

pub fn run_e2e(opts: E2eOptions) -> Result<(), String> {
    let runtime = tokio::runtime::Runtime::new().map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    runtime.block_on(run_e2e_async(opts))
}

async fn run_e2e_async(opts: E2eOptions) -> Result<(), String> {
    let extension_path = canonicalize_path(&opts.extension_path)?;

    let mut caps = ChromeCapabilities::new();
    let mut args = vec![
        format!("--disable-extensions-except={}", extension_path.display()),
        format!("--load-extension={}", extension_path.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
    ];
    if opts.headless {
        args.push("--headless=new".to_string());
        args.push("--disable-gpu".to_string());
    }
    for arg in &args {
        caps.add_arg(arg).map_err(|e| format!("Failed to set chrome arg: {}", e))?;
    }

    let driver = WebDriver::new(&opts.chromedriver_url, caps)
        .await
        .map_err(|e| format!("Failed to connect to chromedriver: {}", e))?;

    driver
        .goto(&opts.page_url)
        .await
        .map_err(|e| format!("Failed to navigate to {}: {}", opts.page_url, e))?;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let mut errors = Vec::new();

    if let Err(e) = check_guard_blocks_fetch(&driver).await {
        errors.push(format!("Fetch guard check failed: {}", e));
    }

    if let Err(e) = check_guard_blocks_popup(&driver).await {
        errors.push(format!("Popup guard check failed: {}", e));
    }

    if let Err(e) = check_injected_ad_hidden(&driver).await {
        errors.push(format!("Mutation watcher check failed: {}", e));
    }

    driver.quit().await.ok();

    if errors.is_empty() {
        println!("✓ E2E checks passed");
        Ok(())
    } else {
        Err(format!("E2E failed:\n- {}", errors.join("\n- ")))
    }
}

async fn check_guard_blocks_fetch(driver: &WebDriver) -> Result<(), String> {
    let outcome = eval_string(
        driver,
        "return fetch('https://pagead2.googlesyndication.com/pagead/x').then(() => 'passed', () => 'blocked');",
    )
    .await
    .map_err(|e| format!("Failed to evaluate fetch: {}", e))?;

    if outcome != "blocked" {
        return Err(format!("Expected ad fetch to be rejected, got '{}'", outcome));
    }
    Ok(())
}

async fn check_guard_blocks_popup(driver: &WebDriver) -> Result<(), String> {
    let blocked = eval_bool(driver, "return window.open('https://example.com/deal') === null;")
        .await
        .map_err(|e| format!("Failed to evaluate window.open: {}", e))?;

    if !blocked {
        return Err("Expected unnamed popup to be blocked".to_string());
    }
    Ok(())
}

async fn check_injected_ad_hidden(driver: &WebDriver) -> Result<(), String> {
    eval_bool(
        driver,
        "const el = document.createElement('div');\
         el.id = 'pw-e2e-ad'; el.className = 'ad-unit';\
         el.style.width = '300px'; el.style.height = '250px';\
         document.body.appendChild(el); return true;",
    )
    .await
    .map_err(|e| format!("Failed to inject test element: {}", e))?;

    tokio::time::sleep(WATCHER_SETTLE).await;

    let hidden = eval_bool(
        driver,
        "return getComputedStyle(document.getElementById('pw-e2e-ad')).display === 'none';",
    )
    .await
    .map_err(|e| format!("Failed to read test element: {}", e))?;

    if !hidden {
        return Err("Injected ad container was not hidden".to_string());
    }
    Ok(())
}

async fn eval_bool(driver: &WebDriver, script: &str) -> WebDriverResult<bool> {
    let result = driver.execute(script, Vec::<Value>::new()).await?;
    Ok(result.json().as_bool().unwrap_or(false))
}

async fn eval_string(driver: &WebDriver, script: &str) -> WebDriverResult<String> {
    let result = driver.execute(script, Vec::<Value>::new()).await?;
    Ok(result.json().as_str().unwrap_or_default().to_string())
}

fn canonicalize_path(path: &str) -> Result<PathBuf, String> {
    std::fs::canonicalize(path).map_err(|e| format!("Failed to resolve '{}': {}", path, e))
}
