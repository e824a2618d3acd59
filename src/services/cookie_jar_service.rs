use crate::services::browser_service::{
    BrowserCookie, BrowserLauncher, BrowserSession, LaunchOptions,
};
use crate::services::settings_service::get_app_data_dir;
use crate::utils::channel_url::domain_from_url;
use anyhow::{Context, Result};
use log::{debug, error, info};
use std::fs::{self, File};
use std::future::Future;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

const COOKIES_DIR: &str = "cookies";

/// Per-domain cookie persistence used to sign browser sessions in.
pub trait CookieStore: Send + Sync {
    /// Cookies saved for `domain`; empty when none were ever imported.
    fn load(&self, domain: &str) -> Result<Vec<BrowserCookie>>;
    fn save(&self, domain: &str, cookies: &[BrowserCookie]) -> Result<()>;
}

/// One JSON file per domain, e.g. `cookies/kick.com.json`.
pub struct FileCookieStore {
    dir: PathBuf,
}

impl FileCookieStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn in_app_dir() -> Result<Self> {
        Ok(Self::new(get_app_data_dir()?.join(COOKIES_DIR)))
    }

    pub fn file_for_domain(&self, domain: &str) -> PathBuf {
        let safe = domain.replace(':', "_");
        self.dir.join(format!("{}.json", safe))
    }
}

impl CookieStore for FileCookieStore {
    fn load(&self, domain: &str) -> Result<Vec<BrowserCookie>> {
        let path = self.file_for_domain(domain);
        if !path.exists() {
            debug!("[COOKIE_JAR] No cookies saved for {}", domain);
            return Ok(Vec::new());
        }
        let file = File::open(&path).with_context(|| format!("Failed to open {:?}", path))?;
        let cookies: Vec<BrowserCookie> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse cookie file {:?}", path))?;
        debug!("[COOKIE_JAR] ✅ Loaded {} cookies for {}", cookies.len(), domain);
        Ok(cookies)
    }

    fn save(&self, domain: &str, cookies: &[BrowserCookie]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.file_for_domain(domain);
        let file = File::create(&path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), cookies)?;
        debug!("[COOKIE_JAR] ✅ Saved {} cookies to {:?}", cookies.len(), path);
        Ok(())
    }
}

/// Replays saved cookies into a browser already on `domain`. Returns how many were accepted.
pub async fn apply_cookies(
    store: &dyn CookieStore,
    browser: &dyn BrowserSession,
    domain: &str,
) -> usize {
    let cookies = match store.load(domain) {
        Ok(cookies) => cookies,
        Err(e) => {
            error!("[COOKIE_JAR] ⚠️ Failed to load cookies for {}: {:?}", domain, e);
            return 0;
        }
    };

    let mut applied = 0;
    for cookie in &cookies {
        match browser.add_cookie(cookie).await {
            Ok(()) => applied += 1,
            Err(e) => debug!("[COOKIE_JAR] Skipped cookie {}: {}", cookie.name, e),
        }
    }
    applied
}

/// Opens `channel_url` in a visible browser, waits for `signed_in`, then saves
/// the domain's cookies. Returns how many were saved.
pub async fn capture_cookies<F>(
    launcher: &dyn BrowserLauncher,
    store: &dyn CookieStore,
    channel_url: &str,
    options: &LaunchOptions,
    signed_in: F,
) -> Result<usize>
where
    F: Future<Output = ()>,
{
    let domain = domain_from_url(channel_url)
        .with_context(|| format!("Invalid channel URL: {}", channel_url))?;
    let browser = launcher
        .launch(options)
        .await
        .context("Failed to launch browser")?;

    let captured = async {
        browser
            .navigate(channel_url)
            .await
            .with_context(|| format!("Failed to open {}", channel_url))?;
        info!("[COOKIE_JAR] 🔑 Sign in to {} in the browser window", domain);
        signed_in.await;

        let cookies = browser.get_cookies().await?;
        store.save(&domain, &cookies)?;
        Ok::<usize, anyhow::Error>(cookies.len())
    }
    .await;

    if let Err(e) = browser.quit().await {
        debug!("[COOKIE_JAR] Failed to close sign-in browser: {}", e);
    }
    captured
}
