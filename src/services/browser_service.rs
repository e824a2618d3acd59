use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thirtyfour::prelude::*;
use tokio::process::{Child, Command};
use url::Url;

const DEFAULT_DRIVER_PORT: u16 = 9515;

/// A cookie as persisted for a domain and replayed into the browser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
}

/// Window geometry applied right after launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlacement {
    pub x: i64,
    pub y: i64,
    pub size: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub headless: bool,
    pub muted: bool,
    pub extension_path: Option<String>,
    pub window: Option<WindowPlacement>,
}

impl LaunchOptions {
    /// Mini player gets a small window in the corner; a normal visible window is brought on-screen.
    pub fn for_player(headless: bool, muted: bool, mini: bool, extension_path: Option<String>) -> Self {
        let window = if headless {
            None
        } else if mini {
            Some(WindowPlacement {
                x: 20,
                y: 20,
                size: Some((360, 360)),
            })
        } else {
            Some(WindowPlacement {
                x: 60,
                y: 60,
                size: None,
            })
        };
        Self {
            headless,
            muted,
            extension_path,
            window,
        }
    }
}

/// One remote-controlled browser. Every call may fail; callers decide how to recover.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn add_cookie(&self, cookie: &BrowserCookie) -> Result<()>;
    /// Every cookie visible to the current page.
    async fn get_cookies(&self) -> Result<Vec<BrowserCookie>>;
    async fn execute_script(&self, script: &str, args: Vec<Value>) -> Result<Value>;
    /// Runs a script whose last argument is a completion callback.
    async fn execute_async_script(
        &self,
        script: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value>;
    /// Visible text of the document body.
    async fn body_text(&self) -> Result<String>;
    async fn set_window_rect(&self, x: i64, y: i64, width: u32, height: u32) -> Result<()>;
    async fn quit(&self) -> Result<()>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>>;
}

/// Launches Chrome sessions through a running WebDriver server (chromedriver).
pub struct WebDriverLauncher {
    server_url: String,
}

impl WebDriverLauncher {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
        }
    }

    fn chrome_args(options: &LaunchOptions) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-blink-features=AutomationControlled".to_string(),
            "--log-level=3".to_string(),
            "--silent".to_string(),
        ];
        if options.headless {
            args.push("--headless=new".to_string());
            args.push("--disable-gpu".to_string());
        } else {
            args.push("--window-size=1280,800".to_string());
        }
        if options.muted {
            args.push("--mute-audio".to_string());
        }
        if let Some(ext) = &options.extension_path {
            if !ext.to_lowercase().ends_with(".crx") {
                args.push(format!("--load-extension={}", ext));
            }
        }
        args
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>> {
        let mut caps = DesiredCapabilities::chrome();
        for arg in Self::chrome_args(options) {
            if let Err(e) = caps.add_arg(&arg) {
                warn!("[BROWSER] Failed to add Chrome arg '{}': {:?}", arg, e);
            }
        }
        if let Some(ext) = &options.extension_path {
            if ext.to_lowercase().ends_with(".crx") {
                if let Err(e) = caps.add_extension(std::path::Path::new(ext)) {
                    warn!("[BROWSER] Failed to add extension '{}': {:?}", ext, e);
                }
            }
        }

        let driver = WebDriver::new(&self.server_url, caps)
            .await
            .with_context(|| format!("Failed to start WebDriver session at {}", self.server_url))?;
        debug!("[BROWSER] Session started via {}", self.server_url);

        let session = WebDriverSession { driver };
        if let Some(window) = options.window {
            let (width, height) = window.size.unwrap_or((1280, 800));
            if let Err(e) = session.set_window_rect(window.x, window.y, width, height).await {
                debug!("[BROWSER] Failed to place window: {:?}", e);
            }
        }
        Ok(Box::new(session))
    }
}

pub struct WebDriverSession {
    driver: WebDriver,
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.driver.goto(url).await?;
        Ok(())
    }

    async fn add_cookie(&self, cookie: &BrowserCookie) -> Result<()> {
        let mut wd_cookie = Cookie::new(cookie.name.clone(), cookie.value.clone());
        wd_cookie.domain = cookie.domain.clone();
        wd_cookie.path = cookie.path.clone();
        wd_cookie.secure = Some(cookie.secure);
        wd_cookie.expiry = cookie.expiry;
        self.driver.add_cookie(wd_cookie).await?;
        Ok(())
    }

    async fn get_cookies(&self) -> Result<Vec<BrowserCookie>> {
        let cookies = self.driver.get_all_cookies().await?;
        Ok(cookies
            .into_iter()
            .map(|c| BrowserCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure.unwrap_or(false),
                expiry: c.expiry,
            })
            .collect())
    }

    async fn execute_script(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        let ret = self.driver.execute(script, args).await?;
        Ok(ret.json().clone())
    }

    async fn execute_async_script(
        &self,
        script: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let timeouts = TimeoutConfiguration::new(Some(timeout), None, None);
        if let Err(e) = self.driver.update_timeouts(timeouts).await {
            debug!("[BROWSER] Failed to set script timeout: {:?}", e);
        }
        let ret = tokio::time::timeout(
            timeout + Duration::from_secs(2),
            self.driver.execute_async(script, args),
        )
        .await
        .context("Async script timed out")??;
        Ok(ret.json().clone())
    }

    async fn body_text(&self) -> Result<String> {
        let body = self.driver.find(By::Tag("body")).await?;
        Ok(body.text().await?)
    }

    async fn set_window_rect(&self, x: i64, y: i64, width: u32, height: u32) -> Result<()> {
        self.driver.set_window_rect(x, y, width, height).await?;
        Ok(())
    }

    async fn quit(&self) -> Result<()> {
        self.driver.clone().quit().await?;
        Ok(())
    }
}

/// Starts a local chromedriver listening on the port of `server_url`. Killed when the handle drops.
pub fn start_driver_process(driver_path: &str, server_url: &str) -> Result<Child> {
    let port = Url::parse(server_url)
        .ok()
        .and_then(|u| u.port_or_known_default())
        .unwrap_or(DEFAULT_DRIVER_PORT);
    let child = Command::new(driver_path)
        .arg(format!("--port={}", port))
        .arg("--silent")
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start chromedriver at {}", driver_path))?;
    debug!("[BROWSER] chromedriver started on port {}", port);
    Ok(child)
}
