use log::{error, info, warn};
use models::settings::Settings;
use services::browser_service::{start_driver_process, LaunchOptions, WebDriverLauncher};
use services::channel_api_service::ChannelApiService;
use services::cookie_jar_service::{capture_cookies, FileCookieStore};
use services::diagnostic_logger::{init_logging, Diagnostics};
use services::queue_service::{QueueManager, QueueStatus};
use services::settings_service::SettingsStore;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use utils::channel_url::domain_from_url;

mod models;
mod services;
mod utils;

#[tokio::main]
async fn main() {
    let store = match SettingsStore::in_app_dir() {
        Ok(store) => store,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            std::process::exit(1);
        }
    };
    let settings = store.load();
    init_logging(settings.debug);
    info!("[MAIN] Settings loaded from {:?}", store.path());

    let diagnostics = Diagnostics::from_debug_flag(settings.debug);

    let cookies = match FileCookieStore::in_app_dir() {
        Ok(cookies) => cookies,
        Err(e) => {
            error!("[MAIN] ❌ {:#}", e);
            std::process::exit(1);
        }
    };

    // Keep the driver alive for the whole run; it is killed on drop.
    let _driver = match settings.driver_path.as_deref() {
        Some(path) => match start_driver_process(path, &settings.webdriver_url) {
            Ok(child) => Some(child),
            Err(e) => {
                warn!("[MAIN] ⚠️ {:#}, expecting a driver at {}", e, settings.webdriver_url);
                None
            }
        },
        None => None,
    };

    let launcher = Arc::new(WebDriverLauncher::new(settings.webdriver_url.clone()));

    if std::env::args().any(|arg| arg == "--sign-in") {
        sign_in(&settings, launcher.as_ref(), &cookies).await;
        return;
    }

    let probe = Arc::new(ChannelApiService::new(
        settings.platform_host.clone(),
        diagnostics.clone(),
    ));
    let auto_start = settings.auto_start;

    let mut manager = QueueManager::new(
        settings,
        store,
        launcher,
        Arc::new(cookies),
        probe,
        diagnostics,
    );

    if auto_start || manager.has_unfinished() {
        manager.start_all_in_order().await;
        log_status(&manager.status());
    } else {
        info!("[MAIN] Nothing queued, add channels to the config file");
    }

    manager
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("[MAIN] Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    let status = manager.status();
    let finished = manager
        .settings()
        .items
        .iter()
        .filter(|entry| entry.finished)
        .count();
    info!(
        "[MAIN] 🛑 Stopped at {}: {}/{} entries finished",
        status.last_update.format("%Y-%m-%d %H:%M:%S"),
        finished,
        status.entries.len()
    );
}

fn log_status(status: &QueueStatus) {
    match (&status.current_index, &status.current_channel) {
        (Some(idx), Some(channel)) => info!(
            "[MAIN] ▶️ Entry {} playing {} ({}s)",
            idx + 1,
            channel,
            status.current_elapsed_seconds
        ),
        _ if status.queue_running => info!("[MAIN] ⏳ Queue waiting for a live channel"),
        _ => info!("[MAIN] Queue idle"),
    }
}

/// Opens one browser per queued domain so the user can sign in, then saves its cookies.
async fn sign_in(settings: &Settings, launcher: &WebDriverLauncher, cookies: &FileCookieStore) {
    let mut seen: Vec<String> = Vec::new();
    for entry in &settings.items {
        let Some(domain) = domain_from_url(&entry.channel_url) else {
            continue;
        };
        if seen.contains(&domain) {
            continue;
        }
        seen.push(domain.clone());

        let options = LaunchOptions::for_player(
            false,
            settings.mute,
            false,
            settings.extension_path.clone(),
        );
        let signed_in = async {
            println!("Sign in to {} in the browser, then press Enter here", domain);
            let mut line = String::new();
            if let Err(e) = BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
                warn!("[MAIN] Failed to read from stdin: {}", e);
            }
        };
        match capture_cookies(launcher, cookies, &entry.channel_url, &options, signed_in).await {
            Ok(count) => info!("[MAIN] ✅ Saved {} cookies for {}", count, domain),
            Err(e) => error!("[MAIN] ❌ Sign-in for {} failed: {:#}", domain, e),
        }
    }

    if seen.is_empty() {
        info!("[MAIN] Nothing queued, add channels to the config file");
    }
}
