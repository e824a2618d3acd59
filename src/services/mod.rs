pub mod browser_service;
pub mod category_service;
pub mod channel_api_service;
pub mod cookie_jar_service;
pub mod diagnostic_logger;
pub mod fallback_service;
pub mod liveness_service;
pub mod player_service;
pub mod queue_service;
pub mod settings_service;
pub mod watch_session;
