use std::env;

use const_format::concatcp;

pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const OS: &str = env::consts::OS;
pub const ARCH: &str = env::consts::ARCH;
pub const COMPILER: &str = env!("TASTECACHE_COMPILER");
pub const COMMIT: &str = env!("TASTECACHE_COMMIT");

// control channel
pub const CONTROL_PREFIX: &str = "/__sw";
pub const MESSAGE_PATH: &str = concatcp!(CONTROL_PREFIX, "/message");
pub const EVENTS_PATH: &str = concatcp!(CONTROL_PREFIX, "/events");
pub const STATUS_PATH: &str = concatcp!(CONTROL_PREFIX, "/status");

/// 响应来源标记头
pub const CACHE_STATUS_HEADER: &str = "x-offline-cache";

// config defaults
pub const LOG_LEVEL_DEFAULT: &str = "info";
pub fn log_level_default() -> String {
    LOG_LEVEL_DEFAULT.to_string()
}

pub const LOG_FOLDER_DEFAULT: &str = "./logs";
pub fn log_folder_default() -> String {
    LOG_FOLDER_DEFAULT.to_string()
}

pub const IP_DEFAULT: &str = "127.0.0.1";
pub fn ip_default() -> String {
    IP_DEFAULT.to_string()
}

pub const PORT_DEFAULT: u16 = 8080;
pub fn port_default() -> u16 {
    PORT_DEFAULT
}

pub const TIMEOUT_DEFAULT: u16 = 75;
pub fn timeout_default() -> u16 {
    TIMEOUT_DEFAULT
}

pub const STORE_DEFAULT: &str = "./cache";
pub fn store_default() -> String {
    STORE_DEFAULT.to_string()
}

pub const ASSETS_DEFAULT: [&str; 3] = ["./", "./index.html", "./manifest.json"];
pub fn assets_default() -> Vec<String> {
    ASSETS_DEFAULT.map(|a| a.to_string()).to_vec()
}

pub const FETCH_TIMEOUT_DEFAULT: u16 = 30;
pub fn fetch_timeout_default() -> u16 {
    FETCH_TIMEOUT_DEFAULT
}

/// 请求体最大长度 10MB
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

pub fn true_default() -> bool {
    true
}
