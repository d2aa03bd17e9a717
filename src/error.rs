use std::io;

#[allow(clippy::enum_variant_names)]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    // from
    #[error("failed io {0}")]
    Io(#[from] io::Error),
    #[error("failed to decode toml {0}")]
    TomlDecode(#[from] toml::de::Error),
    #[error("failed to handle json {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse url {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to build http client {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("failed to watch config {0}")]
    Notify(#[from] notify::Error),

    // domain
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid bucket name {0:?}")]
    InvalidBucketName(String),
    #[error("corrupted cache entry {0}")]
    Corrupted(String),
    #[error("only GET requests can be cached, got {0}")]
    NotCacheable(String),
    #[error("install {version} failed: {reason}")]
    Install { version: String, reason: String },
    #[error("unknown control message {0:?}")]
    UnknownMessage(String),
}

pub type Result<T, E = Error> = anyhow::Result<T, E>;
