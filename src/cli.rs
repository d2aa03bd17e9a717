use clap::Parser;

use crate::{config::Settings, error::Result};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", default_value = "./config.toml")]
    pub config: String,

    /// Overrides the cache version from the config file
    #[arg(long, value_name = "VERSION")]
    pub cache_version: Option<String>,
}

impl Cli {
    /// 应用命令行覆盖项，覆盖后重新校验
    pub fn apply(&self, mut settings: Settings) -> Result<Settings> {
        if let Some(version) = &self.cache_version {
            settings.cache.version = version.clone();
            settings.cache.validate()?;
        }
        Ok(settings)
    }

    pub fn load_settings(&self) -> Result<Settings> {
        self.apply(Settings::new(&self.config)?)
    }
}
