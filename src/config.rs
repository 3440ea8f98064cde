//! Configuration parsing and validation for the gateway binary
//!
//! Credentials come from the environment (`KIMI_TOKENS`, comma-separated);
//! the rest is ordinary command-line flags with env fallbacks.
use anyhow::anyhow;
use clap::Parser;
use url::Url;

#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// The port on which the gateway will listen.
    #[arg(short = 'p', long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Kimi access tokens, rotated round-robin across backend calls.
    #[arg(
        long,
        env = "KIMI_TOKENS",
        value_delimiter = ',',
        hide_env_values = true
    )]
    pub tokens: Vec<String>,

    /// Base URL of the Kimi backend.
    #[arg(long, env = "KIMI_BASE_URL", default_value = "https://www.kimi.com")]
    pub base_url: Url,
}

impl Config {
    pub fn validate(self) -> Result<Self, anyhow::Error> {
        if self.tokens.iter().all(|t| t.trim().is_empty()) {
            return Err(anyhow!(
                "no Kimi tokens configured; set KIMI_TOKENS to a comma-separated token list"
            ));
        }
        Ok(self)
    }
}
