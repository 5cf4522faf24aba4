use std::net::SocketAddr;

use serde::Deserialize;

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:5353".parse().unwrap()
}

fn default_positive_capacity() -> usize {
    dns_resolver::cache::DEFAULT_POSITIVE_CAPACITY
}

fn default_negative_capacity() -> usize {
    dns_resolver::cache::DEFAULT_NEGATIVE_CAPACITY
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_positive_capacity")]
    pub positive_capacity: usize,
    #[serde(default = "default_negative_capacity")]
    pub negative_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            positive_capacity: default_positive_capacity(),
            negative_capacity: default_negative_capacity(),
        }
    }
}

impl Settings {
    pub fn load(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let defaults = Self::default();
        let mut builder = config::Config::builder()
            .set_default("listen_addr", defaults.listen_addr.to_string())?
            .set_default("positive_capacity", defaults.positive_capacity as i64)?
            .set_default("negative_capacity", defaults.negative_capacity as i64)?;
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder.build()?.try_deserialize()
    }
}
