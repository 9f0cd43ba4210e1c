use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{info, warn};
use std::fmt;
use std::fs::File;
use std::io::prelude::*;

/// 会话密钥的最小长度（字节）
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_addr")]
    addr: String,
    #[serde(default = "default_dsn")]
    dsn: String,
    #[serde(default)]
    secret: String,
    #[serde(default = "default_template_dir")]
    template_dir: String,
    #[serde(default)]
    worker_threads: usize,
    #[serde(default = "default_secure_cookie")]
    secure_cookie: bool,
    #[serde(default = "default_session_lifetime_hours")]
    session_lifetime_hours: i64,
    #[serde(default = "default_max_request_bytes")]
    max_request_bytes: usize,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "cannot read configuration file: {}", e),
            ConfigError::Parse(e) => write!(f, "cannot parse configuration file: {}", e),
            ConfigError::Invalid(reason) => write!(f, "invalid configuration: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}

fn default_addr() -> String {
    "127.0.0.1:4000".to_string()
}

fn default_dsn() -> String {
    "memory://".to_string()
}

fn default_template_dir() -> String {
    "./ui/html/".to_string()
}

fn default_secure_cookie() -> bool {
    true
}

fn default_session_lifetime_hours() -> i64 {
    12
}

fn default_max_request_bytes() -> usize {
    1048576 // 1MB
}

impl Config {
    pub fn from_toml(filename: &str) -> Result<Self, ConfigError> {
        let mut file = File::open(filename).map_err(ConfigError::Io)?;
        let mut str_val = String::new();
        file.read_to_string(&mut str_val).map_err(ConfigError::Io)?;
        Self::from_toml_str(&str_val)
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Self::parse(source, |key| std::env::var(key).ok())
    }

    fn parse<F>(source: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut raw_config: Config = toml::from_str(source).map_err(ConfigError::Parse)?;
        raw_config.apply_env(env);
        raw_config.normalize()?;
        Ok(raw_config)
    }

    /// 环境变量覆盖文件中的网络地址、连接串与会话密钥
    fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = env("SNIPPETBOX_ADDR") {
            info!("使用环境变量SNIPPETBOX_ADDR覆盖监听地址");
            self.addr = addr;
        }
        if let Some(dsn) = env("SNIPPETBOX_DSN") {
            info!("使用环境变量SNIPPETBOX_DSN覆盖数据源");
            self.dsn = dsn;
        }
        if let Some(secret) = env("SNIPPETBOX_SECRET") {
            info!("使用环境变量SNIPPETBOX_SECRET覆盖会话密钥");
            self.secret = secret;
        }
    }

    fn normalize(&mut self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get();
        }
        if self.secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid(format!(
                "secret must be at least {} bytes long",
                MIN_SECRET_LEN
            )));
        }
        if self.session_lifetime_hours <= 0 {
            warn!("session_lifetime_hours必须为正数，该值将被改为12。");
            self.session_lifetime_hours = default_session_lifetime_hours();
        }
        if self.max_request_bytes == 0 {
            warn!("max_request_bytes被设置为0，该值将被改为1MB。");
            self.max_request_bytes = default_max_request_bytes();
        }
        Ok(())
    }
}

impl Config {
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn template_dir(&self) -> &str {
        &self.template_dir
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn secure_cookie(&self) -> bool {
        self.secure_cookie
    }

    pub fn session_lifetime_hours(&self) -> i64 {
        self.session_lifetime_hours
    }

    pub fn max_request_bytes(&self) -> usize {
        self.max_request_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "sI3WqH$@Hg!DsCX*^TyHGf@!#xXcBNK%";

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = Config::from_toml_str(&format!("secret = \"{}\"", SECRET)).unwrap();
        assert_eq!(config.template_dir(), "./ui/html/");
        assert_eq!(config.session_lifetime_hours(), 12);
        assert!(config.secure_cookie());
        assert!(config.worker_threads() > 0);
        assert_eq!(config.max_request_bytes(), 1048576);
    }

    #[test]
    fn test_short_secret_rejected() {
        let result = Config::from_toml_str("secret = \"short\"");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_secret_is_invalid() {
        let result = Config::parse("addr = \"0.0.0.0:4000\"", |_| None);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_secret_from_environment_only() {
        let config = Config::parse("addr = \"0.0.0.0:4000\"", |key| match key {
            "SNIPPETBOX_SECRET" => Some(SECRET.to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.secret(), SECRET);
        assert_eq!(config.addr(), "0.0.0.0:4000");
    }

    #[test]
    fn test_environment_overrides_file() {
        let source = format!("addr = \"0.0.0.0:4000\"\nsecret = \"{}\"", "x".repeat(40));
        let config = Config::parse(&source, |key| match key {
            "SNIPPETBOX_ADDR" => Some("127.0.0.1:9000".to_string()),
            "SNIPPETBOX_SECRET" => Some(SECRET.to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.addr(), "127.0.0.1:9000");
        assert_eq!(config.secret(), SECRET);
        assert_eq!(config.dsn(), "memory://");
    }

    #[test]
    fn test_non_positive_lifetime_reset() {
        let source = format!("secret = \"{}\"\nsession_lifetime_hours = 0", SECRET);
        let config = Config::from_toml_str(&source).unwrap();
        assert_eq!(config.session_lifetime_hours(), 12);
    }
}
