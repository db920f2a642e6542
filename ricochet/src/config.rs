//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable
//! overrides. The file path defaults to `config.yaml` and can be set with
//! the `-f` flag or the `RICOCHET_CONFIG` environment variable.
//!
//! ## Loading Priority
//!
//! Later sources override earlier ones:
//!
//! 1. **YAML config file** - base configuration
//! 2. **Environment variables** - `RICOCHET_`-prefixed; nested values use
//!    double underscores (`RICOCHET_CACHE__PATH=/tmp/r.db`)
//!
//! ## Example
//!
//! ```yaml
//! host: 0.0.0.0
//! port: 8500
//! admin_port: 8888
//! mode: spy
//! cache:
//!   path: ./ricochet.db
//! journal:
//!   capacity: 1000
//! middleware:
//!   binary: ./middleware.py
//!   timeout: 2s
//! request_deadline: 30s
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::errors::{Error, Result};
use crate::middleware::{Middleware, MiddlewareSpec};
use crate::modes::Mode;

/// Simple CLI args - just for specifying the config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "RICOCHET_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the proxy.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address both listeners bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Proxy (traffic) port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Admin API port.
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,
    /// Mode the dispatcher starts in.
    #[serde(default)]
    pub mode: Mode,
    /// Optional chained proxy for upstream forwarding.
    #[serde(default)]
    pub upstream_proxy: Option<Url>,
    #[serde(default)]
    pub middleware: Option<MiddlewareConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    /// Deadline for one whole exchange, simulated delays included.
    #[serde(default = "default_deadline", with = "humantime_serde")]
    pub request_deadline: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: default_host(),
            port: default_port(),
            admin_port: default_admin_port(),
            mode: Mode::default(),
            upstream_proxy: None,
            middleware: None,
            cache: CacheConfig::default(),
            journal: JournalConfig::default(),
            hooks: HooksConfig::default(),
            request_deadline: default_deadline(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    /// Local executable invoked with the pair on stdin.
    #[serde(default)]
    pub binary: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Remote middleware endpoint POSTed the pair as JSON.
    #[serde(default)]
    pub remote: Option<Url>,
    #[serde(default = "default_middleware_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl MiddlewareConfig {
    pub fn build(&self) -> Result<Middleware> {
        let spec = match (&self.binary, &self.remote) {
            (Some(command), None) => MiddlewareSpec::Binary {
                command: command.clone(),
                args: self.args.clone(),
            },
            (None, Some(url)) => MiddlewareSpec::Remote { url: url.clone() },
            (Some(_), Some(_)) => {
                return Err(Error::config("middleware must be binary or remote, not both"));
            }
            (None, None) => {
                return Err(Error::config("middleware section needs a binary or a remote url"));
            }
        };
        Ok(Middleware::new(spec, self.timeout))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache database file, opened once per process.
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            path: default_cache_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default = "default_journal_capacity")]
    pub capacity: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        JournalConfig {
            capacity: default_journal_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HooksConfig {
    /// Queued hooks beyond this drop the oldest.
    #[serde(default = "default_hook_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_hook_workers")]
    pub workers: usize,
}

impl Default for HooksConfig {
    fn default() -> Self {
        HooksConfig {
            queue_capacity: default_hook_capacity(),
            workers: default_hook_workers(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8500
}
fn default_admin_port() -> u16 {
    8888
}
fn default_deadline() -> Duration {
    Duration::from_secs(30)
}
fn default_middleware_timeout() -> Duration {
    Duration::from_secs(2)
}
fn default_cache_path() -> PathBuf {
    PathBuf::from("ricochet.db")
}
fn default_journal_capacity() -> usize {
    1_000
}
fn default_hook_capacity() -> usize {
    256
}
fn default_hook_workers() -> usize {
    4
}

impl Config {
    pub fn load(args: &Args) -> Result<Self> {
        let config: Self = Self::figment(args)
            .extract()
            .map_err(|e| Error::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("RICOCHET_").split("__"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == self.admin_port {
            return Err(Error::config("proxy and admin ports must differ"));
        }
        if let Some(middleware) = &self.middleware {
            // Surfaces bad combinations at startup instead of first use
            middleware.build()?;
        }
        if self.journal.capacity == 0 {
            return Err(Error::config("journal capacity must be at least 1"));
        }
        Ok(())
    }

    /// The shared upstream client: no redirect following (the client being
    /// proxied decides what to do with a 3xx), optional chained proxy.
    pub fn upstream_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
        if let Some(proxy) = &self.upstream_proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy.clone()).map_err(|e| Error::config(format!("bad upstream proxy: {e}")))?,
            );
        }
        builder
            .build()
            .map_err(|e| Error::config(format!("could not build upstream client: {e}")))
    }

    pub fn build_middleware(&self) -> Result<Option<Arc<Middleware>>> {
        match &self.middleware {
            Some(config) => Ok(Some(Arc::new(config.build()?))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
        }
    }

    #[test]
    fn defaults_apply_without_a_config_file() {
        Jail::expect_with(|_jail| {
            let config = Config::load(&args("missing.yaml")).expect("defaults should load");
            assert_eq!(config.port, 8500);
            assert_eq!(config.admin_port, 8888);
            assert_eq!(config.mode, Mode::Simulate);
            assert_eq!(config.request_deadline, Duration::from_secs(30));
            Ok(())
        });
    }

    #[test]
    fn yaml_values_load_and_env_overrides_win() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r#"
                port: 9000
                mode: spy
                cache:
                  path: ./from-yaml.db
                request_deadline: 5s
                "#,
            )?;
            jail.set_env("RICOCHET_CACHE__PATH", "./from-env.db");

            let config = Config::load(&args("config.yaml")).expect("config should load");
            assert_eq!(config.port, 9000);
            assert_eq!(config.mode, Mode::Spy);
            assert_eq!(config.cache.path, PathBuf::from("./from-env.db"));
            assert_eq!(config.request_deadline, Duration::from_secs(5));
            Ok(())
        });
    }

    #[test]
    fn clashing_ports_fail_validation() {
        let config = Config {
            port: 8500,
            admin_port: 8500,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn middleware_needs_exactly_one_variant() {
        let both = MiddlewareConfig {
            binary: Some("./mw.sh".to_string()),
            args: vec![],
            remote: Some(Url::parse("http://localhost:9999").unwrap()),
            timeout: Duration::from_secs(1),
        };
        assert!(both.build().is_err());

        let neither = MiddlewareConfig {
            binary: None,
            args: vec![],
            remote: None,
            timeout: Duration::from_secs(1),
        };
        assert!(neither.build().is_err());

        let binary = MiddlewareConfig {
            binary: Some("./mw.sh".to_string()),
            args: vec!["--flag".to_string()],
            remote: None,
            timeout: Duration::from_secs(1),
        };
        assert!(binary.build().is_ok());
    }
}
