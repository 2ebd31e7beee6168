/// Configuration management for the API server
///
/// Loaded once from environment variables (and `.env` in development).
///
/// # Environment Variables
///
/// - `API_HOST` / `API_PORT`: bind address (default `0.0.0.0:8080`)
/// - `CORS_ORIGINS`: comma-separated origins, `*` for permissive (default `*`)
/// - `PRODUCTION`: enables HSTS and `Secure` cookies (default `false`)
/// - `PUBLIC_BASE_URL`: used to build proxy entry URLs (default `http://localhost:8080`)
/// - `DATABASE_URL` (required), `DATABASE_MAX_CONNECTIONS` (default 10)
/// - `JWT_SECRET` (required, at least 32 characters)
/// - `MODULE_TOKEN_TTL_SECS` (default 3600), `MODULE_TOKEN_MAX_TTL_SECS` (default 604800)
/// - `REDIS_URL` (required), `UPLOAD_SESSION_TTL_SECS` (default 3600),
///   `UPLOAD_MAX_BYTES` (default 512 MiB)
/// - `PROXY_TIMEOUT_SECS` (default 60)
/// - `ACCESS_DENIED_URL` (default `/access-denied`)
/// - `GATED_HOSTS`: `host=module` pairs, comma-separated
/// - `<SLUG>_SERVICE_URL`: backend base URL per module, e.g.
///   `STABLE_DIFFUSION_SERVICE_URL` for slug `stable-diffusion`
///
/// # Example
///
/// ```no_run
/// use iahome_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

const SERVICE_URL_SUFFIX: &str = "_SERVICE_URL";

/// 512 MiB
pub const DEFAULT_UPLOAD_MAX_BYTES: u64 = 512 * 1024 * 1024;

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub redis: RedisSettings,
    pub proxy: ProxyConfig,
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,

    /// Allowed CORS origins; `*` means permissive
    pub cors_origins: Vec<String>,

    /// Production mode (HSTS, `Secure` cookies)
    pub production: bool,

    /// Externally visible base URL, without trailing slash
    pub public_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Signing configuration for session and module tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Shared HS256 secret; at least 32 bytes
    pub secret: String,

    pub module_token_ttl_secs: i64,
    pub module_token_max_ttl_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    pub url: String,
    pub upload_session_ttl_secs: u64,

    /// Largest assembled upload
    pub upload_max_bytes: u64,
}

/// Proxy forwarder and edge gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Upstream request timeout
    pub timeout_secs: u64,

    /// Where the edge gate sends navigations that carry no token
    pub access_denied_url: String,

    /// Lowercased host (no port) → module slug
    pub gated_hosts: HashMap<String, String>,

    /// Module slug → backend base URL, from `<SLUG>_SERVICE_URL`
    pub service_urls: HashMap<String, String>,
}

impl ProxyConfig {
    /// Configured backend for a module, if any
    pub fn service_url(&self, slug: &str) -> Option<&str> {
        self.service_urls.get(slug).map(String::as_str)
    }

    /// Module served on `host` (a `Host` header value, port allowed)
    pub fn gated_module(&self, host: &str) -> Option<&str> {
        let host = host.split(':').next().unwrap_or(host).to_ascii_lowercase();
        self.gated_hosts.get(&host).map(String::as_str)
    }
}

/// Parses `host=module,host2=module2`; malformed pairs are skipped
pub fn parse_gated_hosts(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (host, module) = pair.split_once('=')?;
            let (host, module) = (host.trim(), module.trim());
            if host.is_empty() || module.is_empty() {
                tracing::warn!(pair, "Ignoring malformed GATED_HOSTS entry");
                return None;
            }
            Some((host.to_ascii_lowercase(), module.to_string()))
        })
        .collect()
}

/// Maps `<SLUG>_SERVICE_URL` variables to `slug → url`
///
/// The variable prefix is lowercased and underscores become dashes.
pub fn collect_service_urls<I>(vars: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| {
            let prefix = key.strip_suffix(SERVICE_URL_SUFFIX)?;
            if prefix.is_empty() || value.trim().is_empty() {
                return None;
            }
            let slug = prefix.to_ascii_lowercase().replace('_', "-");
            Some((slug, value.trim().trim_end_matches('/').to_string()))
        })
        .collect()
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value: {}", key, e)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Fails when a required variable is missing, a value does not parse,
    /// or `JWT_SECRET` is shorter than 32 characters.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?;
        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 characters long");
        }

        let redis_url = env::var("REDIS_URL")
            .map_err(|_| anyhow::anyhow!("REDIS_URL environment variable is required"))?;

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            api: ApiConfig {
                host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("API_PORT", 8080)?,
                cors_origins,
                production: env_or("PRODUCTION", false)?,
                public_base_url,
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            jwt: JwtConfig {
                secret: jwt_secret,
                module_token_ttl_secs: env_or("MODULE_TOKEN_TTL_SECS", 3600)?,
                module_token_max_ttl_secs: env_or("MODULE_TOKEN_MAX_TTL_SECS", 7 * 24 * 3600)?,
            },
            redis: RedisSettings {
                url: redis_url,
                upload_session_ttl_secs: env_or("UPLOAD_SESSION_TTL_SECS", 3600)?,
                upload_max_bytes: env_or("UPLOAD_MAX_BYTES", DEFAULT_UPLOAD_MAX_BYTES)?,
            },
            proxy: ProxyConfig {
                timeout_secs: env_or("PROXY_TIMEOUT_SECS", 60)?,
                access_denied_url: env::var("ACCESS_DENIED_URL")
                    .unwrap_or_else(|_| "/access-denied".to_string()),
                gated_hosts: parse_gated_hosts(&env::var("GATED_HOSTS").unwrap_or_default()),
                service_urls: collect_service_urls(env::vars()),
            },
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gated_hosts() {
        let hosts = parse_gated_hosts("Whisper.iahome.fr=whisper, sd.iahome.fr = stablediffusion,bad,=x");
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts["whisper.iahome.fr"], "whisper");
        assert_eq!(hosts["sd.iahome.fr"], "stablediffusion");

        assert!(parse_gated_hosts("").is_empty());
    }

    #[test]
    fn test_gated_module_ignores_port_and_case() {
        let proxy = ProxyConfig {
            timeout_secs: 60,
            access_denied_url: "/access-denied".to_string(),
            gated_hosts: parse_gated_hosts("whisper.iahome.fr=whisper"),
            service_urls: HashMap::new(),
        };

        assert_eq!(proxy.gated_module("WHISPER.iahome.fr:443"), Some("whisper"));
        assert_eq!(proxy.gated_module("iahome.fr"), None);
    }

    #[test]
    fn test_collect_service_urls() {
        let urls = collect_service_urls(vec![
            ("WHISPER_SERVICE_URL".to_string(), "http://whisper:8092/".to_string()),
            ("STABLE_DIFFUSION_SERVICE_URL".to_string(), "http://sd:7860".to_string()),
            ("_SERVICE_URL".to_string(), "http://nope".to_string()),
            ("EMPTY_SERVICE_URL".to_string(), " ".to_string()),
            ("DATABASE_URL".to_string(), "postgres://x".to_string()),
        ]);

        assert_eq!(urls.len(), 2);
        assert_eq!(urls["whisper"], "http://whisper:8092");
        assert_eq!(urls["stable-diffusion"], "http://sd:7860");
    }

    #[test]
    fn test_bind_address() {
        let config = Config {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                cors_origins: vec!["*".to_string()],
                production: false,
                public_base_url: "http://localhost:8080".to_string(),
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/test".to_string(),
                max_connections: 10,
            },
            jwt: JwtConfig {
                secret: "test-secret-key-at-least-32-bytes-long".to_string(),
                module_token_ttl_secs: 3600,
                module_token_max_ttl_secs: 604800,
            },
            redis: RedisSettings {
                url: "redis://localhost:6379".to_string(),
                upload_session_ttl_secs: 3600,
                upload_max_bytes: DEFAULT_UPLOAD_MAX_BYTES,
            },
            proxy: ProxyConfig {
                timeout_secs: 60,
                access_denied_url: "/access-denied".to_string(),
                gated_hosts: HashMap::new(),
                service_urls: HashMap::new(),
            },
        };

        assert_eq!(config.bind_address(), "127.0.0.1:8080");
    }
}
