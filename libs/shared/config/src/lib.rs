use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Supabase,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "supabase" | "postgrest" => Ok(StorageBackend::Supabase),
            "memory" | "in-memory" | "in_memory" => Ok(StorageBackend::Memory),
            other => Err(format!("Unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
    pub supabase_jwt_secret: String,
    pub storage_backend: StorageBackend,
    pub redis_url: Option<String>,
    pub notification_webhook_url: Option<String>,
    pub notification_timeout_ms: u64,
    pub materialization_max_attempts: u32,
    pub reconcile_max_attempts: u32,
    pub open_slots_cache_ttl_secs: u64,
    pub server_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_service_role_key: String::new(),
            supabase_jwt_secret: String::new(),
            storage_backend: StorageBackend::Memory,
            redis_url: None,
            notification_webhook_url: None,
            notification_timeout_ms: 5_000,
            materialization_max_attempts: 2,
            reconcile_max_attempts: 3,
            open_slots_cache_ttl_secs: 60,
            server_port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let supabase_url = env::var("SUPABASE_URL")
            .unwrap_or_else(|_| {
                warn!("SUPABASE_URL not set, using empty value");
                String::new()
            });
        let supabase_anon_key = env::var("SUPABASE_ANON_PUBLIC_KEY")
            .unwrap_or_else(|_| {
                warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                String::new()
            });
        let supabase_service_role_key = env::var("SUPABASE_SERVICE_ROLE_KEY")
            .unwrap_or_else(|_| {
                warn!("SUPABASE_SERVICE_ROLE_KEY not set, falling back to anon key");
                supabase_anon_key.clone()
            });
        let supabase_jwt_secret = env::var("SUPABASE_JWT_SECRET")
            .unwrap_or_else(|_| {
                warn!("SUPABASE_JWT_SECRET not set, using empty value");
                String::new()
            });

        let storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse().unwrap_or_else(|e: String| {
                warn!("{}, using in-memory storage", e);
                StorageBackend::Memory
            }),
            Err(_) if !supabase_url.is_empty() && !supabase_anon_key.is_empty() => {
                StorageBackend::Supabase
            }
            Err(_) => {
                warn!("STORAGE_BACKEND not set and Supabase not configured, using in-memory storage");
                StorageBackend::Memory
            }
        };

        let config = Self {
            supabase_url,
            supabase_anon_key,
            supabase_service_role_key,
            supabase_jwt_secret,
            storage_backend,
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            notification_timeout_ms: parse_or_default(
                "NOTIFICATION_TIMEOUT_MS",
                defaults.notification_timeout_ms,
            ),
            materialization_max_attempts: parse_or_default(
                "MATERIALIZATION_MAX_ATTEMPTS",
                defaults.materialization_max_attempts,
            )
            .max(1),
            reconcile_max_attempts: parse_or_default(
                "RECONCILE_MAX_ATTEMPTS",
                defaults.reconcile_max_attempts,
            )
            .max(1),
            open_slots_cache_ttl_secs: parse_or_default(
                "OPEN_SLOTS_CACHE_TTL_SECS",
                defaults.open_slots_cache_ttl_secs,
            ),
            server_port: parse_or_default("SERVER_PORT", defaults.server_port),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_jwt_secret.is_empty()
            && (self.storage_backend == StorageBackend::Memory || self.is_supabase_configured())
    }

    pub fn is_supabase_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout_ms)
    }

    pub fn open_slots_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.open_slots_cache_ttl_secs)
    }
}

fn parse_or_default<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_backend_parses_known_names() {
        assert_eq!("supabase".parse::<StorageBackend>(), Ok(StorageBackend::Supabase));
        assert_eq!("Memory".parse::<StorageBackend>(), Ok(StorageBackend::Memory));
        assert!("sqlite".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn default_config_uses_memory_and_single_retry() {
        let config = AppConfig::default();
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert_eq!(config.materialization_max_attempts, 2);
        assert!(!config.is_supabase_configured());
        assert_eq!(config.notification_timeout(), Duration::from_secs(5));
    }
}
