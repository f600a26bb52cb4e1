//! Configuration management
//!
//! Loading runs in a fixed order: read the raw document, check its
//! `apiVersion` against a [`VersionRegistry`] (converting older versions),
//! load any `env_files`, expand `${VAR}` placeholders, then parse with
//! figment and merge `DATA_PLATFORM_` environment overrides.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config_version::{CURRENT_CONFIG_VERSION, VersionRegistry};
use crate::providers::{QueryKind, SemanticKind, StorageKind};
use crate::toolkits::ToolkitsConfig;
use crate::{Error, Result};

/// Prefix for environment overrides, e.g. `DATA_PLATFORM_AUDIT__ENABLED`.
pub const ENV_PREFIX: &str = "DATA_PLATFORM_";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Config document version
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// Server identity
    pub server: ServerConfig,
    /// Environment files loaded before placeholder expansion
    pub env_files: Vec<String>,
    /// Caller authentication
    pub auth: AuthConfig,
    /// Self-issued token settings
    pub oauth: OAuthConfig,
    /// Backend instances per toolkit kind
    pub toolkits: ToolkitsConfig,
    /// Catalog provider selection
    pub semantic: SemanticConfig,
    /// Query engine provider selection
    pub query: ProviderSelection,
    /// Object store provider selection
    pub storage: ProviderSelection,
    /// Response enrichment
    pub injection: InjectionConfig,
    /// Call auditing
    pub audit: AuditConfig,
    /// Durable sessions
    pub sessions: SessionsConfig,
    /// Tool list visibility
    pub tools: ToolVisibilityConfig,
    /// Client-facing app metadata
    pub mcpapps: McpAppsConfig,
    /// Discovery-before-query workflow hints
    pub workflow: WorkflowConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_version: CURRENT_CONFIG_VERSION.to_string(),
            server: ServerConfig::default(),
            env_files: Vec::new(),
            auth: AuthConfig::default(),
            oauth: OAuthConfig::default(),
            toolkits: ToolkitsConfig::default(),
            semantic: SemanticConfig::default(),
            query: ProviderSelection::default(),
            storage: ProviderSelection::default(),
            injection: InjectionConfig::default(),
            audit: AuditConfig::default(),
            sessions: SessionsConfig::default(),
            tools: ToolVisibilityConfig::default(),
            mcpapps: McpAppsConfig::default(),
            workflow: WorkflowConfig::default(),
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct EnvFilesEnvelope {
    env_files: Vec<String>,
}

impl Config {
    /// Load configuration from a file (or defaults) plus environment
    /// overrides, then validate it.
    pub fn load(path: Option<&Path>, registry: &VersionRegistry) -> Result<Self> {
        let raw = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        p.display()
                    )));
                }
                std::fs::read_to_string(p)?
            }
            None => String::new(),
        };

        let expanded = Self::prepare(&raw, registry)?;
        let figment = Figment::new()
            .merge(Yaml::string(&expanded))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let config = Self::extract(&figment)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a raw document without environment overrides, then validate it.
    pub fn parse(raw: &str, registry: &VersionRegistry) -> Result<Self> {
        let expanded = Self::prepare(raw, registry)?;
        let config = Self::extract(&Figment::new().merge(Yaml::string(&expanded)))?;
        config.validate()?;
        Ok(config)
    }

    /// Version check, conversion, env files, then placeholder expansion.
    fn prepare(raw: &str, registry: &VersionRegistry) -> Result<String> {
        let info = registry.resolve_document(raw)?;
        let current = match &info.converter {
            Some(convert) if info.version != registry.current() => {
                info!(from = %info.version, to = %registry.current(), "Converting config");
                convert(raw)?
            }
            _ => raw.to_string(),
        };

        if let Ok(envelope) = serde_yaml::from_str::<EnvFilesEnvelope>(&current) {
            load_env_files(&envelope.env_files);
        }

        Ok(expand_env_vars(&current))
    }

    fn extract(figment: &Figment) -> Result<Self> {
        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        if config.api_version.is_empty() {
            config.api_version = CURRENT_CONFIG_VERSION.to_string();
        }
        Ok(config)
    }

    /// Check cross-field rules. Everything here is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        let semantic = SemanticKind::parse(&self.semantic.provider)?;
        let query = QueryKind::parse(&self.query.provider)?;
        let storage = StorageKind::parse(&self.storage.provider)?;

        self.toolkits.validate()?;

        if semantic != SemanticKind::Noop {
            self.toolkits.datahub.resolve(self.semantic.instance.as_deref())?;
        }
        if query != QueryKind::Noop {
            self.toolkits.trino.resolve(self.query.instance.as_deref())?;
        }
        if storage != StorageKind::Noop {
            self.toolkits.s3.resolve(self.storage.instance.as_deref())?;
        }

        if self.oauth.enabled && self.oauth.issuer.trim().is_empty() {
            return Err(Error::Config("oauth.issuer is required when oauth is enabled".into()));
        }
        if self.auth.oidc.enabled && self.auth.oidc.issuer.trim().is_empty() {
            return Err(Error::Config("auth.oidc.issuer is required when OIDC is enabled".into()));
        }
        if self.auth.api_keys.enabled {
            for (i, key) in self.auth.api_keys.keys.iter().enumerate() {
                if key.key.is_empty() || key.name.is_empty() {
                    return Err(Error::Config(format!(
                        "auth.api_keys.keys[{i}] needs both a name and a key"
                    )));
                }
            }
        }

        if self.audit.enabled && self.audit.retention_days == 0 {
            return Err(Error::Config("audit.retention_days must be at least 1".into()));
        }
        if self.sessions.ttl.is_zero() {
            return Err(Error::Config("sessions.ttl must be greater than zero".into()));
        }
        let dedup = &self.injection.session_dedup;
        if dedup.enabled && (dedup.entry_ttl.is_zero() || dedup.session_timeout.is_zero()) {
            return Err(Error::Config(
                "injection.session_dedup TTLs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Load environment files into the process environment.
/// Supports `~` expansion. Files that don't exist are silently skipped.
pub fn load_env_files(paths: &[String]) {
    for path_str in paths {
        let expanded = if path_str.starts_with('~') {
            if let Some(home) = dirs::home_dir() {
                path_str.replacen('~', &home.display().to_string(), 1)
            } else {
                path_str.clone()
            }
        } else {
            path_str.clone()
        };

        let path = Path::new(&expanded);
        if path.exists() {
            match dotenvy::from_path(path) {
                Ok(()) => info!("Loaded env file: {expanded}"),
                Err(e) => warn!("Failed to load env file {expanded}: {e}"),
            }
        } else {
            debug!("Env file not found (skipped): {expanded}");
        }
    }
}

/// Expand `${VAR}` and `${VAR:-default}` in raw config text. Unset
/// variables without a default expand to the empty string.
pub fn expand_env_vars(raw: &str) -> String {
    // Pattern cannot fail to compile.
    let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
        return raw.to_string();
    };
    re.replace_all(raw, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name reported to clients
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Transport label recorded in audit events
    pub transport: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "data-platform-gateway".to_string(),
            description: String::new(),
            transport: "stdio".to_string(),
        }
    }
}

/// Caller authentication
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// External identity provider tokens
    pub oidc: OidcAuthConfig,
    /// Static API keys
    pub api_keys: ApiKeyAuthConfig,
    /// Give unauthenticated callers a fixed anonymous identity
    pub allow_anonymous: bool,
}

/// OIDC authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcAuthConfig {
    /// Enable OIDC
    pub enabled: bool,
    /// Issuer URL
    pub issuer: String,
    /// OAuth client ID, accepted as an audience
    pub client_id: String,
    /// Expected audience
    pub audience: String,
    /// JWKS location; defaults to `<issuer>/.well-known/jwks.json`
    pub jwks_uri: Option<String>,
    /// Dot path to the roles claim
    pub role_claim_path: String,
    /// Keep only roles with this prefix
    pub role_prefix: String,
    /// Allowed clock skew
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
    /// Reject tokens issued longer ago than this
    #[serde(with = "humantime_serde::option")]
    pub max_token_age: Option<Duration>,
    /// How long fetched signing keys are cached
    #[serde(with = "humantime_serde")]
    pub jwks_cache_ttl: Duration,
}

impl Default for OidcAuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            issuer: String::new(),
            client_id: String::new(),
            audience: String::new(),
            jwks_uri: None,
            role_claim_path: "roles".to_string(),
            role_prefix: String::new(),
            clock_skew: Duration::from_secs(30),
            max_token_age: None,
            jwks_cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// Static API key authentication
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeyAuthConfig {
    /// Enable API keys
    pub enabled: bool,
    /// Configured keys
    pub keys: Vec<ApiKeyDef>,
}

/// One API key
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeyDef {
    /// Secret value
    pub key: String,
    /// Key owner name
    pub name: String,
    /// Roles granted to callers using this key
    pub roles: Vec<String>,
}

/// Self-issued token settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Accept self-issued tokens
    pub enabled: bool,
    /// Issuer written into and required from tokens
    pub issuer: String,
    /// Base64-encoded HMAC key; a random key is generated when empty
    pub signing_key: String,
    /// Lifetime of issued tokens
    #[serde(with = "humantime_serde")]
    pub token_ttl: Duration,
    /// Dot path to roles inside the nested `claims` object
    pub role_claim_path: String,
    /// Keep only roles with this prefix
    pub role_prefix: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            issuer: String::new(),
            signing_key: String::new(),
            token_ttl: Duration::from_secs(3600),
            role_claim_path: "roles".to_string(),
            role_prefix: String::new(),
        }
    }
}

/// Provider selection for one backend domain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSelection {
    /// Provider kind: a backend name, or `noop`
    pub provider: String,
    /// Instance to use; falls back to the kind's default
    pub instance: Option<String>,
}

impl Default for ProviderSelection {
    fn default() -> Self {
        Self {
            provider: "noop".to_string(),
            instance: None,
        }
    }
}

/// Catalog provider selection plus caching
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    /// Provider kind: `datahub` or `noop`
    pub provider: String,
    /// Instance to use
    pub instance: Option<String>,
    /// Lookup cache
    pub cache: CacheConfig,
}

/// Lookup cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable caching
    pub enabled: bool,
    /// Entry lifetime
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Response enrichment toggles
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionConfig {
    /// Catalog context on query engine results
    pub trino_semantic_enrichment: bool,
    /// Query availability on catalog results
    pub datahub_query_enrichment: bool,
    /// Catalog context on object store results
    pub s3_semantic_enrichment: bool,
    /// Storage availability on catalog results
    pub datahub_storage_enrichment: bool,
    /// Per-session dedup of enrichment blocks
    pub session_dedup: SessionDedupConfig,
}

impl InjectionConfig {
    /// Whether any enrichment is switched on.
    pub fn any_enabled(&self) -> bool {
        self.trino_semantic_enrichment
            || self.datahub_query_enrichment
            || self.s3_semantic_enrichment
            || self.datahub_storage_enrichment
    }
}

/// What to send for tables already enriched earlier in the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupMode {
    /// A short note pointing back to the earlier block
    #[default]
    Reference,
    /// Safety-relevant fields only
    Summary,
    /// Nothing
    None,
}

impl std::fmt::Display for DedupMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Reference => "reference",
            Self::Summary => "summary",
            Self::None => "none",
        })
    }
}

/// Session dedup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionDedupConfig {
    /// Enable dedup
    pub enabled: bool,
    /// Dedup mode
    pub mode: DedupMode,
    /// Freshness window of a mark
    #[serde(with = "humantime_serde")]
    pub entry_ttl: Duration,
    /// Idle window before a session is evicted
    #[serde(with = "humantime_serde")]
    pub session_timeout: Duration,
    /// Cleanup cadence
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for SessionDedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: DedupMode::Reference,
            entry_ttl: crate::dedup::DEFAULT_ENTRY_TTL,
            session_timeout: crate::dedup::DEFAULT_SESSION_TIMEOUT,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Call auditing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Enable the audit subsystem
    pub enabled: bool,
    /// Record tool calls (requires `enabled`)
    pub log_tool_calls: bool,
    /// Days to keep audit events
    pub retention_days: u32,
    /// Retention purge cadence
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl AuditConfig {
    /// Whether the audit stage belongs in the pipeline.
    pub fn records_tool_calls(&self) -> bool {
        self.enabled && self.log_tool_calls
    }

    /// Retention window.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 24 * 60 * 60)
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_tool_calls: false,
            retention_days: 90,
            cleanup_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Session store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStoreKind {
    /// In-process map
    #[default]
    Memory,
    /// JSON file on disk
    File,
}

/// Durable sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Store backend
    pub kind: SessionStoreKind,
    /// Session lifetime
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Expired-session purge cadence
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
    /// File path for the `file` store
    pub path: Option<PathBuf>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            kind: SessionStoreKind::Memory,
            ttl: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(60),
            path: None,
        }
    }
}

/// Tool list visibility
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolVisibilityConfig {
    /// Glob patterns of tools to show; empty shows everything
    pub allow: Vec<String>,
    /// Glob patterns of tools to hide, applied after `allow`
    pub deny: Vec<String>,
}

impl ToolVisibilityConfig {
    /// Whether any pattern is configured.
    pub fn is_active(&self) -> bool {
        !self.allow.is_empty() || !self.deny.is_empty()
    }
}

/// Client-facing app metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McpAppsConfig {
    /// Enable app metadata
    pub enabled: bool,
    /// Apps by name
    pub apps: BTreeMap<String, AppConfig>,
}

/// One app
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Enable this app
    pub enabled: bool,
    /// Tools rendered by this app
    pub tools: Vec<String>,
    /// UI resource; defaults to `ui://<app name>`
    pub resource_uri: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tools: Vec::new(),
            resource_uri: String::new(),
        }
    }
}

/// Discovery-before-query workflow hints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Warn when a session queries before any discovery call
    pub require_discovery_before_query: bool,
    /// Discovery tool names; built-in list when empty
    pub discovery_tools: Vec<String>,
    /// Query tool names; built-in list when empty
    pub query_tools: Vec<String>,
    /// Standard warning; built-in text when empty
    pub warning_message: String,
    /// Warnings before escalation
    pub escalation_after: u32,
    /// Escalated warning, `{count}` is replaced; built-in text when empty
    pub escalation_message: String,
    /// Idle window before a session's workflow state is dropped
    #[serde(with = "humantime_serde")]
    pub session_timeout: Duration,
    /// Cleanup cadence
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            require_discovery_before_query: false,
            discovery_tools: Vec::new(),
            query_tools: Vec::new(),
            warning_message: String::new(),
            escalation_after: 3,
            escalation_message: String::new(),
            session_timeout: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Humantime-style duration serialization
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    /// Parse `"100ms"`, `"30s"`, `"5m"`, `"2h"` or bare seconds.
    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let num = |v: &str| {
            v.trim()
                .parse::<u64>()
                .map_err(|e| format!("invalid duration {s:?}: {e}"))
        };
        if let Some(ms) = s.strip_suffix("ms") {
            num(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            num(secs).map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            num(mins).map(|m| Duration::from_secs(m * 60))
        } else if let Some(hours) = s.strip_suffix('h') {
            num(hours).map(|h| Duration::from_secs(h * 60 * 60))
        } else {
            num(s).map(Duration::from_secs)
        }
    }

    fn format(duration: &Duration) -> String {
        if duration.subsec_millis() != 0 || duration.as_secs() == 0 && !duration.is_zero() {
            format!("{}ms", duration.as_millis())
        } else {
            format!("{}s", duration.as_secs())
        }
    }

    /// Serialize Duration to human-readable string (e.g., "30s")
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(duration))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(s) => parse(&s).map_err(serde::de::Error::custom),
        }
    }

    /// Same format for `Option<Duration>`
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        use super::Raw;

        /// Serialize an optional duration
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize an optional duration
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<Raw>::deserialize(deserializer)? {
                None => Ok(None),
                Some(Raw::Secs(secs)) => Ok(Some(Duration::from_secs(secs))),
                Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
                Some(Raw::Text(s)) => super::parse(&s).map(Some).map_err(serde::de::Error::custom),
            }
        }
    }
}
