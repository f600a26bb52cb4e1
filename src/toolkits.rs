//! Backend instances and toolkit lookup
//!
//! Each backend kind has a set of named instances and an optional default.
//! [`KindConfig::resolve`] turns an optional instance name into concrete
//! settings; [`ToolkitRegistry`] maps a tool name to the toolkit (and
//! connection) that serves it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::config::humantime_serde;
use crate::{Error, Result};

/// Settings shared by every instance type.
pub trait InstanceSettings {
    /// Kind label used in errors and toolkit info, e.g. `"trino"`.
    const KIND: &'static str;

    /// Explicit connection name, empty when unset.
    fn connection_name(&self) -> &str;
}

/// Named instances of one backend kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KindConfig<T> {
    /// Instance used when no name is given
    pub default: Option<String>,
    /// Instances by name
    pub instances: BTreeMap<String, T>,
}

impl<T> Default for KindConfig<T> {
    fn default() -> Self {
        Self {
            default: None,
            instances: BTreeMap::new(),
        }
    }
}

/// An instance picked by [`KindConfig::resolve`].
#[derive(Debug)]
pub struct Resolved<'a, T> {
    /// Instance name
    pub name: &'a str,
    /// Instance settings
    pub config: &'a T,
}

impl<T> Clone for Resolved<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Resolved<'_, T> {}

impl<'a, T: InstanceSettings> Resolved<'a, T> {
    /// Connection name, falling back to the instance name.
    pub fn connection(&self) -> &'a str {
        let explicit = self.config.connection_name();
        if explicit.is_empty() { self.name } else { explicit }
    }
}

impl<T: InstanceSettings> KindConfig<T> {
    /// Whether any instance is configured.
    pub fn is_configured(&self) -> bool {
        !self.instances.is_empty()
    }

    fn declared_default(&self) -> Option<&str> {
        self.default.as_deref().filter(|d| !d.is_empty())
    }

    /// Pick an instance.
    ///
    /// An explicit name must exist. Without one the declared default is
    /// used, or the only instance when there is exactly one.
    pub fn resolve(&self, name: Option<&str>) -> Result<Resolved<'_, T>> {
        if self.instances.is_empty() {
            return Err(Error::KindNotConfigured(T::KIND.to_string()));
        }
        let wanted = match name.filter(|n| !n.is_empty()).or(self.declared_default()) {
            Some(wanted) => wanted,
            None => {
                if self.instances.len() > 1 {
                    return Err(Error::AmbiguousDefault {
                        kind: T::KIND.to_string(),
                        count: self.instances.len(),
                    });
                }
                // Exactly one instance
                let Some((name, config)) = self.instances.iter().next() else {
                    return Err(Error::KindNotConfigured(T::KIND.to_string()));
                };
                return Ok(Resolved { name, config });
            }
        };
        self.instances
            .get_key_value(wanted)
            .map(|(name, config)| Resolved { name, config })
            .ok_or_else(|| Error::InstanceNotFound {
                kind: T::KIND.to_string(),
                name: wanted.to_string(),
            })
    }

    /// Reject a default that names nothing and several instances without one.
    pub fn validate(&self) -> Result<()> {
        if self.instances.is_empty() {
            return Ok(());
        }
        self.resolve(None).map(|_| ())
    }
}

/// Keep the field's default when its value has the wrong type.
fn or_default<'de, D, T>(
    deserializer: D,
    kind: &str,
    field: &str,
    default: impl FnOnce() -> T,
    parse: impl FnOnce(serde_yaml::Value) -> std::result::Result<T, serde_yaml::Error>,
) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_yaml::Value::deserialize(deserializer)?;
    parse(raw).or_else(|e| {
        warn!(kind, field, error = %e, "Invalid instance field, using default");
        Ok(default())
    })
}

/// Plain value; a quoted scalar such as `"8443"` is read as YAML.
fn scalar<T>(raw: serde_yaml::Value) -> std::result::Result<T, serde_yaml::Error>
where
    T: DeserializeOwned,
{
    match T::deserialize(raw.clone()) {
        Ok(value) => Ok(value),
        Err(e) => match raw {
            serde_yaml::Value::String(s) => serde_yaml::from_str(&s).map_err(|_| e),
            _ => Err(e),
        },
    }
}

fn duration(raw: serde_yaml::Value) -> std::result::Result<Duration, serde_yaml::Error> {
    humantime_serde::deserialize(raw)
}

/// Field deserializers for one instance type, named after the fields.
macro_rules! lenient_fields {
    ($module:ident: $instance:ident { $($field:ident: $ty:ty => $parse:ident),* $(,)? }) => {
        mod $module {
            use super::*;

            $(
                pub(super) fn $field<'de, D>(deserializer: D) -> std::result::Result<$ty, D::Error>
                where
                    D: Deserializer<'de>,
                {
                    or_default(
                        deserializer,
                        <$instance as InstanceSettings>::KIND,
                        stringify!($field),
                        || $instance::default().$field,
                        $parse,
                    )
                }
            )*
        }
    };
}

/// Query engine instance
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrinoInstance {
    /// Coordinator host
    #[serde(deserialize_with = "trino_fields::host")]
    pub host: String,
    /// Coordinator port
    #[serde(deserialize_with = "trino_fields::port")]
    pub port: u16,
    /// User name
    #[serde(deserialize_with = "trino_fields::user")]
    pub user: String,
    /// Password
    #[serde(deserialize_with = "trino_fields::password")]
    pub password: String,
    /// Default catalog
    #[serde(deserialize_with = "trino_fields::catalog")]
    pub catalog: String,
    /// Default schema
    #[serde(deserialize_with = "trino_fields::schema")]
    pub schema: String,
    /// Use TLS
    #[serde(deserialize_with = "trino_fields::ssl")]
    pub ssl: bool,
    /// Verify TLS certificates
    #[serde(deserialize_with = "trino_fields::ssl_verify")]
    pub ssl_verify: bool,
    /// Query timeout
    #[serde(
        serialize_with = "humantime_serde::serialize",
        deserialize_with = "trino_fields::timeout"
    )]
    pub timeout: Duration,
    /// Row limit applied when a query has none
    #[serde(deserialize_with = "trino_fields::default_limit")]
    pub default_limit: u32,
    /// Upper bound on any row limit
    #[serde(deserialize_with = "trino_fields::max_limit")]
    pub max_limit: u32,
    /// Reject write statements
    #[serde(deserialize_with = "trino_fields::read_only")]
    pub read_only: bool,
    /// Connection name shown to clients
    #[serde(deserialize_with = "trino_fields::connection_name")]
    pub connection_name: String,
}

impl Default for TrinoInstance {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8080,
            user: String::new(),
            password: String::new(),
            catalog: String::new(),
            schema: String::new(),
            ssl: false,
            ssl_verify: true,
            timeout: Duration::from_secs(120),
            default_limit: 1000,
            max_limit: 10_000,
            read_only: false,
            connection_name: String::new(),
        }
    }
}

impl fmt::Debug for TrinoInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrinoInstance")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("catalog", &self.catalog)
            .field("schema", &self.schema)
            .field("ssl", &self.ssl)
            .field("read_only", &self.read_only)
            .field("connection_name", &self.connection_name)
            .finish_non_exhaustive()
    }
}

impl InstanceSettings for TrinoInstance {
    const KIND: &'static str = "trino";

    fn connection_name(&self) -> &str {
        &self.connection_name
    }
}

lenient_fields!(trino_fields: TrinoInstance {
    host: String => scalar,
    port: u16 => scalar,
    user: String => scalar,
    password: String => scalar,
    catalog: String => scalar,
    schema: String => scalar,
    ssl: bool => scalar,
    ssl_verify: bool => scalar,
    timeout: Duration => duration,
    default_limit: u32 => scalar,
    max_limit: u32 => scalar,
    read_only: bool => scalar,
    connection_name: String => scalar,
});

/// Catalog instance
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataHubInstance {
    /// API base URL
    #[serde(alias = "endpoint", deserialize_with = "datahub_fields::url")]
    pub url: String,
    /// Access token
    #[serde(deserialize_with = "datahub_fields::token")]
    pub token: String,
    /// Request timeout
    #[serde(
        serialize_with = "humantime_serde::serialize",
        deserialize_with = "datahub_fields::timeout"
    )]
    pub timeout: Duration,
    /// Verbose client logging
    #[serde(deserialize_with = "datahub_fields::debug")]
    pub debug: bool,
    /// Connection name shown to clients
    #[serde(deserialize_with = "datahub_fields::connection_name")]
    pub connection_name: String,
}

impl Default for DataHubInstance {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            timeout: Duration::from_secs(30),
            debug: false,
            connection_name: String::new(),
        }
    }
}

impl fmt::Debug for DataHubInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataHubInstance")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .field("debug", &self.debug)
            .field("connection_name", &self.connection_name)
            .finish_non_exhaustive()
    }
}

impl InstanceSettings for DataHubInstance {
    const KIND: &'static str = "datahub";

    fn connection_name(&self) -> &str {
        &self.connection_name
    }
}

lenient_fields!(datahub_fields: DataHubInstance {
    url: String => scalar,
    token: String => scalar,
    timeout: Duration => duration,
    debug: bool => scalar,
    connection_name: String => scalar,
});

/// Object store instance
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Instance {
    /// Region
    #[serde(deserialize_with = "s3_fields::region")]
    pub region: String,
    /// Custom endpoint for S3-compatible stores
    #[serde(deserialize_with = "s3_fields::endpoint")]
    pub endpoint: String,
    /// Access key
    #[serde(deserialize_with = "s3_fields::access_key_id")]
    pub access_key_id: String,
    /// Secret key
    #[serde(deserialize_with = "s3_fields::secret_access_key")]
    pub secret_access_key: String,
    /// Only buckets with this prefix are visible
    #[serde(deserialize_with = "s3_fields::bucket_prefix")]
    pub bucket_prefix: String,
    /// Connection name shown to clients
    #[serde(deserialize_with = "s3_fields::connection_name")]
    pub connection_name: String,
}

impl Default for S3Instance {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: String::new(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            bucket_prefix: String::new(),
            connection_name: String::new(),
        }
    }
}

impl fmt::Debug for S3Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Instance")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("bucket_prefix", &self.bucket_prefix)
            .field("connection_name", &self.connection_name)
            .finish_non_exhaustive()
    }
}

impl InstanceSettings for S3Instance {
    const KIND: &'static str = "s3";

    fn connection_name(&self) -> &str {
        &self.connection_name
    }
}

lenient_fields!(s3_fields: S3Instance {
    region: String => scalar,
    endpoint: String => scalar,
    access_key_id: String => scalar,
    secret_access_key: String => scalar,
    bucket_prefix: String => scalar,
    connection_name: String => scalar,
});

/// Instances for every backend kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolkitsConfig {
    /// Query engine instances
    pub trino: KindConfig<TrinoInstance>,
    /// Catalog instances
    pub datahub: KindConfig<DataHubInstance>,
    /// Object store instances
    pub s3: KindConfig<S3Instance>,
}

impl ToolkitsConfig {
    /// Validate every kind.
    pub fn validate(&self) -> Result<()> {
        self.trino.validate()?;
        self.datahub.validate()?;
        self.s3.validate()
    }
}

/// Which toolkit serves a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolkitInfo {
    /// Toolkit kind, e.g. `"trino"`
    pub kind: String,
    /// Instance name
    pub name: String,
    /// Connection name
    pub connection: String,
}

impl ToolkitInfo {
    fn from_resolved<T: InstanceSettings>(resolved: Resolved<'_, T>) -> Self {
        Self {
            kind: T::KIND.to_string(),
            name: resolved.name.to_string(),
            connection: resolved.connection().to_string(),
        }
    }
}

/// Maps tool names to toolkits.
#[async_trait]
pub trait ToolkitRegistry: Send + Sync {
    /// Toolkit serving `tool`, if any.
    fn lookup(&self, tool: &str) -> Option<ToolkitInfo>;

    /// Release toolkit resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Registry built from explicit tool names and tool-name prefixes.
#[derive(Debug, Default)]
pub struct StaticToolkitRegistry {
    by_tool: HashMap<String, ToolkitInfo>,
    by_prefix: Vec<(String, ToolkitInfo)>,
}

impl StaticToolkitRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry mapping `<kind>_*` tools to each kind's default instance.
    pub fn from_config(config: &ToolkitsConfig) -> Self {
        let mut registry = Self::new();
        if let Ok(resolved) = config.trino.resolve(None) {
            registry.register_prefix("trino_", ToolkitInfo::from_resolved(resolved));
        }
        if let Ok(resolved) = config.datahub.resolve(None) {
            registry.register_prefix("datahub_", ToolkitInfo::from_resolved(resolved));
        }
        if let Ok(resolved) = config.s3.resolve(None) {
            registry.register_prefix("s3_", ToolkitInfo::from_resolved(resolved));
        }
        debug!(prefixes = registry.by_prefix.len(), "Built toolkit registry");
        registry
    }

    /// Map one tool.
    pub fn register_tool(&mut self, tool: impl Into<String>, info: ToolkitInfo) {
        self.by_tool.insert(tool.into(), info);
    }

    /// Map every tool starting with `prefix`. Longer prefixes win.
    pub fn register_prefix(&mut self, prefix: impl Into<String>, info: ToolkitInfo) {
        self.by_prefix.push((prefix.into(), info));
        self.by_prefix.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }
}

impl ToolkitRegistry for StaticToolkitRegistry {
    fn lookup(&self, tool: &str) -> Option<ToolkitInfo> {
        self.by_tool.get(tool).cloned().or_else(|| {
            self.by_prefix
                .iter()
                .find(|(prefix, _)| tool.starts_with(prefix.as_str()))
                .map(|(_, info)| info.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse<T: for<'de> Deserialize<'de>>(yaml: &str) -> T {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn two_trino(default: Option<&str>) -> KindConfig<TrinoInstance> {
        let mut kind = KindConfig::default();
        kind.default = default.map(String::from);
        kind.instances.insert(
            "prod".to_string(),
            TrinoInstance { host: "prod.example".into(), ..Default::default() },
        );
        kind.instances.insert(
            "staging".to_string(),
            TrinoInstance { host: "staging.example".into(), ..Default::default() },
        );
        kind
    }

    #[test]
    fn test_resolve_uses_declared_default() {
        let kind = two_trino(Some("staging"));
        let resolved = kind.resolve(None).unwrap();
        assert_eq!(resolved.name, "staging");
        assert_eq!(resolved.config.host, "staging.example");
    }

    #[test]
    fn test_resolve_explicit_name() {
        let kind = two_trino(Some("staging"));
        assert_eq!(kind.resolve(Some("prod")).unwrap().config.host, "prod.example");
    }

    #[test]
    fn test_unknown_name_differs_from_unconfigured_kind() {
        let kind = two_trino(Some("prod"));
        assert!(matches!(
            kind.resolve(Some("dev")).unwrap_err(),
            Error::InstanceNotFound { .. }
        ));
        let empty = KindConfig::<TrinoInstance>::default();
        assert!(matches!(
            empty.resolve(Some("dev")).unwrap_err(),
            Error::KindNotConfigured(_)
        ));
    }

    #[test]
    fn test_several_instances_without_default_are_ambiguous() {
        let kind = two_trino(None);
        assert!(matches!(
            kind.resolve(None).unwrap_err(),
            Error::AmbiguousDefault { count: 2, .. }
        ));
        assert!(kind.validate().is_err());
        // An explicit name still works
        assert!(kind.resolve(Some("prod")).is_ok());
    }

    #[test]
    fn test_single_instance_needs_no_default() {
        let kind: KindConfig<S3Instance> = parse("instances:\n  only:\n    region: eu-west-1\n");
        let resolved = kind.resolve(None).unwrap();
        assert_eq!(resolved.name, "only");
        assert_eq!(resolved.config.region, "eu-west-1");
    }

    #[test]
    fn test_default_naming_nothing_fails_validation() {
        let mut kind = two_trino(Some("missing"));
        assert!(kind.validate().is_err());
        kind.default = Some(String::new());
        assert!(matches!(kind.validate().unwrap_err(), Error::AmbiguousDefault { .. }));
    }

    #[test]
    fn test_connection_name_falls_back_to_instance_name() {
        let kind: KindConfig<DataHubInstance> = parse(
            "instances:\n  a:\n    url: http://a\n    connection_name: Catalog A\n",
        );
        assert_eq!(kind.resolve(Some("a")).unwrap().connection(), "Catalog A");

        let kind: KindConfig<DataHubInstance> = parse("instances:\n  b:\n    url: http://b\n");
        assert_eq!(kind.resolve(Some("b")).unwrap().connection(), "b");
    }

    #[test]
    fn test_trino_port_default() {
        assert_eq!(parse::<TrinoInstance>("host: h").port, 8080);
    }

    #[test]
    fn test_trino_ssl_defaults() {
        let t = parse::<TrinoInstance>("host: h");
        assert!(!t.ssl);
        assert!(t.ssl_verify);
    }

    #[test]
    fn test_trino_timeout_default() {
        assert_eq!(parse::<TrinoInstance>("host: h").timeout, Duration::from_secs(120));
        assert_eq!(parse::<TrinoInstance>("timeout: 5m").timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_trino_limit_defaults() {
        let t = parse::<TrinoInstance>("host: h");
        assert_eq!(t.default_limit, 1000);
        assert_eq!(t.max_limit, 10_000);
    }

    #[test]
    fn test_trino_read_only_default() {
        assert!(!parse::<TrinoInstance>("host: h").read_only);
        assert!(parse::<TrinoInstance>("read_only: true").read_only);
    }

    #[test]
    fn test_trino_unknown_fields_ignored() {
        let t = parse::<TrinoInstance>("host: h\nsomething_else: 1\n");
        assert_eq!(t.host, "h");
    }

    #[test]
    fn test_trino_bad_host_keeps_default() {
        assert_eq!(parse::<TrinoInstance>("host: [a, b]").host, String::new());
    }

    #[test]
    fn test_trino_bad_port_keeps_default() {
        assert_eq!(parse::<TrinoInstance>("port: not-a-port").port, 8080);
    }

    #[test]
    fn test_trino_bad_user_keeps_default() {
        assert_eq!(parse::<TrinoInstance>("user: {name: x}").user, String::new());
    }

    #[test]
    fn test_trino_bad_password_keeps_default() {
        assert_eq!(parse::<TrinoInstance>("password: [secret]").password, String::new());
    }

    #[test]
    fn test_trino_bad_catalog_keeps_default() {
        assert_eq!(parse::<TrinoInstance>("catalog: [hive]").catalog, String::new());
    }

    #[test]
    fn test_trino_bad_schema_keeps_default() {
        assert_eq!(parse::<TrinoInstance>("schema: {x: 1}").schema, String::new());
    }

    #[test]
    fn test_trino_bad_ssl_keeps_default() {
        assert_eq!(parse::<TrinoInstance>("ssl: sometimes").ssl, false);
    }

    #[test]
    fn test_trino_bad_ssl_verify_keeps_default() {
        assert_eq!(parse::<TrinoInstance>("ssl_verify: 3").ssl_verify, true);
    }

    #[test]
    fn test_trino_bad_timeout_keeps_default() {
        assert_eq!(parse::<TrinoInstance>("timeout: soon").timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_trino_bad_default_limit_keeps_default() {
        assert_eq!(parse::<TrinoInstance>("default_limit: -5").default_limit, 1000);
    }

    #[test]
    fn test_trino_bad_max_limit_keeps_default() {
        assert_eq!(parse::<TrinoInstance>("max_limit: lots").max_limit, 10_000);
    }

    #[test]
    fn test_trino_bad_read_only_keeps_default() {
        assert_eq!(parse::<TrinoInstance>("read_only: [true]").read_only, false);
    }

    #[test]
    fn test_trino_bad_connection_name_keeps_default() {
        assert_eq!(parse::<TrinoInstance>("connection_name: [a]").connection_name, String::new());
    }

    #[test]
    fn test_datahub_bad_url_keeps_default() {
        assert_eq!(parse::<DataHubInstance>("url: [a, b]").url, String::new());
    }

    #[test]
    fn test_datahub_bad_token_keeps_default() {
        assert_eq!(parse::<DataHubInstance>("token: {t: 1}").token, String::new());
    }

    #[test]
    fn test_datahub_bad_timeout_keeps_default() {
        assert_eq!(parse::<DataHubInstance>("timeout: 5 parsecs").timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_datahub_bad_debug_keeps_default() {
        assert_eq!(parse::<DataHubInstance>("debug: verbose").debug, false);
    }

    #[test]
    fn test_datahub_bad_connection_name_keeps_default() {
        assert_eq!(parse::<DataHubInstance>("connection_name: [a]").connection_name, String::new());
    }

    #[test]
    fn test_s3_bad_region_keeps_default() {
        assert_eq!(parse::<S3Instance>("region: [eu-west-1]").region, "us-east-1");
    }

    #[test]
    fn test_s3_bad_endpoint_keeps_default() {
        assert_eq!(parse::<S3Instance>("endpoint: {host: minio}").endpoint, String::new());
    }

    #[test]
    fn test_s3_bad_access_key_id_keeps_default() {
        assert_eq!(parse::<S3Instance>("access_key_id: [k]").access_key_id, String::new());
    }

    #[test]
    fn test_s3_bad_secret_access_key_keeps_default() {
        assert_eq!(parse::<S3Instance>("secret_access_key: [s]").secret_access_key, String::new());
    }

    #[test]
    fn test_s3_bad_bucket_prefix_keeps_default() {
        assert_eq!(parse::<S3Instance>("bucket_prefix: {p: 1}").bucket_prefix, String::new());
    }

    #[test]
    fn test_s3_bad_connection_name_keeps_default() {
        assert_eq!(parse::<S3Instance>("connection_name: [a]").connection_name, String::new());
    }

    #[test]
    fn test_bad_field_leaves_siblings_alone() {
        let t = parse::<TrinoInstance>("host: h\nport: not-a-port\ncatalog: hive\n");
        assert_eq!(t.host, "h");
        assert_eq!(t.port, 8080);
        assert_eq!(t.catalog, "hive");
    }

    #[test]
    fn test_quoted_scalars_are_read_as_values() {
        let t = parse::<TrinoInstance>("port: \"8443\"\nssl: \"true\"\ntimeout: \"45\"\n");
        assert_eq!(t.port, 8443);
        assert!(t.ssl);
        assert_eq!(t.timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_datahub_endpoint_alias() {
        assert_eq!(parse::<DataHubInstance>("endpoint: http://dh").url, "http://dh");
        assert_eq!(parse::<DataHubInstance>("url: http://dh").url, "http://dh");
    }

    #[test]
    fn test_datahub_timeout_and_debug_defaults() {
        let d = parse::<DataHubInstance>("url: u");
        assert_eq!(d.timeout, Duration::from_secs(30));
        assert!(!d.debug);
    }

    #[test]
    fn test_s3_region_default() {
        assert_eq!(parse::<S3Instance>("endpoint: http://minio").region, "us-east-1");
    }

    #[test]
    fn test_s3_optional_fields_default_empty() {
        let s = parse::<S3Instance>("region: eu-west-1");
        assert_eq!(s.endpoint, "");
        assert_eq!(s.bucket_prefix, "");
        assert_eq!(s.access_key_id, "");
    }

    #[test]
    fn test_debug_hides_secrets() {
        let t = TrinoInstance { password: "hunter2".into(), ..Default::default() };
        assert!(!format!("{t:?}").contains("hunter2"));
        let d = DataHubInstance { token: "tok".into(), ..Default::default() };
        assert!(!format!("{d:?}").contains("token"));
    }

    #[test]
    fn test_registry_from_config() {
        let config: ToolkitsConfig = parse(
            "trino:\n  default: prod\n  instances:\n    prod: {host: p}\n    dev: {host: d}\n\
             s3:\n  instances:\n    lake: {connection_name: Lake}\n",
        );
        let registry = StaticToolkitRegistry::from_config(&config);
        assert_eq!(
            registry.lookup("trino_query"),
            Some(ToolkitInfo {
                kind: "trino".into(),
                name: "prod".into(),
                connection: "prod".into()
            })
        );
        assert_eq!(registry.lookup("s3_list_objects").unwrap().connection, "Lake");
        assert!(registry.lookup("datahub_search").is_none());
    }

    #[test]
    fn test_explicit_tool_beats_prefix() {
        let info = |kind: &str| ToolkitInfo {
            kind: kind.into(),
            name: "x".into(),
            connection: "x".into(),
        };
        let mut registry = StaticToolkitRegistry::new();
        registry.register_prefix("trino_", info("trino"));
        registry.register_tool("trino_special", info("custom"));
        assert_eq!(registry.lookup("trino_special").unwrap().kind, "custom");
        assert_eq!(registry.lookup("trino_query").unwrap().kind, "trino");
    }
}
