//! Configuration management

use std::{collections::BTreeMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::oidc::CodeChallengeMethod;
use crate::registry::DEFAULT_CLIENT;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `${VAR}` resolution.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Client used when a lookup names none
    pub default_client: String,
    /// Named OIDC clients
    pub clients: BTreeMap<String, ClientConfig>,
    /// Outbound HTTP settings
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_files: Vec::new(),
            default_client: DEFAULT_CLIENT.to_string(),
            clients: BTreeMap::new(),
            http: HttpConfig::default(),
        }
    }
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// User-Agent header
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: concat!("oidc-gateway/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// One relying-party / resource-server registration at a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Discovery document URL (`.../.well-known/openid-configuration`)
    pub well_known_url: String,
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret (supports `${VAR}`)
    pub client_secret: String,
    /// Absolute callback URL registered at the provider
    pub redirect_uri: String,
    /// Callback path handled by the login authenticator
    pub login_check_path: String,
    /// Discovery cache TTL in seconds; `null` or `0` disables caching
    pub well_known_cache_time: Option<u64>,
    /// JWKS cache TTL in seconds; `null` or `0` disables caching
    pub jwks_cache_time: Option<u64>,
    /// Clock-skew tolerance for `exp`/`nbf`
    pub token_leeway_seconds: u64,
    /// Headers added to every request sent to the provider
    pub custom_client_headers: BTreeMap<String, String>,
    /// Query parameter carrying the remember-me choice on login start
    pub remember_me_parameter: String,
    /// PKCE method
    pub code_challenge_method: CodeChallengeMethod,
    /// Skip the `nonce` round-trip
    pub disable_nonce: bool,
    /// Claim naming the user
    pub user_identifier_property: String,
    /// Read the user identifier from the ID token instead of userinfo
    pub user_identifier_from_id_token: bool,
    /// Call the userinfo endpoint after login
    pub enable_retrieve_user_info: bool,
    /// Token-exchange target audience; also the expected `aud` of bearer tokens
    pub audience: Option<String>,
    /// Token-exchange target scope
    pub scope: Option<String>,
    /// TTL fallback for exchanged tokens without a reported expiry
    pub token_exchange_cache_time: Option<u64>,
    /// Build an [`OidcHttpClientFactory`](crate::exchange::OidcHttpClientFactory)
    pub enable_http_client: bool,
    /// TTL fallback for the HTTP client factory's tokens
    pub http_client_factory_cache_time: Option<u64>,
    /// Build an [`OidcTokenFactory`](crate::exchange::OidcTokenFactory)
    pub enable_token_factory: bool,
    /// TTL fallback for the token factory's tokens
    pub token_factory_cache_time: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            well_known_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            login_check_path: "/login_check".to_string(),
            well_known_cache_time: Some(3600),
            jwks_cache_time: Some(3600),
            token_leeway_seconds: crate::jwt::DEFAULT_LEEWAY_SECONDS,
            custom_client_headers: BTreeMap::new(),
            remember_me_parameter: "_remember_me".to_string(),
            code_challenge_method: CodeChallengeMethod::None,
            disable_nonce: false,
            user_identifier_property: "sub".to_string(),
            user_identifier_from_id_token: false,
            enable_retrieve_user_info: true,
            audience: None,
            scope: None,
            token_exchange_cache_time: Some(3600),
            enable_http_client: false,
            http_client_factory_cache_time: Some(3600),
            enable_token_factory: false,
            token_factory_cache_time: Some(3600),
        }
    }
}

impl ClientConfig {
    /// Check the settings of client `name`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid setting.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(Error::Config(format!("client '{name}': client_id is required")));
        }
        Url::parse(&self.well_known_url).map_err(|e| {
            Error::Config(format!(
                "client '{name}': invalid well_known_url {:?}: {e}",
                self.well_known_url
            ))
        })?;
        if !self.redirect_uri.is_empty() {
            Url::parse(&self.redirect_uri).map_err(|e| {
                Error::Config(format!(
                    "client '{name}': invalid redirect_uri {:?}: {e}",
                    self.redirect_uri
                ))
            })?;
        }
        if !self.enable_retrieve_user_info && !self.user_identifier_from_id_token {
            return Err(Error::Config(format!(
                "client '{name}': user_identifier_from_id_token must be enabled when \
                 enable_retrieve_user_info is disabled"
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // OIDC_GATEWAY_CLIENTS__DEFAULT__CLIENT_ID=... style overrides
        figment = figment.merge(Env::prefixed("OIDC_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Env files first so their variables are visible to the expansion
        config.load_env_files();
        config.expand_env_vars();
        config.validate()?;

        Ok(config)
    }

    /// Check cross-field invariants
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no client is configured or a client is
    /// invalid, and [`Error::ClientNotFound`] if the default client is missing.
    pub fn validate(&self) -> Result<()> {
        if self.clients.is_empty() {
            return Err(Error::Config("at least one client must be configured".into()));
        }
        if !self.clients.contains_key(&self.default_client) {
            return Err(Error::ClientNotFound(self.default_client.clone()));
        }
        for (name, client) in &self.clients {
            client.validate(name)?;
        }
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
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
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} in secrets and provider headers
    fn expand_env_vars(&mut self) {
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        for client in self.clients.values_mut() {
            client.client_id = Self::expand_string(&re, &client.client_id);
            client.client_secret = Self::expand_string(&re, &client.client_secret);
            client.well_known_url = Self::expand_string(&re, &client.well_known_url);
            for value in client.custom_client_headers.values_mut() {
                *value = Self::expand_string(&re, value);
            }
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Settings of client `name`
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientNotFound`] for an unknown name.
    pub fn client(&self, name: &str) -> Result<&ClientConfig> {
        self.clients
            .get(name)
            .ok_or_else(|| Error::ClientNotFound(name.to_string()))
    }
}

/// Human-readable duration serialization
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
clients:
  default:
    well_known_url: "https://idp.example/.well-known/openid-configuration"
    client_id: "app"
    client_secret: "s3cret"
    redirect_uri: "https://app.example/login_check"
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn client_defaults_match_documented_values() {
        let client = ClientConfig::default();
        assert_eq!(client.well_known_cache_time, Some(3600));
        assert_eq!(client.jwks_cache_time, Some(3600));
        assert_eq!(client.token_leeway_seconds, 300);
        assert_eq!(client.remember_me_parameter, "_remember_me");
        assert_eq!(client.user_identifier_property, "sub");
        assert_eq!(client.code_challenge_method, CodeChallengeMethod::None);
        assert!(!client.enable_token_factory);
        assert!(!client.enable_http_client);
    }

    #[test]
    fn load_minimal_yaml() {
        let file = write_config(MINIMAL);

        let config = Config::load(Some(file.path())).unwrap();

        assert_eq!(config.default_client, "default");
        let client = config.client("default").unwrap();
        assert_eq!(client.client_id, "app");
        assert_eq!(config.http.timeout, Duration::from_secs(10));
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/oidc.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn unknown_default_client_is_rejected() {
        let file = write_config(&format!("default_client: other\n{MINIMAL}"));

        let err = Config::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, Error::ClientNotFound(name) if name == "other"));
    }

    #[test]
    fn disabling_userinfo_requires_id_token_identifier() {
        let client = ClientConfig {
            well_known_url: "https://idp.example/.well-known/openid-configuration".into(),
            client_id: "app".into(),
            enable_retrieve_user_info: false,
            ..Default::default()
        };
        assert!(client.validate("default").is_err());

        let fixed = ClientConfig {
            user_identifier_from_id_token: true,
            ..client
        };
        assert!(fixed.validate("default").is_ok());
    }

    #[test]
    fn nullable_cache_times_and_pkce_from_yaml() {
        let yaml = r#"
well_known_url: "https://idp.example/.well-known/openid-configuration"
client_id: "app"
well_known_cache_time: null
jwks_cache_time: 0
code_challenge_method: S256
http_client_factory_cache_time: 120
"#;
        let client: ClientConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(client.well_known_cache_time, None);
        assert_eq!(client.jwks_cache_time, Some(0));
        assert_eq!(client.code_challenge_method, CodeChallengeMethod::S256);
        assert_eq!(client.http_client_factory_cache_time, Some(120));
    }

    #[test]
    fn env_file_values_expand_into_secrets_and_headers() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("test.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "OIDC_GW_TEST_SECRET=from_env_file").unwrap();
        drop(f);

        let yaml = format!(
            r#"
env_files:
  - "{}"
clients:
  default:
    well_known_url: "https://idp.example/.well-known/openid-configuration"
    client_id: "app"
    client_secret: "${{OIDC_GW_TEST_SECRET}}"
    custom_client_headers:
      X-Tenant: "${{OIDC_GW_TEST_TENANT_UNSET:-acme}}"
"#,
            env_path.display()
        );
        let file = write_config(&yaml);

        let config = Config::load(Some(file.path())).unwrap();
        let client = config.client("default").unwrap();

        assert_eq!(client.client_secret, "from_env_file");
        assert_eq!(client.custom_client_headers["X-Tenant"], "acme");
    }

    #[test]
    fn test_load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        // Should not panic
        config.load_env_files();
    }

    #[test]
    fn humantime_durations() {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(with = "humantime_serde")]
            d: Duration,
        }
        let parse = |s: &str| {
            serde_yaml::from_str::<Wrapper>(&format!("d: \"{s}\""))
                .unwrap()
                .d
        };
        assert_eq!(parse("30s"), Duration::from_secs(30));
        assert_eq!(parse("5m"), Duration::from_secs(300));
        assert_eq!(parse("250ms"), Duration::from_millis(250));
        assert_eq!(parse("7"), Duration::from_secs(7));
    }
}
