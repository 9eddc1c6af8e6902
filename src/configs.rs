use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::cert::CertRole;
use crate::error::{PkiError, Result};

/// Per-role numeric issuance settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Last serial number issued under this role.
    #[serde(default)]
    pub serial: u64,
    #[serde(default = "default_key_length")]
    pub key_length: u32,
    #[serde(default = "default_validity_days")]
    pub validity_days: u32,
    /// Protects the role's private keys at rest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: 0,
            key_length: default_key_length(),
            validity_days: default_validity_days(),
            password: None,
        }
    }
}

impl Config {
    /// Password to use for key files, empty when none is set.
    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }
}

fn default_key_length() -> u32 {
    2048
}

fn default_validity_days() -> u32 {
    365
}

fn default_root_validity_days() -> u32 {
    3650 // 10 years
}

/// Subject identity attributes copied into the certificate Subject and SAN.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Claim {
    pub common_name: String,
    pub country: Vec<String>,
    pub province: Vec<String>,
    pub locality: Vec<String>,
    pub organization: Vec<String>,
    pub organizational_unit: Vec<String>,
    pub street_address: Vec<String>,
    pub postal_code: Vec<String>,
    pub email_address: Vec<String>,
    pub dns_name: Vec<String>,
    pub ip_address: Vec<String>,
}

/// Trust rule attached to a CA role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Fields that must be identical between the CA and the request.
    #[serde(rename = "match")]
    pub match_fields: Vec<String>,
    /// Fields the request must populate.
    pub supplied: Vec<String>,
}

/// Settings for one role in `pki.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleSettings {
    pub config: Config,
    pub claim: Claim,
    pub policy: Policy,
}

/// Workspace configuration file, one table per role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkiConfig {
    #[serde(
        default = "default_root_settings",
        deserialize_with = "deserialize_root_settings"
    )]
    pub root: RoleSettings,
    #[serde(default)]
    pub intermediate: RoleSettings,
    #[serde(default)]
    pub server: RoleSettings,
    #[serde(default)]
    pub client: RoleSettings,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            root: default_root_settings(),
            intermediate: RoleSettings::default(),
            server: RoleSettings::default(),
            client: RoleSettings::default(),
        }
    }
}

fn default_root_settings() -> RoleSettings {
    RoleSettings {
        config: Config {
            validity_days: default_root_validity_days(),
            ..Config::default()
        },
        ..RoleSettings::default()
    }
}

/// `[root]` as read from disk. Missing fields fall back to the Root
/// defaults, so a partial `[root.config]` still gets the ten-year validity.
#[derive(Default, Deserialize)]
#[serde(default)]
struct RootSettings {
    config: RootConfig,
    claim: Claim,
    policy: Policy,
}

#[derive(Deserialize)]
struct RootConfig {
    #[serde(default)]
    serial: u64,
    #[serde(default = "default_key_length")]
    key_length: u32,
    #[serde(default = "default_root_validity_days")]
    validity_days: u32,
    #[serde(default)]
    password: Option<String>,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            serial: 0,
            key_length: default_key_length(),
            validity_days: default_root_validity_days(),
            password: None,
        }
    }
}

fn deserialize_root_settings<'de, D>(
    deserializer: D,
) -> std::result::Result<RoleSettings, D::Error>
where
    D: Deserializer<'de>,
{
    let root = RootSettings::deserialize(deserializer)?;
    Ok(RoleSettings {
        config: Config {
            serial: root.config.serial,
            key_length: root.config.key_length,
            validity_days: root.config.validity_days,
            password: root.config.password,
        },
        claim: root.claim,
        policy: root.policy,
    })
}

impl PkiConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path).map_err(|e| {
            PkiError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        toml::from_str(config_str)
            .map_err(|e| PkiError::Config(format!("failed to parse config: {}", e)))
    }

    /// Persist the configuration, including any advanced serials.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let config_str = toml::to_string_pretty(self)
            .map_err(|e| PkiError::Config(format!("failed to serialize config: {}", e)))?;
        fs::write(path, config_str)
            .map_err(|e| PkiError::Config(format!("failed to write {}: {}", path.display(), e)))
    }

    pub fn role(&self, role: CertRole) -> &RoleSettings {
        match role {
            CertRole::Root => &self.root,
            CertRole::Intermediate => &self.intermediate,
            CertRole::Server => &self.server,
            CertRole::Client => &self.client,
        }
    }

    pub fn role_mut(&mut self, role: CertRole) -> &mut RoleSettings {
        match role {
            CertRole::Root => &mut self.root,
            CertRole::Intermediate => &mut self.intermediate,
            CertRole::Server => &mut self.server,
            CertRole::Client => &mut self.client,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = PkiConfig::from_toml("").unwrap();
        assert_eq!(config.root.config.validity_days, 3650);
        assert_eq!(config.server.config.validity_days, 365);
        assert_eq!(config.client.config.key_length, 2048);
        assert_eq!(config.intermediate.config.serial, 0);
        assert!(config.root.config.password.is_none());
    }

    #[test]
    fn test_partial_root_tables_keep_root_validity() {
        let config = PkiConfig::from_toml(
            r#"
            [root.config]
            key_length = 4096
            "#,
        )
        .unwrap();
        assert_eq!(config.root.config.key_length, 4096);
        assert_eq!(config.root.config.validity_days, 3650);

        let config = PkiConfig::from_toml(
            r#"
            [root.claim]
            common_name = "Root CA"
            "#,
        )
        .unwrap();
        assert_eq!(config.root.claim.common_name, "Root CA");
        assert_eq!(config.root.config.validity_days, 3650);
        assert_eq!(config.root.config.key_length, 2048);

        let config = PkiConfig::from_toml(
            r#"
            [root.config]
            validity_days = 30
            serial = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.root.config.validity_days, 30);
        assert_eq!(config.root.config.serial, 4);

        // Only the Root gets the longer default
        let config = PkiConfig::from_toml("[intermediate.config]\nkey_length = 4096\n").unwrap();
        assert_eq!(config.intermediate.config.validity_days, 365);
    }

    #[test]
    fn test_parse_role_tables() {
        let config = PkiConfig::from_toml(
            r#"
            [intermediate.config]
            serial = 7
            key_length = 4096
            password = "hunter2"

            [intermediate.claim]
            common_name = "Ops CA"
            country = ["CA"]
            dns_name = ["ops.example.com"]

            [intermediate.policy]
            match = ["Country", "organization"]
            supplied = ["common-name"]
            "#,
        )
        .unwrap();
        let int = config.role(CertRole::Intermediate);
        assert_eq!(int.config.serial, 7);
        assert_eq!(int.config.key_length, 4096);
        assert_eq!(int.config.password(), "hunter2");
        assert_eq!(int.claim.common_name, "Ops CA");
        assert_eq!(int.claim.country, vec!["CA".to_string()]);
        assert_eq!(int.policy.match_fields, vec!["Country", "organization"]);
        assert_eq!(int.policy.supplied, vec!["common-name"]);
    }

    #[test]
    fn test_save_persists_serial() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pki.toml");
        let mut config = PkiConfig::default();
        config.role_mut(CertRole::Server).config.serial = 42;
        config.save(&path).unwrap();

        let loaded = PkiConfig::from_file(&path).unwrap();
        assert_eq!(loaded.server.config.serial, 42);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = PkiConfig::from_toml("[root").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }
}
