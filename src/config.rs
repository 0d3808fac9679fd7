use crate::model::AuthMethod;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_REGIONS: [&str; 10] = [
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-central-1",
    "eu-west-1",
    "eu-west-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-northeast-1",
];

/// Runtime settings after merging the YAML file with built-in defaults.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AppConfig {
    pub source: Option<String>,
    pub regions: Vec<String>,
    pub default_region: Option<String>,
    pub page_size: usize,
    pub auto_refresh_secs: u64,
    pub presign_expiry_secs: u64,
    pub editor: Option<String>,
    pub dashboard_command: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: None,
            regions: DEFAULT_REGIONS.iter().map(|region| region.to_string()).collect(),
            default_region: None,
            page_size: default_page_size(),
            auto_refresh_secs: default_auto_refresh_secs(),
            presign_expiry_secs: default_presign_expiry_secs(),
            editor: None,
            dashboard_command: default_dashboard_command(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct CirrusConfigFile {
    #[serde(default)]
    regions: Vec<String>,
    #[serde(default, alias = "region")]
    default_region: Option<String>,
    #[serde(default = "default_page_size")]
    page_size: usize,
    #[serde(default = "default_auto_refresh_secs", alias = "refresh_secs")]
    auto_refresh_secs: u64,
    #[serde(default = "default_presign_expiry_secs")]
    presign_expiry_secs: u64,
    #[serde(default)]
    editor: Option<String>,
    #[serde(default = "default_dashboard_command", alias = "k9s")]
    dashboard_command: String,
}

impl AppConfig {
    /// Loads the explicit path when given, otherwise the first discovered config file.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => discover_config_path(),
        };
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&raw, Some(path.display().to_string()))
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    fn parse(raw: &str, source: Option<String>) -> Result<Self> {
        let parsed: CirrusConfigFile = serde_yaml::from_str(raw)?;
        let regions = if parsed.regions.is_empty() {
            Self::default().regions
        } else {
            parsed.regions
        };
        Ok(Self {
            source,
            regions,
            default_region: parsed.default_region.filter(|region| !region.trim().is_empty()),
            page_size: parsed.page_size.max(2),
            auto_refresh_secs: parsed.auto_refresh_secs.max(5),
            presign_expiry_secs: parsed.presign_expiry_secs.clamp(60, 604_800),
            editor: parsed.editor.filter(|editor| !editor.trim().is_empty()),
            dashboard_command: parsed.dashboard_command,
        })
    }

    /// CLI flag, then the standard AWS variables, then the config file, then us-east-1.
    pub fn resolve_region(&self, cli_region: Option<&str>) -> String {
        let from_env = ["AWS_REGION", "AWS_DEFAULT_REGION"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .find(|value| !value.trim().is_empty());
        cli_region
            .map(str::to_string)
            .or(from_env)
            .or_else(|| self.default_region.clone())
            .unwrap_or_else(|| DEFAULT_REGION.to_string())
    }

    pub fn editor(&self) -> String {
        self.editor
            .clone()
            .or_else(|| std::env::var("VISUAL").ok().filter(|value| !value.is_empty()))
            .or_else(|| std::env::var("EDITOR").ok().filter(|value| !value.is_empty()))
            .unwrap_or_else(|| "vi".to_string())
    }
}

fn default_page_size() -> usize {
    20
}

fn default_auto_refresh_secs() -> u64 {
    30
}

fn default_presign_expiry_secs() -> u64 {
    3_600
}

fn default_dashboard_command() -> String {
    "k9s".to_string()
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CIRRUS_CONFIG")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [PathBuf::from("cirrus.yaml"), PathBuf::from("cirrus.yml")];
    for candidate in cwd_candidates {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let user_candidates = [
            PathBuf::from(&home).join(".config/cirrus/config.yaml"),
            PathBuf::from(&home).join(".config/cirrus/config.yml"),
        ];
        for candidate in user_candidates {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}

/// Per-user state directory holding the auth selection and the SSO session cache.
pub fn state_dir() -> Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .context("cannot determine home directory (HOME is not set)")?;
    Ok(PathBuf::from(home).join(".cirrus"))
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub method: AuthMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso_start_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso_region: Option<String>,
}

impl AuthConfig {
    pub fn env() -> Self {
        Self {
            method: AuthMethod::Env,
            profile_name: None,
            sso_start_url: None,
            sso_region: None,
        }
    }

    pub fn profile(name: impl Into<String>) -> Self {
        Self {
            method: AuthMethod::Profile,
            profile_name: Some(name.into()),
            sso_start_url: None,
            sso_region: None,
        }
    }

    pub fn sso(start_url: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            method: AuthMethod::Sso,
            profile_name: None,
            sso_start_url: Some(start_url.into()),
            sso_region: Some(region.into()),
        }
    }
}

/// Reads and writes the persisted auth selection (`config.json` in the state directory).
#[derive(Debug, Clone)]
pub struct AuthStore {
    path: PathBuf,
}

impl AuthStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join("config.json"),
        }
    }

    pub fn load(&self) -> Result<Option<AuthConfig>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(Some(config))
    }

    pub fn save(&self, config: &AuthConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(config).context("failed to encode auth config")?;
        fs::write(&self.path, raw)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, AuthConfig, AuthStore, DEFAULT_REGIONS};
    use crate::model::AuthMethod;
    use std::fs;

    #[test]
    fn empty_file_falls_back_to_defaults() {
        let config = AppConfig::parse("{}", None).expect("parse");
        assert_eq!(config.regions.len(), DEFAULT_REGIONS.len());
        assert_eq!(config.page_size, 20);
        assert_eq!(config.auto_refresh_secs, 30);
        assert_eq!(config.dashboard_command, "k9s");
    }

    #[test]
    fn yaml_overrides_and_clamps() {
        let raw =
            "regions: [eu-west-1, eu-north-1]\nregion: eu-north-1\npage_size: 1\nrefresh_secs: 1\n";
        let config = AppConfig::parse(raw, Some("test".to_string())).expect("parse");
        assert_eq!(config.regions, vec!["eu-west-1", "eu-north-1"]);
        assert_eq!(config.default_region.as_deref(), Some("eu-north-1"));
        assert_eq!(config.page_size, 2);
        assert_eq!(config.auto_refresh_secs, 5);
    }

    #[test]
    fn cli_region_wins() {
        let config = AppConfig::default();
        assert_eq!(config.resolve_region(Some("ap-south-1")), "ap-south-1");
    }

    #[test]
    fn auth_store_round_trips_selection() {
        let dir = std::env::temp_dir().join(format!("cirrus-auth-store-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let store = AuthStore::new(&dir);

        assert_eq!(store.load().expect("load"), None);
        store
            .save(&AuthConfig::sso("https://example.awsapps.com/start", "eu-west-1"))
            .expect("save");
        let loaded = store.load().expect("load").expect("present");
        assert_eq!(loaded.method, AuthMethod::Sso);
        assert_eq!(loaded.sso_region.as_deref(), Some("eu-west-1"));
        assert!(fs::read_to_string(dir.join("config.json"))
            .expect("read")
            .contains("\"method\": \"sso\""));

        let _ = fs::remove_dir_all(&dir);
    }
}
