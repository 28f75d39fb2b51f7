use std::collections::BTreeMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Fixed handler name for reminder jobs. Every registry must resolve it in
/// addition to the configured deadline kinds.
pub const REMINDER_HANDLER: &str = "reminder";

/// Top-level config (rota.toml + ROTA_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RotaConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub deadlines: DeadlineConfig,
}

impl RotaConfig {
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: RotaConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("ROTA_").split("_"))
            .extract()
            .map_err(|e| crate::error::RotaError::Config(e.to_string()))?;

        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite file holding the job store.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Whether a deadline kind is tied to a whole rotation or to an individual
/// entity (e.g. a single project's report submission).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeadlineScope {
    Rotation,
    Standalone,
}

/// Per-kind deadline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineSpec {
    pub scope: DeadlineScope,
    /// Days before the deadline at which a reminder should additionally
    /// fire. Only meaningful for rotation-scoped kinds.
    #[serde(default)]
    pub reminder_offsets: Vec<u32>,
}

impl DeadlineSpec {
    fn rotation(reminder_offsets: &[u32]) -> Self {
        Self {
            scope: DeadlineScope::Rotation,
            reminder_offsets: reminder_offsets.to_vec(),
        }
    }

    fn standalone() -> Self {
        Self {
            scope: DeadlineScope::Standalone,
            reminder_offsets: Vec::new(),
        }
    }
}

/// Process-wide, read-only table of deadline kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineConfig {
    #[serde(default)]
    pub kinds: BTreeMap<String, DeadlineSpec>,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        // The five rotation deadlines in lifecycle order, plus the
        // standalone per-project kinds.
        let kinds = BTreeMap::from([
            ("supervisor_submit".to_string(), DeadlineSpec::rotation(&[7, 1])),
            ("student_invite".to_string(), DeadlineSpec::rotation(&[])),
            ("student_choice".to_string(), DeadlineSpec::rotation(&[7, 1])),
            ("student_complete".to_string(), DeadlineSpec::rotation(&[7, 1])),
            ("marking_complete".to_string(), DeadlineSpec::rotation(&[7, 1])),
            ("mark_project".to_string(), DeadlineSpec::standalone()),
            ("grace_deadline".to_string(), DeadlineSpec::standalone()),
        ]);
        Self { kinds }
    }
}

impl DeadlineConfig {
    /// Look up a kind regardless of scope.
    pub fn spec(&self, kind: &str) -> Option<&DeadlineSpec> {
        self.kinds.get(kind)
    }

    /// Look up a rotation-scoped kind; `None` for unknown or standalone kinds.
    pub fn rotation_spec(&self, kind: &str) -> Option<&DeadlineSpec> {
        self.spec(kind)
            .filter(|s| s.scope == DeadlineScope::Rotation)
    }

    /// Look up a standalone kind; `None` for unknown or rotation-scoped kinds.
    pub fn standalone_spec(&self, kind: &str) -> Option<&DeadlineSpec> {
        self.spec(kind)
            .filter(|s| s.scope == DeadlineScope::Standalone)
    }

    /// Every handler name that must resolve at fire time: each configured
    /// kind, plus the fixed [`REMINDER_HANDLER`].
    pub fn required_handlers(&self) -> impl Iterator<Item = &str> {
        self.kinds
            .keys()
            .map(String::as_str)
            .chain(std::iter::once(REMINDER_HANDLER))
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.rota/rota.db", home)
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.rota/rota.toml", home)
}
