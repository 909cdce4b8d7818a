use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;

/// Names of the keys, blocks and entity types the patcher works with.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "snake_case")]
pub struct Vocabulary {
    pub entity_type: String,
    pub id_i_key: String,
    pub id_u_key: String,
    pub anchor_key: String,
    pub flag_key: String,
    pub pos_x_key: String,
    pub pos_y_key: String,
    pub position_bound: f64,
    pub landmark_type: String,
    pub landmark_offset: (f64, f64),
    pub mode_block: String,
    pub active_key: String,
    pub mode_id_i_key: String,
    pub mode_id_u_key: String,
    pub view_key: String,
    pub roster_block: String,
    pub inventory_block: String,
    pub permadeath_key: String,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            entity_type: "Warden".into(),
            id_i_key: "Id.i".into(),
            id_u_key: "Id.u".into(),
            anchor_key: "Timer".into(),
            flag_key: "AvatarControl".into(),
            pos_x_key: "Pos.x".into(),
            pos_y_key: "Pos.y".into(),
            position_bound: 10_000.0,
            landmark_type: "Guard".into(),
            landmark_offset: (1.0, 1.0),
            mode_block: "WardenMode".into(),
            active_key: "IsActive".into(),
            mode_id_i_key: "WardenId.i".into(),
            mode_id_u_key: "WardenId.u".into(),
            view_key: "CameraFollow".into(),
            roster_block: "Roster".into(),
            inventory_block: "Inventory".into(),
            permadeath_key: "Permadeath".into(),
        }
    }
}

/// Content written into the canonical mode block.
#[derive(Clone, Copy, Debug, Deserialize, ValueEnum, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Minimal,
    #[default]
    Compat,
    Full,
    /// Full content, and always rewrite the block and collapse duplicates.
    Clean,
}

impl Profile {
    pub fn includes_view(self) -> bool {
        !matches!(self, Profile::Minimal)
    }

    pub fn includes_inventory(self) -> bool {
        matches!(self, Profile::Full | Profile::Clean)
    }

    pub fn forces_rewrite(self) -> bool {
        matches!(self, Profile::Clean)
    }
}

/// Experimental toggles that pin one field after normalization.
#[derive(Clone, Copy, Debug, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    /// `Permadeath true` in the mode block.
    Permadeath,
    /// `CameraFollow false` in the mode block.
    FreeCamera,
    /// The entity flag is written as `false` while enabling.
    DormantAvatar,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay_ms: 250,
        }
    }
}

pub const DEFAULT_RETENTION: usize = 3;

/// Everything one patch run needs. Built from the config file and CLI flags.
#[derive(Debug, Clone)]
pub struct PatchOptions {
    pub enable: bool,
    pub profile: Profile,
    pub entity_effects: bool,
    pub variants: Vec<Variant>,
    pub retention: usize,
    pub dry_run: bool,
    pub vocabulary: Vocabulary,
    pub retry: RetryPolicy,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            enable: true,
            profile: Profile::default(),
            entity_effects: true,
            variants: Vec::new(),
            retention: DEFAULT_RETENTION,
            dry_run: false,
            vocabulary: Vocabulary::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PatchOptions {
    pub fn has_variant(&self, variant: Variant) -> bool {
        self.variants.contains(&variant)
    }
}

/// On-disk patch settings. Every field is optional so CLI flags can fill the gaps.
#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "snake_case")]
pub struct ConfigFile {
    pub save: Option<PathBuf>,
    pub enable: Option<bool>,
    pub profile: Option<Profile>,
    pub entity_effects: Option<bool>,
    pub variants: Option<Vec<Variant>>,
    pub retention: Option<usize>,
    pub dry_run: Option<bool>,
    pub vocabulary: Option<Vocabulary>,
}

pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let data = fs::read(path).with_context(|| format!("reading config {}", path.display()))?;
    if path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
    {
        serde_json::from_slice(&data).with_context(|| format!("parsing {}", path.display()))
    } else {
        serde_yaml::from_slice(&data).with_context(|| format!("parsing {}", path.display()))
    }
}

impl ConfigFile {
    pub fn into_options(self) -> PatchOptions {
        let defaults = PatchOptions::default();
        PatchOptions {
            enable: self.enable.unwrap_or(defaults.enable),
            profile: self.profile.unwrap_or(defaults.profile),
            entity_effects: self.entity_effects.unwrap_or(defaults.entity_effects),
            variants: self.variants.unwrap_or_default(),
            retention: self.retention.unwrap_or(defaults.retention),
            dry_run: self.dry_run.unwrap_or(defaults.dry_run),
            vocabulary: self.vocabulary.unwrap_or_default(),
            retry: defaults.retry,
        }
    }
}
