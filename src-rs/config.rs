use std::env;
use std::path::PathBuf;

use crate::scene::NodeKind;

pub const DEFAULT_MODEL_URL: &str = "https://teachablemachine.withgoogle.com/models/7TY9ihr-l/";

/// Node kinds never rasterized or renamed on their own.
pub const DEFAULT_EXCLUDED_TYPES: &[NodeKind] = &[
    NodeKind::Text,
    NodeKind::Vector,
    NodeKind::Component,
    NodeKind::ComponentSet,
    NodeKind::Instance,
];

/// Parent names the container rule leaves alone.
pub const RESERVED_CONTAINER_NAMES: &[&str] =
    &["Container", "Card", "Horizontal container", "Vertical container"];

const UI_HEIGHT: u32 = 280;
const UI_HEIGHT_DEBUG: u32 = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub default_model_url: String,
    pub excluded_types: Vec<NodeKind>,
    /// Rasterize only the selected nodes, without descending into containers.
    pub top_level_only: bool,
    pub debug: bool,
    pub out_dir: PathBuf,
    pub storage_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let out_dir = PathBuf::from(".layer-predict");
        Self {
            default_model_url: DEFAULT_MODEL_URL.to_string(),
            excluded_types: DEFAULT_EXCLUDED_TYPES.to_vec(),
            top_level_only: false,
            debug: false,
            storage_path: out_dir.join("client-storage.json"),
            out_dir,
        }
    }
}

impl Settings {
    /// Defaults overlaid with `LPP_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut settings = Settings::default();

        if let Some(debug) = value("LPP_DEBUG").and_then(|v| parse_flag(&v)) {
            settings.debug = debug;
        }
        if let Some(top) = value("LPP_TOP_LEVEL_ONLY").and_then(|v| parse_flag(&v)) {
            settings.top_level_only = top;
        }
        if let Some(url) = value("LPP_DEFAULT_MODEL_URL") {
            settings.default_model_url = url.trim().to_string();
        }
        if let Some(dir) = value("LPP_OUT_DIR") {
            settings.out_dir = PathBuf::from(dir);
            settings.storage_path = settings.out_dir.join("client-storage.json");
        }
        if let Some(path) = value("LPP_STORAGE") {
            settings.storage_path = PathBuf::from(path);
        }
        settings
    }

    pub fn ui_height(&self) -> u32 {
        if self.debug {
            UI_HEIGHT_DEBUG
        } else {
            UI_HEIGHT
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
