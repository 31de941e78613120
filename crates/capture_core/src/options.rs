use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ResourceCategory;

pub const MIN_TIMEOUT_SECS: u64 = 60;
pub const MAX_TIMEOUT_SECS: u64 = 300;
pub const MIN_MAX_FILES: usize = 200;
pub const MAX_MAX_FILES: usize = 1000;
pub const DEFAULT_CONCURRENCY: usize = 10;
pub const AUTO_ENCODING: &str = "auto";

/// Per-capture configuration. Field names follow the camelCase JSON shape
/// callers already send; every field is optional on input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureOptions {
    pub include_images: bool,
    pub include_styles: bool,
    pub include_scripts: bool,
    pub include_fonts: bool,
    pub include_videos: bool,
    pub follow_redirects: bool,
    pub remove_analytics: bool,
    pub remove_tracking: bool,
    pub remove_ads: bool,
    pub remove_tag_manager: bool,
    pub remove_malicious_tags: bool,
    pub correct_file_names: bool,
    /// Seconds.
    pub timeout: u64,
    pub create_zip: bool,
    pub max_files: usize,
    /// Accepted for compatibility; captures never go past the page's own assets.
    pub max_depth: u32,
    pub max_concurrency: usize,
    pub force_encoding: String,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            include_images: true,
            include_styles: true,
            include_scripts: true,
            include_fonts: false,
            include_videos: false,
            follow_redirects: true,
            remove_analytics: false,
            remove_tracking: false,
            remove_ads: false,
            remove_tag_manager: false,
            remove_malicious_tags: false,
            correct_file_names: false,
            timeout: MIN_TIMEOUT_SECS,
            create_zip: true,
            max_files: MIN_MAX_FILES,
            max_depth: 1,
            max_concurrency: DEFAULT_CONCURRENCY,
            force_encoding: AUTO_ENCODING.to_string(),
        }
    }
}

impl CaptureOptions {
    /// Returns the snapshot a capture actually runs with: bounds clamped,
    /// archive creation forced on, blank encoding mapped to auto.
    pub fn normalized(mut self) -> Self {
        self.timeout = self.timeout.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS);
        self.max_files = self.max_files.clamp(MIN_MAX_FILES, MAX_MAX_FILES);
        if self.max_concurrency == 0 {
            self.max_concurrency = DEFAULT_CONCURRENCY;
        }
        self.max_depth = 1;
        self.create_zip = true;
        let trimmed = self.force_encoding.trim();
        self.force_encoding = if trimmed.is_empty() {
            AUTO_ENCODING.to_string()
        } else {
            trimmed.to_string()
        };
        self
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn includes(&self, category: ResourceCategory) -> bool {
        match category {
            ResourceCategory::Css => self.include_styles,
            ResourceCategory::Js => self.include_scripts,
            ResourceCategory::Images => self.include_images,
            ResourceCategory::Videos => self.include_videos,
            ResourceCategory::Fonts => self.include_fonts,
        }
    }

    pub fn enabled_categories(&self) -> Vec<ResourceCategory> {
        ResourceCategory::ALL
            .iter()
            .copied()
            .filter(|c| self.includes(*c))
            .collect()
    }

    pub fn any_sanitization(&self) -> bool {
        self.remove_analytics
            || self.remove_tracking
            || self.remove_ads
            || self.remove_tag_manager
            || self.remove_malicious_tags
    }

    /// The forced encoding label, or `None` when detection is automatic.
    pub fn forced_encoding(&self) -> Option<&str> {
        let label = self.force_encoding.trim();
        if label.is_empty() || label.eq_ignore_ascii_case(AUTO_ENCODING) {
            None
        } else {
            Some(label)
        }
    }
}
