use std::fmt;

use serde::{Deserialize, Serialize};

/// Asset categories a capture can download. Each maps to one directory under
/// `static/` inside the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceCategory {
    Css,
    Js,
    Images,
    Videos,
    Fonts,
}

impl ResourceCategory {
    pub const ALL: [ResourceCategory; 5] = [
        ResourceCategory::Css,
        ResourceCategory::Js,
        ResourceCategory::Images,
        ResourceCategory::Videos,
        ResourceCategory::Fonts,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            ResourceCategory::Css => "css",
            ResourceCategory::Js => "js",
            ResourceCategory::Images => "images",
            ResourceCategory::Videos => "videos",
            ResourceCategory::Fonts => "fonts",
        }
    }

    /// Extension used when nothing better can be inferred.
    pub fn default_extension(self) -> &'static str {
        match self {
            ResourceCategory::Css => ".css",
            ResourceCategory::Js => ".js",
            ResourceCategory::Images => ".jpg",
            ResourceCategory::Videos => ".mp4",
            ResourceCategory::Fonts => ".woff2",
        }
    }

    /// Text categories are transcoded to UTF-8 after download.
    pub fn is_text(self) -> bool {
        matches!(self, ResourceCategory::Css | ResourceCategory::Js)
    }

    pub fn is_video(self) -> bool {
        self == ResourceCategory::Videos
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[cfg(test)]
mod tests {
    use super::ResourceCategory;

    #[test]
    fn directories_are_unique() {
        let mut dirs: Vec<_> = ResourceCategory::ALL.iter().map(|c| c.dir_name()).collect();
        dirs.sort_unstable();
        dirs.dedup();
        assert_eq!(dirs.len(), ResourceCategory::ALL.len());
    }

    #[test]
    fn only_stylesheets_and_scripts_are_text() {
        let text: Vec<_> = ResourceCategory::ALL
            .iter()
            .copied()
            .filter(|c| c.is_text())
            .collect();
        assert_eq!(text, vec![ResourceCategory::Css, ResourceCategory::Js]);
    }
}
