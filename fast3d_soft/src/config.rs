use serde::{Deserialize, Serialize};

use crate::cmd::MicrocodeVersion;

/// Settings for a [GraphicsContext](crate::interpret::GraphicsContext).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GfxConfig {
    /// The layout display lists are decoded with.
    pub microcode: MicrocodeVersion,
    /// Whether fog blending reaches the shaders.
    pub enable_fog: bool,
    /// Request bilinear sampling when the tile isn't point filtered.
    pub texture_filtering: bool,
    /// Deepest nesting of `G_DL` calls before the list is rejected.
    pub max_call_depth: usize,
    /// Passed to [WindowBackend::init](crate::backend::WindowBackend::init).
    pub window_title: String,
    #[allow(missing_docs)]
    pub start_fullscreen: bool,
}

impl Default for GfxConfig {
    fn default() -> Self {
        Self {
            microcode: MicrocodeVersion::F3d,
            enable_fog: true,
            texture_filtering: false,
            max_call_depth: 10,
            window_title: "fast3d".to_string(),
            start_fullscreen: false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_config() {
        let config: GfxConfig = serde_json::from_str(r#"{ "microcode": "F3dex2" }"#).unwrap();
        assert_eq!(config.microcode, MicrocodeVersion::F3dex2);
        assert!(config.enable_fog);
        assert_eq!(config.max_call_depth, 10);
    }
}
