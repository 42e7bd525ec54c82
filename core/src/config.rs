//! Network description files.
//!
//! A network is a TOML document with one `[[layer]]` table per layer, tagged by `type`:
//!
//! ```toml
//! [[layer]]
//! type = "sequence_data"
//! name = "data"
//! [layer.data]
//! video_source = "train_videos.txt"
//! shot_source = "train_shots.txt"
//! batch_size = 8
//! num_frames = 5
//! [layer.transform]
//! crop_size = 112
//!
//! [[layer]]
//! type = "gather"
//! name = "gather"
//! ```

use crate::data::{Modality, TransformConfig};
use crate::layers::LayerKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn one() -> usize {
    1
}

/// Parameters of the sequence-data layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceDataConfig {
    /// Video list: `path length label` per line.
    pub video_source: PathBuf,
    /// Shot list: `shotfile length` per line, aligned with `video_source`.
    pub shot_source: PathBuf,
    #[serde(default = "one")]
    pub batch_size: usize,
    /// Resize target; frames keep their size unless both are non-zero.
    #[serde(default)]
    pub new_height: u32,
    #[serde(default)]
    pub new_width: u32,
    #[serde(default = "one")]
    pub num_frames: usize,
    #[serde(default = "one")]
    pub num_segments: usize,
    #[serde(default = "one")]
    pub num_shots: usize,
    #[serde(default)]
    pub modality: Modality,
    #[serde(default)]
    pub shuffle: bool,
    /// Frame file-name pattern, defaulting per modality.
    #[serde(default)]
    pub name_pattern: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SequenceDataConfig {
    pub fn new(video_source: impl Into<PathBuf>, shot_source: impl Into<PathBuf>) -> Self {
        Self {
            video_source: video_source.into(),
            shot_source: shot_source.into(),
            batch_size: 1,
            new_height: 0,
            new_width: 0,
            num_frames: 1,
            num_segments: 1,
            num_shots: 1,
            modality: Modality::default(),
            shuffle: false,
            name_pattern: None,
            seed: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("batch_size", self.batch_size),
            ("num_frames", self.num_frames),
            ("num_segments", self.num_segments),
            ("num_shots", self.num_shots),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{field} must be positive")));
            }
        }
        if (self.new_height == 0) != (self.new_width == 0) {
            return Err(ConfigError::Invalid(
                "new_height and new_width must both be set or both be zero".into(),
            ));
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [&mut self.video_source, &mut self.shot_source] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// One `[[layer]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerConfig {
    Gather {
        name: String,
    },
    SequenceData {
        name: String,
        data: SequenceDataConfig,
        #[serde(default)]
        transform: TransformConfig,
    },
}

impl LayerConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Gather { name } | Self::SequenceData { name, .. } => name,
        }
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            Self::Gather { .. } => LayerKind::Gather,
            Self::SequenceData { .. } => LayerKind::SequenceData,
        }
    }
}

/// A parsed network description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetConfig {
    #[serde(rename = "layer", default)]
    pub layers: Vec<LayerConfig>,
}

impl NetConfig {
    /// Parses and validates a TOML document. Relative paths are kept as written.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML file. Relative source paths are resolved against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        let base = path.parent().unwrap_or(Path::new(""));
        for layer in &mut config.layers {
            if let LayerConfig::SequenceData { data, .. } = layer {
                data.resolve_paths(base);
            }
        }
        Ok(config)
    }

    /// Checks layer names are unique and layer parameters are in range.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for layer in &self.layers {
            if !names.insert(layer.name()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate layer name `{}`",
                    layer.name()
                )));
            }
            if let LayerConfig::SequenceData { data, .. } = layer {
                data.validate()?;
            }
        }
        Ok(())
    }

    pub fn layer(&self, name: &str) -> Option<&LayerConfig> {
        self.layers.iter().find(|layer| layer.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Phase;

    const NET: &str = r#"
        [[layer]]
        type = "sequence_data"
        name = "data"
        [layer.data]
        video_source = "videos.txt"
        shot_source = "shots.txt"
        batch_size = 8
        num_frames = 5
        num_segments = 3
        modality = "FLOW"
        shuffle = true
        seed = 7
        [layer.transform]
        crop_size = 224
        mirror = true
        mean_values = [104.0, 117.0, 123.0]

        [[layer]]
        type = "gather"
        name = "gather"
    "#;

    #[test]
    fn test_parse_net() {
        let net = NetConfig::from_toml_str(NET).unwrap();
        assert_eq!(net.layers.len(), 2);
        assert_eq!(net.layers[1], LayerConfig::Gather { name: "gather".into() });
        assert_eq!(net.layers[1].kind(), LayerKind::Gather);

        let Some(LayerConfig::SequenceData { data, transform, .. }) = net.layer("data") else {
            panic!("expected a sequence_data layer");
        };
        assert_eq!(data.batch_size, 8);
        assert_eq!(data.num_shots, 1);
        assert_eq!(data.modality, Modality::Flow);
        assert_eq!(data.seed, Some(7));
        assert!(data.name_pattern.is_none());
        assert_eq!(transform.crop_size, 224);
        assert_eq!(transform.mean_values, vec![104.0, 117.0, 123.0]);
        assert_eq!(transform.phase, Phase::Train);
    }

    #[test]
    fn test_defaults() {
        let net = NetConfig::from_toml_str(
            "[[layer]]\ntype = \"sequence_data\"\nname = \"d\"\n[layer.data]\nvideo_source = \"v\"\nshot_source = \"s\"\n",
        )
        .unwrap();
        let LayerConfig::SequenceData { data, transform, .. } = &net.layers[0] else {
            panic!("expected a sequence_data layer");
        };
        assert_eq!(data, &SequenceDataConfig::new("v", "s"));
        assert_eq!(transform, &TransformConfig::default());
    }

    #[test]
    fn test_rejects_zero_counts() {
        let text = NET.replace("num_frames = 5", "num_frames = 0");
        let err = NetConfig::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("num_frames")));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let text = NET.replace("name = \"gather\"", "name = \"data\"");
        assert!(matches!(
            NetConfig::from_toml_str(&text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_unknown_type() {
        let err = NetConfig::from_toml_str("[[layer]]\ntype = \"softmax\"\nname = \"x\"\n");
        assert!(matches!(err, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_file_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.toml");
        fs::write(&path, NET).unwrap();
        let net = NetConfig::from_file(&path).unwrap();
        let Some(LayerConfig::SequenceData { data, .. }) = net.layer("data") else {
            panic!("expected a sequence_data layer");
        };
        assert_eq!(data.video_source, dir.path().join("videos.txt"));

        assert!(matches!(
            NetConfig::from_file(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
