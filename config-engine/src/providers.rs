use std::path::PathBuf;

/// A configuration layer merged on top of the defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// A YAML (`.yaml`/`.yml`) or TOML (`.toml`) file
    File { path: PathBuf, required: bool },
    /// YAML text, mostly useful in tests and for CLI overrides
    InlineYaml(String),
    /// Environment variables with the given prefix, `__` separating nested keys
    Env { prefix: String },
}

impl ConfigSource {
    /// An optional file: skipped if it does not exist
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            required: false,
        }
    }

    /// A file that must exist
    pub fn required_file(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            required: true,
        }
    }

    pub fn inline_yaml(text: impl Into<String>) -> Self {
        Self::InlineYaml(text.into())
    }

    pub fn env(prefix: impl Into<String>) -> Self {
        Self::Env {
            prefix: prefix.into(),
        }
    }
}
