//! Layered configuration for shelf.
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults,
//! 2. `shelf.toml`, `shelf.yaml` and `shelf.json` in the platform config
//!    directory,
//! 3. a file passed explicitly (format picked by extension),
//! 4. the legacy `UPLOADS_PATH` environment variable (as `root`),
//! 5. `SHELF_`-prefixed environment variables (`SHELF_ROOT`, `SHELF_CONCURRENCY`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const APP_NAME: &str = "shelf";
pub const ENV_PREFIX: &str = "SHELF_";
/// Older deployments configure the root through this variable.
pub const LEGACY_ROOT_ENV: &str = "UPLOADS_PATH";
pub const DEFAULT_ROOT: &str = "./uploads";
pub const DEFAULT_CONCURRENCY: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage root. Relative paths are resolved against the working
    /// directory by [`Config::load`].
    pub root: PathBuf,
    /// Cap on simultaneous filesystem operations in tree walks.
    pub concurrency: usize,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl Config {
    /// Load from every source, validate, and make `root` absolute.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_dir = ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf());
        let config = Self::from_figment(Self::figment(config_dir.as_deref(), explicit)?)?;
        let cwd = std::env::current_dir().or_raise(|| ErrorKind::Load)?;
        let config = config.resolve(&cwd);
        tracing::debug!(root = %config.root.display(), concurrency = config.concurrency, "Configuration loaded");
        Ok(config)
    }

    /// The merged sources, without extracting them.
    pub fn figment(config_dir: Option<&Path>, explicit: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(dir) = config_dir {
            figment = figment
                .merge(Toml::file(dir.join(format!("{APP_NAME}.toml"))))
                .merge(Yaml::file(dir.join(format!("{APP_NAME}.yaml"))))
                .merge(Json::file(dir.join(format!("{APP_NAME}.json"))));
        }
        if let Some(path) = explicit {
            if !path.is_file() {
                exn::bail!(ErrorKind::MissingFile(path.to_path_buf()));
            }
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => figment.merge(Toml::file_exact(path)),
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
                Some("json") => figment.merge(Json::file_exact(path)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
            };
        }
        Ok(figment
            .merge(Env::raw().only(&[LEGACY_ROOT_ENV]).map(|_| "root".into()))
            .merge(Env::prefixed(ENV_PREFIX)))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("root"));
        }
        if self.concurrency == 0 {
            exn::bail!(ErrorKind::Invalid("concurrency"));
        }
        Ok(())
    }

    /// Anchor a relative `root` at `cwd`.
    pub fn resolve(mut self, cwd: &Path) -> Self {
        if self.root.is_relative() {
            self.root = cwd.join(&self.root);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    fn load(config_dir: Option<&Path>, explicit: Option<&Path>) -> Result<Config> {
        Config::from_figment(Config::figment(config_dir, explicit)?)
    }

    #[test]
    fn test_defaults() {
        Jail::expect_with(|_jail| {
            let config = load(None, None).unwrap();
            assert_eq!(config, Config::default());
            assert_eq!(config.root, Path::new("./uploads"));
            assert_eq!(config.concurrency, 20);
            Ok(())
        });
    }

    #[test]
    fn test_precedence() {
        Jail::expect_with(|jail| {
            let dir = jail.directory().join("config");
            std::fs::create_dir(&dir).unwrap();
            std::fs::write(dir.join("shelf.toml"), "root = \"/from/user\"\nconcurrency = 4\n").unwrap();
            jail.create_file("override.yaml", "concurrency: 8\n")?;

            let config = load(Some(&dir), None).unwrap();
            assert_eq!(config.root, Path::new("/from/user"));
            assert_eq!(config.concurrency, 4);

            let config = load(Some(&dir), Some(Path::new("override.yaml"))).unwrap();
            assert_eq!(config.root, Path::new("/from/user"));
            assert_eq!(config.concurrency, 8);

            jail.set_env("SHELF_CONCURRENCY", "16");
            let config = load(Some(&dir), Some(Path::new("override.yaml"))).unwrap();
            assert_eq!(config.concurrency, 16);
            Ok(())
        });
    }

    #[test]
    fn test_legacy_root_variable() {
        Jail::expect_with(|jail| {
            jail.set_env("UPLOADS_PATH", "/legacy/uploads");
            assert_eq!(load(None, None).unwrap().root, Path::new("/legacy/uploads"));
            jail.set_env("SHELF_ROOT", "/srv/shelf");
            assert_eq!(load(None, None).unwrap().root, Path::new("/srv/shelf"));
            Ok(())
        });
    }

    #[test]
    fn test_unrelated_prefixed_variables_are_ignored() {
        Jail::expect_with(|jail| {
            jail.set_env("SHELF_LOG", "debug");
            assert_eq!(load(None, None).unwrap(), Config::default());
            Ok(())
        });
    }

    #[rstest]
    #[case("concurrency = 0\n", ErrorKind::Invalid("concurrency"))]
    #[case("root = \"\"\n", ErrorKind::Invalid("root"))]
    #[case("concurrency = \"lots\"\n", ErrorKind::Load)]
    fn test_rejects_bad_values(#[case] toml: &str, #[case] expected: ErrorKind) {
        Jail::expect_with(|jail| {
            jail.create_file("shelf.toml", toml)?;
            let err = load(None, Some(Path::new("shelf.toml"))).unwrap_err();
            assert_eq!(*err, expected);
            Ok(())
        });
    }

    #[test]
    fn test_explicit_file_must_exist_and_be_known() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let err = Config::figment(None, Some(&missing)).unwrap_err();
        assert_eq!(*err, ErrorKind::MissingFile(missing));

        let ini = dir.path().join("shelf.ini");
        std::fs::write(&ini, "root=/x").unwrap();
        let err = Config::figment(None, Some(&ini)).unwrap_err();
        assert_eq!(*err, ErrorKind::UnsupportedFormat(ini));
    }

    #[test]
    fn test_resolve_relative_root() {
        let config = Config::default().resolve(Path::new("/work"));
        assert_eq!(config.root, Path::new("/work/./uploads"));
        let config = Config {
            root: PathBuf::from("/abs"),
            ..Config::default()
        }
        .resolve(Path::new("/work"));
        assert_eq!(config.root, Path::new("/abs"));
    }
}
