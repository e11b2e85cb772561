use blanket::blanket;
use once_cell::sync::OnceCell;
use std::env;
use std::path::PathBuf;
use std::sync::Mutex;

use which::{which, which_in};

use crate::config::ProbeConfig;
use crate::Error;

/// Env var holding the config file path
pub const CONFIG_ENV: &str = "SURFPROBE_CONFIG";
/// Env var overriding the `PATH` used to find `adb` and `apktool`
pub const PATH_ENV: &str = "SURFPROBE_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "surfprobe.toml";

fn find_program(bin: &str) -> Option<String> {
    let found = match env::var(PATH_ENV) {
        Ok(search) => {
            let cwd = env::current_dir().ok()?;
            which_in(bin, Some(&search), &cwd).ok()
        }
        Err(_) => which(bin).ok(),
    };
    found.map(|it| it.to_string_lossy().into())
}

/// Context is a trait for an object that finds binaries, looks up env vars
/// and knows where the configuration lives.
///
/// Only [Context::get_config] needs implementing, the rest have sensible
/// defaults.
#[blanket(derive(Ref, Box))]
pub trait Context: Send + Sync {
    fn maybe_get_env(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn maybe_get_bin(&self, bin: &str) -> Option<String> {
        find_program(bin)
    }

    fn has_bin(&self, bin: &str) -> bool {
        self.maybe_get_bin(bin).is_some()
    }

    fn get_bin(&self, bin: &str) -> crate::Result<String> {
        self.maybe_get_bin(bin)
            .ok_or_else(|| Error::MissingBin(bin.into()))
    }

    fn get_env(&self, key: &str) -> crate::Result<String> {
        self.maybe_get_env(key)
            .ok_or_else(|| Error::MissingEnv(key.into()))
    }

    /// `$SURFPROBE_CONFIG` if set, otherwise `surfprobe.toml` in the working
    /// directory
    fn get_config_file(&self) -> PathBuf {
        match self.maybe_get_env(CONFIG_ENV) {
            Some(v) => PathBuf::from(v),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        }
    }

    fn get_config(&self) -> crate::Result<&ProbeConfig>;
}

pub struct DefaultContext {
    bin_cache: Mutex<Vec<(String, String)>>,
    config: OnceCell<ProbeConfig>,
}

impl DefaultContext {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for DefaultContext {
    fn default() -> Self {
        Self {
            bin_cache: Mutex::new(Vec::new()),
            config: OnceCell::new(),
        }
    }
}

impl Context for DefaultContext {
    fn get_config(&self) -> crate::Result<&ProbeConfig> {
        self.config.get_or_try_init(|| {
            let path = self.get_config_file();
            if path.exists() {
                log::debug!("loading config from {}", path.to_string_lossy());
                ProbeConfig::parse(&path)
            } else if self.maybe_get_env(CONFIG_ENV).is_some() {
                Err(Error::MissingFile(path.to_string_lossy().into_owned()))
            } else {
                Ok(ProbeConfig::default())
            }
        })
    }

    fn maybe_get_bin(&self, prog: &str) -> Option<String> {
        let mut cache = match self.bin_cache.lock() {
            Ok(v) => v,
            Err(_) => return find_program(prog),
        };
        if let Some((_, path)) = cache.iter().find(|(name, _)| name == prog) {
            return Some(path.clone());
        }

        let found = find_program(prog)?;
        cache.push((prog.into(), found.clone()));
        Some(found)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{tmp_context, TestContext};
    use rstest::*;

    #[rstest]
    fn test_config_file_from_env(mut tmp_context: TestContext) {
        assert_eq!(
            tmp_context.get_config_file(),
            PathBuf::from(DEFAULT_CONFIG_FILE)
        );
        tmp_context.set_env(CONFIG_ENV, "/etc/probe.toml");
        assert_eq!(
            tmp_context.get_config_file(),
            PathBuf::from("/etc/probe.toml")
        );
    }

    #[rstest]
    fn test_missing_bin(tmp_context: TestContext) {
        assert!(matches!(
            tmp_context.get_bin("definitely-not-a-real-binary"),
            Err(Error::MissingBin(_))
        ));
    }
}
