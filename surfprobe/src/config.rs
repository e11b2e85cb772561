use std::borrow::Cow;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;
use toml::{Table, Value};

use crate::classify::ExportPolicy;
use crate::utils::{path_str, read_file};

/// The payload delivered by every probe when nothing else is configured
pub const DEFAULT_PAYLOAD_URL: &str = "https://mymalware.com";
pub const DEFAULT_CONCURRENCY: usize = 1;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_DATABASE: &str = "./apk_info.db";

#[derive(Debug)]
pub enum Error {
    InvalidType,
    MissingKey,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::InvalidType => "InvalidType",
            Self::MissingKey => "MissingKey",
        })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Typed access to one table of a TOML file, tracking the dotted key path for
/// error messages
pub struct ConfigMap<'c> {
    path: &'c Path,
    name: Option<Cow<'c, str>>,
    table: &'c Table,
}

pub fn parse_config<R, F>(file: &Path, f: F) -> crate::Result<R>
where
    F: FnOnce(&ConfigMap) -> crate::Result<R>,
{
    let as_str = read_file(file)?;
    parse_config_str(file, &as_str, f)
}

fn parse_config_str<R, F>(file: &Path, raw: &str, f: F) -> crate::Result<R>
where
    F: FnOnce(&ConfigMap) -> crate::Result<R>,
{
    let table: Table = toml::from_str(raw).map_err(|e| crate::Error::new_cfg(file, &e))?;

    let base = ConfigMap {
        name: None,
        path: file,
        table: &table,
    };

    f(&base)
}

impl<'c> ConfigMap<'c> {
    fn key_path<'a>(&self, key: &'a str) -> Cow<'a, str> {
        match &self.name {
            None => Cow::Borrowed(key),
            Some(v) => Cow::Owned(format!("{}.{}", v, key)),
        }
    }

    pub fn invalid_key(&self, key: &str, expected: &str) -> crate::Error {
        crate::Error::new_cfg(
            self.path,
            &format!(
                "invalid value for key: {} (expected: {})",
                self.key_path(key),
                expected
            ),
        )
    }

    fn get(&self, key: &str) -> Option<&'c Value> {
        self.table.get(key)
    }

    pub fn maybe_get_int(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key) {
            Some(v) => v.as_integer().map(Some).ok_or(Error::InvalidType),
            None => Ok(None),
        }
    }

    pub fn maybe_get_int_typecheck(&self, key: &str) -> crate::Result<Option<i64>> {
        self.maybe_get_int(key)
            .map_err(|_| self.invalid_key(key, "int"))
    }

    /// Floats and integers are both accepted as a number
    pub fn maybe_get_number(&self, key: &str) -> Result<Option<f64>> {
        match self.get(key) {
            Some(Value::Float(f)) => Ok(Some(*f)),
            Some(Value::Integer(i)) => Ok(Some(*i as f64)),
            Some(_) => Err(Error::InvalidType),
            None => Ok(None),
        }
    }

    pub fn maybe_get_str(&self, key: &str) -> Result<Option<&'c str>> {
        match self.get(key) {
            Some(v) => v.as_str().map(Some).ok_or(Error::InvalidType),
            None => Ok(None),
        }
    }

    pub fn maybe_get_str_typecheck(&self, key: &str) -> crate::Result<Option<&'c str>> {
        self.maybe_get_str(key)
            .map_err(|_| self.invalid_key(key, "string"))
    }

    /// A number of seconds, which must not be negative
    pub fn maybe_get_secs_typecheck(&self, key: &str) -> crate::Result<Option<Duration>> {
        match self.maybe_get_number(key) {
            Ok(Some(v)) if v >= 0.0 && v.is_finite() => Ok(Some(Duration::from_secs_f64(v))),
            Ok(None) => Ok(None),
            _ => Err(self.invalid_key(key, "non-negative seconds")),
        }
    }

    pub fn maybe_get_map(&self, key: &'c str) -> Result<Option<ConfigMap<'c>>> {
        match self.get(key) {
            Some(v) => match v.as_table() {
                Some(table) => {
                    let name = match &self.name {
                        Some(parents) => Cow::Owned(format!("{parents}.{key}")),
                        None => Cow::Borrowed(key),
                    };
                    Ok(Some(Self {
                        name: Some(name),
                        path: self.path,
                        table,
                    }))
                }
                None => Err(Error::InvalidType),
            },
            None => Ok(None),
        }
    }

    pub fn maybe_get_map_typecheck(&self, key: &'c str) -> crate::Result<Option<ConfigMap<'c>>> {
        self.maybe_get_map(key)
            .map_err(|_| self.invalid_key(key, "table"))
    }
}

/// The `[adb]` table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdbConfig {
    pub executable: Option<String>,
    pub serial: Option<String>,
}

impl AdbConfig {
    fn from_map(map: &ConfigMap) -> crate::Result<Self> {
        Ok(Self {
            executable: map.maybe_get_str_typecheck("executable")?.map(String::from),
            serial: map.maybe_get_str_typecheck("serial")?.map(String::from),
        })
    }
}

/// Settings for an analysis run
///
/// ```toml
/// payload-url = "https://example.com/redirect"
/// concurrency = 2
/// interval = 1.5
/// timeout = 30
/// export-policy = "legacy"
/// database = "/data/apk_info.db"
///
/// [adb]
/// executable = "/opt/platform-tools/adb"
/// serial = "emulator-5554"
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    pub payload_url: String,
    pub concurrency: usize,
    pub interval: Duration,
    pub timeout: Option<Duration>,
    pub export_policy: ExportPolicy,
    pub database: PathBuf,
    pub adb: AdbConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            payload_url: DEFAULT_PAYLOAD_URL.into(),
            concurrency: DEFAULT_CONCURRENCY,
            interval: DEFAULT_INTERVAL,
            timeout: None,
            export_policy: ExportPolicy::default(),
            database: PathBuf::from(DEFAULT_DATABASE),
            adb: AdbConfig::default(),
        }
    }
}

impl ProbeConfig {
    pub fn parse(source: &Path) -> crate::Result<Self> {
        parse_config(source, Self::from_map)
    }

    pub fn parse_str(source: &Path, raw: &str) -> crate::Result<Self> {
        parse_config_str(source, raw, Self::from_map)
    }

    fn from_map(map: &ConfigMap) -> crate::Result<Self> {
        let mut cfg = Self::default();

        if let Some(url) = map.maybe_get_str_typecheck("payload-url")? {
            cfg.payload_url = url.into();
        }

        if let Some(n) = map.maybe_get_int_typecheck("concurrency")? {
            if n < 1 {
                return Err(map.invalid_key("concurrency", "positive int"));
            }
            cfg.concurrency = n as usize;
        }

        if let Some(v) = map.maybe_get_secs_typecheck("interval")? {
            cfg.interval = v;
        }

        cfg.timeout = map.maybe_get_secs_typecheck("timeout")?;

        if let Some(policy) = map.maybe_get_str_typecheck("export-policy")? {
            cfg.export_policy = policy
                .parse()
                .map_err(|_| map.invalid_key("export-policy", "\"explicit\" or \"legacy\""))?;
        }

        if let Some(db) = map.maybe_get_str_typecheck("database")? {
            cfg.database = PathBuf::from(db);
        }

        if let Some(adb) = map.maybe_get_map_typecheck("adb")? {
            cfg.adb = AdbConfig::from_map(&adb)?;
        }

        log::trace!("parsed config from {}: {:?}", path_str(map.path), cfg);
        Ok(cfg)
    }
}
