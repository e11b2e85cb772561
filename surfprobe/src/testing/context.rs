use std::collections::HashMap;

use rstest::fixture;

use crate::config::ProbeConfig;
use crate::Context;

#[fixture]
pub fn tmp_context() -> TestContext {
    TestContext::default()
}

/// A [Context] that only sees the env vars and binaries it was given
#[derive(Default)]
pub struct TestContext {
    env: HashMap<String, String>,
    bins: HashMap<String, String>,
    config: ProbeConfig,
}

impl TestContext {
    pub fn set_env<K: AsRef<str>, V: AsRef<str>>(&mut self, key: K, value: V) -> &mut Self {
        self.env.insert(key.as_ref().into(), value.as_ref().into());
        self
    }

    pub fn set_bin<K: AsRef<str>, V: AsRef<str>>(&mut self, key: K, bin: V) -> &mut Self {
        self.bins.insert(key.as_ref().into(), bin.as_ref().into());
        self
    }
}

impl Context for TestContext {
    fn maybe_get_env(&self, key: &str) -> Option<String> {
        self.env.get(key).map(String::from)
    }

    fn maybe_get_bin(&self, bin: &str) -> Option<String> {
        self.bins.get(bin).map(String::from)
    }

    fn get_config(&self) -> crate::Result<&ProbeConfig> {
        Ok(&self.config)
    }
}
