use std::fmt::Display;

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct Version {
    pub major: usize,
    pub minor: usize,
    pub patch: usize,
    pub extra: Option<&'static str>,
}

include!(concat!(env!("OUT_DIR"), "/current_version.rs"));

impl Default for Version {
    fn default() -> Self {
        VERSION
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.extra {
            Some(s) => write!(f, "{}.{}.{}-{}", self.major, self.minor, self.patch, s),
            None => write!(f, "{}.{}.{}", self.major, self.minor, self.patch),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_matches_package_version() {
        assert_eq!(VERSION.to_string(), env!("CARGO_PKG_VERSION"));
        let pre = Version {
            major: 1,
            minor: 2,
            patch: 3,
            extra: Some("rc1"),
        };
        assert_eq!(pre.to_string(), "1.2.3-rc1");
    }
}
