use super::*;

/// A `wallet` or `wallet.worker` login string. No chain-level address
/// validation happens here; the wallet part is carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(pub String);

impl Username {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.trim_matches('"')
    }

    pub fn wallet(&self) -> &str {
        self.as_str()
            .split_once('.')
            .map(|(wallet, _)| wallet)
            .unwrap_or_else(|| self.as_str())
    }

    pub fn worker(&self) -> &str {
        self.as_str()
            .split_once('.')
            .map(|(_, worker)| worker)
            .unwrap_or("default")
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Username {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_only() {
        let username = Username::new("JWALLET123");
        assert_eq!(username.wallet(), "JWALLET123");
        assert_eq!(username.worker(), "default");
    }

    #[test]
    fn wallet_and_worker() {
        let username = Username::new("JWALLET123.rig1");
        assert_eq!(username.wallet(), "JWALLET123");
        assert_eq!(username.worker(), "rig1");
    }

    #[test]
    fn worker_may_contain_dots() {
        let username = Username::new("JWALLET123.rig1.cpu0");
        assert_eq!(username.wallet(), "JWALLET123");
        assert_eq!(username.worker(), "rig1.cpu0");
    }

    #[test]
    fn strips_stray_quotes() {
        let username = Username::new("\"JWALLET123.rig1\"");
        assert_eq!(username.wallet(), "JWALLET123");
        assert_eq!(username.worker(), "rig1");
    }
}
