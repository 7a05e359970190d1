use serde::Deserialize;
use std::time::Duration;

/// Which concrete pseudonymization service backend to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PseudonymClientType {
    #[serde(rename = "gPAS")]
    GPas,
    #[serde(rename = "MII")]
    Mii,
}

/// Configuration for the pseudonymization service client, as read from the
/// `PSEUDONYMIZATION_SERVER` section of the proxy's configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct PseudonymClientConfig {
    #[serde(rename = "CLIENT_TYPE")]
    pub client_type: PseudonymClientType,
    #[serde(rename = "ENDPOINT_URL")]
    pub endpoint_url: String,
    #[serde(rename = "DOMAIN")]
    pub domain: String,
    #[serde(rename = "USER", default)]
    pub user: Option<String>,
    #[serde(rename = "PASSWORD", default)]
    pub password: Option<String>,
    #[serde(skip, default = "default_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl PseudonymClientConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn basic_auth(&self) -> Option<(&str, Option<&str>)> {
        self.user
            .as_deref()
            .map(|user| (user, self.password.as_deref()))
    }
}
