//! Configuration for the DIMSE engine: association-level knobs shared by
//! both listeners (public and internal) and by the upstream associator.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::DEFAULT_DIMSE_PORT;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimseConfig {
    /// Local Application Entity Title this endpoint presents as.
    pub local_aet: String,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_pdu")]
    pub max_pdu: u32,

    #[serde(default = "default_association_timeout_secs")]
    pub association_timeout_secs: u64,
}

impl Default for DimseConfig {
    fn default() -> Self {
        Self {
            local_aet: "DICOMSHIELD".to_string(),
            bind_addr: default_bind_addr(),
            port: default_port(),
            max_pdu: default_max_pdu(),
            association_timeout_secs: default_association_timeout_secs(),
        }
    }
}

impl DimseConfig {
    pub fn association_timeout(&self) -> Duration {
        Duration::from_secs(self.association_timeout_secs)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.local_aet.is_empty() || self.local_aet.len() > 16 {
            return Err(crate::error::DimseError::config(
                "AE title must be 1-16 characters",
            ));
        }
        if self.port == 0 {
            return Err(crate::error::DimseError::config(
                "port must be greater than 0",
            ));
        }
        if self.max_pdu < 4096 || self.max_pdu > 131_072 {
            return Err(crate::error::DimseError::config(
                "max PDU size must be between 4096 and 131072 bytes",
            ));
        }
        Ok(())
    }
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    DEFAULT_DIMSE_PORT
}

fn default_max_pdu() -> u32 {
    16_384
}

fn default_association_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = DimseConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_empty_ae_title() {
        let mut config = DimseConfig::default();
        config.local_aet = "".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_oversized_pdu() {
        let mut config = DimseConfig::default();
        config.max_pdu = 1;
        assert!(config.validate().is_err());
    }
}
