//! PipelineConfig - パイプラインの設定
//!
//! # 読み込み順
//! 1. 既定値（testnet 向け）
//! 2. JSON ファイル（指定された場合、欠けた項目は既定値）
//! 3. 環境変数 `SEALGATE_*` による上書き
//!
//! 最後に `validate()` で起動時に検証する（Fail-fast）。

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::retry::BackoffPolicy;
use crate::domain::blob::endpoint_url;
use crate::domain::{HexIdError, ObjectId};

pub const TESTNET_PACKAGE_ID: &str =
    "0xc173db0c6886cf0ba5dba6c4a80d7037e63f332847e176cebe0acd9043a01b78";
pub const USDC_TYPE: &str =
    "0xa1ec7fc00a6f40db9693ad1415d0c193ad3906494428cf252621037bd7117e29::usdc::USDC";
pub const SUISCAN_URL_TESTNET: &str = "https://suiscan.xyz/testnet";

/// One publisher/aggregator pair of the blob storage network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalrusService {
    pub id: String,
    pub name: String,
    pub publisher_url: String,
    pub aggregator_url: String,
}

impl WalrusService {
    pub fn publisher_endpoint(&self, path: &str) -> String {
        endpoint_url(&self.publisher_url, path)
    }

    pub fn aggregator_endpoint(&self, path: &str) -> String {
        endpoint_url(&self.aggregator_url, path)
    }
}

pub fn default_walrus_services() -> Vec<WalrusService> {
    vec![
        WalrusService {
            id: "service1".into(),
            name: "walrus.space".into(),
            publisher_url: "https://publisher.walrus-testnet.walrus.space".into(),
            aggregator_url: "https://aggregator.walrus-testnet.walrus.space".into(),
        },
        WalrusService {
            id: "service2".into(),
            name: "staketab.org".into(),
            publisher_url: "https://wal-publisher-testnet.staketab.org".into(),
            aggregator_url: "https://wal-aggregator-testnet.staketab.org".into(),
        },
    ]
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {key}: {source}")]
    InvalidId {
        key: &'static str,
        #[source]
        source: HexIdError,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Package of the access-control contract (the policy package).
    pub package_id: ObjectId,
    /// Existing service/policy object; bootstrapped on first run when absent.
    pub service_id: Option<ObjectId>,
    pub coin_type: String,
    /// Capability price in the coin's base unit.
    pub price: u64,
    pub threshold: u8,
    pub nonce_len: usize,
    pub session_ttl_minutes: u32,
    pub capability_ttl_ms: u64,
    pub storage_epochs: u32,
    pub download_timeout_ms: u64,
    pub gas_budget: u64,
    pub resolver: BackoffPolicy,
    pub report_api_base_url: String,
    pub walrus_services: Vec<WalrusService>,
    pub explorer_base_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            package_id: TESTNET_PACKAGE_ID
                .parse()
                .unwrap_or_else(|_| ObjectId::from_u64(0)),
            service_id: None,
            coin_type: USDC_TYPE.into(),
            price: 100_000,
            threshold: 2,
            nonce_len: crate::domain::policy::DEFAULT_NONCE_LEN,
            session_ttl_minutes: 10,
            capability_ttl_ms: 86_400_000,
            storage_epochs: 1,
            download_timeout_ms: 10_000,
            gas_budget: 10_000_000,
            resolver: BackoffPolicy::default(),
            report_api_base_url: "http://localhost:8080".into(),
            walrus_services: default_walrus_services(),
            explorer_base_url: SUISCAN_URL_TESTNET.into(),
        }
    }
}

impl PipelineConfig {
    /// Defaults, then `path` if given, then `SEALGATE_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from `lookup` (the process environment in production).
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("SEALGATE_PACKAGE_ID") {
            self.package_id = v.parse().map_err(|source| ConfigError::InvalidId {
                key: "SEALGATE_PACKAGE_ID",
                source,
            })?;
        }
        if let Some(v) = lookup("SEALGATE_SERVICE_ID") {
            self.service_id = Some(v.parse().map_err(|source| ConfigError::InvalidId {
                key: "SEALGATE_SERVICE_ID",
                source,
            })?);
        }
        if let Some(v) = lookup("SEALGATE_COIN_TYPE") {
            self.coin_type = v;
        }
        if let Some(v) = lookup("SEALGATE_REPORT_API") {
            self.report_api_base_url = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold == 0 {
            return Err(ConfigError::Invalid("threshold must be at least 1".into()));
        }
        if self.walrus_services.is_empty() {
            return Err(ConfigError::Invalid("no walrus services configured".into()));
        }
        if self.resolver.max_retries == 0 {
            return Err(ConfigError::Invalid("resolver.max_retries must be at least 1".into()));
        }
        if !(self.resolver.growth_factor >= 1.0) {
            return Err(ConfigError::Invalid("resolver.growth_factor must be >= 1".into()));
        }
        if self.coin_type.is_empty() {
            return Err(ConfigError::Invalid("coin_type is empty".into()));
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.session_ttl_minutes))
    }

    pub fn capability_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.capability_ttl_ms).unwrap_or(i64::MAX))
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.price, 100_000);
        assert_eq!(config.threshold, 2);
        assert_eq!(config.nonce_len, 5);
        assert_eq!(config.session_ttl_minutes, 10);
        assert_eq!(config.package_id.to_string(), TESTNET_PACKAGE_ID);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"price": 5, "resolver": {"initial_delay_ms": 10, "growth_factor": 2.0, "max_retries": 4}}"#)
                .unwrap();
        assert_eq!(config.price, 5);
        assert_eq!(config.resolver.max_retries, 4);
        assert_eq!(config.threshold, 2);
        assert_eq!(config.walrus_services, default_walrus_services());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SEALGATE_PACKAGE_ID", "0x2"),
            ("SEALGATE_SERVICE_ID", "0xabc"),
            ("SEALGATE_REPORT_API", "http://reports.internal"),
        ]);
        let mut config = PipelineConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.package_id, ObjectId::from_u64(2));
        assert_eq!(config.service_id, Some(ObjectId::from_u64(0xabc)));
        assert_eq!(config.report_api_base_url, "http://reports.internal");
        assert_eq!(config.coin_type, USDC_TYPE);
    }

    #[test]
    fn env_override_with_bad_id_is_rejected() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_env(|k| (k == "SEALGATE_PACKAGE_ID").then(|| "zz".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidId { key: "SEALGATE_PACKAGE_ID", .. }));
    }

    #[rstest]
    #[case::zero_threshold(|c: &mut PipelineConfig| c.threshold = 0)]
    #[case::no_services(|c: &mut PipelineConfig| c.walrus_services.clear())]
    #[case::zero_retries(|c: &mut PipelineConfig| c.resolver.max_retries = 0)]
    #[case::shrinking_backoff(|c: &mut PipelineConfig| c.resolver.growth_factor = 0.5)]
    fn invalid_configs_are_rejected(#[case] mutate: fn(&mut PipelineConfig)) {
        let mut config = PipelineConfig::default();
        mutate(&mut config);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn service_endpoints_are_normalized() {
        let service = &default_walrus_services()[0];
        assert_eq!(
            service.publisher_endpoint("/v1/blobs?epochs=1"),
            "https://publisher.walrus-testnet.walrus.space/v1/blobs?epochs=1"
        );
        assert_eq!(
            service.aggregator_endpoint("blobs/abc"),
            "https://aggregator.walrus-testnet.walrus.space/v1/blobs/abc"
        );
    }
}
