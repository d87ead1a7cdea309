use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use gauge_controller::DEFAULT_VOTE_COOLDOWN;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Account allowed to mutate the gauge registry
    pub admin: String,
    /// Account holding locked and vesting tokens
    pub custody: String,
    pub emission: EmissionConfig,
    pub controller: ControllerConfig,
    #[serde(default)]
    pub vesting: VestingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionConfig {
    /// Tokens per second in the first epoch
    #[serde(with = "amount")]
    pub initial_rate: u128,
    /// Seconds per rate epoch
    pub epoch_duration: u64,
    /// Rate is multiplied by numerator / denominator every epoch
    #[serde(with = "amount")]
    pub reduction_numerator: u128,
    #[serde(with = "amount")]
    pub reduction_denominator: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Seconds between two votes of one account on one gauge
    pub vote_cooldown: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestingConfig {
    /// Linear release duration in seconds. Payouts vest only when set.
    pub duration: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            admin: "admin".to_string(),
            custody: "custody".to_string(),
            emission: EmissionConfig {
                initial_rate: 10_000_000_000_000_000_000,
                epoch_duration: 365 * 86_400,
                // 2^(1/4) reduction per epoch
                reduction_numerator: 1_000_000_000_000_000_000,
                reduction_denominator: 1_189_207_115_002_721_024,
            },
            controller: ControllerConfig {
                vote_cooldown: DEFAULT_VOTE_COOLDOWN,
            },
            vesting: VestingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: EngineConfig =
            toml::from_str(&contents).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.admin.is_empty() {
            anyhow::bail!("Invalid admin: cannot be empty");
        }
        if self.custody.is_empty() {
            anyhow::bail!("Invalid custody account: cannot be empty");
        }
        if self.emission.epoch_duration == 0 {
            anyhow::bail!("Invalid epoch duration: cannot be 0");
        }
        if self.emission.reduction_denominator == 0
            || self.emission.reduction_numerator >= self.emission.reduction_denominator
        {
            anyhow::bail!("Invalid rate reduction: numerator must be below denominator");
        }
        if self.vesting.duration == Some(0) {
            anyhow::bail!("Invalid vesting duration: cannot be 0");
        }
        Ok(())
    }
}

/// TOML integers are 64-bit signed, so token amounts travel as strings.
/// Plain integers are accepted on input.
mod amount {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = u128;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a non-negative integer or a decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
                Ok(v as u128)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
                u128::try_from(v).map_err(|_| E::custom("amount cannot be negative"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
                v.replace('_', "")
                    .parse()
                    .map_err(|_| E::custom(format!("invalid amount: {}", v)))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.controller.vote_cooldown, 10 * 86_400);
        assert!(config.vesting.duration.is_none());
    }

    #[test]
    fn test_config_roundtrip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.toml");

        let mut config = EngineConfig::default();
        config.vesting.duration = Some(86_400);
        config.to_file(&path).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_parses_amount_forms() {
        let toml_str = r#"
            admin = "dao"
            custody = "vault"

            [emission]
            initial_rate = "10_000_000_000_000_000_000"
            epoch_duration = 31536000
            reduction_numerator = 4
            reduction_denominator = "5"

            [controller]
            vote_cooldown = 864000
        "#;

        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.emission.initial_rate, 10_000_000_000_000_000_000);
        assert_eq!(config.emission.reduction_numerator, 4);
        assert_eq!(config.emission.reduction_denominator, 5);
        assert_eq!(config.vesting, VestingConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_reduction() {
        let mut config = EngineConfig::default();
        config.emission.reduction_numerator = config.emission.reduction_denominator;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("numerator"));
    }

    #[test]
    fn test_validate_rejects_zero_vesting() {
        let mut config = EngineConfig::default();
        config.vesting.duration = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_has_context() {
        let dir = TempDir::new().unwrap();
        let err = EngineConfig::from_file(dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
