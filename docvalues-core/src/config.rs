//! Writer configuration

use serde::{Deserialize, Serialize};

use crate::docvalues::VERSION_CURRENT;
use crate::docvalues::VERSION_START;
use crate::error::{Error, Result};
use crate::packed::block_packed::MAX_TABLE_SIZE;
use crate::packed::check_block_size;

fn default_block_size() -> u32 {
    16384
}

fn default_address_interval() -> u32 {
    16
}

fn default_optimize_storage() -> bool {
    true
}

fn default_max_table_size() -> usize {
    MAX_TABLE_SIZE
}

fn default_format_version() -> i32 {
    VERSION_CURRENT
}

/// Configuration for [`DocValuesWriter`](crate::DocValuesWriter)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocValuesConfig {
    /// Values per block-packed / monotonic page (power of 2, 64..=2^27)
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    /// Dictionary terms per prefix-compressed batch
    #[serde(default = "default_address_interval")]
    pub address_interval: u32,
    /// Allow TABLE pages inside block-packed streams
    #[serde(default = "default_optimize_storage")]
    pub optimize_storage: bool,
    /// Distinct-value cap for TABLE encodings (1..=256)
    #[serde(default = "default_max_table_size")]
    pub max_table_size: usize,
    /// On-disk format version to write. Version 0 has no checksum footers.
    #[serde(default = "default_format_version")]
    pub format_version: i32,
}

impl Default for DocValuesConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            address_interval: default_address_interval(),
            optimize_storage: default_optimize_storage(),
            max_table_size: default_max_table_size(),
            format_version: default_format_version(),
        }
    }
}

impl DocValuesConfig {
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_address_interval(mut self, address_interval: u32) -> Self {
        self.address_interval = address_interval;
        self
    }

    pub fn with_optimize_storage(mut self, optimize_storage: bool) -> Self {
        self.optimize_storage = optimize_storage;
        self
    }

    pub fn with_max_table_size(mut self, max_table_size: usize) -> Self {
        self.max_table_size = max_table_size;
        self
    }

    pub fn with_format_version(mut self, format_version: i32) -> Self {
        self.format_version = format_version;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_block_size(self.block_size)?;
        if self.address_interval == 0 {
            return Err(Error::invalid("address_interval must be at least 1"));
        }
        if !(1..=MAX_TABLE_SIZE).contains(&self.max_table_size) {
            return Err(Error::invalid(format!(
                "max_table_size must be in 1..={}, got {}",
                MAX_TABLE_SIZE, self.max_table_size
            )));
        }
        if !(VERSION_START..=VERSION_CURRENT).contains(&self.format_version) {
            return Err(Error::invalid(format!(
                "format_version must be in {}..={}, got {}",
                VERSION_START, VERSION_CURRENT, self.format_version
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DocValuesConfig::default();
        config.validate().unwrap();
        assert_eq!(config.block_size, 16384);
        assert_eq!(config.address_interval, 16);
        assert_eq!(config.format_version, VERSION_CURRENT);
    }

    #[test]
    fn test_validation() {
        let base = DocValuesConfig::default();
        assert!(base.clone().with_block_size(1000).validate().is_err());
        assert!(base.clone().with_address_interval(0).validate().is_err());
        assert!(base.clone().with_max_table_size(0).validate().is_err());
        assert!(base.clone().with_max_table_size(257).validate().is_err());
        assert!(base.clone().with_format_version(VERSION_CURRENT + 1).validate().is_err());
        base.with_format_version(VERSION_START).validate().unwrap();
    }

    #[test]
    fn test_serde_fills_missing_fields() {
        let config: DocValuesConfig = serde_json::from_str(r#"{"block_size": 128}"#).unwrap();
        assert_eq!(config.block_size, 128);
        assert_eq!(config.address_interval, 16);
        assert!(config.optimize_storage);
    }
}
