//! PCD Service Configuration
//!
//! The firmware module sized and gated its behavior with fixed build-time PCDs. Those knobs are collected here and
//! handed to [`PcdDatabase`](crate::PcdDatabase) at construction.
//!
//! ## Static Configuration Example
//!
//! ```rust
//! use patina_pcd::config::PcdConfig;
//!
//! static VPD: [u8; 16] = [0; 16];
//!
//! static CONFIG: PcdConfig = PcdConfig::new().with_max_callbacks_per_token(4).with_vpd_region(&VPD);
//! assert!(CONFIG.validate().is_ok());
//! ```
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::error::{Error, Result};

/// The configuration for the PCD service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcdConfig {
    /// Number of callback slots available per token (`PcdMaxPeiPcdCallBackNumberPerPcdEntry`).
    pub max_callbacks_per_token: usize,
    /// Enables `GetNextToken` and `GetNextTokenSpace` (`PcdPeiPcdDatabaseTraverseEnabled`).
    pub traverse_enabled: bool,
    /// Enables callback registration and invocation (`PcdPeiPcdDatabaseCallbackOnSetEnabled`).
    pub callback_on_set_enabled: bool,
    /// Enables the GUID scoped accessors (`PcdPeiPcdDatabaseExEnabled`).
    pub ex_enabled: bool,
    /// The region VPD offsets are relative to (`PcdVpdBaseAddress`).
    pub vpd_region: Option<&'static [u8]>,
}

impl PcdConfig {
    pub const DEFAULT_MAX_CALLBACKS_PER_TOKEN: usize = 8;

    pub const fn new() -> Self {
        Self {
            max_callbacks_per_token: Self::DEFAULT_MAX_CALLBACKS_PER_TOKEN,
            traverse_enabled: true,
            callback_on_set_enabled: true,
            ex_enabled: true,
            vpd_region: None,
        }
    }

    pub const fn with_max_callbacks_per_token(mut self, count: usize) -> Self {
        self.max_callbacks_per_token = count;
        self
    }

    pub const fn with_traverse(mut self, enabled: bool) -> Self {
        self.traverse_enabled = enabled;
        self
    }

    pub const fn with_callback_on_set(mut self, enabled: bool) -> Self {
        self.callback_on_set_enabled = enabled;
        self
    }

    pub const fn with_ex(mut self, enabled: bool) -> Self {
        self.ex_enabled = enabled;
        self
    }

    pub const fn with_vpd_region(mut self, region: &'static [u8]) -> Self {
        self.vpd_region = Some(region);
        self
    }

    /// Checks the configuration for combinations the service cannot honor.
    pub const fn validate(&self) -> Result<()> {
        if self.callback_on_set_enabled && self.max_callbacks_per_token == 0 {
            return Err(Error::InvalidConfig("callbacks enabled with zero slots per token"));
        }
        Ok(())
    }
}

impl Default for PcdConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_firmware_defaults() {
        let config = PcdConfig::default();
        assert_eq!(config.max_callbacks_per_token, 8);
        assert!(config.traverse_enabled && config.callback_on_set_enabled && config.ex_enabled);
        assert!(config.vpd_region.is_none());
    }

    #[test]
    fn test_zero_callback_slots_rejected_only_when_callbacks_enabled() {
        assert!(PcdConfig::new().with_max_callbacks_per_token(0).validate().is_err());
        assert!(PcdConfig::new().with_max_callbacks_per_token(0).with_callback_on_set(false).validate().is_ok());
    }
}
