// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// FMO: the registry of running host instances. One named mutex plus one
// shared region, created and torn down together.

use crate::region::DEFAULT_REGION_SIZE;
use crate::{Error, NamedMutex, Result, SharedRegion};

pub const DEFAULT_MUTEX_NAME: &str = "/ssp_mutex";
pub const DEFAULT_SHARED_NAME: &str = "/ssp_fmo";

/// Environment overrides for the two registry names.
pub const MUTEX_NAME_ENV: &str = "SHIORI_FMO_MUTEX";
pub const SHARED_NAME_ENV: &str = "SHIORI_FMO_SHARED";

/// Names and shape of the registry resources.
///
/// Independent installations on one machine must pick distinct names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FmoConfig {
    pub mutex_name: String,
    pub shared_name: String,
    /// Region size in bytes.
    pub size: usize,
    /// Drop the region's global name right after creation. Late joiners
    /// then cannot find it by name; turn this off when other processes
    /// must discover the registry with [`FmoRegistry::attach`].
    pub ephemeral: bool,
}

impl Default for FmoConfig {
    fn default() -> Self {
        Self {
            mutex_name: DEFAULT_MUTEX_NAME.to_owned(),
            shared_name: DEFAULT_SHARED_NAME.to_owned(),
            size: DEFAULT_REGION_SIZE,
            ephemeral: true,
        }
    }
}

impl FmoConfig {
    pub fn new(mutex_name: &str, shared_name: &str) -> Self {
        Self {
            mutex_name: mutex_name.to_owned(),
            shared_name: shared_name.to_owned(),
            ..Self::default()
        }
    }

    /// Defaults, with names overridden by `SHIORI_FMO_MUTEX` / `SHIORI_FMO_SHARED`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(name) = lookup(MUTEX_NAME_ENV).filter(|v| !v.is_empty()) {
            config.mutex_name = name;
        }
        if let Some(name) = lookup(SHARED_NAME_ENV).filter(|v| !v.is_empty()) {
            config.shared_name = name;
        }
        config
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }
}

/// Owns the registry's mutex and region as one unit.
///
/// Read and write the region only through [`FmoRegistry::publish`] /
/// [`FmoRegistry::snapshot`] (or the region's guarded calls with
/// [`FmoRegistry::mutex`]). Nothing stops raw access, but it observes
/// undefined intermediate state.
pub struct FmoRegistry {
    mutex: NamedMutex,
    region: SharedRegion,
}

impl FmoRegistry {
    /// Claim the registry as the primary instance.
    ///
    /// Fails with [`Error::AlreadyRunning`] when another instance holds the
    /// mutex name. If the region cannot be created the freshly created
    /// mutex is closed before the error is returned.
    pub fn open(config: &FmoConfig) -> Result<Self> {
        tracing::info!(
            mutex = %config.mutex_name,
            shared = %config.shared_name,
            size = config.size,
            "FMO initializing"
        );
        let mut mutex = NamedMutex::create(&config.mutex_name).map_err(|e| match e {
            Error::AlreadyHeld { name } => Error::AlreadyRunning { name },
            other => other,
        })?;

        let region = if config.ephemeral {
            SharedRegion::create(&config.shared_name, config.size)
        } else {
            SharedRegion::create_named(&config.shared_name, config.size)
        };
        let region = match region {
            Ok(region) => region,
            Err(e) => {
                mutex.close();
                return Err(e);
            }
        };

        Ok(Self { mutex, region })
    }

    /// Claim the registry with [`FmoConfig::from_env`].
    pub fn open_default() -> Result<Self> {
        Self::open(&FmoConfig::from_env())
    }

    /// Join a registry created by another process with `ephemeral = false`.
    /// Cleanup of an attached registry leaves both names to their creator.
    pub fn attach(config: &FmoConfig) -> Result<Self> {
        let mutex = NamedMutex::attach(&config.mutex_name)?;
        let region = SharedRegion::open(&config.shared_name)?;
        Ok(Self { mutex, region })
    }

    pub fn mutex(&self) -> &NamedMutex {
        &self.mutex
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    /// True if this process created the registry.
    pub fn is_primary(&self) -> bool {
        self.mutex.is_owned()
    }

    /// Replace the registry payload. Returns the bytes actually stored.
    pub fn publish(&self, bytes: &[u8]) -> Result<usize> {
        self.region.write_guarded(bytes, &self.mutex)
    }

    /// Copy the registry payload.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        self.region.read_guarded(&self.mutex)
    }

    /// Release the region, then the mutex. Idempotent.
    pub fn cleanup(&mut self) {
        if self.region.is_open() || self.mutex.is_open() {
            tracing::info!(mutex = %self.mutex.name(), shared = %self.region.name(), "FMO cleanup");
        }
        self.region.close();
        self.mutex.close();
    }
}

impl Drop for FmoRegistry {
    fn drop(&mut self) {
        self.cleanup();
    }
}
