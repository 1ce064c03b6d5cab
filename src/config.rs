//! Array-level configuration
//!
//! Supplies the constants the reverse map derives its geometry from
//! (page size, blocks per stripe, stripe count, write-buffer pool size)
//! together with the array identity and the metadata store selection.
//!
//! Configuration can be loaded from YAML:
//!
//! ```yaml
//! array_name: POSArray
//! array_id: 0
//! mpage_size: 4032
//! blks_per_stripe: 128
//! max_vsid: 8192
//! num_wb_stripes: 1024
//! store: file
//! meta_dir: /var/lib/revmap
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mapper::reversemap::RevMapGeometry;

// =============================================================================
// Defaults
// =============================================================================

/// Metadata filesystem page size in bytes.
pub const DEFAULT_MPAGE_SIZE: u32 = 4032;

/// Blocks per stripe for the default array layout.
pub const DEFAULT_BLKS_PER_STRIPE: u32 = 128;

/// Stripe count for the default array layout.
pub const DEFAULT_MAX_VSID: u32 = 8192;

/// Write-buffer stripe pool size for the default array layout.
pub const DEFAULT_NUM_WB_STRIPES: u32 = 1024;

/// Default root for metadata files.
pub const DEFAULT_META_DIR: &str = "/var/lib/revmap";

// =============================================================================
// Store Selection
// =============================================================================

/// Which metadata file store backs the reverse map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Real files under `meta_dir`
    #[default]
    File,
    /// In-memory store for tests
    Mock,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::File => write!(f, "file"),
            StoreBackend::Mock => write!(f, "mock"),
        }
    }
}

// =============================================================================
// Array Configuration
// =============================================================================

/// Array configuration consumed by the mapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrayConfig {
    /// Array name (also the metadata subdirectory)
    pub array_name: String,

    /// Numeric array identity
    pub array_id: u32,

    /// Bytes per persisted metadata page
    pub mpage_size: u32,

    /// Blocks (reverse map entries) per stripe
    pub blks_per_stripe: u32,

    /// Number of virtual stripes in the array
    pub max_vsid: u32,

    /// Number of write-buffer stripe slots
    pub num_wb_stripes: u32,

    /// Metadata store selection
    pub store: StoreBackend,

    /// Root directory for file-backed metadata
    pub meta_dir: PathBuf,
}

impl Default for ArrayConfig {
    fn default() -> Self {
        Self {
            array_name: "POSArray".to_string(),
            array_id: 0,
            mpage_size: DEFAULT_MPAGE_SIZE,
            blks_per_stripe: DEFAULT_BLKS_PER_STRIPE,
            max_vsid: DEFAULT_MAX_VSID,
            num_wb_stripes: DEFAULT_NUM_WB_STRIPES,
            store: StoreBackend::File,
            meta_dir: PathBuf::from(DEFAULT_META_DIR),
        }
    }
}

impl ArrayConfig {
    /// Small in-memory configuration for tests.
    pub fn for_test(array_name: &str) -> Self {
        Self {
            array_name: array_name.to_string(),
            mpage_size: 4096,
            blks_per_stripe: 224,
            max_vsid: 64,
            num_wb_stripes: 8,
            store: StoreBackend::Mock,
            ..Default::default()
        }
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Parse configuration from a YAML document.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: ArrayConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Whether the in-memory store is selected.
    pub fn is_ut(&self) -> bool {
        self.store == StoreBackend::Mock
    }

    /// Directory holding this array's metadata files.
    pub fn array_meta_dir(&self) -> PathBuf {
        self.meta_dir.join(&self.array_name)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.array_name.is_empty() {
            return Err(Error::Config("array_name must not be empty".into()));
        }
        if self.blks_per_stripe == 0 {
            return Err(Error::Config("blks_per_stripe must be > 0".into()));
        }
        if self.max_vsid == 0 {
            return Err(Error::Config("max_vsid must be > 0".into()));
        }
        if self.num_wb_stripes == 0 {
            return Err(Error::Config("num_wb_stripes must be > 0".into()));
        }
        RevMapGeometry::new(self.mpage_size, self.blks_per_stripe)?;
        Ok(())
    }
}
