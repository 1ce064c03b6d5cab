//! Error types for the reverse-map subsystem

use thiserror::Error;

use crate::meta_file::MetaFsIoOpcode;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Status code reported when the OS does not attach an errno to a failure.
pub const EIO: i32 = 5;

/// Status code for I/O requests that fall outside the file.
pub const EINVAL: i32 = 22;

/// Errors that can occur in the reverse-map subsystem
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Geometry Errors
    // =========================================================================
    /// Page geometry cannot be derived from the configuration
    #[error("Invalid reverse map geometry: {0}")]
    InvalidGeometry(String),

    /// A configuration value disagrees with the geometry cached at init
    #[error("Geometry mismatch for {field}: cached {cached}, observed {observed}")]
    GeometryMismatch {
        field: &'static str,
        cached: u64,
        observed: u64,
    },

    // =========================================================================
    // Metadata File Errors
    // =========================================================================
    /// Metadata file creation failed
    #[error("Failed to create metadata file {file} (status {code})")]
    MetaFileCreate { file: String, code: i32 },

    /// Metadata file I/O failed
    #[error("Metadata file {opcode} on {file} at offset {offset} failed (status {code})")]
    MetaFileIo {
        file: String,
        opcode: MetaFsIoOpcode,
        offset: u64,
        code: i32,
    },

    /// Metadata file is not open
    #[error("Metadata file is not open: {0}")]
    MetaFileNotOpen(String),

    // =========================================================================
    // Reverse Map Errors
    // =========================================================================
    /// Index outside its valid range
    #[error("{what} {index} out of range (limit {limit})")]
    OutOfRange {
        what: &'static str,
        index: u64,
        limit: u64,
    },

    /// Caller-provided buffer is smaller than the transfer
    #[error("Buffer too small: need {required} bytes, got {actual}")]
    BufferTooSmall { required: u64, actual: u64 },

    /// Pack has no stripe linked
    #[error("Reverse map pack is not linked to a stripe")]
    VsidNotLinked,

    /// Pack has no volume manager or address-translation services bound
    #[error("Reverse map pack is not bound to address translation")]
    PackNotAssociated,

    /// Volume manager could not be resolved for an array
    #[error("Volume manager unavailable for array: {0}")]
    VolumeManagerUnavailable(String),

    /// Manager used before init
    #[error("Reverse map manager is not initialized")]
    NotInitialized,
}

impl Error {
    /// Integer status carried by file-store failures, as reported by the store.
    ///
    /// Returns `None` for errors that did not originate from a file-store
    /// status code.
    pub fn status_code(&self) -> Option<i32> {
        match self {
            Error::MetaFileCreate { code, .. } | Error::MetaFileIo { code, .. } => Some(*code),
            Error::Io(e) => Some(e.raw_os_error().unwrap_or(EIO)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_is_verbatim() {
        let err = Error::MetaFileIo {
            file: "RevMapWhole".into(),
            opcode: MetaFsIoOpcode::Read,
            offset: 0,
            code: -28,
        };
        assert_eq!(err.status_code(), Some(-28));

        let err = Error::MetaFileCreate {
            file: "RevMapWhole".into(),
            code: 12,
        };
        assert_eq!(err.status_code(), Some(12));
    }

    #[test]
    fn test_status_code_absent_for_logic_errors() {
        assert_eq!(Error::VsidNotLinked.status_code(), None);
        assert_eq!(Error::Config("bad".into()).status_code(), None);
    }

    #[test]
    fn test_io_error_falls_back_to_eio() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(err.status_code(), Some(EIO));
    }

    #[test]
    fn test_display() {
        let err = Error::GeometryMismatch {
            field: "mpage_size",
            cached: 4096,
            observed: 8192,
        };
        assert_eq!(
            err.to_string(),
            "Geometry mismatch for mpage_size: cached 4096, observed 8192"
        );
    }
}
