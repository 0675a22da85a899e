use std::fmt;

#[derive(Debug)]
pub enum ReadbackError {
    /// Requested rectangle/slice lies outside the texture bounds.
    InvalidRegion(String),

    /// The pixel format is not in the enumerated decode table. The
    /// format set is closed by design; decoding an unknown layout
    /// would silently produce garbage pixels.
    UnsupportedFormat(String),

    /// The GPU device/driver was reset or removed. The backend marks
    /// itself unusable; every further call on it short-circuits with
    /// this error instead of touching the dead device.
    DeviceRemoved,

    /// Mapping a staging resource failed for a reason other than
    /// device removal (e.g. out of memory).
    MapFailed(String),

    /// The GPU did not signal completion within the bounded fence
    /// wait deadline.
    Timeout,

    /// Pixel arithmetic (width × height × bytes-per-pixel) overflowed.
    BufferOverflow,

    InvalidConfig(String),

    BackendUnavailable(String),

    Platform(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadbackErrorClass {
    InvalidInput,
    Unsupported,
    Transient,
    Fatal,
}

impl ReadbackError {
    pub fn class(&self) -> ReadbackErrorClass {
        match self {
            Self::InvalidRegion(_) | Self::InvalidConfig(_) => ReadbackErrorClass::InvalidInput,
            Self::UnsupportedFormat(_) | Self::BackendUnavailable(_) => {
                ReadbackErrorClass::Unsupported
            }
            Self::Timeout => ReadbackErrorClass::Transient,
            Self::DeviceRemoved | Self::MapFailed(_) | Self::BufferOverflow | Self::Platform(_) => {
                ReadbackErrorClass::Fatal
            }
        }
    }

    /// Whether the device context is no longer valid for any further
    /// commands. Callers should drop the session and recreate it on a
    /// fresh device rather than retry.
    pub fn requires_device_reset(&self) -> bool {
        matches!(self, Self::DeviceRemoved)
    }
}

impl fmt::Display for ReadbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRegion(detail) => {
                write!(f, "requested read region is out of texture bounds: {detail}")
            }
            Self::UnsupportedFormat(fmt_name) => write!(
                f,
                "pixel format is not in the readback decode table: {fmt_name}"
            ),
            Self::DeviceRemoved => write!(f, "GPU device was removed or reset"),
            Self::MapFailed(detail) => write!(f, "failed to map staging resource: {detail}"),
            Self::Timeout => write!(f, "GPU fence was not signaled within the wait deadline"),
            Self::BufferOverflow => write!(f, "pixel buffer size overflow"),
            Self::InvalidConfig(message) => {
                write!(f, "invalid readback configuration: {message}")
            }
            Self::BackendUnavailable(message) => {
                write!(f, "no available backend implementation: {message}")
            }
            Self::Platform(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for ReadbackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Platform(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

pub type ReadbackResult<T> = Result<T, ReadbackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_removed_is_fatal_and_requires_reset() {
        let err = ReadbackError::DeviceRemoved;
        assert_eq!(err.class(), ReadbackErrorClass::Fatal);
        assert!(err.requires_device_reset());
    }

    #[test]
    fn timeout_is_transient_but_does_not_require_reset() {
        let err = ReadbackError::Timeout;
        assert_eq!(err.class(), ReadbackErrorClass::Transient);
        assert!(!err.requires_device_reset());
    }

    #[test]
    fn region_errors_are_programmer_errors() {
        let err = ReadbackError::InvalidRegion("x1 > width".into());
        assert_eq!(err.class(), ReadbackErrorClass::InvalidInput);
    }
}
