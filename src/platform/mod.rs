use crate::backend::{AutoBackendPolicy, ReadbackBackend, ReadbackBackendKind};
use crate::error::ReadbackResult;

#[cfg(target_os = "windows")]
pub(crate) mod windows;

#[cfg(target_os = "windows")]
pub(crate) fn build_backend(
    kind: ReadbackBackendKind,
    auto_policy: AutoBackendPolicy,
) -> ReadbackResult<Box<dyn ReadbackBackend>> {
    windows::build_backend(kind, auto_policy)
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn build_backend(
    kind: ReadbackBackendKind,
    _auto_policy: AutoBackendPolicy,
) -> ReadbackResult<Box<dyn ReadbackBackend>> {
    Err(crate::error::ReadbackError::BackendUnavailable(format!(
        "the {} readback backend requires Windows (D3D11/D3D12); \
         construct a session from your own ReadbackBackend implementation instead",
        kind.as_str()
    )))
}
