//! Elevation checks for commands that change service or scheduler state.

use crate::error::{MonitorError, Result};

/// Check if the current process runs with administrative rights
#[cfg(target_os = "windows")]
pub fn is_elevated() -> bool {
    use std::mem;

    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::Security::{
        GetTokenInformation, TOKEN_ELEVATION, TOKEN_QUERY, TokenElevation,
    };
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    let mut token_handle = HANDLE::default();
    unsafe {
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token_handle).is_err() {
            return false;
        }

        let mut elevation: TOKEN_ELEVATION = mem::zeroed();
        let mut return_length: u32 = 0;
        let queried = GetTokenInformation(
            token_handle,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut std::ffi::c_void),
            mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut return_length,
        );
        let _ = CloseHandle(token_handle);

        queried.is_ok() && elevation.TokenIsElevated != 0
    }
}

/// Check if running as root
#[cfg(unix)]
pub fn is_elevated() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Fail with [`MonitorError::PermissionDenied`] unless elevated.
///
/// On Linux an unprivileged user manages their own `systemctl --user` units and
/// crontab, so elevation is only mandatory on Windows.
pub fn require_elevated(action: &str) -> Result<()> {
    if is_elevated() {
        return Ok(());
    }
    if cfg!(target_os = "windows") {
        return Err(MonitorError::PermissionDenied(action.to_string()));
    }
    log::debug!("Not root, {action} will use the per-user service manager");
    Ok(())
}
