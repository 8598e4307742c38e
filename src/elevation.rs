use crate::error::ElevationError;

#[cfg(windows)]
use std::os::windows::ffi::OsStrExt;
#[cfg(windows)]
use windows_sys::Win32::Security::{CheckTokenMembership, CreateWellKnownSid, WinBuiltinAdministratorsSid, SECURITY_MAX_SID_SIZE};

pub trait Elevation: Send + Sync {
    fn is_elevated(&self) -> bool;
    /// Start a new elevated instance of this program. On success the caller
    /// is expected to exit.
    fn relaunch_elevated(&self) -> Result<(), ElevationError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemElevation;

impl Elevation for SystemElevation {
    fn is_elevated(&self) -> bool {
        is_elevated()
    }

    fn relaunch_elevated(&self) -> Result<(), ElevationError> {
        relaunch_as_admin()
    }
}

/// Treats the process as elevated; used when the operator opts out of the
/// elevation requirement.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeElevated;

impl Elevation for AssumeElevated {
    fn is_elevated(&self) -> bool {
        true
    }

    fn relaunch_elevated(&self) -> Result<(), ElevationError> {
        Ok(())
    }
}

/// Whether the process token is a member of BUILTIN\Administrators.
#[cfg(windows)]
pub fn is_elevated() -> bool {
    unsafe {
        // The filtered token of a non-elevated admin is not a member of
        // BUILTIN\Administrators for this check.
        let mut sid = [0u8; SECURITY_MAX_SID_SIZE as usize];
        let mut sid_size: u32 = SECURITY_MAX_SID_SIZE;
        let sid_ptr = sid.as_mut_ptr() as *mut core::ffi::c_void;
        if CreateWellKnownSid(WinBuiltinAdministratorsSid, std::ptr::null_mut(), sid_ptr, &mut sid_size) == 0 {
            return false;
        }
        let mut is_member: i32 = 0;
        if CheckTokenMembership(std::ptr::null_mut(), sid_ptr as _, &mut is_member) == 0 {
            return false;
        }
        is_member != 0
    }
}

/// Never elevated off Windows.
#[cfg(not(windows))]
pub fn is_elevated() -> bool { false }

#[cfg(windows)]
fn wide_null(s: &std::ffi::OsStr) -> Vec<u16> {
    let mut v: Vec<u16> = s.encode_wide().collect();
    v.push(0);
    v
}

#[cfg(windows)]
fn relaunch_as_admin() -> Result<(), ElevationError> {
    let exe = std::env::current_exe().map_err(ElevationError::CurrentExe)?;
    let exe_w = wide_null(exe.as_os_str());
    let verb = wide_null(std::ffi::OsStr::new("runas"));
    let args: Vec<String> = std::env::args().skip(1).map(|a| format!("\"{}\"", a)).collect();
    let args_w = wide_null(std::ffi::OsStr::new(&args.join(" ")));
    let dir_wide = match std::env::current_dir() {
        Ok(d) => wide_null(d.as_os_str()),
        Err(_) => Vec::new(),
    };
    let dir_ptr = if dir_wide.is_empty() { std::ptr::null() } else { dir_wide.as_ptr() };
    let res = unsafe {
        windows_sys::Win32::UI::Shell::ShellExecuteW(
            std::ptr::null_mut(),
            verb.as_ptr(),
            exe_w.as_ptr(),
            args_w.as_ptr(),
            dir_ptr,
            windows_sys::Win32::UI::WindowsAndMessaging::SW_SHOWNORMAL,
        )
    } as isize;
    if res <= 32 {
        return Err(ElevationError::ShellExecute(res));
    }
    Ok(())
}

#[cfg(not(windows))]
fn relaunch_as_admin() -> Result<(), ElevationError> {
    Err(ElevationError::Unsupported)
}
