use anyhow::{anyhow, Result};
use tracing::{error, instrument, trace};
use windows::{
    core::PWSTR,
    Win32::{
        Foundation::{CloseHandle, BOOL, HANDLE, HWND},
        System::Threading::{
            OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
            PROCESS_QUERY_LIMITED_INFORMATION,
        },
        UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowTextW, GetWindowThreadProcessId},
    },
};

use super::{is_lock_foreground, LockDetector};

/// Executable path and title of the foreground window. The executable may be unavailable while
/// the title is still readable.
#[derive(Debug)]
struct ForegroundWindow {
    exe: Result<String>,
    title: String,
}

#[instrument]
fn get_foreground() -> Result<ForegroundWindow> {
    let window = unsafe { GetForegroundWindow() };

    if window.is_invalid() {
        return Err(anyhow!("Failed to get foreground window"));
    }

    let mut text: [u16; 1024] = [0; 1024];
    let title = unsafe { get_window_title(window, &mut text) };
    let exe = get_window_exe(window, &mut text);

    Ok(ForegroundWindow { exe, title })
}

fn get_window_exe(window: HWND, text: &mut [u16]) -> Result<String> {
    let mut id = 0u32;
    unsafe { GetWindowThreadProcessId(window, Some(&mut id)) };
    if id == 0 {
        return Err(anyhow!("Failed to get process of the foreground window"));
    }

    // LockApp is a packaged app, limited information is all we're allowed to query.
    let process_handle =
        unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, BOOL::from(false), id) }?;

    let exe = unsafe { get_process_path(process_handle, text) };

    unsafe { CloseHandle(process_handle) }
        .inspect_err(|e| error!("Failed to close handle {e:?}"))?;

    exe
}

unsafe fn get_process_path(process_handle: HANDLE, text: &mut [u16]) -> Result<String> {
    unsafe {
        let mut length = text.len() as u32;
        QueryFullProcessImageNameW(
            process_handle,
            PROCESS_NAME_WIN32,
            PWSTR(text.as_mut_ptr()),
            &mut length,
        )?;
        Ok(String::from_utf16_lossy(&text[..length as usize]))
    }
}

unsafe fn get_window_title(window_handle: HWND, text: &mut [u16]) -> String {
    let len = unsafe { GetWindowTextW(window_handle, text) };
    String::from_utf16_lossy(&text[..len.max(0) as usize])
}

/// Detects the lock screen by looking at which window is in the foreground.
#[derive(Default)]
pub struct WindowsLockDetector {}

impl WindowsLockDetector {
    pub fn new() -> Self {
        Self {}
    }
}

impl LockDetector for WindowsLockDetector {
    fn detect(&mut self) -> Result<bool> {
        let foreground = get_foreground()?;
        trace!("Foreground window {foreground:?}");
        Ok(is_lock_foreground(foreground.exe, &foreground.title))
    }
}
