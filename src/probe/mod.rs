//! Screen lock detection. [GenericLockProbe] is the main artifact of this module: it picks the
//! platform detector at build time and turns it into an infallible [LockProbe].

#[cfg(feature = "win")]
pub mod win;
#[cfg(feature = "x11")]
pub mod x11;

#[cfg(feature = "win")]
extern crate windows;

#[cfg(feature = "x11")]
extern crate xcb;

use anyhow::Result;
use tracing::{error, warn};

/// The only thing the watcher needs to know about the platform.
#[cfg_attr(test, mockall::automock)]
pub trait LockProbe: Send {
    fn is_locked(&mut self) -> bool;
}

/// Platform specific lock check. Unlike [LockProbe] it is allowed to fail.
pub trait LockDetector: Send {
    fn detect(&mut self) -> Result<bool>;
}

/// Adapts a [LockDetector] into a [LockProbe]. Detection failures are logged and reported as
/// "not locked", which means a broken detector never makes the user look AFK.
pub struct FailOpen<D> {
    detector: D,
}

impl<D: LockDetector> FailOpen<D> {
    pub fn new(detector: D) -> Self {
        Self { detector }
    }
}

impl<D: LockDetector> LockProbe for FailOpen<D> {
    fn is_locked(&mut self) -> bool {
        self.detector
            .detect()
            .inspect_err(|e| error!("Error while checking if screen is locked {e:?}"))
            .unwrap_or(false)
    }
}

/// Serves as a cross-compatible LockProbe implementation.
pub struct GenericLockProbe {
    inner: Box<dyn LockProbe>,
}

impl GenericLockProbe {
    pub fn new() -> Result<Self> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "win")] {
                use win::WindowsLockDetector;
                Ok(Self {
                    inner: Box::new(FailOpen::new(WindowsLockDetector::new())),
                })
            }
            else if #[cfg(feature = "x11")] {
                use x11::X11LockDetector;
                Ok(Self {
                    inner: Box::new(FailOpen::new(X11LockDetector::new()?)),
                })
            }
            else {
                Err(anyhow::anyhow!(
                    "No lock detector was enabled, build with the `win` or `x11` feature"
                ))
            }
        }
    }
}

impl LockProbe for GenericLockProbe {
    fn is_locked(&mut self) -> bool {
        self.inner.is_locked()
    }
}

/// Window markers of the Windows lock and logon screens.
const LOCK_TITLES: [&str; 2] = ["Logon", "Lock Screen"];
const LOCK_EXECUTABLES: [&str; 2] = ["Logon", "LockApp"];

/// Decides whether the foreground window belongs to the lock screen. `exe` may be a full path in
/// either separator style, only its file name is inspected.
pub fn is_lock_window(exe: &str, title: &str) -> bool {
    let exe = exe.rsplit(['\\', '/']).next().unwrap_or(exe);
    LOCK_TITLES.iter().any(|marker| title.contains(marker))
        || LOCK_EXECUTABLES.iter().any(|marker| exe.contains(marker))
}

/// Like [is_lock_window], but tolerates an unknown executable. The lock screen process is often
/// off limits while its window title is not, so a failed lookup only leaves the title to go on.
pub fn is_lock_foreground(exe: Result<String>, title: &str) -> bool {
    let exe = exe
        .inspect_err(|e| warn!("Failed to get foreground executable, checking title only {e:?}"))
        .unwrap_or_default();
    is_lock_window(&exe, title)
}

/// Screen lockers whose running process means the X session is locked.
const LOCKER_PROCESSES: [&str; 6] = [
    "i3lock",
    "slock",
    "xsecurelock",
    "xlock",
    "xscreensaver-auth",
    "swaylock",
];

pub fn is_locker_process(name: &str) -> bool {
    LOCKER_PROCESSES.contains(&name)
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    struct ScriptedDetector(Vec<Result<bool>>);

    impl LockDetector for ScriptedDetector {
        fn detect(&mut self) -> Result<bool> {
            self.0.remove(0)
        }
    }

    #[test]
    fn detector_errors_fail_open() {
        let mut probe = FailOpen::new(ScriptedDetector(vec![
            Ok(true),
            Err(anyhow!("access denied")),
            Ok(false),
        ]));
        assert!(probe.is_locked());
        assert!(!probe.is_locked());
        assert!(!probe.is_locked());
    }

    #[test]
    fn recognizes_lock_app() {
        assert!(is_lock_window(
            r"C:\Windows\SystemApps\Microsoft.LockApp_cw5n1h2txyewy\LockApp.exe",
            "Windows Default Lock Screen",
        ));
        assert!(is_lock_window(r"C:\Windows\System32\LogonUI.exe", ""));
        assert!(is_lock_window("", "Lock Screen"));
    }

    #[test]
    fn only_file_name_of_exe_is_checked() {
        assert!(!is_lock_window(r"C:\Users\Logon\bin\editor.exe", "main.rs"));
        assert!(!is_lock_window("/home/LockApp/bin/nvim", "notes"));
    }

    #[test]
    fn unknown_executable_falls_back_to_title() {
        assert!(is_lock_foreground(
            Err(anyhow!("Access is denied")),
            "Windows Default Lock Screen",
        ));
        assert!(!is_lock_foreground(Err(anyhow!("Access is denied")), "Inbox - Outlook"));
        assert!(is_lock_foreground(
            Ok(r"C:\Windows\System32\LogonUI.exe".into()),
            "",
        ));
    }

    #[test]
    fn regular_windows_are_not_locked() {
        assert!(!is_lock_window(
            r"C:\Program Files\Mozilla Firefox\firefox.exe",
            "Mozilla Firefox"
        ));
    }

    #[test]
    fn recognizes_locker_processes() {
        assert!(is_locker_process("i3lock"));
        assert!(is_locker_process("xsecurelock"));
        assert!(!is_locker_process("i3"));
        assert!(!is_locker_process("light-locker-settings"));
    }
}
