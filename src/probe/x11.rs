use anyhow::{anyhow, Result};
use sysinfo::{ProcessesToUpdate, System};
use tracing::{instrument, trace};
use xcb::{
    screensaver::{QueryInfo, QueryInfoReply, State},
    x::{Drawable, Window},
    Connection, Extension,
};

use super::{is_locker_process, LockDetector};

/// Considers the session locked while the screen saver is active or a known locker is running.
pub struct X11LockDetector {
    connection: Connection,
    root: Window,
    system: System,
}

impl X11LockDetector {
    pub fn new() -> Result<Self> {
        let (connection, preferred_screen) =
            Connection::connect_with_extensions(None, &[Extension::ScreenSaver], &[])?;
        let root = connection
            .get_setup()
            .roots()
            .nth(preferred_screen.max(0) as usize)
            .ok_or_else(|| anyhow!("X server has no screen {preferred_screen}"))?
            .root();
        Ok(Self {
            connection,
            root,
            system: System::new(),
        })
    }

    #[instrument(skip(self))]
    fn screensaver_active(&self) -> Result<bool> {
        let cookie = self.connection.send_request(&QueryInfo {
            drawable: Drawable::Window(self.root),
        });
        let reply: QueryInfoReply = self.connection.wait_for_reply(cookie)?;
        Ok(reply.state() == State::On as u8)
    }

    #[instrument(skip(self))]
    fn locker_running(&mut self) -> bool {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        self.system
            .processes()
            .values()
            .any(|process| process.name().to_str().is_some_and(is_locker_process))
    }
}

impl LockDetector for X11LockDetector {
    fn detect(&mut self) -> Result<bool> {
        let screensaver = self.screensaver_active()?;
        let locker = self.locker_running();
        trace!("screensaver={screensaver} locker={locker}");
        Ok(screensaver || locker)
    }
}
