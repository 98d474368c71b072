//! Host services shared by the script engine and the platform.
//!
//! Each accessor clones the service handle under a short lock and runs the
//! closure outside it, so a service callback can reach the services again
//! without deadlocking. After [`PlatformServices::shutdown`] every accessor
//! is a no-op returning `false`.

use crate::runtime::executor::Timer;
use crate::runtime::file_system::FileSystem;
use crate::runtime::web_request::WebRequest;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
pub struct PlatformServices {
    timer: Mutex<Option<Arc<dyn Timer>>>,
    file_system: Mutex<Option<Arc<dyn FileSystem>>>,
    web_request: Mutex<Option<Arc<dyn WebRequest>>>,
}

impl PlatformServices {
    pub fn new(
        timer: Option<Arc<dyn Timer>>,
        file_system: Option<Arc<dyn FileSystem>>,
        web_request: Option<Arc<dyn WebRequest>>,
    ) -> Self {
        Self {
            timer: Mutex::new(timer),
            file_system: Mutex::new(file_system),
            web_request: Mutex::new(web_request),
        }
    }

    pub fn with_timer(&self, f: impl FnOnce(&dyn Timer)) -> bool {
        let timer = self.timer.lock().clone();
        match timer {
            Some(timer) => {
                f(timer.as_ref());
                true
            }
            None => false,
        }
    }

    pub fn with_file_system(&self, f: impl FnOnce(&dyn FileSystem)) -> bool {
        let file_system = self.file_system.lock().clone();
        match file_system {
            Some(file_system) => {
                f(file_system.as_ref());
                true
            }
            None => false,
        }
    }

    pub fn with_web_request(&self, f: impl FnOnce(&dyn WebRequest)) -> bool {
        let web_request = self.web_request.lock().clone();
        match web_request {
            Some(web_request) => {
                f(web_request.as_ref());
                true
            }
            None => false,
        }
    }

    /// Detach all services and drop them.
    ///
    /// A timer thread is joined here unless a callback elsewhere still holds
    /// it, in which case it stops when that callback returns.
    pub fn shutdown(&self) {
        let timer = self.timer.lock().take();
        let file_system = self.file_system.lock().take();
        let web_request = self.web_request.lock().take();
        drop(web_request);
        drop(file_system);
        drop(timer);
    }
}
