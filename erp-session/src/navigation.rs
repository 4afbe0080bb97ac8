//! Router collaborator
//!
//! The session manager asks the surrounding application to move to the
//! landing route after login/registration and to the login route after logout.

use std::sync::Mutex;
use tracing::debug;

pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

impl<F> Navigator for F
where
    F: Fn(&str) + Send + Sync,
{
    fn navigate(&self, path: &str) {
        self(path)
    }
}

/// Navigator for headless use; only logs the requested route
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn navigate(&self, path: &str) {
        debug!(path = path, "Navigation requested");
    }
}

/// Navigator that remembers every requested route
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    history: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<String> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn last(&self) -> Option<String> {
        self.history().pop()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, path: &str) {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(path.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_recording_navigator() {
        let navigator = RecordingNavigator::new();
        assert_eq!(navigator.last(), None);

        navigator.navigate("/dashboard");
        navigator.navigate("/login");
        assert_eq!(navigator.history(), vec!["/dashboard", "/login"]);
        assert_eq!(navigator.last(), Some("/login".to_string()));
    }

    #[test]
    fn test_closure_navigator() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let navigator = move |path: &str| sink.lock().unwrap().push(path.to_string());

        navigator.navigate("/orders");
        assert_eq!(*seen.lock().unwrap(), vec!["/orders".to_string()]);
    }
}
