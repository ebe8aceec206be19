//! User-visible failure notifications, de-duplicated per failure class.

use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// `GET /relay/config` failed or returned garbage.
    RelayProbe,
    /// Relay configured but its socket could not be opened.
    RelayConnect,
    /// Gateway socket could not be opened.
    SocketOpen,
    /// Active gateway socket closed or errored.
    SocketLost,
    /// Active relay connection dropped.
    RelayLost,
    /// No transport usable; sends are refused.
    Unavailable,
}

impl FailureClass {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::RelayProbe => "relay_probe",
            FailureClass::RelayConnect => "relay_connect",
            FailureClass::SocketOpen => "socket_open",
            FailureClass::SocketLost => "socket_lost",
            FailureClass::RelayLost => "relay_lost",
            FailureClass::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub class: FailureClass,
    pub message: String,
}

/// Remembers which classes were already shown this session.
#[derive(Debug, Default)]
pub struct Notifier {
    raised: HashSet<FailureClass>,
    history: Vec<Notification>,
}

impl Notifier {
    /// `Some` the first time a class is raised, `None` afterwards.
    pub fn raise(&mut self, class: FailureClass, message: impl Into<String>) -> Option<Notification> {
        if !self.raised.insert(class) {
            return None;
        }
        let n = Notification {
            class,
            message: message.into(),
        };
        self.history.push(n.clone());
        Some(n)
    }

    pub fn has_raised(&self, class: FailureClass) -> bool {
        self.raised.contains(&class)
    }

    pub fn history(&self) -> &[Notification] {
        &self.history
    }
}
