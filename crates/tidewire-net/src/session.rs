//! Session state: is networking active, in which role, and has the
//! client finished loading.

use std::fmt;

/// Which side of a session this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// Networking state of the process.
///
/// Client and server are mutually exclusive because the role is a single
/// optional value: there is no way to be both at once.
#[derive(Debug, Clone, Default)]
pub struct Session {
    role: Option<Role>,
    loaded: bool,
}

impl Session {
    /// An inactive session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether networking is active in either role.
    pub fn is_active(&self) -> bool {
        self.role.is_some()
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn is_server(&self) -> bool {
        self.role == Some(Role::Server)
    }

    pub fn is_client(&self) -> bool {
        self.role == Some(Role::Client)
    }

    /// Whether the client has finished loading and accepts every packet.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Enters `role`. A fresh session always starts unloaded.
    pub fn begin(&mut self, role: Role) {
        self.role = Some(role);
        self.loaded = false;
    }

    /// Leaves whatever role was active.
    pub fn end(&mut self) {
        self.role = None;
        self.loaded = false;
    }

    pub fn set_loaded(&mut self, loaded: bool) {
        self.loaded = loaded;
    }
}
