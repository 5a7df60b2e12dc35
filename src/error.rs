use std::fmt;
use std::io;

/// Conditions that abort a run before any probe is attempted.
#[derive(Debug)]
pub enum ProbeError {
    /// Raw socket creation refused for lack of privilege
    Permission(io::Error),
    /// Any other socket creation failure
    Socket(io::Error),
    /// Target name did not resolve to an IPv4 address
    Resolution { host: String, source: Option<io::Error> },
}

impl ProbeError {
    /// Classify a failed raw socket creation.
    pub fn from_socket_error(err: io::Error) -> Self {
        let denied = err.kind() == io::ErrorKind::PermissionDenied
            || matches!(err.raw_os_error(), Some(libc::EPERM) | Some(libc::EACCES));
        if denied {
            ProbeError::Permission(err)
        } else {
            ProbeError::Socket(err)
        }
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permission(_) => write!(f, "raw socket access requires elevated privileges"),
            Self::Socket(e) => write!(f, "failed to create socket: {}", e),
            Self::Resolution { host, source: Some(e) } => {
                write!(f, "could not resolve host {}: {}", host, e)
            }
            Self::Resolution { host, source: None } => {
                write!(f, "could not resolve host {}: no IPv4 address", host)
            }
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Permission(e) | Self::Socket(e) => Some(e),
            Self::Resolution { source, .. } => source
                .as_ref()
                .map(|e| e as &(dyn std::error::Error + 'static)),
        }
    }
}
