use crate::{stack::RemoteError, template::TemplateError};

#[derive(Debug)]
pub enum FormationError {
    InvalidArgument {
        reason: String,
    },
    Exhausted {
        base: String,
    },
    Template(TemplateError),
    Provisioning {
        stack: String,
        source: RemoteError,
    },
    RemoteTimeout {
        operation: &'static str,
    },
    Remote {
        operation: &'static str,
        source: RemoteError,
    },
}

impl FormationError {
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::Exhausted { .. } => "exhausted",
            Self::Template(_) => "template_error",
            Self::Provisioning { .. } => "provisioning_error",
            Self::RemoteTimeout { .. } => "remote_timeout",
            Self::Remote { .. } => "remote_error",
        }
    }

    /// Whether re-running the whole allocate-then-provision sequence may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provisioning { .. } | Self::RemoteTimeout { .. } | Self::Remote { .. } => true,
            Self::InvalidArgument { .. } | Self::Exhausted { .. } | Self::Template(_) => false,
        }
    }

    /// Maps a remote failure of `operation`, keeping timeouts as their own kind.
    pub(crate) fn from_remote(operation: &'static str, err: RemoteError) -> Self {
        match err {
            RemoteError::Timeout => Self::RemoteTimeout { operation },
            source => Self::Remote { operation, source },
        }
    }

    pub(crate) fn from_submit(operation: &'static str, stack: &str, err: RemoteError) -> Self {
        match err {
            RemoteError::Timeout => Self::RemoteTimeout { operation },
            source => Self::Provisioning {
                stack: stack.to_string(),
                source,
            },
        }
    }
}

impl std::fmt::Display for FormationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument { reason } => write!(f, "invalid argument: {reason}"),
            Self::Exhausted { base } => write!(f, "no available subnets in {base}"),
            Self::Template(e) => write!(f, "{e}"),
            Self::Provisioning { stack, source } => {
                write!(f, "provisioning stack {stack} failed: {source}")
            }
            Self::RemoteTimeout { operation } => {
                write!(f, "stack service {operation} exceeded its deadline")
            }
            Self::Remote { operation, source } => {
                write!(f, "stack service {operation} failed: {source}")
            }
        }
    }
}

impl std::error::Error for FormationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Template(e) => Some(e),
            Self::Provisioning { source, .. } | Self::Remote { source, .. } => Some(source),
            Self::InvalidArgument { .. } | Self::Exhausted { .. } | Self::RemoteTimeout { .. } => {
                None
            }
        }
    }
}

impl From<TemplateError> for FormationError {
    fn from(value: TemplateError) -> Self {
        Self::Template(value)
    }
}
