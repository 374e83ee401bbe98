use thiserror::Error;

/// Errors raised while talking to a Shelly meter or relay
#[derive(Debug, Error)]
pub enum MeterError {
    /// The device could not be reached or timed out. The connection is unusable.
    #[error("transport error talking to {device}: {source}")]
    Transport {
        device: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{device} answered {endpoint} with HTTP {status}")]
    Status {
        device: String,
        endpoint: String,
        status: u16,
    },
    #[error("{device} returned an unreadable payload for {endpoint}: {reason}")]
    Malformed {
        device: String,
        endpoint: String,
        reason: String,
    },
    /// Used by in-memory meters in tests and by connectors that cannot build a client
    #[error("{0} is unreachable")]
    Unreachable(String),
}

impl MeterError {
    /// True when the connection that produced this error must be thrown away
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Unreachable(_))
    }
}

/// Start-up configuration problems. Any of these aborts before a loop is started.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{name} still holds the placeholder value `{value}`")]
    Placeholder { name: &'static str, value: String },
    #[error("{name} has an invalid value `{value}`: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Outcome of a failed control loop cycle
#[derive(Debug, Error)]
pub enum CycleError {
    /// Retry on the next cycle after the loop's backoff
    #[error("transient failure: {0}")]
    Transient(String),
    /// The loop cannot continue safely and the process must shut down
    #[error("fatal failure: {0}")]
    Fatal(String),
}

impl From<MeterError> for CycleError {
    fn from(err: MeterError) -> Self {
        Self::Transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_is_transport() {
        assert!(MeterError::Unreachable("grid meter".into()).is_transport());
        let malformed = MeterError::Malformed {
            device: "grid meter".into(),
            endpoint: "/emeter/0".into(),
            reason: "missing power".into(),
        };
        assert!(!malformed.is_transport());
    }

    #[test]
    fn test_meter_error_becomes_transient() {
        let err: CycleError = MeterError::Unreachable("load meter".into()).into();
        assert!(matches!(err, CycleError::Transient(msg) if msg.contains("load meter")));
    }
}
