//! Fault interception configuration.

use serde::{Deserialize, Serialize};

/// Which fatal signals are intercepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultConfig {
    /// Signal names, e.g. `"SIGSEGV"`.
    pub signals: Vec<String>,
}

impl Default for FaultConfig {
    fn default() -> Self {
        FaultConfig {
            signals: vec!["SIGSEGV".to_string(), "SIGBUS".to_string()],
        }
    }
}

#[cfg(unix)]
impl FaultConfig {
    /// Resolve the configured names to signals.
    pub fn parse_signals(&self) -> crate::GcrashResult<Vec<nix::sys::signal::Signal>> {
        use std::str::FromStr;

        self.signals
            .iter()
            .map(|name| {
                let name = name.trim().to_ascii_uppercase();
                let name = if name.starts_with("SIG") {
                    name
                } else {
                    format!("SIG{name}")
                };
                nix::sys::signal::Signal::from_str(&name)
                    .map_err(|_| crate::GcrashError::UnknownSignal(name))
            })
            .collect()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;

    #[test]
    fn test_default_signals() {
        let signals = FaultConfig::default().parse_signals().unwrap();
        assert_eq!(signals, vec![Signal::SIGSEGV, Signal::SIGBUS]);
    }

    #[test]
    fn test_short_and_lowercase_names() {
        let config = FaultConfig {
            signals: vec!["segv".to_string(), " SIGILL ".to_string()],
        };
        assert_eq!(
            config.parse_signals().unwrap(),
            vec![Signal::SIGSEGV, Signal::SIGILL]
        );
    }

    #[test]
    fn test_unknown_signal() {
        let config = FaultConfig {
            signals: vec!["SIGNOPE".to_string()],
        };
        let err = config.parse_signals().unwrap_err();
        assert!(err.to_string().contains("SIGNOPE"), "{err}");
    }
}
