//! Typed view of the merged configuration.

use paralexe_exec::{Backend, TimeoutConfig};
use serde::Deserialize;

use super::effective::ConfigError;
use crate::job::Decorator;
use crate::scheduler::SchedulerConfig;
use crate::worker::ClassifyPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DecoratorConfig {
    pub prefix: String,
    pub suffix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub threads: usize,
    pub timeout_seconds: Option<u64>,
    pub grace_seconds: u64,
    pub error_token: String,
    pub fail_on_nonzero_exit: bool,
    pub decorator: DecoratorConfig,
    pub backend: Backend,
}

impl Settings {
    /// Deserialize and validate a merged configuration value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_value(value)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::ValidationError(
                "threads must be at least 1".to_string(),
            ));
        }
        if self.error_token.is_empty() {
            return Err(ConfigError::ValidationError(
                "error_token must not be empty".to_string(),
            ));
        }
        self.timeout()
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        self.decorator()?;

        if let Backend::Ssh(ref ssh) = self.backend {
            if ssh.host.is_empty() {
                return Err(ConfigError::ValidationError(
                    "backend.host is required for mode = \"ssh\"".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> TimeoutConfig {
        TimeoutConfig {
            overall_seconds: self.timeout_seconds,
            grace_seconds: self.grace_seconds,
        }
    }

    pub fn decorator(&self) -> Result<Decorator, ConfigError> {
        Decorator::new(self.decorator.prefix.as_str(), self.decorator.suffix.as_str())
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    pub fn policy(&self) -> ClassifyPolicy {
        ClassifyPolicy {
            error_token: self.error_token.clone(),
            fail_on_nonzero_exit: self.fail_on_nonzero_exit,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            n_threads: self.threads,
            timeout: self.timeout(),
            policy: self.policy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{deep_merge, BuiltinDefaults};
    use serde_json::json;

    fn with(overlay: serde_json::Value) -> Result<Settings, ConfigError> {
        Settings::from_value(deep_merge(BuiltinDefaults::default().to_value(), overlay))
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = with(json!({})).unwrap();
        assert_eq!(settings.backend, Backend::Local);
        assert_eq!(settings.timeout(), TimeoutConfig::default());
        assert_eq!(settings.decorator().unwrap(), Decorator::default());
    }

    #[test]
    fn test_ssh_backend() {
        let settings = with(json!({
            "backend": {"mode": "ssh", "host": "node1", "user": "ci", "port": 2222}
        }))
        .unwrap();

        match settings.backend {
            Backend::Ssh(ref ssh) => {
                assert_eq!(ssh.host, "node1");
                assert_eq!(ssh.user.as_deref(), Some("ci"));
                assert_eq!(ssh.port, 2222);
                assert_eq!(ssh.connect_timeout_seconds, 30);
            }
            ref other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn test_slurm_backend() {
        let settings = with(json!({
            "backend": {"mode": "slurm", "partition": "short", "extra_args": ["-N1"]}
        }))
        .unwrap();

        match settings.backend {
            Backend::Slurm(ref slurm) => {
                assert_eq!(slurm.partition.as_deref(), Some("short"));
                assert_eq!(slurm.extra_args, vec!["-N1".to_string()]);
            }
            ref other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn test_ssh_requires_host() {
        let err = with(json!({"backend": {"mode": "ssh"}})).unwrap_err();
        assert!(err.to_string().contains("backend.host"));
    }

    #[test]
    fn test_unknown_backend_mode() {
        assert!(matches!(
            with(json!({"backend": {"mode": "kubernetes"}})),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_zero_threads_rejected() {
        let err = with(json!({"threads": 0})).unwrap_err();
        assert!(err.to_string().contains("threads"));
    }

    #[test]
    fn test_timeout_bounds() {
        assert!(with(json!({"timeout_seconds": 0})).is_err());
        assert!(with(json!({"grace_seconds": 301})).is_err());
        assert_eq!(
            with(json!({"timeout_seconds": 90})).unwrap().timeout().overall_seconds,
            Some(90)
        );
    }

    #[test]
    fn test_bad_decorator_rejected() {
        assert!(with(json!({"decorator": {"prefix": "", "suffix": "]"}})).is_err());
        assert!(with(json!({"decorator": {"prefix": "< ", "suffix": ">"}})).is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            with(json!({"thread": 4})),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_scheduler_config() {
        let settings = with(json!({"threads": 3, "error_token": "FATAL", "fail_on_nonzero_exit": true}))
            .unwrap();
        let config = settings.scheduler_config();
        assert_eq!(config.n_threads, 3);
        assert_eq!(config.policy.error_token, "FATAL");
        assert!(config.policy.fail_on_nonzero_exit);
    }
}
