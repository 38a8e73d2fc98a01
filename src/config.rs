//! Service configuration from command-line flags and environment

use crate::auth::token::{public_key_from_hex, public_key_from_private_hex};
use crate::auth::EvaluationLimits;
use crate::{EngineConfig, Error, Result};
use biscuit_auth::PublicKey;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Capability-gated markup rendering and URL capture service
#[derive(Debug, Clone, Parser)]
#[command(name = "webshot", version, about)]
pub struct ServiceConfig {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind: String,

    /// Hex-encoded ed25519 public key that signs accepted tokens
    #[arg(long, env = "BISCUIT_PUBLIC_KEY", hide_env_values = true)]
    pub public_key: Option<String>,

    /// Hex-encoded ed25519 private key; only used to derive the public key
    #[arg(long, env = "BISCUIT_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Budget for content load plus network quiescence, in milliseconds
    #[arg(long, env = "LOAD_TIMEOUT_MS", default_value_t = 30_000)]
    pub load_timeout_ms: u64,

    /// Chrome binary to launch instead of the auto-detected one
    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Maximum facts a token evaluation may produce
    #[arg(long, default_value_t = 1000)]
    pub auth_max_facts: u64,

    /// Maximum rule-evaluation iterations per token evaluation
    #[arg(long, default_value_t = 100)]
    pub auth_max_iterations: u64,

    /// Maximum wall time per token evaluation, in microseconds
    #[arg(long, default_value_t = 10_000)]
    pub auth_max_time_us: u64,
}

impl ServiceConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// The pinned verification key. A public key wins over a private one.
    pub fn verification_key(&self) -> Result<PublicKey> {
        match (&self.public_key, &self.private_key) {
            (Some(public), _) => public_key_from_hex(public),
            (None, Some(private)) => public_key_from_private_hex(private),
            (None, None) => Err(Error::ConfigError(
                "one of BISCUIT_PUBLIC_KEY or BISCUIT_PRIVATE_KEY is required".into(),
            )),
        }
    }

    pub fn evaluation_limits(&self) -> EvaluationLimits {
        EvaluationLimits {
            max_facts: self.auth_max_facts,
            max_iterations: self.auth_max_iterations,
            max_time: Duration::from_micros(self.auth_max_time_us),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            chrome_path: self.chrome_path.clone(),
            load_timeout_ms: self.load_timeout_ms,
            ..EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biscuit_auth::KeyPair;

    fn parse(args: &[&str]) -> ServiceConfig {
        let mut argv = vec!["webshot"];
        argv.extend_from_slice(args);
        ServiceConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn explicit_flags_override_defaults() {
        let cfg = parse(&["--port", "8080", "--load-timeout-ms", "5000", "--auth-max-time-us", "2000"]);
        assert_eq!(cfg.port, 8080);
        assert!(cfg.bind_address().ends_with(":8080"));
        assert_eq!(cfg.engine_config().load_timeout_ms, 5000);
        assert_eq!(cfg.evaluation_limits().max_time, Duration::from_millis(2));
    }

    #[test]
    fn public_key_takes_precedence() {
        let signer = KeyPair::new();
        let other = KeyPair::new();
        let public_hex = signer.public().to_bytes_hex();
        let private_hex = other.private().to_bytes_hex();
        let cfg = parse(&["--public-key", public_hex.as_str(), "--private-key", private_hex.as_str()]);
        assert_eq!(cfg.verification_key().unwrap(), signer.public());
    }

    #[test]
    fn private_key_alone_is_enough() {
        let signer = KeyPair::new();
        let private_hex = signer.private().to_bytes_hex();
        let cfg = parse(&["--private-key", private_hex.as_str()]);
        assert_eq!(cfg.verification_key().unwrap(), signer.public());
    }

    #[test]
    fn missing_key_material_is_a_config_error() {
        let cfg = ServiceConfig {
            public_key: None,
            private_key: None,
            ..parse(&[])
        };
        assert!(matches!(cfg.verification_key(), Err(Error::ConfigError(_))));
    }
}
