//! Per-operation policy evaluation under resource limits

use crate::auth::CapabilityToken;
use crate::{Error, Result};
use biscuit_auth::builder::{self, Fact, Policy};
use biscuit_auth::error::Token as TokenError;
use biscuit_auth::macros::*;
use biscuit_auth::{Authorizer, AuthorizerLimits};
use log::{debug, warn};
use std::time::{Duration, SystemTime};

/// Operations a caller can be authorized for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Render,
    Capture,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Render => "render",
            Operation::Capture => "capture",
        }
    }

    /// The allow rule bound to this operation's endpoints.
    pub fn policy_shape(self) -> PolicyShape {
        match self {
            Operation::Render => PolicyShape::IdentityFact,
            Operation::Capture => PolicyShape::OperationFact,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the allow rule evaluated for an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyShape {
    /// `allow if user($u)`: any token naming a user passes
    IdentityFact,
    /// `allow if user($u), operation($op), right($op)`: the token must also
    /// grant the requested operation
    OperationFact,
}

impl PolicyShape {
    fn policy(self) -> Policy {
        match self {
            PolicyShape::IdentityFact => policy!("allow if user($u)"),
            PolicyShape::OperationFact => {
                policy!("allow if user($u), operation($op), right($op)")
            }
        }
    }
}

/// Facts that only exist for the lifetime of one request
#[derive(Debug, Clone)]
pub struct AuthorizationContext {
    pub now: SystemTime,
    pub operation: Operation,
    /// Hostname of the capture target, when the request names a URL
    pub host: Option<String>,
}

impl AuthorizationContext {
    pub fn new(operation: Operation) -> Self {
        Self {
            now: SystemTime::now(),
            operation,
            host: None,
        }
    }

    pub fn with_host(mut self, host: Option<String>) -> Self {
        self.host = host;
        self
    }

    fn facts(&self) -> Vec<Fact> {
        let mut facts = vec![
            builder::fact("time", &[builder::date(&self.now)]),
            builder::fact("operation", &[builder::string(self.operation.as_str())]),
        ];
        if let Some(host) = &self.host {
            facts.push(builder::fact("host", &[builder::string(host)]));
        }
        facts
    }
}

/// Outcome of a policy evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationDecision {
    Allow { identity: String },
    Deny,
}

/// Bounds applied to every token evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationLimits {
    pub max_facts: u64,
    pub max_iterations: u64,
    pub max_time: Duration,
}

impl Default for EvaluationLimits {
    fn default() -> Self {
        Self {
            max_facts: 1000,
            max_iterations: 100,
            max_time: Duration::from_millis(10),
        }
    }
}

impl EvaluationLimits {
    fn authorizer_limits(&self) -> AuthorizerLimits {
        AuthorizerLimits {
            max_facts: self.max_facts,
            max_iterations: self.max_iterations,
            max_time: self.max_time,
        }
    }
}

/// Evaluates verified tokens against the policy of the requested operation.
#[derive(Debug, Clone, Default)]
pub struct PolicyAuthorizer {
    limits: EvaluationLimits,
}

impl PolicyAuthorizer {
    pub fn new(limits: EvaluationLimits) -> Self {
        Self { limits }
    }

    /// Evaluate the token and context facts jointly.
    ///
    /// Failed checks, an unmatched policy and any exceeded limit all yield
    /// `Deny`. `Err` is reserved for server faults, such as an `Allow` without
    /// a bound identity.
    pub fn decide(
        &self,
        token: &CapabilityToken,
        context: &AuthorizationContext,
    ) -> Result<AuthorizationDecision> {
        let mut authorizer = Authorizer::new();
        if let Err(e) = authorizer.add_token(token.biscuit()) {
            debug!("Token could not be loaded into authorizer: {:?}", e);
            return Ok(AuthorizationDecision::Deny);
        }
        for fact in context.facts() {
            authorizer
                .add_fact(fact)
                .map_err(|e| Error::Internal(format!("context fact rejected: {}", e)))?;
        }
        authorizer
            .add_policy(context.operation.policy_shape().policy())
            .map_err(|e| Error::Internal(format!("policy rejected: {}", e)))?;

        // The evaluator only counts facts it derives, so facts carried in
        // the token itself are bounded here.
        let loaded = authorizer.dump().0.len() as u64;
        if loaded >= self.limits.max_facts {
            warn!(
                "Policy evaluation for {} hit a limit: {} facts loaded, limit {}",
                context.operation, loaded, self.limits.max_facts
            );
            return Ok(AuthorizationDecision::Deny);
        }

        match authorizer.authorize_with_limits(self.limits.authorizer_limits()) {
            Ok(_) => {}
            Err(TokenError::RunLimit(limit)) => {
                warn!("Policy evaluation for {} hit a limit: {:?}", context.operation, limit);
                return Ok(AuthorizationDecision::Deny);
            }
            Err(e) => {
                debug!("Policy denied {}: {:?}", context.operation, e);
                return Ok(AuthorizationDecision::Deny);
            }
        }

        let identities: Vec<(String,)> = authorizer
            .query_with_limits(rule!("data($id) <- user($id)"), self.limits.authorizer_limits())
            .map_err(|e| Error::Internal(format!("identity query failed after allow: {}", e)))?;

        match identities.into_iter().next() {
            Some((identity,)) => Ok(AuthorizationDecision::Allow { identity }),
            None => Err(Error::Internal("allow without a bound identity".into())),
        }
    }

    /// Like [`decide`](Self::decide) but maps `Deny` to `Error::Unauthorized`
    /// and returns the caller identity on success.
    pub fn authorize(
        &self,
        token: &CapabilityToken,
        context: &AuthorizationContext,
    ) -> Result<String> {
        match self.decide(token, context)? {
            AuthorizationDecision::Allow { identity } => Ok(identity),
            AuthorizationDecision::Deny => Err(Error::Unauthorized),
        }
    }
}
