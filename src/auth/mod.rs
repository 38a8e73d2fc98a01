//! Request authentication and authorization
//!
//! Two stages, both pure with respect to the request: [`TokenAuthenticator`]
//! turns the `Authorization` header into a verified [`CapabilityToken`], and
//! [`PolicyAuthorizer`] evaluates that token together with per-request facts
//! against the policy bound to the requested [`Operation`].

pub mod policy;
pub mod token;

pub use policy::{
    AuthorizationContext, AuthorizationDecision, EvaluationLimits, Operation, PolicyAuthorizer,
    PolicyShape,
};
pub use token::{CapabilityToken, TokenAuthenticator, BEARER_PREFIX};
