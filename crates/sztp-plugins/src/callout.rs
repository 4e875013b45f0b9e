//! Callout plugin contract

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// What a callout function returns
#[derive(Debug, Clone, PartialEq)]
pub enum CalloutReply {
    /// Conveyed information to hand to the device, e.g.
    /// `{"ietf-sztp-conveyed-info:onboarding-information": {...}}`
    ConveyedInformation(Value),
    /// An `ietf-restconf:errors` document to pass through to the device
    RestconfErrors(Value),
}

/// The callout raised instead of answering
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CalloutError(pub String);

impl CalloutError {
    pub fn new(msg: impl Into<String>) -> Self {
        CalloutError(msg.into())
    }
}

/// A function exposed by a plugin to dynamic callouts.
///
/// The input document carries `serial-number`, `source-ip-address`,
/// `from-device` and, when presented, `identity-certificate`.
#[async_trait]
pub trait Callout: Send + Sync {
    async fn call(&self, input: &Value) -> Result<CalloutReply, CalloutError>;
}

/// Adapter turning a plain function into a [`Callout`]
pub struct FnCallout<F>(pub F);

#[async_trait]
impl<F> Callout for FnCallout<F>
where
    F: Fn(&Value) -> Result<CalloutReply, CalloutError> + Send + Sync,
{
    async fn call(&self, input: &Value) -> Result<CalloutReply, CalloutError> {
        (self.0)(input)
    }
}
