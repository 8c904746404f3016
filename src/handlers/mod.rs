//! HTTP request handlers.
//!
//! Handlers own wire-shape concerns only: deserialize the camelCase
//! request, run garde validation, dispatch to the gateway components,
//! and serialize the response. Domain rules live in `gateway/`.

pub mod files;
pub mod multipart;

use garde::Validate;

use crate::errors::GatewayError;

/// Run garde validation on a request body, folding failures into the
/// gateway taxonomy.
pub(crate) fn validate_request<T>(req: &T) -> Result<(), GatewayError>
where
    T: Validate,
    T::Context: Default,
{
    req.validate()
        .map_err(|report| GatewayError::validation(report.to_string()))
}
