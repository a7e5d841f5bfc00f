use std::collections::HashSet;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::utils::error::AppError;

/// Coarse capabilities granted by the upstream auth gateway. Workflow
/// functions take these explicitly instead of inspecting request context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    RefundReview,
    RefundPayout,
}

impl Capability {
    fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "refund:review" => Some(Capability::RefundReview),
            "refund:payout" => Some(Capability::RefundPayout),
            _ => None,
        }
    }
}

/// Identity attached to a request. Authentication happens upstream; this
/// service only reads the forwarded identity headers.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub customer_id: Option<Uuid>,
    pub capabilities: HashSet<Capability>,
}

impl Caller {
    pub fn customer(&self) -> Result<Uuid, AppError> {
        self.customer_id
            .ok_or_else(|| AppError::Forbidden("customer identity required".to_string()))
    }

    pub fn require(&self, capability: Capability) -> Result<(), AppError> {
        if self.capabilities.contains(&capability) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "missing capability {capability:?}"
            )))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let customer_id = match parts.headers.get("x-customer-id") {
            Some(value) => {
                let raw = value
                    .to_str()
                    .map_err(|_| AppError::Validation("invalid x-customer-id header".into()))?;
                Some(
                    raw.parse::<Uuid>()
                        .map_err(|_| AppError::Validation("invalid x-customer-id header".into()))?,
                )
            }
            None => None,
        };

        let capabilities = parts
            .headers
            .get("x-capabilities")
            .and_then(|v| v.to_str().ok())
            .map(|raw| raw.split(',').filter_map(Capability::parse).collect())
            .unwrap_or_default();

        Ok(Caller {
            customer_id,
            capabilities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_capabilities() {
        assert_eq!(
            Capability::parse("refund:review"),
            Some(Capability::RefundReview)
        );
        assert_eq!(Capability::parse(" refund:payout "), Some(Capability::RefundPayout));
        assert_eq!(Capability::parse("admin"), None);
    }

    #[test]
    fn require_rejects_missing_capability() {
        let caller = Caller::default();
        assert!(caller.require(Capability::RefundReview).is_err());
    }
}
