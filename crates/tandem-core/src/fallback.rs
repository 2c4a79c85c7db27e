//! Mock fallback policy applied by each service at its gateway call sites

use tracing::{debug, warn};

use crate::error::{ApiError, ProviderError};

/// What kind of operation a gateway call performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Read,
    Create,
    /// Update or delete
    Destructive,
}

/// Resolve a gateway result against the fallback policy:
///
/// - no credentials configured: mock data, no error
/// - recognized auth/permission/not-found/quota failure: the typed error
/// - any other failure on a read or create: mock data, logged at `warn`
/// - any other failure on an update or delete: `INTERNAL_ERROR`
pub fn with_fallback<T>(
    kind: CallKind,
    operation: &str,
    result: Result<T, ProviderError>,
    mock: impl FnOnce() -> T,
) -> Result<T, ApiError> {
    match result {
        Ok(value) => Ok(value),
        Err(ProviderError::NotConfigured { service }) => {
            debug!("{} not configured, serving mock data for {}", service, operation);
            Ok(mock())
        }
        Err(e) if e.is_typed() => Err(e.into()),
        Err(e) => match kind {
            CallKind::Read | CallKind::Create => {
                warn!("{} failed, falling back to mock data: {}", operation, e);
                Ok(mock())
            }
            CallKind::Destructive => {
                warn!("{} failed: {}", operation, e);
                Err(ApiError::Internal(format!("Failed to {}", operation)))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Service;

    fn upstream() -> ProviderError {
        ProviderError::classify(Service::Calendar, Some(503), "Backend Error")
    }

    #[test]
    fn test_success_passes_through() {
        let out = with_fallback(CallKind::Read, "list events", Ok(7), || 0).unwrap();
        assert_eq!(out, 7);
    }

    #[test]
    fn test_not_configured_serves_mock_for_every_kind() {
        for kind in [CallKind::Read, CallKind::Create, CallKind::Destructive] {
            let result = Err(ProviderError::NotConfigured {
                service: Service::Calendar,
            });
            assert_eq!(with_fallback(kind, "op", result, || 42).unwrap(), 42);
        }
    }

    #[test]
    fn test_typed_errors_are_never_masked() {
        let result: Result<i32, _> = Err(ProviderError::classify(
            Service::Calendar,
            Some(401),
            "Invalid Credentials",
        ));
        let err = with_fallback(CallKind::Create, "create event", result, || 1).unwrap_err();
        assert_eq!(err.code(), "CALENDAR_AUTH_EXPIRED");
    }

    #[test]
    fn test_unclassified_read_and_create_fall_back() {
        assert_eq!(with_fallback(CallKind::Read, "op", Err(upstream()), || 3).unwrap(), 3);
        assert_eq!(with_fallback(CallKind::Create, "op", Err(upstream()), || 4).unwrap(), 4);
    }

    #[test]
    fn test_unclassified_destructive_is_internal_error() {
        let err = with_fallback(CallKind::Destructive, "delete event", Err(upstream()), || ())
            .unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert_eq!(err.to_string(), "Failed to delete event");
    }
}
