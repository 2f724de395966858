use actix_web::HttpResponse;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::BlockchainError;

/// Body returned with every failed request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"error": "Block index 7 out of range (chain length 3)"}))]
pub struct ErrorResponse {
    pub error: String,
}

/// Maps a ledger error onto an HTTP response
///
/// Bad input is the caller's fault (400), a mining run that was cut short
/// may succeed later (503), anything else is ours (500).
pub fn error_response(err: &BlockchainError) -> HttpResponse {
    let body = ErrorResponse {
        error: err.to_string(),
    };

    match err {
        BlockchainError::OutOfRange { .. }
        | BlockchainError::InvalidDifficulty(_)
        | BlockchainError::IndexMismatch { .. } => HttpResponse::BadRequest().json(body),
        BlockchainError::MiningError(_) => HttpResponse::ServiceUnavailable().json(body),
        BlockchainError::StorageError(_) | BlockchainError::SystemError(_) => {
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// Converts a duration to whole milliseconds for responses
pub fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use crate::blockchain::pow::MiningError;

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (BlockchainError::OutOfRange { index: 4, len: 1 }, StatusCode::BAD_REQUEST),
            (BlockchainError::InvalidDifficulty("0".into()), StatusCode::BAD_REQUEST),
            (
                BlockchainError::MiningError(MiningError::Cancelled { attempts: 3 }),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (BlockchainError::SystemError("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(error_response(&err).status(), status);
        }
    }

    #[test]
    fn test_millis() {
        assert_eq!(millis(std::time::Duration::from_micros(2_500)), 2);
    }
}
