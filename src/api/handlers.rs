use actix_web::{web, HttpResponse, Responder};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use super::schema::{error_response, millis};
use crate::blockchain::{
    Block, BlockchainError, Ledger, RepairReport, StatusReport, Violation,
};

/// Data structure for the ledger state
pub type LedgerData = web::Data<Ledger>;

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain, genesis first
    pub chain: Vec<Block>,
}

/// Request for the append endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct AppendRequest {
    /// Leading hex zeros required in the new block's hash (1 to 64)
    pub difficulty: i64,

    /// The transaction payload
    pub data: String,
}

/// Response for the append endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct AppendResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,

    /// The block's hash, now the chain hash
    pub hash: String,

    /// Time spent mining, in milliseconds
    pub elapsed_ms: u64,
}

/// Response for the validate endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ValidateResponse {
    /// Whether every check passed
    pub valid: bool,

    /// Indices of blocks that failed a check
    pub failing_indices: Vec<u64>,

    /// Every failed check
    pub violations: Vec<Violation>,

    /// Time spent validating, in milliseconds
    pub elapsed_ms: u64,
}

/// Request for the corrupt endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct CorruptRequest {
    /// The payload that replaces the block's data
    pub data: String,
}

/// Response for the corrupt endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct CorruptResponse {
    /// The message
    pub message: String,
}

/// Response for the repair endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct RepairResponse {
    /// The message
    pub message: String,

    /// What the repair pass changed
    pub report: RepairReport,

    /// Time spent repairing, in milliseconds
    pub elapsed_ms: u64,
}

/// Runs a ledger call on the blocking pool so lock waits and hashing stay
/// off the async workers
async fn run_blocking<T, F>(ledger: &LedgerData, job: F) -> Result<T, BlockchainError>
where
    F: FnOnce(&Ledger) -> Result<T, BlockchainError> + Send + 'static,
    T: Send + 'static,
{
    let ledger = ledger.get_ref().clone();
    web::block(move || job(&ledger))
        .await
        .map_err(|e| BlockchainError::SystemError(e.to_string()))?
}

/// Like `run_blocking`, but hands the job a cancellation token that fires
/// once the configured mining timeout elapses
async fn run_mining<T, F>(ledger: &LedgerData, job: F) -> Result<T, BlockchainError>
where
    F: FnOnce(&Ledger, CancellationToken) -> Result<T, BlockchainError> + Send + 'static,
    T: Send + 'static,
{
    let token = CancellationToken::new();

    let timer = ledger.settings().timeout.map(|timeout| {
        let token = token.clone();
        actix_web::rt::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!("Mining exceeded {:?}, cancelling", timeout);
            token.cancel();
        })
    });

    let result = run_blocking(ledger, move |ledger| job(ledger, token)).await;

    if let Some(timer) = timer {
        timer.abort();
    }
    result
}

/// Get the ledger status
///
/// Returns chain size, difficulty totals, hash-rate estimate and head pointer
#[utoipa::path(
    get,
    path = "/api/v1/status",
    responses(
        (status = 200, description = "Status retrieved successfully", body = StatusReport),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_status(ledger: LedgerData) -> impl Responder {
    match run_blocking(&ledger, |ledger| ledger.status()).await {
        Ok(status) => HttpResponse::Ok().json(status),
        Err(err) => error_response(&err),
    }
}

/// Mine and append a block
///
/// Creates a block holding the payload, mines it at the requested difficulty
/// and appends it to the chain
#[utoipa::path(
    post,
    path = "/api/v1/blocks",
    request_body = AppendRequest,
    responses(
        (status = 201, description = "Block mined and appended", body = AppendResponse),
        (status = 400, description = "Invalid difficulty"),
        (status = 503, description = "Mining cancelled or gave up"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn append_block(
    ledger: LedgerData,
    append_req: web::Json<AppendRequest>,
) -> impl Responder {
    let AppendRequest { difficulty, data } = append_req.into_inner();

    let result = run_mining(&ledger, move |ledger, cancel| {
        ledger.append(difficulty, data, cancel)
    })
    .await;

    match result {
        Ok(outcome) => {
            info!(
                "Block {} mined in {} ms",
                outcome.block.index,
                millis(outcome.elapsed)
            );

            HttpResponse::Created().json(AppendResponse {
                message: format!(
                    "Total execution time to add this block was {} milliseconds",
                    millis(outcome.elapsed)
                ),
                block: outcome.block,
                hash: outcome.hash,
                elapsed_ms: millis(outcome.elapsed),
            })
        }
        Err(err) => error_response(&err),
    }
}

/// Validate the chain
///
/// Checks every link and proof of work and reports each failure
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Validation finished", body = ValidateResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn validate_chain(ledger: LedgerData) -> impl Responder {
    match run_blocking(&ledger, |ledger| ledger.validate()).await {
        Ok((report, elapsed)) => HttpResponse::Ok().json(ValidateResponse {
            valid: report.is_valid(),
            failing_indices: report.failing_indices(),
            violations: report.violations,
            elapsed_ms: millis(elapsed),
        }),
        Err(err) => error_response(&err),
    }
}

/// Get the full chain
///
/// Returns every block with all of its fields
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Chain retrieved successfully", body = ChainResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_chain(ledger: LedgerData) -> impl Responder {
    match run_blocking(&ledger, |ledger| ledger.dump()).await {
        Ok(chain) => HttpResponse::Ok().json(ChainResponse {
            length: chain.len(),
            chain,
        }),
        Err(err) => error_response(&err),
    }
}

/// Get a single block
///
/// Returns the block at the given index
#[utoipa::path(
    get,
    path = "/api/v1/blocks/{index}",
    params(
        ("index" = u64, Path, description = "Index of the block")
    ),
    responses(
        (status = 200, description = "Block retrieved successfully", body = Block),
        (status = 400, description = "Block index out of range"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_block(ledger: LedgerData, index: web::Path<u64>) -> impl Responder {
    let index = index.into_inner();

    match run_blocking(&ledger, move |ledger| ledger.block(index)).await {
        Ok(block) => HttpResponse::Ok().json(block),
        Err(err) => error_response(&err),
    }
}

/// Corrupt a block
///
/// Overwrites a block's payload without re-mining it, breaking the chain's
/// integrity on purpose
#[utoipa::path(
    post,
    path = "/api/v1/blocks/{index}/corrupt",
    request_body = CorruptRequest,
    params(
        ("index" = u64, Path, description = "Index of the block to corrupt")
    ),
    responses(
        (status = 200, description = "Block payload overwritten", body = CorruptResponse),
        (status = 400, description = "Block index out of range"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn corrupt_block(
    ledger: LedgerData,
    index: web::Path<u64>,
    corrupt_req: web::Json<CorruptRequest>,
) -> impl Responder {
    let index = index.into_inner();
    let data = corrupt_req.into_inner().data;
    let message = format!("Block {} now holds {}", index, data);

    match run_blocking(&ledger, move |ledger| ledger.corrupt(index, data)).await {
        Ok(()) => HttpResponse::Ok().json(CorruptResponse { message }),
        Err(err) => error_response(&err),
    }
}

/// Repair the chain
///
/// Relinks every block and re-mines those whose proof of work no longer holds
#[utoipa::path(
    post,
    path = "/api/v1/repair",
    responses(
        (status = 200, description = "Chain repaired", body = RepairResponse),
        (status = 503, description = "Mining cancelled or gave up"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn repair_chain(ledger: LedgerData) -> impl Responder {
    match run_mining(&ledger, |ledger, cancel| ledger.repair(cancel)).await {
        Ok(outcome) => HttpResponse::Ok().json(RepairResponse {
            message: format!(
                "Total execution time required to repair the chain was {} milliseconds",
                millis(outcome.elapsed)
            ),
            report: outcome.report,
            elapsed_ms: millis(outcome.elapsed),
        }),
        Err(err) => error_response(&err),
    }
}
