// 8.0.2: result types and errors for engine operations.

use crate::config::ConfigError;
use crate::ledger::LedgerError;
use crate::math::MathError;
use crate::oracle::OracleError;
use crate::order::DelayedOrder;
use crate::position::Position;
use crate::types::{AccountId, PositionId, Price, Quote, RoundId, SignedSize, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub account: AccountId,
    pub order: DelayedOrder,
    /// Margin left on the position once both deposits were taken.
    pub margin_after: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResult {
    pub account: AccountId,
    pub by_keeper: bool,
    /// commit deposit sent to the fee sink
    pub forfeited: Quote,
    /// keeper deposit returned to the owner's margin
    pub refunded_to_margin: Quote,
    pub keeper_reward: Option<Quote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub account: AccountId,
    pub fill_price: Price,
    pub size_delta: Decimal,
    pub fee: Quote,
    pub position: Position,
    pub keeper_reward: Option<Quote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationResult {
    pub account: AccountId,
    pub liquidator: AccountId,
    pub position_id: PositionId,
    pub size: SignedSize,
    pub price: Price,
    pub fee: Quote,
    pub market_absorbed: Quote,
    // deposits of a pending order forfeited with the position
    pub forfeited_deposits: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingResult {
    pub index: usize,
    pub funding: Decimal,
    pub funding_rate: Decimal,
    pub timestamp: Timestamp,
}

/// Coarse error families. callers decide retry policy from this, not from variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Timing,
    Authorization,
    StateConflict,
    Suspension,
    Oracle,
    Ledger,
}

impl ErrorKind {
    /// The same call may succeed later without the caller changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Timing | ErrorKind::Suspension | ErrorKind::Oracle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    // validation
    #[error("Cannot submit an order of size zero")]
    ZeroSizeOrder,

    #[error("Leverage {leverage} exceeds max {max}")]
    MaxLeverageExceeded { leverage: Decimal, max: Decimal },

    #[error("Insufficient margin: {margin} after the operation, {required} required")]
    InsufficientMargin { margin: Quote, required: Quote },

    #[error("Fill price {fill} is worse than the accepted bound {bound}")]
    PriceImpactToleranceExceeded { fill: Price, bound: Price },

    #[error("Delay of {delay}s outside [{min}, {max}]")]
    DelayOutOfBounds { delay: u64, min: u64, max: u64 },

    #[error("Order would take one side to {value}, max market value is {max}")]
    MaxMarketSizeExceeded { value: Quote, max: Quote },

    #[error("Position would be liquidatable after the operation")]
    CanLiquidate,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Amount out of range: {0}")]
    Math(#[from] MathError),

    // timing
    #[error("Order for {0} is not executable yet")]
    OrderNotExecutable(AccountId),

    #[error("Order for {0} is past its confirmation window, cancel it instead")]
    OrderTooOld(AccountId),

    #[error("Price moved {deviation} between rounds, max is {max}")]
    PriceTooVolatile { deviation: Decimal, max: Decimal },

    // authorization
    #[error("Keeper cannot cancel the order for {0} before its confirmation window is over")]
    KeeperCannotCancelYet(AccountId),

    #[error("{0} is not allowed to perform this operation")]
    Unauthorized(AccountId),

    // state conflicts
    #[error("{0} already has a pending order")]
    OrderAlreadyExists(AccountId),

    #[error("{0} has no pending order")]
    NoOrderExists(AccountId),

    #[error("Position of {0} cannot be liquidated")]
    CannotLiquidate(AccountId),

    #[error("Market is suspended")]
    MarketSuspended,

    // oracle
    #[error("Invalid or stale price for {asset}")]
    InvalidPrice { asset: String, round_id: Option<RoundId> },

    #[error("No price for {asset} at {round_id}")]
    UnknownRound { asset: String, round_id: RoundId },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ZeroSizeOrder
            | EngineError::MaxLeverageExceeded { .. }
            | EngineError::InsufficientMargin { .. }
            | EngineError::PriceImpactToleranceExceeded { .. }
            | EngineError::DelayOutOfBounds { .. }
            | EngineError::MaxMarketSizeExceeded { .. }
            | EngineError::CanLiquidate
            | EngineError::Config(_)
            | EngineError::Math(_) => ErrorKind::Validation,
            EngineError::OrderNotExecutable(_)
            | EngineError::OrderTooOld(_)
            | EngineError::PriceTooVolatile { .. } => ErrorKind::Timing,
            EngineError::KeeperCannotCancelYet(_) | EngineError::Unauthorized(_) => ErrorKind::Authorization,
            EngineError::OrderAlreadyExists(_) | EngineError::NoOrderExists(_) | EngineError::CannotLiquidate(_) => {
                ErrorKind::StateConflict
            }
            EngineError::MarketSuspended => ErrorKind::Suspension,
            EngineError::InvalidPrice { .. } | EngineError::UnknownRound { .. } => ErrorKind::Oracle,
            EngineError::Ledger(_) => ErrorKind::Ledger,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<OracleError> for EngineError {
    fn from(err: OracleError) -> Self {
        match err {
            OracleError::UnknownAsset(asset) => EngineError::InvalidPrice { asset, round_id: None },
            OracleError::UnknownRound { asset, round_id } => EngineError::UnknownRound { asset, round_id },
            OracleError::InvalidPrice { asset, round_id } => EngineError::InvalidPrice {
                asset,
                round_id: Some(round_id),
            },
        }
    }
}
