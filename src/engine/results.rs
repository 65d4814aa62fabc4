// 8.0.2: result types and errors for engine operations.

use crate::account::{AccountError, AccountId, AccountType};
use crate::state::StateError;
use crate::store::StoreError;
use crate::transfer::{LedgerMovement, TransferType};
use crate::types::{Amount, AssetId, MarketId, PartyId};

/// Balances of a party's market accounts after a settlement or margin call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarginStatus {
    pub party: PartyId,
    pub market: MarketId,
    pub asset: AssetId,
    pub margin_balance: Amount,
    pub general_balance: Amount,
    pub bond_balance: Option<Amount>,
    // part of a margin top-up the general account could not cover and the bond had to
    pub margin_shortfall: Amount,
}

#[derive(Debug, Clone, Default)]
pub struct SettlementResult {
    pub movements: Vec<LedgerMovement>,
    pub margins: Vec<MarginStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct MarginUpdateResult {
    pub movements: Vec<LedgerMovement>,
    // could not reach min_amount, position must be closed out
    pub closed: Vec<MarginStatus>,
    // topped up but had to dip into the bond
    pub penalised: Vec<MarginStatus>,
}

/// Invariant breaches. the caller must stop processing the block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FatalError {
    #[error("Settlement account for market {market} not drained, {balance} left")]
    SettlementBalanceNotZero { market: MarketId, balance: Amount },

    #[error("Checkpoint restore for {asset} credited {restored}, payload holds {expected}")]
    CheckpointMismatch {
        asset: AssetId,
        expected: Amount,
        restored: Amount,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Account {0} not found")]
    AccountNotFound(AccountId),

    #[error("Party {party} has no general account for asset {asset}")]
    NoGeneralAccount { party: PartyId, asset: AssetId },

    #[error("Asset {0} is not enabled")]
    AssetNotEnabled(AssetId),

    #[error("Asset {0} is already enabled")]
    AssetAlreadyEnabled(AssetId),

    #[error("Insufficient funds in {account}: requested {requested}, available {available}")]
    InsufficientFunds {
        account: AccountId,
        requested: Amount,
        available: Amount,
    },

    #[error("Crediting {amount} to {account} would overflow its balance of {balance}")]
    BalanceOverflow {
        account: AccountId,
        balance: Amount,
        amount: Amount,
    },

    #[error("Adding {amount} to the {total} held in {asset} would overflow the asset supply")]
    SupplyOverflow { asset: AssetId, total: Amount, amount: Amount },

    #[error("Transfer type {0:?} is not valid for this operation")]
    InvalidTransferType(TransferType),

    #[error("Account type {0} is not valid for this operation")]
    InvalidAccountType(AccountType),

    #[error("Party {party} cannot reach minimum amount {min_amount}")]
    MinimumAmountNotReached { party: PartyId, min_amount: Amount },

    #[error("Missing system accounts for market {market} asset {asset}")]
    MissingSystemAccounts { market: MarketId, asset: AssetId },

    #[error("Missing fee accounts for market {market} asset {asset}")]
    MissingFeeAccounts { market: MarketId, asset: AssetId },

    #[error("Party {party} cannot pay fees of {required}")]
    InsufficientFundsToPayFees { party: PartyId, required: Amount },

    #[error("Bond account {0} still holds funds")]
    NonZeroBalance(AccountId),

    #[error("Unknown state key {0}")]
    UnknownStateKey(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Fatal: {0}")]
    Fatal(#[from] FatalError),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AccountNotFound(id) => EngineError::AccountNotFound(id),
            StoreError::NoGeneralAccount { party, asset } => EngineError::NoGeneralAccount { party, asset },
            StoreError::Account(AccountError::InsufficientBalance {
                account,
                requested,
                available,
            }) => EngineError::InsufficientFunds {
                account,
                requested,
                available,
            },
            StoreError::Account(AccountError::Overflow { account, balance, amount }) => {
                EngineError::BalanceOverflow { account, balance, amount }
            }
        }
    }
}

impl From<StateError> for EngineError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::UnknownKey(key) => EngineError::UnknownStateKey(key),
            StateError::Codec(reason) => EngineError::Codec(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_engine_errors() {
        let id = AccountId::general(&PartyId::new("p"), &AssetId::new("ETH"));
        let err: EngineError = StoreError::AccountNotFound(id.clone()).into();
        assert_eq!(err, EngineError::AccountNotFound(id));
        assert!(!err.is_fatal());
    }

    #[test]
    fn fatal_is_flagged() {
        let err: EngineError = FatalError::SettlementBalanceNotZero {
            market: MarketId::new("m"),
            balance: Amount::new(3),
        }
        .into();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("not drained"));
    }

    #[test]
    fn state_errors_map_to_engine_errors() {
        let err: EngineError = StateError::UnknownKey("x".into()).into();
        assert_eq!(err, EngineError::UnknownStateKey("x".into()));
    }
}
