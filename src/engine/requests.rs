// 8.3: transfer request builder. resolves account ids against the store and lays out
// the from/to waterfall for each transfer type. read only: nothing here mutates, so a
// call can build every request it needs before touching a balance.

use super::results::EngineError;
use crate::account::{AccountId, AccountType};
use crate::store::AccountStore;
use crate::transfer::{Transfer, TransferRequest, TransferType};
use crate::types::{Amount, AssetId, MarketId, PartyId};

/// Market insurance pool and settlement account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct MarketAccounts {
    pub insurance: AccountId,
    pub settlement: AccountId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct FeeAccounts {
    pub maker: AccountId,
    pub infrastructure: AccountId,
    pub liquidity: AccountId,
}

fn require(store: &AccountStore, id: AccountId) -> Result<AccountId, EngineError> {
    if store.contains(&id) {
        Ok(id)
    } else {
        Err(EngineError::AccountNotFound(id))
    }
}

fn optional(store: &AccountStore, id: AccountId) -> Option<AccountId> {
    store.contains(&id).then_some(id)
}

fn request(from: Vec<AccountId>, to: Vec<AccountId>, transfer: &Transfer, min_amount: Amount) -> TransferRequest {
    TransferRequest {
        from,
        to,
        amount: transfer.amount,
        min_amount,
        asset: transfer.asset.clone(),
        kind: transfer.kind,
    }
}

/// Moves a fixed amount between two known accounts.
pub(super) fn direct(
    from: AccountId,
    to: AccountId,
    amount: Amount,
    asset: &AssetId,
    kind: TransferType,
) -> TransferRequest {
    TransferRequest {
        from: vec![from],
        to: vec![to],
        amount,
        min_amount: Amount::zero(),
        asset: asset.clone(),
        kind,
    }
}

pub(super) fn market_accounts(
    store: &AccountStore,
    market: &MarketId,
    asset: &AssetId,
) -> Result<MarketAccounts, EngineError> {
    let insurance = AccountId::market_system(market, asset, AccountType::Insurance);
    let settlement = AccountId::market_system(market, asset, AccountType::Settlement);
    if !store.contains(&insurance) || !store.contains(&settlement) {
        return Err(EngineError::MissingSystemAccounts {
            market: market.clone(),
            asset: asset.clone(),
        });
    }
    Ok(MarketAccounts { insurance, settlement })
}

pub(super) fn fee_accounts(
    store: &AccountStore,
    market: &MarketId,
    asset: &AssetId,
) -> Result<FeeAccounts, EngineError> {
    let accounts = FeeAccounts {
        maker: AccountId::market_system(market, asset, AccountType::FeesMaker),
        infrastructure: AccountId::asset_system(asset, AccountType::FeesInfrastructure),
        liquidity: AccountId::market_system(market, asset, AccountType::FeesLiquidity),
    };
    let all_present = [&accounts.maker, &accounts.infrastructure, &accounts.liquidity]
        .into_iter()
        .all(|id| store.contains(id));
    if !all_present {
        return Err(EngineError::MissingFeeAccounts {
            market: market.clone(),
            asset: asset.clone(),
        });
    }
    Ok(accounts)
}

/// Accounts a settlement loss may be taken from, in waterfall order, without the insurance pool.
pub(super) fn loss_sources(
    store: &AccountStore,
    market: &MarketId,
    party: &PartyId,
    asset: &AssetId,
    use_general: bool,
) -> Result<Vec<AccountId>, EngineError> {
    let mut from = vec![require(store, AccountId::margin(market, party, asset))?];
    if use_general {
        from.push(require(store, AccountId::general(party, asset))?);
    }
    if let Some(bond) = optional(store, AccountId::bond(market, party, asset)) {
        from.push(bond);
    }
    Ok(from)
}

// 8.3.1: settlement. Loss/MtmLoss go margin -> general -> bond -> insurance into settlement,
// Win/MtmWin go settlement -> insurance into margin. the network party only ever
// touches the insurance pool.
pub(super) fn settlement_request(
    store: &AccountStore,
    accounts: &MarketAccounts,
    market: &MarketId,
    transfer: &Transfer,
    use_general: bool,
) -> Result<TransferRequest, EngineError> {
    let network = transfer.owner.is_network();
    match transfer.kind {
        TransferType::Loss | TransferType::MtmLoss => {
            let from = if network {
                vec![accounts.insurance.clone()]
            } else {
                let mut from = loss_sources(store, market, &transfer.owner, &transfer.asset, use_general)?;
                from.push(accounts.insurance.clone());
                from
            };
            Ok(request(from, vec![accounts.settlement.clone()], transfer, Amount::zero()))
        }
        TransferType::Win | TransferType::MtmWin => {
            if network {
                return Ok(request(
                    vec![accounts.settlement.clone()],
                    vec![accounts.insurance.clone()],
                    transfer,
                    Amount::zero(),
                ));
            }
            let margin = require(store, AccountId::margin(market, &transfer.owner, &transfer.asset))?;
            Ok(request(
                vec![accounts.settlement.clone(), accounts.insurance.clone()],
                vec![margin],
                transfer,
                Amount::zero(),
            ))
        }
        other => Err(EngineError::InvalidTransferType(other)),
    }
}

// 8.3.2: margin. MarginLow tops up from general then bond, MarginHigh releases to general.
pub(super) fn margin_request(
    store: &AccountStore,
    market: &MarketId,
    transfer: &Transfer,
) -> Result<TransferRequest, EngineError> {
    let (party, asset) = (&transfer.owner, &transfer.asset);
    let margin = require(store, AccountId::margin(market, party, asset))?;
    let general = require(store, AccountId::general(party, asset))?;
    match transfer.kind {
        TransferType::MarginLow => {
            let mut from = vec![general];
            if let Some(bond) = optional(store, AccountId::bond(market, party, asset)) {
                from.push(bond);
            }
            Ok(request(from, vec![margin], transfer, transfer.min_amount))
        }
        TransferType::MarginHigh => Ok(request(vec![margin], vec![general], transfer, transfer.min_amount)),
        other => Err(EngineError::InvalidTransferType(other)),
    }
}

pub(super) fn bond_request(
    store: &AccountStore,
    market: &MarketId,
    transfer: &Transfer,
) -> Result<TransferRequest, EngineError> {
    let (party, asset) = (&transfer.owner, &transfer.asset);
    let bond = require(store, AccountId::bond(market, party, asset))?;
    let general = require(store, AccountId::general(party, asset))?;
    match transfer.kind {
        TransferType::BondLow => Ok(request(vec![general], vec![bond], transfer, transfer.amount)),
        TransferType::BondHigh => Ok(request(vec![bond], vec![general], transfer, transfer.amount)),
        TransferType::BondSlashing => {
            let accounts = market_accounts(store, market, asset)?;
            let mut from = vec![bond];
            if let Some(margin) = optional(store, AccountId::margin(market, party, asset)) {
                from.push(margin);
            }
            Ok(request(from, vec![accounts.insurance], transfer, transfer.amount))
        }
        other => Err(EngineError::InvalidTransferType(other)),
    }
}

// 8.3.3: fees. payers drain general then margin. for the network party the market
// insurance pool plays the part of the general account.
pub(super) fn fee_request(
    store: &AccountStore,
    fees: &FeeAccounts,
    market: &MarketId,
    transfer: &Transfer,
) -> Result<TransferRequest, EngineError> {
    let (party, asset) = (&transfer.owner, &transfer.asset);
    let (general, margin) = if party.is_network() {
        let accounts = market_accounts(store, market, asset)?;
        (accounts.insurance, None)
    } else {
        (
            require(store, AccountId::general(party, asset))?,
            optional(store, AccountId::margin(market, party, asset)),
        )
    };

    let fee_account = match transfer.kind {
        TransferType::MakerFeePay | TransferType::MakerFeeReceive => &fees.maker,
        TransferType::InfrastructureFeePay | TransferType::InfrastructureFeeDistribute => &fees.infrastructure,
        TransferType::LiquidityFeePay | TransferType::LiquidityFeeDistribute => &fees.liquidity,
        other => return Err(EngineError::InvalidTransferType(other)),
    };

    if transfer.kind.is_fee_payment() {
        let mut from = vec![general];
        from.extend(margin);
        if store.get(&from[0])?.account_type == AccountType::Insurance {
            from.truncate(1);
        }
        Ok(request(from, vec![fee_account.clone()], transfer, transfer.amount))
    } else {
        Ok(request(vec![fee_account.clone()], vec![general], transfer, transfer.amount))
    }
}

// 8.3.4: custody. external is topped up by the caller before a deposit runs.
pub(super) fn custody_request(store: &AccountStore, transfer: &Transfer) -> Result<TransferRequest, EngineError> {
    let (party, asset) = (&transfer.owner, &transfer.asset);
    let external = require(store, AccountId::asset_system(asset, AccountType::External))?;
    match transfer.kind {
        TransferType::Deposit => {
            let target = if party.is_reward() {
                AccountId::asset_system(asset, AccountType::GlobalReward)
            } else {
                AccountId::general(party, asset)
            };
            let target = require(store, target)?;
            Ok(request(vec![external], vec![target], transfer, transfer.amount))
        }
        TransferType::Withdraw => {
            let general = require(store, AccountId::general(party, asset))?;
            Ok(request(vec![general], vec![external], transfer, transfer.amount))
        }
        other => Err(EngineError::InvalidTransferType(other)),
    }
}

pub(super) fn holding_request(store: &AccountStore, transfer: &Transfer) -> Result<TransferRequest, EngineError> {
    let (party, asset) = (&transfer.owner, &transfer.asset);
    let general = require(store, AccountId::general(party, asset))?;
    let holding = require(store, AccountId::holding(party, asset))?;
    match transfer.kind {
        TransferType::HoldingLock => Ok(request(vec![general], vec![holding], transfer, transfer.amount)),
        TransferType::HoldingRelease => Ok(request(vec![holding], vec![general], transfer, transfer.amount)),
        other => Err(EngineError::InvalidTransferType(other)),
    }
}

pub(super) fn reward_request(
    store: &AccountStore,
    reward_account: &AccountId,
    transfer: &Transfer,
) -> Result<TransferRequest, EngineError> {
    if transfer.kind != TransferType::RewardPayout {
        return Err(EngineError::InvalidTransferType(transfer.kind));
    }
    let source = require(store, reward_account.clone())?;
    let general = require(store, AccountId::general(&transfer.owner, &transfer.asset))?;
    Ok(request(vec![source], vec![general], transfer, Amount::zero()))
}
