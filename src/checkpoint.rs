//! Checkpoint payloads.
//!
//! A checkpoint is the compact, cross-version export used at protocol upgrades. It
//! only keeps non-zero balances and folds accounts that will not survive the upgrade
//! into ones that will:
//!
//! - party margin, bond and holding balances go back to the party's general account
//! - market insurance, settlement and fee balances go to the asset's global insurance
//!
//! Restoring replays each entry as a credit out of the external account, see
//! `Engine::load_checkpoint`.

use crate::account::{Account, AccountType};
use crate::state::{Asset, LedgerState, StateError};
use crate::types::{Amount, AssetId, MarketId, PartyId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointBalance {
    pub owner: PartyId,
    pub market: MarketId,
    pub asset: AssetId,
    pub account_type: AccountType,
    pub balance: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub assets: Vec<Asset>,
    pub balances: Vec<CheckpointBalance>,
}

type CheckpointKey = (PartyId, MarketId, AssetId, AccountType);

/// Where an account's balance lands in a checkpoint. `None` for accounts that are not exported.
fn checkpoint_key(account: &Account) -> Option<CheckpointKey> {
    match account.account_type {
        AccountType::External => None,
        AccountType::General | AccountType::Margin | AccountType::Bond | AccountType::Holding => Some((
            account.owner.clone(),
            MarketId::none(),
            account.asset.clone(),
            AccountType::General,
        )),
        AccountType::Insurance
        | AccountType::Settlement
        | AccountType::FeesMaker
        | AccountType::FeesLiquidity => Some((
            PartyId::system(),
            MarketId::none(),
            account.asset.clone(),
            AccountType::GlobalInsurance,
        )),
        other => Some((account.owner.clone(), account.market.clone(), account.asset.clone(), other)),
    }
}

impl Checkpoint {
    pub fn capture(state: &LedgerState) -> Self {
        let mut folded: BTreeMap<CheckpointKey, Amount> = BTreeMap::new();
        for account in state.store().iter().filter(|a| !a.balance.is_zero()) {
            if let Some(key) = checkpoint_key(account) {
                *folded.entry(key).or_insert(Amount::zero()) += account.balance;
            }
        }

        let balances = folded
            .into_iter()
            .map(|((owner, market, asset, account_type), balance)| CheckpointBalance {
                owner,
                market,
                asset,
                account_type,
                balance,
            })
            .collect();

        Self {
            assets: state.assets.values().cloned().collect(),
            balances,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StateError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn totals_by_asset(&self) -> BTreeMap<AssetId, Amount> {
        let mut totals = BTreeMap::new();
        for entry in &self.balances {
            *totals.entry(entry.asset.clone()).or_insert(Amount::zero()) += entry.balance;
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_state() -> LedgerState {
        let mut state = LedgerState::new();
        let asset = Asset::new("ETH", "ETH", 18);
        state.assets.insert(asset.id.clone(), asset);
        let eth = AssetId::new("ETH");
        let party = PartyId::new("foo");
        let market = MarketId::new("m1");

        let mut credit = |market: MarketId, owner: PartyId, ty: AccountType, amount: u64| {
            let (acc, _) = state.store.create(market, owner, eth.clone(), ty).unwrap();
            state.store.credit(&acc.id, Amount::new(amount)).unwrap();
        };
        credit(MarketId::none(), party.clone(), AccountType::General, 500);
        credit(market.clone(), party.clone(), AccountType::Margin, 20);
        credit(market.clone(), PartyId::system(), AccountType::Insurance, 42);
        credit(MarketId::none(), PartyId::system(), AccountType::GlobalInsurance, 8);
        credit(market.clone(), PartyId::system(), AccountType::LpFeeReward, 55);
        credit(MarketId::none(), PartyId::system(), AccountType::External, 1000);
        credit(MarketId::none(), PartyId::new("empty"), AccountType::General, 0);
        state
    }

    #[test]
    fn folds_and_aliases_balances() {
        let cp = Checkpoint::capture(&seeded_state());
        let eth = AssetId::new("ETH");

        let general = cp
            .balances
            .iter()
            .find(|b| b.owner == PartyId::new("foo"))
            .unwrap();
        assert_eq!(general.account_type, AccountType::General);
        assert_eq!(general.balance, Amount::new(520));

        let insurance = cp
            .balances
            .iter()
            .find(|b| b.account_type == AccountType::GlobalInsurance)
            .unwrap();
        assert_eq!(insurance.balance, Amount::new(50));

        let reward = cp
            .balances
            .iter()
            .find(|b| b.account_type == AccountType::LpFeeReward)
            .unwrap();
        assert_eq!(reward.market, MarketId::new("m1"));

        assert!(cp.balances.iter().all(|b| !b.balance.is_zero()));
        assert!(cp.balances.iter().all(|b| b.account_type != AccountType::External));
        assert_eq!(cp.totals_by_asset()[&eth], Amount::new(625));
    }

    #[test]
    fn bytes_round_trip() {
        let cp = Checkpoint::capture(&seeded_state());
        let back = Checkpoint::from_bytes(&cp.to_bytes().unwrap()).unwrap();
        assert_eq!(back, cp);
        assert!(Checkpoint::from_bytes(b"[]").is_err());
    }

    #[test]
    fn capture_is_deterministic() {
        let a = Checkpoint::capture(&seeded_state()).to_bytes().unwrap();
        let b = Checkpoint::capture(&seeded_state()).to_bytes().unwrap();
        assert_eq!(a, b);
    }
}
