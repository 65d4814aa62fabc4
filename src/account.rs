//! Account records and deterministic account ids.
//!
//! An account is identified by `(market, owner, asset, type)`. The id is a plain
//! string built by [`AccountId::new`], so two replicas always derive the same id
//! for the same tuple and ordered maps iterate accounts in the same order.

use crate::types::{Amount, AssetId, MarketId, PartyId, NO_MARKET, SYSTEM_OWNER};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccountType {
    // per party
    General,
    Margin,
    Bond,
    Holding,

    // per market, system owned
    Insurance,
    Settlement,
    FeesMaker,
    FeesLiquidity,

    // per asset, system owned
    GlobalInsurance,
    NetworkTreasury,
    FeesInfrastructure,
    GlobalReward,
    PendingTransfers,
    External,

    // reward pools, per market
    MakerReceivedFeeReward,
    MakerPaidFeeReward,
    LpFeeReward,
    MarketProposerReward,
}

impl AccountType {
    /// Stable two digit code appended to account ids. never renumber.
    pub fn code(&self) -> u8 {
        match self {
            AccountType::Insurance => 1,
            AccountType::Settlement => 2,
            AccountType::Margin => 3,
            AccountType::General => 4,
            AccountType::FeesInfrastructure => 5,
            AccountType::FeesLiquidity => 6,
            AccountType::External => 7,
            AccountType::GlobalReward => 8,
            AccountType::Bond => 9,
            AccountType::FeesMaker => 10,
            AccountType::MakerPaidFeeReward => 11,
            AccountType::MakerReceivedFeeReward => 12,
            AccountType::LpFeeReward => 13,
            AccountType::MarketProposerReward => 14,
            AccountType::Holding => 15,
            AccountType::PendingTransfers => 16,
            AccountType::NetworkTreasury => 17,
            AccountType::GlobalInsurance => 18,
        }
    }

    /// Margin, bond and holding accounts can only exist next to a general account.
    pub fn requires_general(&self) -> bool {
        matches!(self, AccountType::Margin | AccountType::Bond | AccountType::Holding)
    }

    pub fn is_party_account(&self) -> bool {
        matches!(
            self,
            AccountType::General | AccountType::Margin | AccountType::Bond | AccountType::Holding
        )
    }

    pub fn is_market_reward(&self) -> bool {
        matches!(
            self,
            AccountType::MakerReceivedFeeReward
                | AccountType::MakerPaidFeeReward
                | AccountType::LpFeeReward
                | AccountType::MarketProposerReward
        )
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// 2.0: account id. each component is length prefixed, then the two digit type code,
// so distinct (market, owner, asset, type) tuples never share an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(market: &MarketId, owner: &PartyId, asset: &AssetId, account_type: AccountType) -> Self {
        let market = if market.as_str().is_empty() { NO_MARKET } else { market.as_str() };
        let owner = if owner.as_str().is_empty() { SYSTEM_OWNER } else { owner.as_str() };
        let asset = asset.as_str();
        let mut id = String::with_capacity(market.len() + owner.len() + asset.len() + 12);
        for part in [market, owner, asset] {
            id.push_str(&part.len().to_string());
            id.push(':');
            id.push_str(part);
        }
        id.push_str(&format!("{:02}", account_type.code()));
        Self(id)
    }

    pub fn general(party: &PartyId, asset: &AssetId) -> Self {
        Self::new(&MarketId::none(), party, asset, AccountType::General)
    }

    pub fn margin(market: &MarketId, party: &PartyId, asset: &AssetId) -> Self {
        Self::new(market, party, asset, AccountType::Margin)
    }

    pub fn bond(market: &MarketId, party: &PartyId, asset: &AssetId) -> Self {
        Self::new(market, party, asset, AccountType::Bond)
    }

    pub fn holding(party: &PartyId, asset: &AssetId) -> Self {
        Self::new(&MarketId::none(), party, asset, AccountType::Holding)
    }

    /// Market scoped system account (insurance, settlement, maker/liquidity fees, market rewards).
    pub fn market_system(market: &MarketId, asset: &AssetId, account_type: AccountType) -> Self {
        Self::new(market, &PartyId::system(), asset, account_type)
    }

    /// Asset scoped system account (external, treasury, global reward...).
    pub fn asset_system(asset: &AssetId, account_type: AccountType) -> Self {
        Self::new(&MarketId::none(), &PartyId::system(), asset, account_type)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub market: MarketId,
    pub owner: PartyId,
    pub asset: AssetId,
    pub account_type: AccountType,
    pub balance: Amount,
}

impl Account {
    pub fn new(market: MarketId, owner: PartyId, asset: AssetId, account_type: AccountType) -> Self {
        let id = AccountId::new(&market, &owner, &asset, account_type);
        Self {
            id,
            market,
            owner,
            asset,
            account_type,
            balance: Amount::zero(),
        }
    }

    pub fn credit(&mut self, amount: Amount) -> Result<(), AccountError> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| AccountError::Overflow {
                account: self.id.clone(),
                balance: self.balance,
                amount,
            })?;
        Ok(())
    }

    pub fn debit(&mut self, amount: Amount) -> Result<(), AccountError> {
        let remaining = self
            .balance
            .checked_sub(amount)
            .ok_or_else(|| AccountError::InsufficientBalance {
                account: self.id.clone(),
                requested: amount,
                available: self.balance,
            })?;
        self.balance = remaining;
        Ok(())
    }

    pub fn is_external(&self) -> bool {
        self.account_type == AccountType::External
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    #[error("Insufficient balance on {account}: requested {requested}, available {available}")]
    InsufficientBalance {
        account: AccountId,
        requested: Amount,
        available: Amount,
    },
    #[error("Crediting {amount} to {account} would overflow its balance of {balance}")]
    Overflow {
        account: AccountId,
        balance: Amount,
        amount: Amount,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc() -> AssetId {
        AssetId::new("BTC")
    }

    #[test]
    fn id_is_pure_function_of_tuple() {
        let a = AccountId::general(&PartyId::new("alice"), &btc());
        let b = AccountId::new(&MarketId::none(), &PartyId::new("alice"), &btc(), AccountType::General);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "1:!5:alice3:BTC04");
    }

    #[test]
    fn empty_components_fall_back_to_sentinels() {
        let id = AccountId::new(&MarketId::new(""), &PartyId::new(""), &btc(), AccountType::External);
        assert_eq!(id, AccountId::asset_system(&btc(), AccountType::External));
        assert_eq!(id.as_str(), "1:!1:*3:BTC07");
    }

    #[test]
    fn shifted_components_do_not_collide() {
        let alice_btc = AccountId::general(&PartyId::new("alice"), &btc());
        let alice_b_tc = AccountId::general(&PartyId::new("aliceB"), &AssetId::new("TC"));
        assert_ne!(alice_btc, alice_b_tc);

        let m1 = AccountId::margin(&MarketId::new("m1"), &PartyId::new("0bob"), &btc());
        let m10 = AccountId::margin(&MarketId::new("m10"), &PartyId::new("bob"), &btc());
        assert_ne!(m1, m10);
    }

    #[test]
    fn distinct_types_get_distinct_ids() {
        let market = MarketId::new("m1");
        let party = PartyId::new("bob");
        let margin = AccountId::margin(&market, &party, &btc());
        let bond = AccountId::bond(&market, &party, &btc());
        assert_ne!(margin, bond);
    }

    #[test]
    fn debit_never_goes_negative() {
        let mut account = Account::new(MarketId::none(), PartyId::new("carol"), btc(), AccountType::General);
        account.credit(Amount::new(10)).unwrap();
        assert!(account.debit(Amount::new(11)).is_err());
        assert_eq!(account.balance, Amount::new(10));
        account.debit(Amount::new(10)).unwrap();
        assert!(account.balance.is_zero());
    }
}
