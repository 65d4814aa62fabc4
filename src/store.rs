// 3.0: account store. the only place balances live. ordered by account id so that
// iteration (and therefore hashing and snapshots) is identical on every replica.

use crate::account::{Account, AccountError, AccountId, AccountType};
use crate::types::{Amount, AssetId, MarketId, PartyId};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Account {0} not found")]
    AccountNotFound(AccountId),

    #[error("Party {party} has no general account for asset {asset}")]
    NoGeneralAccount { party: PartyId, asset: AssetId },

    #[error("Account error: {0}")]
    Account(#[from] AccountError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountStore {
    accounts: BTreeMap<AccountId, Account>,
    // party -> ids of accounts it owns. system accounts are not indexed.
    by_party: BTreeMap<PartyId, BTreeSet<AccountId>>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn contains(&self, id: &AccountId) -> bool {
        self.accounts.contains_key(id)
    }

    pub fn get(&self, id: &AccountId) -> Result<&Account, StoreError> {
        self.accounts
            .get(id)
            .ok_or_else(|| StoreError::AccountNotFound(id.clone()))
    }

    pub fn balance(&self, id: &AccountId) -> Result<Amount, StoreError> {
        Ok(self.get(id)?.balance)
    }

    /// Returns the account and whether it was created by this call.
    pub fn create(
        &mut self,
        market: MarketId,
        owner: PartyId,
        asset: AssetId,
        account_type: AccountType,
    ) -> Result<(Account, bool), StoreError> {
        let id = AccountId::new(&market, &owner, &asset, account_type);
        if let Some(existing) = self.accounts.get(&id) {
            return Ok((existing.clone(), false));
        }
        if account_type.requires_general() && !self.contains(&AccountId::general(&owner, &asset)) {
            return Err(StoreError::NoGeneralAccount { party: owner, asset });
        }

        let account = Account::new(market, owner, asset, account_type);
        self.insert(account.clone());
        Ok((account, true))
    }

    // 3.1: the two mutators. both hand back the post-mutation record for event publishing.
    pub fn credit(&mut self, id: &AccountId, amount: Amount) -> Result<Account, StoreError> {
        let account = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| StoreError::AccountNotFound(id.clone()))?;
        account.credit(amount)?;
        Ok(account.clone())
    }

    pub fn debit(&mut self, id: &AccountId, amount: Amount) -> Result<Account, StoreError> {
        let account = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| StoreError::AccountNotFound(id.clone()))?;
        account.debit(amount)?;
        Ok(account.clone())
    }

    pub fn remove(&mut self, id: &AccountId) -> Option<Account> {
        let account = self.accounts.remove(id)?;
        if let Some(ids) = self.by_party.get_mut(&account.owner) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_party.remove(&account.owner);
            }
        }
        Some(account)
    }

    /// Inserts a record as-is. used when rebuilding from a trusted snapshot.
    pub fn insert(&mut self, account: Account) {
        if account.account_type.is_party_account() && !account.owner.is_system() {
            self.by_party
                .entry(account.owner.clone())
                .or_default()
                .insert(account.id.clone());
        }
        self.accounts.insert(account.id.clone(), account);
    }

    pub fn clear(&mut self) {
        self.accounts.clear();
        self.by_party.clear();
    }

    /// All accounts in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn party_accounts(&self, party: &PartyId) -> Vec<&Account> {
        self.by_party
            .get(party)
            .map(|ids| ids.iter().filter_map(|id| self.accounts.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn accounts_of_type(&self, account_type: AccountType) -> impl Iterator<Item = &Account> {
        self.accounts
            .values()
            .filter(move |a| a.account_type == account_type)
    }

    /// Sum of every non-external balance for an asset.
    pub fn total_for_asset(&self, asset: &AssetId) -> Amount {
        self.accounts
            .values()
            .filter(|a| &a.asset == asset && !a.is_external())
            .map(|a| a.balance)
            .sum()
    }
}
