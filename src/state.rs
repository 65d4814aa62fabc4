// 6.0: ledger state. the account store plus enabled assets, owned by the caller and
// lent to the engine for each call. also the state hash and the snapshot codec, since
// both are pure views over this struct.

use crate::account::{Account, AccountId};
use crate::store::{AccountStore, StoreError};
use crate::types::{Amount, AssetId, PartyId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const ACCOUNTS_KEY: &str = "accounts";
pub const ASSETS_KEY: &str = "assets";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub symbol: String,
    pub decimals: u32,
    pub quantum: Amount,
}

impl Asset {
    pub fn new(id: impl Into<AssetId>, symbol: impl Into<String>, decimals: u32) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            decimals,
            quantum: Amount::new(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("Unknown state key {0}")]
    UnknownKey(String),

    #[error("Codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Codec(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountsPayload {
    accounts: Vec<Account>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AssetsPayload {
    assets: Vec<Asset>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerState {
    pub(crate) store: AccountStore,
    pub(crate) assets: BTreeMap<AssetId, Asset>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &AccountStore {
        &self.store
    }

    pub fn asset(&self, id: &AssetId) -> Option<&Asset> {
        self.assets.get(id)
    }

    pub fn asset_exists(&self, id: &AssetId) -> bool {
        self.assets.contains_key(id)
    }

    /// Enabled asset ids, sorted.
    pub fn enabled_assets(&self) -> Vec<AssetId> {
        self.assets.keys().cloned().collect()
    }

    pub fn account(&self, id: &AccountId) -> Result<&Account, StoreError> {
        self.store.get(id)
    }

    pub fn balance(&self, id: &AccountId) -> Result<Amount, StoreError> {
        self.store.balance(id)
    }

    pub fn party_accounts(&self, party: &PartyId) -> Vec<&Account> {
        self.store.party_accounts(party)
    }

    /// Sum of everything a party holds across its accounts for one asset.
    pub fn party_balance(&self, party: &PartyId, asset: &AssetId) -> Amount {
        self.store
            .party_accounts(party)
            .into_iter()
            .filter(|a| &a.asset == asset)
            .map(|a| a.balance)
            .sum()
    }

    pub fn total_for_asset(&self, asset: &AssetId) -> Amount {
        self.store.total_for_asset(asset)
    }

    // 6.1: state hash. balances of every non-external account, ascending id, 16 bytes each.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for account in self.store.iter().filter(|a| !a.is_external()) {
            hasher.update(account.balance.to_be_bytes());
        }
        hasher.finalize().into()
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }

    // 6.2: snapshot codec. full fidelity, zero balances included, restored without transfers.
    pub fn list_state_keys(&self) -> Vec<&'static str> {
        vec![ACCOUNTS_KEY, ASSETS_KEY]
    }

    pub fn get_state(&self, key: &str) -> Result<Vec<u8>, StateError> {
        match key {
            ACCOUNTS_KEY => {
                let payload = AccountsPayload {
                    accounts: self.store.iter().cloned().collect(),
                };
                Ok(serde_json::to_vec(&payload)?)
            }
            ASSETS_KEY => {
                let payload = AssetsPayload {
                    assets: self.assets.values().cloned().collect(),
                };
                Ok(serde_json::to_vec(&payload)?)
            }
            other => Err(StateError::UnknownKey(other.to_string())),
        }
    }

    /// Replaces the part of the state named by `key`. nothing changes if decoding fails.
    pub fn load_state(&mut self, key: &str, bytes: &[u8]) -> Result<(), StateError> {
        match key {
            ACCOUNTS_KEY => {
                let payload: AccountsPayload = serde_json::from_slice(bytes)?;
                self.store.clear();
                for account in payload.accounts {
                    self.store.insert(account);
                }
                Ok(())
            }
            ASSETS_KEY => {
                let payload: AssetsPayload = serde_json::from_slice(bytes)?;
                self.assets = payload
                    .assets
                    .into_iter()
                    .map(|asset| (asset.id.clone(), asset))
                    .collect();
                Ok(())
            }
            other => Err(StateError::UnknownKey(other.to_string())),
        }
    }
}
