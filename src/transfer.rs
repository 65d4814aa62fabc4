// 4.0: transfer instructions coming in, ledger movements going out.
// an instruction says what should happen; a movement records what actually did.

use crate::account::AccountId;
use crate::types::{Amount, AssetId, PartyId, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferType {
    // settlement
    Loss,
    Win,
    MtmLoss,
    MtmWin,

    // margin
    MarginLow,
    MarginHigh,
    MarginConfiscated,

    // custody
    Deposit,
    Withdraw,

    // liquidity provision
    BondLow,
    BondHigh,
    BondSlashing,

    // fees
    MakerFeePay,
    MakerFeeReceive,
    InfrastructureFeePay,
    InfrastructureFeeDistribute,
    LiquidityFeePay,
    LiquidityFeeDistribute,

    RewardPayout,
    CheckpointRestore,
    ClearAccount,
    HoldingLock,
    HoldingRelease,
}

impl TransferType {
    pub fn is_loss(&self) -> bool {
        matches!(self, TransferType::Loss | TransferType::MtmLoss)
    }

    pub fn is_win(&self) -> bool {
        matches!(self, TransferType::Win | TransferType::MtmWin)
    }

    pub fn is_fee(&self) -> bool {
        matches!(
            self,
            TransferType::MakerFeePay
                | TransferType::MakerFeeReceive
                | TransferType::InfrastructureFeePay
                | TransferType::InfrastructureFeeDistribute
                | TransferType::LiquidityFeePay
                | TransferType::LiquidityFeeDistribute
        )
    }

    /// Fee types that take money out of a party's accounts.
    pub fn is_fee_payment(&self) -> bool {
        matches!(
            self,
            TransferType::MakerFeePay | TransferType::InfrastructureFeePay | TransferType::LiquidityFeePay
        )
    }

    pub fn is_bond(&self) -> bool {
        matches!(
            self,
            TransferType::BondLow | TransferType::BondHigh | TransferType::BondSlashing
        )
    }
}

/// Instruction handed to the engine. `amount` is a magnitude; direction comes from `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub owner: PartyId,
    pub amount: Amount,
    pub asset: AssetId,
    pub min_amount: Amount,
    pub kind: TransferType,
}

impl Transfer {
    pub fn new(owner: impl Into<PartyId>, amount: Amount, asset: impl Into<AssetId>, kind: TransferType) -> Self {
        Self {
            owner: owner.into(),
            amount,
            asset: asset.into(),
            min_amount: Amount::zero(),
            kind,
        }
    }

    pub fn with_min_amount(mut self, min_amount: Amount) -> Self {
        self.min_amount = min_amount;
        self
    }
}

/// Concrete plan for one waterfall: drain `from` in order, spread over `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub from: Vec<AccountId>,
    pub to: Vec<AccountId>,
    pub amount: Amount,
    pub min_amount: Amount,
    pub asset: AssetId,
    pub kind: TransferType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub from_account: AccountId,
    pub to_account: AccountId,
    pub amount: Amount,
    pub kind: TransferType,
    pub timestamp: Timestamp,
    pub from_account_balance: Amount,
    pub to_account_balance: Amount,
}

/// Total credited to one destination account within a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostTransferBalance {
    pub account: AccountId,
    pub balance: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMovement {
    pub entries: Vec<LedgerEntry>,
    pub balances: Vec<PostTransferBalance>,
}

impl LedgerMovement {
    pub fn total_debited(&self) -> Amount {
        self.entries.iter().map(|e| e.amount).sum()
    }

    pub fn total_credited(&self) -> Amount {
        self.balances.iter().map(|b| b.balance).sum()
    }

    pub fn is_balanced(&self) -> bool {
        self.total_debited() == self.total_credited()
    }

    pub fn credited_to(&self, account: &AccountId) -> Amount {
        self.balances
            .iter()
            .filter(|b| &b.account == account)
            .map(|b| b.balance)
            .sum()
    }

    /// Folds another movement into this one, keeping entry order.
    pub fn merge(&mut self, other: LedgerMovement) {
        self.entries.extend(other.entries);
        for bal in other.balances {
            match self.balances.iter_mut().find(|b| b.account == bal.account) {
                Some(existing) => existing.balance += bal.balance,
                None => self.balances.push(bal),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssetId;

    fn entry(from: &str, to: &str, amount: u64) -> LedgerEntry {
        LedgerEntry {
            from_account: AccountId::general(&PartyId::new(from), &AssetId::new("ETH")),
            to_account: AccountId::general(&PartyId::new(to), &AssetId::new("ETH")),
            amount: Amount::new(amount),
            kind: TransferType::ClearAccount,
            timestamp: Timestamp::from_millis(0),
            from_account_balance: Amount::zero(),
            to_account_balance: Amount::new(amount),
        }
    }

    #[test]
    fn merge_accumulates_destination_totals() {
        let to = AccountId::general(&PartyId::new("b"), &AssetId::new("ETH"));
        let mut first = LedgerMovement {
            entries: vec![entry("a", "b", 5)],
            balances: vec![PostTransferBalance { account: to.clone(), balance: Amount::new(5) }],
        };
        let second = LedgerMovement {
            entries: vec![entry("c", "b", 7)],
            balances: vec![PostTransferBalance { account: to.clone(), balance: Amount::new(7) }],
        };
        first.merge(second);
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.balances.len(), 1);
        assert_eq!(first.credited_to(&to), Amount::new(12));
        assert!(first.is_balanced());
    }

    #[test]
    fn transfer_kinds_classify() {
        assert!(TransferType::MtmLoss.is_loss());
        assert!(TransferType::Win.is_win());
        assert!(TransferType::MakerFeePay.is_fee_payment());
        assert!(!TransferType::MakerFeeReceive.is_fee_payment());
        assert!(TransferType::BondSlashing.is_bond());
    }
}
