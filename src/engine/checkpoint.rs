// 8.8: checkpoint export and restore. restore credits every entry out of the external
// account into a copy of the ledger. the copy replaces the caller's state only once every
// asset total moved by exactly what the payload holds.

use super::core::Engine;
use super::requests;
use super::results::{EngineError, FatalError};
use crate::account::{AccountId, AccountType};
use crate::checkpoint::Checkpoint;
use crate::clock::Clock;
use crate::events::EventSink;
use crate::state::LedgerState;
use crate::transfer::{LedgerMovement, TransferType};
use crate::types::{AssetId, Context};
use tracing::{error, info, info_span};

impl<C: Clock, S: EventSink> Engine<C, S> {
    pub fn checkpoint(&self, state: &LedgerState) -> Result<Vec<u8>, EngineError> {
        Ok(Checkpoint::capture(state).to_bytes()?)
    }

    /// Rebuilds balances from a checkpoint payload. assets missing from `state` are enabled first.
    /// all or nothing: on error `state` is left as it was and no event is published.
    pub fn load_checkpoint(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        bytes: &[u8],
    ) -> Result<Vec<LedgerMovement>, EngineError> {
        let span = info_span!("load_checkpoint", trace_id = %ctx.trace_id);
        let _guard = span.enter();

        let checkpoint = Checkpoint::from_bytes(bytes)?;
        let mut scratch = state.clone();
        let movements = self.all_or_nothing(|engine| {
            let movements = engine.restore_into(&mut scratch, ctx, &checkpoint)?;
            engine.emit_movements(ctx, &movements);
            Ok(movements)
        })?;
        *state = scratch;

        info!(
            assets = checkpoint.assets.len(),
            balances = checkpoint.balances.len(),
            "checkpoint restored"
        );
        Ok(movements)
    }

    fn restore_into(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        checkpoint: &Checkpoint,
    ) -> Result<Vec<LedgerMovement>, EngineError> {
        for asset in &checkpoint.assets {
            if !state.asset_exists(&asset.id) {
                self.enable_asset(state, ctx, asset.clone())?;
            }
        }
        let expected = checkpoint.totals_by_asset();
        for asset in expected.keys() {
            Self::require_asset(state, asset)?;
        }
        let before: Vec<(AssetId, _)> = expected
            .keys()
            .map(|asset| (asset.clone(), state.total_for_asset(asset)))
            .collect();

        let mut movements = Vec::with_capacity(checkpoint.balances.len());
        for entry in &checkpoint.balances {
            Self::require_supply_headroom(state, &entry.asset, entry.balance)?;
            let target = self.open_account(
                state,
                ctx,
                entry.market.clone(),
                entry.owner.clone(),
                entry.asset.clone(),
                entry.account_type,
            )?;
            let external = AccountId::asset_system(&entry.asset, AccountType::External);
            state.store.credit(&external, entry.balance)?;

            let req = requests::direct(external, target, entry.balance, &entry.asset, TransferType::CheckpointRestore);
            movements.push(self.run_request(state, ctx, &req)?);
        }

        // 8.8.1: every asset total must have grown by exactly the payload total
        for (asset, start) in before {
            let expected = expected.get(&asset).copied().unwrap_or_default();
            let restored = state.total_for_asset(&asset).saturating_sub(start);
            if restored != expected {
                error!(asset = %asset, expected = %expected, restored = %restored, "checkpoint restore mismatch");
                return Err(FatalError::CheckpointMismatch {
                    asset,
                    expected,
                    restored,
                }
                .into());
            }
        }
        Ok(movements)
    }
}
