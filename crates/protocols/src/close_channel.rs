//! CloseChannel: produce and countersign the final state.

use crate::{CrankContext, CrankOutput, ProtocolError};
use statewallet_channel::{Channel, ChannelStatus};
use statewallet_types::{Keypair, ObjectiveStatus, SignedState, State};

/// Create and sign the final state at `latest_supported_turn + 1`.
///
/// Used both by the close API (where `NotMyTurn` surfaces to the caller)
/// and by the crank once the turn comes around. Requires a supported,
/// non-final latest state.
pub fn propose_final(
    channel: &mut Channel,
    keypair: &Keypair,
) -> Result<SignedState, ProtocolError> {
    let channel_id = channel.channel_id();
    let supported = channel
        .latest_supported_state()
        .ok_or(ProtocolError::NoSupportedState { channel_id })?;
    if supported.state.is_final {
        return Err(ProtocolError::AlreadyFinal { channel_id });
    }

    let turn = supported.state.turn_num + 1;
    if turn % channel.num_participants() as u64 != channel.my_index as u64 {
        return Err(ProtocolError::NotMyTurn {
            channel_id,
            turn,
            seat: channel.my_index,
        });
    }

    let final_state = State {
        turn_num: turn,
        is_final: true,
        ..supported.state.clone()
    };
    Ok(channel.sign(final_state, keypair)?)
}

pub(crate) fn crank(ctx: &mut CrankContext<'_>) -> Result<CrankOutput, ProtocolError> {
    let channel = &mut *ctx.channel;
    if channel.status() == ChannelStatus::Closed {
        return Ok(CrankOutput::succeeded());
    }

    let mut out = CrankOutput::default();

    // A final state already in flight: countersign it if we have not.
    // Only the turn number and the final flag may differ from the
    // supported state; a counterparty does not get to rewrite the
    // outcome on the way out.
    let existing_final = channel
        .latest_state()
        .filter(|s| s.state.is_final)
        .map(|s| (s.state.clone(), s.signed_by(channel.my_index)));
    match existing_final {
        Some((final_state, false)) => {
            let channel_id = channel.channel_id();
            let supported = channel
                .latest_supported_state()
                .ok_or(ProtocolError::NoSupportedState { channel_id })?;
            if final_state.turn_num != supported.state.turn_num + 1
                || final_state.outcome != supported.state.outcome
                || final_state.app_data != supported.state.app_data
            {
                return Err(ProtocolError::FinalStateMismatch {
                    channel_id,
                    turn: final_state.turn_num,
                });
            }
            let signed = channel.countersign(final_state.turn_num, ctx.keypair)?;
            out.outbox_states.push(signed);
            out.progressed = true;
        }
        Some((_, true)) => {}
        None => {
            // Create the final state when the turn is ours; otherwise
            // wait for the closer's state to arrive.
            match propose_final(channel, ctx.keypair) {
                Ok(signed) => {
                    out.outbox_states.push(signed);
                    out.progressed = true;
                }
                Err(ProtocolError::NotMyTurn { .. })
                | Err(ProtocolError::NoSupportedState { .. }) => {}
                Err(e) => return Err(e),
            }
        }
    }

    if channel.status() == ChannelStatus::Closed {
        out.transition = Some(ObjectiveStatus::Succeeded);
        out.progressed = true;
    }
    Ok(out)
}
