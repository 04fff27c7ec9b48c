//! OpenChannel: prefund exchange, funding, postfund exchange.

use crate::{CrankContext, CrankOutput, ProtocolError};
use statewallet_channel::ChannelStatus;
use statewallet_types::{
    ChainRequest, ChainRequestKind, FundingStrategy, ObjectiveStatus, State,
};

/// Drive a channel from proposal to `running`. Never fails on its own:
/// anything it cannot do yet, it waits for.
pub(crate) fn crank(
    strategy: FundingStrategy,
    ctx: &mut CrankContext<'_>,
) -> Result<CrankOutput, ProtocolError> {
    let channel = &mut *ctx.channel;
    channel.funding_strategy = strategy;
    if channel.status() >= ChannelStatus::Running {
        return Ok(CrankOutput::succeeded());
    }

    let mut out = CrankOutput::default();

    // Prefund. The proposer signs turn 0 at creation time; everyone else
    // countersigns once the proposal arrives.
    match channel.state_at(0) {
        None => return Ok(out),
        Some(prefund) if !prefund.signed_by(channel.my_index) => {
            let signed = channel.countersign(0, ctx.keypair)?;
            out.outbox_states.push(signed);
            out.progressed = true;
        }
        Some(_) => {}
    }
    let prefund_supported = channel
        .state_at(0)
        .map(|s| s.has_quorum())
        .unwrap_or(false);
    if !prefund_supported {
        return Ok(out);
    }

    // Funding. For direct funding we deposit our own share once every
    // prior seat's share is on chain. Other strategies fund the channel
    // externally; we just wait for the holdings to show up.
    if !channel.funding_satisfied() {
        if strategy == FundingStrategy::Direct {
            let milestone = channel.funding_milestone();
            let safe_to_deposit = channel.holdings >= milestone.expected_held;
            let already_deposited =
                channel.holdings >= milestone.expected_held + milestone.amount;
            if milestone.amount > 0 && safe_to_deposit && !already_deposited {
                let channel_id = channel.channel_id();
                if ctx
                    .store
                    .try_begin_chain_request(channel_id, ChainRequestKind::Deposit)
                {
                    out.chain_requests.push(ChainRequest::Deposit {
                        channel_id,
                        expected_held: milestone.expected_held,
                        amount: milestone.amount,
                    });
                    out.progressed = true;
                }
            }
        }
        return Ok(out);
    }

    // Postfund. The last seat creates it; everyone else countersigns.
    let postfund_turn = channel.postfund_turn();
    match channel.state_at(postfund_turn) {
        Some(postfund) if !postfund.signed_by(channel.my_index) => {
            let signed = channel.countersign(postfund_turn, ctx.keypair)?;
            out.outbox_states.push(signed);
            out.progressed = true;
        }
        Some(_) => {}
        None => {
            let creator = (postfund_turn % channel.num_participants() as u64) as usize;
            if creator == channel.my_index {
                if let Some(prefund) = channel.state_at(0) {
                    let postfund = State {
                        turn_num: postfund_turn,
                        ..prefund.state.clone()
                    };
                    let signed = channel.sign(postfund, ctx.keypair)?;
                    out.outbox_states.push(signed);
                    out.progressed = true;
                }
            }
        }
    }

    if channel.status() >= ChannelStatus::Running {
        out.transition = Some(ObjectiveStatus::Succeeded);
        out.progressed = true;
    }
    Ok(out)
}
