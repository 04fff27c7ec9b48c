//! SubmitChallenge: put the latest support proof on chain.

use crate::{CrankContext, CrankOutput, ProtocolError};
use statewallet_channel::AdjudicatorStatus;
use statewallet_types::{ChainRequest, ChainRequestKind};

/// Submit a challenge when a counterparty goes unresponsive. Succeeds
/// once the adjudicator registers the challenge (or the channel turns
/// out to be finalized already); the engine reconciles our state set
/// with whatever the chain event carries.
pub(crate) fn crank(ctx: &mut CrankContext<'_>) -> Result<CrankOutput, ProtocolError> {
    let channel = &mut *ctx.channel;
    match channel.adjudicator_status {
        AdjudicatorStatus::ChallengeOngoing { .. } | AdjudicatorStatus::Finalized { .. } => {
            return Ok(CrankOutput::succeeded());
        }
        AdjudicatorStatus::Active => {}
    }

    let channel_id = channel.channel_id();
    let proof = match channel.latest_supported_state() {
        Some(proof) => proof.clone(),
        None => return Err(ProtocolError::NoSupportedState { channel_id }),
    };

    let mut out = CrankOutput::default();
    if ctx
        .store
        .try_begin_chain_request(channel_id, ChainRequestKind::Challenge)
    {
        out.chain_requests.push(ChainRequest::Challenge {
            channel_id,
            states: vec![proof],
        });
        out.progressed = true;
    }
    Ok(out)
}
