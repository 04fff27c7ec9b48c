//! DefundChannel: pull funds out of a concluded or finalized channel.

use crate::{CrankContext, CrankOutput, ProtocolError};
use statewallet_channel::{AdjudicatorStatus, ChannelStatus};
use statewallet_types::{
    ChainRequest, ChainRequestKind, FundingStrategy, ObjectiveStatus,
};
use tracing::debug;

/// Withdraw a directly funded channel. With a local conclusion proof we
/// conclude-and-withdraw in one transaction; a channel already finalized
/// on chain (e.g. by challenge timeout) gets its outcome pushed instead.
pub(crate) fn crank(ctx: &mut CrankContext<'_>) -> Result<CrankOutput, ProtocolError> {
    let channel = &mut *ctx.channel;
    if channel.funding_strategy != FundingStrategy::Direct {
        return Err(ProtocolError::UnsupportedFundingStrategy {
            strategy: channel.funding_strategy,
        });
    }

    let channel_id = channel.channel_id();
    let mut out = CrankOutput::default();

    match channel.adjudicator_status {
        AdjudicatorStatus::Finalized {
            outcome_pushed: true,
        } => {
            return Ok(CrankOutput::succeeded());
        }
        AdjudicatorStatus::Finalized {
            outcome_pushed: false,
        } => {
            if let Some(finalized) = channel.latest_supported_state() {
                if ctx
                    .store
                    .try_begin_chain_request(channel_id, ChainRequestKind::PushOutcome)
                {
                    debug!(
                        channel_id = %channel_id,
                        predicted_payout = channel.my_payout(),
                        "Pushing finalized outcome for withdrawal"
                    );
                    out.chain_requests.push(ChainRequest::PushOutcomeAndWithdraw {
                        finalized_state: finalized.clone(),
                        recipient: channel.my_destination(),
                    });
                }
                return Ok(CrankOutput {
                    transition: Some(ObjectiveStatus::Succeeded),
                    progressed: true,
                    ..out
                });
            }
            return Ok(out);
        }
        AdjudicatorStatus::Active | AdjudicatorStatus::ChallengeOngoing { .. } => {
            // A quorum-signed final state lets us conclude and withdraw
            // without waiting for the chain.
            if channel.status() == ChannelStatus::Closed {
                if let Some(proof) = channel.latest_supported_state() {
                    if ctx
                        .store
                        .try_begin_chain_request(channel_id, ChainRequestKind::Withdraw)
                    {
                        debug!(
                            channel_id = %channel_id,
                            predicted_payout = channel.my_payout(),
                            "Concluding with local proof for withdrawal"
                        );
                        out.chain_requests.push(ChainRequest::ConcludeAndWithdraw {
                            support_proof: proof.clone(),
                        });
                    }
                    return Ok(CrankOutput {
                        transition: Some(ObjectiveStatus::Succeeded),
                        progressed: true,
                        ..out
                    });
                }
            }
            Ok(out)
        }
    }
}
