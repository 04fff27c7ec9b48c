//! Domain-separated signing for channel states.
//!
//! Every signed message carries a unique domain tag prefix so a signature
//! produced in one context can never be replayed in another (e.g. a state
//! signature can never double as a challenge authorization).
//!
//! | Tag | Purpose |
//! |-----|---------|
//! | `CHANNEL_STATE` | Off-chain channel state updates |

use crate::{ChannelId, Hash};

/// Domain tag for channel state signatures.
///
/// Format: `CHANNEL_STATE` || channel_id || turn_num || is_final || state_hash
pub const DOMAIN_CHANNEL_STATE: &[u8] = b"CHANNEL_STATE";

/// Build the signing message for a channel state.
///
/// This is used for:
/// - Producing a participant's signature on a state
/// - Verifying counterparty signatures during merge
pub fn channel_state_message(
    channel_id: &ChannelId,
    turn_num: u64,
    is_final: bool,
    state_hash: &Hash,
) -> Vec<u8> {
    let mut message = Vec::with_capacity(80);
    message.extend_from_slice(DOMAIN_CHANNEL_STATE);
    message.extend_from_slice(channel_id.as_hash().as_bytes());
    message.extend_from_slice(&turn_num.to_le_bytes());
    message.push(if is_final { 1 } else { 0 });
    message.extend_from_slice(state_hash.as_bytes());
    message
}
