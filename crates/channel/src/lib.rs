//! Channel aggregate for the state-channel wallet.
//!
//! Owns the append-only set of signed states for one channel id and
//! derives everything else from it: lifecycle status, the latest
//! supported state, turn-taking rights, and the funding view. Pure state
//! machine; persistence and side effects live in the store and engine
//! crates.

mod aggregate;
mod result;

pub use aggregate::{
    AdjudicatorStatus, Channel, ChannelError, ChannelStatus, FundingMilestone,
    MergeOutcome,
};
pub use result::ChannelResult;
