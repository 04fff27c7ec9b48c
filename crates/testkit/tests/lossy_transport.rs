//! Two wallets open a directly funded channel across links with packet
//! loss and latency, relying on `tick`-driven retransmission.

use statewallet_channel::ChannelStatus;
use statewallet_engine::{ObjectiveDoneResult, ObjectiveResult, WalletConfig};
use statewallet_store::RetryPolicy;
use statewallet_testkit::{direct_channel_params, seeded_keypair, Harness, TransportConfig};
use statewallet_types::{Address, Allocation, ChannelId, Destination, FixedPart, Keypair};
use std::time::Duration;

const CHAIN_ID: u64 = 1;
const NONCE: u64 = 7;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn wallet_config(retransmit_policy: RetryPolicy) -> WalletConfig {
    WalletConfig {
        chain_id: CHAIN_ID,
        workers: 1,
        lock_policy: RetryPolicy::default(),
        retransmit_policy,
        objective_timeout: Duration::from_secs(3600),
    }
}

fn keys() -> [Keypair; 2] {
    [seeded_keypair(1), seeded_keypair(2)]
}

fn allocations(keys: &[Keypair; 2]) -> Vec<Allocation> {
    vec![
        Allocation::simple(Destination::from_address(keys[0].address()), 100),
        Allocation::simple(Destination::from_address(keys[1].address()), 100),
    ]
}

fn expected_channel_id(keys: &[Keypair; 2]) -> ChannelId {
    let params = direct_channel_params(["alice", "bob"], keys, NONCE, allocations(keys));
    FixedPart {
        chain_id: CHAIN_ID,
        channel_nonce: NONCE,
        participants: params.participants,
        app_definition: Address::ZERO,
        challenge_duration: params.challenge_duration,
    }
    .channel_id()
}

fn resolved(handle: &mut Option<ObjectiveResult>) -> Option<ObjectiveDoneResult> {
    handle.as_mut().and_then(|h| h.try_done())
}

/// Drive a full direct-funding handshake and assert both sides reach
/// `Running` with a `Success` objective resolution.
fn open_channel_over_link(drop_rate: f64, delay: Duration) {
    init_tracing();
    let keys = keys();
    let channel_id = expected_channel_id(&keys);
    let mut harness = Harness::two_party(
        ["alice", "bob"],
        &keys,
        wallet_config(RetryPolicy {
            number_of_attempts: 100,
            initial_delay: Duration::from_millis(50),
            multiple: 1,
        }),
        TransportConfig {
            drop_rate,
            min_delay: delay,
            max_delay: delay,
            seed: 9,
        },
    );

    let params = direct_channel_params(["alice", "bob"], &keys, NONCE, allocations(&keys));
    let mut response = harness.node(0).engine.create_channel(params).unwrap();
    let mut alice_handle = response.objective_results.pop();
    assert!(alice_handle.is_some());
    harness.send(response.outbox);

    let mut bob_handle: Option<ObjectiveResult> = None;
    let deadline = Duration::from_secs(30);
    while harness.now() < deadline {
        harness.step();

        // Bob cannot join until Alice's proposal has made it through.
        if bob_handle.is_none() {
            if let Ok(mut joined) = harness.node(1).engine.join_channel(channel_id) {
                bob_handle = joined.objective_results.pop();
                harness.send(joined.outbox);
            }
        }

        if resolved(&mut alice_handle).is_some() && resolved(&mut bob_handle).is_some() {
            break;
        }
    }

    assert_eq!(
        resolved(&mut alice_handle),
        Some(ObjectiveDoneResult::Success),
        "alice open stalled at drop={drop_rate} delay={delay:?}"
    );
    assert_eq!(
        resolved(&mut bob_handle),
        Some(ObjectiveDoneResult::Success),
        "bob open stalled at drop={drop_rate} delay={delay:?}"
    );

    for index in 0..2 {
        let channels = harness.node(index).engine.get_channels().unwrap();
        let result = channels
            .iter()
            .find(|r| r.channel_id == channel_id)
            .unwrap();
        assert_eq!(result.status, ChannelStatus::Running);
        assert_eq!(result.holdings, 200);
    }
}

#[test]
fn opens_channel_over_reliable_link() {
    open_channel_over_link(0.0, Duration::ZERO);
}

#[test]
fn opens_channel_with_latency() {
    open_channel_over_link(0.0, Duration::from_millis(50));
}

#[test]
fn opens_channel_with_packet_loss() {
    open_channel_over_link(0.3, Duration::ZERO);
}

#[test]
fn opens_channel_with_loss_and_latency() {
    open_channel_over_link(0.3, Duration::from_millis(50));
}

#[test]
fn total_loss_resolves_timed_out() {
    init_tracing();
    let keys = keys();
    let mut harness = Harness::two_party(
        ["alice", "bob"],
        &keys,
        wallet_config(RetryPolicy {
            number_of_attempts: 1,
            initial_delay: Duration::from_millis(50),
            multiple: 1,
        }),
        TransportConfig {
            drop_rate: 1.0,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            seed: 9,
        },
    );

    let params = direct_channel_params(["alice", "bob"], &keys, NONCE, allocations(&keys));
    let mut response = harness.node(0).engine.create_channel(params).unwrap();
    let mut alice_handle = response.objective_results.pop();
    harness.send(response.outbox);

    let deadline = Duration::from_secs(5);
    while harness.now() < deadline {
        harness.step();
        if resolved(&mut alice_handle).is_some() {
            break;
        }
    }

    assert_eq!(
        resolved(&mut alice_handle),
        Some(ObjectiveDoneResult::TimedOut)
    );
}
