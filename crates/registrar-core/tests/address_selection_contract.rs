//! Contract Test: Address Filtering and Selection
//!
//! Constraints verified:
//! - A candidate is accepted iff its top `mask_bit_len` bits equal those of `match`
//! - Address-family mismatches always reject
//! - Loopback addresses are never selected, whatever the mask or policy
//! - Wildcard listeners expand over the local addresses on the same port
//! - Policy violations surface synchronously from `on_start` and queue nothing

mod common;

use common::*;
use registrar_core::config::{AddressSelectionPolicy, SelectPolicy};
use registrar_core::traits::{ServerInfo, ServerLifecycleCallback};
use registrar_core::worker::{TaskKind, WorkerEvent};
use registrar_core::{AddressFilter, Error};
use std::net::{IpAddr, Ipv4Addr};

/// Reference check: compare binary renderings character by character
fn top_bits_equal(a: Ipv4Addr, b: Ipv4Addr, mask: usize) -> bool {
    let a = format!("{:032b}", u32::from(a));
    let b = format!("{:032b}", u32::from(b));
    a[..mask] == b[..mask]
}

#[test]
fn mask_match_agrees_with_bitwise_prefix_for_every_mask() {
    let match_addr = Ipv4Addr::new(172, 20, 129, 3);
    let candidates = [
        Ipv4Addr::new(172, 20, 129, 3),
        Ipv4Addr::new(172, 20, 129, 200),
        Ipv4Addr::new(172, 20, 130, 3),
        Ipv4Addr::new(172, 21, 0, 1),
        Ipv4Addr::new(173, 20, 129, 3),
        Ipv4Addr::new(44, 20, 129, 3),
        Ipv4Addr::new(10, 0, 0, 5),
        Ipv4Addr::new(255, 255, 255, 255),
    ];

    for mask in 0..=32u8 {
        let filter = AddressFilter::new(&AddressSelectionPolicy::new(
            match_addr.to_string(),
            mask,
            SelectPolicy::Any,
        ))
        .unwrap();

        for candidate in candidates {
            assert_eq!(
                filter.matches(IpAddr::V4(candidate)),
                top_bits_equal(candidate, match_addr, mask as usize),
                "candidate {} against {}/{}",
                candidate,
                match_addr,
                mask
            );
        }
    }
}

#[test]
fn family_mismatch_rejects_at_every_mask() {
    for mask in [0u8, 8, 32] {
        let filter =
            AddressFilter::new(&AddressSelectionPolicy::new("0.0.0.0", mask, SelectPolicy::Any)).unwrap();
        assert!(!filter.matches("fd00::5".parse().unwrap()));
        assert!(!filter.matches("::".parse().unwrap()));
    }

    let filter = AddressFilter::new(&AddressSelectionPolicy::new("::", 0, SelectPolicy::Any)).unwrap();
    assert!(!filter.matches("10.0.0.5".parse().unwrap()));
}

#[test]
fn mask_wider_than_address_is_config_error() {
    let v4 = AddressSelectionPolicy::new("10.0.0.0", 33, SelectPolicy::Any);
    assert!(matches!(AddressFilter::new(&v4), Err(Error::Config(_))));

    let v6 = AddressSelectionPolicy::new("fd00::", 128, SelectPolicy::Any);
    assert!(AddressFilter::new(&v6).is_ok());
}

#[tokio::test]
async fn wildcard_bind_selects_matching_local_address() {
    let naming = ScriptedNamingService::new();
    let (lc, mut events) = lifecycle(
        &naming,
        &["10.0.0.5", "192.168.1.5"],
        registration("10.0.0.0", 8, SelectPolicy::PickNoneOrFirst),
    );

    lc.on_start(&ServerInfo::new([sock("0.0.0.0:9090")])).unwrap();

    let event = wait_for(&mut events, |e| matches!(e, WorkerEvent::Registered { .. })).await;
    assert!(matches!(
        event,
        WorkerEvent::Registered { endpoint, .. } if endpoint == sock("10.0.0.5:9090")
    ));
    assert_eq!(naming.calls()[0].endpoint, sock("10.0.0.5:9090"));
}

#[tokio::test]
async fn exact_one_with_two_candidates_fails_start() {
    let naming = ScriptedNamingService::new();
    let (lc, _events) = lifecycle(
        &naming,
        &["10.0.0.5", "192.168.1.5"],
        registration("0.0.0.0", 0, SelectPolicy::ExactOne),
    );

    let err = lc.on_start(&ServerInfo::new([sock("0.0.0.0:9090")])).unwrap_err();
    assert!(matches!(err, Error::Selection { detected: 2, .. }));
    assert!(err.is_fatal());
    assert!(!lc.is_registered());

    assert!(lc.shutdown(std::time::Duration::from_secs(1)).await);
    assert_eq!(naming.call_count(TaskKind::Register), 0);
}

#[tokio::test]
async fn loopback_is_never_selected() {
    let naming = ScriptedNamingService::new();
    let (lc, _events) = lifecycle(
        &naming,
        &["127.0.0.1", "::1"],
        registration("127.0.0.0", 8, SelectPolicy::PickNoneOrFirst),
    );

    lc.on_start(&ServerInfo::new([sock("0.0.0.0:9090"), sock("127.0.0.1:9091")]))
        .unwrap();
    assert!(!lc.is_registered());

    let (lc, _events) = lifecycle(
        &naming,
        &["127.0.0.1"],
        registration("0.0.0.0", 0, SelectPolicy::AtLeastOne),
    );
    assert!(matches!(
        lc.on_start(&ServerInfo::new([sock("0.0.0.0:9090")])),
        Err(Error::Selection { detected: 0, .. })
    ));
}

#[tokio::test]
async fn empty_selection_skips_registration_without_error() {
    let naming = ScriptedNamingService::new();
    let (lc, _events) = lifecycle(
        &naming,
        &["192.168.1.5"],
        registration("10.0.0.0", 8, SelectPolicy::Any),
    );

    lc.on_start(&ServerInfo::new([sock("0.0.0.0:9090")])).unwrap();
    assert!(!lc.is_registered());
}

#[tokio::test]
async fn malformed_match_fails_start() {
    let naming = ScriptedNamingService::new();
    let (lc, _events) = lifecycle(
        &naming,
        &["10.0.0.5"],
        registration("10.0.0", 8, SelectPolicy::Any),
    );

    let err = lc.on_start(&ServerInfo::new([sock("0.0.0.0:9090")])).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn multiple_selected_endpoints_publish_the_first() {
    let naming = ScriptedNamingService::new();
    let (lc, _events) = lifecycle(
        &naming,
        &["10.0.0.5", "10.0.0.6"],
        registration("10.0.0.0", 24, SelectPolicy::Any),
    );

    lc.on_start(&ServerInfo::new([sock("0.0.0.0:9090")])).unwrap();
    assert_eq!(lc.live_instance().unwrap().endpoint(), sock("10.0.0.5:9090"));
}
