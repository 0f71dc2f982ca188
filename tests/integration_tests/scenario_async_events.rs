// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scenario F: enabling async events, submitting Async Event Request
//! capsules without waiting on their completions, then polling for and
//! decoding the notifications once the target responds.

use std::time::Duration;

use nvmeof_client_rs::cfg::config::NvmeOfConfig;
use nvmeof_client_rs::facade::ControllerFacade;
use nvmeof_client_rs::wire::async_event::{AsyncEventInfoNotice, AsyncEventType};
use tokio::io::AsyncWriteExt;

use super::common;

#[tokio::test]
async fn enable_request_and_poll_async_events() {
    let (addr, listener) = common::bind().await.expect("bind");
    // AERL=2 -> at most 3 outstanding AERs (distilled Testable Property #12).
    let controller_fixture = common::identify_controller_fixture("SN3", "MODEL3", 2, 320);

    let server = tokio::spawn(async move {
        let (mut admin, _) = listener.accept().await.expect("accept admin");
        common::run_admin_connect(&mut admin, 8192, 51, 0x0000_0000_7F00_001E, 0x0001_0000).await.expect("admin connect");

        let identify = common::read_cmd(&mut admin).await.expect("identify req");
        common::write_c2hdata_success(&mut admin, &controller_fixture).await.expect("c2h identify");
        let _ = identify.command_id();

        let set_features = common::read_cmd(&mut admin).await.expect("set features req");
        common::write_rsp(&mut admin, set_features.command_id(), 0, 0, 0).await.expect("set features rsp");

        let aer1 = common::read_cmd(&mut admin).await.expect("aer 1 req");
        let aer2 = common::read_cmd(&mut admin).await.expect("aer 2 req");

        // ANA Change notice on the first AER, a second Notice event on the
        // second; DW0 layout matches distilled Scenario F's example.
        let dw0_ana = 0x02u32 | (0x03 << 8) | (0x0C << 16);
        let dw0_ns = 0x02u32 | (0x00 << 8) | (0x02 << 16);
        common::write_rsp(&mut admin, aer1.command_id(), dw0_ana, 0, 0).await.expect("aer1 rsp");
        common::write_rsp(&mut admin, aer2.command_id(), dw0_ns, 0, 0).await.expect("aer2 rsp");

        let _ = admin.shutdown().await;
    });

    let mut cfg = NvmeOfConfig::new(addr.ip().to_string(), addr.port(), Some("nqn.test:subsys1".to_string()));
    cfg.validate_and_normalize().expect("valid cfg");
    let mut facade = ControllerFacade::new(cfg);
    facade.connect().await.expect("connect");

    facade.enable_async_events(None).await.expect("enable async events");
    facade.request_async_events(2).await.expect("request async events");

    let events = facade.poll_async_events(Duration::from_secs(2)).await.expect("poll async events");
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.event_type == AsyncEventType::Notice));
    assert!(events.iter().any(|e| e.as_notice_info() == AsyncEventInfoNotice::AnaChange));
    assert!(events.iter().any(|e| e.as_notice_info() == AsyncEventInfoNotice::NamespaceAttributeChanged));

    facade.disconnect().await;
    server.await.expect("server task");
}

#[tokio::test]
async fn request_async_events_rejects_exceeding_aerl_plus_one() {
    let (addr, listener) = common::bind().await.expect("bind");
    let controller_fixture = common::identify_controller_fixture("SN4", "MODEL4", 1, 320); // AERL=1 -> limit 2

    let server = tokio::spawn(async move {
        let (mut admin, _) = listener.accept().await.expect("accept admin");
        common::run_admin_connect(&mut admin, 8192, 61, 0x0000_0000_7F00_001E, 0x0001_0000).await.expect("admin connect");
        let identify = common::read_cmd(&mut admin).await.expect("identify req");
        common::write_c2hdata_success(&mut admin, &controller_fixture).await.expect("c2h identify");
        let _ = identify.command_id();
        let set_features = common::read_cmd(&mut admin).await.expect("set features req");
        common::write_rsp(&mut admin, set_features.command_id(), 0, 0, 0).await.expect("set features rsp");
        let aer1 = common::read_cmd(&mut admin).await.expect("aer 1 req");
        let aer2 = common::read_cmd(&mut admin).await.expect("aer 2 req");
        common::write_rsp(&mut admin, aer1.command_id(), 0, 0, 0).await.expect("aer1 rsp");
        common::write_rsp(&mut admin, aer2.command_id(), 0, 0, 0).await.expect("aer2 rsp");
        let _ = admin.shutdown().await;
    });

    let mut cfg = NvmeOfConfig::new(addr.ip().to_string(), addr.port(), Some("nqn.test:subsys1".to_string()));
    cfg.validate_and_normalize().expect("valid cfg");
    let mut facade = ControllerFacade::new(cfg);
    facade.connect().await.expect("connect");
    facade.enable_async_events(None).await.expect("enable async events");

    // 2 outstanding is exactly AERL+1; a 3rd must be rejected before any
    // capsule for it is sent.
    facade.request_async_events(2).await.expect("request 2 within limit");
    let err = facade.request_async_events(1).await.unwrap_err();
    assert!(matches!(err, nvmeof_client_rs::NvmeError::InvalidArgument(_)));

    // Drain the two legitimate completions so the server task can exit.
    let _ = facade.poll_async_events(Duration::from_secs(2)).await.expect("poll");

    facade.disconnect().await;
    server.await.expect("server task");
}
