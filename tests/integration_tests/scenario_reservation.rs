// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scenario E: Reservation Register, Acquire, and Report, confirming the
//! report correctly identifies the reservation holder and key.

use nvmeof_client_rs::cfg::config::NvmeOfConfig;
use nvmeof_client_rs::facade::ControllerFacade;
use nvmeof_client_rs::wire::reservation::{ReservationAcquireAction, ReservationRegisterAction, ReservationType};
use tokio::io::AsyncWriteExt;

use super::common;

#[tokio::test]
async fn register_acquire_and_report_round_trip() {
    let (addr, listener) = common::bind().await.expect("bind");
    const NEW_KEY: u64 = 0xAAAA_BBBB;
    const HOLDER_CONTROLLER_ID: u16 = 0x10;
    let report_fixture = common::reservation_report_fixture(1, HOLDER_CONTROLLER_ID, NEW_KEY);

    let server = tokio::spawn(async move {
        let (mut admin, _) = listener.accept().await.expect("accept admin");
        let admin_task = tokio::spawn(async move {
            common::run_admin_connect(&mut admin, 8192, 41, 0x0000_0000_7F00_001E, 0x0001_0000).await.expect("admin connect");
            let _ = admin.shutdown().await;
        });

        let (mut io, _) = listener.accept().await.expect("accept io");
        let io_task = tokio::spawn(async move {
            common::run_io_connect(&mut io, 8192).await.expect("io connect");

            let register = common::read_cmd(&mut io).await.expect("register req");
            assert_eq!(u64::from_le_bytes(register.data_out[8..16].try_into().expect("8 bytes")), NEW_KEY);
            common::write_rsp(&mut io, register.command_id(), 0, 0, 0).await.expect("register rsp");

            let acquire = common::read_cmd(&mut io).await.expect("acquire req");
            common::write_rsp(&mut io, acquire.command_id(), 0, 0, 0).await.expect("acquire rsp");

            let report = common::read_cmd(&mut io).await.expect("report req");
            common::write_c2hdata_success(&mut io, &report_fixture).await.expect("c2h report");
            let _ = report.command_id();

            let _ = io.shutdown().await;
        });

        admin_task.await.expect("admin task");
        io_task.await.expect("io task");
    });

    let mut cfg = NvmeOfConfig::new(addr.ip().to_string(), addr.port(), Some("nqn.test:subsys1".to_string()));
    cfg.validate_and_normalize().expect("valid cfg");
    let mut facade = ControllerFacade::new(cfg);
    facade.connect().await.expect("connect");

    let register = facade.reservation_register(1, ReservationRegisterAction::Register, false, 0, NEW_KEY).await.expect("register");
    assert!(register.success);
    assert_eq!(register.key_used, NEW_KEY);

    let acquire = facade
        .reservation_acquire(1, ReservationAcquireAction::Acquire, ReservationType::WriteExclusive, NEW_KEY, 0)
        .await
        .expect("acquire");
    assert!(acquire.success);

    let status = facade.reservation_report(1, false).await.expect("report");
    assert_eq!(status.reservation_holder(), Some(HOLDER_CONTROLLER_ID));
    assert_eq!(status.reservation_keys(), vec![NEW_KEY]);

    facade.disconnect().await;
    server.await.expect("server task");
}
