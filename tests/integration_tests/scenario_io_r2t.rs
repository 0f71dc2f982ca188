// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scenario D: a write large enough to exceed the inline-data threshold,
//! exercising the R2T -> H2CData* -> RSP write flow with MAXH2CDATA
//! chunking.

use nvmeof_client_rs::cfg::config::NvmeOfConfig;
use nvmeof_client_rs::facade::ControllerFacade;
use tokio::io::AsyncWriteExt;

use super::common;

#[tokio::test]
async fn large_write_uses_r2t_flow_with_chunking() {
    let (addr, listener) = common::bind().await.expect("bind");
    // IOCCSZ=8 (16-byte units) -> inline_max = 128-64 = 64 bytes, forcing
    // every write in this test onto the R2T path.
    let controller_fixture = common::identify_controller_fixture("SN2", "MODEL2", 3, 8);
    let namespace_fixture = common::identify_namespace_fixture(9); // 512-byte blocks
    let payload: Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8).collect();
    let payload_for_server = payload.clone();
    const MAXH2CDATA: u32 = 4096;

    let server = tokio::spawn(async move {
        let (mut admin, _) = listener.accept().await.expect("accept admin");
        let admin_task = tokio::spawn(async move {
            common::run_admin_connect(&mut admin, MAXH2CDATA, 31, 0x0000_0000_7F00_001E, 0x0001_0000)
                .await
                .expect("admin connect");
            let identify_ctrl = common::read_cmd(&mut admin).await.expect("identify controller req");
            common::write_c2hdata_success(&mut admin, &controller_fixture).await.expect("c2h controller");
            let identify_ns = common::read_cmd(&mut admin).await.expect("identify namespace req");
            common::write_c2hdata_success(&mut admin, &namespace_fixture).await.expect("c2h namespace");
            let _ = (identify_ctrl.command_id(), identify_ns.command_id());
            let _ = admin.shutdown().await;
        });

        let (mut io, _) = listener.accept().await.expect("accept io");
        let io_task = tokio::spawn(async move {
            common::run_io_connect(&mut io, MAXH2CDATA).await.expect("io connect");

            let write_cmd = common::read_cmd(&mut io).await.expect("write req");
            assert!(write_cmd.data_out.is_empty(), "R2T write must carry no inline data-out");
            let cid = write_cmd.command_id();
            let ttag = 0x55u16;
            common::write_r2t(&mut io, cid, ttag, 0, payload_for_server.len() as u32).await.expect("r2t");

            let mut assembled = Vec::with_capacity(payload_for_server.len());
            loop {
                let chunk = common::read_h2c_data(&mut io).await.expect("h2c chunk");
                assert_eq!(chunk.command_id, cid);
                assert_eq!(chunk.ttag, ttag);
                assert_eq!(chunk.data_offset as usize, assembled.len());
                assembled.extend_from_slice(&chunk.chunk);
                if chunk.last {
                    break;
                }
            }
            assert_eq!(assembled, payload_for_server);

            common::write_rsp(&mut io, cid, 0, 0, 0).await.expect("write rsp");
            let _ = io.shutdown().await;
        });

        admin_task.await.expect("admin task");
        io_task.await.expect("io task");
    });

    let mut cfg = NvmeOfConfig::new(addr.ip().to_string(), addr.port(), Some("nqn.test:subsys1".to_string()));
    cfg.validate_and_normalize().expect("valid cfg");
    let mut facade = ControllerFacade::new(cfg);
    facade.connect().await.expect("connect");
    facade.identify_controller().await.expect("identify controller");

    facade.write(1, 0, &payload).await.expect("write");

    facade.disconnect().await;
    server.await.expect("server task");
}
