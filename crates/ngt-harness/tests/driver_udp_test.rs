//! Client and server drivers over real loopback UDP sockets.

use std::time::Duration;

use bytes::Bytes;
use ngt_core::{ChannelService, OpenDecision, RegistryConfig};
use ngt_harness::{ClientDriver, DriverConfig, ServerDriver, SystemEnv, UdpTransport};
use ngt_proto::Capabilities;

struct Upper;

impl ChannelService for Upper {
    fn on_open(&mut self, _channel: u16, _requested: Capabilities) -> OpenDecision {
        OpenDecision::Accept
    }

    fn on_data(&mut self, _channel: u16, body: Bytes) -> Option<Bytes> {
        Some(Bytes::from(body.to_ascii_uppercase()))
    }
}

fn config() -> DriverConfig {
    DriverConfig {
        retransmit_interval: Duration::from_millis(100),
        max_open_attempts: 10,
        idle_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn connect_by_address_and_exchange() {
    let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let address = transport.local_addr().unwrap();
    let mut server =
        ServerDriver::new(transport, SystemEnv, RegistryConfig::default(), config(), Upper);

    let client = async {
        let transport = UdpTransport::connect(address).await?;
        let mut client = ClientDriver::new(transport, SystemEnv, address, 21, config());

        let capabilities = client.connect(Capabilities::PERIODIC_CHECK).await?;
        assert_eq!(capabilities, Capabilities::PERIODIC_CHECK);

        client.send(&b"quiet"[..]).await?;
        assert_eq!(client.recv().await?.as_ref(), b"QUIET");

        client.close().await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    };

    tokio::select! {
        served = server.run() => panic!("server stopped: {served:?}"),
        done = client => done.unwrap(),
    }
}
