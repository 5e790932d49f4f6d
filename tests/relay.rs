use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use hubtun::{
    actors::Addr,
    client::{pumps::DownloadOptions, Tunnel},
    common::EndOfStreamPolicy,
    relay::{registry::RegistryMessage, Relay, RelayConfig},
};
use tokio::{
    io::{duplex, AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

async fn start_relay(cancel: &CancellationToken) -> (SocketAddr, Addr<RegistryMessage>) {
    let config = RelayConfig {
        listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
    };
    let relay = Relay::bind(&config).await.unwrap();
    let address = relay.local_addr().unwrap();
    let registry = relay.registry();
    tokio::spawn(relay.run(cancel.clone()));
    (address, registry)
}

async fn wait_for_peer_count(registry: &Addr<RegistryMessage>, count: usize) {
    timeout(WAIT, async {
        while registry.peers().await.len() != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("relay never reached the expected number of peers");
}

/// Connects a raw client and waits until the relay has registered it.
async fn connect(relay: SocketAddr, registry: &Addr<RegistryMessage>, count: usize) -> TcpStream {
    let stream = TcpStream::connect(relay).await.unwrap();
    wait_for_peer_count(registry, count).await;
    stream
}

#[tokio::test]
async fn relay_broadcasts_to_everyone_but_the_sender() {
    let cancel = CancellationToken::new();
    let (relay, registry) = start_relay(&cancel).await;
    let mut a = connect(relay, &registry, 1).await;
    let mut b = connect(relay, &registry, 2).await;
    let mut c = connect(relay, &registry, 3).await;

    let frame = [0x00, 0x12, 0x34, 0x56, 0x00, 0x03, 0xAA, 0xBB, 0xCC];
    b.write_all(&frame).await.unwrap();

    for receiver in [&mut a, &mut c] {
        let mut received = [0u8; 9];
        timeout(WAIT, receiver.read_exact(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, frame);
    }
    let mut echoed = [0u8; 1];
    assert!(timeout(Duration::from_millis(200), b.read(&mut echoed))
        .await
        .is_err());

    cancel.cancel();
}

#[tokio::test]
async fn relay_forgets_disconnected_clients() {
    let cancel = CancellationToken::new();
    let (relay, registry) = start_relay(&cancel).await;
    let a = connect(relay, &registry, 1).await;
    let mut b = connect(relay, &registry, 2).await;
    let a_address = a.local_addr().unwrap();

    drop(a);
    wait_for_peer_count(&registry, 1).await;
    assert_eq!(registry.peers().await, vec![b.local_addr().unwrap()]);
    assert!(!registry.peers().await.contains(&a_address));

    // A lone client has nobody to talk to, but keeps its connection.
    b.write_all(&[1, 2, 3]).await.unwrap();
    let mut buffer = [0u8; 1];
    assert!(timeout(Duration::from_millis(100), b.read(&mut buffer))
        .await
        .is_err());

    cancel.cancel();
}

#[tokio::test]
async fn relay_closes_connections_on_shutdown() {
    let cancel = CancellationToken::new();
    let (relay, registry) = start_relay(&cancel).await;
    let mut a = connect(relay, &registry, 1).await;

    cancel.cancel();
    let mut buffer = [0u8; 1];
    let read = timeout(WAIT, a.read(&mut buffer)).await.unwrap().unwrap();
    assert_eq!(read, 0);
}

struct Client {
    kernel: tokio::io::DuplexStream,
    tunnel: JoinHandle<Result<(), hubtun::error::TunnelError>>,
}

/// Runs a tunnel whose "TUN device" is an in-memory pipe; the test plays the kernel.
async fn start_client(
    relay: SocketAddr,
    registry: &Addr<RegistryMessage>,
    count: usize,
    cancel: &CancellationToken,
) -> Client {
    let stream = connect(relay, registry, count).await;
    let (device, kernel) = duplex(128 * 1024);
    let options = DownloadOptions {
        end_of_stream: EndOfStreamPolicy::Fatal,
        retry_interval: Duration::from_millis(10),
    };
    let tunnel = tokio::spawn(Tunnel::new(device, stream, options).run(cancel.clone()));
    Client { kernel, tunnel }
}

#[tokio::test]
async fn packet_travels_from_one_client_to_the_other() {
    let cancel = CancellationToken::new();
    let (relay, registry) = start_relay(&cancel).await;
    let mut x = start_client(relay, &registry, 1, &cancel).await;
    let mut y = start_client(relay, &registry, 2, &cancel).await;

    x.kernel.write_all(&[0xAA, 0xBB, 0xCC]).await.unwrap();

    let mut packet = [0u8; 3];
    timeout(WAIT, y.kernel.read_exact(&mut packet))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(packet, [0xAA, 0xBB, 0xCC]);

    let mut echoed = [0u8; 1];
    assert!(timeout(Duration::from_millis(200), x.kernel.read(&mut echoed))
        .await
        .is_err());

    cancel.cancel();
    assert!(timeout(WAIT, x.tunnel).await.unwrap().unwrap().is_ok());
    assert!(timeout(WAIT, y.tunnel).await.unwrap().unwrap().is_ok());
}

#[tokio::test]
async fn large_packets_survive_the_relay() {
    let cancel = CancellationToken::new();
    let (relay, registry) = start_relay(&cancel).await;
    let mut x = start_client(relay, &registry, 1, &cancel).await;
    let mut y = start_client(relay, &registry, 2, &cancel).await;

    let packets: Vec<Vec<u8>> = (1..=20u8)
        .map(|n| (0..(n as usize * 97)).map(|i| (i as u8) ^ n).collect())
        .collect();
    for packet in &packets {
        x.kernel.write_all(packet).await.unwrap();
        // Let the upload pump pick each packet up on its own.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let expected: Vec<u8> = packets.concat();
    let mut received = vec![0u8; expected.len()];
    timeout(WAIT, y.kernel.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, expected);

    cancel.cancel();
}
