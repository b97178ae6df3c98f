mod common;

use camstream::capture::{FileConfig, PullConfig};
use camstream::codec::decode_compressed;
use camstream::metrics::MetricsRegistry;
use camstream::transport::{wire, FrameHeader, FrameRequester, TransportError};
use camstream::StreamServer;
use common::{vga_config, CountingFactory};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

fn pull_server() -> (StreamServer, SocketAddr) {
    let mut config = FileConfig::default();
    config.camera = vga_config();
    config.transport.bind_host = "127.0.0.1".to_string();
    config.streams.clear();
    config.pull = Some(PullConfig {
        camera_id: 0,
        port: 0,
    });

    let mut server = StreamServer::new(
        config,
        CountingFactory::default(),
        Arc::new(MetricsRegistry::new().unwrap()),
    )
    .unwrap();
    let addr = server
        .start()
        .unwrap()
        .responder
        .expect("pull endpoint not started");
    (server, addr)
}

fn requester(addr: SocketAddr) -> FrameRequester {
    let requester = FrameRequester::connect(addr).unwrap();
    requester
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    requester
}

#[test]
fn request_yields_header_then_frame() {
    let (_server, addr) = pull_server();
    let mut client = requester(addr);

    let (header, frame) = client.request_frame().unwrap();
    assert_eq!(header, FrameHeader::new(480, 640));
    assert!(!frame.is_empty());

    let image = decode_compressed(frame.as_bytes()).unwrap();
    assert_eq!((image.height(), image.width()), (480, 640));
}

#[test]
fn second_request_before_response_is_rejected() {
    let (_server, addr) = pull_server();
    let mut client = requester(addr);

    client.send_request(b"frame").unwrap();
    assert!(matches!(
        client.send_request(b"frame"),
        Err(TransportError::RequestInFlight)
    ));

    client.recv_header().unwrap();
    // Still waiting on part 2.
    assert!(matches!(
        client.send_request(b"frame"),
        Err(TransportError::RequestInFlight)
    ));
    client.recv_frame().unwrap();

    assert!(!client.in_flight());
    assert!(client.request_frame().is_ok());
}

#[test]
fn pipelined_raw_requests_are_answered_in_order() {
    let (_server, addr) = pull_server();
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    wire::write_message(&mut stream, b"one").unwrap();
    wire::write_message(&mut stream, b"two").unwrap();

    for _ in 0..2 {
        let header = FrameHeader::from_bytes(&wire::read_message(&mut stream).unwrap()).unwrap();
        assert_eq!((header.rows, header.cols), (480, 640));
        let body = wire::read_message(&mut stream).unwrap();
        assert!(decode_compressed(&body).is_ok());
    }
}

#[test]
fn empty_request_closes_only_that_connection() {
    let (_server, addr) = pull_server();

    let mut rogue = TcpStream::connect(addr).unwrap();
    rogue
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    wire::write_message(&mut rogue, b"").unwrap();
    assert!(matches!(
        wire::read_message(&mut rogue),
        Err(TransportError::Closed) | Err(TransportError::Io(_))
    ));

    // The endpoint keeps serving new clients.
    let mut client = requester(addr);
    assert!(client.request_frame().is_ok());
}
