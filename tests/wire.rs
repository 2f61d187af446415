//! Record-framing properties over a real socket pair.

use std::io::Write;
use std::net::{TcpListener, TcpStream};

use nfs_stress::protocol::rpc::wire;
use nfs_stress::protocol::rpc::RpcError;

fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let client = TcpStream::connect(addr).expect("connect");
    let (server, _) = listener.accept().expect("accept");
    (client, server)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + len) as u8).collect()
}

#[test]
fn frame_round_trip_across_lengths() {
    let lengths = [1usize, 4, 5, 1024, 65535, 262140];
    let (client, server) = socket_pair();

    let writer = std::thread::spawn(move || {
        for &len in &lengths {
            let mut frame = vec![0u8; wire::MARK_SIZE];
            frame.extend_from_slice(&pattern(len));
            wire::send(&client, &mut frame).expect("send frame");
        }
    });

    let mut rx = vec![0u8; 1 << 19];
    for &len in &lengths {
        let got = wire::recv(&server, &mut rx).expect("recv frame").expect("not eof");
        assert_eq!(got, len);
        assert_eq!(&rx[..got], pattern(len).as_slice(), "payload mismatch at {len}");
    }

    writer.join().unwrap();
}

#[test]
fn payload_at_exact_capacity_round_trips() {
    let (client, server) = socket_pair();
    const CAP: usize = 1024;

    let writer = std::thread::spawn(move || {
        let mut frame = vec![0u8; wire::MARK_SIZE];
        frame.extend_from_slice(&pattern(CAP));
        wire::send(&client, &mut frame).expect("send frame");
    });

    let mut rx = vec![0u8; CAP];
    let got = wire::recv(&server, &mut rx).expect("recv").expect("not eof");
    assert_eq!(got, CAP);
    writer.join().unwrap();
}

#[test]
fn payload_one_past_capacity_fails_hard() {
    let (client, server) = socket_pair();
    const CAP: usize = 1024;

    let writer = std::thread::spawn(move || {
        let mut frame = vec![0u8; wire::MARK_SIZE];
        frame.extend_from_slice(&pattern(CAP + 1));
        // The peer aborts the read; ignore the resulting broken pipe.
        let _ = wire::send(&client, &mut frame);
    });

    let mut rx = vec![0u8; CAP];
    let err = wire::recv(&server, &mut rx).expect_err("oversized record");
    assert!(matches!(err, RpcError::Protocol(_)), "unexpected: {err:?}");
    writer.join().unwrap();
}

#[test]
fn clear_last_fragment_bit_is_fatal() {
    let (client, server) = socket_pair();

    let mut client_ref = &client;
    client_ref.write_all(&8u32.to_be_bytes()).expect("raw mark");

    let mut rx = vec![0u8; 64];
    let err = wire::recv(&server, &mut rx).expect_err("mark without last-fragment bit");
    assert!(matches!(err, RpcError::Protocol(_)), "unexpected: {err:?}");
}

#[test]
fn eof_at_record_boundary_is_clean() {
    let (client, server) = socket_pair();
    drop(client);

    let mut rx = vec![0u8; 64];
    assert!(wire::recv(&server, &mut rx).expect("clean eof").is_none());
}

#[test]
fn eof_inside_the_mark_is_a_transport_error() {
    let (client, server) = socket_pair();

    let mut client_ref = &client;
    let mark = (8u32 | wire::LAST_FRAGMENT).to_be_bytes();
    client_ref.write_all(&mark[..2]).expect("partial mark");
    drop(client);

    let mut rx = vec![0u8; 64];
    let err = wire::recv(&server, &mut rx).expect_err("truncated mark");
    assert!(matches!(err, RpcError::Transport(_)), "unexpected: {err:?}");
}

#[test]
fn eof_inside_a_record_is_a_transport_error() {
    let (client, server) = socket_pair();

    let mut client_ref = &client;
    let mark = 100u32 | wire::LAST_FRAGMENT;
    client_ref.write_all(&mark.to_be_bytes()).expect("mark");
    client_ref.write_all(&[0u8; 10]).expect("short payload");
    drop(client);

    let mut rx = vec![0u8; 256];
    let err = wire::recv(&server, &mut rx).expect_err("truncated record");
    assert!(matches!(err, RpcError::Transport(_)), "unexpected: {err:?}");
}
