//! End-to-end reassembly scenarios through the public assembler API.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tcpweave_core::prelude::*;
use tcpweave_core::stream::ConnectionState;

const CLIENT_PORT: u16 = 51000;

fn client() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 168, 0, 10))
}

fn server() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 168, 0, 20))
}

fn to_server(seq: u32, flags: TcpFlags, payload: &'static [u8], ts: i64) -> Segment {
    Segment::new(
        NetworkFlow::new(client(), server()),
        TransportFlow::new(CLIENT_PORT, 443),
        seq,
        flags,
        Bytes::from_static(payload),
        ts,
    )
}

fn to_client(seq: u32, flags: TcpFlags, payload: &'static [u8], ts: i64) -> Segment {
    Segment::new(
        NetworkFlow::new(server(), client()),
        TransportFlow::new(443, CLIENT_PORT),
        seq,
        flags,
        Bytes::from_static(payload),
        ts,
    )
}

fn engine() -> (Assembler, StreamReceiver) {
    let config = AssemblerConfig::default().with_delivery(64, DeliveryPolicy::DropOldest);
    Assembler::new(config, PortTable::default()).unwrap()
}

/// Flush, release the assembler and collect everything it published.
async fn finish(assembler: Assembler, mut rx: StreamReceiver) -> Vec<FinishedStream> {
    assembler.flush_all();
    drop(assembler);
    let mut streams = Vec::new();
    while let Some(stream) = rx.recv().await {
        streams.push(stream);
    }
    streams
}

#[tokio::test]
async fn out_of_order_segment_fills_gap() {
    let (asm, rx) = engine();
    asm.submit(&to_server(0, TcpFlags::ACK, b"He", 1)).unwrap();
    asm.submit(&to_server(4, TcpFlags::ACK, b"o", 2)).unwrap();
    asm.submit(&to_server(2, TcpFlags::ACK, b"ll", 3)).unwrap();

    let streams = finish(asm, rx).await;
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].to_server, Bytes::from_static(b"Hello"));
    assert_eq!(streams[0].to_server_stats.gap_count, 0);
    assert_eq!(streams[0].to_server_stats.out_of_order_count, 1);
}

#[tokio::test]
async fn gap_filler_is_placed_by_sequence_number() {
    let (asm, rx) = engine();
    asm.submit(&to_server(0, TcpFlags::ACK, b"He", 1)).unwrap();
    asm.submit(&to_server(4, TcpFlags::ACK, b"llo", 2)).unwrap();
    asm.submit(&to_server(2, TcpFlags::ACK, b"ll", 3)).unwrap();

    let streams = finish(asm, rx).await;
    assert_eq!(streams.len(), 1);
    // Offsets 2..4 come from "ll" and 4..7 from "llo"; nothing overlaps.
    assert_eq!(streams[0].to_server, Bytes::from_static(b"Hellllo"));
    assert_eq!(streams[0].to_server_stats.gap_count, 0);
}

#[tokio::test]
async fn overlapping_late_segment_is_trimmed() {
    let (asm, rx) = engine();
    asm.submit(&to_server(0, TcpFlags::ACK, b"He", 1)).unwrap();
    asm.submit(&to_server(3, TcpFlags::ACK, b"lo", 2)).unwrap();
    // Covers the gap and overlaps both neighbours
    asm.submit(&to_server(1, TcpFlags::ACK, b"ell", 3)).unwrap();

    let streams = finish(asm, rx).await;
    assert_eq!(streams[0].to_server, Bytes::from_static(b"Hello"));
}

#[tokio::test]
async fn syn_then_rst_publishes_nothing() {
    let (asm, rx) = engine();
    asm.submit(&to_server(1000, TcpFlags::SYN, b"", 1)).unwrap();
    let outcome = asm.submit(&to_client(0, TcpFlags::RST, b"", 2)).unwrap();
    assert_eq!(outcome.completed, Some(CompletionReason::Reset));
    assert_eq!(asm.active_connections(), 0);

    let stats = asm.stats();
    let streams = finish(asm, rx).await;
    assert!(streams.is_empty());
    assert_eq!(stats.reset, 1);
}

#[tokio::test]
async fn duplicate_segment_appears_once() {
    let (asm, rx) = engine();
    asm.submit(&to_server(500, TcpFlags::ACK, b"GET /", 1)).unwrap();
    asm.submit(&to_server(500, TcpFlags::ACK, b"GET /", 2)).unwrap();

    let streams = finish(asm, rx).await;
    assert_eq!(streams[0].to_server, Bytes::from_static(b"GET /"));
    assert_eq!(streams[0].to_server_stats.retransmit_count, 1);
    assert_eq!(streams[0].payload_packets, 2);
}

#[tokio::test(start_paused = true)]
async fn zero_threshold_reaps_everything_on_next_tick() {
    let config = AssemblerConfig::default()
        .with_staleness_threshold(Duration::ZERO)
        .with_sweep_interval(Duration::from_secs(10))
        .with_delivery(64, DeliveryPolicy::DropOldest);
    let (asm, mut rx) = Assembler::new(config, PortTable::default()).unwrap();
    let asm = Arc::new(asm);
    let reaper = IdleReaper::spawn(Arc::clone(&asm));

    // Activity stamped far in the future: still reaped
    let future = i64::MAX / 2;
    asm.submit(&to_server(1, TcpFlags::ACK, b"a", future)).unwrap();
    let mut other = to_server(1, TcpFlags::ACK, b"b", future);
    other.transport.src = CLIENT_PORT + 1;
    asm.submit(&other).unwrap();
    assert_eq!(asm.active_connections(), 2);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(asm.active_connections(), 0);

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first.reason, CompletionReason::Idle);
    assert_eq!(second.reason, CompletionReason::Idle);
    assert_eq!(reaper.shutdown().await, 0);
}

#[tokio::test]
async fn handshake_only_connection_is_never_published() {
    let (asm, rx) = engine();
    asm.submit(&to_server(1000, TcpFlags::SYN, b"", 1)).unwrap();
    asm.submit(&to_client(7000, TcpFlags::SYN_ACK, b"", 2)).unwrap();
    asm.submit(&to_server(1001, TcpFlags::ACK, b"", 3)).unwrap();
    asm.submit(&to_server(1001, TcpFlags::FIN_ACK, b"", 4)).unwrap();
    asm.submit(&to_client(7001, TcpFlags::FIN_ACK, b"", 5)).unwrap();

    let stats = asm.stats();
    assert_eq!(stats.closed, 1);
    let streams = finish(asm, rx).await;
    assert!(streams.is_empty());
}

#[tokio::test]
async fn full_conversation_is_published_once() {
    let (asm, rx) = engine();
    asm.submit(&to_server(1000, TcpFlags::SYN, b"", 1)).unwrap();
    asm.submit(&to_client(7000, TcpFlags::SYN_ACK, b"", 2)).unwrap();
    asm.submit(&to_server(1001, TcpFlags::ACK, b"hello ", 3)).unwrap();
    // Server replies out of order
    asm.submit(&to_client(7004, TcpFlags::ACK, b"there", 4)).unwrap();
    asm.submit(&to_client(7001, TcpFlags::ACK, b"hi ", 5)).unwrap();
    asm.submit(&to_server(1007, TcpFlags::ACK, b"server", 6)).unwrap();
    asm.submit(&to_server(1013, TcpFlags::FIN_ACK, b"", 7)).unwrap();
    asm.submit(&to_client(7009, TcpFlags::FIN_ACK, b"", 8)).unwrap();
    // Late retransmission after close opens nothing that carries data
    asm.submit(&to_client(7009, TcpFlags::ACK, b"", 9)).unwrap();

    let streams = finish(asm, rx).await;
    assert_eq!(streams.len(), 1);
    let stream = &streams[0];
    assert_eq!(stream.to_server, Bytes::from_static(b"hello server"));
    assert_eq!(stream.to_client, Bytes::from_static(b"hi there"));
    assert_eq!(stream.payload(Direction::ToClient).len(), 8);
    assert_eq!(stream.transport, TransportFlow::new(CLIENT_PORT, 443));
    assert_eq!(stream.protocol.as_str(), "tls");
    assert_eq!(stream.final_state, ConnectionState::Closed);
    assert_eq!(stream.reason, CompletionReason::Closed);
}

#[tokio::test]
async fn sequence_wraparound() {
    let (asm, rx) = engine();
    let isn = u32::MAX - 2;
    asm.submit(&to_server(isn, TcpFlags::SYN, b"", 1)).unwrap();
    // Second half arrives first, past the wrap
    asm.submit(&to_server(1, TcpFlags::ACK, b"DEF", 2)).unwrap();
    asm.submit(&to_server(isn.wrapping_add(1), TcpFlags::ACK, b"ABC", 3))
        .unwrap();

    let streams = finish(asm, rx).await;
    assert_eq!(streams[0].to_server, Bytes::from_static(b"ABCDEF"));
}

#[tokio::test]
async fn loss_leaves_gap_and_contiguous_prefix() {
    let (asm, rx) = engine();
    asm.submit(&to_server(100, TcpFlags::ACK, b"abc", 1)).unwrap();
    asm.submit(&to_server(110, TcpFlags::ACK, b"lost-before-me", 2))
        .unwrap();

    let streams = finish(asm, rx).await;
    let stream = &streams[0];
    assert_eq!(stream.reason, CompletionReason::Shutdown);
    assert_eq!(stream.to_server, Bytes::from_static(b"abc"));
    assert_eq!(stream.to_server_stats.gap_count, 1);
}

#[tokio::test]
async fn concurrent_workers_share_the_assembler() {
    let (asm, rx) = engine();
    let asm = Arc::new(asm);

    let mut workers = Vec::new();
    for worker in 0..4u16 {
        let asm = Arc::clone(&asm);
        workers.push(tokio::task::spawn_blocking(move || {
            let mut segment = to_server(0, TcpFlags::ACK, b"x", 0);
            segment.transport.src = 52000 + worker;
            for i in 0..50u32 {
                segment.seq = i;
                asm.submit(&segment).unwrap();
            }
        }));
    }
    for worker in workers {
        worker.await.unwrap();
    }
    assert_eq!(asm.active_connections(), 4);

    let asm = Arc::try_unwrap(asm).ok().unwrap();
    let streams = finish(asm, rx).await;
    assert_eq!(streams.len(), 4);
    for stream in streams {
        assert_eq!(stream.to_server.len(), 50);
    }
}

#[tokio::test]
async fn malformed_segments_are_dropped() {
    let (asm, rx) = engine();
    let mut mixed = to_server(1, TcpFlags::ACK, b"x", 0);
    mixed.net.dst = IpAddr::V6(Ipv6Addr::LOCALHOST);
    assert!(asm.submit(&mixed).is_err());

    let syn_fin = TcpFlags {
        syn: true,
        fin: true,
        ..Default::default()
    };
    assert!(asm.submit(&to_server(1, syn_fin, b"", 0)).is_err());

    assert_eq!(asm.stats().malformed, 2);
    assert!(finish(asm, rx).await.is_empty());
}
