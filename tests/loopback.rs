//! End-to-end tests against a scripted NatNet server on the loopback interface.
//!
//! The fake server answers PING and REQUEST_MODELDEF on an ephemeral command port.
//! Frame-of-data packets are injected as unicast datagrams aimed straight at the
//! client's data port, so nothing here depends on multicast routing.

use natnet::protocol::frame::{FrameOfData, Orientation, Position, RigidBodyData};
use natnet::protocol::model::{Dataset, ModelDef, RigidBodyDescription};
use natnet::protocol::{
    message_id, write_packet, Header, ProtocolVersion, ReadFromBytes, Sender, WriteToBytes,
};
use natnet::{ClientError, Config, NatNetClient};
use std::ffi::CString;
use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};

const VERSION: ProtocolVersion = ProtocolVersion::new(3, 1);

fn ping_response_packet() -> Vec<u8> {
    let sender = Sender {
        name: CString::new("FakeMotive").unwrap(),
        version: [2, 2, 0, 0],
        natnet_version: [3, 1, 0, 0],
    };
    let mut payload = Vec::new();
    sender.write_to_bytes(&mut payload).unwrap();
    let mut packet = Vec::new();
    write_packet(&mut packet, message_id::PING_RESPONSE, &payload).unwrap();
    packet
}

fn model_def_packet() -> Vec<u8> {
    let def = ModelDef {
        datasets: vec![Dataset::RigidBody(RigidBodyDescription {
            name: "tool".to_string(),
            id: 7,
            parent_id: 0,
            offset: Position::default(),
        })],
    };
    let mut packet = Vec::new();
    write_packet(&mut packet, message_id::MODELDEF, &def.encode(VERSION).unwrap()).unwrap();
    packet
}

fn frame_packet(frame_number: i32) -> Vec<u8> {
    let frame = FrameOfData {
        frame_number,
        marker_sets: Vec::new(),
        other_markers: vec![Position {
            x: 1.0,
            y: 2.0,
            z: 3.0,
        }],
        rigid_bodies: vec![RigidBodyData {
            id: 7,
            position: Position {
                x: 0.5,
                y: 1.0,
                z: 1.5,
            },
            orientation: Orientation {
                x: 0.0,
                y: 0.0,
                z: 0.0,
                w: 1.0,
            },
            markers: Vec::new(),
            marker_ids: Vec::new(),
            marker_sizes: Vec::new(),
            mean_marker_error: 0.001,
            params: Some(0x01),
        }],
        skeletons: Vec::new(),
        labeled_markers: Vec::new(),
        force_plates: Vec::new(),
        latency: 0.004,
        timecode: 0,
        timecode_sub: 0,
        timestamp: 100.0,
        params: 0,
    };
    let mut packet = Vec::new();
    write_packet(&mut packet, message_id::FRAMEOFDATA, &frame.encode(VERSION).unwrap()).unwrap();
    packet
}

/// A command endpoint that answers pings and model-definition requests for a while.
fn spawn_server() -> (u16, thread::JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = socket.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        socket
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let mut buf = [0u8; 2048];
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let (n, peer) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(_) => continue,
            };
            let header = match Header::read_from_bytes(&buf[..n]) {
                Ok(header) => header,
                Err(_) => continue,
            };
            match header.message_id {
                message_id::PING => {
                    socket.send_to(&ping_response_packet(), peer).unwrap();
                }
                message_id::REQUEST_MODELDEF => {
                    socket.send_to(&model_def_packet(), peer).unwrap();
                }
                _ => {}
            }
        }
    });
    (port, handle)
}

fn loopback_config(command_port: u16) -> Config {
    let mut config = Config::new("127.0.0.1", "127.0.0.1");
    config.command_port = command_port;
    config.data_port = 0;
    config.handshake_timeout = Duration::from_millis(500);
    config
}

#[test]
fn handshake_data_and_name_resolution() {
    let (command_port, server) = spawn_server();
    let mut client = NatNetClient::connect(&loopback_config(command_port)).unwrap();
    assert_eq!(client.natnet_version(), VERSION);

    let frames = client.frames();
    let injector = UdpSocket::bind("127.0.0.1:0").unwrap();
    let data_addr = format!("127.0.0.1:{}", client.data_port());

    // Keep injecting frames until one comes out resolved against the model defs the
    // server sends in reply to the client's REQUEST_MODELDEF.
    let deadline = Instant::now() + Duration::from_secs(3);
    let mut frame_number = 0;
    let mut resolved = false;
    while Instant::now() < deadline {
        frame_number += 1;
        injector
            .send_to(&frame_packet(frame_number), &data_addr)
            .unwrap();
        thread::sleep(Duration::from_millis(10));
        client.update();
        if let Some(frame) = client.frame() {
            assert_eq!(frame.rigid_bodies.len(), 1);
            assert!(frame.rigid_bodies[0].tracking);
            if frame.rigid_bodies[0].name == "tool" {
                resolved = true;
                break;
            }
        }
    }
    assert!(resolved, "rigid body name never resolved to 'tool'");
    assert!(client.is_connected());
    assert!(client.data_rate() > 0.0);

    // The channel subscriber saw the same stream of snapshots.
    let subscribed = frames.try_recv().expect("subscriber channel stayed empty");
    assert_eq!(subscribed.rigid_bodies[0].id, 7);

    client.disconnect();
    assert!(!client.is_connected());
    server.join().unwrap();
}

#[test]
fn liveness_drops_without_packets() {
    let (command_port, server) = spawn_server();
    let mut client = NatNetClient::connect(&loopback_config(command_port)).unwrap();
    client.set_timeout(0.05);

    let injector = UdpSocket::bind("127.0.0.1:0").unwrap();
    let data_addr = format!("127.0.0.1:{}", client.data_port());
    injector.send_to(&frame_packet(1), &data_addr).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut went_live = false;
    while Instant::now() < deadline {
        client.update();
        if client.is_connected() && client.frame().is_some() {
            went_live = true;
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(went_live, "never saw the injected frame");

    // Silence on the data socket past the timeout empties the public snapshot.
    thread::sleep(Duration::from_millis(100));
    client.update();
    assert!(!client.is_connected());
    assert!(client.frame().is_none());

    // Data resumes, the snapshot comes back.
    injector.send_to(&frame_packet(2), &data_addr).unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut recovered = false;
    while Instant::now() < deadline {
        client.update();
        if client.is_connected() && client.frame().is_some() {
            recovered = true;
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(recovered, "liveness never recovered after data resumed");
    server.join().unwrap();
}

#[test]
fn silent_server_times_out_the_handshake() {
    // Bound but mute: pings go nowhere and connect must give up on its own.
    let mute = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = mute.local_addr().unwrap().port();
    let mut config = loopback_config(port);
    config.handshake_timeout = Duration::from_millis(50);
    let started = Instant::now();
    match NatNetClient::connect(&config) {
        Err(ClientError::HandshakeTimeout) => {}
        Err(other) => panic!("expected HandshakeTimeout, got {}", other),
        Ok(_) => panic!("connected to a mute server"),
    }
    // Three attempts at ~50ms each; well under a couple of seconds.
    assert!(started.elapsed() < Duration::from_secs(2));
}
