//! Connect to a NatNet server and print whatever it streams.
//!
//! ```text
//! cargo run --example monitor -- <interface-ip-or-name> <server-ip>
//! ```

use natnet::{Config, NatNetClient};
use std::time::Duration;

fn main() -> Result<(), natnet::ClientError> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let interface = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let server = args.next().unwrap_or_else(|| "127.0.0.1".to_string());

    let mut client = NatNetClient::connect(&Config::new(interface, server))?;
    println!(
        "connected: NatNet {}, server v{}.{}",
        client.natnet_version(),
        client.server_version()[0],
        client.server_version()[1],
    );

    loop {
        client.update_wait(Duration::from_millis(100));
        if !client.is_frame_new() {
            if !client.is_connected() {
                println!("waiting for data...");
            }
            continue;
        }
        if let Some(frame) = client.frame() {
            println!(
                "frame {:>8}  markers {:>3} (filtered {:>3})  bodies {:>2}  skeletons {:>2}  {:>6.1} pkt/s",
                frame.frame_number,
                frame.markers.len(),
                frame.filtered_markers.len(),
                frame.rigid_bodies.len(),
                frame.skeletons.len(),
                client.data_rate(),
            );
            for rb in &frame.rigid_bodies {
                let p = rb.position();
                println!(
                    "  [{:>3}] {:<20} ({:8.3}, {:8.3}, {:8.3})  {}",
                    rb.id,
                    rb.name,
                    p.x,
                    p.y,
                    p.z,
                    if rb.tracking { "tracked" } else { "lost" },
                );
            }
        }
    }
}
