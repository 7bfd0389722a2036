//! Connect to a gateway, print zone updates and send commands typed on stdin.
//!
//! ```text
//! cargo run --example monitor -- 192.168.1.40 9621
//! > power 2 on
//! > volume 2 35
//! > source 2 4
//! > mute 2 off
//! > alloff
//! ```

use russound_cam::{ChannelSink, GatewayConnection, GatewayRegistry, GatewaySettings, Zone};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mut args = std::env::args().skip(1);
    let settings = GatewaySettings {
        host: args.next(),
        port: args.next().and_then(|p| p.parse().ok()),
    };

    let registry = GatewayRegistry::new();
    let sink = ChannelSink::default();
    let mut updates = sink.subscribe();

    let Some(gateway) = registry.client_for(&settings, Arc::new(sink)) else {
        eprintln!("usage: monitor <host> <port>");
        return Ok(());
    };

    if let Err(e) = gateway.connect().await {
        // Keeps retrying in the background
        eprintln!("Connect failed: {}", e);
    }

    tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            println!("zone {} {} = {:?}", update.zone, update.field, update.value);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if let Err(e) = run_command(&gateway, &line) {
            eprintln!("{}", e);
        }
    }

    registry.shutdown();
    Ok(())
}

fn run_command(gateway: &Arc<GatewayConnection>, line: &str) -> Result<(), Box<dyn std::error::Error>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        [] => {}
        ["alloff"] => gateway.send_all_off(),
        [action, zone, value] => {
            let zone = Zone::new(zone.parse()?, gateway.clone())?;
            match *action {
                "power" => zone.set_power(*value == "on"),
                "mute" => zone.set_mute(*value == "on"),
                "volume" => zone.set_volume(value.parse()?)?,
                "source" => zone.set_source(value.parse()?)?,
                other => return Err(format!("unknown command: {}", other).into()),
            }
        }
        _ => return Err("expected: <power|mute|volume|source> <zone> <value> | alloff".into()),
    }
    Ok(())
}
