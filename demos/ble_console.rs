//! Interactive console: scan, connect, bind RX/TX and exchange data.
//!
//! Run with: cargo run --example ble_console
//!
//! ## Commands
//!
//! | Command | Action |
//! |---------|--------|
//! | `scan` | Start device discovery |
//! | `connect <name>` | Connect to a discovered device |
//! | `service <uuid>` | Select a service |
//! | `rx <uuid>` | Subscribe to a notify characteristic |
//! | `tx <uuid>` | Use a characteristic as write target |
//! | `send <text>` | Frame and write text |
//! | `mode <text\|scalar\|xyz>` | How RX payloads are printed |
//! | `disconnect` | Disconnect from the device |
//! | `quit` | Exit |

use std::sync::Arc;

use ble_telemetry_link::{
    BleSession, Result, SessionConfig, SessionEvent, Telemetry, TelemetryMode,
};
use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, BufReader};

fn print_help() {
    println!("Commands: scan | connect <name> | service <uuid> | rx <uuid> | tx <uuid>");
    println!("          send <text> | mode <text|scalar|xyz> | disconnect | quit");
}

fn print_event(event: SessionEvent, mode: TelemetryMode) {
    match event {
        SessionEvent::Console(line) => println!("> {}", line),
        SessionEvent::DeviceName(name) => println!("  device: {}", name),
        SessionEvent::DiscoveryFinished { found } => println!("  {} device(s) found", found),
        SessionEvent::ServiceUuid(uuid) => println!("  service: {}", uuid),
        SessionEvent::CharacteristicUuid(uuid) => println!("  characteristic: {}", uuid),
        SessionEvent::StateChanged(state) => println!("  [{}]", state),
        SessionEvent::RxValue(value) => match Telemetry::decode(mode, &value) {
            Telemetry::Text(text) => println!("  rx: {}", text.trim_end()),
            Telemetry::Scalar(values) => println!("  rx: {:?}", values),
            Telemetry::Triaxial(values) => println!("  rx xyz: {:?}", values),
        },
        _ => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ble_telemetry_link=debug".parse().unwrap()),
        )
        .init();

    let session = BleSession::connect_default(SessionConfig::default()).await?;
    let mode = Arc::new(RwLock::new(TelemetryMode::Text));

    let mut events = session.subscribe();
    let printer_mode = mode.clone();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(event, *printer_mode.read());
        }
    });

    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        let (command, argument) = match line.split_once(' ') {
            Some((command, argument)) => (command, argument.trim()),
            None => (line, ""),
        };

        let result = match command {
            "" => Ok(()),
            "scan" => session.start_discovery().await,
            "connect" => session.select_device(argument).await,
            "service" => session.select_service(argument).await,
            "rx" => session.select_notify_characteristic(argument).await,
            "tx" => session.select_write_characteristic(argument).await,
            "send" => session.send(argument).await,
            "disconnect" => session.disconnect().await,
            "mode" => {
                match TelemetryMode::from_name(argument) {
                    Some(m) => *mode.write() = m,
                    None => println!("Unknown mode: {}", argument),
                }
                Ok(())
            }
            "quit" | "exit" => break,
            _ => {
                print_help();
                Ok(())
            }
        };

        if let Err(e) = result {
            println!("Error: {}", e);
            break;
        }
    }

    session.shutdown().await?;
    printer.abort();
    println!("Bye");
    Ok(())
}
