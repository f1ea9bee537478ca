//! serial_bridge_cli
//!
//! Diagnostic front end for the session manager on a desktop host.
//!
//! ```bash
//! # List every attached USB device, supported or not
//! cargo run --features cli --bin serial_bridge_cli -- list
//!
//! # Open device 3 at 9600 8N1 and hex-dump whatever arrives for 30 s
//! cargo run --features cli --bin serial_bridge_cli -- monitor 3 --baud 9600 --seconds 30
//!
//! # Send raw bytes
//! cargo run --features cli --bin serial_bridge_cli -- send 3 "41 54 0d"
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use usb_serial_bridge_lib::events::{spawn_event_loop, FnSink};
use usb_serial_bridge_lib::hotplug::HotplugWatcher;
use usb_serial_bridge_lib::io::serial::HostTransport;
use usb_serial_bridge_lib::{
    hex_dump, init_file_logging, BridgeError, BridgeEvent, BridgeSettings, CallSurface, DeviceId, LineParams, Parity,
    SerialManager, StopBits,
};

// =============================================================================
// CLI Argument Structure
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "serial_bridge_cli")]
#[command(version)]
#[command(about = "Inspect and drive USB serial adapters through the session manager", long_about = None)]
struct Args {
    /// Settings file (defaults to the per-user config location)
    #[arg(long, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Also write log lines into this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached USB devices
    List {
        /// Print the JSON listing instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Open a device and hex-dump inbound bytes
    Monitor {
        /// Device id from `list` (0 = first supported device)
        device_id: DeviceId,
        #[command(flatten)]
        line: LineArgs,
        /// Stop after this many seconds (0 = until unplugged)
        #[arg(long, default_value_t = 0)]
        seconds: u64,
    },
    /// Open a device and write hex-encoded bytes to it
    Send {
        device_id: DeviceId,
        /// Bytes as hex, spaces allowed ("41 54 0d")
        hex: String,
        #[command(flatten)]
        line: LineArgs,
    },
}

#[derive(clap::Args, Debug)]
struct LineArgs {
    #[arg(long, default_value_t = 115_200)]
    baud: u32,
    #[arg(long, default_value_t = 8)]
    data_bits: u8,
    /// 1, 1.5 or 2
    #[arg(long, default_value_t = 1.0)]
    stop_bits: f32,
    /// N, E or O
    #[arg(long, default_value_t = 'N')]
    parity: char,
}

impl LineArgs {
    fn to_params(&self) -> Result<LineParams, String> {
        let stop_bits = StopBits::from_f32(self.stop_bits)
            .ok_or_else(|| format!("unsupported stop bits {}", self.stop_bits))?;
        let parity = Parity::from_char(self.parity).ok_or_else(|| format!("unsupported parity '{}'", self.parity))?;
        let params = LineParams::new(self.baud, self.data_bits, stop_bits, parity);
        params.validate()?;
        Ok(params)
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), String> {
    let settings_path = args.settings.clone().or_else(BridgeSettings::default_path);
    let settings = match &settings_path {
        Some(path) => BridgeSettings::load(path).map_err(|e| e.to_string())?,
        None => BridgeSettings::default(),
    };

    if let Some(dir) = args.log_dir.as_ref().or(settings.log_dir.as_ref()) {
        init_file_logging(dir)?;
    }

    let transport = Arc::new(HostTransport::new());
    let sink = FnSink(|event: BridgeEvent| match event {
        BridgeEvent::SessionOpened { device_id, info } => println!("# opened {} ({})", device_id, info),
        BridgeEvent::SessionClosed { device_id, info, reason } => {
            println!("# closed {} ({}): {:?}", device_id, info, reason)
        }
        BridgeEvent::DeviceListChanged { .. } => {}
    });
    let hotplug_poll = settings.hotplug_poll();
    let manager = Arc::new(SerialManager::with_event_sink(transport.clone(), settings, Arc::new(sink)));
    let surface = CallSurface::new(manager.clone());

    match args.command {
        Command::List { json } => {
            if json {
                println!("{}", surface.list_devices_json());
            } else {
                print_device_table(&manager)?;
            }
            Ok(())
        }
        Command::Monitor {
            device_id,
            line,
            seconds,
        } => {
            let params = line.to_params()?;
            let (sender, receiver) = std_mpsc::channel();
            let _event_loop = spawn_event_loop(&manager, receiver).map_err(|e| e.to_string())?;
            let _watcher = HotplugWatcher::spawn(transport, sender, hotplug_poll).map_err(|e| e.to_string())?;
            monitor(&manager, device_id, params, seconds)
        }
        Command::Send { device_id, hex, line } => {
            let params = line.to_params()?;
            let compact: String = hex.split_whitespace().collect();
            let data = hex::decode(&compact).map_err(|e| format!("invalid hex '{}': {}", hex, e))?;
            send(&manager, device_id, params, &data)
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

fn print_device_table(manager: &SerialManager) -> Result<(), String> {
    let devices = manager.list_devices().map_err(|e| e.to_string())?;
    if devices.is_empty() {
        println!("No USB devices found");
        return Ok(());
    }
    println!("{:>4}  {:>9}  {:<10}  {}", "ID", "VID:PID", "DRIVER", "OPEN");
    for device in devices {
        let driver = if device.is_supported() {
            device.driver_name.as_str()
        } else {
            "-"
        };
        println!(
            "{:>4}  {:04x}:{:04x}  {:<10}  {}",
            device.device_id,
            device.vendor_id,
            device.product_id,
            driver,
            if device.is_connected { "yes" } else { "no" }
        );
    }
    Ok(())
}

fn open_configured(manager: &SerialManager, device_id: DeviceId, params: LineParams) -> Result<DeviceId, String> {
    let real_id = manager.open(device_id).map_err(|e| e.to_string())?;
    manager.configure(real_id, params).map_err(|e| e.to_string())?;
    Ok(real_id)
}

fn monitor(manager: &SerialManager, device_id: DeviceId, params: LineParams, seconds: u64) -> Result<(), String> {
    let real_id = open_configured(manager, device_id, params)?;
    println!("# monitoring device {} at {}", real_id, params);

    let deadline = (seconds > 0).then(|| Instant::now() + Duration::from_secs(seconds));
    while manager.is_connected(real_id) {
        if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
            break;
        }
        match manager.read(real_id, 64, Duration::from_millis(250)) {
            Ok(bytes) if !bytes.is_empty() => println!("{:>4}  {}", bytes.len(), hex_dump(&bytes)),
            Ok(_) => {}
            // Unplugged and reconciled away
            Err(BridgeError::NotFound(_)) => break,
            Err(e @ BridgeError::Hardware(_)) => {
                println!("# {}", e);
                break;
            }
            Err(e) => return Err(e.to_string()),
        }
    }

    manager.close(real_id);
    Ok(())
}

fn send(manager: &SerialManager, device_id: DeviceId, params: LineParams, data: &[u8]) -> Result<(), String> {
    let real_id = open_configured(manager, device_id, params)?;
    let result = manager
        .write(real_id, data, Duration::ZERO)
        .map_err(|e| e.to_string());
    manager.close(real_id);
    result?;
    println!("# sent {} bytes: {}", data.len(), hex_dump(data));
    Ok(())
}
