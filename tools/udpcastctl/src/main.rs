// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! udpcastctl - exercise UDP unicast/broadcast/multicast endpoints.
//!
//! Binds one UDP session, optionally joins a multicast group, transmits a
//! payload periodically, and prints every datagram that arrives until
//! Ctrl-C stops the session.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use udpcast::{
    classify, BindConfig, Datagram, EventSink, InterfaceCatalog, MulticastJoinConfig, SendConfig,
    SendRecord, SessionConfig, SessionController,
};

/// UDP endpoint exerciser
#[derive(Parser, Debug)]
#[command(name = "udpcastctl")]
#[command(version)]
#[command(about = "Exercise UDP unicast/broadcast/multicast endpoints")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List active interfaces and their IPv4 addresses
    Interfaces,
    /// Classify an address against the local interface set
    Classify {
        /// Address to classify
        address: String,
    },
    /// Run a session until Ctrl-C
    Run {
        /// Literal local bind address
        #[arg(long, default_value = "0.0.0.0")]
        bind_addr: Ipv4Addr,

        /// Bind to ANY regardless of --bind-addr (reliable multicast
        /// reception)
        #[arg(long)]
        bind_any: bool,

        /// Local port (0 = OS-assigned)
        #[arg(short, long, default_value = "30000")]
        port: u16,

        /// Use an OS-assigned port regardless of --port
        #[arg(long)]
        random_port: bool,

        /// Allow other endpoints to bind the same address/port
        #[arg(long)]
        share: bool,

        /// Force exclusive use of the address/port (wins over --share)
        #[arg(long)]
        dont_share: bool,

        /// Allow rebinding an address in TIME_WAIT state
        #[arg(long)]
        reuse_hint: bool,

        /// Multicast group to join
        #[arg(short, long)]
        group: Option<Ipv4Addr>,

        /// Interface name to join the group on
        #[arg(long)]
        join_interface: Option<String>,

        /// Destination address; enables periodic transmission
        #[arg(short, long)]
        dest: Option<Ipv4Addr>,

        /// Destination port
        #[arg(long, default_value = "30000")]
        dest_port: u16,

        /// Interface name for outgoing multicast
        #[arg(long)]
        send_interface: Option<String>,

        /// Receive own multicast transmissions back
        #[arg(long)]
        loopback: bool,

        /// Transmission period in seconds
        #[arg(short, long, default_value = "5")]
        interval: u64,

        /// Payload text (default: current local time per transmission)
        #[arg(long)]
        payload: Option<String>,

        /// Disable the receive side
        #[arg(long)]
        no_recv: bool,
    },
}

fn main() {
    env_logger::init();

    let args = Args::parse();
    if let Err(e) = run(args.command) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Interfaces => {
            list_interfaces();
            Ok(())
        }
        Command::Classify { address } => {
            let catalog = InterfaceCatalog::build();
            let class = classify(&address, &catalog);
            println!("{} -> {}", address, class.to_string().cyan());
            Ok(())
        }
        Command::Run {
            bind_addr,
            bind_any,
            port,
            random_port,
            share,
            dont_share,
            reuse_hint,
            group,
            join_interface,
            dest,
            dest_port,
            send_interface,
            loopback,
            interval,
            payload,
            no_recv,
        } => {
            let catalog = InterfaceCatalog::build();
            let config = SessionConfig {
                bind: BindConfig {
                    bind_addr,
                    bind_any,
                    port,
                    random_port,
                    share_address: share,
                    dont_share_address: dont_share,
                    reuse_address_hint: reuse_hint,
                },
                join: MulticastJoinConfig {
                    enabled: group.is_some(),
                    group: group.unwrap_or(Ipv4Addr::new(239, 1, 1, 1)),
                    interface: resolve_interface(&catalog, join_interface.as_deref())?,
                },
                receive_enabled: !no_recv,
                send_enabled: dest.is_some(),
                send: SendConfig {
                    destination: dest.unwrap_or(Ipv4Addr::LOCALHOST),
                    port: dest_port,
                    interface: resolve_interface(&catalog, send_interface.as_deref())?,
                    loopback,
                    interval_secs: interval,
                    payload: payload.clone().map(String::into_bytes).unwrap_or_default(),
                },
            };
            run_session(config, payload.is_none())
        }
    }
}

fn list_interfaces() {
    let catalog = InterfaceCatalog::build();
    if catalog.interfaces().is_empty() {
        println!("{}", "no usable interfaces".yellow());
        return;
    }
    for iface in catalog.interfaces() {
        let multicast = if iface.supports_multicast {
            "multicast".green()
        } else {
            "no-multicast".yellow()
        };
        println!("{} [{}]", iface.name.bold(), multicast);
        for entry in &iface.ipv4 {
            println!("  {}  broadcast {}", entry.addr, entry.broadcast);
        }
    }
}

fn resolve_interface(
    catalog: &InterfaceCatalog,
    name: Option<&str>,
) -> Result<Option<udpcast::NetworkInterface>, String> {
    match name {
        None => Ok(None),
        Some(name) => catalog
            .find(name)
            .cloned()
            .map(Some)
            .ok_or_else(|| format!("unknown interface '{}'", name)),
    }
}

fn run_session(
    config: SessionConfig,
    timestamp_payload: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::Relaxed);
    })?;

    let mut controller = SessionController::new(config)?;
    let mut sink = TerminalSink;

    controller.start(&mut sink);
    if !controller.is_running() {
        return Err("session did not start".into());
    }
    if let Some(addr) = controller.local_addr() {
        println!("{} {}", "listening on".green(), addr.to_string().bold());
    }

    while running.load(Ordering::Relaxed) {
        // Transmission content mirrors the wall clock unless a fixed
        // payload was given
        if timestamp_payload && controller.config().send_enabled {
            let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
            controller.set_payload(now.into_bytes());
        }
        controller.pump(Duration::from_millis(200), &mut sink)?;
    }

    controller.stop(&mut sink);
    Ok(())
}

/// Renders engine events on the terminal.
struct TerminalSink;

impl TerminalSink {
    fn timestamp() -> String {
        chrono::Local::now().format("%H:%M:%S%.3f").to_string()
    }
}

impl EventSink for TerminalSink {
    fn state_changed(&mut self, state: &str) {
        println!("{} {} {}", Self::timestamp().dimmed(), "state".blue(), state);
    }

    fn datagram_received(&mut self, datagram: &Datagram) {
        println!(
            "{} {} {} -> {}",
            Self::timestamp().dimmed(),
            ">>".green().bold(),
            datagram.sender,
            datagram.destination
        );
        println!("   {}", datagram.payload_display());
    }

    fn datagram_sent(&mut self, record: &SendRecord) {
        println!(
            "{} {} {} -> {}",
            Self::timestamp().dimmed(),
            "<<".cyan().bold(),
            record.source,
            record.destination
        );
        println!("   {}", record.payload_display());
    }

    fn operational_error(&mut self, context: &str, detail: &str) {
        println!(
            "{} {} {}: {}",
            Self::timestamp().dimmed(),
            "error".red(),
            context,
            detail
        );
    }

    fn notice(&mut self, message: &str) {
        eprintln!("{} {}", "!!".red().bold(), message);
    }
}
