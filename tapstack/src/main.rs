//! Process entry point: brings up the tap device, wires the stack
//! together, and runs it until `SIGINT`/`SIGTERM`.
//!
//! Four long-lived threads do the work: an RX reader pulls frames off
//! the tap fd into [`RxRing`], a dispatcher drains it into
//! [`PacketHandler::handle_inbound`], a TX writer drains [`TxRing`]
//! back onto the fd, and a timer thread drives [`PacketHandler::run_arp_tick`].
//! The UDP echo service and the DHCP client run as ordinary users of
//! the socket API alongside them.

mod device;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info};

use tapstack_core::config::StackConfig;
use tapstack_core::frame::Frame;
use tapstack_core::ring::{RxRing, TxRing};
use tapstack_stack::arp_cache::ArpCache;
use tapstack_stack::packet_handler::PacketHandler;
use tapstack_stack::routing::RoutingState;
use tapstack_stack::udp_socket::UdpSocketTable;

use device::TapDevice;

const ARP_TICK_INTERVAL: Duration = Duration::from_millis(500);
const RING_POLL_TIMEOUT: Duration = Duration::from_millis(500);

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn request_stop(_signum: libc::c_int) {
    STOP.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, request_stop as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, request_stop as *const () as libc::sighandler_t);
    }
}

fn main() {
    env_logger::init();
    install_signal_handlers();

    let config = match StackConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let mut rx_device = match TapDevice::open(&config.interface) {
        Ok(d) => d,
        Err(e) => {
            error!("failed to open tap device {}: {e}", config.interface);
            std::process::exit(1);
        }
    };
    let mut tx_device = match rx_device.try_clone() {
        Ok(d) => d,
        Err(e) => {
            error!("failed to clone tap device handle: {e}");
            std::process::exit(1);
        }
    };
    info!(
        "tap device {} up, mtu {}",
        config.interface,
        rx_device.mtu()
    );

    let rx_ring = Arc::new(RxRing::with_capacity(config.rx_ring_capacity));
    let tx_ring = Arc::new(TxRing::with_capacity(config.tx_ring_capacity));
    let routing = Arc::new(RoutingState::new(config.addresses.clone()));
    let arp = Arc::new(ArpCache::new());
    let sockets = UdpSocketTable::new();
    let handler = Arc::new(PacketHandler::new(
        config.mac_address,
        routing.clone(),
        arp,
        tx_ring.clone(),
        sockets.clone(),
    ));

    handler.announce_addresses();

    let rx_thread = {
        let rx_ring = rx_ring.clone();
        thread::spawn(move || rx_reader_loop(&mut rx_device, &rx_ring))
    };

    let tx_thread = {
        let tx_ring = tx_ring.clone();
        thread::spawn(move || tx_writer_loop(&mut tx_device, &tx_ring))
    };

    let dispatcher_thread = {
        let rx_ring = rx_ring.clone();
        let handler = handler.clone();
        thread::spawn(move || dispatcher_loop(&rx_ring, &handler))
    };

    let arp_thread = {
        let handler = handler.clone();
        thread::spawn(move || arp_tick_loop(&handler))
    };

    let echo_thread = {
        let handler = handler.clone();
        let sockets = sockets.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_loop = stop.clone();
        let join = thread::spawn(move || {
            tapstack_services::echo::run(handler, sockets, stop_for_loop)
        });
        (join, stop)
    };

    if config.addresses.is_empty() {
        if let Some(lease) = tapstack_services::dhcp::run(handler.clone(), sockets.clone(), routing.clone())
        {
            info!("dhcp: interface address is now {lease}");
        } else {
            info!("dhcp: no lease acquired, continuing address-less");
        }
    }

    while !STOP.load(Ordering::SeqCst) {
        thread::sleep(RING_POLL_TIMEOUT);
    }

    info!("shutting down");
    rx_ring.close();
    tx_ring.close();
    echo_thread.1.store(true, Ordering::SeqCst);

    let _ = rx_thread.join();
    let _ = tx_thread.join();
    let _ = dispatcher_thread.join();
    let _ = echo_thread.0.join();
    drop(arp_thread); // detached: blocked in a sleep, exits with the process
}

fn rx_reader_loop(device: &mut TapDevice, rx_ring: &RxRing) {
    while !STOP.load(Ordering::SeqCst) {
        match device.read_frame() {
            Ok(bytes) if !bytes.is_empty() => rx_ring.push(Frame::received(bytes)),
            Ok(_) => {}
            Err(e) => {
                error!("tap read failed: {e}");
                break;
            }
        }
    }
}

fn tx_writer_loop(device: &mut TapDevice, tx_ring: &TxRing) {
    loop {
        match tx_ring.pop_timeout(RING_POLL_TIMEOUT) {
            Some(frame) => {
                if let Err(e) = device.write_frame(&frame.bytes) {
                    error!("tap write failed: {e}");
                }
            }
            None if STOP.load(Ordering::SeqCst) => break,
            None => {}
        }
    }
}

fn dispatcher_loop(rx_ring: &RxRing, handler: &PacketHandler) {
    loop {
        match rx_ring.pop_timeout(RING_POLL_TIMEOUT) {
            Some(frame) => handler.handle_inbound(frame),
            None if STOP.load(Ordering::SeqCst) => break,
            None => {}
        }
    }
}

fn arp_tick_loop(handler: &PacketHandler) {
    while !STOP.load(Ordering::SeqCst) {
        thread::sleep(ARP_TICK_INTERVAL);
        handler.run_arp_tick();
    }
}
