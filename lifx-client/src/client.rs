use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use crate::command::{Color, Command, CommandQueue, Request};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::listener::Listener;
use crate::notify::Notifier;
use crate::pending::PendingTable;
use crate::sender::Transmitter;
use crate::sweeper::Sweeper;

/// Handles network communication with bulbs for you.
///
/// Commands are queued and sent by a background thread.  Every command asks for an
/// acknowledgement, and is resent until one arrives.  Acknowledgements and state reports are
/// passed to the [Notifier] given at construction.
///
/// Three threads run for the lifetime of the client: one receiving from the socket, one sending
/// queued commands, and one resubmitting commands whose acknowledgement is overdue.  They are
/// stopped by [Client::shutdown], or when the client is dropped.
pub struct Client {
    queue: CommandQueue,
    pending: Arc<PendingTable>,
    running: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    local_addr: Ipv4Addr,
    broadcast_addr: Ipv4Addr,
    bound_addr: SocketAddr,
}

impl Client {
    pub fn new<N: Notifier>(config: Config, notifier: N) -> Result<Client> {
        let local_addr = config.resolve_local_addr()?;
        let broadcast_addr = config.resolve_broadcast_addr(local_addr);

        let sock = UdpSocket::bind(config.bind_addr()).map_err(|e| Error::socket("bind", e))?;
        sock.set_broadcast(true)
            .map_err(|e| Error::socket("set_broadcast", e))?;
        sock.set_read_timeout(Some(config.poll_interval))
            .map_err(|e| Error::socket("set_read_timeout", e))?;
        let bound_addr = sock
            .local_addr()
            .map_err(|e| Error::socket("local_addr", e))?;
        let send_sock = sock.try_clone().map_err(|e| Error::socket("clone", e))?;
        debug!(
            "Bound to {} (local address {}, broadcast {})",
            bound_addr, local_addr, broadcast_addr
        );

        let pending = Arc::new(PendingTable::new());
        let running = Arc::new(AtomicBool::new(true));
        let (queue, rx) = CommandQueue::bounded(config.queue_capacity);

        let listener = Listener::new(local_addr, pending.clone(), Arc::new(notifier));
        let transmitter = Transmitter::new(
            send_sock,
            config.device_port,
            config.ack_timeout,
            config.resend_interval,
            pending.clone(),
        );
        let sweeper = Sweeper::new(pending.clone(), queue.clone(), config.resend_interval);

        let mut client = Client {
            queue,
            pending,
            running,
            workers: Vec::with_capacity(3),
            local_addr,
            broadcast_addr,
            bound_addr,
        };

        let running = client.running.clone();
        client.spawn("lifx-listener", move || listener.run(&sock, &running))?;

        let running = client.running.clone();
        let poll = config.poll_interval;
        client.spawn("lifx-sender", move || transmitter.run(rx, &running, poll))?;

        let running = client.running.clone();
        client.spawn("lifx-sweeper", move || sweeper.run(&running))?;

        Ok(client)
    }

    fn spawn<F>(&mut self, name: &'static str, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        // on failure, the client is dropped by the caller, which stops any worker already running
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(f)
            .map_err(|err| Error::Thread { name, err })?;
        self.workers.push(handle);
        Ok(())
    }

    fn enqueue(&self, target: Ipv4Addr, request: Request) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::QueueClosed);
        }
        self.queue.enqueue(Command::new(target, request))
    }

    /// Asks a bulb for its state, or every bulb if `addr` is `None`.
    ///
    /// Answers arrive as [Notifier::device_discovered] calls.
    pub fn probe(&self, addr: Option<Ipv4Addr>) -> Result<()> {
        self.enqueue(addr.unwrap_or(self.broadcast_addr), Request::Get)
    }

    /// Turns a bulb off (`power == 0`) or fully on (anything else), fading over `fade_ms`.
    ///
    /// The acknowledgement is reported with the same `power` value.
    pub fn set_power(&self, addr: Ipv4Addr, power: u16, fade_ms: u32) -> Result<()> {
        self.enqueue(
            addr,
            Request::SetPower {
                power,
                duration: fade_ms,
            },
        )
    }

    /// Changes a bulb's color, fading over `fade_ms`.
    ///
    /// Values are clamped when the packet is built: hue, saturation and brightness to
    /// `0..=65535`, kelvin to `2500..=9000`.  The acknowledgement reports the values as given.
    pub fn set_color(
        &self,
        addr: Ipv4Addr,
        hue: u32,
        saturation: u32,
        brightness: u32,
        kelvin: u32,
        fade_ms: u32,
    ) -> Result<()> {
        self.enqueue(
            addr,
            Request::SetColor {
                color: Color::new(hue, saturation, brightness, kelvin),
                duration: fade_ms,
            },
        )
    }

    /// The address packets from ourselves are recognized by.
    pub fn local_addr(&self) -> Ipv4Addr {
        self.local_addr
    }

    pub fn broadcast_addr(&self) -> Ipv4Addr {
        self.broadcast_addr
    }

    /// The address the socket is actually bound to.
    pub fn bound_addr(&self) -> SocketAddr {
        self.bound_addr
    }

    /// Number of commands sent but not yet acknowledged.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Stops the worker threads and waits for them to exit.
    ///
    /// Commands still queued or pending are abandoned.  Later calls to [Client::probe],
    /// [Client::set_power] and [Client::set_color] fail with [Error::QueueClosed].
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("A worker thread panicked");
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Event;
    use lifx_core::{LifxString, Message, Packet, PowerLevel, HSBK};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    // a second loopback address, so the bulb doesn't look like ourselves
    const BULB: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);

    struct FakeBulb {
        sock: UdpSocket,
    }

    impl FakeBulb {
        fn new() -> FakeBulb {
            let sock = UdpSocket::bind((BULB, 0)).unwrap();
            sock.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
            FakeBulb { sock }
        }

        fn port(&self) -> u16 {
            self.sock.local_addr().unwrap().port()
        }

        fn recv(&self) -> (Packet, SocketAddr) {
            let mut buf = [0; 1024];
            let (n, src) = self.sock.recv_from(&mut buf).unwrap();
            (lifx_core::decode(&buf[..n]).unwrap(), src)
        }

        fn reply(&self, to: SocketAddr, msg: Message) {
            let bytes = lifx_core::encode(0, msg).unwrap();
            self.sock.send_to(&bytes, to).unwrap();
        }
    }

    fn start(bulb: &FakeBulb, ack_timeout: Duration) -> (Client, mpsc::Receiver<Event>) {
        let config = Config::default()
            .with_local_addr(Ipv4Addr::LOCALHOST)
            .with_broadcast_addr(BULB)
            .with_bind_port(0)
            .with_device_port(bulb.port())
            .with_ack_timeout(ack_timeout)
            .with_resend_interval(Duration::from_millis(20))
            .with_poll_interval(Duration::from_millis(20));
        let (tx, rx) = mpsc::channel();
        (Client::new(config, tx).unwrap(), rx)
    }

    fn wait_for(mut f: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(2) {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_set_color_acknowledged_once() {
        let bulb = FakeBulb::new();
        let (client, events) = start(&bulb, Duration::from_secs(5));

        client.set_color(BULB, 70000, 100, 200, 1000, 300).unwrap();

        let (packet, src) = bulb.recv();
        assert_eq!(
            packet.message,
            Message::LightSetColor {
                reserved: 0,
                color: HSBK {
                    hue: 65535,
                    saturation: 100,
                    brightness: 200,
                    kelvin: 2500,
                },
                duration: 300
            }
        );
        assert_eq!(src, client.bound_addr());

        let seq = packet.sequence();
        bulb.reply(src, Message::Acknowledgement { seq });
        bulb.reply(src, Message::Acknowledgement { seq });

        // reported as requested, not as clamped on the wire
        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            event,
            Event::ColorChanged {
                addr: BULB,
                color: Color::new(70000, 100, 200, 1000)
            }
        );
        assert!(events.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn test_unacknowledged_command_is_resent() {
        let bulb = FakeBulb::new();
        let (client, events) = start(&bulb, Duration::from_millis(300));

        client.set_power(BULB, 12, 0).unwrap();

        let (first, src) = bulb.recv();
        let first_at = Instant::now();
        assert_eq!(
            first.message,
            Message::LightSetPower {
                level: PowerLevel::Enabled,
                duration: 0
            }
        );

        let mut arrivals = vec![];
        for _ in 0..3 {
            let (copy, _) = bulb.recv();
            assert_eq!(copy.sequence(), first.sequence());
            arrivals.push(Instant::now());
        }

        // the first resend waits out the ack timeout, later ones follow the sweep interval
        assert!(arrivals[0] - first_at >= Duration::from_millis(250));
        assert!(arrivals[1] - arrivals[0] < Duration::from_millis(200));
        assert!(arrivals[2] - arrivals[1] < Duration::from_millis(200));

        // a late ack for any copy settles it; it can land while a copy is back on the queue,
        // so keep answering until it sticks
        let mut event = None;
        for _ in 0..20 {
            bulb.reply(src, Message::Acknowledgement { seq: first.sequence() });
            if let Ok(e) = events.recv_timeout(Duration::from_millis(100)) {
                event = Some(e);
                break;
            }
        }
        assert_eq!(
            event,
            Some(Event::PowerChanged {
                addr: BULB,
                power: 12
            })
        );
        assert!(wait_for(|| client.pending_count() == 0));
        assert!(events.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_probe_goes_to_broadcast_and_ack_is_silent() {
        let bulb = FakeBulb::new();
        let (client, events) = start(&bulb, Duration::from_secs(5));

        client.probe(None).unwrap();
        let (packet, src) = bulb.recv();
        assert_eq!(packet.message, Message::LightGet);

        bulb.reply(src, Message::Acknowledgement { seq: packet.sequence() });
        assert!(wait_for(|| client.pending_count() == 0));
        assert!(events.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_state_reports_discovery() {
        let bulb = FakeBulb::new();
        let (client, events) = start(&bulb, Duration::from_secs(5));

        let color = HSBK {
            hue: 1,
            saturation: 2,
            brightness: 3,
            kelvin: 3500,
        };
        bulb.reply(
            client.bound_addr(),
            Message::LightState {
                color,
                reserved: 0,
                power: 0,
                label: LifxString::new("Lamp"),
                reserved2: 0,
            },
        );

        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            event,
            Event::DeviceDiscovered {
                addr: BULB,
                label: "Lamp".to_owned(),
                power: 0,
                color
            }
        );
    }

    #[test]
    fn test_garbage_does_not_stop_listener() {
        let bulb = FakeBulb::new();
        let (client, events) = start(&bulb, Duration::from_secs(5));

        bulb.sock.send_to(&[1, 2, 3], client.bound_addr()).unwrap();
        bulb.reply(
            client.bound_addr(),
            Message::LightState {
                color: HSBK::default(),
                reserved: 0,
                power: 65535,
                label: LifxString::new("Desk"),
                reserved2: 0,
            },
        );

        match events.recv_timeout(Duration::from_secs(2)).unwrap() {
            Event::DeviceDiscovered { label, .. } => assert_eq!(label, "Desk"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_commands_fail_after_shutdown() {
        let bulb = FakeBulb::new();
        let (mut client, _events) = start(&bulb, Duration::from_secs(5));

        client.shutdown();
        match client.probe(Some(BULB)) {
            Err(Error::QueueClosed) => {}
            other => panic!("expected QueueClosed, got {:?}", other),
        }
    }
}
