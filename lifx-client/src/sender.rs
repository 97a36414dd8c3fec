use std::net::{SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::lock;
use crate::pending::{PendingCommand, PendingTable};
use crate::sequence::SequenceAllocator;

/// Drains the command queue onto the network.
pub(crate) struct Transmitter {
    /// Sends are serialized even though only the sender thread writes today
    socket: Mutex<UdpSocket>,
    device_port: u16,
    ack_timeout: Duration,
    resend_interval: Duration,
    sequences: SequenceAllocator,
    pending: Arc<PendingTable>,
}

impl Transmitter {
    pub(crate) fn new(
        socket: UdpSocket,
        device_port: u16,
        ack_timeout: Duration,
        resend_interval: Duration,
        pending: Arc<PendingTable>,
    ) -> Transmitter {
        Transmitter {
            socket: Mutex::new(socket),
            device_port,
            ack_timeout,
            resend_interval,
            sequences: SequenceAllocator::new(),
            pending,
        }
    }

    /// Sends one command and registers it as pending.
    ///
    /// A command without a sequence number gets a fresh one and waits the full ack timeout.  A
    /// resend keeps its number and is due again after one resend interval.  If the send fails the
    /// command is not registered, and so is never retried.
    pub(crate) fn transmit(&self, mut cmd: Command) -> Result<u8> {
        let (sequence, wait) = match cmd.sequence {
            Some(seq) => (seq, self.resend_interval),
            None => {
                let seq = self.sequences.next_seq();
                cmd.sequence = Some(seq);
                (seq, self.ack_timeout)
            }
        };

        let bytes = lifx_core::encode(sequence, cmd.request.to_message())?;
        let dest = SocketAddrV4::new(cmd.target, self.device_port);
        let request = cmd.request;

        // registered before the send so a fast acknowledgement can't arrive ahead of it
        let sent_at = Instant::now();
        let entry = PendingCommand {
            command: cmd,
            sequence,
            sent_at,
            deadline: sent_at + wait,
        };
        // the sweeper takes an entry out before resending it, so anything already here is a
        // different command that was handed the same number
        if let Some(previous) = self.pending.insert(entry) {
            warn!(
                "seq={} was still waiting on {:?} to {}; that command is now lost",
                sequence, previous.command.request, previous.command.target
            );
        }

        if let Err(e) = lock(&self.socket).send_to(&bytes, dest) {
            self.pending.resolve(sequence);
            return Err(Error::socket("send_to", e));
        }
        debug!("Sent {:?} to {} with seq={}", request, dest, sequence);
        Ok(sequence)
    }

    pub(crate) fn run(&self, rx: Receiver<Command>, running: &AtomicBool, poll: Duration) {
        debug!("Sender started");
        while running.load(Ordering::SeqCst) {
            match rx.recv_timeout(poll) {
                Ok(cmd) => {
                    let target = cmd.target;
                    if let Err(e) = self.transmit(cmd) {
                        warn!("Dropping command to {}: {}", target, e);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("Sender stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandQueue, Request};
    use crate::command::Color;
    use lifx_core::{Message, PowerLevel};
    use std::net::Ipv4Addr;
    use std::thread;

    const RESEND: Duration = Duration::from_millis(200);

    fn setup(ack_timeout: Duration) -> (Transmitter, UdpSocket, Arc<PendingTable>) {
        let device = UdpSocket::bind("127.0.0.1:0").unwrap();
        device
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = device.local_addr().unwrap().port();
        let pending = Arc::new(PendingTable::new());
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let tx = Transmitter::new(socket, port, ack_timeout, RESEND, pending.clone());
        (tx, device, pending)
    }

    fn recv(device: &UdpSocket) -> lifx_core::Packet {
        let mut buf = [0; 1024];
        let (n, _) = device.recv_from(&mut buf).unwrap();
        lifx_core::decode(&buf[..n]).unwrap()
    }

    #[test]
    fn test_transmit_registers_pending() {
        let (tx, device, pending) = setup(Duration::from_secs(5));
        let cmd = Command::new(
            Ipv4Addr::LOCALHOST,
            Request::SetColor {
                color: Color::new(70000, 0, 65535, 1000),
                duration: 100,
            },
        );

        assert_eq!(tx.transmit(cmd).unwrap(), 1);

        let packet = recv(&device);
        assert_eq!(packet.sequence(), 1);
        assert!(packet.frame_addr.ack_required);
        match packet.message {
            Message::LightSetColor {
                color: sent,
                duration,
                ..
            } => {
                assert_eq!(sent.hue, 65535);
                assert_eq!(sent.kelvin, 2500);
                assert_eq!(duration, 100);
            }
            other => panic!("unexpected message {:?}", other),
        }

        let entry = pending.resolve(1).unwrap();
        assert_eq!(entry.command.sequence, Some(1));
        assert_eq!(entry.deadline - entry.sent_at, Duration::from_secs(5));
    }

    #[test]
    fn test_resend_keeps_sequence() {
        let (tx, device, pending) = setup(Duration::from_secs(5));
        let mut cmd = Command::new(
            Ipv4Addr::LOCALHOST,
            Request::SetPower {
                power: 1,
                duration: 0,
            },
        );
        cmd.sequence = Some(42);

        assert_eq!(tx.transmit(cmd).unwrap(), 42);
        let packet = recv(&device);
        assert_eq!(packet.sequence(), 42);
        assert_eq!(
            packet.message,
            Message::LightSetPower {
                level: PowerLevel::Enabled,
                duration: 0
            }
        );

        // a resend is due again after one resend interval, not a full ack timeout
        let entry = pending.resolve(42).unwrap();
        assert_eq!(entry.deadline - entry.sent_at, RESEND);

        // fresh commands still start at the bottom of the range
        assert_eq!(
            tx.transmit(Command::new(Ipv4Addr::LOCALHOST, Request::Get))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_failed_send_is_not_registered() {
        let (tx, _device, pending) = setup(Duration::from_secs(5));
        // broadcasting without SO_BROADCAST is refused by the OS
        let cmd = Command::new(Ipv4Addr::BROADCAST, Request::Get);
        match tx.transmit(cmd) {
            Err(Error::Socket { action, .. }) => assert_eq!(action, "send_to"),
            other => panic!("expected a socket error, got {:?}", other),
        }
        assert!(pending.is_empty());
    }

    #[test]
    fn test_run_drains_queue_until_closed() {
        let (tx, device, pending) = setup(Duration::from_secs(5));
        let (queue, rx) = CommandQueue::bounded(8);
        let running = Arc::new(AtomicBool::new(true));

        let worker_running = running.clone();
        let worker = thread::spawn(move || {
            tx.run(rx, &worker_running, Duration::from_millis(20));
        });

        // the first command fails, which must not stop the loop
        queue
            .enqueue(Command::new(Ipv4Addr::BROADCAST, Request::Get))
            .unwrap();
        queue
            .enqueue(Command::new(Ipv4Addr::LOCALHOST, Request::Get))
            .unwrap();

        let packet = recv(&device);
        assert_eq!(packet.message, Message::LightGet);

        drop(queue);
        worker.join().unwrap();
        assert_eq!(pending.len(), 1);
    }
}
