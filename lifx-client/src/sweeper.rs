use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::command::CommandQueue;
use crate::error::Result;
use crate::pending::PendingTable;

/// Puts commands that were never acknowledged back on the queue.
///
/// There is no retry limit.  A command first waits one ack timeout; after that it is resent every
/// sweep interval until a bulb acknowledges it or the client shuts down.
pub(crate) struct Sweeper {
    pending: Arc<PendingTable>,
    queue: CommandQueue,
    interval: Duration,
}

impl Sweeper {
    pub(crate) fn new(
        pending: Arc<PendingTable>,
        queue: CommandQueue,
        interval: Duration,
    ) -> Sweeper {
        Sweeper {
            pending,
            queue,
            interval,
        }
    }

    /// Resubmits everything that expired by `now`, returning how many commands were resubmitted.
    ///
    /// Expired entries are taken out under the table lock, but enqueued after it is released: the
    /// sender needs that lock to make room in a full queue.
    pub(crate) fn sweep(&self, now: Instant) -> Result<usize> {
        let expired = self.pending.take_expired(now);
        let count = expired.len();
        for entry in expired {
            debug!(
                "No ack for seq={} ({:?} to {}) after {:?}, resending",
                entry.sequence,
                entry.command.request,
                entry.command.target,
                now.saturating_duration_since(entry.sent_at)
            );
            self.queue.enqueue(entry.command)?;
        }
        Ok(count)
    }

    pub(crate) fn run(&self, running: &AtomicBool) {
        debug!("Sweeper started");
        while running.load(Ordering::SeqCst) {
            thread::sleep(self.interval);
            if let Err(e) = self.sweep(Instant::now()) {
                debug!("Sweeper stopping: {}", e);
                break;
            }
        }
        debug!("Sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, Request};
    use crate::pending::PendingCommand;
    use std::net::Ipv4Addr;

    fn pending(sequence: u8, deadline: Instant) -> PendingCommand {
        let mut command = Command::new(Ipv4Addr::new(10, 0, 0, 1), Request::Get);
        command.sequence = Some(sequence);
        PendingCommand {
            command,
            sequence,
            sent_at: deadline - Duration::from_secs(5),
            deadline,
        }
    }

    #[test]
    fn test_expired_commands_are_requeued() {
        let table = Arc::new(PendingTable::new());
        let (queue, rx) = CommandQueue::bounded(8);
        let sweeper = Sweeper::new(table.clone(), queue, Duration::from_millis(10));

        let now = Instant::now();
        table.insert(pending(7, now - Duration::from_millis(1)));
        table.insert(pending(8, now + Duration::from_secs(60)));

        assert_eq!(sweeper.sweep(now).unwrap(), 1);

        let resent = rx.try_recv().unwrap();
        assert_eq!(resent.sequence, Some(7));
        assert!(rx.try_recv().is_err());

        // the requeued command is no longer pending; the live one is untouched
        assert!(!table.contains(7));
        assert!(table.contains(8));
    }

    #[test]
    fn test_nothing_expired() {
        let table = Arc::new(PendingTable::new());
        let (queue, rx) = CommandQueue::bounded(8);
        let sweeper = Sweeper::new(table.clone(), queue, Duration::from_millis(10));
        let now = Instant::now();
        table.insert(pending(1, now + Duration::from_secs(1)));

        assert_eq!(sweeper.sweep(now).unwrap(), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_run_resubmits_and_stops_when_queue_closes() {
        let table = Arc::new(PendingTable::new());
        let (queue, rx) = CommandQueue::bounded(8);
        let sweeper = Sweeper::new(table.clone(), queue, Duration::from_millis(10));
        table.insert(pending(3, Instant::now()));

        let running = Arc::new(AtomicBool::new(true));
        let worker_running = running.clone();
        let worker = thread::spawn(move || sweeper.run(&worker_running));

        let resent = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(resent.sequence, Some(3));

        // simulate the sender re-registering it, then going away
        table.insert(pending(3, Instant::now()));
        drop(rx);
        worker.join().unwrap();
        assert!(running.load(Ordering::SeqCst));
    }
}
