//! An in-process stand-in for a network: a fixed set of mailboxes, each a
//! FIFO queue behind its own lock. Actors own one mailbox each and block on
//! it; sending never blocks. Delivery order per mailbox is the send order.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

/// What actually travels between mailboxes.
///
/// `kind` and `size` are bookkeeping mirrored off the payload at send time;
/// `sender` is stamped by [`Endpoint::send`] so receivers know where to
/// reply.
#[derive(Debug)]
pub struct Envelope<P> {
    pub kind: u32,
    pub sender: u64,
    pub size: u64,
    pub payload: P,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("no mailbox {mailbox} on this bus ({mailboxes} mailboxes)")]
pub struct NoSuchMailbox {
    pub mailbox: u64,
    pub mailboxes: usize,
}

struct Mailbox<P> {
    queue: Mutex<VecDeque<Envelope<P>>>,
    available: Condvar,
}

impl<P> Mailbox<P> {
    fn new() -> Self {
        Mailbox {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }
}

/// The shared bus. Construct once, then hand an [`Endpoint`] to each actor.
pub struct Bus<P> {
    mailboxes: Vec<Mailbox<P>>,
}

impl<P> Bus<P> {
    pub fn new(mailboxes: usize) -> Arc<Self> {
        Arc::new(Bus {
            mailboxes: (0..mailboxes).map(|_| Mailbox::new()).collect(),
        })
    }

    pub fn mailboxes(&self) -> usize {
        self.mailboxes.len()
    }

    fn push(&self, receiver: u64, envelope: Envelope<P>) -> Result<(), NoSuchMailbox> {
        let mailbox = self
            .mailboxes
            .get(receiver as usize)
            .ok_or(NoSuchMailbox {
                mailbox: receiver,
                mailboxes: self.mailboxes.len(),
            })?;
        let mut queue = mailbox.queue.lock();
        queue.push_back(envelope);
        mailbox.available.notify_one();
        Ok(())
    }

    fn pop(&self, receiver: u64) -> Option<Envelope<P>> {
        self.mailboxes[receiver as usize].queue.lock().pop_front()
    }

    fn pop_blocking(&self, receiver: u64) -> Envelope<P> {
        let mailbox = &self.mailboxes[receiver as usize];
        let mut queue = mailbox.queue.lock();
        while queue.is_empty() {
            mailbox.available.wait(&mut queue);
        }
        queue.pop_front().expect("woken on a non-empty queue")
    }
}

/// An actor's view of the bus: its own mailbox plus the ability to send
/// anywhere. Cloning shares the mailbox, which is only sound for actors
/// that never receive concurrently; the harness gives each actor its own.
pub struct Endpoint<P> {
    bus: Arc<Bus<P>>,
    mailbox: u64,
}

impl<P> Clone for Endpoint<P> {
    fn clone(&self) -> Self {
        Endpoint {
            bus: Arc::clone(&self.bus),
            mailbox: self.mailbox,
        }
    }
}

impl<P> Endpoint<P> {
    pub fn new(bus: Arc<Bus<P>>, mailbox: u64) -> Self {
        Endpoint { bus, mailbox }
    }

    /// The mailbox this endpoint receives on; used as the sender stamp.
    pub fn mailbox(&self) -> u64 {
        self.mailbox
    }

    /// Deliver to `receiver`'s queue. Never blocks.
    pub fn send(&self, receiver: u64, mut envelope: Envelope<P>) -> Result<(), NoSuchMailbox> {
        envelope.sender = self.mailbox;
        trace!(
            from = self.mailbox,
            to = receiver,
            kind = envelope.kind,
            size = envelope.size,
            "send"
        );
        self.bus.push(receiver, envelope)
    }

    /// Take the next message if one is already queued.
    pub fn try_recv(&self) -> Option<Envelope<P>> {
        self.bus.pop(self.mailbox)
    }

    /// Block until a message arrives. This is the only suspension point an
    /// actor has.
    pub fn recv(&self) -> Envelope<P> {
        self.bus.pop_blocking(self.mailbox)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn envelope(payload: u32) -> Envelope<u32> {
        Envelope {
            kind: 0,
            sender: 0,
            size: 0,
            payload,
        }
    }

    #[test]
    fn delivery_is_fifo_per_mailbox() {
        let bus = Bus::new(2);
        let sender = Endpoint::new(Arc::clone(&bus), 0);
        let receiver = Endpoint::new(bus, 1);

        for v in 0..10u32 {
            sender.send(1, envelope(v)).unwrap();
        }
        for v in 0..10u32 {
            let got = receiver.try_recv().unwrap();
            assert_eq!(got.payload, v);
            assert_eq!(got.sender, 0);
        }
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn recv_blocks_until_a_message_arrives() {
        let bus = Bus::new(2);
        let sender = Endpoint::new(Arc::clone(&bus), 0);
        let receiver = Endpoint::new(bus, 1);

        let waiter = thread::spawn(move || receiver.recv().payload);
        thread::sleep(Duration::from_millis(50));
        sender.send(1, envelope(7)).unwrap();
        assert_eq!(waiter.join().unwrap(), 7);
    }

    #[test]
    fn sending_to_a_missing_mailbox_is_an_error() {
        let bus = Bus::new(1);
        let sender = Endpoint::new(bus, 0);
        assert_eq!(
            sender.send(3, envelope(0)).unwrap_err(),
            NoSuchMailbox {
                mailbox: 3,
                mailboxes: 1
            }
        );
    }
}
