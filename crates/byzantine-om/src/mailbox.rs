//! Bounded per-general mailboxes.
//!
//! Any general may deliver into any other general's mailbox; only the owner
//! drains it. Deliveries never block: a full mailbox is reported as
//! [`Error::MailboxFull`] so an undersized capacity surfaces instead of
//! stalling the run.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;

use crate::error::{Error, Result};
use crate::general::GeneralId;
use crate::letter::Letter;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Largest capacity a bounded channel accepts.
pub const MAX_CAPACITY: usize = Semaphore::MAX_PERMITS;

/// One general's bounded FIFO queue.
#[derive(Debug)]
pub struct Mailbox {
    owner: GeneralId,
    capacity: usize,
    tx: Mutex<Option<mpsc::Sender<Letter>>>,
    rx: Mutex<Option<mpsc::Receiver<Letter>>>,
}

impl Mailbox {
    /// Create a mailbox holding at most `capacity` undelivered letters.
    pub fn new(owner: GeneralId, capacity: usize) -> Result<Self> {
        if capacity > MAX_CAPACITY {
            return Err(Error::CapacityTooLarge {
                capacity,
                max: MAX_CAPACITY,
            });
        }
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Ok(Self {
            owner,
            capacity,
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        })
    }

    /// Enqueue without waiting.
    pub fn deliver(&self, letter: Letter) -> Result<()> {
        let guard = lock(&self.tx);
        let tx = guard.as_ref().ok_or(Error::MailboxClosed(self.owner))?;
        tx.try_send(letter).map_err(|e| match e {
            TrySendError::Full(_) => Error::MailboxFull {
                general: self.owner,
                capacity: self.capacity,
            },
            TrySendError::Closed(_) => Error::MailboxClosed(self.owner),
        })
    }

    /// Hand the receiving end to the owning general. Succeeds once.
    pub fn take_inbox(&self) -> Result<Inbox> {
        if lock(&self.tx).is_none() {
            return Err(Error::MailboxClosed(self.owner));
        }
        lock(&self.rx)
            .take()
            .map(|rx| Inbox { rx })
            .ok_or(Error::AlreadyStarted(self.owner))
    }

    /// Drop both ends. Returns false if already closed.
    pub fn close(&self) -> bool {
        let had_tx = lock(&self.tx).take().is_some();
        lock(&self.rx).take();
        had_tx
    }
}

/// The receiving end of a mailbox, owned by its general's task.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::Receiver<Letter>,
}

impl Inbox {
    /// Wait for the next letter. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Letter> {
        self.rx.recv().await
    }
}

/// One mailbox per general, indexed by id.
#[derive(Debug, Default)]
pub struct MailboxSet {
    boxes: Vec<Mailbox>,
}

impl MailboxSet {
    /// Allocate `generals` mailboxes of `capacity` each.
    pub fn new(generals: usize, capacity: usize) -> Result<Self> {
        let mut boxes = Vec::new();
        boxes.try_reserve_exact(generals)?;
        for i in 0..generals {
            boxes.push(Mailbox::new(GeneralId(i), capacity)?);
        }
        Ok(Self { boxes })
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn get(&self, id: GeneralId) -> Result<&Mailbox> {
        self.boxes.get(id.0).ok_or(Error::UnknownGeneral(id))
    }

    /// Deliver `letter` to `target`'s mailbox.
    pub fn deliver(&self, target: GeneralId, letter: Letter) -> Result<()> {
        tracing::trace!(
            to = %target,
            chain = %letter.chain,
            decision = %letter.decision,
            "deliver"
        );
        self.get(target)?.deliver(letter)
    }

    pub fn take_inbox(&self, id: GeneralId) -> Result<Inbox> {
        self.get(id)?.take_inbox()
    }

    /// Close every mailbox. Returns how many were still open.
    pub fn close_all(&self) -> usize {
        self.boxes.iter().filter(|b| b.close()).count()
    }
}
