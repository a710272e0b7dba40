//! The single-slot sync ticket.
//!
//! At most one mirror runs at a time: a run holds the only permit for its
//! whole duration. Withdrawing the ticket closes the slot for good, which is
//! how both a failing syncer and teardown stop further runs.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// How [`SyncTicket::quiesce`] found the ticket.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Quiesce {
    /// The ticket was free (or became free) and is now withdrawn.
    Drained,
    /// The syncer had already withdrawn the ticket.
    AlreadyWithdrawn,
}

/// Mutual exclusion token shared by the syncer and teardown.
#[derive(Clone, Debug)]
pub struct SyncTicket {
    slot: Arc<Semaphore>,
}

impl Default for SyncTicket {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTicket {
    /// Creates a ticket with its single token available.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    /// Waits for the token. Returns `None` once the ticket is withdrawn.
    pub async fn acquire(&self) -> Option<TicketGuard> {
        let permit = Arc::clone(&self.slot).acquire_owned().await.ok()?;
        Some(TicketGuard {
            permit,
            slot: Arc::clone(&self.slot),
        })
    }

    /// Waits out any in-flight run, then withdraws the ticket.
    pub async fn quiesce(&self) -> Quiesce {
        match self.acquire().await {
            Some(guard) => {
                guard.withdraw();
                Quiesce::Drained
            }
            None => Quiesce::AlreadyWithdrawn,
        }
    }

    /// Withdraws the ticket without waiting. Later acquisitions fail; a run
    /// already holding the token is not interrupted.
    pub fn withdraw_now(&self) {
        self.slot.close();
    }

    /// Returns `true` once the ticket has been withdrawn.
    #[must_use]
    pub fn is_withdrawn(&self) -> bool {
        self.slot.is_closed()
    }

    /// Returns `true` when the token is free to take.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !self.is_withdrawn() && self.slot.available_permits() == 1
    }
}

/// Proof of holding the token. Dropping it returns the token.
#[derive(Debug)]
pub struct TicketGuard {
    permit: OwnedSemaphorePermit,
    slot: Arc<Semaphore>,
}

impl TicketGuard {
    /// Consumes the token without returning it, closing the ticket.
    pub fn withdraw(self) {
        self.slot.close();
        self.permit.forget();
    }
}
