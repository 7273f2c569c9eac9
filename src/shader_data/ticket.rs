use parking_lot::Mutex;

use crate::error::{RenderError, RenderResult};

/// Slot index into a shader-data array. Ticket 0 is never issued, so a
/// zeroed reference on the GPU side means "no data".
pub type Ticket = u32;

/// The reserved "no data" ticket.
pub const NULL_TICKET: Ticket = 0;

#[derive(Debug, Default)]
struct TicketState {
    next: Ticket,
    free: Vec<Ticket>,
    live: usize,
}

/// Thread-safe slot allocator for a fixed-capacity array.
///
/// Released tickets are reused most-recently-released first; fresh tickets
/// are handed out from a monotonic counter starting at 1.
#[derive(Debug)]
pub struct TicketAllocator {
    what: &'static str,
    capacity: usize,
    state: Mutex<TicketState>,
}

impl TicketAllocator {
    /// `capacity` counts the reserved slot 0.
    pub fn new(what: &'static str, capacity: usize) -> Self {
        Self {
            what,
            capacity,
            state: Mutex::new(TicketState {
                next: 1,
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tickets currently handed out.
    pub fn live_count(&self) -> usize {
        self.state.lock().live
    }

    /// One past the highest ticket ever issued.
    pub fn high_water_mark(&self) -> Ticket {
        self.state.lock().next
    }

    pub fn acquire(&self) -> RenderResult<Ticket> {
        let mut state = self.state.lock();
        let ticket = match state.free.pop() {
            Some(ticket) => ticket,
            None if (state.next as usize) < self.capacity => {
                let ticket = state.next;
                state.next += 1;
                ticket
            }
            None => {
                return Err(RenderError::CapacityExceeded {
                    what: self.what,
                    capacity: self.capacity,
                })
            }
        };
        state.live += 1;
        Ok(ticket)
    }

    /// Return `ticket` to the free list. Returns false for the null ticket.
    pub fn release(&self, ticket: Ticket) -> bool {
        if ticket == NULL_TICKET {
            return false;
        }
        let mut state = self.state.lock();
        assert!(
            ticket < state.next,
            "{} ticket {} was never issued",
            self.what,
            ticket
        );
        debug_assert!(
            !state.free.contains(&ticket),
            "{} ticket {} released twice",
            self.what,
            ticket
        );
        state.free.push(ticket);
        state.live -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_first_ticket_skips_null() {
        let tickets = TicketAllocator::new("materials", 8);
        assert_eq!(tickets.acquire().unwrap(), 1);
        assert_eq!(tickets.acquire().unwrap(), 2);
    }

    #[test]
    fn test_released_ticket_is_reused() {
        let tickets = TicketAllocator::new("materials", 8);
        let a = tickets.acquire().unwrap();
        let _b = tickets.acquire().unwrap();
        assert!(tickets.release(a));
        assert_eq!(tickets.acquire().unwrap(), a);
        assert_eq!(tickets.live_count(), 2);
    }

    #[test]
    fn test_null_release_is_noop() {
        let tickets = TicketAllocator::new("materials", 8);
        assert!(!tickets.release(NULL_TICKET));
        assert_eq!(tickets.live_count(), 0);
    }

    #[test]
    fn test_capacity_exceeded() {
        let tickets = TicketAllocator::new("lights", 3);
        tickets.acquire().unwrap();
        tickets.acquire().unwrap();
        assert_eq!(
            tickets.acquire(),
            Err(RenderError::CapacityExceeded {
                what: "lights",
                capacity: 3
            })
        );
    }

    #[test]
    fn test_concurrent_tickets_are_unique() {
        let tickets = Arc::new(TicketAllocator::new("entities", 4096));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tickets = Arc::clone(&tickets);
                std::thread::spawn(move || {
                    let mut mine = Vec::new();
                    for round in 0..200 {
                        mine.push(tickets.acquire().unwrap());
                        if round % 3 == 0 {
                            let ticket = mine.swap_remove(0);
                            tickets.release(ticket);
                        }
                    }
                    mine
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for ticket in handle.join().unwrap() {
                assert_ne!(ticket, NULL_TICKET);
                assert!(seen.insert(ticket), "ticket {} issued twice", ticket);
            }
        }
        assert_eq!(seen.len(), tickets.live_count());
    }
}
