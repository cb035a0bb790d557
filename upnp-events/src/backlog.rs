//! NOTIFY requests received before their SUBSCRIBE completed.
//!
//! Devices may start sending events before the SUBSCRIBE response reaches us,
//! so a NOTIFY for an unknown SID is kept here until the SID is claimed.

use std::collections::VecDeque;

use upnp_requester::HttpRequest;

/// Bounded store of NOTIFY requests keyed by SID, in receipt order.
#[derive(Debug)]
pub(crate) struct Backlog {
    capacity: usize,
    entries: VecDeque<(String, HttpRequest)>,
}

impl Backlog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Store a request, evicting the oldest entries once the capacity is reached.
    pub(crate) fn push(&mut self, sid: &str, request: HttpRequest) {
        while self.entries.len() >= self.capacity {
            if let Some((evicted, _)) = self.entries.pop_front() {
                tracing::debug!("Backlog full, dropping oldest NOTIFY for SID: {}", evicted);
            }
        }
        self.entries.push_back((sid.to_string(), request));
    }

    /// Remove and return every request stored for `sid`, oldest first.
    pub(crate) fn take(&mut self, sid: &str) -> Vec<HttpRequest> {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.entries.len());
        for (entry_sid, request) in self.entries.drain(..) {
            if entry_sid == sid {
                taken.push(request);
            } else {
                kept.push_back((entry_sid, request));
            }
        }
        self.entries = kept;
        taken
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
