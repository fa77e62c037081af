use depthsync_protocol::{ChangedFields, Notification};

/// Handle returned by [`DepthState::subscribe`](super::DepthState::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

pub type Listener = Box<dyn FnMut(&Notification)>;

struct Registration {
    id: ListenerId,
    interest: ChangedFields,
    listener: Listener,
}

/// Ordered, synchronous dispatch list.
///
/// Delivery order is registration order; every listener sees every
/// notification it is interested in before the next one is emitted.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    registrations: Vec<Registration>,
}

impl Listeners {
    pub(crate) fn add(&mut self, interest: ChangedFields, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.registrations.push(Registration {
            id,
            interest,
            listener,
        });
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.id != id);
        self.registrations.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.registrations.len()
    }

    pub(crate) fn dispatch(&mut self, notification: &Notification) {
        for registration in &mut self.registrations {
            if notification.touches(registration.interest) {
                (registration.listener)(notification);
            }
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.registrations.len())
            .finish()
    }
}
