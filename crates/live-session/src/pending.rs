//! Outstanding slide navigations waiting for the model to react.
//!
//! A navigation sent while the model is still producing a turn must not be
//! confirmed by the tail of that turn. Such requests start out unarmed and
//! are armed once the old turn is seen to end; only armed requests resolve.

use crate::error::SessionError;
use std::collections::HashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

pub type NavigationReply = oneshot::Sender<Result<usize, SessionError>>;

struct Navigation {
    index: usize,
    reply: NavigationReply,
    armed: bool,
}

#[derive(Default)]
pub struct PendingNavigations {
    entries: HashMap<Uuid, Navigation>,
}

impl PendingNavigations {
    pub fn new() -> Self {
        Self::default()
    }

    /// `armed` is false when the model still has a turn in flight.
    pub fn register(&mut self, index: usize, reply: NavigationReply, armed: bool) -> Uuid {
        let id = Uuid::new_v4();
        self.entries.insert(
            id,
            Navigation {
                index,
                reply,
                armed,
            },
        );
        id
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The turn that was in flight has ended.
    pub fn arm_all(&mut self) {
        for navigation in self.entries.values_mut() {
            navigation.armed = true;
        }
    }

    /// Resolves every armed request with the slide it asked for.
    pub fn resolve_armed(&mut self) -> usize {
        let armed: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|(_, navigation)| navigation.armed)
            .map(|(id, _)| *id)
            .collect();
        for id in &armed {
            if let Some(navigation) = self.entries.remove(id) {
                tracing::debug!(%id, index = navigation.index, "Navigation acknowledged");
                let _ = navigation.reply.send(Ok(navigation.index));
            }
        }
        armed.len()
    }

    pub fn reject_all(&mut self, reason: &str) {
        for (_, navigation) in self.entries.drain() {
            let _ = navigation
                .reply
                .send(Err(SessionError::NavigationAbandoned(reason.to_string())));
        }
    }
}
