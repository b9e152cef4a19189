use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::command::CommandId;
use crate::constants::events;
use crate::status::CommandState;

/// Broadcast publisher for command state transitions
#[derive(Debug, Clone)]
pub struct StatusEventPublisher {
    sender: broadcast::Sender<StatusEvent>,
}

/// A command moved to `state`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub command_id: CommandId,
    pub state: CommandState,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl StatusEvent {
    /// Event name, e.g. `command.completed`
    pub fn name(&self) -> &'static str {
        match self.state {
            CommandState::Scheduled => events::COMMAND_SCHEDULED,
            CommandState::ScrollingRunning => events::COMMAND_SCROLLING,
            CommandState::Running => events::COMMAND_RUNNING,
            CommandState::Completed => events::COMMAND_COMPLETED,
            CommandState::CompletedWithErrors => events::COMMAND_COMPLETED_WITH_ERRORS,
            CommandState::Aborted => events::COMMAND_ABORTED,
        }
    }
}

impl StatusEventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a transition; dropped silently when nobody listens
    pub fn publish(&self, command_id: CommandId, state: CommandState) {
        let event = StatusEvent {
            command_id,
            state,
            published_at: chrono::Utc::now(),
        };
        trace!(command_id = %command_id, event = event.name(), "Publishing status event");

        // send() only fails without subscribers, which is fine here
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for StatusEventPublisher {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_STATUS_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let publisher = StatusEventPublisher::new(16);
        let mut receiver = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);

        let command_id = CommandId::new();
        publisher.publish(command_id, CommandState::Completed);

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.command_id, command_id);
        assert_eq!(event.state, CommandState::Completed);
        assert_eq!(event.name(), "command.completed");
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let publisher = StatusEventPublisher::default();
        publisher.publish(CommandId::new(), CommandState::Scheduled);
        assert_eq!(publisher.subscriber_count(), 0);
    }
}
