//! Session topic provisioning

use crate::messenger::{Messenger, Topic};
use crate::{Error, OperatorId, Result, SessionId};
use tracing::{info, instrument};

/// Create the session topic, subscribed by every participating operator
///
/// A single attempt: failure is fatal to the session.
#[instrument(skip(messenger))]
pub async fn provision_topic<M: Messenger + ?Sized>(
    messenger: &M,
    session_id: &SessionId,
    operator_ids: &[OperatorId],
) -> Result<Topic> {
    if operator_ids.is_empty() {
        return Err(Error::EmptyOperatorSet);
    }

    let topic = Topic::for_operators(session_id.to_hex(), operator_ids);
    messenger
        .create_topic(&topic)
        .await
        .map_err(|e| Error::TopicProvisioningFailed(e.to_string()))?;

    info!(topic = %topic.topic_name, subscribers = ?topic.subscribers, "Topic created");
    Ok(topic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger::MemoryMessenger;

    #[tokio::test]
    async fn test_topic_named_by_session() {
        let messenger = MemoryMessenger::new();
        let session_id = SessionId([0x0f; 16]);

        let topic = provision_topic(&messenger, &session_id, &[1, 2, 3]).await.unwrap();

        assert_eq!(topic.topic_name, "0f".repeat(16));
        assert_eq!(topic.subscribers, vec!["1", "2", "3"]);
        assert_eq!(messenger.get_topic(&topic.topic_name).await.unwrap(), Some(topic));
    }

    #[tokio::test]
    async fn test_failure_is_fatal() {
        let messenger = MemoryMessenger::new().fail_topic_creation();

        let result = provision_topic(&messenger, &SessionId::random(), &[1]).await;

        assert!(matches!(result, Err(Error::TopicProvisioningFailed(_))));
        assert_eq!(messenger.create_topic_calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_operator_set() {
        let messenger = MemoryMessenger::new();

        let result = provision_topic(&messenger, &SessionId::random(), &[]).await;

        assert!(matches!(result, Err(Error::EmptyOperatorSet)));
        assert_eq!(messenger.create_topic_calls(), 0);
    }
}
