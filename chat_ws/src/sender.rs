use tokio::sync::mpsc;

use relay_protocol::message::ChannelMessage;

use crate::event::ChatRecord;

/// Hands chat records to the relay task, which publishes them on `channel`.
#[derive(Debug, Clone)]
pub struct ChatSender {
    inner: mpsc::Sender<ChannelMessage>,
    channel: String,
}

impl ChatSender {
    pub fn new(sender: mpsc::Sender<ChannelMessage>, channel: &str) -> Self {
        Self {
            inner: sender,
            channel: channel.to_string(),
        }
    }

    pub(crate) async fn publish(&self, record: &ChatRecord) {
        let payload = match record.to_payload() {
            Ok(payload) => payload,
            Err(err) => {
                error!("Unable to serialize chat record {:?} : {}", record, err);
                return;
            }
        };

        let message = ChannelMessage::new(&self.channel, payload);
        if !message.fits_in_frame() {
            warn!(
                "Dropping chat record from {} : {} bytes exceed the relay frame limit",
                record.user,
                message.payload.len()
            );
            return;
        }

        if let Err(err) = self.inner.send(message).await {
            error!("Relay task is gone, dropping chat record : {}", err);
        }
    }
}

#[cfg(test)]
mod test {
    use tokio::sync::mpsc;

    use relay_protocol::message::MAX_FRAME_LEN;

    use crate::event::ChatRecord;
    use crate::sender::ChatSender;

    #[tokio::test]
    async fn records_bigger_than_a_relay_frame_are_dropped() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = ChatSender::new(tx, "chat");

        sender
            .publish(&ChatRecord::message("alice", &"x".repeat(MAX_FRAME_LEN)))
            .await;
        sender.publish(&ChatRecord::message("alice", "hi")).await;

        let message = rx.recv().await.unwrap();
        assert_eq!(message.channel, "chat");
        assert_eq!(
            ChatRecord::from_payload(&message.payload).unwrap(),
            ChatRecord::message("alice", "hi")
        );
        assert!(rx.try_recv().is_err());
    }
}
