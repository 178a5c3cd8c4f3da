use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub const DRIVER_SENDER: &str = "driver";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    /// Shown locally, not yet handed to the channel.
    Pending,
    Sent,
    /// The channel was closed or the send errored. Kept for a manual resend.
    Failed,
    Received,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatEntry {
    pub id: Uuid,
    pub server_id: Option<String>,
    pub ride_id: String,
    pub text: String,
    pub sender: String,
    pub status: ChatStatus,
    pub timestamp: DateTime<Utc>,
}

/// Messages exchanged with the rider during the current ride. Outgoing
/// messages appear immediately and are settled once the channel reports back.
#[derive(Clone, Debug, Default)]
pub struct ChatLog {
    entries: Vec<ChatEntry>,
}

impl ChatLog {
    pub fn compose(&mut self, ride_id: &str, text: &str) -> Uuid {
        let id = Uuid::new_v4();

        self.entries.push(ChatEntry {
            id,
            server_id: None,
            ride_id: ride_id.into(),
            text: text.into(),
            sender: DRIVER_SENDER.into(),
            status: ChatStatus::Pending,
            timestamp: Utc::now(),
        });

        id
    }

    pub fn confirm(&mut self, id: Uuid) {
        self.set_status(id, ChatStatus::Sent);
    }

    pub fn fail(&mut self, id: Uuid) {
        self.set_status(id, ChatStatus::Failed);
    }

    /// Records a message pushed by the backend. The backend echoes the driver's
    /// own messages; an echo settles the matching local entry instead of
    /// adding a duplicate.
    pub fn receive(
        &mut self,
        server_id: Option<String>,
        ride_id: &str,
        text: &str,
        sender: &str,
        timestamp: Option<DateTime<Utc>>,
    ) {
        if sender == DRIVER_SENDER {
            let echoed = self.entries.iter_mut().find(|entry| {
                entry.sender == DRIVER_SENDER
                    && entry.server_id.is_none()
                    && entry.ride_id == ride_id
                    && entry.text == text
            });

            if let Some(entry) = echoed {
                entry.server_id = server_id.or_else(|| Some(entry.id.to_string()));
                entry.status = ChatStatus::Sent;
                return;
            }
        }

        self.entries.push(ChatEntry {
            id: Uuid::new_v4(),
            server_id,
            ride_id: ride_id.into(),
            text: text.into(),
            sender: sender.into(),
            status: ChatStatus::Received,
            timestamp: timestamp.unwrap_or_else(Utc::now),
        });
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn set_status(&mut self, id: Uuid, status: ChatStatus) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.id == id) {
            entry.status = status;
        }
    }
}

#[test]
fn outgoing_message_settles() {
    let mut log = ChatLog::default();

    let sent = log.compose("R1", "On my way");
    let lost = log.compose("R1", "Here now");
    assert_eq!(log.entries()[0].status, ChatStatus::Pending);

    log.confirm(sent);
    log.fail(lost);

    let statuses: Vec<ChatStatus> = log.entries().iter().map(|e| e.status).collect();
    assert_eq!(statuses, vec![ChatStatus::Sent, ChatStatus::Failed]);
}

#[test]
fn echo_replaces_provisional_entry() {
    let mut log = ChatLog::default();
    log.compose("R1", "On my way");

    log.receive(Some("m-1".into()), "R1", "On my way", "driver", None);
    log.receive(Some("m-2".into()), "R1", "Thanks!", "rider", None);

    assert_eq!(log.entries().len(), 2);
    assert_eq!(log.entries()[0].server_id.as_deref(), Some("m-1"));
    assert_eq!(log.entries()[0].status, ChatStatus::Sent);
    assert_eq!(log.entries()[1].status, ChatStatus::Received);
    assert_eq!(log.entries()[1].sender, "rider");

    log.clear();
    assert!(log.is_empty());
}
