use crate::job::JobId;
use crate::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};

/// Lifecycle states of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Lifecycle states of a node within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Skipped
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Messages streamed to clients while a job runs.
///
/// Externally tagged on purpose: the binary wire encoding cannot represent
/// internally tagged enums.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMessage {
    JobUpdate {
        job_id: JobId,
        status: JobStatus,
        error: Option<String>,
    },
    NodeUpdate {
        node_id: String,
        node_name: String,
        status: NodeStatus,
        error: Option<String>,
    },
    NodeProgress {
        node_id: String,
        progress: u64,
        total: u64,
    },
    Error {
        message: String,
    },
}

impl UpdateMessage {
    /// True for the JobUpdate that ends a run. Transports close the stream
    /// after forwarding it.
    pub fn is_terminal_job_update(&self) -> bool {
        matches!(self, UpdateMessage::JobUpdate { status, .. } if status.is_terminal())
    }
}

/// Destination for updates produced during a run
pub trait UpdateSink: Send + Sync {
    fn post(&self, update: UpdateMessage);
}

/// Broadcast-backed update channel. The ring is bounded; when a subscriber
/// falls behind, the oldest messages are dropped for that subscriber and the
/// newest are kept.
pub struct UpdateBus {
    sender: broadcast::Sender<UpdateMessage>,
}

impl UpdateBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdateMessage> {
        self.sender.subscribe()
    }

    pub fn post(&self, update: UpdateMessage) {
        // No subscribers is fine; updates are fire-and-forget.
        let _ = self.sender.send(update);
    }
}

impl UpdateSink for UpdateBus {
    fn post(&self, update: UpdateMessage) {
        UpdateBus::post(self, update);
    }
}

/// Collects updates in memory. Stands in for a transport in tests.
#[derive(Default)]
pub struct MemorySink {
    messages: Mutex<Vec<UpdateMessage>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<UpdateMessage> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn drain(&self) -> Vec<UpdateMessage> {
        self.messages
            .lock()
            .map(|mut m| std::mem::take(&mut *m))
            .unwrap_or_default()
    }
}

impl UpdateSink for MemorySink {
    fn post(&self, update: UpdateMessage) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(update);
        }
    }
}

/// Forwards updates into a channel whose receiver a transport task owns.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<UpdateMessage>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::UnboundedSender<UpdateMessage>) -> Self {
        Self { sender }
    }
}

impl UpdateSink for ChannelSink {
    fn post(&self, update: UpdateMessage) {
        // A dropped receiver means the transport went away mid-run.
        let _ = self.sender.send(update);
    }
}

/// Upper bound on a single frame payload. Updates are small; anything past
/// this is a corrupt or hostile stream.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

pub fn encode_update(update: &UpdateMessage) -> crate::Result<Vec<u8>> {
    bincode::serialize(update).map_err(|e| EngineError::Frame(e.to_string()))
}

pub fn decode_update(bytes: &[u8]) -> crate::Result<UpdateMessage> {
    bincode::deserialize(bytes).map_err(|e| EngineError::Frame(e.to_string()))
}

/// Write one length-prefixed frame: u32 little-endian payload length, then
/// the payload, flushed.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> crate::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN as usize {
        return Err(EngineError::Frame(format!(
            "payload of {} bytes exceeds frame limit",
            payload.len()
        )));
    }
    writer.write_u32_le(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the stream ended cleanly at a frame
/// boundary; EOF anywhere else is an error.
pub async fn read_frame<R>(reader: &mut R) -> crate::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(EngineError::Frame("truncated frame length".to_string()));
        }
        filled += n;
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(EngineError::Frame(format!(
            "frame of {} bytes exceeds limit",
            len
        )));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn update_encoding_round_trips() {
        let update = UpdateMessage::NodeUpdate {
            node_id: "n1".to_string(),
            node_name: "AddThree".to_string(),
            status: NodeStatus::Failed,
            error: Some("boom".to_string()),
        };
        let bytes = encode_update(&update).unwrap();
        assert_eq!(decode_update(&bytes).unwrap(), update);
    }

    #[tokio::test]
    async fn frames_survive_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let update = UpdateMessage::JobUpdate {
            job_id: Uuid::new_v4(),
            status: JobStatus::Completed,
            error: None,
        };
        let bytes = encode_update(&update).unwrap();
        write_frame(&mut client, &bytes).await.unwrap();
        write_frame(&mut client, &bytes).await.unwrap();
        drop(client);

        let first = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(decode_update(&first).unwrap(), update);
        let second = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(decode_update(&second).unwrap(), update);
        // Clean EOF at the frame boundary.
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_length_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut client, &[1, 0])
            .await
            .unwrap();
        drop(client);
        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, EngineError::Frame(_)));
    }

    #[tokio::test]
    async fn truncated_payload_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut client, &8u32.to_le_bytes())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut client, &[1, 2, 3])
            .await
            .unwrap();
        drop(client);
        assert!(read_frame(&mut server).await.is_err());
    }

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.post(UpdateMessage::Error {
            message: "a".to_string(),
        });
        sink.post(UpdateMessage::Error {
            message: "b".to_string(),
        });
        let messages = sink.snapshot();
        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[0], UpdateMessage::Error { message } if message == "a"));
    }
}
