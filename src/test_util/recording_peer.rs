use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::trace;
use crate::error::TransportResult;
use crate::transport::packet_framer::{PacketRead, PacketReader, PacketWriter};


/// The remote end of a packet stream under test: it records the packets it receives, counting
///  heartbeats separately, and can write well-formed packets or raw bytes.
pub struct RecordingPeer<S> {
    writer: Mutex<WriteHalf<S>>,
    heartbeats: Arc<AtomicUsize>,
    packets: Arc<RwLock<Vec<Bytes>>>,
    ended: watch::Receiver<bool>,
    read_task: JoinHandle<()>,
}

impl <S> Drop for RecordingPeer<S> {
    fn drop(&mut self) {
        // the read half keeps the stream open otherwise
        self.read_task.abort();
    }
}

impl <S: AsyncRead + AsyncWrite + Send + 'static> RecordingPeer<S> {
    pub fn new(stream: S) -> RecordingPeer<S> {
        let (read_half, write_half) = tokio::io::split(stream);

        let heartbeats = Arc::new(AtomicUsize::new(0));
        let packets: Arc<RwLock<Vec<Bytes>>> = Default::default();
        let (ended_sender, ended) = watch::channel(false);

        let read_task = {
            let heartbeats = heartbeats.clone();
            let packets = packets.clone();
            tokio::spawn(async move {
                let mut reader = PacketReader::new(read_half, usize::MAX);
                loop {
                    match reader.read_packet().await {
                        Ok(PacketRead::Packet(packet)) if packet.is_empty() => {
                            heartbeats.fetch_add(1, Ordering::SeqCst);
                        }
                        Ok(PacketRead::Packet(packet)) => {
                            packets.write().await.push(packet);
                        }
                        Ok(PacketRead::StreamEnded) => break,
                        Err(e) => {
                            trace!("peer stops reading: {}", e);
                            break;
                        }
                    }
                }
                ended_sender.send_replace(true);
            })
        };

        RecordingPeer {
            writer: Mutex::new(write_half),
            heartbeats,
            packets,
            ended,
            read_task,
        }
    }

    pub fn num_heartbeats(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }

    /// non-empty packets received so far
    pub async fn packets(&self) -> Vec<Bytes> {
        self.packets.read().await.clone()
    }

    /// waits until the other side closed the stream
    pub async fn ended(&self) {
        let mut ended = self.ended.clone();
        let _ = ended.wait_for(|ended| *ended).await;
    }

    pub async fn write_packet(&self, payload: &[u8]) -> TransportResult<()> {
        let mut writer = self.writer.lock().await;
        PacketWriter::new(&mut *writer, usize::MAX)
            .write_packet(payload)
            .await
    }

    pub async fn write_raw(&self, data: &[u8]) -> TransportResult<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }
}
