//! Single-file local transport for the event queue: a 4-byte
//! length-prefixed bincode record log plus a parallel offset index, for
//! single-node deployments (spec.md §5's "local" queue kind).
//!
//! File-IO discipline (buffered writer, explicit flush-on-append) is
//! grounded on `bin/backtest_run.rs`'s `BufWriter` usage for its own
//! output log.

use super::EventQueue;
use crate::domain::{QueueEvent, QueueEventWithMeta};
use crate::error::MatcherError;
use async_trait::async_trait;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

struct IndexEntry {
    file_offset: u64,
}

pub struct LocalEventQueue {
    log_path: PathBuf,
    writer: Mutex<BufWriter<std::fs::File>>,
    index: Mutex<Vec<IndexEntry>>,
    closed: std::sync::atomic::AtomicBool,
}

impl LocalEventQueue {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MatcherError> {
        let log_path = path.as_ref().to_path_buf();
        let file = std::fs::OpenOptions::new().create(true).read(true).append(true).open(&log_path)?;
        let index = build_index(&log_path)?;
        let append_handle = std::fs::OpenOptions::new().append(true).open(&log_path)?;
        drop(file);
        Ok(Self {
            log_path,
            writer: Mutex::new(BufWriter::new(append_handle)),
            index: Mutex::new(index),
            closed: std::sync::atomic::AtomicBool::new(false),
        })
    }
}

fn build_index(path: &Path) -> Result<Vec<IndexEntry>, MatcherError> {
    let mut file = std::fs::OpenOptions::new().create(true).read(true).open(path)?;
    let mut index = Vec::new();
    let mut pos = 0u64;
    loop {
        let mut len_buf = [0u8; 4];
        match file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_buf) as u64;
        index.push(IndexEntry { file_offset: pos });
        pos += 4 + len;
        file.seek(SeekFrom::Start(pos))?;
    }
    Ok(index)
}

#[async_trait]
impl EventQueue for LocalEventQueue {
    async fn append(&self, event: QueueEvent, timestamp: u64) -> Result<u64, MatcherError> {
        let meta = QueueEventWithMeta { offset: 0, timestamp, event };
        let mut index = self.index.lock().expect("index mutex poisoned");
        let offset = index.len() as u64;
        let meta = QueueEventWithMeta { offset, ..meta };
        let body = bincode::serialize(&meta)?;
        let len = body.len() as u32;

        let mut writer = self.writer.lock().expect("writer mutex poisoned");
        let file_offset = writer.stream_position()?;
        writer.write_all(&len.to_be_bytes())?;
        writer.write_all(&body)?;
        writer.flush()?;

        index.push(IndexEntry { file_offset });
        Ok(offset)
    }

    async fn last_event_offset(&self) -> Result<Option<u64>, MatcherError> {
        let index = self.index.lock().expect("index mutex poisoned");
        Ok(index.len().checked_sub(1).map(|n| n as u64))
    }

    async fn start_consume(
        &self,
        from_offset: u64,
        handler: Box<dyn Fn(QueueEventWithMeta) -> Result<(), MatcherError> + Send + Sync>,
    ) -> Result<(), MatcherError> {
        let mut file = std::fs::File::open(&self.log_path)?;
        let mut pos = {
            let index = self.index.lock().expect("index mutex poisoned");
            match index.get(from_offset as usize) {
                Some(entry) => entry.file_offset,
                None if from_offset as usize == index.len() => file.seek(SeekFrom::End(0))?,
                None => {
                    return Err(MatcherError::InternalInvariant(format!(
                        "start_consume from_offset {from_offset} is beyond the log's {} entries",
                        index.len()
                    )))
                }
            }
        };
        file.seek(SeekFrom::Start(pos))?;
        // The local transport is a plain file, so catching up to the
        // current end-of-log doesn't mean the queue is done: keep polling
        // for appends until `close` is called, mirroring the remote
        // transport's live-tailing poll loop.
        loop {
            if self.closed.load(std::sync::atomic::Ordering::Acquire) {
                return Ok(());
            }
            let mut len_buf = [0u8; 4];
            match file.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    file.seek(SeekFrom::Start(pos))?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            let mut body = vec![0u8; len];
            file.read_exact(&mut body)?;
            pos += 4 + len as u64;
            let meta: QueueEventWithMeta = bincode::deserialize(&body)?;
            handler(meta)?;
        }
    }

    async fn close(&self) -> Result<(), MatcherError> {
        self.closed.store(true, std::sync::atomic::Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, OrderId};

    #[tokio::test]
    async fn append_assigns_contiguous_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let queue = LocalEventQueue::open(dir.path().join("events.log")).unwrap();
        let ev = QueueEvent::CancelOrder { order_id: OrderId([1; 32]), by: Address([2; 20]) };
        let o1 = queue.append(ev.clone(), 1).await.unwrap();
        let o2 = queue.append(ev, 2).await.unwrap();
        assert_eq!(o1, 0);
        assert_eq!(o2, 1);
        assert_eq!(queue.last_event_offset().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn reopening_rebuilds_index_from_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let ev = QueueEvent::CancelOrder { order_id: OrderId([1; 32]), by: Address([2; 20]) };
        {
            let queue = LocalEventQueue::open(&path).unwrap();
            queue.append(ev.clone(), 1).await.unwrap();
            queue.append(ev, 2).await.unwrap();
        }
        let queue = LocalEventQueue::open(&path).unwrap();
        assert_eq!(queue.last_event_offset().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn start_consume_tails_events_appended_after_replay_catches_up() {
        let dir = tempfile::tempdir().unwrap();
        let queue = std::sync::Arc::new(LocalEventQueue::open(dir.path().join("events.log")).unwrap());
        let ev = QueueEvent::CancelOrder { order_id: OrderId([1; 32]), by: Address([2; 20]) };
        queue.append(ev.clone(), 1).await.unwrap();

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_handler = seen.clone();
        let consume_queue = queue.clone();
        let handle = tokio::spawn(async move {
            consume_queue
                .start_consume(
                    0,
                    Box::new(move |meta| {
                        seen_handler.lock().unwrap().push(meta.offset);
                        Ok(())
                    }),
                )
                .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        queue.append(ev, 2).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        queue.close().await.unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    }
}
