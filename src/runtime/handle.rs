//! Single-writer runtime: one task owns the [`EventLog`], a second batches
//! journal writes to the sink.

use std::sync::Arc;

use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    time::{Duration, Instant},
};

use crate::{
    clock::TimeOfDay,
    core::store::{EventLog, LogSnapshotV1, StoreError},
    engine::timing::{Recomputation, recompute},
    event::{EventDraft, EventRecord, RawEvent},
    op::{Op, StoredOp},
    persist::{OpSink, StorageError},
    types::{OpSeq, TeamId},
};

use super::events::LogEvent;

/// Runtime API errors.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// In-memory log refused the command.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Persistence failed or the queue is full.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Runtime task has stopped.
    #[error("runtime channel closed")]
    ChannelClosed,
}

/// Batching and snapshot policy for the runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Flush the batch as soon as an append arrives.
    pub flush_on_append: bool,
    /// Flush once this many ops are buffered.
    pub batch_max_ops: usize,
    /// Flush a non-empty batch after this many milliseconds.
    pub batch_max_latency_ms: u64,
    /// Capacity of the writer-to-persistence queue.
    pub persist_queue_bound: usize,
    /// Automatic snapshot cadence in appends (0 disables).
    pub snapshot_every_ops: usize,
    /// Compact the journal after each snapshot.
    pub compact_after_snapshot: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_on_append: true,
            batch_max_ops: 32,
            batch_max_latency_ms: 75,
            persist_queue_bound: 64,
            snapshot_every_ops: 2000,
            compact_after_snapshot: false,
        }
    }
}

/// Cloneable handle shared by every operator; all writes go through one task.
#[derive(Clone)]
pub struct EventLogHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<LogEvent>,
}

enum Command {
    Append {
        draft: EventDraft,
        resp: oneshot::Sender<Result<EventRecord, RuntimeError>>,
    },
    StartRace {
        teams: Vec<(TeamId, String)>,
        at: TimeOfDay,
        resp: oneshot::Sender<Result<Vec<EventRecord>, RuntimeError>>,
    },
    UndoLast {
        resp: oneshot::Sender<Result<EventRecord, RuntimeError>>,
    },
    Clear {
        resp: oneshot::Sender<Result<usize, RuntimeError>>,
    },
    Archive {
        label: String,
        resp: oneshot::Sender<Result<Vec<EventRecord>, RuntimeError>>,
    },
    ReadAll {
        resp: oneshot::Sender<Vec<EventRecord>>,
    },
    Recent {
        n: usize,
        resp: oneshot::Sender<Vec<EventRecord>>,
    },
    ByTeam {
        team_id: String,
        resp: oneshot::Sender<Vec<EventRecord>>,
    },
    Flush {
        resp: oneshot::Sender<Result<OpSeq, RuntimeError>>,
    },
    Checkpoint {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

enum PersistMsg {
    Op(StoredOp),
    Flush {
        resp: oneshot::Sender<Result<OpSeq, StorageError>>,
    },
    Checkpoint {
        snapshot: LogSnapshotV1,
        last_seq: OpSeq,
        compact: bool,
        resp: oneshot::Sender<Result<(), StorageError>>,
    },
    Archive {
        label: String,
        events: Vec<EventRecord>,
        resp: oneshot::Sender<Result<(), StorageError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Spawns the writer task (and a persistence worker when `sink` is given).
///
/// Must be called inside a tokio runtime.
pub fn spawn_event_log(
    log: EventLog,
    sink: Option<Box<dyn OpSink>>,
    config: RuntimeConfig,
) -> EventLogHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (events_tx, _) = broadcast::channel::<LogEvent>(1024);

    let (persist_tx_opt, mut durable_rx) = if let Some(sink) = sink {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound);
        let (durable_tx, durable_rx) = mpsc::unbounded_channel::<Result<OpSeq, StorageError>>();
        spawn_persistence_worker(sink, persist_rx, durable_tx, config.clone());
        (Some(persist_tx), Some(durable_rx))
    } else {
        (None, None)
    };

    let events_tx_loop = events_tx.clone();

    tokio::spawn(async move {
        let mut log = log;
        let mut ops_since_snapshot = 0usize;

        loop {
            if let Some(rx) = durable_rx.as_mut() {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else { break; };
                        let done = handle_command(
                            cmd,
                            &mut log,
                            &events_tx_loop,
                            persist_tx_opt.as_ref(),
                            &config,
                            &mut ops_since_snapshot,
                        ).await;

                        if done {
                            break;
                        }
                    }
                    durable = rx.recv() => {
                        match durable {
                            Some(Ok(op_seq)) => {
                                let _ = events_tx_loop.send(LogEvent::DurableUpTo { op_seq });
                            }
                            Some(Err(err)) => tracing::warn!(error = %err, "journal write failed"),
                            None => {}
                        }
                    }
                }
            } else {
                let Some(cmd) = cmd_rx.recv().await else { break; };
                let done = handle_command(
                    cmd,
                    &mut log,
                    &events_tx_loop,
                    persist_tx_opt.as_ref(),
                    &config,
                    &mut ops_since_snapshot,
                ).await;
                if done {
                    break;
                }
            }
        }
    });

    EventLogHandle {
        cmd_tx,
        events_tx,
    }
}

impl EventLogHandle {
    /// Subscribes to [`LogEvent`]s.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events_tx.subscribe()
    }

    /// Appends one arrival.
    pub async fn append(&self, draft: EventDraft) -> Result<EventRecord, RuntimeError> {
        self.request(|resp| Command::Append { draft, resp }).await?
    }

    /// Parses a storage-shaped row, then appends it.
    pub async fn append_raw(&self, raw: RawEvent) -> Result<EventRecord, RuntimeError> {
        let draft = EventDraft::try_from(raw).map_err(StoreError::from)?;
        self.append(draft).await
    }

    /// Appends one `Start` per team as a single op.
    pub async fn start_race(
        &self,
        teams: Vec<(TeamId, String)>,
        at: TimeOfDay,
    ) -> Result<Vec<EventRecord>, RuntimeError> {
        self.request(|resp| Command::StartRace { teams, at, resp }).await?
    }

    /// Removes the newest event.
    pub async fn undo_last(&self) -> Result<EventRecord, RuntimeError> {
        self.request(|resp| Command::UndoLast { resp }).await?
    }

    /// Truncates the log; returns how many events were dropped.
    pub async fn clear(&self) -> Result<usize, RuntimeError> {
        self.request(|resp| Command::Clear { resp }).await?
    }

    /// Saves the events under `label` in the sink, then clears the log.
    pub async fn archive(&self, label: impl Into<String>) -> Result<Vec<EventRecord>, RuntimeError> {
        let label = label.into();
        self.request(|resp| Command::Archive { label, resp }).await?
    }

    /// Every event in insertion order.
    pub async fn read_all(&self) -> Result<Vec<EventRecord>, RuntimeError> {
        self.request(|resp| Command::ReadAll { resp }).await
    }

    /// Up to `n` newest events.
    pub async fn recent(&self, n: usize) -> Result<Vec<EventRecord>, RuntimeError> {
        self.request(|resp| Command::Recent { n, resp }).await
    }

    /// One team's events.
    pub async fn by_team(&self, team_id: impl Into<String>) -> Result<Vec<EventRecord>, RuntimeError> {
        let team_id = team_id.into();
        self.request(|resp| Command::ByTeam { team_id, resp }).await
    }

    /// Recomputes figures over a fresh snapshot, outside the writer task.
    pub async fn recompute(&self, now: TimeOfDay) -> Result<Recomputation, RuntimeError> {
        let events = self.read_all().await?;
        Ok(recompute(&events, now))
    }

    /// Persists everything buffered; returns the durable op sequence.
    pub async fn flush(&self) -> Result<OpSeq, RuntimeError> {
        self.request(|resp| Command::Flush { resp }).await?
    }

    /// Writes a snapshot (and compacts when configured).
    pub async fn checkpoint(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Checkpoint { resp }).await?
    }

    /// Flushes and stops both tasks.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Shutdown { resp }).await?
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }
}

async fn handle_command(
    cmd: Command,
    log: &mut EventLog,
    events_tx: &broadcast::Sender<LogEvent>,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
    config: &RuntimeConfig,
    ops_since_snapshot: &mut usize,
) -> bool {
    match cmd {
        Command::Append { draft, resp } => {
            let res = log.append(draft).map_err(RuntimeError::from).and_then(|(record, stored)| {
                commit(log, &stored, Vec::new(), persist_tx, events_tx)?;
                let _ = events_tx.send(LogEvent::Appended {
                    seq: record.seq,
                    team_id: record.team_id.clone(),
                });
                Ok(record)
            });
            if res.is_ok() {
                *ops_since_snapshot += 1;
                maybe_auto_checkpoint(log, persist_tx, config, ops_since_snapshot).await;
            }
            let _ = resp.send(res);
        }
        Command::StartRace { teams, at, resp } => {
            let res = log
                .start_race(&teams, at)
                .map_err(RuntimeError::from)
                .and_then(|(records, stored)| {
                    commit(log, &stored, Vec::new(), persist_tx, events_tx)?;
                    let _ = events_tx.send(LogEvent::RaceStarted {
                        teams: records.len(),
                    });
                    Ok(records)
                });
            if res.is_ok() {
                *ops_since_snapshot += 1;
            }
            let _ = resp.send(res);
        }
        Command::UndoLast { resp } => {
            let res = log
                .undo_last()
                .map_err(RuntimeError::from)
                .and_then(|(removed, stored)| {
                    commit(log, &stored, vec![removed.clone()], persist_tx, events_tx)?;
                    let _ = events_tx.send(LogEvent::Undone { seq: removed.seq });
                    Ok(removed)
                });
            let _ = resp.send(res);
        }
        Command::Clear { resp } => {
            let dropped = log.events_cloned();
            let removed = dropped.len();
            let stored = log.clear();
            let res = commit(log, &stored, dropped, persist_tx, events_tx).map(|()| {
                let _ = events_tx.send(LogEvent::Cleared { removed });
                removed
            });
            let _ = resp.send(res);
        }
        Command::Archive { label, resp } => {
            let saved = match persist_tx {
                Some(tx) => {
                    let (ar_tx, ar_rx) = oneshot::channel();
                    let msg = PersistMsg::Archive {
                        label,
                        events: log.events_cloned(),
                        resp: ar_tx,
                    };
                    if tx.send(msg).await.is_err() {
                        Err(RuntimeError::ChannelClosed)
                    } else {
                        ar_rx
                            .await
                            .map_err(|_| RuntimeError::ChannelClosed)
                            .and_then(|r| r.map_err(RuntimeError::from))
                    }
                }
                None => Ok(()),
            };

            let res = saved.and_then(|()| {
                let (archived, stored) = log.archive();
                commit(log, &stored, archived.clone(), persist_tx, events_tx)?;
                let _ = events_tx.send(LogEvent::Cleared {
                    removed: archived.len(),
                });
                Ok(archived)
            });
            let _ = resp.send(res);
        }
        Command::ReadAll { resp } => {
            let _ = resp.send(log.events_cloned());
        }
        Command::Recent { n, resp } => {
            let _ = resp.send(log.recent(n).to_vec());
        }
        Command::ByTeam { team_id, resp } => {
            let _ = resp.send(log.by_team_cloned(&team_id));
        }
        Command::Flush { resp } => {
            let out = if let Some(tx) = persist_tx {
                let (flush_tx, flush_rx) = oneshot::channel();
                if tx
                    .send(PersistMsg::Flush { resp: flush_tx })
                    .await
                    .is_err()
                {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    flush_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::from))
                }
            } else {
                Ok(log.latest_op_seq())
            };
            let _ = resp.send(out);
        }
        Command::Checkpoint { resp } => {
            let out = if let Some(tx) = persist_tx {
                let snapshot = log.export_snapshot();
                let last_seq = log.latest_op_seq();
                let (cp_tx, cp_rx) = oneshot::channel();
                if tx
                    .send(PersistMsg::Checkpoint {
                        snapshot,
                        last_seq,
                        compact: config.compact_after_snapshot,
                        resp: cp_tx,
                    })
                    .await
                    .is_err()
                {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    cp_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::from))
                }
            } else {
                Ok(())
            };
            if out.is_ok() {
                *ops_since_snapshot = 0;
            }
            let _ = resp.send(out);
        }
        Command::Shutdown { resp } => {
            let out = if let Some(tx) = persist_tx {
                let (done_tx, done_rx) = oneshot::channel();
                let send_res = tx.send(PersistMsg::Shutdown { resp: done_tx }).await;
                if send_res.is_err() {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    match done_rx.await {
                        Ok(()) => Ok(()),
                        Err(_) => Err(RuntimeError::ChannelClosed),
                    }
                }
            } else {
                Ok(())
            };
            let _ = resp.send(out);
            return true;
        }
    }

    false
}

/// Queues `stored` for persistence, reverting it in memory when the queue
/// refuses it so the caller's `Err` means "nothing happened".
fn commit(
    log: &mut EventLog,
    stored: &StoredOp,
    dropped: Vec<EventRecord>,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
    events_tx: &broadcast::Sender<LogEvent>,
) -> Result<(), RuntimeError> {
    if let Err(err) = persist_pending(log, persist_tx, events_tx) {
        if !log.rollback_unpersisted(stored, dropped) {
            tracing::warn!(op_seq = stored.seq, "queued op could not be rolled back");
        }
        return Err(err);
    }
    Ok(())
}

/// Hands every pending op to the persistence worker. Ops that do not fit in
/// the queue stay pending and go out with the next mutation.
fn persist_pending(
    log: &mut EventLog,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
    events_tx: &broadcast::Sender<LogEvent>,
) -> Result<(), RuntimeError> {
    let ops = log.drain_pending_ops();
    let Some(tx) = persist_tx else {
        let _ = events_tx.send(LogEvent::DurableUpTo {
            op_seq: log.latest_op_seq(),
        });
        return Ok(());
    };

    for (idx, stored) in ops.iter().enumerate() {
        if let Err(err) = tx.try_send(PersistMsg::Op(stored.clone())) {
            log.requeue_pending_ops(ops[idx..].to_vec());
            return Err(RuntimeError::Storage(StorageError::Unavailable(format!(
                "persist queue error: {err}"
            ))));
        }
    }
    Ok(())
}

fn spawn_persistence_worker(
    sink: Box<dyn OpSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<Result<OpSeq, StorageError>>,
    config: RuntimeConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        let mut buf = Vec::<StoredOp>::new();
        let mut deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
        let mut last_durable: OpSeq = 0;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Op(stored) => {
                            let is_append = matches!(stored.op, Op::Append { .. });
                            buf.push(stored);

                            if buf.len() >= config.batch_max_ops || (config.flush_on_append && is_append) {
                                let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                                deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                            }
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(result.map(|_| last_durable));
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Checkpoint { snapshot, last_seq, compact, resp } => {
                            let result = match flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await {
                                Err(err) => Err(err),
                                Ok(()) => {
                                    run_blocking(&sink, move |sink| {
                                        sink.write_snapshot(&snapshot, last_seq)?;
                                        if compact {
                                            let removed = sink.compact_through(last_seq)?;
                                            tracing::debug!(removed, through = last_seq, "journal compacted");
                                        }
                                        Ok(())
                                    }).await
                                }
                            };
                            let _ = resp.send(result);
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Archive { label, events, resp } => {
                            let result = match flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await {
                                Err(err) => Err(err),
                                Ok(()) => run_blocking(&sink, move |sink| sink.write_archive(&label, &events)).await,
                            };
                            let _ = resp.send(result);
                        }
                        PersistMsg::Shutdown { resp } => {
                            let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, false).await;
                    deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                }
            }
        }
    });
}

async fn run_blocking<T: Send + 'static>(
    sink: &Arc<Mutex<Box<dyn OpSink>>>,
    work: impl FnOnce(&mut Box<dyn OpSink>) -> Result<T, StorageError> + Send + 'static,
) -> Result<T, StorageError> {
    let sink_ref = Arc::clone(sink);
    tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        work(&mut *sink)
    })
    .await
    .map_err(|e| StorageError::Message(format!("join error: {e}")))?
}

async fn flush_buf(
    sink: &Arc<Mutex<Box<dyn OpSink>>>,
    buf: &mut Vec<StoredOp>,
    last_durable: &mut OpSeq,
    durable_tx: &mpsc::UnboundedSender<Result<OpSeq, StorageError>>,
    call_flush: bool,
) -> Result<(), StorageError> {
    if buf.is_empty() {
        if call_flush {
            run_blocking(sink, |sink| sink.flush()).await?;
        }
        return Ok(());
    }

    // The batch stays buffered until the sink accepts it, so a failed
    // write is retried on the next flush instead of leaving a journal gap.
    let ops = buf.clone();
    let append_res = run_blocking(sink, move |sink| {
        let seq = sink.append_ops(&ops)?;
        if call_flush {
            sink.flush()?;
        }
        Ok(seq)
    })
    .await;

    match append_res {
        Ok(seq) => {
            buf.clear();
            *last_durable = (*last_durable).max(seq);
            let _ = durable_tx.send(Ok(*last_durable));
            Ok(())
        }
        Err(err) => {
            tracing::warn!(ops = buf.len(), error = %err, "journal batch kept for retry");
            let _ = durable_tx.send(Err(StorageError::Message(format!("append failed: {err}"))));
            Err(err)
        }
    }
}

async fn maybe_auto_checkpoint(
    log: &EventLog,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
    config: &RuntimeConfig,
    ops_since_snapshot: &mut usize,
) {
    if config.snapshot_every_ops == 0 || *ops_since_snapshot < config.snapshot_every_ops {
        return;
    }

    let Some(tx) = persist_tx else {
        return;
    };

    let snapshot = log.export_snapshot();
    let last_seq = log.latest_op_seq();
    let (cp_tx, cp_rx) = oneshot::channel();
    if tx
        .send(PersistMsg::Checkpoint {
            snapshot,
            last_seq,
            compact: config.compact_after_snapshot,
            resp: cp_tx,
        })
        .await
        .is_ok()
    {
        let _ = cp_rx.await;
        *ops_since_snapshot = 0;
    }
}
