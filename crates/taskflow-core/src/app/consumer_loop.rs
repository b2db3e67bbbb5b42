//! ConsumerLoop - メッセージを 1 件ずつ受信して handler を実行
//!
//! # 状態遷移（メッセージごと）
//! received → handling → committed | redelivered
//!
//! - handler 成功: commit して次のメッセージへ
//! - handler 失敗: commit しない。ログだけ出して次のメッセージへ（同じメッセージを
//!   その場でリトライしない）。再配送は channel 側の責務（再起動 / rebalance）
//! - commit 失敗: ログだけ。処理済みのメッセージが再配送されることがある
//! - receive 失敗: 致命的。ループを抜けて呼び出し側に返す
//!
//! 同時に処理するメッセージは常に 1 件（handler の副作用が交錯しない）。

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::status::{ConsumerCounts, ConsumerStats};
use crate::domain::ChannelError;
use crate::ports::{Delivery, MessageHandler, MessageSource};

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("failed to read message: {0}")]
    Channel(#[from] ChannelError),

    #[error("consumer task aborted: {0}")]
    Aborted(String),
}

pub struct ConsumerLoop<S> {
    source: S,
    stats: Arc<ConsumerStats>,
}

impl<S: MessageSource> ConsumerLoop<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Block on the channel forever, handling one message at a time.
    ///
    /// Returns only when `receive` fails.
    pub async fn run<H>(&self, handler: &H) -> Result<(), ChannelError>
    where
        H: MessageHandler + ?Sized,
    {
        info!("starting consumer");
        loop {
            let delivery = self.receive().await?;
            self.dispatch(handler, delivery).await;
        }
    }

    /// Same as `run`, but also stops (between messages) once `shutdown_rx`
    /// flips to `true` or its sender is dropped.
    pub async fn run_until_shutdown<H>(
        &self,
        handler: &H,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), ChannelError>
    where
        H: MessageHandler + ?Sized,
    {
        info!("starting consumer");
        loop {
            if *shutdown_rx.borrow() {
                info!("consumer stopped");
                return Ok(());
            }

            // receive は待つ可能性があるので shutdown と競合させる
            // handler 実行中は shutdown を見ない（途中キャンセルはしない）
            let delivery = tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        info!("consumer handle dropped, stopping");
                        return Ok(());
                    }
                    continue;
                }
                received = self.receive() => received?,
            };

            self.dispatch(handler, delivery).await;
        }
    }

    /// Move the loop onto its own tokio task for the life of the process.
    pub fn spawn<H>(self, handler: Arc<H>) -> ConsumerHandle
    where
        S: 'static,
        H: MessageHandler + ?Sized + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let stats = self.stats();
        let join = tokio::spawn(async move {
            self.run_until_shutdown(&*handler, &mut shutdown_rx)
                .await
        });

        ConsumerHandle {
            shutdown_tx,
            join,
            stats,
        }
    }

    async fn receive(&self) -> Result<Delivery, ChannelError> {
        self.source.receive().await.inspect_err(|e| {
            error!(error = %e, "failed to read message, consumer exiting");
        })
    }

    async fn dispatch<H>(&self, handler: &H, delivery: Delivery)
    where
        H: MessageHandler + ?Sized,
    {
        self.stats.record_received();
        let key = delivery.message.key.as_str();
        let offset = delivery.offset;

        // commit は handler が成功を返した後だけ
        match handler.handle(&delivery.message).await {
            Ok(()) => {
                self.stats.record_handled();
                match self.source.commit(&delivery).await {
                    Ok(()) => self.stats.record_committed(),
                    Err(e) => {
                        self.stats.record_commit_failure();
                        warn!(key, offset, error = %e, "failed to commit message, it may be redelivered");
                    }
                }
            }
            Err(err) => {
                self.stats.record_failed();
                let task_id = err.task_id().map(ToString::to_string);
                let kind = err.kind();
                if kind.is_retryable() {
                    warn!(
                        key,
                        offset,
                        task_id,
                        ?kind,
                        error = %err,
                        "failed to handle message, left uncommitted for redelivery"
                    );
                } else {
                    error!(
                        key,
                        offset,
                        task_id,
                        ?kind,
                        error = %err,
                        "failed to handle message; redelivery will not fix this without operator action"
                    );
                }
            }
        }
    }
}

/// Handle to a spawned consumer.
/// - `request_shutdown()` は次の受信待ちで止めるだけ（処理中の handler はキャンセルしない）
/// - handle を drop しても止まる
pub struct ConsumerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<Result<(), ChannelError>>,
    stats: Arc<ConsumerStats>,
}

impl ConsumerHandle {
    pub fn counts(&self) -> ConsumerCounts {
        self.stats.snapshot()
    }

    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already have exited
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to exit and return why it did.
    pub async fn join(self) -> Result<(), ConsumerError> {
        let ConsumerHandle { shutdown_tx, join, .. } = self;
        let result = join
            .await
            .map_err(|e| ConsumerError::Aborted(e.to_string()))?;
        drop(shutdown_tx);
        result.map_err(ConsumerError::from)
    }

    pub async fn shutdown_and_join(self) -> Result<(), ConsumerError> {
        self.request_shutdown();
        self.join().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::TaskProcessor;
    use crate::domain::{HandleError, Message, Task, TaskId, TaskStatus, WorkError};
    use crate::impls::{InMemoryChannel, InMemoryTaskStore};
    use crate::ports::{FixedDelay, NoWork, Publisher, TaskStore, WorkUnit};
    use async_trait::async_trait;
    use chrono::Utc;
    use rstest::rstest;
    use std::sync::Mutex;
    use std::time::Duration;

    const TOPIC: &str = "tasks";
    const GROUP: &str = "task-workers";

    struct Pipeline {
        channel: InMemoryChannel,
        store: InMemoryTaskStore,
    }

    impl Pipeline {
        async fn with_tasks(ids: &[&str]) -> Self {
            let store = InMemoryTaskStore::new();
            for id in ids {
                store.create(Task::new(TaskId::from(*id), *id, "")).await.unwrap();
            }
            Self {
                channel: InMemoryChannel::new(),
                store,
            }
        }

        async fn publish(&self, id: &str) {
            self.channel
                .publish(TOPIC, Message::for_task(&TaskId::from(id), Utc::now()), Duration::from_secs(1))
                .await
                .unwrap();
        }

        async fn start(&self, work: Arc<dyn WorkUnit>) -> ConsumerHandle {
            let subscription = self.channel.subscribe(TOPIC, GROUP).await;
            let processor = TaskProcessor::new(Arc::new(self.store.clone()), work);
            ConsumerLoop::new(subscription).spawn(Arc::new(processor))
        }

        async fn status(&self, id: &str) -> Option<TaskStatus> {
            self.store.status_of(&TaskId::from(id)).await
        }

        async fn cursor(&self) -> u64 {
            self.channel.cursor(TOPIC, GROUP).await
        }

        async fn acknowledged(&self) -> Vec<u64> {
            self.channel.acknowledged(TOPIC, GROUP).await
        }

        async fn history(&self, id: &str) -> Vec<TaskStatus> {
            self.store.history_for(&TaskId::from(id)).await
        }

        async fn redeliver(&self) {
            self.channel.redeliver_uncommitted(TOPIC, GROUP).await;
        }
    }

    /// One successful pass never moves a task backwards from `created`.
    fn assert_forward_only(history: &[TaskStatus]) {
        history.iter().fold(TaskStatus::Created, |prev, &next| {
            assert!(prev.can_advance_to(next), "{prev} -> {next} in {history:?}");
            next
        });
    }

    /// Wait until `attempts` messages have been handled (either way) and every
    /// success has gone through commit.
    async fn settle(handle: &ConsumerHandle, attempts: u64) -> ConsumerCounts {
        tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                let c = handle.counts();
                if c.handled + c.failed >= attempts && c.committed + c.commit_failures >= c.handled {
                    return c;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("consumer did not settle")
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_processing_then_done_and_one_ack() {
        let p = Pipeline::with_tasks(&["t1"]).await;
        let handle = p
            .start(Arc::new(FixedDelay::new(Duration::from_secs(10))))
            .await;
        assert_eq!(p.status("t1").await, Some(TaskStatus::Created));

        p.publish("t1").await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(p.status("t1").await, Some(TaskStatus::Processing));
        assert!(p.acknowledged().await.is_empty());

        let counts = settle(&handle, 1).await;
        assert_eq!(p.status("t1").await, Some(TaskStatus::Done));
        assert_eq!(p.acknowledged().await, vec![0]);
        assert_eq!(p.cursor().await, 1);
        assert_eq!(counts.committed, 1);
        assert_forward_only(&p.history("t1").await);

        handle.shutdown_and_join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_lets_the_message_in_flight_finish_and_commit() {
        let p = Pipeline::with_tasks(&["t1"]).await;
        let handle = p
            .start(Arc::new(FixedDelay::new(Duration::from_secs(10))))
            .await;

        p.publish("t1").await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(p.status("t1").await, Some(TaskStatus::Processing));

        handle.shutdown_and_join().await.unwrap();

        assert_eq!(p.status("t1").await, Some(TaskStatus::Done));
        assert_eq!(p.cursor().await, 1);
        assert_eq!(p.acknowledged().await, vec![0]);
    }

    #[tokio::test]
    async fn storage_error_is_not_acked_and_redelivery_finishes_the_task() {
        let p = Pipeline::with_tasks(&["t1"]).await;
        p.store.fail_next_updates(1).await;
        let handle = p.start(Arc::new(NoWork)).await;

        p.publish("t1").await;
        let counts = settle(&handle, 1).await;
        assert_eq!(counts.failed, 1);
        assert_eq!(p.cursor().await, 0);
        assert!(p.acknowledged().await.is_empty());
        assert_eq!(p.status("t1").await, Some(TaskStatus::Created));

        p.redeliver().await;
        let counts = settle(&handle, 2).await;
        assert_eq!(counts.committed, 1);
        assert_eq!(p.status("t1").await, Some(TaskStatus::Done));
        assert_eq!(p.acknowledged().await, vec![0]);

        handle.shutdown_and_join().await.unwrap();
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[tokio::test]
    async fn transient_failures_are_retried_until_success(#[case] k: u64) {
        let p = Pipeline::with_tasks(&["t1"]).await;
        p.store.fail_next_updates(k as u32).await;
        let handle = p.start(Arc::new(NoWork)).await;

        p.publish("t1").await;
        for attempt in 1..=k {
            settle(&handle, attempt).await;
            assert_eq!(p.cursor().await, 0);
            p.redeliver().await;
        }
        let counts = settle(&handle, k + 1).await;

        assert_eq!(counts.received, k + 1);
        assert_eq!(counts.failed, k);
        assert_eq!(counts.committed, 1);
        assert_eq!(p.status("t1").await, Some(TaskStatus::Done));
        let history = p.history("t1").await;
        assert_eq!(history, vec![TaskStatus::Processing, TaskStatus::Done]);
        assert_forward_only(&history);

        handle.shutdown_and_join().await.unwrap();
    }

    #[tokio::test]
    async fn missing_task_is_redelivered_until_someone_else_stops_it() {
        let p = Pipeline::with_tasks(&[]).await;
        let handle = p.start(Arc::new(NoWork)).await;

        p.publish("ghost").await;
        settle(&handle, 1).await;

        // The test is the circuit breaker here: the consumer itself never
        // gives up on the message.
        const BREAKER_LIMIT: u64 = 5;
        for attempt in 2..=BREAKER_LIMIT {
            p.redeliver().await;
            let counts = settle(&handle, attempt).await;
            assert_eq!(counts.failed, attempt);
            assert_eq!(p.cursor().await, 0);
        }

        assert!(p.acknowledged().await.is_empty());
        assert!(!handle.is_finished());
        handle.shutdown_and_join().await.unwrap();
    }

    #[tokio::test]
    async fn failed_message_does_not_block_the_next_one() {
        let p = Pipeline::with_tasks(&["t1"]).await;
        let handle = p.start(Arc::new(NoWork)).await;

        p.publish("ghost").await;
        p.publish("t1").await;
        let counts = settle(&handle, 2).await;

        assert_eq!((counts.failed, counts.committed), (1, 1));
        assert_eq!(p.status("t1").await, Some(TaskStatus::Done));
        assert_eq!(p.acknowledged().await, vec![1]);
        // ghost (offset 0) が未 ack なので cursor は進まない
        assert_eq!(p.cursor().await, 0);

        handle.shutdown_and_join().await.unwrap();
    }

    #[tokio::test]
    async fn commit_failure_leads_to_harmless_reprocessing() {
        let p = Pipeline::with_tasks(&["t1"]).await;
        p.channel.fail_next_commits(1).await;
        let handle = p.start(Arc::new(NoWork)).await;

        p.publish("t1").await;
        let counts = settle(&handle, 1).await;
        assert_eq!((counts.handled, counts.commit_failures), (1, 1));
        assert_eq!(p.cursor().await, 0);

        p.redeliver().await;
        let counts = settle(&handle, 2).await;
        assert_eq!(counts.committed, 1);
        assert_eq!(p.status("t1").await, Some(TaskStatus::Done));
        assert_eq!(p.cursor().await, 1);
        // redelivery rewrites done -> processing -> done; the end state is the same
        let history = p.history("t1").await;
        assert_eq!(history.len(), 4);
        assert_forward_only(&history[..2]);
        assert_forward_only(&history[2..]);

        handle.shutdown_and_join().await.unwrap();
    }

    struct RecordingWork {
        events: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl WorkUnit for RecordingWork {
        async fn perform(&self, task_id: &TaskId) -> Result<(), WorkError> {
            self.events.lock().unwrap().push(format!("start:{task_id}"));
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.events.lock().unwrap().push(format!("end:{task_id}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn messages_are_handled_one_at_a_time_in_order() {
        let p = Pipeline::with_tasks(&["t1", "t2"]).await;
        p.publish("t1").await;
        p.publish("t2").await;

        let events = Arc::new(Mutex::new(Vec::new()));
        let handle = p
            .start(Arc::new(RecordingWork {
                events: events.clone(),
            }))
            .await;
        settle(&handle, 2).await;

        assert_eq!(
            *events.lock().unwrap(),
            vec!["start:t1", "end:t1", "start:t2", "end:t2"]
        );
        handle.shutdown_and_join().await.unwrap();
    }

    #[tokio::test]
    async fn channel_read_failure_stops_the_loop_with_the_error() {
        let p = Pipeline::with_tasks(&[]).await;
        let handle = p.start(Arc::new(NoWork)).await;

        p.channel.close().await;

        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, ConsumerError::Channel(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn closure_handler_runs_without_registration() {
        let channel = InMemoryChannel::new();
        let subscription = channel.subscribe(TOPIC, GROUP).await;
        let seen = Arc::new(Mutex::new(Vec::new()));

        let consumer = tokio::spawn({
            let seen = seen.clone();
            async move {
                let handler = move |msg: Message| {
                    let seen = seen.clone();
                    async move {
                        seen.lock().unwrap().push(msg.key);
                        Ok::<(), HandleError>(())
                    }
                };
                ConsumerLoop::new(subscription).run(&handler).await
            }
        });

        channel
            .publish(TOPIC, Message::new("a", "a", Utc::now()), Duration::from_secs(1))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while channel.cursor(TOPIC, GROUP).await < 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        channel.close().await;

        assert_eq!(consumer.await.unwrap(), Err(ChannelError::Closed));
        assert_eq!(*seen.lock().unwrap(), vec!["a".to_string()]);
    }
}
