use std::path::PathBuf;
use std::sync::Arc;

use taskflow_core::app::{ConsumerLoop, Producer, TaskProcessor, TaskService};
use taskflow_core::config::{AppConfig, CONFIG_PATH_ENV};
use taskflow_core::impls::{InMemoryChannel, InMemoryTaskStore};
use taskflow_core::observability::init_logging;
use taskflow_core::ports::{FixedDelay, SystemClock, UlidGenerator};
use tokio::time::{Duration, sleep};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // (A) 設定とログ: 引数 > TASKFLOW_CONFIG > デフォルトのみ
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
        .map(PathBuf::from);
    let cfg = AppConfig::load(config_path.as_deref())?;
    init_logging(&cfg.logging);
    info!(app = %cfg.app.name, env = %cfg.app.env, "config loaded");

    // (B) store と channel（開発用の in-memory 実装）
    let store = InMemoryTaskStore::new();
    let channel = InMemoryChannel::with_required_acks(cfg.queue.required_acks);

    // (C) consumer を起動（プロセスの寿命の間 1 本だけ）
    let subscription = channel.subscribe(&cfg.queue.topic, &cfg.queue.group_id).await;
    let processor = TaskProcessor::new(
        Arc::new(store.clone()),
        Arc::new(FixedDelay::new(cfg.worker.processing_delay())),
    );
    let consumer = ConsumerLoop::new(subscription).spawn(Arc::new(processor));
    info!("task worker started");

    // (D) タスク作成（store → publish）
    let producer = Producer::new(
        Arc::new(channel.clone()),
        cfg.queue.topic.clone(),
        cfg.queue.publish_timeout(),
    );
    let service = TaskService::new(
        Arc::new(store.clone()),
        producer,
        Arc::new(UlidGenerator::new(SystemClock)),
    );

    let mut ids = Vec::new();
    for (title, description) in [
        ("write report", "quarterly numbers"),
        ("review PR", "pipeline changes"),
    ] {
        let created = service.create(title, description).await?;
        match &created.enqueue_error {
            // publish に失敗したタスクは created のまま残るので待たない
            Some(err) => println!("created {} but not enqueued: {err}", created.task.id),
            None => ids.push(created.task.id),
        }
    }

    // (E) 全部 done になるまでポーリング（Ctrl-C で中断）
    loop {
        let mut all_done = true;
        for id in &ids {
            if !service.get_by_id(id).await?.status.is_terminal() {
                all_done = false;
            }
        }
        if all_done {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            _ = sleep(Duration::from_millis(200)) => {}
        }
    }

    for task in service.list(0, 0, "").await? {
        println!("{}", serde_json::to_string(&task)?);
    }
    println!("consumer: {:?}", consumer.counts());

    // (F) channel を閉じると consumer は Closed で抜ける
    consumer.request_shutdown();
    channel.close().await;
    if let Err(e) = consumer.join().await {
        info!(error = %e, "consumer exited");
    }
    Ok(())
}
