use async_trait::async_trait;
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::{Duration, sleep};

use kite_core::command::{AsyncCommand, Command};
use kite_core::dispatch::{self, Dispatcher, LaunchOptions};
use kite_core::events::{EventHandler, WeakEventManager};
use kite_core::observability;

const REFRESHED: &str = "FeedRefreshed";

#[derive(Debug, Clone, Serialize)]
struct FeedRefreshed {
    feed: String,
    items: usize,
}

#[async_trait]
trait FeedSource: Send + Sync {
    async fn fetch(&self, feed: &str) -> anyhow::Result<usize>;
}

/// 最初の `n` 回は失敗するフィード
struct FlakySource {
    remaining_failures: AtomicU32,
}

#[async_trait]
impl FeedSource for FlakySource {
    async fn fetch(&self, feed: &str) -> anyhow::Result<usize> {
        sleep(Duration::from_millis(20)).await;
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            anyhow::bail!("{feed}: upstream unavailable (left={left})");
        }
        Ok(feed.len() * 3)
    }
}

/// 購読者（View 相当）
struct FeedView {
    name: &'static str,
}

impl FeedView {
    fn on_refreshed(&self, _sender: Option<&dyn Any>, args: &FeedRefreshed) {
        let json = serde_json::to_string(args).unwrap_or_default();
        println!("[{}] refreshed: {json}", self.name);
    }
}

/// `KITE_LAUNCH_OPTIONS` (JSON) があればそれを使う
fn launch_options_from_env() -> anyhow::Result<LaunchOptions> {
    match std::env::var("KITE_LAUNCH_OPTIONS") {
        Ok(raw) => Ok(LaunchOptions::from_json(&raw)?),
        Err(_) => Ok(LaunchOptions::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    // (A) 誰も拾わなかった失敗はここに来る
    dispatch::initialize(false);
    dispatch::set_default_exception_handling(|failure| {
        tracing::warn!(launch_id = ?failure.launch_id(), error = %failure, "background failure");
    });

    // (B) イベント登録簿と購読者 2 つ（片方はすぐ破棄する）
    let events: Arc<WeakEventManager<FeedRefreshed>> = Arc::new(WeakEventManager::new());
    let sidebar = Arc::new(FeedView { name: "sidebar" });
    let detail = Arc::new(FeedView { name: "detail" });
    events.add_event_handler(EventHandler::method(&sidebar, FeedView::on_refreshed), REFRESHED)?;
    events.add_event_handler(EventHandler::method(&detail, FeedView::on_refreshed), REFRESHED)?;
    drop(detail);

    // (C) フィード更新コマンド
    let source: Arc<dyn FeedSource> = Arc::new(FlakySource {
        remaining_failures: AtomicU32::new(1),
    });
    let publish = Arc::clone(&events);
    let refresh = AsyncCommand::builder_with_parameter(move |feed: String| {
        let source = Arc::clone(&source);
        let events = Arc::clone(&publish);
        async move {
            let items = source.fetch(&feed).await?;
            events.raise_event(&FeedRefreshed { feed, items }, REFRESHED);
            Ok(())
        }
    })
    .can_execute(|feed: String| !feed.is_empty())
    .allows_multiple_executions(false)
    .launch_options(launch_options_from_env()?)
    .on_exception(|failure| println!("refresh failed: {failure}"))
    .build();

    refresh.can_execute_changed().subscribe(|| println!("can_execute changed"));

    // 型違いの引数は同期で弾かれる
    if let Err(e) = refresh.execute(Some(&42)) {
        println!("rejected: {e}");
    }

    // 1 回目は失敗、2 回目は成功（detail は破棄済みなので sidebar だけに届く）
    for _ in 0..2 {
        let feed = "rust-weekly".to_string();
        if refresh.can_execute(Some(&feed))? {
            refresh.execute_with_handle(Some(&feed))?.await.ok();
        }
    }

    println!(
        "subscriptions for {REFRESHED}: {}",
        events.subscription_count(REFRESHED)
    );
    println!(
        "dispatcher counts: {}",
        serde_json::to_string(&Dispatcher::global().counts())?
    );
    Ok(())
}
