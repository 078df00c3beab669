mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use checkup_core::cache::UpdateCache;
use checkup_core::models::{Snapshot, Update};
use checkup_core::persistence::JsonFileStore;
use checkup_core::sources::UpdateSource;
use checkup_daemon::config::NotifyConfig;
use checkup_daemon::notify::embed::MAX_TOTAL;
use checkup_daemon::notify::{Notifier, WebhookClient, WebhookError, build_payload};
use common::{SwitchableSource, updates};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingClient {
    bodies: Mutex<Vec<serde_json::Value>>,
    failures_left: AtomicUsize,
}

impl RecordingClient {
    fn failing_first(count: usize) -> Arc<Self> {
        let client = Self::default();
        client.failures_left.store(count, Ordering::SeqCst);
        Arc::new(client)
    }

    fn count(&self) -> usize {
        self.bodies.lock().unwrap().len()
    }

    fn body(&self, index: usize) -> serde_json::Value {
        self.bodies.lock().unwrap()[index].clone()
    }
}

impl WebhookClient for RecordingClient {
    fn post(&self, _url: &str, body: &str) -> Result<(), WebhookError> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(WebhookError::Status(500));
        }
        self.bodies
            .lock()
            .unwrap()
            .push(serde_json::from_str(body).unwrap());
        Ok(())
    }
}

fn notify_config(interval: Duration, delta: bool) -> NotifyConfig {
    NotifyConfig {
        webhook_url: "https://discord.invalid/api/webhooks/1".into(),
        interval,
        footer_format: time::format_description::parse_owned::<2>(
            "[year]/[month]/[day] [hour]:[minute]",
        )
        .unwrap(),
        delta,
    }
}

struct Harness {
    cache: Arc<UpdateCache>,
    source: Arc<SwitchableSource>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn start(client: Arc<RecordingClient>, config: NotifyConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source = SwitchableSource::new(updates(&["bash", "linux"]));
        let cache = Arc::new(UpdateCache::new(
            vec![Arc::clone(&source) as Arc<dyn UpdateSource>],
            Arc::new(JsonFileStore::new(dir.path().join("checkup.json"))),
        ));
        let cancel = CancellationToken::new();
        let notifier = Notifier::new(Arc::clone(&cache), client, config, "testhost");
        let task = tokio::spawn(notifier.run(cancel.clone()));
        Self {
            cache,
            source,
            cancel,
            task,
            _dir: dir,
        }
    }

    async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .expect("notifier stops on cancel")
            .unwrap();
    }
}

async fn wait_for_posts(client: &RecordingClient, expected: usize) {
    for _ in 0..150 {
        if client.count() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("expected {expected} posts, saw {}", client.count());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn notifies_on_count_changes_with_throttling() {
    let client = Arc::new(RecordingClient::default());
    let harness = Harness::start(
        Arc::clone(&client),
        notify_config(Duration::from_millis(500), false),
    );

    harness.cache.refresh().await.unwrap();
    wait_for_posts(&client, 1).await;
    let first = client.body(0);
    assert_eq!(first["embeds"][0]["title"], "2 pending updates for testhost");
    assert_eq!(first["embeds"][0]["fields"].as_array().unwrap().len(), 2);
    assert_eq!(first["embeds"][0]["fields"][0]["value"], "1.0-1 -> 2.0-1");
    assert!(
        first["embeds"][0]["footer"]["text"]
            .as_str()
            .unwrap()
            .starts_with("Checked ")
    );

    // Same count: nothing to say.
    harness.cache.refresh().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.count(), 1);

    // Changed, but inside the interval: delivered once it has passed.
    harness.source.set(updates(&["bash", "glibc", "linux"]));
    harness.cache.refresh().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.count(), 1);
    wait_for_posts(&client, 2).await;
    assert_eq!(
        client.body(1)["embeds"][0]["title"],
        "3 pending updates for testhost"
    );

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delta_mode_lists_new_updates_only() {
    let client = Arc::new(RecordingClient::default());
    let harness = Harness::start(Arc::clone(&client), notify_config(Duration::ZERO, true));

    harness.cache.refresh().await.unwrap();
    wait_for_posts(&client, 1).await;

    harness.source.set(updates(&["bash", "linux", "zsh"]));
    harness.cache.refresh().await.unwrap();
    wait_for_posts(&client, 2).await;
    let fields = client.body(1)["embeds"][0]["fields"].clone();
    assert_eq!(fields.as_array().unwrap().len(), 1);
    assert_eq!(fields[0]["name"], "zsh");

    // Fewer updates and nothing new: no notification.
    harness.source.set(updates(&["zsh"]));
    harness.cache.refresh().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.count(), 2);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_delivery_is_retried_after_the_interval() {
    let client = RecordingClient::failing_first(1);
    let harness = Harness::start(
        Arc::clone(&client),
        notify_config(Duration::from_millis(200), false),
    );

    harness.cache.refresh().await.unwrap();
    wait_for_posts(&client, 1).await;
    assert_eq!(
        client.body(0)["embeds"][0]["title"],
        "2 pending updates for testhost"
    );

    harness.stop().await;
}

#[test]
fn oversized_snapshot_degrades_to_count_only() {
    let updates: Vec<Update> = (1..=9001)
        .map(|index| {
            Update::new(format!("Update {index}"), "1.1")
                .old_version("1.0")
                .repo(format!("Repo {index}"))
        })
        .collect();
    let snapshot = Snapshot::new("2024-01-02T03:04:05Z", updates);
    let config = notify_config(Duration::ZERO, false);

    let payload = build_payload("testhost", &snapshot, &snapshot.updates, &config.footer_format);
    let embed = &payload.embeds[0];
    assert_eq!(embed.title, "9001 pending updates for testhost");
    assert!(embed.description.is_empty());
    assert!(embed.fields.is_empty());
    assert!(embed.total_length() <= MAX_TOTAL);

    let json = serde_json::to_value(&payload).unwrap();
    assert_eq!(
        json["embeds"][0]["footer"]["text"],
        "Checked 2024/01/02 03:04"
    );
}
