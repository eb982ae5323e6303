use std::{sync::Arc, time::Duration};

use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, span, warn, Instrument, Level};
use typed_builder::TypedBuilder;

use crate::{
    cluster::{ClusterError, StatusWriter},
    common::{ManagedObject, NamespacedName, ObjectKind},
};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Result of applying a status mutator to the live object.
#[derive(Debug)]
pub enum Mutation {
    Apply(ManagedObject),
    Skip,
}

#[derive(thiserror::Error, Debug)]
pub enum MutatorError {
    #[error("unexpected kind {actual} for {key}")]
    UnexpectedKind { key: String, actual: String },
    #[error("status serialization {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MutatorError {
    pub fn unexpected(object: &ManagedObject) -> Self {
        let key = object.resource_key();
        MutatorError::UnexpectedKind {
            actual: key.kind.clone(),
            key: key.to_string(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StatusError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Mutator(#[from] MutatorError),
    #[error("status updater is not running")]
    Closed,
}

pub type Mutator = Box<dyn Fn(&ManagedObject) -> Result<Mutation, MutatorError> + Send + Sync>;

/// A queued status write.
///
/// `template` is the object as seen when the update was produced; `mutator` is
/// applied to the object re-read at write time.
pub struct StatusUpdate {
    pub kind: ObjectKind,
    pub key: NamespacedName,
    pub template: ManagedObject,
    pub mutator: Mutator,
}

impl StatusUpdate {
    pub fn new<F>(kind: ObjectKind, template: ManagedObject, mutator: F) -> Self
    where
        F: Fn(&ManagedObject) -> Result<Mutation, MutatorError> + Send + Sync + 'static,
    {
        let meta = template.meta();
        let key = NamespacedName::new(meta.namespace.as_deref().unwrap_or_default(), meta.name.as_deref().unwrap_or_default());
        Self {
            kind,
            key,
            template,
            mutator: Box::new(mutator),
        }
    }
}

impl std::fmt::Debug for StatusUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusUpdate").field("kind", &self.kind).field("key", &self.key).finish_non_exhaustive()
    }
}

/// Bounded exponential backoff used for conflicting writes.
#[derive(Clone, Debug, TypedBuilder, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    #[builder(default = 4)]
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[builder(default = 10)]
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[builder(default = 5)]
    #[serde(default = "default_factor")]
    pub factor: u32,
}

fn default_steps() -> u32 {
    4
}

fn default_initial_delay_ms() -> u64 {
    10
}

fn default_factor() -> u32 {
    5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryConfig {
    /// Delays to wait between consecutive attempts, one fewer than `steps`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let factor = u64::from(self.factor.max(1));
        (0..self.steps.saturating_sub(1)).map(move |i| Duration::from_millis(self.initial_delay_ms.saturating_mul(factor.saturating_pow(i))))
    }
}

/// Producer handle of the status pipeline.
#[derive(Clone)]
pub struct StatusUpdater {
    sender: mpsc::Sender<StatusUpdate>,
    started: watch::Receiver<bool>,
}

impl StatusUpdater {
    /// Queues `update`, waiting first for the worker to start and then for queue space.
    pub async fn update(&self, update: StatusUpdate) -> Result<(), StatusError> {
        let mut started = self.started.clone();
        started.wait_for(|started| *started).await.map_err(|_| StatusError::Closed)?;
        debug!("Queueing status update {} {}", update.kind, update.key);
        self.sender.send(update).await.map_err(|_| StatusError::Closed)
    }
}

enum Outcome {
    Written,
    Unchanged,
    Gone,
}

/// The single worker draining the status queue.
pub struct StatusUpdaterService {
    receiver: mpsc::Receiver<StatusUpdate>,
    writer: Arc<dyn StatusWriter>,
    retry: RetryConfig,
    started: watch::Sender<bool>,
}

pub fn status_updater(capacity: usize, writer: Arc<dyn StatusWriter>, retry: RetryConfig) -> (StatusUpdater, StatusUpdaterService) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let (started_sender, started) = watch::channel(false);
    (
        StatusUpdater { sender, started },
        StatusUpdaterService {
            receiver,
            writer,
            retry,
            started: started_sender,
        },
    )
}

impl StatusUpdaterService {
    pub async fn start(mut self, token: CancellationToken) -> crate::Result<()> {
        self.started.send_replace(true);
        info!("Status updater started");
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    info!("Status updater cancelled, {} pending updates dropped", self.receiver.len());
                    break;
                }
                update = self.receiver.recv() => {
                    let Some(update) = update else {
                        break;
                    };
                    let span = span!(Level::INFO, "StatusUpdaterService", kind = %update.kind, id = %update.key);
                    self.process(update, &token).instrument(span).await;
                }
            }
        }
        Ok(())
    }

    async fn process(&self, update: StatusUpdate, token: &CancellationToken) {
        let mut delays = self.retry.delays();
        loop {
            match self.try_apply(&update).await {
                Ok(Outcome::Written) => {
                    info!("Status updated");
                    return;
                },
                Ok(Outcome::Unchanged) => {
                    debug!("Status unchanged");
                    return;
                },
                Ok(Outcome::Gone) => {
                    debug!("Object is gone");
                    return;
                },
                Err(StatusError::Cluster(e)) if e.is_conflict() => {
                    let Some(delay) = delays.next() else {
                        warn!("Giving up after conflicts {e}");
                        return;
                    };
                    debug!("Conflict, retrying in {delay:?}");
                    tokio::select! {
                        () = token.cancelled() => {
                            debug!("Cancelled while backing off");
                            return;
                        }
                        () = tokio::time::sleep(delay) => (),
                    }
                },
                Err(StatusError::Mutator(e)) => {
                    error!("Status mutator failed {} {e}", update.template.resource_key());
                    return;
                },
                Err(e) => {
                    warn!("Status update failed {e}");
                    return;
                },
            }
        }
    }

    async fn try_apply(&self, update: &StatusUpdate) -> Result<Outcome, StatusError> {
        let Some(live) = self.writer.get(update.kind, &update.key).await? else {
            return Ok(Outcome::Gone);
        };

        match (update.mutator)(&live)? {
            Mutation::Skip => Ok(Outcome::Unchanged),
            Mutation::Apply(mut updated) => {
                updated.meta_mut().uid.clone_from(&live.meta().uid);
                self.writer.replace_status(&updated).await?;
                Ok(Outcome::Written)
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use async_trait::async_trait;
    use gateway_api::apis::standard::gateways::{Gateway, GatewayStatus};
    use kube::core::ErrorResponse;

    use super::*;

    /// Status writer over an in-memory object map that records every write.
    #[derive(Default)]
    pub struct RecordingWriter {
        pub objects: Mutex<HashMap<NamespacedName, ManagedObject>>,
        pub writes: Mutex<Vec<ManagedObject>>,
        pub conflicts: AtomicUsize,
    }

    impl RecordingWriter {
        pub fn with(objects: Vec<ManagedObject>) -> Self {
            let objects = objects
                .into_iter()
                .map(|o| (NamespacedName::new(o.meta().namespace.as_deref().unwrap_or_default(), o.meta().name.as_deref().unwrap_or_default()), o))
                .collect();
            Self {
                objects: Mutex::new(objects),
                ..Default::default()
            }
        }

        pub fn writes(&self) -> Vec<ManagedObject> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StatusWriter for RecordingWriter {
        async fn get(&self, _kind: ObjectKind, key: &NamespacedName) -> Result<Option<ManagedObject>, ClusterError> {
            Ok(self.objects.lock().unwrap().get(key).cloned())
        }

        async fn replace_status(&self, object: &ManagedObject) -> Result<(), ClusterError> {
            self.writes.lock().unwrap().push(object.clone());
            if self
                .conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1))
                .is_ok()
            {
                return Err(ClusterError::Api(kube::Error::Api(
                    ErrorResponse {
                        status: "Failure".to_owned(),
                        message: "conflict".to_owned(),
                        reason: "Conflict".to_owned(),
                        code: 409,
                    }
                    .into(),
                )));
            }
            let key = NamespacedName::new(object.meta().namespace.as_deref().unwrap_or_default(), object.meta().name.as_deref().unwrap_or_default());
            self.objects.lock().unwrap().insert(key, object.clone());
            Ok(())
        }
    }

    pub fn gateway(name: &str) -> Gateway {
        serde_yaml::from_str(&format!(
            r"
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: {name}
  namespace: infra
  uid: uid-{name}
  resourceVersion: '7'
spec:
  gatewayClassName: apisix
  listeners:
  - name: http
    port: 80
    protocol: HTTP
"
        ))
        .unwrap()
    }

    fn with_status(object: &ManagedObject) -> Result<Mutation, MutatorError> {
        let ManagedObject::Gateway(gateway) = object else {
            return Err(MutatorError::unexpected(object));
        };
        let mut gateway = gateway.as_ref().clone();
        gateway.metadata.uid = None;
        gateway.status = Some(GatewayStatus::default());
        Ok(Mutation::Apply(gateway.into()))
    }

    async fn run(writer: Arc<RecordingWriter>, updates: Vec<StatusUpdate>) {
        let (updater, service) = status_updater(16, writer, RetryConfig::default());
        let token = CancellationToken::new();
        let worker = tokio::spawn(service.start(token.clone()));
        for update in updates {
            updater.update(update).await.unwrap();
        }
        drop(updater);
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn skipped_mutations_never_write() {
        let writer = Arc::new(RecordingWriter::with(vec![gateway("gw").into()]));
        let update = StatusUpdate::new(ObjectKind::Gateway, gateway("gw").into(), |_| Ok(Mutation::Skip));
        run(Arc::clone(&writer), vec![update]).await;
        assert!(writer.writes().is_empty());
    }

    #[tokio::test]
    async fn conflicts_are_retried_and_uid_is_preserved() {
        let writer = Arc::new(RecordingWriter::with(vec![gateway("gw").into()]));
        writer.conflicts.store(2, Ordering::SeqCst);
        let update = StatusUpdate::new(ObjectKind::Gateway, gateway("gw").into(), with_status);
        run(Arc::clone(&writer), vec![update]).await;

        let writes = writer.writes();
        assert_eq!(writes.len(), 3);
        for write in &writes {
            assert_eq!(write.uid(), Some("uid-gw"));
        }
        let stored = writer.objects.lock().unwrap().get(&NamespacedName::new("infra", "gw")).cloned().unwrap();
        let ManagedObject::Gateway(stored) = stored else { panic!("gateway expected") };
        assert!(stored.status.is_some());
    }

    #[tokio::test]
    async fn conflicts_give_up_after_backoff() {
        let writer = Arc::new(RecordingWriter::with(vec![gateway("gw").into()]));
        writer.conflicts.store(100, Ordering::SeqCst);
        let update = StatusUpdate::new(ObjectKind::Gateway, gateway("gw").into(), with_status);
        run(Arc::clone(&writer), vec![update]).await;
        assert_eq!(writer.writes().len(), 4);
    }

    #[tokio::test]
    async fn deleted_objects_and_bad_mutators_are_dropped() {
        let writer = Arc::new(RecordingWriter::with(vec![gateway("gw").into()]));
        let missing = StatusUpdate::new(ObjectKind::Gateway, gateway("missing").into(), with_status);
        let failing = StatusUpdate::new(ObjectKind::Gateway, gateway("gw").into(), |o| Err(MutatorError::unexpected(o)));
        let good = StatusUpdate::new(ObjectKind::Gateway, gateway("gw").into(), with_status);
        run(Arc::clone(&writer), vec![missing, failing, good]).await;
        assert_eq!(writer.writes().len(), 1);
    }

    #[tokio::test]
    async fn update_waits_for_the_worker() {
        let writer = Arc::new(RecordingWriter::with(vec![gateway("gw").into()]));
        let (updater, service) = status_updater(16, writer, RetryConfig::default());
        let pending = tokio::time::timeout(Duration::from_millis(20), updater.update(StatusUpdate::new(ObjectKind::Gateway, gateway("gw").into(), |_| Ok(Mutation::Skip)))).await;
        assert!(pending.is_err());

        let token = CancellationToken::new();
        let worker = tokio::spawn(service.start(token.clone()));
        updater.update(StatusUpdate::new(ObjectKind::Gateway, gateway("gw").into(), |_| Ok(Mutation::Skip))).await.unwrap();
        token.cancel();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_backoff() {
        let writer = Arc::new(RecordingWriter::with(vec![gateway("gw").into()]));
        writer.conflicts.store(100, Ordering::SeqCst);
        let retry = RetryConfig::builder().initial_delay_ms(60_000).build();
        let (updater, service) = status_updater(16, Arc::clone(&writer) as _, retry);
        let token = CancellationToken::new();
        let worker = tokio::spawn(service.start(token.clone()));

        updater.update(StatusUpdate::new(ObjectKind::Gateway, gateway("gw").into(), with_status)).await.unwrap();
        for _ in 0..100 {
            if !writer.writes().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(writer.writes().len(), 1);

        token.cancel();
        let stopped = tokio::time::timeout(Duration::from_secs(1), worker).await;
        assert!(matches!(stopped, Ok(Ok(Ok(())))));
    }

    #[test]
    fn backoff_is_bounded() {
        let delays: Vec<_> = RetryConfig::default().delays().collect();
        assert_eq!(delays, vec![Duration::from_millis(10), Duration::from_millis(50), Duration::from_millis(250)]);
    }
}
