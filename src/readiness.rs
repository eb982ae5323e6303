use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use kube::{
    api::{ApiResource, DynamicObject, GroupVersionKind, ListParams},
    Api, Client, Resource,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::NamespacedName;

#[derive(thiserror::Error, Debug)]
pub enum ReadinessError {
    #[error("kinds can only be registered before start")]
    AlreadyStarted,
    #[error("listing {0} failed {1}")]
    Listing(KindKey, kube::Error),
    #[error("readiness state is poisoned")]
    LockingError,
}

/// Hashable identity of a group/version/kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KindKey {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl From<&GroupVersionKind> for KindKey {
    fn from(gvk: &GroupVersionKind) -> Self {
        Self {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
        }
    }
}

impl KindKey {
    pub fn of<K: Resource<DynamicType = ()>>() -> Self {
        Self {
            group: K::group(&()).into_owned(),
            version: K::version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }
}

impl Display for KindKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.kind)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

pub type InstanceFilter = Arc<dyn Fn(&DynamicObject) -> bool + Send + Sync>;

/// Lists the live instances of a kind.
#[async_trait]
pub trait ObjectLister: Send + Sync {
    async fn list(&self, kind: &KindKey) -> Result<Vec<DynamicObject>, ReadinessError>;
}

pub struct KubeObjectLister {
    client: Client,
}

impl KubeObjectLister {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectLister for KubeObjectLister {
    async fn list(&self, kind: &KindKey) -> Result<Vec<DynamicObject>, ReadinessError> {
        let resource = ApiResource::from_gvk(&kind.gvk());
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
        let objects = api.list(&ListParams::default()).await.map_err(|e| ReadinessError::Listing(kind.clone(), e))?;
        Ok(objects.items)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadinessPhase {
    Initializing,
    Started,
    Ready,
}

struct Registration {
    kind: KindKey,
    filter: Option<InstanceFilter>,
}

struct Inner {
    lister: Arc<dyn ObjectLister>,
    registrations: Mutex<Vec<Registration>>,
    pending: Mutex<HashMap<KindKey, HashSet<NamespacedName>>>,
    starting: AtomicBool,
    ready: AtomicBool,
    phase: watch::Sender<ReadinessPhase>,
}

/// One-shot barrier that opens once every object present at startup was reconciled once.
#[derive(Clone)]
pub struct ReadinessManager {
    inner: Arc<Inner>,
}

fn instance_name(object: &DynamicObject) -> NamespacedName {
    NamespacedName::new(object.metadata.namespace.as_deref().unwrap_or_default(), object.metadata.name.as_deref().unwrap_or_default())
}

pub fn object_name<K: Resource>(object: &K) -> NamespacedName {
    let meta = object.meta();
    NamespacedName::new(meta.namespace.as_deref().unwrap_or_default(), meta.name.as_deref().unwrap_or_default())
}

impl ReadinessManager {
    pub fn new(lister: Arc<dyn ObjectLister>) -> Self {
        let (phase, _) = watch::channel(ReadinessPhase::Initializing);
        Self {
            inner: Arc::new(Inner {
                lister,
                registrations: Mutex::new(vec![]),
                pending: Mutex::new(HashMap::new()),
                starting: AtomicBool::new(false),
                ready: AtomicBool::new(false),
                phase,
            }),
        }
    }

    pub fn phase(&self) -> ReadinessPhase {
        *self.inner.phase.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    pub fn register_gvk(&self, gvk: &GroupVersionKind, filter: Option<InstanceFilter>) -> Result<(), ReadinessError> {
        if self.inner.starting.load(Ordering::Acquire) {
            return Err(ReadinessError::AlreadyStarted);
        }
        let mut registrations = self.inner.registrations.lock().map_err(|_| ReadinessError::LockingError)?;
        registrations.push(Registration { kind: KindKey::from(gvk), filter });
        Ok(())
    }

    pub fn register<K: Resource<DynamicType = ()>>(&self, filter: Option<InstanceFilter>) -> Result<(), ReadinessError> {
        self.register_gvk(&KindKey::of::<K>().gvk(), filter)
    }

    /// Seeds the pending set from the live objects of every registered kind.
    /// Only the first caller lists; a failed start can be retried.
    pub async fn start(&self) -> Result<(), ReadinessError> {
        if self.inner.starting.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(ReadinessError::AlreadyStarted);
        }
        let result = self.seed().await;
        if result.is_err() {
            self.inner.starting.store(false, Ordering::Release);
        }
        result
    }

    async fn seed(&self) -> Result<(), ReadinessError> {
        let registrations: Vec<(KindKey, Option<InstanceFilter>)> = {
            let registrations = self.inner.registrations.lock().map_err(|_| ReadinessError::LockingError)?;
            registrations.iter().map(|r| (r.kind.clone(), r.filter.clone())).collect()
        };

        let mut seeded: HashMap<KindKey, HashSet<NamespacedName>> = HashMap::new();
        for (kind, filter) in registrations {
            let objects = self.inner.lister.list(&kind).await?;
            let names: HashSet<_> = objects.iter().filter(|o| filter.as_ref().is_none_or(|f| f(o))).map(instance_name).collect();
            debug!("Readiness waits for {} instances of {kind}", names.len());
            seeded.entry(kind).or_default().extend(names);
        }

        let empty = {
            let mut pending = self.inner.pending.lock().map_err(|_| ReadinessError::LockingError)?;
            seeded.retain(|_, names| !names.is_empty());
            *pending = seeded;
            pending.is_empty()
        };

        self.inner.phase.send_replace(ReadinessPhase::Started);
        info!("Readiness started");
        if empty {
            self.mark_ready();
        }
        Ok(())
    }

    /// Records the first reconciliation of one instance.
    pub async fn done(&self, kind: &GroupVersionKind, name: &NamespacedName) {
        self.drain(kind, |names| {
            if names.remove(name) {
                debug!("Readiness done {name}");
            }
        })
        .await;
    }

    /// Closes the initial listing of a watcher: instances seeded at start that the
    /// listing did not deliver were deleted in between and are no longer awaited.
    pub async fn settle(&self, kind: &GroupVersionKind, delivered: &HashSet<NamespacedName>) {
        self.drain(kind, |names| {
            names.retain(|name| {
                let keep = delivered.contains(name);
                if !keep {
                    debug!("Readiness drops vanished {name}");
                }
                keep
            });
        })
        .await;
    }

    pub async fn settle_for<K: Resource<DynamicType = ()>>(&self, delivered: &HashSet<NamespacedName>) {
        self.settle(&KindKey::of::<K>().gvk(), delivered).await;
    }

    async fn drain(&self, kind: &GroupVersionKind, update: impl FnOnce(&mut HashSet<NamespacedName>)) {
        if self.is_ready() {
            return;
        }

        let mut phase = self.inner.phase.subscribe();
        if phase.wait_for(|p| *p != ReadinessPhase::Initializing).await.is_err() {
            return;
        }

        let drained = {
            let Ok(mut pending) = self.inner.pending.lock() else {
                warn!("Readiness state is poisoned");
                return;
            };
            let kind = KindKey::from(kind);
            if let Some(names) = pending.get_mut(&kind) {
                update(names);
                if names.is_empty() {
                    pending.remove(&kind);
                }
            }
            pending.is_empty()
        };

        if drained {
            self.mark_ready();
        }
    }

    pub async fn done_for<K: Resource<DynamicType = ()>>(&self, object: &K) {
        self.done(&KindKey::of::<K>().gvk(), &object_name(object)).await;
    }

    /// Waits until started and then ready; false on timeout or cancellation.
    pub async fn wait_ready(&self, token: &CancellationToken, timeout: Duration) -> bool {
        let mut phase = self.inner.phase.subscribe();
        let wait = async {
            if phase.wait_for(|p| *p != ReadinessPhase::Initializing).await.is_err() {
                return false;
            }
            phase.wait_for(|p| *p == ReadinessPhase::Ready).await.is_ok()
        };
        tokio::select! {
            () = token.cancelled() => false,
            result = tokio::time::timeout(timeout, wait) => result.unwrap_or(false),
        }
    }

    fn mark_ready(&self) {
        if !self.inner.ready.swap(true, Ordering::AcqRel) {
            self.inner.phase.send_replace(ReadinessPhase::Ready);
            info!("Readiness reached");
        }
    }
}
