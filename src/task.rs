use crate::auth::{AuthProgress, CredentialProvider, DeviceAuthorization, SsoSession};
use crate::config::{AuthConfig, AuthStore};
use crate::model::{
    AccessTarget, Area, Bucket, CloudContext, Cluster, ClusterBundle, Credentials, Instance,
    InstanceBundle, InstanceVerb, ObjectDetails, ObjectPage,
};
use crate::provider::ResourceProvider;
use anyhow::Result;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Where a task was issued from. A completion only lands if the app is still there.
///
/// `target` names the single resource a detail load is for, and `generation` identifies the
/// app instance that issued the task; both are compared on arrival.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Origin {
    pub area: Area,
    pub scope: Option<String>,
    pub target: Option<String>,
    pub generation: u64,
}

impl Origin {
    pub fn new(area: Area) -> Self {
        Self {
            area,
            scope: None,
            target: None,
            generation: 0,
        }
    }

    pub fn scoped(area: Area, scope: impl Into<String>) -> Self {
        Self {
            scope: Some(scope.into()),
            ..Self::new(area)
        }
    }

    pub fn targeting(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TaskKind {
    SaveAuth(AuthConfig),
    Authenticate { start_url: String, region: String },
    AwaitDeviceToken(DeviceAuthorization),
    LoadAccessTargets(SsoSession),
    SwitchAccount {
        session: SsoSession,
        target: AccessTarget,
    },
    LoadInstances,
    LoadInstanceDetail { id: String },
    MutateInstances {
        verb: InstanceVerb,
        ids: Vec<String>,
    },
    LoadBuckets,
    LoadObjects {
        bucket: String,
        prefix: String,
        token: Option<String>,
    },
    LoadObjectDetail { bucket: String, key: String },
    DownloadObject {
        bucket: String,
        key: String,
        dest: PathBuf,
    },
    DeleteObject { bucket: String, key: String },
    DeleteBucket { bucket: String },
    PresignObject {
        bucket: String,
        key: String,
        expires_secs: u64,
    },
    LoadBucketPolicy { bucket: String },
    LoadBucketVersioning { bucket: String },
    LoadClusters,
    LoadClusterDetail { name: String },
    UpdateKubeconfig { cluster: String },
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Task {
    pub origin: Origin,
    pub context: CloudContext,
    pub kind: TaskKind,
}

pub type Outcome<T> = std::result::Result<T, String>;

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct BulkOutcome {
    pub targeted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub first_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    AuthSaved(Outcome<()>),
    Authenticated(Outcome<AuthProgress>),
    DeviceTokenReady(Outcome<SsoSession>),
    AccessTargetsLoaded(Outcome<Vec<AccessTarget>>),
    AccountSwitched {
        target: AccessTarget,
        result: Outcome<Credentials>,
    },
    InstancesLoaded(Outcome<Vec<Instance>>),
    InstanceDetailLoaded(InstanceBundle),
    InstancesMutated {
        verb: InstanceVerb,
        outcome: BulkOutcome,
    },
    BucketsLoaded(Outcome<Vec<Bucket>>),
    ObjectsLoaded {
        bucket: String,
        prefix: String,
        result: Outcome<ObjectPage>,
    },
    ObjectDetailLoaded(Outcome<ObjectDetails>),
    ObjectDownloaded {
        key: String,
        dest: PathBuf,
        result: Outcome<()>,
    },
    ObjectDeleted { key: String, result: Outcome<()> },
    BucketDeleted { bucket: String, result: Outcome<()> },
    PresignedUrl {
        key: String,
        title: String,
        result: Outcome<String>,
    },
    InfoLoaded {
        title: String,
        result: Outcome<String>,
    },
    ClustersLoaded(Outcome<Vec<Cluster>>),
    ClusterDetailLoaded(ClusterBundle),
    KubeconfigUpdated {
        cluster: String,
        result: Outcome<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub origin: Origin,
    pub event: CompletionEvent,
}

/// Runs tasks on the tokio runtime and reports each one exactly once on its channel.
pub struct Dispatcher<P, C> {
    provider: Arc<P>,
    credentials: Arc<C>,
    auth_store: AuthStore,
    tx: mpsc::UnboundedSender<Completion>,
}

impl<P: ResourceProvider, C: CredentialProvider> Dispatcher<P, C> {
    pub fn new(
        provider: Arc<P>,
        credentials: Arc<C>,
        auth_store: AuthStore,
    ) -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                provider,
                credentials,
                auth_store,
                tx,
            },
            rx,
        )
    }

    pub fn dispatch(&self, task: Task) {
        let provider = Arc::clone(&self.provider);
        let credentials = Arc::clone(&self.credentials);
        let auth_store = self.auth_store.clone();
        let tx = self.tx.clone();
        debug!("dispatching {:?} from {:?}", task.kind, task.origin);

        tokio::spawn(async move {
            let Task {
                origin,
                context,
                kind,
            } = task;
            let event = execute(provider, credentials, auth_store, context, kind).await;
            if tx.send(Completion { origin, event }).is_err() {
                debug!("completion dropped, receiver closed");
            }
        });
    }

    pub fn dispatch_all(&self, tasks: Vec<Task>) {
        for task in tasks {
            self.dispatch(task);
        }
    }
}

async fn execute<P: ResourceProvider, C: CredentialProvider>(
    provider: Arc<P>,
    credentials: Arc<C>,
    auth_store: AuthStore,
    ctx: CloudContext,
    kind: TaskKind,
) -> CompletionEvent {
    match kind {
        TaskKind::SaveAuth(config) => {
            let saved = tokio::task::spawn_blocking(move || auth_store.save(&config)).await;
            CompletionEvent::AuthSaved(match saved {
                Ok(result) => outcome(result),
                Err(error) => Err(format!("auth config writer failed: {error}")),
            })
        }
        TaskKind::Authenticate { start_url, region } => CompletionEvent::Authenticated(outcome(
            credentials.authenticate(&start_url, &region).await,
        )),
        TaskKind::AwaitDeviceToken(pending) => CompletionEvent::DeviceTokenReady(outcome(
            credentials.await_device_token(&pending).await,
        )),
        TaskKind::LoadAccessTargets(session) => CompletionEvent::AccessTargetsLoaded(outcome(
            credentials.list_access_targets(&session).await,
        )),
        TaskKind::SwitchAccount { session, target } => {
            let result = outcome(credentials.get_credentials(&session, &target).await);
            CompletionEvent::AccountSwitched { target, result }
        }
        TaskKind::LoadInstances => {
            CompletionEvent::InstancesLoaded(outcome(provider.list_instances(&ctx).await))
        }
        TaskKind::LoadInstanceDetail { id } => {
            CompletionEvent::InstanceDetailLoaded(load_instance_bundle(provider, ctx, id).await)
        }
        TaskKind::MutateInstances { verb, ids } => CompletionEvent::InstancesMutated {
            verb,
            outcome: mutate_instances(provider.as_ref(), &ctx, verb, &ids).await,
        },
        TaskKind::LoadBuckets => {
            CompletionEvent::BucketsLoaded(outcome(provider.list_buckets(&ctx).await))
        }
        TaskKind::LoadObjects {
            bucket,
            prefix,
            token,
        } => {
            let result = outcome(
                provider
                    .list_objects(&ctx, &bucket, &prefix, token.as_deref())
                    .await,
            );
            CompletionEvent::ObjectsLoaded {
                bucket,
                prefix,
                result,
            }
        }
        TaskKind::LoadObjectDetail { bucket, key } => CompletionEvent::ObjectDetailLoaded(
            outcome(provider.head_object(&ctx, &bucket, &key).await),
        ),
        TaskKind::DownloadObject { bucket, key, dest } => {
            let result = outcome(provider.download_object(&ctx, &bucket, &key, &dest).await);
            CompletionEvent::ObjectDownloaded { key, dest, result }
        }
        TaskKind::DeleteObject { bucket, key } => {
            let result = outcome(provider.delete_object(&ctx, &bucket, &key).await);
            CompletionEvent::ObjectDeleted { key, result }
        }
        TaskKind::DeleteBucket { bucket } => {
            let result = outcome(provider.delete_bucket(&ctx, &bucket).await);
            CompletionEvent::BucketDeleted { bucket, result }
        }
        TaskKind::PresignObject {
            bucket,
            key,
            expires_secs,
        } => {
            let result = outcome(
                provider
                    .presign_object(&ctx, &bucket, &key, expires_secs)
                    .await,
            );
            CompletionEvent::PresignedUrl {
                title: format!("Presigned URL {key} ({expires_secs}s)"),
                key,
                result,
            }
        }
        TaskKind::LoadBucketPolicy { bucket } => CompletionEvent::InfoLoaded {
            title: format!("Bucket policy {bucket}"),
            result: outcome(provider.bucket_policy(&ctx, &bucket).await),
        },
        TaskKind::LoadBucketVersioning { bucket } => CompletionEvent::InfoLoaded {
            title: format!("Versioning {bucket}"),
            result: outcome(provider.bucket_versioning(&ctx, &bucket).await),
        },
        TaskKind::LoadClusters => {
            CompletionEvent::ClustersLoaded(outcome(provider.list_clusters(&ctx).await))
        }
        TaskKind::LoadClusterDetail { name } => {
            CompletionEvent::ClusterDetailLoaded(load_cluster_bundle(provider, ctx, name).await)
        }
        TaskKind::UpdateKubeconfig { cluster } => {
            let result = outcome(provider.update_kubeconfig(&ctx, &cluster).await);
            CompletionEvent::KubeconfigUpdated { cluster, result }
        }
    }
}

fn outcome<T>(result: Result<T>) -> Outcome<T> {
    result.map_err(|error| compact_error(&error))
}

pub fn compact_error(error: &anyhow::Error) -> String {
    let mut out = Vec::new();
    for (index, cause) in error.chain().enumerate() {
        if index == 0 {
            out.push(cause.to_string());
        } else if index <= 2 {
            out.push(format!("caused by: {cause}"));
        } else {
            break;
        }
    }

    out.join("\n")
}

/// Counts arrivals of a fixed number of sub-fetches and keeps the first failure seen.
#[derive(Debug)]
struct FanIn {
    expected: usize,
    received: usize,
    first_error: Option<String>,
}

impl FanIn {
    fn new(expected: usize) -> Self {
        Self {
            expected,
            received: 0,
            first_error: None,
        }
    }

    fn accept<T>(&mut self, label: &str, result: Result<T>) -> Option<T> {
        self.received += 1;
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.fail(format!("{label}: {}", compact_error(&error)));
                None
            }
        }
    }

    fn fail(&mut self, message: String) {
        if self.first_error.is_none() {
            self.first_error = Some(message);
        }
    }

    fn finish(mut self) -> Option<String> {
        if self.received < self.expected {
            let missing = self.expected - self.received;
            self.fail(format!("{missing} sub-fetch(es) never reported"));
        }
        self.first_error
    }
}

enum InstancePart {
    Details(Result<crate::model::InstanceDetails>),
    Status(Result<crate::model::InstanceStatus>),
    Ssm(Result<crate::model::SsmAgent>),
    Metrics(Result<crate::model::InstanceMetrics>),
}

async fn load_instance_bundle<P: ResourceProvider>(
    provider: Arc<P>,
    ctx: CloudContext,
    id: String,
) -> InstanceBundle {
    let mut parts = JoinSet::new();
    {
        let (provider, ctx, id) = (Arc::clone(&provider), ctx.clone(), id.clone());
        parts.spawn(async move {
            InstancePart::Details(provider.describe_instance(&ctx, &id).await)
        });
    }
    {
        let (provider, ctx, id) = (Arc::clone(&provider), ctx.clone(), id.clone());
        parts.spawn(async move { InstancePart::Status(provider.instance_status(&ctx, &id).await) });
    }
    {
        let (provider, ctx, id) = (Arc::clone(&provider), ctx.clone(), id.clone());
        parts.spawn(async move { InstancePart::Ssm(provider.ssm_agent(&ctx, &id).await) });
    }
    {
        let (provider, ctx, id) = (Arc::clone(&provider), ctx.clone(), id.clone());
        parts.spawn(async move {
            InstancePart::Metrics(provider.instance_metrics(&ctx, &id).await)
        });
    }

    let mut fan_in = FanIn::new(4);
    let mut bundle = InstanceBundle {
        instance_id: id,
        ..InstanceBundle::default()
    };
    while let Some(joined) = parts.join_next().await {
        match joined {
            Ok(InstancePart::Details(result)) => bundle.details = fan_in.accept("details", result),
            Ok(InstancePart::Status(result)) => bundle.status = fan_in.accept("status", result),
            Ok(InstancePart::Ssm(result)) => bundle.ssm = fan_in.accept("ssm", result),
            Ok(InstancePart::Metrics(result)) => {
                bundle.metrics = fan_in.accept("metrics", result)
            }
            Err(error) => {
                warn!("instance sub-fetch aborted: {error}");
                fan_in.fail(format!("sub-fetch aborted: {error}"));
            }
        }
    }
    bundle.error = fan_in.finish();
    bundle
}

enum ClusterPart {
    Details(Result<crate::model::ClusterDetails>),
    NodeGroups(Result<Vec<crate::model::NodeGroup>>),
    Addons(Result<Vec<crate::model::Addon>>),
}

async fn load_cluster_bundle<P: ResourceProvider>(
    provider: Arc<P>,
    ctx: CloudContext,
    name: String,
) -> ClusterBundle {
    let mut parts = JoinSet::new();
    {
        let (provider, ctx, name) = (Arc::clone(&provider), ctx.clone(), name.clone());
        parts.spawn(async move {
            ClusterPart::Details(provider.describe_cluster(&ctx, &name).await)
        });
    }
    {
        let (provider, ctx, name) = (Arc::clone(&provider), ctx.clone(), name.clone());
        parts.spawn(async move {
            ClusterPart::NodeGroups(provider.node_groups(&ctx, &name).await)
        });
    }
    {
        let (provider, ctx, name) = (Arc::clone(&provider), ctx.clone(), name.clone());
        parts.spawn(async move { ClusterPart::Addons(provider.addons(&ctx, &name).await) });
    }

    let mut fan_in = FanIn::new(3);
    let mut bundle = ClusterBundle {
        cluster_name: name,
        ..ClusterBundle::default()
    };
    while let Some(joined) = parts.join_next().await {
        match joined {
            Ok(ClusterPart::Details(result)) => bundle.details = fan_in.accept("cluster", result),
            Ok(ClusterPart::NodeGroups(result)) => {
                bundle.node_groups = fan_in.accept("node groups", result)
            }
            Ok(ClusterPart::Addons(result)) => bundle.addons = fan_in.accept("add-ons", result),
            Err(error) => {
                warn!("cluster sub-fetch aborted: {error}");
                fan_in.fail(format!("sub-fetch aborted: {error}"));
            }
        }
    }
    bundle.error = fan_in.finish();
    bundle
}

async fn mutate_instances<P: ResourceProvider>(
    provider: &P,
    ctx: &CloudContext,
    verb: InstanceVerb,
    ids: &[String],
) -> BulkOutcome {
    let results = join_all(
        ids.iter()
            .map(|id| provider.mutate_instance(ctx, id, verb)),
    )
    .await;

    let mut bulk = BulkOutcome {
        targeted: ids.len(),
        ..BulkOutcome::default()
    };
    for (id, result) in ids.iter().zip(results) {
        match result {
            Ok(()) => bulk.succeeded += 1,
            Err(error) => {
                bulk.failed += 1;
                if bulk.first_error.is_none() {
                    bulk.first_error = Some(format!("{id}: {}", compact_error(&error)));
                }
            }
        }
    }
    bulk
}

#[cfg(test)]
mod tests {
    use super::{CompletionEvent, Dispatcher, Origin, Task, TaskKind, mutate_instances};
    use crate::auth::{AuthProgress, CredentialProvider, DeviceAuthorization, SsoSession};
    use crate::config::AuthStore;
    use crate::model::{
        AccessTarget, Addon, Area, Bucket, CloudContext, Cluster, ClusterDetails, Credentials,
        Instance, InstanceDetails, InstanceMetrics, InstanceStatus, InstanceVerb, NodeGroup,
        ObjectDetails, ObjectPage, SsmAgent,
    };
    use crate::provider::ResourceProvider;
    use anyhow::{Result, bail};
    use std::path::Path;
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeCloud {
        failing_ids: Vec<String>,
        node_groups_fail: bool,
    }

    impl ResourceProvider for FakeCloud {
        async fn list_instances(&self, _ctx: &CloudContext) -> Result<Vec<Instance>> {
            Ok(vec![Instance {
                id: "i-1".to_string(),
                ..Instance::default()
            }])
        }

        async fn describe_instance(&self, _ctx: &CloudContext, id: &str) -> Result<InstanceDetails> {
            let mut details = InstanceDetails::default();
            details.instance.id = id.to_string();
            Ok(details)
        }

        async fn instance_status(&self, _ctx: &CloudContext, _id: &str) -> Result<InstanceStatus> {
            bail!("status unavailable")
        }

        async fn ssm_agent(&self, _ctx: &CloudContext, _id: &str) -> Result<SsmAgent> {
            Ok(SsmAgent {
                connected: true,
                ..SsmAgent::default()
            })
        }

        async fn instance_metrics(
            &self,
            _ctx: &CloudContext,
            _id: &str,
        ) -> Result<InstanceMetrics> {
            Ok(InstanceMetrics {
                window_minutes: 5,
                cpu_percent: Some(37.5),
                ..InstanceMetrics::default()
            })
        }

        async fn mutate_instance(
            &self,
            _ctx: &CloudContext,
            id: &str,
            _verb: InstanceVerb,
        ) -> Result<()> {
            if self.failing_ids.iter().any(|failing| failing == id) {
                bail!("denied");
            }
            Ok(())
        }

        async fn list_buckets(&self, _ctx: &CloudContext) -> Result<Vec<Bucket>> {
            Ok(Vec::new())
        }

        async fn list_objects(
            &self,
            _ctx: &CloudContext,
            _bucket: &str,
            _prefix: &str,
            _token: Option<&str>,
        ) -> Result<ObjectPage> {
            Ok(ObjectPage::default())
        }

        async fn head_object(
            &self,
            _ctx: &CloudContext,
            bucket: &str,
            key: &str,
        ) -> Result<ObjectDetails> {
            Ok(ObjectDetails {
                bucket: bucket.to_string(),
                key: key.to_string(),
                ..ObjectDetails::default()
            })
        }

        async fn download_object(
            &self,
            _ctx: &CloudContext,
            _bucket: &str,
            _key: &str,
            _dest: &Path,
        ) -> Result<()> {
            Ok(())
        }

        async fn upload_object(
            &self,
            _ctx: &CloudContext,
            _bucket: &str,
            _key: &str,
            _source: &Path,
        ) -> Result<()> {
            Ok(())
        }

        async fn delete_object(&self, _ctx: &CloudContext, _bucket: &str, _key: &str) -> Result<()> {
            Ok(())
        }

        async fn delete_bucket(&self, _ctx: &CloudContext, _bucket: &str) -> Result<()> {
            bail!("BucketNotEmpty")
        }

        async fn presign_object(
            &self,
            _ctx: &CloudContext,
            bucket: &str,
            key: &str,
            _expires_secs: u64,
        ) -> Result<String> {
            Ok(format!("https://{bucket}.s3.amazonaws.com/{key}?sig"))
        }

        async fn bucket_policy(&self, _ctx: &CloudContext, _bucket: &str) -> Result<String> {
            Ok("{}".to_string())
        }

        async fn bucket_versioning(&self, _ctx: &CloudContext, _bucket: &str) -> Result<String> {
            Ok("Versioning: Enabled".to_string())
        }

        async fn list_clusters(&self, _ctx: &CloudContext) -> Result<Vec<Cluster>> {
            Ok(Vec::new())
        }

        async fn describe_cluster(&self, _ctx: &CloudContext, name: &str) -> Result<ClusterDetails> {
            let mut details = ClusterDetails::default();
            details.cluster.name = name.to_string();
            Ok(details)
        }

        async fn node_groups(&self, _ctx: &CloudContext, _cluster: &str) -> Result<Vec<NodeGroup>> {
            if self.node_groups_fail {
                bail!("AccessDenied on ListNodegroups");
            }
            Ok(Vec::new())
        }

        async fn addons(&self, _ctx: &CloudContext, _cluster: &str) -> Result<Vec<Addon>> {
            Ok(vec![Addon {
                name: "vpc-cni".to_string(),
                ..Addon::default()
            }])
        }

        async fn update_kubeconfig(&self, _ctx: &CloudContext, cluster: &str) -> Result<String> {
            Ok(format!("Updated context {cluster}"))
        }
    }

    impl CredentialProvider for FakeCloud {
        async fn authenticate(&self, _start_url: &str, _region: &str) -> Result<AuthProgress> {
            bail!("offline")
        }

        async fn await_device_token(&self, _pending: &DeviceAuthorization) -> Result<SsoSession> {
            bail!("offline")
        }

        async fn list_access_targets(&self, _session: &SsoSession) -> Result<Vec<AccessTarget>> {
            Ok(Vec::new())
        }

        async fn get_credentials(
            &self,
            _session: &SsoSession,
            _target: &AccessTarget,
        ) -> Result<Credentials> {
            bail!("offline")
        }
    }

    fn dispatcher(
        cloud: FakeCloud,
    ) -> (
        Dispatcher<FakeCloud, FakeCloud>,
        tokio::sync::mpsc::UnboundedReceiver<super::Completion>,
    ) {
        let cloud = Arc::new(cloud);
        let store = AuthStore::new(&std::env::temp_dir().join("cirrus-task-tests"));
        Dispatcher::new(Arc::clone(&cloud), cloud, store)
    }

    fn task(area: Area, kind: TaskKind) -> Task {
        Task {
            origin: Origin::new(area),
            context: CloudContext::new("eu-west-1"),
            kind,
        }
    }

    #[tokio::test]
    async fn cluster_detail_keeps_partial_results_and_first_error() {
        let (dispatcher, mut rx) = dispatcher(FakeCloud {
            node_groups_fail: true,
            ..FakeCloud::default()
        });
        dispatcher.dispatch(task(
            Area::Eks,
            TaskKind::LoadClusterDetail {
                name: "prod".to_string(),
            },
        ));

        let completion = rx.recv().await.expect("one completion");
        assert_eq!(completion.origin, Origin::new(Area::Eks));
        let CompletionEvent::ClusterDetailLoaded(bundle) = completion.event else {
            panic!("unexpected event");
        };
        assert_eq!(bundle.cluster_name, "prod");
        assert!(bundle.details.is_some());
        assert!(bundle.addons.is_some());
        assert!(bundle.node_groups.is_none());
        assert!(
            bundle
                .error
                .as_deref()
                .is_some_and(|error| error.starts_with("node groups: AccessDenied"))
        );
    }

    #[tokio::test]
    async fn instance_detail_reports_failed_status_fetch() {
        let (dispatcher, mut rx) = dispatcher(FakeCloud::default());
        dispatcher.dispatch(task(
            Area::Ec2,
            TaskKind::LoadInstanceDetail {
                id: "i-9".to_string(),
            },
        ));

        let completion = rx.recv().await.expect("one completion");
        let CompletionEvent::InstanceDetailLoaded(bundle) = completion.event else {
            panic!("unexpected event");
        };
        assert!(bundle.details.is_some());
        assert!(bundle.ssm_connected());
        assert_eq!(
            bundle.metrics.as_ref().and_then(|metrics| metrics.cpu_percent),
            Some(37.5)
        );
        assert!(bundle.status.is_none());
        assert_eq!(bundle.error.as_deref(), Some("status: status unavailable"));
    }

    #[tokio::test]
    async fn completion_carries_the_origin_it_was_issued_with() {
        let (dispatcher, mut rx) = dispatcher(FakeCloud::default());
        let mut origin = Origin::new(Area::Ec2).targeting("i-7");
        origin.generation = 3;
        dispatcher.dispatch(Task {
            origin: origin.clone(),
            context: CloudContext::new("eu-west-1"),
            kind: TaskKind::LoadInstanceDetail {
                id: "i-7".to_string(),
            },
        });

        let completion = rx.recv().await.expect("one completion");
        assert_eq!(completion.origin, origin);
    }

    #[tokio::test]
    async fn bulk_counts_cover_every_target() {
        let cloud = FakeCloud {
            failing_ids: vec!["i-2".to_string(), "i-4".to_string()],
            ..FakeCloud::default()
        };
        let ids = (1..=5).map(|n| format!("i-{n}")).collect::<Vec<_>>();
        let ctx = CloudContext::new("eu-west-1");

        let bulk = mutate_instances(&cloud, &ctx, InstanceVerb::Stop, &ids).await;
        assert_eq!(bulk.targeted, 5);
        assert_eq!(bulk.succeeded + bulk.failed, ids.len());
        assert_eq!(bulk.failed, 2);
        assert_eq!(bulk.first_error.as_deref(), Some("i-2: denied"));
    }

    #[tokio::test]
    async fn provider_errors_become_completion_errors() {
        let (dispatcher, mut rx) = dispatcher(FakeCloud::default());
        dispatcher.dispatch(task(
            Area::S3,
            TaskKind::DeleteBucket {
                bucket: "logs".to_string(),
            },
        ));

        let completion = rx.recv().await.expect("one completion");
        assert_eq!(
            completion.event,
            CompletionEvent::BucketDeleted {
                bucket: "logs".to_string(),
                result: Err("BucketNotEmpty".to_string()),
            }
        );
    }
}
