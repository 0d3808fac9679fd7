use crate::model::{
    Addon, Bucket, CloudContext, Cluster, ClusterDetails, Instance, InstanceDetails,
    InstanceMetrics, InstanceStatus, InstanceVerb, NodeGroup, ObjectDetails, ObjectPage, SsmAgent,
};
use anyhow::Result;
use std::future::Future;
use std::path::Path;

/// Remote resource operations. Every call gets the cloud context it should run under, so an
/// implementation holds no session state of its own.
pub trait ResourceProvider: Send + Sync + 'static {
    fn list_instances(
        &self,
        ctx: &CloudContext,
    ) -> impl Future<Output = Result<Vec<Instance>>> + Send;

    fn describe_instance(
        &self,
        ctx: &CloudContext,
        id: &str,
    ) -> impl Future<Output = Result<InstanceDetails>> + Send;

    fn instance_status(
        &self,
        ctx: &CloudContext,
        id: &str,
    ) -> impl Future<Output = Result<InstanceStatus>> + Send;

    fn ssm_agent(
        &self,
        ctx: &CloudContext,
        id: &str,
    ) -> impl Future<Output = Result<SsmAgent>> + Send;

    fn instance_metrics(
        &self,
        ctx: &CloudContext,
        id: &str,
    ) -> impl Future<Output = Result<InstanceMetrics>> + Send;

    fn mutate_instance(
        &self,
        ctx: &CloudContext,
        id: &str,
        verb: InstanceVerb,
    ) -> impl Future<Output = Result<()>> + Send;

    fn list_buckets(&self, ctx: &CloudContext) -> impl Future<Output = Result<Vec<Bucket>>> + Send;

    fn list_objects(
        &self,
        ctx: &CloudContext,
        bucket: &str,
        prefix: &str,
        token: Option<&str>,
    ) -> impl Future<Output = Result<ObjectPage>> + Send;

    fn head_object(
        &self,
        ctx: &CloudContext,
        bucket: &str,
        key: &str,
    ) -> impl Future<Output = Result<ObjectDetails>> + Send;

    fn download_object(
        &self,
        ctx: &CloudContext,
        bucket: &str,
        key: &str,
        dest: &Path,
    ) -> impl Future<Output = Result<()>> + Send;

    fn upload_object(
        &self,
        ctx: &CloudContext,
        bucket: &str,
        key: &str,
        source: &Path,
    ) -> impl Future<Output = Result<()>> + Send;

    fn delete_object(
        &self,
        ctx: &CloudContext,
        bucket: &str,
        key: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn delete_bucket(
        &self,
        ctx: &CloudContext,
        bucket: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn presign_object(
        &self,
        ctx: &CloudContext,
        bucket: &str,
        key: &str,
        expires_secs: u64,
    ) -> impl Future<Output = Result<String>> + Send;

    fn bucket_policy(
        &self,
        ctx: &CloudContext,
        bucket: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    fn bucket_versioning(
        &self,
        ctx: &CloudContext,
        bucket: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    fn list_clusters(&self, ctx: &CloudContext)
    -> impl Future<Output = Result<Vec<Cluster>>> + Send;

    fn describe_cluster(
        &self,
        ctx: &CloudContext,
        name: &str,
    ) -> impl Future<Output = Result<ClusterDetails>> + Send;

    fn node_groups(
        &self,
        ctx: &CloudContext,
        cluster: &str,
    ) -> impl Future<Output = Result<Vec<NodeGroup>>> + Send;

    fn addons(
        &self,
        ctx: &CloudContext,
        cluster: &str,
    ) -> impl Future<Output = Result<Vec<Addon>>> + Send;

    fn update_kubeconfig(
        &self,
        ctx: &CloudContext,
        cluster: &str,
    ) -> impl Future<Output = Result<String>> + Send;
}
