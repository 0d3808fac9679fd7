use crate::model::{
    Addon, Bucket, CloudContext, Cluster, ClusterDetails, Instance, InstanceDetails,
    InstanceMetrics, InstanceStatus, InstanceVerb, NodeGroup, ObjectDetails, ObjectPage, S3Object,
    SsmAgent, Tag,
};
use crate::provider::ResourceProvider;
use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command as TokioCommand;
use tracing::debug;

const OBJECT_PAGE_SIZE: &str = "500";
const DESCRIBE_CONCURRENCY: usize = 6;
const METRIC_WINDOW_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Statistic {
    Average,
    Sum,
    Maximum,
}

impl Statistic {
    fn as_str(self) -> &'static str {
        match self {
            Self::Average => "Average",
            Self::Sum => "Sum",
            Self::Maximum => "Maximum",
        }
    }
}

/// Metrics fetched for the instance detail view, in `InstanceMetrics` field order.
const INSTANCE_METRICS: [(&str, Statistic); 6] = [
    ("CPUUtilization", Statistic::Average),
    ("NetworkIn", Statistic::Sum),
    ("NetworkOut", Statistic::Sum),
    ("DiskReadBytes", Statistic::Sum),
    ("DiskWriteBytes", Statistic::Sum),
    ("StatusCheckFailed", Statistic::Maximum),
];

/// Resource provider backed by the `aws` command line client.
#[derive(Debug, Clone)]
pub struct AwsCli {
    binary: String,
}

impl AwsCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, ctx: &CloudContext, args: &[&str]) -> TokioCommand {
        let mut cmd = TokioCommand::new(&self.binary);
        cmd.args(args)
            .envs(context_env(ctx))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    pub(crate) async fn run(&self, ctx: &CloudContext, args: &[&str]) -> Result<String> {
        let operation = args.iter().take(2).copied().collect::<Vec<_>>().join(" ");
        debug!("aws {operation}");
        let output = self
            .command(ctx, args)
            .output()
            .await
            .with_context(|| format!("failed to execute {} {operation}", self.binary))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("no error output");
        Err(anyhow::anyhow!(
            "aws {operation} exited with {}: {reason}",
            output.status
        ))
    }

    pub(crate) async fn json<T: DeserializeOwned + Default>(
        &self,
        ctx: &CloudContext,
        args: &[&str],
    ) -> Result<T> {
        let mut full = args.to_vec();
        full.extend(["--output", "json"]);
        let raw = self.run(ctx, &full).await?;
        if raw.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse aws {} output", args.join(" ")))
    }

    async fn bucket_region(&self, ctx: &CloudContext, bucket: &str) -> String {
        let location = self
            .json::<BucketLocation>(ctx, &["s3api", "get-bucket-location", "--bucket", bucket])
            .await;
        match location {
            Ok(location) => location
                .location_constraint
                .filter(|region| !region.is_empty())
                .unwrap_or_else(|| "us-east-1".to_string()),
            Err(_) => String::new(),
        }
    }
}

/// Environment that points an `aws` invocation (or a child session) at `ctx`.
pub fn context_env(ctx: &CloudContext) -> Vec<(&'static str, String)> {
    let mut env = vec![
        ("AWS_PAGER", String::new()),
        ("AWS_REGION", ctx.region.clone()),
        ("AWS_DEFAULT_REGION", ctx.region.clone()),
    ];
    if let Some(credentials) = &ctx.credentials {
        env.push(("AWS_ACCESS_KEY_ID", credentials.access_key_id.clone()));
        env.push(("AWS_SECRET_ACCESS_KEY", credentials.secret_access_key.clone()));
        if let Some(token) = &credentials.session_token {
            env.push(("AWS_SESSION_TOKEN", token.clone()));
        }
    } else if let Some(profile) = &ctx.profile {
        env.push(("AWS_PROFILE", profile.clone()));
    }
    env
}

impl ResourceProvider for AwsCli {
    async fn list_instances(&self, ctx: &CloudContext) -> Result<Vec<Instance>> {
        let output: DescribeInstances = self.json(ctx, &["ec2", "describe-instances"]).await?;
        let mut instances = output
            .reservations
            .into_iter()
            .flat_map(|reservation| reservation.instances)
            .map(|raw| raw.into_details().instance)
            .collect::<Vec<_>>();
        instances.sort_by(|left, right| left.name.cmp(&right.name).then(left.id.cmp(&right.id)));
        Ok(instances)
    }

    async fn describe_instance(&self, ctx: &CloudContext, id: &str) -> Result<InstanceDetails> {
        let output: DescribeInstances = self
            .json(ctx, &["ec2", "describe-instances", "--instance-ids", id])
            .await?;
        output
            .reservations
            .into_iter()
            .flat_map(|reservation| reservation.instances)
            .next()
            .map(RawInstance::into_details)
            .with_context(|| format!("instance {id} not found"))
    }

    async fn instance_status(&self, ctx: &CloudContext, id: &str) -> Result<InstanceStatus> {
        let output: DescribeInstanceStatus = self
            .json(
                ctx,
                &[
                    "ec2",
                    "describe-instance-status",
                    "--include-all-instances",
                    "--instance-ids",
                    id,
                ],
            )
            .await?;
        Ok(output
            .instance_statuses
            .into_iter()
            .next()
            .map(|raw| InstanceStatus {
                instance_state: raw.instance_state.name,
                system_status: raw.system_status.status,
                instance_status: raw.instance_status.status,
            })
            .unwrap_or_else(|| InstanceStatus {
                instance_state: "unknown".to_string(),
                system_status: "unknown".to_string(),
                instance_status: "unknown".to_string(),
            }))
    }

    async fn ssm_agent(&self, ctx: &CloudContext, id: &str) -> Result<SsmAgent> {
        let filter = format!("Key=InstanceIds,Values={id}");
        let output: DescribeInstanceInformation = self
            .json(
                ctx,
                &["ssm", "describe-instance-information", "--filters", &filter],
            )
            .await?;
        Ok(output
            .instance_information_list
            .into_iter()
            .next()
            .map(|raw| SsmAgent {
                connected: raw.ping_status == "Online",
                ping_status: raw.ping_status,
                agent_version: raw.agent_version,
                platform: raw.platform_name,
            })
            .unwrap_or_else(|| SsmAgent {
                connected: false,
                ping_status: "Not registered".to_string(),
                ..SsmAgent::default()
            }))
    }

    async fn instance_metrics(&self, ctx: &CloudContext, id: &str) -> Result<InstanceMetrics> {
        let end = Utc::now();
        let start = end - TimeDelta::minutes(METRIC_WINDOW_MINUTES);
        let start = start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end = end.to_rfc3339_opts(SecondsFormat::Secs, true);
        let period = (METRIC_WINDOW_MINUTES * 60).to_string();
        let dimension = format!("Name=InstanceId,Value={id}");
        let (start, end, period, dimension) = (&start, &end, &period, &dimension);

        let values = stream::iter(INSTANCE_METRICS)
            .map(|(metric, statistic)| async move {
                let output: MetricStatistics = self
                    .json(
                        ctx,
                        &[
                            "cloudwatch",
                            "get-metric-statistics",
                            "--namespace",
                            "AWS/EC2",
                            "--metric-name",
                            metric,
                            "--dimensions",
                            dimension.as_str(),
                            "--start-time",
                            start.as_str(),
                            "--end-time",
                            end.as_str(),
                            "--period",
                            period.as_str(),
                            "--statistics",
                            statistic.as_str(),
                        ],
                    )
                    .await
                    .with_context(|| format!("failed to read {metric}"))?;
                Ok::<_, anyhow::Error>(output.latest(statistic))
            })
            .buffered(DESCRIBE_CONCURRENCY)
            .boxed()
            .try_collect::<Vec<_>>()
            .await?;

        let &[cpu, network_in, network_out, disk_read, disk_write, status_check] =
            values.as_slice()
        else {
            bail!("expected {} metrics, got {}", INSTANCE_METRICS.len(), values.len());
        };
        Ok(InstanceMetrics {
            window_minutes: METRIC_WINDOW_MINUTES,
            cpu_percent: cpu,
            network_in_bytes: network_in,
            network_out_bytes: network_out,
            disk_read_bytes: disk_read,
            disk_write_bytes: disk_write,
            status_check_failed: status_check,
        })
    }

    async fn mutate_instance(
        &self,
        ctx: &CloudContext,
        id: &str,
        verb: InstanceVerb,
    ) -> Result<()> {
        self.run(ctx, &["ec2", verb.cli_operation(), "--instance-ids", id])
            .await
            .map(|_| ())
    }

    async fn list_buckets(&self, ctx: &CloudContext) -> Result<Vec<Bucket>> {
        let output: ListBuckets = self.json(ctx, &["s3api", "list-buckets"]).await?;
        let buckets = stream::iter(output.buckets)
            .map(|raw| async move {
                let region = self.bucket_region(ctx, &raw.name).await;
                Bucket {
                    created: raw.creation_date.as_deref().and_then(parse_time),
                    name: raw.name,
                    region,
                }
            })
            .buffered(DESCRIBE_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;
        Ok(buckets)
    }

    async fn list_objects(
        &self,
        ctx: &CloudContext,
        bucket: &str,
        prefix: &str,
        token: Option<&str>,
    ) -> Result<ObjectPage> {
        let mut args = vec![
            "s3api",
            "list-objects-v2",
            "--bucket",
            bucket,
            "--delimiter",
            "/",
            "--max-items",
            OBJECT_PAGE_SIZE,
        ];
        if !prefix.is_empty() {
            args.extend(["--prefix", prefix]);
        }
        if let Some(token) = token {
            args.extend(["--starting-token", token]);
        }
        let output: ListObjects = self.json(ctx, &args).await?;
        Ok(output.into_page(prefix))
    }

    async fn head_object(
        &self,
        ctx: &CloudContext,
        bucket: &str,
        key: &str,
    ) -> Result<ObjectDetails> {
        let output: HeadObject = self
            .json(ctx, &["s3api", "head-object", "--bucket", bucket, "--key", key])
            .await?;
        Ok(ObjectDetails {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: output.content_length,
            last_modified: output.last_modified.as_deref().and_then(parse_time),
            content_type: output.content_type,
            etag: output.e_tag.trim_matches('"').to_string(),
            storage_class: output
                .storage_class
                .unwrap_or_else(|| "STANDARD".to_string()),
            metadata: output.metadata,
        })
    }

    async fn download_object(
        &self,
        ctx: &CloudContext,
        bucket: &str,
        key: &str,
        dest: &Path,
    ) -> Result<()> {
        let source = format!("s3://{bucket}/{key}");
        let dest = dest.to_string_lossy();
        self.run(ctx, &["s3", "cp", &source, &dest, "--only-show-errors"])
            .await
            .map(|_| ())
    }

    async fn upload_object(
        &self,
        ctx: &CloudContext,
        bucket: &str,
        key: &str,
        source: &Path,
    ) -> Result<()> {
        let dest = format!("s3://{bucket}/{key}");
        let source = source.to_string_lossy();
        self.run(ctx, &["s3", "cp", &source, &dest, "--only-show-errors"])
            .await
            .map(|_| ())
    }

    async fn delete_object(&self, ctx: &CloudContext, bucket: &str, key: &str) -> Result<()> {
        self.run(ctx, &["s3api", "delete-object", "--bucket", bucket, "--key", key])
            .await
            .map(|_| ())
    }

    async fn delete_bucket(&self, ctx: &CloudContext, bucket: &str) -> Result<()> {
        self.run(ctx, &["s3api", "delete-bucket", "--bucket", bucket])
            .await
            .map(|_| ())
    }

    async fn presign_object(
        &self,
        ctx: &CloudContext,
        bucket: &str,
        key: &str,
        expires_secs: u64,
    ) -> Result<String> {
        let target = format!("s3://{bucket}/{key}");
        let expires = expires_secs.to_string();
        let url = self
            .run(ctx, &["s3", "presign", &target, "--expires-in", &expires])
            .await?;
        Ok(url.trim().to_string())
    }

    async fn bucket_policy(&self, ctx: &CloudContext, bucket: &str) -> Result<String> {
        let result = self
            .json::<BucketPolicy>(ctx, &["s3api", "get-bucket-policy", "--bucket", bucket])
            .await;
        match result {
            Ok(policy) => Ok(pretty_json(&policy.policy)),
            Err(error) if error.to_string().contains("NoSuchBucketPolicy") => {
                Ok("No bucket policy configured".to_string())
            }
            Err(error) => Err(error),
        }
    }

    async fn bucket_versioning(&self, ctx: &CloudContext, bucket: &str) -> Result<String> {
        let output: BucketVersioning = self
            .json(ctx, &["s3api", "get-bucket-versioning", "--bucket", bucket])
            .await?;
        let status = output.status.unwrap_or_else(|| "Disabled".to_string());
        Ok(match output.mfa_delete {
            Some(mfa) => format!("Versioning: {status}\nMFA delete: {mfa}"),
            None => format!("Versioning: {status}"),
        })
    }

    async fn list_clusters(&self, ctx: &CloudContext) -> Result<Vec<Cluster>> {
        let output: ListClusters = self.json(ctx, &["eks", "list-clusters"]).await?;
        let mut clusters = stream::iter(output.clusters)
            .map(|name| async move { self.describe_cluster(ctx, &name).await })
            .buffered(DESCRIBE_CONCURRENCY)
            .map_ok(|details| details.cluster)
            .try_collect::<Vec<_>>()
            .await?;
        clusters.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(clusters)
    }

    async fn describe_cluster(&self, ctx: &CloudContext, name: &str) -> Result<ClusterDetails> {
        let output: DescribeCluster = self
            .json(ctx, &["eks", "describe-cluster", "--name", name])
            .await?;
        Ok(output.cluster.into_details(&ctx.region))
    }

    async fn node_groups(&self, ctx: &CloudContext, cluster: &str) -> Result<Vec<NodeGroup>> {
        let output: ListNodegroups = self
            .json(ctx, &["eks", "list-nodegroups", "--cluster-name", cluster])
            .await?;
        stream::iter(output.nodegroups)
            .map(|name| async move {
                let described: DescribeNodegroup = self
                    .json(
                        ctx,
                        &[
                            "eks",
                            "describe-nodegroup",
                            "--cluster-name",
                            cluster,
                            "--nodegroup-name",
                            &name,
                        ],
                    )
                    .await?;
                let raw = described.nodegroup;
                Ok::<_, anyhow::Error>(NodeGroup {
                    name: raw.nodegroup_name,
                    status: raw.status,
                    instance_types: raw.instance_types,
                    desired: raw.scaling_config.desired_size,
                    min: raw.scaling_config.min_size,
                    max: raw.scaling_config.max_size,
                })
            })
            .buffered(DESCRIBE_CONCURRENCY)
            .try_collect()
            .await
    }

    async fn addons(&self, ctx: &CloudContext, cluster: &str) -> Result<Vec<Addon>> {
        let output: ListAddons = self
            .json(ctx, &["eks", "list-addons", "--cluster-name", cluster])
            .await?;
        stream::iter(output.addons)
            .map(|name| async move {
                let described: DescribeAddon = self
                    .json(
                        ctx,
                        &[
                            "eks",
                            "describe-addon",
                            "--cluster-name",
                            cluster,
                            "--addon-name",
                            &name,
                        ],
                    )
                    .await?;
                let raw = described.addon;
                Ok::<_, anyhow::Error>(Addon {
                    name: raw.addon_name,
                    version: raw.addon_version,
                    status: raw.status,
                })
            })
            .buffered(DESCRIBE_CONCURRENCY)
            .try_collect()
            .await
    }

    async fn update_kubeconfig(&self, ctx: &CloudContext, cluster: &str) -> Result<String> {
        let output = self
            .run(
                ctx,
                &["eks", "update-kubeconfig", "--name", cluster, "--region", &ctx.region],
            )
            .await?;
        Ok(output.trim().to_string())
    }
}

pub fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

fn pretty_json(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| raw.to_string())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DescribeInstances {
    reservations: Vec<Reservation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Reservation {
    instances: Vec<RawInstance>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawInstance {
    instance_id: String,
    instance_type: String,
    state: RawState,
    placement: RawPlacement,
    public_ip_address: Option<String>,
    private_ip_address: Option<String>,
    launch_time: Option<String>,
    tags: Vec<RawTag>,
    vpc_id: Option<String>,
    subnet_id: Option<String>,
    key_name: Option<String>,
    architecture: Option<String>,
    platform_details: Option<String>,
    security_groups: Vec<RawGroup>,
    iam_instance_profile: Option<RawProfile>,
}

impl RawInstance {
    fn into_details(self) -> InstanceDetails {
        let name = self
            .tags
            .iter()
            .find(|tag| tag.key == "Name")
            .map(|tag| tag.value.clone())
            .unwrap_or_default();
        let instance = Instance {
            id: self.instance_id,
            name,
            state: self.state.name,
            instance_type: self.instance_type,
            availability_zone: self.placement.availability_zone,
            public_ip: self.public_ip_address.unwrap_or_default(),
            private_ip: self.private_ip_address.unwrap_or_default(),
            launch_time: self.launch_time.as_deref().and_then(parse_time),
            tags: self
                .tags
                .into_iter()
                .map(|tag| Tag {
                    key: tag.key,
                    value: tag.value,
                })
                .collect(),
        };
        InstanceDetails {
            instance,
            vpc_id: self.vpc_id.unwrap_or_default(),
            subnet_id: self.subnet_id.unwrap_or_default(),
            key_name: self.key_name.unwrap_or_default(),
            architecture: self.architecture.unwrap_or_default(),
            platform: self.platform_details.unwrap_or_default(),
            iam_profile: self
                .iam_instance_profile
                .map(|profile| profile.arn)
                .unwrap_or_default(),
            security_groups: self
                .security_groups
                .into_iter()
                .map(|group| format!("{} ({})", group.group_name, group.group_id))
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawState {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawPlacement {
    availability_zone: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawTag {
    key: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawGroup {
    group_id: String,
    group_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawProfile {
    arn: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DescribeInstanceStatus {
    instance_statuses: Vec<RawInstanceStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawInstanceStatus {
    instance_state: RawState,
    system_status: RawStatus,
    instance_status: RawStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawStatus {
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DescribeInstanceInformation {
    instance_information_list: Vec<RawInstanceInformation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawInstanceInformation {
    ping_status: String,
    agent_version: String,
    platform_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct MetricStatistics {
    datapoints: Vec<RawDatapoint>,
}

impl MetricStatistics {
    /// Value of `statistic` on the newest datapoint.
    fn latest(&self, statistic: Statistic) -> Option<f64> {
        let newest = self
            .datapoints
            .iter()
            .max_by_key(|point| point.timestamp.as_deref().and_then(parse_time))?;
        match statistic {
            Statistic::Average => newest.average,
            Statistic::Sum => newest.sum,
            Statistic::Maximum => newest.maximum,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawDatapoint {
    timestamp: Option<String>,
    average: Option<f64>,
    sum: Option<f64>,
    maximum: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ListBuckets {
    buckets: Vec<RawBucket>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawBucket {
    name: String,
    creation_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct BucketLocation {
    location_constraint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ListObjects {
    contents: Vec<RawObject>,
    common_prefixes: Vec<RawPrefix>,
    next_token: Option<String>,
}

impl ListObjects {
    fn into_page(self, prefix: &str) -> ObjectPage {
        let folders = self.common_prefixes.into_iter().map(|raw| S3Object {
            key: raw.prefix,
            is_folder: true,
            ..S3Object::default()
        });
        let files = self
            .contents
            .into_iter()
            .filter(|raw| raw.key != prefix)
            .map(|raw| S3Object {
                last_modified: raw.last_modified.as_deref().and_then(parse_time),
                key: raw.key,
                size: raw.size,
                storage_class: raw.storage_class,
                is_folder: false,
            });
        let truncated = self.next_token.is_some();
        ObjectPage {
            objects: folders.chain(files).collect(),
            continuation: self.next_token,
            truncated,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawObject {
    key: String,
    size: i64,
    last_modified: Option<String>,
    storage_class: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawPrefix {
    prefix: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct HeadObject {
    content_length: i64,
    last_modified: Option<String>,
    content_type: String,
    #[serde(rename = "ETag")]
    e_tag: String,
    storage_class: Option<String>,
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct BucketPolicy {
    policy: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct BucketVersioning {
    status: Option<String>,
    #[serde(rename = "MFADelete")]
    mfa_delete: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListClusters {
    clusters: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DescribeCluster {
    cluster: RawCluster,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawCluster {
    name: String,
    arn: String,
    created_at: Option<String>,
    version: String,
    endpoint: String,
    role_arn: String,
    status: String,
    platform_version: String,
    resources_vpc_config: RawVpcConfig,
}

impl RawCluster {
    fn into_details(self, region: &str) -> ClusterDetails {
        ClusterDetails {
            cluster: Cluster {
                created: self.created_at.as_deref().and_then(parse_time),
                name: self.name,
                version: self.version,
                status: self.status,
                endpoint: self.endpoint,
                arn: self.arn,
                region: region.to_string(),
            },
            role_arn: self.role_arn,
            platform_version: self.platform_version,
            vpc_id: self.resources_vpc_config.vpc_id,
            subnet_ids: self.resources_vpc_config.subnet_ids,
            security_group_ids: self.resources_vpc_config.security_group_ids,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawVpcConfig {
    vpc_id: String,
    subnet_ids: Vec<String>,
    security_group_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListNodegroups {
    nodegroups: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DescribeNodegroup {
    nodegroup: RawNodegroup,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawNodegroup {
    nodegroup_name: String,
    status: String,
    instance_types: Vec<String>,
    scaling_config: RawScaling,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawScaling {
    min_size: i64,
    max_size: i64,
    desired_size: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListAddons {
    addons: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DescribeAddon {
    addon: RawAddon,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawAddon {
    addon_name: String,
    addon_version: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::{
        DescribeCluster, DescribeInstances, ListObjects, MetricStatistics, Statistic, context_env,
        parse_time,
    };
    use crate::model::{CloudContext, Credentials};

    #[test]
    fn instances_take_name_from_tags() {
        let raw = r#"{
            "Reservations": [{
                "Instances": [{
                    "InstanceId": "i-0123",
                    "InstanceType": "t3.micro",
                    "State": {"Code": 16, "Name": "running"},
                    "Placement": {"AvailabilityZone": "eu-west-1a"},
                    "PrivateIpAddress": "10.0.0.4",
                    "LaunchTime": "2024-03-01T10:00:00+00:00",
                    "Tags": [{"Key": "env", "Value": "prod"}, {"Key": "Name", "Value": "api"}],
                    "SecurityGroups": [{"GroupId": "sg-1", "GroupName": "web"}]
                }]
            }]
        }"#;
        let parsed: DescribeInstances = serde_json::from_str(raw).expect("valid json");
        let details = parsed
            .reservations
            .into_iter()
            .flat_map(|reservation| reservation.instances)
            .map(|raw| raw.into_details())
            .next()
            .expect("one instance");

        assert_eq!(details.instance.name, "api");
        assert_eq!(details.instance.state, "running");
        assert_eq!(details.instance.public_ip, "");
        assert!(details.instance.launch_time.is_some());
        assert_eq!(details.security_groups, vec!["web (sg-1)".to_string()]);
    }

    #[test]
    fn metric_statistics_pick_the_newest_datapoint() {
        let raw = r#"{
            "Label": "CPUUtilization",
            "Datapoints": [
                {"Timestamp": "2024-03-01T10:00:00+00:00", "Average": 12.5, "Unit": "Percent"},
                {"Timestamp": "2024-03-01T10:05:00+00:00", "Average": 40.0, "Unit": "Percent"}
            ]
        }"#;
        let parsed: MetricStatistics = serde_json::from_str(raw).expect("valid json");
        assert_eq!(parsed.latest(Statistic::Average), Some(40.0));
        assert_eq!(parsed.latest(Statistic::Sum), None);

        let empty: MetricStatistics =
            serde_json::from_str(r#"{"Label": "NetworkIn", "Datapoints": []}"#).expect("json");
        assert_eq!(empty.latest(Statistic::Sum), None);
    }

    #[test]
    fn object_page_lists_folders_first_and_skips_placeholder() {
        let raw = r#"{
            "Contents": [
                {"Key": "logs/", "Size": 0, "StorageClass": "STANDARD"},
                {"Key": "logs/app.log", "Size": 42, "StorageClass": "STANDARD",
                 "LastModified": "2024-01-02T03:04:05+00:00"}
            ],
            "CommonPrefixes": [{"Prefix": "logs/2024/"}],
            "NextToken": "abc"
        }"#;
        let parsed: ListObjects = serde_json::from_str(raw).expect("valid json");
        let page = parsed.into_page("logs/");

        assert_eq!(page.objects.len(), 2);
        assert!(page.objects[0].is_folder);
        assert_eq!(page.objects[1].key, "logs/app.log");
        assert!(page.truncated);
        assert_eq!(page.continuation.as_deref(), Some("abc"));
    }

    #[test]
    fn cluster_output_maps_vpc_config() {
        let raw = r#"{"cluster": {
            "name": "prod", "arn": "arn:aws:eks:eu-west-1:1:cluster/prod", "version": "1.29",
            "status": "ACTIVE", "endpoint": "https://x", "roleArn": "arn:role",
            "resourcesVpcConfig": {"vpcId": "vpc-1", "subnetIds": ["a", "b"]}
        }}"#;
        let parsed: DescribeCluster = serde_json::from_str(raw).expect("valid json");
        let details = parsed.cluster.into_details("eu-west-1");
        assert_eq!(details.cluster.region, "eu-west-1");
        assert_eq!(details.subnet_ids.len(), 2);
        assert_eq!(details.vpc_id, "vpc-1");
    }

    #[test]
    fn explicit_credentials_win_over_profile() {
        let mut ctx = CloudContext::new("us-west-2");
        ctx.profile = Some("dev".to_string());
        ctx.credentials = Some(Credentials {
            access_key_id: "AKIA".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: Some("token".to_string()),
            expiration: None,
        });
        let env = context_env(&ctx);
        assert!(env.iter().any(|(key, value)| *key == "AWS_SESSION_TOKEN" && value == "token"));
        assert!(!env.iter().any(|(key, _)| *key == "AWS_PROFILE"));
        assert!(env.iter().any(|(key, value)| *key == "AWS_REGION" && value == "us-west-2"));
    }

    #[test]
    fn parses_both_timestamp_styles() {
        assert!(parse_time("2024-01-02T03:04:05+00:00").is_some());
        assert!(parse_time("Tue, 02 Jan 2024 03:04:05 +0000").is_some());
        assert!(parse_time("yesterday").is_none());
    }
}
