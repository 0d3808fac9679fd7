use crate::search::Searchable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Service {
    Ec2,
    S3,
    Eks,
}

impl Service {
    pub const ALL: [Self; 3] = [Self::Ec2, Self::S3, Self::Eks];

    pub fn title(self) -> &'static str {
        match self {
            Self::Ec2 => "EC2",
            Self::S3 => "S3",
            Self::Eks => "EKS",
        }
    }

    pub fn next(self) -> Self {
        let index = Self::ALL.iter().position(|service| *service == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }
}

impl Display for Service {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum DetailKind {
    Instance,
    Object,
    Cluster,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum Screen {
    AuthSelect,
    AccountSelect,
    RegionSelect,
    ResourceList(Service),
    ObjectBrowse,
    ResourceDetail(DetailKind),
    Help,
}

impl Screen {
    pub fn title(self) -> &'static str {
        match self {
            Self::AuthSelect => "Authentication",
            Self::AccountSelect => "Accounts",
            Self::RegionSelect => "Regions",
            Self::ResourceList(service) => service.title(),
            Self::ObjectBrowse => "S3 Objects",
            Self::ResourceDetail(DetailKind::Instance) => "Instance",
            Self::ResourceDetail(DetailKind::Object) => "Object",
            Self::ResourceDetail(DetailKind::Cluster) => "Cluster",
            Self::Help => "Help",
        }
    }

    /// Screen family used to decide whether a completion still belongs to what is on screen.
    pub fn area(self) -> Area {
        match self {
            Self::AuthSelect => Area::Auth,
            Self::AccountSelect => Area::Accounts,
            Self::RegionSelect => Area::Regions,
            Self::ResourceList(Service::Ec2) | Self::ResourceDetail(DetailKind::Instance) => {
                Area::Ec2
            }
            Self::ResourceList(Service::S3)
            | Self::ObjectBrowse
            | Self::ResourceDetail(DetailKind::Object) => Area::S3,
            Self::ResourceList(Service::Eks) | Self::ResourceDetail(DetailKind::Cluster) => {
                Area::Eks
            }
            Self::Help => Area::Help,
        }
    }

    pub fn service(self) -> Option<Service> {
        match self.area() {
            Area::Ec2 => Some(Service::Ec2),
            Area::S3 => Some(Service::S3),
            Area::Eks => Some(Service::Eks),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Area {
    Auth,
    Accounts,
    Regions,
    Ec2,
    S3,
    Eks,
    Help,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum InstanceVerb {
    Start,
    Stop,
    Reboot,
    Terminate,
}

impl InstanceVerb {
    pub fn title(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Reboot => "reboot",
            Self::Terminate => "terminate",
        }
    }

    pub fn cli_operation(self) -> &'static str {
        match self {
            Self::Start => "start-instances",
            Self::Stop => "stop-instances",
            Self::Reboot => "reboot-instances",
            Self::Terminate => "terminate-instances",
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct AccountRef {
    pub id: String,
    pub name: String,
    pub role: String,
}

/// Everything a provider call needs to talk to the right account in the right region.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct CloudContext {
    pub region: String,
    pub profile: Option<String>,
    pub credentials: Option<Credentials>,
    pub account: Option<AccountRef>,
}

impl CloudContext {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            profile: None,
            credentials: None,
            account: None,
        }
    }

    pub fn label(&self) -> String {
        match (&self.account, &self.profile) {
            (Some(account), _) => format!("{} ({}) {}", account.name, account.id, account.role),
            (None, Some(profile)) => format!("profile {profile}"),
            (None, None) => "environment".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub state: String,
    pub instance_type: String,
    pub availability_zone: String,
    pub public_ip: String,
    pub private_ip: String,
    pub launch_time: Option<DateTime<Utc>>,
    pub tags: Vec<Tag>,
}

impl Searchable for Instance {
    fn search_key(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            self.id, self.name, self.state, self.instance_type, self.public_ip, self.private_ip
        )
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct InstanceDetails {
    pub instance: Instance,
    pub vpc_id: String,
    pub subnet_id: String,
    pub key_name: String,
    pub architecture: String,
    pub platform: String,
    pub iam_profile: String,
    pub security_groups: Vec<String>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct InstanceStatus {
    pub instance_state: String,
    pub system_status: String,
    pub instance_status: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SsmAgent {
    pub connected: bool,
    pub ping_status: String,
    pub agent_version: String,
    pub platform: String,
}

/// Most recent CloudWatch datapoint per metric over the sampling window. `None` means the
/// metric reported nothing in that window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceMetrics {
    pub window_minutes: i64,
    pub cpu_percent: Option<f64>,
    pub network_in_bytes: Option<f64>,
    pub network_out_bytes: Option<f64>,
    pub disk_read_bytes: Option<f64>,
    pub disk_write_bytes: Option<f64>,
    pub status_check_failed: Option<f64>,
}

/// Instance detail fan-out result: whatever arrived plus the first failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceBundle {
    pub instance_id: String,
    pub details: Option<InstanceDetails>,
    pub status: Option<InstanceStatus>,
    pub ssm: Option<SsmAgent>,
    pub metrics: Option<InstanceMetrics>,
    pub error: Option<String>,
}

impl InstanceBundle {
    pub fn has_data(&self) -> bool {
        self.details.is_some()
            || self.status.is_some()
            || self.ssm.is_some()
            || self.metrics.is_some()
    }

    pub fn ssm_connected(&self) -> bool {
        self.ssm.as_ref().is_some_and(|agent| agent.connected)
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Bucket {
    pub name: String,
    pub region: String,
    pub created: Option<DateTime<Utc>>,
}

impl Searchable for Bucket {
    fn search_key(&self) -> String {
        format!("{} {}", self.name, self.region)
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct S3Object {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub storage_class: String,
    pub is_folder: bool,
}

impl S3Object {
    /// Last path segment, keeping the trailing slash on folders.
    pub fn display_name(&self, prefix: &str) -> String {
        self.key
            .strip_prefix(prefix)
            .unwrap_or(&self.key)
            .to_string()
    }
}

impl Searchable for S3Object {
    fn search_key(&self) -> String {
        self.key.clone()
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ObjectPage {
    pub objects: Vec<S3Object>,
    pub continuation: Option<String>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ObjectDetails {
    pub bucket: String,
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: String,
    pub etag: String,
    pub storage_class: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Cluster {
    pub name: String,
    pub version: String,
    pub status: String,
    pub endpoint: String,
    pub arn: String,
    pub region: String,
    pub created: Option<DateTime<Utc>>,
}

impl Searchable for Cluster {
    fn search_key(&self) -> String {
        format!("{} {} {} {}", self.name, self.version, self.status, self.region)
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ClusterDetails {
    pub cluster: Cluster,
    pub role_arn: String,
    pub platform_version: String,
    pub vpc_id: String,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct NodeGroup {
    pub name: String,
    pub status: String,
    pub instance_types: Vec<String>,
    pub desired: i64,
    pub min: i64,
    pub max: i64,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Addon {
    pub name: String,
    pub version: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ClusterBundle {
    pub cluster_name: String,
    pub details: Option<ClusterDetails>,
    pub node_groups: Option<Vec<NodeGroup>>,
    pub addons: Option<Vec<Addon>>,
    pub error: Option<String>,
}

impl ClusterBundle {
    pub fn has_data(&self) -> bool {
        self.details.is_some() || self.node_groups.is_some() || self.addons.is_some()
    }
}

/// One account/role pair reachable through an SSO session.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct AccessTarget {
    pub account_id: String,
    pub account_name: String,
    pub email: String,
    pub role_name: String,
}

impl AccessTarget {
    pub fn account_ref(&self) -> AccountRef {
        AccountRef {
            id: self.account_id.clone(),
            name: self.account_name.clone(),
            role: self.role_name.clone(),
        }
    }
}

impl Searchable for AccessTarget {
    fn search_key(&self) -> String {
        format!(
            "{} {} {} {}",
            self.account_id, self.account_name, self.role_name, self.email
        )
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Region(pub String);

impl Searchable for Region {
    fn search_key(&self) -> String {
        self.0.clone()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Env,
    Profile,
    Sso,
}

impl AuthMethod {
    pub const ALL: [Self; 3] = [Self::Env, Self::Profile, Self::Sso];

    pub fn title(self) -> &'static str {
        match self {
            Self::Env => "Environment variables",
            Self::Profile => "Named profile",
            Self::Sso => "AWS SSO (IAM Identity Center)",
        }
    }
}

impl Searchable for AuthMethod {
    fn search_key(&self) -> String {
        self.title().to_string()
    }
}

pub fn format_size(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes.max(0) as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::{DetailKind, Instance, Screen, Service, format_size};
    use crate::model::Area;
    use crate::search::Searchable;

    #[test]
    fn service_cycle_wraps() {
        assert_eq!(Service::Ec2.next(), Service::S3);
        assert_eq!(Service::S3.next(), Service::Eks);
        assert_eq!(Service::Eks.next(), Service::Ec2);
    }

    #[test]
    fn detail_screens_share_area_with_their_list() {
        assert_eq!(
            Screen::ResourceDetail(DetailKind::Instance).area(),
            Screen::ResourceList(Service::Ec2).area()
        );
        assert_eq!(Screen::ObjectBrowse.area(), Area::S3);
        assert_eq!(Screen::Help.service(), None);
    }

    #[test]
    fn instance_search_key_covers_addresses() {
        let instance = Instance {
            id: "i-0abc".to_string(),
            name: "web".to_string(),
            public_ip: "3.3.3.3".to_string(),
            ..Instance::default()
        };
        assert!(instance.search_key().contains("3.3.3.3"));
        assert!(instance.search_key().starts_with("i-0abc web"));
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
    }
}
