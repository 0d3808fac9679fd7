use crate::auth::{AuthProgress, SsoSession};
use crate::command::{self, Command, Suggestion, Verb};
use crate::config::{AppConfig, AuthConfig};
use crate::handoff::{HandoffRequest, RestoreContext};
use crate::input::{Action, KeyContext};
use crate::list::{ListOps, ListState, Pagination};
use crate::model::{
    AccessTarget, Area, AuthMethod, Bucket, CloudContext, Cluster, ClusterBundle, DetailKind,
    Instance, InstanceBundle, InstanceVerb, ObjectDetails, Region, S3Object, Screen, Service,
};
use crate::navigation::{NavAction, scroll_offset};
use crate::search::SearchState;
use crate::task::{BulkOutcome, Completion, CompletionEvent, Origin, Task, TaskKind};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InputMode {
    Normal,
    Search,
    Command,
}

/// Why the event loop stopped. A handoff hands the terminal to a child and comes back.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ExitReason {
    Quit,
    Handoff(HandoffRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    Action(Action),
    Completion(Completion),
    Tick,
    Resize { rows: usize },
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PromptKind {
    ProfileName,
    SsoStartUrl,
    DeleteObject {
        bucket: String,
        key: String,
        expected: String,
    },
    DeleteBucket {
        bucket: String,
    },
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Prompt {
    kind: PromptKind,
    buffer: String,
}

impl Prompt {
    fn new(kind: PromptKind) -> Self {
        Self {
            kind,
            buffer: String::new(),
        }
    }

    pub fn label(&self) -> String {
        match &self.kind {
            PromptKind::ProfileName => "AWS profile name".to_string(),
            PromptKind::SsoStartUrl => "SSO start URL [sso-region]".to_string(),
            PromptKind::DeleteObject { expected, .. } => {
                format!("Type '{expected}' to delete the object")
            }
            PromptKind::DeleteBucket { bucket } => format!("Type '{bucket}' to delete the bucket"),
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct PendingConfirmation {
    prompt: String,
    origin: Origin,
    kind: TaskKind,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InfoOverlay {
    pub title: String,
    pub body: String,
}

/// Text the event loop should put on the system clipboard.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClipboardCopy {
    pub label: String,
    pub text: String,
}

pub struct App {
    config: AppConfig,
    running: bool,
    exit: Option<ExitReason>,
    screen: Screen,
    help_return: Screen,
    region_return: Screen,
    mode: InputMode,
    context: CloudContext,
    auth: Option<AuthConfig>,
    sso: Option<SsoSession>,
    auth_methods: ListState<AuthMethod>,
    accounts: ListState<AccessTarget>,
    regions: ListState<Region>,
    instances: ListState<Instance>,
    buckets: ListState<Bucket>,
    objects: ListState<S3Object>,
    clusters: ListState<Cluster>,
    instance_detail: Option<InstanceBundle>,
    object_detail: Option<ObjectDetails>,
    cluster_detail: Option<ClusterBundle>,
    info: Option<InfoOverlay>,
    clipboard: Option<ClipboardCopy>,
    bucket: Option<String>,
    prefix: String,
    object_key: Option<String>,
    cluster: Option<String>,
    instance_id: Option<String>,
    selection: BTreeSet<String>,
    search: SearchState,
    command_input: String,
    hints: Vec<String>,
    prompt: Option<Prompt>,
    pending_confirmation: Option<PendingConfirmation>,
    in_flight: usize,
    generation: u64,
    last_error: Option<String>,
    status: String,
    auto_refresh: bool,
    list_height: usize,
    detail_scroll: usize,
    help_scroll: usize,
    scroll_extent: usize,
}

impl App {
    pub fn new(config: AppConfig, context: CloudContext, auth: Option<AuthConfig>) -> Self {
        let regions = config.regions.iter().cloned().map(Region).collect();
        Self {
            config,
            running: true,
            exit: None,
            screen: Screen::AuthSelect,
            help_return: Screen::AuthSelect,
            region_return: Screen::ResourceList(Service::Ec2),
            mode: InputMode::Normal,
            context,
            auth,
            sso: None,
            auth_methods: ListState::with_items(AuthMethod::ALL.to_vec()),
            accounts: ListState::default(),
            regions: ListState::with_items(regions),
            instances: ListState::default(),
            buckets: ListState::default(),
            objects: ListState::default(),
            clusters: ListState::default(),
            instance_detail: None,
            object_detail: None,
            cluster_detail: None,
            info: None,
            clipboard: None,
            bucket: None,
            prefix: String::new(),
            object_key: None,
            cluster: None,
            instance_id: None,
            selection: BTreeSet::new(),
            search: SearchState::default(),
            command_input: String::new(),
            hints: Vec::new(),
            prompt: None,
            pending_confirmation: None,
            in_flight: 0,
            generation: 0,
            last_error: None,
            status: String::new(),
            auto_refresh: false,
            list_height: 10,
            detail_scroll: 0,
            help_scroll: 0,
            scroll_extent: 0,
        }
    }

    /// First screen and loads for a fresh start, driven by the persisted auth selection.
    pub fn bootstrap(&mut self) -> Vec<Task> {
        let Some(auth) = self.auth.clone() else {
            self.screen = Screen::AuthSelect;
            self.set_status("Choose how cirrus should authenticate");
            return Vec::new();
        };

        match auth.method {
            AuthMethod::Env => {
                self.context.profile = None;
                self.enter_service(Service::Ec2)
            }
            AuthMethod::Profile => {
                self.context.profile = auth.profile_name;
                self.enter_service(Service::Ec2)
            }
            AuthMethod::Sso => match auth.sso_start_url {
                Some(start_url) => {
                    let region = auth
                        .sso_region
                        .unwrap_or_else(|| self.context.region.clone());
                    self.start_sso(start_url, region)
                }
                None => {
                    self.screen = Screen::AuthSelect;
                    self.set_status("Saved SSO setup has no start URL; choose again");
                    Vec::new()
                }
            },
        }
    }

    /// Rebuilds the visible location after a handoff and re-issues its loads.
    pub fn restore(&mut self, restore: RestoreContext) -> Vec<Task> {
        self.generation = restore.generation;
        if !restore.restore_pending {
            return self.bootstrap();
        }

        self.context = restore.context;
        self.sso = restore.sso;
        if restore.auth.is_some() {
            self.auth = restore.auth;
        }
        self.bucket = restore.bucket;
        self.prefix = restore.prefix;
        self.object_key = restore.object_key;
        self.cluster = restore.cluster;
        self.instance_id = restore.instance_id;

        let mut tasks = Vec::new();
        match restore.screen {
            Screen::AccountSelect => {
                self.screen = Screen::AccountSelect;
                if let Some(session) = self.sso.clone() {
                    tasks.push(self.issue(
                        Origin::new(Area::Accounts),
                        TaskKind::LoadAccessTargets(session),
                    ));
                }
            }
            Screen::ResourceList(Service::S3)
            | Screen::ObjectBrowse
            | Screen::ResourceDetail(DetailKind::Object) => {
                self.screen = Screen::ResourceList(Service::S3);
                tasks.push(self.issue(Origin::new(Area::S3), TaskKind::LoadBuckets));
                if restore.screen == Screen::ResourceList(Service::S3) {
                    self.bucket = None;
                    self.prefix.clear();
                } else {
                    tasks.extend(self.objects_task(None));
                    if restore.screen == Screen::ResourceDetail(DetailKind::Object)
                        && let Some(key) = self.object_key.clone()
                    {
                        tasks.extend(self.load_object_detail(key));
                    }
                }
            }
            Screen::ResourceList(Service::Eks) | Screen::ResourceDetail(DetailKind::Cluster) => {
                self.screen = Screen::ResourceList(Service::Eks);
                tasks.push(self.issue(Origin::new(Area::Eks), TaskKind::LoadClusters));
                if restore.screen == Screen::ResourceDetail(DetailKind::Cluster)
                    && let Some(name) = self.cluster.clone()
                {
                    tasks.push(self.load_cluster_detail(name));
                }
            }
            other => {
                self.screen = Screen::ResourceList(Service::Ec2);
                tasks.push(self.issue(Origin::new(Area::Ec2), TaskKind::LoadInstances));
                if other == Screen::ResourceDetail(DetailKind::Instance)
                    && let Some(id) = self.instance_id.clone()
                {
                    tasks.push(self.load_instance_detail(id));
                }
            }
        }

        let notice = restore
            .notice
            .unwrap_or_else(|| "Back from external session".to_string());
        self.set_status(notice);
        tasks
    }

    /// Snapshot handed across a terminal handoff.
    pub fn restore_context(&self, notice: Option<String>) -> RestoreContext {
        RestoreContext {
            screen: self.base_screen(),
            bucket: self.bucket.clone(),
            prefix: self.prefix.clone(),
            object_key: self.object_key.clone(),
            cluster: self.cluster.clone(),
            instance_id: self.instance_id.clone(),
            context: self.context.clone(),
            sso: self.sso.clone(),
            auth: self.auth.clone(),
            restore_pending: true,
            generation: self.generation + 1,
            notice,
        }
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn take_exit(&mut self) -> Option<ExitReason> {
        self.exit.take()
    }

    pub fn take_clipboard(&mut self) -> Option<ClipboardCopy> {
        self.clipboard.take()
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn key_context(&self) -> KeyContext {
        if self.pending_confirmation.is_some() {
            return KeyContext::Confirm;
        }
        if self.prompt.is_some() {
            return KeyContext::Prompt;
        }
        match self.mode {
            InputMode::Normal => KeyContext::Normal,
            InputMode::Search => KeyContext::Search,
            InputMode::Command => KeyContext::Command,
        }
    }

    pub fn context(&self) -> &CloudContext {
        &self.context
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn loading(&self) -> bool {
        self.in_flight > 0
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn auto_refresh(&self) -> bool {
        self.auto_refresh
    }

    pub fn auth_methods(&self) -> &ListState<AuthMethod> {
        &self.auth_methods
    }

    pub fn accounts(&self) -> &ListState<AccessTarget> {
        &self.accounts
    }

    pub fn regions(&self) -> &ListState<Region> {
        &self.regions
    }

    pub fn instances(&self) -> &ListState<Instance> {
        &self.instances
    }

    pub fn buckets(&self) -> &ListState<Bucket> {
        &self.buckets
    }

    pub fn objects(&self) -> &ListState<S3Object> {
        &self.objects
    }

    pub fn clusters(&self) -> &ListState<Cluster> {
        &self.clusters
    }

    pub fn instance_detail(&self) -> Option<&InstanceBundle> {
        self.instance_detail.as_ref()
    }

    pub fn object_detail(&self) -> Option<&ObjectDetails> {
        self.object_detail.as_ref()
    }

    pub fn cluster_detail(&self) -> Option<&ClusterBundle> {
        self.cluster_detail.as_ref()
    }

    pub fn info(&self) -> Option<&InfoOverlay> {
        self.info.as_ref()
    }

    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selection.contains(id)
    }

    pub fn selection_len(&self) -> usize {
        self.selection.len()
    }

    pub fn search(&self) -> &SearchState {
        &self.search
    }

    pub fn command_input(&self) -> &str {
        &self.command_input
    }

    pub fn hints(&self) -> &[String] {
        &self.hints
    }

    pub fn prompt(&self) -> Option<&Prompt> {
        self.prompt.as_ref()
    }

    pub fn pending_confirmation_prompt(&self) -> Option<&str> {
        self.pending_confirmation
            .as_ref()
            .map(|pending| pending.prompt.as_str())
    }

    pub fn help_return(&self) -> Screen {
        self.help_return
    }

    /// Scroll offset of the detail or help body currently on screen.
    pub fn scroll(&self) -> usize {
        if self.screen == Screen::Help {
            self.help_scroll
        } else {
            self.detail_scroll
        }
    }

    /// The renderer reports how far the current detail/help body can scroll.
    pub fn set_scroll_extent(&mut self, max_offset: usize) {
        self.scroll_extent = max_offset;
        self.detail_scroll = self.detail_scroll.min(max_offset);
        self.help_scroll = self.help_scroll.min(max_offset);
    }

    pub fn set_list_height(&mut self, rows: usize) {
        let height = rows.max(1);
        self.list_height = height;
        self.auth_methods.reveal(height);
        self.accounts.reveal(height);
        self.regions.reveal(height);
        self.instances.reveal(height);
        self.buckets.reveal(height);
        self.objects.reveal(height);
        self.clusters.reveal(height);
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = normalize_status_text(status.into());
    }

    pub fn apply(&mut self, event: AppEvent) -> Vec<Task> {
        match event {
            AppEvent::Action(action) => self.apply_action(action),
            AppEvent::Completion(completion) => self.apply_completion(completion),
            AppEvent::Tick => self.on_tick(),
            AppEvent::Resize { rows } => {
                self.set_list_height(rows);
                Vec::new()
            }
        }
    }

    pub fn apply_action(&mut self, action: Action) -> Vec<Task> {
        if let Some(pending) = self.pending_confirmation.take() {
            return match action {
                Action::ConfirmYes => {
                    self.set_status(format!("Confirmed: {}", pending.prompt));
                    vec![self.issue(pending.origin, pending.kind)]
                }
                Action::ConfirmNo | Action::CancelInput => {
                    self.set_status("Action cancelled");
                    Vec::new()
                }
                _ => {
                    self.pending_confirmation = Some(pending);
                    self.set_status("Pending confirmation: press y to confirm or n to cancel");
                    Vec::new()
                }
            };
        }

        if self.prompt.is_some() {
            return self.apply_prompt_action(action);
        }

        match self.mode {
            InputMode::Search => self.apply_search_action(action),
            InputMode::Command => self.apply_command_action(action),
            InputMode::Normal => self.apply_normal_action(action),
        }
    }

    /// Auto-refresh of the instance list; skipped while anything is still loading.
    pub fn on_tick(&mut self) -> Vec<Task> {
        let idle = self.in_flight == 0
            && self.mode == InputMode::Normal
            && self.prompt.is_none()
            && self.pending_confirmation.is_none();
        if self.auto_refresh && idle && self.screen == Screen::ResourceList(Service::Ec2) {
            debug!("auto-refreshing instances");
            return vec![self.issue(Origin::new(Area::Ec2), TaskKind::LoadInstances)];
        }
        Vec::new()
    }

    pub fn apply_completion(&mut self, completion: Completion) -> Vec<Task> {
        let Completion { origin, event } = completion;
        if origin.generation != self.generation {
            debug!(?origin, "dropping completion issued before the last handoff");
            return Vec::new();
        }
        self.in_flight = self.in_flight.saturating_sub(1);
        let current = self.is_current(&origin);

        match event {
            CompletionEvent::AuthSaved(result) => {
                if let Err(error) = result {
                    self.record_error("Could not save auth selection", error);
                }
                Vec::new()
            }
            CompletionEvent::InstancesMutated { verb, outcome } => {
                self.on_instances_mutated(verb, outcome, current)
            }
            CompletionEvent::ObjectDownloaded { key, dest, result } => {
                match result {
                    Ok(()) => self.set_status(format!("Downloaded {key} to {}", dest.display())),
                    Err(error) => self.record_error(&format!("Download of {key} failed"), error),
                }
                Vec::new()
            }
            CompletionEvent::ObjectDeleted { key, result } => match result {
                Ok(()) => {
                    self.set_status(format!("Deleted {key}"));
                    if current { self.objects_task(None) } else { Vec::new() }
                }
                Err(error) => {
                    self.record_error(&format!("Delete of {key} failed"), error);
                    Vec::new()
                }
            },
            CompletionEvent::BucketDeleted { bucket, result } => match result {
                Ok(()) => {
                    self.set_status(format!("Deleted bucket {bucket}"));
                    if current {
                        vec![self.issue(Origin::new(Area::S3), TaskKind::LoadBuckets)]
                    } else {
                        Vec::new()
                    }
                }
                Err(error) => {
                    self.record_error(&format!("Delete of bucket {bucket} failed"), error);
                    Vec::new()
                }
            },
            CompletionEvent::KubeconfigUpdated { cluster, result } => {
                match result {
                    Ok(output) => self.set_status(format!(
                        "kubeconfig updated for {cluster}: {}",
                        summarize_error_line(&output)
                    )),
                    Err(error) => {
                        let context = format!("update-kubeconfig for {cluster} failed");
                        self.record_error(&context, error);
                    }
                }
                Vec::new()
            }
            CompletionEvent::Authenticated(Ok(AuthProgress::Ready(session)))
            | CompletionEvent::DeviceTokenReady(Ok(session)) => {
                self.sso = Some(session.clone());
                if !current {
                    return Vec::new();
                }
                self.set_status("Signed in; loading accounts");
                vec![self.issue(
                    Origin::new(Area::Accounts),
                    TaskKind::LoadAccessTargets(session),
                )]
            }
            _ if !current => {
                debug!(?origin, "discarding stale completion");
                Vec::new()
            }
            CompletionEvent::Authenticated(Ok(AuthProgress::Pending(pending))) => {
                self.set_status(format!(
                    "Open {} and confirm code {}",
                    pending.verification_uri, pending.user_code
                ));
                vec![self.issue(
                    Origin::new(Area::Accounts),
                    TaskKind::AwaitDeviceToken(pending),
                )]
            }
            CompletionEvent::Authenticated(Err(error))
            | CompletionEvent::DeviceTokenReady(Err(error)) => {
                self.record_error("SSO sign-in failed", error);
                Vec::new()
            }
            CompletionEvent::AccessTargetsLoaded(result) => {
                match result {
                    Ok(targets) => {
                        let count = targets.len();
                        self.accounts.replace_items(targets, |target| {
                            (target.account_id.clone(), target.role_name.clone())
                        });
                        self.reapply_filter(Screen::AccountSelect);
                        self.set_status(format!("{count} account roles available"));
                    }
                    Err(error) => self.record_error("Could not list accounts", error),
                }
                Vec::new()
            }
            CompletionEvent::AccountSwitched { target, result } => match result {
                Ok(credentials) => {
                    self.context.credentials = Some(credentials);
                    self.context.account = Some(target.account_ref());
                    self.context.profile = None;
                    self.clear_resources();
                    let tasks = self.enter_service(Service::Ec2);
                    self.set_status(format!(
                        "Using {} ({}) as {}",
                        target.account_name, target.account_id, target.role_name
                    ));
                    tasks
                }
                Err(error) => {
                    self.record_error(
                        &format!("Could not assume {} in {}", target.role_name, target.account_id),
                        error,
                    );
                    Vec::new()
                }
            },
            CompletionEvent::InstancesLoaded(result) => {
                match result {
                    Ok(instances) => {
                        let count = instances.len();
                        self.selection
                            .retain(|id| instances.iter().any(|instance| &instance.id == id));
                        self.instances
                            .replace_items(instances, |instance| instance.id.clone());
                        self.instances.reveal(self.list_height);
                        self.reapply_filter(Screen::ResourceList(Service::Ec2));
                        self.set_status(format!(
                            "Loaded {count} instances in {}",
                            self.context.region
                        ));
                    }
                    Err(error) => self.record_error("Could not list instances", error),
                }
                Vec::new()
            }
            CompletionEvent::InstanceDetailLoaded(bundle) => {
                if !bundle.has_data() {
                    let error = bundle
                        .error
                        .unwrap_or_else(|| "no data returned".to_string());
                    self.record_error(&format!("Could not load {}", bundle.instance_id), error);
                    return Vec::new();
                }
                let partial = bundle.error.clone();
                let id = bundle.instance_id.clone();
                self.instance_detail = Some(bundle);
                self.set_screen(Screen::ResourceDetail(DetailKind::Instance));
                match partial {
                    Some(error) => self.record_error(&format!("{id} loaded partially"), error),
                    None => self.set_status(format!("Loaded {id}")),
                }
                Vec::new()
            }
            CompletionEvent::BucketsLoaded(result) => {
                match result {
                    Ok(buckets) => {
                        let count = buckets.len();
                        self.buckets.replace_items(buckets, |bucket| bucket.name.clone());
                        self.buckets.reveal(self.list_height);
                        self.reapply_filter(Screen::ResourceList(Service::S3));
                        self.set_status(format!("Loaded {count} buckets"));
                    }
                    Err(error) => self.record_error("Could not list buckets", error),
                }
                Vec::new()
            }
            CompletionEvent::ObjectsLoaded {
                bucket,
                prefix,
                result,
            } => {
                match result {
                    Ok(page) => {
                        let count = page.objects.len();
                        let truncated = page.truncated;
                        self.objects.set_items(page.objects);
                        self.objects.set_pagination(Pagination {
                            token: page.continuation,
                            truncated,
                        });
                        if self.screen == Screen::ResourceList(Service::S3) {
                            self.set_screen(Screen::ObjectBrowse);
                        }
                        self.reapply_filter(Screen::ObjectBrowse);
                        let more = if truncated { " (n for next page)" } else { "" };
                        self.set_status(format!("s3://{bucket}/{prefix}: {count} entries{more}"));
                    }
                    Err(error) => {
                        if self.screen == Screen::ResourceList(Service::S3) {
                            self.bucket = None;
                            self.prefix.clear();
                        }
                        self.record_error(&format!("Could not list s3://{bucket}/{prefix}"), error);
                    }
                }
                Vec::new()
            }
            CompletionEvent::ObjectDetailLoaded(result) => {
                match result {
                    Ok(details) => {
                        let key = details.key.clone();
                        self.object_detail = Some(details);
                        self.set_screen(Screen::ResourceDetail(DetailKind::Object));
                        self.set_status(format!("Loaded {key}"));
                    }
                    Err(error) => self.record_error("Could not load object", error),
                }
                Vec::new()
            }
            CompletionEvent::PresignedUrl { key, title, result } => {
                match result {
                    Ok(url) => {
                        self.set_status(format!("{title} (Esc to close)"));
                        self.clipboard = Some(ClipboardCopy {
                            label: format!("presigned URL for {key}"),
                            text: url.clone(),
                        });
                        self.info = Some(InfoOverlay { title, body: url });
                    }
                    Err(error) => self.record_error(&title, error),
                }
                Vec::new()
            }
            CompletionEvent::InfoLoaded { title, result } => {
                match result {
                    Ok(body) => {
                        self.set_status(format!("{title} (Esc to close)"));
                        self.info = Some(InfoOverlay { title, body });
                    }
                    Err(error) => self.record_error(&title, error),
                }
                Vec::new()
            }
            CompletionEvent::ClustersLoaded(result) => {
                match result {
                    Ok(clusters) => {
                        let count = clusters.len();
                        self.clusters
                            .replace_items(clusters, |cluster| cluster.name.clone());
                        self.clusters.reveal(self.list_height);
                        self.reapply_filter(Screen::ResourceList(Service::Eks));
                        self.set_status(format!(
                            "Loaded {count} clusters in {}",
                            self.context.region
                        ));
                    }
                    Err(error) => self.record_error("Could not list clusters", error),
                }
                Vec::new()
            }
            CompletionEvent::ClusterDetailLoaded(bundle) => {
                if !bundle.has_data() {
                    let error = bundle
                        .error
                        .unwrap_or_else(|| "no data returned".to_string());
                    self.record_error(&format!("Could not load {}", bundle.cluster_name), error);
                    return Vec::new();
                }
                let partial = bundle.error.clone();
                let name = bundle.cluster_name.clone();
                self.cluster_detail = Some(bundle);
                self.set_screen(Screen::ResourceDetail(DetailKind::Cluster));
                match partial {
                    Some(error) => self.record_error(&format!("{name} loaded partially"), error),
                    None => self.set_status(format!("Loaded cluster {name}")),
                }
                Vec::new()
            }
        }
    }

    fn apply_normal_action(&mut self, action: Action) -> Vec<Task> {
        match action {
            Action::Quit => self.back_or_quit(),
            Action::Back => self.back(),
            Action::Navigate(nav) => {
                self.navigate(nav);
                Vec::new()
            }
            Action::Open => self.open_selected(),
            Action::NextService => match self.screen.service() {
                Some(service) if self.screen != Screen::Help => self.switch_service(service.next()),
                _ => Vec::new(),
            },
            Action::ToggleHelp => {
                if self.screen == Screen::Help {
                    self.close_help();
                } else {
                    self.help_return = self.screen;
                    self.set_screen(Screen::Help);
                    self.set_status("Help (? or Esc to close)");
                }
                Vec::new()
            }
            Action::Refresh => self.refresh(),
            Action::CycleRegion => self.cycle_region(),
            Action::StartSearch => {
                self.start_search();
                Vec::new()
            }
            Action::StartCommand => {
                self.mode = InputMode::Command;
                self.command_input.clear();
                self.hints.clear();
                Vec::new()
            }
            Action::NextMatch => {
                if self.screen == Screen::ObjectBrowse
                    && !self.search.is_active()
                    && self.objects.pagination().truncated
                {
                    let token = self.objects.pagination().token.clone();
                    self.set_status("Loading next page");
                    return self.objects_task(token);
                }
                self.jump_match(true);
                Vec::new()
            }
            Action::PrevMatch => {
                self.jump_match(false);
                Vec::new()
            }
            Action::ToggleSelect => {
                self.toggle_selection();
                Vec::new()
            }
            Action::ClearSelection => {
                self.deselect_all();
                Vec::new()
            }
            Action::ToggleAutoRefresh => {
                self.auto_refresh = !self.auto_refresh;
                self.set_status(if self.auto_refresh {
                    format!("Auto-refresh on (every {}s)", self.config.auto_refresh_secs)
                } else {
                    "Auto-refresh off".to_string()
                });
                Vec::new()
            }
            Action::StartInstance => self.prepare_instance_action(InstanceVerb::Start),
            Action::StopInstance => self.prepare_instance_action(InstanceVerb::Stop),
            Action::RebootInstance => self.prepare_instance_action(InstanceVerb::Reboot),
            Action::TerminateInstance => self.prepare_instance_action(InstanceVerb::Terminate),
            Action::ConnectShell => self.connect_shell(),
            Action::CopyAddress => {
                self.copy_address();
                Vec::new()
            }
            Action::Download => self.download_object(),
            Action::Delete => self.prepare_delete(),
            Action::Presign => self.presign_or_policy(),
            Action::Versioning => self.bucket_versioning(),
            Action::EditObject => self.edit_object(),
            Action::UpdateKubeconfig => self.update_kubeconfig(),
            Action::OpenDashboard => self.open_dashboard(),
            Action::ParentPrefix => {
                if self.screen == Screen::ObjectBrowse {
                    self.parent_prefix()
                } else {
                    Vec::new()
                }
            }
            Action::SubmitInput
            | Action::CompleteInput
            | Action::CancelInput
            | Action::Backspace
            | Action::InputChar(_)
            | Action::ConfirmYes
            | Action::ConfirmNo => Vec::new(),
        }
    }

    fn apply_search_action(&mut self, action: Action) -> Vec<Task> {
        match action {
            Action::InputChar(c) => {
                self.search.push(c);
                self.live_search();
            }
            Action::Backspace => {
                self.search.pop();
                self.live_search();
            }
            Action::SubmitInput => {
                self.search.commit();
                self.mode = InputMode::Normal;
                if self.search.is_active() {
                    let query = self.search.last_applied().to_string();
                    let count = self.search.matches().len();
                    self.set_status(format!("/{query}: {count} matches"));
                } else {
                    if let Some(list) = self.active_list() {
                        list.clear_filter();
                    }
                    self.set_status("Filter cleared");
                }
            }
            Action::CancelInput => {
                self.search.cancel();
                self.mode = InputMode::Normal;
                let query = self.search.last_applied().to_string();
                if query.is_empty() {
                    if let Some(list) = self.active_list() {
                        list.clear_filter();
                    }
                } else if let Some(matches) = self.active_list().map(|list| list.refilter(&query)) {
                    self.search.resync(matches);
                    let (position, height) = (self.search.position(), self.list_height);
                    if let Some(list) = self.active_list() {
                        list.select(position, height);
                    }
                }
            }
            _ => {}
        }
        Vec::new()
    }

    fn apply_command_action(&mut self, action: Action) -> Vec<Task> {
        match action {
            Action::InputChar(c) => {
                self.command_input.push(c);
                self.hints.clear();
                Vec::new()
            }
            Action::Backspace => {
                self.command_input.pop();
                self.hints.clear();
                Vec::new()
            }
            Action::CompleteInput => {
                match command::complete(&self.command_input) {
                    Suggestion::Unique(verb) => {
                        self.command_input = verb;
                        self.hints.clear();
                    }
                    Suggestion::Partial { prefix, matches } => {
                        if prefix.len() > self.command_input.len() {
                            self.command_input = prefix;
                        }
                        self.hints = matches;
                    }
                    Suggestion::None => self.hints.clear(),
                }
                Vec::new()
            }
            Action::SubmitInput => {
                let line = std::mem::take(&mut self.command_input);
                self.mode = InputMode::Normal;
                self.hints.clear();
                self.execute_command(command::parse(&line))
            }
            Action::CancelInput => {
                self.command_input.clear();
                self.hints.clear();
                self.mode = InputMode::Normal;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn apply_prompt_action(&mut self, action: Action) -> Vec<Task> {
        let Some(mut prompt) = self.prompt.take() else {
            return Vec::new();
        };
        match action {
            Action::InputChar(c) => {
                prompt.buffer.push(c);
                self.prompt = Some(prompt);
                Vec::new()
            }
            Action::Backspace => {
                prompt.buffer.pop();
                self.prompt = Some(prompt);
                Vec::new()
            }
            Action::SubmitInput => self.submit_prompt(prompt),
            Action::CancelInput => {
                self.set_status("Cancelled");
                Vec::new()
            }
            _ => {
                self.prompt = Some(prompt);
                Vec::new()
            }
        }
    }

    fn execute_command(&mut self, command: Command) -> Vec<Task> {
        if command.is_noop() {
            return Vec::new();
        }
        let Some(verb) = command::resolve(&command.name) else {
            self.set_status(format!("Unknown command: {}", command.name));
            return Vec::new();
        };

        match verb {
            Verb::Quit => self.back_or_quit(),
            Verb::QuitAll => {
                self.quit();
                Vec::new()
            }
            Verb::Refresh => self.refresh(),
            Verb::Help => {
                if self.screen != Screen::Help {
                    self.help_return = self.screen;
                    self.set_screen(Screen::Help);
                }
                Vec::new()
            }
            Verb::ClearFilter => {
                self.clear_filter();
                Vec::new()
            }
            Verb::SelectAll => {
                self.select_all();
                Vec::new()
            }
            Verb::DeselectAll => {
                self.deselect_all();
                Vec::new()
            }
            Verb::Service(service) => self.switch_service(service),
            Verb::Account => self.open_accounts(),
            Verb::Region => match command.args.first() {
                Some(region) if !self.config.regions.contains(region) => {
                    self.set_status(format!("Unknown region: {region}"));
                    Vec::new()
                }
                Some(region) => self.switch_region(region.clone()),
                None => {
                    self.open_region_select();
                    Vec::new()
                }
            },
        }
    }

    fn submit_prompt(&mut self, prompt: Prompt) -> Vec<Task> {
        let value = prompt.buffer.trim().to_string();
        match prompt.kind {
            PromptKind::ProfileName => {
                if !valid_profile_name(&value) {
                    self.set_status(if value.is_empty() {
                        "Profile name cannot be empty".to_string()
                    } else {
                        format!("Invalid profile name: {value}")
                    });
                    return Vec::new();
                }
                let config = AuthConfig::profile(&value);
                self.auth = Some(config.clone());
                self.context.profile = Some(value);
                self.context.credentials = None;
                self.context.account = None;
                let mut tasks =
                    vec![self.issue(Origin::new(Area::Auth), TaskKind::SaveAuth(config))];
                tasks.extend(self.enter_service(Service::Ec2));
                tasks
            }
            PromptKind::SsoStartUrl => {
                let mut parts = value.split_whitespace();
                let Some(start_url) = parts
                    .next()
                    .filter(|url| url.starts_with("https://"))
                    .map(str::to_string)
                else {
                    self.set_status("SSO start URL must start with https://");
                    return Vec::new();
                };
                let region = parts
                    .next()
                    .map(str::to_string)
                    .unwrap_or_else(|| self.context.region.clone());
                let config = AuthConfig::sso(&start_url, &region);
                self.auth = Some(config.clone());
                let mut tasks =
                    vec![self.issue(Origin::new(Area::Auth), TaskKind::SaveAuth(config))];
                tasks.extend(self.start_sso(start_url, region));
                tasks
            }
            PromptKind::DeleteObject {
                bucket,
                key,
                expected,
            } => {
                if value != expected {
                    self.set_status(format!("Name does not match '{expected}'; nothing deleted"));
                    return Vec::new();
                }
                self.set_status(format!("Deleting s3://{bucket}/{key}"));
                let origin = self.location_origin();
                vec![self.issue(origin, TaskKind::DeleteObject { bucket, key })]
            }
            PromptKind::DeleteBucket { bucket } => {
                if value != bucket {
                    self.set_status(format!("Name does not match '{bucket}'; nothing deleted"));
                    return Vec::new();
                }
                self.set_status(format!("Deleting bucket {bucket}"));
                vec![self.issue(Origin::new(Area::S3), TaskKind::DeleteBucket { bucket })]
            }
        }
    }

    fn issue(&mut self, mut origin: Origin, kind: TaskKind) -> Task {
        self.in_flight += 1;
        origin.generation = self.generation;
        Task {
            origin,
            context: self.context.clone(),
            kind,
        }
    }

    fn record_error(&mut self, what: &str, error: String) {
        self.set_status(format!("{what}: {}", summarize_error_line(&error)));
        self.last_error = Some(error);
    }

    fn quit(&mut self) {
        self.running = false;
        self.exit = Some(ExitReason::Quit);
        self.set_status("Exit requested");
    }

    fn request_handoff(&mut self, request: HandoffRequest) -> Vec<Task> {
        debug!(?request, "handing the terminal to a child process");
        self.running = false;
        self.exit = Some(ExitReason::Handoff(request));
        Vec::new()
    }

    /// The screen a handoff or region change should come back to.
    fn base_screen(&self) -> Screen {
        match self.screen {
            Screen::Help => self.help_return,
            Screen::RegionSelect => self.region_return,
            screen => screen,
        }
    }

    fn view_screen(&self) -> Screen {
        if self.screen == Screen::Help {
            self.help_return
        } else {
            self.screen
        }
    }

    fn current_area(&self) -> Area {
        self.view_screen().area()
    }

    fn location_scope(&self) -> Option<String> {
        self.bucket
            .as_ref()
            .map(|bucket| format!("{bucket}/{}", self.prefix))
    }

    fn location_origin(&self) -> Origin {
        match self.location_scope() {
            Some(scope) => Origin::scoped(Area::S3, scope),
            None => Origin::new(Area::S3),
        }
    }

    fn is_current(&self, origin: &Origin) -> bool {
        origin.area == self.current_area()
            && origin
                .scope
                .as_ref()
                .is_none_or(|scope| Some(scope) == self.location_scope().as_ref())
            && origin
                .target
                .as_ref()
                .is_none_or(|target| Some(target) == self.detail_target(origin.area))
    }

    /// The single resource a detail load in `area` must still be about.
    fn detail_target(&self, area: Area) -> Option<&String> {
        match area {
            Area::Ec2 => self.instance_id.as_ref(),
            Area::S3 => self.object_key.as_ref(),
            Area::Eks => self.cluster.as_ref(),
            Area::Auth | Area::Accounts | Area::Regions | Area::Help => None,
        }
    }

    fn set_screen(&mut self, screen: Screen) {
        if screen == self.screen {
            return;
        }
        if self.mode == InputMode::Search {
            self.search.cancel();
            self.mode = InputMode::Normal;
        }
        let help_round_trip = screen == Screen::Help || self.screen == Screen::Help;
        if !help_round_trip {
            self.selection.clear();
            self.detail_scroll = 0;
        }
        if screen == Screen::Help {
            self.help_scroll = 0;
        }
        self.info = None;
        self.screen = screen;
    }

    fn close_help(&mut self) {
        let target = self.help_return;
        self.set_screen(target);
        self.set_status(target.title());
    }

    fn list_for(&mut self, screen: Screen) -> Option<&mut dyn ListOps> {
        let list: &mut dyn ListOps = match screen {
            Screen::AuthSelect => &mut self.auth_methods,
            Screen::AccountSelect => &mut self.accounts,
            Screen::RegionSelect => &mut self.regions,
            Screen::ResourceList(Service::Ec2) => &mut self.instances,
            Screen::ResourceList(Service::S3) => &mut self.buckets,
            Screen::ObjectBrowse => &mut self.objects,
            Screen::ResourceList(Service::Eks) => &mut self.clusters,
            Screen::ResourceDetail(_) | Screen::Help => return None,
        };
        Some(list)
    }

    fn active_list(&mut self) -> Option<&mut dyn ListOps> {
        self.list_for(self.screen)
    }

    fn navigate(&mut self, nav: NavAction) {
        let (page_size, height) = (self.config.page_size, self.list_height);
        match self.screen {
            Screen::Help => {
                self.help_scroll = scroll_offset(nav, self.help_scroll, self.scroll_extent, height);
            }
            Screen::ResourceDetail(_) => {
                self.detail_scroll =
                    scroll_offset(nav, self.detail_scroll, self.scroll_extent, height);
            }
            _ => {
                if let Some(list) = self.active_list() {
                    list.navigate(nav, page_size, height);
                }
            }
        }
    }

    fn start_search(&mut self) {
        if self.active_list().is_none() {
            self.set_status("Nothing to search on this screen");
            return;
        }
        self.search.begin();
        self.mode = InputMode::Search;
        if let Some(list) = self.active_list() {
            list.clear_filter();
        }
    }

    fn live_search(&mut self) {
        let query = self.search.query().to_string();
        let height = self.list_height;
        let matches = match self.active_list() {
            Some(list) => {
                let matches = list.refilter(&query);
                list.reveal(height);
                matches
            }
            None => Vec::new(),
        };
        self.search.set_matches(matches);
    }

    /// Re-runs the committed (or in-progress) query after the list under it was replaced.
    fn reapply_filter(&mut self, screen: Screen) {
        if self.view_screen() != screen {
            return;
        }
        let query = match self.mode {
            InputMode::Search => self.search.query().to_string(),
            _ => self.search.last_applied().to_string(),
        };
        if query.is_empty() {
            return;
        }
        let height = self.list_height;
        if let Some(list) = self.list_for(screen) {
            let matches = list.refilter(&query);
            list.reveal(height);
            self.search.set_matches(matches);
        }
    }

    fn jump_match(&mut self, forward: bool) {
        let position = if forward {
            self.search.next_match()
        } else {
            self.search.prev_match()
        };
        let Some(position) = position else {
            self.set_status("No active search");
            return;
        };
        let height = self.list_height;
        if let Some(list) = self.active_list() {
            list.select(position, height);
        }
        let total = self.search.matches().len();
        self.set_status(format!("Match {} of {total}", position + 1));
    }

    fn clear_filter(&mut self) {
        let had_filter = self.search.is_active();
        self.reset_search();
        if had_filter {
            self.set_status("Filter cleared");
        }
    }

    fn reset_search(&mut self) {
        self.search.clear();
        for screen in [
            Screen::AuthSelect,
            Screen::AccountSelect,
            Screen::RegionSelect,
            Screen::ResourceList(Service::Ec2),
            Screen::ResourceList(Service::S3),
            Screen::ObjectBrowse,
            Screen::ResourceList(Service::Eks),
        ] {
            if let Some(list) = self.list_for(screen) {
                list.clear_filter();
            }
        }
    }

    fn clear_resources(&mut self) {
        self.instances.clear();
        self.buckets.clear();
        self.objects.clear();
        self.clusters.clear();
        self.instance_detail = None;
        self.object_detail = None;
        self.cluster_detail = None;
        self.info = None;
        self.bucket = None;
        self.prefix.clear();
        self.object_key = None;
        self.cluster = None;
        self.instance_id = None;
        self.selection.clear();
        self.reset_search();
    }

    fn ready_for_resources(&self) -> bool {
        match &self.auth {
            None => false,
            Some(auth) => auth.method != AuthMethod::Sso || self.context.credentials.is_some(),
        }
    }

    fn back(&mut self) -> Vec<Task> {
        if self.info.take().is_some() {
            return Vec::new();
        }
        match self.screen {
            Screen::Help => {
                self.close_help();
                Vec::new()
            }
            Screen::RegionSelect => {
                let target = self.region_return;
                self.set_screen(target);
                self.set_status(format!("Region unchanged ({})", self.context.region));
                Vec::new()
            }
            Screen::ResourceDetail(DetailKind::Instance) => {
                self.set_screen(Screen::ResourceList(Service::Ec2));
                Vec::new()
            }
            Screen::ResourceDetail(DetailKind::Object) => {
                self.object_key = None;
                self.set_screen(Screen::ObjectBrowse);
                Vec::new()
            }
            Screen::ResourceDetail(DetailKind::Cluster) => {
                self.set_screen(Screen::ResourceList(Service::Eks));
                Vec::new()
            }
            _ if self.search.is_active() => {
                self.clear_filter();
                Vec::new()
            }
            Screen::ObjectBrowse => self.parent_prefix(),
            Screen::ResourceList(Service::S3) if self.bucket.is_some() => {
                self.bucket = None;
                self.prefix.clear();
                self.set_status("Cancelled");
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn back_or_quit(&mut self) -> Vec<Task> {
        if self.info.is_some() {
            return self.back();
        }
        match self.screen {
            Screen::Help | Screen::RegionSelect | Screen::ResourceDetail(_) => self.back(),
            Screen::ObjectBrowse => self.back_to_buckets(),
            Screen::AccountSelect if self.context.credentials.is_some() => {
                self.set_screen(Screen::ResourceList(Service::Ec2));
                Vec::new()
            }
            _ => {
                self.quit();
                Vec::new()
            }
        }
    }

    fn open_selected(&mut self) -> Vec<Task> {
        match self.screen {
            Screen::AuthSelect => match self.auth_methods.selected().copied() {
                Some(method) => self.choose_auth(method),
                None => Vec::new(),
            },
            Screen::AccountSelect => self.switch_account(),
            Screen::RegionSelect => match self.regions.selected().cloned() {
                Some(Region(region)) => self.switch_region(region),
                None => Vec::new(),
            },
            Screen::ResourceList(Service::Ec2) => {
                match self.instances.selected().map(|instance| instance.id.clone()) {
                    Some(id) => vec![self.load_instance_detail(id)],
                    None => {
                        self.set_status("No instance selected");
                        Vec::new()
                    }
                }
            }
            Screen::ResourceList(Service::S3) => {
                match self.buckets.selected().map(|bucket| bucket.name.clone()) {
                    Some(name) => self.open_bucket(name),
                    None => {
                        self.set_status("No bucket selected");
                        Vec::new()
                    }
                }
            }
            Screen::ObjectBrowse => match self.objects.selected().cloned() {
                Some(object) if object.is_folder => self.open_prefix(object.key),
                Some(object) => self.load_object_detail(object.key),
                None => Vec::new(),
            },
            Screen::ResourceList(Service::Eks) => {
                match self.clusters.selected().map(|cluster| cluster.name.clone()) {
                    Some(name) => vec![self.load_cluster_detail(name)],
                    None => {
                        self.set_status("No cluster selected");
                        Vec::new()
                    }
                }
            }
            Screen::ResourceDetail(_) | Screen::Help => Vec::new(),
        }
    }

    fn choose_auth(&mut self, method: AuthMethod) -> Vec<Task> {
        match method {
            AuthMethod::Env => {
                let config = AuthConfig::env();
                self.auth = Some(config.clone());
                self.context.profile = None;
                self.context.credentials = None;
                self.context.account = None;
                let mut tasks =
                    vec![self.issue(Origin::new(Area::Auth), TaskKind::SaveAuth(config))];
                tasks.extend(self.enter_service(Service::Ec2));
                tasks
            }
            AuthMethod::Profile => {
                self.prompt = Some(Prompt::new(PromptKind::ProfileName));
                Vec::new()
            }
            AuthMethod::Sso => {
                self.prompt = Some(Prompt::new(PromptKind::SsoStartUrl));
                Vec::new()
            }
        }
    }

    fn start_sso(&mut self, start_url: String, region: String) -> Vec<Task> {
        self.set_screen(Screen::AccountSelect);
        self.accounts.clear();
        self.set_status(format!("Signing in to {start_url}"));
        vec![self.issue(
            Origin::new(Area::Accounts),
            TaskKind::Authenticate { start_url, region },
        )]
    }

    fn open_accounts(&mut self) -> Vec<Task> {
        if let Some(session) = self.sso.clone() {
            self.set_screen(Screen::AccountSelect);
            if self.accounts.items().is_empty() {
                return vec![self.issue(
                    Origin::new(Area::Accounts),
                    TaskKind::LoadAccessTargets(session),
                )];
            }
            return Vec::new();
        }
        match self.auth.clone() {
            Some(AuthConfig {
                method: AuthMethod::Sso,
                sso_start_url: Some(start_url),
                sso_region,
                ..
            }) => {
                let region = sso_region.unwrap_or_else(|| self.context.region.clone());
                self.start_sso(start_url, region)
            }
            _ => {
                self.set_screen(Screen::AuthSelect);
                self.set_status("Account switching needs SSO; pick SSO to sign in");
                Vec::new()
            }
        }
    }

    fn switch_account(&mut self) -> Vec<Task> {
        let Some(target) = self.accounts.selected().cloned() else {
            self.set_status("No account selected");
            return Vec::new();
        };
        let Some(session) = self.sso.clone() else {
            self.set_status("No SSO session; press r to sign in again");
            return Vec::new();
        };
        self.set_status(format!(
            "Requesting credentials for {} as {}",
            target.account_name, target.role_name
        ));
        vec![self.issue(
            Origin::new(Area::Accounts),
            TaskKind::SwitchAccount { session, target },
        )]
    }

    fn switch_service(&mut self, service: Service) -> Vec<Task> {
        if !self.ready_for_resources() {
            self.set_status("Finish signing in first");
            return Vec::new();
        }
        self.enter_service(service)
    }

    fn enter_service(&mut self, service: Service) -> Vec<Task> {
        self.reset_search();
        if service == Service::S3 {
            self.bucket = None;
            self.prefix.clear();
            self.object_key = None;
            self.objects.clear();
        }
        self.set_screen(Screen::ResourceList(service));
        let (area, kind) = match service {
            Service::Ec2 => (Area::Ec2, TaskKind::LoadInstances),
            Service::S3 => (Area::S3, TaskKind::LoadBuckets),
            Service::Eks => (Area::Eks, TaskKind::LoadClusters),
        };
        self.set_status(format!("Loading {service} in {}", self.context.region));
        vec![self.issue(Origin::new(area), kind)]
    }

    fn open_region_select(&mut self) {
        if self.screen != Screen::RegionSelect {
            self.region_return = self.base_screen();
            self.set_screen(Screen::RegionSelect);
        }
        let height = self.list_height;
        let current = self
            .regions
            .items()
            .iter()
            .position(|region| region.0 == self.context.region)
            .unwrap_or(0);
        self.regions.clear_filter();
        self.regions.select(current, height);
        self.set_status(format!("Current region: {}", self.context.region));
    }

    fn cycle_region(&mut self) -> Vec<Task> {
        let regions = &self.config.regions;
        if regions.is_empty() {
            return Vec::new();
        }
        let next = regions
            .iter()
            .position(|region| *region == self.context.region)
            .map(|index| (index + 1) % regions.len())
            .unwrap_or(0);
        let region = regions[next].clone();
        self.switch_region(region)
    }

    fn switch_region(&mut self, region: String) -> Vec<Task> {
        let from = self.base_screen();
        self.context.region = region;
        if !self.ready_for_resources() {
            self.set_screen(from);
            self.set_status(format!("Region set to {}", self.context.region));
            return Vec::new();
        }
        self.clear_resources();
        self.enter_service(from.service().unwrap_or(Service::Ec2))
    }

    fn refresh(&mut self) -> Vec<Task> {
        match self.view_screen() {
            Screen::ResourceList(Service::Ec2) => {
                vec![self.issue(Origin::new(Area::Ec2), TaskKind::LoadInstances)]
            }
            Screen::ResourceDetail(DetailKind::Instance) => match self.instance_id.clone() {
                Some(id) => vec![self.load_instance_detail(id)],
                None => Vec::new(),
            },
            Screen::ResourceList(Service::S3) => {
                vec![self.issue(Origin::new(Area::S3), TaskKind::LoadBuckets)]
            }
            Screen::ObjectBrowse => self.objects_task(None),
            Screen::ResourceDetail(DetailKind::Object) => match self.object_key.clone() {
                Some(key) => self.load_object_detail(key),
                None => Vec::new(),
            },
            Screen::ResourceList(Service::Eks) => {
                vec![self.issue(Origin::new(Area::Eks), TaskKind::LoadClusters)]
            }
            Screen::ResourceDetail(DetailKind::Cluster) => match self.cluster.clone() {
                Some(name) => vec![self.load_cluster_detail(name)],
                None => Vec::new(),
            },
            Screen::AccountSelect => {
                self.sso = None;
                self.open_accounts()
            }
            Screen::AuthSelect | Screen::RegionSelect | Screen::Help => {
                self.set_status("Nothing to refresh here");
                Vec::new()
            }
        }
    }

    fn load_instance_detail(&mut self, id: String) -> Task {
        self.instance_id = Some(id.clone());
        self.set_status(format!("Loading {id}"));
        let origin = Origin::new(Area::Ec2).targeting(id.clone());
        self.issue(origin, TaskKind::LoadInstanceDetail { id })
    }

    fn load_cluster_detail(&mut self, name: String) -> Task {
        self.cluster = Some(name.clone());
        self.set_status(format!("Loading cluster {name}"));
        let origin = Origin::new(Area::Eks).targeting(name.clone());
        self.issue(origin, TaskKind::LoadClusterDetail { name })
    }

    fn load_object_detail(&mut self, key: String) -> Vec<Task> {
        let Some(bucket) = self.bucket.clone() else {
            return Vec::new();
        };
        self.object_key = Some(key.clone());
        let origin = self.location_origin().targeting(key.clone());
        vec![self.issue(origin, TaskKind::LoadObjectDetail { bucket, key })]
    }

    fn objects_task(&mut self, token: Option<String>) -> Vec<Task> {
        let Some(bucket) = self.bucket.clone() else {
            return Vec::new();
        };
        let prefix = self.prefix.clone();
        let origin = self.location_origin();
        vec![self.issue(
            origin,
            TaskKind::LoadObjects {
                bucket,
                prefix,
                token,
            },
        )]
    }

    fn open_bucket(&mut self, name: String) -> Vec<Task> {
        self.reset_search();
        self.set_status(format!("Opening s3://{name}"));
        self.bucket = Some(name);
        self.prefix.clear();
        self.object_key = None;
        self.objects.clear();
        self.objects_task(None)
    }

    fn open_prefix(&mut self, prefix: String) -> Vec<Task> {
        self.reset_search();
        self.prefix = prefix;
        self.objects.clear();
        self.objects_task(None)
    }

    fn parent_prefix(&mut self) -> Vec<Task> {
        if self.prefix.is_empty() {
            return self.back_to_buckets();
        }
        let trimmed = self.prefix.trim_end_matches('/');
        let parent = match trimmed.rfind('/') {
            Some(index) => trimmed[..=index].to_string(),
            None => String::new(),
        };
        self.open_prefix(parent)
    }

    fn back_to_buckets(&mut self) -> Vec<Task> {
        self.reset_search();
        self.bucket = None;
        self.prefix.clear();
        self.object_key = None;
        self.objects.clear();
        self.set_screen(Screen::ResourceList(Service::S3));
        if self.buckets.items().is_empty() {
            return vec![self.issue(Origin::new(Area::S3), TaskKind::LoadBuckets)];
        }
        Vec::new()
    }

    fn toggle_selection(&mut self) {
        if self.screen != Screen::ResourceList(Service::Ec2) {
            self.set_status("Multi-select works on the instance list");
            return;
        }
        let Some(id) = self.instances.selected().map(|instance| instance.id.clone()) else {
            return;
        };
        if !self.selection.remove(&id) {
            self.selection.insert(id);
        }
        self.set_status(format!("{} selected", self.selection.len()));
    }

    fn select_all(&mut self) {
        if self.view_screen() != Screen::ResourceList(Service::Ec2) {
            self.set_status("Select-all works on the instance list");
            return;
        }
        self.selection = self
            .instances
            .active()
            .iter()
            .map(|instance| instance.id.clone())
            .collect();
        self.set_status(format!("{} selected", self.selection.len()));
    }

    fn deselect_all(&mut self) {
        self.selection.clear();
        self.set_status("Selection cleared");
    }

    fn focused_instance(&self) -> Option<(String, String)> {
        match self.screen {
            Screen::ResourceList(Service::Ec2) => self
                .instances
                .selected()
                .map(|instance| (instance.id.clone(), instance.state.clone())),
            Screen::ResourceDetail(DetailKind::Instance) => {
                let id = self.instance_id.clone()?;
                let state = self
                    .instance_detail
                    .as_ref()
                    .and_then(|bundle| bundle.details.as_ref())
                    .map(|details| details.instance.state.clone())
                    .unwrap_or_default();
                Some((id, state))
            }
            _ => None,
        }
    }

    fn prepare_instance_action(&mut self, verb: InstanceVerb) -> Vec<Task> {
        let bulk = self.screen == Screen::ResourceList(Service::Ec2) && !self.selection.is_empty();
        let ids = if bulk {
            self.selection.iter().cloned().collect::<Vec<_>>()
        } else {
            match self.focused_instance() {
                Some((id, _)) => vec![id],
                None => {
                    self.set_status("No instance selected");
                    return Vec::new();
                }
            }
        };

        let prompt = match ids.as_slice() {
            [id] => format!("{} instance {id}", verb.title()),
            _ => format!("{} {} instances", verb.title(), ids.len()),
        };
        self.set_status(format!("{prompt}? [y/n]"));
        self.pending_confirmation = Some(PendingConfirmation {
            prompt,
            origin: Origin::new(Area::Ec2),
            kind: TaskKind::MutateInstances { verb, ids },
        });
        Vec::new()
    }

    fn on_instances_mutated(
        &mut self,
        verb: InstanceVerb,
        outcome: BulkOutcome,
        current: bool,
    ) -> Vec<Task> {
        self.selection.clear();
        let summary = format!(
            "{}: {} succeeded, {} failed of {}",
            verb.title(),
            outcome.succeeded,
            outcome.failed,
            outcome.targeted
        );
        match outcome.first_error {
            Some(error) => self.record_error(&summary, error),
            None => self.set_status(summary),
        }
        if current {
            vec![self.issue(Origin::new(Area::Ec2), TaskKind::LoadInstances)]
        } else {
            Vec::new()
        }
    }

    fn connect_shell(&mut self) -> Vec<Task> {
        let Some((id, state)) = self.focused_instance() else {
            self.set_status("No instance selected");
            return Vec::new();
        };
        if !state.is_empty() && state != "running" {
            self.set_status(format!("{id} is {state}; SSM needs a running instance"));
            return Vec::new();
        }
        let agent_down = self.screen == Screen::ResourceDetail(DetailKind::Instance)
            && self
                .instance_detail
                .as_ref()
                .is_some_and(|bundle| bundle.ssm.is_some() && !bundle.ssm_connected());
        if agent_down {
            self.set_status(format!("SSM agent on {id} is not connected"));
            return Vec::new();
        }
        self.request_handoff(HandoffRequest::SsmShell { instance_id: id })
    }

    /// Copies the focused instance's public IP, falling back to its private IP and then its id.
    fn copy_address(&mut self) {
        let instance = match self.screen {
            Screen::ResourceList(Service::Ec2) => self.instances.selected().cloned(),
            Screen::ResourceDetail(DetailKind::Instance) => self
                .instance_detail
                .as_ref()
                .and_then(|bundle| bundle.details.as_ref())
                .map(|details| details.instance.clone()),
            _ => None,
        };
        let Some(instance) = instance else {
            self.set_status("No instance selected");
            return;
        };
        let (label, text) = if !instance.public_ip.is_empty() {
            ("public IP", instance.public_ip)
        } else if !instance.private_ip.is_empty() {
            ("private IP", instance.private_ip)
        } else {
            ("instance id", instance.id)
        };
        self.clipboard = Some(ClipboardCopy {
            label: format!("{label} {text}"),
            text,
        });
    }

    /// The object under the cursor or on the detail screen, with its folder flag.
    fn focused_object(&self) -> Option<(String, bool)> {
        match self.screen {
            Screen::ObjectBrowse => self
                .objects
                .selected()
                .map(|object| (object.key.clone(), object.is_folder)),
            Screen::ResourceDetail(DetailKind::Object) => {
                self.object_key.clone().map(|key| (key, false))
            }
            _ => None,
        }
    }

    fn focused_file(&mut self) -> Option<(String, String)> {
        let bucket = self.bucket.clone()?;
        match self.focused_object() {
            Some((key, false)) => Some((bucket, key)),
            Some((_, true)) => {
                self.set_status("Select a file, not a folder");
                None
            }
            None => {
                self.set_status("No object selected");
                None
            }
        }
    }

    fn focused_bucket(&self) -> Option<String> {
        match self.screen {
            Screen::ResourceList(Service::S3) => {
                self.buckets.selected().map(|bucket| bucket.name.clone())
            }
            Screen::ObjectBrowse | Screen::ResourceDetail(DetailKind::Object) => {
                self.bucket.clone()
            }
            _ => None,
        }
    }

    fn download_object(&mut self) -> Vec<Task> {
        let Some((bucket, key)) = self.focused_file() else {
            return Vec::new();
        };
        let dest = PathBuf::from(file_name(&key));
        self.set_status(format!("Downloading {key}"));
        let origin = self.location_origin();
        vec![self.issue(origin, TaskKind::DownloadObject { bucket, key, dest })]
    }

    fn prepare_delete(&mut self) -> Vec<Task> {
        match self.screen {
            Screen::ObjectBrowse | Screen::ResourceDetail(DetailKind::Object) => {
                if let Some((bucket, key)) = self.focused_file() {
                    let expected = file_name(&key);
                    self.prompt = Some(Prompt::new(PromptKind::DeleteObject {
                        bucket,
                        key,
                        expected,
                    }));
                }
            }
            Screen::ResourceList(Service::S3) => match self.focused_bucket() {
                Some(bucket) => {
                    self.prompt = Some(Prompt::new(PromptKind::DeleteBucket { bucket }));
                }
                None => self.set_status("No bucket selected"),
            },
            _ => self.set_status("Nothing to delete here"),
        }
        Vec::new()
    }

    fn presign_or_policy(&mut self) -> Vec<Task> {
        match self.screen {
            Screen::ObjectBrowse | Screen::ResourceDetail(DetailKind::Object) => {
                let Some((bucket, key)) = self.focused_file() else {
                    return Vec::new();
                };
                let expires_secs = self.config.presign_expiry_secs;
                let origin = self.location_origin();
                vec![self.issue(
                    origin,
                    TaskKind::PresignObject {
                        bucket,
                        key,
                        expires_secs,
                    },
                )]
            }
            Screen::ResourceList(Service::S3) => match self.focused_bucket() {
                Some(bucket) => {
                    vec![self.issue(Origin::new(Area::S3), TaskKind::LoadBucketPolicy { bucket })]
                }
                None => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    fn bucket_versioning(&mut self) -> Vec<Task> {
        match self.focused_bucket() {
            Some(bucket) => vec![self.issue(
                Origin::new(Area::S3),
                TaskKind::LoadBucketVersioning { bucket },
            )],
            None => Vec::new(),
        }
    }

    fn edit_object(&mut self) -> Vec<Task> {
        match self.focused_file() {
            Some((bucket, key)) => self.request_handoff(HandoffRequest::EditObject { bucket, key }),
            None => Vec::new(),
        }
    }

    fn focused_cluster(&self) -> Option<(String, Option<String>)> {
        match self.screen {
            Screen::ResourceList(Service::Eks) => self.clusters.selected().map(|cluster| {
                let arn = Some(cluster.arn.clone()).filter(|arn| !arn.is_empty());
                (cluster.name.clone(), arn)
            }),
            Screen::ResourceDetail(DetailKind::Cluster) => {
                let name = self.cluster.clone()?;
                let arn = self
                    .cluster_detail
                    .as_ref()
                    .and_then(|bundle| bundle.details.as_ref())
                    .map(|details| details.cluster.arn.clone())
                    .filter(|arn| !arn.is_empty());
                Some((name, arn))
            }
            _ => None,
        }
    }

    fn update_kubeconfig(&mut self) -> Vec<Task> {
        let Some((cluster, _)) = self.focused_cluster() else {
            return Vec::new();
        };
        self.set_status(format!("Updating kubeconfig for {cluster}"));
        vec![self.issue(Origin::new(Area::Eks), TaskKind::UpdateKubeconfig { cluster })]
    }

    fn open_dashboard(&mut self) -> Vec<Task> {
        match self.focused_cluster() {
            Some((cluster, arn)) => {
                self.request_handoff(HandoffRequest::ClusterDashboard { cluster, arn })
            }
            None => Vec::new(),
        }
    }
}

fn valid_profile_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '+'))
}

fn file_name(key: &str) -> String {
    key.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("download")
        .to_string()
}

pub fn summarize_error_line(error: &str) -> String {
    error
        .lines()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| "unknown error".to_string())
}

fn normalize_status_text(status: String) -> String {
    const MAX_STATUS_LEN: usize = 180;
    let status = status
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if status.chars().count() <= MAX_STATUS_LEN {
        return status;
    }

    let mut shortened = status
        .chars()
        .take(MAX_STATUS_LEN.saturating_sub(1))
        .collect::<String>();
    shortened.push('…');
    shortened
}

#[cfg(test)]
mod tests {
    use super::{App, AppEvent, ExitReason, InputMode, normalize_status_text};
    use crate::auth::{AuthProgress, DeviceAuthorization};
    use crate::config::{AppConfig, AuthConfig};
    use crate::handoff::{HandoffRequest, RestoreContext};
    use crate::input::{Action, KeyContext};
    use crate::model::{
        Area, Bucket, CloudContext, ClusterBundle, ClusterDetails, DetailKind, Instance,
        InstanceBundle, InstanceDetails, InstanceVerb, ObjectDetails, ObjectPage, S3Object,
        Screen, Service, SsmAgent,
    };
    use crate::navigation::NavAction;
    use crate::task::{BulkOutcome, Completion, CompletionEvent, Origin, TaskKind};
    use chrono::Utc;

    fn instance(id: &str, name: &str, state: &str) -> Instance {
        Instance {
            id: id.to_string(),
            name: name.to_string(),
            state: state.to_string(),
            ..Instance::default()
        }
    }

    fn ec2_app() -> App {
        let mut app = App::new(
            AppConfig::default(),
            CloudContext::new("eu-west-1"),
            Some(AuthConfig::env()),
        );
        let tasks = app.bootstrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].kind, TaskKind::LoadInstances);
        app
    }

    fn load_instances(app: &mut App, instances: Vec<Instance>) {
        app.apply_completion(Completion {
            origin: Origin::new(Area::Ec2),
            event: CompletionEvent::InstancesLoaded(Ok(instances)),
        });
    }

    fn instance_bundle(id: &str) -> InstanceBundle {
        InstanceBundle {
            instance_id: id.to_string(),
            details: Some(InstanceDetails {
                instance: instance(id, id, "running"),
                ..InstanceDetails::default()
            }),
            ..InstanceBundle::default()
        }
    }

    fn report_page() -> ObjectPage {
        ObjectPage {
            objects: vec![S3Object {
                key: "report.csv".to_string(),
                size: 10,
                ..S3Object::default()
            }],
            continuation: None,
            truncated: false,
        }
    }

    fn report_details() -> ObjectDetails {
        ObjectDetails {
            bucket: "logs".to_string(),
            key: "report.csv".to_string(),
            ..ObjectDetails::default()
        }
    }

    fn search_fixture() -> App {
        let mut app = ec2_app();
        load_instances(
            &mut app,
            vec![
                instance("i-1", "ec2-1", "running"),
                instance("i-2", "ec2-2", "running"),
                instance("i-3", "s3-x", "stopped"),
                instance("i-4", "ec2-3", "running"),
            ],
        );
        app
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            app.apply_action(Action::InputChar(c));
        }
    }

    fn selected_name(app: &App) -> String {
        app.instances()
            .selected()
            .map(|instance| instance.name.clone())
            .unwrap_or_default()
    }

    fn s3_browse_fixture() -> App {
        let mut app = ec2_app();
        app.apply_action(Action::StartCommand);
        type_text(&mut app, "s3");
        app.apply_action(Action::SubmitInput);
        app.apply_completion(Completion {
            origin: Origin::new(Area::S3),
            event: CompletionEvent::BucketsLoaded(Ok(vec![Bucket {
                name: "logs".to_string(),
                ..Bucket::default()
            }])),
        });
        let tasks = app.apply_action(Action::Open);
        assert_eq!(tasks[0].origin, Origin::scoped(Area::S3, "logs/"));
        app.apply_completion(Completion {
            origin: Origin::scoped(Area::S3, "logs/"),
            event: CompletionEvent::ObjectsLoaded {
                bucket: "logs".to_string(),
                prefix: String::new(),
                result: Ok(ObjectPage {
                    objects: vec![S3Object {
                        key: "report.csv".to_string(),
                        size: 10,
                        ..S3Object::default()
                    }],
                    continuation: Some("token-2".to_string()),
                    truncated: true,
                }),
            },
        });
        assert_eq!(app.screen(), Screen::ObjectBrowse);
        app
    }

    #[test]
    fn search_scenario_filters_and_cycles_matches() {
        let mut app = search_fixture();

        app.apply_action(Action::StartSearch);
        type_text(&mut app, "ec2");
        app.apply_action(Action::SubmitInput);

        assert_eq!(app.mode(), InputMode::Normal);
        assert_eq!(app.search().matches(), &[0, 1, 3]);
        assert_eq!(app.instances().len(), 3);
        assert_eq!(selected_name(&app), "ec2-1");

        app.apply_action(Action::NextMatch);
        assert_eq!(selected_name(&app), "ec2-2");
        app.apply_action(Action::NextMatch);
        assert_eq!(selected_name(&app), "ec2-3");
        app.apply_action(Action::NextMatch);
        assert_eq!(selected_name(&app), "ec2-1");
        app.apply_action(Action::PrevMatch);
        assert_eq!(selected_name(&app), "ec2-3");
    }

    #[test]
    fn escape_from_search_keeps_committed_filter() {
        let mut app = search_fixture();
        app.apply_action(Action::StartSearch);
        type_text(&mut app, "ec2");
        app.apply_action(Action::SubmitInput);

        app.apply_action(Action::StartSearch);
        assert_eq!(app.mode(), InputMode::Search);
        assert_eq!(app.search().query(), "");
        type_text(&mut app, "s3");
        assert_eq!(app.instances().len(), 1);

        app.apply_action(Action::CancelInput);
        assert_eq!(app.mode(), InputMode::Normal);
        assert_eq!(app.search().last_applied(), "ec2");
        assert_eq!(app.instances().len(), 3);
    }

    #[test]
    fn escape_after_refresh_resyncs_committed_matches() {
        let mut app = search_fixture();
        app.apply_action(Action::StartSearch);
        type_text(&mut app, "ec2");
        app.apply_action(Action::SubmitInput);
        app.apply_action(Action::NextMatch);
        assert_eq!(app.search().position(), 1);

        app.apply_action(Action::StartSearch);
        load_instances(
            &mut app,
            vec![instance("i-1", "ec2-1", "running"), instance("i-3", "s3-x", "stopped")],
        );
        app.apply_action(Action::CancelInput);

        assert_eq!(app.search().last_applied(), "ec2");
        assert_eq!(app.instances().len(), 1);
        assert_eq!(app.search().matches(), &[0]);
        assert_eq!(app.search().position(), 0);

        app.apply_action(Action::NextMatch);
        assert_eq!(app.status(), "Match 1 of 1");
        assert_eq!(selected_name(&app), "ec2-1");
    }

    #[test]
    fn normal_escape_clears_filter() {
        let mut app = search_fixture();
        app.apply_action(Action::StartSearch);
        type_text(&mut app, "ec2");
        app.apply_action(Action::SubmitInput);

        app.apply_action(Action::Back);
        assert!(!app.search().is_active());
        assert_eq!(app.instances().len(), 4);
    }

    #[test]
    fn committed_filter_reapplies_to_fresh_data() {
        let mut app = search_fixture();
        app.apply_action(Action::StartSearch);
        type_text(&mut app, "ec2");
        app.apply_action(Action::SubmitInput);

        load_instances(
            &mut app,
            vec![instance("i-1", "ec2-1", "running"), instance("i-9", "db", "running")],
        );
        assert_eq!(app.instances().len(), 1);
        assert_eq!(app.search().matches(), &[0]);
    }

    #[test]
    fn half_page_down_clamps_to_last_row() {
        let mut app = ec2_app();
        let items = (0..10)
            .map(|index| instance(&format!("i-{index}"), "x", "running"))
            .collect();
        load_instances(&mut app, items);
        app.apply(AppEvent::Resize { rows: 10 });
        for _ in 0..5 {
            app.apply_action(Action::Navigate(NavAction::Down));
        }
        assert_eq!(app.instances().selected_index(), 5);

        app.apply_action(Action::Navigate(NavAction::HalfPageDown));
        assert_eq!(app.instances().selected_index(), 9);
    }

    #[test]
    fn resize_keeps_selection_inside_the_window() {
        let mut app = ec2_app();
        let items = (0..30)
            .map(|index| instance(&format!("i-{index}"), "x", "running"))
            .collect();
        load_instances(&mut app, items);
        app.apply(AppEvent::Resize { rows: 10 });
        app.apply_action(Action::Navigate(NavAction::Bottom));
        assert_eq!(app.instances().offset(), 20);

        app.apply(AppEvent::Resize { rows: 4 });
        assert_eq!(app.instances().selected_index(), 29);
        assert_eq!(app.instances().offset(), 26);

        app.apply(AppEvent::Resize { rows: 40 });
        assert_eq!(app.instances().offset(), 0);
    }

    #[test]
    fn partial_fan_out_still_opens_detail() {
        let mut app = search_fixture();
        let tasks = app.apply_action(Action::Open);
        assert_eq!(
            tasks[0].kind,
            TaskKind::LoadInstanceDetail {
                id: "i-1".to_string()
            }
        );
        assert!(app.loading());

        app.apply_completion(Completion {
            origin: tasks[0].origin.clone(),
            event: CompletionEvent::InstanceDetailLoaded(InstanceBundle {
                instance_id: "i-1".to_string(),
                details: Some(InstanceDetails {
                    instance: instance("i-1", "ec2-1", "running"),
                    ..InstanceDetails::default()
                }),
                status: None,
                ssm: Some(SsmAgent {
                    connected: true,
                    ..SsmAgent::default()
                }),
                metrics: None,
                error: Some("status: throttled".to_string()),
            }),
        });

        assert_eq!(app.screen(), Screen::ResourceDetail(DetailKind::Instance));
        assert!(app.last_error().unwrap_or_default().contains("throttled"));
        assert!(!app.loading());
    }

    #[test]
    fn stale_detail_is_discarded_after_leaving_area() {
        let mut app = search_fixture();
        app.apply_action(Action::Open);
        app.apply_action(Action::StartCommand);
        type_text(&mut app, "s3");
        app.apply_action(Action::SubmitInput);
        assert_eq!(app.screen(), Screen::ResourceList(Service::S3));
        assert_eq!(app.in_flight(), 2);

        app.apply_completion(Completion {
            origin: Origin::new(Area::Ec2),
            event: CompletionEvent::InstanceDetailLoaded(InstanceBundle {
                instance_id: "i-1".to_string(),
                details: Some(InstanceDetails::default()),
                ..InstanceBundle::default()
            }),
        });
        assert_eq!(app.screen(), Screen::ResourceList(Service::S3));
        assert!(app.instance_detail().is_none());
        assert_eq!(app.in_flight(), 1);
    }

    #[test]
    fn slower_detail_for_previous_instance_is_discarded() {
        let mut app = search_fixture();
        let first = app.apply_action(Action::Open).remove(0);
        app.apply_action(Action::Navigate(NavAction::Down));
        let second = app.apply_action(Action::Open).remove(0);
        assert_eq!(first.origin.target.as_deref(), Some("i-1"));
        assert_eq!(second.origin.target.as_deref(), Some("i-2"));

        app.apply_completion(Completion {
            origin: second.origin,
            event: CompletionEvent::InstanceDetailLoaded(instance_bundle("i-2")),
        });
        app.apply_completion(Completion {
            origin: first.origin,
            event: CompletionEvent::InstanceDetailLoaded(instance_bundle("i-1")),
        });

        assert_eq!(app.screen(), Screen::ResourceDetail(DetailKind::Instance));
        assert_eq!(
            app.instance_detail().map(|bundle| bundle.instance_id.as_str()),
            Some("i-2")
        );
        assert_eq!(app.in_flight(), 0);

        app.apply_action(Action::TerminateInstance);
        let tasks = app.apply_action(Action::ConfirmYes);
        assert_eq!(
            tasks[0].kind,
            TaskKind::MutateInstances {
                verb: InstanceVerb::Terminate,
                ids: vec!["i-2".to_string()],
            }
        );
    }

    #[test]
    fn slower_detail_for_previous_object_is_discarded() {
        let mut app = s3_browse_fixture();
        app.apply_completion(Completion {
            origin: Origin::scoped(Area::S3, "logs/"),
            event: CompletionEvent::ObjectsLoaded {
                bucket: "logs".to_string(),
                prefix: String::new(),
                result: Ok(ObjectPage {
                    objects: vec![
                        S3Object {
                            key: "a.csv".to_string(),
                            ..S3Object::default()
                        },
                        S3Object {
                            key: "b.csv".to_string(),
                            ..S3Object::default()
                        },
                    ],
                    continuation: None,
                    truncated: false,
                }),
            },
        });
        let first = app.apply_action(Action::Open).remove(0);
        app.apply_action(Action::Navigate(NavAction::Down));
        let second = app.apply_action(Action::Open).remove(0);

        app.apply_completion(Completion {
            origin: first.origin,
            event: CompletionEvent::ObjectDetailLoaded(Ok(ObjectDetails {
                bucket: "logs".to_string(),
                key: "a.csv".to_string(),
                ..ObjectDetails::default()
            })),
        });
        assert_eq!(app.screen(), Screen::ObjectBrowse);
        assert!(app.object_detail().is_none());

        app.apply_completion(Completion {
            origin: second.origin,
            event: CompletionEvent::ObjectDetailLoaded(Ok(ObjectDetails {
                bucket: "logs".to_string(),
                key: "b.csv".to_string(),
                ..ObjectDetails::default()
            })),
        });
        assert_eq!(app.screen(), Screen::ResourceDetail(DetailKind::Object));
        assert_eq!(app.object_detail().map(|detail| detail.key.as_str()), Some("b.csv"));
    }

    #[test]
    fn bulk_action_reports_counts_and_clears_selection() {
        let mut app = search_fixture();
        app.apply_action(Action::ToggleSelect);
        app.apply_action(Action::Navigate(NavAction::Down));
        app.apply_action(Action::ToggleSelect);
        app.apply_action(Action::Navigate(NavAction::Down));
        app.apply_action(Action::ToggleSelect);
        assert_eq!(app.selection_len(), 3);

        app.apply_action(Action::StopInstance);
        assert_eq!(app.key_context(), KeyContext::Confirm);
        let tasks = app.apply_action(Action::ConfirmYes);
        match &tasks[0].kind {
            TaskKind::MutateInstances { ids, .. } => assert_eq!(ids.len(), 3),
            other => panic!("unexpected task {other:?}"),
        }

        let follow_up = app.apply_completion(Completion {
            origin: Origin::new(Area::Ec2),
            event: CompletionEvent::InstancesMutated {
                verb: crate::model::InstanceVerb::Stop,
                outcome: BulkOutcome {
                    targeted: 3,
                    succeeded: 2,
                    failed: 1,
                    first_error: Some("i-3: IncorrectInstanceState".to_string()),
                },
            },
        });
        assert_eq!(app.selection_len(), 0);
        assert!(app.status().contains("2 succeeded, 1 failed of 3"));
        assert_eq!(follow_up[0].kind, TaskKind::LoadInstances);
    }

    #[test]
    fn declined_confirmation_issues_nothing() {
        let mut app = search_fixture();
        app.apply_action(Action::TerminateInstance);
        let tasks = app.apply_action(Action::ConfirmNo);
        assert!(tasks.is_empty());
        assert_eq!(app.key_context(), KeyContext::Normal);
        assert_eq!(app.in_flight(), 0);
    }

    #[test]
    fn typed_delete_requires_exact_name() {
        let mut app = s3_browse_fixture();

        app.apply_action(Action::Delete);
        assert_eq!(app.key_context(), KeyContext::Prompt);
        type_text(&mut app, "wrong");
        let tasks = app.apply_action(Action::SubmitInput);
        assert!(tasks.is_empty());
        assert!(app.status().contains("does not match"));

        app.apply_action(Action::Delete);
        type_text(&mut app, "report.csv");
        let tasks = app.apply_action(Action::SubmitInput);
        assert_eq!(
            tasks[0].kind,
            TaskKind::DeleteObject {
                bucket: "logs".to_string(),
                key: "report.csv".to_string()
            }
        );
    }

    #[test]
    fn next_page_loads_with_continuation_token() {
        let mut app = s3_browse_fixture();
        let tasks = app.apply_action(Action::NextMatch);
        assert_eq!(
            tasks[0].kind,
            TaskKind::LoadObjects {
                bucket: "logs".to_string(),
                prefix: String::new(),
                token: Some("token-2".to_string()),
            }
        );
    }

    #[test]
    fn objects_for_another_prefix_are_stale() {
        let mut app = s3_browse_fixture();
        app.apply_completion(Completion {
            origin: Origin::scoped(Area::S3, "other/"),
            event: CompletionEvent::ObjectsLoaded {
                bucket: "other".to_string(),
                prefix: String::new(),
                result: Ok(ObjectPage::default()),
            },
        });
        assert_eq!(app.objects().len(), 1);
    }

    #[test]
    fn tab_completes_commands() {
        let mut app = ec2_app();
        app.apply_action(Action::StartCommand);
        type_text(&mut app, "re");
        app.apply_action(Action::CompleteInput);
        assert_eq!(app.hints(), &["refresh".to_string(), "region".to_string()]);

        app.apply_action(Action::CancelInput);
        app.apply_action(Action::StartCommand);
        type_text(&mut app, "ek");
        app.apply_action(Action::CompleteInput);
        assert_eq!(app.command_input(), "eks");
        let tasks = app.apply_action(Action::SubmitInput);
        assert_eq!(app.screen(), Screen::ResourceList(Service::Eks));
        assert_eq!(tasks[0].kind, TaskKind::LoadClusters);
    }

    #[test]
    fn unknown_command_names_the_verb() {
        let mut app = ec2_app();
        app.apply_action(Action::StartCommand);
        type_text(&mut app, "bogus now");
        let tasks = app.apply_action(Action::SubmitInput);
        assert!(tasks.is_empty());
        assert_eq!(app.status(), "Unknown command: bogus");
    }

    #[test]
    fn region_command_reloads_current_service() {
        let mut app = ec2_app();
        app.apply_action(Action::StartCommand);
        type_text(&mut app, "region eu-west-2");
        let tasks = app.apply_action(Action::SubmitInput);
        assert_eq!(app.context().region, "eu-west-2");
        assert_eq!(tasks[0].kind, TaskKind::LoadInstances);
        assert_eq!(tasks[0].context.region, "eu-west-2");
    }

    #[test]
    fn region_command_rejects_unconfigured_region() {
        let mut app = ec2_app();
        app.apply_action(Action::StartCommand);
        type_text(&mut app, "region mars-east-1");
        let tasks = app.apply_action(Action::SubmitInput);
        assert!(tasks.is_empty());
        assert_eq!(app.context().region, "eu-west-1");
        assert_eq!(app.status(), "Unknown region: mars-east-1");
    }

    #[test]
    fn help_round_trip_keeps_selection() {
        let mut app = search_fixture();
        app.apply_action(Action::ToggleSelect);
        app.apply_action(Action::ToggleHelp);
        assert_eq!(app.screen(), Screen::Help);
        app.apply_action(Action::Back);
        assert_eq!(app.screen(), Screen::ResourceList(Service::Ec2));
        assert_eq!(app.selection_len(), 1);
    }

    #[test]
    fn shell_handoff_round_trips_through_restore_context() {
        let mut app = search_fixture();
        app.apply_action(Action::ConnectShell);
        assert!(!app.running());
        assert_eq!(
            app.take_exit(),
            Some(ExitReason::Handoff(HandoffRequest::SsmShell {
                instance_id: "i-1".to_string()
            }))
        );

        let restore = app.restore_context(Some("session closed".to_string()));
        assert!(restore.restore_pending);
        let mut resumed = App::new(AppConfig::default(), CloudContext::new("us-east-1"), None);
        let tasks = resumed.restore(restore);
        assert_eq!(resumed.screen(), Screen::ResourceList(Service::Ec2));
        assert_eq!(resumed.context().region, "eu-west-1");
        assert_eq!(resumed.status(), "session closed");
        assert_eq!(tasks[0].kind, TaskKind::LoadInstances);
    }

    #[test]
    fn object_detail_handoff_restores_bucket_prefix_and_key() {
        let mut app = s3_browse_fixture();
        let tasks = app.apply_action(Action::Open);
        app.apply_completion(Completion {
            origin: tasks[0].origin.clone(),
            event: CompletionEvent::ObjectDetailLoaded(Ok(report_details())),
        });
        assert_eq!(app.screen(), Screen::ResourceDetail(DetailKind::Object));
        app.apply_action(Action::EditObject);
        assert!(matches!(
            app.take_exit(),
            Some(ExitReason::Handoff(HandoffRequest::EditObject { .. }))
        ));

        let encoded = serde_json::to_string(&app.restore_context(Some("Uploaded".to_string())))
            .expect("encode");
        let restore: RestoreContext = serde_json::from_str(&encoded).expect("decode");
        let mut resumed = App::new(
            AppConfig::default(),
            restore.context.clone(),
            restore.auth.clone(),
        );
        let tasks = resumed.restore(restore);
        let kinds = tasks.iter().map(|task| task.kind.clone()).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                TaskKind::LoadBuckets,
                TaskKind::LoadObjects {
                    bucket: "logs".to_string(),
                    prefix: String::new(),
                    token: None,
                },
                TaskKind::LoadObjectDetail {
                    bucket: "logs".to_string(),
                    key: "report.csv".to_string(),
                },
            ]
        );
        assert!(tasks.iter().all(|task| task.origin.generation == 1));

        resumed.apply_completion(Completion {
            origin: tasks[1].origin.clone(),
            event: CompletionEvent::ObjectsLoaded {
                bucket: "logs".to_string(),
                prefix: String::new(),
                result: Ok(report_page()),
            },
        });
        assert_eq!(resumed.screen(), Screen::ObjectBrowse);
        assert_eq!(resumed.bucket(), Some("logs"));

        resumed.apply_completion(Completion {
            origin: tasks[2].origin.clone(),
            event: CompletionEvent::ObjectDetailLoaded(Ok(report_details())),
        });
        assert_eq!(resumed.screen(), Screen::ResourceDetail(DetailKind::Object));
        assert_eq!(resumed.status(), "Loaded report.csv");
        assert_eq!(resumed.in_flight(), 1);
    }

    #[test]
    fn browse_handoff_restores_prefix_listing() {
        let mut app = s3_browse_fixture();
        let mut restore = app.restore_context(None);
        restore.prefix = "2024/".to_string();

        let tasks = app.restore(restore);
        assert_eq!(app.screen(), Screen::ResourceList(Service::S3));
        assert_eq!(
            tasks[1].kind,
            TaskKind::LoadObjects {
                bucket: "logs".to_string(),
                prefix: "2024/".to_string(),
                token: None,
            }
        );
        assert_eq!(tasks[1].origin, {
            let mut origin = Origin::scoped(Area::S3, "logs/2024/");
            origin.generation = 1;
            origin
        });
        assert_eq!(app.prefix(), "2024/");
    }

    #[test]
    fn completions_issued_before_a_handoff_leave_the_new_app_alone() {
        let mut app = search_fixture();
        let pending = app.apply_action(Action::Refresh);
        app.apply_action(Action::ConnectShell);
        assert!(app.take_exit().is_some());

        let mut resumed = App::new(AppConfig::default(), CloudContext::new("eu-west-1"), None);
        let tasks = resumed.restore(app.restore_context(None));
        assert_eq!(resumed.in_flight(), 1);

        resumed.apply_completion(Completion {
            origin: pending[0].origin.clone(),
            event: CompletionEvent::InstancesLoaded(Ok(Vec::new())),
        });
        assert_eq!(resumed.in_flight(), 1);
        assert!(resumed.loading());

        resumed.apply_completion(Completion {
            origin: tasks[0].origin.clone(),
            event: CompletionEvent::InstancesLoaded(Ok(vec![instance("i-1", "api", "running")])),
        });
        assert!(!resumed.loading());
        assert_eq!(resumed.instances().len(), 1);
    }

    #[test]
    fn copy_prefers_public_then_private_ip_then_id() {
        let mut app = ec2_app();
        load_instances(
            &mut app,
            vec![
                Instance {
                    public_ip: "54.1.2.3".to_string(),
                    private_ip: "10.0.0.1".to_string(),
                    ..instance("i-1", "a", "running")
                },
                Instance {
                    private_ip: "10.0.0.2".to_string(),
                    ..instance("i-2", "b", "running")
                },
                instance("i-3", "c", "stopped"),
            ],
        );

        let mut copied = Vec::new();
        for _ in 0..3 {
            app.apply_action(Action::CopyAddress);
            copied.push(app.take_clipboard().map(|copy| copy.text));
            app.apply_action(Action::Navigate(NavAction::Down));
        }
        assert_eq!(
            copied,
            vec![
                Some("54.1.2.3".to_string()),
                Some("10.0.0.2".to_string()),
                Some("i-3".to_string()),
            ]
        );
        assert!(app.take_clipboard().is_none());
    }

    #[test]
    fn presigned_url_is_shown_and_queued_for_the_clipboard() {
        let mut app = s3_browse_fixture();
        let tasks = app.apply_action(Action::Presign);
        let url = "https://logs.s3.amazonaws.com/report.csv?sig".to_string();
        app.apply_completion(Completion {
            origin: tasks[0].origin.clone(),
            event: CompletionEvent::PresignedUrl {
                key: "report.csv".to_string(),
                title: "Presigned URL report.csv (3600s)".to_string(),
                result: Ok(url.clone()),
            },
        });

        assert_eq!(app.info().map(|info| info.body.clone()), Some(url.clone()));
        let copy = app.take_clipboard().expect("queued copy");
        assert_eq!(copy.text, url);
        assert_eq!(copy.label, "presigned URL for report.csv");
    }

    #[test]
    fn stopped_instance_refuses_shell() {
        let mut app = search_fixture();
        app.apply_action(Action::Navigate(NavAction::Down));
        app.apply_action(Action::Navigate(NavAction::Down));
        app.apply_action(Action::ConnectShell);
        assert!(app.running());
        assert!(app.status().contains("stopped"));
    }

    #[test]
    fn restore_into_cluster_detail_reloads_both_levels() {
        let mut app = ec2_app();
        let mut restore = app.restore_context(None);
        restore.screen = Screen::ResourceDetail(DetailKind::Cluster);
        restore.cluster = Some("prod".to_string());

        let tasks = app.restore(restore);
        let kinds = tasks.iter().map(|task| task.kind.clone()).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                TaskKind::LoadClusters,
                TaskKind::LoadClusterDetail {
                    name: "prod".to_string()
                }
            ]
        );

        app.apply_completion(Completion {
            origin: tasks[1].origin.clone(),
            event: CompletionEvent::ClusterDetailLoaded(ClusterBundle {
                cluster_name: "prod".to_string(),
                details: Some(ClusterDetails::default()),
                ..ClusterBundle::default()
            }),
        });
        assert_eq!(app.screen(), Screen::ResourceDetail(DetailKind::Cluster));
    }

    #[test]
    fn first_start_asks_for_auth_and_validates_profile() {
        let mut app = App::new(AppConfig::default(), CloudContext::new("us-east-1"), None);
        assert!(app.bootstrap().is_empty());
        assert_eq!(app.screen(), Screen::AuthSelect);

        app.apply_action(Action::Navigate(NavAction::Down));
        app.apply_action(Action::Open);
        assert_eq!(app.key_context(), KeyContext::Prompt);
        let tasks = app.apply_action(Action::SubmitInput);
        assert!(tasks.is_empty());
        assert_eq!(app.status(), "Profile name cannot be empty");

        app.apply_action(Action::Open);
        type_text(&mut app, "dev");
        let tasks = app.apply_action(Action::SubmitInput);
        assert!(matches!(tasks[0].kind, TaskKind::SaveAuth(_)));
        assert_eq!(tasks[1].kind, TaskKind::LoadInstances);
        assert_eq!(tasks[1].context.profile.as_deref(), Some("dev"));
    }

    #[test]
    fn sso_device_flow_shows_code_then_waits() {
        let mut app = App::new(
            AppConfig::default(),
            CloudContext::new("us-east-1"),
            Some(AuthConfig::sso("https://acme.awsapps.com/start", "eu-west-1")),
        );
        let tasks = app.bootstrap();
        assert_eq!(app.screen(), Screen::AccountSelect);
        assert!(matches!(tasks[0].kind, TaskKind::Authenticate { .. }));

        let pending = DeviceAuthorization {
            start_url: "https://acme.awsapps.com/start".to_string(),
            region: "eu-west-1".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            registration_expires_at: None,
            device_code: "device".to_string(),
            user_code: "ABCD-EFGH".to_string(),
            verification_uri: "https://device.sso.eu-west-1.amazonaws.com/".to_string(),
            interval_secs: 5,
            expires_at: Utc::now(),
        };
        let tasks = app.apply_completion(Completion {
            origin: Origin::new(Area::Accounts),
            event: CompletionEvent::Authenticated(Ok(AuthProgress::Pending(pending))),
        });
        assert!(app.status().contains("ABCD-EFGH"));
        assert!(matches!(tasks[0].kind, TaskKind::AwaitDeviceToken(_)));

        app.apply_action(Action::NextService);
        assert_eq!(app.screen(), Screen::AccountSelect);
    }

    #[test]
    fn auto_refresh_only_when_idle() {
        let mut app = search_fixture();
        assert!(app.apply(AppEvent::Tick).is_empty());
        app.apply_action(Action::ToggleAutoRefresh);
        assert_eq!(app.apply(AppEvent::Tick).len(), 1);
        assert!(app.apply(AppEvent::Tick).is_empty());
    }

    #[test]
    fn status_text_is_single_line_and_capped() {
        assert_eq!(normalize_status_text("a\n\n  b ".to_string()), "a b");
        let long = normalize_status_text("x".repeat(300));
        assert_eq!(long.chars().count(), 180);
        assert!(long.ends_with('…'));
    }
}
