//! In-memory collaborators for driving steps and the graph without network,
//! git or shell access.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::llm::{ChatMessage, CompletionProvider, Role};
use crate::notify::{Notifier, Severity};
use crate::platform::types::{CreatePullRequest, PrComment, PrState, PullRequest, ReviewComment};
use crate::platform::SourceHost;
use crate::tracker::types::{select_attachments, AttachmentKind, Ticket, TicketComment, Transition};
use crate::tracker::TicketTracker;
use crate::workflow::Collaborators;
use crate::workspace::{CommandOutput, SourceSample, Workspace};

type Responder = Box<dyn Fn(&str, &str) -> Result<String> + Send + Sync>;

pub struct ScriptedLlm {
    respond: Responder,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    /// Reply computed from `(system, user)` prompts.
    pub fn new(respond: impl Fn(&str, &str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn always(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(move |_, _| Ok(reply.clone()))
    }

    pub fn failing() -> Self {
        Self::new(|_, _| Err(AppError::Llm("provider unavailable".to_string())))
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedLlm {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let text_for = |role: Role| {
            messages
                .iter()
                .filter(|m| m.role == role)
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        };
        let system = text_for(Role::System);
        let user = text_for(Role::User);
        self.prompts.lock().unwrap().push(user.clone());
        (self.respond)(&system, &user)
    }
}

#[derive(Default)]
struct TrackerState {
    transitions: Vec<Transition>,
    applied: Vec<String>,
    comments_added: Vec<String>,
    issue_lookups: usize,
    fail_issue: bool,
    fail_writes: bool,
}

pub struct FakeTracker {
    ticket: Ticket,
    comments: Vec<TicketComment>,
    state: Mutex<TrackerState>,
}

impl FakeTracker {
    fn new(ticket_id: &str) -> Self {
        Self {
            ticket: Ticket {
                key: ticket_id.to_string(),
                summary: "Add login page".to_string(),
                description: Some(
                    "Users need a login page with email and password validation.".to_string(),
                ),
                status: "To Do".to_string(),
                priority: Some("Medium".to_string()),
                attachments: Vec::new(),
            },
            comments: Vec::new(),
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn set_transitions(&self, transitions: Vec<Transition>) {
        self.state.lock().unwrap().transitions = transitions;
    }

    pub fn fail_issue_lookup(&self) {
        self.state.lock().unwrap().fail_issue = true;
    }

    pub fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    pub fn applied_transitions(&self) -> Vec<String> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn comments_added(&self) -> Vec<String> {
        self.state.lock().unwrap().comments_added.clone()
    }

    pub fn issue_lookups(&self) -> usize {
        self.state.lock().unwrap().issue_lookups
    }
}

#[async_trait]
impl TicketTracker for FakeTracker {
    async fn get_issue(&self, key: &str) -> Result<Ticket> {
        let mut state = self.state.lock().unwrap();
        state.issue_lookups += 1;
        if state.fail_issue {
            return Err(AppError::Tracker(format!("issue {key} not found")));
        }
        Ok(self.ticket.clone())
    }

    async fn get_comments(&self, _key: &str, limit: usize) -> Result<Vec<TicketComment>> {
        Ok(self.comments.iter().take(limit).cloned().collect())
    }

    async fn get_transitions(&self, _key: &str) -> Result<Vec<Transition>> {
        Ok(self.state.lock().unwrap().transitions.clone())
    }

    async fn apply_transition(&self, _key: &str, transition_id: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(AppError::Tracker("transition rejected".to_string()));
        }
        state.applied.push(transition_id.to_string());
        let name = state
            .transitions
            .iter()
            .find(|t| t.id == transition_id)
            .map(|t| t.name.clone())
            .unwrap_or_default();
        Ok(name)
    }

    async fn add_comment(&self, _key: &str, body: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(AppError::Tracker("comment rejected".to_string()));
        }
        state.comments_added.push(body.to_string());
        Ok(())
    }

    async fn download_attachments(
        &self,
        key: &str,
        kinds: &[AttachmentKind],
        dest: &Path,
    ) -> Result<Vec<PathBuf>> {
        Ok(select_attachments(&self.ticket.attachments, kinds)
            .into_iter()
            .map(|a| dest.join(a.local_name(key)))
            .collect())
    }
}

#[derive(Default)]
struct HostState {
    prs: Vec<PullRequest>,
    created: Vec<CreatePullRequest>,
    pr_comments_added: Vec<(u64, String)>,
    pr_comments: Vec<PrComment>,
    review_comments: Vec<ReviewComment>,
    fail_listing: bool,
    fail_create: bool,
}

#[derive(Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn add_pull_request(&self, pr: PullRequest) {
        self.state.lock().unwrap().prs.push(pr);
    }

    pub fn set_comments(&self, pr_comments: Vec<PrComment>, review_comments: Vec<ReviewComment>) {
        let mut state = self.state.lock().unwrap();
        state.pr_comments = pr_comments;
        state.review_comments = review_comments;
    }

    pub fn fail_listing(&self) {
        self.state.lock().unwrap().fail_listing = true;
    }

    pub fn fail_create(&self) {
        self.state.lock().unwrap().fail_create = true;
    }

    pub fn created(&self) -> Vec<CreatePullRequest> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn pr_comments_added(&self) -> Vec<(u64, String)> {
        self.state.lock().unwrap().pr_comments_added.clone()
    }
}

#[async_trait]
impl SourceHost for FakeHost {
    async fn list_pull_requests(&self, _state: PrState, head: Option<&str>) -> Result<Vec<PullRequest>> {
        let state = self.state.lock().unwrap();
        if state.fail_listing {
            return Err(AppError::GitHubApi("listing failed".to_string()));
        }
        Ok(state
            .prs
            .iter()
            .filter(|pr| head.map_or(true, |branch| pr.head_ref == branch))
            .cloned()
            .collect())
    }

    async fn create_pull_request(&self, pr: &CreatePullRequest) -> Result<PullRequest> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(AppError::GitHubApi("validation failed".to_string()));
        }
        state.created.push(pr.clone());
        let number = state.created.len() as u64;
        let created = PullRequest {
            number,
            head_ref: pr.head_branch.clone(),
            base_ref: pr.base_branch.clone(),
            url: format!("https://example.test/pr/{number}"),
        };
        state.prs.push(created.clone());
        Ok(created)
    }

    async fn add_pr_comment(&self, number: u64, body: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .pr_comments_added
            .push((number, body.to_string()));
        Ok(())
    }

    async fn get_pr_comments(&self, _number: u64, limit: usize) -> Result<Vec<PrComment>> {
        Ok(self.state.lock().unwrap().pr_comments.iter().take(limit).cloned().collect())
    }

    async fn get_review_comments(&self, _number: u64, limit: usize) -> Result<Vec<ReviewComment>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .review_comments
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    sent: Mutex<Vec<(Severity, String, String)>>,
    fail: Mutex<bool>,
}

impl FakeNotifier {
    pub fn fail(&self) {
        *self.fail.lock().unwrap() = true;
    }

    pub fn sent(&self) -> Vec<(Severity, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, severity: Severity, message: &str, details: Option<&str>) -> Result<()> {
        if *self.fail.lock().unwrap() {
            return Err(AppError::Notifier("webhook returned 500".to_string()));
        }
        self.sent.lock().unwrap().push((
            severity,
            message.to_string(),
            details.unwrap_or_default().to_string(),
        ));
        Ok(())
    }
}

#[derive(Default)]
struct WorkspaceState {
    remote_branch: bool,
    commit_log: Vec<String>,
    install_output: Option<CommandOutput>,
    test_outputs: VecDeque<CommandOutput>,
    files: BTreeMap<String, String>,
    written: Vec<String>,
    created_branches: Vec<String>,
    checked_out: Vec<String>,
    commits: Vec<String>,
    pushed: Vec<String>,
    commands: Vec<String>,
    fail_prepare: bool,
    fail_commands: bool,
}

/// Working copy held in memory. Install commands (`npm install...`) and test
/// commands are told apart by prefix.
pub struct FakeWorkspace {
    root: PathBuf,
    state: Mutex<WorkspaceState>,
}

impl FakeWorkspace {
    fn new(ticket_id: &str) -> Self {
        Self {
            root: PathBuf::from(format!("/fake/project_{ticket_id}")),
            state: Mutex::new(WorkspaceState::default()),
        }
    }

    pub fn set_remote_branch(&self, exists: bool) {
        self.state.lock().unwrap().remote_branch = exists;
    }

    pub fn set_commit_log(&self, lines: Vec<String>) {
        self.state.lock().unwrap().commit_log = lines;
    }

    pub fn set_install_output(&self, output: CommandOutput) {
        self.state.lock().unwrap().install_output = Some(output);
    }

    pub fn push_test_output(&self, output: CommandOutput) {
        self.state.lock().unwrap().test_outputs.push_back(output);
    }

    pub fn fail_prepare(&self) {
        self.state.lock().unwrap().fail_prepare = true;
    }

    pub fn fail_commands(&self) {
        self.state.lock().unwrap().fail_commands = true;
    }

    pub fn seed_file(&self, path: &str, content: &str) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), content.to_string());
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn written_files(&self) -> Vec<String> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn created_branches(&self) -> Vec<String> {
        self.state.lock().unwrap().created_branches.clone()
    }

    pub fn checked_out_branches(&self) -> Vec<String> {
        self.state.lock().unwrap().checked_out.clone()
    }

    pub fn commits(&self) -> Vec<String> {
        self.state.lock().unwrap().commits.clone()
    }

    pub fn pushed_branches(&self) -> Vec<String> {
        self.state.lock().unwrap().pushed.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }
}

#[async_trait]
impl Workspace for FakeWorkspace {
    async fn prepare(&self, _ticket_id: &str) -> Result<PathBuf> {
        if self.state.lock().unwrap().fail_prepare {
            return Err(AppError::Git("authentication required".to_string()));
        }
        Ok(self.root.clone())
    }

    async fn remote_branch_exists(&self, _repo: &Path, _branch: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().remote_branch)
    }

    async fn checkout_or_create_branch(&self, _repo: &Path, branch: &str, exists: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if exists {
            state.checked_out.push(branch.to_string());
        } else {
            state.created_branches.push(branch.to_string());
        }
        Ok(())
    }

    async fn commit_log(&self, _repo: &Path, limit: usize) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().commit_log.iter().take(limit).cloned().collect())
    }

    async fn commit_all_allow_empty(&self, _repo: &Path, message: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.commits.push(message.to_string());
        Ok(format!("{:07x}", state.commits.len()))
    }

    async fn force_push(&self, _repo: &Path, branch: &str) -> Result<()> {
        self.state.lock().unwrap().pushed.push(branch.to_string());
        Ok(())
    }

    async fn run(&self, command: &str, _cwd: &Path, _timeout: Duration) -> Result<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        if state.fail_commands {
            return Err(AppError::Shell(format!("failed to spawn `{command}`")));
        }
        state.commands.push(command.to_string());

        if command.starts_with("npm install") {
            return Ok(state.install_output.clone().unwrap_or_default());
        }
        Ok(state.test_outputs.pop_front().unwrap_or_else(|| CommandOutput {
            exit_code: 0,
            stdout: "No tests found, exiting with code 0".to_string(),
            stderr: String::new(),
        }))
    }

    async fn write_file(&self, _repo: &Path, relative: &str, content: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.written.push(relative.to_string());
        Ok(state
            .files
            .insert(relative.to_string(), content.to_string())
            .is_some())
    }

    async fn sample_sources(
        &self,
        _repo: &Path,
        max_files: usize,
        max_lines: usize,
    ) -> Result<Vec<SourceSample>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .files
            .iter()
            .take(max_files)
            .map(|(path, content)| SourceSample {
                path: path.clone(),
                content: content.lines().take(max_lines).collect::<Vec<_>>().join("\n"),
            })
            .collect())
    }
}

/// One fake of every collaborator, shared with the test for inspection.
pub struct Fakes {
    pub tracker: Arc<FakeTracker>,
    pub host: Arc<FakeHost>,
    pub notifier: Arc<FakeNotifier>,
    pub workspace: Arc<FakeWorkspace>,
}

impl Fakes {
    pub fn new(ticket_id: &str) -> Self {
        Self {
            tracker: Arc::new(FakeTracker::new(ticket_id)),
            host: Arc::new(FakeHost::default()),
            notifier: Arc::new(FakeNotifier::default()),
            workspace: Arc::new(FakeWorkspace::new(ticket_id)),
        }
    }

    pub fn collaborators(&self, llm: Option<Arc<ScriptedLlm>>) -> Collaborators {
        Collaborators {
            tracker: self.tracker.clone(),
            host: self.host.clone(),
            notifier: self.notifier.clone(),
            workspace: self.workspace.clone(),
            llm: llm.map(|l| l as Arc<dyn CompletionProvider>),
        }
    }
}

/// Counts status moves the transition table rejected while the guard is held.
pub struct RejectedTransitions {
    count: Arc<std::sync::atomic::AtomicUsize>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl RejectedTransitions {
    /// Install on the current thread; pair with a current-thread runtime.
    pub fn watch() -> Self {
        use tracing_subscriber::layer::SubscriberExt;

        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(RejectionLayer {
            count: Arc::clone(&count),
        });
        Self {
            count,
            _guard: tracing::subscriber::set_default(subscriber),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(std::sync::atomic::Ordering::SeqCst)
    }
}

struct RejectionLayer {
    count: Arc<std::sync::atomic::AtomicUsize>,
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for RejectionLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let meta = event.metadata();
        // The only warning state.rs emits is a rejected status move.
        if *meta.level() == tracing::Level::WARN && meta.target() == "devflow::workflow::state" {
            self.count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }
}
