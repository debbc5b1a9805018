//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use client_api::{Build, Deployment, Server, User};
use fleetd::action::ActionRegistry;
use fleetd::audit::{AuditPipeline, BroadcastHub, Identity, Subscription};
use fleetd::dispatch::Dispatcher;
use fleetd::errors::CoreError;
use fleetd::exec::{NodeExecutor, NodeOp, NodeOutput, NodeRef};
use fleetd::store::memory::{MemoryAuditLog, MemoryCollection, MemoryUsers};
use fleetd::store::Resources;
use periphery_api::{ContainerStatus, ExecutionResult, Log, SystemStats};
use tokio::sync::Notify;

// ================================ EXECUTOR ==================================== //

/// Executor recording every operation instead of running it
pub struct MockExecutor {
    calls: Mutex<Vec<(NodeRef, NodeOp)>>,
    gated: AtomicBool,
    started: Notify,
    release: Notify,
    fail: AtomicBool,
    panic: AtomicBool,
    reachable: AtomicBool,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            gated: AtomicBool::new(false),
            started: Notify::new(),
            release: Notify::new(),
            fail: AtomicBool::new(false),
            panic: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
        }
    }

    /// Hold every mutating operation until `release` is called
    pub fn gate(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    /// Wait until a gated operation is in flight
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn release(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    pub fn fail_results(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn panic_on_run(&self, panic: bool) {
        self.panic.store(panic, Ordering::SeqCst);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(NodeRef, NodeOp)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ops(&self) -> Vec<NodeOp> {
        self.calls().into_iter().map(|(_, op)| op).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl NodeExecutor for MockExecutor {
    async fn execute(&self, node: &NodeRef, op: NodeOp) -> Result<NodeOutput, CoreError> {
        self.calls.lock().unwrap().push((node.clone(), op.clone()));

        let output = match &op {
            NodeOp::GetContainerStatus { name } => NodeOutput::Status(Some(ContainerStatus {
                id: format!("id-{}", name),
                name: name.clone(),
                image: "mock:latest".to_string(),
                state: "running".to_string(),
                status: "Up 1 second".to_string(),
            })),
            NodeOp::GetContainerLog { name, .. } => NodeOutput::Log(Log {
                stdout: format!("log of {}", name),
                stderr: String::new(),
            }),
            NodeOp::GetDockerStats => NodeOutput::DockerStats(Vec::new()),
            NodeOp::GetSystemStats => NodeOutput::SystemStats(SystemStats {
                hostname: "mock".to_string(),
                ..Default::default()
            }),
            NodeOp::ListContainers => NodeOutput::Containers(Vec::new()),
            NodeOp::ListNetworks => NodeOutput::Networks(Vec::new()),
            NodeOp::CheckReachable => NodeOutput::Reachable(self.reachable.load(Ordering::SeqCst)),
            mutating => {
                if self.gated.load(Ordering::SeqCst) {
                    self.started.notify_one();
                    self.release.notified().await;
                }
                if self.panic.load(Ordering::SeqCst) {
                    panic!("executor exploded");
                }
                let label = mutating.label();
                let result = if self.fail.load(Ordering::SeqCst) {
                    ExecutionResult::failure(label, "mock failure")
                } else {
                    ExecutionResult::success(label, "ok")
                };
                NodeOutput::Result(result)
            }
        };
        Ok(output)
    }

    async fn check_reachable(&self, _node: &NodeRef) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

// ================================= FIXTURES =================================== //

pub fn user(id: &str, permissions: u8) -> User {
    User {
        id: id.to_string(),
        username: id.to_string(),
        permissions,
        enabled: true,
    }
}

pub fn build(id: &str, owners: &[&str]) -> Build {
    Build {
        id: id.to_string(),
        name: format!("build {}", id),
        pull_name: format!("build-{}", id),
        owners: owners.iter().map(|o| o.to_string()).collect(),
        repo: Some(format!("acme/{}", id)),
        ..Default::default()
    }
}

pub fn deployment(id: &str, owners: &[&str]) -> Deployment {
    Deployment {
        id: id.to_string(),
        name: format!("deployment {}", id),
        container_name: format!("deployment-{}", id),
        owners: owners.iter().map(|o| o.to_string()).collect(),
        image: Some("nginx:latest".to_string()),
        ..Default::default()
    }
}

pub fn server(id: &str, is_core: bool) -> Server {
    Server {
        id: id.to_string(),
        name: format!("server {}", id),
        address: format!("http://{}.fleet.invalid:8000", id),
        enabled: true,
        is_core,
        owners: vec!["root".to_string()],
        ..Default::default()
    }
}

/// Everything a dispatcher test needs to observe
pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub executor: Arc<MockExecutor>,
    pub hub: Arc<BroadcastHub>,
    pub audit_log: Arc<MemoryAuditLog>,
    pub users: Arc<MemoryUsers>,
    pub builds: Arc<MemoryCollection<Build>>,
    pub deployments: Arc<MemoryCollection<Deployment>>,
    pub servers: Arc<MemoryCollection<Server>>,
}

impl Harness {
    /// Users `root` (admin), `alice` and `bob` (members) and `carol` (no tier)
    pub async fn new(builds: Vec<Build>, deployments: Vec<Deployment>, servers: Vec<Server>) -> Self {
        let users = Arc::new(MemoryUsers::new());
        for (id, tier) in [("root", 2), ("alice", 1), ("bob", 1), ("carol", 0)] {
            users.insert(user(id, tier)).await;
            users.add_session(&format!("{}-session", id), id).await;
        }

        let builds = Arc::new(MemoryCollection::with_items(builds));
        let deployments = Arc::new(MemoryCollection::with_items(deployments));
        let servers = Arc::new(MemoryCollection::with_items(servers));
        let resources = Resources {
            builds: builds.clone(),
            deployments: deployments.clone(),
            servers: servers.clone(),
        };

        let hub = Arc::new(BroadcastHub::new());
        let audit_log = Arc::new(MemoryAuditLog::new());
        let audit = AuditPipeline::new(audit_log.clone(), hub.clone());
        let executor = Arc::new(MockExecutor::new());

        let dispatcher = Dispatcher::new(
            resources,
            users.clone(),
            ActionRegistry::new(),
            executor.clone(),
            audit,
        );
        dispatcher.register_all().await.unwrap();

        Self {
            dispatcher: Arc::new(dispatcher),
            executor,
            hub,
            audit_log,
            users,
            builds,
            deployments,
            servers,
        }
    }

    /// Subscribe to the hub as a stored user
    pub fn subscribe(&self, id: &str, tier: u8) -> Subscription {
        self.hub.subscribe(Identity {
            user_id: id.to_string(),
            username: id.to_string(),
            tier,
        })
    }
}

/// Drain every event queued for a subscription
pub fn drain(subscription: &mut Subscription) -> Vec<client_api::Event> {
    let mut events = Vec::new();
    while let Ok(payload) = subscription.rx.try_recv() {
        events.push(serde_json::from_str(&payload).unwrap());
    }
    events
}
