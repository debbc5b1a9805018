//! Docker CLI operations

use std::path::Path;
use std::sync::Arc;

use periphery_api::{
    BuildSpec, ContainerSpec, ContainerStatus, DockerStat, ExecutionResult, Log, Network,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::errors::CoreError;
use crate::exec::git::safe_join;
use crate::exec::result::{error_result, merge_results, Step};
use crate::exec::shell::{run_program, run_program_cancellable, run_shell};

const DOCKER: &str = "docker";

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

// ================================ ARGUMENTS =================================== //

/// Arguments of `docker run` for a container spec.
///
/// A repo mount is resolved against `repos_root`; its path may not leave
/// the working copy.
pub fn run_args(spec: &ContainerSpec, repos_root: &Path) -> Result<Vec<String>, CoreError> {
    if spec.image.trim().is_empty() {
        return Err(CoreError::ValidationError(format!(
            "no image configured for container {}",
            spec.name
        )));
    }

    let mut out = args(&["run", "-d", "--name", &spec.name]);

    for port in &spec.ports {
        out.push("-p".to_string());
        out.push(format!("{}:{}", port.local, port.container));
    }
    for volume in &spec.volumes {
        out.push("-v".to_string());
        out.push(format!("{}:{}", volume.local, volume.container));
    }
    if let Some(mount) = &spec.repo_mount {
        let working_copy = safe_join(repos_root, &mount.repo)?;
        let local = safe_join(&working_copy, &mount.path)?;
        out.push("-v".to_string());
        out.push(format!("{}:{}", local.display(), mount.container));
    }
    for env in &spec.environment {
        out.push("-e".to_string());
        out.push(format!("{}={}", env.variable, env.value));
    }
    if let Some(network) = spec.network.as_deref().filter(|n| !n.is_empty()) {
        out.push("--network".to_string());
        out.push(network.to_string());
    }
    if let Some(restart) = spec.restart.as_deref().filter(|r| !r.is_empty()) {
        out.push("--restart".to_string());
        out.push(restart.to_string());
    }
    if let Some(user) = spec.container_user.as_deref().filter(|u| !u.is_empty()) {
        out.push("--user".to_string());
        out.push(user.to_string());
    }

    out.push(spec.image.clone());

    if let Some(post_image) = &spec.post_image {
        out.extend(post_image.split_whitespace().map(str::to_string));
    }

    Ok(out)
}

/// Arguments of `docker build` for a build spec inside `repo_dir`
pub fn build_args(spec: &BuildSpec, repo_dir: &Path) -> Result<Vec<String>, CoreError> {
    let docker_args = spec.docker_build_args.as_ref().ok_or_else(|| {
        CoreError::ValidationError(format!("no docker build configured for {}", spec.name))
    })?;
    let context = safe_join(repo_dir, &docker_args.build_path)?;
    let dockerfile = safe_join(
        &context,
        docker_args
            .dockerfile_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or("Dockerfile"),
    )?;

    Ok(vec![
        "build".to_string(),
        "-t".to_string(),
        spec.image.clone(),
        "-f".to_string(),
        dockerfile.to_string_lossy().to_string(),
        context.to_string_lossy().to_string(),
    ])
}

// ================================== PARSING =================================== //

#[derive(Deserialize)]
struct PsLine {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Status", default)]
    status: String,
}

#[derive(Deserialize)]
struct StatsLine {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "CPUPerc", default)]
    cpu_perc: String,
    #[serde(rename = "MemUsage", default)]
    mem_usage: String,
    #[serde(rename = "MemPerc", default)]
    mem_perc: String,
    #[serde(rename = "NetIO", default)]
    net_io: String,
    #[serde(rename = "BlockIO", default)]
    block_io: String,
    #[serde(rename = "PIDs", default)]
    pids: String,
}

#[derive(Deserialize)]
struct NetworkLine {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Driver", default)]
    driver: String,
    #[serde(rename = "Scope", default)]
    scope: String,
}

/// Parse `--format '{{json .}}'` output, one object per line.
/// Lines that are not JSON objects are skipped.
fn parse_json_lines<T: DeserializeOwned>(stdout: &str) -> Vec<T> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Skipping unparsable docker output line: {}", e);
                None
            }
        })
        .collect()
}

pub fn parse_containers(stdout: &str) -> Vec<ContainerStatus> {
    parse_json_lines::<PsLine>(stdout)
        .into_iter()
        .map(|line| ContainerStatus {
            id: line.id,
            name: line.names,
            image: line.image,
            state: line.state,
            status: line.status,
        })
        .collect()
}

pub fn parse_stats(stdout: &str) -> Vec<DockerStat> {
    parse_json_lines::<StatsLine>(stdout)
        .into_iter()
        .map(|line| DockerStat {
            name: line.name,
            cpu_perc: line.cpu_perc,
            mem_usage: line.mem_usage,
            mem_perc: line.mem_perc,
            net_io: line.net_io,
            block_io: line.block_io,
            pids: line.pids,
        })
        .collect()
}

pub fn parse_networks(stdout: &str) -> Vec<Network> {
    parse_json_lines::<NetworkLine>(stdout)
        .into_iter()
        .map(|line| Network {
            id: line.id,
            name: line.name,
            driver: line.driver,
            scope: line.scope,
        })
        .collect()
}

// ================================ CONTAINERS ================================== //

async fn query(parts: &[&str]) -> Result<String, CoreError> {
    let result = run_program(DOCKER, &args(parts), None).await;
    if result.is_error {
        return Err(CoreError::Internal(format!(
            "{} failed: {}",
            result.command,
            result.log.stderr.trim()
        )));
    }
    Ok(result.log.stdout)
}

pub async fn list_containers() -> Result<Vec<ContainerStatus>, CoreError> {
    let stdout = query(&["ps", "-a", "--no-trunc", "--format", "{{json .}}"]).await?;
    Ok(parse_containers(&stdout))
}

/// Status of a container by name, `None` when it does not exist
pub async fn container_status(name: &str) -> Result<Option<ContainerStatus>, CoreError> {
    let filter = format!("name=^{}$", name);
    let stdout = query(&["ps", "-a", "--no-trunc", "--filter", &filter, "--format", "{{json .}}"]).await?;
    Ok(parse_containers(&stdout).into_iter().find(|c| c.name == name))
}

pub async fn container_log(name: &str, tail: Option<u32>) -> Result<Log, CoreError> {
    let tail = tail.unwrap_or(200).to_string();
    let result = run_program(DOCKER, &args(&["logs", "--tail", &tail, name]), None).await;
    if result.is_error && result.log.stdout.is_empty() {
        return Err(CoreError::NotFound(format!(
            "container {}: {}",
            name,
            result.log.stderr.trim()
        )));
    }
    Ok(result.log)
}

pub async fn start_container(name: &str) -> ExecutionResult {
    run_program(DOCKER, &args(&["start", name]), None).await
}

pub async fn stop_container(name: &str) -> ExecutionResult {
    run_program(DOCKER, &args(&["stop", name]), None).await
}

/// Stop and remove a container; a missing container is not an error
pub async fn delete_container(name: &str) -> ExecutionResult {
    let mut result = run_program(DOCKER, &args(&["rm", "-f", name]), None).await;
    if result.is_error && result.log.stderr.contains("No such container") {
        result.is_error = false;
    }
    result
}

/// Replace any existing container of the same name and run the spec
pub async fn deploy(spec: &ContainerSpec, repos_root: &Path) -> ExecutionResult {
    info!("Deploying container {} from {}", spec.name, spec.image);
    let run_args = match run_args(spec, repos_root) {
        Ok(args) => args,
        Err(e) => return error_result(format!("docker run {}", spec.name), e),
    };

    let remove = delete_container(&spec.name).await;
    let run = run_program(DOCKER, &run_args, None).await;

    merge_results(vec![Step::ran("remove", remove), Step::ran("run", run)])
}

// ================================= NETWORKS =================================== //

pub async fn list_networks() -> Result<Vec<Network>, CoreError> {
    let stdout = query(&["network", "ls", "--no-trunc", "--format", "{{json .}}"]).await?;
    Ok(parse_networks(&stdout))
}

pub async fn create_network(name: &str, driver: Option<&str>) -> ExecutionResult {
    let mut parts = vec!["network", "create"];
    if let Some(driver) = driver.filter(|d| !d.is_empty()) {
        parts.push("--driver");
        parts.push(driver);
    }
    parts.push(name);
    run_program(DOCKER, &args(&parts), None).await
}

pub async fn delete_network(name: &str) -> ExecutionResult {
    run_program(DOCKER, &args(&["network", "rm", name]), None).await
}

// ================================== PRUNE ===================================== //

pub async fn prune_images() -> ExecutionResult {
    run_program(DOCKER, &args(&["image", "prune", "-a", "-f"]), None).await
}

pub async fn prune_networks() -> ExecutionResult {
    run_program(DOCKER, &args(&["network", "prune", "-f"]), None).await
}

pub async fn prune_containers() -> ExecutionResult {
    run_program(DOCKER, &args(&["container", "prune", "-f"]), None).await
}

// ================================== STATS ===================================== //

pub async fn docker_stats() -> Result<Vec<DockerStat>, CoreError> {
    let stdout = query(&["stats", "--no-stream", "--format", "{{json .}}"]).await?;
    Ok(parse_stats(&stdout))
}

// ================================== BUILD ===================================== //

/// CLI build hook, `docker build` and optional push inside a working copy.
///
/// The docker build itself is killed when `cancel` is notified.
pub async fn build(spec: &BuildSpec, repo_dir: &Path, cancel: Arc<Notify>) -> ExecutionResult {
    info!("Building image {} in {}", spec.image, repo_dir.display());

    let cli = match spec.cli_build.as_ref().filter(|h| h.is_configured()) {
        Some(hook) => match safe_join(repo_dir, &hook.path) {
            Ok(dir) => Step::ran("cli build", run_shell(&hook.command, Some(&dir)).await),
            Err(e) => Step::ran("cli build", error_result(&hook.command, e)),
        },
        None => Step::skipped("cli build"),
    };

    let docker = match spec.docker_build_args {
        Some(_) => match build_args(spec, repo_dir) {
            Ok(build_args) => Step::ran(
                "docker build",
                run_program_cancellable(DOCKER, &build_args, Some(repo_dir), cancel).await,
            ),
            Err(e) => Step::ran("docker build", error_result(format!("docker build {}", spec.image), e)),
        },
        None => Step::skipped("docker build"),
    };

    let built = docker.result.as_ref().map(|r| !r.is_error).unwrap_or(false);
    let push = if spec.push && built {
        Step::ran("push", run_program(DOCKER, &args(&["push", &spec.image]), None).await)
    } else {
        if spec.push {
            warn!("Skipping push of {}: image was not built", spec.image);
        }
        Step::skipped("push")
    };

    merge_results(vec![cli, docker, push])
}
