//! Git working copy operations

use std::path::{Component, Path, PathBuf};

use periphery_api::{ExecutionResult, Hook, RepoSpec};
use tracing::{info, warn};

use crate::errors::CoreError;
use crate::exec::result::{error_result, merge_results, Step};
use crate::exec::shell::{run_program, run_shell};
use crate::filesys::dir::Dir;

/// Join a user supplied relative path onto `root`.
///
/// Absolute paths and `..` components are rejected so hooks and mounts
/// cannot escape the working copy.
pub fn safe_join(root: &Path, relative: &str) -> Result<PathBuf, CoreError> {
    let mut joined = root.to_path_buf();
    for component in Path::new(relative.trim()).components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(CoreError::ValidationError(format!(
                    "path '{}' must stay inside the working copy",
                    relative
                )));
            }
        }
    }
    Ok(joined)
}

/// Validate a working copy name: exactly one plain path component
pub fn repo_dir(repos: &Dir, name: &str) -> Result<Dir, CoreError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(repos.subdir(name)),
        _ => Err(CoreError::ValidationError(format!(
            "invalid working copy name '{}'",
            name
        ))),
    }
}

/// Clone URL of a repo, with the access token injected for https remotes.
///
/// `owner/name` is shorthand for a github repository.
pub fn repo_url(repo: &str, access_token: Option<&str>) -> String {
    let repo = repo.trim();
    let token = access_token.filter(|t| !t.is_empty());

    if let Some(rest) = repo.strip_prefix("https://") {
        return match token {
            Some(token) => format!("https://{}@{}", token, rest),
            None => repo.to_string(),
        };
    }
    if repo.contains("://") || repo.starts_with("git@") {
        return repo.to_string();
    }

    let path = repo.trim_end_matches(".git");
    match token {
        Some(token) => format!("https://{}@github.com/{}.git", token, path),
        None => format!("https://github.com/{}.git", path),
    }
}

/// Replace every occurrence of the token in command and logs
pub fn redact(mut result: ExecutionResult, access_token: Option<&str>) -> ExecutionResult {
    if let Some(token) = access_token.filter(|t| !t.is_empty()) {
        result.command = result.command.replace(token, "<TOKEN>");
        result.log.stdout = result.log.stdout.replace(token, "<TOKEN>");
        result.log.stderr = result.log.stderr.replace(token, "<TOKEN>");
    }
    result
}

async fn run_hook(label: &str, hook: Option<&Hook>, workdir: &Path) -> Step {
    let Some(hook) = hook.filter(|h| h.is_configured()) else {
        return Step::skipped(label);
    };
    match safe_join(workdir, &hook.path) {
        Ok(dir) => Step::ran(label, run_shell(&hook.command, Some(&dir)).await),
        Err(e) => Step::ran(label, error_result(&hook.command, e)),
    }
}

/// Fresh clone followed by the on-clone and on-pull hooks.
///
/// Any existing working copy of the same name is removed first. Hooks
/// still run when the clone fails so their diagnostics are captured.
pub async fn clone(repos: &Dir, spec: &RepoSpec) -> ExecutionResult {
    let target = match repo_dir(repos, &spec.name) {
        Ok(dir) => dir,
        Err(e) => return error_result(format!("clone {}", spec.name), e),
    };
    info!("Cloning {} into {}", spec.repo, target.path().display());

    if let Err(e) = target.delete().await {
        warn!("Failed to remove old working copy {}: {}", target.path().display(), e);
    }
    if let Err(e) = repos.create().await {
        return error_result(format!("clone {}", spec.name), e);
    }

    let mut args = vec!["clone".to_string()];
    if let Some(branch) = spec.branch.as_deref().filter(|b| !b.is_empty()) {
        args.push("-b".to_string());
        args.push(branch.to_string());
    }
    args.push(repo_url(&spec.repo, spec.access_token.as_deref()));
    args.push(target.path().to_string_lossy().to_string());

    let clone = redact(
        run_program("git", &args, None).await,
        spec.access_token.as_deref(),
    );

    let on_clone = run_hook("on clone", spec.on_clone.as_ref(), target.path()).await;
    let on_pull = run_hook("on pull", spec.on_pull.as_ref(), target.path()).await;

    merge_results(vec![Step::ran("clone", clone), on_clone, on_pull])
}

/// Pull the configured branch followed by the on-pull hook
pub async fn pull(repos: &Dir, spec: &RepoSpec) -> ExecutionResult {
    let target = match repo_dir(repos, &spec.name) {
        Ok(dir) => dir,
        Err(e) => return error_result(format!("pull {}", spec.name), e),
    };
    if !target.exists().await {
        return ExecutionResult::failure(
            format!("pull {}", spec.name),
            format!("working copy {} not found, clone it first", spec.name),
        );
    }
    info!("Pulling {}", target.path().display());

    let mut args = vec!["pull".to_string()];
    if let Some(branch) = spec.branch.as_deref().filter(|b| !b.is_empty()) {
        args.push("origin".to_string());
        args.push(branch.to_string());
    }
    let pull = redact(
        run_program("git", &args, Some(target.path())).await,
        spec.access_token.as_deref(),
    );

    let on_pull = run_hook("on pull", spec.on_pull.as_ref(), target.path()).await;

    merge_results(vec![Step::ran("pull", pull), on_pull])
}

/// Remove a working copy
pub async fn delete(repos: &Dir, name: &str) -> ExecutionResult {
    let command = format!("delete repo {}", name);
    let target = match repo_dir(repos, name) {
        Ok(dir) => dir,
        Err(e) => return error_result(command, e),
    };
    match target.delete().await {
        Ok(()) => ExecutionResult::success(command, format!("deleted {}", target.path().display())),
        Err(e) => error_result(command, e),
    }
}

/// Move a working copy to a new name
pub async fn rename(repos: &Dir, from: &str, to: &str) -> ExecutionResult {
    let command = format!("rename repo {} -> {}", from, to);
    let (source, target) = match (repo_dir(repos, from), repo_dir(repos, to)) {
        (Ok(source), Ok(target)) => (source, target),
        (Err(e), _) | (_, Err(e)) => return error_result(command, e),
    };
    if !source.exists().await {
        return ExecutionResult::success(command, format!("no working copy named {}", from));
    }
    match source.rename(&target).await {
        Ok(()) => ExecutionResult::success(command, ""),
        Err(e) => error_result(command, e),
    }
}
