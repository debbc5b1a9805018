//! Permission tiers

use client_api::{Build, Deployment, Owned, User};
use periphery_api::Hook;

pub const TIER_MEMBER: u8 = 1;
pub const TIER_ADMIN: u8 = 2;

pub fn is_admin(user: &User) -> bool {
    user.permissions >= TIER_ADMIN
}

pub fn can_create(user: &User) -> bool {
    user.permissions >= TIER_MEMBER
}

/// Admins act on anything, members only on what they own
pub fn can_mutate(user: &User, resource: &impl Owned) -> bool {
    is_admin(user) || (user.permissions >= TIER_MEMBER && resource.is_owned_by(&user.username))
}

fn configured(hook: &Option<Hook>) -> Option<&Hook> {
    hook.as_ref().filter(|h| h.is_configured())
}

fn hook_changed(before: &Option<Hook>, after: &Option<Hook>) -> bool {
    configured(before) != configured(after)
}

/// Hooks run arbitrary shell commands; only admins may set or change them
pub fn build_hooks_allowed(user: &User, before: Option<&Build>, after: &Build) -> bool {
    if is_admin(user) {
        return true;
    }
    let none = Build::default();
    let before = before.unwrap_or(&none);
    !hook_changed(&before.on_clone, &after.on_clone)
        && !hook_changed(&before.on_pull, &after.on_pull)
        && !hook_changed(&before.cli_build, &after.cli_build)
}

pub fn deployment_hooks_allowed(user: &User, before: Option<&Deployment>, after: &Deployment) -> bool {
    if is_admin(user) {
        return true;
    }
    let none = Deployment::default();
    let before = before.unwrap_or(&none);
    !hook_changed(&before.on_clone, &after.on_clone) && !hook_changed(&before.on_pull, &after.on_pull)
}
