//! Lifecycle hook dispatcher (SPEC_FULL.md §3; spec §9 Design Note on
//! back-references): plain function pointers supplied at `Daemon`
//! construction, never trait objects that reach back into `Daemon`
//! itself, so ownership stays a tree.

use clusterd_core::ClusterMember;

/// The roles/timestamps the heartbeat engine observed this round, handed
/// to `OnHeartbeat`.
#[derive(Debug, Clone)]
pub struct RoleStatus {
    pub members: Vec<ClusterMember>,
}

type HookFn<T> = Box<dyn Fn(T) + Send + Sync>;
type FallibleHookFn<T> = Box<dyn Fn(T) -> clusterd_core::Result<()> + Send + Sync>;

/// User-supplied lifecycle callbacks. Every field is optional; a daemon
/// with no hooks registered still runs correctly, just silently.
#[derive(Default)]
pub struct Hooks {
    pub pre_bootstrap: Option<FallibleHookFn<()>>,
    pub post_bootstrap: Option<HookFn<()>>,
    pub pre_join: Option<FallibleHookFn<()>>,
    pub post_join: Option<HookFn<()>>,
    pub on_new_member: Option<HookFn<ClusterMember>>,
    pub pre_remove: Option<FallibleHookFn<String>>,
    pub post_remove: Option<HookFn<String>>,
    pub on_heartbeat: Option<HookFn<RoleStatus>>,
    pub on_daemon_config_update: Option<HookFn<()>>,
}

impl Hooks {
    pub fn builder() -> HooksBuilder {
        HooksBuilder::default()
    }

    pub fn run_pre_bootstrap(&self) -> clusterd_core::Result<()> {
        match &self.pre_bootstrap {
            Some(f) => f(()),
            None => Ok(()),
        }
    }

    pub fn run_post_bootstrap(&self) {
        if let Some(f) = &self.post_bootstrap {
            f(());
        }
    }

    pub fn run_pre_join(&self) -> clusterd_core::Result<()> {
        match &self.pre_join {
            Some(f) => f(()),
            None => Ok(()),
        }
    }

    pub fn run_post_join(&self) {
        if let Some(f) = &self.post_join {
            f(());
        }
    }

    pub fn run_on_new_member(&self, member: ClusterMember) {
        if let Some(f) = &self.on_new_member {
            f(member);
        }
    }

    pub fn run_pre_remove(&self, target: &str) -> clusterd_core::Result<()> {
        match &self.pre_remove {
            Some(f) => f(target.to_string()),
            None => Ok(()),
        }
    }

    pub fn run_post_remove(&self, target: &str) {
        if let Some(f) = &self.post_remove {
            f(target.to_string());
        }
    }

    pub fn run_on_heartbeat(&self, status: RoleStatus) {
        if let Some(f) = &self.on_heartbeat {
            f(status);
        }
    }

    pub fn run_on_daemon_config_update(&self) {
        if let Some(f) = &self.on_daemon_config_update {
            f(());
        }
    }
}

/// Fluent builder so a consumer only sets the hooks it cares about.
#[derive(Default)]
pub struct HooksBuilder {
    hooks: Hooks,
}

impl HooksBuilder {
    pub fn pre_bootstrap(mut self, f: impl Fn(()) -> clusterd_core::Result<()> + Send + Sync + 'static) -> Self {
        self.hooks.pre_bootstrap = Some(Box::new(f));
        self
    }

    pub fn post_bootstrap(mut self, f: impl Fn(()) + Send + Sync + 'static) -> Self {
        self.hooks.post_bootstrap = Some(Box::new(f));
        self
    }

    pub fn pre_join(mut self, f: impl Fn(()) -> clusterd_core::Result<()> + Send + Sync + 'static) -> Self {
        self.hooks.pre_join = Some(Box::new(f));
        self
    }

    pub fn post_join(mut self, f: impl Fn(()) + Send + Sync + 'static) -> Self {
        self.hooks.post_join = Some(Box::new(f));
        self
    }

    pub fn on_new_member(mut self, f: impl Fn(ClusterMember) + Send + Sync + 'static) -> Self {
        self.hooks.on_new_member = Some(Box::new(f));
        self
    }

    pub fn pre_remove(mut self, f: impl Fn(String) -> clusterd_core::Result<()> + Send + Sync + 'static) -> Self {
        self.hooks.pre_remove = Some(Box::new(f));
        self
    }

    pub fn post_remove(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.hooks.post_remove = Some(Box::new(f));
        self
    }

    pub fn on_heartbeat(mut self, f: impl Fn(RoleStatus) + Send + Sync + 'static) -> Self {
        self.hooks.on_heartbeat = Some(Box::new(f));
        self
    }

    pub fn on_daemon_config_update(mut self, f: impl Fn(()) + Send + Sync + 'static) -> Self {
        self.hooks.on_daemon_config_update = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Hooks {
        self.hooks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn unset_hooks_are_no_ops() {
        let hooks = Hooks::default();
        assert!(hooks.run_pre_bootstrap().is_ok());
        hooks.run_post_bootstrap();
        hooks.run_on_heartbeat(RoleStatus { members: vec![] });
    }

    #[test]
    fn registered_hook_runs() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let hooks = Hooks::builder()
            .post_bootstrap(move |_| fired2.store(true, Ordering::SeqCst))
            .build();
        hooks.run_post_bootstrap();
        assert!(fired.load(Ordering::SeqCst));
    }
}
