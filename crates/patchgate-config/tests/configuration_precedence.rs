use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::sync::{Mutex, MutexGuard, PoisonError};

use once_cell::sync::Lazy;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use patchgate_config::{
    Config, RollbackPolicy, default_backup_suffix, default_log_filter, default_log_format,
    default_rollback_policy,
};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct Harness {
    temp_dir: TempDir,
    cli_args: RefCell<Vec<OsString>>,
    env_overrides: RefCell<Vec<(String, Option<OsString>)>>,
    loaded: RefCell<Option<Config>>,
    error: RefCell<Option<String>>,
    _env_guard: MutexGuard<'static, ()>,
}

impl Harness {
    fn new() -> Self {
        let env_guard = ENV_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("failed to create temporary directory: {error}"),
        };
        Self {
            temp_dir,
            cli_args: RefCell::new(vec![OsString::from("patchgate")]),
            env_overrides: RefCell::new(Vec::new()),
            loaded: RefCell::new(None),
            error: RefCell::new(None),
            _env_guard: env_guard,
        }
    }

    fn write_config(&self, policy: RollbackPolicy) {
        let path = self.temp_dir.path().join("patchgate.toml");
        let toml = format!("rollback_policy = \"{policy}\"\nbackup_suffix = \"orig\"\n");
        if let Err(error) = fs::write(&path, toml) {
            panic!("failed to write configuration: {error}");
        }

        let mut args = self.cli_args.borrow_mut();
        args.push(OsString::from("--config-path"));
        args.push(path.into_os_string());
    }

    fn set_env(&self, key: &str, value: &str) {
        let previous = std::env::var_os(key);
        // Restored in `Drop`; the harness holds the env mutex for its lifetime.
        unsafe { std::env::set_var(key, value) };
        self.env_overrides
            .borrow_mut()
            .push((key.to_owned(), previous));
    }

    fn clear_env(&self) {
        let keys: Vec<String> = std::env::vars_os()
            .filter_map(|(key, _)| key.into_string().ok())
            .filter(|key| key.starts_with("PATCHGATE_"))
            .collect();
        for key in keys {
            let previous = std::env::var_os(&key);
            unsafe { std::env::remove_var(&key) };
            self.env_overrides.borrow_mut().push((key, previous));
        }
    }

    fn push_cli_arg(&self, arg: impl Into<OsString>) {
        self.cli_args.borrow_mut().push(arg.into());
    }

    fn load(&self) {
        if self.loaded.borrow().is_some() || self.error.borrow().is_some() {
            return;
        }

        let args = self.cli_args.borrow().clone();
        match Config::load_from_iter(args) {
            Ok(config) => *self.loaded.borrow_mut() = Some(config),
            Err(error) => *self.error.borrow_mut() = Some(error.to_string()),
        }
    }

    fn loaded_config(&self) -> Config {
        self.load();
        if let Some(error) = self.error.borrow().as_ref() {
            panic!("configuration failed to load: {error}");
        }
        match self.loaded.borrow().as_ref() {
            Some(config) => config.clone(),
            None => panic!("configuration was not loaded"),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let mut overrides = self.env_overrides.borrow_mut();
        while let Some((key, value)) = overrides.pop() {
            match value {
                Some(os_value) => unsafe { std::env::set_var(&key, os_value) },
                None => unsafe { std::env::remove_var(&key) },
            }
        }
    }
}

fn parse_policy(text: &str) -> RollbackPolicy {
    match text.trim_matches('"').parse::<RollbackPolicy>() {
        Ok(policy) => policy,
        Err(error) => panic!("invalid rollback policy '{text}': {error}"),
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[given("a configuration file setting the rollback policy to {policy}")]
fn given_configuration_file(harness: &Harness, policy: String) {
    harness.write_config(parse_policy(&policy));
}

#[given("no patchgate environment variables are set")]
fn given_clean_environment(harness: &Harness) {
    harness.clear_env();
}

#[given("the environment overrides the rollback policy to {policy}")]
fn given_environment_override(harness: &Harness, policy: String) {
    harness.set_env("PATCHGATE_ROLLBACK_POLICY", policy.trim_matches('"'));
}

#[when("the CLI sets the rollback policy to {policy}")]
fn when_cli_override(harness: &Harness, policy: String) {
    harness.push_cli_arg("--rollback-policy");
    harness.push_cli_arg(policy.trim_matches('"'));
}

#[when("the configuration loads without overrides")]
fn when_load_without_overrides(harness: &Harness) {
    assert_eq!(harness.cli_args.borrow().len(), 1);
    harness.load();
}

#[then("loading the configuration resolves the rollback policy to {policy}")]
fn then_resolved_policy(harness: &Harness, policy: String) {
    let config = harness.loaded_config();
    assert_eq!(config.rollback_policy(), parse_policy(&policy));
    assert_eq!(config.backup_suffix(), "orig");
}

#[then("loading the configuration applies the built-in defaults")]
fn then_defaults_applied(harness: &Harness) {
    let config = harness.loaded_config();
    assert_eq!(config.log_filter(), default_log_filter());
    assert_eq!(config.log_format(), default_log_format());
    assert_eq!(config.rollback_policy(), default_rollback_policy());
    assert_eq!(config.backup_suffix(), default_backup_suffix());
    assert!(config.backup_dir().is_none());
}

#[scenario(path = "tests/features/configuration_precedence.feature")]
fn configuration_precedence(#[from(harness)] harness: Harness) {
    let _ = harness;
}
