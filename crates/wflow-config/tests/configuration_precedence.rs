//! Behaviour tests for configuration layering.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use wflow_config::Config;

struct Harness {
    temp_dir: TempDir,
    cli_args: RefCell<Vec<OsString>>,
    environment: RefCell<HashMap<String, String>>,
    loaded: RefCell<Option<Config>>,
}

impl Harness {
    fn new() -> Self {
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("failed to create temporary directory: {error}"),
        };
        Self {
            temp_dir,
            cli_args: RefCell::new(vec![OsString::from("wflowd")]),
            environment: RefCell::new(HashMap::new()),
            loaded: RefCell::new(None),
        }
    }

    fn write_config(&self, plugins_dir: &str) {
        let path = self.temp_dir.path().join("wflow.toml");
        if let Err(error) = fs::write(&path, format!("plugins_dir = \"{plugins_dir}\"\n")) {
            panic!("failed to write configuration: {error}");
        }
        let mut args = self.cli_args.borrow_mut();
        args.push(OsString::from("--config-path"));
        args.push(path.into_os_string());
    }

    fn config(&self) -> Config {
        if let Some(config) = self.loaded.borrow().as_ref() {
            return config.clone();
        }
        let args = self.cli_args.borrow().clone();
        let environment = self.environment.borrow().clone();
        let config = match Config::load_with_environment(args, environment) {
            Ok(config) => config,
            Err(error) => panic!("configuration failed to load: {error}"),
        };
        *self.loaded.borrow_mut() = Some(config.clone());
        config
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[given("a configuration file setting the plugins directory to \"{dir}\"")]
fn given_configuration_file(harness: &Harness, dir: String) {
    harness.write_config(&dir);
}

#[given("the environment sets the plugins directory to \"{dir}\"")]
fn given_environment(harness: &Harness, dir: String) {
    harness
        .environment
        .borrow_mut()
        .insert("WFLOW_PLUGINS_DIR".to_owned(), dir);
}

#[when("the command line sets the plugins directory to \"{dir}\"")]
fn when_cli(harness: &Harness, dir: String) {
    let mut args = harness.cli_args.borrow_mut();
    args.push(OsString::from("--plugins-dir"));
    args.push(OsString::from(dir));
}

#[then("loading the configuration resolves the plugins directory to \"{dir}\"")]
fn then_plugins_dir(harness: &Harness, dir: String) {
    assert_eq!(harness.config().plugins_dir().as_str(), dir);
}

#[then("the log filter is \"{filter}\"")]
fn then_log_filter(harness: &Harness, filter: String) {
    assert_eq!(harness.config().log_filter(), filter);
}

#[scenario(path = "tests/features/configuration_precedence.feature")]
fn configuration_precedence(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[test]
fn environment_beats_the_configuration_file() {
    let harness = Harness::new();
    harness.write_config("/srv/file-plugins");
    harness
        .environment
        .borrow_mut()
        .insert("WFLOW_PLUGINS_DIR".to_owned(), "/srv/env-plugins".to_owned());
    assert_eq!(harness.config().plugins_dir().as_str(), "/srv/env-plugins");
}

#[test]
fn missing_explicit_configuration_file_fails() {
    let result = Config::load_with_environment(
        ["wflowd", "--config-path", "/definitely/not/here/wflow.toml"],
        HashMap::new(),
    );
    assert!(result.is_err());
}
