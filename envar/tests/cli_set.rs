//! CLI tests for `envar -s`, `-l` and `-b`.
//!
//! Spawns the envar binary against scratch stores and a scratch broadcast
//! directory configured through `ENVAR_CONFIG`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use envar::core::types::PersistedScope;
use envar::exit_codes;
use envar::io::config::{CONFIG_ENV, EnvarConfig, write_config};
use envar::io::store::{FileStore, VariableStore};

struct Sandbox {
    temp: tempfile::TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self::with_config(EnvarConfig::default())
    }

    fn with_config(cfg: EnvarConfig) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = EnvarConfig {
            user_store: Some(temp.path().join("user/environment.toml")),
            machine_store: Some(temp.path().join("machine/environment.toml")),
            broadcast_dir: Some(temp.path().join("broadcast")),
            broadcast_timeout_ms: 2_000,
            broadcast_poll_ms: 10,
            ..cfg
        };
        write_config(&temp.path().join("config.toml"), &cfg).expect("write config");
        Self { temp }
    }

    fn store(&self) -> FileStore {
        FileStore::new(self.user_path(), self.temp.path().join("machine/environment.toml"))
    }

    fn user_path(&self) -> PathBuf {
        self.temp.path().join("user/environment.toml")
    }

    fn seed_user(&self, contents: &str) {
        write_file(&self.user_path(), contents);
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_envar"))
            .args(args)
            .env(CONFIG_ENV, self.temp.path().join("config.toml"))
            .env("RUST_LOG", "off")
            .output()
            .expect("run envar")
    }
}

fn write_file(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, contents).expect("write");
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn set_creates_then_appends_by_default() {
    let sandbox = Sandbox::new();

    let first = sandbox.run(&["-s", "-n", "PATH", "-v", "/opt/a"]);
    assert_eq!(first.status.code(), Some(exit_codes::OK), "{}", stderr(&first));
    let second = sandbox.run(&["-s", "-n", "PATH", "-v", "/opt/b"]);
    assert_eq!(second.status.code(), Some(exit_codes::OK), "{}", stderr(&second));
    assert!(stdout(&second).contains("Appended user variable PATH = /opt/a;/opt/b"));

    let value = sandbox
        .store()
        .read_one(PersistedScope::User, "PATH")
        .expect("read");
    assert_eq!(value.as_deref(), Some("/opt/a;/opt/b"));
}

#[test]
fn append_scenario_on_existing_path() {
    let sandbox = Sandbox::new();
    sandbox.seed_user("PATH = 'C:\\A;C:\\B'\n");

    let output = sandbox.run(&["-s", "-u", "-a", "-n", "PATH", "-v", "C:\\Tools"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", stderr(&output));

    let value = sandbox
        .store()
        .read_one(PersistedScope::User, "path")
        .expect("read");
    assert_eq!(value.as_deref(), Some("C:\\A;C:\\B;C:\\Tools"));
}

#[test]
fn overwrite_scenario_on_existing_path() {
    let sandbox = Sandbox::new();
    sandbox.seed_user("PATH = 'C:\\A;C:\\B'\nEDITOR = 'vim'\n");

    let output = sandbox.run(&["-s", "-o", "-n", "PATH", "-v", "C:\\Tools"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", stderr(&output));

    let set = sandbox.store().read(PersistedScope::User).expect("read");
    assert_eq!(set.get("PATH"), Some("C:\\Tools"));
    assert_eq!(set.get("EDITOR"), Some("vim"));
}

#[test]
fn overwrite_keeps_hand_edited_comments() {
    let sandbox = Sandbox::new();
    let seeded = "# managed by ops\nZED = 'C:\\z'  # zed home\nEDITOR = 'vim'\n";
    sandbox.seed_user(seeded);

    let output = sandbox.run(&["-s", "-o", "-n", "PATH", "-v", "/opt/bin"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", stderr(&output));

    let after = fs::read_to_string(sandbox.user_path()).expect("read after");
    assert!(after.starts_with(seeded), "{after}");
}

#[test]
fn empty_value_deletes_variable() {
    let sandbox = Sandbox::new();
    sandbox.seed_user("# managed by ops\nJAVA_HOME = '/jvm'\nEDITOR = 'vim'\n");

    let output = sandbox.run(&["-s", "-o", "-n", "java_home", "-v", ""]);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", stderr(&output));
    assert!(stdout(&output).contains("Removed user variable java_home"));
    assert_eq!(
        fs::read_to_string(sandbox.user_path()).expect("read after"),
        "# managed by ops\nEDITOR = 'vim'\n"
    );

    let again = sandbox.run(&["-s", "-o", "-n", "JAVA_HOME", "-v", ""]);
    assert_eq!(again.status.code(), Some(exit_codes::FAILURE));
    assert!(stderr(&again).contains("does not exist"));
}

#[test]
fn uppercase_v_sets_value_instead_of_printing_version() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["-s", "-n", "FOO", "-V", "bar"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", stderr(&output));
    assert_eq!(
        sandbox
            .store()
            .read_one(PersistedScope::User, "FOO")
            .expect("read")
            .as_deref(),
        Some("bar")
    );
}

#[test]
fn duplicate_append_fails_and_leaves_file_untouched() {
    let sandbox = Sandbox::new();
    sandbox.seed_user("PATH = 'C:\\x;C:\\Y'\n");
    let before = fs::read(sandbox.user_path()).expect("read before");

    let output = sandbox.run(&["-s", "-a", "-n", "PATH", "-v", "c:\\y"]);
    assert_eq!(output.status.code(), Some(exit_codes::FAILURE));
    assert!(stderr(&output).contains("already exists"));
    assert_eq!(fs::read(sandbox.user_path()).expect("read after"), before);
}

#[test]
fn explicit_mode_required_when_default_disabled() {
    let sandbox = Sandbox::with_config(EnvarConfig {
        default_mode: envar::core::types::DefaultMode::None,
        ..EnvarConfig::default()
    });
    sandbox.seed_user("EDITOR = 'nano'\n");

    let output = sandbox.run(&["-s", "-n", "EDITOR", "-v", "vim"]);
    assert_eq!(output.status.code(), Some(exit_codes::FAILURE));
    assert!(stderr(&output).contains("specify -a (append) or -o (overwrite)"));
}

#[test]
fn set_on_process_scope_is_rejected() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["-s", "-p", "1", "-n", "PATH", "-v", "/x"]);
    assert_eq!(output.status.code(), Some(exit_codes::FAILURE));
    assert!(stderr(&output).starts_with("ERROR: "));
    assert!(!sandbox.user_path().exists());
}

#[test]
fn broadcast_only_leaves_store_byte_identical() {
    let sandbox = Sandbox::new();
    sandbox.seed_user("PATH = '/bin'\n# trailing comment\n");
    let before = fs::read(sandbox.user_path()).expect("read before");

    let output = sandbox.run(&["-b"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", stderr(&output));
    assert_eq!(fs::read(sandbox.user_path()).expect("read after"), before);
}

#[test]
fn list_empty_store_prints_no_variables() {
    let sandbox = Sandbox::new();
    sandbox.seed_user("");

    let output = sandbox.run(&["-l"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", stderr(&output));
    assert!(stdout(&output).contains("(no variables)"));
}

#[test]
fn list_missing_store_fails() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["-l", "-m"]);
    assert_eq!(output.status.code(), Some(exit_codes::FAILURE));
    assert!(stderr(&output).contains("store unavailable"));
}

#[test]
fn list_own_process_environment() {
    if !Path::new("/proc/self/environ").exists() {
        return;
    }
    let sandbox = Sandbox::new();
    let pid = std::process::id().to_string();
    let output = sandbox.run(&["-l", "-p", &pid]);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", stderr(&output));
    assert!(stdout(&output).contains(&format!("Pid: {pid:>5}")));
}
