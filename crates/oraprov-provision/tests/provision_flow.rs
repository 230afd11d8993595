//! End-to-end provisioning against a local archive and a recording runner.

use oraprov_core::desired_state::DesiredState;
use oraprov_provision::exec::{CommandOutput, CommandRunner, CommandSpec};
use oraprov_provision::fetch::{ArchiveFetcher, FileFetcher};
use oraprov_provision::runner::{Context, Provisioner, Step};
use oraprov_provision::state::Ledger;
use oraprov_provision::steps::{
    compat_links::CompatLinksStep, fetch::FetchStep, loader_path, loader_path::LoaderPathStep,
    os_packages::OsPackagesStep, python_deps::PythonDepsStep, wallet::WalletMaterial,
    wallet::WalletStep,
};
use oraprov_provision::ProvisionError;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Run(CommandSpec),
    Launch(CommandSpec),
}

#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<Call>>,
}

impl RecordingRunner {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn launches(&self) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Launch(spec) => Some(spec),
                Call::Run(_) => None,
            })
            .collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, spec: &CommandSpec) -> oraprov_provision::Result<CommandOutput> {
        self.calls.lock().unwrap().push(Call::Run(spec.clone()));
        Ok(CommandOutput {
            status: Some(0),
            ..Default::default()
        })
    }

    fn launch(&self, spec: &CommandSpec) -> oraprov_provision::Result<i32> {
        self.calls.lock().unwrap().push(Call::Launch(spec.clone()));
        Ok(0)
    }
}

/// `FileFetcher` that counts downloads.
#[derive(Default)]
struct CountingFetcher {
    downloads: AtomicUsize,
}

impl CountingFetcher {
    fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

impl ArchiveFetcher for CountingFetcher {
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> oraprov_provision::Result<u64> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        FileFetcher.fetch(url, dest)
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    state: DesiredState,
}

impl Fixture {
    fn install_dir(&self) -> PathBuf {
        self.dir.path().join("opt/oracle")
    }

    fn lib_dir(&self) -> PathBuf {
        self.install_dir().join("instantclient_21_13")
    }

    fn wallet_dir(&self) -> PathBuf {
        self.dir.path().join("wallet")
    }

    fn archive(&self) -> PathBuf {
        self.dir.path().join(ARCHIVE_NAME)
    }
}

const ARCHIVE_NAME: &str = "instantclient-basiclite-linux.x64-21.13.zip";

fn names_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

/// Zip with `<top>/libclntsh.so.*` and `<top>/libnnz*.so`; returns its SHA-256.
fn write_client_zip(path: &Path, top: &str) -> String {
    let file = fs::File::create(path).unwrap();
    let mut zw = zip::ZipWriter::new(file);
    let opts = zip::write::FileOptions::default().unix_permissions(0o755);
    for lib in ["libclntsh.so.21.1", "libnnz21.so"] {
        zw.start_file(format!("{top}/{lib}"), opts).unwrap();
        zw.write_all(b"\x7fELF").unwrap();
    }
    zw.finish().unwrap();
    hex::encode(Sha256::digest(fs::read(path).unwrap()))
}

/// `sha256: None` pins the real digest; `Some` overrides it.
fn fixture(port_env: &str, sha256: Option<&str>, extra: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join(ARCHIVE_NAME);
    let actual = write_client_zip(&archive, "instantclient_21_13");
    fs::write(dir.path().join("requirements.txt"), "flask\noracledb\n").unwrap();
    let yaml = format!(
        "os_packages:\n  manager: none\n\
         instant_client:\n  url: file://{archive}\n  sha256: \"{sha}\"\n  install_dir: {root}/opt/oracle\n\
         python:\n  requirements: {root}/requirements.txt\n  interpreter: python3\n\
         wallet:\n  dir: {root}/wallet\n\
         server:\n  port_env: {port_env}\n{extra}",
        archive = archive.display(),
        sha = sha256.unwrap_or(&actual),
        root = dir.path().display(),
    );
    let state = DesiredState::from_yaml_str(&yaml).unwrap();
    Fixture { dir, state }
}

fn provisioner(material: Vec<WalletMaterial>) -> Provisioner {
    let steps: Vec<Box<dyn Step>> = vec![
        Box::new(OsPackagesStep),
        Box::new(FetchStep),
        Box::new(CompatLinksStep),
        Box::new(LoaderPathStep),
        Box::new(PythonDepsStep),
        Box::new(WalletStep::with_material(material)),
    ];
    Provisioner::with_steps(steps)
}

fn env_of<'a>(spec: &'a CommandSpec, key: &str) -> Option<&'a str> {
    spec.env
        .iter()
        .rev()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

#[cfg(target_os = "linux")]
#[test]
fn library_dir_is_exported_after_successful_run() {
    let fx = fixture("ORAPROV_TEST_PORT_UNSET_1", None, "");
    let runner = RecordingRunner::default();
    let mut ctx = Context::new(&fx.state, &runner, &FileFetcher, Ledger::in_memory());

    let (_, code) = provisioner(Vec::new()).provision(&mut ctx, None).unwrap();
    assert_eq!(code, 0);
    assert!(fx.lib_dir().join("libclntsh.so.21.1").exists());

    let launches = runner.launches();
    assert_eq!(launches.len(), 1);
    let ld = env_of(&launches[0], "LD_LIBRARY_PATH").unwrap();
    assert_eq!(ld.split(':').next(), Some(fx.lib_dir().to_str().unwrap()));

    // archive removed, no staging leftovers
    assert_eq!(names_in(&fx.install_dir()), vec!["instantclient_21_13"]);
}

#[test]
fn manifest_is_installed_before_supervisor_launch() {
    let fx = fixture("ORAPROV_TEST_PORT_UNSET_2", None, "");
    let runner = RecordingRunner::default();
    let mut ctx = Context::new(&fx.state, &runner, &FileFetcher, Ledger::in_memory());
    provisioner(Vec::new()).provision(&mut ctx, None).unwrap();

    let calls = runner.calls();
    let pip = calls
        .iter()
        .position(|c| matches!(c, Call::Run(s) if s.args.iter().any(|a| a == "pip")))
        .expect("pip install ran");
    let launch = calls
        .iter()
        .position(|c| matches!(c, Call::Launch(_)))
        .expect("supervisor launched");
    assert!(pip < launch);
}

#[test]
fn fetch_failure_aborts_without_launch() {
    let mut fx = fixture("ORAPROV_TEST_PORT_UNSET_3", None, "");
    fx.state.instant_client.url = "file:///nonexistent/oraprov/instantclient.zip".to_string();
    let runner = RecordingRunner::default();
    let mut ctx = Context::new(&fx.state, &runner, &FileFetcher, Ledger::in_memory());

    let err = provisioner(Vec::new()).provision(&mut ctx, None).unwrap_err();
    assert_eq!(err.step(), Some("fetch"));
    assert!(runner.launches().is_empty());
    // later steps never ran
    assert!(!runner
        .calls()
        .iter()
        .any(|c| matches!(c, Call::Run(s) if s.args.iter().any(|a| a == "pip"))));
}

#[test]
fn checksum_mismatch_aborts_before_extraction() {
    let wrong = "0".repeat(64);
    let fx = fixture("ORAPROV_TEST_PORT_UNSET_4", Some(&wrong), "");
    let runner = RecordingRunner::default();
    let mut ctx = Context::new(&fx.state, &runner, &FileFetcher, Ledger::in_memory());

    let err = provisioner(Vec::new()).provision(&mut ctx, None).unwrap_err();
    match err {
        ProvisionError::Step { step, source } => {
            assert_eq!(step, "fetch");
            assert!(matches!(*source, ProvisionError::Integrity { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!fx.lib_dir().exists());
    assert!(runner.launches().is_empty());
}

#[cfg(unix)]
#[test]
fn wallet_permissions_are_repaired_on_rerun() {
    use std::os::unix::fs::PermissionsExt;

    let fx = fixture("ORAPROV_TEST_PORT_UNSET_5", None, "");
    let runner = RecordingRunner::default();
    let material = vec![WalletMaterial::new("TNSNAMES_ORA_B64", "tnsnames.ora", "ZGIgPSAoKQo=")];
    let p = provisioner(material);
    let mut ctx = Context::new(&fx.state, &runner, &FileFetcher, Ledger::in_memory());
    p.apply(&mut ctx).unwrap();
    assert_eq!(fs::read(fx.wallet_dir().join("tnsnames.ora")).unwrap(), b"db = ()\n");

    fs::set_permissions(fx.wallet_dir(), fs::Permissions::from_mode(0o700)).unwrap();
    let report = p.apply(&mut ctx).unwrap();
    assert_eq!(report.applied().collect::<Vec<_>>(), vec!["wallet"]);
    let mode = fs::metadata(fx.wallet_dir()).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o755);
}

#[test]
fn bound_port_follows_port_variable() {
    let fx = fixture("ORAPROV_TEST_PORT_SET", None, "");
    oraprov_core::config::set_env_var("ORAPROV_TEST_PORT_SET", "8123");
    let runner = RecordingRunner::default();
    let mut ctx = Context::new(&fx.state, &runner, &FileFetcher, Ledger::in_memory());
    provisioner(Vec::new()).provision(&mut ctx, None).unwrap();

    let launch = &runner.launches()[0];
    let bind = launch.args.iter().position(|a| a == "--bind").unwrap();
    assert_eq!(launch.args[bind + 1], "0.0.0.0:8123");
    assert_eq!(env_of(launch, "ORAPROV_TEST_PORT_SET"), Some("8123"));
    assert_eq!(launch.args.last().map(String::as_str), Some("app:app"));
}

#[test]
fn bound_port_defaults_when_variable_unset() {
    let fx = fixture("ORAPROV_TEST_PORT_NEVER_SET", None, "");
    let runner = RecordingRunner::default();
    let mut ctx = Context::new(&fx.state, &runner, &FileFetcher, Ledger::in_memory());
    provisioner(Vec::new()).provision(&mut ctx, None).unwrap();

    let launch = &runner.launches()[0];
    assert!(launch.args.iter().any(|a| a == "0.0.0.0:10000"));
}

#[test]
fn compat_link_step_accepts_existing_library() {
    let libs = tempfile::tempdir().unwrap();
    fs::write(libs.path().join("libaio.so.1"), b"real").unwrap();
    let extra = format!(
        "compat_links:\n  - expected: libaio.so.1\n    provided: libaio.so.1t64\n    search_dirs: [{}]\n",
        libs.path().display()
    );
    let fx = fixture("ORAPROV_TEST_PORT_UNSET_6", None, &extra);
    let runner = RecordingRunner::default();
    let mut ctx = Context::new(&fx.state, &runner, &FileFetcher, Ledger::in_memory());

    let report = provisioner(Vec::new()).apply(&mut ctx).unwrap();
    assert!(!report.applied().any(|s| s == "compat_links"));
    assert_eq!(fs::read(libs.path().join("libaio.so.1")).unwrap(), b"real");
}

#[test]
fn second_run_converges_without_changes() {
    let fx = fixture("ORAPROV_TEST_PORT_UNSET_7", None, "");
    let runner = RecordingRunner::default();
    let p = provisioner(Vec::new());
    let mut ctx = Context::new(&fx.state, &runner, &FileFetcher, Ledger::in_memory());

    let first = p.apply(&mut ctx).unwrap();
    assert!(first.applied().any(|s| s == "fetch"));
    let second = p.apply(&mut ctx).unwrap();
    assert_eq!(second.applied().count(), 0);
}

#[test]
fn ledger_survives_reload() {
    let fx = fixture("ORAPROV_TEST_PORT_UNSET_8", None, "");
    let state_dir = fx.dir.path().join("state");
    let runner = RecordingRunner::default();
    let p = provisioner(Vec::new());
    {
        let mut ctx = Context::new(&fx.state, &runner, &FileFetcher, Ledger::load(&state_dir).unwrap());
        p.apply(&mut ctx).unwrap();
    }
    let ctx = Context::new(&fx.state, &runner, &FileFetcher, Ledger::load(&state_dir).unwrap());
    let plan = p.plan(&ctx).unwrap();
    assert!(plan.iter().all(|s| !s.status.is_pending()), "{plan:?}");
}

#[test]
fn repinning_older_client_replaces_newer_install() {
    let fx = fixture("ORAPROV_TEST_PORT_UNSET_9", None, "");
    let newer = fx.dir.path().join("instantclient-basiclite-linux.x64-23.5.zip");
    let mut newer_state = fx.state.clone();
    newer_state.instant_client.url = format!("file://{}", newer.display());
    newer_state.instant_client.sha256 = Some(write_client_zip(&newer, "instantclient_23_5"));

    let runner = RecordingRunner::default();
    let p = provisioner(Vec::new());
    let mut ctx = Context::new(&newer_state, &runner, &FileFetcher, Ledger::in_memory());
    p.apply(&mut ctx).unwrap();
    assert_eq!(ctx.library_dir(), Some(fx.install_dir().join("instantclient_23_5")));
    let ledger = ctx.ledger;

    let mut ctx = Context::new(&fx.state, &runner, &FileFetcher, ledger);
    let report = p.apply(&mut ctx).unwrap();
    assert!(report.applied().any(|s| s == "fetch"));
    assert_eq!(ctx.library_dir(), Some(fx.lib_dir()));
    assert_eq!(names_in(&fx.install_dir()), vec!["instantclient_21_13"]);

    let lib = ctx.library_dir().unwrap();
    let env = loader_path::exported_environment(&fx.state, &lib);
    let (_, search_path) = env.iter().find(|(k, _)| k == loader_path::loader_var()).unwrap();
    assert!(search_path.starts_with(fx.lib_dir().to_str().unwrap()));
    assert!(p.plan(&ctx).unwrap().iter().all(|s| !s.status.is_pending()));
}

#[test]
fn cached_archive_is_reused_without_download() {
    let fx = fixture("ORAPROV_TEST_PORT_UNSET_10", None, "");
    let cache = fx.dir.path().join("cache");
    let runner = RecordingRunner::default();
    let fetcher = CountingFetcher::default();
    let p = provisioner(Vec::new());

    let mut ctx = Context::new(&fx.state, &runner, &fetcher, Ledger::in_memory())
        .with_cache_dir(Some(cache.clone()));
    p.apply(&mut ctx).unwrap();
    assert_eq!(fetcher.downloads(), 1);
    let cached = names_in(&cache);
    assert_eq!(cached.len(), 1);
    assert!(cached[0].ends_with(ARCHIVE_NAME));
    // the archive lives in the cache, not the install dir
    assert_eq!(names_in(&fx.install_dir()), vec!["instantclient_21_13"]);

    fs::remove_dir_all(fx.install_dir()).unwrap();
    let mut ctx = Context::new(&fx.state, &runner, &fetcher, Ledger::in_memory())
        .with_cache_dir(Some(cache.clone()));
    p.apply(&mut ctx).unwrap();
    assert_eq!(fetcher.downloads(), 1);
    assert!(fx.lib_dir().join("libclntsh.so.21.1").exists());
}

#[test]
fn corrupt_cached_archive_is_downloaded_again() {
    let fx = fixture("ORAPROV_TEST_PORT_UNSET_11", None, "");
    let cache = fx.dir.path().join("cache");
    let runner = RecordingRunner::default();
    let fetcher = CountingFetcher::default();
    let p = provisioner(Vec::new());

    let mut ctx = Context::new(&fx.state, &runner, &fetcher, Ledger::in_memory())
        .with_cache_dir(Some(cache.clone()));
    p.apply(&mut ctx).unwrap();
    let cached = cache.join(&names_in(&cache)[0]);
    fs::write(&cached, b"truncated").unwrap();

    let mut ctx = Context::new(&fx.state, &runner, &fetcher, Ledger::in_memory())
        .with_cache_dir(Some(cache.clone()));
    p.apply(&mut ctx).unwrap();
    assert_eq!(fetcher.downloads(), 2);
    assert_eq!(fs::read(&cached).unwrap(), fs::read(fx.archive()).unwrap());
}

#[test]
fn keep_archive_leaves_download_next_to_install() {
    let mut fx = fixture("ORAPROV_TEST_PORT_UNSET_12", None, "");
    fx.state.instant_client.keep_archive = true;
    let runner = RecordingRunner::default();
    let mut ctx = Context::new(&fx.state, &runner, &FileFetcher, Ledger::in_memory());
    provisioner(Vec::new()).apply(&mut ctx).unwrap();

    assert_eq!(
        names_in(&fx.install_dir()),
        vec![ARCHIVE_NAME.to_string(), "instantclient_21_13".to_string()]
    );
    assert_eq!(
        fs::read(fx.install_dir().join(ARCHIVE_NAME)).unwrap(),
        fs::read(fx.archive()).unwrap()
    );
}
