//! Integration tests for the `mn` CLI.
//!
//! Each test gets a temp client home, runs `mn` as a subprocess, and checks
//! stdout and/or the session file. Commands that talk to the backend run
//! against a tiny HTTP stub on localhost.

use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use serde_json::Value;
use tempfile::TempDir;

/// Get the path to the built `mn` binary.
fn mn_bin() -> PathBuf {
    // cargo test builds to target/debug/
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("mn");
    path
}

fn mn_with_api(home: &Path, api: Option<&str>, args: &[&str]) -> Output {
    let mut cmd = Command::new(mn_bin());
    cmd.arg("--home")
        .arg(home)
        .args(args)
        .env_remove("MININOTE_HOME")
        .env_remove("RUST_LOG");
    match api {
        Some(url) => cmd.env("MININOTE_API_URL", url),
        // Nothing listens here; commands that reach the network fail fast
        None => cmd.env("MININOTE_API_URL", "http://127.0.0.1:9"),
    };
    cmd.output().expect("failed to run mn")
}

/// Run `mn`, returning (stdout, stderr, success).
fn run_mn(home: &Path, args: &[&str]) -> (String, String, bool) {
    let out = mn_with_api(home, None, args);
    (
        String::from_utf8_lossy(&out.stdout).to_string(),
        String::from_utf8_lossy(&out.stderr).to_string(),
        out.status.success(),
    )
}

/// Run `mn` and assert success, returning stdout.
fn run_mn_ok(home: &Path, args: &[&str]) -> String {
    let (stdout, stderr, ok) = run_mn(home, args);
    assert!(ok, "mn {:?} failed:\nstdout: {}\nstderr: {}", args, stdout, stderr);
    stdout
}

fn json_of(stdout: &str) -> Value {
    serde_json::from_str(stdout).unwrap_or_else(|e| panic!("bad json ({}): {}", e, stdout))
}

fn session_file(home: &Path) -> Value {
    json_of(&fs::read_to_string(home.join("session.json")).unwrap())
}

// ---------------------------------------------------------------------------
// HTTP stub
// ---------------------------------------------------------------------------

struct Stub {
    url: String,
    /// `METHOD PATH BODY` per request received
    seen: Arc<Mutex<Vec<String>>>,
}

/// Serve fixed `(path, status, body)` routes until the test process exits.
fn stub(routes: Vec<(&'static str, u16, &'static str)>) -> Stub {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut reader = BufReader::new(stream.try_clone().unwrap());

            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut content_length = 0;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).unwrap();
                if header.trim().is_empty() {
                    break;
                }
                if let Some((name, value)) = header.split_once(':')
                    && name.eq_ignore_ascii_case("content-length")
                {
                    content_length = value.trim().parse().unwrap();
                }
            }
            let mut body = vec![0; content_length];
            reader.read_exact(&mut body).unwrap();

            let mut parts = request_line.split_whitespace();
            let method = parts.next().unwrap_or_default().to_string();
            let path = parts.next().unwrap_or_default().to_string();
            log.lock().unwrap().push(format!(
                "{} {} {}",
                method,
                path,
                String::from_utf8_lossy(&body)
            ));

            let (status, reply) = routes
                .iter()
                .find(|(p, _, _)| *p == path)
                .map(|(_, s, b)| (*s, *b))
                .unwrap_or((404, r#"{"detail":"Not Found"}"#));
            let response = format!(
                "HTTP/1.1 {} STUB\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                reply.len(),
                reply
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    Stub { url, seen }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[test]
fn discover_reconstructs_user_fields() {
    let home = TempDir::new().unwrap();
    let out = run_mn_ok(
        home.path(),
        &[
            "discover",
            "--url",
            "https://app.example/?user_id=42&first_name=Ann",
            "--json",
        ],
    );
    let json = json_of(&out);
    assert_eq!(json["found"], true);
    assert_eq!(json["source"], "user-fields");
    assert_eq!(json["credential"], "user_id=42&first_name=Ann");
    assert_eq!(json["user_id"], "42");

    // The hit is cached and wins on the next pass, even with another URL
    let out = run_mn_ok(
        home.path(),
        &["discover", "--url", "https://app.example/?user_id=7", "--json"],
    );
    let json = json_of(&out);
    assert_eq!(json["source"], "cache");
    assert_eq!(json["credential"], "user_id=42&first_name=Ann");
}

#[test]
fn discover_sdk_text_output() {
    let home = TempDir::new().unwrap();
    let out = run_mn_ok(
        home.path(),
        &["discover", "--sdk", "Telegram.WebApp=query_id=AA&user_id=5"],
    );
    assert!(out.contains("source:     sdk:Telegram.WebApp"), "{}", out);
    assert!(out.contains("user id:    5"), "{}", out);
}

#[test]
fn discover_nothing() {
    let home = TempDir::new().unwrap();
    let out = run_mn_ok(home.path(), &["discover", "--json"]);
    assert_eq!(json_of(&out), serde_json::json!({"found": false}));

    let out = run_mn_ok(home.path(), &["discover"]);
    assert_eq!(out, "No launch data found.\n");
}

#[test]
fn invalid_sdk_pair_is_an_error() {
    let home = TempDir::new().unwrap();
    let (_, stderr, ok) = run_mn(home.path(), &["discover", "--sdk", "nonsense"]);
    assert!(!ok);
    assert!(stderr.contains("NAMESPACE=INITDATA"), "{}", stderr);
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

#[test]
fn relay_first_message_wins_and_feeds_discovery() {
    let home = TempDir::new().unwrap();
    let out = run_mn_ok(
        home.path(),
        &["relay", r#"{"user_id": 11, "first_name": "Bo"}"#, "--json"],
    );
    let json = json_of(&out);
    assert_eq!(json["outcome"], "accepted");
    assert_eq!(json["credential"], "user_id=11&first_name=Bo");

    let out = run_mn_ok(home.path(), &["relay", r#"{"initData": "user_id=12"}"#]);
    assert!(out.starts_with("Ignored: launch data was already relayed"));

    let out = run_mn_ok(home.path(), &["discover", "--json"]);
    let json = json_of(&out);
    assert_eq!(json["source"], "relay");
    assert_eq!(json["credential"], "user_id=11&first_name=Bo");
}

#[test]
fn relay_request_message() {
    let home = TempDir::new().unwrap();
    let out = run_mn_ok(home.path(), &["relay", "--request"]);
    assert_eq!(out.trim(), r#"{"type":"requestInitData"}"#);
}

// ---------------------------------------------------------------------------
// Local session state
// ---------------------------------------------------------------------------

#[test]
fn status_when_logged_out() {
    let home = TempDir::new().unwrap();
    let out = run_mn_ok(home.path(), &["status"]);
    assert!(out.starts_with("session:     not logged in\n"), "{}", out);

    let json = json_of(&run_mn_ok(home.path(), &["status", "--json"]));
    assert_eq!(json["authenticated"], false);
    assert!(json.get("token").is_none());
}

#[test]
fn dev_user_set_show_clear() {
    let home = TempDir::new().unwrap();
    run_mn_ok(home.path(), &["dev-user", "99"]);
    assert_eq!(run_mn_ok(home.path(), &["dev-user"]), "99\n");
    assert_eq!(session_file(home.path())["dev_user_id"], "99");

    run_mn_ok(home.path(), &["dev-user", "--clear"]);
    assert_eq!(
        run_mn_ok(home.path(), &["dev-user"]),
        "No developer override set.\n"
    );
}

#[test]
fn logout_removes_token_and_profile() {
    let home = TempDir::new().unwrap();
    fs::write(
        home.path().join("session.json"),
        r#"{"token": "tok123", "user": "{\"id\":1,\"username\":\"Ann\"}", "initData_saved": "user_id=1"}"#,
    )
    .unwrap();

    let json = json_of(&run_mn_ok(home.path(), &["status", "--json"]));
    assert_eq!(json["authenticated"], true);
    assert_eq!(json["user"]["username"], "Ann");

    assert_eq!(run_mn_ok(home.path(), &["logout"]), "Logged out.\n");
    let session = session_file(home.path());
    assert!(session.get("token").is_none());
    assert!(session.get("user").is_none());
    assert_eq!(session["initData_saved"], "user_id=1");

    run_mn_ok(home.path(), &["logout", "--forget"]);
    assert!(session_file(home.path()).get("initData_saved").is_none());
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[test]
fn config_set_preserves_file_and_shows() {
    let home = TempDir::new().unwrap();
    fs::write(
        home.path().join("config.toml"),
        "# my client\n[api]\nbase_url = \"https://notes.example.com\"\n",
    )
    .unwrap();

    run_mn_ok(home.path(), &["config", "set", "exchange.max_attempts", "5"]);
    let text = fs::read_to_string(home.path().join("config.toml")).unwrap();
    assert!(text.starts_with("# my client\n"));
    assert!(text.contains("max_attempts = 5"));

    // MININOTE_API_URL overrides the file in the effective config
    let json = json_of(&run_mn_ok(home.path(), &["config", "show", "--json"]));
    assert_eq!(json["exchange"]["max_attempts"], 5);
    assert_eq!(json["api"]["base_url"], "http://127.0.0.1:9");
}

#[test]
fn config_set_rejects_unknown_key() {
    let home = TempDir::new().unwrap();
    let (_, stderr, ok) = run_mn(home.path(), &["config", "set", "api.colour", "red"]);
    assert!(!ok);
    assert!(stderr.contains("unknown config key \"api.colour\""), "{}", stderr);
    assert!(!home.path().join("config.toml").exists());
}

#[test]
fn config_set_rejects_out_of_range_without_writing() {
    let home = TempDir::new().unwrap();
    run_mn_ok(home.path(), &["config", "set", "exchange.max_attempts", "4"]);
    let before = fs::read_to_string(home.path().join("config.toml")).unwrap();

    let (_, stderr, ok) = run_mn(
        home.path(),
        &["config", "set", "exchange.max_attempts", "5000000000"],
    );
    assert!(!ok);
    assert!(stderr.contains("must be at most"), "{}", stderr);
    assert_eq!(fs::read_to_string(home.path().join("config.toml")).unwrap(), before);

    // Still usable afterwards
    run_mn_ok(home.path(), &["config", "set", "exchange.max_attempts", "3"]);
    run_mn_ok(home.path(), &["status"]);
}

#[test]
fn config_set_repairs_an_unloadable_file() {
    let home = TempDir::new().unwrap();
    fs::write(home.path().join("config.toml"), "[exchange]\nmax_attempts = -1\n").unwrap();

    let (_, stderr, ok) = run_mn(home.path(), &["status"]);
    assert!(!ok);
    assert!(stderr.contains("could not parse config.toml"), "{}", stderr);

    run_mn_ok(home.path(), &["config", "set", "exchange.max_attempts", "2"]);
    run_mn_ok(home.path(), &["status"]);
}

// ---------------------------------------------------------------------------
// Login and authenticated commands
// ---------------------------------------------------------------------------

#[test]
fn login_exchanges_url_credential_for_token() {
    let server = stub(vec![
        ("/auth/webapp-init", 200, r#"{"access_token":"tok123","token_type":"bearer"}"#),
        ("/auth/me", 200, r#"{"id":42,"username":"Ann","uuid":"u-42"}"#),
    ]);
    let home = TempDir::new().unwrap();

    let out = mn_with_api(
        home.path(),
        Some(&server.url),
        &[
            "login",
            "--url",
            "https://app.example/?user_id=42&first_name=Ann",
            "--no-wait",
            "--json",
        ],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let json = json_of(&String::from_utf8_lossy(&out.stdout));
    assert_eq!(json["state"], "authenticated");

    let session = session_file(home.path());
    assert_eq!(session["token"], "tok123");
    assert_eq!(session["initData_saved"], "user_id=42&first_name=Ann");
    assert!(session["user"].as_str().unwrap().contains("\"Ann\""));

    let seen = server.seen.lock().unwrap().clone();
    assert_eq!(
        seen[0],
        r#"POST /auth/webapp-init {"initData":"user_id=42&first_name=Ann"}"#
    );
    assert!(seen[1].starts_with("GET /auth/me"));
}

#[test]
fn login_without_launch_data_fails_once() {
    let home = TempDir::new().unwrap();
    let (_, stderr, ok) = run_mn(home.path(), &["login", "--no-wait"]);
    assert!(!ok);
    assert_eq!(
        stderr.matches("no launch data found").count(),
        1,
        "{}",
        stderr
    );
}

#[test]
fn dev_override_logs_in_without_platform() {
    let server = stub(vec![
        ("/auth/webapp-init", 200, r#"{"access_token":"devtok"}"#),
        ("/auth/me", 200, r#"{"id":99,"username":"Dev User"}"#),
    ]);
    let home = TempDir::new().unwrap();
    run_mn_ok(home.path(), &["dev-user", "99"]);

    // whoami resolves the session on demand from the override
    let out = mn_with_api(home.path(), Some(&server.url), &["whoami"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(String::from_utf8_lossy(&out.stdout), "Dev User (id 99)\n");

    let seen = server.seen.lock().unwrap().clone();
    assert_eq!(
        seen[0],
        r#"POST /auth/webapp-init {"initData":"user_id=99&first_name=Dev&last_name=User"}"#
    );
}

#[test]
fn unauthorized_response_clears_token() {
    let server = stub(vec![("/api/settings", 401, r#"{"detail":"Invalid token"}"#)]);
    let home = TempDir::new().unwrap();
    fs::write(home.path().join("session.json"), r#"{"token": "stale"}"#).unwrap();

    let out = mn_with_api(home.path(), Some(&server.url), &["settings"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("unauthorized"));
    assert!(session_file(home.path()).get("token").is_none());
}

#[test]
fn deadline_round_trip_through_stub() {
    let server = stub(vec![(
        "/api/deadlines/9",
        200,
        r#"{"id":1,"note_id":9,"deadline_at":"2026-11-01T10:00:00Z","notification_enabled":true,"time_remaining_text":"2 weeks"}"#,
    )]);
    let home = TempDir::new().unwrap();
    fs::write(home.path().join("session.json"), r#"{"token": "tok"}"#).unwrap();

    let out = mn_with_api(home.path(), Some(&server.url), &["deadline", "get", "9"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(
        String::from_utf8_lossy(&out.stdout),
        "note 9: due 2026-11-01T10:00:00Z\n  2 weeks\n  notifications on\n"
    );
}

#[test]
fn unreachable_server_keeps_token() {
    let home = TempDir::new().unwrap();
    fs::write(home.path().join("session.json"), r#"{"token": "tok"}"#).unwrap();

    let (_, stderr, ok) = run_mn(home.path(), &["whoami"]);
    assert!(!ok);
    assert!(stderr.contains("cannot reach the server"), "{}", stderr);
    assert_eq!(session_file(home.path())["token"], "tok");
}
