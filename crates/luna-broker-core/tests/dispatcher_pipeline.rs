use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use luna_broker_core::models::{BrokerRequest, BrokerResponse, SecurityPolicy};
use luna_broker_core::{
    CallerIdentity, ExecutorOptions, OperationExecutor, ReplayGuard, RequestDispatcher,
    SecurityValidator,
};
use luna_platform::{DisplayBounds, InputEvent, MemoryBackend, RegistryValue};
use serde_json::{Value, json};

struct Harness {
    backend: Arc<MemoryBackend>,
    dispatcher: RequestDispatcher,
    root: PathBuf,
    _temp_dir: tempfile::TempDir,
}

fn harness_with(timeout: Duration, configure: impl FnOnce(&mut SecurityPolicy, &Path)) -> Harness {
    let temp_dir = tempfile::tempdir().unwrap();
    let root = std::fs::canonicalize(temp_dir.path()).unwrap();

    let mut policy = SecurityPolicy::default();
    policy.files.allowed_roots = vec![root.to_string_lossy().to_string()];
    configure(&mut policy, &root);

    let backend = MemoryBackend::new(DisplayBounds::new(1920, 1080));
    let executor = OperationExecutor::new(
        backend.platform(),
        ExecutorOptions {
            request_timeout: timeout,
            serialize_input: true,
            screenshots_dir: root.join("screenshots"),
        },
    );
    let validator = SecurityValidator::new(Arc::new(policy));
    let dispatcher = RequestDispatcher::new(Arc::new(validator), Arc::new(executor));

    Harness {
        backend,
        dispatcher,
        root,
        _temp_dir: temp_dir,
    }
}

fn harness() -> Harness {
    harness_with(Duration::from_secs(30), |_, _| {})
}

impl Harness {
    async fn call(&self, operation: &str, parameters: Value) -> BrokerResponse {
        let request = BrokerRequest::new(operation, Some(parameters));
        self.dispatcher
            .dispatch(request, &CallerIdentity::new("uid:1000", Some(4321)))
            .await
    }

    async fn call_ok(&self, operation: &str, parameters: Value) -> Value {
        let response = self.call(operation, parameters).await;
        assert!(response.success, "{operation} failed: {:?}", response.error_message);
        assert!(response.error_message.is_none());
        response.data.unwrap()
    }

    async fn call_err(&self, operation: &str, parameters: Value) -> String {
        let response = self.call(operation, parameters).await;
        assert!(!response.success, "{operation} unexpectedly succeeded");
        assert!(response.data.is_none());
        response.error_message.unwrap()
    }
}

#[tokio::test]
async fn test_click_inside_and_outside_display() {
    let h = harness();
    let data = h
        .call_ok("uiautomation.click", json!({"x": 100, "y": 200}))
        .await;
    assert_eq!(data["button"], "left");

    for (x, y) in [(-1, 0), (1920, 10), (10, 1080)] {
        let message = h
            .call_err("uiautomation.click", json!({"x": x, "y": y}))
            .await;
        assert_eq!(message, "Invalid click coordinates");
    }
    assert_eq!(h.backend.input_events().len(), 1);
}

#[tokio::test]
async fn test_dangerous_keys_never_reach_input() {
    let h = harness();
    for keys in ["ctrl+alt+del", "CTRL+ALT+DEL", "^%{DEL}", "LWin+R"] {
        let message = h
            .call_err("uiautomation.sendkeys", json!({"keys": keys}))
            .await;
        assert_eq!(message, "Dangerous key sequence blocked", "{keys}");
    }
    assert!(h.backend.input_events().is_empty());

    h.call_ok("uiautomation.sendkeys", json!({"keys": "hello"}))
        .await;
    assert_eq!(
        h.backend.input_events(),
        vec![InputEvent::Keys {
            keys: "hello".to_string(),
            target_window: None
        }]
    );
}

#[tokio::test]
async fn test_envelope_and_parameter_errors() {
    let h = harness();
    assert_eq!(h.call_err("system.reboot", json!({})).await, "Unknown operation");

    let missing_id = BrokerRequest::new("uiautomation.getwindows", None).with_request_id("  ");
    let response = h
        .dispatcher
        .dispatch(missing_id, &CallerIdentity::unknown())
        .await;
    assert_eq!(response.error_message.as_deref(), Some("Request ID is required"));

    let message = h
        .call_err("uiautomation.click", json!({"x": "ten"}))
        .await;
    assert!(!message.is_empty());
}

#[tokio::test]
async fn test_malformed_line_is_a_failure_response() {
    let h = harness();
    let response = h
        .dispatcher
        .handle_line("{\"requestId\": ", &CallerIdentity::unknown())
        .await;
    assert!(!response.success);
    assert!(
        response
            .error_message
            .unwrap()
            .starts_with("Invalid request")
    );
}

#[tokio::test]
async fn test_registry_rules() {
    let h = harness();
    h.call_ok(
        "registry.write",
        json!({"keyPath": r"HKCU\Software\Luna\Settings", "valueName": "Theme", "value": "dark"}),
    )
    .await;
    let data = h
        .call_ok(
            "registry.read",
            json!({"keyPath": r"HKEY_CURRENT_USER\Software\Luna\Settings", "valueName": "theme"}),
        )
        .await;
    assert_eq!(data["value"], "dark");

    let message = h
        .call_err(
            "registry.write",
            json!({"keyPath": r"HKLM\Software\Luna", "valueName": "X", "value": 1}),
        )
        .await;
    assert_eq!(message, "Registry path not allowed");

    let message = h
        .call_err(
            "registry.read",
            json!({"keyPath": r"HKLM\SYSTEM\CurrentControlSet", "valueName": "X"}),
        )
        .await;
    assert_eq!(message, "Registry path is protected");

    let message = h
        .call_err(
            "registry.read",
            json!({"keyPath": r"HKCU\Software\Luna\..\..\Microsoft", "valueName": "X"}),
        )
        .await;
    assert_eq!(message, "Registry path not allowed");
}

#[tokio::test]
async fn test_terminate_rules() {
    let h = harness();
    h.backend.add_process(4242, "notepad.exe");
    h.backend.add_process(777, "LSASS.EXE");

    let data = h
        .call_ok("process.terminate", json!({"processId": 4242}))
        .await;
    assert_eq!(data["terminated"], true);

    assert_eq!(
        h.call_err("process.terminate", json!({"processId": 4242})).await,
        "Process not found"
    );
    assert_eq!(
        h.call_err("process.terminate", json!({"processId": 777})).await,
        "Protected process cannot be terminated"
    );
    assert_eq!(
        h.call_err("process.terminate", json!({"processId": 4})).await,
        "Protected process cannot be terminated"
    );
    assert_eq!(
        h.call_err(
            "process.terminate",
            json!({"processId": std::process::id()})
        )
        .await,
        "Protected process cannot be terminated"
    );
}

#[tokio::test]
async fn test_process_start_needs_trusted_location() {
    let h = harness_with(Duration::from_secs(30), |policy, root| {
        policy.process.allowed_executables = vec!["luna-viewer".to_string()];
        policy.process.trusted_directories = vec![root.join("bin").to_string_lossy().to_string()];
    });
    let bin = h.root.join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let tool = bin.join("luna-viewer");
    std::fs::write(&tool, b"").unwrap();
    let elsewhere = h.root.join("luna-viewer");
    std::fs::write(&elsewhere, b"").unwrap();

    let data = h
        .call_ok(
            "process.start",
            json!({"fileName": tool.to_string_lossy(), "arguments": "--page \"two words\""}),
        )
        .await;
    assert!(data["processId"].as_u64().unwrap() >= 10_000);
    let launches = h.backend.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].arguments, vec!["--page", "two words"]);

    let message = h
        .call_err("process.start", json!({"fileName": elsewhere.to_string_lossy()}))
        .await;
    assert_eq!(message, "Executable not allowed");

    for denied in ["cmd.exe", "/bin/sh", "powershell.exe", "run.bat"] {
        let message = h
            .call_err("process.start", json!({"fileName": denied}))
            .await;
        assert_eq!(message, "Executable not allowed", "{denied}");
    }
    assert_eq!(h.backend.launches().len(), 1);
}

#[tokio::test]
async fn test_file_write_then_read() {
    let h = harness();
    let path = h.root.join("notes.txt");
    let path_text = path.to_string_lossy().to_string();

    let data = h
        .call_ok(
            "file.write",
            json!({"filePath": path_text, "content": "héllo", "encoding": "utf-8"}),
        )
        .await;
    assert_eq!(data["bytesWritten"], 6);
    assert_eq!(h.backend.file(&path).unwrap(), "héllo".as_bytes());

    let data = h
        .call_ok("file.read", json!({"filePath": path_text}))
        .await;
    assert_eq!(data["content"], "héllo");

    let message = h
        .call_err("file.read", json!({"filePath": "notes.txt"}))
        .await;
    assert_eq!(message, "File path must be absolute");

    // Climb exactly back to the filesystem root.
    let depth = h.root.components().count() - 1;
    let escape = format!(
        "{}/{}etc/passwd",
        h.root.to_string_lossy(),
        "../".repeat(depth)
    );
    let message = h.call_err("file.read", json!({"filePath": escape})).await;
    assert_eq!(message, "File path is protected");
}

#[tokio::test]
async fn test_repeated_reads_return_identical_data() {
    let h = harness();
    h.call_ok(
        "registry.write",
        json!({"keyPath": r"HKCU\Software\Luna\Settings", "valueName": "Volume", "value": 7}),
    )
    .await;
    let path = h.root.join("stable.txt");
    h.call_ok(
        "file.write",
        json!({"filePath": path.to_string_lossy(), "content": "same every time", "encoding": "utf-16"}),
    )
    .await;

    let registry = json!({"keyPath": r"HKCU\Software\Luna\Settings", "valueName": "Volume"});
    let file = json!({"filePath": path.to_string_lossy(), "encoding": "utf-16"});
    let first_registry = h.call_ok("registry.read", registry.clone()).await;
    let first_file = h.call_ok("file.read", file.clone()).await;
    for _ in 0..3 {
        assert_eq!(h.call_ok("registry.read", registry.clone()).await, first_registry);
        assert_eq!(h.call_ok("file.read", file.clone()).await, first_file);
    }
    assert_eq!(first_registry["value"], 7);
    assert_eq!(first_file["content"], "same every time");
    assert_eq!(h.backend.file(&path).unwrap().len(), 32);
}

#[cfg(unix)]
#[tokio::test]
async fn test_file_symlink_out_of_root_is_refused() {
    let h = harness();
    std::os::unix::fs::symlink("/etc", h.root.join("escape")).unwrap();
    let target = h.root.join("escape").join("passwd");
    let message = h
        .call_err("file.read", json!({"filePath": target.to_string_lossy()}))
        .await;
    assert_eq!(message, "File path is protected");
}

#[tokio::test]
async fn test_screenshot_lands_in_screenshots_dir() {
    let h = harness();
    let data = h.call_ok("system.screenshot", json!({})).await;
    let path = PathBuf::from(data["filePath"].as_str().unwrap());
    assert_eq!(path.parent().unwrap(), h.root.join("screenshots"));
    assert_eq!(h.backend.captures(), vec![path]);
}

#[tokio::test]
async fn test_slow_operation_times_out() {
    let h = harness_with(Duration::from_secs(1), |_, _| {});
    h.backend.set_latency(Some(Duration::from_millis(1500)));
    let message = h
        .call_err(
            "registry.write",
            json!({"keyPath": r"HKCU\Software\Luna", "valueName": "A", "value": 1}),
        )
        .await;
    assert_eq!(message, "Operation timed out after 1s");
}

#[tokio::test]
async fn test_replay_guard_rejects_reused_id() {
    let h = harness();
    let dispatcher = h
        .dispatcher
        .with_replay_guard(ReplayGuard::new(Duration::from_secs(60)));
    let caller = CallerIdentity::unknown();

    let request = BrokerRequest::new(
        "registry.write",
        Some(json!({"keyPath": r"HKCU\Software\Luna", "valueName": "Count", "value": 1})),
    )
    .with_request_id("fixed-id");
    assert!(dispatcher.dispatch(request.clone(), &caller).await.success);
    let replayed = dispatcher.dispatch(request, &caller).await;
    assert_eq!(replayed.error_message.as_deref(), Some("Duplicate request ID"));
    assert_eq!(
        h.backend
            .platform()
            .registry
            .read(r"HKCU\Software\Luna", "Count")
            .unwrap(),
        Some(RegistryValue::DWord(1))
    );
}

#[tokio::test]
async fn test_evaluate_checks_without_executing() {
    let h = harness();
    let caller = CallerIdentity::unknown();

    let ok = BrokerRequest::new("uiautomation.click", Some(json!({"x": 1, "y": 1})));
    assert!(h.dispatcher.evaluate(&ok, &caller).await.valid);

    let bad = BrokerRequest::new("uiautomation.sendkeys", Some(json!({"keys": "win+l"})));
    let result = h.dispatcher.evaluate(&bad, &caller).await;
    assert!(!result.valid);
    assert_eq!(result.reason.as_deref(), Some("Dangerous key sequence blocked"));

    assert!(h.backend.input_events().is_empty());
}
