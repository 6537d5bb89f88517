//! The broker's policy engine.
//!
//! `SecurityValidator` is a pure decision function over a request, the caller
//! identity and facts the dispatcher gathered beforehand. It performs no OS
//! calls and holds nothing mutable, so one instance is shared by every
//! connection without locking.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use luna_platform::{DisplayBounds, ProcessEntry};
use tracing::warn;

use super::key_sequence::KeyBlocklist;
use super::path_resolver::{
    ExecutableResolution, NormalizedPath, PathRejection, base_name, is_path_like,
    normalize_file_path, normalize_registry_path, stem,
};
use crate::error::BrokerError;
use crate::models::{BrokerRequest, Operation, OperationKind, ProcessArguments, SecurityPolicy};

/// Human-readable rejection reasons returned to callers.
pub mod reason {
    pub const REQUEST_ID_REQUIRED: &str = "Request ID is required";
    pub const OPERATION_REQUIRED: &str = "Operation is required";
    pub const UNKNOWN_OPERATION: &str = "Unknown operation";
    pub const INVALID_CLICK: &str = "Invalid click coordinates";
    pub const DISPLAY_UNAVAILABLE: &str = "Display bounds unavailable";
    pub const DANGEROUS_KEYS: &str = "Dangerous key sequence blocked";
    pub const REGISTRY_NOT_ALLOWED: &str = "Registry path not allowed";
    pub const REGISTRY_PROTECTED: &str = "Registry path is protected";
    pub const EXECUTABLE_NOT_ALLOWED: &str = "Executable not allowed";
    pub const ARGUMENTS_NOT_ALLOWED: &str = "Process arguments not allowed";
    pub const PROCESS_NOT_FOUND: &str = "Process not found";
    pub const PROCESS_PROTECTED: &str = "Protected process cannot be terminated";
    pub const FILE_NOT_ALLOWED: &str = "File path not allowed";
    pub const FILE_PROTECTED: &str = "File path is protected";
    pub const FILE_NOT_ABSOLUTE: &str = "File path must be absolute";
}

/// Who is on the other end of a connection, captured once at accept time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    /// Account SID on Windows, `uid:<n>` on Unix.
    pub principal: String,
    pub pid: Option<u32>,
}

impl CallerIdentity {
    pub fn new(principal: impl Into<String>, pid: Option<u32>) -> Self {
        Self {
            principal: principal.into(),
            pid,
        }
    }

    pub fn unknown() -> Self {
        Self::new("unknown", None)
    }
}

impl Default for CallerIdentity {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pid {
            Some(pid) => write!(f, "{} (pid {pid})", self.principal),
            None => f.write_str(&self.principal),
        }
    }
}

/// Read-only facts a rule may need, resolved by the dispatcher before validation.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub caller: CallerIdentity,
    /// The broker's own pid, never a valid terminate target.
    pub broker_pid: u32,
    /// Primary display size, for click bounds.
    pub display: Option<DisplayBounds>,
    /// Result of looking up the `process.terminate` target.
    pub target_process: Option<ProcessEntry>,
    /// Canonical location of the file a file operation touches, when it resolves.
    pub file_target: Option<PathBuf>,
    /// Where a `process.start` file name resolves to.
    pub executable: Option<ExecutableResolution>,
}

impl ValidationContext {
    pub fn new(caller: CallerIdentity) -> Self {
        Self {
            caller,
            broker_pid: std::process::id(),
            display: None,
            target_process: None,
            file_target: None,
            executable: None,
        }
    }

    pub fn with_display(mut self, display: DisplayBounds) -> Self {
        self.display = Some(display);
        self
    }

    pub fn with_target_process(mut self, entry: ProcessEntry) -> Self {
        self.target_process = Some(entry);
        self
    }

    pub fn with_file_target(mut self, target: PathBuf) -> Self {
        self.file_target = Some(target);
        self
    }

    pub fn with_executable(mut self, resolution: ExecutableResolution) -> Self {
        self.executable = Some(resolution);
        self
    }
}

/// Outcome of validation. A rejection always carries a reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

impl ValidationResult {
    pub fn accepted() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }

    pub fn into_result(self) -> Result<(), BrokerError> {
        if self.valid {
            Ok(())
        } else {
            Err(BrokerError::Validation(
                self.reason
                    .unwrap_or_else(|| "Request rejected by policy".to_string()),
            ))
        }
    }
}

/// Policy lists normalized once at construction.
#[derive(Debug)]
struct CompiledRules {
    registry_read: Vec<NormalizedPath>,
    registry_write: Vec<NormalizedPath>,
    registry_denied: Vec<NormalizedPath>,
    registry_segments: Vec<Vec<String>>,
    file_allowed: Vec<NormalizedPath>,
    file_denied: Vec<NormalizedPath>,
    executable_names: Vec<String>,
    executable_paths: Vec<NormalizedPath>,
    trusted_dirs: Vec<NormalizedPath>,
    denied_executables: Vec<String>,
    denied_extensions: Vec<String>,
    denied_switches: Vec<String>,
    operand_only: Vec<String>,
    protected_names: Vec<String>,
}

pub struct SecurityValidator {
    policy: Arc<SecurityPolicy>,
    keys: KeyBlocklist,
    rules: CompiledRules,
}

impl SecurityValidator {
    pub fn new(policy: Arc<SecurityPolicy>) -> Self {
        let case_insensitive = policy.files.case_insensitive;
        let file_paths = |entries: &[String], list: &str| -> Vec<NormalizedPath> {
            entries
                .iter()
                .filter_map(|entry| match normalize_file_path(entry, case_insensitive) {
                    Ok(path) => Some(path),
                    Err(_) => {
                        warn!(entry = %entry, list, "Ignoring policy entry that is not an absolute path");
                        None
                    }
                })
                .collect()
        };
        let registry_paths = |entries: &[String]| -> Vec<NormalizedPath> {
            entries
                .iter()
                .filter_map(|entry| match normalize_registry_path(entry) {
                    Ok(path) => Some(path),
                    Err(_) => {
                        warn!(entry = %entry, "Ignoring invalid registry policy entry");
                        None
                    }
                })
                .collect()
        };

        let process = &policy.process;
        let (path_entries, name_entries): (Vec<String>, Vec<String>) = process
            .allowed_executables
            .iter()
            .cloned()
            .partition(|entry| is_path_like(entry));

        let rules = CompiledRules {
            registry_read: registry_paths(&policy.registry.read_roots),
            registry_write: registry_paths(&policy.registry.write_roots),
            registry_denied: registry_paths(&policy.registry.denied_subtrees),
            registry_segments: policy
                .registry
                .denied_segments
                .iter()
                .map(|segment| {
                    segment
                        .split(['\\', '/'])
                        .map(|part| part.trim().to_lowercase())
                        .filter(|part| !part.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|segment| !segment.is_empty())
                .collect(),
            file_allowed: file_paths(&policy.files.allowed_roots, "files.allowed_roots"),
            file_denied: file_paths(&policy.files.denied_roots, "files.denied_roots"),
            executable_names: name_entries.iter().map(|n| executable_key(n)).collect(),
            executable_paths: file_paths(&path_entries, "process.allowed_executables"),
            trusted_dirs: file_paths(&process.trusted_directories, "process.trusted_directories"),
            denied_executables: process
                .denied_executables
                .iter()
                .map(|n| executable_key(n))
                .collect(),
            denied_extensions: process
                .denied_extensions
                .iter()
                .map(|ext| ext.trim().to_lowercase())
                .collect(),
            denied_switches: process
                .denied_argument_prefixes
                .iter()
                .map(|prefix| switch_name(&prefix.trim().to_lowercase()).to_string())
                .filter(|prefix| !prefix.is_empty())
                .collect(),
            operand_only: process
                .operand_only_executables
                .iter()
                .map(|n| executable_key(n))
                .collect(),
            protected_names: process
                .protected_names
                .iter()
                .map(|n| n.trim().to_lowercase())
                .collect(),
        };

        Self {
            keys: KeyBlocklist::new(&policy.input.blocked_key_sequences),
            policy,
            rules,
        }
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Rule 1: the generic envelope checks.
    pub fn check_envelope(&self, request: &BrokerRequest) -> Result<OperationKind, ValidationResult> {
        if request.request_id.trim().is_empty() {
            return Err(ValidationResult::rejected(reason::REQUEST_ID_REQUIRED));
        }
        if request.operation.trim().is_empty() {
            return Err(ValidationResult::rejected(reason::OPERATION_REQUIRED));
        }
        OperationKind::parse(&request.operation)
            .ok_or_else(|| ValidationResult::rejected(reason::UNKNOWN_OPERATION))
    }

    /// The complete decision for a raw request.
    pub fn validate(&self, request: &BrokerRequest, ctx: &ValidationContext) -> ValidationResult {
        let kind = match self.check_envelope(request) {
            Ok(kind) => kind,
            Err(rejection) => return rejection,
        };
        match Operation::from_parts(kind, request.parameters.as_ref()) {
            Ok(operation) => self.validate_operation(&operation, ctx),
            Err(err) => ValidationResult::rejected(err.to_string()),
        }
    }

    /// Rules 2-8 for an already parsed operation.
    pub fn validate_operation(&self, operation: &Operation, ctx: &ValidationContext) -> ValidationResult {
        match operation {
            Operation::Click(params) => match ctx.display {
                None => ValidationResult::rejected(reason::DISPLAY_UNAVAILABLE),
                Some(display) if !display.contains(params.x, params.y) => {
                    ValidationResult::rejected(reason::INVALID_CLICK)
                }
                Some(_) => ValidationResult::accepted(),
            },
            Operation::SendKeys(params) => {
                if self.keys.is_blocked(&params.keys) {
                    ValidationResult::rejected(reason::DANGEROUS_KEYS)
                } else {
                    ValidationResult::accepted()
                }
            }
            Operation::GetWindows | Operation::Screenshot => ValidationResult::accepted(),
            Operation::RegistryRead(params) => {
                self.check_registry(&params.key_path, &self.rules.registry_read)
            }
            Operation::RegistryWrite(params) => {
                self.check_registry(&params.key_path, &self.rules.registry_write)
            }
            Operation::ProcessStart(params) => {
                let result = self.check_executable(&params.file_name, ctx.executable.as_ref());
                if !result.valid {
                    return result;
                }
                self.check_arguments(
                    &params.file_name,
                    ctx.executable.as_ref(),
                    params.arguments.as_ref(),
                )
            }
            Operation::ProcessTerminate(params) => self.check_terminate(params.process_id, ctx),
            Operation::FileRead(params) => self.check_file(&params.file_path, ctx),
            Operation::FileWrite(params) => self.check_file(&params.file_path, ctx),
        }
    }

    fn check_registry(&self, key_path: &str, roots: &[NormalizedPath]) -> ValidationResult {
        let Ok(path) = normalize_registry_path(key_path) else {
            return ValidationResult::rejected(reason::REGISTRY_NOT_ALLOWED);
        };
        let denied = self.rules.registry_denied.iter().any(|d| path.starts_with(d))
            || self
                .rules
                .registry_segments
                .iter()
                .any(|segment| path.contains_run(segment));
        if denied {
            return ValidationResult::rejected(reason::REGISTRY_PROTECTED);
        }
        if roots.iter().any(|root| path.starts_with(root)) {
            ValidationResult::accepted()
        } else {
            ValidationResult::rejected(reason::REGISTRY_NOT_ALLOWED)
        }
    }

    fn check_file(&self, file_path: &str, ctx: &ValidationContext) -> ValidationResult {
        let requested = match normalize_file_path(file_path, self.policy.files.case_insensitive) {
            Ok(path) => path,
            Err(PathRejection::NotAbsolute) => {
                return ValidationResult::rejected(reason::FILE_NOT_ABSOLUTE);
            }
            Err(PathRejection::Disallowed) => {
                return ValidationResult::rejected(reason::FILE_NOT_ALLOWED);
            }
        };
        if let Err(rejection) = self.check_file_location(&requested) {
            return rejection;
        }

        // Links may point elsewhere; the resolved location must pass the same rules.
        if let Some(target) = &ctx.file_target {
            let resolved = normalize_file_path(&target.to_string_lossy(), self.policy.files.case_insensitive);
            match resolved {
                Ok(resolved) => {
                    if let Err(rejection) = self.check_file_location(&resolved) {
                        return rejection;
                    }
                }
                Err(_) => return ValidationResult::rejected(reason::FILE_NOT_ALLOWED),
            }
        }
        ValidationResult::accepted()
    }

    fn check_file_location(&self, path: &NormalizedPath) -> Result<(), ValidationResult> {
        if self.rules.file_denied.iter().any(|d| path.starts_with(d)) {
            return Err(ValidationResult::rejected(reason::FILE_PROTECTED));
        }
        if self.rules.file_allowed.iter().any(|root| path.starts_with(root)) {
            Ok(())
        } else {
            Err(ValidationResult::rejected(reason::FILE_NOT_ALLOWED))
        }
    }

    fn check_executable(
        &self,
        file_name: &str,
        resolution: Option<&ExecutableResolution>,
    ) -> ValidationResult {
        let file_name = file_name.trim();
        if file_name.is_empty() || self.is_denied_executable(base_name(file_name)) {
            return ValidationResult::rejected(reason::EXECUTABLE_NOT_ALLOWED);
        }

        let resolved = resolution.and_then(|r| r.resolved_path.as_ref());
        let resolved = match resolved {
            Some(path) => {
                let text = path.to_string_lossy();
                if self.is_denied_executable(base_name(&text)) {
                    return ValidationResult::rejected(reason::EXECUTABLE_NOT_ALLOWED);
                }
                match normalize_file_path(&text, self.policy.files.case_insensitive) {
                    Ok(normalized) => Some(normalized),
                    Err(_) => return ValidationResult::rejected(reason::EXECUTABLE_NOT_ALLOWED),
                }
            }
            None => None,
        };

        let allowed = if is_path_like(file_name) {
            let requested_ok = normalize_file_path(file_name, self.policy.files.case_insensitive)
                .is_ok_and(|path| self.executable_path_allowed(&path));
            requested_ok && resolved.as_ref().is_none_or(|path| self.executable_path_allowed(path))
        } else {
            // A bare name is only as safe as the directory it resolves into.
            self.executable_name_allowed(file_name)
                && resolved
                    .as_ref()
                    .is_some_and(|path| self.executable_path_allowed(path))
        };

        if allowed {
            ValidationResult::accepted()
        } else {
            ValidationResult::rejected(reason::EXECUTABLE_NOT_ALLOWED)
        }
    }

    /// Arguments may not smuggle in another program: no launcher options, no
    /// operand naming a denied executable or script, and only plain operands
    /// for programs that take commands through their options.
    fn check_arguments(
        &self,
        file_name: &str,
        resolution: Option<&ExecutableResolution>,
        arguments: Option<&ProcessArguments>,
    ) -> ValidationResult {
        let Some(arguments) = arguments else {
            return ValidationResult::accepted();
        };
        let argv = match arguments.to_argv() {
            Ok(argv) => argv,
            Err(err) => return ValidationResult::rejected(err.to_string()),
        };

        let operand_only = name_in(&self.rules.operand_only, file_name)
            || resolution.is_some_and(|r| name_in(&self.rules.operand_only, &r.executable_name));

        for argument in &argv {
            let lowered = argument.trim().to_lowercase();
            let is_option = lowered.starts_with(['-', '/']);
            if is_option && operand_only {
                return ValidationResult::rejected(reason::ARGUMENTS_NOT_ALLOWED);
            }
            if is_option {
                let switch = switch_name(&lowered);
                if self
                    .rules
                    .denied_switches
                    .iter()
                    .any(|denied| switch.starts_with(denied.as_str()))
                {
                    return ValidationResult::rejected(reason::ARGUMENTS_NOT_ALLOWED);
                }
            }
            let names_denied_program = argument
                .split(|c: char| {
                    c.is_whitespace() || matches!(c, '=' | ',' | ';' | '"' | '\'' | '|' | '&')
                })
                .filter(|token| !token.is_empty())
                .any(|token| self.is_denied_executable(base_name(token)));
            if names_denied_program {
                return ValidationResult::rejected(reason::ARGUMENTS_NOT_ALLOWED);
            }
        }
        ValidationResult::accepted()
    }

    fn is_denied_executable(&self, name: &str) -> bool {
        let name = executable_key(name);
        if self
            .rules
            .denied_extensions
            .iter()
            .any(|ext| !ext.is_empty() && name.ends_with(ext.as_str()))
        {
            return true;
        }
        self.rules
            .denied_executables
            .iter()
            .any(|denied| *denied == name || stem(denied) == stem(&name) || stem(denied) == name)
    }

    fn executable_name_allowed(&self, name: &str) -> bool {
        name_in(&self.rules.executable_names, name)
    }

    fn executable_path_allowed(&self, path: &NormalizedPath) -> bool {
        if self.rules.executable_paths.iter().any(|allowed| allowed == path) {
            return true;
        }
        let (Some(name), Some(parent)) = (path.file_name(), path.parent()) else {
            return false;
        };
        self.executable_name_allowed(name)
            && self
                .rules
                .trusted_dirs
                .iter()
                .any(|dir| parent.starts_with(dir))
    }

    fn check_terminate(&self, pid: u32, ctx: &ValidationContext) -> ValidationResult {
        if pid == ctx.broker_pid || self.policy.process.protected_pids.contains(&pid) {
            return ValidationResult::rejected(reason::PROCESS_PROTECTED);
        }
        let Some(entry) = ctx.target_process.as_ref().filter(|entry| entry.pid == pid) else {
            return ValidationResult::rejected(reason::PROCESS_NOT_FOUND);
        };
        let name = entry.name.trim().to_lowercase();
        if self
            .rules
            .protected_names
            .iter()
            .any(|protected| *protected == name || stem(protected) == name)
        {
            return ValidationResult::rejected(reason::PROCESS_PROTECTED);
        }
        ValidationResult::accepted()
    }
}

/// Whether `name` is one of `keys`, allowing the extension to be left off.
fn name_in(keys: &[String], name: &str) -> bool {
    let name = executable_key(name);
    keys.iter()
        .any(|key| *key == name || (!name.contains('.') && stem(key) == name))
}

/// `--gpu-launcher=x`, `-gpu-launcher` and `/gpu-launcher` all name the same switch.
fn switch_name(option: &str) -> &str {
    option.trim_start_matches(['-', '/'])
}

/// Lowercased name with the trailing dots and spaces Windows ignores removed.
fn executable_key(name: &str) -> String {
    base_name(name.trim())
        .trim_end_matches(['.', ' '])
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FilePolicy, ProcessPolicy};
    use serde_json::json;

    fn policy() -> SecurityPolicy {
        SecurityPolicy {
            files: FilePolicy {
                allowed_roots: vec![r"C:\ProgramData\Luna\files".to_string()],
                case_insensitive: true,
                ..FilePolicy::default()
            },
            ..SecurityPolicy::default()
        }
    }

    fn validator() -> SecurityValidator {
        SecurityValidator::new(Arc::new(policy()))
    }

    fn ctx() -> ValidationContext {
        let mut ctx = ValidationContext::new(CallerIdentity::new("S-1-5-21-1000", Some(4242)))
            .with_display(DisplayBounds::new(1920, 1080));
        ctx.broker_pid = 7000;
        ctx
    }

    fn request(operation: &str, parameters: serde_json::Value) -> BrokerRequest {
        BrokerRequest::new(operation, Some(parameters)).with_request_id("req-1")
    }

    fn reason_of(result: ValidationResult) -> String {
        assert!(!result.valid, "expected rejection");
        result.reason.unwrap()
    }

    fn resolved(path: &str) -> ExecutableResolution {
        ExecutableResolution {
            resolved_path: Some(PathBuf::from(path)),
            executable_name: base_name(path).to_string(),
        }
    }

    #[test]
    fn test_envelope_rules() {
        let v = validator();
        let mut req = request("file.read", json!({}));
        req.request_id = "  ".to_string();
        assert_eq!(reason_of(v.validate(&req, &ctx())), reason::REQUEST_ID_REQUIRED);

        let req = request("", json!({}));
        assert_eq!(reason_of(v.validate(&req, &ctx())), reason::OPERATION_REQUIRED);
    }

    #[test]
    fn test_unknown_operation_rejected_regardless_of_parameters() {
        let v = validator();
        for params in [json!(null), json!({}), json!({"filePath": "C:\\x"}), json!([1, 2])] {
            let req = request("system.shutdown", params);
            assert_eq!(reason_of(v.validate(&req, &ctx())), reason::UNKNOWN_OPERATION);
        }
        let req = request("REGISTRY.READ", json!({}));
        assert_eq!(reason_of(v.validate(&req, &ctx())), reason::UNKNOWN_OPERATION);
    }

    #[test]
    fn test_click_bounds() {
        let v = validator();
        for (x, y) in [(0, 0), (1919, 1079), (960, 540)] {
            let req = request("uiautomation.click", json!({"x": x, "y": y}));
            assert!(v.validate(&req, &ctx()).valid, "({x},{y}) should be accepted");
        }
        for (x, y) in [(-1, 0), (1920, 0), (0, 1080), (5000, 5000)] {
            let req = request("uiautomation.click", json!({"x": x, "y": y}));
            assert_eq!(reason_of(v.validate(&req, &ctx())), reason::INVALID_CLICK);
        }

        let mut no_display = ctx();
        no_display.display = None;
        let req = request("uiautomation.click", json!({"x": 1, "y": 1}));
        assert_eq!(reason_of(v.validate(&req, &no_display)), reason::DISPLAY_UNAVAILABLE);
    }

    #[test]
    fn test_sendkeys_blocklist() {
        let v = validator();
        for keys in ["ctrl+alt+del", "CTRL+ALT+DEL", "win+r", "shift+del"] {
            let req = request("uiautomation.sendkeys", json!({"keys": keys}));
            assert_eq!(reason_of(v.validate(&req, &ctx())), reason::DANGEROUS_KEYS);
        }
        for keys in ["ctrl+c", "alt+tab", "Hello World"] {
            let req = request("uiautomation.sendkeys", json!({"keys": keys}));
            assert!(v.validate(&req, &ctx()).valid, "{keys} should be accepted");
        }
    }

    #[test]
    fn test_registry_rules() {
        let v = validator();
        let req = request(
            "registry.write",
            json!({
                "keyPath": r"HKEY_LOCAL_MACHINE\SOFTWARE\Microsoft\Windows\CurrentVersion\Run\Updater",
                "valueName": "x",
                "value": "C:\\evil.exe"
            }),
        );
        assert!(!v.validate(&req, &ctx()).valid);

        let req = request(
            "registry.write",
            json!({"keyPath": r"HKEY_CURRENT_USER\Software\Luna\Settings", "valueName": "Theme", "value": "dark"}),
        );
        assert!(v.validate(&req, &ctx()).valid);

        // Reads may use HKLM, writes may not.
        let read = request(
            "registry.read",
            json!({"keyPath": r"HKLM\Software\Luna\Install", "valueName": "Path"}),
        );
        assert!(v.validate(&read, &ctx()).valid);
        let write = request(
            "registry.write",
            json!({"keyPath": r"HKLM\Software\Luna\Install", "valueName": "Path", "value": "x"}),
        );
        assert_eq!(reason_of(v.validate(&write, &ctx())), reason::REGISTRY_NOT_ALLOWED);
    }

    #[test]
    fn test_registry_protected_segments_inside_allowed_root() {
        let v = validator();
        let req = request(
            "registry.write",
            json!({"keyPath": r"HKCU\Software\Luna\Run", "valueName": "x", "value": "y"}),
        );
        assert_eq!(reason_of(v.validate(&req, &ctx())), reason::REGISTRY_PROTECTED);

        let req = request(
            "registry.read",
            json!({"keyPath": r"HKCU\Software\Luna\..\..\..\HKLM\SYSTEM\CurrentControlSet", "valueName": ""}),
        );
        assert!(!v.validate(&req, &ctx()).valid);

        let req = request(
            "registry.read",
            json!({"keyPath": r"HKCU\Software\LunaEvil", "valueName": ""}),
        );
        assert_eq!(reason_of(v.validate(&req, &ctx())), reason::REGISTRY_NOT_ALLOWED);
    }

    #[test]
    fn test_process_start_rules() {
        let v = validator();
        let notepad = request("process.start", json!({"fileName": "notepad.exe"}));
        let ctx_ok = ctx().with_executable(resolved(r"C:\Windows\System32\notepad.exe"));
        assert!(v.validate(&notepad, &ctx_ok).valid);

        for name in ["cmd.exe", "powershell.exe", "CMD.EXE", "cmd", r"C:\Windows\System32\cmd.exe"] {
            let req = request("process.start", json!({"fileName": name}));
            let ctx = ctx().with_executable(resolved(r"C:\Windows\System32\cmd.exe"));
            assert_eq!(reason_of(v.validate(&req, &ctx)), reason::EXECUTABLE_NOT_ALLOWED, "{name}");
        }
    }

    #[test]
    fn test_process_start_follows_resolution() {
        let v = validator();
        let req = request("process.start", json!({"fileName": "notepad.exe"}));

        // Unresolvable or resolved outside trusted directories.
        assert!(!v.validate(&req, &ctx()).valid);
        let planted = ctx().with_executable(resolved(r"C:\Users\Public\notepad.exe"));
        assert!(!v.validate(&req, &planted).valid);

        // An allowed name that is really a shell.
        let relinked = ctx().with_executable(resolved(r"C:\Windows\System32\cmd.exe"));
        assert!(!v.validate(&req, &relinked).valid);
    }

    #[test]
    fn test_process_start_paths_and_scripts() {
        let v = validator();
        let by_path = request("process.start", json!({"fileName": r"C:\Windows\notepad.exe"}));
        let ctx_ok = ctx().with_executable(resolved(r"C:\Windows\notepad.exe"));
        assert!(v.validate(&by_path, &ctx_ok).valid);

        let outside = request("process.start", json!({"fileName": r"D:\tools\notepad.exe"}));
        assert!(!v.validate(&outside, &ctx()).valid);

        for name in ["run.bat", r"C:\Windows\setup.cmd", "payload.ps1", "notepad.exe. "] {
            let req = request("process.start", json!({"fileName": name}));
            let ctx = ctx().with_executable(resolved(r"C:\Windows\System32\x.bat"));
            assert!(!v.validate(&req, &ctx).valid, "{name}");
        }
    }

    #[test]
    fn test_shell_host_cannot_launch_scripts() {
        let v = validator();
        let req = request(
            "process.start",
            json!({"fileName": "explorer.exe", "arguments": "C:\\Users\\Public\\payload.bat"}),
        );
        let ctx = ctx().with_executable(resolved(r"C:\Windows\explorer.exe"));
        assert_eq!(reason_of(v.validate(&req, &ctx)), reason::EXECUTABLE_NOT_ALLOWED);
    }

    #[test]
    fn test_browser_takes_operands_but_no_options() {
        let v = validator();
        let chrome = || {
            ctx().with_executable(resolved(
                r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            ))
        };

        let url = request(
            "process.start",
            json!({"fileName": "chrome.exe", "arguments": ["https://example.com/docs"]}),
        );
        assert!(v.validate(&url, &chrome()).valid);

        for arguments in [
            json!(["--no-sandbox", "--gpu-launcher=cmd.exe /c calc"]),
            json!(["/renderer-cmd-prefix=calc"]),
            json!("--incognito"),
        ] {
            let req = request(
                "process.start",
                json!({"fileName": "chrome.exe", "arguments": arguments}),
            );
            assert_eq!(
                reason_of(v.validate(&req, &chrome())),
                reason::ARGUMENTS_NOT_ALLOWED,
                "{arguments}"
            );
        }
    }

    #[test]
    fn test_arguments_may_not_name_denied_programs() {
        let v = validator();
        let notepad = || ctx().with_executable(resolved(r"C:\Windows\System32\notepad.exe"));

        let doc = request(
            "process.start",
            json!({"fileName": "notepad.exe", "arguments": [r"C:\Users\luna\notes.txt"]}),
        );
        assert!(v.validate(&doc, &notepad()).valid);

        for arguments in [
            json!([r"C:\Users\Public\payload.bat"]),
            json!(["/c", "powershell.exe"]),
            json!(["--GPU-Launcher=calc"]),
            json!("x.txt & cmd.exe"),
        ] {
            let req = request(
                "process.start",
                json!({"fileName": "notepad.exe", "arguments": arguments}),
            );
            assert_eq!(
                reason_of(v.validate(&req, &notepad())),
                reason::ARGUMENTS_NOT_ALLOWED,
                "{arguments}"
            );
        }
    }

    #[test]
    fn test_custom_policy_can_allow_by_path() {
        let mut policy = policy();
        policy.process = ProcessPolicy {
            allowed_executables: vec!["/opt/luna/bin/agent-helper".to_string()],
            ..ProcessPolicy::default()
        };
        let v = SecurityValidator::new(Arc::new(policy));
        let req = request("process.start", json!({"fileName": "/opt/luna/bin/agent-helper"}));
        assert!(v.validate(&req, &ctx()).valid);
        let ctx = ctx().with_executable(resolved("/opt/luna/bin/agent-helper"));
        assert!(v.validate(&req, &ctx).valid);
    }

    #[test]
    fn test_process_terminate_rules() {
        let v = validator();
        let missing = request("process.terminate", json!({"processId": 999999}));
        assert_eq!(reason_of(v.validate(&missing, &ctx())), reason::PROCESS_NOT_FOUND);

        let system = request("process.terminate", json!({"processId": 4}));
        let ctx_system = ctx().with_target_process(ProcessEntry { pid: 4, name: "System".into() });
        assert_eq!(reason_of(v.validate(&system, &ctx_system)), reason::PROCESS_PROTECTED);

        let lsass = request("process.terminate", json!({"processId": 700}));
        let ctx_lsass = ctx().with_target_process(ProcessEntry { pid: 700, name: "LSASS.EXE".into() });
        assert_eq!(reason_of(v.validate(&lsass, &ctx_lsass)), reason::PROCESS_PROTECTED);

        let own = request("process.terminate", json!({"processId": 7000}));
        let ctx_own = ctx().with_target_process(ProcessEntry { pid: 7000, name: "luna-broker.exe".into() });
        assert_eq!(reason_of(v.validate(&own, &ctx_own)), reason::PROCESS_PROTECTED);

        let notepad = request("process.terminate", json!({"processId": 1234}));
        let ctx_notepad = ctx().with_target_process(ProcessEntry { pid: 1234, name: "notepad.exe".into() });
        assert!(v.validate(&notepad, &ctx_notepad).valid);

        // A lookup for another pid does not count.
        assert!(!v.validate(&missing, &ctx_notepad).valid);
    }

    #[test]
    fn test_file_rules() {
        let v = validator();
        let ok = request("file.read", json!({"filePath": r"C:\ProgramData\Luna\files\notes.txt"}));
        assert!(v.validate(&ok, &ctx()).valid);

        let relative = request("file.read", json!({"filePath": r"notes.txt"}));
        assert_eq!(reason_of(v.validate(&relative, &ctx())), reason::FILE_NOT_ABSOLUTE);

        let escape = request(
            "file.write",
            json!({"filePath": r"C:\ProgramData\Luna\files\..\..\..\Windows\win.ini", "content": "x"}),
        );
        assert_eq!(reason_of(v.validate(&escape, &ctx())), reason::FILE_PROTECTED);

        let elsewhere = request("file.read", json!({"filePath": r"C:\Users\luna\secret.txt"}));
        assert_eq!(reason_of(v.validate(&elsewhere, &ctx())), reason::FILE_NOT_ALLOWED);

        let device = request("file.read", json!({"filePath": r"\\.\PhysicalDrive0"}));
        assert_eq!(reason_of(v.validate(&device, &ctx())), reason::FILE_NOT_ALLOWED);
    }

    #[test]
    fn test_file_link_target_must_also_pass() {
        let v = validator();
        let req = request("file.read", json!({"filePath": r"C:\ProgramData\Luna\files\link.txt"}));
        let linked = ctx().with_file_target(PathBuf::from(r"C:\Windows\System32\config\SAM"));
        assert_eq!(reason_of(v.validate(&req, &linked)), reason::FILE_PROTECTED);

        let inside = ctx().with_file_target(PathBuf::from(r"C:\ProgramData\Luna\files\real.txt"));
        assert!(v.validate(&req, &inside).valid);
    }

    #[test]
    fn test_parameter_errors_are_rejections() {
        let v = validator();
        let req = request("uiautomation.click", json!({"x": "left"}));
        let result = v.validate(&req, &ctx());
        assert!(!result.valid);
        assert!(result.reason.unwrap().starts_with("Invalid parameters"));
    }

    #[test]
    fn test_read_only_operations_pass_generic_checks() {
        let v = validator();
        for op in ["uiautomation.getwindows", "system.screenshot"] {
            let req = BrokerRequest::new(op, None).with_request_id("r");
            assert!(v.validate(&req, &ctx()).valid, "{op}");
        }
    }

    #[test]
    fn test_into_result() {
        assert!(ValidationResult::accepted().into_result().is_ok());
        let err = ValidationResult::rejected(reason::UNKNOWN_OPERATION)
            .into_result()
            .unwrap_err();
        assert!(matches!(err, BrokerError::Validation(_)));
        assert_eq!(err.to_string(), "Unknown operation");
    }
}
