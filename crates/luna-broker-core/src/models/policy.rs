//! Security policy for the privilege broker.
//!
//! The policy is plain data: allow-lists and deny-lists per rule family. It is
//! loaded once at startup and handed to the validator behind an `Arc`; nothing
//! mutates it afterwards.
//!
//! # Example
//!
//! ```rust
//! use luna_broker_core::models::SecurityPolicy;
//!
//! let policy = SecurityPolicy::default();
//! assert!(policy.process.denied_executables.iter().any(|e| e == "cmd.exe"));
//! ```

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Policy schema version understood by this build.
pub const POLICY_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    pub version: u32,
    pub input: InputPolicy,
    pub registry: RegistryPolicy,
    pub process: ProcessPolicy,
    pub files: FilePolicy,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            version: POLICY_VERSION,
            input: InputPolicy::default(),
            registry: RegistryPolicy::default(),
            process: ProcessPolicy::default(),
            files: FilePolicy::default(),
        }
    }
}

impl SecurityPolicy {
    /// Parse a TOML policy document. Keys that are left out keep their defaults.
    pub fn from_toml(content: &str) -> Result<Self> {
        let policy: Self = toml::from_str(content).context("Failed to parse security policy")?;
        if policy.version != POLICY_VERSION {
            bail!(
                "Unsupported security policy version {} (expected {})",
                policy.version,
                POLICY_VERSION
            );
        }
        Ok(policy)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read security policy {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize security policy")
    }
}

/// Key chords `uiautomation.sendkeys` may never produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputPolicy {
    pub blocked_key_sequences: Vec<String>,
}

impl Default for InputPolicy {
    fn default() -> Self {
        Self {
            blocked_key_sequences: [
                "ctrl+alt+del",
                "ctrl+alt+end",
                "ctrl+shift+esc",
                "shift+del",
                "alt+f4",
                "win+r",
                "win+x",
                "win+l",
                "win+i",
                "win+ctrl+d",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryPolicy {
    /// Subtrees `registry.read` may target.
    pub read_roots: Vec<String>,

    /// Subtrees `registry.write` may target. Kept narrower than `read_roots`.
    pub write_roots: Vec<String>,

    /// Full-path subtrees that are always refused.
    pub denied_subtrees: Vec<String>,

    /// Component sequences refused wherever they appear in a key path.
    pub denied_segments: Vec<String>,
}

impl Default for RegistryPolicy {
    fn default() -> Self {
        Self {
            read_roots: strings(&[
                r"HKEY_CURRENT_USER\Software\Luna",
                r"HKEY_LOCAL_MACHINE\Software\Luna",
            ]),
            write_roots: strings(&[r"HKEY_CURRENT_USER\Software\Luna"]),
            denied_subtrees: strings(&[
                r"HKEY_LOCAL_MACHINE\SYSTEM",
                r"HKEY_LOCAL_MACHINE\SAM",
                r"HKEY_LOCAL_MACHINE\SECURITY",
                r"HKEY_LOCAL_MACHINE\Software\Policies",
                r"HKEY_CURRENT_USER\Software\Policies",
            ]),
            denied_segments: strings(&[
                r"Microsoft\Windows\CurrentVersion",
                r"Microsoft\Windows NT\CurrentVersion",
                r"CurrentControlSet",
                "Run",
                "RunOnce",
                "Winlogon",
                "Image File Execution Options",
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessPolicy {
    /// Executables by bare name (`notepad.exe`) or absolute path.
    pub allowed_executables: Vec<String>,

    /// Directories from which a bare-name allow entry may be launched by path.
    pub trusted_directories: Vec<String>,

    /// Shells and interpreters. Refused even when an allow entry matches.
    pub denied_executables: Vec<String>,

    /// Script types that run through an interpreter even without a shell.
    pub denied_extensions: Vec<String>,

    /// Options that make a program run another command, such as Chromium's
    /// `--gpu-launcher`. Matched by prefix, ignoring case and whether the
    /// option is spelled `--x`, `-x` or `/x`.
    pub denied_argument_prefixes: Vec<String>,

    /// Programs that may only be given plain operands (URLs, documents),
    /// never `-` or `/` options.
    pub operand_only_executables: Vec<String>,

    pub protected_pids: Vec<u32>,

    /// Process names `process.terminate` refuses, compared case-insensitively.
    pub protected_names: Vec<String>,
}

impl Default for ProcessPolicy {
    fn default() -> Self {
        Self {
            allowed_executables: strings(&[
                "notepad.exe",
                "calc.exe",
                "mspaint.exe",
                "wordpad.exe",
                "write.exe",
                "msedge.exe",
                "chrome.exe",
                "firefox.exe",
            ]),
            trusted_directories: strings(&[
                r"C:\Windows",
                r"C:\Windows\System32",
                r"C:\Program Files",
                r"C:\Program Files (x86)",
                "/usr/bin",
                "/usr/local/bin",
                "/bin",
            ]),
            denied_executables: strings(&[
                "cmd.exe",
                "command.com",
                "powershell.exe",
                "powershell_ise.exe",
                "pwsh.exe",
                "wscript.exe",
                "cscript.exe",
                "mshta.exe",
                "rundll32.exe",
                "regsvr32.exe",
                "regedit.exe",
                "reg.exe",
                "schtasks.exe",
                "sc.exe",
                "wmic.exe",
                "certutil.exe",
                "bitsadmin.exe",
                "msiexec.exe",
                "explorer.exe",
                "bash.exe",
                "wsl.exe",
                "python.exe",
                "pythonw.exe",
                "node.exe",
                "sh",
                "bash",
                "zsh",
                "dash",
                "fish",
                "python",
                "python3",
                "perl",
                "ruby",
                "node",
                "env",
                "sudo",
            ]),
            denied_extensions: strings(&[
                ".bat", ".cmd", ".ps1", ".psm1", ".vbs", ".vbe", ".js", ".jse", ".wsf", ".wsh",
                ".hta", ".msc", ".lnk", ".sh", ".py", ".pl", ".rb",
            ]),
            denied_argument_prefixes: strings(&[
                "--gpu-launcher",
                "--renderer-cmd-prefix",
                "--utility-cmd-prefix",
                "--gpu-cmd-prefix",
                "--plugin-launcher",
                "--ppapi-plugin-launcher",
                "--browser-subprocess-path",
                "--remote-debugging-port",
                "--remote-debugging-pipe",
                "--load-extension",
                "--no-sandbox",
            ]),
            operand_only_executables: strings(&["msedge.exe", "chrome.exe", "firefox.exe"]),
            protected_pids: vec![0, 4],
            protected_names: strings(&[
                "system",
                "system idle process",
                "registry",
                "smss.exe",
                "csrss.exe",
                "wininit.exe",
                "winlogon.exe",
                "services.exe",
                "lsass.exe",
                "lsaiso.exe",
                "svchost.exe",
                "dwm.exe",
                "msmpeng.exe",
                "init",
                "systemd",
                "launchd",
                "kernel_task",
                "kthreadd",
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilePolicy {
    /// Application data directories file operations may target.
    pub allowed_roots: Vec<String>,

    /// OS directories refused even when nested under an allowed root.
    pub denied_roots: Vec<String>,

    /// Compare paths case-insensitively (Windows semantics).
    pub case_insensitive: bool,
}

fn default_case_insensitive() -> bool {
    cfg!(windows)
}

impl Default for FilePolicy {
    fn default() -> Self {
        Self {
            allowed_roots: crate::paths::default_file_roots(),
            denied_roots: strings(&[
                r"C:\Windows",
                r"C:\Program Files",
                r"C:\Program Files (x86)",
                r"C:\ProgramData\Microsoft",
                r"C:\Boot",
                r"C:\Recovery",
                r"C:\System Volume Information",
                "/etc",
                "/bin",
                "/sbin",
                "/usr",
                "/boot",
                "/proc",
                "/sys",
                "/dev",
            ]),
            case_insensitive: default_case_insensitive(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
