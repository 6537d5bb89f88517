//! Component-wise path normalization for registry keys, files and executables.
//!
//! Matching is never done on raw string prefixes: `C:\Windows2` is not under
//! `C:\Windows`, and `..` is resolved before any rule sees the path.

use std::path::{Path, PathBuf};

/// Why a path could not be normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRejection {
    /// Relative or drive-relative path.
    NotAbsolute,
    /// Device namespace, UNC share, alternate data stream or `..` above the root.
    Disallowed,
}

/// A normalized path: a root (`/` or a drive such as `C:`) followed by components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPath {
    components: Vec<String>,
}

impl NormalizedPath {
    pub fn starts_with(&self, root: &NormalizedPath) -> bool {
        self.components.len() >= root.components.len()
            && self.components[..root.components.len()] == root.components[..]
    }

    /// Whether `segment` occurs as a contiguous run of components.
    pub fn contains_run(&self, segment: &[String]) -> bool {
        !segment.is_empty()
            && self
                .components
                .windows(segment.len())
                .any(|window| window == segment)
    }

    pub fn file_name(&self) -> Option<&str> {
        if self.components.len() < 2 {
            return None;
        }
        self.components.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<NormalizedPath> {
        if self.components.len() < 2 {
            return None;
        }
        Some(Self {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }
}

const HIVE_ALIASES: &[(&str, &str)] = &[
    ("hkcu", "hkey_current_user"),
    ("hklm", "hkey_local_machine"),
    ("hkcr", "hkey_classes_root"),
    ("hku", "hkey_users"),
    ("hkcc", "hkey_current_config"),
];

/// Normalize a registry key path. Registry paths always compare case-insensitively.
pub fn normalize_registry_path(raw: &str) -> Result<NormalizedPath, PathRejection> {
    let mut components: Vec<String> = Vec::new();
    for part in raw.split(['\\', '/']) {
        match part.trim() {
            "" | "." => {}
            ".." => {
                // The hive itself can never be popped.
                if components.len() <= 1 {
                    return Err(PathRejection::Disallowed);
                }
                components.pop();
            }
            other => components.push(other.to_lowercase()),
        }
    }

    let Some(hive) = components.first_mut() else {
        return Err(PathRejection::NotAbsolute);
    };
    if let Some((_, full)) = HIVE_ALIASES.iter().find(|(alias, _)| alias == hive) {
        *hive = (*full).to_string();
    }
    Ok(NormalizedPath { components })
}

/// Normalize an absolute file path written in either Windows or Unix form.
pub fn normalize_file_path(
    raw: &str,
    case_insensitive: bool,
) -> Result<NormalizedPath, PathRejection> {
    let unified = raw.trim().replace('\\', "/");
    if unified.starts_with("//") {
        return Err(PathRejection::Disallowed);
    }

    let (root, rest) = if let Some(rest) = unified.strip_prefix('/') {
        ("/".to_string(), rest)
    } else {
        let bytes = unified.as_bytes();
        let is_drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
        if !is_drive || (bytes.len() > 2 && bytes[2] != b'/') {
            return Err(PathRejection::NotAbsolute);
        }
        (unified[..2].to_ascii_uppercase(), &unified[2..])
    };

    let mut components = vec![root];
    for part in rest.split('/') {
        // Windows ignores trailing dots and spaces: `Windows.` opens `Windows`.
        let part = match part {
            "." | ".." => part,
            other if case_insensitive => other.trim_end_matches(['.', ' ']),
            other => other,
        };
        match part {
            "" | "." => {}
            ".." => {
                if components.len() == 1 {
                    return Err(PathRejection::Disallowed);
                }
                components.pop();
            }
            other if case_insensitive && other.contains(':') => {
                return Err(PathRejection::Disallowed);
            }
            other => components.push(if case_insensitive {
                other.to_lowercase()
            } else {
                other.to_string()
            }),
        }
    }
    Ok(NormalizedPath { components })
}

/// Canonicalize an existing path and drop the Windows verbatim prefix so it
/// can be matched like a caller-supplied path. `None` when it does not exist.
pub fn canonical_path(path: &Path) -> Option<PathBuf> {
    let canonical = std::fs::canonicalize(path).ok()?;
    Some(strip_verbatim(canonical))
}

fn strip_verbatim(path: PathBuf) -> PathBuf {
    let stripped = {
        let text = path.to_string_lossy();
        text.strip_prefix(r"\\?\")
            .filter(|rest| !rest.starts_with("UNC\\"))
            .map(PathBuf::from)
    };
    stripped.unwrap_or(path)
}

/// Canonical location of the file a file operation would touch.
///
/// Uses the file itself when it exists, otherwise its canonical parent joined
/// with the file name, so links in the directory chain are followed either way.
pub fn resolve_file_target(raw: &str) -> Option<PathBuf> {
    let path = Path::new(raw);
    if let Some(canonical) = canonical_path(path) {
        return Some(canonical);
    }
    let parent = canonical_path(path.parent()?)?;
    Some(parent.join(path.file_name()?))
}

/// Where a `process.start` file name actually points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableResolution {
    pub resolved_path: Option<PathBuf>,
    pub executable_name: String,
}

impl ExecutableResolution {
    /// Resolve through `PATH` for bare names and canonicalize paths.
    pub fn resolve(file_name: &str) -> Self {
        let file_name = file_name.trim();
        let resolved = if is_path_like(file_name) {
            canonical_path(Path::new(file_name))
        } else {
            which::which(file_name)
                .ok()
                .and_then(|found| canonical_path(&found))
        };

        let executable_name = resolved
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| base_name(file_name).to_string());

        Self {
            resolved_path: resolved,
            executable_name,
        }
    }
}

pub fn is_path_like(file_name: &str) -> bool {
    file_name.contains(['/', '\\'])
}

/// Last component of a `/` or `\` separated name.
pub fn base_name(file_name: &str) -> &str {
    file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
}

/// File name without its final extension.
pub fn stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(raw: &str) -> NormalizedPath {
        normalize_file_path(raw, true).unwrap()
    }

    #[test]
    fn test_registry_aliases_and_separators() {
        let a = normalize_registry_path(r"HKCU\Software\Luna\Settings").unwrap();
        let b = normalize_registry_path("hkey_current_user/SOFTWARE/luna/settings/").unwrap();
        assert_eq!(a, b);
        let root = normalize_registry_path(r"HKEY_CURRENT_USER\Software\Luna").unwrap();
        assert!(a.starts_with(&root));
    }

    #[test]
    fn test_registry_dot_dot_is_resolved() {
        let path = normalize_registry_path(r"HKCU\Software\Luna\..\Microsoft").unwrap();
        let luna = normalize_registry_path(r"HKCU\Software\Luna").unwrap();
        assert!(!path.starts_with(&luna));
        assert_eq!(
            normalize_registry_path(r"HKCU\..\HKLM\SYSTEM"),
            Err(PathRejection::Disallowed)
        );
        assert_eq!(normalize_registry_path(""), Err(PathRejection::NotAbsolute));
    }

    #[test]
    fn test_registry_segment_runs() {
        let path = normalize_registry_path(
            r"HKEY_LOCAL_MACHINE\SOFTWARE\Microsoft\Windows\CurrentVersion\Run\Evil",
        )
        .unwrap();
        let segment: Vec<String> = ["microsoft", "windows", "currentversion"]
            .into_iter()
            .map(String::from)
            .collect();
        assert!(path.contains_run(&segment));
        assert!(path.contains_run(&["run".to_string()]));
        assert!(!path.contains_run(&["windows".to_string(), "run".to_string()]));
    }

    #[test]
    fn test_prefix_match_is_by_component() {
        assert!(!file(r"C:\Windows2\evil.txt").starts_with(&file(r"C:\Windows")));
        assert!(file(r"c:\windows\system32\x.dll").starts_with(&file(r"C:\Windows")));
        assert!(file("/srv/luna/files/a.txt").starts_with(&file("/srv/luna/files")));
        assert!(!file("/srv/luna/filesystem").starts_with(&file("/srv/luna/files")));
    }

    #[test]
    fn test_file_traversal() {
        let escaped = file(r"C:\ProgramData\Luna\files\..\..\..\Windows\win.ini");
        assert!(escaped.starts_with(&file(r"C:\Windows")));
        assert_eq!(
            normalize_file_path("/../etc/passwd", false),
            Err(PathRejection::Disallowed)
        );
        assert_eq!(file("/srv/./luna//a.txt"), file("/srv/luna/a.txt"));
    }

    #[test]
    fn test_file_rejections() {
        for raw in [r"\\?\C:\Windows\win.ini", r"\\.\PhysicalDrive0", r"\\server\share\a.txt"] {
            assert_eq!(normalize_file_path(raw, true), Err(PathRejection::Disallowed), "{raw}");
        }
        for raw in ["relative.txt", r"C:relative.txt", "", "./a"] {
            assert_eq!(normalize_file_path(raw, true), Err(PathRejection::NotAbsolute), "{raw}");
        }
        assert_eq!(
            normalize_file_path(r"C:\ProgramData\Luna\files\a.txt:stream", true),
            Err(PathRejection::Disallowed)
        );
    }

    #[test]
    fn test_windows_trailing_dots_are_ignored() {
        assert!(file(r"C:\Windows.\System32").starts_with(&file(r"C:\Windows")));
        assert!(file(r"C:\Windows \System32").starts_with(&file(r"C:\Windows")));
    }

    #[test]
    fn test_case_sensitive_mode_keeps_case() {
        let path = normalize_file_path("/srv/Luna/a.txt", false).unwrap();
        let root = normalize_file_path("/srv/luna", false).unwrap();
        assert!(!path.starts_with(&root));
    }

    #[test]
    fn test_names() {
        assert_eq!(base_name(r"C:\Windows\System32\cmd.exe"), "cmd.exe");
        assert_eq!(base_name("/usr/bin/env"), "env");
        assert_eq!(base_name("notepad.exe"), "notepad.exe");
        assert_eq!(stem("cmd.exe"), "cmd");
        assert_eq!(stem("python3"), "python3");
        assert_eq!(stem(".hidden"), ".hidden");
        assert!(is_path_like("./sleep"));
        assert!(!is_path_like("sleep"));
    }

    #[test]
    fn test_strip_verbatim() {
        assert_eq!(
            strip_verbatim(PathBuf::from(r"\\?\C:\ProgramData\Luna")),
            PathBuf::from(r"C:\ProgramData\Luna")
        );
        assert_eq!(
            strip_verbatim(PathBuf::from(r"\\?\UNC\server\share")),
            PathBuf::from(r"\\?\UNC\server\share")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_file_target_follows_links() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir(&real).unwrap();
        std::os::unix::fs::symlink(&real, dir.path().join("link")).unwrap();

        let target = resolve_file_target(&dir.path().join("link/new.txt").to_string_lossy()).unwrap();
        assert_eq!(target, real.canonicalize().unwrap().join("new.txt"));
        assert!(resolve_file_target("/definitely/not/here/a.txt").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_executable_through_path() {
        let resolution = ExecutableResolution::resolve("sh");
        assert!(resolution.resolved_path.is_some());
        let missing = ExecutableResolution::resolve("luna-no-such-binary");
        assert!(missing.resolved_path.is_none());
        assert_eq!(missing.executable_name, "luna-no-such-binary");
    }
}
