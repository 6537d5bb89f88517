//! Integration tests for luna-platform.

use luna_platform::{
    DisplayBounds, FileStore, NativeOptions, Platform, RegistryValue, StdFileStore, TextEncoding,
};
use tempfile::TempDir;

fn native(state: &TempDir) -> Platform {
    Platform::native(&NativeOptions {
        state_dir: state.path().to_path_buf(),
        fallback_display: DisplayBounds::new(1280, 720),
    })
    .unwrap()
}

// ─── Cross-platform tests ───────────────────────────────────────────────

#[test]
fn test_file_store_round_trips_each_encoding() {
    let tmp = TempDir::new().unwrap();
    let store = StdFileStore;

    for encoding in [
        TextEncoding::Utf8,
        TextEncoding::Utf16Le,
        TextEncoding::Utf16Be,
        TextEncoding::Ascii,
        TextEncoding::Latin1,
    ] {
        let path = tmp.path().join(format!("sample-{encoding}.txt"));
        store.write_text(&path, "Luna 123", encoding).unwrap();
        assert_eq!(store.read_text(&path, encoding).unwrap(), "Luna 123");
    }
}

#[test]
fn test_native_registry_reads_back_writes() {
    let tmp = TempDir::new().unwrap();
    let platform = native(&tmp);
    let key = r"HKEY_CURRENT_USER\Software\LunaPlatformTest";

    platform
        .registry
        .write(key, "Counter", &RegistryValue::DWord(7))
        .unwrap();
    assert_eq!(
        platform.registry.read(key, "Counter").unwrap(),
        Some(RegistryValue::DWord(7))
    );
}

// ─── Unix-specific tests ────────────────────────────────────────────────

#[cfg(unix)]
mod unix_tests {
    use super::*;
    use luna_platform::{MouseButton, PlatformError, ProcessLaunch};
    use std::time::{Duration, Instant};

    #[test]
    fn test_display_comes_from_options() {
        let tmp = TempDir::new().unwrap();
        let platform = native(&tmp);
        assert_eq!(
            platform.screen.primary_display().unwrap(),
            DisplayBounds::new(1280, 720)
        );
    }

    #[test]
    fn test_input_and_capture_are_unsupported() {
        let tmp = TempDir::new().unwrap();
        let platform = native(&tmp);

        assert!(matches!(
            platform.input.click(10, 10, MouseButton::Left),
            Err(PlatformError::Unsupported(_))
        ));
        assert!(matches!(
            platform.input.list_windows(),
            Err(PlatformError::Unsupported(_))
        ));
        assert!(matches!(
            platform.screen.capture_primary(&tmp.path().join("shot.png")),
            Err(PlatformError::Unsupported(_))
        ));
    }

    #[test]
    fn test_start_lookup_terminate() {
        let tmp = TempDir::new().unwrap();
        let platform = native(&tmp);

        let pid = platform
            .processes
            .start(&ProcessLaunch {
                file_name: "sleep".to_string(),
                arguments: vec!["30".to_string()],
                working_directory: Some(tmp.path().to_path_buf()),
            })
            .unwrap();
        let entry = platform.processes.lookup(pid).unwrap().unwrap();

        platform.processes.terminate(&entry).unwrap();

        // The reaper thread collects the child shortly after the signal.
        let deadline = Instant::now() + Duration::from_secs(5);
        while platform.processes.lookup(pid).unwrap().is_some() {
            assert!(Instant::now() < deadline, "process {pid} still alive");
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    #[test]
    fn test_start_missing_executable_fails() {
        let tmp = TempDir::new().unwrap();
        let platform = native(&tmp);
        let result = platform.processes.start(&ProcessLaunch {
            file_name: "definitely-not-a-real-binary-luna".to_string(),
            arguments: Vec::new(),
            working_directory: None,
        });
        assert!(result.is_err());
    }
}
