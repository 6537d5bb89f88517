//! Windows backend over Win32.

use std::ffi::c_void;
use std::mem;
use std::path::Path;
use std::process::{Command, Stdio};
use std::ptr;
use std::sync::Arc;

use tracing::{debug, warn};
use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_FILE_NOT_FOUND, ERROR_SUCCESS, FALSE, HANDLE, HWND, INVALID_HANDLE_VALUE,
    LPARAM, RECT, TRUE, BOOL,
};
use windows_sys::Win32::Graphics::Gdi::{
    BI_RGB, BITMAPINFO, BITMAPINFOHEADER, BitBlt, CreateCompatibleBitmap, CreateCompatibleDC,
    DIB_RGB_COLORS, DeleteDC, DeleteObject, GetDC, GetDIBits, ReleaseDC, SRCCOPY, SelectObject,
};
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW, TH32CS_SNAPPROCESS,
};
use windows_sys::Win32::System::Registry::{
    HKEY, HKEY_CLASSES_ROOT, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, HKEY_USERS, KEY_READ,
    KEY_WRITE, REG_DWORD, REG_EXPAND_SZ, REG_MULTI_SZ, REG_OPTION_NON_VOLATILE, REG_QWORD, REG_SZ,
    RegCloseKey, RegCreateKeyExW, RegOpenKeyExW, RegQueryValueExW, RegSetValueExW,
};
use windows_sys::Win32::System::Threading::{
    OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_TERMINATE,
    QueryFullProcessImageNameW, TerminateProcess,
};
use windows_sys::Win32::UI::Input::KeyboardAndMouse::{
    INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT, KEYEVENTF_KEYUP, KEYEVENTF_UNICODE,
    MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP,
    MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP, MOUSEINPUT, SendInput,
};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    EnumWindows, FindWindowW, GetClassNameW, GetSystemMetrics, GetWindowRect, GetWindowTextW,
    GetWindowThreadProcessId, IsWindowVisible, SM_CXSCREEN, SM_CYSCREEN, SetCursorPos,
    SetForegroundWindow,
};

use crate::keys::parse_chords;
use crate::{
    DisplayBounds, InputInjector, MouseButton, Platform, PlatformError, ProcessController,
    ProcessEntry, ProcessLaunch, RegistryStore, RegistryValue, Result, ScreenCapturer,
    StdFileStore, WindowBounds, WindowInfo,
};

const CREATE_NO_WINDOW: u32 = 0x0800_0000;

pub(crate) fn native_platform() -> Platform {
    Platform {
        input: Arc::new(Win32Input),
        registry: Arc::new(Win32Registry),
        processes: Arc::new(Win32Processes),
        files: Arc::new(StdFileStore),
        screen: Arc::new(GdiScreen),
    }
}

fn to_wide(s: &str) -> Vec<u16> {
    use std::os::windows::prelude::OsStrExt;
    std::ffi::OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

fn from_wide(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

// ─── Input ──────────────────────────────────────────────────────────────

struct Win32Input;

fn send_inputs(inputs: &[INPUT]) -> Result<()> {
    let sent = unsafe {
        SendInput(
            inputs.len() as u32,
            inputs.as_ptr(),
            mem::size_of::<INPUT>() as i32,
        )
    };
    if sent as usize != inputs.len() {
        return Err(PlatformError::os(
            "SendInput",
            format!(
                "sent {sent} of {} events: {}",
                inputs.len(),
                std::io::Error::last_os_error()
            ),
        ));
    }
    Ok(())
}

fn mouse_input(flags: u32) -> INPUT {
    INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx: 0,
                dy: 0,
                mouseData: 0,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn key_input(vk: u16, scan: u16, flags: u32) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: vk,
                wScan: scan,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn focus_window(title: &str) -> Result<()> {
    let wide = to_wide(title);
    let hwnd = unsafe { FindWindowW(ptr::null(), wide.as_ptr()) };
    if hwnd.is_null() {
        return Err(PlatformError::NotFound(format!("window '{title}'")));
    }
    if unsafe { SetForegroundWindow(hwnd) } == FALSE {
        warn!(title, "SetForegroundWindow refused to focus target window");
    }
    Ok(())
}

impl InputInjector for Win32Input {
    fn click(&self, x: i32, y: i32, button: MouseButton) -> Result<()> {
        if unsafe { SetCursorPos(x, y) } == FALSE {
            return Err(PlatformError::last_os_error("SetCursorPos"));
        }
        std::thread::sleep(std::time::Duration::from_millis(10));

        let (down, up) = match button {
            MouseButton::Left => (MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP),
            MouseButton::Right => (MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP),
            MouseButton::Middle => (MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP),
        };
        send_inputs(&[mouse_input(down), mouse_input(up)])?;
        debug!(x, y, button = button.as_str(), "Mouse click injected");
        Ok(())
    }

    fn send_keys(&self, keys: &str, target_window: Option<&str>) -> Result<()> {
        if let Some(title) = target_window {
            focus_window(title)?;
        }

        let mut inputs = Vec::new();
        match parse_chords(keys) {
            Some(chords) => {
                for chord in chords {
                    inputs.extend(chord.iter().map(|&vk| key_input(vk, 0, 0)));
                    inputs.extend(chord.iter().rev().map(|&vk| key_input(vk, 0, KEYEVENTF_KEYUP)));
                }
            }
            None => {
                for unit in keys.encode_utf16() {
                    inputs.push(key_input(0, unit, KEYEVENTF_UNICODE));
                    inputs.push(key_input(0, unit, KEYEVENTF_UNICODE | KEYEVENTF_KEYUP));
                }
            }
        }
        send_inputs(&inputs)?;
        debug!(events = inputs.len(), "Key input injected");
        Ok(())
    }

    fn list_windows(&self) -> Result<Vec<WindowInfo>> {
        let mut windows: Vec<WindowInfo> = Vec::new();
        let ok = unsafe {
            EnumWindows(
                Some(enum_windows_proc),
                &mut windows as *mut Vec<WindowInfo> as LPARAM,
            )
        };
        if ok == FALSE {
            return Err(PlatformError::last_os_error("EnumWindows"));
        }
        Ok(windows)
    }
}

unsafe extern "system" fn enum_windows_proc(hwnd: HWND, lparam: LPARAM) -> BOOL {
    // SAFETY: lparam is the &mut Vec passed to EnumWindows above, alive for the whole call.
    let windows = unsafe { &mut *(lparam as *mut Vec<WindowInfo>) };
    if unsafe { IsWindowVisible(hwnd) } == FALSE {
        return TRUE;
    }

    let mut title = [0u16; 512];
    let mut class = [0u16; 256];
    let mut rect = RECT {
        left: 0,
        top: 0,
        right: 0,
        bottom: 0,
    };
    let mut process_id = 0u32;
    unsafe {
        GetWindowTextW(hwnd, title.as_mut_ptr(), title.len() as i32);
        GetClassNameW(hwnd, class.as_mut_ptr(), class.len() as i32);
        GetWindowThreadProcessId(hwnd, &mut process_id);
        GetWindowRect(hwnd, &mut rect);
    }

    windows.push(WindowInfo {
        handle: hwnd as i64,
        title: from_wide(&title),
        class_name: from_wide(&class),
        process_id,
        process_name: image_name(process_id).unwrap_or_default(),
        is_visible: true,
        bounds: WindowBounds {
            x: rect.left,
            y: rect.top,
            width: rect.right - rect.left,
            height: rect.bottom - rect.top,
        },
    });
    TRUE
}

fn image_name(pid: u32) -> Option<String> {
    let raw = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, FALSE, pid) };
    if raw.is_null() {
        return None;
    }
    handle_image_name(&OwnedHandle(raw))
}

/// File name of the executable behind an open process handle.
fn handle_image_name(handle: &OwnedHandle) -> Option<String> {
    let mut buf = [0u16; 1024];
    let mut len = buf.len() as u32;
    let ok = unsafe { QueryFullProcessImageNameW(handle.0, 0, buf.as_mut_ptr(), &mut len) };
    if ok == FALSE {
        return None;
    }
    let full = String::from_utf16_lossy(&buf[..len as usize]);
    Path::new(&full)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

// ─── Registry ───────────────────────────────────────────────────────────

struct Win32Registry;

struct OpenKey(HKEY);

impl Drop for OpenKey {
    fn drop(&mut self) {
        unsafe {
            RegCloseKey(self.0);
        }
    }
}

fn split_hive(key_path: &str) -> Result<(HKEY, String)> {
    let normalized = key_path.replace('/', "\\");
    let (hive, rest) = normalized
        .split_once('\\')
        .unwrap_or((normalized.as_str(), ""));
    let root = match hive.to_ascii_uppercase().as_str() {
        "HKEY_CURRENT_USER" | "HKCU" => HKEY_CURRENT_USER,
        "HKEY_LOCAL_MACHINE" | "HKLM" => HKEY_LOCAL_MACHINE,
        "HKEY_CLASSES_ROOT" | "HKCR" => HKEY_CLASSES_ROOT,
        "HKEY_USERS" | "HKU" => HKEY_USERS,
        other => {
            return Err(PlatformError::InvalidArgument(format!(
                "unknown registry hive '{other}'"
            )));
        }
    };
    Ok((root, rest.trim_matches('\\').to_string()))
}

fn registry_error(call: &'static str, code: u32) -> PlatformError {
    PlatformError::os(
        call,
        std::io::Error::from_raw_os_error(code as i32).to_string(),
    )
}

fn decode_registry_value(kind: u32, data: &[u8]) -> Option<RegistryValue> {
    let units = || -> Vec<u16> {
        data.chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    };
    match kind {
        REG_SZ | REG_EXPAND_SZ => Some(RegistryValue::String(from_wide(&units()))),
        REG_DWORD if data.len() >= 4 => Some(RegistryValue::DWord(u32::from_le_bytes([
            data[0], data[1], data[2], data[3],
        ]))),
        REG_QWORD if data.len() >= 8 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[..8]);
            Some(RegistryValue::QWord(u64::from_le_bytes(bytes)))
        }
        REG_MULTI_SZ => Some(RegistryValue::MultiString(
            units()
                .split(|&c| c == 0)
                .filter(|part| !part.is_empty())
                .map(String::from_utf16_lossy)
                .collect(),
        )),
        _ => None,
    }
}

fn encode_registry_value(value: &RegistryValue) -> (u32, Vec<u8>) {
    let wide_bytes = |units: Vec<u16>| units.into_iter().flat_map(u16::to_le_bytes).collect();
    match value {
        RegistryValue::String(s) => (REG_SZ, wide_bytes(to_wide(s))),
        RegistryValue::DWord(v) => (REG_DWORD, v.to_le_bytes().to_vec()),
        RegistryValue::QWord(v) => (REG_QWORD, v.to_le_bytes().to_vec()),
        RegistryValue::MultiString(items) => {
            let mut units = Vec::new();
            for item in items {
                units.extend(item.encode_utf16());
                units.push(0);
            }
            units.push(0);
            (REG_MULTI_SZ, wide_bytes(units))
        }
    }
}

impl RegistryStore for Win32Registry {
    fn read(&self, key_path: &str, value_name: &str) -> Result<Option<RegistryValue>> {
        let (root, subkey) = split_hive(key_path)?;
        let subkey_w = to_wide(&subkey);
        let name_w = to_wide(value_name);

        let mut raw: HKEY = ptr::null_mut();
        let status = unsafe { RegOpenKeyExW(root, subkey_w.as_ptr(), 0, KEY_READ, &mut raw) };
        if status == ERROR_FILE_NOT_FOUND {
            return Ok(None);
        }
        if status != ERROR_SUCCESS {
            return Err(registry_error("RegOpenKeyExW", status));
        }
        let key = OpenKey(raw);

        let mut kind = 0u32;
        let mut size = 0u32;
        let status = unsafe {
            RegQueryValueExW(
                key.0,
                name_w.as_ptr(),
                ptr::null(),
                &mut kind,
                ptr::null_mut(),
                &mut size,
            )
        };
        if status == ERROR_FILE_NOT_FOUND {
            return Ok(None);
        }
        if status != ERROR_SUCCESS {
            return Err(registry_error("RegQueryValueExW", status));
        }

        let mut data = vec![0u8; size as usize];
        let status = unsafe {
            RegQueryValueExW(
                key.0,
                name_w.as_ptr(),
                ptr::null(),
                &mut kind,
                data.as_mut_ptr(),
                &mut size,
            )
        };
        if status != ERROR_SUCCESS {
            return Err(registry_error("RegQueryValueExW", status));
        }
        data.truncate(size as usize);
        Ok(decode_registry_value(kind, &data))
    }

    fn write(&self, key_path: &str, value_name: &str, value: &RegistryValue) -> Result<()> {
        let (root, subkey) = split_hive(key_path)?;
        let subkey_w = to_wide(&subkey);
        let name_w = to_wide(value_name);

        let mut raw: HKEY = ptr::null_mut();
        let status = unsafe {
            RegCreateKeyExW(
                root,
                subkey_w.as_ptr(),
                0,
                ptr::null(),
                REG_OPTION_NON_VOLATILE,
                KEY_WRITE,
                ptr::null(),
                &mut raw,
                ptr::null_mut(),
            )
        };
        if status != ERROR_SUCCESS {
            return Err(registry_error("RegCreateKeyExW", status));
        }
        let key = OpenKey(raw);

        let (kind, data) = encode_registry_value(value);
        let status = unsafe {
            RegSetValueExW(
                key.0,
                name_w.as_ptr(),
                0,
                kind,
                data.as_ptr(),
                data.len() as u32,
            )
        };
        if status != ERROR_SUCCESS {
            return Err(registry_error("RegSetValueExW", status));
        }
        Ok(())
    }
}

// ─── Processes ──────────────────────────────────────────────────────────

struct Win32Processes;

struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

impl ProcessController for Win32Processes {
    fn start(&self, launch: &ProcessLaunch) -> Result<u32> {
        use std::os::windows::process::CommandExt;

        let mut cmd = Command::new(&launch.file_name);
        cmd.args(&launch.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .creation_flags(CREATE_NO_WINDOW);
        if let Some(dir) = &launch.working_directory {
            cmd.current_dir(dir);
        }
        let child = cmd.spawn()?;
        Ok(child.id())
    }

    fn terminate(&self, target: &ProcessEntry) -> Result<()> {
        let pid = target.pid;
        let raw = unsafe {
            OpenProcess(
                PROCESS_TERMINATE | PROCESS_QUERY_LIMITED_INFORMATION,
                FALSE,
                pid,
            )
        };
        if raw.is_null() {
            return Err(PlatformError::last_os_error("OpenProcess"));
        }
        // The open handle pins the process object, so the name check and the
        // kill below apply to the same process even if the pid is reused.
        let handle = OwnedHandle(raw);
        let name = handle_image_name(&handle).unwrap_or_default();
        if !name.eq_ignore_ascii_case(&target.name) {
            return Err(PlatformError::NotFound(format!("process {pid}")));
        }
        if unsafe { TerminateProcess(handle.0, 1) } == FALSE {
            return Err(PlatformError::last_os_error("TerminateProcess"));
        }
        Ok(())
    }

    fn lookup(&self, pid: u32) -> Result<Option<ProcessEntry>> {
        let raw = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) };
        if raw == INVALID_HANDLE_VALUE {
            return Err(PlatformError::last_os_error("CreateToolhelp32Snapshot"));
        }
        let snapshot = OwnedHandle(raw);

        let mut entry: PROCESSENTRY32W = unsafe { mem::zeroed() };
        entry.dwSize = mem::size_of::<PROCESSENTRY32W>() as u32;
        let mut more = unsafe { Process32FirstW(snapshot.0, &mut entry) };
        while more != FALSE {
            if entry.th32ProcessID == pid {
                return Ok(Some(ProcessEntry {
                    pid,
                    name: from_wide(&entry.szExeFile),
                }));
            }
            more = unsafe { Process32NextW(snapshot.0, &mut entry) };
        }
        Ok(None)
    }
}

// ─── Screen ─────────────────────────────────────────────────────────────

struct GdiScreen;

impl ScreenCapturer for GdiScreen {
    fn primary_display(&self) -> Result<DisplayBounds> {
        let (width, height) = unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) };
        if width <= 0 || height <= 0 {
            return Err(PlatformError::os("GetSystemMetrics", "no primary display"));
        }
        Ok(DisplayBounds::new(width, height))
    }

    fn capture_primary(&self, destination: &Path) -> Result<()> {
        let display = self.primary_display()?;
        let (width, height) = (display.width, display.height);
        let mut bgra = vec![0u8; (width * height * 4) as usize];

        unsafe {
            let screen_dc = GetDC(ptr::null_mut());
            if screen_dc.is_null() {
                return Err(PlatformError::last_os_error("GetDC"));
            }
            let memory_dc = CreateCompatibleDC(screen_dc);
            let bitmap = CreateCompatibleBitmap(screen_dc, width, height);
            let previous = SelectObject(memory_dc, bitmap);

            let copied = BitBlt(memory_dc, 0, 0, width, height, screen_dc, 0, 0, SRCCOPY);

            let mut info: BITMAPINFO = mem::zeroed();
            info.bmiHeader = BITMAPINFOHEADER {
                biSize: mem::size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: width,
                // Negative height requests a top-down DIB.
                biHeight: -height,
                biPlanes: 1,
                biBitCount: 32,
                biCompression: BI_RGB,
                ..mem::zeroed()
            };
            let lines = GetDIBits(
                memory_dc,
                bitmap,
                0,
                height as u32,
                bgra.as_mut_ptr() as *mut c_void,
                &mut info,
                DIB_RGB_COLORS,
            );

            SelectObject(memory_dc, previous);
            DeleteObject(bitmap);
            DeleteDC(memory_dc);
            ReleaseDC(ptr::null_mut(), screen_dc);

            if copied == FALSE {
                return Err(PlatformError::last_os_error("BitBlt"));
            }
            if lines == 0 {
                return Err(PlatformError::last_os_error("GetDIBits"));
            }
        }

        for pixel in bgra.chunks_exact_mut(4) {
            pixel.swap(0, 2);
            pixel[3] = 0xFF;
        }
        let image = image::RgbaImage::from_raw(width as u32, height as u32, bgra)
            .ok_or_else(|| PlatformError::os("capture", "pixel buffer size mismatch"))?;
        image
            .save_with_format(destination, image::ImageFormat::Png)
            .map_err(|err| PlatformError::os("png encode", err.to_string()))?;
        Ok(())
    }
}
