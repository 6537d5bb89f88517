//! Named pipe endpoint restricted to local, authenticated callers.

use std::ffi::c_void;
use std::io;
use std::time::Duration;
use std::{mem, ptr};

use anyhow::{Context, Result};
use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions};
use tracing::warn;
use windows_sys::Win32::Foundation::{CloseHandle, ERROR_PIPE_BUSY, HANDLE, HLOCAL, LocalFree};
use windows_sys::Win32::Security::Authorization::{
    ConvertSidToStringSidW, ConvertStringSecurityDescriptorToSecurityDescriptorW,
};
use windows_sys::Win32::Security::{
    GetTokenInformation, SECURITY_ATTRIBUTES, TOKEN_QUERY, TOKEN_USER, TokenUser,
};
use windows_sys::Win32::System::Pipes::GetNamedPipeClientProcessId;
use windows_sys::Win32::System::Threading::{
    OpenProcess, OpenProcessToken, PROCESS_QUERY_LIMITED_INFORMATION,
};

use super::TransportConfig;
use crate::security::CallerIdentity;

/// LocalSystem and Administrators get full control, authenticated users may
/// read and write. The protected DACL drops inherited entries.
const PIPE_SDDL: &str = "D:P(A;;GA;;;SY)(A;;GA;;;BA)(A;;GRGW;;;AU)";

const SDDL_REVISION_1: u32 = 1;
const BUSY_RETRY: Duration = Duration::from_millis(50);
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct Listener {
    name: String,
    pending: Option<NamedPipeServer>,
}

impl Listener {
    /// Create the first instance so no other process can claim the name.
    pub(crate) fn bind(config: &TransportConfig) -> Result<Self> {
        let first = create_restricted_pipe(&config.endpoint, true)
            .with_context(|| format!("Failed to create pipe {}", config.endpoint))?;
        Ok(Self {
            name: config.endpoint.clone(),
            pending: Some(first),
        })
    }

    pub(crate) async fn accept(&mut self) -> io::Result<(NamedPipeServer, CallerIdentity)> {
        let server = match self.pending.take() {
            Some(server) => server,
            None => create_restricted_pipe(&self.name, false)?,
        };
        server.connect().await?;
        let caller = client_identity(&server);
        Ok((server, caller))
    }
}

fn create_restricted_pipe(name: &str, first_instance: bool) -> io::Result<NamedPipeServer> {
    let sddl: Vec<u16> = PIPE_SDDL.encode_utf16().chain(Some(0)).collect();
    let mut descriptor: *mut c_void = ptr::null_mut();

    // SAFETY: `sddl` is NUL-terminated and outlives the call; the returned
    // descriptor is released with LocalFree below.
    unsafe {
        let ok = ConvertStringSecurityDescriptorToSecurityDescriptorW(
            sddl.as_ptr(),
            SDDL_REVISION_1,
            &mut descriptor,
            ptr::null_mut(),
        );
        if ok == 0 || descriptor.is_null() {
            return Err(io::Error::last_os_error());
        }

        let mut attributes = SECURITY_ATTRIBUTES {
            nLength: mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: descriptor,
            bInheritHandle: 0,
        };

        let mut options = ServerOptions::new();
        options
            .first_pipe_instance(first_instance)
            .reject_remote_clients(true);
        let result = options
            .create_with_security_attributes_raw(name, &mut attributes as *mut _ as *mut c_void);

        LocalFree(descriptor as HLOCAL);
        result
    }
}

fn client_identity(server: &NamedPipeServer) -> CallerIdentity {
    use std::os::windows::io::AsRawHandle;

    let mut pid: u32 = 0;
    // SAFETY: the handle belongs to `server` and is connected.
    let ok = unsafe { GetNamedPipeClientProcessId(server.as_raw_handle() as HANDLE, &mut pid) };
    if ok == 0 {
        warn!(error = %io::Error::last_os_error(), "Pipe client process unknown");
        return CallerIdentity::unknown();
    }

    match process_user_sid(pid) {
        Ok(sid) => CallerIdentity::new(sid, Some(pid)),
        Err(err) => {
            warn!(pid, error = %err, "Pipe client account unknown");
            CallerIdentity::new("unknown", Some(pid))
        }
    }
}

/// String SID of the account running `pid`.
fn process_user_sid(pid: u32) -> io::Result<String> {
    // SAFETY: every handle opened here is closed before returning and every
    // buffer is sized from the length the API reports.
    unsafe {
        let process = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if process.is_null() {
            return Err(io::Error::last_os_error());
        }
        let mut token: HANDLE = ptr::null_mut();
        let opened = OpenProcessToken(process, TOKEN_QUERY, &mut token);
        CloseHandle(process);
        if opened == 0 {
            return Err(io::Error::last_os_error());
        }

        let mut len: u32 = 0;
        GetTokenInformation(token, TokenUser, ptr::null_mut(), 0, &mut len);
        if len == 0 {
            let err = io::Error::last_os_error();
            CloseHandle(token);
            return Err(err);
        }
        // u64 words keep TOKEN_USER suitably aligned.
        let mut buf = vec![0u64; (len as usize).div_ceil(mem::size_of::<u64>())];
        let ok = GetTokenInformation(
            token,
            TokenUser,
            buf.as_mut_ptr() as *mut c_void,
            len,
            &mut len,
        );
        CloseHandle(token);
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }

        let user = &*(buf.as_ptr() as *const TOKEN_USER);
        let mut wide: *mut u16 = ptr::null_mut();
        if ConvertSidToStringSidW(user.User.Sid, &mut wide) == 0 || wide.is_null() {
            return Err(io::Error::last_os_error());
        }
        let mut n = 0;
        while *wide.add(n) != 0 {
            n += 1;
        }
        let sid = String::from_utf16_lossy(std::slice::from_raw_parts(wide, n));
        LocalFree(wide as HLOCAL);
        Ok(sid)
    }
}

/// Open the pipe, waiting while every instance is busy.
pub(crate) async fn connect_stream(endpoint: &str) -> io::Result<NamedPipeClient> {
    let deadline = tokio::time::Instant::now() + BUSY_TIMEOUT;
    loop {
        match ClientOptions::new().open(endpoint) {
            Ok(client) => return Ok(client),
            Err(err)
                if err.raw_os_error() == Some(ERROR_PIPE_BUSY as i32)
                    && tokio::time::Instant::now() < deadline => {}
            Err(err) => return Err(err),
        }
        tokio::time::sleep(BUSY_RETRY).await;
    }
}
