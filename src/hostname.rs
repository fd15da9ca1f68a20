use std::{ffi::CStr, io};

use libc::{c_char, c_int};

/// Largest host name we are prepared to read, including the trailing NUL.
const HOST_NAME_BUF: usize = 256;

/// Name of the machine we are running on, as reported by `gethostname(2)`.
pub fn hostname() -> io::Result<String> {
    let mut buf = [0 as c_char; HOST_NAME_BUF];
    io_result(unsafe { libc::gethostname(buf.as_mut_ptr(), buf.len()) })?;

    // POSIX does not promise termination when the name was truncated.
    buf[HOST_NAME_BUF - 1] = 0;
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Ok(name.to_string_lossy().into_owned())
}

/// Turns a C function return into an IO Result
fn io_result(ret: c_int) -> io::Result<()> {
    match ret {
        0 => Ok(()),
        _ => Err(io::Error::last_os_error()),
    }
}
