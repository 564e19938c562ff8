use {
    crate::retry_on_eintr,
    std::{
        ffi::CString,
        io,
        os::unix::{ffi::OsStrExt, io::{FromRawFd, OwnedFd}},
        path::Path,
    },
};

/// Call open(2) with the given arguments.
pub fn open(pathname: &Path, flags: libc::c_int, mode: libc::mode_t)
    -> io::Result<OwnedFd>
{
    let pathname = CString::new(pathname.as_os_str().as_bytes())?;
    let flags = flags | libc::O_CLOEXEC;

    retry_on_eintr(|| {
        // SAFETY: pathname is NUL-terminated.
        let fd = unsafe {
            libc::open(pathname.as_ptr(), flags, libc::c_uint::from(mode))
        };

        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: fd is a new, open file descriptor.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    })
}
