use {
    std::{
        io,
        os::unix::io::{AsRawFd, BorrowedFd},
        ptr::NonNull,
    },
};

/// Call mmap(2) with the given arguments.
///
/// If `fd` is [`None`], `-1` is passed, as required for anonymous mappings.
/// `addr` is only a hint unless `flags` contains `MAP_FIXED`.
///
/// # Safety
///
/// If `flags` contains `MAP_FIXED`,
/// any existing mappings in the range are silently replaced.
pub unsafe fn mmap(
    addr:   *mut libc::c_void,
    len:    usize,
    prot:   libc::c_int,
    flags:  libc::c_int,
    fd:     Option<BorrowedFd>,
    offset: libc::off_t,
) -> io::Result<NonNull<libc::c_void>>
{
    let fd = fd.map(|fd| fd.as_raw_fd()).unwrap_or(-1);

    let ptr = libc::mmap(addr, len, prot, flags, fd, offset);

    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    // mmap(2) never returns a null mapping without MAP_FIXED.
    NonNull::new(ptr).ok_or_else(|| io::ErrorKind::AddrNotAvailable.into())
}

/// Call munmap(2) with the given arguments.
///
/// # Safety
///
/// The range must not be referenced anymore after the call.
pub unsafe fn munmap(addr: *mut libc::c_void, len: usize) -> io::Result<()>
{
    let result = libc::munmap(addr, len);

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}
