use {
    crate::retry_on_eintr,
    std::{io, os::unix::io::{AsRawFd, BorrowedFd}},
};

/// Call pread(2) with the given arguments.
///
/// Returns the number of bytes read,
/// which may be less than the size of the buffer.
pub fn pread(fd: BorrowedFd, buf: &mut [u8], offset: libc::off_t)
    -> io::Result<usize>
{
    retry_on_eintr(|| {
        // SAFETY: Buffer size is correct.
        let len = unsafe {
            libc::pread(
                fd.as_raw_fd(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                offset,
            )
        };

        if len == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(len as usize)
    })
}

/// Call [`pread`] until the buffer is full.
///
/// If the end of the file is reached first,
/// this function fails with [`UnexpectedEof`][`io::ErrorKind::UnexpectedEof`].
pub fn pread_exact(fd: BorrowedFd, mut buf: &mut [u8], mut offset: libc::off_t)
    -> io::Result<()>
{
    while !buf.is_empty() {
        let len = pread(fd, buf, offset)?;
        if len == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        buf = &mut buf[len ..];
        offset += len as libc::off_t;
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use {super::*, std::{io::Write, os::unix::io::AsFd}};

    #[test]
    fn pread_exact_reads_at_offset()
    {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"Hello, world!").unwrap();

        let mut buf = [0; 5];
        pread_exact(file.as_fd(), &mut buf, 7).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn pread_exact_fails_past_end()
    {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"short").unwrap();

        let mut buf = [0; 8];
        let err = pread_exact(file.as_fd(), &mut buf, 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
