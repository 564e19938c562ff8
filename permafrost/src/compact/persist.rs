//! Storing regions in files.

use {
    super::{
        CompactedRegion,
        Compactor,
        CorruptRegion,
        LoadError,
        layout::{BASE_ADDR_OFFSET, MAGIC, MAGIC_OFFSET, REGION_HEADER_SIZE, read_word},
    },
    os_ext::{MAP_PRIVATE, O_RDONLY, PROT_READ, PROT_WRITE},
    std::{
        fs,
        io,
        num::NonZeroU64,
        os::unix::io::AsFd,
        path::Path,
    },
};

/// Write the bytes of a compactor to a file, replacing it.
pub fn save(path: &Path, compactor: &Compactor) -> io::Result<()>
{
    log::debug!("Saving region of {} bytes to {}", compactor.size(), path.display());
    fs::write(path, compactor.data())
}

impl CompactedRegion
{
    /// Load a region from a file by mapping it into memory.
    ///
    /// The file is mapped privately, so the file itself is not modified.
    /// The mapping is requested at the base address of the region,
    /// in which case the references need not change.
    pub fn map_file(path: &Path) -> Result<Self, LoadError>
    {
        let file = os_ext::open(path, O_RDONLY, 0)?;
        let stat = os_ext::fstat(file.as_fd())?;
        let size = usize::try_from(stat.st_size)
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidData))?;

        if size < REGION_HEADER_SIZE {
            return Err(CorruptRegion::BadMagic.into());
        }

        let mut header = [0; REGION_HEADER_SIZE];
        os_ext::pread_exact(file.as_fd(), &mut header, 0)?;
        if read_word(&header, MAGIC_OFFSET) != MAGIC {
            return Err(CorruptRegion::BadMagic.into());
        }
        let base_addr = read_word(&header, BASE_ADDR_OFFSET);

        // SAFETY: Without MAP_FIXED, no existing mappings are replaced.
        let data = unsafe {
            os_ext::mmap(
                base_addr as *mut libc::c_void,
                size,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE,
                Some(file.as_fd()),
                0,
            )?
        };

        let relocated = data.as_ptr() as u64 != base_addr;
        log::debug!(
            "Mapped {} at {:p}, {}",
            path.display(),
            data,
            if relocated { "relocating" } else { "at its base address" },
        );

        // NonNull is not Send, so the action keeps the address instead.
        let addr = data.as_ptr() as usize;
        let free_data = move || {
            // SAFETY: The region no longer uses the mapping.
            let result = unsafe { os_ext::munmap(addr as *mut libc::c_void, size) };
            if let Err(err) = result {
                log::warn!("Cannot unmap region at {:#x}: {}", addr, err);
            }
        };

        // SAFETY: The mapping is private to this region.
        unsafe {
            CompactedRegion::new(
                data.cast(),
                size,
                NonZeroU64::new(base_addr),
                true,
                free_data,
            )
        }
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::{compact::CompactorConfig, value::{Val, Value}},
        tempfile::tempdir,
    };

    fn graph() -> Value
    {
        let words = Value::string_from_bytes(b"mapped").unwrap();
        let number = Value::big_integer(false, &[0, 0, 1]).unwrap();
        Value::constructor(9, vec![words.clone(), number, words], &[1, 2, 3])
            .unwrap()
    }

    #[test]
    fn save_and_map()
    {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region");

        let root = graph();
        let mut compactor = Compactor::new(CompactorConfig::default());
        compactor.compact(&root).unwrap();
        compactor.compact(&Value::scalar_from_u8(3)).unwrap();
        save(&path, &compactor).unwrap();

        let mut region = CompactedRegion::map_file(&path).unwrap();
        assert!(region.is_memory_mapped());
        assert_eq!(region.size(), compactor.size());
        assert_eq!(region.root_count(), 2);

        let loaded = unsafe { region.read() }.unwrap();
        assert!(loaded.is_compacted());
        assert!(loaded.structurally_eq(&root));
        let scalar = unsafe { region.read() }.unwrap();
        assert!(matches!(scalar.borrow(), Val::Scalar(3)));

        drop((loaded, scalar));
        region.release();

        // The file is mapped privately, so it still holds the stored bytes.
        assert_eq!(fs::read(&path).unwrap(), compactor.data());
    }

    #[test]
    fn save_and_map_with_base_addr()
    {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region");

        let base_addr = NonZeroU64::new(0x6100_0000_0000).unwrap();
        let config = CompactorConfig::default().with_base_addr(base_addr);
        let root = graph();
        let mut compactor = Compactor::new(config);
        compactor.compact(&root).unwrap();
        save(&path, &compactor).unwrap();

        // Whether or not the hint is honored, the graph is intact.
        let mut region = CompactedRegion::map_file(&path).unwrap();
        assert_eq!(region.base_addr(), base_addr.get());
        let loaded = unsafe { region.read() }.unwrap();
        assert!(loaded.structurally_eq(&root));
    }

    #[test]
    fn missing_file()
    {
        let dir = tempdir().unwrap();
        let result = CompactedRegion::map_file(&dir.path().join("missing"));
        match result {
            Err(LoadError::Resource(err)) =>
                assert_eq!(err.kind(), io::ErrorKind::NotFound),
            Err(err) => panic!("Unexpected error: {}", err),
            Ok(_) => panic!("Missing file was loaded"),
        }
    }

    #[test]
    fn not_a_region()
    {
        let dir = tempdir().unwrap();
        let path = dir.path().join("text");
        fs::write(&path, b"This is not a compacted region.").unwrap();
        let result = CompactedRegion::map_file(&path);
        assert!(matches!(result, Err(LoadError::Corrupt(CorruptRegion::BadMagic))));
    }
}
