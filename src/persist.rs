//! Raw flash-partition persistence for the custom modem/user name and feature flags.
//!
//! Grounded in `original_source/.../command.c`'s `set_custom_modem_name`/`set_custom_user_name`,
//! which `pwrite`/`pread` fixed-offset, fixed-length strings directly into the `persist`
//! partition rather than using a filesystem or key-value store: offset 64 for a 32-byte modem
//! name field, offset 96 for a 32-byte user name field, and offset 131072 (128 KiB in) for a
//! single feature-flag byte, all chosen by the original to sit well clear of the partition's other
//! consumers. This crate keeps the exact offsets and field widths so a partition written by the
//! original firmware round-trips through this implementation unchanged.
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use std::path::Path;

use crate::errors::BridgeResult;

/// Byte offset of the custom modem name field.
pub const MODEM_NAME_OFFSET: u64 = 64;
/// Byte offset of the custom user name field.
pub const USER_NAME_OFFSET: u64 = 96;
/// Width, in bytes, of each name field (NUL-padded).
pub const NAME_FIELD_LEN: usize = 32;
/// Byte offset of the feature-flag byte.
pub const FLAGS_OFFSET: u64 = 131_072;

async fn write_field(path: &Path, offset: u64, value: &str) -> BridgeResult<()> {
    let mut buf = vec![0u8; NAME_FIELD_LEN];
    let bytes = value.as_bytes();
    let n = bytes.len().min(NAME_FIELD_LEN);
    buf[..n].copy_from_slice(&bytes[..n]);
    let mut file = OpenOptions::new().write(true).open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(&buf).await?;
    Ok(())
}

async fn read_field(path: &Path, offset: u64) -> BridgeResult<String> {
    let mut buf = vec![0u8; NAME_FIELD_LEN];
    let mut file = OpenOptions::new().read(true).open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.read_exact(&mut buf).await?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// Persist a custom modem name.
pub async fn write_modem_name(path: &Path, name: &str) -> BridgeResult<()> {
    write_field(path, MODEM_NAME_OFFSET, name).await
}

/// Read back the persisted custom modem name.
pub async fn read_modem_name(path: &Path) -> BridgeResult<String> {
    read_field(path, MODEM_NAME_OFFSET).await
}

/// Persist a custom user name.
pub async fn write_user_name(path: &Path, name: &str) -> BridgeResult<()> {
    write_field(path, USER_NAME_OFFSET, name).await
}

/// Read back the persisted custom user name.
pub async fn read_user_name(path: &Path) -> BridgeResult<String> {
    read_field(path, USER_NAME_OFFSET).await
}

/// Persist the single feature-flag byte.
pub async fn write_flags(path: &Path, flags: u8) -> BridgeResult<()> {
    let mut file = OpenOptions::new().write(true).open(path).await?;
    file.seek(SeekFrom::Start(FLAGS_OFFSET)).await?;
    file.write_all(&[flags]).await?;
    Ok(())
}

/// Read back the feature-flag byte.
pub async fn read_flags(path: &Path) -> BridgeResult<u8> {
    let mut file = OpenOptions::new().read(true).open(path).await?;
    file.seek(SeekFrom::Start(FLAGS_OFFSET)).await?;
    let mut buf = [0u8; 1];
    file.read_exact(&mut buf).await?;
    Ok(buf[0])
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::fs::File;

    async fn scratch_partition() -> tempfile_like::TempPath {
        tempfile_like::TempPath::new(FLAGS_OFFSET as usize + 4096).await
    }

    // Minimal scratch-file helper: avoids pulling in `tempfile` purely for one test module.
    mod tempfile_like {
        use super::*;
        use std::path::PathBuf;

        pub struct TempPath(pub PathBuf);
        impl TempPath {
            pub async fn new(size: usize) -> Self {
                let path = std::env::temp_dir().join(format!(
                    "qti-bridge-persist-test-{}",
                    rand::random::<u64>()
                ));
                let file = File::create(&path).await.unwrap();
                file.set_len(size as u64).await.unwrap();
                TempPath(path)
            }
        }
        impl Drop for TempPath {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.0);
            }
        }
        impl std::ops::Deref for TempPath {
            type Target = PathBuf;
            fn deref(&self) -> &PathBuf {
                &self.0
            }
        }
    }

    #[tokio::test]
    async fn modem_name_round_trips() {
        let partition = scratch_partition().await;
        write_modem_name(&partition, "test-modem").await.unwrap();
        assert_eq!(read_modem_name(&partition).await.unwrap(), "test-modem");
    }

    #[tokio::test]
    async fn fields_do_not_overlap() {
        let partition = scratch_partition().await;
        write_modem_name(&partition, "modem").await.unwrap();
        write_user_name(&partition, "user").await.unwrap();
        assert_eq!(read_modem_name(&partition).await.unwrap(), "modem");
        assert_eq!(read_user_name(&partition).await.unwrap(), "user");
    }

    #[tokio::test]
    async fn flags_round_trip() {
        let partition = scratch_partition().await;
        write_flags(&partition, 0b0000_1010).await.unwrap();
        assert_eq!(read_flags(&partition).await.unwrap(), 0b0000_1010);
    }
}
