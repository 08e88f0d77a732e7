use std::{
    io::{ErrorKind, SeekFrom},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use bytes::Bytes;
use log::warn;
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};

use super::{ByteRange, NodeKey, NodeName, Store, StoreError};

/// Store mapping keys to files under a root directory.
///
/// The root is given as a `file://` URI or a plain path and is created
/// if it does not exist.
pub struct FileSystemStore {
    base_path: PathBuf,
}

impl FileSystemStore {
    /// Does not check or modify the path.
    pub fn new_unchecked(path: PathBuf) -> Self {
        Self { base_path: path }
    }

    /// Open (creating if necessary) a store rooted at the given
    /// `file://` URI or plain path.
    pub fn open_or_create(uri: &str) -> Result<Self, StoreError> {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        let base_path = PathBuf::from(path);
        if base_path.is_file() {
            return Err(StoreError::Other(format!(
                "store root {} exists, but it is a file",
                base_path.display()
            )));
        }
        std::fs::create_dir_all(&base_path).map_err(StoreError::Io)?;
        Ok(Self { base_path })
    }

    fn get_path(&self, key: &NodeKey) -> PathBuf {
        let mut p = self.base_path.clone();
        for k in key.as_slice().iter() {
            p.push(k.as_ref());
        }
        p
    }

    async fn open_reader(&self, key: &NodeKey) -> Result<Option<fs::File>, StoreError> {
        match fs::File::open(self.get_path(key)).await {
            Ok(f) => Ok(Some(f)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn key_for_entry(&self, path: &Path) -> Option<NodeKey> {
        let rel = path.strip_prefix(&self.base_path).ok()?;
        let mut key = NodeKey::default();
        for part in rel.iter() {
            let name = match part.to_str() {
                Some(n) => n,
                None => {
                    warn!("Skipping node with non-UTF8 name: {:?}", part);
                    return None;
                }
            };
            key.push(name.parse::<NodeName>().ok()?);
        }
        Some(key)
    }
}

#[async_trait]
impl Store for FileSystemStore {
    async fn get(&self, key: &NodeKey) -> Result<Option<Bytes>, StoreError> {
        match fs::read(self.get_path(key)).await {
            Ok(buf) => Ok(Some(buf.into())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_partial_values(
        &self,
        key: &NodeKey,
        ranges: &[ByteRange],
    ) -> Result<Option<Vec<Bytes>>, StoreError> {
        let mut f = match self.open_reader(key).await? {
            Some(f) => f,
            None => return Ok(None),
        };
        let size = f.metadata().await.map_err(StoreError::Io)?.len();

        let mut out = Vec::with_capacity(ranges.len());
        for range in ranges {
            let (start, length) = (range.start(size), range.length(size));
            if range.end(size) > size {
                return Err(StoreError::OutOfRange(*range, size));
            }
            f.seek(SeekFrom::Start(start)).await.map_err(StoreError::Io)?;
            let mut buf = vec![0u8; length as usize];
            f.read_exact(&mut buf).await.map_err(StoreError::Io)?;
            out.push(buf.into());
        }
        Ok(Some(out))
    }

    async fn set(&self, key: &NodeKey, value: Bytes) -> Result<(), StoreError> {
        let path = self.get_path(key);
        if !key.is_root() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await.map_err(StoreError::Io)?;
            }
        }
        fs::write(path, &value).await.map_err(StoreError::Io)
    }

    async fn set_partial_values(
        &self,
        key: &NodeKey,
        writes: &[(u64, Bytes)],
    ) -> Result<(), StoreError> {
        let path = self.get_path(key);
        if !key.is_root() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await.map_err(StoreError::Io)?;
            }
        }
        let mut f = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(path)
            .await
            .map_err(StoreError::Io)?;
        for (offset, data) in writes {
            // seeking past EOF extends the file with zeros on write
            f.seek(SeekFrom::Start(*offset)).await.map_err(StoreError::Io)?;
            f.write_all(data).await.map_err(StoreError::Io)?;
        }
        f.flush().await.map_err(StoreError::Io)
    }

    async fn erase(&self, key: &NodeKey) -> Result<(), StoreError> {
        match fs::remove_file(self.get_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_prefix(&self, prefix: &NodeKey) -> Result<Vec<NodeKey>, StoreError> {
        let root = self.get_path(prefix);
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        let mut to_visit = vec![root];
        while let Some(dir) = to_visit.pop() {
            let mut entries = fs::read_dir(&dir).await.map_err(StoreError::Io)?;
            while let Some(entry) = entries.next_entry().await.map_err(StoreError::Io)? {
                let path = entry.path();
                let ftype = entry.file_type().await.map_err(StoreError::Io)?;
                if ftype.is_dir() {
                    to_visit.push(path);
                } else if let Some(key) = self.key_for_entry(&path) {
                    out.push(key);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn key(s: &str) -> NodeKey {
        s.parse().unwrap()
    }

    fn make_store(tmp: &TempDir) -> FileSystemStore {
        let uri = format!("file://{}", tmp.path().join("root").display());
        FileSystemStore::open_or_create(&uri).unwrap()
    }

    #[tokio::test]
    async fn roundtrip() {
        let tmp = TempDir::new("fsstore").unwrap();
        let store = make_store(&tmp);

        let k = key("arr/c/0/0");
        assert_eq!(store.get(&k).await.unwrap(), None);
        store.set(&k, Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(
            store.get(&k).await.unwrap(),
            Some(Bytes::from_static(b"hello"))
        );
    }

    #[tokio::test]
    async fn partial_reads() {
        let tmp = TempDir::new("fsstore").unwrap();
        let store = make_store(&tmp);

        let k = key("a");
        store
            .set(&k, Bytes::from_static(b"0123456789"))
            .await
            .unwrap();
        let got = store
            .get_partial_values(
                &k,
                &[
                    ByteRange::Interval {
                        offset: 4,
                        length: 2,
                    },
                    ByteRange::Suffix(3),
                ],
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got[0], Bytes::from_static(b"45"));
        assert_eq!(got[1], Bytes::from_static(b"789"));
    }

    #[tokio::test]
    async fn partial_writes_extend() {
        let tmp = TempDir::new("fsstore").unwrap();
        let store = make_store(&tmp);

        let k = key("a");
        store
            .set_partial_values(&k, &[(3, Bytes::from_static(b"xy"))])
            .await
            .unwrap();
        assert_eq!(
            store.get(&k).await.unwrap().unwrap(),
            Bytes::from_static(b"\0\0\0xy")
        );
    }

    #[tokio::test]
    async fn erase_and_list() {
        let tmp = TempDir::new("fsstore").unwrap();
        let store = make_store(&tmp);

        for k in ["arr/zarr.json", "arr/c/0/0", "other/x"] {
            store.set(&key(k), Bytes::from_static(b"v")).await.unwrap();
        }
        let mut listed: Vec<_> = store
            .list_prefix(&key("arr"))
            .await
            .unwrap()
            .iter()
            .map(|k| k.encode())
            .collect();
        listed.sort();
        assert_eq!(listed, vec!["arr/c/0/0", "arr/zarr.json"]);

        store.erase(&key("arr/c/0/0")).await.unwrap();
        store.erase(&key("arr/c/0/0")).await.unwrap();
        assert!(!store.has_key(&key("arr/c/0/0")).await.unwrap());
    }
}
