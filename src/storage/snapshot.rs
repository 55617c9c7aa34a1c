use super::region::RegionData;
use super::{Admin, RegionInfo, SnapshotRef};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

const MAGIC: u32 = 0x1DC0_0001;
const VERSION_CURRENT: u32 = 2;
const STATE_COMMITTED: u32 = 0x0000_0001;
const STATE_INCOMPLETE: u32 = 0xFFFF_FFFF;
// magic + version + state + body_len(u64) + xxh3(u64)
const HEADER_SIZE: usize = 4 + 4 + 4 + 8 + 8;

/// 快照 region 的落盘文件（一个 region 一个文件）
///
/// 先写 INCOMPLETE header 与 bincode body 到 `.tmp`，回填 COMMITTED header 后 fsync 并 rename。
/// 加载时 header 任一字段或 body 摘要不符都视为无效。
pub struct SnapshotStore {
    path: PathBuf,
}

/// 边写边算摘要
struct DigestWriter<'a, W: Write> {
    inner: &'a mut W,
    digest: Xxh3,
    bytes: u64,
}

impl<'a, W: Write> Write for DigestWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.digest.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn header(state: u32, body_len: u64, digest: u64) -> [u8; HEADER_SIZE] {
    let mut h = [0u8; HEADER_SIZE];
    h[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    h[4..8].copy_from_slice(&VERSION_CURRENT.to_le_bytes());
    h[8..12].copy_from_slice(&state.to_le_bytes());
    h[12..20].copy_from_slice(&body_len.to_le_bytes());
    h[20..28].copy_from_slice(&digest.to_le_bytes());
    h
}

fn read_u32(data: &[u8], at: usize) -> anyhow::Result<u32> {
    Ok(u32::from_le_bytes(data[at..at + 4].try_into()?))
}

fn read_u64(data: &[u8], at: usize) -> anyhow::Result<u64> {
    Ok(u64::from_le_bytes(data[at..at + 8].try_into()?))
}

impl SnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// 加载 region（校验 header 与摘要）；文件缺失或损坏返回 None
    pub fn load_if_valid(&self) -> anyhow::Result<Option<RegionData>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let data = std::fs::read(&self.path)?;
        if data.len() < HEADER_SIZE {
            tracing::warn!("Restored region file too small, ignoring: {:?}", self.path);
            return Ok(None);
        }

        let magic = read_u32(&data, 0)?;
        let version = read_u32(&data, 4)?;
        let state = read_u32(&data, 8)?;
        let body_len = read_u64(&data, 12)?;
        let stored = read_u64(&data, 20)?;

        if magic != MAGIC || version != VERSION_CURRENT {
            tracing::warn!(
                "Region file {:?} has unknown format (magic {:#x}, version {})",
                self.path,
                magic,
                version
            );
            return Ok(None);
        }
        if state != STATE_COMMITTED {
            tracing::warn!("Region file {:?} is INCOMPLETE, ignoring", self.path);
            return Ok(None);
        }

        let body = &data[HEADER_SIZE..];
        if body.len() as u64 != body_len {
            tracing::warn!("Region file {:?} length mismatch", self.path);
            return Ok(None);
        }
        let computed = xxh3_64(body);
        if computed != stored {
            tracing::warn!(
                "Region file {:?} digest mismatch: {:#x} != {:#x}",
                self.path,
                computed,
                stored
            );
            return Ok(None);
        }

        match bincode::deserialize::<RegionData>(body) {
            Ok(region) => Ok(Some(region)),
            Err(e) => {
                tracing::warn!("Region file deserialize failed: {}", e);
                Ok(None)
            }
        }
    }

    /// 原子写入 region
    pub fn write_atomic(&self, region: &RegionData) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("region.tmp");

        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&header(STATE_INCOMPLETE, 0, 0))?;

        let (body_len, digest) = {
            let mut w = DigestWriter {
                inner: &mut file,
                digest: Xxh3::new(),
                bytes: 0,
            };
            bincode::serialize_into(&mut w, region)?;
            (w.bytes, w.digest.digest())
        };

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header(STATE_COMMITTED, body_len, digest))?;
        file.sync_all()?;

        std::fs::rename(&tmp_path, &self.path)?;

        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        tracing::debug!(
            "Region {} restored: {} rows, {} bytes",
            region.info.name,
            region.rows.len(),
            HEADER_SIZE as u64 + body_len
        );
        Ok(())
    }
}

/// 将快照的各 region 还原为 `dir` 下的独立文件，返回 (region, 文件路径)
pub fn restore_snapshot(
    admin: &dyn Admin,
    snapshot: &SnapshotRef,
    dir: &Path,
) -> anyhow::Result<Vec<(RegionInfo, PathBuf)>> {
    let regions = admin.snapshot_regions(snapshot)?;
    let mut restored = Vec::with_capacity(regions.len());
    for (i, region) in regions.iter().enumerate() {
        let path = dir.join(format!("region-{:05}.region", i));
        SnapshotStore::new(path.clone()).write_atomic(region)?;
        restored.push((region.info.clone(), path));
    }
    tracing::info!(
        "Restored snapshot {} into {:?} ({} regions)",
        snapshot.name,
        dir,
        restored.len()
    );
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Cell, KeyRange, Mutation};

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("ix-rdd-snap-{}-{}", tag, nanos))
    }

    fn sample_region() -> RegionData {
        let mut r = RegionData::new(RegionInfo {
            table: "T".into(),
            name: "T,,1".into(),
            range: KeyRange::all(),
        });
        r.apply(&Mutation::Put {
            row: b"row-1".to_vec(),
            cells: vec![Cell::put("0", "NAME", b"alice".to_vec(), 7)],
        });
        r
    }

    #[test]
    fn write_then_load_region() {
        let dir = unique_tmp_dir("roundtrip");
        let store = SnapshotStore::new(dir.join("r.region"));
        store.write_atomic(&sample_region()).unwrap();

        let loaded = store.load_if_valid().unwrap().unwrap();
        assert_eq!(loaded.info.name, "T,,1");
        assert_eq!(loaded.rows.len(), 1);
    }

    #[test]
    fn corrupted_body_is_rejected() {
        let dir = unique_tmp_dir("corrupt");
        let path = dir.join("r.region");
        let store = SnapshotStore::new(path.clone());
        store.write_atomic(&sample_region()).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        assert!(store.load_if_valid().unwrap().is_none());
    }

    #[test]
    fn missing_file_is_none() {
        let store = SnapshotStore::new(unique_tmp_dir("missing").join("nope.region"));
        assert!(store.load_if_valid().unwrap().is_none());
    }
}
