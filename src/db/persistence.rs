//! Index persistence: save and load the committed snapshots.
//!
//! Uses bincode for compact binary serialization. Writes go to a `.tmp`
//! file that is then renamed over the image, so a crash mid-write leaves
//! the previous image intact.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use super::types::TuSnapshot;
use super::SymbolDb;
use crate::error::{IndexError, Result};

/// Bumped whenever the snapshot layout changes; older images are rejected
/// and rebuilt from source.
const IMAGE_VERSION: u32 = 1;

/// On-disk form of the database. Indexes are derived on load.
#[derive(Serialize, Deserialize)]
struct IndexImage {
    version: u32,
    units: Vec<TuSnapshot>,
}

impl SymbolDb {
    /// Save all committed snapshots to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        info!(path = %path.display(), units = self.units.len(), "saving index");

        let image = IndexImage {
            version: IMAGE_VERSION,
            units: self.units.values().cloned().collect(),
        };
        let bytes = bincode::serialize(&image).map_err(|e| IndexError::Serialize(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;

        debug!(bytes = bytes.len(), "index saved");
        Ok(())
    }

    pub(super) fn load_units(path: &Path) -> Result<Vec<TuSnapshot>> {
        info!(path = %path.display(), "loading index");

        let bytes = fs::read(path)?;
        let image: IndexImage =
            bincode::deserialize(&bytes).map_err(|e| IndexError::Load(format!("bincode: {}", e)))?;
        if image.version != IMAGE_VERSION {
            return Err(IndexError::Load(format!(
                "image version {} (expected {})",
                image.version, IMAGE_VERSION
            )));
        }
        Ok(image.units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::{SymbolLocation, SymbolRecord};
    use std::path::PathBuf;
    use std::time::SystemTime;
    use tempfile::tempdir;

    #[test]
    fn test_save_creates_parent_and_keeps_snapshots() {
        let mut db = SymbolDb::in_memory();
        let mut tu = TuSnapshot::new("lib/util.c", Some(SystemTime::now()));
        let helper = SymbolRecord {
            name: "helper".into(),
            usr: "c:@F@helper".into(),
            location: SymbolLocation::new("lib/util.c", 4, 5),
        };
        tu.insert_decl_with_def(helper.clone(), helper);
        tu.insert_header("util.h".into(), Some(PathBuf::from("lib/util.h")));
        db.insert_snapshot(tu.clone());

        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("symbols.db");
        db.save(&path).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());

        let units = SymbolDb::load_units(&path).unwrap();
        assert_eq!(units, vec![tu]);
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("symbols.db");
        let stale = IndexImage {
            version: IMAGE_VERSION + 1,
            units: Vec::new(),
        };
        fs::write(&path, bincode::serialize(&stale).unwrap()).unwrap();

        assert!(matches!(SymbolDb::load_units(&path), Err(IndexError::Load(_))));
    }

    #[test]
    fn test_load_nonexistent_file() {
        assert!(SymbolDb::load_units(Path::new("/nonexistent/symbols.db")).is_err());
    }
}
