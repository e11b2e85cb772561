use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use rstest::fixture;

/// A directory under the system temp dir, removed on drop when it is the root
pub struct TmpDir {
    temp_dir: PathBuf,
    base: bool,
}

impl TmpDir {
    pub fn get_path(&self) -> &Path {
        &self.temp_dir
    }

    pub fn create_dir(&self, name: &str) -> TmpDir {
        let path = self.temp_dir.join(name);
        fs::create_dir_all(&path).expect("failed to make temp directory");
        TmpDir {
            temp_dir: path,
            base: false,
        }
    }

    /// Create `name` (which may contain directories) with the given content,
    /// or empty
    pub fn create_file_name(&self, name: &str, content: Option<&str>) -> PathBuf {
        let path = self.temp_dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create directories for new file");
        }
        fs::write(&path, content.unwrap_or("")).expect("failed to write temp file");
        path
    }

    /// A path inside the directory that doesn't exist yet
    pub fn child_path(&self, name: &str) -> PathBuf {
        self.temp_dir.join(name)
    }
}

impl Drop for TmpDir {
    fn drop(&mut self) {
        if self.base {
            _ = fs::remove_dir_all(&self.temp_dir);
        }
    }
}

#[fixture]
pub fn tmp_dir() -> TmpDir {
    let rand_name: u64 = rand::thread_rng().gen();
    let temp_dir = std::env::temp_dir().join(format!("surfprobe_test_{}", rand_name));
    fs::create_dir_all(&temp_dir).expect("failed to make base temp directory");
    TmpDir {
        temp_dir,
        base: true,
    }
}
