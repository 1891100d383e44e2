use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn write_states(&self, content: &str) -> PathBuf {
        let path = self.root.path().join("states.yaml");
        fs::write(&path, content).unwrap();
        path
    }

    /// 存在しないソケットを指す接続設定
    #[allow(dead_code)]
    pub fn write_unreachable_config(&self) -> PathBuf {
        let socket = self.root.path().join("missing.socket");
        let path = self.root.path().join("incusflow.yaml");
        fs::write(
            &path,
            format!(
                "connection:\n  type: unix\n  socket: {}\n",
                socket.display()
            ),
        )
        .unwrap();
        path
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }
}
