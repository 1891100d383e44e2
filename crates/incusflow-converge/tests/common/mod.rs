use incusflow_client::testing::FakeIncus;
use incusflow_converge::{Context, StateFile};
use serde_json::json;

/// In-memory control plane with a default pool and a bridge
pub struct TestCloud {
    pub fake: FakeIncus,
}

impl TestCloud {
    pub fn new() -> Self {
        let fake = FakeIncus::new();
        fake.seed(
            "/storage-pools/default",
            json!({"name": "default", "driver": "dir"}),
        );
        fake.seed(
            "/profiles/default",
            json!({
                "name": "default",
                "devices": {"root": {"type": "disk", "path": "/", "pool": "default"}}
            }),
        );
        Self { fake }
    }

    /// Empty control plane
    #[allow(dead_code)]
    pub fn empty() -> Self {
        Self {
            fake: FakeIncus::new(),
        }
    }

    pub fn context(&self, dry_run: bool) -> Context {
        Context::new(self.fake.client()).with_dry_run(dry_run)
    }
}

pub fn state_file(content: &str) -> StateFile {
    StateFile::from_yaml_str(content).unwrap()
}
