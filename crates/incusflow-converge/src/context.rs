//! Per-run context handed to every state function

use incusflow_client::IncusClient;

/// The client to act through and whether to only report
#[derive(Debug, Clone)]
pub struct Context {
    pub client: IncusClient,
    pub dry_run: bool,
}

impl Context {
    pub fn new(client: IncusClient) -> Self {
        Self {
            client,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn client(&self) -> &IncusClient {
        &self.client
    }
}
