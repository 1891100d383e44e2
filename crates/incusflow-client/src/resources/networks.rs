//! Network runtime views

use super::Collection;
use crate::error::Result;
use crate::model::Network;
use http::Method;
use serde_json::Value;

impl Collection<'_, Network> {
    async fn sub_resource(&self, name: &str, leaf: &str) -> Result<Value> {
        let response = self
            .client()
            .request(
                Method::GET,
                &format!("{}/{}", self.item_path(name), leaf),
                None,
                &[],
            )
            .await?;
        Ok(response.metadata)
    }

    /// Addresses, counters and link state
    pub async fn state(&self, name: &str) -> Result<Value> {
        self.sub_resource(name, "state").await
    }

    /// DHCP leases handed out by a managed network
    pub async fn leases(&self, name: &str) -> Result<Vec<Value>> {
        let leases = self.sub_resource(name, "leases").await?;
        if leases.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(leases)?)
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::FakeIncus;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_state_and_leases() {
        let fake = FakeIncus::new();
        fake.seed("/networks/incusbr0", json!({"name": "incusbr0", "managed": true}));
        let client = fake.client();
        let networks = client.networks();

        let state = networks.state("incusbr0").await.unwrap();
        assert_eq!(state["state"], "up");
        assert!(networks.leases("incusbr0").await.unwrap().is_empty());
        assert!(networks.state("missing").await.unwrap_err().is_not_found());
    }
}
