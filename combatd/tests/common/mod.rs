//! Common test utilities - CombatdTest harness for end-to-end testing

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use combatd::encounter::EncounterRegistry;
use combatd::{Config, Server};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

/// Test harness that spawns a real combatd server on a random port
pub struct CombatdTest {
    addr: SocketAddr,
    client: Client,
    server: Arc<Server>,
    _handle: JoinHandle<()>,
}

impl CombatdTest {
    /// Start a server with an in-memory database
    pub async fn start() -> Result<Self> {
        Self::start_with(Config::default()).await
    }

    /// Start a server from `config`, overriding only the bind address
    pub async fn start_with(mut config: Config) -> Result<Self> {
        // Find a random available port
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);
        config.bind_addr = addr;

        let server = Arc::new(Server::new(config).await?);
        let server_clone = server.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = server_clone.run().await {
                eprintln!("Server error: {}", e);
            }
        });

        let client = Client::builder().timeout(Duration::from_secs(5)).build()?;

        // Poll until server is ready (max 2 seconds)
        let mut ready = false;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if client
                .get(format!("http://{}/health", addr))
                .send()
                .await
                .is_ok()
            {
                ready = true;
                break;
            }
        }

        if !ready {
            panic!("Server failed to start within 2 seconds");
        }

        Ok(Self {
            addr,
            client,
            server,
            _handle: handle,
        })
    }

    fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .get(format!("{}{}", self.base_url(), path))
            .send()
            .await?)
    }

    /// Make a POST request with JSON body
    pub async fn post<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        Ok(self
            .client
            .post(format!("{}{}", self.base_url(), path))
            .json(body)
            .send()
            .await?)
    }

    /// Make a POST request without a body
    pub async fn post_empty(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .post(format!("{}{}", self.base_url(), path))
            .send()
            .await?)
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .delete(format!("{}{}", self.base_url(), path))
            .send()
            .await?)
    }

    /// Direct access to the live encounters
    pub fn registry(&self) -> Arc<EncounterRegistry> {
        self.server.registry()
    }

    /// Shutdown the server gracefully
    pub fn shutdown(&self) {
        self.server.shutdown();
    }

    /// Create an encounter with a fixed id
    pub async fn create_encounter(&self, id: &str) -> Result<Value> {
        let resp = self
            .post("/encounters", &json!({"id": id, "name": id}))
            .await?;
        anyhow::ensure!(resp.status() == 201, "create failed: {}", resp.status());
        Ok(resp.json().await?)
    }

    /// Add a combatant with pre-rolled initiative and return its id
    pub async fn add_combatant(
        &self,
        encounter: &str,
        name: &str,
        hp: i32,
        initiative: i32,
    ) -> Result<u64> {
        let resp = self
            .post(
                &format!("/encounters/{}/combatants", encounter),
                &json!({
                    "name": name,
                    "max_hp": hp,
                    "armor_class": 12,
                    "initiative": initiative,
                }),
            )
            .await?;
        anyhow::ensure!(resp.status() == 201, "add failed: {}", resp.status());
        let body: Value = resp.json().await?;
        body["result"]["id"]
            .as_u64()
            .ok_or_else(|| anyhow::anyhow!("no combatant id in {}", body))
    }
}

impl Drop for CombatdTest {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}
