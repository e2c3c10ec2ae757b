// Shared helpers for broker integration tests
#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;
use subagent::config::SubagentConfig;
use subagent::{serve, Client, ClientOptions, SessionId, SessionPaths};
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A broker serving a throwaway session inside a temp directory
pub struct TestBroker {
    pub temp: TempDir,
    pub paths: SessionPaths,
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<anyhow::Result<()>>>,
}

impl TestBroker {
    pub async fn start() -> Self {
        Self::start_session("test-session").await
    }

    pub async fn start_session(session: &str) -> Self {
        let temp = TempDir::new().expect("create temp dir");
        let paths = session_paths(temp.path(), session);
        let (stop, stopped) = oneshot::channel::<()>();

        let serve_paths = paths.clone();
        let handle = tokio::spawn(async move {
            serve(serve_paths, async move {
                let _ = stopped.await;
            })
            .await
        });

        wait_for_socket(&paths.socket).await;
        Self {
            temp,
            paths,
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    /// Connected and registered client for `agent_id`
    pub async fn client(&self, agent_id: &str) -> Client {
        Client::new(&self.paths, agent_id, "test task", test_options())
            .await
            .expect("client connects")
    }

    /// Config whose socket and state directories point at this broker
    pub fn config(&self) -> SubagentConfig {
        let mut config = SubagentConfig::default();
        config.broker.socket_dir = Some(self.temp.path().to_path_buf());
        config.supervisor.state_dir = self.temp.path().join("state");
        config.broker.request_timeout_ms = 2_000;
        config.worker.poll_interval_secs = 1;
        config
    }

    /// Wait for the serve task after the broker shut itself down
    pub async fn join(&mut self) -> anyhow::Result<()> {
        match self.handle.take() {
            Some(handle) => tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("broker stops in time")
                .expect("broker task does not panic"),
            None => Ok(()),
        }
    }

    pub async fn stop(mut self) -> anyhow::Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.join().await
    }
}

pub fn session_paths(root: &Path, session: &str) -> SessionPaths {
    SessionPaths::new(
        SessionId::new(session).expect("valid session id"),
        root,
        &root.join("state"),
    )
}

pub fn test_options() -> ClientOptions {
    ClientOptions {
        connect_timeout: Duration::from_millis(500),
        request_timeout: Duration::from_secs(2),
    }
}

pub async fn wait_for_socket(socket: &Path) {
    for _ in 0..200 {
        if socket.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("broker socket {} never appeared", socket.display());
}
