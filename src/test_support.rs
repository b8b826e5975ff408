//! Helpers for tests that talk to a mocked Ollama HTTP API.

/// Serve `router` on an ephemeral loopback port and return its base URL.
pub(crate) async fn spawn_backend(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Base URL of a port that was bound and released, so connections are refused.
pub(crate) async fn dead_backend() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Mock backend that can be taken down mid-test.
pub(crate) struct StoppableBackend {
    pub(crate) base_url: String,
    stop: tokio::sync::oneshot::Sender<()>,
    server: tokio::task::JoinHandle<()>,
}

impl StoppableBackend {
    /// Stop accepting connections and close the idle ones.
    pub(crate) async fn stop(self) {
        let _ = self.stop.send(());
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), self.server).await;
    }
}

pub(crate) async fn spawn_stoppable_backend(router: axum::Router) -> StoppableBackend {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = stopped.await;
            })
            .await
            .unwrap();
    });
    StoppableBackend { base_url: format!("http://{addr}"), stop, server }
}
