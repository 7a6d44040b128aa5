/// Process runtime context.
///
/// Carries the shutdown signal shared by every task of a process.
pub struct RuntimeContext {
    /// Runtime event bus.
    pub shutdown: (
        tokio::sync::broadcast::Sender<()>,
        tokio::sync::broadcast::Receiver<()>,
    ),
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self {
            shutdown: tokio::sync::broadcast::channel(1),
        }
    }

    /// Listen for shutdown signal.
    pub fn shutdown_signal(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.shutdown.0.subscribe()
    }

    /// Signal every listener to shut down.
    pub fn shutdown(&self) {
        self.shutdown.0.send(()).ok();
    }

    /// Shut down on the first interrupt signal.
    pub fn enable_termination_signal(&self) {
        let sender = self.shutdown.0.clone();

        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for interrupt signal: {}", e);
                return;
            }

            log::info!("Termination requested");

            sender.send(()).ok();
        });
    }

    /// Spawn an asynchronous task in the background.
    ///
    /// The task will be terminated when the shutdown signal is received.
    pub fn spawn_background_task<T>(&self, task: T)
    where
        T: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown_signal();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.recv() => {
                    log::debug!("Shutting down background task");
                }
                _ = task => {}
            }
        });
    }

    /// Wait for the runtime to shutdown.
    pub async fn wait_for_shutdown(&self) {
        let mut shutdown = self.shutdown_signal();

        shutdown.recv().await.ok();
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}
