use anyhow::Result;

/// A long-running component started and stopped by a CLI command.
#[async_trait::async_trait]
pub trait LifecycleComponent {
    async fn on_init(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_start(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}
