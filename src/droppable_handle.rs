use tokio::task::JoinHandle;

// Task handle that aborts its task when dropped, so background pumps and
// listeners never outlive whatever owns them.
#[derive(Debug)]
pub struct DroppableHandle<T>(pub(crate) JoinHandle<T>);

impl<T> DroppableHandle<T> {
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }

    // Waits for the task without aborting it.
    pub async fn join(mut self) -> Option<T> {
        (&mut self.0).await.ok()
    }
}

impl<T> Drop for DroppableHandle<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
