use std::{future::Future, time::Duration};

#[cfg(feature = "redis-tokio")]
type Interval = tokio::time::Interval;

#[cfg(all(feature = "redis-smol", not(feature = "redis-tokio")))]
type Interval = smol::Timer;

#[cfg(feature = "redis-tokio")]
fn new_interval(period: Duration) -> Interval {
    tokio::time::interval(period)
}

#[cfg(all(feature = "redis-smol", not(feature = "redis-tokio")))]
fn new_interval(period: Duration) -> Interval {
    smol::Timer::interval(period)
}

#[cfg(feature = "redis-tokio")]
fn spawn_task<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(fut);
}

#[cfg(all(feature = "redis-smol", not(feature = "redis-tokio")))]
fn spawn_task<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    smol::spawn(fut).detach();
}

#[cfg(feature = "redis-tokio")]
async fn tick(interval: &mut Interval) {
    interval.tick().await;
}

#[cfg(all(feature = "redis-smol", not(feature = "redis-tokio")))]
async fn tick(interval: &mut Interval) {
    use futures::StreamExt;
    interval.next().await;
}

/// Run `step` every `period` on a detached task until it returns `false`.
///
/// The first run happens one full period after spawning.
pub(crate) fn spawn_periodic<F>(period: Duration, mut step: F)
where
    F: FnMut() -> bool + Send + 'static,
{
    spawn_task(async move {
        let mut interval = new_interval(period);

        // Tokio's interval completes its first tick immediately.
        #[cfg(feature = "redis-tokio")]
        tick(&mut interval).await;

        loop {
            tick(&mut interval).await;

            if !step() {
                break;
            }
        }
    });
}
