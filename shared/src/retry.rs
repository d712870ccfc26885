use rand::random;
use std::time::Duration;
use tokio::time;

/// Maximum number of attempts when retrying a conflicting Kubernetes write.
pub const MAX_UPDATE_TRIES: i8 = 5;

/// Delays a random amount up to 200ms.
///
/// Used to stagger retries of conflicting updates (e.g. bootstrap token
/// rotation, instance bookkeeping) issued by multiple reconcile workers at
/// roughly the same time.
pub async fn random_delay() {
    let random_decimal: f32 = random::<f32>();
    let random_delay_0_to_200: u64 = (200_f32 * random_decimal) as u64;
    time::sleep(Duration::from_millis(random_delay_0_to_200)).await;
}
