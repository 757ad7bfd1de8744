//! Full stack example: retry + breaker + timeout + throttle around a flaky upstream.
use lifeline::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let attempts = Arc::new(AtomicUsize::new(0));
    let upstream = {
        let attempts = attempts.clone();
        call_fn(move |_ctx: Context| {
            let attempts = attempts.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ResilienceError::Inner(std::io::Error::other("transient")))
                } else {
                    Ok::<_, ResilienceError<std::io::Error>>("recovered")
                }
            }
        })
    };

    let stack = upstream
        .throttle(32, 4, Duration::from_millis(250))?
        .timeout()
        .breaker(5)?
        .retry(4, Duration::from_millis(100))
        .with_jitter(Jitter::Equal);

    let ctx = Context::background().with_timeout(Duration::from_secs(2));
    let result = stack.call(ctx).await?;

    println!("stack result: {result} after {} attempts", attempts.load(Ordering::SeqCst));
    Ok(())
}
