//! A burst of keystrokes against both debounce flavours.
//!
//! The cached variant hits upstream on the first keystroke and answers the rest from its
//! cache. The deferred variant waits for the typing to stop and then runs once.
use lifeline::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn search(hits: Arc<AtomicUsize>) -> impl Call<Response = String, Error = String> {
    call_fn(move |_ctx: Context| {
        let hits = hits.clone();
        async move {
            let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
            Ok::<_, ResilienceError<String>>(format!("suggestions #{n}"))
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), ConfigError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let cached_hits = Arc::new(AtomicUsize::new(0));
    let deferred_hits = Arc::new(AtomicUsize::new(0));
    let cached = search(cached_hits.clone()).debounce(Duration::from_millis(300))?;
    let deferred = search(deferred_hits.clone()).deferred_debounce(Duration::from_millis(300))?;

    for key in "lifeline".chars() {
        let now = cached.call(Context::background()).await;
        let later = deferred.call(Context::background()).await;
        println!("typed {key:?}: cached={now:?} deferred={later:?}");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    println!(
        "upstream hits: cached={} deferred={}",
        cached_hits.load(Ordering::SeqCst),
        deferred_hits.load(Ordering::SeqCst)
    );
    println!("settled: {:?}", deferred.call(Context::background()).await);
    Ok(())
}
