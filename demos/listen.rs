//! Listen stream example.
//!
//! Resolves stream credentials from a service token, installs one rule,
//! prints matching events for a while and then stops the stream.
//!
//! Environment:
//! - `VK_SERVICE_TOKEN`: application service token (required).
//! - `VK_RULE`: rule value, defaults to `golang -rust`.
//! - `VK_LISTEN_SECS`: how long to listen, defaults to 60.
//! - `RUST_LOG`: log filter, defaults to `info`.

use std::error::Error;
use std::time::Duration;

use secrecy::SecretString;
use tracing_subscriber::EnvFilter;
use vkstream_sdk::retry::{retry_async, RetryPolicy};
use vkstream_sdk::{StreamEnd, VkError, VkStream};

const RULE_TAG: &str = "listen-demo";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let token = SecretString::new(std::env::var("VK_SERVICE_TOKEN")?);
    let rule = std::env::var("VK_RULE").unwrap_or_else(|_| "golang -rust".to_string());
    let listen_for = Duration::from_secs(
        std::env::var("VK_LISTEN_SECS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(60),
    );

    // The account API rate limits per second; retry only what is worth retrying.
    let session = retry_async(
        &RetryPolicy::rate_limited(),
        |_| VkStream::with_token(&token),
        VkError::is_retryable,
    )
    .await?;

    match session.add_rule(&rule, RULE_TAG).await {
        Ok(()) => {}
        Err(VkError::Streaming { code, message }) => {
            println!("rule {RULE_TAG} not added ({code}: {message}), keeping existing rules");
        }
        Err(err) => return Err(err.into()),
    }

    let mut events = session.start().await?;
    println!("listening on {} for {listen_for:?}", session.endpoint());

    let deadline = tokio::time::sleep(listen_for);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => {
                session.stop().await?;
                break;
            }
            next = events.recv() => match next {
                Some(event) => println!("{} [{}] {}", event.event_url, event.tags.join(","), event.text),
                None => break,
            },
        }
    }

    println!("stats: {:?}", events.stats());
    match events.into_end_reason() {
        Some(StreamEnd::Failed(err)) => eprintln!("stream failed: {err}"),
        Some(reason) => println!("stream ended: {reason:?}"),
        None => {}
    }

    if let Err(err) = session.delete_rule(RULE_TAG).await {
        eprintln!("failed to delete rule {RULE_TAG}: {err}");
    }
    Ok(())
}
