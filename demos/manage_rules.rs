//! Rule management example.
//!
//! Usage:
//! - `manage_rules list`
//! - `manage_rules add <tag> <value...>`
//! - `manage_rules delete <tag>`
//! - `manage_rules clear`
//!
//! Reads the service token from `VK_SERVICE_TOKEN`.

use std::error::Error;

use secrecy::SecretString;
use tracing_subscriber::EnvFilter;
use vkstream_sdk::VkStream;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let token = SecretString::new(std::env::var("VK_SERVICE_TOKEN")?);
    let args: Vec<String> = std::env::args().skip(1).collect();
    let session = VkStream::with_token(&token).await?;

    match args.first().map(String::as_str) {
        Some("list") | None => {
            for rule in session.get_rules().await? {
                println!("{}\t{}", rule.tag, rule.value);
            }
        }
        Some("add") if args.len() >= 3 => {
            session.add_rule(&args[2..].join(" "), &args[1]).await?;
            println!("added {}", args[1]);
        }
        Some("delete") if args.len() == 2 => {
            session.delete_rule(&args[1]).await?;
            println!("deleted {}", args[1]);
        }
        Some("clear") => match session.delete_all_rules().await {
            Ok(cleared) => println!("deleted {} rule(s)", cleared.removed.len()),
            Err(err) => {
                eprintln!("deleted {:?} before failing", err.removed);
                return Err(err.into());
            }
        },
        Some(other) => return Err(format!("unknown or incomplete command: {other}").into()),
    }

    Ok(())
}
