// Module declarations
mod assembler;
mod cli;
mod composer;
mod config;
mod db;
mod discord;
mod error;
mod facebook;
mod notify;
mod publisher;
mod resolver;
mod safety;
mod source;
mod types;

// Re-export module items at the crate root so cross-module references stay
// short.
#[allow(unused_imports)]
pub(crate) use assembler::*;
#[allow(unused_imports)]
pub(crate) use cli::*;
#[allow(unused_imports)]
pub(crate) use composer::*;
#[allow(unused_imports)]
pub(crate) use config::*;
#[allow(unused_imports)]
pub(crate) use db::*;
#[allow(unused_imports)]
pub(crate) use discord::*;
#[allow(unused_imports)]
pub(crate) use error::*;
#[allow(unused_imports)]
pub(crate) use facebook::*;
#[allow(unused_imports)]
pub(crate) use notify::*;
#[allow(unused_imports)]
pub(crate) use publisher::*;
#[allow(unused_imports)]
pub(crate) use resolver::*;
#[allow(unused_imports)]
pub(crate) use safety::*;
#[allow(unused_imports)]
pub(crate) use source::*;
#[allow(unused_imports)]
pub(crate) use types::*;

use clap::Parser;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Post { kind, test } => {
            let config = Config::load(&cli.config)?;
            let published = !test;
            tracing::info!(kind = kind.as_str(), test, "post command");

            let db = RequestDb::open(&config.db_path)?;
            let source = SubtitleSource::new(&config);
            let transport = GraphApi::new(config.graph_url.clone(), config.facebook_token.clone());
            let classifier: Box<dyn SafetyClassifier> = match &config.classifier_url {
                Some(url) => Box::new(HttpClassifier::new(url.clone())),
                None => {
                    tracing::warn!("no classifier endpoint configured, safety gate disabled");
                    Box::new(DisabledClassifier)
                }
            };
            let alerts: Box<dyn AlertChannel> = match &config.discord_webhook {
                Some(url) => Box::new(DiscordWebhook::new(url.clone())),
                None => Box::new(NoopAlerts),
            };

            let publisher = Publisher::new(
                &config,
                &db,
                &source,
                &transport,
                classifier.as_ref(),
                alerts.as_ref(),
            );
            match publisher.run(kind, published) {
                Ok(Some(post_id)) => tracing::info!(post = %post_id, "finished"),
                Ok(None) => tracing::info!("finished without publishing"),
                Err(err) => {
                    tracing::error!(error = %err, "run aborted");
                    std::process::exit(1);
                }
            }
            Ok(())
        }
    }
}
