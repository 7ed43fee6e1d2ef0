use mcbridge::bridge::{Bridge, EnableOutcome};
use mcbridge::commands::{self, admin, bridge};
use mcbridge::{config::Config, Data};
use poise::serenity_prelude as serenity;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    let discord_token = config.discord_token.clone();

    let http = Arc::new(serenity::Http::new(&discord_token));
    let chat_bridge = Arc::new(Bridge::from_config(&config, http));

    let owners: HashSet<serenity::UserId> = config
        .owner_id
        .map(serenity::UserId::new)
        .into_iter()
        .collect();

    let setup_bridge = chat_bridge.clone();
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![bridge::bridge(), admin::shutdown()],
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(config.command_prefix.clone()),
                ..Default::default()
            },
            command_check: Some(|ctx| Box::pin(commands::access_check(ctx))),
            owners,
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                info!("Bot is ready!");

                if config.register_commands {
                    let commands = &framework.options().commands;
                    match config.dev_guild_id {
                        Some(guild_id) => {
                            poise::builtins::register_in_guild(
                                ctx,
                                commands,
                                serenity::GuildId::new(guild_id),
                            )
                            .await?;
                            info!("Registered commands in guild {}", guild_id);
                        }
                        None => {
                            poise::builtins::register_globally(ctx, commands).await?;
                            info!("Registered commands globally");
                        }
                    }
                }

                // Set bot status
                ctx.set_activity(Some(serenity::ActivityData::custom(&config.status_message)));

                if config.bridge_autostart {
                    match setup_bridge.enable().await {
                        Ok(EnableOutcome::Started) => info!("Chat bridge autostarted"),
                        Ok(EnableOutcome::AlreadyActive) => {}
                        Err(e) => warn!("Chat bridge autostart skipped: {}", e),
                    }
                }

                Ok(Data {
                    config,
                    bridge: setup_bridge,
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_MESSAGES;

    let mut client = serenity::ClientBuilder::new(&discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    let shard_manager = client.shard_manager.clone();
    let signal_bridge = chat_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        info!("Ctrl-C received, shutting down");
        if let Err(e) = signal_bridge.shutdown().await {
            error!("Failed to flush chat bridge state: {:#}", e);
        }
        shard_manager.shutdown_all().await;
    });

    info!("Starting bot...");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    // Flush once more in case the gateway stopped on its own.
    chat_bridge.shutdown().await?;
    Ok(())
}
