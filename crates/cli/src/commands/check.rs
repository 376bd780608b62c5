use colored::Colorize;
use pb_core::config::{load_config, CONFIG_DIR};
use std::path::Path;

pub async fn run(root: &Path) -> color_eyre::Result<()> {
    let config = load_config(root).await?;
    let cross_origin = config.host_origin != config.remote_origin;

    println!(
        "{} {}",
        "Configuration OK".green().bold(),
        root.join(CONFIG_DIR).display()
    );
    println!("  remote url:       {}", config.remote_url);
    println!("  target origin:    {}", config.remote_origin.cyan());
    println!("  host origin:      {}", config.host_origin);
    println!(
        "  install mode:     {}",
        if cross_origin {
            "INSTALL_BRIDGE message (cross-origin)"
        } else {
            "direct install (same origin)"
        }
    );
    println!("  max attempts:     {}", config.max_attempts);
    println!(
        "  timings:          settle {} ms, ready {} ms, handshake {} ms",
        config.settle_delay.as_millis(),
        config.ready_timeout.as_millis(),
        config.handshake_timeout.as_millis()
    );

    println!("{}", "Allowed origins".bold());
    for origin in &config.allowed_origins {
        println!("  {origin}");
    }

    println!("{}", "Stages".bold());
    for stage in &config.stages {
        let color = stage.color.as_deref().unwrap_or("-");
        println!("  {:>2}  {:<14} {:<16} {color}", stage.order, stage.id, stage.name);
    }
    Ok(())
}
