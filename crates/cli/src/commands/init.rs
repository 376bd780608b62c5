use colored::Colorize;
use pb_core::init::{generate_bridge_structure, InitOptions};
use std::path::PathBuf;

pub async fn run(
    target_dir: PathBuf,
    remote_url: Option<String>,
    force: bool,
    minimal: bool,
) -> color_eyre::Result<()> {
    let created = generate_bridge_structure(InitOptions {
        target_dir,
        remote_url,
        force,
        minimal,
    })
    .await?;

    println!("{} {}", "Created".green().bold(), created.display());
    println!("  config.toml");
    if !minimal {
        println!("  stages.yaml");
    }
    println!();
    println!("Next: edit config.toml, then run `pipeline-bridge check`.");
    Ok(())
}
