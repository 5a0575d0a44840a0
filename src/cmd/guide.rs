//! Guide selection command: `beanbotics guide <issue>`.

use std::path::Path;

use anyhow::{Context, Result};

use beanbotics::config::DeskConfig;
use beanbotics::desk::guides::{GuideLibrary, GuideSelector};
use beanbotics::desk::reasoning;

pub async fn cmd_guide(config: &DeskConfig, config_path: &Path, issue: &str, json: bool) -> Result<()> {
    let issue = issue.trim();
    if issue.is_empty() {
        anyhow::bail!("Issue description must not be empty");
    }

    let Some(sampler) = reasoning::build_sampler(&config.reasoning)? else {
        anyhow::bail!(
            "No reasoning backend configured. Set reasoning.backend in {} or BEANBOTICS_REASONING_BACKEND.",
            config_path.display()
        );
    };

    let selector = GuideSelector::new(
        sampler,
        GuideLibrary::new(&config.guides.dir),
        config.agent.timeout(),
    );
    let selection = selector.select(issue).await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&selection).context("Failed to serialize selection")?
        );
    } else {
        println!("Guide: {}", selection.guide_name);
        println!("{}", selection.selection_reason);
        if selection.defaulted {
            println!("(default guide used: the backend gave no usable answer)");
        }
        println!();
        println!("{}", selection.content);
    }
    Ok(())
}
