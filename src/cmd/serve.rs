//! Ticket desk server command: `beanbotics serve`.

use anyhow::Result;

use beanbotics::config::DeskConfig;
use beanbotics::desk::{reasoning, server};

/// CLI flags layered over the file and environment configuration.
#[derive(Debug, Default)]
pub struct ServeOverrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub dev: bool,
    pub no_agent: bool,
}

pub fn apply_overrides(config: &mut DeskConfig, overrides: ServeOverrides) {
    if let Some(port) = overrides.port {
        config.server.port = port;
    }
    if let Some(host) = overrides.host {
        config.server.host = host;
    }
    if overrides.dev {
        config.server.dev_mode = true;
    }
    if overrides.no_agent {
        config.agent.enabled = false;
    }
}

pub async fn cmd_serve(mut config: DeskConfig, overrides: ServeOverrides) -> Result<()> {
    apply_overrides(&mut config, overrides);
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let sampler = reasoning::build_sampler(&config.reasoning)?;
    if let Some(sampler) = &sampler {
        tracing::info!(backend = %config.reasoning.backend, sampler = sampler.name(), "reasoning backend ready");
    }

    server::start_server(&config, sampler).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let mut config = DeskConfig::default();
        apply_overrides(
            &mut config,
            ServeOverrides {
                port: Some(8123),
                host: None,
                dev: true,
                no_agent: true,
            },
        );
        assert_eq!(config.server.port, 8123);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.server.dev_mode);
        assert!(!config.agent.enabled);

        let mut config = DeskConfig::default();
        apply_overrides(&mut config, ServeOverrides::default());
        assert_eq!(config.server.port, 5000);
        assert!(config.agent.enabled);
    }
}
